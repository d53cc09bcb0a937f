//! Enrichment passes
//!
//! Each pass takes an aggregated collection and adds fields to every record
//! with one extra provider call per record, made through the record's owning
//! cell. A failed, forbidden or missing result writes `null` into the pass's
//! fields instead of failing the collection.
//!
//! In parallel mode records are split into batches that run concurrently.
//! Batches return patches and only this module's caller-side loop writes to
//! the records, so every record is patched exactly once.

use crate::aggregate::{observers, run_units, FanOut, PROFILE_FIELD, REGION_FIELD};
use crate::aws::service::{Service, GLOBAL_SIGNING_REGION};
use crate::aws::xml::as_list;
use crate::error::{Error, ProviderError, ProviderResult, Result};
use crate::filter::{Comparison, FilterClause};
use crate::matrix::{MatrixCell, ServiceMatrix};
use crate::resource::{paginate, Operation, Provider};
use serde_json::{json, Map, Value};

/// Fields written by one pass
type Patch = Map<String, Value>;

/// Set when a bucket's location could not be looked up, so its `null`
/// `LocationConstraint` is not mistaken for `us-east-1`. Cleared by a later
/// successful lookup.
pub const LOCATION_ERROR_FIELD: &str = "location_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enrichment {
    /// `LocationConstraint`
    BucketLocation,
    /// `Policy` (document text)
    BucketPolicy,
    /// `Tags` (key -> value)
    BucketTagging,
    /// `objects`, `object_count`, `object_size`, `LastModified`
    BucketObjects,
    /// `Groups`, `GroupsByProfile`
    UserGroups,
    /// `Permissions` per observing profile
    UserPermissions,
    /// `Permissions` per observing profile
    RolePermissions,
}

impl Enrichment {
    pub fn service(self) -> Service {
        match self {
            Enrichment::BucketLocation
            | Enrichment::BucketPolicy
            | Enrichment::BucketTagging
            | Enrichment::BucketObjects => Service::S3,
            Enrichment::UserGroups | Enrichment::UserPermissions | Enrichment::RolePermissions => {
                Service::Iam
            }
        }
    }

    fn name(self) -> &'static str {
        match self {
            Enrichment::BucketLocation => "bucket-location",
            Enrichment::BucketPolicy => "bucket-policy",
            Enrichment::BucketTagging => "bucket-tagging",
            Enrichment::BucketObjects => "bucket-objects",
            Enrichment::UserGroups => "user-groups",
            Enrichment::UserPermissions => "user-permissions",
            Enrichment::RolePermissions => "role-permissions",
        }
    }

    /// The absent sentinel for every field this pass writes
    fn absent(self) -> Patch {
        let fields: &[&str] = match self {
            Enrichment::BucketLocation => return location_failed("lookup did not complete"),
            Enrichment::BucketPolicy => &["Policy"],
            Enrichment::BucketTagging => &["Tags"],
            Enrichment::BucketObjects => &["objects", "object_count", "object_size", "LastModified"],
            Enrichment::UserGroups => &["Groups", "GroupsByProfile"],
            Enrichment::UserPermissions | Enrichment::RolePermissions => &["Permissions"],
        };
        fields
            .iter()
            .map(|f| (f.to_string(), Value::Null))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnrichOptions {
    pub fan_out: FanOut,
    /// Records per batch in parallel mode
    pub batch_size: usize,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            fan_out: FanOut::Sequential,
            batch_size: 10,
        }
    }
}

/// Run one enrichment pass over `records`
pub async fn enrich(
    matrix: &ServiceMatrix,
    records: &mut [Value],
    enrichment: Enrichment,
    options: &EnrichOptions,
) -> Result<()> {
    if matrix.service() != enrichment.service() {
        return Err(Error::config(format!(
            "{} needs a {} matrix, got {}",
            enrichment.name(),
            enrichment.service(),
            matrix.service()
        )));
    }

    let indexed: Vec<(usize, Value)> = records.iter().cloned().enumerate().collect();
    let batches: Vec<Vec<(usize, Value)>> = indexed
        .chunks(options.batch_size.max(1))
        .map(<[_]>::to_vec)
        .collect();
    let batch_indexes: Vec<Vec<usize>> = batches
        .iter()
        .map(|batch| batch.iter().map(|(idx, _)| *idx).collect())
        .collect();

    tracing::debug!(
        pass = enrichment.name(),
        records = records.len(),
        batches = batches.len(),
        "enriching"
    );

    let outcomes = run_units(batches, options.fan_out, |batch| async move {
        let mut patches = Vec::with_capacity(batch.len());
        for (idx, record) in batch {
            patches.push((idx, record_patch(matrix, &record, enrichment).await));
        }
        patches
    })
    .await;

    for (indexes, outcome) in batch_indexes.into_iter().zip(outcomes) {
        let patches = match outcome {
            Some(patches) => patches,
            None => {
                tracing::warn!(
                    pass = enrichment.name(),
                    records = indexes.len(),
                    "enrichment batch timed out"
                );
                indexes
                    .into_iter()
                    .map(|idx| (idx, enrichment.absent()))
                    .collect()
            }
        };
        for (idx, patch) in patches {
            if let Some(Value::Object(fields)) = records.get_mut(idx) {
                apply_patch(fields, patch);
            }
        }
    }

    Ok(())
}

/// A `null` location marker in a patch removes the marker
fn apply_patch(fields: &mut Map<String, Value>, patch: Patch) {
    for (key, value) in patch {
        if key == LOCATION_ERROR_FIELD && value.is_null() {
            fields.remove(&key);
        } else {
            fields.insert(key, value);
        }
    }
}

async fn record_patch(matrix: &ServiceMatrix, record: &Value, enrichment: Enrichment) -> Patch {
    let profile = record.get(PROFILE_FIELD).and_then(Value::as_str).unwrap_or_default();
    let region = record.get(REGION_FIELD).and_then(Value::as_str);
    let Some(cell) = matrix.cell(profile, region) else {
        tracing::warn!(profile, pass = enrichment.name(), "no client for record's profile");
        return enrichment.absent();
    };

    match enrichment {
        Enrichment::BucketLocation => bucket_location(cell, record).await,
        Enrichment::BucketPolicy => bucket_policy(cell, record).await,
        Enrichment::BucketTagging => bucket_tagging(cell, record).await,
        Enrichment::BucketObjects => bucket_objects(cell, record).await,
        Enrichment::UserGroups => user_groups(matrix, cell, record).await,
        Enrichment::UserPermissions | Enrichment::RolePermissions => {
            permissions(matrix, record, enrichment).await
        }
    }
}

fn warn_failure(cell: &MatrixCell, pass: Enrichment, target: &str, error: &ProviderError) {
    tracing::warn!(
        profile = %cell.profile,
        pass = pass.name(),
        target,
        error = %error,
        "enrichment call failed"
    );
}

// =============================================================================
// S3
// =============================================================================

/// Region serving a bucket with the given `LocationConstraint`
pub fn bucket_region(location: &Value) -> String {
    match location.as_str() {
        None | Some("") => GLOBAL_SIGNING_REGION.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

fn bucket_name(record: &Value) -> &str {
    record.get("Name").and_then(Value::as_str).unwrap_or_default()
}

async fn fetch_location(cell: &MatrixCell, bucket: &str) -> ProviderResult<Value> {
    let response = cell
        .provider
        .invoke(&Operation::GetBucketLocation {
            bucket: bucket.to_string(),
        })
        .await?;
    Ok(response.get("LocationConstraint").cloned().unwrap_or(Value::Null))
}

async fn bucket_location(cell: &MatrixCell, record: &Value) -> Patch {
    let bucket = bucket_name(record);
    match fetch_location(cell, bucket).await {
        Ok(location) => located(location),
        Err(e) => {
            warn_failure(cell, Enrichment::BucketLocation, bucket, &e);
            location_failed(&e.to_string())
        }
    }
}

fn located(location: Value) -> Patch {
    Patch::from_iter([
        ("LocationConstraint".to_string(), location),
        (LOCATION_ERROR_FIELD.to_string(), Value::Null),
    ])
}

fn location_failed(reason: &str) -> Patch {
    Patch::from_iter([
        ("LocationConstraint".to_string(), Value::Null),
        (LOCATION_ERROR_FIELD.to_string(), Value::String(reason.to_string())),
    ])
}

/// Bucket-addressed calls go to the bucket's own region. The location is
/// looked up first when the record does not carry it yet, or when an
/// earlier lookup failed.
async fn routed_region(cell: &MatrixCell, record: &Value, patch: &mut Patch) -> String {
    if let Some(location) = record.get("LocationConstraint") {
        if record.get(LOCATION_ERROR_FIELD).is_none() {
            return bucket_region(location);
        }
    }
    let bucket = bucket_name(record);
    match fetch_location(cell, bucket).await {
        Ok(location) => {
            let region = bucket_region(&location);
            patch.extend(located(location));
            region
        }
        Err(e) => {
            tracing::debug!(bucket, error = %e, "location unknown, using default region");
            GLOBAL_SIGNING_REGION.to_string()
        }
    }
}

async fn bucket_policy(cell: &MatrixCell, record: &Value) -> Patch {
    let bucket = bucket_name(record);
    let mut patch = Patch::new();
    let region = routed_region(cell, record, &mut patch).await;

    let op = Operation::GetBucketPolicy {
        bucket: bucket.to_string(),
        region: Some(region),
    };
    let policy = match cell.provider.invoke(&op).await {
        Ok(response) => response.get("Policy").cloned().unwrap_or(Value::Null),
        Err(e) if e.is_not_found() => {
            tracing::debug!(bucket, "no bucket policy");
            Value::Null
        }
        Err(e) => {
            warn_failure(cell, Enrichment::BucketPolicy, bucket, &e);
            Value::Null
        }
    };
    patch.insert("Policy".to_string(), policy);
    patch
}

async fn bucket_tagging(cell: &MatrixCell, record: &Value) -> Patch {
    let bucket = bucket_name(record);
    let mut patch = Patch::new();
    let region = routed_region(cell, record, &mut patch).await;

    let op = Operation::GetBucketTagging {
        bucket: bucket.to_string(),
        region: Some(region),
    };
    let tags = match cell.provider.invoke(&op).await {
        Ok(response) => {
            let mut tags = Map::new();
            if let Some(tag_set) = response.pointer("/TagSet/Tag") {
                for tag in as_list(tag_set) {
                    if let (Some(key), Some(value)) = (
                        tag.get("Key").and_then(Value::as_str),
                        tag.get("Value"),
                    ) {
                        tags.insert(key.to_string(), value.clone());
                    }
                }
            }
            Value::Object(tags)
        }
        Err(e) if e.is_not_found() => {
            tracing::debug!(bucket, "no tag set");
            Value::Null
        }
        Err(e) => {
            warn_failure(cell, Enrichment::BucketTagging, bucket, &e);
            Value::Null
        }
    };
    patch.insert("Tags".to_string(), tags);
    patch
}

async fn bucket_objects(cell: &MatrixCell, record: &Value) -> Patch {
    let bucket = bucket_name(record);
    let mut patch = Patch::new();
    let region = routed_region(cell, record, &mut patch).await;

    let listed = paginate(
        cell.provider.as_ref(),
        Some("NextContinuationToken"),
        |token| Operation::ListObjectsV2 {
            bucket: bucket.to_string(),
            region: Some(region.clone()),
            continuation_token: token,
        },
        |response| {
            response
                .get("Contents")
                .map(|contents| {
                    as_list(contents)
                        .into_iter()
                        .map(object_info)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        },
    )
    .await;

    let objects = match listed {
        Ok(objects) => objects,
        Err(e) => {
            warn_failure(cell, Enrichment::BucketObjects, bucket, &e);
            patch.extend(Enrichment::BucketObjects.absent());
            return patch;
        }
    };

    let count = objects.len();
    let size: u64 = objects
        .iter()
        .filter_map(|o| o.get("Size").and_then(Value::as_u64))
        .sum();
    // ISO-8601 timestamps in one format order lexically
    let newest = objects
        .iter()
        .filter_map(|o| o.get("LastModified").and_then(Value::as_str))
        .max()
        .map(|s| Value::String(s.to_string()))
        .unwrap_or(Value::Null);

    patch.insert(
        "objects".to_string(),
        if objects.is_empty() {
            Value::Null
        } else {
            Value::Array(objects)
        },
    );
    patch.insert("object_count".to_string(), json!(count));
    patch.insert("object_size".to_string(), json!(size));
    patch.insert("LastModified".to_string(), newest);
    patch
}

fn object_info(content: &Value) -> Value {
    let size = match content.get("Size") {
        Some(Value::String(s)) => s.parse::<u64>().map(Value::from).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    json!({
        "Key": content.get("Key").cloned().unwrap_or(Value::Null),
        "Size": size,
        "LastModified": content.get("LastModified").cloned().unwrap_or(Value::Null),
    })
}

// =============================================================================
// IAM
// =============================================================================

fn user_name(record: &Value) -> &str {
    record.get("UserName").and_then(Value::as_str).unwrap_or_default()
}

async fn list_member(
    provider: &dyn Provider,
    result: &str,
    list: &str,
    make_op: impl FnMut(Option<String>) -> Operation,
) -> ProviderResult<Vec<Value>> {
    let token_path = format!("{}.Marker", result);
    let pointer = format!("/{}/{}", result, list);
    paginate(provider, Some(&token_path), make_op, |response| {
        response
            .pointer(&pointer)
            .map(|v| as_list(v).into_iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default()
    })
    .await
}

async fn groups_for_user(cell: &MatrixCell, user: &str) -> ProviderResult<Vec<Value>> {
    list_member(
        cell.provider.as_ref(),
        "ListGroupsForUserResult",
        "Groups",
        |marker| Operation::ListGroupsForUser {
            user_name: user.to_string(),
            marker,
        },
    )
    .await
}

async fn user_groups(matrix: &ServiceMatrix, owner: &MatrixCell, record: &Value) -> Patch {
    let user = user_name(record);
    let mut by_profile = Map::new();
    let mut owner_groups = Value::Null;

    for profile in observers(record) {
        let Some(cell) = matrix.cell(&profile, None) else {
            by_profile.insert(profile, Value::Null);
            continue;
        };
        match groups_for_user(cell, user).await {
            Ok(groups) => {
                let names: Vec<Value> = groups
                    .iter()
                    .filter_map(|g| g.get("GroupName").cloned())
                    .collect();
                if cell.profile == owner.profile {
                    owner_groups = Value::Array(groups);
                }
                by_profile.insert(profile, Value::Array(names));
            }
            Err(e) => {
                warn_failure(cell, Enrichment::UserGroups, user, &e);
                by_profile.insert(profile, Value::Null);
            }
        }
    }

    Patch::from_iter([
        ("Groups".to_string(), owner_groups),
        ("GroupsByProfile".to_string(), Value::Object(by_profile)),
    ])
}

async fn principal_permissions(
    cell: &MatrixCell,
    record: &Value,
    enrichment: Enrichment,
) -> ProviderResult<Value> {
    let provider = cell.provider.as_ref();
    let (attached, inline) = if enrichment == Enrichment::UserPermissions {
        let user = user_name(record).to_string();
        let attached = list_member(
            provider,
            "ListAttachedUserPoliciesResult",
            "AttachedPolicies",
            |marker| Operation::ListAttachedUserPolicies {
                user_name: user.clone(),
                marker,
            },
        )
        .await?;
        let inline = list_member(provider, "ListUserPoliciesResult", "PolicyNames", |marker| {
            Operation::ListUserPolicies {
                user_name: user.clone(),
                marker,
            }
        })
        .await?;
        (attached, inline)
    } else {
        let role = record
            .get("RoleName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let attached = list_member(
            provider,
            "ListAttachedRolePoliciesResult",
            "AttachedPolicies",
            |marker| Operation::ListAttachedRolePolicies {
                role_name: role.clone(),
                marker,
            },
        )
        .await?;
        let inline = list_member(provider, "ListRolePoliciesResult", "PolicyNames", |marker| {
            Operation::ListRolePolicies {
                role_name: role.clone(),
                marker,
            }
        })
        .await?;
        (attached, inline)
    };

    Ok(json!({
        "AttachedPolicies": attached,
        "InlinePolicies": inline,
    }))
}

async fn permissions(matrix: &ServiceMatrix, record: &Value, enrichment: Enrichment) -> Patch {
    let mut by_profile = Map::new();
    for profile in observers(record) {
        let entry = match matrix.cell(&profile, None) {
            Some(cell) => match principal_permissions(cell, record, enrichment).await {
                Ok(entry) => entry,
                Err(e) => {
                    let target = record
                        .get("UserName")
                        .or_else(|| record.get("RoleName"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    warn_failure(cell, enrichment, target, &e);
                    Value::Null
                }
            },
            None => Value::Null,
        };
        by_profile.insert(profile, entry);
    }
    Patch::from_iter([("Permissions".to_string(), Value::Object(by_profile))])
}

// =============================================================================
// Local passes
// =============================================================================

const PASS: &str = "PASS";
const FAIL: &str = "FAIL";

/// Check bucket names against `naming_policy` and `Tags` against `tagset`.
///
/// Writes `validations: {nameresult, tagresult, result}`. Buckets whose tags
/// could not be read fail the tag check. Without a naming policy the name
/// check is `N/A`.
pub fn validate_buckets(
    records: &mut [Value],
    naming_policy: Option<&str>,
    tagset: &[String],
) -> Result<()> {
    let name_check = naming_policy
        .map(|policy| {
            FilterClause::new(
                0,
                "Name",
                vec![Value::String(policy.to_string())],
                Comparison::Eq,
                true,
            )
        })
        .transpose()?;

    for record in records.iter_mut() {
        let nameresult = match &name_check {
            Some(clause) if clause.matches(record) => PASS.to_string(),
            Some(_) => format!("{}: name does not match naming policy", FAIL),
            None => "N/A".to_string(),
        };

        let tags = record.get("Tags").and_then(Value::as_object);
        let tagresult = match tags {
            None if !tagset.is_empty() => format!("{}: no tags", FAIL),
            _ => {
                let missing: Vec<&str> = tagset
                    .iter()
                    .filter(|key| !tags.is_some_and(|t| t.contains_key(key.as_str())))
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    PASS.to_string()
                } else {
                    format!("{}: missing {}", FAIL, missing.join(", "))
                }
            }
        };

        let result = if nameresult.starts_with(FAIL) || tagresult.starts_with(FAIL) {
            FAIL
        } else {
            PASS
        };

        if let Value::Object(fields) = record {
            fields.insert(
                "validations".to_string(),
                json!({
                    "nameresult": nameresult,
                    "tagresult": tagresult,
                    "result": result,
                }),
            );
        }
    }
    Ok(())
}
