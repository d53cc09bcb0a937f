//! Reports built locally from aggregated collections.

use crate::aggregate::{PROFILE_FIELD, REGION_FIELD};
use crate::aws::auth::mask_secret;
use crate::aws::credentials::CredentialStore;
use crate::resource::extract_json_value;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Counts of instances per type, VPC and availability zone
pub fn ec2_summary(instances: &[Value]) -> Value {
    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_vpc: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_zone: BTreeMap<String, u64> = BTreeMap::new();

    for instance in instances {
        *by_type
            .entry(extract_json_value(instance, "InstanceType"))
            .or_default() += 1;
        // Instances outside a VPC or without placement are not counted there
        if instance.get("VpcId").is_some_and(Value::is_string) {
            *by_vpc.entry(extract_json_value(instance, "VpcId")).or_default() += 1;
        }
        let zone = extract_json_value(instance, "Placement.AvailabilityZone");
        if zone != "-" {
            *by_zone.entry(zone).or_default() += 1;
        }
    }

    json!({
        "total": instances.len(),
        "InstanceType": by_type,
        "VpcId": by_vpc,
        "AvailabilityZone": by_zone,
    })
}

/// Per owning profile: bucket count and counts per location
pub fn s3_summary(buckets: &[Value]) -> Value {
    let mut summary: BTreeMap<String, (u64, BTreeMap<String, u64>)> = BTreeMap::new();

    for bucket in buckets {
        let profile = bucket
            .get(PROFILE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string();
        let location = match bucket.get("LocationConstraint") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => "global".to_string(),
        };

        let (total, locations) = summary.entry(profile).or_default();
        *total += 1;
        *locations.entry(location).or_default() += 1;
    }

    let map: Map<String, Value> = summary
        .into_iter()
        .map(|(profile, (total, locations))| {
            (
                profile,
                json!({"total_count": total, "locations": locations}),
            )
        })
        .collect();
    Value::Object(map)
}

/// User name -> profile -> group names, `null` where the user is absent.
/// Expects users enriched with `GroupsByProfile`.
pub fn iam_user_matrix(users: &[Value], profiles: &[String]) -> BTreeMap<String, Value> {
    users
        .iter()
        .filter_map(|user| {
            let name = user.get("UserName")?.as_str()?;
            let by_profile = user.get("GroupsByProfile").and_then(Value::as_object);
            let row: Map<String, Value> = profiles
                .iter()
                .map(|profile| {
                    let groups = by_profile
                        .and_then(|m| m.get(profile))
                        .cloned()
                        .unwrap_or(Value::Null);
                    (profile.clone(), groups)
                })
                .collect();
            Some((name.to_string(), Value::Object(row)))
        })
        .collect()
}

/// Security groups keyed by `GroupId`, each listing the instances
/// (`vm_list`) and load balancers (`elb_list`) that use it
pub fn security_group_usage(
    groups: Vec<Value>,
    instances: &[Value],
    load_balancers: &[Value],
) -> BTreeMap<String, Value> {
    let mut usage: BTreeMap<String, Value> = BTreeMap::new();
    for mut group in groups {
        let Some(id) = group.get("GroupId").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        if let Value::Object(fields) = &mut group {
            fields.insert("vm_list".to_string(), json!([]));
            fields.insert("elb_list".to_string(), json!([]));
        }
        usage.insert(id, group);
    }

    for instance in instances {
        let Some(instance_id) = instance.get("InstanceId") else {
            continue;
        };
        // Flattened: GroupId -> group reference
        let Some(attached) = instance.get("SecurityGroups").and_then(Value::as_object) else {
            continue;
        };
        for group_id in attached.keys() {
            append(&mut usage, group_id, "vm_list", instance_id);
        }
    }

    for elb in load_balancers {
        let Some(name) = elb.get("LoadBalancerName") else {
            continue;
        };
        let groups = match elb.get("SecurityGroups") {
            Some(Value::Array(ids)) => ids.clone(),
            Some(Value::String(id)) if !id.is_empty() => vec![Value::String(id.clone())],
            _ => Vec::new(),
        };
        for group_id in groups.iter().filter_map(Value::as_str) {
            append(&mut usage, group_id, "elb_list", name);
        }
    }

    usage
}

fn append(usage: &mut BTreeMap<String, Value>, group_id: &str, list: &str, entry: &Value) {
    if let Some(Value::Array(items)) = usage.get_mut(group_id).and_then(|g| g.get_mut(list)) {
        if !items.contains(entry) {
            items.push(entry.clone());
        }
    }
}

/// Tags keyed by resource id, from `ec2-tags` records
pub fn resource_tags(tags: &[Value]) -> BTreeMap<String, Value> {
    let mut resources: BTreeMap<String, Value> = BTreeMap::new();
    for tag in tags {
        let (Some(resource_id), Some(key)) = (
            tag.get("ResourceId").and_then(Value::as_str),
            tag.get("Key").and_then(Value::as_str),
        ) else {
            continue;
        };

        let entry = resources.entry(resource_id.to_string()).or_insert_with(|| {
            json!({
                "ResourceType": tag.get("ResourceType").cloned().unwrap_or(Value::Null),
                PROFILE_FIELD: tag.get(PROFILE_FIELD).cloned().unwrap_or(Value::Null),
                REGION_FIELD: tag.get(REGION_FIELD).cloned().unwrap_or(Value::Null),
                "Tags": {},
            })
        });
        if let Some(Value::Object(map)) = entry.get_mut("Tags") {
            map.insert(
                key.to_string(),
                tag.get("Value").cloned().unwrap_or(Value::Null),
            );
        }
    }
    resources
}

/// Profile -> access key id, masked secret, owner id
pub fn profile_summary(store: &CredentialStore) -> BTreeMap<String, Value> {
    store
        .profiles()
        .into_iter()
        .map(|profile| {
            let summary = json!({
                "access_key_id": store.access_key_id(&profile),
                "secret_access_key": store.secret_access_key(&profile).map(mask_secret),
                "owner_id": store.owner_id(&profile),
            });
            (profile, summary)
        })
        .collect()
}
