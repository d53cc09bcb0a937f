//! Multi-Account Resource Aggregator
//!
//! Lists one resource kind across every cell of a [`ServiceMatrix`] and merges
//! the results into a single collection.
//!
//! Every record gets `profile_name` (the owning profile) and `region`. For
//! account-global kinds `region` is `null`, records are de-duplicated by their
//! natural key, and `observed_by` lists every profile that can see the record.
//!
//! A failing cell is logged and skipped; the rest of the collection is still
//! returned.

use crate::error::{Error, Result};
use crate::matrix::{MatrixCell, ServiceMatrix};
use crate::resource::{fetch_resources, get_resource, scalar_key, FetchError, ListingParams, ResourceDef};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Synthetic field: owning profile
pub const PROFILE_FIELD: &str = "profile_name";
/// Synthetic field: region, `null` for global kinds
pub const REGION_FIELD: &str = "region";
/// Synthetic field: every profile that observed a global record
pub const OBSERVED_BY_FIELD: &str = "observed_by";

/// How independent units of work (cells, batches) are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanOut {
    #[default]
    Sequential,
    /// Bounded concurrency; a unit running past `timeout` is abandoned
    Parallel { concurrency: usize, timeout: Duration },
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Profile allow-list; `None` means every profile in the matrix
    pub profiles: Option<Vec<String>>,
    /// Region allow-list; `None` means every region. Ignored for global kinds.
    pub regions: Option<Vec<String>>,
    pub params: ListingParams,
    pub fan_out: FanOut,
}

/// Run `work` over `units` and return the outputs in input order.
///
/// Sequential mode runs one unit at a time without a time limit. Parallel
/// mode keeps at most `concurrency` units in flight; a unit that times out
/// yields `None`.
pub async fn run_units<U, T, F, Fut>(units: Vec<U>, fan_out: FanOut, work: F) -> Vec<Option<T>>
where
    F: Fn(U) -> Fut,
    Fut: Future<Output = T>,
{
    match fan_out {
        FanOut::Sequential => {
            let mut out = Vec::with_capacity(units.len());
            for unit in units {
                out.push(Some(work(unit).await));
            }
            out
        }
        FanOut::Parallel {
            concurrency,
            timeout,
        } => {
            let tasks = units.into_iter().enumerate().map(|(idx, unit)| {
                let fut = work(unit);
                async move { (idx, tokio::time::timeout(timeout, fut).await.ok()) }
            });

            let mut finished: Vec<(usize, Option<T>)> = stream::iter(tasks)
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;
            finished.sort_by_key(|(idx, _)| *idx);
            finished.into_iter().map(|(_, out)| out).collect()
        }
    }
}

/// List `kind` across the matrix and merge the results
pub async fn aggregate(
    matrix: &ServiceMatrix,
    kind: &str,
    options: &AggregateOptions,
) -> Result<Vec<Value>> {
    let Some(def) = get_resource(kind) else {
        return Err(Error::config(format!("unknown resource kind: {}", kind)));
    };
    if def.service != matrix.service() {
        return Err(Error::config(format!(
            "{} is a {} resource, not {}",
            kind,
            def.service,
            matrix.service()
        )));
    }
    // Fail on missing listing parameters before touching any cell
    def.listing.operation(&options.params, None)?;

    let cells = select_cells(matrix, options, def.is_global);
    tracing::debug!(kind, cells = cells.len(), "aggregating");

    let outcomes = run_units(cells.clone(), options.fan_out, |cell| async move {
        fetch_resources(def, cell.provider.as_ref(), &options.params).await
    })
    .await;

    let mut merger = Merger::new(def);
    for (cell, outcome) in cells.into_iter().zip(outcomes) {
        let region = cell.region.as_deref().unwrap_or("-");
        match outcome {
            Some(Ok(items)) => {
                tracing::debug!(profile = %cell.profile, region, kind, count = items.len(), "listed");
                merger.add(cell, items);
            }
            Some(Err(FetchError::Provider(e))) => {
                tracing::warn!(profile = %cell.profile, region, kind, error = %e, "listing failed, skipping cell");
            }
            Some(Err(FetchError::Setup(e))) => return Err(e),
            None => {
                tracing::warn!(profile = %cell.profile, region, kind, "listing timed out, skipping cell");
            }
        }
    }

    Ok(merger.finish())
}

fn select_cells<'a>(
    matrix: &'a ServiceMatrix,
    options: &AggregateOptions,
    is_global: bool,
) -> Vec<&'a MatrixCell> {
    matrix
        .cells()
        .iter()
        .filter(|cell| {
            options
                .profiles
                .as_ref()
                .map_or(true, |allowed| allowed.contains(&cell.profile))
        })
        .filter(|cell| {
            is_global
                || match (&options.regions, &cell.region) {
                    (Some(allowed), Some(region)) => allowed.contains(region),
                    _ => true,
                }
        })
        .collect()
}

/// Accumulates records cell by cell
struct Merger<'a> {
    def: &'a ResourceDef,
    records: Vec<Value>,
    /// Natural key -> position in `records`, global kinds only
    seen: HashMap<String, usize>,
}

impl<'a> Merger<'a> {
    fn new(def: &'a ResourceDef) -> Self {
        Self {
            def,
            records: Vec::new(),
            seen: HashMap::new(),
        }
    }

    fn add(&mut self, cell: &MatrixCell, items: Vec<Value>) {
        for mut item in items {
            let Value::Object(fields) = &mut item else {
                continue;
            };
            fields.insert(PROFILE_FIELD.to_string(), json!(cell.profile));

            if !self.def.is_global {
                fields.insert(REGION_FIELD.to_string(), json!(cell.region));
                self.records.push(item);
                continue;
            }

            fields.insert(REGION_FIELD.to_string(), Value::Null);
            let key = self
                .def
                .natural_key
                .as_deref()
                .and_then(|field| fields.get(field))
                .and_then(scalar_key);

            match key.as_ref().and_then(|k| self.seen.get(k)) {
                Some(&idx) => observe(&mut self.records[idx], &cell.profile),
                None => {
                    fields.insert(OBSERVED_BY_FIELD.to_string(), json!([cell.profile]));
                    if let Some(key) = key {
                        self.seen.insert(key, self.records.len());
                    }
                    self.records.push(item);
                }
            }
        }
    }

    fn finish(self) -> Vec<Value> {
        self.records
    }
}

/// Add `profile` to a record's `observed_by`, once
fn observe(record: &mut Value, profile: &str) {
    let Some(Value::Array(observers)) = record.get_mut(OBSERVED_BY_FIELD) else {
        return;
    };
    if !observers.iter().any(|p| p == profile) {
        observers.push(json!(profile));
    }
}

/// Profiles that observed a record: `observed_by` when present, else the owner
pub fn observers(record: &Value) -> Vec<String> {
    match record.get(OBSERVED_BY_FIELD).and_then(Value::as_array) {
        Some(list) => list
            .iter()
            .filter_map(|p| p.as_str().map(str::to_string))
            .collect(),
        None => record
            .get(PROFILE_FIELD)
            .and_then(Value::as_str)
            .map(|p| vec![p.to_string()])
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::service::Service;
    use crate::error::{ProviderError, ProviderResult};
    use crate::resource::{Operation, Provider};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    /// Answers every call with the same response, or fails
    struct Canned {
        response: ProviderResult<Value>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Provider for Canned {
        async fn invoke(&self, _op: &Operation) -> ProviderResult<Value> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.response.clone()
        }
    }

    fn cell(profile: &str, region: Option<&str>, response: ProviderResult<Value>) -> MatrixCell {
        MatrixCell {
            profile: profile.to_string(),
            region: region.map(str::to_string),
            provider: Arc::new(Canned {
                response,
                delay: None,
            }),
        }
    }

    fn buckets(names: &[&str]) -> ProviderResult<Value> {
        let list: Vec<Value> = names.iter().map(|n| json!({"Name": n})).collect();
        Ok(json!({"Buckets": {"Bucket": list}}))
    }

    fn instances(ids: &[&str]) -> ProviderResult<Value> {
        let list: Vec<Value> = ids.iter().map(|id| json!({"InstanceId": id})).collect();
        Ok(json!({"Reservations": [{"ReservationId": "r-1", "Instances": list}]}))
    }

    fn failure() -> ProviderResult<Value> {
        Err(ProviderError::new("ec2", "UnauthorizedOperation", "denied", 403))
    }

    fn run(matrix: &ServiceMatrix, kind: &str, options: &AggregateOptions) -> Result<Vec<Value>> {
        tokio_test::block_on(aggregate(matrix, kind, options))
    }

    #[test]
    fn test_global_records_are_deduplicated_across_profiles() {
        let matrix = ServiceMatrix::from_cells(
            Service::S3,
            vec![
                cell("p1", None, buckets(&["foo", "only-p1"])),
                cell("p2", None, buckets(&["foo"])),
                cell("p3", None, buckets(&["foo", "only-p3"])),
            ],
        );

        let records = run(&matrix, "s3-buckets", &AggregateOptions::default()).unwrap();
        assert_eq!(records.len(), 3);

        let foo: Vec<&Value> = records.iter().filter(|r| r["Name"] == "foo").collect();
        assert_eq!(foo.len(), 1);
        assert_eq!(foo[0][OBSERVED_BY_FIELD], json!(["p1", "p2", "p3"]));
        assert_eq!(foo[0][PROFILE_FIELD], "p1");
        assert_eq!(foo[0][REGION_FIELD], Value::Null);

        let only_p3 = records.iter().find(|r| r["Name"] == "only-p3").unwrap();
        assert_eq!(only_p3[PROFILE_FIELD], "p3");
        assert_eq!(only_p3[OBSERVED_BY_FIELD], json!(["p3"]));
    }

    #[test]
    fn test_repeated_sighting_in_one_profile_counts_once() {
        let matrix = ServiceMatrix::from_cells(
            Service::S3,
            vec![cell("p1", None, buckets(&["foo", "foo"]))],
        );
        let records = run(&matrix, "s3-buckets", &AggregateOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0][OBSERVED_BY_FIELD], json!(["p1"]));
    }

    #[test]
    fn test_regional_records_are_never_collapsed() {
        let matrix = ServiceMatrix::from_cells(
            Service::Ec2,
            vec![
                cell("p1", Some("us-east-1"), instances(&["i-1"])),
                cell("p1", Some("eu-west-1"), instances(&["i-1"])),
                cell("p2", Some("us-east-1"), instances(&["i-1"])),
            ],
        );

        let records = run(&matrix, "ec2-instances", &AggregateOptions::default()).unwrap();
        assert_eq!(records.len(), 3);
        let cells: BTreeSet<(String, String)> = records
            .iter()
            .map(|r| {
                (
                    r[PROFILE_FIELD].as_str().unwrap().to_string(),
                    r[REGION_FIELD].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(cells.len(), 3);
        assert!(records.iter().all(|r| r.get(OBSERVED_BY_FIELD).is_none()));
        assert_eq!(records[0]["ReservationId"], "r-1");
    }

    #[test]
    fn test_one_failing_cell_of_three_is_skipped() {
        let matrix = ServiceMatrix::from_cells(
            Service::Ec2,
            vec![
                cell("p1", Some("us-east-1"), instances(&["i-1", "i-2"])),
                cell("p2", Some("us-east-1"), failure()),
                cell("p3", Some("us-east-1"), instances(&["i-3"])),
            ],
        );

        let records = run(&matrix, "ec2-instances", &AggregateOptions::default()).unwrap();
        let ids: Vec<&str> = records
            .iter()
            .map(|r| r["InstanceId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["i-1", "i-2", "i-3"]);
    }

    #[test]
    fn test_allow_lists_narrow_cells() {
        let matrix = ServiceMatrix::from_cells(
            Service::Ec2,
            vec![
                cell("p1", Some("us-east-1"), instances(&["i-1"])),
                cell("p1", Some("eu-west-1"), instances(&["i-2"])),
                cell("p2", Some("eu-west-1"), instances(&["i-3"])),
            ],
        );
        let options = AggregateOptions {
            profiles: Some(vec!["p1".to_string()]),
            regions: Some(vec!["eu-west-1".to_string()]),
            ..AggregateOptions::default()
        };

        let records = run(&matrix, "ec2-instances", &options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["InstanceId"], "i-2");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let matrix = ServiceMatrix::from_cells(
            Service::S3,
            vec![
                cell("p1", None, buckets(&["a", "b"])),
                cell("p2", None, buckets(&["b", "c"])),
            ],
        );
        let keys = |records: Vec<Value>| -> BTreeSet<String> {
            records
                .iter()
                .map(|r| r["Name"].as_str().unwrap().to_string())
                .collect()
        };

        let first = run(&matrix, "s3-buckets", &AggregateOptions::default()).unwrap();
        let second = run(&matrix, "s3-buckets", &AggregateOptions::default()).unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(keys(first), keys(second));
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let matrix = ServiceMatrix::from_cells(
            Service::S3,
            vec![
                cell("p1", None, buckets(&["a", "b"])),
                cell("p2", None, failure()),
                cell("p3", None, buckets(&["b", "c"])),
                cell("p4", None, buckets(&["c", "a"])),
            ],
        );

        let sequential = aggregate(&matrix, "s3-buckets", &AggregateOptions::default())
            .await
            .unwrap();
        let parallel = aggregate(
            &matrix,
            "s3-buckets",
            &AggregateOptions {
                fan_out: FanOut::Parallel {
                    concurrency: 2,
                    timeout: Duration::from_secs(5),
                },
                ..AggregateOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(sequential, parallel);
    }

    #[tokio::test]
    async fn test_parallel_timeout_skips_slow_cell() {
        let slow = MatrixCell {
            profile: "slow".to_string(),
            region: Some("us-east-1".to_string()),
            provider: Arc::new(Canned {
                response: instances(&["i-slow"]),
                delay: Some(Duration::from_secs(5)),
            }),
        };
        let matrix = ServiceMatrix::from_cells(
            Service::Ec2,
            vec![slow, cell("fast", Some("us-east-1"), instances(&["i-fast"]))],
        );
        let options = AggregateOptions {
            fan_out: FanOut::Parallel {
                concurrency: 2,
                timeout: Duration::from_millis(50),
            },
            ..AggregateOptions::default()
        };

        let records = aggregate(&matrix, "ec2-instances", &options).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["InstanceId"], "i-fast");
    }

    #[test]
    fn test_configuration_errors_propagate() {
        let matrix = ServiceMatrix::from_cells(Service::Ec2, vec![]);
        assert!(run(&matrix, "no-such-kind", &AggregateOptions::default()).is_err());
        assert!(run(&matrix, "s3-buckets", &AggregateOptions::default()).is_err());

        let scaling = ServiceMatrix::from_cells(Service::ApplicationAutoscaling, vec![]);
        let err = run(&scaling, "scaling-policies", &AggregateOptions::default()).unwrap_err();
        assert!(err.to_string().contains("service namespace"));
    }

    #[test]
    fn test_observers_falls_back_to_owner() {
        assert_eq!(observers(&json!({"profile_name": "p1"})), vec!["p1"]);
        assert_eq!(
            observers(&json!({"profile_name": "p1", "observed_by": ["p1", "p2"]})),
            vec!["p1", "p2"]
        );
        assert!(observers(&json!({})).is_empty());
    }
}
