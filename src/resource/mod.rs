//! Resource abstraction layer
//!
//! This module provides a data-driven approach to listing AWS resources.
//! Resource definitions are loaded from JSON files at compile time, so a new
//! resource kind that reuses an existing listing call needs no code change.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and caches resource definitions from embedded JSON
//! - [`fetcher`] - Lists one kind from one (profile, region) cell, with paging
//! - [`sdk_dispatch`] - The fixed set of provider operations and their wire calls
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `ec2.json` - Instances, security groups, tags
//! - `s3.json` - Buckets
//! - `iam.json` - Users, groups, roles
//! - `elb.json`, `autoscaling.json`, `cloudwatch.json`
//!
//! # Example
//!
//! ```ignore
//! use fleetscan::resource::{fetch_resources, get_resource, ListingParams};
//!
//! async fn list_vms(provider: &dyn Provider) -> anyhow::Result<Vec<serde_json::Value>> {
//!     let def = get_resource("ec2-instances").unwrap();
//!     Ok(fetch_resources(def, provider, &ListingParams::default()).await?)
//! }
//! ```

pub mod fetcher;
pub mod registry;
pub mod sdk_dispatch;

pub use fetcher::{extract_json_value, fetch_resources, paginate, scalar_key, FetchError};
pub use registry::{get_all_resource_keys, get_resource, ResourceDef};
pub use sdk_dispatch::{ListingParams, Operation, Provider};
