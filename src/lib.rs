//! fleetscan - multi-account AWS inventory
//!
//! Lists resources across every configured profile and region, merges them
//! into one collection (account-global resources appear once, with the
//! profiles that can see them), enriches records with per-resource detail and
//! narrows the result with attribute filters.
//!
//! # Module Structure
//!
//! - [`aws`] - Signed HTTP access to the AWS APIs
//! - [`matrix`] - One client per (profile, region) cell
//! - [`resource`] - Resource kinds, provider operations, paging
//! - [`aggregate`] - Fan-out over the matrix and merging
//! - [`enrich`] - Per-record follow-up calls
//! - [`filter`] - Attribute filter engine
//! - [`report`] - Summaries computed from collections
//! - [`output`] - JSON / YAML rendering
//! - [`config`] - Environment file

pub mod aggregate;
pub mod aws;
pub mod config;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod matrix;
pub mod output;
pub mod report;
pub mod resource;

pub use error::{Error, Result};
