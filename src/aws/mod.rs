//! AWS API interaction module
//!
//! Signed HTTP access to the AWS APIs without an SDK: credential loading,
//! SigV4 signing, XML decoding, retry, and a client per service.
//!
//! # Module Structure
//!
//! - [`auth`] - Key pairs, ambient credentials (environment, IMDSv2)
//! - [`credentials`] - Shared credentials file (profiles)
//! - [`client`] - Per-service client speaking the Query, REST-XML and JSON protocols
//! - [`http`] - HTTP transport
//! - [`retry`] - Backoff policy for throttled calls
//! - [`service`] - Service identifiers and endpoints
//! - [`signing`] - Signature Version 4
//! - [`xml`] - XML response decoding into `serde_json::Value`
//!
//! # Example
//!
//! ```ignore
//! use fleetscan::aws::{client::AwsClient, service::Service};
//!
//! async fn example(creds: Credentials, settings: ClientSettings) -> anyhow::Result<()> {
//!     let client = AwsClient::new(Service::Ec2, Some("us-east-1"), creds, settings);
//!     let xml = client.query("DescribeInstances", &[]).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod credentials;
pub mod http;
pub mod retry;
pub mod service;
pub mod signing;
pub mod xml;
