//! SDK Dispatch
//!
//! Maps the fixed set of supported operations to AWS API calls and
//! normalizes every response into `serde_json::Value`.

use super::registry::key_aliases;
use crate::aws::client::AwsClient;
use crate::aws::service::{Protocol, Service};
use crate::aws::xml;
use crate::error::{Error, ProviderError, ProviderResult, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Every provider call fleetscan can make
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    DescribeInstances { next_token: Option<String> },
    DescribeSecurityGroups { next_token: Option<String> },
    DescribeTags { next_token: Option<String> },

    ListBuckets,
    GetBucketLocation { bucket: String },
    GetBucketPolicy { bucket: String, region: Option<String> },
    GetBucketTagging { bucket: String, region: Option<String> },
    ListObjectsV2 {
        bucket: String,
        region: Option<String>,
        continuation_token: Option<String>,
    },

    ListUsers { marker: Option<String> },
    ListGroups { marker: Option<String> },
    ListRoles { marker: Option<String> },
    ListGroupsForUser { user_name: String, marker: Option<String> },
    ListAttachedUserPolicies { user_name: String, marker: Option<String> },
    ListUserPolicies { user_name: String, marker: Option<String> },
    ListAttachedRolePolicies { role_name: String, marker: Option<String> },
    ListRolePolicies { role_name: String, marker: Option<String> },

    DescribeLoadBalancers { marker: Option<String> },

    DescribeAutoScalingGroups { next_token: Option<String> },
    DescribeScalingPolicies {
        service_namespace: String,
        next_token: Option<String>,
    },

    DescribeAlarms { next_token: Option<String> },
}

impl Operation {
    pub fn service(&self) -> Service {
        use Operation::*;
        match self {
            DescribeInstances { .. } | DescribeSecurityGroups { .. } | DescribeTags { .. } => {
                Service::Ec2
            }
            ListBuckets
            | GetBucketLocation { .. }
            | GetBucketPolicy { .. }
            | GetBucketTagging { .. }
            | ListObjectsV2 { .. } => Service::S3,
            ListUsers { .. }
            | ListGroups { .. }
            | ListRoles { .. }
            | ListGroupsForUser { .. }
            | ListAttachedUserPolicies { .. }
            | ListUserPolicies { .. }
            | ListAttachedRolePolicies { .. }
            | ListRolePolicies { .. } => Service::Iam,
            DescribeLoadBalancers { .. } => Service::Elb,
            DescribeAutoScalingGroups { .. } => Service::Autoscaling,
            DescribeScalingPolicies { .. } => Service::ApplicationAutoscaling,
            DescribeAlarms { .. } => Service::Cloudwatch,
        }
    }

    /// Same call, asking for the page after `token`
    pub fn with_page_token(&self, token: Option<String>) -> Operation {
        use Operation::*;
        let mut op = self.clone();
        match &mut op {
            DescribeInstances { next_token }
            | DescribeSecurityGroups { next_token }
            | DescribeTags { next_token }
            | DescribeAutoScalingGroups { next_token }
            | DescribeScalingPolicies { next_token, .. }
            | DescribeAlarms { next_token } => *next_token = token,
            ListUsers { marker }
            | ListGroups { marker }
            | ListRoles { marker }
            | ListGroupsForUser { marker, .. }
            | ListAttachedUserPolicies { marker, .. }
            | ListUserPolicies { marker, .. }
            | ListAttachedRolePolicies { marker, .. }
            | ListRolePolicies { marker, .. }
            | DescribeLoadBalancers { marker } => *marker = token,
            ListObjectsV2 {
                continuation_token, ..
            } => *continuation_token = token,
            ListBuckets
            | GetBucketLocation { .. }
            | GetBucketPolicy { .. }
            | GetBucketTagging { .. } => {}
        }
        op
    }

    /// API action name
    pub fn name(&self) -> &'static str {
        use Operation::*;
        match self {
            DescribeInstances { .. } => "DescribeInstances",
            DescribeSecurityGroups { .. } => "DescribeSecurityGroups",
            DescribeTags { .. } => "DescribeTags",
            ListBuckets => "ListBuckets",
            GetBucketLocation { .. } => "GetBucketLocation",
            GetBucketPolicy { .. } => "GetBucketPolicy",
            GetBucketTagging { .. } => "GetBucketTagging",
            ListObjectsV2 { .. } => "ListObjectsV2",
            ListUsers { .. } => "ListUsers",
            ListGroups { .. } => "ListGroups",
            ListRoles { .. } => "ListRoles",
            ListGroupsForUser { .. } => "ListGroupsForUser",
            ListAttachedUserPolicies { .. } => "ListAttachedUserPolicies",
            ListUserPolicies { .. } => "ListUserPolicies",
            ListAttachedRolePolicies { .. } => "ListAttachedRolePolicies",
            ListRolePolicies { .. } => "ListRolePolicies",
            DescribeLoadBalancers { .. } => "DescribeLoadBalancers",
            DescribeAutoScalingGroups { .. } => "DescribeAutoScalingGroups",
            DescribeScalingPolicies { .. } => "DescribeScalingPolicies",
            DescribeAlarms { .. } => "DescribeAlarms",
        }
    }
}

/// Listing calls a resource definition can name. Resolved into an
/// [`Operation`] once the page token and listing parameters are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ListingCall {
    DescribeInstances,
    DescribeSecurityGroups,
    DescribeTags,
    ListBuckets,
    ListUsers,
    ListGroups,
    ListRoles,
    DescribeLoadBalancers,
    DescribeAutoScalingGroups,
    DescribeScalingPolicies,
    DescribeAlarms,
}

/// Extra inputs some listings need
#[derive(Debug, Clone, Default)]
pub struct ListingParams {
    /// Application Auto Scaling namespace (`ecs`, `dynamodb`, ...)
    pub service_namespace: Option<String>,
}

impl ListingCall {
    pub fn operation(self, params: &ListingParams, page: Option<String>) -> Result<Operation> {
        Ok(match self {
            ListingCall::DescribeInstances => Operation::DescribeInstances { next_token: page },
            ListingCall::DescribeSecurityGroups => {
                Operation::DescribeSecurityGroups { next_token: page }
            }
            ListingCall::DescribeTags => Operation::DescribeTags { next_token: page },
            ListingCall::ListBuckets => Operation::ListBuckets,
            ListingCall::ListUsers => Operation::ListUsers { marker: page },
            ListingCall::ListGroups => Operation::ListGroups { marker: page },
            ListingCall::ListRoles => Operation::ListRoles { marker: page },
            ListingCall::DescribeLoadBalancers => Operation::DescribeLoadBalancers { marker: page },
            ListingCall::DescribeAutoScalingGroups => {
                Operation::DescribeAutoScalingGroups { next_token: page }
            }
            ListingCall::DescribeScalingPolicies => {
                let Some(namespace) = params.service_namespace.clone() else {
                    return Err(Error::config(
                        "scaling policies require a service namespace (e.g. ecs, dynamodb)",
                    ));
                };
                Operation::DescribeScalingPolicies {
                    service_namespace: namespace,
                    next_token: page,
                }
            }
            ListingCall::DescribeAlarms => Operation::DescribeAlarms { next_token: page },
        })
    }
}

/// Narrow capability the aggregator needs from a cell
#[async_trait]
pub trait Provider: Send + Sync {
    async fn invoke(&self, op: &Operation) -> ProviderResult<Value>;
}

#[async_trait]
impl Provider for AwsClient {
    async fn invoke(&self, op: &Operation) -> ProviderResult<Value> {
        tracing::debug!(
            "invoke: service={}, region={}, op={}",
            self.service(),
            self.region(),
            op.name()
        );

        if op.service() != self.service() {
            return Err(ProviderError::new(
                self.service().name(),
                "UnsupportedOperation",
                &format!("{} is not a {} operation", op.name(), self.service()),
                0,
            ));
        }

        match self.service().protocol() {
            Protocol::RestXml => invoke_s3(self, op).await,
            Protocol::Json => invoke_application_autoscaling(self, op).await,
            Protocol::Query => invoke_query(self, op).await,
        }
    }
}

fn decode_xml(service: Service, body: &str) -> ProviderResult<Value> {
    xml::to_value(body, key_aliases(service))
        .map_err(|e| ProviderError::malformed(service.name(), &e.to_string()))
}

fn push_opt(params: &mut Vec<(String, String)>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        params.push((key.to_string(), v.clone()));
    }
}

// =============================================================================
// Query protocol (EC2, IAM, ELB, Auto Scaling, CloudWatch)
// =============================================================================

async fn invoke_query(client: &AwsClient, op: &Operation) -> ProviderResult<Value> {
    use Operation::*;

    let mut params: Vec<(String, String)> = Vec::new();
    match op {
        DescribeInstances { next_token }
        | DescribeSecurityGroups { next_token }
        | DescribeTags { next_token }
        | DescribeAutoScalingGroups { next_token }
        | DescribeAlarms { next_token } => push_opt(&mut params, "NextToken", next_token),
        ListUsers { marker }
        | ListGroups { marker }
        | ListRoles { marker }
        | DescribeLoadBalancers { marker } => push_opt(&mut params, "Marker", marker),
        ListGroupsForUser { user_name, marker }
        | ListAttachedUserPolicies { user_name, marker }
        | ListUserPolicies { user_name, marker } => {
            params.push(("UserName".to_string(), user_name.clone()));
            push_opt(&mut params, "Marker", marker);
        }
        ListAttachedRolePolicies { role_name, marker } | ListRolePolicies { role_name, marker } => {
            params.push(("RoleName".to_string(), role_name.clone()));
            push_opt(&mut params, "Marker", marker);
        }
        _ => {
            return Err(ProviderError::malformed(
                client.service().name(),
                &format!("{} is not a query operation", op.name()),
            ))
        }
    }

    let body = client.query(op.name(), &params).await?;
    decode_xml(client.service(), &body)
}

// =============================================================================
// S3 (REST-XML)
// =============================================================================

async fn invoke_s3(client: &AwsClient, op: &Operation) -> ProviderResult<Value> {
    match op {
        Operation::ListBuckets => {
            let body = client.rest_get(None, None, &[]).await?;
            decode_xml(Service::S3, &body)
        }
        Operation::GetBucketLocation { bucket } => {
            let body = client.rest_get(Some(bucket), None, &[("location", "")]).await?;
            let location = match decode_xml(Service::S3, &body)? {
                Value::String(s) if s.is_empty() => Value::Null,
                other => other,
            };
            Ok(json!({ "LocationConstraint": location }))
        }
        Operation::GetBucketPolicy { bucket, region } => {
            // The policy document is returned verbatim as JSON text
            let body = client
                .rest_get(Some(bucket), region.as_deref(), &[("policy", "")])
                .await?;
            Ok(json!({ "Policy": body }))
        }
        Operation::GetBucketTagging { bucket, region } => {
            let body = client
                .rest_get(Some(bucket), region.as_deref(), &[("tagging", "")])
                .await?;
            decode_xml(Service::S3, &body)
        }
        Operation::ListObjectsV2 {
            bucket,
            region,
            continuation_token,
        } => {
            let mut query = vec![("list-type", "2")];
            if let Some(token) = continuation_token {
                query.push(("continuation-token", token.as_str()));
            }
            let body = client.rest_get(Some(bucket), region.as_deref(), &query).await?;
            decode_xml(Service::S3, &body)
        }
        _ => Err(ProviderError::malformed(
            "s3",
            &format!("{} is not an S3 operation", op.name()),
        )),
    }
}

// =============================================================================
// Application Auto Scaling (JSON 1.1)
// =============================================================================

const APP_AUTOSCALING_TARGET_PREFIX: &str = "AnyScaleFrontendService";

async fn invoke_application_autoscaling(client: &AwsClient, op: &Operation) -> ProviderResult<Value> {
    match op {
        Operation::DescribeScalingPolicies {
            service_namespace,
            next_token,
        } => {
            let mut payload = json!({ "ServiceNamespace": service_namespace });
            if let Some(token) = next_token {
                payload["NextToken"] = Value::String(token.clone());
            }
            let target = format!("{}.{}", APP_AUTOSCALING_TARGET_PREFIX, op.name());
            client.json(&target, &payload).await
        }
        _ => Err(ProviderError::malformed(
            "application-autoscaling",
            &format!("{} is not an Application Auto Scaling operation", op.name()),
        )),
    }
}
