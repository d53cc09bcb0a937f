//! Supported AWS services and their endpoints

use serde::{Deserialize, Serialize};
use std::fmt;

/// Region used to sign calls to services without regional endpoints
pub const GLOBAL_SIGNING_REGION: &str = "us-east-1";

/// Wire protocol spoken by a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Form-encoded POST, XML response
    Query,
    /// REST paths, XML response
    RestXml,
    /// `X-Amz-Target` POST, JSON body and response
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    Ec2,
    S3,
    Iam,
    Elb,
    Autoscaling,
    ApplicationAutoscaling,
    Cloudwatch,
}

impl Service {
    pub fn name(self) -> &'static str {
        match self {
            Service::Ec2 => "ec2",
            Service::S3 => "s3",
            Service::Iam => "iam",
            Service::Elb => "elb",
            Service::Autoscaling => "autoscaling",
            Service::ApplicationAutoscaling => "application-autoscaling",
            Service::Cloudwatch => "cloudwatch",
        }
    }

    /// Service name in the SigV4 credential scope and endpoint host
    pub fn signing_name(self) -> &'static str {
        match self {
            Service::Ec2 => "ec2",
            Service::S3 => "s3",
            Service::Iam => "iam",
            Service::Elb => "elasticloadbalancing",
            Service::Autoscaling => "autoscaling",
            Service::ApplicationAutoscaling => "application-autoscaling",
            Service::Cloudwatch => "monitoring",
        }
    }

    /// Query API version; empty for protocols that don't send one
    pub fn api_version(self) -> &'static str {
        match self {
            Service::Ec2 => "2016-11-15",
            Service::Iam => "2010-05-08",
            Service::Elb => "2012-06-01",
            Service::Autoscaling => "2011-01-01",
            Service::Cloudwatch => "2010-08-01",
            Service::S3 | Service::ApplicationAutoscaling => "",
        }
    }

    pub fn protocol(self) -> Protocol {
        match self {
            Service::S3 => Protocol::RestXml,
            Service::ApplicationAutoscaling => Protocol::Json,
            _ => Protocol::Query,
        }
    }

    /// Services whose resources are account-wide rather than regional
    pub fn is_global(self) -> bool {
        matches!(self, Service::S3 | Service::Iam)
    }

    /// Public endpoint for `region`
    pub fn endpoint(self, region: &str) -> String {
        let suffix = if region.starts_with("cn-") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };
        match self {
            Service::Iam => format!("https://iam.{}", suffix),
            Service::S3 if region == GLOBAL_SIGNING_REGION => format!("https://s3.{}", suffix),
            _ => format!("https://{}.{}.{}", self.signing_name(), region, suffix),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
