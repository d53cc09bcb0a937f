//! Error types
//!
//! Configuration problems abort a command. Provider failures are scoped to
//! one (profile, region) cell or one record and are recovered by the caller.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Top-level library error
#[derive(Debug, Error)]
pub enum Error {
    /// Missing credentials file, no usable profile, empty region set, bad YAML
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    InvalidFilter(#[from] InvalidFilterSpec),

    #[error("cannot render output: {0}")]
    Render(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A single failed provider call
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub service: String,
    pub code: String,
    pub message: String,
    /// HTTP status, 0 when the request never got a response
    pub status: u16,
    pub retryable: bool,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status > 0 {
            write!(
                f,
                "{} {} (HTTP {}): {}",
                self.service, self.code, self.status, self.message
            )
        } else {
            write!(f, "{} {}: {}", self.service, self.code, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn new(service: &str, code: &str, message: &str, status: u16) -> Self {
        Self {
            service: service.to_string(),
            code: code.to_string(),
            message: message.to_string(),
            status,
            retryable: is_retryable(code, status),
        }
    }

    /// Connection reset, DNS failure, read timeout
    pub fn transport(service: &str, message: &str) -> Self {
        Self {
            service: service.to_string(),
            code: "TransportError".to_string(),
            message: message.to_string(),
            status: 0,
            retryable: true,
        }
    }

    /// Response body that could not be decoded
    pub fn malformed(service: &str, message: &str) -> Self {
        Self {
            service: service.to_string(),
            code: "MalformedResponse".to_string(),
            message: message.to_string(),
            status: 0,
            retryable: false,
        }
    }

    /// Build an error from a non-2xx response body (XML or JSON)
    pub fn from_response(service: &str, status: u16, body: &str) -> Self {
        let parsed = if body.trim_start().starts_with('<') {
            crate::aws::xml::to_value(body, None).ok()
        } else {
            serde_json::from_str::<Value>(body).ok()
        };

        let code = parsed
            .as_ref()
            .and_then(|v| find_field(v, &["Code", "__type", "code"]))
            .map(|c| c.rsplit('#').next().unwrap_or(&c).to_string())
            .unwrap_or_else(|| status_code_name(status).to_string());
        let message = parsed
            .as_ref()
            .and_then(|v| find_field(v, &["Message", "message"]))
            .unwrap_or_else(|| format!("HTTP {} from {}", status, service));

        Self::new(service, &code, &message, status)
    }

    /// Missing resource or forbidden access, as opposed to an outage
    pub fn is_not_found(&self) -> bool {
        self.status == 404 || self.code.starts_with("NoSuch") || self.code.ends_with("NotFound")
    }
}

/// Throttling-class codes and transient server statuses
fn is_retryable(code: &str, status: u16) -> bool {
    if status == 429 || (500..600).contains(&status) {
        return true;
    }
    matches!(
        code,
        "Throttling"
            | "ThrottlingException"
            | "ThrottledException"
            | "RequestThrottled"
            | "RequestThrottledException"
            | "TooManyRequestsException"
            | "RequestLimitExceeded"
            | "SlowDown"
            | "EC2ThrottledException"
            | "InternalError"
            | "InternalFailure"
            | "ServiceUnavailable"
    )
}

fn status_code_name(status: u16) -> &'static str {
    match status {
        400 => "BadRequest",
        401 => "Unauthorized",
        403 => "AccessDenied",
        404 => "NotFound",
        429 => "TooManyRequests",
        500..=599 => "ServerError",
        _ => "UnknownError",
    }
}

/// Depth-first search for the first string under any of `names`
fn find_field(value: &Value, names: &[&str]) -> Option<String> {
    match value {
        Value::Object(map) => {
            for name in names {
                if let Some(Value::String(s)) = map.get(*name) {
                    return Some(s.clone());
                }
            }
            map.values().find_map(|v| find_field(v, names))
        }
        Value::Array(items) => items.iter().find_map(|v| find_field(v, names)),
        _ => None,
    }
}

/// Malformed filter input, returned instead of raised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidFilterSpec {
    #[error("filter specification must be a non-empty list of clauses")]
    Empty,
    #[error("filter clause {index}: {reason}")]
    Clause { index: usize, reason: String },
    #[error("cannot parse filter expression '{0}'; expected KEY=v1,v2 | KEY~regex | KEY>n | KEY<n")]
    Expression(String),
}
