//! AWS Authentication
//!
//! Static key pairs come from the credentials file or the command line.
//! Ambient credentials come from the environment or, on EC2, from the
//! instance metadata service (IMDSv2).

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Default IMDS endpoint (link-local, only reachable from inside EC2)
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";

/// Metadata lookups should fail fast off-instance
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);

const IMDS_TOKEN_TTL_SECS: &str = "21600";

/// An access key pair, optionally with a session token
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.map(str::to_string),
        }
    }
}

// Secrets never reach logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Mask a secret for display, keeping the last four characters
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", visible)
    }
}

/// Read `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
pub fn from_environment() -> Option<Credentials> {
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
    if access_key_id.is_empty() || secret_access_key.is_empty() {
        return None;
    }
    let session_token = std::env::var("AWS_SESSION_TOKEN")
        .ok()
        .filter(|t| !t.is_empty());
    Some(Credentials {
        access_key_id,
        secret_access_key,
        session_token,
    })
}

/// IMDS endpoint, honoring `AWS_EC2_METADATA_SERVICE_ENDPOINT`
pub fn imds_endpoint() -> String {
    std::env::var("AWS_EC2_METADATA_SERVICE_ENDPOINT")
        .ok()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_IMDS_ENDPOINT.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    token: Option<String>,
}

/// Instance-role credentials via IMDSv2: session token, role name, role keys
pub async fn from_instance_metadata(endpoint: &str) -> Result<Credentials> {
    let base = endpoint.trim_end_matches('/');
    let http = reqwest::Client::builder()
        .timeout(IMDS_TIMEOUT)
        .build()
        .map_err(|e| Error::config(format!("failed to create metadata client: {}", e)))?;

    let imds_error =
        |e: reqwest::Error| Error::config(format!("instance metadata service unavailable: {}", e));

    let token = http
        .put(format!("{}/latest/api/token", base))
        .header("x-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECS)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(imds_error)?
        .text()
        .await
        .map_err(imds_error)?;

    let roles_url = format!("{}/latest/meta-data/iam/security-credentials/", base);
    let roles = http
        .get(&roles_url)
        .header("x-aws-ec2-metadata-token", &token)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(imds_error)?
        .text()
        .await
        .map_err(imds_error)?;

    let Some(role) = roles.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return Err(Error::config("no IAM role attached to this instance"));
    };
    tracing::debug!(role, "using instance role");

    let body = http
        .get(format!("{}{}", roles_url, role))
        .header("x-aws-ec2-metadata-token", &token)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(imds_error)?
        .text()
        .await
        .map_err(imds_error)?;

    let creds: RoleCredentials = serde_json::from_str(&body)
        .map_err(|e| Error::config(format!("invalid instance role credentials: {}", e)))?;

    Ok(Credentials {
        access_key_id: creds.access_key_id,
        secret_access_key: creds.secret_access_key,
        session_token: creds.token,
    })
}

/// Ambient credentials: environment first, then instance metadata
pub async fn resolve_ambient() -> Result<Credentials> {
    if let Some(creds) = from_environment() {
        tracing::debug!("using credentials from environment");
        return Ok(creds);
    }
    from_instance_metadata(&imds_endpoint()).await
}
