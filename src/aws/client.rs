//! AWS Client
//!
//! One authenticated handle per (profile, region, service). Builds
//! protocol-specific requests, signs them and retries throttled calls.

use super::auth::Credentials;
use super::http::AwsHttpClient;
use super::retry::RetryConfig;
use super::service::{Service, GLOBAL_SIGNING_REGION};
use super::signing::{self, SigningScope};
use crate::error::{ProviderError, ProviderResult};
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Settings shared by every client in a matrix
#[derive(Clone)]
pub struct ClientSettings {
    pub http: AwsHttpClient,
    /// Replaces every service endpoint (local stacks, mock servers)
    pub endpoint_url: Option<Url>,
    pub retry: RetryConfig,
}

/// Main AWS client
#[derive(Clone)]
pub struct AwsClient {
    service: Service,
    region: String,
    credentials: Credentials,
    settings: ClientSettings,
}

impl AwsClient {
    /// Global services always sign for `us-east-1`
    pub fn new(
        service: Service,
        region: Option<&str>,
        credentials: Credentials,
        settings: ClientSettings,
    ) -> Self {
        let region = match region {
            Some(r) if !service.is_global() => r.to_string(),
            _ => GLOBAL_SIGNING_REGION.to_string(),
        };
        Self {
            service,
            region,
            credentials,
            settings,
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn base_url(&self, region: &str) -> ProviderResult<Url> {
        if let Some(url) = &self.settings.endpoint_url {
            return Ok(url.clone());
        }
        let endpoint = self.service.endpoint(region);
        Url::parse(&endpoint).map_err(|e| {
            ProviderError::malformed(self.service.name(), &format!("bad endpoint {}: {}", endpoint, e))
        })
    }

    // =========================================================================
    // Protocols
    // =========================================================================

    /// Query protocol: form-encoded `Action`/`Version` POST, XML response body
    pub async fn query(&self, action: &str, params: &[(String, String)]) -> ProviderResult<String> {
        let url = self.base_url(&self.region)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Action", action)
            .append_pair("Version", self.service.api_version())
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        );

        let region = self.region.clone();
        self.execute(Method::POST, url, headers, body.into_bytes(), &region)
            .await
    }

    /// JSON 1.1 protocol: `X-Amz-Target` POST, JSON body and response
    pub async fn json(&self, target: &str, payload: &Value) -> ProviderResult<Value> {
        let url = self.base_url(&self.region)?;
        let body = serde_json::to_vec(payload)
            .map_err(|e| ProviderError::malformed(self.service.name(), &e.to_string()))?;

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-amz-json-1.1".to_string(),
        );
        headers.insert("x-amz-target".to_string(), target.to_string());

        let region = self.region.clone();
        let text = self.execute(Method::POST, url, headers, body, &region).await?;
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text)
            .map_err(|e| ProviderError::malformed(self.service.name(), &e.to_string()))
    }

    /// REST-XML GET against S3, path-style addressing.
    ///
    /// `bucket_region` routes bucket-level calls to the bucket's own
    /// regional endpoint; the account-level listing uses the global one.
    pub async fn rest_get(
        &self,
        bucket: Option<&str>,
        bucket_region: Option<&str>,
        query: &[(&str, &str)],
    ) -> ProviderResult<String> {
        let region = bucket_region.unwrap_or(&self.region).to_string();
        let mut url = self.base_url(&region)?;

        if let Some(bucket) = bucket {
            url.path_segments_mut()
                .map_err(|_| {
                    ProviderError::malformed(self.service.name(), "endpoint cannot carry a path")
                })?
                .pop_if_empty()
                .push(bucket);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }

        self.execute(Method::GET, url, BTreeMap::new(), Vec::new(), &region)
            .await
    }

    // =========================================================================
    // Signing and retry
    // =========================================================================

    async fn execute(
        &self,
        method: Method,
        url: Url,
        headers: BTreeMap<String, String>,
        body: Vec<u8>,
        signing_region: &str,
    ) -> ProviderResult<String> {
        let service = self.service.name();
        let retry = &self.settings.retry;
        let invocation_id = uuid::Uuid::new_v4().to_string();
        let mut attempt: u32 = 0;

        loop {
            let mut signed = headers.clone();
            signed.insert("amz-sdk-invocation-id".to_string(), invocation_id.clone());
            signed.insert(
                "amz-sdk-request".to_string(),
                format!("attempt={}; max={}", attempt + 1, retry.max_retries + 1),
            );
            signing::sign(
                &self.credentials,
                SigningScope {
                    region: signing_region,
                    service: self.service.signing_name(),
                },
                method.as_str(),
                &url,
                &mut signed,
                &body,
                Utc::now(),
            );

            let error = match self
                .settings
                .http
                .send(service, method.clone(), &url, &signed, body.clone())
                .await
            {
                Ok(response) if response.is_success() => return Ok(response.body),
                Ok(response) => ProviderError::from_response(service, response.status, &response.body),
                Err(e) => e,
            };

            if !error.retryable || attempt >= retry.max_retries {
                return Err(error);
            }

            let delay = retry.backoff_duration(attempt);
            tracing::warn!(
                service,
                region = signing_region,
                code = %error.code,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "retryable error, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
