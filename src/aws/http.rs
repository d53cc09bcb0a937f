//! HTTP transport for signed AWS API calls

use crate::error::{Error, ProviderError, ProviderResult, Result};
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate long bodies and strip control characters before logging
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Raw response: status plus body text
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client wrapper shared by every service client
#[derive(Clone)]
pub struct AwsHttpClient {
    client: Client,
}

impl AwsHttpClient {
    /// `timeout` bounds each request, connect through body
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("fleetscan/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Send one request. Non-2xx statuses are returned, not turned into errors.
    pub async fn send(
        &self,
        service: &str,
        method: Method,
        url: &Url,
        headers: &BTreeMap<String, String>,
        body: Vec<u8>,
    ) -> ProviderResult<HttpResponse> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url.clone());
        for (name, value) in headers {
            // reqwest derives Host from the URL
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::transport(service, &e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::transport(service, &e.to_string()))?;

        if !(200..300).contains(&status) {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
        }

        Ok(HttpResponse { status, body })
    }
}
