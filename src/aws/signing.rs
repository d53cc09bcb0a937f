//! AWS Signature Version 4
//!
//! Every API call is signed with the profile's key pair:
//!
//! 1. canonical request (method, path, sorted query, signed headers, payload hash)
//! 2. string to sign (algorithm, timestamp, credential scope, request hash)
//! 3. signing key derived from the secret, date, region and service
//! 4. `Authorization` header carrying the hex signature

use super::auth::Credentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of an empty body
pub const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Where a signature is valid: region plus the service's signing name
#[derive(Debug, Clone, Copy)]
pub struct SigningScope<'a> {
    pub region: &'a str,
    pub service: &'a str,
}

/// Sign a request in place.
///
/// `headers` must not already contain `authorization`. On return it holds
/// `host`, `x-amz-date`, `x-amz-content-sha256`, the session token when
/// present, and `authorization`.
pub fn sign(
    credentials: &Credentials,
    scope: SigningScope<'_>,
    method: &str,
    url: &Url,
    headers: &mut BTreeMap<String, String>,
    body: &[u8],
    now: DateTime<Utc>,
) {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = hex_sha256(body);

    headers.insert("host".to_string(), host_header(url));
    headers.insert("x-amz-date".to_string(), amz_date.clone());
    headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
    if let Some(token) = &credentials.session_token {
        headers.insert("x-amz-security-token".to_string(), token.clone());
    }

    let signed_headers = headers
        .keys()
        .map(|k| k.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k.to_ascii_lowercase(), v.trim()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_path(url),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date, scope.region, scope.service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, scope);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    headers.insert(
        "authorization".to_string(),
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key_id, credential_scope, signed_headers, signature
        ),
    );
}

fn signing_key(secret: &str, date: &str, scope: SigningScope<'_>) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, scope.region.as_bytes());
    let k_service = hmac_sha256(&k_region, scope.service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Path segments re-encoded with RFC 3986 unreserved characters only
fn canonical_path(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            uri_encode(&decoded)
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Query pairs encoded, then sorted by key and value
fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode everything except `A-Z a-z 0-9 - _ . ~`
pub fn uri_encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example_credentials() -> Credentials {
        Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY", None)
    }

    #[test]
    fn test_empty_payload_hash() {
        assert_eq!(hex_sha256(b""), EMPTY_PAYLOAD_HASH);
    }

    #[test]
    fn test_uri_encode_reserved() {
        assert_eq!(uri_encode("a b"), "a%20b");
        assert_eq!(uri_encode("k=v&x"), "k%3Dv%26x");
        assert_eq!(uri_encode("abcXYZ019-_.~"), "abcXYZ019-_.~");
        assert_eq!(uri_encode("a/b"), "a%2Fb");
    }

    #[test]
    fn test_canonical_query_is_sorted() {
        let url = Url::parse("https://ec2.amazonaws.com/?Version=2016-11-15&Action=DescribeInstances&Filter.1.Name=a b").unwrap();
        assert_eq!(
            canonical_query(&url),
            "Action=DescribeInstances&Filter.1.Name=a%20b&Version=2016-11-15"
        );
    }

    #[test]
    fn test_canonical_query_bare_key() {
        let url = Url::parse("https://s3.amazonaws.com/bucket?location").unwrap();
        assert_eq!(canonical_query(&url), "location=");
        assert_eq!(canonical_path(&url), "/bucket");
    }

    #[test]
    fn test_signing_key_length() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            SigningScope {
                region: "us-east-1",
                service: "iam",
            },
        );
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn test_sign_sets_headers() {
        let url = Url::parse("https://iam.amazonaws.com/").unwrap();
        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        );
        let now = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();

        sign(
            &example_credentials(),
            SigningScope {
                region: "us-east-1",
                service: "iam",
            },
            "POST",
            &url,
            &mut headers,
            b"Action=ListUsers&Version=2010-05-08",
            now,
        );

        assert_eq!(headers["x-amz-date"], "20150830T123600Z");
        assert_eq!(headers["host"], "iam.amazonaws.com");
        let auth = &headers["authorization"];
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request"
        ));
        assert!(auth.contains(
            "SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date"
        ));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_signature_is_deterministic() {
        let url = Url::parse("http://127.0.0.1:9000/?Action=DescribeTags").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let scope = SigningScope {
            region: "eu-west-1",
            service: "ec2",
        };

        let mut first = BTreeMap::new();
        sign(&example_credentials(), scope, "GET", &url, &mut first, b"", now);
        let mut second = BTreeMap::new();
        sign(&example_credentials(), scope, "GET", &url, &mut second, b"", now);

        assert_eq!(first["authorization"], second["authorization"]);
        assert_eq!(first["host"], "127.0.0.1:9000");
    }

    #[test]
    fn test_session_token_is_signed() {
        let creds = Credentials::new("AKID", "secret", Some("token-value"));
        let url = Url::parse("https://ec2.us-east-1.amazonaws.com/").unwrap();
        let mut headers = BTreeMap::new();
        sign(
            &creds,
            SigningScope {
                region: "us-east-1",
                service: "ec2",
            },
            "POST",
            &url,
            &mut headers,
            b"",
            Utc::now(),
        );
        assert_eq!(headers["x-amz-security-token"], "token-value");
        assert!(headers["authorization"].contains("x-amz-security-token"));
    }
}
