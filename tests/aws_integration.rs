//! Integration tests for the AWS client stack using wiremock
//!
//! Every client in these tests has its endpoint overridden to a mock server,
//! so requests go through signing, retry, XML/JSON decoding, paging, merging
//! and enrichment exactly as they would against AWS.

use fleetscan::aggregate::{aggregate, AggregateOptions, FanOut, PROFILE_FIELD, REGION_FIELD};
use fleetscan::aws::auth::{self, Credentials};
use fleetscan::aws::client::ClientSettings;
use fleetscan::aws::http::AwsHttpClient;
use fleetscan::aws::retry::RetryConfig;
use fleetscan::aws::service::Service;
use fleetscan::enrich::{enrich, EnrichOptions, Enrichment};
use fleetscan::error::ProviderError;
use fleetscan::matrix::{CredentialSource, ServiceMatrix};
use fleetscan::resource::ListingParams;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INSTANCES_PAGE_1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>req-1</requestId>
    <reservationSet>
        <item>
            <reservationId>r-1</reservationId>
            <ownerId>111122223333</ownerId>
            <instancesSet>
                <item>
                    <instanceId>i-aaa</instanceId>
                    <instanceType>t3.micro</instanceType>
                    <instanceState><code>16</code><name>running</name></instanceState>
                    <placement><availabilityZone>us-east-1a</availabilityZone></placement>
                    <tagSet>
                        <item><key>Name</key><value>web</value></item>
                    </tagSet>
                </item>
            </instancesSet>
        </item>
    </reservationSet>
    <nextToken>page-2</nextToken>
</DescribeInstancesResponse>"#;

const INSTANCES_PAGE_2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>req-2</requestId>
    <reservationSet>
        <item>
            <reservationId>r-2</reservationId>
            <ownerId>111122223333</ownerId>
            <instancesSet>
                <item>
                    <instanceId>i-bbb</instanceId>
                    <instanceType>m5.large</instanceType>
                    <instanceState><code>80</code><name>stopped</name></instanceState>
                    <placement><availabilityZone>us-east-1b</availabilityZone></placement>
                    <tagSet/>
                </item>
            </instancesSet>
        </item>
    </reservationSet>
</DescribeInstancesResponse>"#;

const BUCKETS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Owner><ID>owner</ID><DisplayName>ops</DisplayName></Owner>
    <Buckets>
        <Bucket><Name>logs</Name><CreationDate>2023-01-01T00:00:00.000Z</CreationDate></Bucket>
        <Bucket><Name>assets</Name><CreationDate>2023-02-01T00:00:00.000Z</CreationDate></Bucket>
    </Buckets>
</ListAllMyBucketsResult>"#;

fn settings(server: &MockServer, retry: RetryConfig) -> ClientSettings {
    ClientSettings {
        http: AwsHttpClient::new(Duration::from_secs(5)).unwrap(),
        endpoint_url: Some(Url::parse(&server.uri()).unwrap()),
        retry,
    }
}

fn static_source() -> CredentialSource {
    CredentialSource::Static(Credentials::new("AKIDEXAMPLE", "secret", None))
}

async fn matrix(service: Service, server: &MockServer, retry: RetryConfig) -> ServiceMatrix {
    ServiceMatrix::build(
        service,
        &static_source(),
        None,
        &["us-east-1".to_string()],
        &settings(server, retry),
    )
    .await
    .unwrap()
}

/// Tests for Query-protocol listings
mod query_tests {
    use super::*;

    /// Test DescribeInstances pages are followed and flattened into records
    #[tokio::test]
    async fn test_describe_instances_follows_pages() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("NextToken=page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INSTANCES_PAGE_2))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("Action=DescribeInstances"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INSTANCES_PAGE_1))
            .expect(1)
            .mount(&server)
            .await;

        let matrix = matrix(Service::Ec2, &server, RetryConfig::disabled()).await;
        let records = aggregate(&matrix, "ec2-instances", &AggregateOptions::default())
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["InstanceId"], "i-aaa");
        assert_eq!(records[0]["State"]["Name"], "running");
        assert_eq!(records[0]["ReservationId"], "r-1");
        assert_eq!(records[0]["Tags"]["Name"], "web");
        assert_eq!(records[0][PROFILE_FIELD], "default");
        assert_eq!(records[0][REGION_FIELD], "us-east-1");
        assert_eq!(records[1]["InstanceId"], "i-bbb");
        assert_eq!(records[1]["Placement"]["AvailabilityZone"], "us-east-1b");
    }

    /// Test a throttled call is retried and then succeeds
    #[tokio::test]
    async fn test_throttling_is_retried() {
        let server = MockServer::start().await;

        let throttled = r#"<Response><Errors><Error><Code>RequestLimitExceeded</Code><Message>Request limit exceeded.</Message></Error></Errors></Response>"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string(throttled))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INSTANCES_PAGE_2))
            .mount(&server)
            .await;

        let retry = RetryConfig::default()
            .with_max_retries(3)
            .with_initial_backoff_ms(1)
            .with_jitter(false);
        let matrix = matrix(Service::Ec2, &server, retry).await;
        let records = aggregate(&matrix, "ec2-instances", &AggregateOptions::default())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["InstanceId"], "i-bbb");
    }

    /// Test a failing cell is skipped instead of failing the whole listing
    #[tokio::test]
    async fn test_access_denied_cell_is_skipped() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                r#"<Response><Errors><Error><Code>UnauthorizedOperation</Code><Message>denied</Message></Error></Errors></Response>"#,
            ))
            .mount(&server)
            .await;

        let matrix = matrix(Service::Ec2, &server, RetryConfig::disabled()).await;
        let records = aggregate(&matrix, "ec2-instances", &AggregateOptions::default())
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}

/// Tests for JSON-protocol listings
mod json_tests {
    use super::*;

    /// Test scaling policies are requested with the target header and namespace
    #[tokio::test]
    async fn test_scaling_policies() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header(
                "x-amz-target",
                "AnyScaleFrontendService.DescribeScalingPolicies",
            ))
            .and(body_string_contains("\"ServiceNamespace\":\"ecs\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ScalingPolicies": [
                    {"PolicyARN": "arn:aws:autoscaling:1", "PolicyName": "cpu", "ServiceNamespace": "ecs"}
                ]
            })))
            .mount(&server)
            .await;

        let matrix = matrix(Service::ApplicationAutoscaling, &server, RetryConfig::disabled()).await;
        let options = AggregateOptions {
            params: ListingParams {
                service_namespace: Some("ecs".to_string()),
            },
            fan_out: FanOut::Parallel {
                concurrency: 2,
                timeout: Duration::from_secs(5),
            },
            ..AggregateOptions::default()
        };
        let records = aggregate(&matrix, "scaling-policies", &options).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["PolicyName"], "cpu");
    }
}

/// Tests for S3 listings and enrichment
mod s3_tests {
    use super::*;

    /// Test buckets are listed once from the global endpoint
    #[tokio::test]
    async fn test_list_buckets() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BUCKETS))
            .expect(1)
            .mount(&server)
            .await;

        let matrix = matrix(Service::S3, &server, RetryConfig::disabled()).await;
        let records = aggregate(&matrix, "s3-buckets", &AggregateOptions::default())
            .await
            .unwrap();

        let names: Vec<&str> = records.iter().filter_map(|r| r["Name"].as_str()).collect();
        assert_eq!(names, vec!["logs", "assets"]);
        assert_eq!(records[0][PROFILE_FIELD], "default");
        assert_eq!(records[0][REGION_FIELD], Value::Null);
    }

    /// Test a missing policy becomes null and an existing one is kept as text
    #[tokio::test]
    async fn test_bucket_policy_enrichment() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/logs"))
            .and(query_param("policy", ""))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                r#"<Error><Code>NoSuchBucketPolicy</Code><Message>The bucket policy does not exist</Message></Error>"#,
            ))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/assets"))
            .and(query_param("policy", ""))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"Version":"2012-10-17","Statement":[]}"#),
            )
            .mount(&server)
            .await;

        let matrix = matrix(Service::S3, &server, RetryConfig::disabled()).await;
        let mut records = vec![
            json!({"Name": "logs", "LocationConstraint": null, "profile_name": "default"}),
            json!({"Name": "assets", "LocationConstraint": "eu-west-1", "profile_name": "default"}),
        ];
        enrich(&matrix, &mut records, Enrichment::BucketPolicy, &EnrichOptions::default())
            .await
            .unwrap();

        assert_eq!(records[0]["Policy"], Value::Null);
        assert_eq!(records[1]["Policy"], r#"{"Version":"2012-10-17","Statement":[]}"#);
    }

    /// Test the location lookup writes LocationConstraint
    #[tokio::test]
    async fn test_bucket_location_enrichment() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/logs"))
            .and(query_param("location", ""))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<LocationConstraint xmlns="http://s3.amazonaws.com/doc/2006-03-01/">eu-west-1</LocationConstraint>"#,
            ))
            .mount(&server)
            .await;

        let matrix = matrix(Service::S3, &server, RetryConfig::disabled()).await;
        let mut records = vec![json!({"Name": "logs", "profile_name": "default"})];
        enrich(&matrix, &mut records, Enrichment::BucketLocation, &EnrichOptions::default())
            .await
            .unwrap();

        assert_eq!(records[0]["LocationConstraint"], "eu-west-1");
    }
}

/// Tests for credential and error plumbing
mod plumbing_tests {
    use super::*;

    /// Test instance-role credentials are fetched with an IMDSv2 token
    #[tokio::test]
    async fn test_instance_metadata_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .and(header_exists("x-aws-ec2-metadata-token-ttl-seconds"))
            .respond_with(ResponseTemplate::new(200).set_body_string("imds-token"))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/"))
            .and(header("x-aws-ec2-metadata-token", "imds-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("inventory-role\n"))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/inventory-role"))
            .and(header("x-aws-ec2-metadata-token", "imds-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Code": "Success",
                "AccessKeyId": "ASIAROLE",
                "SecretAccessKey": "role-secret",
                "Token": "role-session"
            })))
            .mount(&server)
            .await;

        let creds = auth::from_instance_metadata(&server.uri()).await.unwrap();
        assert_eq!(creds.access_key_id, "ASIAROLE");
        assert_eq!(creds.session_token.as_deref(), Some("role-session"));
    }

    /// Test a metadata service without a role is a configuration error
    #[tokio::test]
    async fn test_instance_metadata_without_role() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("imds-token"))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        assert!(auth::from_instance_metadata(&server.uri()).await.is_err());
    }

    /// Test error bodies in both XML and JSON decode to code and message
    #[test]
    fn test_error_bodies_decode() {
        let xml = ProviderError::from_response(
            "iam",
            403,
            r#"<ErrorResponse><Error><Type>Sender</Type><Code>AccessDenied</Code><Message>not authorized</Message></Error></ErrorResponse>"#,
        );
        assert_eq!(xml.code, "AccessDenied");
        assert_eq!(xml.message, "not authorized");
        assert!(!xml.retryable);

        let json = ProviderError::from_response(
            "application-autoscaling",
            400,
            r#"{"__type":"com.amazon#ThrottlingException","message":"slow down"}"#,
        );
        assert_eq!(json.code, "ThrottlingException");
        assert!(json.retryable);
    }
}
