//! Command handlers
//!
//! Each handler builds the matrices it needs, aggregates, enriches, applies
//! the command-line filter and prints the result.

use crate::{
    AutoscalingCommand, BucketDetail, Cli, CloudwatchCommand, Command, Ec2Command, ElbCommand,
    GlobalArgs, IamCommand, ProfileCommand, S3Command,
};
use anyhow::Result;
use fleetscan::aggregate::{aggregate, AggregateOptions, FanOut};
use fleetscan::aws::auth::Credentials;
use fleetscan::aws::client::ClientSettings;
use fleetscan::aws::credentials::CredentialStore;
use fleetscan::aws::http::AwsHttpClient;
use fleetscan::aws::service::Service;
use fleetscan::config::Config;
use fleetscan::enrich::{enrich, validate_buckets, EnrichOptions, Enrichment};
use fleetscan::error::{Error, InvalidFilterSpec};
use fleetscan::filter::{Aggregation, FilterSpec};
use fleetscan::matrix::{CredentialSource, ServiceMatrix};
use fleetscan::output::render;
use fleetscan::report;
use fleetscan::resource::{get_all_resource_keys, get_resource, ListingParams};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use url::Url;

/// Everything a command needs, resolved once from flags and files
struct Context {
    global: GlobalArgs,
    config: Config,
    store: Option<CredentialStore>,
    source: CredentialSource,
    regions: Vec<String>,
    settings: ClientSettings,
    filter: Option<FilterSpec>,
    fan_out: FanOut,
}

impl Context {
    fn new(global: GlobalArgs) -> Result<Self> {
        let config = Config::load(global.config.as_deref())?;

        let source = match (&global.access_key_id, &global.secret_access_key) {
            (Some(key), Some(secret)) => CredentialSource::Static(Credentials::new(
                key,
                secret,
                global.session_token.as_deref(),
            )),
            _ if global.use_instance_role => CredentialSource::Ambient,
            _ if global.profiles.is_empty() => CredentialSource::Profiles(None),
            _ => CredentialSource::Profiles(Some(global.profiles.clone())),
        };

        let store = match source {
            CredentialSource::Profiles(_) => {
                Some(CredentialStore::load(global.credentials.as_deref())?)
            }
            _ => None,
        };

        let endpoint_url = config
            .endpoint_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| Error::config(format!("invalid endpoint_url '{}': {}", raw, e)))
            })
            .transpose()?;

        let settings = ClientSettings {
            http: AwsHttpClient::new(config.request_timeout())?,
            endpoint_url,
            retry: config.retry.clone(),
        };

        let fan_out = if global.parallel {
            FanOut::Parallel {
                concurrency: config.concurrency,
                timeout: config.call_timeout(),
            }
        } else {
            FanOut::Sequential
        };

        let regions = config.effective_regions(&global.regions);
        let filter = build_filter(&global)?;

        Ok(Self {
            global,
            config,
            store,
            source,
            regions,
            settings,
            filter,
            fan_out,
        })
    }

    async fn matrix(&self, service: Service) -> Result<ServiceMatrix> {
        Ok(ServiceMatrix::build(
            service,
            &self.source,
            self.store.as_ref(),
            &self.regions,
            &self.settings,
        )
        .await?)
    }

    async fn list(&self, matrix: &ServiceMatrix, kind: &str) -> Result<Vec<Value>> {
        self.list_with(matrix, kind, ListingParams::default()).await
    }

    async fn list_with(
        &self,
        matrix: &ServiceMatrix,
        kind: &str,
        params: ListingParams,
    ) -> Result<Vec<Value>> {
        let options = AggregateOptions {
            params,
            fan_out: self.fan_out,
            ..AggregateOptions::default()
        };
        Ok(aggregate(matrix, kind, &options).await?)
    }

    async fn enrich(
        &self,
        matrix: &ServiceMatrix,
        records: &mut [Value],
        enrichment: Enrichment,
    ) -> Result<()> {
        let options = EnrichOptions {
            fan_out: self.fan_out,
            batch_size: self.config.batch_size,
        };
        Ok(enrich(matrix, records, enrichment, &options).await?)
    }

    fn filtered(&self, records: Vec<Value>) -> Vec<Value> {
        match &self.filter {
            Some(filter) => filter.filter_records(records),
            None => records,
        }
    }

    fn emit_records(&self, records: Vec<Value>) -> Result<()> {
        let records = self.filtered(records);
        tracing::info!(count = records.len(), "emitting records");
        self.emit(&records)
    }

    fn emit_keyed(&self, records: BTreeMap<String, Value>) -> Result<()> {
        let records = match &self.filter {
            Some(filter) => filter.filter_keyed(records),
            None => records,
        };
        self.emit(&records)
    }

    fn emit<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        print!("{}", render(value, self.global.output)?);
        Ok(())
    }
}

fn build_filter(global: &GlobalArgs) -> Result<Option<FilterSpec>, InvalidFilterSpec> {
    let mut spec = if global.filters.is_empty() {
        None
    } else {
        Some(FilterSpec::from_expressions(&global.filters)?)
    };

    if let Some(text) = &global.filter_json {
        let parsed = FilterSpec::from_json_str(text)?;
        match &mut spec {
            Some(spec) => spec.extend(parsed),
            None => spec = Some(parsed),
        }
    }

    let aggregation = if global.match_all {
        Aggregation::All
    } else {
        Aggregation::Any
    };
    Ok(spec.map(|s| s.with_aggregation(aggregation)))
}

/// `kinds` reads only the registry; every other command resolves a `Context`
pub async fn run(cli: Cli) -> Result<()> {
    let Cli { global, command } = cli;
    match command {
        Command::Kinds => kinds(&global),
        Command::Profile(ProfileCommand::List) => profiles(&Context::new(global)?),
        Command::Ec2(cmd) => ec2(&Context::new(global)?, cmd).await,
        Command::S3(cmd) => s3(&Context::new(global)?, cmd).await,
        Command::Iam(cmd) => iam(&Context::new(global)?, cmd).await,
        Command::Elb(ElbCommand::List) => {
            list_kind(&Context::new(global)?, Service::Elb, "elb-load-balancers").await
        }
        Command::Autoscaling(cmd) => autoscaling(&Context::new(global)?, cmd).await,
        Command::Cloudwatch(CloudwatchCommand::Alarms) => {
            list_kind(&Context::new(global)?, Service::Cloudwatch, "cloudwatch-alarms").await
        }
    }
}

async fn list_kind(ctx: &Context, service: Service, kind: &str) -> Result<()> {
    let matrix = ctx.matrix(service).await?;
    ctx.emit_records(ctx.list(&matrix, kind).await?)
}

fn kinds(global: &GlobalArgs) -> Result<()> {
    let kinds: Vec<Value> = get_all_resource_keys()
        .into_iter()
        .filter_map(|key| {
            let def = get_resource(key)?;
            Some(json!({
                "kind": key,
                "display_name": def.display_name,
                "service": def.service,
                "global": def.is_global,
                "natural_key": def.natural_key,
            }))
        })
        .collect();
    print!("{}", render(&kinds, global.output)?);
    Ok(())
}

fn profiles(ctx: &Context) -> Result<()> {
    let store = match &ctx.store {
        Some(store) => store.clone(),
        None => CredentialStore::load(ctx.global.credentials.as_deref())?,
    };
    ctx.emit_keyed(report::profile_summary(&store))
}

async fn ec2(ctx: &Context, cmd: Ec2Command) -> Result<()> {
    let matrix = ctx.matrix(Service::Ec2).await?;
    match cmd {
        Ec2Command::ListVms => ctx.emit_records(ctx.list(&matrix, "ec2-instances").await?),
        Ec2Command::Summary => {
            let instances = ctx.filtered(ctx.list(&matrix, "ec2-instances").await?);
            ctx.emit(&report::ec2_summary(&instances))
        }
        Ec2Command::SecurityGroups => {
            let groups = ctx.list(&matrix, "ec2-security-groups").await?;
            let instances = ctx.list(&matrix, "ec2-instances").await?;
            let elb = ctx.matrix(Service::Elb).await?;
            let load_balancers = ctx.list(&elb, "elb-load-balancers").await?;
            ctx.emit_keyed(report::security_group_usage(
                groups,
                &instances,
                &load_balancers,
            ))
        }
        Ec2Command::Tags => {
            let tags = ctx.list(&matrix, "ec2-tags").await?;
            ctx.emit_keyed(report::resource_tags(&tags))
        }
    }
}

async fn s3(ctx: &Context, cmd: S3Command) -> Result<()> {
    let matrix = ctx.matrix(Service::S3).await?;
    let mut buckets = ctx.list(&matrix, "s3-buckets").await?;

    match cmd {
        S3Command::ListBuckets(detail) => {
            for enrichment in bucket_enrichments(&detail) {
                ctx.enrich(&matrix, &mut buckets, enrichment).await?;
            }
            ctx.emit_records(buckets)
        }
        S3Command::Summary => {
            ctx.enrich(&matrix, &mut buckets, Enrichment::BucketLocation)
                .await?;
            ctx.emit(&report::s3_summary(&ctx.filtered(buckets)))
        }
        S3Command::Validate => {
            ctx.enrich(&matrix, &mut buckets, Enrichment::BucketTagging)
                .await?;
            validate_buckets(
                &mut buckets,
                ctx.config.s3_bucket_naming_policy.as_deref(),
                &ctx.config.tagset,
            )?;
            ctx.emit_records(buckets)
        }
    }
}

/// Location first, so later passes reuse it for routing
fn bucket_enrichments(detail: &BucketDetail) -> Vec<Enrichment> {
    let mut passes = Vec::new();
    if detail.location || detail.policy || detail.tags || detail.objects {
        passes.push(Enrichment::BucketLocation);
    }
    if detail.policy {
        passes.push(Enrichment::BucketPolicy);
    }
    if detail.tags {
        passes.push(Enrichment::BucketTagging);
    }
    if detail.objects {
        passes.push(Enrichment::BucketObjects);
    }
    passes
}

async fn iam(ctx: &Context, cmd: IamCommand) -> Result<()> {
    let matrix = ctx.matrix(Service::Iam).await?;
    match cmd {
        IamCommand::ListUsers { groups } => {
            let mut users = ctx.list(&matrix, "iam-users").await?;
            if groups {
                ctx.enrich(&matrix, &mut users, Enrichment::UserGroups).await?;
            }
            ctx.emit_records(users)
        }
        IamCommand::ListGroups => ctx.emit_records(ctx.list(&matrix, "iam-groups").await?),
        IamCommand::ListRoles => ctx.emit_records(ctx.list(&matrix, "iam-roles").await?),
        IamCommand::UserMatrix => {
            let mut users = ctx.list(&matrix, "iam-users").await?;
            ctx.enrich(&matrix, &mut users, Enrichment::UserGroups).await?;
            let profiles: Vec<String> = matrix.profiles().into_iter().map(String::from).collect();
            ctx.emit_keyed(report::iam_user_matrix(&users, &profiles))
        }
        IamCommand::UserPermissions { user } => {
            let mut users = ctx.list(&matrix, "iam-users").await?;
            retain_named(&mut users, "UserName", user.as_deref());
            ctx.enrich(&matrix, &mut users, Enrichment::UserPermissions)
                .await?;
            ctx.emit_records(users)
        }
        IamCommand::RolePermissions { role } => {
            let mut roles = ctx.list(&matrix, "iam-roles").await?;
            retain_named(&mut roles, "RoleName", role.as_deref());
            ctx.enrich(&matrix, &mut roles, Enrichment::RolePermissions)
                .await?;
            ctx.emit_records(roles)
        }
    }
}

fn retain_named(records: &mut Vec<Value>, field: &str, name: Option<&str>) {
    if let Some(name) = name {
        records.retain(|r| r.get(field).and_then(Value::as_str) == Some(name));
        if records.is_empty() {
            tracing::warn!(field, name, "no principal with that name in any profile");
        }
    }
}

async fn autoscaling(ctx: &Context, cmd: AutoscalingCommand) -> Result<()> {
    match cmd {
        AutoscalingCommand::Groups => {
            let matrix = ctx.matrix(Service::Autoscaling).await?;
            ctx.emit_records(ctx.list(&matrix, "autoscaling-groups").await?)
        }
        AutoscalingCommand::Policies { namespace } => {
            let matrix = ctx.matrix(Service::ApplicationAutoscaling).await?;
            let params = ListingParams {
                service_namespace: Some(namespace),
            };
            ctx.emit_records(ctx.list_with(&matrix, "scaling-policies", params).await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn global(args: &[&str]) -> GlobalArgs {
        let mut argv = vec!["fleetscan"];
        argv.extend_from_slice(args);
        argv.push("kinds");
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn test_filter_combines_expressions_and_json() {
        let spec = build_filter(&global(&[
            "-f",
            "Name=a",
            "--filter-json",
            r#"[{"Name": "profile_name", "Values": ["p2"]}]"#,
            "--match-all",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(spec.clauses().len(), 2);
        assert_eq!(spec.aggregation(), Aggregation::All);

        assert!(build_filter(&global(&[])).unwrap().is_none());
        assert!(build_filter(&global(&["-f", "nonsense"])).is_err());
    }

    #[test]
    fn test_kinds_needs_no_credentials() {
        let cli = Cli::try_parse_from([
            "fleetscan",
            "kinds",
            "--credentials",
            "/nonexistent/credentials",
        ])
        .unwrap();
        assert!(tokio_test::block_on(run(cli)).is_ok());
    }

    #[test]
    fn test_service_commands_resolve_context_first() {
        let cli = Cli::try_parse_from([
            "fleetscan",
            "elb",
            "list",
            "--config",
            "/nonexistent/fleetscan.yaml",
        ])
        .unwrap();
        assert!(tokio_test::block_on(run(cli)).is_err());
    }

    #[test]
    fn test_bucket_detail_runs_location_first() {
        let passes = bucket_enrichments(&BucketDetail {
            objects: true,
            tags: true,
            ..BucketDetail::default()
        });
        assert_eq!(
            passes,
            vec![
                Enrichment::BucketLocation,
                Enrichment::BucketTagging,
                Enrichment::BucketObjects
            ]
        );
        assert!(bucket_enrichments(&BucketDetail::default()).is_empty());
    }

    #[test]
    fn test_retain_named() {
        let mut users = vec![json!({"UserName": "alice"}), json!({"UserName": "bob"})];
        retain_named(&mut users, "UserName", Some("bob"));
        assert_eq!(users, vec![json!({"UserName": "bob"})]);
        retain_named(&mut users, "UserName", None);
        assert_eq!(users.len(), 1);
    }
}
