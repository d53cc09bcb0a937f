mod commands;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fleetscan::output::OutputFormat;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Multi-account AWS inventory
#[derive(Parser, Debug)]
#[command(name = "fleetscan", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Profile to query (repeatable); defaults to every profile in the credentials file
    #[arg(short, long = "profile", global = true)]
    pub profiles: Vec<String>,

    /// Region to query (repeatable); defaults to the configured regions
    #[arg(short, long = "region", global = true)]
    pub regions: Vec<String>,

    /// Use this access key instead of profiles
    #[arg(
        long,
        global = true,
        requires = "secret_access_key",
        conflicts_with_all = ["profiles", "use_instance_role"]
    )]
    pub access_key_id: Option<String>,

    #[arg(long, global = true, requires = "access_key_id")]
    pub secret_access_key: Option<String>,

    #[arg(long, global = true, requires = "access_key_id")]
    pub session_token: Option<String>,

    /// Use environment or instance-role credentials
    #[arg(long, global = true, conflicts_with = "profiles")]
    pub use_instance_role: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Filter expression: KEY=v1,v2 | KEY~regex | KEY>n | KEY<n (repeatable)
    #[arg(short, long = "filter", global = true)]
    pub filters: Vec<String>,

    /// Filter clauses as JSON: [{"Name": .., "Values": [..], "check": "gt", "regex": false}]
    #[arg(long, global = true)]
    pub filter_json: Option<String>,

    /// Keep records matching every filter clause instead of any
    #[arg(long, global = true)]
    pub match_all: bool,

    /// Fan calls out concurrently
    #[arg(long, global = true)]
    pub parallel: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Environment configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Shared credentials file
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Credential profiles
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// EC2 instances, security groups and tags
    #[command(subcommand)]
    Ec2(Ec2Command),
    /// S3 buckets
    #[command(subcommand)]
    S3(S3Command),
    /// IAM users, groups and roles
    #[command(subcommand)]
    Iam(IamCommand),
    /// Classic load balancers
    #[command(subcommand)]
    Elb(ElbCommand),
    /// Auto Scaling groups and Application Auto Scaling policies
    #[command(subcommand)]
    Autoscaling(AutoscalingCommand),
    /// CloudWatch alarms
    #[command(subcommand)]
    Cloudwatch(CloudwatchCommand),
    /// Resource kinds known to fleetscan
    Kinds,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Profiles with masked secrets
    List,
}

#[derive(Subcommand, Debug)]
pub enum Ec2Command {
    /// Instances
    ListVms,
    /// Instance counts per type, VPC and zone
    Summary,
    /// Security groups with the instances and load balancers using them
    SecurityGroups,
    /// Tags keyed by resource id
    Tags,
}

#[derive(Subcommand, Debug)]
pub enum S3Command {
    /// Buckets, optionally with per-bucket detail
    ListBuckets(BucketDetail),
    /// Bucket counts per profile and location
    Summary,
    /// Check bucket names and tags against the configured policy
    Validate,
}

#[derive(Args, Debug, Default)]
pub struct BucketDetail {
    #[arg(long)]
    pub location: bool,
    #[arg(long)]
    pub policy: bool,
    #[arg(long)]
    pub tags: bool,
    /// Object listing, count, size and newest timestamp
    #[arg(long)]
    pub objects: bool,
}

#[derive(Subcommand, Debug)]
pub enum IamCommand {
    /// Users
    ListUsers {
        /// Add group membership per profile
        #[arg(long)]
        groups: bool,
    },
    /// Groups
    ListGroups,
    /// Roles
    ListRoles,
    /// User name -> profile -> groups
    UserMatrix,
    /// Attached and inline policies of users
    UserPermissions {
        /// Only this user
        #[arg(long)]
        user: Option<String>,
    },
    /// Attached and inline policies of roles
    RolePermissions {
        /// Only this role
        #[arg(long)]
        role: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ElbCommand {
    /// Load balancers
    List,
}

#[derive(Subcommand, Debug)]
pub enum AutoscalingCommand {
    /// Auto Scaling groups
    Groups,
    /// Application Auto Scaling policies
    Policies {
        /// Service namespace (ecs, dynamodb, ...)
        #[arg(long)]
        namespace: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CloudwatchCommand {
    /// Metric alarms
    Alarms,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

/// Logs go to stderr, or to `log_file` when given. `RUST_LOG` overrides the level.
fn setup_logging(
    level: LogLevel,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let (non_blocking, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(log_file.is_some())
        .with_line_number(log_file.is_some())
        .init();

    tracing::info!("fleetscan started with log level: {:?}", level);
    if let Some(path) = log_file {
        tracing::info!("Log file: {:?}", path);
    }

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = setup_logging(cli.global.log_level, cli.global.log_file.as_deref())?;

    tokio::select! {
        result = commands::run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, abandoning in-flight calls");
            Err(anyhow::anyhow!("interrupted"))
        }
    }
}
