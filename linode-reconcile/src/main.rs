//! linode-reconcile: drive a Linode resource to a declared state.
//!
//! Each invocation reconciles exactly one resource and prints a JSON
//! document describing the result and every change made:
//! - `image`: Linode Images (clone from disk or upload from file)
//! - `domain`: Linode DNS domains
//! - `domain-info`: look up a domain and its records

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linode_reconcile::reconciler::{domain, image};
use linode_reconcile::{
    ActionLog, Attributes, DesiredState, Existence, LinodeClient, LinodeConfig, Reconciler,
    ResourceClient, DOMAIN, IMAGE,
};

/// Linode resource reconciler
#[derive(Parser, Debug)]
#[command(name = "linode-reconcile", version, about)]
struct Args {
    /// Linode API token (falls back to LINODE_TOKEN)
    #[arg(long, env = "LINODE_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Linode API version
    #[arg(long, env = "LINODE_API_VERSION", default_value = "v4")]
    api_version: String,

    /// Override the API base URL (e.g., http://127.0.0.1:8080/v4)
    #[arg(long)]
    api_url: Option<String>,

    /// Seconds to wait before retrying a rate-limited request
    #[arg(long, default_value = "10")]
    rate_limit_retry_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage a Linode Image
    Image(ImageArgs),
    /// Manage a Linode Domain
    Domain(DomainArgs),
    /// Get info about a Linode Domain
    DomainInfo(DomainInfoArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum State {
    Present,
    Absent,
}

impl From<State> for Existence {
    fn from(state: State) -> Self {
        match state {
            State::Present => Existence::Present,
            State::Absent => Existence::Absent,
        }
    }
}

#[derive(clap::Args, Debug)]
struct ImageArgs {
    /// This image's unique label
    #[arg(long)]
    label: String,

    #[arg(long, value_enum)]
    state: State,

    /// A description for the image
    #[arg(long)]
    description: Option<String>,

    /// ID of the disk to clone this image from
    #[arg(long, conflicts_with = "source_file")]
    disk_id: Option<i64>,

    /// An image file to create this image with
    #[arg(long)]
    source_file: Option<PathBuf>,

    /// Region to upload this image to
    #[arg(long, default_value = image::DEFAULT_REGION)]
    region: String,

    /// Delete and recreate an existing image with this label
    #[arg(long)]
    recreate: bool,

    /// Wait for the image to become available
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    wait: bool,

    /// Seconds to wait for the image to become available
    #[arg(long, default_value = "600")]
    wait_timeout: u64,
}

impl ImageArgs {
    fn desired_state(&self) -> DesiredState {
        let wait = self
            .wait
            .then(|| image::wait_policy(Duration::from_secs(self.wait_timeout)));

        DesiredState::new(&IMAGE, self.state.into())
            .attr("label", self.label.as_str())
            .with("description", self.description.clone())
            .with("disk_id", self.disk_id)
            .with(
                "source_file",
                self.source_file
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            )
            .attr("region", self.region.as_str())
            .with_recreate(self.recreate)
            .with_wait(wait)
    }
}

#[derive(clap::Args, Debug)]
struct DomainArgs {
    /// The domain name
    #[arg(long)]
    domain: String,

    #[arg(long, value_enum)]
    state: State,

    /// Whether this is a master or slave zone
    #[arg(long = "type")]
    domain_type: Option<String>,

    /// Start of Authority email address (required for master domains)
    #[arg(long)]
    soa_email: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// Display group in the Linode Manager
    #[arg(long)]
    group: Option<String>,

    /// active, disabled or edit_mode
    #[arg(long)]
    status: Option<String>,

    /// Tags to assign to this domain
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,

    #[arg(long)]
    ttl_sec: Option<i64>,

    #[arg(long)]
    refresh_sec: Option<i64>,

    #[arg(long)]
    retry_sec: Option<i64>,

    #[arg(long)]
    expire_sec: Option<i64>,

    /// IP addresses of the master DNS servers (slave domains)
    #[arg(long, value_delimiter = ',')]
    master_ips: Vec<String>,

    /// IP addresses allowed to AXFR the entire zone
    #[arg(long, value_delimiter = ',')]
    axfr_ips: Vec<String>,

    /// Delete and recreate an existing domain
    #[arg(long)]
    recreate: bool,
}

fn non_empty(items: &[String]) -> Option<Vec<String>> {
    (!items.is_empty()).then(|| items.to_vec())
}

impl DomainArgs {
    fn desired_state(&self) -> DesiredState {
        DesiredState::new(&DOMAIN, self.state.into())
            .attr("domain", self.domain.as_str())
            .with("type", self.domain_type.clone())
            .with("soa_email", self.soa_email.clone())
            .with("description", self.description.clone())
            .with("group", self.group.clone())
            .with("status", self.status.clone())
            .with("tags", non_empty(&self.tags))
            .with("ttl_sec", self.ttl_sec)
            .with("refresh_sec", self.refresh_sec)
            .with("retry_sec", self.retry_sec)
            .with("expire_sec", self.expire_sec)
            .with("master_ips", non_empty(&self.master_ips))
            .with("axfr_ips", non_empty(&self.axfr_ips))
            .with_recreate(self.recreate)
    }
}

#[derive(clap::Args, Debug)]
#[command(group(ArgGroup::new("selector").required(true).args(["id", "domain"])))]
struct DomainInfoArgs {
    /// The unique id of the domain
    #[arg(long)]
    id: Option<i64>,

    /// The unique domain name of the domain
    #[arg(long)]
    domain: Option<String>,
}

impl DomainInfoArgs {
    fn criteria(&self) -> Attributes {
        let mut criteria = Attributes::new();
        if let Some(id) = self.id {
            criteria.insert("id".to_string(), id.into());
        }
        if let Some(domain) = &self.domain {
            criteria.insert("domain".to_string(), domain.as_str().into());
        }
        criteria
    }
}

fn client_config(args: &Args) -> Result<LinodeConfig> {
    let token = args
        .api_token
        .clone()
        .or_else(|| std::env::var("LINODE_TOKEN").ok())
        .context("No API token: pass --api-token or set LINODE_API_TOKEN")?;

    let mut config = LinodeConfig::new(token);
    config.api_version = args.api_version.clone();
    config.base_url = args.api_url.clone();
    config.rate_limit_retry = Duration::from_secs(args.rate_limit_retry_secs);
    Ok(config)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a failure document and exit non-zero.
fn fail(msg: &str, actions: &ActionLog) -> ! {
    error!("{}", msg);
    println!("{}", failure_document(msg, actions));
    std::process::exit(1);
}

fn failure_document(msg: &str, actions: &ActionLog) -> serde_json::Value {
    let mut doc = serde_json::to_value(actions).unwrap_or_else(|_| json!({}));
    doc["failed"] = json!(true);
    doc["msg"] = json!(msg);
    doc
}

async fn run_reconcile(reconciler: &Reconciler, desired: &DesiredState) -> Result<()> {
    let kind = reconciler.kind().name;
    match reconciler.reconcile(desired).await {
        Ok(outcome) => {
            info!(
                "Reconciled {} {} ({} actions)",
                kind,
                desired.identity(),
                outcome.actions.len()
            );
            let mut doc = serde_json::to_value(&outcome.actions)?;
            doc[kind] = outcome
                .resource
                .map(|r| r.into_raw())
                .unwrap_or(serde_json::Value::Null);
            print_json(&doc)
        }
        Err(failure) => fail(&failure.to_string(), &failure.actions),
    }
}

async fn run_domain_info(client: Arc<dyn ResourceClient>, args: &DomainInfoArgs) -> Result<()> {
    let reconciler = Reconciler::new(client.clone(), domain::definition());

    let found = match reconciler.lookup(&args.criteria()).await {
        Ok(found) => found,
        Err(e) => fail(&e.to_string(), &ActionLog::new()),
    };
    let Some(resource) = found else {
        fail("failed to get domain", &ActionLog::new());
    };

    let records = match domain::records(client.as_ref(), &resource).await {
        Ok(records) => records,
        Err(e) => fail(&e.to_string(), &ActionLog::new()),
    };

    print_json(&json!({
        "domain": resource.into_raw(),
        "records": records,
    }))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the result document
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linode_reconcile=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = client_config(&args)?;
    let client: Arc<dyn ResourceClient> =
        Arc::new(LinodeClient::new(config).context("Failed to create API client")?);

    match &args.command {
        Command::Image(image_args) => {
            let reconciler = Reconciler::new(client, image::definition());
            run_reconcile(&reconciler, &image_args.desired_state()).await
        }
        Command::Domain(domain_args) => {
            let reconciler = Reconciler::new(client, domain::definition());
            run_reconcile(&reconciler, &domain_args.desired_state()).await
        }
        Command::DomainInfo(info_args) => run_domain_info(client, info_args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linode_reconcile::Value;

    #[test]
    fn test_disk_id_conflicts_with_source_file() {
        let result = Args::try_parse_from([
            "linode-reconcile",
            "--api-token",
            "t",
            "image",
            "--label",
            "base",
            "--state",
            "present",
            "--disk-id",
            "1",
            "--source-file",
            "/tmp/image.img.gz",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_image_args_to_desired_state() {
        let args = Args::try_parse_from([
            "linode-reconcile",
            "image",
            "--label",
            "base",
            "--state",
            "present",
            "--disk-id",
            "12",
            "--wait",
            "false",
        ])
        .unwrap();
        let Command::Image(image_args) = args.command else {
            panic!("expected image command");
        };

        let desired = image_args.desired_state();
        assert_eq!(desired.existence, Existence::Present);
        assert_eq!(desired.get("disk_id"), Some(&Value::Int(12)));
        assert_eq!(desired.get("region"), Some(&Value::from("us-east")));
        assert!(desired.get("source_file").is_none());
        assert!(desired.wait.is_none());
        assert!(desired.mutable_attributes.contains("description"));
    }

    #[test]
    fn test_domain_args_skip_empty_lists() {
        let args = Args::try_parse_from([
            "linode-reconcile",
            "domain",
            "--domain",
            "example.com",
            "--state",
            "present",
            "--tags",
            "web,prod",
        ])
        .unwrap();
        let Command::Domain(domain_args) = args.command else {
            panic!("expected domain command");
        };

        let desired = domain_args.desired_state();
        assert_eq!(
            desired.get("tags"),
            Some(&Value::List(vec!["web".into(), "prod".into()]))
        );
        assert!(desired.get("master_ips").is_none());
        assert!(desired.wait.is_none());
    }

    #[test]
    fn test_failure_document_keeps_actions() {
        let mut actions = ActionLog::new();
        actions.register("Deleted domain example.com");

        let doc = failure_document("failed to create domain example.com", &actions);
        assert_eq!(
            doc,
            json!({
                "failed": true,
                "msg": "failed to create domain example.com",
                "changed": true,
                "actions": ["Deleted domain example.com"],
            })
        );
    }

    #[test]
    fn test_domain_info_requires_selector() {
        assert!(Args::try_parse_from(["linode-reconcile", "domain-info"]).is_err());
    }
}
