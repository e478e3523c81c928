//! `finflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `nodes`: list the node catalogue.
//! - `reports`: list the supported (domain, report type) pairs.
//! - `plan`: print the workflow definition planned for a report.
//! - `validate`: validate a workflow definition JSON file.
//! - `run`: run a report against a JSON file of invoices.
//! - `migrate`: run pending run-log migrations.
//! - `runs`: list recent runs from the run log.
//! - `show`: print one logged run with its node executions.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use engine::sink::CompositeLogSink;
use engine::{
    ExecutionLogSink, NodeRegistry, PgLogSink, ReportRequest, RunStatus, TracingLogSink,
    WorkflowDefinition, WorkflowExecutor, WorkflowPlanner,
};
use nodes::quality::ParsedDocumentValidator;
use nodes::render::JsonReportRenderer;
use nodes::source::StaticInvoiceSource;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "finflow",
    about = "Financial report workflow engine",
    version
)]
struct Cli {
    /// JSON configuration file (`executor`, `database_url`, `log_level`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Postgres URL of the run log.
    #[arg(long, global = true, env = "FINFLOW_DATABASE_URL")]
    database_url: Option<String>,

    /// Log filter directive.
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every registered node type with its metadata and ports.
    Nodes,
    /// List the reports the planner can build.
    Reports,
    /// Plan a report and print the resulting workflow definition.
    Plan {
        #[command(flatten)]
        report: ReportArgs,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Plan and run a report against a JSON array of invoices.
    Run {
        #[command(flatten)]
        report: ReportArgs,
        /// JSON file holding the invoices to report on.
        #[arg(long)]
        invoices: PathBuf,
    },
    /// Run pending run-log migrations.
    Migrate,
    /// List recent runs from the run log.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print one logged run and its node executions.
    Show { run_id: Uuid },
}

#[derive(clap::Args)]
struct ReportArgs {
    /// Report domain, e.g. `accounts_payable`.
    #[arg(long)]
    domain: String,
    /// Report type, e.g. `aging`.
    #[arg(long)]
    report_type: String,
    /// Report parameter as `key=value`; values are read as JSON when they
    /// parse, otherwise as plain strings. Repeatable.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
}

impl ReportArgs {
    fn request(&self) -> ReportRequest {
        self.params
            .iter()
            .fold(ReportRequest::new(&self.domain, &self.report_type), |req, (k, v)| {
                req.with_parameter(k.as_str(), v.clone())
            })
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn init_tracing(level: Option<&str>) {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Registry over an invoice file; without one the store is empty.
fn registry(invoices: Option<&Path>) -> anyhow::Result<Arc<NodeRegistry>> {
    let source = match invoices {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read invoices {}", path.display()))?;
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("invalid invoices JSON {}", path.display()))?;
            StaticInvoiceSource::from_json(value)?
        }
        None => StaticInvoiceSource::default(),
    };
    Ok(Arc::new(NodeRegistry::with_builtins(
        Arc::new(source),
        Arc::new(ParsedDocumentValidator::new()),
        Arc::new(JsonReportRenderer),
    )))
}

/// Read a workflow definition file and validate it against the builtin
/// registry, returning the execution order.
fn validate_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let definition: WorkflowDefinition =
        serde_json::from_str(&content).context("invalid workflow JSON")?;

    let registry = registry(None)?;
    let plan = engine::validate_definition(&definition, &registry)
        .map_err(|e| anyhow!("[{}] {e}", e.kind()))?;
    Ok(plan.order)
}

async fn connect(config: &AppConfig) -> anyhow::Result<db::DbPool> {
    let Some(url) = config.database_url.as_deref() else {
        bail!("no database configured (set --database-url or FINFLOW_DATABASE_URL)");
    };
    Ok(db::create_pool(url, 5).await?)
}

async fn log_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn ExecutionLogSink>> {
    let Some(url) = config.database_url.as_deref() else {
        info!("no database configured; run log goes to tracing only");
        return Ok(Arc::new(TracingLogSink));
    };
    let pool = match db::create_pool(url, 5).await {
        Ok(pool) => pool,
        // An unreachable run log must not stop the report.
        Err(e) if e.is_connection() => {
            warn!("run-log database unreachable, logging to tracing only: {e}");
            return Ok(Arc::new(TracingLogSink));
        }
        Err(e) => return Err(e.into()),
    };
    db::run_migrations(&pool).await?;
    Ok(Arc::new(CompositeLogSink::new(vec![
        Arc::new(PgLogSink::new(pool)),
        Arc::new(TracingLogSink),
    ])))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?.merge(cli.database_url, cli.log_level);
    init_tracing(config.log_level.as_deref());

    match cli.command {
        Command::Nodes => print_json(&registry(None)?.catalogue()),
        Command::Reports => print_json(&WorkflowPlanner::new(registry(None)?).supported_reports()),
        Command::Plan { report } => {
            let planner = WorkflowPlanner::new(registry(None)?);
            print_json(&planner.plan(&report.request())?)
        }
        Command::Validate { path } => match validate_file(&path) {
            Ok(order) => {
                println!("Workflow is valid. Execution order: {order:?}");
                Ok(())
            }
            Err(e) => {
                eprintln!("Validation failed: {e:#}");
                std::process::exit(1);
            }
        },
        Command::Run { report, invoices } => {
            let registry = registry(Some(&invoices))?;
            let definition = WorkflowPlanner::new(registry.clone()).plan(&report.request())?;
            let executor = WorkflowExecutor::new(registry, log_sink(&config).await?, config.executor.clone());

            let run = executor.run(definition).await?;
            print_json(&run)?;
            if run.status != RunStatus::Completed {
                if let Some(e) = &run.error {
                    warn!(kind = %e.kind, "report failed: {}", e.message);
                }
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Migrate => {
            let pool = connect(&config).await?;
            db::run_migrations(&pool).await?;
            info!("Migrations applied successfully");
            Ok(())
        }
        Command::Runs { limit } => {
            let pool = connect(&config).await?;
            print_json(&db::repository::runs::list_runs(&pool, limit).await?)
        }
        Command::Show { run_id } => {
            let pool = connect(&config).await?;
            let run = db::repository::runs::get_run(&pool, run_id).await?;
            let nodes = db::repository::node_executions::list_node_executions(&pool, run_id).await?;
            print_json(&serde_json::json!({ "run": run, "node_executions": nodes }))
        }
    }
}
