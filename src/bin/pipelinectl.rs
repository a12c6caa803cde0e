//! Operator CLI for the pipeline control plane.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use gads_pipeline::config::ConfigLoader;
use gads_pipeline::control_plane::{
    self, BackfillOptions, MarkTerminalOptions, RetryOptions,
};
use gads_pipeline::extractor::Extractor;
use gads_pipeline::raw_sink::create_raw_sink;
use gads_pipeline::report_client::MockReportClient;
use gads_pipeline::runner::PipelineRunner;
use gads_pipeline::state_store::{PartitionStatus, StateFilter, StateStore};
use gads_pipeline::warehouse::{NullCuratedSink, WarehousePointerStore, WarehouseReconciler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pipelinectl", about = "Advertising report pipeline controller", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daily incremental sync.
    Daily,

    /// Backfill a range of historical dates.
    CatchUp {
        /// Override the configured catch-up window, in days.
        #[arg(long)]
        days: Option<i64>,
    },

    /// State store operations.
    #[command(subcommand)]
    State(StateCommand),

    /// Read-only consumer helpers.
    #[command(subcommand)]
    Consume(ConsumeCommand),

    /// Warehouse control-plane commands.
    #[command(subcommand)]
    Warehouse(WarehouseCommand),

    /// Observability commands.
    #[command(subcommand)]
    Observe(ObserveCommand),
}

#[derive(Debug, Subcommand)]
enum StateCommand {
    /// Inspect current partition state without mutating anything.
    Inspect {
        #[arg(long)]
        status: Option<StatusArg>,
        #[arg(long = "customer-id")]
        customer_id: Option<String>,
        #[arg(long = "query-name")]
        query_name: Option<String>,
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Requeue failed logical partitions by setting status to pending.
    Retry {
        #[arg(long = "customer-id")]
        customer_id: Option<String>,
        #[arg(long = "query-name")]
        query_name: Option<String>,
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[arg(long)]
        force: bool,
        #[arg(long = "clear-terminal")]
        clear_terminal: bool,
    },

    /// Mark failed logical partitions as terminal (no automatic retries).
    MarkTerminal {
        #[arg(long = "customer-id")]
        customer_id: Option<String>,
        #[arg(long = "query-name")]
        query_name: Option<String>,
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },

    /// Backfill control-plane commands.
    #[command(subcommand)]
    Backfill(BackfillCommand),
}

#[derive(Debug, Subcommand)]
enum BackfillCommand {
    /// Enqueue historical logical partitions as pending.
    Enqueue {
        #[arg(long = "customer-id")]
        customer_id: String,
        #[arg(long = "query-name")]
        query_name: String,
        #[arg(long)]
        since: NaiveDate,
        #[arg(long)]
        until: NaiveDate,
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[arg(long = "force-pending")]
        force_pending: bool,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ConsumeCommand {
    /// Preview authoritative partitions without writing anywhere.
    Preview {
        #[arg(long = "customer-id")]
        customer_id: Option<String>,
        #[arg(long = "query-name")]
        query_name: Option<String>,
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long = "limit-partitions")]
        limit_partitions: Option<i64>,
        #[arg(long = "sample-rows", default_value_t = 5)]
        sample_rows: usize,
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Debug, Subcommand)]
enum WarehouseCommand {
    /// Reconcile and publish warehouse pointers.
    Load,
}

#[derive(Debug, Subcommand)]
enum ObserveCommand {
    /// Summarize pipeline state without mutating anything.
    State {
        #[arg(long = "top-failed", default_value_t = 10)]
        top_failed: usize,
    },
    /// Report freshness and gaps for successful partitions.
    Freshness,
    /// Summarize retry and failure patterns without mutating state.
    Retries {
        #[arg(long = "top", default_value_t = 10)]
        top_partitions: usize,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
enum StatusArg {
    Pending,
    Success,
    Failed,
}

impl From<StatusArg> for PartitionStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => PartitionStatus::Pending,
            StatusArg::Success => PartitionStatus::Success,
            StatusArg::Failed => PartitionStatus::Failed,
        }
    }
}

fn state_db_path() -> PathBuf {
    std::env::var("PIPELINE_STATE_DB_PATH")
        .unwrap_or_else(|_| "data/state_store.db".to_string())
        .into()
}

fn pointer_db_path() -> PathBuf {
    std::env::var("PIPELINE_POINTER_DB_PATH")
        .unwrap_or_else(|_| "data/warehouse_pointers.db".to_string())
        .into()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Daily => run_daily(None).await,
        Command::CatchUp { days } => run_catch_up(days).await,
        Command::State(cmd) => run_state(cmd).await,
        Command::Consume(cmd) => run_consume(cmd).await,
        Command::Warehouse(cmd) => run_warehouse(cmd).await,
        Command::Observe(cmd) => run_observe(cmd).await,
    }
}

async fn build_runner() -> Result<PipelineRunner> {
    let config = ConfigLoader::load().context("loading pipeline configuration")?;
    let raw_sink = create_raw_sink().context("building raw sink")?;
    let state_store = Arc::new(
        StateStore::connect(state_db_path())
            .await
            .context("connecting to state store")?,
    );
    let extractor = Extractor::new(
        Arc::new(MockReportClient::default()),
        Arc::clone(&raw_sink),
        config.source.api_version.clone(),
    );
    let parallelism: usize = std::env::var("PIPELINE_PARALLELISM")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);
    Ok(PipelineRunner::new(config, extractor, state_store, raw_sink, parallelism))
}

async fn run_daily(_target_date: Option<NaiveDate>) -> Result<()> {
    let run_id = gads_pipeline::mint_run_id();
    tracing::info!(run_id = %run_id, "starting daily run");
    let runner = build_runner().await?;
    let results = runner.sync_daily(None, None).await;
    println!("Daily run complete: {} partitions processed", results.len());
    Ok(())
}

async fn run_catch_up(days: Option<i64>) -> Result<()> {
    let run_id = gads_pipeline::mint_run_id();
    tracing::info!(run_id = %run_id, days = ?days, "starting catch-up run");
    let runner = build_runner().await?;
    let results = runner.historical_catch_up(days).await;
    println!("Catch-up run complete: {} partitions processed", results.len());
    Ok(())
}

async fn run_state(cmd: StateCommand) -> Result<()> {
    let store = StateStore::connect(state_db_path()).await?;
    match cmd {
        StateCommand::Inspect {
            status,
            customer_id,
            query_name,
            since,
            until,
            limit,
            format,
        } => {
            let filter = StateFilter {
                status: status.map(PartitionStatus::from),
                customer_id,
                query_name,
                since,
                until,
                limit,
            };
            let states = control_plane::inspect(&store, &filter).await?;
            match format {
                OutputFormat::Table => println!("{}", control_plane::render_states_table(&states)),
                OutputFormat::Json => println!("{}", control_plane::render_states_json(&states)?),
            }
        }
        StateCommand::Retry {
            customer_id,
            query_name,
            since,
            until,
            dry_run,
            force,
            clear_terminal,
        } => {
            let filter = StateFilter {
                customer_id,
                query_name,
                since,
                until,
                ..Default::default()
            };
            let options = RetryOptions {
                force,
                clear_terminal,
                dry_run,
                threshold: None,
            };
            let report = control_plane::retry_partitions(&store, &filter, &options).await?;
            println!(
                "{} partition(s) {}; {} blocked by terminal state",
                report.retried.len(),
                if dry_run { "would be retried" } else { "retried" },
                report.blocked_terminal.len()
            );
        }
        StateCommand::MarkTerminal {
            customer_id,
            query_name,
            since,
            until,
            dry_run,
            force,
        } => {
            let filter = StateFilter {
                customer_id,
                query_name,
                since,
                until,
                ..Default::default()
            };
            let options = MarkTerminalOptions {
                force,
                dry_run,
                threshold: None,
            };
            let report = control_plane::mark_terminal(&store, &filter, &options).await?;
            println!(
                "{} partition(s) {}; {} already terminal",
                report.marked.len(),
                if dry_run { "would be marked terminal" } else { "marked terminal" },
                report.already_terminal.len()
            );
        }
        StateCommand::Backfill(BackfillCommand::Enqueue {
            customer_id,
            query_name,
            since,
            until,
            dry_run,
            force_pending,
            force,
        }) => {
            let options = BackfillOptions {
                customer_id,
                query_name,
                since,
                until,
                force_pending,
                dry_run,
                force,
                threshold: None,
            };
            let report = control_plane::backfill_enqueue(&store, &options).await?;
            println!(
                "Enqueued={} skipped={}",
                report.enqueued.len(),
                report.skipped.len()
            );
        }
    }
    Ok(())
}

async fn run_consume(cmd: ConsumeCommand) -> Result<()> {
    match cmd {
        ConsumeCommand::Preview {
            customer_id,
            query_name,
            since,
            until,
            limit_partitions,
            sample_rows,
            format,
        } => {
            let store = StateStore::connect(state_db_path()).await?;
            let filter = StateFilter {
                status: Some(PartitionStatus::Success),
                customer_id,
                query_name,
                since,
                until,
                limit: limit_partitions,
            };
            let states = control_plane::inspect(&store, &filter).await?;
            let raw_sink = create_raw_sink()?;
            let previews = control_plane::collect_preview(raw_sink.as_ref(), &states, sample_rows).await?;
            let as_json = matches!(format, OutputFormat::Json);
            println!("{}", control_plane::render_preview(&previews, as_json)?);
        }
    }
    Ok(())
}

async fn run_warehouse(cmd: WarehouseCommand) -> Result<()> {
    match cmd {
        WarehouseCommand::Load => {
            let state_store = Arc::new(StateStore::connect(state_db_path()).await?);
            let pointer_store = Arc::new(WarehousePointerStore::connect(pointer_db_path()).await?);
            let reconciler = WarehouseReconciler::new(state_store, pointer_store, Arc::new(NullCuratedSink));
            let plan = reconciler.run().await?;
            println!(
                "Warehouse reconciliation complete | loads={} replacements={} demotions={}",
                plan.load.len(),
                plan.replace.len(),
                plan.demote.len()
            );
        }
    }
    Ok(())
}

async fn run_observe(cmd: ObserveCommand) -> Result<()> {
    let store = StateStore::connect(state_db_path()).await?;
    let all_states = control_plane::inspect(&store, &StateFilter::default()).await?;
    if all_states.is_empty() {
        println!("No partition state records found.");
        return Ok(());
    }

    match cmd {
        ObserveCommand::State { top_failed } => {
            let summary = control_plane::observe_state(&all_states, top_failed);
            println!("Total logical partitions: {}", summary.total);
            println!("Status counts:");
            println!("  pending: {}", summary.pending);
            println!("  success: {}", summary.success);
            println!("  failed: {}", summary.failed);
            println!("Date ranges by (source, query_name):");
            for ((source, query_name), (min_date, max_date)) in &summary.date_ranges_by_query {
                println!("  {source} / {query_name} :: {min_date} -> {max_date}");
            }
            println!(
                "Attempt counts: min={} max={} avg={:.2}",
                summary.attempts.min, summary.attempts.max, summary.attempts.avg
            );
            println!("Top {} failed partitions:", summary.top_failed.len());
            for entry in &summary.top_failed {
                println!(
                    "  {} {} {} attempts={} updated_at={}",
                    entry.key.customer_id, entry.key.query_name, entry.key.logical_date,
                    entry.attempt_count, entry.updated_at
                );
            }
        }
        ObserveCommand::Freshness => {
            let report = control_plane::observe_freshness(&all_states, chrono::Utc::now().date_naive());
            if report.is_empty() {
                println!("No successful partitions found.");
            }
            for entry in &report {
                println!("{} / {}", entry.source, entry.query_name);
                println!("  earliest: {}", entry.earliest);
                println!("  latest: {} (lag_days={})", entry.latest, entry.lag_days);
                println!("  total_successful_partitions: {}", entry.total_successful_partitions);
                if entry.gaps.is_empty() {
                    println!("  gaps: none");
                } else {
                    println!("  gaps:");
                    for (start, end) in &entry.gaps {
                        if start == end {
                            println!("    {start}");
                        } else {
                            println!("    {start} -> {end}");
                        }
                    }
                }
            }
        }
        ObserveCommand::Retries { top_partitions } => {
            let report = control_plane::observe_retries(&all_states, top_partitions);
            println!("Retry overview");
            println!("  total partitions: {}", report.total);
            println!("  failed partitions: {}", report.failed);
            println!("  terminal partitions: {}", report.terminal);
            println!("  retryable failed partitions: {}", report.retryable_failed);
            println!(
                "  attempt counts: min={} max={} avg={:.2}",
                report.attempts.min, report.attempts.max, report.attempts.avg
            );
            println!("  attempt histogram:");
            println!("    1-2: {}", report.histogram.one_to_two);
            println!("    3-5: {}", report.histogram.three_to_five);
            println!("    6-10: {}", report.histogram.six_to_ten);
            println!("    10+: {}", report.histogram.more_than_ten);
            println!("Top {} partitions by attempts:", report.top_partitions.len());
            for entry in &report.top_partitions {
                println!(
                    "  {} {} {} attempts={} updated_at={}",
                    entry.key.customer_id, entry.key.query_name, entry.key.logical_date,
                    entry.attempt_count, entry.updated_at
                );
            }
        }
    }
    Ok(())
}
