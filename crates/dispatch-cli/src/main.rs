//! # Dispatch CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run a query and print the filled result
//! dispatch query -c cluster.json -q '{"match": "rust"}' --hits 5
//!
//! # Send the query to nodes 0 and 1 of group 2 only
//! dispatch query -c cluster.json --search-path 0,1/2
//!
//! # Show node and group health
//! dispatch status -c cluster.json
//! ```
//!
//! Results and status go to stdout as JSON; logs go to stderr and follow `RUST_LOG`.

use anyhow::{Context, Result};
use argh::FromArgs;
use dispatch_cli::query::{run_query, QueryOptions};
use dispatch_core::{DispatchConfig, Dispatcher};

/// Loads and validates a cluster config file.
fn load_config(path: &str) -> Result<DispatchConfig> {
    DispatchConfig::from_json_file(path).with_context(|| format!("Failed to load cluster config {path}"))
}

#[derive(FromArgs)]
/// search dispatcher: routes queries to groups of search nodes
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Query(QueryArgs),
    Status(StatusArgs),
}

/// Arguments for running a single query.
///
/// The dispatcher is built, waits for its first ping sweep, runs the query,
/// fills summaries and shuts down again.
#[derive(FromArgs)]
#[argh(subcommand, name = "query")]
/// run a query against the cluster
struct QueryArgs {
    /// path to the cluster config (JSON)
    #[argh(option, short = 'c')]
    config: String,

    /// query body forwarded to the nodes, as JSON
    #[argh(option, short = 'q', default = "\"{}\".into()")]
    query: String,

    /// number of hits to return
    #[argh(option, default = "10")]
    hits: usize,

    /// index of the first hit to return
    #[argh(option, default = "0")]
    offset: usize,

    /// query timeout in milliseconds
    #[argh(option, default = "5000")]
    timeout: u64,

    /// explicit node selection, e.g. `0,1/2`
    #[argh(option, long = "search-path")]
    search_path: Option<String>,

    /// trace level; dispatch decisions are traced at 2
    #[argh(option, long = "trace-level", default = "0")]
    trace_level: u32,

    /// rank profile to ask the nodes for
    #[argh(option)]
    ranking: Option<String>,

    /// summary class to fill hits with
    #[argh(option)]
    summary: Option<String>,

    /// only estimate the total hit count
    #[argh(switch)]
    estimate: bool,

    /// skip fetching summaries
    #[argh(switch, long = "no-fill")]
    no_fill: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
/// print node and group health
struct StatusArgs {
    /// path to the cluster config (JSON)
    #[argh(option, short = 'c')]
    config: String,

    /// include dispatch metrics
    #[argh(switch)]
    metrics: bool,
}

impl QueryArgs {
    fn options(&self) -> Result<QueryOptions> {
        let body: serde_json::Value =
            serde_json::from_str(&self.query).context("Invalid JSON in query body")?;
        let mut options = QueryOptions::new(body);
        options.hits = self.hits;
        options.offset = self.offset;
        options.timeout_ms = self.timeout;
        options.search_path = self.search_path.clone();
        options.trace_level = self.trace_level;
        options.estimate = self.estimate;
        options.ranking = self.ranking.clone();
        options.summary = self.summary.clone();
        options.fill = !self.no_fill;
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // stdout carries the JSON output, so logs go to stderr
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Query(args) => run_query_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
    }
}

async fn run_query_command(args: QueryArgs) -> Result<()> {
    let options = args.options()?;
    let config = load_config(&args.config)?;
    let dispatcher = Dispatcher::new(config).await?;

    let outcome = run_query(&dispatcher, &options).await;
    dispatcher.deconstruct().await;
    let outcome = outcome?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_status_command(args: StatusArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let dispatcher = Dispatcher::new(config).await?;

    let status = dispatcher.search_cluster().status();
    let output = if args.metrics {
        serde_json::json!({
            "cluster": status,
            "metrics": dispatcher.metrics().to_json(),
        })
    } else {
        serde_json::to_value(&status)?
    };
    dispatcher.deconstruct().await;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
