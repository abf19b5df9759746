//! cqlc - run CQL statements from the shell
//!
//! # Usage
//!
//! ```bash
//! # Execute a statement
//! cqlc "SELECT * FROM system.local" --contact-point 127.0.0.1
//!
//! # With parameters and options
//! cqlc "SELECT * FROM users WHERE id = ?" --bind 42 --consistency QUORUM --tracing
//!
//! # Continue from a paging state
//! cqlc "SELECT * FROM events" --fetch-size 100 --page <PAGING_STATE>
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use cassandra_client::prelude::*;

#[derive(Parser)]
#[command(name = "cqlc")]
#[command(version)]
#[command(about = "Run CQL statements against a Cassandra or ScyllaDB cluster", long_about = None)]
#[command(after_help = "EXAMPLES:
    cqlc 'SELECT * FROM system.local'
    cqlc 'SELECT * FROM users WHERE id = ?' --bind 42 --consistency LOCAL_QUORUM
    cqlc 'SELECT * FROM events' --fetch-size 100 --format json")]
struct Cli {
    /// The CQL statement to execute
    query: Option<String>,

    /// Contact points (host[:port])
    #[arg(short = 'c', long, env = "CQLC_CONTACT_POINTS", value_delimiter = ',')]
    contact_point: Vec<String>,

    /// Keyspace to use
    #[arg(short, long, env = "CQLC_KEYSPACE")]
    keyspace: Option<String>,

    /// Config file (defaults to <config dir>/cqlc/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Positional parameters for `?` markers
    #[arg(short, long, value_delimiter = ',')]
    bind: Vec<String>,

    /// Consistency level, e.g. QUORUM or LOCAL_ONE
    #[arg(long)]
    consistency: Option<Consistency>,

    /// Serial consistency level for conditional updates
    #[arg(long)]
    serial_consistency: Option<SerialConsistency>,

    /// Rows per page (-1 keeps the driver default)
    #[arg(long, default_value_t = DEFAULT_FETCH_SIZE, allow_hyphen_values = true)]
    fetch_size: i32,

    /// Paging state returned by a previous run
    #[arg(long)]
    page: Option<String>,

    /// Retry policy: DEFAULT, DOWNGRADING or FALLTHROUGH
    #[arg(long, default_value = "DEFAULT")]
    retry: RetryPolicy,

    /// Mark the statement idempotent
    #[arg(long)]
    idempotent: bool,

    /// Request a server-side trace
    #[arg(long)]
    tracing: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved configuration
    Config,
    /// List consistency levels
    Levels,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Config) => show_config(&cli),
        Some(Commands::Levels) => {
            show_levels();
            Ok(())
        }
        None => match &cli.query {
            Some(query) => execute_query(query, &cli).await,
            None => {
                println!("{}", "cqlc - CQL from the shell".cyan().bold());
                println!();
                println!("Usage: cqlc <QUERY> [OPTIONS]");
                println!();
                println!("Try: cqlc --help");
                Ok(())
            }
        },
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "cassandra_client=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// File configuration with command-line overrides applied.
fn resolve_config(cli: &Cli) -> Result<ClientConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| ClientConfig::default_path("cqlc").filter(|p| p.exists()));

    let mut config = match path {
        Some(path) => ClientConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if !cli.contact_point.is_empty() {
        config.contact_points = cli.contact_point.clone();
    }
    if cli.keyspace.is_some() {
        config.keyspace = cli.keyspace.clone();
    }
    if config.contact_points.is_empty() {
        config.contact_points.push("127.0.0.1".to_string());
    }
    Ok(config)
}

fn execution_options(cli: &Cli) -> ExecutionOptions {
    let mut options = ExecutionOptions::new()
        .tracing(cli.tracing)
        .fetch_size(cli.fetch_size)
        .idempotent(cli.idempotent)
        .retry_policy(cli.retry);
    if let Some(level) = cli.consistency {
        options = options.consistency_level(level);
    }
    if let Some(level) = cli.serial_consistency {
        options = options.serial_consistency_level(level);
    }
    if let Some(page) = &cli.page {
        options = options.paging_state(PagingState::from(page.as_str()));
    }
    options
}

async fn execute_query(query: &str, cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    let options = execution_options(cli);
    let params: Vec<Value> = cli.bind.iter().map(|b| parse_binding(b)).collect();

    if cli.verbose {
        println!("{} {}", "Query:".dimmed(), query.yellow());
        println!("{} {}", "Contact points:".dimmed(), config.contact_points.join(", "));
        println!("{} {}", "Options:".dimmed(), options.to_json());
    }

    let registry = HandleRegistry::new(ScyllaDriver::new(), Handle::current());
    let mut context = HostContext::new();
    let client = CassandraClient::create_shared_default(&registry, context.handle(), &config)?;

    let (tx, rx) = oneshot::channel();
    client.execute_with_options(query, params, &options, move |outcome| {
        let _ = tx.send(outcome);
    })?;
    let outcome = context
        .run_until(rx)
        .await
        .map_err(|_| anyhow!("query outcome was never delivered"))?;
    client.close();

    let rs = outcome?;
    format_output(&rs, &cli.format)?;

    let info = rs.execution_info();
    if let Some(trace) = &info.query_trace {
        println!("{} {}", "Trace:".dimmed(), trace.cyan());
    }
    if let Some(level) = info.achieved_consistency_level {
        println!("{} {}", "Achieved consistency:".dimmed(), level.to_string().yellow());
    }
    if let Some(page) = &info.paging_state {
        println!("{} {}", "More rows, continue with --page".dimmed(), page.as_str().cyan());
    }
    Ok(())
}

/// Numbers, booleans and `null` are typed; everything else is text.
fn parse_binding(binding: &str) -> Value {
    if let Ok(n) = binding.parse::<i64>() {
        Value::Int64(n)
    } else if let Ok(f) = binding.parse::<f64>() {
        Value::Float64(f)
    } else if binding == "true" {
        Value::Bool(true)
    } else if binding == "false" {
        Value::Bool(false)
    } else if binding.eq_ignore_ascii_case("null") {
        Value::Null
    } else {
        Value::Text(binding.to_string())
    }
}

fn format_output(rs: &ResultSet, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rs.to_json())?);
        }
        OutputFormat::Table => {
            if rs.columns().is_empty() {
                println!("{}", "✓ done".green());
                return Ok(());
            }
            if rs.is_empty() {
                println!("{}", "(no results)".dimmed());
                return Ok(());
            }

            let cells: Vec<Vec<String>> = rs
                .rows()
                .iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect())
                .collect();
            let mut widths: Vec<usize> = rs.columns().iter().map(|c| c.chars().count()).collect();
            for row in &cells {
                for (w, cell) in widths.iter_mut().zip(row) {
                    *w = (*w).max(cell.chars().count());
                }
            }

            let header: Vec<String> = rs
                .columns()
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:width$}", c, width = *w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in &cells {
                let line: Vec<String> = row
                    .iter()
                    .zip(&widths)
                    .map(|(cell, w)| format!("{:width$}", cell, width = *w))
                    .collect();
                println!("{}", line.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rs.size().to_string().cyan());
        }
    }
    Ok(())
}

fn show_config(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    let cluster = config.cluster_options()?;

    println!("{}", "cqlc configuration".cyan().bold());
    println!();
    if let Some(path) = ClientConfig::default_path("cqlc") {
        println!("  {} {}", "Default file:".dimmed(), path.display());
    }
    println!("  {}", "Contact points:".dimmed());
    for point in &cluster.contact_points {
        println!("    • {}", point.to_string().white());
    }
    println!(
        "  {} {}",
        "Keyspace:".dimmed(),
        cluster.keyspace.as_deref().unwrap_or("(none)").white()
    );
    Ok(())
}

fn show_levels() {
    println!("{}", "Consistency levels".cyan().bold());
    println!();
    for level in Consistency::ALL {
        let scope = if level.is_dc_local() { "local DC" } else { "cluster" };
        println!("  {:14} {}", level.name().yellow(), scope.dimmed());
    }
}
