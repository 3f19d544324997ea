use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use esbridge_cluster::{Cluster, HttpCluster};
use esbridge_core::IndexPair;
use esbridge_gateway::{Gateway, GatewayConfig};
use esbridge_migrate::BulkMigrator;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "esbridge", version, about = "Migrate, diff and dual-write across Elasticsearch clusters")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short = 'c', long = "config", global = true, default_value = "esbridge.yaml")]
    config: PathBuf,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(clap::Args, Debug)]
struct PairArgs {
    /// Regex over source index names; each match maps onto itself
    #[arg(long = "pattern")]
    pattern: Option<String>,

    /// Explicit pair as "source:target" (repeatable)
    #[arg(long = "pair")]
    pairs: Vec<String>,

    /// Restrict traversal to these document IDs (repeatable)
    #[arg(long = "id")]
    ids: Vec<String>,

    /// Include indices whose names start with '.'
    #[arg(long = "include-system", action = ArgAction::SetTrue)]
    include_system: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy settings/mappings/aliases and stream all documents
    Sync {
        #[command(flatten)]
        pairs: PairArgs,
        /// Recreate existing target indices
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Diff both sides and converge the target to the source
    SyncDiff {
        #[command(flatten)]
        pairs: PairArgs,
    },
    /// Diff both sides without writing
    Compare {
        #[command(flatten)]
        pairs: PairArgs,
    },
    /// Copy settings/mappings/aliases only
    CopySettings {
        #[command(flatten)]
        pairs: PairArgs,
        /// Recreate existing target indices
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Run the dual-write gateway
    Gateway,
}

fn init_tracing() {
    let env = std::env::var("ESBRIDGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ESBRIDGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid ESBRIDGE_METRICS_ADDR; expected host:port");
        }
    }
}

fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling");
            signal_token.cancel();
        }
    });
    token
}

fn parse_pair(raw: &str) -> Result<IndexPair> {
    let pair = match raw.split_once(':') {
        Some((source, target)) => IndexPair::new(source, target),
        None => IndexPair::new(raw, raw),
    };
    if pair.source_index.is_empty() || pair.target_index.is_empty() {
        bail!("invalid pair {raw:?}; expected \"source:target\"");
    }
    Ok(pair)
}

async fn connect(config: &Config, name: &str) -> Result<Arc<dyn Cluster>> {
    let descriptor = config.cluster(name)?;
    let cluster = HttpCluster::connect(descriptor)
        .await
        .with_context(|| format!("connecting to cluster {name}"))?;
    info!(cluster = name, version = cluster.version(), "connected");
    Ok(Arc::new(cluster))
}

async fn build_migrator(
    config: &Config,
    args: &PairArgs,
    cancel: CancellationToken,
) -> Result<BulkMigrator> {
    let section = &config.migrate;
    if section.source.is_empty() || section.target.is_empty() {
        bail!("config migrate section must name a source and a target cluster");
    }
    let source = connect(config, &section.source).await?;
    let target = connect(config, &section.target).await?;

    let mut migrator = BulkMigrator::new(source, target)
        .with_parallelism(section.parallelism)
        .with_scroll_size(section.scroll_size)
        .with_scroll_time(section.scroll_time)
        .with_slice_size(section.slice_size)
        .with_buffer_count(section.buffer_count)
        .with_write_parallel(section.write_parallel)
        .with_write_size(section.write_size)
        .with_compare_parallel(section.compare_parallel)
        .with_ignore_system_index(section.ignore_system_index && !args.include_system)
        .with_ids(args.ids.clone())
        .with_cancellation(cancel);

    if !args.pairs.is_empty() {
        let pairs: Vec<IndexPair> =
            args.pairs.iter().map(|raw| parse_pair(raw)).collect::<Result<_>>()?;
        migrator = migrator.with_index_pairs(pairs);
    }
    if let Some(pattern) = &args.pattern {
        migrator = migrator.with_pattern(pattern).await;
    }
    if args.pairs.is_empty() && args.pattern.is_none() {
        bail!("nothing to do: pass --pattern or at least one --pair");
    }
    Ok(migrator)
}

fn report_batch(report: &esbridge_migrate::BatchReport) -> Result<()> {
    for (pair, message) in &report.failed {
        warn!(pair = %pair, error = %message, "pair failed");
    }
    if !report.all_ok() {
        bail!("{} of {} pairs failed", report.failed.len(), report.total);
    }
    info!(total = report.total, "all pairs finished");
    Ok(())
}

fn print_diffs(
    output: Output,
    diffs: &std::collections::HashMap<String, esbridge_core::DiffResult>,
) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(diffs)?),
        Output::Human => {
            if diffs.is_empty() {
                println!("no differences");
                return Ok(());
            }
            let mut keys: Vec<_> = diffs.keys().collect();
            keys.sort();
            for key in keys {
                let d = &diffs[key];
                println!(
                    "{key}: created={} updated={} deleted={} equal={}",
                    d.created, d.updated, d.deleted, d.equal
                );
            }
        }
    }
    Ok(())
}

async fn run_gateway(config: &Config, cancel: CancellationToken) -> Result<()> {
    let section = config
        .gateway
        .as_ref()
        .ok_or_else(|| anyhow!("config has no gateway section"))?;
    if section.master != section.source && section.master != section.target {
        bail!("gateway master {:?} must be the source or the target", section.master);
    }

    let source = connect(config, &section.source).await?;
    let target = connect(config, &section.target).await?;
    let gateway = Gateway::new(
        source,
        target,
        GatewayConfig {
            address: section.address.clone(),
            user: section.user.clone(),
            password: section.password.clone(),
            master_is_target: section.master == section.target,
        },
    )?;
    gateway.run(cancel).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let cancel = shutdown_token();

    match &cli.command {
        Commands::Sync { pairs, force } => {
            let migrator = build_migrator(&config, pairs, cancel).await?;
            let report = migrator.sync(*force).await?;
            report_batch(&report)?;
        }
        Commands::SyncDiff { pairs } => {
            let migrator = build_migrator(&config, pairs, cancel).await?;
            let diffs = migrator.sync_diff().await?;
            print_diffs(cli.output, &diffs)?;
        }
        Commands::Compare { pairs } => {
            let migrator = build_migrator(&config, pairs, cancel).await?;
            let diffs = migrator.compare().await?;
            print_diffs(cli.output, &diffs)?;
        }
        Commands::CopySettings { pairs, force } => {
            let migrator = build_migrator(&config, pairs, cancel).await?;
            let report = migrator.copy_index_settings(*force).await?;
            report_batch(&report)?;
        }
        Commands::Gateway => run_gateway(&config, cancel).await?,
    }
    Ok(())
}
