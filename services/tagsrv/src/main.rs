//! tagsrv - UHF RFID tag inventory service

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use common::LogConfig;
use tagsrv::config::{endpoint_from_args, TagsrvConfig};
use tagsrv::simulator::ReaderSimulator;
use tagsrv::sink::{build_sink, DeliveryStats};
use tagsrv::supervisor::ReaderSupervisor;
use tagsrv::tools;
use uhf_link::SessionConfig;

#[derive(Parser)]
#[command(name = "tagsrv")]
#[command(about = "UHF RFID tag inventory service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: config/tagsrv.yaml)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides service.log_level
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,
}

/// Reader selection for ad-hoc use
#[derive(Args, Debug, Clone, Default)]
struct ReaderArgs {
    /// Network reader host
    #[arg(long, conflicts_with = "serial")]
    ip: Option<String>,

    /// Serial device path
    #[arg(long)]
    serial: Option<String>,

    /// TCP port, or baud rate with --serial
    #[arg(long)]
    port: Option<u32>,

    /// Reader address byte
    #[arg(long, value_parser = parse_address)]
    address: Option<u8>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the inventory service for every configured reader
    Run {
        #[command(flatten)]
        reader: ReaderArgs,
    },

    /// Run one inventory window and print the tags seen
    Scan {
        #[command(flatten)]
        reader: ReaderArgs,
    },

    /// Print the reader information block
    Info {
        #[command(flatten)]
        reader: ReaderArgs,
    },

    /// Try each known protocol variant and report which one answers
    Probe {
        #[command(flatten)]
        reader: ReaderArgs,
    },

    /// Serve a simulated network reader
    Simulate {
        /// Listen address
        #[arg(short, long, default_value = "0.0.0.0:6000")]
        bind: String,

        /// EPC to report (hex); repeat for several
        #[arg(long = "epc")]
        epcs: Vec<String>,

        /// Seed for reproducible tag bursts
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn parse_address(value: &str) -> Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid reader address '{value}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TagsrvConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    common::logging::init_with_config(&LogConfig {
        service_name: config.service.name.clone(),
        level: cli
            .log_level
            .clone()
            .unwrap_or_else(|| config.service.log_level.clone()),
        log_dir: config.service.log_dir.clone(),
        ansi: true,
    })
    .context("failed to initialize logging")?;

    match cli.command {
        Commands::Run { reader } => run_service(config, &reader).await,
        Commands::Scan { reader } => scan(&config, &reader).await,
        Commands::Info { reader } => reader_info(&config, &reader).await,
        Commands::Probe { reader } => probe(&config, &reader).await,
        Commands::Simulate { bind, epcs, seed } => simulate(&bind, &epcs, seed).await,
    }
}

/// Session settings for a one-shot tool: ad-hoc arguments, else the first configured reader
fn tool_session(config: &TagsrvConfig, args: &ReaderArgs) -> Result<SessionConfig> {
    let mut session = match endpoint_from_args(args.ip.as_deref(), args.serial.as_deref(), args.port) {
        Some(endpoint) => SessionConfig::new(endpoint),
        None => match config.readers.first() {
            Some(reader) => reader.session_config(),
            None => bail!("no reader selected: pass --ip or --serial, or configure `readers:`"),
        },
    };
    if let Some(address) = args.address {
        session.address = address;
    }
    Ok(session)
}

async fn run_service(mut config: TagsrvConfig, args: &ReaderArgs) -> Result<()> {
    if let Some(endpoint) = endpoint_from_args(args.ip.as_deref(), args.serial.as_deref(), args.port) {
        config = config.with_single_reader(endpoint, args.address);
    }
    config.validate().context("invalid configuration")?;

    info!(
        "Starting {} with {} reader(s)",
        config.service.name,
        config.readers.len()
    );

    let sink = build_sink(&config.sink).context("failed to build tag sink")?;
    let stats = Arc::new(DeliveryStats::default());
    let shutdown = common::shutdown::shutdown_token();

    let mut tasks = JoinSet::new();
    for reader in &config.readers {
        info!("Reader {}: {}", reader.name, reader.endpoint);
        let supervisor =
            ReaderSupervisor::from_config(reader, &config, Arc::clone(&sink), Arc::clone(&stats));
        tasks.spawn(supervisor.run(shutdown.child_token()));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Reader task failed: {}", e);
        }
    }

    info!(
        "Stopped: {} batches delivered ({} tags), {} dropped",
        stats.batches_delivered(),
        stats.tags_delivered(),
        stats.batches_dropped()
    );
    Ok(())
}

async fn scan(config: &TagsrvConfig, args: &ReaderArgs) -> Result<()> {
    let session = tool_session(config, args)?;
    let target = session.endpoint.to_string();
    let tags = tools::scan(session).await?;

    if tags.is_empty() {
        println!("{} no tags seen on {}", "○".yellow(), target);
        return Ok(());
    }

    println!("{} {} tag(s) on {}", "●".green(), tags.len(), target);
    println!("{:<32} {:>6} {:>8}", "EPC".bold(), "RSSI".bold(), "ANTENNA".bold());
    for tag in &tags {
        println!("{:<32} {:>6} {:>8}", tag.epc_hex(), tag.rssi, tag.antenna);
    }
    Ok(())
}

async fn reader_info(config: &TagsrvConfig, args: &ReaderArgs) -> Result<()> {
    let session = tool_session(config, args)?;
    let target = session.endpoint.to_string();

    match tools::info(session).await? {
        Some(frame) => println!(
            "{} {} (addr 0x{:02X}): {}",
            "●".green(),
            target,
            frame.address,
            common::hex::encode_spaced(&frame.data)
        ),
        None => println!("{} no reply from {}", "✗".red(), target),
    }
    Ok(())
}

async fn probe(config: &TagsrvConfig, args: &ReaderArgs) -> Result<()> {
    let session = tool_session(config, args)?;
    let target = session.endpoint.to_string();
    let results = tools::probe(session.endpoint, session.address, session.read_timeout_ms).await?;

    println!("Probing {}", target.bold());
    for result in &results {
        match &result.reply {
            Some(data) => println!(
                "  {} {:<36} {}",
                "✓".green(),
                result.variant.name(),
                common::hex::encode_spaced(data)
            ),
            None => println!("  {} {:<36} no reply", "✗".red(), result.variant.name()),
        }
    }

    if !results.iter().any(|r| r.matched()) {
        bail!("no protocol variant produced a valid reply from {target}");
    }
    Ok(())
}

async fn simulate(bind: &str, epcs: &[String], seed: Option<u64>) -> Result<()> {
    let mut simulator = ReaderSimulator::bind(bind, epcs)
        .await
        .with_context(|| format!("failed to start simulator on {bind}"))?;
    if let Some(seed) = seed {
        simulator = simulator.with_seed(seed);
    }

    simulator.run(common::shutdown::shutdown_token()).await
}
