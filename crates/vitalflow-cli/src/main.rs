//! Vitalflow CLI - Command line interface for the Vitalflow windowing engine

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vitalflow_cli::config::Config;
use vitalflow_cli::{build_recommender, build_sink};
use vitalflow_runtime::generator::{generate, GeneratorConfig};
use vitalflow_runtime::metrics::MetricsServer;
use vitalflow_runtime::pipeline::Pipeline;
use vitalflow_runtime::source::{DirLoader, FileSource};

#[derive(Parser)]
#[command(name = "vitalflow")]
#[command(author = "Vitalflow Contributors")]
#[command(version = "0.3.0")]
#[command(about = "Vitalflow - Windowed biometric stream aggregation", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "VITALFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a pointer file through the windowing pipeline
    Run {
        /// Path to the pointer file (one JSON pointer per line)
        #[arg(short, long, env = "VITALFLOW_POINTERS")]
        pointers: Option<PathBuf>,

        /// Directory the pointer object paths resolve under
        #[arg(short, long, env = "VITALFLOW_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Delay between pointers in milliseconds (0 = full speed)
        #[arg(long, default_value = "0")]
        throttle_ms: u64,

        /// Enable Prometheus metrics endpoint
        #[arg(long)]
        metrics: bool,

        /// Metrics endpoint port (overrides the config file)
        #[arg(long)]
        metrics_port: Option<u16>,
    },

    /// Generate a reproducible sample data set
    Generate {
        /// Output directory for the data set
        #[arg(short, long, default_value = "./data")]
        out: PathBuf,

        /// Number of accounts
        #[arg(long, default_value = "3")]
        accounts: usize,

        /// Batch files per account
        #[arg(long, default_value = "4")]
        batches: usize,

        /// Records per batch file
        #[arg(long, default_value = "10")]
        records: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Validate a configuration file
    Check {
        /// Path to the configuration file (defaults to --config)
        file: Option<PathBuf>,
    },

    /// Generate example configuration file
    ConfigGen {
        /// Output format (yaml, toml)
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path).map_err(|e| anyhow::anyhow!("{}", e))?,
        None => Config::default(),
    };

    // Initialize logging; RUST_LOG wins over -v, which wins over the config
    let level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            pointers,
            data_dir,
            throttle_ms,
            metrics,
            metrics_port,
        } => {
            run_replay(config, pointers, data_dir, throttle_ms, metrics, metrics_port).await?;
        }

        Commands::Generate {
            out,
            accounts,
            batches,
            records,
            seed,
        } => {
            let generator = GeneratorConfig {
                accounts,
                batches_per_account: batches,
                records_per_batch: records,
                seed,
                ..Default::default()
            };
            let set = generate(&generator, &out)?;

            println!("Data set written to: {}", out.display());
            println!("  Pointer file: {}", set.pointer_file.display());
            println!("  Pointers:     {}", set.pointers);
            println!("  Records:      {}", set.records);
        }

        Commands::Check { file } => {
            let Some(path) = file.or(cli.config) else {
                anyhow::bail!("Provide a configuration file to check (positional or --config)");
            };
            let checked = Config::load(&path).map_err(|e| anyhow::anyhow!("{}", e))?;
            checked
                .pipeline
                .validate()
                .map_err(|e| anyhow::anyhow!("{}", e))?;

            println!("Configuration OK: {}", path.display());
            println!("  Partitions:        {}", checked.pipeline.partitions);
            println!("  Short step window: {}s", checked.pipeline.short_steps_secs);
            println!("  Long step window:  {}s", checked.pipeline.long_steps_secs);
            println!(
                "  Glucose window:    {}s every {}s",
                checked.pipeline.glucose_size_secs, checked.pipeline.glucose_period_secs
            );
            println!(
                "  Allowed lateness:  {}s",
                checked.pipeline.allowed_lateness_secs
            );
        }

        Commands::ConfigGen { format, output } => {
            let content = match format.to_lowercase().as_str() {
                "yaml" | "yml" => Config::example_yaml(),
                "toml" => Config::example_toml(),
                _ => anyhow::bail!("Unsupported format: {}. Use 'yaml' or 'toml'", format),
            };

            if let Some(path) = output {
                std::fs::write(&path, &content)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", content);
            }
        }
    }

    Ok(())
}

async fn run_replay(
    config: Config,
    pointers: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    throttle_ms: u64,
    enable_metrics: bool,
    metrics_port: Option<u16>,
) -> Result<()> {
    let Some(pointer_file) = pointers.or(config.pointer_file) else {
        anyhow::bail!("No pointer file given; pass --pointers or set pointer_file in the config");
    };
    let data_root = data_dir
        .or(config.data_dir)
        .or_else(|| pointer_file.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));

    let metrics_enabled = enable_metrics || config.metrics.enabled;
    let metrics_port = metrics_port.unwrap_or(config.metrics.port);

    println!("Vitalflow Replay");
    println!("===================");
    println!("Pointers:   {}", pointer_file.display());
    println!("Data dir:   {}", data_root.display());
    println!("Partitions: {}", config.pipeline.partitions);
    if throttle_ms > 0 {
        println!("Throttle:   {}ms per pointer", throttle_ms);
    }
    if metrics_enabled {
        println!(
            "Metrics:    http://{}:{}/metrics",
            config.metrics.bind, metrics_port
        );
    }
    println!();

    let mut source = FileSource::new(&pointer_file);
    if throttle_ms > 0 {
        source = source.with_throttle(std::time::Duration::from_millis(throttle_ms));
    }
    let loader = Arc::new(DirLoader::new(&data_root));
    let recommender = build_recommender(&config.enrichment);
    let sink = build_sink(&config.sinks)?;

    let pipeline = Pipeline::new(config.pipeline, Box::new(source), loader, recommender, sink)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if metrics_enabled {
        let server = MetricsServer::new(
            pipeline.metrics(),
            format!("{}:{}", config.metrics.bind, metrics_port),
        );
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    tokio::select! {
        report = pipeline.run() => {
            let report = report?;
            println!("\nReplay Complete");
            println!("==================");
            println!("Pointers read:    {}", report.pointers);
            println!("Records ingested: {}", report.records);
            println!("Step summaries:   {}", report.steps_published);
            println!(
                "Joined summaries: {} ({} partial)",
                report.joined_published, report.partial_joins
            );
            let skipped =
                report.malformed_pointers + report.malformed_records + report.load_failures;
            if skipped > 0 {
                println!(
                    "Skipped input:    {} pointers, {} records, {} load failures",
                    report.malformed_pointers, report.malformed_records, report.load_failures
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
