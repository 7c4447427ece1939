use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use access_metrics::app::aggregate_use_case::{run_aggregate, AggregateOptions};
use access_metrics::app::ingest_use_case::run_ingest;
use access_metrics::infra::influx::InfluxConfig;
use access_metrics::observability;
use access_metrics::pipeline::ingestion::DayCache;
use access_metrics::registry::source_map::SourceMap;

#[derive(Parser)]
#[command(name = "access-metrics")]
#[command(about = "Download mirror access-log metrics pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse one decompressed access log into a JSON day report on stdout
    Ingest {
        /// Log file to parse; stdin when omitted
        file: Option<PathBuf>,
    },
    /// Fill the day cache from the log archives and write rollups to InfluxDB
    Aggregate {
        /// Cache directory for per-day reports
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Source registry file; compiled-in defaults when omitted
        #[arg(long)]
        sources: Option<PathBuf>,
        /// InfluxDB write endpoint
        #[arg(long, default_value = "http://localhost:8086")]
        influx_url: String,
        #[arg(long, default_value = "osrt_access/autogen")]
        influx_bucket: String,
        #[arg(long, default_value = "-")]
        influx_org: String,
        /// Concurrent downloads; defaults to the core count
        #[arg(long)]
        jobs: Option<usize>,
        /// Print line protocol instead of writing to InfluxDB
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    observability::logging::init_logging();
    if let Err(e) = observability::metrics::init() {
        error!("metrics init failed: {}", e);
    }

    match cli.command {
        Commands::Ingest { file } => {
            run_ingest(file.as_deref())?;
        }
        Commands::Aggregate {
            cache_dir,
            sources,
            influx_url,
            influx_bucket,
            influx_org,
            jobs,
            dry_run,
        } => {
            let sources = match sources {
                Some(path) => SourceMap::load(path)?,
                None => SourceMap::default(),
            };
            let options = AggregateOptions {
                cache_root: cache_dir.unwrap_or_else(DayCache::default_root),
                sources,
                influx: InfluxConfig {
                    url: influx_url,
                    bucket: influx_bucket,
                    org: influx_org,
                    token: std::env::var("INFLUX_TOKEN").unwrap_or_default(),
                    dry_run,
                },
                jobs: jobs.unwrap_or_else(num_cpus::get),
            };
            run_aggregate(options).await?;
        }
    }

    Ok(())
}
