//! Command-line entry point: load configuration, run the pipeline, report.

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tripdata_loader::{
    ArtifactFormat, Category, Config, Error, Pipeline, StoreBackend, cancel_on_signal,
};

/// Exit status for a run aborted by a fatal error (bad configuration, unreachable destination)
const EXIT_FATAL: u8 = 2;

/// Load NYC TLC trip-record files into an object store
#[derive(Debug, Parser)]
#[command(name = "tripdata-loader", version, about)]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// First day of the range (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last day of the range, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Taxi type to load; repeat for several (yellow, green, fhv, fhvhv)
    #[arg(long = "category")]
    categories: Vec<Category>,

    /// Published file format: parquet or csv_gz
    #[arg(long)]
    format: Option<String>,

    /// Archive base URL; may contain a {category} placeholder
    #[arg(long)]
    base_url: Option<String>,

    /// Staging directory
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Destination container (bucket)
    #[arg(long)]
    container: Option<String>,

    /// Key prefix inside the container, e.g. "raw/"
    #[arg(long)]
    prefix: Option<String>,

    /// Use a local directory as the destination; the container is a subdirectory
    #[arg(long)]
    local_root: Option<PathBuf>,

    /// Worker pool width
    #[arg(short, long)]
    workers: Option<usize>,

    /// Upload attempts per item, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds to wait between upload attempts
    #[arg(long)]
    backoff_secs: Option<f64>,

    /// Default log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> Result<Config, Error> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(start) = self.start {
            config.schedule.start = start;
        }
        if let Some(end) = self.end {
            config.schedule.end = end;
        }
        if !self.categories.is_empty() {
            config.schedule.categories = self.categories;
        }
        if let Some(format) = self.format.as_deref() {
            config.schedule.format = parse_format(format)?;
        }
        if let Some(base_url) = self.base_url {
            config.source.base_url = base_url;
        }
        if let Some(dir) = self.staging_dir {
            config.staging.dir = dir;
        }
        if let Some(container) = self.container {
            config.destination.container = container;
        }
        if let Some(prefix) = self.prefix {
            config.destination.prefix = Some(prefix);
        }
        if let Some(root) = self.local_root {
            config.destination.backend = StoreBackend::Local { root };
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(secs) = self.backoff_secs {
            config.retry.backoff = Duration::try_from_secs_f64(secs).map_err(|e| {
                Error::config("retry.backoff", format!("invalid backoff '{}': {}", secs, e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_format(raw: &str) -> Result<ArtifactFormat, Error> {
    match raw {
        "parquet" => Ok(ArtifactFormat::Parquet),
        "csv_gz" | "csv.gz" => Ok(ArtifactFormat::CsvGz),
        other => Err(Error::config(
            "schedule.format",
            format!("unknown format '{}', expected parquet or csv_gz", other),
        )),
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "Invalid configuration");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "Failed to initialize");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let signals = tokio::spawn(cancel_on_signal(pipeline.cancel_token()));
    let result = pipeline.run().await;
    signals.abort();

    match result {
        Ok(summary) => {
            print!("{}", summary);
            ExitCode::from(summary.exit_code())
        }
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "Run aborted");
            eprintln!("run aborted: {}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}
