//! # metafetch: instance metadata snapshot CLI
//!
//! Fetches the instance-identity document once, writes it next to the working
//! directory, and exits non-zero on the first failure.

mod config;

use self::config::{get_config, AppConfig, Overrides, Preset};
use clap::Parser;
use metafetch::{init_logging, ErrorKind, FetchError, MetadataFetcher};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

// --- CLI Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file (default: ./metafetch.yml if present)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Reproduce one of the historical output layouts
    #[arg(long, value_enum)]
    preset: Option<Preset>,
    /// Instance-identity document URL
    #[arg(long)]
    endpoint: Option<String>,
    /// Request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Output JSON file name
    #[arg(long, short)]
    output: Option<String>,
    /// Directory to write output files to (default: working directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Also write the document base64-encoded
    #[arg(long)]
    base64: bool,
    /// Base64 output file name; implies --base64
    #[arg(long)]
    base64_output: Option<String>,
    /// Wrap the request in tracing spans reported on the console
    #[arg(long)]
    tracing: bool,
    /// Rotating log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Only log to the rotating log file. Console log lines otherwise go to
    /// stderr; stdout only ever carries the document.
    #[arg(long)]
    no_console_log: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            preset: self.preset,
            endpoint: self.endpoint.clone(),
            timeout_secs: self.timeout_secs,
            output_dir: self.output_dir.clone(),
            output_file_name: self.output.clone(),
            base64_file_name: self.base64_output.clone(),
            include_base64: self.base64,
            include_tracing: self.tracing,
            log_file: self.log_file.clone(),
            no_console_log: self.no_console_log,
        }
    }
}

// --- Main Application Entry ---

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match get_config(cli.config.as_deref()) {
        Ok(config) => config.with_overrides(cli.overrides()),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.log_options(), config.include_tracing) {
        eprintln!("Logging setup failed: {e}");
        return ExitCode::FAILURE;
    }

    match &config.source {
        Some(path) => info!("Loaded configuration from '{}'.", path.display()),
        None => info!("No configuration file found, using defaults and environment."),
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.kind() == ErrorKind::WorkingDir {
                println!("{e}");
            }
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &AppConfig) -> Result<(), FetchError> {
    let fetcher = MetadataFetcher::new(config.fetch_options(), config.trace_context())?;
    let outcome = fetcher.fetch_and_persist().await?;

    if let Some(id) = &outcome.identity.instance_id {
        info!(
            "Instance {id} in {}",
            outcome.identity.region.as_deref().unwrap_or("unknown region")
        );
    }
    println!("{}", outcome.report());
    Ok(())
}
