mod cli_logger;

use clap::{Parser, Subcommand};
use spanreport::{Config, CountingAllocator, DEFAULT_CONFIG_FILE, ReportCommand, report_command};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::path::PathBuf;
use std::process::ExitCode;

use cli_logger::CliLogger;

const LOG_ENV: &str = "SPANREPORT_LOG";

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator::system();

#[derive(Debug, Parser)]
#[command(name = "spanreport")]
#[command(about = "Compare timing, query and allocation profiles of repeated runs", long_about = None)]
struct Cli {
    /// Config file; missing files fall back to defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Machine-readable output.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Inspect stored pages.
    #[command(subcommand)]
    Report(ReportCommand),
}

fn main() -> ExitCode {
    initialize_logging();
    let cli = Cli::parse();
    let logger = CliLogger::new(cli.json, cli.no_color);

    match run(&cli, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, logger: &CliLogger) -> anyhow::Result<()> {
    let config = Config::load_optional(&cli.config);
    tracing::debug!(base_dir = %config.base_dir.display(), "loaded config");

    match &cli.command {
        Command::Report(command) => {
            let output = report_command(&config, command)?;
            logger.print_output(&output)
        }
    }
}

/// Logs go to stderr so report tables on stdout stay pipeable.
fn initialize_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(filter)
        .init();
}
