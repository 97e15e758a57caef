//! synthrun CLI - triggers remote synthetic tests and waits for their results.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use synthrun::backend::HttpBackendClient;
use synthrun::config;
use synthrun::metadata;
use synthrun::polling::PollingConfig;
use synthrun::report::{CompositeReporter, ConsoleReporter, JUnitReporter};
use synthrun::runner;

#[derive(Parser)]
#[command(name = "synthrun")]
#[command(about = "Trigger-and-wait runner for remote synthetic tests", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "synthrun.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger every test matched by the configured suite patterns and wait
    /// for their results.
    Trigger {
        /// Additional suite glob patterns, appended to the ones in the config file.
        #[arg(long = "suite")]
        suites: Vec<String>,

        /// JUnit XML output path, overriding the config file's `report.junit_file`.
        #[arg(long)]
        junit: Option<PathBuf>,
    },

    /// Validate the configuration file without triggering anything.
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Trigger { suites, junit } => {
            trigger(&cli.config, suites, junit, cli.verbose).await
        }
        Commands::Validate => validate_config(&cli.config),
    }
}

async fn trigger(
    config_path: &std::path::Path,
    extra_suites: Vec<String>,
    junit_override: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    if let Some(app) = config.trigger_app.clone() {
        metadata::set_trigger_app(app);
    }

    let mut suite_patterns = config.suites.clone();
    suite_patterns.extend(extra_suites);

    info!(
        "triggering tests for {} suite pattern(s)",
        suite_patterns.len()
    );

    let backend = HttpBackendClient::new(
        config.api.base_url.clone(),
        config.api.api_key.clone(),
        config.api.app_key.clone(),
    );

    let reporter = build_reporter(&config, junit_override, verbose);

    let polling_config = PollingConfig {
        default_polling_timeout_ms: config.polling.default_timeout_ms,
        fail_on_critical_errors: config.policy.fail_on_critical_errors,
        fail_on_timeout: config.policy.fail_on_timeout,
        poll_interval: Duration::from_millis(config.polling.interval_ms),
    };

    // No reverse tunnel is wired up by default; a host application that
    // needs one plugs in its own `Tunnel` implementation here.
    let summary = runner::run(&backend, None, &suite_patterns, &polling_config, &reporter).await?;

    if summary.failed > 0 || !summary.tests_not_found.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}

fn build_reporter(
    config: &config::Config,
    junit_override: Option<PathBuf>,
    verbose: bool,
) -> CompositeReporter {
    let mut composite = CompositeReporter::new();

    if config.report.console {
        composite = composite.with_reporter(ConsoleReporter::new(verbose || config.report.verbose));
    }

    let junit_path = junit_override.or_else(|| config.report.junit_file.clone());
    if let Some(path) = junit_path {
        composite = composite.with_reporter(JUnitReporter::new(path));
    }

    composite
}

fn validate_config(config_path: &std::path::Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Backend:              {}", config.api.base_url);
            println!("  Suite patterns:       {}", config.suites.len());
            println!(
                "  Default poll timeout: {}ms",
                config.polling.default_timeout_ms
            );
            println!("  Poll interval:        {}ms", config.polling.interval_ms);
            println!(
                "  Fail on critical errors: {}",
                config.policy.fail_on_critical_errors
            );
            println!("  Fail on timeout:      {}", config.policy.fail_on_timeout);
            if let Some(app) = &config.trigger_app {
                println!("  trigger_app override: {app}");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    }
}
