use clap::Parser;
use ingest::Feed;
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod telemetry;

use config::Config;

#[derive(Parser)]
#[command(about = "Sync Cratejoy and Mailchimp records into SQL")]
struct Cli {
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only run these feeds (mailchimp, cratejoy-orders, cratejoy-subscriptions)
    #[arg(long = "feed")]
    feeds: Vec<Feed>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}: {err}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let _sentry = telemetry::init_logging(config.common.logging.as_ref());

    if let Some(metrics) = &config.common.metrics {
        if let Err(err) = telemetry::init_metrics(metrics) {
            tracing::warn!(error = %err, "Metrics disabled");
        }
    }

    let settings = match config.sync.resolve_from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Could not start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(ingest::run(&settings, &cli.feeds)) {
        Ok(report) if report.is_success() => {
            tracing::info!(passes = report.passes.len(), "Sync finished");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            tracing::error!(failures = report.failures(), "Sync finished with failures");
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!(error = %err, "Sync could not start");
            ExitCode::FAILURE
        }
    }
}
