//! `dashpoll` binary entrypoint.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dash_data::Fetcher;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dash_cli::{Cli, CliError, Dashboard, DemoFetcher, HttpFetcher, WidgetFile};

fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {}", CliError::Runtime(e.to_string()));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dash_data=info,dash_cli=info,dashpoll=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}

fn build_fetcher(cli: &Cli) -> Result<Arc<dyn Fetcher<Value>>, CliError> {
    if cli.demo {
        info!(failure_ratio = cli.demo_failure_ratio, "using simulated integrations");
        return Ok(Arc::new(DemoFetcher::new(cli.demo_failure_ratio)?));
    }
    info!(backend = %cli.backend, "using dashboard backend");
    let fetcher = HttpFetcher::new(&cli.backend, Duration::from_secs(cli.request_timeout))?;
    Ok(Arc::new(fetcher))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let file = WidgetFile::load(&cli.widgets)?;
    let config = cli.data_config();
    let fetcher = build_fetcher(&cli)?;

    let dashboard = Dashboard::start(&config, &file.widgets, fetcher, cli.override_provider())?;
    let mut stdout = io::stdout();
    dash_cli::run_loop(
        dashboard,
        &mut stdout,
        cli.refresh_all_period(),
        dash_cli::stop_signal(cli.run_for()),
    )
    .await
}
