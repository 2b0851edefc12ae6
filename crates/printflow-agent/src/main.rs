// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintFlow Agent: local print dispatch service.
//
// Entry point. Resolves the data directory, loads configuration,
// initialises logging, then builds and runs the service context.

mod logging;
mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use printflow_core::{APP_TITLE, APP_VERSION, AgentConfig};

use services::context::{ServiceContext, StartOptions};
use services::data_dir;

#[derive(Debug, Parser)]
#[command(name = "printflow-agent", version, about = "Local print dispatch agent")]
struct Cli {
    /// Data directory for configuration, certificate, history and logs.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Listening port for this run (not persisted).
    #[arg(long)]
    port: Option<u16>,

    /// Use in-memory printers with these names instead of the OS spooler.
    #[arg(long, value_name = "NAMES", value_delimiter = ',', num_args = 1..)]
    simulate: Option<Vec<String>>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let data_dir = match data_dir::resolve(cli.data_dir) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{APP_TITLE}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = match AgentConfig::load(&data_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{APP_TITLE}: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Err(e) = config.validate() {
        eprintln!("{APP_TITLE}: {e}");
        return ExitCode::FAILURE;
    }

    if cli.print_config {
        return match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{APP_TITLE}: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let _log_guard = match logging::init(&data_dir, &config.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{APP_TITLE}: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        version = APP_VERSION,
        data_dir = %data_dir.display(),
        "{APP_TITLE} starting"
    );

    let options = StartOptions {
        data_dir,
        simulate: cli.simulate,
    };
    let result = match ServiceContext::start(config, options).await {
        Ok(ctx) => ctx.run().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code(), error = %e, "fatal");
            eprintln!("{APP_TITLE}: {e}");
            ExitCode::FAILURE
        }
    }
}
