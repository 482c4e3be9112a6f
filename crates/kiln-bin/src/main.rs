// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! kiln host binary.

use clap::Parser;
use tracing::error;

mod cli;
mod error;
mod logging;
mod runtime;
mod shutdown;

use cli::{Cli, Command};
use error::BinResult;
use runtime::Runtime;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_format);

    let result = match cli.command {
        Command::Run { config } => run(config).await,
        Command::Validate { config } => validate(config),
        Command::Version => {
            println!("kiln {}", kiln_core::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config_path: std::path::PathBuf) -> BinResult<()> {
    let config = kiln_config::load_config(&config_path)?;
    Runtime::new(config).run().await
}

fn validate(config_path: std::path::PathBuf) -> BinResult<()> {
    let config = kiln_config::load_config(&config_path)?;
    println!(
        "OK: {} machine(s), {} chamber(s)",
        config.machines.len(),
        config
            .machines
            .iter()
            .map(|m| m.chambers.len())
            .sum::<usize>()
    );
    Ok(())
}
