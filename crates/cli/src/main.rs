// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `desctl`: a thin control-socket client for `desd`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod client;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use desd_core::{ActionName, ServiceName};

use client::DesdClient;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "desctl", version, about = "Control client for the desd service supervisor")]
struct Cli {
    /// Control socket path to connect to.
    #[arg(long, value_name = "PATH", default_value = "/run/desd/control.sock", global = true)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Round-trip arbitrary arguments through the daemon.
    Echo { args: Vec<String> },
    /// Invoke ACTION on SERVICE and wait for it to complete.
    ServiceAction { service: String, action: String },
    /// Run a kill script against SERVICE.
    Killscript { service: String, script: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("desctl: failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("desctl: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let client = DesdClient::connect(&cli.socket).await?;
    let reply = match cli.command {
        Command::Echo { args } => client.echo(args).await?,
        Command::ServiceAction { service, action } => {
            ServiceName::parse(service.clone()).map_err(|e| CliError::InvalidArgument(e.to_string()))?;
            ActionName::parse(action.clone()).map_err(|e| CliError::InvalidArgument(e.to_string()))?;
            client.service_action(&service, &action).await?
        }
        Command::Killscript { service, script } => {
            ServiceName::parse(service.clone()).map_err(|e| CliError::InvalidArgument(e.to_string()))?;
            client.killscript(&service, &script).await?
        }
    };
    println!("{}", reply.join(" "));
    Ok(())
}
