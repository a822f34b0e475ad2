// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `ufsd` command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use ufs_ipc::PortNamespace;

use crate::config::DispatcherConfig;
use crate::dispatcher::Dispatcher;
use crate::supervisor::ThreadSupervisor;
use crate::worker;

/// Returns the CLI usage string.
pub fn help() -> &'static str {
    "ufsd brokers userlandfs filesystem servers. Usage: ufsd [--help] [--config <path>]"
}

/// Parsed command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print usage and exit.
    Help,
    /// Run the dispatcher.
    Run {
        /// Configuration file; defaults apply when absent.
        config: Option<PathBuf>,
    },
}

/// Parses arguments (without the program name).
pub fn parse(args: &[&str]) -> Result<Command, String> {
    let mut config = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--help" | "-h" => return Ok(Command::Help),
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown argument {other}")),
        }
    }
    Ok(Command::Run { config })
}

/// Parses `std::env::args`, runs the dispatcher until it stops and reports the exit status.
pub fn run() -> ExitCode {
    let owned: Vec<String> = std::env::args().skip(1).collect();
    let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
    let config_path = match parse(&refs) {
        Ok(Command::Help) => {
            println!("{}", help());
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run { config }) => config,
        Err(err) => {
            eprintln!("ufsd: {err}\n{}", help());
            return ExitCode::from(2);
        }
    };
    let config = match config_path {
        Some(path) => match DispatcherConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                log::error!(target: "ufsd", "{err}");
                return ExitCode::FAILURE;
            }
        },
        None => DispatcherConfig::default(),
    };

    let namespace = PortNamespace::global();
    let supervisor = ThreadSupervisor::new(Arc::clone(&namespace), config.product.clone())
        .with_entry(config.server_path.clone(), worker::null_server);
    let supervisor = Arc::new(supervisor);
    match Dispatcher::start(namespace, config, supervisor) {
        Ok(handle) => {
            handle.wait();
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!(target: "ufsd", "failed to start: {err}");
            ExitCode::FAILURE
        }
    }
}
