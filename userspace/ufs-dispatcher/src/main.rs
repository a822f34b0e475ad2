// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Binary entrypoint: run the dispatcher until it stops.

use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    ufs_dispatcher::cli::run()
}
