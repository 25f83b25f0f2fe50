// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! Structured logging setup for the hotplug daemon, built on `tracing`.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the process-wide `tracing` subscriber.
///
/// `debug` raises the default level from `info` to `debug`; either default is
/// overridden by `RUST_LOG` when set. Calling this more than once is a no-op,
/// which keeps tests that each spin up their own daemon harness from panicking
/// on a double-init.
pub fn init(debug: bool) {
    INITIALIZED.get_or_init(|| {
        let default_level = if debug { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
