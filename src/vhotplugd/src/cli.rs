// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Parser;

/// Hot-plugging USB, PCI, and evdev devices into running QEMU/crosvm microVMs.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "PATH")]
    pub config: PathBuf,

    /// Attach every device already present on the host at startup.
    #[arg(short, long, default_value_t = false)]
    pub attach_connected: bool,

    /// Enable debug-level logging.
    #[arg(short, long, default_value_t = false)]
    pub debug: bool,
}
