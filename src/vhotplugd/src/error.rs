// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use vhotplug_api::ApiError;
use vhotplug_config::ConfigError;
use vhotplug_udev::UdevError;
use vhotplug_watcher::WatcherError;

/// Fatal errors from bootstrap; `main` maps every variant to exit code 1.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum DaemonError {
    /// {0}
    Config(#[from] ConfigError),
    /// {0}
    Api(#[from] ApiError),
    /// failed to open the udev monitor: {0}
    Udev(#[from] UdevError),
    /// failed to set up the socket watcher: {0}
    Watcher(#[from] WatcherError),
}
