// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use vhotplug_config::{ApiConfig, Transport};
use vhotplug_orchestrator::OrchestratorHandle;

use crate::error::ApiError;
use crate::transport::{require_tcp_address, require_unix_path, require_vsock_port, serve_tcp, serve_unix, serve_vsock};

/// Binds every transport named in `config.transports` and runs their accept loops
/// until the process exits; a single transport's accept-loop panic does not bring
/// down the others, each runs on its own spawned task.
pub async fn run(config: &ApiConfig, orchestrator: OrchestratorHandle) -> Result<(), ApiError> {
    let mut tasks = Vec::new();

    for transport in &config.transports {
        match transport {
            Transport::Unix => {
                let path = require_unix_path(config)?;
                let orchestrator = orchestrator.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = serve_unix(path, orchestrator).await {
                        tracing::error!(error = %e, "unix transport stopped");
                    }
                }));
            }
            Transport::Tcp => {
                let (host, port) = require_tcp_address(config)?;
                let orchestrator = orchestrator.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = serve_tcp(host, port, orchestrator).await {
                        tracing::error!(error = %e, "tcp transport stopped");
                    }
                }));
            }
            Transport::Vsock => {
                let port = require_vsock_port(config)?;
                let allowed_cids = config.allowed_cids.clone();
                let orchestrator = orchestrator.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = serve_vsock(port, allowed_cids, orchestrator).await {
                        tracing::error!(error = %e, "vsock transport stopped");
                    }
                }));
            }
        }
    }

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
