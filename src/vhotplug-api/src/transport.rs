// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! One accept loop per bound transport, each spawning a handler task per connection.

use tokio::net::{TcpListener, UnixListener};
use tokio_vsock::{VsockAddr, VsockListener, VMADDR_CID_ANY};
use tracing::{info, warn};
use vhotplug_config::ApiConfig;
use vhotplug_orchestrator::OrchestratorHandle;

use crate::error::ApiError;
use crate::handler::handle_connection;

pub async fn serve_unix(path: String, orchestrator: OrchestratorHandle) -> Result<(), ApiError> {
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).map_err(|e| ApiError::BindUnix(path.clone(), e))?;
    info!(path, "listening on unix transport");
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { handle_connection(stream, orchestrator).await });
            }
            Err(e) => warn!(error = %e, "unix accept failed"),
        }
    }
}

pub async fn serve_tcp(host: String, port: u16, orchestrator: OrchestratorHandle) -> Result<(), ApiError> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|e| ApiError::BindTcp(addr.clone(), e))?;
    info!(addr, "listening on tcp transport");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(%peer, "tcp client connected");
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { handle_connection(stream, orchestrator).await });
            }
            Err(e) => warn!(error = %e, "tcp accept failed"),
        }
    }
}

/// Binds the vsock transport on `VMADDR_CID_ANY:port`; a connecting CID outside
/// `allowed_cids` is closed immediately without reading a single request (§4.7).
pub async fn serve_vsock(port: u32, allowed_cids: Vec<u32>, orchestrator: OrchestratorHandle) -> Result<(), ApiError> {
    let listener = VsockListener::bind(VsockAddr::new(VMADDR_CID_ANY, port))
        .map_err(|e| ApiError::BindVsock(port, e))?;
    info!(port, "listening on vsock transport");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if !allowed_cids.contains(&peer.cid()) {
                    warn!(cid = peer.cid(), "rejecting vsock connection from disallowed cid");
                    continue;
                }
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { handle_connection(stream, orchestrator).await });
            }
            Err(e) => warn!(error = %e, "vsock accept failed"),
        }
    }
}

pub fn require_tcp_address(config: &ApiConfig) -> Result<(String, u16), ApiError> {
    match (&config.host, config.port) {
        (Some(host), Some(port)) => Ok((host.clone(), port)),
        _ => Err(ApiError::MissingTcpAddress),
    }
}

pub fn require_unix_path(config: &ApiConfig) -> Result<String, ApiError> {
    config.unix_socket.clone().ok_or(ApiError::MissingUnixSocketPath)
}

pub fn require_vsock_port(config: &ApiConfig) -> Result<u32, ApiError> {
    config.port.map(u32::from).ok_or(ApiError::MissingVsockPort)
}
