// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Per-connection request/response loop, common to every transport.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;
use vhotplug_orchestrator::{Notification, OrchestratorError, OrchestratorHandle};

use crate::request::Request;
use crate::response::{OkPayload, Response};

/// Serves one client connection until it closes or a write fails. Closing a
/// connection does not cancel an in-flight orchestrator command submitted on its
/// behalf (§5): the handler simply stops reading further requests.
pub async fn handle_connection<S>(stream: S, orchestrator: OrchestratorHandle)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut notifications: Option<broadcast::Receiver<Notification>> = None;

    loop {
        // Two distinct `select!` shapes rather than one branching on an `Option` held
        // behind `&mut` in both arms: simpler to reason about than relying on the
        // macro's drop-before-handler ordering to release a shared borrow.
        let outcome = match &mut notifications {
            Some(rx) => tokio::select! {
                line = lines.next_line() => Outcome::Line(line),
                notification = rx.recv() => Outcome::Notification(notification),
            },
            None => Outcome::Line(lines.next_line().await),
        };

        match outcome {
            Outcome::Line(Ok(Some(line))) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&line, &orchestrator, &mut notifications).await;
                if write_line(&mut writer, &response).await.is_err() {
                    return;
                }
            }
            Outcome::Line(Ok(None)) => return,
            Outcome::Line(Err(e)) => {
                debug!(error = %e, "connection read error");
                return;
            }
            Outcome::Notification(Ok(notification)) => {
                if write_line(&mut writer, &notification).await.is_err() {
                    return;
                }
            }
            Outcome::Notification(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                debug!(skipped, "notification subscriber lagged, dropping skipped events");
            }
            Outcome::Notification(Err(broadcast::error::RecvError::Closed)) => {
                notifications = None;
            }
        }
    }
}

enum Outcome {
    Line(std::io::Result<Option<String>>),
    Notification(Result<Notification, broadcast::error::RecvError>),
}

async fn handle_line(
    line: &str,
    orchestrator: &OrchestratorHandle,
    notifications: &mut Option<broadcast::Receiver<Notification>>,
) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Response::failed(format!("Unknown message: {e}")),
    };

    match request {
        Request::EnableNotifications => {
            *notifications = Some(orchestrator.subscribe());
            Response::ok()
        }
        Request::UsbList { disconnected } => orchestrator
            .submit(|reply| vhotplug_orchestrator::OrchestratorCommand::UsbList { disconnected_only: disconnected, reply })
            .await
            .map(|devices| Response::Ok(OkPayload { usb_devices: Some(devices), ..Default::default() }))
            .unwrap_or_else(Response::failed),
        Request::UsbAttach { selector, vm } => match selector.resolve() {
            Some(selector) => reply_ok(orchestrator.submit(|reply| vhotplug_orchestrator::OrchestratorCommand::UsbAttach { selector, vm, reply }).await),
            None => Response::failed(OrchestratorError::DeviceNotFound),
        },
        Request::UsbDetach { selector } => match selector.resolve() {
            Some(selector) => reply_ok(orchestrator.submit(|reply| vhotplug_orchestrator::OrchestratorCommand::UsbDetach { selector, reply }).await),
            None => Response::failed(OrchestratorError::DeviceNotFound),
        },
        Request::UsbSuspend { vm } => reply_ok(orchestrator.submit(|reply| vhotplug_orchestrator::OrchestratorCommand::UsbSuspend { vm, reply }).await),
        Request::UsbResume { vm } => reply_ok(orchestrator.submit(|reply| vhotplug_orchestrator::OrchestratorCommand::UsbResume { vm, reply }).await),
        Request::PciList { disconnected } => orchestrator
            .submit(|reply| vhotplug_orchestrator::OrchestratorCommand::PciList { disconnected_only: disconnected, reply })
            .await
            .map(|devices| Response::Ok(OkPayload { pci_devices: Some(devices), ..Default::default() }))
            .unwrap_or_else(Response::failed),
        Request::PciAttach { selector, vm } => match selector.resolve() {
            Some(selector) => reply_ok(orchestrator.submit(|reply| vhotplug_orchestrator::OrchestratorCommand::PciAttach { selector, vm, reply }).await),
            None => Response::failed(OrchestratorError::DeviceNotFound),
        },
        Request::PciDetach { selector } => match selector.resolve() {
            Some(selector) => reply_ok(orchestrator.submit(|reply| vhotplug_orchestrator::OrchestratorCommand::PciDetach { selector, reply }).await),
            None => Response::failed(OrchestratorError::DeviceNotFound),
        },
        Request::PciSuspend { vm } => reply_ok(orchestrator.submit(|reply| vhotplug_orchestrator::OrchestratorCommand::PciSuspend { vm, reply }).await),
        Request::PciResume { vm } => reply_ok(orchestrator.submit(|reply| vhotplug_orchestrator::OrchestratorCommand::PciResume { vm, reply }).await),
        Request::DisconnectedList => orchestrator
            .submit(|reply| vhotplug_orchestrator::OrchestratorCommand::DisconnectedList { reply })
            .await
            .map(|devices| Response::Ok(OkPayload { disconnected_devices: Some(devices), ..Default::default() }))
            .unwrap_or_else(Response::failed),
    }
}

fn reply_ok(result: Result<(), OrchestratorError>) -> Response {
    match result {
        Ok(()) => Response::ok(),
        Err(e) => Response::failed(e),
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_string(value).expect("response types always serialize");
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
