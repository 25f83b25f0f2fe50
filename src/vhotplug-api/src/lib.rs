// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Line-delimited JSON request/notification server over UNIX, TCP, and VSOCK
//! transports, dispatching into the orchestrator's single event-loop task.

mod error;
mod handler;
mod request;
mod response;
mod server;
mod transport;

pub use error::ApiError;
pub use server::run;
