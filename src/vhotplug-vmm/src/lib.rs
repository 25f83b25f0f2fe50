// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! VMM control-plane abstraction: a QEMU QMP client, a crosvm CLI driver, and the
//! façade that dispatches orchestrator operations to whichever one a VM uses.

pub mod crosvm;
pub mod error;
pub mod facade;
pub mod qemu;

pub use crosvm::{CrosvmLink, CrosvmUsbDevice};
pub use error::{CrosvmError, QmpError, VmmLinkError};
pub use facade::VmmLink;
pub use qemu::QemuLink;
