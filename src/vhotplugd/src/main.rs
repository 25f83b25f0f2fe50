// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

mod bootstrap;
mod cli;
mod error;
mod events;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use vhotplug_config::Config;
use vhotplug_udev::{enumerate_evdev_devices, enumerate_pci_devices, enumerate_usb_devices, UdevEventKind, UdevMonitor};
use vhotplug_watcher::{FileWatcher, WatchEventKind};

use crate::cli::Cli;
use crate::error::DaemonError;
use crate::events::device_info_from_udev;

const EXIT_CODE_ERROR: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    vhotplug_logger::init(cli.debug);

    if let Err(e) = run(cli).await {
        error!(error = %e, "fatal error during startup");
        std::process::exit(EXIT_CODE_ERROR);
    }
}

async fn run(cli: Cli) -> Result<(), DaemonError> {
    let config = Config::load(&cli.config)?;

    let mut bootstrap = bootstrap::build(&config);

    if cli.attach_connected {
        attach_connected(&mut bootstrap.orchestrator).await;
    }

    let api_handle = bootstrap.handle.clone();
    let api_config = config.general.api.clone();
    tokio::spawn(async move {
        if let Err(e) = vhotplug_api::run(&api_config, api_handle).await {
            error!(error = %e, "api server stopped");
        }
    });

    let mut watcher = FileWatcher::new()?;
    for vm in &config.vms {
        watcher.add_file(std::path::Path::new(&vm.socket))?;
    }

    let mut udev_monitor = UdevMonitor::new()?;
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    info!("waiting for new devices");
    loop {
        tokio::select! {
            command = bootstrap.commands.recv() => {
                match command {
                    Some(command) => bootstrap.orchestrator.handle_command(command).await,
                    None => {
                        warn!("all api handler tasks exited, command channel closed");
                    }
                }
            }
            event = udev_monitor.next_event() => {
                match event {
                    Ok(Some(event)) => handle_udev_event(&mut bootstrap.orchestrator, &event).await,
                    Ok(None) => continue,
                    Err(e) => error!(error = %e, "udev monitor error"),
                }
            }
            watch_event = watcher.next_event() => {
                match watch_event {
                    Some(event) if event.kind == WatchEventKind::Created => {
                        if let Some(vm_name) = vm_name_for_socket(&config, &event.path) {
                            info!(vm = vm_name, "control socket appeared, reconciling");
                            bootstrap.orchestrator.reconcile_vm_restart(vm_name).await;
                        }
                    }
                    Some(_) => {}
                    None => warn!("file watcher channel closed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, exiting");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, exiting");
                break;
            }
        }
    }

    Ok(())
}

fn vm_name_for_socket<'a>(config: &'a Config, path: &std::path::Path) -> Option<&'a str> {
    config.vms.iter().find(|vm| std::path::Path::new(&vm.socket) == path).map(|vm| vm.name.as_str())
}

async fn handle_udev_event(orchestrator: &mut vhotplug_orchestrator::Orchestrator, event: &vhotplug_udev::UdevEvent) {
    vhotplug_udev::log_device(&event.device);
    match event.kind {
        UdevEventKind::Add => {
            if let Some(dev) = device_info_from_udev(&event.device) {
                info!(device = %dev.friendly_name(), "device connected");
                orchestrator.on_device_added(dev).await;
            }
        }
        UdevEventKind::Remove => {
            if let Some(dev) = device_info_from_udev(&event.device) {
                info!(device = %dev.friendly_name(), "device disconnected");
                orchestrator.on_device_removed(&dev.runtime_id()).await;
            }
        }
        UdevEventKind::Change => {
            if event.device.subsystem().and_then(|s| s.to_str()) == Some("power_supply") {
                orchestrator.on_power_supply_change();
            }
        }
        UdevEventKind::Other => {}
    }
}

async fn attach_connected(orchestrator: &mut vhotplug_orchestrator::Orchestrator) {
    let mut devices = Vec::new();
    match enumerate_evdev_devices() {
        Ok(evdev) => devices.extend(evdev.into_iter().map(vhotplug_device::DeviceInfo::Evdev)),
        Err(e) => warn!(error = %e, "failed to enumerate evdev devices"),
    }
    match enumerate_usb_devices() {
        Ok(usb) => devices.extend(usb.into_iter().map(vhotplug_device::DeviceInfo::Usb)),
        Err(e) => warn!(error = %e, "failed to enumerate USB devices"),
    }
    match enumerate_pci_devices() {
        Ok(pci) => devices.extend(pci.into_iter().map(vhotplug_device::DeviceInfo::Pci)),
        Err(e) => warn!(error = %e, "failed to enumerate PCI devices"),
    }
    orchestrator.reconcile_startup(devices).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_requires_config_path() {
        let result = Cli::try_parse_from(["vhotplugd"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_all_flags() {
        let cli = Cli::try_parse_from(["vhotplugd", "-c", "/etc/vhotplug.json", "-a", "-d"]).unwrap();
        assert_eq!(cli.config, std::path::PathBuf::from("/etc/vhotplug.json"));
        assert!(cli.attach_connected);
        assert!(cli.debug);
    }
}
