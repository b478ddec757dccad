//! ubertooth-host
//!
//! Userspace host for the Ubertooth USB driver core. Watches the bus for
//! devices in the driver's id table, binds a session to each supported
//! interface and tears it down on unplug.

mod config;
mod usb;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{UsbBridge, UsbCommand, UsbEvent, create_usb_bridge, setup_logging};
use driver::DRIVER_NAME;
use tokio::signal;
use tracing::{error, info, warn};
use usb::{WorkerSettings, spawn_usb_worker};

#[derive(Parser, Debug)]
#[command(name = "ubertooth-host")]
#[command(author, version, about = "Host driver for the Ubertooth One USB sniffer")]
#[command(long_about = "
Binds the Ubertooth driver core to libusb. Matching devices are classified on
arrival; supported ones get a session with bulk transfer buffers that lives
until the device is unplugged.

EXAMPLES:
    # Run until Ctrl+C
    ubertooth-host

    # List matching devices and exit
    ubertooth-host --list-devices

    # Bus-reset the device at bus 1, address 5
    ubertooth-host --reset 1:5

CONFIGURATION:
    The host looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/ubertooth-host/host.toml
    3. /etc/ubertooth-host/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List matching USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Bus-reset the device at BUS:ADDRESS and exit
    #[arg(long, value_name = "BUS:ADDRESS", value_parser = parse_bus_address)]
    reset: Option<(u8, u8)>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = config::HostConfig::default();
        let path = config::HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        config::HostConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.host.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("{} Driver for Ubertooth One", DRIVER_NAME);
    info!("ubertooth-host v{}", env!("CARGO_PKG_VERSION"));

    let settings = WorkerSettings {
        options: config.driver.manager_options(),
        detach_kernel_driver: config.driver.detach_kernel_driver,
        poll_interval: config.usb.poll_interval(),
    };

    let (usb_bridge, worker) = create_usb_bridge();
    let usb_worker_handle =
        spawn_usb_worker(worker, settings).context("Failed to spawn USB worker thread")?;

    let result = if args.list_devices {
        list_devices_mode(usb_bridge.clone()).await
    } else if let Some((bus, address)) = args.reset {
        reset_mode(usb_bridge.clone(), bus, address).await
    } else {
        run_service(usb_bridge.clone()).await
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = usb_bridge.send_command(UsbCommand::Shutdown).await {
        error!("Error shutting down USB worker: {:#}", e);
    }

    match usb_worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker failed: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    info!("{} Driver for Ubertooth One [EXIT]", DRIVER_NAME);
    result
}

/// List matching devices and exit
async fn list_devices_mode(usb_bridge: UsbBridge) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    usb_bridge
        .send_command(UsbCommand::ListDevices { response: tx })
        .await
        .context("Failed to send ListDevices command")?;

    let devices = rx
        .await
        .context("Failed to receive device list")?
        .context("Failed to enumerate devices")?;

    if devices.is_empty() {
        println!("No matching USB devices found.");
        return Ok(());
    }

    println!("Found {} matching device(s):\n", devices.len());
    for device in devices {
        println!(
            "  Bus {:03} Device {:03}: {} [{:?}]",
            device.bus, device.address, device.identity, device.classification
        );
        if device.bound_interfaces > 0 {
            println!("      {} interface(s) bound", device.bound_interfaces);
        }
    }

    Ok(())
}

/// Reset one device and exit
async fn reset_mode(usb_bridge: UsbBridge, bus: u8, address: u8) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    usb_bridge
        .send_command(UsbCommand::ResetDevice {
            bus,
            address,
            response: tx,
        })
        .await
        .context("Failed to send ResetDevice command")?;

    let outcomes = rx
        .await
        .context("Failed to receive reset result")?
        .context("Reset failed")?;

    for (key, outcome) in outcomes {
        println!("  {}: {:?}", key, outcome);
    }
    Ok(())
}

/// Run until Ctrl+C, logging lifecycle events
async fn run_service(usb_bridge: UsbBridge) -> Result<()> {
    let events = usb_bridge.clone();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv_event().await {
            match event {
                UsbEvent::SessionAttached { key, identity } => {
                    info!("Session bound on {} ({})", key, identity);
                }
                UsbEvent::AttachFailed {
                    key,
                    identity,
                    status,
                    message,
                } => {
                    warn!("{} ({}) not attached: {} [{}]", key, identity, message, status);
                }
                UsbEvent::SessionDetached { key } => {
                    info!("Session on {} released", key);
                }
            }
        }
    });

    info!("Press Ctrl+C to shutdown");
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    let (tx, rx) = tokio::sync::oneshot::channel();
    if usb_bridge
        .send_command(UsbCommand::ListSessions { response: tx })
        .await
        .is_ok()
        && let Ok(sessions) = rx.await
    {
        info!("{} session(s) bound at shutdown", sessions.len());
    }

    event_task.abort();
    Ok(())
}

/// Parse "BUS:ADDRESS", both decimal as printed by lsusb
fn parse_bus_address(s: &str) -> Result<(u8, u8)> {
    let (bus, address) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected BUS:ADDRESS, got '{}'", s))?;

    let bus = bus
        .parse::<u8>()
        .with_context(|| format!("invalid bus '{}'", bus))?;
    let address = address
        .parse::<u8>()
        .with_context(|| format!("invalid address '{}'", address))?;
    Ok((bus, address))
}
