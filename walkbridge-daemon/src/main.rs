// Walker bridge: relays emulator request files to a BLE peripheral and writes the replies back.

mod ble;
mod bridge;
mod config;
mod discovery;
mod slots;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::config::Config;
use crate::transport::Radio;

/// File-polling bridge between an emulator script and a BLE peripheral.
#[derive(Parser, Debug)]
#[command(name = "walkbridge", version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, env = "WALKBRIDGE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// File the emulator script writes requests to
    #[arg(long, value_name = "PATH")]
    request_file: Option<PathBuf>,

    /// File this bridge writes responses to
    #[arg(long, value_name = "PATH")]
    response_file: Option<PathBuf>,

    /// Seconds between polls
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<f64>,

    /// BLE address of the device (scans when omitted)
    #[arg(long, value_name = "ADDR")]
    ble_address: Option<String>,

    /// BLE name to scan for (alternative to address)
    #[arg(long, value_name = "NAME")]
    ble_name: Option<String>,

    /// GATT characteristic UUID to write to
    #[arg(long, value_name = "UUID")]
    write_uuid: Option<String>,

    /// GATT characteristic UUID to subscribe to for replies
    #[arg(long, value_name = "UUID")]
    notify_uuid: Option<String>,

    /// Seconds to wait for the BLE reply
    #[arg(long, value_name = "SECS")]
    ble_timeout: Option<f64>,

    /// Seconds to scan when looking for the device
    #[arg(long, value_name = "SECS")]
    scan_window: Option<f64>,

    /// Whiten response bytes before writing the response file
    #[arg(long)]
    whiten: bool,

    /// Unwhiten request bytes read from the request file
    #[arg(long)]
    unwhiten: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(self, c: &mut Config) {
        if let Some(p) = self.request_file {
            c.request_path = p;
        }
        if let Some(p) = self.response_file {
            c.response_path = p;
        }
        if let Some(v) = self.poll_interval {
            c.poll_interval_secs = v;
        }
        if let Some(s) = self.ble_address {
            c.device_address = Some(s);
        }
        if let Some(s) = self.ble_name {
            c.device_name = Some(s);
        }
        if let Some(s) = self.write_uuid {
            c.write_uuid = Some(s);
        }
        if let Some(s) = self.notify_uuid {
            c.notify_uuid = Some(s);
        }
        if let Some(v) = self.ble_timeout {
            c.timeout_secs = v;
        }
        if let Some(v) = self.scan_window {
            c.scan_secs = v;
        }
        c.whiten |= self.whiten;
        c.unwhiten |= self.unwhiten;
        c.debug |= self.debug;
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    args.apply(&mut cfg);
    init_logging(cfg.debug);
    cfg.validate().context("invalid configuration")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let radio = open_radio(&cfg).await;
        let bridge = Bridge::new(&cfg, radio)?;
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let bridge_task = tokio::spawn(bridge.run_forever(shutdown_rx));
        shutdown_signal().await?;
        info!("interrupted");
        let _ = shutdown_tx.send(true);
        // An in-flight cycle finishes within its own timeouts; don't wait longer than that.
        let grace = cfg.timeout() * 4 + cfg.scan_window() + cfg.fault_backoff();
        match tokio::time::timeout(grace, bridge_task).await {
            Ok(joined) => joined?,
            Err(_) => warn!(?grace, "bridge did not stop in time; exiting"),
        }
        Ok::<_, anyhow::Error>(())
    })
}

/// Radio is only opened when a device is configured. Failure is logged; transactions then
/// report the adapter as unavailable and the bridge keeps answering with empty replies.
async fn open_radio(cfg: &Config) -> Option<Arc<dyn Radio>> {
    if !cfg.target().is_configured() {
        info!("no BLE device configured; echo mode");
        return None;
    }
    match ble::BleRadio::new(cfg.scan_window()).await {
        Ok(r) => Some(Arc::new(r)),
        Err(e) => {
            warn!(error = %e, "Bluetooth unavailable");
            None
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "walkbridge={level},walkbridge_core={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
