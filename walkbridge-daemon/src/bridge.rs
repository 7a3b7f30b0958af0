//! Bridge controller: poll the request file, relay one packet per change, write the reply.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use walkbridge_core::{Action, Channels, Packet, RelayCore, Target};

use crate::config::{Config, ConfigError};
use crate::slots;
use crate::transport::{self, Radio, Timing, TransportError};

/// How a processed request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Request decoded to nothing; empty response, no transport.
    Empty,
    /// No device configured; request echoed back.
    Echo,
    /// Reply came from the peripheral.
    Radio,
    /// Transaction failed; empty response.
    RadioFailed,
}

/// Result of one processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub mode: Mode,
    pub request_len: usize,
    pub reply_len: usize,
}

/// Radio side of the bridge, present when a device address or name is configured.
struct Uplink {
    radio: Option<Arc<dyn Radio>>,
    target: Target,
    channels: Channels,
    timing: Timing,
}

impl Uplink {
    async fn transact(&self, packet: &Packet) -> Result<Packet, TransportError> {
        let radio = self.radio.as_deref().ok_or_else(|| {
            TransportError::TransportUnavailable("Bluetooth adapter not initialised".into())
        })?;
        transport::transact(radio, &self.target, &self.channels, packet.as_bytes(), self.timing)
            .await
    }
}

pub struct Bridge {
    core: RelayCore,
    request_path: PathBuf,
    response_path: PathBuf,
    uplink: Option<Uplink>,
    poll_interval: Duration,
    fault_backoff: Duration,
}

impl Bridge {
    /// `radio` is `None` when the Bluetooth stack could not be opened; transactions then fail
    /// with `TransportUnavailable` instead of stopping the bridge.
    pub fn new(cfg: &Config, radio: Option<Arc<dyn Radio>>) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let uplink = cfg.channels()?.map(|channels| Uplink {
            radio,
            target: cfg.target(),
            channels,
            timing: Timing {
                timeout: cfg.timeout(),
                scan_window: cfg.scan_window(),
            },
        });
        Ok(Self {
            core: RelayCore::new(cfg.relay_options()),
            request_path: cfg.request_path.clone(),
            response_path: cfg.response_path.clone(),
            uplink,
            poll_interval: cfg.poll_interval(),
            fault_backoff: cfg.fault_backoff(),
        })
    }

    /// Poll, then sleep; back off after a failed cycle. Returns once `shutdown` turns true
    /// (or its sender is dropped). Shutdown is seen between cycles, never mid-transaction.
    pub async fn run_forever(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            request = %self.request_path.display(),
            response = %self.response_path.display(),
            ble = self.uplink.is_some(),
            "bridge started"
        );
        while !*shutdown.borrow() {
            let cycle = AssertUnwindSafe(self.tick())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("panic during bridge cycle")));
            let pause = match cycle {
                Ok(Some(o)) => {
                    debug!(mode = ?o.mode, request_len = o.request_len, reply_len = o.reply_len, "request processed");
                    self.poll_interval
                }
                Ok(None) => self.poll_interval,
                Err(e) => {
                    error!(error = ?e, "bridge loop error");
                    self.fault_backoff
                }
            };
            let stop = tokio::select! {
                _ = tokio::time::sleep(pause) => false,
                changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            };
            if stop {
                break;
            }
        }
        info!("bridge stopped");
    }

    /// One poll. `Ok(None)` when the request file has not changed.
    pub async fn tick(&mut self) -> anyhow::Result<Option<Outcome>> {
        let modified = slots::modified(&self.request_path)
            .with_context(|| format!("stat {}", self.request_path.display()))?;
        if !self.core.on_poll(modified) {
            return Ok(None);
        }
        let text = slots::read_request(&self.request_path)
            .with_context(|| format!("read {}", self.request_path.display()))?;
        info!("detected new request file");

        let (request_len, reply, mode) = match self.core.on_request_text(&text) {
            Action::RespondEmpty => {
                warn!("parsed empty packet");
                (0, Packet::empty(), Mode::Empty)
            }
            Action::Forward(packet) => {
                info!(len = packet.len(), hex = %packet.to_hex(), "packet to send");
                let (reply, mode) = self.forward(&packet).await;
                (packet.len(), reply, mode)
            }
        };

        let out = self.core.on_reply(reply);
        slots::write_response(&self.response_path, out.as_bytes())
            .with_context(|| format!("write {}", self.response_path.display()))?;
        info!(len = out.len(), path = %self.response_path.display(), "wrote response");
        Ok(Some(Outcome {
            mode,
            request_len,
            reply_len: out.len(),
        }))
    }

    async fn forward(&self, packet: &Packet) -> (Packet, Mode) {
        let Some(uplink) = &self.uplink else {
            debug!("no BLE configured; echoing back packet");
            return (packet.clone(), Mode::Echo);
        };
        match uplink.transact(packet).await {
            Ok(reply) => {
                info!(len = reply.len(), hex = %reply.to_hex(), "received response from BLE device");
                (reply, Mode::Radio)
            }
            Err(e) => {
                warn!(error = %e, "BLE transaction failed");
                (Packet::empty(), Mode::RadioFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::{Reply, StubRadio};
    use std::path::Path;
    use std::time::{Instant, SystemTime};
    use walkbridge_core::encode_hex;

    const WRITE: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";
    const NOTIFY: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

    fn config(dir: &Path) -> Config {
        Config {
            request_path: dir.join("req.bin"),
            response_path: dir.join("resp.bin"),
            poll_interval_secs: 0.01,
            timeout_secs: 0.1,
            scan_secs: 0.01,
            fault_backoff_secs: 0.03,
            ..Config::default()
        }
    }

    fn with_device(cfg: Config) -> Config {
        Config {
            device_address: Some("AA:BB:CC:DD:EE:FF".into()),
            write_uuid: Some(WRITE.into()),
            notify_uuid: Some(NOTIFY.into()),
            ..cfg
        }
    }

    fn write_request(path: &Path, text: &str, mtime: SystemTime) {
        std::fs::write(path, text).unwrap();
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    /// Timestamps ahead of the wall clock, so a tick racing the write never sees a newer mtime.
    fn at(secs: u64) -> SystemTime {
        SystemTime::now() + Duration::from_secs(3_600 + secs)
    }

    #[tokio::test]
    async fn no_request_file_no_work() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut bridge = Bridge::new(&cfg, None).unwrap();
        assert_eq!(bridge.tick().await.unwrap(), None);
        assert!(!cfg.response_path.exists());
    }

    #[tokio::test]
    async fn echo_with_symmetric_whitening_reproduces_request() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            whiten: true,
            unwhiten: true,
            ..config(dir.path())
        };
        let p = vec![0x00, 0x11, 0xaa, 0xff, 0x42];
        write_request(&cfg.request_path, &encode_hex(&p), at(1));
        let mut bridge = Bridge::new(&cfg, None).unwrap();
        let outcome = bridge.tick().await.unwrap().unwrap();
        assert_eq!(outcome.mode, Mode::Echo);
        assert_eq!(std::fs::read(&cfg.response_path).unwrap(), p);
    }

    #[tokio::test]
    async fn echo_decimal_request_written_raw() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        write_request(&cfg.request_path, "10,27,44,300", at(1));
        let mut bridge = Bridge::new(&cfg, None).unwrap();
        bridge.tick().await.unwrap();
        assert_eq!(std::fs::read(&cfg.response_path).unwrap(), vec![10, 27, 44, 44]);
    }

    #[tokio::test]
    async fn garbage_request_writes_empty_without_transport() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = with_device(config(dir.path()));
        std::fs::write(&cfg.response_path, b"stale").unwrap();
        write_request(&cfg.request_path, "!!!", at(1));
        let radio = StubRadio::default();
        let mut bridge = Bridge::new(&cfg, Some(Arc::new(radio.clone()))).unwrap();
        let outcome = bridge.tick().await.unwrap().unwrap();
        assert_eq!(outcome.mode, Mode::Empty);
        assert_eq!(outcome.reply_len, 0);
        assert!(std::fs::read(&cfg.response_path).unwrap().is_empty());
        assert!(radio.events().is_empty());
    }

    #[tokio::test]
    async fn radio_reply_is_whitened_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            whiten: true,
            unwhiten: true,
            ..with_device(config(dir.path()))
        };
        let radio = StubRadio::default();
        radio.push_reply(Reply::Notify(vec![0x01, 0x02]));
        write_request(&cfg.request_path, "aa ab", at(1));
        let mut bridge = Bridge::new(&cfg, Some(Arc::new(radio.clone()))).unwrap();
        let outcome = bridge.tick().await.unwrap().unwrap();
        assert_eq!(outcome.mode, Mode::Radio);
        assert_eq!(radio.writes(), vec![vec![0x00, 0x01]]);
        assert_eq!(std::fs::read(&cfg.response_path).unwrap(), vec![0xab, 0xa8]);
    }

    #[tokio::test]
    async fn timeout_writes_empty_response() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = with_device(config(dir.path()));
        std::fs::write(&cfg.response_path, b"stale").unwrap();
        let radio = StubRadio::default();
        radio.push_reply(Reply::Silent);
        write_request(&cfg.request_path, "0102", at(1));
        let mut bridge = Bridge::new(&cfg, Some(Arc::new(radio))).unwrap();
        let started = Instant::now();
        let outcome = bridge.tick().await.unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(outcome.mode, Mode::RadioFailed);
        assert!(std::fs::read(&cfg.response_path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unacknowledged_write_writes_empty_response() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = with_device(config(dir.path()));
        std::fs::write(&cfg.response_path, b"stale").unwrap();
        let radio = StubRadio::default();
        radio.push_reply(Reply::HangingWrite);
        write_request(&cfg.request_path, "0102", at(1));
        let mut bridge = Bridge::new(&cfg, Some(Arc::new(radio))).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), bridge.tick())
            .await
            .expect("cycle must finish within the transaction timeout")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.mode, Mode::RadioFailed);
        assert!(std::fs::read(&cfg.response_path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_radio_degrades_to_empty_response() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = with_device(config(dir.path()));
        write_request(&cfg.request_path, "0102", at(1));
        let mut bridge = Bridge::new(&cfg, None).unwrap();
        let outcome = bridge.tick().await.unwrap().unwrap();
        assert_eq!(outcome.mode, Mode::RadioFailed);
        assert!(std::fs::read(&cfg.response_path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_between_ticks_are_coalesced() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = with_device(config(dir.path()));
        let radio = StubRadio::default();
        radio.push_reply(Reply::Notify(vec![0x99]));
        radio.push_reply(Reply::Notify(vec![0x98]));
        let mut bridge = Bridge::new(&cfg, Some(Arc::new(radio.clone()))).unwrap();

        write_request(&cfg.request_path, "01", at(1));
        write_request(&cfg.request_path, "02", at(2));
        assert!(bridge.tick().await.unwrap().is_some());
        assert_eq!(bridge.tick().await.unwrap(), None);
        assert_eq!(radio.writes(), vec![vec![0x02]]);
        assert_eq!(std::fs::read(&cfg.response_path).unwrap(), vec![0x99]);

        // same content, newer timestamp: processed again
        write_request(&cfg.request_path, "02", at(3));
        assert!(bridge.tick().await.unwrap().is_some());
        assert_eq!(radio.writes(), vec![vec![0x02], vec![0x02]]);
    }

    #[tokio::test]
    async fn bad_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            notify_uuid: None,
            ..with_device(config(dir.path()))
        };
        assert!(Bridge::new(&cfg, None).is_err());
    }

    async fn wait_for_file(path: &Path, deadline: Duration) -> Option<Vec<u8>> {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if let Ok(bytes) = std::fs::read(path) {
                return Some(bytes);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn fault_does_not_stop_later_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        let cfg = Config {
            response_path: out_dir.join("resp.bin"),
            ..config(dir.path())
        };
        let (tx, rx) = watch::channel(false);
        let bridge = Bridge::new(&cfg, None).unwrap();
        let handle = tokio::spawn(bridge.run_forever(rx));

        // response directory is missing: this cycle faults
        write_request(&cfg.request_path, "0a0b", at(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!cfg.response_path.exists());
        assert!(!handle.is_finished());

        std::fs::create_dir(&out_dir).unwrap();
        write_request(&cfg.request_path, "0c0d", at(2));
        let written = wait_for_file(&cfg.response_path, Duration::from_secs(2)).await;
        assert_eq!(written, Some(vec![0x0c, 0x0d]));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_loop_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            poll_interval_secs: 5.0,
            fault_backoff_secs: 10.0,
            ..config(dir.path())
        };
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Bridge::new(&cfg, None).unwrap().run_forever(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
