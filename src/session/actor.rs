//! Control actor serializing user actions against the config file
//!
//! Knob movements arrive in bursts. The actor keeps the latest gains in
//! memory and writes them once the burst has been quiet for the debounce
//! window (last write wins), so a burst costs one file write and one reload.
//! Device switches and explicit reloads are handled in order with the gain
//! writes; pending gains are flushed first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{EqSession, SwitchOutcome, SyncOutcome};
use crate::gain::Gains;
use crate::reload::ReloadError;

/// Quiet time after the last gain change before it is written
pub const DEFAULT_DEBOUNCE_MS: u64 = 400;

/// Commands sent to the control actor
#[derive(Debug)]
pub enum ControlCommand {
    /// Change one band (debounced)
    SetGain { filter: String, gain: f64 },
    /// Replace all three bands (debounced)
    SetGains(Gains),
    /// Switch output device, after flushing pending gains
    SelectDevice {
        device: String,
        reply: oneshot::Sender<Result<SwitchOutcome>>,
    },
    /// Reload CamillaDSP without writing
    Reload(oneshot::Sender<Result<String, ReloadError>>),
    /// Write pending gains now
    Flush(oneshot::Sender<Result<Option<SyncOutcome>>>),
    /// Flush and stop
    Shutdown,
}

/// Actor owning the debounced gain state
pub struct ControlActor {
    /// Load-modify-store units run on behalf of commands
    session: Arc<EqSession>,
    /// Command receiver channel
    command_rx: mpsc::Receiver<ControlCommand>,
    /// Gains as last shown to the user
    gains: Gains,
    /// Set while `gains` has not been written yet
    dirty: bool,
    /// Time of the last gain command
    last_change: Instant,
    /// Quiet time before a write, 0 writes immediately
    debounce_ms: u64,
    /// Number of gain writes performed
    write_count: u64,
}

/// Cheap to clone; shared by every input source
#[derive(Clone)]
pub struct ControlHandle {
    /// Command sender channel
    cmd_tx: mpsc::Sender<ControlCommand>,
}

impl ControlActor {
    /// Spawn the actor. Initial gains are read from the config file, or
    /// the shipped defaults when it cannot be read.
    pub async fn spawn(session: Arc<EqSession>, debounce_ms: u64) -> (ControlHandle, JoinHandle<()>) {
        let gains = match session.load_gains().await {
            Ok(gains) => gains,
            Err(e) => {
                warn!("Could not read initial gains: {:#}", e);
                Gains::default()
            }
        };

        let (cmd_tx, command_rx) = mpsc::channel(100);
        let actor = ControlActor {
            session,
            command_rx,
            gains,
            dirty: false,
            last_change: Instant::now(),
            debounce_ms,
            write_count: 0,
        };

        let task = tokio::spawn(actor.run());
        (ControlHandle { cmd_tx }, task)
    }

    async fn run(mut self) {
        info!("Control actor started (debounce: {}ms)", self.debounce_ms);

        let debounce = Duration::from_millis(self.debounce_ms.max(1));
        let mut ticker = tokio::time::interval(debounce);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("All control handles dropped");
                        self.flush().await;
                        break;
                    };
                    match cmd {
                        ControlCommand::SetGain { filter, gain } => {
                            if self.gains.set(&filter, gain) {
                                self.mark_dirty().await;
                            } else {
                                warn!("Ignoring gain for unknown filter '{}'", filter);
                            }
                        }
                        ControlCommand::SetGains(gains) => {
                            self.gains = gains;
                            self.mark_dirty().await;
                        }
                        ControlCommand::SelectDevice { device, reply } => {
                            self.flush().await;
                            let outcome = self.session.select_device(&device).await;
                            if let Ok(outcome) = &outcome {
                                self.gains = outcome.gains;
                            }
                            let _ = reply.send(outcome);
                        }
                        ControlCommand::Reload(reply) => {
                            let _ = reply.send(self.session.request_reload().await);
                        }
                        ControlCommand::Flush(reply) => {
                            trace!("Received flush command");
                            let _ = reply.send(self.write_pending().await);
                        }
                        ControlCommand::Shutdown => {
                            info!("Control actor shutting down, flushing pending gains");
                            self.flush().await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.dirty && self.last_change.elapsed() >= debounce {
                        trace!("Debounce window expired, writing gains");
                        self.flush().await;
                    }
                }
            }
        }

        info!("Control actor stopped (total writes: {})", self.write_count);
    }

    async fn mark_dirty(&mut self) {
        self.dirty = true;
        self.last_change = Instant::now();
        if self.debounce_ms == 0 {
            self.flush().await;
        }
    }

    /// Write pending gains, logging failures
    async fn flush(&mut self) {
        if let Err(e) = self.write_pending().await {
            error!("Failed to write gains: {:#}", e);
        }
    }

    async fn write_pending(&mut self) -> Result<Option<SyncOutcome>> {
        if !self.dirty {
            return Ok(None);
        }
        // A failed write is not retried; the next change brings fresh gains
        self.dirty = false;

        let outcome = self.session.apply_gains(&self.gains).await?;
        self.write_count += 1;
        self.gains = outcome.gains;
        Ok(Some(outcome))
    }
}

impl ControlHandle {
    pub async fn set_gain(&self, filter: impl Into<String>, gain: f64) -> Result<()> {
        self.cmd_tx
            .send(ControlCommand::SetGain {
                filter: filter.into(),
                gain,
            })
            .await
            .context("Failed to send gain: control actor shut down")
    }

    pub async fn set_gains(&self, gains: Gains) -> Result<()> {
        self.cmd_tx
            .send(ControlCommand::SetGains(gains))
            .await
            .context("Failed to send gains: control actor shut down")
    }

    pub async fn select_device(&self, device: impl Into<String>) -> Result<SwitchOutcome> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ControlCommand::SelectDevice {
                device: device.into(),
                reply,
            })
            .await
            .context("Failed to send device switch: control actor shut down")?;

        rx.await.context("Failed to receive device switch result")?
    }

    pub async fn reload(&self) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ControlCommand::Reload(reply))
            .await
            .context("Failed to send reload: control actor shut down")?;

        Ok(rx.await.context("Failed to receive reload result")??)
    }

    /// Write pending gains now. `None` when nothing was pending.
    pub async fn flush(&self) -> Result<Option<SyncOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ControlCommand::Flush(reply))
            .await
            .context("Failed to send flush: control actor shut down")?;

        rx.await.context("Failed to receive flush result")?
    }

    /// Fire-and-forget; pending gains are written before the actor stops
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.try_send(ControlCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixture::Fixture;
    use super::*;
    use crate::gain::read_gain;

    #[tokio::test]
    async fn test_burst_is_written_once() {
        let fx = Fixture::new();
        let (handle, _task) = ControlActor::spawn(fx.session.clone(), DEFAULT_DEBOUNCE_MS).await;

        for gain in [1.0, 2.0, 3.5, 4.0, 4.5] {
            handle.set_gain("Bass", gain).await.unwrap();
        }
        let outcome = handle.flush().await.unwrap().expect("gains were pending");

        assert_eq!(outcome.gains.bass, 4.5);
        assert_eq!(fx.reloader.calls(), 1);
        assert_eq!(read_gain(&fx.file().await, "Bass"), Some(4.5));

        // Nothing left to write
        assert!(handle.flush().await.unwrap().is_none());
        assert_eq!(fx.reloader.calls(), 1);
    }

    #[tokio::test]
    async fn test_quiet_period_triggers_write() {
        let fx = Fixture::new();
        let (handle, _task) = ControlActor::spawn(fx.session.clone(), 20).await;

        handle.set_gain("Treble", -2.0).await.unwrap();
        handle.set_gain("Treble", -3.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fx.reloader.calls(), 1);
        assert_eq!(read_gain(&fx.file().await, "Treble"), Some(-3.0));
    }

    #[tokio::test]
    async fn test_unknown_filter_is_ignored() {
        let fx = Fixture::new();
        let (handle, _task) = ControlActor::spawn(fx.session.clone(), DEFAULT_DEBOUNCE_MS).await;

        handle.set_gain("Presence", 6.0).await.unwrap();
        assert!(handle.flush().await.unwrap().is_none());
        assert_eq!(fx.reloader.calls(), 0);
    }

    #[tokio::test]
    async fn test_device_switch_flushes_pending_gains_first() {
        let fx = Fixture::new();
        fx.session.settings().write().playback_device = "A".to_string();
        let (handle, _task) = ControlActor::spawn(fx.session.clone(), DEFAULT_DEBOUNCE_MS).await;

        handle.set_gain("Bass", 7.0).await.unwrap();
        let to_b = handle.select_device("B").await.unwrap();
        assert_eq!(to_b.gains.bass, 3.0);

        let to_a = handle.select_device("A").await.unwrap();
        assert!(to_a.restored);
        assert_eq!(to_a.gains.bass, 7.0);
        // One flush and two switches
        assert_eq!(fx.reloader.calls(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let fx = Fixture::new();
        let (handle, task) = ControlActor::spawn(fx.session.clone(), DEFAULT_DEBOUNCE_MS).await;

        handle.set_gain("Middle", 1.5).await.unwrap();
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(read_gain(&fx.file().await, "Middle"), Some(1.5));
        assert!(handle.set_gain("Middle", 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_reload_passthrough() {
        let fx = Fixture::new();
        let (handle, _task) = ControlActor::spawn(fx.session.clone(), DEFAULT_DEBOUNCE_MS).await;

        assert!(handle.reload().await.unwrap().contains("Ok"));
        assert_eq!(fx.reloader.calls(), 1);
    }

    #[tokio::test]
    async fn test_set_gains_replaces_all_bands() {
        let fx = Fixture::new();
        let (handle, _task) = ControlActor::spawn(fx.session.clone(), DEFAULT_DEBOUNCE_MS).await;

        handle.set_gain("Bass", 8.0).await.unwrap();
        handle.set_gains(Gains::default()).await.unwrap();
        let outcome = handle.flush().await.unwrap().expect("gains were pending");

        assert_eq!(outcome.gains, Gains::default());
        assert_eq!(read_gain(&fx.file().await, "Bass"), Some(3.0));
        assert_eq!(fx.reloader.calls(), 1);
    }
}
