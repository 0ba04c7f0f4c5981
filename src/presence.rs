//! Output device presence watcher
//!
//! Polls the list of output devices and tracks whether the selected device
//! is there. When it comes back after being gone, CamillaDSP is asked to
//! reload so playback resumes on the device. Each disconnect episode yields
//! exactly one `Disconnected` and, on recovery, one `Reconnected` event.

mod source;

pub use source::{
    filter_loopback, CommandDeviceSource, DeviceSource, DeviceSourceError, StaticDeviceSource,
    DEVICE_QUERY_TIMEOUT, LOOPBACK_PREFIX,
};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::reload::Reloader;
use crate::settings::SharedSettings;

/// Default time between two device polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Whether the selected device is currently treated as connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

/// Edge of the presence state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Lost,
    Recovered,
}

impl Presence {
    /// Next state given whether the device was seen in this poll
    pub fn next(self, seen: bool) -> (Presence, Option<Transition>) {
        match (self, seen) {
            (Presence::Present, false) => (Presence::Absent, Some(Transition::Lost)),
            (Presence::Absent, true) => (Presence::Present, Some(Transition::Recovered)),
            (state, _) => (state, None),
        }
    }
}

/// User-visible notification from the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Disconnected { device: String },
    Reconnected { device: String, reloaded: bool },
}

/// Callback receiving watcher notifications
pub type PresenceCallback = Arc<dyn Fn(PresenceEvent) + Send + Sync>;

/// Polling loop tracking the selected output device
pub struct PresenceWatcher {
    /// Read on every poll for the target device and control port
    settings: SharedSettings,
    /// Blocking device enumeration, run on the blocking pool
    source: Arc<dyn DeviceSource>,
    /// Used once per recovery
    reloader: Arc<dyn Reloader>,
    notify: PresenceCallback,
    /// Time between polls
    interval: Duration,
    state: Presence,
}

impl PresenceWatcher {
    pub fn new(
        settings: SharedSettings,
        source: Arc<dyn DeviceSource>,
        reloader: Arc<dyn Reloader>,
        notify: PresenceCallback,
    ) -> Self {
        Self {
            settings,
            source,
            reloader,
            notify,
            interval: DEFAULT_POLL_INTERVAL,
            state: Presence::Present,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> Presence {
        self.state
    }

    /// Run one poll: query devices, advance the state machine, react.
    ///
    /// Never fails; a failed device query leaves the state unchanged.
    pub async fn poll_once(&mut self) {
        let (target, port) = {
            let settings = self.settings.read();
            (settings.playback_device.clone(), settings.port)
        };
        if target.is_empty() {
            trace!("No output device selected, skipping presence poll");
            return;
        }

        let source = Arc::clone(&self.source);
        let devices = match tokio::task::spawn_blocking(move || source.output_devices()).await {
            Ok(Ok(devices)) => filter_loopback(devices),
            Ok(Err(e)) => {
                warn!("Failed to list output devices: {}", e);
                return;
            }
            Err(e) => {
                error!("Device query task failed: {}", e);
                return;
            }
        };

        let seen = devices.iter().any(|d| *d == target);
        let (next, transition) = self.state.next(seen);
        self.state = next;

        match transition {
            Some(Transition::Lost) => {
                warn!("Output device '{}' disconnected", target);
                (self.notify)(PresenceEvent::Disconnected { device: target });
            }
            Some(Transition::Recovered) => {
                info!("Output device '{}' reconnected, reloading CamillaDSP", target);
                let reloaded = match self.reloader.reload(port).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("Reload after reconnect failed: {}", e);
                        false
                    }
                };
                (self.notify)(PresenceEvent::Reconnected {
                    device: target,
                    reloaded,
                });
            }
            None => trace!("Output device '{}' presence unchanged ({:?})", target, self.state),
        }
    }

    /// Poll until `stop` turns `true` (or its sender is dropped).
    ///
    /// The stop signal is also watched while a poll is in flight, so
    /// shutdown never waits for a slow device query.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("Presence watcher started (interval: {:?})", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let stopped = async move {
            let _ = stop.wait_for(|stop| *stop).await;
        };
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = &mut stopped => break,
                        _ = self.poll_once() => {}
                    }
                }
            }
        }

        debug!("Presence watcher stopped");
    }

    /// Spawn [`PresenceWatcher::run`] on the Tokio runtime
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::fake::CountingReloader;
    use crate::settings::Settings;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Device source replaying a fixed sequence of device lists
    struct ScriptedSource {
        polls: Mutex<VecDeque<Result<Vec<String>, DeviceSourceError>>>,
    }

    impl ScriptedSource {
        fn new(polls: Vec<Result<Vec<String>, DeviceSourceError>>) -> Arc<Self> {
            Arc::new(Self {
                polls: Mutex::new(polls.into()),
            })
        }
    }

    impl DeviceSource for ScriptedSource {
        fn output_devices(&self) -> Result<Vec<String>, DeviceSourceError> {
            self.polls.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn list(names: &[&str]) -> Result<Vec<String>, DeviceSourceError> {
        Ok(names.iter().map(|n| n.to_string()).collect())
    }

    fn settings_for(device: &str) -> SharedSettings {
        Settings {
            playback_device: device.to_string(),
            ..Settings::default()
        }
        .into_shared()
    }

    fn recorder() -> (PresenceCallback, Arc<Mutex<Vec<PresenceEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: PresenceCallback = Arc::new(move |event: PresenceEvent| sink.lock().push(event));
        (callback, events)
    }

    #[test]
    fn test_state_machine() {
        assert_eq!(Presence::Present.next(true), (Presence::Present, None));
        assert_eq!(Presence::Present.next(false), (Presence::Absent, Some(Transition::Lost)));
        assert_eq!(Presence::Absent.next(false), (Presence::Absent, None));
        assert_eq!(Presence::Absent.next(true), (Presence::Present, Some(Transition::Recovered)));
    }

    #[tokio::test]
    async fn test_one_notification_per_episode() {
        let source = ScriptedSource::new(vec![
            list(&["Speakers", "Headphones"]),
            list(&["Headphones"]),
            list(&["Headphones"]),
            list(&[]),
            list(&["Headphones", "Speakers"]),
        ]);
        let reloader = Arc::new(CountingReloader::default());
        let (callback, events) = recorder();

        let mut watcher = PresenceWatcher::new(
            settings_for("Speakers"),
            source,
            reloader.clone(),
            callback,
        );
        for _ in 0..5 {
            watcher.poll_once().await;
        }

        assert_eq!(
            *events.lock(),
            vec![
                PresenceEvent::Disconnected {
                    device: "Speakers".to_string()
                },
                PresenceEvent::Reconnected {
                    device: "Speakers".to_string(),
                    reloaded: true
                },
            ]
        );
        assert_eq!(reloader.calls(), 1);
        assert_eq!(watcher.state(), Presence::Present);
    }

    #[tokio::test]
    async fn test_failed_queries_do_not_change_state() {
        let source = ScriptedSource::new(vec![
            Err(DeviceSourceError::NotConfigured),
            list(&["Speakers"]),
        ]);
        let reloader = Arc::new(CountingReloader::default());
        let (callback, events) = recorder();

        let mut watcher =
            PresenceWatcher::new(settings_for("Speakers"), source, reloader.clone(), callback);
        watcher.poll_once().await;
        assert_eq!(watcher.state(), Presence::Present);
        watcher.poll_once().await;

        assert!(events.lock().is_empty());
        assert_eq!(reloader.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_reload_is_reported() {
        let source = ScriptedSource::new(vec![list(&[]), list(&["Speakers"])]);
        let reloader = Arc::new(CountingReloader::failing());
        let (callback, events) = recorder();

        let mut watcher =
            PresenceWatcher::new(settings_for("Speakers"), source, reloader.clone(), callback);
        watcher.poll_once().await;
        watcher.poll_once().await;

        assert_eq!(
            events.lock().last(),
            Some(&PresenceEvent::Reconnected {
                device: "Speakers".to_string(),
                reloaded: false
            })
        );
        assert_eq!(reloader.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_selection_skips_polls() {
        let source = ScriptedSource::new(vec![list(&[]), list(&[])]);
        let reloader = Arc::new(CountingReloader::default());
        let (callback, events) = recorder();

        let mut watcher = PresenceWatcher::new(settings_for(""), source, reloader, callback);
        watcher.poll_once().await;
        watcher.poll_once().await;

        assert!(events.lock().is_empty());
        assert_eq!(watcher.state(), Presence::Present);
    }

    #[tokio::test]
    async fn test_loopback_device_never_counts_as_present() {
        let source = ScriptedSource::new(vec![list(&["BlackHole 2ch"])]);
        let reloader = Arc::new(CountingReloader::default());
        let (callback, events) = recorder();

        let mut watcher =
            PresenceWatcher::new(settings_for("BlackHole 2ch"), source, reloader, callback);
        watcher.poll_once().await;

        assert_eq!(watcher.state(), Presence::Absent);
        assert_eq!(events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_target_is_read_from_shared_settings_each_poll() {
        let settings = settings_for("Speakers");
        let source = ScriptedSource::new(vec![list(&["Headphones"]), list(&["Headphones"])]);
        let reloader = Arc::new(CountingReloader::default());
        let (callback, events) = recorder();

        let mut watcher = PresenceWatcher::new(settings.clone(), source, reloader.clone(), callback);
        watcher.poll_once().await;
        assert_eq!(watcher.state(), Presence::Absent);

        settings.write().playback_device = "Headphones".to_string();
        watcher.poll_once().await;

        assert_eq!(watcher.state(), Presence::Present);
        assert_eq!(events.lock().len(), 2);
        assert_eq!(reloader.calls(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let source = Arc::new(StaticDeviceSource::new(vec!["Speakers".to_string()]));
        let reloader = Arc::new(CountingReloader::default());
        let (callback, _events) = recorder();

        let watcher = PresenceWatcher::new(settings_for("Speakers"), source, reloader, callback)
            .with_interval(Duration::from_millis(20));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = watcher.spawn(stop_rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let source = Arc::new(StaticDeviceSource::new(Vec::new()));
        let reloader = Arc::new(CountingReloader::default());
        let (callback, _events) = recorder();

        let watcher = PresenceWatcher::new(settings_for("Speakers"), source, reloader, callback)
            .with_interval(Duration::from_millis(20));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = watcher.spawn(stop_rx);
        drop(stop_tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_device_command_does_not_hold_runtime_shutdown() {
        let started = std::time::Instant::now();
        let runtime = tokio::runtime::Runtime::new().unwrap();

        runtime.block_on(async {
            let source = CommandDeviceSource::from_argv(&["sleep".to_string(), "30".to_string()])
                .unwrap()
                .with_timeout(Duration::from_millis(300));
            let reloader = Arc::new(CountingReloader::default());
            let (callback, events) = recorder();

            let watcher =
                PresenceWatcher::new(settings_for("Speakers"), Arc::new(source), reloader, callback)
                    .with_interval(Duration::from_millis(10));
            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = watcher.spawn(stop_rx);

            tokio::time::sleep(Duration::from_millis(100)).await;
            stop_tx.send(true).unwrap();
            handle.await.unwrap();
            assert!(events.lock().is_empty());
        });

        // Dropping the runtime waits for the in-flight blocking query
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
