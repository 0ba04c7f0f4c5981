//! Output device enumeration backends

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{trace, warn};

/// Loopback drivers carry this prefix and are never real outputs
pub const LOOPBACK_PREFIX: &str = "BlackHole";

/// Longest a device command may run before it is killed
pub const DEVICE_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// How often a running device command is checked for exit
const EXIT_POLL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum DeviceSourceError {
    #[error("Failed to run device command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Device command '{command}' exited with {status}")]
    Status { command: String, status: std::process::ExitStatus },

    #[error("Device command '{command}' did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to read output of device command '{command}': {source}")]
    Output {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No device command configured")]
    NotConfigured,
}

/// Blocking source of output device names.
///
/// Called from a blocking task, so implementations may shell out or talk to
/// the OS audio API directly.
pub trait DeviceSource: Send + Sync + 'static {
    fn output_devices(&self) -> Result<Vec<String>, DeviceSourceError>;
}

/// Drop loopback devices from a device list
pub fn filter_loopback(devices: Vec<String>) -> Vec<String> {
    devices
        .into_iter()
        .filter(|d| !d.starts_with(LOOPBACK_PREFIX))
        .collect()
}

/// Fixed device list
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceSource {
    devices: Vec<String>,
}

impl StaticDeviceSource {
    pub fn new(devices: Vec<String>) -> Self {
        Self { devices }
    }
}

impl DeviceSource for StaticDeviceSource {
    fn output_devices(&self) -> Result<Vec<String>, DeviceSourceError> {
        Ok(self.devices.clone())
    }
}

/// Runs an external command that prints one device name per line.
///
/// The command is killed when it runs longer than its timeout, so a hung
/// command never holds a blocking thread (and process exit) for long.
#[derive(Debug, Clone)]
pub struct CommandDeviceSource {
    /// Executable to run
    program: String,
    /// Arguments passed to `program`
    args: Vec<String>,
    /// Deadline for one run, [`DEVICE_QUERY_TIMEOUT`] by default
    timeout: Duration,
}

impl CommandDeviceSource {
    /// Build from a `[program, args...]` vector as stored in settings
    pub fn from_argv(argv: &[String]) -> Result<Self, DeviceSourceError> {
        let (program, args) = argv.split_first().ok_or(DeviceSourceError::NotConfigured)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: DEVICE_QUERY_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl DeviceSource for CommandDeviceSource {
    fn output_devices(&self) -> Result<Vec<String>, DeviceSourceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DeviceSourceError::Spawn {
                command: self.command_line(),
                source,
            })?;

        // Drain stdout on its own thread so a chatty command cannot block on
        // a full pipe while we wait for it to exit
        let reader = child.stdout.take().map(|mut stdout| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                stdout.read_to_end(&mut buf).map(|_| buf)
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    if let Err(e) = child.kill() {
                        warn!("Failed to kill device command: {}", e);
                    }
                    // Reap the killed child; the reader thread ends with it
                    let _ = child.wait();
                    return Err(DeviceSourceError::Timeout {
                        command: self.command_line(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => std::thread::sleep(EXIT_POLL),
                Err(source) => {
                    let _ = child.kill();
                    return Err(DeviceSourceError::Output {
                        command: self.command_line(),
                        source,
                    });
                }
            }
        };

        if !status.success() {
            return Err(DeviceSourceError::Status {
                command: self.command_line(),
                status,
            });
        }

        let stdout = match reader.map(|handle| handle.join()) {
            Some(Ok(Ok(buf))) => buf,
            Some(Ok(Err(source))) => {
                return Err(DeviceSourceError::Output {
                    command: self.command_line(),
                    source,
                })
            }
            Some(Err(_)) => {
                return Err(DeviceSourceError::Output {
                    command: self.command_line(),
                    source: std::io::Error::other("stdout reader panicked"),
                })
            }
            None => Vec::new(),
        };

        let devices = parse_device_lines(&String::from_utf8_lossy(&stdout));
        trace!("Device command listed {} outputs", devices.len());
        Ok(devices)
    }
}

/// One trimmed, non-empty name per line; duplicates keep their first position
fn parse_device_lines(text: &str) -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !devices.iter().any(|d| d == line) {
            devices.push(line.to_string());
        }
    }
    devices
}
