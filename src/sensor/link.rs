//! Byte transports between the sensor controller and the decoder.

use crate::defaults;
use crate::error::{Result, SweetspotError};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A byte source the ingestion context can (re)connect to.
///
/// `read` returning `Ok(0)` means "nothing arrived within the read timeout";
/// an `Err` means the link is broken and must be reconnected.
pub trait SensorLink: Send {
    fn connect(&mut self) -> Result<()>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn disconnect(&mut self);

    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// True once a finite source has delivered everything it has.
    fn is_exhausted(&self) -> bool {
        false
    }
}

fn transport(message: impl Into<String>) -> SweetspotError {
    SweetspotError::Transport {
        message: message.into(),
    }
}

/// Pick the serial device to open when none is configured.
///
/// Prefers a USB/ACM adapter, falling back to `/dev/ttyUSB0`.
pub fn discover_port() -> String {
    available_ports()
        .into_iter()
        .find(|name| name.contains("USB") || name.contains("ACM"))
        .unwrap_or_else(|| defaults::FALLBACK_SERIAL_PORT.to_string())
}

/// Names of the serial ports the OS reports.
#[cfg(feature = "serial")]
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            tracing::warn!(target: "sweetspot::sensor", "Port enumeration failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(not(feature = "serial"))]
pub fn available_ports() -> Vec<String> {
    Vec::new()
}

/// USB serial adapter carrying the controller's output.
#[cfg(feature = "serial")]
pub struct SerialLink {
    path: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "serial")]
impl SerialLink {
    pub fn new(path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            timeout,
            port: None,
        }
    }

    pub fn from_config(config: &crate::config::SensorConfig) -> Self {
        let path = config.port.clone().unwrap_or_else(discover_port);
        Self::new(
            path,
            config.baud_rate,
            Duration::from_millis(config.read_timeout_ms),
        )
    }
}

#[cfg(feature = "serial")]
impl SensorLink for SerialLink {
    fn connect(&mut self) -> Result<()> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| transport(format!("failed to open {}: {}", self.path, e)))?;

        // Stale bytes from before the reconnect would only produce a torn frame.
        if let Err(e) = port.clear(serialport::ClearBuffer::All) {
            tracing::debug!(target: "sweetspot::sensor", "Could not clear {}: {}", self.path, e);
        }

        self.port = Some(port);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| transport(format!("{} is not open", self.path)))?;

        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(transport(format!("read from {} failed: {}", self.path, e))),
        }
    }

    fn disconnect(&mut self) {
        self.port = None;
    }

    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.path, self.baud_rate)
    }
}

/// Replays a captured byte stream from a file.
///
/// Used by the `decode` command and for bench-testing the tracker without
/// hardware.
pub struct ReplayLink {
    path: PathBuf,
    chunk_size: usize,
    pace: Duration,
    reader: Option<BufReader<File>>,
    exhausted: bool,
}

impl ReplayLink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            chunk_size: 64,
            pace: Duration::ZERO,
            reader: None,
            exhausted: false,
        }
    }

    /// Bytes handed out per read.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep between reads, to approximate the controller's frame rate.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }
}

impl SensorLink for ReplayLink {
    fn connect(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .map_err(|e| transport(format!("failed to open {}: {}", self.path.display(), e)))?;
        self.reader = Some(BufReader::new(file));
        self.exhausted = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| transport(format!("{} is not open", self.path.display())))?;

        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }

        let limit = buf.len().min(self.chunk_size);
        let n = reader.read(&mut buf[..limit])?;
        if n == 0 {
            self.exhausted = true;
        }
        Ok(n)
    }

    fn disconnect(&mut self) {
        self.reader = None;
    }

    fn describe(&self) -> String {
        format!("replay {}", self.path.display())
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// One step of a [`ScriptedLink`].
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Bytes returned by the next read.
    Data(Vec<u8>),
    /// A read that times out.
    Idle,
    /// The link breaks.
    Fail(String),
    /// The read panics, simulating a bug in the ingestion path.
    Panic(String),
}

/// Scripted link for testing
#[derive(Debug, Clone, Default)]
pub struct ScriptedLink {
    steps: VecDeque<ScriptStep>,
    connect_failures: u32,
    connected: bool,
    connects: Arc<AtomicUsize>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for a later read.
    pub fn with_data(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.steps
            .push_back(ScriptStep::Data(bytes.as_ref().to_vec()));
        self
    }

    pub fn with_step(mut self, step: ScriptStep) -> Self {
        self.steps.push_back(step);
        self
    }

    /// Fail the first `count` connection attempts.
    pub fn with_connect_failures(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    /// Shared counter of successful connects.
    pub fn connect_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl SensorLink for ScriptedLink {
    fn connect(&mut self) -> Result<()> {
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(transport("scripted connect failure"));
        }
        self.connected = true;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.connected {
            return Err(transport("scripted link is not connected"));
        }

        match self.steps.pop_front() {
            Some(ScriptStep::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    let rest = bytes.split_off(n);
                    self.steps.push_front(ScriptStep::Data(rest));
                }
                Ok(n)
            }
            Some(ScriptStep::Idle) | None => Ok(0),
            Some(ScriptStep::Fail(message)) => {
                self.connected = false;
                Err(transport(message))
            }
            Some(ScriptStep::Panic(message)) => panic!("{}", message),
        }
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn describe(&self) -> String {
        "scripted link".to_string()
    }

    fn is_exhausted(&self) -> bool {
        self.steps.is_empty()
    }
}
