//! Line-oriented request/reply channel over a serial port
//!
//! A rig sketch resets when the port opens, prints one line once it is
//! ready, then answers newline-terminated commands. `SerialLineChannel`
//! wraps that exchange:
//!
//! ```no_run
//! use rig_serial::serial::{PortConfig, Reply, SerialLineChannel};
//! use std::time::Duration;
//!
//! # fn main() -> rig_serial::Result<()> {
//! let config = PortConfig::new("/dev/ttyACM0")
//!     .with_baud_rate(115200)
//!     .with_timeout(Duration::from_secs(5));
//! let mut channel = SerialLineChannel::open_with(&config)?;
//! channel.await_handshake(config.handshake_timeout)?;
//! channel.send_line("42")?;
//! if let Reply::Line(echo) = channel.receive_line()? {
//!     println!("{}", echo);
//! }
//! # Ok(())
//! # }
//! ```

use super::port::{LinePort, PortConfig};
use crate::error::{ChannelError, Result};
use log::{debug, info, warn};
use serialport::SerialPort;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Line terminator on the wire
pub const DELIMITER: u8 = b'\n';

/// Longest single blocking read while a cancel token is attached
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest blocking read when the caller's deadline is unbounded
pub const MAX_READ_SLICE: Duration = Duration::from_secs(1);

/// Bytes buffered without a delimiter before the line is rejected
pub const MAX_LINE_LEN: usize = 4096;

const READ_CHUNK: usize = 256;

/// Outcome of a single `receive_line`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A complete line, delimiter (and any trailing `\r`) stripped
    Line(String),
    /// The read timeout elapsed before a delimiter arrived
    TimedOut,
}

impl Reply {
    pub fn line(&self) -> Option<&str> {
        match self {
            Reply::Line(line) => Some(line),
            Reply::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Reply::TimedOut)
    }
}

/// Channel lifecycle. An unopened channel is simply one that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open { handshake: bool },
    Closed,
}

/// Shared flag that aborts pending reads on a channel
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Serial connection exchanging newline-delimited text with a microcontroller
pub struct SerialLineChannel<P: LinePort = Box<dyn SerialPort>> {
    device: String,
    port: Option<P>,
    read_timeout: Duration,
    handshake: bool,
    buffer: Vec<u8>,
    cancel: Option<CancelToken>,
}

impl SerialLineChannel {
    /// Open `device` at `baud_rate` with the given read timeout
    pub fn open(device: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let config = PortConfig::new(device)
            .with_baud_rate(baud_rate)
            .with_timeout(timeout);
        Self::open_with(&config)
    }

    /// Open a channel using every setting in `config`
    pub fn open_with(config: &PortConfig) -> Result<Self> {
        let port = config.open_port()?;
        info!(
            "Opened {} at {} baud (read timeout {:?})",
            config.device, config.baud_rate, config.read_timeout
        );

        let mut channel = Self::from_port(&config.device, port, config.read_timeout);
        if config.clear_input_on_open {
            channel.clear_input()?;
        }
        Ok(channel)
    }
}

impl<P: LinePort> SerialLineChannel<P> {
    /// Wrap an already-open port
    pub fn from_port(device: &str, port: P, read_timeout: Duration) -> Self {
        Self {
            device: device.to_string(),
            port: Some(port),
            read_timeout,
            handshake: false,
            buffer: Vec::new(),
            cancel: None,
        }
    }

    /// Abort pending reads when `token` is cancelled
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn state(&self) -> ChannelState {
        match self.port {
            Some(_) => ChannelState::Open {
                handshake: self.handshake,
            },
            None => ChannelState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake
    }

    /// True once the attached cancel token has fired
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Bytes received but not yet returned as a line
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Wait for the peer's ready line and discard it
    pub fn await_handshake(&mut self, timeout: Duration) -> Result<()> {
        self.await_ready_line(timeout).map(|_| ())
    }

    /// Wait for the peer's ready line and return its content.
    ///
    /// Consumes exactly one line; anything after it stays buffered.
    pub fn await_ready_line(&mut self, timeout: Duration) -> Result<String> {
        if self.port.is_none() {
            return Err(ChannelError::Closed);
        }
        if self.handshake {
            return Err(ChannelError::InvalidState("handshake already completed"));
        }

        match self.read_line_until(deadline_after(timeout))? {
            Some(line) => {
                debug!("{} ready: {:?}", self.device, line);
                info!("Handshake complete on {}", self.device);
                self.handshake = true;
                Ok(line)
            }
            None => Err(ChannelError::HandshakeTimeout {
                device: self.device.clone(),
                timeout,
            }),
        }
    }

    /// Write `payload` followed by the delimiter
    pub fn send_line(&mut self, payload: &str) -> Result<()> {
        // A trailing '\r' would be eaten by the receiver's CRLF handling
        if payload.as_bytes().contains(&DELIMITER) || payload.ends_with('\r') {
            return Err(ChannelError::InvalidPayload(payload.to_string()));
        }
        if self.port.is_some() && !self.handshake {
            warn!("Sending to {} before handshake: {:?}", self.device, payload);
        }

        let Some(port) = self.port.as_mut() else {
            return Err(ChannelError::Write {
                device: self.device.clone(),
                source: io::Error::new(ErrorKind::NotConnected, "channel is closed"),
            });
        };

        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload.as_bytes());
        frame.push(DELIMITER);

        port.write_all(&frame)
            .and_then(|()| port.flush())
            .map_err(|source| ChannelError::Write {
                device: self.device.clone(),
                source,
            })?;

        debug!("[TX {}] {}", self.device, payload);
        Ok(())
    }

    /// Wait up to the read timeout for one complete line
    pub fn receive_line(&mut self) -> Result<Reply> {
        if self.port.is_none() {
            return Err(ChannelError::Closed);
        }

        let reply = match self.read_line_until(deadline_after(self.read_timeout))? {
            Some(line) => {
                debug!("[RX {}] {}", self.device, line);
                Reply::Line(line)
            }
            None => {
                debug!("[RX {}] timed out after {:?}", self.device, self.read_timeout);
                Reply::TimedOut
            }
        };
        Ok(reply)
    }

    /// Send `payload` and wait for one reply line
    pub fn exchange(&mut self, payload: &str) -> Result<Reply> {
        self.send_line(payload)?;
        self.receive_line()
    }

    /// Discard buffered bytes and the OS input queue
    pub fn clear_input(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(ChannelError::Closed)?;
        self.buffer.clear();
        port.discard_input().map_err(|source| ChannelError::Read {
            device: self.device.clone(),
            source,
        })
    }

    /// Release the port. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush() {
                debug!("Flush on close of {} failed: {}", self.device, e);
            }
            self.buffer.clear();
            info!("Closed {}", self.device);
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == DELIMITER)?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Read until a full line is buffered or `deadline` passes (`None` waits forever)
    fn read_line_until(&mut self, deadline: Option<Instant>) -> Result<Option<String>> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }
            if self.buffer.len() > MAX_LINE_LEN {
                self.buffer.clear();
                return Err(ChannelError::LineTooLong {
                    device: self.device.clone(),
                    limit: MAX_LINE_LEN,
                });
            }
            if self.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }

            let mut wait = MAX_READ_SLICE;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                wait = wait.min(deadline - now);
            }
            if self.cancel.is_some() {
                wait = wait.min(CANCEL_POLL_INTERVAL);
            }

            let port = self.port.as_mut().ok_or(ChannelError::Closed)?;
            port.set_read_timeout(wait)
                .map_err(|source| ChannelError::Read {
                    device: self.device.clone(),
                    source,
                })?;

            match port.read(&mut chunk) {
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(source) => {
                    return Err(ChannelError::Read {
                        device: self.device.clone(),
                        source,
                    })
                }
            }
        }
    }
}

/// `now + timeout`, or no deadline when that is past what `Instant` can represent
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

impl<P: LinePort> Drop for SerialLineChannel<P> {
    fn drop(&mut self) {
        self.close();
    }
}
