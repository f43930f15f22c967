//! In-memory peer for exercising the line protocol without hardware
//!
//! `MockPort` plays the microcontroller side: it can queue lines the
//! "sketch" prints, answer each written line through a responder, and
//! simulate read timeouts by sleeping for the timeout the channel set.

use super::port::LinePort;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct MockState {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    pending_line: Vec<u8>,
    responder: Option<Responder>,
    timeout: Duration,
    fail_writes: bool,
    discards: usize,
}

/// Scripted serial peer. Clones share state, so a test can keep one handle
/// while the channel owns another.
#[derive(Clone)]
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                incoming: VecDeque::new(),
                written: Vec::new(),
                pending_line: Vec::new(),
                responder: None,
                timeout: Duration::from_millis(100),
                fail_writes: false,
                discards: 0,
            })),
        }
    }

    /// Peer that echoes every line it receives
    pub fn echoing() -> Self {
        Self::with_responder(|line| vec![line.to_string()])
    }

    /// Peer that answers each received line with the returned lines
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let port = Self::new();
        port.lock().responder = Some(Box::new(responder));
        port
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a line as if the peer printed it (delimiter appended)
    pub fn push_line(&self, line: &str) {
        let mut state = self.lock();
        state.incoming.extend(line.as_bytes());
        state.incoming.push_back(b'\n');
    }

    /// Queue raw bytes from the peer
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.lock().incoming.extend(bytes);
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    /// Everything written to the port so far
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Complete lines written to the port, delimiter stripped
    pub fn written_lines(&self) -> Vec<String> {
        let written = self.written();
        let mut lines: Vec<String> = written
            .split(|b| *b == b'\n')
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect();
        // `split` yields a trailing fragment after the last delimiter
        lines.pop();
        lines
    }

    /// Bytes queued by the peer and not yet read
    pub fn pending_input(&self) -> usize {
        self.lock().incoming.len()
    }

    /// Number of times the input side was discarded
    pub fn discards(&self) -> usize {
        self.lock().discards
    }

    /// Timeout most recently set by the reader
    pub fn read_timeout(&self) -> Duration {
        self.lock().timeout
    }

    /// True once every other handle (the channel's) has been dropped
    pub fn is_released(&self) -> bool {
        Arc::strong_count(&self.state) == 1
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = {
            let mut state = self.lock();
            if !state.incoming.is_empty() {
                let n = buf.len().min(state.incoming.len());
                for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            state.timeout
        };

        std::thread::sleep(timeout);
        Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timed out"))
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        state.written.extend_from_slice(buf);

        for &byte in buf {
            if byte != b'\n' {
                state.pending_line.push(byte);
                continue;
            }
            let line = String::from_utf8_lossy(&state.pending_line).into_owned();
            state.pending_line.clear();
            let replies = match state.responder.as_mut() {
                Some(respond) => respond(&line),
                None => Vec::new(),
            };
            for reply in replies {
                state.incoming.extend(reply.as_bytes());
                state.incoming.push_back(b'\n');
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LinePort for MockPort {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.lock().timeout = timeout;
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        state.incoming.clear();
        state.discards += 1;
        Ok(())
    }
}
