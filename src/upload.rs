//! Firmware upload through an external tool
//!
//! The upload tool can take many seconds to compile and flash, and a port
//! opened too early talks to the previous sketch. Rather than sleeping a
//! fixed time, the uploader waits for the tool to exit, then polls until
//! the port reopens and the new sketch prints its ready line.

use crate::config::UploadSettings;
use crate::error::{ChannelError, UploadError};
use crate::serial::channel::deadline_after;
use crate::serial::{CancelToken, PortConfig, SerialLineChannel};
use log::{debug, info};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// Channel to the freshly flashed sketch
pub struct UploadOutcome {
    /// Open, handshaken channel
    pub channel: SerialLineChannel,
    /// Line the sketch printed when it came up
    pub ready_line: String,
    /// Time spent inside the upload tool
    pub tool_elapsed: Duration,
}

/// Drives the configured upload tool
pub struct Uploader {
    settings: UploadSettings,
    cancel: Option<CancelToken>,
}

impl Uploader {
    pub fn new(settings: UploadSettings) -> Self {
        Self {
            settings,
            cancel: None,
        }
    }

    /// Abort the tool and the ready wait when `token` is cancelled.
    /// The token also stays attached to the returned channel.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Tool invocation for flashing through `device`
    pub fn command(&self, device: &str) -> Command {
        let s = &self.settings;
        let mut cmd = Command::new(&s.tool);
        cmd.args(&s.args);
        cmd.arg("--board").arg(&s.board);
        cmd.arg("--port").arg(device);
        if let Some(sketchbook) = &s.sketchbook {
            let mut pref = std::ffi::OsString::from("sketchbook.path=");
            pref.push(sketchbook);
            cmd.arg("--pref").arg(pref);
        }
        cmd.arg("--upload").arg(&s.sketch);
        if let Some(dir) = &s.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Flash the sketch, then reopen `port` and wait for the ready line
    pub fn upload(&self, port: &PortConfig) -> UploadResult<UploadOutcome> {
        let tool_elapsed = self.run_tool(&port.device)?;
        let (channel, ready_line) = self.wait_for_ready(port)?;
        Ok(UploadOutcome {
            channel,
            ready_line,
            tool_elapsed,
        })
    }

    /// Run the tool to completion, bounded by the completion timeout
    pub fn run_tool(&self, device: &str) -> UploadResult<Duration> {
        let start = Instant::now();
        let timeout = self.settings.completion_timeout();
        let mut cmd = self.command(device);
        info!("Uploading {} via {}", self.settings.sketch.display(), device);
        debug!("Upload command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|source| UploadError::Spawn {
            tool: self.settings.tool.clone(),
            source,
        })?;

        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    let elapsed = start.elapsed();
                    info!("Upload finished in {:.1}s", elapsed.as_secs_f64());
                    return Ok(elapsed);
                }
                Ok(Some(status)) => return Err(UploadError::ToolFailed { status }),
                Ok(None) => {}
                Err(source) => {
                    kill(&mut child);
                    return Err(UploadError::Spawn {
                        tool: self.settings.tool.clone(),
                        source,
                    });
                }
            }

            if self.is_cancelled() {
                kill(&mut child);
                return Err(ChannelError::Cancelled.into());
            }
            if start.elapsed() >= timeout {
                kill(&mut child);
                return Err(UploadError::TimedOut(timeout));
            }
            thread::sleep(self.settings.poll_interval());
        }
    }

    /// Poll until the port opens, then take the handshake with the time left
    pub fn wait_for_ready(&self, port: &PortConfig) -> UploadResult<(SerialLineChannel, String)> {
        let timeout = self.settings.ready_timeout();
        let deadline = deadline_after(timeout);
        let not_ready = || UploadError::PortNotReady {
            device: port.device.clone(),
            timeout,
        };

        let mut channel = loop {
            if self.is_cancelled() {
                return Err(ChannelError::Cancelled.into());
            }
            match SerialLineChannel::open_with(port) {
                Ok(channel) => break channel,
                Err(e) => {
                    debug!("{} not available yet: {}", port.device, e);
                    let next_poll = Instant::now().checked_add(self.settings.poll_interval());
                    if matches!((next_poll, deadline), (Some(next), Some(end)) if next >= end) {
                        return Err(not_ready());
                    }
                    thread::sleep(self.settings.poll_interval());
                }
            }
        };
        if let Some(token) = &self.cancel {
            channel = channel.with_cancel_token(token.clone());
        }

        let remaining = match deadline {
            Some(end) => end.saturating_duration_since(Instant::now()),
            None => timeout,
        };
        match channel.await_ready_line(remaining) {
            Ok(line) => Ok((channel, line)),
            Err(ChannelError::HandshakeTimeout { .. }) => Err(not_ready()),
            Err(e) => Err(e.into()),
        }
    }
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Failed to kill upload tool: {}", e);
    }
    if let Err(e) = child.wait() {
        debug!("Failed to reap upload tool: {}", e);
    }
}
