//! Rig Serial
//!
//! Handshake-then-exchange serial communication with the microcontrollers
//! on a behavioral rig (stepper drivers, echo and upload-check sketches).
//!
//! # Features
//!
//! - **Line channel**: open a port, wait for the sketch's ready line, then
//!   exchange newline-delimited commands with bounded reads
//! - **Configuration**: per-machine ports and tool paths from TOML with
//!   environment overrides
//! - **Firmware upload**: run the upload tool and wait for the new sketch
//!   to come up, without fixed sleeps
//! - **Exercises**: echo, speed test, stepper console and paced trials

pub mod config;
pub mod error;
pub mod exercise;
pub mod serial;
pub mod upload;

pub use config::{load_config, RigConfig};
pub use error::{ChannelError, ConfigError, Result, UploadError};
pub use serial::{CancelToken, PortConfig, Reply, SerialLineChannel};
