//! Serial line communication with rig microcontrollers
//!
//! This module provides functionality for:
//! - Listing available serial ports
//! - Opening a port and waiting for the sketch's ready line
//! - Exchanging newline-delimited commands and replies

pub mod channel;
pub mod mock;
pub mod port;

pub use channel::{CancelToken, ChannelState, Reply, SerialLineChannel};
pub use mock::MockPort;
pub use port::{Board, LinePort, PortConfig, PortInfo};
