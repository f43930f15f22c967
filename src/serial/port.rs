//! Serial port configuration, discovery and the byte-stream seam used by the channel
//!
//! Handles USB serial port discovery and opening ports for rig microcontrollers.

use crate::error::{ChannelError, Result};
use colored::Colorize;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Baud rates seen on rig sketches
pub const COMMON_BAUD_RATES: &[u32] = &[
    9600,   // upload confirmation and marco/polo sketches
    19200,  // speed test sketch
    38400,
    57600,
    115200, // stepper sketches
    230400,
];

/// Default baud rate for rig sketches
pub const DEFAULT_BAUD: u32 = 115200;

/// Configuration for a serial line connection
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Serial device path (e.g., /dev/ttyACM0, COM3)
    pub device: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Data bits (default: 8)
    pub data_bits: DataBits,
    /// Parity (default: None)
    pub parity: Parity,
    /// Stop bits (default: 1)
    pub stop_bits: StopBits,
    /// Flow control (default: None)
    pub flow_control: FlowControl,
    /// Deadline for a single `receive_line`
    pub read_timeout: Duration,
    /// Deadline for the peer's ready line
    pub handshake_timeout: Duration,
    /// Discard stale input right after opening
    pub clear_input_on_open: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            device: String::from("/dev/ttyACM0"),
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            read_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            clear_input_on_open: false,
        }
    }
}

impl PortConfig {
    /// Create a new configuration with default settings
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_clear_input_on_open(mut self, clear: bool) -> Self {
        self.clear_input_on_open = clear;
        self
    }

    /// Open the underlying OS serial port
    pub fn open_port(&self) -> Result<Box<dyn SerialPort>> {
        serialport::new(&self.device, self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .flow_control(self.flow_control)
            .timeout(self.read_timeout)
            .open()
            .map_err(|source| ChannelError::Connection {
                device: self.device.clone(),
                source,
            })
    }
}

/// Byte stream a [`SerialLineChannel`](super::SerialLineChannel) runs over.
///
/// Reads must honour the timeout last passed to `set_read_timeout` and report
/// an elapsed timeout as `ErrorKind::TimedOut` (or `WouldBlock`).
pub trait LinePort: Read + Write + Send {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop everything queued on the input side
    fn discard_input(&mut self) -> io::Result<()>;
}

impl LinePort for Box<dyn SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.as_mut().set_timeout(timeout).map_err(io::Error::from)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.as_mut()
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

/// Board family recognised from a port's USB identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Board {
    /// Genuine Arduino (Arduino SA / Arduino LLC vendor IDs)
    Arduino,
    /// FTDI or WCH CH340 bridge, as on clone boards
    Bridge,
    /// Identified only by its product string
    Named,
}

/// A port found by [`list_ports`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub path: String,
    /// `(vid, pid)` for USB ports
    pub usb_id: Option<(u16, u16)>,
    /// USB product string, else the bus the port sits on
    pub description: String,
    pub board: Option<Board>,
}

impl PortInfo {
    pub fn new(path: &str, usb_id: Option<(u16, u16)>, description: &str) -> Self {
        Self {
            path: path.to_string(),
            usb_id,
            description: description.to_string(),
            board: usb_id.and_then(|(vid, pid)| classify(vid, pid, description)),
        }
    }

    pub fn is_likely_microcontroller(&self) -> bool {
        self.board.is_some()
    }
}

fn classify(vid: u16, pid: u16, product: &str) -> Option<Board> {
    match (vid, pid) {
        (0x2341 | 0x2a03, _) => Some(Board::Arduino),
        (0x0403, _) | (0x1a86, 0x7523 | 0x5523) => Some(Board::Bridge),
        _ => {
            let product = product.to_lowercase();
            ["arduino", "ch340", "uart"]
                .iter()
                .any(|name| product.contains(name))
                .then_some(Board::Named)
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        use serialport::SerialPortType::*;
        match p.port_type {
            UsbPort(usb) => {
                let product = usb.product.as_deref().unwrap_or("USB serial");
                PortInfo::new(&p.port_name, Some((usb.vid, usb.pid)), product)
            }
            PciPort => PortInfo::new(&p.port_name, None, "PCI"),
            BluetoothPort => PortInfo::new(&p.port_name, None, "Bluetooth"),
            Unknown => PortInfo::new(&p.port_name, None, ""),
        }
    }
}

/// Order ports so likely rig boards come first, then by path
pub fn rank_ports(ports: &mut [PortInfo]) {
    ports.sort_by(|a, b| {
        let rank = |p: &PortInfo| p.board.map_or(u8::MAX, |board| board as u8);
        rank(a).cmp(&rank(b)).then_with(|| a.path.cmp(&b.path))
    });
}

/// Enumerate serial ports, likely rig boards first
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|source| ChannelError::Connection {
        device: String::from("<enumerate>"),
        source,
    })?;

    let mut ports: Vec<PortInfo> = ports.into_iter().map(PortInfo::from).collect();
    rank_ports(&mut ports);
    Ok(ports)
}

/// One listing row: path, USB id, description
pub fn port_row(port: &PortInfo) -> String {
    let id = port
        .usb_id
        .map(|(vid, pid)| format!("{:04x}:{:04x}", vid, pid))
        .unwrap_or_else(|| "-".to_string());
    format!("{:<16} {:<9} {}", port.path, id, port.description)
}

pub fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("  Is the board plugged in, and is your user in the 'dialout' group?");
        return Ok(());
    }

    for port in &ports {
        let row = port_row(port);
        if port.is_likely_microcontroller() {
            println!("{} {}", "*".green().bold(), row.white().bold());
        } else {
            println!("  {}", row);
        }
    }
    println!("\n{} marks a likely rig board", "*".green().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(vid: u16, pid: u16, product: &str) -> PortInfo {
        PortInfo::new("/dev/ttyACM0", Some((vid, pid)), product)
    }

    #[test]
    fn test_default_config() {
        let config = PortConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.device, "/dev/ttyACM0");
        assert_eq!(config.read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder() {
        let config = PortConfig::new("COM3")
            .with_baud_rate(9600)
            .with_timeout(Duration::from_secs(2))
            .with_handshake_timeout(Duration::from_secs(8));

        assert_eq!(config.device, "COM3");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.handshake_timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_board_detection() {
        assert_eq!(usb(0x2341, 0x0043, "Uno").board, Some(Board::Arduino));
        assert_eq!(usb(0x1a86, 0x7523, "USB Serial").board, Some(Board::Bridge));
        assert_eq!(usb(0x1a86, 0x1234, "USB Serial").board, None);
        assert_eq!(usb(0xffff, 0x0001, "Arduino Mega").board, Some(Board::Named));
        assert!(!usb(0xffff, 0x0001, "Keyboard").is_likely_microcontroller());

        let bt = PortInfo::new("/dev/rfcomm0", None, "Arduino over Bluetooth");
        assert!(!bt.is_likely_microcontroller());
    }

    #[test]
    fn test_rank_puts_boards_first() {
        let mut ports = vec![
            PortInfo::new("/dev/ttyS0", None, "PCI"),
            usb(0xffff, 0x0001, "Arduino Nano"),
            PortInfo::new("/dev/ttyUSB1", Some((0x0403, 0x6001)), "FT232R"),
            PortInfo::new("/dev/ttyACM1", Some((0x2341, 0x0042)), "Mega 2560"),
        ];
        rank_ports(&mut ports);

        let paths: Vec<&str> = ports.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, ["/dev/ttyACM1", "/dev/ttyUSB1", "/dev/ttyACM0", "/dev/ttyS0"]);
    }

    #[test]
    fn test_port_row() {
        let row = port_row(&PortInfo::new("/dev/ttyACM0", Some((0x2341, 0x43)), "Uno"));
        assert!(row.starts_with("/dev/ttyACM0"));
        assert!(row.contains("2341:0043"));
        assert!(row.ends_with("Uno"));
        assert!(port_row(&PortInfo::new("COM1", None, "PCI")).contains(" - "));
    }

    #[test]
    fn test_open_missing_device_fails() {
        let config = PortConfig::new("/dev/rig-serial-does-not-exist");
        match config.open_port() {
            Err(ChannelError::Connection { device, .. }) => {
                assert_eq!(device, "/dev/rig-serial-does-not-exist")
            }
            other => panic!("expected connection error, got {:?}", other.map(|_| ())),
        }
    }
}
