//! Rig configuration
//!
//! Per-machine values (serial device, baud rate, upload tool paths) live in
//! a TOML file instead of the scripts. Loading happens in three layers:
//! 1. TOML file (`--config`, `RIG_SERIAL_CONFIG`, or `./rig-serial.toml`)
//! 2. Environment variables (`RIG_SERIAL_*`)
//! 3. CLI flags, applied by the binary
//!
//! Example file:
//!
//! ```toml
//! [port]
//! device = "COM13"
//! baud_rate = 115200
//! read_timeout_ms = 5000
//! handshake_timeout_ms = 10000
//!
//! [upload]
//! tool = "arduino"
//! working_dir = "C:\\Program Files (x86)\\Arduino"
//! board = "arduino:avr:uno"
//! sketchbook = "C:\\Users\\rig\\Documents\\Arduino"
//! sketch = "C:\\Users\\rig\\Documents\\Arduino\\hardware_tests\\marco_polo\\marco_polo.ino"
//! ```

use crate::error::ConfigError;
use crate::serial::port::{PortConfig, COMMON_BAUD_RATES, DEFAULT_BAUD};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name searched in the working directory
pub const CONFIG_FILE_NAME: &str = "rig-serial.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "RIG_SERIAL_CONFIG";

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Complete rig configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub port: PortSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadSettings>,
}

/// `[port]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub device: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Flush stale bytes right after opening
    pub clear_input_on_open: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM0".to_string(),
            baud_rate: DEFAULT_BAUD,
            read_timeout_ms: 5000,
            handshake_timeout_ms: 10_000,
            clear_input_on_open: false,
        }
    }
}

impl PortSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Build the serial settings used to open a channel
    pub fn port_config(&self) -> PortConfig {
        PortConfig::new(&self.device)
            .with_baud_rate(self.baud_rate)
            .with_timeout(self.read_timeout())
            .with_handshake_timeout(self.handshake_timeout())
            .with_clear_input_on_open(self.clear_input_on_open)
    }
}

/// `[upload]` section: external firmware upload tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Upload executable (e.g. `arduino`, `arduino_debug.exe`)
    pub tool: String,
    /// Arguments placed before the generated upload flags
    pub args: Vec<String>,
    /// Directory the tool runs in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Board identifier passed as `--board`
    pub board: String,
    /// Sketchbook directory passed as `--pref sketchbook.path=`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sketchbook: Option<PathBuf>,
    /// Sketch to compile and upload
    pub sketch: PathBuf,
    /// Upper bound on the tool's run time
    pub completion_timeout_ms: u64,
    /// Upper bound on reopening the port and receiving the ready line
    pub ready_timeout_ms: u64,
    /// Delay between attempts to reopen the port
    pub poll_interval_ms: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            tool: "arduino".to_string(),
            args: Vec::new(),
            working_dir: None,
            board: "arduino:avr:uno".to_string(),
            sketchbook: None,
            sketch: PathBuf::new(),
            completion_timeout_ms: 120_000,
            ready_timeout_ms: 15_000,
            poll_interval_ms: 250,
        }
    }
}

impl UploadSettings {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl RigConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str, path: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Render as TOML
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values no serial session can work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.port.device.trim().is_empty() {
            return Err(ConfigError::Invalid("port.device is empty".to_string()));
        }
        if self.port.baud_rate == 0 {
            return Err(ConfigError::Invalid("port.baud_rate must be positive".to_string()));
        }
        if self.port.read_timeout_ms == 0 || self.port.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "port timeouts must be positive".to_string(),
            ));
        }
        if !COMMON_BAUD_RATES.contains(&self.port.baud_rate) {
            warn!(
                "Unusual baud rate {} (common: {:?})",
                self.port.baud_rate, COMMON_BAUD_RATES
            );
        }

        if let Some(upload) = &self.upload {
            if upload.tool.trim().is_empty() {
                return Err(ConfigError::Invalid("upload.tool is empty".to_string()));
            }
            if upload.sketch.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("upload.sketch is empty".to_string()));
            }
            if upload.poll_interval_ms == 0 {
                return Err(ConfigError::Invalid(
                    "upload.poll_interval_ms must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Locate the config file: explicit env path first, then the working directory
pub fn find_config_file() -> ConfigResult<Option<PathBuf>> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::Invalid(format!(
            "config file named by {} not found: {}",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    Ok(local.exists().then_some(local))
}

/// Load configuration from `config_path`, or from the discovered file, or defaults.
/// Environment overrides are applied on top.
pub fn load_config(config_path: Option<&Path>) -> ConfigResult<RigConfig> {
    let config_file = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file()?,
    };

    let mut config = match config_file {
        Some(path) => {
            let display = path.display().to_string();
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: display.clone(),
                source,
            })?;
            debug!("Loaded config from {}", display);
            RigConfig::from_toml(&content, &display)?
        }
        None => {
            debug!("No config file found, using defaults");
            RigConfig::default()
        }
    };

    apply_environment_overrides(&mut config, |key| env::var(key).ok())?;
    Ok(config)
}

/// Apply `RIG_SERIAL_*` overrides using `lookup` to read variables
///
/// Supported variables:
/// - `RIG_SERIAL_DEVICE` -> `port.device`
/// - `RIG_SERIAL_BAUD` -> `port.baud_rate`
/// - `RIG_SERIAL_READ_TIMEOUT_MS` -> `port.read_timeout_ms`
/// - `RIG_SERIAL_HANDSHAKE_TIMEOUT_MS` -> `port.handshake_timeout_ms`
pub fn apply_environment_overrides<F>(config: &mut RigConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("RIG_SERIAL_DEVICE") {
        config.port.device = value;
    }
    if let Some(value) = lookup("RIG_SERIAL_BAUD") {
        config.port.baud_rate = parse_number("RIG_SERIAL_BAUD", &value)?;
    }
    if let Some(value) = lookup("RIG_SERIAL_READ_TIMEOUT_MS") {
        config.port.read_timeout_ms = parse_number("RIG_SERIAL_READ_TIMEOUT_MS", &value)?;
    }
    if let Some(value) = lookup("RIG_SERIAL_HANDSHAKE_TIMEOUT_MS") {
        config.port.handshake_timeout_ms =
            parse_number("RIG_SERIAL_HANDSHAKE_TIMEOUT_MS", &value)?;
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} is not a number: {:?}", key, value)))
}

/// Starter config written by `rig-serial config init`
pub fn starter_config() -> RigConfig {
    RigConfig {
        port: PortSettings::default(),
        upload: Some(UploadSettings {
            sketch: PathBuf::from("hardware_tests/marco_polo/marco_polo.ino"),
            ..Default::default()
        }),
    }
}
