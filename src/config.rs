//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub command_link: CommandLinkConfig,
    #[serde(default = "default_gps_section")]
    pub gps: GpsConfig,
    #[serde(default = "default_xbee_section")]
    pub xbee: XbeeConfig,
    #[serde(default = "default_temperature_section")]
    pub temperature: TemperatureConfig,
    #[serde(default = "default_transfer_section")]
    pub transfer: TransferConfig,
    #[serde(default = "default_camera_section")]
    pub camera: CameraConfig,
    pub storage: StorageConfig,
}

/// Command radio (RFD 900) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CommandLinkConfig {
    #[serde(default = "default_command_port")]
    pub port: String,

    #[serde(default = "default_command_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    /// When both are set the radio is located by USB enumeration instead of `port`
    #[serde(default)]
    pub usb_vid: Option<u16>,

    #[serde(default)]
    pub usb_pid: Option<u16>,
}

/// GPS receiver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fixed device path; when set, USB enumeration is skipped
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_gps_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_gps_vid")]
    pub usb_vid: u16,

    #[serde(default = "default_gps_pid")]
    pub usb_pid: u16,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub log_fixes: bool,
}

/// Secondary radio (XBee) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct XbeeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_xbee_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_xbee_vid")]
    pub usb_vid: u16,

    #[serde(default = "default_xbee_pid")]
    pub usb_pid: u16,
}

/// 1-Wire temperature sensor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TemperatureConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_w1_device_dir")]
    pub device_dir: PathBuf,

    #[serde(default = "default_temperature_poll_ms")]
    pub poll_interval_ms: u64,
}

/// Image transfer protocol tuning
#[derive(Debug, Deserialize, Clone)]
pub struct TransferConfig {
    #[serde(default = "default_word_length")]
    pub word_length: usize,

    #[serde(default = "default_word_step")]
    pub word_step: usize,

    #[serde(default = "default_word_floor")]
    pub word_floor: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_sync_attempts")]
    pub sync_attempts: u32,

    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,

    #[serde(default = "default_sync_settle_ms")]
    pub sync_settle_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Camera and capture scheduling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_capture_interval_s")]
    pub capture_interval_s: u64,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default)]
    pub sharpness: i32,

    #[serde(default = "default_brightness")]
    pub brightness: i32,

    #[serde(default)]
    pub contrast: i32,

    #[serde(default)]
    pub saturation: i32,

    #[serde(default = "default_iso")]
    pub iso: i32,

    #[serde(default = "default_capture_program")]
    pub capture_program: String,

    #[serde(default = "default_probe_program")]
    pub probe_program: String,

    #[serde(default = "default_settings_timeout_ms")]
    pub settings_timeout_ms: u64,
}

/// Mission storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

// Default value functions
fn default_true() -> bool { true }

fn default_command_port() -> String { "/dev/ttyAMA0".to_string() }
fn default_command_baud_rate() -> u32 { 38400 }
fn default_command_timeout_ms() -> u64 { 3000 }
fn default_frame_timeout_ms() -> u64 { 3000 }

fn default_gps_baud_rate() -> u32 { 9600 }
fn default_gps_vid() -> u16 { 0x067B }
fn default_gps_pid() -> u16 { 0x2303 }
fn default_probe_timeout_ms() -> u64 { 1000 }

fn default_xbee_baud_rate() -> u32 { 9600 }
fn default_xbee_vid() -> u16 { 0x0403 }
fn default_xbee_pid() -> u16 { 0x6015 }

fn default_w1_device_dir() -> PathBuf { PathBuf::from("/sys/bus/w1/devices") }
fn default_temperature_poll_ms() -> u64 { 1000 }

fn default_word_length() -> usize { 7000 }
fn default_word_step() -> usize { 1000 }
fn default_word_floor() -> usize { 1000 }
fn default_max_retries() -> u32 { 5 }
fn default_sync_attempts() -> u32 { 5 }
fn default_sync_timeout_ms() -> u64 { 10_000 }
fn default_sync_settle_ms() -> u64 { 500 }
fn default_request_timeout_ms() -> u64 { 5000 }

fn default_capture_interval_s() -> u64 { 60 }
fn default_width() -> u32 { 650 }
fn default_height() -> u32 { 450 }
fn default_brightness() -> i32 { 50 }
fn default_iso() -> i32 { 100 }
fn default_capture_program() -> String { "raspistill".to_string() }
fn default_probe_program() -> String { "vcgencmd".to_string() }
fn default_settings_timeout_ms() -> u64 { 10_000 }

fn default_base_dir() -> PathBuf { PathBuf::from("/home/pi/RFD_Pics") }

fn default_gps_section() -> GpsConfig {
    GpsConfig {
        enabled: true,
        port: None,
        baud_rate: default_gps_baud_rate(),
        usb_vid: default_gps_vid(),
        usb_pid: default_gps_pid(),
        probe_timeout_ms: default_probe_timeout_ms(),
        log_fixes: true,
    }
}

fn default_xbee_section() -> XbeeConfig {
    XbeeConfig {
        enabled: true,
        port: None,
        baud_rate: default_xbee_baud_rate(),
        usb_vid: default_xbee_vid(),
        usb_pid: default_xbee_pid(),
    }
}

fn default_temperature_section() -> TemperatureConfig {
    TemperatureConfig {
        enabled: false,
        device_dir: default_w1_device_dir(),
        poll_interval_ms: default_temperature_poll_ms(),
    }
}

fn default_transfer_section() -> TransferConfig {
    TransferConfig {
        word_length: default_word_length(),
        word_step: default_word_step(),
        word_floor: default_word_floor(),
        max_retries: default_max_retries(),
        sync_attempts: default_sync_attempts(),
        sync_timeout_ms: default_sync_timeout_ms(),
        sync_settle_ms: default_sync_settle_ms(),
        request_timeout_ms: default_request_timeout_ms(),
    }
}

fn default_camera_section() -> CameraConfig {
    CameraConfig {
        enabled: true,
        capture_interval_s: default_capture_interval_s(),
        width: default_width(),
        height: default_height(),
        sharpness: 0,
        brightness: default_brightness(),
        contrast: 0,
        saturation: 0,
        iso: default_iso(),
        capture_program: default_capture_program(),
        probe_program: default_probe_program(),
        settings_timeout_ms: default_settings_timeout_ms(),
    }
}

impl CommandLinkConfig {
    /// USB vendor/product pair, if the radio is located by enumeration
    pub fn usb_id(&self) -> Option<(u16, u16)> {
        match (self.usb_vid, self.usb_pid) {
            (Some(vid), Some(pid)) => Some((vid, pid)),
            _ => None,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl GpsConfig {
    pub fn usb_id(&self) -> (u16, u16) {
        (self.usb_vid, self.usb_pid)
    }
}

impl XbeeConfig {
    pub fn usb_id(&self) -> (u16, u16) {
        (self.usb_vid, self.usb_pid)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use payload_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the GPS and the command radio share a USB identifier, in which
    /// case enumerated devices must be told apart by their traffic.
    pub fn gps_shares_command_usb_id(&self) -> bool {
        self.command_link.usb_id() == Some(self.gps.usb_id())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.command_link.port.is_empty() && self.command_link.usb_id().is_none() {
            return Err(invalid("command_link needs a port or a usb_vid/usb_pid pair"));
        }

        if self.command_link.usb_vid.is_some() != self.command_link.usb_pid.is_some() {
            return Err(invalid("command_link usb_vid and usb_pid must be set together"));
        }

        for (name, baud) in [
            ("command_link.baud_rate", self.command_link.baud_rate),
            ("gps.baud_rate", self.gps.baud_rate),
            ("xbee.baud_rate", self.xbee.baud_rate),
        ] {
            if ![1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200].contains(&baud) {
                return Err(invalid(format!(
                    "{} must be one of: 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200",
                    name
                )));
            }
        }

        // Validate timing fields
        if self.command_link.timeout_ms == 0 || self.command_link.timeout_ms > 10000 {
            return Err(invalid("command_link.timeout_ms must be between 1 and 10000"));
        }

        if self.command_link.frame_timeout_ms == 0 || self.command_link.frame_timeout_ms > 60000 {
            return Err(invalid("command_link.frame_timeout_ms must be between 1 and 60000"));
        }

        if self.gps.probe_timeout_ms == 0 || self.gps.probe_timeout_ms > 10000 {
            return Err(invalid("gps.probe_timeout_ms must be between 1 and 10000"));
        }

        if self.temperature.poll_interval_ms == 0 {
            return Err(invalid("temperature.poll_interval_ms must be greater than 0"));
        }

        if self.temperature.enabled && self.temperature.device_dir.as_os_str().is_empty() {
            return Err(invalid("temperature.device_dir cannot be empty when enabled"));
        }

        // Validate transfer tuning
        let transfer = &self.transfer;
        if transfer.word_floor == 0 {
            return Err(invalid("transfer.word_floor must be greater than 0"));
        }

        if transfer.word_length < transfer.word_floor {
            return Err(invalid("transfer.word_length must be at least transfer.word_floor"));
        }

        if transfer.max_retries == 0 {
            return Err(invalid("transfer.max_retries must be greater than 0"));
        }

        if transfer.sync_attempts == 0 {
            return Err(invalid("transfer.sync_attempts must be greater than 0"));
        }

        if transfer.sync_timeout_ms == 0 || transfer.sync_timeout_ms > 60000 {
            return Err(invalid("transfer.sync_timeout_ms must be between 1 and 60000"));
        }

        if transfer.request_timeout_ms == 0 || transfer.request_timeout_ms > 60000 {
            return Err(invalid("transfer.request_timeout_ms must be between 1 and 60000"));
        }

        // Validate camera
        if self.camera.capture_interval_s == 0 {
            return Err(invalid("camera.capture_interval_s must be greater than 0"));
        }

        if self.camera.width == 0 || self.camera.width > 2592
            || self.camera.height == 0 || self.camera.height > 1944 {
            return Err(invalid("camera resolution must be within 1x1 and 2592x1944"));
        }

        if self.camera.enabled && self.camera.capture_program.is_empty() {
            return Err(invalid("camera.capture_program cannot be empty when enabled"));
        }

        if self.storage.base_dir.as_os_str().is_empty() {
            return Err(invalid("storage.base_dir cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
impl Config {
    /// Defaults for every section, command radio on its fixed path
    pub fn for_tests() -> Self {
        Config {
            command_link: CommandLinkConfig {
                port: default_command_port(),
                baud_rate: default_command_baud_rate(),
                timeout_ms: default_command_timeout_ms(),
                frame_timeout_ms: default_frame_timeout_ms(),
                usb_vid: None,
                usb_pid: None,
            },
            gps: default_gps_section(),
            xbee: default_xbee_section(),
            temperature: default_temperature_section(),
            transfer: default_transfer_section(),
            camera: default_camera_section(),
            storage: StorageConfig {
                base_dir: default_base_dir(),
            },
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> crate::error::PayloadLinkError {
    crate::error::PayloadLinkError::Config(toml::de::Error::custom(msg))
}
