//! Configuration addresses, live acquisition settings and the loadable config.
//!
//! The configuration channel is register-like: `(module, parameter) -> u32`.
//! Negative modules are handled on the host, non-negative ones belong to the
//! device and are forwarded to the register transport.

use crate::log::LogLevel;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Host-side USB transfer settings, consumed by the transport.
pub const HOST_USB: i8 = -1;
pub const USB_BUFFER_NUMBER: u8 = 0;
pub const USB_BUFFER_SIZE: u8 = 1;

/// Host-side data exchange settings.
pub const HOST_DATAEXCHANGE: i8 = -2;
pub const DATAEXCHANGE_BUFFER_SIZE: u8 = 0;
pub const DATAEXCHANGE_BLOCKING: u8 = 1;
pub const DATAEXCHANGE_START_PRODUCERS: u8 = 2;
pub const DATAEXCHANGE_STOP_PRODUCERS: u8 = 3;

/// Host-side container generation settings.
pub const HOST_PACKETS: i8 = -3;
pub const PACKETS_MAX_CONTAINER_PACKET_SIZE: u8 = 0;
pub const PACKETS_MAX_CONTAINER_INTERVAL: u8 = 1;

/// Host-side logging settings.
pub const HOST_LOG: i8 = -4;
pub const LOG_LEVEL: u8 = 0;

// Device modules.
pub const MODULE_MUX: i8 = 0;
pub const MODULE_DVS: i8 = 1;
pub const MODULE_APS: i8 = 2;
pub const MODULE_IMU: i8 = 3;
pub const MODULE_SYSINFO: i8 = 6;

pub const MUX_RUN: u8 = 0;
pub const MUX_TIMESTAMP_RUN: u8 = 1;

pub const DVS_SIZE_COLUMNS: u8 = 0;
pub const DVS_SIZE_ROWS: u8 = 1;
pub const DVS_ORIENTATION_INFO: u8 = 2;
pub const DVS_RUN: u8 = 3;

pub const APS_SIZE_COLUMNS: u8 = 0;
pub const APS_SIZE_ROWS: u8 = 1;
pub const APS_ORIENTATION_INFO: u8 = 2;
pub const APS_COLOR_FILTER: u8 = 3;
pub const APS_RUN: u8 = 4;
pub const APS_RESET_READ: u8 = 5;
pub const APS_EXPOSURE: u8 = 12;
/// Host-side: auto exposure runs in the decoder, not on the device.
pub const APS_AUTOEXPOSURE: u8 = 101;

pub const IMU_ORIENTATION_INFO: u8 = 1;
pub const IMU_RUN: u8 = 2;

pub const SYSINFO_LOGIC_VERSION: u8 = 0;
pub const SYSINFO_CHIP_IDENTIFIER: u8 = 1;
pub const SYSINFO_DEVICE_IS_MASTER: u8 = 2;

/// Orientation bits shared by the DVS/APS/IMU info registers.
pub const ORIENTATION_FLIP_Y: u32 = 0x01;
pub const ORIENTATION_FLIP_X: u32 = 0x02;
pub const ORIENTATION_INVERT_XY: u32 = 0x04;
/// IMU-only: Z axis flip.
pub const ORIENTATION_FLIP_Z: u32 = 0x04;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown parameter {param} of module {module}")]
    UnknownParameter { module: i8, param: u8 },

    #[error("Invalid value {value} for module {module} parameter {param}: {reason}")]
    InvalidValue {
        module: i8,
        param: u8,
        value: u32,
        reason: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Settings read by the acquisition path while it runs.
///
/// Every field is an independent atomic: the producer reads each one on its
/// own at well-defined points, so no multi-field consistency is required.
#[derive(Debug)]
pub struct AcquisitionSettings {
    max_packet_size: AtomicU32,
    max_interval: AtomicU32,
    ring_size: AtomicU32,
    blocking: AtomicBool,
    start_producers: AtomicBool,
    stop_producers: AtomicBool,
    usb_buffer_number: AtomicU32,
    usb_buffer_size: AtomicU32,
    auto_exposure: AtomicBool,
    last_exposure: AtomicU32,
}

impl AcquisitionSettings {
    pub fn new(config: &AcquisitionConfig) -> Self {
        Self {
            max_packet_size: AtomicU32::new(config.max_packet_size),
            max_interval: AtomicU32::new(config.max_interval_us),
            ring_size: AtomicU32::new(config.ring_buffer_size),
            blocking: AtomicBool::new(config.blocking),
            start_producers: AtomicBool::new(true),
            stop_producers: AtomicBool::new(true),
            usb_buffer_number: AtomicU32::new(config.usb_buffer_number),
            usb_buffer_size: AtomicU32::new(config.usb_buffer_size),
            auto_exposure: AtomicBool::new(config.auto_exposure),
            last_exposure: AtomicU32::new(0),
        }
    }

    /// Packet count that forces a commit, 0 disables the trigger.
    pub fn max_packet_size(&self) -> u32 {
        self.max_packet_size.load(Ordering::Relaxed)
    }

    pub fn set_max_packet_size(&self, value: u32) {
        self.max_packet_size.store(value, Ordering::Relaxed);
    }

    /// Time span in µs after which a commit is forced, never below 1.
    pub fn max_interval(&self) -> u32 {
        self.max_interval.load(Ordering::Relaxed).max(1)
    }

    pub fn set_max_interval(&self, value: u32) {
        self.max_interval.store(value, Ordering::Relaxed);
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size.load(Ordering::Relaxed)
    }

    pub fn set_ring_size(&self, value: u32) {
        self.ring_size.store(value, Ordering::Relaxed);
    }

    pub fn blocking(&self) -> bool {
        self.blocking.load(Ordering::Relaxed)
    }

    pub fn set_blocking(&self, value: bool) {
        self.blocking.store(value, Ordering::Relaxed);
    }

    pub fn start_producers(&self) -> bool {
        self.start_producers.load(Ordering::Relaxed)
    }

    pub fn set_start_producers(&self, value: bool) {
        self.start_producers.store(value, Ordering::Relaxed);
    }

    pub fn stop_producers(&self) -> bool {
        self.stop_producers.load(Ordering::Relaxed)
    }

    pub fn set_stop_producers(&self, value: bool) {
        self.stop_producers.store(value, Ordering::Relaxed);
    }

    pub fn usb_buffer_number(&self) -> u32 {
        self.usb_buffer_number.load(Ordering::Relaxed)
    }

    pub fn set_usb_buffer_number(&self, value: u32) {
        self.usb_buffer_number.store(value, Ordering::Relaxed);
    }

    pub fn usb_buffer_size(&self) -> u32 {
        self.usb_buffer_size.load(Ordering::Relaxed)
    }

    pub fn set_usb_buffer_size(&self, value: u32) {
        self.usb_buffer_size.store(value, Ordering::Relaxed);
    }

    pub fn auto_exposure(&self) -> bool {
        self.auto_exposure.load(Ordering::Relaxed)
    }

    pub fn set_auto_exposure(&self, value: bool) {
        self.auto_exposure.store(value, Ordering::Relaxed);
    }

    /// Exposure in µs most recently sent to the hardware.
    pub fn last_exposure(&self) -> u32 {
        self.last_exposure.load(Ordering::Relaxed)
    }

    pub fn set_last_exposure(&self, value: u32) {
        self.last_exposure.store(value, Ordering::Relaxed);
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self::new(&AcquisitionConfig::default())
    }
}

fn validate_power_of_two(value: u32) -> Result<(), ValidationError> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(ValidationError::new("power_of_two"))
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Warning
}

/// Loadable acquisition configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Ring buffer capacity in containers (power of two).
    #[validate(custom(function = "validate_power_of_two"))]
    pub ring_buffer_size: u32,

    /// Whether data-get waits for data while acquisition runs.
    pub blocking: bool,

    /// Events per packet that force a commit; 0 disables the trigger.
    pub max_packet_size: u32,

    /// Microseconds after which a commit is forced.
    #[validate(range(min = 1))]
    pub max_interval_us: u32,

    pub auto_exposure: bool,

    #[serde(with = "log_level_name", default = "default_log_level")]
    pub log_level: LogLevel,

    #[validate(range(min = 1))]
    pub usb_buffer_number: u32,

    #[validate(range(min = 512))]
    pub usb_buffer_size: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 64,
            blocking: false,
            max_packet_size: 0,
            max_interval_us: 10_000,
            auto_exposure: false,
            log_level: default_log_level(),
            usb_buffer_number: 8,
            usb_buffer_size: 8192,
        }
    }
}

impl AcquisitionConfig {
    /// Validates and returns the config.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }
}

mod log_level_name {
    use crate::log::LogLevel;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(level: &LogLevel, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LogLevel, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
