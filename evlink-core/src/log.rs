//! Per-device diagnostics context.
//!
//! Each device handle owns its own [`Diagnostics`], so two devices opened in
//! the same process can log at different levels. Records that pass the
//! device's level are forwarded to `tracing` with the device string attached.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Severity levels used by the device protocol, lowest number is most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl LogLevel {
    /// Converts a raw level, clamping anything above `Debug` to `Debug`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Info,
            _ => Self::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "EMERGENCY",
            Self::Alert => "ALERT",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emergency" => Ok(Self::Emergency),
            "alert" => Ok(Self::Alert),
            "critical" => Ok(Self::Critical),
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "notice" => Ok(Self::Notice),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("Unknown log level: {}", other)),
        }
    }
}

/// Logging context of one device.
#[derive(Debug)]
pub struct Diagnostics {
    device: String,
    level: AtomicU8,
}

impl Diagnostics {
    pub fn new(device: impl Into<String>, level: LogLevel) -> Self {
        Self {
            device: device.into(),
            level: AtomicU8::new(level as u8),
        }
    }

    /// Device description attached to every record.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        (level as u8) <= self.level.load(Ordering::Relaxed)
    }

    /// Emits a record if `level` passes this device's threshold.
    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }

        let device = self.device.as_str();
        let severity = level.as_str();
        match level {
            LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical | LogLevel::Error => {
                tracing::error!(device, severity, "{}", args)
            }
            LogLevel::Warning => tracing::warn!(device, severity, "{}", args),
            LogLevel::Notice | LogLevel::Info => tracing::info!(device, severity, "{}", args),
            LogLevel::Debug => tracing::debug!(device, severity, "{}", args),
        }
    }
}

/// Logs through a [`Diagnostics`] context: `device_log!(diag, Alert, "x={}", x)`.
#[macro_export]
macro_rules! device_log {
    ($diag:expr, $level:ident, $($arg:tt)+) => {
        $diag.log($crate::log::LogLevel::$level, format_args!($($arg)+))
    };
}
