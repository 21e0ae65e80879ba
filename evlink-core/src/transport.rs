//! Register access to the device.
//!
//! The USB control path is an external collaborator; the core only needs to
//! read and write `(module, parameter) -> u32` registers. [`MemoryRegisters`]
//! is an in-memory implementation used for replaying captures and in tests.

use crate::config::{
    APS_COLOR_FILTER, APS_ORIENTATION_INFO, APS_RESET_READ, APS_SIZE_COLUMNS, APS_SIZE_ROWS,
    DVS_ORIENTATION_INFO, DVS_SIZE_COLUMNS, DVS_SIZE_ROWS, IMU_ORIENTATION_INFO, MODULE_APS,
    MODULE_DVS, MODULE_IMU, MODULE_SYSINFO, SYSINFO_CHIP_IDENTIFIER, SYSINFO_DEVICE_IS_MASTER,
    SYSINFO_LOGIC_VERSION,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Register {param} of module {module} is not readable")]
    NotReadable { module: i8, param: u8 },

    #[error("Register {param} of module {module} is not writable")]
    NotWritable { module: i8, param: u8 },

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// Completion callback of an asynchronous register write.
pub type WriteDone = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

/// Synchronous and asynchronous register access.
pub trait RegisterTransport: Send + Sync {
    fn read(&self, module: i8, param: u8) -> Result<u32, TransportError>;

    fn write(&self, module: i8, param: u8, value: u32) -> Result<(), TransportError>;

    /// Queues a write without waiting for it.
    ///
    /// With a callback, the outcome of the write goes to `done` and the return
    /// value only reports whether it could be queued. The default writes
    /// synchronously.
    fn write_async(
        &self,
        module: i8,
        param: u8,
        value: u32,
        done: Option<WriteDone>,
    ) -> Result<(), TransportError> {
        let result = self.write(module, param, value);
        match done {
            Some(done) => {
                done(result);
                Ok(())
            }
            None => result,
        }
    }
}

/// Register values a device reports about itself at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysInfo {
    pub chip_identifier: u32,
    pub logic_version: u32,
    pub device_is_master: bool,
    pub dvs_size: (u16, u16),
    pub dvs_orientation: u32,
    pub aps_size: (u16, u16),
    pub aps_orientation: u32,
    pub aps_color_filter: u32,
    pub aps_has_reset_read: bool,
    pub imu_orientation: u32,
}

impl Default for SysInfo {
    fn default() -> Self {
        Self {
            chip_identifier: 0,
            logic_version: 1,
            device_is_master: true,
            dvs_size: (0, 0),
            dvs_orientation: 0,
            aps_size: (0, 0),
            aps_orientation: 0,
            aps_color_filter: 0,
            aps_has_reset_read: true,
            imu_orientation: 0,
        }
    }
}

/// Register map held in memory.
#[derive(Debug, Default)]
pub struct MemoryRegisters {
    registers: Mutex<HashMap<(i8, u8), u32>>,
    writes: Mutex<Vec<(i8, u8, u32)>>,
}

impl MemoryRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register map preset with the system-information block.
    pub fn with_sysinfo(info: &SysInfo) -> Self {
        let regs = Self::new();
        regs.preset(MODULE_SYSINFO, SYSINFO_CHIP_IDENTIFIER, info.chip_identifier);
        regs.preset(MODULE_SYSINFO, SYSINFO_LOGIC_VERSION, info.logic_version);
        regs.preset(MODULE_SYSINFO, SYSINFO_DEVICE_IS_MASTER, u32::from(info.device_is_master));
        regs.preset(MODULE_DVS, DVS_SIZE_COLUMNS, u32::from(info.dvs_size.0));
        regs.preset(MODULE_DVS, DVS_SIZE_ROWS, u32::from(info.dvs_size.1));
        regs.preset(MODULE_DVS, DVS_ORIENTATION_INFO, info.dvs_orientation);
        regs.preset(MODULE_APS, APS_SIZE_COLUMNS, u32::from(info.aps_size.0));
        regs.preset(MODULE_APS, APS_SIZE_ROWS, u32::from(info.aps_size.1));
        regs.preset(MODULE_APS, APS_ORIENTATION_INFO, info.aps_orientation);
        regs.preset(MODULE_APS, APS_COLOR_FILTER, info.aps_color_filter);
        regs.preset(MODULE_APS, APS_RESET_READ, u32::from(info.aps_has_reset_read));
        regs.preset(MODULE_IMU, IMU_ORIENTATION_INFO, info.imu_orientation);
        regs
    }

    /// Sets a register without recording a write.
    pub fn preset(&self, module: i8, param: u8, value: u32) {
        self.registers.lock().insert((module, param), value);
    }

    /// Every write seen so far, in order.
    pub fn write_log(&self) -> Vec<(i8, u8, u32)> {
        self.writes.lock().clone()
    }

    /// Latest value written to a register, if any.
    pub fn last_write(&self, module: i8, param: u8) -> Option<u32> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(m, p, _)| *m == module && *p == param)
            .map(|(_, _, v)| *v)
    }
}

impl RegisterTransport for MemoryRegisters {
    fn read(&self, module: i8, param: u8) -> Result<u32, TransportError> {
        self.registers
            .lock()
            .get(&(module, param))
            .copied()
            .ok_or(TransportError::NotReadable { module, param })
    }

    fn write(&self, module: i8, param: u8, value: u32) -> Result<(), TransportError> {
        if module < 0 {
            return Err(TransportError::NotWritable { module, param });
        }
        self.registers.lock().insert((module, param), value);
        self.writes.lock().push((module, param, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_sysinfo_preset_is_readable() {
        let info = SysInfo {
            chip_identifier: 3,
            dvs_size: (240, 180),
            ..Default::default()
        };
        let regs = MemoryRegisters::with_sysinfo(&info);
        assert_eq!(regs.read(MODULE_SYSINFO, SYSINFO_CHIP_IDENTIFIER), Ok(3));
        assert_eq!(regs.read(MODULE_DVS, DVS_SIZE_ROWS), Ok(180));
        assert!(regs.write_log().is_empty());
    }

    #[test]
    fn test_unknown_register_not_readable() {
        let regs = MemoryRegisters::new();
        assert_eq!(
            regs.read(5, 9),
            Err(TransportError::NotReadable { module: 5, param: 9 })
        );
    }

    #[test]
    fn test_write_async_runs_callback() {
        let regs = MemoryRegisters::new();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        regs.write_async(
            MODULE_APS,
            12,
            4000,
            Some(Box::new(move |result| {
                assert!(result.is_ok());
                flag.store(true, Ordering::SeqCst);
            })),
        )
        .unwrap();

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(regs.last_write(MODULE_APS, 12), Some(4000));
    }

    #[test]
    fn test_host_modules_not_writable() {
        let regs = MemoryRegisters::new();
        assert!(regs.write(-2, 0, 1).is_err());
    }
}
