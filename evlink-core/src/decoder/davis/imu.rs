//! IMU6 sample assembly.
//!
//! A sample arrives as IMU start, the scale configuration, fourteen data
//! bytes (accelerometer X/Y/Z, temperature, gyroscope X/Y/Z as big-endian
//! pairs) and IMU end.

use super::super::TranslateContext;
use super::frame::StagingState;
use crate::config::{ORIENTATION_FLIP_X, ORIENTATION_FLIP_Y, ORIENTATION_FLIP_Z};
use crate::device_log;
use crate::packet::PacketError;
use crate::types::Imu6Event;

/// Parts of a complete sample: the scale configuration plus fourteen bytes.
pub const IMU_TOTAL_COUNT: u8 = 15;
const IMU_DATA_BYTES: u8 = 14;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImuOrientation {
    pub flip_x: bool,
    pub flip_y: bool,
    pub flip_z: bool,
}

impl ImuOrientation {
    pub fn from_register(value: u32) -> Self {
        Self {
            flip_x: value & ORIENTATION_FLIP_X != 0,
            flip_y: value & ORIENTATION_FLIP_Y != 0,
            flip_z: value & ORIENTATION_FLIP_Z != 0,
        }
    }
}

/// LSB per g for an accelerometer scale setting.
#[inline]
pub fn accel_lsb_per_g(scale: u8) -> f32 {
    f32::from(16384u16 >> scale)
}

/// LSB per °/s for a gyroscope scale setting.
#[inline]
pub fn gyro_lsb_per_dps(scale: u8) -> f32 {
    131.0 / f32::from(1u16 << scale)
}

#[derive(Debug)]
pub struct ImuStaging {
    state: StagingState,
    ignore: bool,
    orientation: ImuOrientation,
    count: u8,
    bytes: u8,
    high: u8,
    accel_scale: f32,
    gyro_scale: f32,
    event: Imu6Event,
}

impl ImuStaging {
    pub fn new(orientation: ImuOrientation) -> Self {
        Self {
            state: StagingState::Idle,
            ignore: false,
            orientation,
            count: 0,
            bytes: 0,
            high: 0,
            accel_scale: accel_lsb_per_g(0),
            gyro_scale: gyro_lsb_per_dps(0),
            event: Imu6Event::default(),
        }
    }

    pub fn state(&self) -> StagingState {
        self.state
    }

    #[inline]
    fn active(&self) -> bool {
        self.state == StagingState::Accumulating && !self.ignore
    }

    pub fn abandon(&mut self) {
        self.ignore = true;
    }

    pub fn start(&mut self) {
        self.state = StagingState::Accumulating;
        self.ignore = false;
        self.count = 0;
        self.bytes = 0;
        self.event = Imu6Event::default();
    }

    pub fn scale_config(&mut self, accel: u8, gyro: u8) {
        if !self.active() {
            return;
        }
        self.accel_scale = accel_lsb_per_g(accel);
        self.gyro_scale = gyro_lsb_per_dps(gyro);
        self.count += 1;
    }

    pub fn data_byte(&mut self, byte: u8, ctx: &TranslateContext) {
        if !self.active() {
            return;
        }
        if self.bytes >= IMU_DATA_BYTES {
            device_log!(ctx.diag(), Error, "IMU: too many data bytes, dropping sample.");
            self.ignore = true;
            return;
        }

        let index = self.bytes;
        self.bytes += 1;
        self.count += 1;

        if index % 2 == 0 {
            self.high = byte;
            return;
        }

        let raw = f32::from(i16::from_be_bytes([self.high, byte]));
        let event = &mut self.event;
        match index / 2 {
            0 => event.accel_x = raw / self.accel_scale,
            1 => event.accel_y = raw / self.accel_scale,
            2 => event.accel_z = raw / self.accel_scale,
            3 => event.temp = raw / 340.0 + 36.53,
            4 => event.gyro_x = raw / self.gyro_scale,
            5 => event.gyro_y = raw / self.gyro_scale,
            _ => event.gyro_z = raw / self.gyro_scale,
        }
    }

    /// Writes the sample out if it is complete.
    pub fn end(&mut self, ctx: &mut TranslateContext) -> Result<(), PacketError> {
        if !self.active() {
            self.state = StagingState::Idle;
            return Ok(());
        }

        if self.count != IMU_TOTAL_COUNT {
            device_log!(
                ctx.diag(),
                Error,
                "IMU: wrong number of parts ({}), expected {}. Dropping sample.",
                self.count,
                IMU_TOTAL_COUNT
            );
            self.state = StagingState::Idle;
            return Ok(());
        }

        self.state = StagingState::Ready;
        let mut event = self.event;
        if self.orientation.flip_x {
            event.accel_x = -event.accel_x;
            event.gyro_x = -event.gyro_x;
        }
        if self.orientation.flip_y {
            event.accel_y = -event.accel_y;
            event.gyro_y = -event.gyro_y;
        }
        if self.orientation.flip_z {
            event.accel_z = -event.accel_z;
            event.gyro_z = -event.gyro_z;
        }
        event.timestamp = ctx.current();
        event.valid = true;

        ctx.push(event)?;
        self.state = StagingState::Idle;
        Ok(())
    }
}
