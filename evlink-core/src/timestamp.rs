//! Reconstruction of the 64-bit logical clock from 15-bit hardware ticks.
//!
//! The device sends the low 15 bits of its microsecond counter as tick words
//! and periodically a wrap word carrying how many 2^15 µs periods passed.
//! Within one epoch timestamps fit in 31 bits; when the accumulated wrap base
//! would exceed that, a new epoch starts ("big wrap").

use crate::device_log;
use crate::log::Diagnostics;

/// Length of one wrap period in µs.
pub const TS_WRAP_ADD: i64 = 0x8000;

/// Combines an epoch counter and an in-epoch timestamp into one logical time.
#[inline]
pub fn full_timestamp(wrap_overflow: i32, current: i32) -> i64 {
    (i64::from(wrap_overflow) << 31) | i64::from(current)
}

/// What a wrap word did to the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapOutcome {
    /// The wrap base grew within the current epoch.
    Advanced,
    /// The epoch counter was incremented; pending events must be committed.
    BigWrap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampReconstructor {
    wrap_overflow: i32,
    wrap_add: i32,
    last: i32,
    current: i32,
}

impl TimestampReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrap_overflow(&self) -> i32 {
        self.wrap_overflow
    }

    pub fn wrap_add(&self) -> i32 {
        self.wrap_add
    }

    pub fn last(&self) -> i32 {
        self.last
    }

    pub fn current(&self) -> i32 {
        self.current
    }

    #[inline]
    pub fn full(&self) -> i64 {
        full_timestamp(self.wrap_overflow, self.current)
    }

    /// Applies a tick word's 15-bit value.
    #[inline]
    pub fn tick(&mut self, ts_data: u16, diag: &Diagnostics) {
        self.last = self.current;
        self.current = self.wrap_add + i32::from(ts_data & 0x7FFF);
        self.check_monotonic(diag);
    }

    /// Applies a wrap word carrying `wrap_data` wrap periods.
    pub fn wrap(&mut self, wrap_data: u16, diag: &Diagnostics) -> WrapOutcome {
        let wrap_jump = TS_WRAP_ADD * i64::from(wrap_data);
        let wrap_sum = i64::from(self.wrap_add) + wrap_jump;

        if wrap_sum > i64::from(i32::MAX) {
            // The remainder is below 2^31 since a single jump is at most 4095 * 2^15.
            let remainder = wrap_sum - i64::from(i32::MAX) - 1;
            self.wrap_add = remainder as i32;
            self.last = 0;
            self.current = self.wrap_add;
            self.wrap_overflow += 1;

            device_log!(
                diag,
                Debug,
                "Timestamp big wrap detected, epoch is now {}.",
                self.wrap_overflow
            );
            WrapOutcome::BigWrap
        } else {
            self.wrap_add = wrap_sum as i32;
            self.last = self.current;
            self.current = self.wrap_add;
            self.check_monotonic(diag);
            WrapOutcome::Advanced
        }
    }

    /// Returns the clock to zero after a hardware timestamp reset.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    fn check_monotonic(&self, diag: &Diagnostics) {
        if self.current <= self.last {
            device_log!(
                diag,
                Alert,
                "Timestamps: non strictly-monotonic timestamp detected: last={}, current={}, difference={}.",
                self.last,
                self.current,
                i64::from(self.last) - i64::from(self.current)
            );
        }
    }
}
