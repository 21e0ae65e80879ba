//! DVS address decoding, and the DVS128-class family built on it.
//!
//! Code 1 carries a row address, codes 2 and 3 a column address with OFF or
//! ON polarity. A row followed by another row without any column in between
//! is reported as a row-only event.

use super::{DeviceFamily, SlotLayout, TranslateContext};
use crate::chip::ChipProfile;
use crate::config::{ORIENTATION_FLIP_X, ORIENTATION_FLIP_Y, ORIENTATION_INVERT_XY};
use crate::device::DeviceInfo;
use crate::device_log;
use crate::packet::PacketError;
use crate::types::{EventType, PolarityEvent, SpecialEvent, SpecialEventType};
use std::sync::Arc;

/// Special codes shared by every family with a DVS array.
pub const SPECIAL_RESERVED: u16 = 0;
pub const SPECIAL_TIMESTAMP_RESET: u16 = 1;
pub const SPECIAL_EXTERNAL_FALLING: u16 = 2;
pub const SPECIAL_EXTERNAL_RISING: u16 = 3;
pub const SPECIAL_EXTERNAL_PULSE: u16 = 4;

/// Maps the external input codes 2-4.
pub fn external_input(data: u16) -> Option<SpecialEventType> {
    match data {
        SPECIAL_EXTERNAL_FALLING => Some(SpecialEventType::ExternalInputFallingEdge),
        SPECIAL_EXTERNAL_RISING => Some(SpecialEventType::ExternalInputRisingEdge),
        SPECIAL_EXTERNAL_PULSE => Some(SpecialEventType::ExternalInputPulse),
        _ => None,
    }
}

/// Row/column address state with the sensor's orientation applied.
#[derive(Debug)]
pub struct DvsAddressState {
    /// Sensor array size before any axis swap.
    columns: u16,
    rows: u16,
    invert_xy: bool,
    flip_x: bool,
    flip_y: bool,
    profile: Arc<dyn ChipProfile>,
    last_y: u16,
    got_y: bool,
}

impl DvsAddressState {
    pub fn new(info: &DeviceInfo) -> Self {
        let orientation = info.dvs_orientation;
        let invert_xy = orientation & ORIENTATION_INVERT_XY != 0;
        // The size registers report the output geometry.
        let (columns, rows) = if invert_xy {
            (info.dvs_size.1, info.dvs_size.0)
        } else {
            info.dvs_size
        };

        Self {
            columns,
            rows,
            invert_xy,
            flip_x: orientation & ORIENTATION_FLIP_X != 0,
            flip_y: orientation & ORIENTATION_FLIP_Y != 0,
            profile: Arc::clone(&info.profile),
            last_y: 0,
            got_y: false,
        }
    }

    /// Output geometry as (width, height).
    pub fn output_size(&self) -> (u16, u16) {
        if self.invert_xy {
            (self.rows, self.columns)
        } else {
            (self.columns, self.rows)
        }
    }

    /// Handles a row address word.
    pub fn row(&mut self, y: u16, ctx: &mut TranslateContext) -> Result<(), PacketError> {
        if y >= self.rows {
            device_log!(
                ctx.diag(),
                Alert,
                "DVS: Y address out of range (0-{}): {}.",
                self.rows.saturating_sub(1),
                y
            );
            return Ok(());
        }

        if self.got_y {
            let event = SpecialEvent::with_data(
                SpecialEventType::DvsRowOnly,
                ctx.current(),
                u32::from(self.last_y),
            );
            ctx.push(event)?;

            device_log!(ctx.diag(), Debug, "DVS: row-only event received for address Y={}.", self.last_y);
        }

        self.last_y = y;
        self.got_y = true;
        Ok(())
    }

    /// Handles a column address word, emitting one polarity event.
    pub fn column(&mut self, x: u16, on: bool, ctx: &mut TranslateContext) -> Result<(), PacketError> {
        if x >= self.columns {
            device_log!(
                ctx.diag(),
                Alert,
                "DVS: X address out of range (0-{}): {}.",
                self.columns.saturating_sub(1),
                x
            );
            return Ok(());
        }

        let polarity = on != self.profile.inverts_polarity(x);
        let (out_x, out_y) = self.transform(x, self.last_y);

        ctx.push(PolarityEvent::new(out_x, out_y, polarity, ctx.current()))?;
        self.got_y = false;
        Ok(())
    }

    #[inline]
    fn transform(&self, x: u16, y: u16) -> (u16, u16) {
        let x = if self.flip_x { self.columns - 1 - x } else { x };
        let y = if self.flip_y { self.rows - 1 - y } else { y };
        if self.invert_xy {
            (y, x)
        } else {
            (x, y)
        }
    }
}

/// DVS-only cameras: polarity events and external input markers.
#[derive(Debug)]
pub struct DvsFamily {
    address: DvsAddressState,
}

impl DeviceFamily for DvsFamily {
    const NAME: &'static str = "dvs";

    const LAYOUT: &'static [SlotLayout] = &[
        SlotLayout::new(EventType::Special, 1, 128),
        SlotLayout::new(EventType::Polarity, 1, 4096),
    ];

    fn open(info: &DeviceInfo) -> Self {
        Self {
            address: DvsAddressState::new(info),
        }
    }

    fn handle_event(
        &mut self,
        code: u8,
        data: u16,
        ctx: &mut TranslateContext,
    ) -> Result<(), PacketError> {
        match code {
            0 => match data {
                SPECIAL_RESERVED => {
                    device_log!(ctx.diag(), Error, "Caught special reserved event!");
                }
                SPECIAL_TIMESTAMP_RESET => ctx.timestamp_reset(),
                _ => match external_input(data) {
                    Some(kind) => ctx.push_special(kind)?,
                    None => {
                        device_log!(ctx.diag(), Error, "Caught special event that can't be handled: {}.", data);
                    }
                },
            },
            1 => self.address.row(data, ctx)?,
            2 | 3 => self.address.column(data, code == 3, ctx)?,
            _ => {
                device_log!(ctx.diag(), Error, "Caught event that can't be handled: code {}.", code);
            }
        }
        Ok(())
    }
}
