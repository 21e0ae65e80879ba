//! Multi-core neuromorphic processor family: spike events.
//!
//! The source core of a spike is encoded in the event code itself, the chip
//! and neuron ids in the data bits.

use super::dvs::SPECIAL_TIMESTAMP_RESET;
use super::{DeviceFamily, SlotLayout, TranslateContext};
use crate::device::DeviceInfo;
use crate::device_log;
use crate::packet::PacketError;
use crate::parser;
use crate::types::{EventType, SpikeEvent};

#[derive(Debug, Default)]
pub struct DynapseFamily;

impl DeviceFamily for DynapseFamily {
    const NAME: &'static str = "dynapse";

    const LAYOUT: &'static [SlotLayout] = &[
        SlotLayout::new(EventType::Special, 1, 128),
        SlotLayout::new(EventType::Spike, 1, 4096),
    ];

    fn open(_info: &DeviceInfo) -> Self {
        Self
    }

    fn handle_event(
        &mut self,
        code: u8,
        data: u16,
        ctx: &mut TranslateContext,
    ) -> Result<(), PacketError> {
        if code == parser::CODE_SPECIAL {
            if data == SPECIAL_TIMESTAMP_RESET {
                ctx.timestamp_reset();
            } else {
                device_log!(ctx.diag(), Error, "Caught special event that can't be handled: {}.", data);
            }
            return Ok(());
        }

        match parser::spike_source_core(code) {
            Some(core) => {
                let event = SpikeEvent::new(
                    core,
                    parser::spike_chip_id(data),
                    parser::spike_neuron_id(data),
                    ctx.current(),
                );
                ctx.push(event)
            }
            None => {
                device_log!(ctx.diag(), Error, "Caught event that can't be handled: code {}.", code);
                Ok(())
            }
        }
    }
}
