//! Byte-stream translation into event packets.
//!
//! [`Translator`] runs the parts every device family shares: word splitting,
//! timestamp reconstruction, lazy packet allocation and the commit checks.
//! Family-specific codes are handed to a [`DeviceFamily`] implementation.

pub mod davis;
pub mod dvs;
pub mod dynapse;

use crate::chip::ChipId;
use crate::config::AcquisitionSettings;
use crate::container::{
    CommitOutcome, CommitTrigger, ContainerGenerator, ContainerSink, ContainerStats,
    EventPacketContainer,
};
use crate::device::DeviceInfo;
use crate::device_log;
use crate::log::Diagnostics;
use crate::packet::{Event, EventPacket, Packet, PacketError};
use crate::parser;
use crate::timestamp::{TimestampReconstructor, WrapOutcome};
use crate::types::{EventType, SpecialEvent, SpecialEventType};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use davis::DavisFamily;
pub use dvs::DvsFamily;
pub use dynapse::DynapseFamily;

/// Allocation policy of one event type's packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub event_type: EventType,
    /// Free events guaranteed before each word is decoded.
    pub headroom: usize,
    pub initial_capacity: usize,
}

impl SlotLayout {
    pub const fn new(event_type: EventType, headroom: usize, initial_capacity: usize) -> Self {
        Self {
            event_type,
            headroom,
            initial_capacity,
        }
    }
}

/// Register write requested while decoding, sent after the current buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub module: i8,
    pub param: u8,
    pub value: u32,
}

/// Decoder of one device family's event codes.
pub trait DeviceFamily: Send + 'static {
    const NAME: &'static str;

    /// Packets this family can write to.
    const LAYOUT: &'static [SlotLayout];

    fn open(info: &DeviceInfo) -> Self
    where
        Self: Sized;

    /// Handles a word with event code 0..=6.
    fn handle_event(
        &mut self,
        code: u8,
        data: u16,
        ctx: &mut TranslateContext,
    ) -> Result<(), PacketError>;

    /// Called before a reset or big wrap commit; composite events in flight
    /// must be abandoned.
    fn on_forced_commit(&mut self) {}
}

/// The families a device can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FamilyKind {
    Dvs,
    Davis,
    Dynapse,
}

impl FamilyKind {
    pub fn from_chip(chip: ChipId) -> Self {
        match chip {
            ChipId::Dvs128 => Self::Dvs,
            ChipId::Dynapse => Self::Dynapse,
            _ => Self::Davis,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Dvs => DvsFamily::NAME,
            Self::Davis => DavisFamily::NAME,
            Self::Dynapse => DynapseFamily::NAME,
        }
    }
}

impl fmt::Display for FamilyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FamilyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dvs" => Ok(Self::Dvs),
            "davis" => Ok(Self::Davis),
            "dynapse" => Ok(Self::Dynapse),
            other => Err(format!("Unknown device family: {}", other)),
        }
    }
}

/// In-progress packets, at most one per event type.
#[derive(Debug)]
pub struct PacketSet {
    packets: [Option<Packet>; EventType::COUNT],
    event_source: i16,
}

impl PacketSet {
    pub fn new(event_source: i16) -> Self {
        Self {
            packets: Default::default(),
            event_source,
        }
    }

    /// Makes sure every packet in `layout` exists with its headroom free.
    ///
    /// An empty packet left over from before a big wrap is re-tagged with the
    /// current epoch.
    pub fn ensure_space(&mut self, layout: &[SlotLayout], ts_overflow: i32) -> Result<(), PacketError> {
        for slot in layout {
            let index = slot.event_type.slot();
            match self.packets[index].as_mut() {
                Some(packet) => {
                    if packet.is_empty() && packet.ts_overflow() != ts_overflow {
                        packet.set_ts_overflow(ts_overflow);
                    }
                    packet.ensure_space(slot.headroom)?;
                }
                None => {
                    let capacity = slot.initial_capacity.max(slot.headroom);
                    self.packets[index] = Some(Packet::allocate(
                        slot.event_type,
                        capacity,
                        self.event_source,
                        ts_overflow,
                    )?);
                }
            }
        }
        Ok(())
    }

    pub fn get<E: Event>(&self) -> Option<&EventPacket<E>> {
        self.packets[E::TYPE.slot()]
            .as_ref()
            .and_then(Packet::downcast_ref)
    }

    /// Appends an event to its packet, which must have been ensured.
    pub fn push<E: Event>(&mut self, event: E) -> Result<(), PacketError> {
        self.packets[E::TYPE.slot()]
            .as_mut()
            .and_then(Packet::downcast_mut::<E>)
            .ok_or(PacketError::Missing(E::TYPE))?
            .push(event)
    }

    pub fn counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.packets.iter().flatten().map(Packet::count)
    }

    /// Moves every non-empty packet into a container; empty ones stay for reuse.
    pub fn take_container(&mut self) -> EventPacketContainer {
        let mut container = EventPacketContainer::new();
        for slot in self.packets.iter_mut() {
            if slot.as_ref().is_some_and(|p| !p.is_empty()) {
                if let Some(packet) = slot.take() {
                    container.set_packet(packet);
                }
            }
        }
        container
    }
}

/// State shared by the generic translator and the family decoders.
#[derive(Debug)]
pub struct TranslateContext {
    timestamps: TimestampReconstructor,
    packets: PacketSet,
    generator: ContainerGenerator,
    settings: Arc<AcquisitionSettings>,
    diag: Arc<Diagnostics>,
    reset_pending: bool,
    register_writes: Vec<RegisterWrite>,
}

impl TranslateContext {
    fn new(event_source: i16, settings: Arc<AcquisitionSettings>, diag: Arc<Diagnostics>) -> Self {
        Self {
            timestamps: TimestampReconstructor::new(),
            packets: PacketSet::new(event_source),
            generator: ContainerGenerator::new(Arc::clone(&settings)),
            settings,
            diag,
            reset_pending: false,
            register_writes: Vec::new(),
        }
    }

    /// Current in-epoch timestamp.
    #[inline]
    pub fn current(&self) -> i32 {
        self.timestamps.current()
    }

    pub fn timestamps(&self) -> &TimestampReconstructor {
        &self.timestamps
    }

    pub fn diag(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    pub fn packets(&self) -> &PacketSet {
        &self.packets
    }

    #[inline]
    pub fn push<E: Event>(&mut self, event: E) -> Result<(), PacketError> {
        self.packets.push(event)
    }

    /// Pushes a special event stamped with the current time.
    #[inline]
    pub fn push_special(&mut self, kind: SpecialEventType) -> Result<(), PacketError> {
        let event = SpecialEvent::new(kind, self.current());
        self.packets.push(event)
    }

    /// Handles a hardware timestamp reset: the clock returns to zero and an
    /// isolated commit follows this word.
    pub fn timestamp_reset(&mut self) {
        self.timestamps.reset();
        self.generator.reset_deadline();
        self.reset_pending = true;

        device_log!(self.diag, Info, "Timestamp reset event received.");
    }

    /// Queues a register write for after the current buffer.
    pub fn request_write(&mut self, module: i8, param: u8, value: u32) {
        self.register_writes.push(RegisterWrite {
            module,
            param,
            value,
        });
    }
}

/// Byte-stream decoder of one device.
#[derive(Debug)]
pub struct Translator<F> {
    family: F,
    ctx: TranslateContext,
}

impl<F: DeviceFamily> Translator<F> {
    pub fn new(
        family: F,
        event_source: i16,
        settings: Arc<AcquisitionSettings>,
        diag: Arc<Diagnostics>,
    ) -> Self {
        Self {
            family,
            ctx: TranslateContext::new(event_source, settings, diag),
        }
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn context(&self) -> &TranslateContext {
        &self.ctx
    }

    pub fn stats(&self) -> ContainerStats {
        self.ctx.generator.stats()
    }

    /// Register writes requested since the last call.
    pub fn take_register_writes(&mut self) -> Vec<RegisterWrite> {
        std::mem::take(&mut self.ctx.register_writes)
    }

    /// Decodes one USB buffer, committing containers into `sink` as triggers fire.
    ///
    /// A trailing odd byte is dropped. An allocation failure abandons the rest
    /// of the buffer but keeps the decoder state for the next one.
    pub fn translate<S: ContainerSink + ?Sized>(
        &mut self,
        bytes: &[u8],
        sink: &mut S,
    ) -> Result<(), PacketError> {
        let usable = bytes.len() & !1;
        if usable != bytes.len() {
            device_log!(
                self.ctx.diag,
                Alert,
                "{} bytes received via USB, which is not a multiple of two. Truncating.",
                bytes.len()
            );
        }

        for offset in (0..usable).step_by(2) {
            let word = parser::read_word(bytes, offset);

            if let Err(e) = self
                .ctx
                .packets
                .ensure_space(F::LAYOUT, self.ctx.timestamps.wrap_overflow())
            {
                device_log!(self.ctx.diag, Critical, "Failed to allocate event packet: {}", e);
                return Err(e);
            }

            let big_wrap = match self.decode_word(word) {
                Ok(big_wrap) => big_wrap,
                Err(e) => {
                    device_log!(self.ctx.diag, Critical, "Failed to decode word {:#06x}: {}", word, e);
                    return Err(e);
                }
            };

            self.check_commit(big_wrap, sink);
        }

        Ok(())
    }

    /// Returns whether the word caused a big wrap.
    fn decode_word(&mut self, word: u16) -> Result<bool, PacketError> {
        if parser::is_timestamp(word) {
            self.ctx
                .timestamps
                .tick(parser::timestamp_value(word), &self.ctx.diag);
            return Ok(false);
        }

        let code = parser::event_code(word);
        let data = parser::event_data(word);

        if code == parser::CODE_WRAP {
            if self.ctx.timestamps.wrap(data, &self.ctx.diag) == WrapOutcome::BigWrap {
                // Sorts after every event of the closing epoch.
                let event = SpecialEvent::new(SpecialEventType::TimestampWrap, i32::MAX);
                self.ctx.packets.push(event)?;
                return Ok(true);
            }
            return Ok(false);
        }

        self.family.handle_event(code, data, &mut self.ctx)?;
        Ok(false)
    }

    fn check_commit<S: ContainerSink + ?Sized>(&mut self, big_wrap: bool, sink: &mut S) -> CommitOutcome {
        let ctx = &mut self.ctx;
        let now = ctx.timestamps.full();

        let trigger = CommitTrigger {
            size: ctx.generator.size_reached(ctx.packets.counts()),
            time: ctx.generator.deadline_elapsed(now),
            reset: std::mem::take(&mut ctx.reset_pending),
            big_wrap,
        };

        if !trigger.any() {
            return CommitOutcome::Empty;
        }

        if trigger.forced() {
            self.family.on_forced_commit();
        }

        let container = ctx.packets.take_container();
        ctx.generator.execute(
            container,
            trigger,
            ctx.timestamps.wrap_overflow(),
            ctx.timestamps.current(),
            ctx.packets.event_source,
            sink,
            &ctx.diag,
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::chip::{self, ChipId};
    use crate::log::LogLevel;
    use crate::transport::SysInfo;

    pub fn info(chip: ChipId) -> DeviceInfo {
        let profile = chip::profile(chip);
        let sysinfo = SysInfo {
            chip_identifier: chip.register_value(),
            dvs_size: profile.dvs_size(),
            aps_size: profile.aps_size(),
            ..Default::default()
        };
        DeviceInfo::from_sysinfo(1, &sysinfo, profile)
    }

    pub fn settings(max_packet_size: u32, max_interval: u32) -> Arc<AcquisitionSettings> {
        let settings = AcquisitionSettings::default();
        settings.set_max_packet_size(max_packet_size);
        settings.set_max_interval(max_interval);
        Arc::new(settings)
    }

    pub fn translator<F: DeviceFamily>(info: &DeviceInfo, settings: Arc<AcquisitionSettings>) -> Translator<F> {
        Translator::new(
            F::open(info),
            info.device_id,
            settings,
            Arc::new(Diagnostics::new("test", LogLevel::Debug)),
        )
    }
}
