//! Event packet containers and the commit policy that produces them.
//!
//! A commit moves every non-empty in-progress packet into one container and
//! hands it downstream. Commits fire on packet size, on elapsed logical time,
//! or are forced by a timestamp reset or big wrap.

use crate::config::AcquisitionSettings;
use crate::device_log;
use crate::log::Diagnostics;
use crate::packet::{Event, EventPacket, Packet};
use crate::timestamp::full_timestamp;
use crate::types::{EventType, SpecialEvent, SpecialEventType};
use std::sync::Arc;

/// One commit's worth of packets, at most one per event type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPacketContainer {
    packets: [Option<Packet>; EventType::COUNT],
}

impl EventPacketContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `packet` in its type's slot, returning what was there before.
    pub fn set_packet(&mut self, packet: Packet) -> Option<Packet> {
        let slot = packet.event_type().slot();
        self.packets[slot].replace(packet)
    }

    pub fn packet(&self, event_type: EventType) -> Option<&Packet> {
        self.packets[event_type.slot()].as_ref()
    }

    pub fn take_packet(&mut self, event_type: EventType) -> Option<Packet> {
        self.packets[event_type.slot()].take()
    }

    /// Typed access to the packet of event type `E`.
    pub fn get<E: Event>(&self) -> Option<&EventPacket<E>> {
        self.packet(E::TYPE).and_then(Packet::downcast_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.packets.iter().all(Option::is_none)
    }

    /// Number of packets present.
    pub fn packets_number(&self) -> usize {
        self.packets.iter().flatten().count()
    }

    /// Present packets in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter().flatten()
    }

    pub fn events_number(&self) -> usize {
        self.iter().map(Packet::count).sum()
    }

    pub fn valid_events_number(&self) -> usize {
        self.iter().map(Packet::valid_count).sum()
    }

    /// Earliest first-event timestamp across packets, epoch included.
    pub fn lowest_timestamp(&self) -> Option<i64> {
        self.iter()
            .filter_map(|p| p.first_timestamp().map(|ts| full_timestamp(p.ts_overflow(), ts)))
            .min()
    }

    /// Latest last-event timestamp across packets, epoch included.
    pub fn highest_timestamp(&self) -> Option<i64> {
        self.iter()
            .filter_map(|p| p.last_timestamp().map(|ts| full_timestamp(p.ts_overflow(), ts)))
            .max()
    }

    /// Container holding a single timestamp-reset event.
    pub fn timestamp_reset(event_source: i16, ts_overflow: i32) -> Self {
        let packet = EventPacket::single(
            SpecialEvent::new(SpecialEventType::TimestampReset, i32::MAX),
            event_source,
            ts_overflow,
        );

        let mut container = Self::new();
        container.set_packet(packet.into());
        container
    }

    /// Whether this container is exactly one timestamp-reset event.
    pub fn is_timestamp_reset(&self) -> bool {
        self.packets_number() == 1
            && self.get::<SpecialEvent>().is_some_and(|p| {
                p.count() == 1 && p.events()[0].kind == SpecialEventType::TimestampReset
            })
    }
}

/// Downstream receiver of committed containers.
pub trait ContainerSink {
    /// Single non-blocking attempt; a full sink hands the container back.
    fn put(&mut self, container: Box<EventPacketContainer>) -> Result<(), Box<EventPacketContainer>>;

    /// Retries until accepted or until acquisition stops. Returns whether it was accepted.
    fn put_force(&mut self, container: Box<EventPacketContainer>) -> bool;
}

/// Unbounded sink, useful for offline decoding.
impl ContainerSink for Vec<Box<EventPacketContainer>> {
    fn put(&mut self, container: Box<EventPacketContainer>) -> Result<(), Box<EventPacketContainer>> {
        self.push(container);
        Ok(())
    }

    fn put_force(&mut self, container: Box<EventPacketContainer>) -> bool {
        self.push(container);
        true
    }
}

/// Why a commit is happening. Any one flag is sufficient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitTrigger {
    pub size: bool,
    pub time: bool,
    pub reset: bool,
    pub big_wrap: bool,
}

impl CommitTrigger {
    #[inline]
    pub fn any(&self) -> bool {
        self.size || self.time || self.reset || self.big_wrap
    }

    #[inline]
    pub fn forced(&self) -> bool {
        self.reset || self.big_wrap
    }
}

/// What happened to the main container of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No packet had events; nothing was enqueued.
    Empty,
    Delivered,
    /// The sink was full and the container was discarded.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub delivered: u64,
    pub dropped: u64,
    pub empty: u64,
    pub resets_delivered: u64,
    pub resets_lost: u64,
}

/// Commit deadline bookkeeping and delivery policy.
#[derive(Debug)]
pub struct ContainerGenerator {
    settings: Arc<AcquisitionSettings>,
    /// Absolute logical time at which a time commit fires, -1 until first use.
    commit_deadline: i64,
    stats: ContainerStats,
}

impl ContainerGenerator {
    pub fn new(settings: Arc<AcquisitionSettings>) -> Self {
        Self {
            settings,
            commit_deadline: -1,
            stats: ContainerStats::default(),
        }
    }

    pub fn commit_deadline(&self) -> i64 {
        self.commit_deadline
    }

    pub fn stats(&self) -> ContainerStats {
        self.stats
    }

    /// Forgets the deadline; the next check re-arms it from the current time.
    pub fn reset_deadline(&mut self) {
        self.commit_deadline = -1;
    }

    fn interval(&self) -> i64 {
        i64::from(self.settings.max_interval())
    }

    /// Whether any of the given packet counts reached the size limit.
    pub fn size_reached(&self, mut counts: impl Iterator<Item = usize>) -> bool {
        let max = self.settings.max_packet_size() as usize;
        max > 0 && counts.any(|count| count >= max)
    }

    /// Whether logical time `now` reached the commit deadline, arming it on first use.
    pub fn deadline_elapsed(&mut self, now: i64) -> bool {
        if self.commit_deadline == -1 {
            self.commit_deadline = now + self.interval() - 1;
        }
        now >= self.commit_deadline
    }

    /// Moves the deadline forward by whole intervals until it lies beyond `now`.
    fn advance_deadline(&mut self, now: i64) {
        if now < self.commit_deadline {
            return;
        }
        let interval = self.interval();
        let periods = (now - self.commit_deadline) / interval + 1;
        self.commit_deadline += periods * interval;
    }

    /// Delivers one commit.
    ///
    /// `container` holds the packets moved out of the decoder. An empty one is
    /// discarded. A full sink drops it. A reset additionally sends its own
    /// reset-only container with a forced put.
    #[allow(clippy::too_many_arguments)]
    pub fn execute<S: ContainerSink + ?Sized>(
        &mut self,
        container: EventPacketContainer,
        trigger: CommitTrigger,
        ts_overflow: i32,
        ts_current: i32,
        event_source: i16,
        sink: &mut S,
        diag: &Diagnostics,
    ) -> CommitOutcome {
        if trigger.time {
            self.advance_deadline(full_timestamp(ts_overflow, ts_current));
        }

        let outcome = if container.is_empty() {
            self.stats.empty += 1;
            CommitOutcome::Empty
        } else {
            match sink.put(Box::new(container)) {
                Ok(()) => {
                    self.stats.delivered += 1;
                    CommitOutcome::Delivered
                }
                Err(_dropped) => {
                    device_log!(diag, Notice, "Dropped EventPacket Container because ring-buffer full!");
                    self.stats.dropped += 1;
                    CommitOutcome::Dropped
                }
            }
        };

        if trigger.reset {
            let reset = EventPacketContainer::timestamp_reset(event_source, ts_overflow);
            if sink.put_force(Box::new(reset)) {
                self.stats.resets_delivered += 1;
            } else {
                device_log!(diag, Notice, "Timestamp reset container lost, acquisition is stopping.");
                self.stats.resets_lost += 1;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogLevel;
    use crate::types::PolarityEvent;
    use tracing_test::traced_test;

    fn settings(max_packet_size: u32, max_interval: u32) -> Arc<AcquisitionSettings> {
        let settings = AcquisitionSettings::default();
        settings.set_max_packet_size(max_packet_size);
        settings.set_max_interval(max_interval);
        Arc::new(settings)
    }

    fn polarity_container(ts: &[i32]) -> EventPacketContainer {
        let mut packet = EventPacket::<PolarityEvent>::allocate(ts.len(), 1, 0).unwrap();
        for &t in ts {
            packet.push(PolarityEvent::new(1, 1, true, t)).unwrap();
        }
        let mut container = EventPacketContainer::new();
        container.set_packet(packet.into());
        container
    }

    /// Sink that accepts a fixed number of containers.
    struct BoundedSink {
        accepted: Vec<Box<EventPacketContainer>>,
        room: usize,
    }

    impl ContainerSink for BoundedSink {
        fn put(&mut self, c: Box<EventPacketContainer>) -> Result<(), Box<EventPacketContainer>> {
            if self.room == 0 {
                return Err(c);
            }
            self.room -= 1;
            self.accepted.push(c);
            Ok(())
        }

        fn put_force(&mut self, c: Box<EventPacketContainer>) -> bool {
            self.accepted.push(c);
            true
        }
    }

    #[test]
    fn test_deadline_armed_lazily() {
        let mut gen = ContainerGenerator::new(settings(0, 1000));
        assert_eq!(gen.commit_deadline(), -1);
        assert!(!gen.deadline_elapsed(100));
        assert_eq!(gen.commit_deadline(), 1099);
        assert!(gen.deadline_elapsed(1099));
    }

    #[test]
    fn test_deadline_skips_whole_intervals() {
        let diag = Diagnostics::new("test", LogLevel::Emergency);
        let mut gen = ContainerGenerator::new(settings(0, 1000));
        let mut sink: Vec<Box<EventPacketContainer>> = Vec::new();

        assert!(!gen.deadline_elapsed(0));
        assert!(gen.deadline_elapsed(5_500));
        let trigger = CommitTrigger {
            time: true,
            ..Default::default()
        };
        let outcome = gen.execute(EventPacketContainer::new(), trigger, 0, 5_500, 1, &mut sink, &diag);

        assert_eq!(outcome, CommitOutcome::Empty);
        assert!(sink.is_empty());
        assert_eq!(gen.commit_deadline(), 5_999);
        assert!(!gen.deadline_elapsed(5_998));
        assert!(gen.deadline_elapsed(5_999));
    }

    #[test]
    fn test_size_trigger() {
        let gen = ContainerGenerator::new(settings(3, 1000));
        assert!(!gen.size_reached([0, 2, 1].into_iter()));
        assert!(gen.size_reached([0, 3].into_iter()));

        let unlimited = ContainerGenerator::new(settings(0, 1000));
        assert!(!unlimited.size_reached([1_000_000].into_iter()));
    }

    #[traced_test]
    #[test]
    fn test_full_sink_drops_container() {
        let diag = Diagnostics::new("test", LogLevel::Notice);
        let mut gen = ContainerGenerator::new(settings(1, 1000));
        let mut sink = BoundedSink {
            accepted: Vec::new(),
            room: 0,
        };
        let trigger = CommitTrigger {
            size: true,
            ..Default::default()
        };

        let outcome = gen.execute(polarity_container(&[5]), trigger, 0, 5, 1, &mut sink, &diag);
        assert_eq!(outcome, CommitOutcome::Dropped);
        assert_eq!(gen.stats().dropped, 1);
        assert!(logs_contain("ring-buffer full"));
    }

    #[test]
    fn test_reset_sends_isolated_container_after_data() {
        let diag = Diagnostics::new("test", LogLevel::Emergency);
        let mut gen = ContainerGenerator::new(settings(0, 1000));
        // The forced put must succeed even though the regular put would not.
        let mut sink = BoundedSink {
            accepted: Vec::new(),
            room: 1,
        };
        let trigger = CommitTrigger {
            reset: true,
            ..Default::default()
        };

        gen.execute(polarity_container(&[100]), trigger, 0, 0, 1, &mut sink, &diag);

        assert_eq!(sink.accepted.len(), 2);
        assert!(sink.accepted[0].get::<PolarityEvent>().is_some());
        assert!(sink.accepted[1].is_timestamp_reset());
        let reset = sink.accepted[1].get::<SpecialEvent>().unwrap();
        assert_eq!(reset.events()[0].timestamp, i32::MAX);
        assert_eq!(gen.stats().resets_delivered, 1);
    }

    #[test]
    fn test_container_timestamps_span_epochs() {
        let mut container = polarity_container(&[10, 20]);
        let mut special = EventPacket::<SpecialEvent>::allocate(1, 1, 1).unwrap();
        special
            .push(SpecialEvent::new(SpecialEventType::ExternalInputPulse, 3))
            .unwrap();
        container.set_packet(special.into());

        assert_eq!(container.packets_number(), 2);
        assert_eq!(container.events_number(), 3);
        assert_eq!(container.lowest_timestamp(), Some(10));
        assert_eq!(container.highest_timestamp(), Some((1i64 << 31) | 3));
    }
}
