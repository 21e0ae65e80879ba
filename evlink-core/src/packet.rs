//! Homogeneous, growable event packets.
//!
//! Capacity is managed explicitly: writers call [`EventPacket::ensure_space`]
//! before writing, and [`EventPacket::push`] refuses to go past capacity.
//! Growth doubles the capacity (or more, if the requested headroom needs it).

use crate::types::{
    EventType, FrameEvent, Imu6Event, PolarityEvent, SampleEvent, SpecialEvent, SpikeEvent,
};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Failed to allocate {event_type:?} packet of capacity {capacity}")]
    AllocationFailed {
        event_type: EventType,
        capacity: usize,
    },

    #[error("Failed to grow {event_type:?} packet from {from} to {to} events")]
    GrowFailed {
        event_type: EventType,
        from: usize,
        to: usize,
    },

    #[error("{event_type:?} packet is full ({capacity} events)")]
    CapacityExceeded {
        event_type: EventType,
        capacity: usize,
    },

    #[error("No {0:?} packet is allocated")]
    Missing(EventType),
}

/// Implemented by every event record type.
pub trait Event: Sized + Send + 'static {
    const TYPE: EventType;

    fn timestamp(&self) -> i32;

    fn is_valid(&self) -> bool;

    fn packet_ref(packet: &Packet) -> Option<&EventPacket<Self>>;

    fn packet_mut(packet: &mut Packet) -> Option<&mut EventPacket<Self>>;

    fn into_packet(packet: EventPacket<Self>) -> Packet;
}

/// Packet of events of one type from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPacket<E> {
    event_source: i16,
    ts_overflow: i32,
    capacity: usize,
    valid_count: usize,
    events: Vec<E>,
}

impl<E: Event> EventPacket<E> {
    /// Allocates a packet; a requested capacity of zero is raised to one.
    pub fn allocate(capacity: usize, event_source: i16, ts_overflow: i32) -> Result<Self, PacketError> {
        let capacity = capacity.max(1);
        let mut events = Vec::new();
        events
            .try_reserve_exact(capacity)
            .map_err(|_| PacketError::AllocationFailed {
                event_type: E::TYPE,
                capacity,
            })?;

        Ok(Self {
            event_source,
            ts_overflow,
            capacity,
            valid_count: 0,
            events,
        })
    }

    /// Packet holding exactly one event.
    pub fn single(event: E, event_source: i16, ts_overflow: i32) -> Self {
        Self {
            event_source,
            ts_overflow,
            capacity: 1,
            valid_count: usize::from(event.is_valid()),
            events: vec![event],
        }
    }

    pub fn event_type(&self) -> EventType {
        E::TYPE
    }

    pub fn event_source(&self) -> i16 {
        self.event_source
    }

    /// Size in bytes of one in-memory event record.
    pub fn event_size(&self) -> usize {
        std::mem::size_of::<E>()
    }

    pub fn ts_overflow(&self) -> i32 {
        self.ts_overflow
    }

    pub(crate) fn set_ts_overflow(&mut self, ts_overflow: i32) {
        self.ts_overflow = ts_overflow;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.events.len()
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[E] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.events.iter()
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.events.get(index)
    }

    pub fn last(&self) -> Option<&E> {
        self.events.last()
    }

    /// Makes room for `headroom` more events, doubling capacity if needed.
    pub fn ensure_space(&mut self, headroom: usize) -> Result<(), PacketError> {
        let needed = self.events.len() + headroom;
        if needed <= self.capacity {
            return Ok(());
        }

        let target = (self.capacity * 2).max(needed);
        self.grow(target)
    }

    /// Raises capacity to `new_capacity` events.
    pub fn grow(&mut self, new_capacity: usize) -> Result<(), PacketError> {
        if new_capacity <= self.capacity {
            return Ok(());
        }

        let additional = new_capacity - self.events.len();
        self.events
            .try_reserve_exact(additional)
            .map_err(|_| PacketError::GrowFailed {
                event_type: E::TYPE,
                from: self.capacity,
                to: new_capacity,
            })?;
        self.capacity = new_capacity;
        Ok(())
    }

    /// Appends an event; capacity must have been ensured beforehand.
    #[inline]
    pub fn push(&mut self, event: E) -> Result<(), PacketError> {
        if self.events.len() >= self.capacity {
            return Err(PacketError::CapacityExceeded {
                event_type: E::TYPE,
                capacity: self.capacity,
            });
        }

        if event.is_valid() {
            self.valid_count += 1;
        }
        self.events.push(event);
        Ok(())
    }

    /// Marks the event at `index` invalid.
    pub fn invalidate(&mut self, index: usize) -> bool
    where
        E: Invalidate,
    {
        match self.events.get_mut(index) {
            Some(event) if event.is_valid() => {
                event.invalidate();
                self.valid_count -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn into_events(self) -> Vec<E> {
        self.events
    }
}

/// Events whose validity flag can be cleared after the fact.
pub trait Invalidate {
    fn invalidate(&mut self);
}

macro_rules! impl_event {
    ($event:ty, $variant:ident, $ts:expr) => {
        impl Event for $event {
            const TYPE: EventType = EventType::$variant;

            #[inline]
            fn timestamp(&self) -> i32 {
                let ts: fn(&$event) -> i32 = $ts;
                ts(self)
            }

            #[inline]
            fn is_valid(&self) -> bool {
                self.valid
            }

            fn packet_ref(packet: &Packet) -> Option<&EventPacket<Self>> {
                match packet {
                    Packet::$variant(p) => Some(p),
                    _ => None,
                }
            }

            fn packet_mut(packet: &mut Packet) -> Option<&mut EventPacket<Self>> {
                match packet {
                    Packet::$variant(p) => Some(p),
                    _ => None,
                }
            }

            fn into_packet(packet: EventPacket<Self>) -> Packet {
                Packet::$variant(packet)
            }
        }

        impl Invalidate for $event {
            fn invalidate(&mut self) {
                self.valid = false;
            }
        }
    };
}

impl_event!(SpecialEvent, Special, |e| e.timestamp);
impl_event!(PolarityEvent, Polarity, |e| e.timestamp);
impl_event!(FrameEvent, Frame, |e| e.timestamp());
impl_event!(Imu6Event, Imu6, |e| e.timestamp);
impl_event!(SampleEvent, Sample, |e| e.timestamp);
impl_event!(SpikeEvent, Spike, |e| e.timestamp);

/// A packet of any event type.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Special(EventPacket<SpecialEvent>),
    Polarity(EventPacket<PolarityEvent>),
    Frame(EventPacket<FrameEvent>),
    Imu6(EventPacket<Imu6Event>),
    Sample(EventPacket<SampleEvent>),
    Spike(EventPacket<SpikeEvent>),
}

macro_rules! each_packet {
    ($packet:expr, $p:ident => $body:expr) => {
        match $packet {
            Packet::Special($p) => $body,
            Packet::Polarity($p) => $body,
            Packet::Frame($p) => $body,
            Packet::Imu6($p) => $body,
            Packet::Sample($p) => $body,
            Packet::Spike($p) => $body,
        }
    };
}

impl Packet {
    /// Allocates an empty packet of the given type.
    pub fn allocate(
        event_type: EventType,
        capacity: usize,
        event_source: i16,
        ts_overflow: i32,
    ) -> Result<Self, PacketError> {
        Ok(match event_type {
            EventType::Special => {
                Packet::Special(EventPacket::allocate(capacity, event_source, ts_overflow)?)
            }
            EventType::Polarity => {
                Packet::Polarity(EventPacket::allocate(capacity, event_source, ts_overflow)?)
            }
            EventType::Frame => {
                Packet::Frame(EventPacket::allocate(capacity, event_source, ts_overflow)?)
            }
            EventType::Imu6 => {
                Packet::Imu6(EventPacket::allocate(capacity, event_source, ts_overflow)?)
            }
            EventType::Sample => {
                Packet::Sample(EventPacket::allocate(capacity, event_source, ts_overflow)?)
            }
            EventType::Spike => {
                Packet::Spike(EventPacket::allocate(capacity, event_source, ts_overflow)?)
            }
        })
    }

    pub fn event_type(&self) -> EventType {
        each_packet!(self, p => p.event_type())
    }

    pub fn event_source(&self) -> i16 {
        each_packet!(self, p => p.event_source())
    }

    pub fn event_size(&self) -> usize {
        each_packet!(self, p => p.event_size())
    }

    pub fn ts_overflow(&self) -> i32 {
        each_packet!(self, p => p.ts_overflow())
    }

    pub(crate) fn set_ts_overflow(&mut self, ts_overflow: i32) {
        each_packet!(self, p => p.set_ts_overflow(ts_overflow))
    }

    pub fn capacity(&self) -> usize {
        each_packet!(self, p => p.capacity())
    }

    pub fn count(&self) -> usize {
        each_packet!(self, p => p.count())
    }

    pub fn valid_count(&self) -> usize {
        each_packet!(self, p => p.valid_count())
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn ensure_space(&mut self, headroom: usize) -> Result<(), PacketError> {
        each_packet!(self, p => p.ensure_space(headroom))
    }

    /// Timestamp of the first event, if any.
    pub fn first_timestamp(&self) -> Option<i32> {
        each_packet!(self, p => p.events().first().map(Event::timestamp))
    }

    /// Timestamp of the last event, if any.
    pub fn last_timestamp(&self) -> Option<i32> {
        each_packet!(self, p => p.last().map(Event::timestamp))
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&EventPacket<E>> {
        E::packet_ref(self)
    }

    pub fn downcast_mut<E: Event>(&mut self) -> Option<&mut EventPacket<E>> {
        E::packet_mut(self)
    }
}

impl<E: Event> From<EventPacket<E>> for Packet {
    fn from(packet: EventPacket<E>) -> Self {
        E::into_packet(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpecialEventType;

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let packet = EventPacket::<PolarityEvent>::allocate(0, 1, 0).unwrap();
        assert_eq!(packet.capacity(), 1);
        assert!(packet.is_empty());
    }

    #[test]
    fn test_push_refuses_past_capacity() {
        let mut packet = EventPacket::<PolarityEvent>::allocate(1, 1, 0).unwrap();
        packet.push(PolarityEvent::new(1, 2, true, 10)).unwrap();
        assert_eq!(
            packet.push(PolarityEvent::new(1, 2, true, 11)),
            Err(PacketError::CapacityExceeded {
                event_type: EventType::Polarity,
                capacity: 1
            })
        );
        assert_eq!(packet.count(), 1);
    }

    #[test]
    fn test_ensure_space_doubles() {
        let mut packet = EventPacket::<SpikeEvent>::allocate(4, 1, 0).unwrap();
        for i in 0..4 {
            packet.ensure_space(1).unwrap();
            packet.push(SpikeEvent::new(0, 0, i, i as i32)).unwrap();
        }
        assert_eq!(packet.capacity(), 4);

        packet.ensure_space(1).unwrap();
        assert_eq!(packet.capacity(), 8);
    }

    #[test]
    fn test_ensure_space_honours_headroom() {
        let mut packet = EventPacket::<FrameEvent>::allocate(1, 1, 0).unwrap();
        packet.ensure_space(4).unwrap();
        assert_eq!(packet.capacity(), 4);
        packet.ensure_space(4).unwrap();
        assert_eq!(packet.capacity(), 4);
    }

    #[test]
    fn test_valid_count_tracking() {
        let mut packet = EventPacket::<SpecialEvent>::allocate(4, 1, 0).unwrap();
        packet
            .push(SpecialEvent::new(SpecialEventType::ExternalInputPulse, 5))
            .unwrap();
        let mut invalid = SpecialEvent::new(SpecialEventType::DvsRowOnly, 6);
        invalid.valid = false;
        packet.push(invalid).unwrap();

        assert_eq!(packet.count(), 2);
        assert_eq!(packet.valid_count(), 1);
        assert!(packet.invalidate(0));
        assert!(!packet.invalidate(1));
        assert_eq!(packet.valid_count(), 0);
    }

    #[test]
    fn test_packet_enum_dispatch() {
        let mut packet = Packet::allocate(EventType::Spike, 2, 7, 3).unwrap();
        assert_eq!(packet.event_type(), EventType::Spike);
        assert_eq!(packet.event_source(), 7);
        assert_eq!(packet.ts_overflow(), 3);

        packet
            .downcast_mut::<SpikeEvent>()
            .unwrap()
            .push(SpikeEvent::new(1, 4, 200, 99))
            .unwrap();
        assert!(packet.downcast_ref::<PolarityEvent>().is_none());
        assert_eq!(packet.first_timestamp(), Some(99));
        assert_eq!(packet.count(), 1);
    }
}
