//! Flat views of decoded containers and writers for them.
//!
//! [`records_from_container`] turns a container into `(type, timestamp,
//! payload)` records in packet slot order. [`CsvWriter`] writes them one per
//! line, [`Summary`] counts them.

use crate::container::EventPacketContainer;
use crate::packet::{Event, EventPacket, Packet};
use crate::timestamp::full_timestamp;
use crate::types::{EventType, SpecialEventType};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type-specific content of one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Special {
        kind: SpecialEventType,
        data: u32,
    },
    Polarity {
        x: u16,
        y: u16,
        polarity: bool,
    },
    Frame {
        roi_id: u8,
        position_x: u16,
        position_y: u16,
        length_x: u16,
        length_y: u16,
        exposure: i32,
    },
    Imu6 {
        accel: [f32; 3],
        gyro: [f32; 3],
        temp: f32,
    },
    Sample {
        channel: u8,
        sample: i32,
    },
    Spike {
        source_core_id: u8,
        chip_id: u8,
        neuron_id: u32,
    },
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Special { kind, data } => write!(f, "{:?},{}", kind, data),
            Self::Polarity { x, y, polarity } => write!(f, "{},{},{}", x, y, u8::from(*polarity)),
            Self::Frame {
                roi_id,
                position_x,
                position_y,
                length_x,
                length_y,
                exposure,
            } => write!(
                f,
                "{},{},{},{},{},{}",
                roi_id, position_x, position_y, length_x, length_y, exposure
            ),
            Self::Imu6 { accel, gyro, temp } => write!(
                f,
                "{},{},{},{},{},{},{}",
                accel[0], accel[1], accel[2], gyro[0], gyro[1], gyro[2], temp
            ),
            Self::Sample { channel, sample } => write!(f, "{},{}", channel, sample),
            Self::Spike {
                source_core_id,
                chip_id,
                neuron_id,
            } => write!(f, "{},{},{}", source_core_id, chip_id, neuron_id),
        }
    }
}

/// One event with its epoch-aware timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_type: EventType,
    pub timestamp: i64,
    pub valid: bool,
    pub payload: Payload,
}

fn push_records<E: Event>(
    packet: &EventPacket<E>,
    payload: impl Fn(&E) -> Payload,
    out: &mut Vec<EventRecord>,
) {
    let ts_overflow = packet.ts_overflow();
    out.extend(packet.iter().map(|e| EventRecord {
        event_type: E::TYPE,
        timestamp: full_timestamp(ts_overflow, e.timestamp()),
        valid: e.is_valid(),
        payload: payload(e),
    }));
}

/// Flattens a container, packets in slot order, events in packet order.
pub fn records_from_container(container: &EventPacketContainer) -> Vec<EventRecord> {
    let mut records = Vec::with_capacity(container.events_number());
    for packet in container.iter() {
        match packet {
            Packet::Special(p) => push_records(
                p,
                |e| Payload::Special {
                    kind: e.kind,
                    data: e.data,
                },
                &mut records,
            ),
            Packet::Polarity(p) => push_records(
                p,
                |e| Payload::Polarity {
                    x: e.x,
                    y: e.y,
                    polarity: e.polarity,
                },
                &mut records,
            ),
            Packet::Frame(p) => push_records(
                p,
                |e| Payload::Frame {
                    roi_id: e.roi_id,
                    position_x: e.position_x,
                    position_y: e.position_y,
                    length_x: e.length_x,
                    length_y: e.length_y,
                    exposure: e.exposure_duration(),
                },
                &mut records,
            ),
            Packet::Imu6(p) => push_records(
                p,
                |e| Payload::Imu6 {
                    accel: [e.accel_x, e.accel_y, e.accel_z],
                    gyro: [e.gyro_x, e.gyro_y, e.gyro_z],
                    temp: e.temp,
                },
                &mut records,
            ),
            Packet::Sample(p) => push_records(
                p,
                |e| Payload::Sample {
                    channel: e.channel,
                    sample: e.sample,
                },
                &mut records,
            ),
            Packet::Spike(p) => push_records(
                p,
                |e| Payload::Spike {
                    source_core_id: e.source_core_id,
                    chip_id: e.chip_id,
                    neuron_id: e.neuron_id,
                },
                &mut records,
            ),
        }
    }
    records
}

/// CSV writer for event records: `type,timestamp,valid,payload...`.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
    written: u64,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    /// Writes the comment header, with the sensor geometry if known.
    pub fn write_header(&mut self, geometry: Option<(u16, u16)>) -> Result<(), OutputError> {
        if let Some((width, height)) = geometry {
            writeln!(self.writer, "%geometry:{},{}", width, height)?;
        }
        writeln!(self.writer, "%columns:type,timestamp,valid,payload")?;
        Ok(())
    }

    pub fn write_records(&mut self, records: &[EventRecord]) -> Result<(), OutputError> {
        for record in records {
            writeln!(
                self.writer,
                "{},{},{},{}",
                record.event_type.name(),
                record.timestamp,
                u8::from(record.valid),
                record.payload
            )?;
        }
        self.written += records.len() as u64;
        Ok(())
    }

    pub fn write_container(&mut self, container: &EventPacketContainer) -> Result<(), OutputError> {
        self.write_records(&records_from_container(container))
    }

    /// Records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the records of a sequence of containers to a CSV file.
pub fn write_csv<'a, P: AsRef<Path>>(
    path: P,
    containers: impl IntoIterator<Item = &'a EventPacketContainer>,
    geometry: Option<(u16, u16)>,
) -> Result<u64, OutputError> {
    let file = File::create(path)?;
    let mut writer = CsvWriter::new(file);
    writer.write_header(geometry)?;
    for container in containers {
        writer.write_container(container)?;
    }
    writer.flush()?;
    Ok(writer.written())
}

/// Per-type event counts over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub containers: u64,
    pub timestamp_resets: u64,
    pub events: [u64; EventType::COUNT],
    pub invalid: u64,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&mut self, container: &EventPacketContainer) {
        self.containers += 1;
        if container.is_timestamp_reset() {
            // Reset markers carry no real time.
            self.timestamp_resets += 1;
            return;
        }

        for packet in container.iter() {
            self.events[packet.event_type().slot()] += packet.count() as u64;
            self.invalid += (packet.count() - packet.valid_count()) as u64;
        }

        if let Some(low) = container.lowest_timestamp() {
            self.first_timestamp.get_or_insert(low);
        }
        if let Some(high) = container.highest_timestamp() {
            self.last_timestamp = Some(self.last_timestamp.map_or(high, |last| last.max(high)));
        }
    }

    pub fn count(&self, event_type: EventType) -> u64 {
        self.events[event_type.slot()]
    }

    pub fn total(&self) -> u64 {
        self.events.iter().sum()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Containers:       {}", self.containers)?;
        writeln!(f, "Timestamp resets: {}", self.timestamp_resets)?;
        for event_type in EventType::ALL {
            let count = self.count(event_type);
            if count > 0 {
                writeln!(f, "{:<17} {}", format!("{}:", event_type.name()), count)?;
            }
        }
        writeln!(f, "Invalid events:   {}", self.invalid)?;
        if let (Some(first), Some(last)) = (self.first_timestamp, self.last_timestamp) {
            writeln!(f, "Time span:        {} us", last - first)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FrameEvent, PolarityEvent, SpecialEvent};

    fn container() -> EventPacketContainer {
        let mut polarity = EventPacket::<PolarityEvent>::allocate(2, 1, 1).unwrap();
        polarity.push(PolarityEvent::new(5, 10, true, 100)).unwrap();
        polarity.push(PolarityEvent::new(6, 11, false, 120)).unwrap();

        let mut frames = EventPacket::<FrameEvent>::allocate(1, 1, 1).unwrap();
        frames
            .push(FrameEvent {
                ts_start_of_exposure: 90,
                ts_end_of_exposure: 110,
                length_x: 2,
                length_y: 2,
                pixels: vec![0; 4],
                valid: false,
                ..Default::default()
            })
            .unwrap();

        let mut container = EventPacketContainer::new();
        container.set_packet(polarity.into());
        container.set_packet(frames.into());
        container
    }

    #[test]
    fn test_records_carry_epoch() {
        let records = records_from_container(&container());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].event_type, EventType::Polarity);
        assert_eq!(records[0].timestamp, (1i64 << 31) | 100);
        assert_eq!(
            records[0].payload,
            Payload::Polarity {
                x: 5,
                y: 10,
                polarity: true
            }
        );
        assert_eq!(records[2].event_type, EventType::Frame);
        assert!(!records[2].valid);
    }

    #[test]
    fn test_csv_lines() {
        let mut output = Vec::new();
        {
            let mut writer = CsvWriter::new(&mut output);
            writer.write_header(Some((346, 260))).unwrap();
            writer.write_container(&container()).unwrap();
            writer.flush().unwrap();
            assert_eq!(writer.written(), 3);
        }

        let text = String::from_utf8(output).unwrap();
        let ts = (1i64 << 31) | 100;
        assert!(text.starts_with("%geometry:346,260\n"));
        assert!(text.contains(&format!("polarity,{},1,5,10,1", ts)));
        assert!(text.contains(&format!("frame,{},0,0,0,0,2,2,20", (1i64 << 31) | 90)));
    }

    #[test]
    fn test_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let written = write_csv(&path, [&container()], None).unwrap();
        assert_eq!(written, 3);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = Summary::new();
        summary.add_container(&container());
        summary.add_container(&EventPacketContainer::timestamp_reset(1, 1));

        assert_eq!(summary.containers, 2);
        assert_eq!(summary.timestamp_resets, 1);
        assert_eq!(summary.count(EventType::Polarity), 2);
        assert_eq!(summary.count(EventType::Frame), 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.first_timestamp, Some((1i64 << 31) | 90));
        assert_eq!(summary.last_timestamp, Some((1i64 << 31) | 120));
        assert_eq!(summary.count(EventType::Special), 0);

        let special = SpecialEvent::new(SpecialEventType::ExternalInputPulse, 5);
        assert_eq!(
            format!("{}", Payload::Special { kind: special.kind, data: 0 }),
            "ExternalInputPulse,0"
        );
    }
}
