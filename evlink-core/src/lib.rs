//! Acquisition pipeline for USB-attached neuromorphic event sensors.
//!
//! The device streams little-endian 16-bit words. This crate turns them into
//! typed event packets, batches the packets into containers on size, time,
//! timestamp reset and big wrap, and hands the containers to a consumer
//! through a lock-free single-producer/single-consumer ring buffer.
//!
//! # Example
//!
//! ```no_run
//! use evlink_core::{AcquisitionConfig, ChipId, DeviceHandle, DvsFamily, MemoryRegisters, SysInfo};
//! use std::sync::Arc;
//!
//! let registers = Arc::new(MemoryRegisters::with_sysinfo(&SysInfo {
//!     chip_identifier: ChipId::Dvs128.register_value(),
//!     dvs_size: (128, 128),
//!     ..Default::default()
//! }));
//! let mut device: DeviceHandle<DvsFamily> =
//!     DeviceHandle::open(1, registers, &AcquisitionConfig::default()).unwrap();
//!
//! let mut acquisition = device.data_start().unwrap();
//! // Normally called from the USB thread for every transfer.
//! acquisition.on_bytes(&[0x64, 0x80]).unwrap();
//!
//! while let Some(container) = device.data_get() {
//!     println!("{} events", container.events_number());
//! }
//! device.close().unwrap();
//! ```
//!
//! # Device families
//!
//! - [`DvsFamily`]: polarity events and external input markers.
//! - [`DavisFamily`]: adds APS frames with ROI readout and auto exposure,
//!   IMU6 samples and microphone samples.
//! - [`DynapseFamily`]: neuron spikes.

pub mod autoexposure;
pub mod capture;
pub mod chip;
pub mod config;
pub mod container;
pub mod decoder;
pub mod device;
pub mod exchange;
pub mod log;
pub mod output;
pub mod packet;
pub mod parser;
pub mod ringbuffer;
pub mod timestamp;
pub mod transport;
pub mod types;

pub use capture::{CaptureError, CaptureHeader, CaptureReader};
pub use chip::{ChipId, ChipProfile};
pub use config::{AcquisitionConfig, AcquisitionSettings, ConfigError};
pub use container::{ContainerSink, ContainerStats, EventPacketContainer};
pub use decoder::{DavisFamily, DeviceFamily, DvsFamily, DynapseFamily, FamilyKind, Translator};
pub use device::{Acquisition, DeviceError, DeviceHandle, DeviceInfo};
pub use exchange::Notifications;
pub use log::{Diagnostics, LogLevel};
pub use output::{CsvWriter, EventRecord, OutputError, Summary};
pub use packet::{Event, EventPacket, Packet, PacketError};
pub use ringbuffer::RingBufferError;
pub use transport::{MemoryRegisters, RegisterTransport, SysInfo, TransportError};
pub use types::{
    EventType, FrameEvent, Imu6Event, PolarityEvent, SampleEvent, SpecialEvent, SpecialEventType,
    SpikeEvent,
};
