//! Decoded event records.
//!
//! Every record carries a 32-bit in-epoch timestamp in microseconds and a
//! validity flag. The epoch itself lives in the packet header (`ts_overflow`).

/// Event packet types, numbered as on the wire of the device ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EventType {
    Special = 0,
    Polarity = 1,
    Frame = 2,
    Imu6 = 3,
    Sample = 5,
    Spike = 12,
}

impl EventType {
    /// Number of container slots.
    pub const COUNT: usize = 6;

    pub const ALL: [EventType; Self::COUNT] = [
        Self::Special,
        Self::Polarity,
        Self::Frame,
        Self::Imu6,
        Self::Sample,
        Self::Spike,
    ];

    /// Ecosystem-wide numeric type id.
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Dense container slot index.
    #[inline]
    pub fn slot(self) -> usize {
        match self {
            Self::Special => 0,
            Self::Polarity => 1,
            Self::Frame => 2,
            Self::Imu6 => 3,
            Self::Sample => 4,
            Self::Spike => 5,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Special => "special",
            Self::Polarity => "polarity",
            Self::Frame => "frame",
            Self::Imu6 => "imu6",
            Self::Sample => "sample",
            Self::Spike => "spike",
        }
    }
}

/// Sub-types of special events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpecialEventType {
    TimestampWrap = 0,
    TimestampReset = 1,
    ExternalInputRisingEdge = 2,
    ExternalInputFallingEdge = 3,
    ExternalInputPulse = 4,
    DvsRowOnly = 5,
    ExternalInput1RisingEdge = 6,
    ExternalInput1FallingEdge = 7,
    ExternalInput1Pulse = 8,
    ExternalInput2RisingEdge = 9,
    ExternalInput2FallingEdge = 10,
    ExternalInput2Pulse = 11,
    ExternalGeneratorRisingEdge = 12,
    ExternalGeneratorFallingEdge = 13,
    ApsFrameStart = 14,
    ApsFrameEnd = 15,
    ApsExposureStart = 16,
    ApsExposureEnd = 17,
}

/// Marker event: timestamp bookkeeping, external inputs, readout milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialEvent {
    pub timestamp: i32,
    pub kind: SpecialEventType,
    pub data: u32,
    pub valid: bool,
}

impl SpecialEvent {
    #[inline]
    pub fn new(kind: SpecialEventType, timestamp: i32) -> Self {
        Self::with_data(kind, timestamp, 0)
    }

    #[inline]
    pub fn with_data(kind: SpecialEventType, timestamp: i32, data: u32) -> Self {
        Self {
            timestamp,
            kind,
            data,
            valid: true,
        }
    }
}

/// A DVS brightness-change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolarityEvent {
    pub timestamp: i32,
    pub x: u16,
    pub y: u16,
    /// `true` for ON (brightness increase).
    pub polarity: bool,
    pub valid: bool,
}

impl PolarityEvent {
    #[inline]
    pub fn new(x: u16, y: u16, polarity: bool, timestamp: i32) -> Self {
        Self {
            timestamp,
            x,
            y,
            polarity,
            valid: true,
        }
    }
}

/// Color filter arrangement of a frame sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorFilter {
    #[default]
    Mono,
    Rgbg,
    Grgb,
    Gbgr,
    Bggr,
}

impl ColorFilter {
    pub fn from_register(value: u32) -> Self {
        match value {
            1 => Self::Rgbg,
            2 => Self::Grgb,
            3 => Self::Gbgr,
            4 => Self::Bggr,
            _ => Self::Mono,
        }
    }
}

/// One APS frame (or one ROI region of a readout), 16-bit normalized pixels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameEvent {
    pub ts_start_of_frame: i32,
    pub ts_end_of_frame: i32,
    pub ts_start_of_exposure: i32,
    pub ts_end_of_exposure: i32,
    pub roi_id: u8,
    pub color_filter: ColorFilter,
    pub length_x: u16,
    pub length_y: u16,
    pub position_x: u16,
    pub position_y: u16,
    /// Row-major, `length_x * length_y` values.
    pub pixels: Vec<u16>,
    pub valid: bool,
}

impl FrameEvent {
    /// Frames are stamped with their start of exposure.
    #[inline]
    pub fn timestamp(&self) -> i32 {
        self.ts_start_of_exposure
    }

    pub fn pixel(&self, x: u16, y: u16) -> Option<u16> {
        if x >= self.length_x || y >= self.length_y {
            return None;
        }
        self.pixels
            .get(usize::from(y) * usize::from(self.length_x) + usize::from(x))
            .copied()
    }

    pub fn exposure_duration(&self) -> i32 {
        self.ts_end_of_exposure - self.ts_start_of_exposure
    }
}

/// A 6-axis inertial sample: acceleration in g, rotation in °/s, temperature in °C.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Imu6Event {
    pub timestamp: i32,
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
    pub temp: f32,
    pub valid: bool,
}

/// A microphone sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEvent {
    pub timestamp: i32,
    /// Microphone channel.
    pub channel: u8,
    pub sample: i32,
    pub valid: bool,
}

impl SampleEvent {
    #[inline]
    pub fn new(channel: u8, sample: i32, timestamp: i32) -> Self {
        Self {
            timestamp,
            channel,
            sample,
            valid: true,
        }
    }
}

/// A neuron spike from a multi-core neuromorphic processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikeEvent {
    pub timestamp: i32,
    pub source_core_id: u8,
    pub chip_id: u8,
    pub neuron_id: u32,
    pub valid: bool,
}

impl SpikeEvent {
    #[inline]
    pub fn new(source_core_id: u8, chip_id: u8, neuron_id: u32, timestamp: i32) -> Self {
        Self {
            timestamp,
            source_core_id,
            chip_id,
            neuron_id,
            valid: true,
        }
    }
}
