//! Chip capabilities, selected once at device open.
//!
//! The decoders ask a [`ChipProfile`] for geometry, ADC depth and readout
//! quirks instead of branching on the chip identifier.

use crate::types::ColorFilter;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Chips known to the decoders, numbered as the chip-identifier register reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipId {
    Davis240A,
    Davis240B,
    Davis240C,
    Davis128,
    Davis346,
    Davis640,
    DavisRgb,
    Davis208,
    Dvs128,
    Dynapse,
}

impl ChipId {
    pub const ALL: [ChipId; 10] = [
        Self::Davis240A,
        Self::Davis240B,
        Self::Davis240C,
        Self::Davis128,
        Self::Davis346,
        Self::Davis640,
        Self::DavisRgb,
        Self::Davis208,
        Self::Dvs128,
        Self::Dynapse,
    ];

    pub fn from_register(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Davis240A),
            1 => Some(Self::Davis240B),
            2 => Some(Self::Davis240C),
            3 => Some(Self::Davis128),
            5 => Some(Self::Davis346),
            6 => Some(Self::Davis640),
            7 => Some(Self::DavisRgb),
            8 => Some(Self::Davis208),
            50 => Some(Self::Dvs128),
            64 => Some(Self::Dynapse),
            _ => None,
        }
    }

    pub fn register_value(self) -> u32 {
        match self {
            Self::Davis240A => 0,
            Self::Davis240B => 1,
            Self::Davis240C => 2,
            Self::Davis128 => 3,
            Self::Davis346 => 5,
            Self::Davis640 => 6,
            Self::DavisRgb => 7,
            Self::Davis208 => 8,
            Self::Dvs128 => 50,
            Self::Dynapse => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Davis240A => "davis240a",
            Self::Davis240B => "davis240b",
            Self::Davis240C => "davis240c",
            Self::Davis128 => "davis128",
            Self::Davis346 => "davis346",
            Self::Davis640 => "davis640",
            Self::DavisRgb => "davisrgb",
            Self::Davis208 => "davis208",
            Self::Dvs128 => "dvs128",
            Self::Dynapse => "dynapse",
        }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChipId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|chip| chip.name() == wanted)
            .ok_or_else(|| format!("Unknown chip: {}", s))
    }
}

/// Bias generator arrangement of a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasLayout {
    /// DVS128 style 24-bit current biases.
    Dvs128,
    /// Coarse/fine biases of the DAVIS240 generation.
    Davis240,
    /// Coarse/fine plus shifted-source biases of later DAVIS chips.
    DavisShifted,
    /// Per-core bias groups of the neuromorphic processor.
    Dynapse,
}

pub trait ChipProfile: Send + Sync + fmt::Debug {
    fn chip_id(&self) -> ChipId;

    /// DVS array size as (columns, rows).
    fn dvs_size(&self) -> (u16, u16);

    /// APS array size as (columns, rows), zero for chips without frames.
    fn aps_size(&self) -> (u16, u16);

    /// Bits per APS ADC sample.
    fn adc_depth(&self) -> u8;

    /// Whether the APS supports four independent ROI regions.
    fn has_quad_roi(&self) -> bool;

    /// Whether a column is read as even rows followed by odd rows.
    fn interleaved_readout(&self) -> bool;

    /// Whether the polarity bit is inverted for the given column.
    fn inverts_polarity(&self, x: u16) -> bool;

    fn color_filter(&self) -> ColorFilter;

    fn bias_layout(&self) -> BiasLayout;

    fn has_imu(&self) -> bool;

    fn has_microphone(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct StaticProfile {
    chip: ChipId,
    dvs: (u16, u16),
    aps: (u16, u16),
    adc_depth: u8,
    quad_roi: bool,
    interleaved: bool,
    /// Columns below this value see an inverted polarity bit.
    inverted_below: u16,
    color: ColorFilter,
    bias: BiasLayout,
    imu: bool,
    microphone: bool,
}

impl ChipProfile for StaticProfile {
    fn chip_id(&self) -> ChipId {
        self.chip
    }

    fn dvs_size(&self) -> (u16, u16) {
        self.dvs
    }

    fn aps_size(&self) -> (u16, u16) {
        self.aps
    }

    fn adc_depth(&self) -> u8 {
        self.adc_depth
    }

    fn has_quad_roi(&self) -> bool {
        self.quad_roi
    }

    fn interleaved_readout(&self) -> bool {
        self.interleaved
    }

    fn inverts_polarity(&self, x: u16) -> bool {
        x < self.inverted_below
    }

    fn color_filter(&self) -> ColorFilter {
        self.color
    }

    fn bias_layout(&self) -> BiasLayout {
        self.bias
    }

    fn has_imu(&self) -> bool {
        self.imu
    }

    fn has_microphone(&self) -> bool {
        self.microphone
    }
}

const fn davis(chip: ChipId, size: (u16, u16), bias: BiasLayout) -> StaticProfile {
    StaticProfile {
        chip,
        dvs: size,
        aps: size,
        adc_depth: 10,
        quad_roi: false,
        interleaved: false,
        inverted_below: 0,
        color: ColorFilter::Mono,
        bias,
        imu: true,
        microphone: false,
    }
}

fn static_profile(chip: ChipId) -> StaticProfile {
    match chip {
        ChipId::Dvs128 => StaticProfile {
            aps: (0, 0),
            imu: false,
            ..davis(chip, (128, 128), BiasLayout::Dvs128)
        },
        ChipId::Davis240A | ChipId::Davis240B | ChipId::Davis240C => {
            davis(chip, (240, 180), BiasLayout::Davis240)
        }
        ChipId::Davis128 => davis(chip, (128, 128), BiasLayout::DavisShifted),
        ChipId::Davis346 => StaticProfile {
            quad_roi: true,
            microphone: true,
            ..davis(chip, (346, 260), BiasLayout::DavisShifted)
        },
        ChipId::Davis640 => StaticProfile {
            quad_roi: true,
            ..davis(chip, (640, 480), BiasLayout::DavisShifted)
        },
        ChipId::DavisRgb => StaticProfile {
            dvs: (320, 240),
            aps: (640, 480),
            quad_roi: true,
            interleaved: true,
            color: ColorFilter::Rgbg,
            ..davis(chip, (640, 480), BiasLayout::DavisShifted)
        },
        ChipId::Davis208 => StaticProfile {
            inverted_below: 192,
            ..davis(chip, (208, 192), BiasLayout::DavisShifted)
        },
        ChipId::Dynapse => StaticProfile {
            dvs: (0, 0),
            aps: (0, 0),
            imu: false,
            ..davis(chip, (0, 0), BiasLayout::Dynapse)
        },
    }
}

/// Builds the profile of a chip.
pub fn profile(chip: ChipId) -> Arc<dyn ChipProfile> {
    Arc::new(static_profile(chip))
}
