//! DAVIS family: DVS events plus APS frames, IMU6 samples and microphone samples.

pub mod frame;
pub mod imu;

use super::dvs::{self, DvsAddressState, SPECIAL_RESERVED, SPECIAL_TIMESTAMP_RESET};
use super::{DeviceFamily, SlotLayout, TranslateContext};
use crate::device::DeviceInfo;
use crate::device_log;
use crate::packet::PacketError;
use crate::parser;
use crate::types::{EventType, SampleEvent, SpecialEventType};
use frame::{ApsOrientation, FrameStaging, Readout, RoiRegion, ROI_REGIONS};
use imu::{ImuOrientation, ImuStaging};

// Special (code 0) events of the DAVIS family, besides the DVS ones.
pub const SPECIAL_IMU_START: u16 = 5;
pub const SPECIAL_IMU_END: u16 = 7;
pub const SPECIAL_APS_GS_START: u16 = 8;
pub const SPECIAL_APS_RS_START: u16 = 9;
pub const SPECIAL_APS_FRAME_END: u16 = 10;
pub const SPECIAL_APS_RESET_COLUMN_START: u16 = 11;
pub const SPECIAL_APS_SIGNAL_COLUMN_START: u16 = 12;
pub const SPECIAL_APS_COLUMN_END: u16 = 13;
pub const SPECIAL_APS_GS_START_NO_RESET_READ: u16 = 14;
pub const SPECIAL_APS_RS_START_NO_RESET_READ: u16 = 15;
pub const SPECIAL_IMU_SCALE_FIRST: u16 = 16;
pub const SPECIAL_IMU_SCALE_LAST: u16 = 31;
pub const SPECIAL_ROI_SELECT_FIRST: u16 = 32;
pub const SPECIAL_ROI_SELECT_LAST: u16 = 35;
pub const SPECIAL_EXTERNAL_INPUT1_FALLING: u16 = 36;
pub const SPECIAL_EXTERNAL_GENERATOR_RISING: u16 = 43;
pub const SPECIAL_EXPOSURE_SELECT: u16 = 48;
pub const SPECIAL_ROI_DISABLE_FIRST: u16 = 49;
pub const SPECIAL_ROI_DISABLE_LAST: u16 = 52;

// Misc8 sub-codes.
pub const MISC8_IMU: u8 = 0;
pub const MISC8_INFO_HIGH: u8 = 1;
pub const MISC8_INFO_LOW: u8 = 2;

/// 16-bit values that make up an ROI region: start X/Y, end X/Y.
const ROI_INFO_VALUES: usize = 4;
/// 16-bit values of an exposure report: high and low half.
const EXPOSURE_INFO_VALUES: usize = 2;

/// Microphone channels carried in Misc10.
pub const MIC_CHANNELS: usize = 2;
const MIC_PARTS: u8 = 3;

/// Maps the extra external input codes 36-43.
pub fn extra_external_input(data: u16) -> Option<SpecialEventType> {
    match data {
        36 => Some(SpecialEventType::ExternalInput1FallingEdge),
        37 => Some(SpecialEventType::ExternalInput1RisingEdge),
        38 => Some(SpecialEventType::ExternalInput1Pulse),
        39 => Some(SpecialEventType::ExternalInput2FallingEdge),
        40 => Some(SpecialEventType::ExternalInput2RisingEdge),
        41 => Some(SpecialEventType::ExternalInput2Pulse),
        42 => Some(SpecialEventType::ExternalGeneratorFallingEdge),
        43 => Some(SpecialEventType::ExternalGeneratorRisingEdge),
        _ => None,
    }
}

/// Field that the next Misc8 values are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfoSelect {
    None,
    Roi(usize),
    Exposure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MicPart {
    Pending,
    Complete(i32),
    OutOfOrder,
}

/// Assembles 24-bit microphone samples sent as three bytes, MSB first.
#[derive(Debug, Clone, Copy, Default)]
struct MicStaging {
    value: u32,
    next_part: u8,
}

impl MicStaging {
    fn push(&mut self, part: u8, byte: u8) -> MicPart {
        if part == 0 {
            self.value = u32::from(byte);
            self.next_part = 1;
            return MicPart::Pending;
        }
        if part != self.next_part || part >= MIC_PARTS {
            self.next_part = 0;
            return MicPart::OutOfOrder;
        }

        self.value = (self.value << 8) | u32::from(byte);
        self.next_part += 1;
        if self.next_part < MIC_PARTS {
            return MicPart::Pending;
        }

        self.next_part = 0;
        // Sign-extend from 24 bits.
        MicPart::Complete(((self.value << 8) as i32) >> 8)
    }
}

#[derive(Debug)]
pub struct DavisFamily {
    address: DvsAddressState,
    frame: FrameStaging,
    imu: ImuStaging,
    mic: [MicStaging; MIC_CHANNELS],
    info_select: InfoSelect,
    info_values: [u16; ROI_INFO_VALUES],
    info_count: usize,
    info_high: u8,
    reported_exposure: Option<u32>,
    /// ROI regions 1-3 exist.
    quad_roi: bool,
    microphone: bool,
    /// The APS can do a reset read at all.
    reset_read: bool,
}

impl DavisFamily {
    pub fn frame(&self) -> &FrameStaging {
        &self.frame
    }

    /// Exposure in µs last reported by the device.
    pub fn reported_exposure(&self) -> Option<u32> {
        self.reported_exposure
    }

    fn handle_special(&mut self, data: u16, ctx: &mut TranslateContext) -> Result<(), PacketError> {
        match data {
            SPECIAL_RESERVED => {
                device_log!(ctx.diag(), Error, "Caught special reserved event!");
            }
            SPECIAL_TIMESTAMP_RESET => ctx.timestamp_reset(),
            SPECIAL_IMU_START => self.imu.start(),
            SPECIAL_IMU_END => self.imu.end(ctx)?,
            SPECIAL_APS_GS_START => self.frame.frame_start(true, self.reset_read, ctx)?,
            SPECIAL_APS_RS_START => self.frame.frame_start(false, self.reset_read, ctx)?,
            SPECIAL_APS_GS_START_NO_RESET_READ => self.frame.frame_start(true, false, ctx)?,
            SPECIAL_APS_RS_START_NO_RESET_READ => self.frame.frame_start(false, false, ctx)?,
            SPECIAL_APS_FRAME_END => {
                self.frame.frame_end(self.reported_exposure, ctx)?;
            }
            SPECIAL_APS_RESET_COLUMN_START => self.frame.column_start(Readout::Reset, ctx)?,
            SPECIAL_APS_SIGNAL_COLUMN_START => self.frame.column_start(Readout::Signal, ctx)?,
            SPECIAL_APS_COLUMN_END => self.frame.column_end(ctx)?,
            SPECIAL_IMU_SCALE_FIRST..=SPECIAL_IMU_SCALE_LAST => {
                self.imu
                    .scale_config(parser::imu_accel_scale(data), parser::imu_gyro_scale(data));
            }
            SPECIAL_ROI_SELECT_FIRST..=SPECIAL_ROI_SELECT_LAST => {
                self.select_info(InfoSelect::Roi(usize::from(data - SPECIAL_ROI_SELECT_FIRST)));
            }
            SPECIAL_EXTERNAL_INPUT1_FALLING..=SPECIAL_EXTERNAL_GENERATOR_RISING => {
                if let Some(kind) = extra_external_input(data) {
                    ctx.push_special(kind)?;
                }
            }
            SPECIAL_EXPOSURE_SELECT => self.select_info(InfoSelect::Exposure),
            SPECIAL_ROI_DISABLE_FIRST..=SPECIAL_ROI_DISABLE_LAST => {
                let id = usize::from(data - SPECIAL_ROI_DISABLE_FIRST);
                if self.region_supported(id) {
                    self.frame.disable_region(id);
                } else {
                    device_log!(ctx.diag(), Error, "APS: ROI region {} not supported by this chip.", id);
                }
            }
            _ => match dvs::external_input(data) {
                Some(kind) => ctx.push_special(kind)?,
                None => {
                    device_log!(ctx.diag(), Error, "Caught special event that can't be handled: {}.", data);
                }
            },
        }
        Ok(())
    }

    fn region_supported(&self, id: usize) -> bool {
        id == 0 || self.quad_roi
    }

    fn select_info(&mut self, select: InfoSelect) {
        self.info_select = select;
        self.info_count = 0;
    }

    fn handle_misc8(&mut self, data: u16, ctx: &mut TranslateContext) {
        let byte = parser::misc8_data(data);
        match parser::misc8_code(data) {
            MISC8_IMU => self.imu.data_byte(byte, ctx),
            MISC8_INFO_HIGH => self.info_high = byte,
            MISC8_INFO_LOW => {
                let value = u16::from_be_bytes([self.info_high, byte]);
                self.info_value(value, ctx);
            }
            code => {
                device_log!(ctx.diag(), Error, "Caught Misc8 event that can't be handled: {}.", code);
            }
        }
    }

    /// Stores one 16-bit value into the selected info field.
    fn info_value(&mut self, value: u16, ctx: &TranslateContext) {
        let needed = match self.info_select {
            InfoSelect::None => {
                device_log!(ctx.diag(), Error, "Misc8 value {} received with no field selected.", value);
                return;
            }
            InfoSelect::Roi(_) => ROI_INFO_VALUES,
            InfoSelect::Exposure => EXPOSURE_INFO_VALUES,
        };

        self.info_values[self.info_count] = value;
        self.info_count += 1;
        if self.info_count < needed {
            return;
        }

        match self.info_select {
            InfoSelect::Roi(id) if !self.region_supported(id) => {
                device_log!(ctx.diag(), Error, "APS: ROI region {} not supported by this chip.", id);
            }
            InfoSelect::Roi(id) => {
                let [start_x, start_y, end_x, end_y] = self.info_values;
                let region = RoiRegion {
                    enabled: true,
                    start_x,
                    start_y,
                    end_x,
                    end_y,
                };
                if !self.frame.set_region(id, region) {
                    device_log!(ctx.diag(), Error, "APS: invalid ROI region {}: {:?}.", id, region);
                }
            }
            InfoSelect::Exposure => {
                let exposure =
                    (u32::from(self.info_values[0]) << 16) | u32::from(self.info_values[1]);
                self.reported_exposure = Some(exposure);
            }
            InfoSelect::None => {}
        }
        self.select_info(InfoSelect::None);
    }

    fn handle_misc10(&mut self, data: u16, ctx: &mut TranslateContext) -> Result<(), PacketError> {
        let code = parser::misc10_code(data);
        let payload = parser::misc10_data(data);

        let channel = usize::from(code);
        if channel >= MIC_CHANNELS || !self.microphone {
            device_log!(ctx.diag(), Error, "Caught Misc10 event that can't be handled: {}.", code);
            return Ok(());
        }

        match self.mic[channel].push(parser::sample_part(payload), parser::sample_byte(payload)) {
            MicPart::Pending => {}
            MicPart::Complete(sample) => {
                ctx.push(SampleEvent::new(code, sample, ctx.current()))?;
            }
            MicPart::OutOfOrder => {
                device_log!(
                    ctx.diag(),
                    Error,
                    "Microphone channel {}: sample part {} out of order, dropping sample.",
                    channel,
                    parser::sample_part(payload)
                );
            }
        }
        Ok(())
    }
}

impl DeviceFamily for DavisFamily {
    const NAME: &'static str = "davis";

    const LAYOUT: &'static [SlotLayout] = &[
        // A frame start can emit two markers.
        SlotLayout::new(EventType::Special, 2, 128),
        SlotLayout::new(EventType::Polarity, 1, 4096),
        SlotLayout::new(EventType::Frame, ROI_REGIONS, 8),
        SlotLayout::new(EventType::Imu6, 1, 64),
        SlotLayout::new(EventType::Sample, 1, 64),
    ];

    fn open(info: &DeviceInfo) -> Self {
        let profile = &info.profile;
        Self {
            address: DvsAddressState::new(info),
            frame: FrameStaging::new(
                info.aps_size,
                ApsOrientation::from_register(info.aps_orientation),
                profile.interleaved_readout(),
                profile.adc_depth(),
                info.color_filter,
            ),
            imu: ImuStaging::new(ImuOrientation::from_register(info.imu_orientation)),
            mic: [MicStaging::default(); MIC_CHANNELS],
            info_select: InfoSelect::None,
            info_values: [0; ROI_INFO_VALUES],
            info_count: 0,
            info_high: 0,
            reported_exposure: None,
            quad_roi: profile.has_quad_roi(),
            microphone: profile.has_microphone(),
            reset_read: info.aps_has_reset_read,
        }
    }

    fn handle_event(
        &mut self,
        code: u8,
        data: u16,
        ctx: &mut TranslateContext,
    ) -> Result<(), PacketError> {
        match code {
            0 => self.handle_special(data, ctx)?,
            1 => self.address.row(data, ctx)?,
            2 | 3 => self.address.column(data, code == 3, ctx)?,
            4 => self.frame.sample(data, ctx),
            5 => self.handle_misc8(data, ctx),
            6 => self.handle_misc10(data, ctx)?,
            _ => {
                device_log!(ctx.diag(), Error, "Caught event that can't be handled: code {}.", code);
            }
        }
        Ok(())
    }

    fn on_forced_commit(&mut self) {
        self.frame.abandon();
        self.imu.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Translator;
    use super::*;
    use crate::chip::ChipId;
    use crate::config::{APS_EXPOSURE, MODULE_APS};
    use crate::container::EventPacketContainer;
    use crate::parser::{encode_event, encode_tick, words_to_bytes};
    use crate::types::{FrameEvent, Imu6Event, SpecialEvent};
    use tracing_test::traced_test;

    const RESET: u16 = 0x0001;

    fn special(data: u16) -> u16 {
        encode_event(0, data)
    }

    fn adc(value: u16) -> u16 {
        encode_event(4, value)
    }

    fn misc8(code: u8, byte: u8) -> u16 {
        encode_event(5, (u16::from(code) << 8) | u16::from(byte))
    }

    fn mic(channel: u8, part: u8, byte: u8) -> u16 {
        encode_event(6, (u16::from(channel) << 10) | (u16::from(part) << 8) | u16::from(byte))
    }

    fn info_value(value: u16) -> [u16; 2] {
        let [hi, lo] = value.to_be_bytes();
        [misc8(MISC8_INFO_HIGH, hi), misc8(MISC8_INFO_LOW, lo)]
    }

    /// Device with a tiny 2x2 APS array.
    fn tiny_device() -> DeviceInfo {
        let mut device = info(ChipId::Davis240C);
        device.aps_size = (2, 2);
        device
    }

    fn run(device: &DeviceInfo, words: &[u16]) -> (Translator<DavisFamily>, Vec<Box<EventPacketContainer>>) {
        let mut t: Translator<DavisFamily> = translator(device, settings(0, 1_000_000));
        let mut sink = Vec::new();
        t.translate(&words_to_bytes(words), &mut sink).unwrap();
        // Flush.
        t.translate(&words_to_bytes(&[special(RESET)]), &mut sink).unwrap();
        (t, sink)
    }

    /// Global shutter readout with reset read over a 2x2 array.
    fn gs_frame(reset: u16, signals: [u16; 4]) -> Vec<u16> {
        let mut words = vec![encode_tick(10), special(SPECIAL_APS_GS_START)];
        for _ in 0..2 {
            words.extend([special(SPECIAL_APS_RESET_COLUMN_START), adc(reset), adc(reset)]);
            words.push(special(SPECIAL_APS_COLUMN_END));
        }
        words.push(encode_tick(20));
        for column in 0..2 {
            words.extend([
                special(SPECIAL_APS_SIGNAL_COLUMN_START),
                adc(signals[column * 2]),
                adc(signals[column * 2 + 1]),
                special(SPECIAL_APS_COLUMN_END),
            ]);
        }
        words.extend([encode_tick(30), special(SPECIAL_APS_FRAME_END)]);
        words
    }

    #[test]
    fn test_global_shutter_frame() {
        let (_, sink) = run(&tiny_device(), &gs_frame(1000, [900, 800, 700, 600]));
        let frames = sink[0].get::<FrameEvent>().unwrap();
        assert_eq!(frames.count(), 1);

        let frame = &frames.events()[0];
        assert!(frame.valid);
        assert_eq!((frame.length_x, frame.length_y), (2, 2));
        // Readout goes column by column; pixels are row-major.
        assert_eq!(frame.pixel(0, 0), Some(100 << 6));
        assert_eq!(frame.pixel(0, 1), Some(200 << 6));
        assert_eq!(frame.pixel(1, 0), Some(300 << 6));
        assert_eq!(frame.pixel(1, 1), Some(400 << 6));
        assert_eq!(frame.ts_start_of_frame, 10);
        assert_eq!(frame.ts_start_of_exposure, 10);
        assert_eq!(frame.ts_end_of_exposure, 20);
        assert_eq!(frame.ts_end_of_frame, 30);

        let kinds: Vec<_> = sink[0]
            .get::<SpecialEvent>()
            .unwrap()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                SpecialEventType::ApsFrameStart,
                SpecialEventType::ApsExposureStart,
                SpecialEventType::ApsExposureEnd,
                SpecialEventType::ApsFrameEnd,
            ]
        );
    }

    #[test]
    fn test_rolling_shutter_without_reset_read() {
        let words = vec![
            encode_tick(5),
            special(SPECIAL_APS_RS_START_NO_RESET_READ),
            encode_tick(8),
            special(SPECIAL_APS_SIGNAL_COLUMN_START),
            adc(1),
            adc(1023),
            special(SPECIAL_APS_COLUMN_END),
            special(SPECIAL_APS_SIGNAL_COLUMN_START),
            adc(23),
            adc(1023),
            special(SPECIAL_APS_COLUMN_END),
            special(SPECIAL_APS_FRAME_END),
        ];
        let (_, sink) = run(&tiny_device(), &words);
        let frame = &sink[0].get::<FrameEvent>().unwrap().events()[0];
        assert!(frame.valid);
        assert_eq!(frame.ts_start_of_exposure, 5);
        assert_eq!(frame.ts_end_of_exposure, 8);
        assert_eq!(frame.pixel(0, 0), Some(1022 << 6));
        assert_eq!(frame.pixel(0, 1), Some(0));
        assert_eq!(frame.pixel(1, 0), Some(1000 << 6));
    }

    #[test]
    #[traced_test]
    fn test_short_column_marks_frame_invalid() {
        let mut words = gs_frame(1000, [900, 800, 700, 600]);
        // Drop the last signal sample.
        let last_adc = words.iter().rposition(|&w| w == adc(600)).unwrap();
        words.remove(last_adc);

        let (_, sink) = run(&tiny_device(), &words);
        let frames = sink[0].get::<FrameEvent>().unwrap();
        assert_eq!(frames.count(), 1);
        assert!(!frames.events()[0].valid);
        assert_eq!(frames.valid_count(), 0);
        assert!(logs_contain("rows, expected"));
    }

    #[test]
    fn test_forced_commit_drops_frame_in_flight() {
        let mut words = gs_frame(1000, [900, 800, 700, 600]);
        let split = words.len() / 2;
        words.insert(split, special(RESET));

        let (_, sink) = run(&tiny_device(), &words);
        assert!(sink.iter().all(|c| c.get::<FrameEvent>().is_none()));

        // The next frame start resumes decoding.
        let mut words = gs_frame(1000, [900, 800, 700, 600]);
        words.insert(3, special(RESET));
        words.extend(gs_frame(1000, [900, 900, 900, 900]));
        let (_, sink) = run(&tiny_device(), &words);
        let frames: Vec<&FrameEvent> = sink
            .iter()
            .filter_map(|c| c.get::<FrameEvent>())
            .flat_map(|p| p.iter())
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pixel(1, 1), Some(100 << 6));
    }

    #[test]
    fn test_roi_programming_and_disable() {
        let mut device = info(ChipId::Davis346);
        device.aps_size = (4, 4);
        let mut words = vec![encode_tick(1), special(SPECIAL_ROI_SELECT_FIRST + 1)];
        for value in [2, 1, 3, 2] {
            words.extend(info_value(value));
        }
        words.push(special(SPECIAL_ROI_DISABLE_FIRST));
        // Readout of region 1 only: 2 columns of 2 rows.
        words.push(special(SPECIAL_APS_GS_START_NO_RESET_READ));
        for _ in 0..2 {
            words.extend([
                special(SPECIAL_APS_SIGNAL_COLUMN_START),
                adc(1023),
                adc(1023),
                special(SPECIAL_APS_COLUMN_END),
            ]);
        }
        words.push(special(SPECIAL_APS_FRAME_END));

        let (t, sink) = run(&device, &words);
        let regions = t.family().frame().regions();
        assert!(!regions[0].enabled);
        assert!(regions[1].enabled);

        let frame = &sink[0].get::<FrameEvent>().unwrap().events()[0];
        assert!(frame.valid);
        assert_eq!(frame.roi_id, 1);
        assert_eq!((frame.position_x, frame.position_y), (2, 1));
        assert_eq!((frame.length_x, frame.length_y), (2, 2));
    }

    #[test]
    fn test_auto_exposure_requests_write() {
        let device = tiny_device();
        let s = settings(0, 1_000_000);
        s.set_auto_exposure(true);
        s.set_last_exposure(1000);

        let mut t: Translator<DavisFamily> = translator(&device, s);
        let mut words = vec![special(SPECIAL_EXPOSURE_SELECT)];
        words.extend(info_value(0));
        words.extend(info_value(1000));
        // Dark frame: signal equal to reset everywhere.
        words.extend(gs_frame(1000, [1000; 4]));
        let mut sink = Vec::new();
        t.translate(&words_to_bytes(&words), &mut sink).unwrap();

        assert_eq!(t.family().reported_exposure(), Some(1000));
        let writes = t.take_register_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!((writes[0].module, writes[0].param), (MODULE_APS, APS_EXPOSURE));
        assert!(writes[0].value > 1000);
        assert!(t.take_register_writes().is_empty());
    }

    fn imu_sample(scale: u16) -> Vec<u16> {
        let mut words = vec![special(SPECIAL_IMU_START), special(SPECIAL_IMU_SCALE_FIRST + scale)];
        // accel x = 8192, y = -8192, z = 16384, temp = 340, gyro x = 131, y = 0, z = -262
        for value in [8192i16, -8192, 16384, 340, 131, 0, -262] {
            let [hi, lo] = value.to_be_bytes();
            words.push(misc8(MISC8_IMU, hi));
            words.push(misc8(MISC8_IMU, lo));
        }
        words.push(encode_tick(77));
        words.push(special(SPECIAL_IMU_END));
        words
    }

    #[test]
    fn test_imu_sample() {
        let (_, sink) = run(&info(ChipId::Davis240C), &imu_sample(0));
        let imu = sink[0].get::<Imu6Event>().unwrap();
        assert_eq!(imu.count(), 1);

        let e = imu.events()[0];
        assert_eq!(e.timestamp, 77);
        assert_eq!((e.accel_x, e.accel_y, e.accel_z), (0.5, -0.5, 1.0));
        assert!((e.temp - 37.53).abs() < 1e-4);
        assert_eq!((e.gyro_x, e.gyro_y, e.gyro_z), (1.0, 0.0, -2.0));
    }

    #[test]
    fn test_imu_scale_and_orientation() {
        let mut device = info(ChipId::Davis240C);
        device.imu_orientation = crate::config::ORIENTATION_FLIP_X;
        // Accel scale 1 (bits 3-2), gyro scale 0.
        let (_, sink) = run(&device, &imu_sample(0b0100));
        let e = sink[0].get::<Imu6Event>().unwrap().events()[0];
        assert_eq!(e.accel_x, -1.0);
        assert_eq!(e.gyro_x, -1.0);
        assert_eq!(e.accel_z, 2.0);
    }

    #[test]
    #[traced_test]
    fn test_incomplete_imu_sample_dropped() {
        let mut words = imu_sample(0);
        words.remove(4);
        let (_, sink) = run(&info(ChipId::Davis240C), &words);
        assert!(sink.iter().all(|c| c.get::<Imu6Event>().is_none()));
        assert!(logs_contain("wrong number of parts"));
    }

    #[test]
    fn test_microphone_samples() {
        let words = vec![
            encode_tick(3),
            mic(0, 0, 0x00),
            mic(0, 1, 0x01),
            mic(1, 0, 0xFF),
            mic(0, 2, 0x02),
            mic(1, 1, 0xFF),
            mic(1, 2, 0xFE),
        ];
        let (_, sink) = run(&info(ChipId::Davis346), &words);
        let samples = sink[0].get::<SampleEvent>().unwrap().events().to_vec();
        assert_eq!(samples, vec![SampleEvent::new(0, 0x0102, 3), SampleEvent::new(1, -2, 3)]);
    }

    #[test]
    fn test_extra_external_inputs() {
        let words = vec![encode_tick(9), special(36), special(40), special(43), special(2)];
        let (_, sink) = run(&info(ChipId::Davis240C), &words);
        let kinds: Vec<_> = sink[0]
            .get::<SpecialEvent>()
            .unwrap()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                SpecialEventType::ExternalInput1FallingEdge,
                SpecialEventType::ExternalInput2RisingEdge,
                SpecialEventType::ExternalGeneratorRisingEdge,
                SpecialEventType::ExternalInputFallingEdge,
            ]
        );
    }

    #[test]
    #[traced_test]
    fn test_roi_regions_above_zero_need_quad_roi() {
        let mut device = info(ChipId::Davis240C);
        device.aps_size = (4, 4);
        let mut words = vec![encode_tick(1), special(SPECIAL_ROI_SELECT_FIRST + 1)];
        for value in [2, 1, 3, 2] {
            words.extend(info_value(value));
        }
        words.push(special(SPECIAL_ROI_DISABLE_FIRST + 2));

        let (t, _) = run(&device, &words);
        let regions = t.family().frame().regions();
        assert!(regions[0].enabled);
        assert!(!regions[1].enabled);
        assert!(logs_contain("ROI region 1 not supported"));
        assert!(logs_contain("ROI region 2 not supported"));
    }

    #[test]
    #[traced_test]
    fn test_microphone_data_needs_microphone() {
        let words = vec![encode_tick(3), mic(0, 0, 0x00), mic(0, 1, 0x01), mic(0, 2, 0x02)];
        let (_, sink) = run(&info(ChipId::Davis240C), &words);
        assert!(sink.iter().all(|c| c.get::<SampleEvent>().is_none()));
        assert!(logs_contain("Misc10 event that can't be handled"));
    }

    #[test]
    fn test_reset_read_start_on_chip_without_reset_read() {
        let mut device = tiny_device();
        device.aps_has_reset_read = false;
        let mut words = vec![encode_tick(5), special(SPECIAL_APS_GS_START)];
        for _ in 0..2 {
            words.extend([
                special(SPECIAL_APS_SIGNAL_COLUMN_START),
                adc(1000),
                adc(1000),
                special(SPECIAL_APS_COLUMN_END),
            ]);
        }
        words.push(special(SPECIAL_APS_FRAME_END));

        let (_, sink) = run(&device, &words);
        let frame = &sink[0].get::<FrameEvent>().unwrap().events()[0];
        assert!(frame.valid);
        // Compared against a full-scale reset.
        assert_eq!(frame.pixel(1, 1), Some(23 << 6));
    }

    /// Wrap words whose sum passes the 31-bit range: 17 * 4095 * 32768 µs.
    fn big_wrap() -> Vec<u16> {
        vec![encode_event(7, 4095); 17]
    }

    #[test]
    fn test_big_wrap_drops_frame_in_flight() {
        let mut words = vec![encode_tick(1), special(SPECIAL_APS_GS_START)];
        for _ in 0..2 {
            words.extend([
                special(SPECIAL_APS_RESET_COLUMN_START),
                adc(1000),
                adc(1000),
                special(SPECIAL_APS_COLUMN_END),
            ]);
        }
        words.extend(big_wrap());
        words.push(encode_tick(2));
        for _ in 0..2 {
            words.extend([
                special(SPECIAL_APS_SIGNAL_COLUMN_START),
                adc(900),
                adc(900),
                special(SPECIAL_APS_COLUMN_END),
            ]);
        }
        words.push(special(SPECIAL_APS_FRAME_END));
        let interrupted = words.len();
        words.extend(gs_frame(1000, [800, 800, 800, 800]));

        let (_, sink) = run(&tiny_device(), &words[..interrupted]);
        assert!(sink.iter().all(|c| c.get::<FrameEvent>().is_none()));

        let (_, sink) = run(&tiny_device(), &words);
        let packets: Vec<_> = sink.iter().filter_map(|c| c.get::<FrameEvent>()).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].ts_overflow(), 1);
        assert_eq!(packets[0].count(), 1);
        assert!(packets[0].events()[0].valid);
        assert_eq!(packets[0].events()[0].pixel(1, 1), Some(200 << 6));
    }

    #[test]
    fn test_big_wrap_drops_imu_sample_in_flight() {
        let sample = imu_sample(0);
        // Start, scale and the first three axes, then the epoch ends.
        let mut words = vec![encode_tick(1)];
        words.extend_from_slice(&sample[..8]);
        words.extend(big_wrap());
        words.extend_from_slice(&sample[8..]);
        let interrupted = words.len();
        words.extend(imu_sample(0));

        let (_, sink) = run(&info(ChipId::Davis240C), &words[..interrupted]);
        assert!(sink.iter().all(|c| c.get::<Imu6Event>().is_none()));

        let (_, sink) = run(&info(ChipId::Davis240C), &words);
        let packets: Vec<_> = sink.iter().filter_map(|c| c.get::<Imu6Event>()).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].ts_overflow(), 1);
        let e = packets[0].events()[0];
        assert_eq!((e.accel_x, e.accel_y, e.accel_z), (0.5, -0.5, 1.0));
    }
}
