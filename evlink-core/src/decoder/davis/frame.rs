//! APS frame readout: ROI geometry and frame staging.
//!
//! A readout visits the union of the enabled regions' columns; within each
//! column it reads the union of their rows, first as reset values (when reset
//! read is on) and then as signal values. Pixels are written into per-region
//! frames through a precomputed index table and only reach the output packet
//! at frame end.

use super::super::TranslateContext;
use crate::autoexposure;
use crate::config::{
    APS_EXPOSURE, MODULE_APS, ORIENTATION_FLIP_X, ORIENTATION_FLIP_Y, ORIENTATION_INVERT_XY,
};
use crate::device_log;
use crate::packet::PacketError;
use crate::types::{ColorFilter, FrameEvent, SpecialEventType};

pub const ROI_REGIONS: usize = 4;

/// One ROI region in sensor coordinates, bounds inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoiRegion {
    pub enabled: bool,
    pub start_x: u16,
    pub start_y: u16,
    pub end_x: u16,
    pub end_y: u16,
}

impl RoiRegion {
    pub fn full(columns: u16, rows: u16) -> Self {
        Self {
            enabled: columns > 0 && rows > 0,
            start_x: 0,
            start_y: 0,
            end_x: columns.saturating_sub(1),
            end_y: rows.saturating_sub(1),
        }
    }

    #[inline]
    pub fn size_x(&self) -> u16 {
        self.end_x - self.start_x + 1
    }

    #[inline]
    pub fn size_y(&self) -> u16 {
        self.end_y - self.start_y + 1
    }

    #[inline]
    fn contains(&self, x: u16, y: u16) -> bool {
        self.enabled && (self.start_x..=self.end_x).contains(&x) && (self.start_y..=self.end_y).contains(&y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApsOrientation {
    pub invert_xy: bool,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl ApsOrientation {
    pub fn from_register(value: u32) -> Self {
        Self {
            invert_xy: value & ORIENTATION_INVERT_XY != 0,
            flip_x: value & ORIENTATION_FLIP_X != 0,
            flip_y: value & ORIENTATION_FLIP_Y != 0,
        }
    }
}

/// Placement of one region's frame in output coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub roi_id: u8,
    pub position_x: u16,
    pub position_y: u16,
    pub length_x: u16,
    pub length_y: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelTarget {
    /// Index into the enabled regions.
    region: u8,
    offset: u32,
}

/// Readout order and pixel index table of the current ROI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadoutGeometry {
    columns: Vec<u16>,
    /// Rows of one column, in readout order.
    rows: Vec<u16>,
    regions: Vec<RegionLayout>,
    /// `targets[target_offsets[i]..target_offsets[i + 1]]` are the pixels fed by readout index `i`.
    target_offsets: Vec<u32>,
    targets: Vec<PixelTarget>,
}

impl ReadoutGeometry {
    pub fn build(
        regions: &[RoiRegion; ROI_REGIONS],
        sensor: (u16, u16),
        orientation: ApsOrientation,
        interleaved: bool,
    ) -> Self {
        let enabled: Vec<(u8, &RoiRegion)> = regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled)
            .map(|(i, r)| (i as u8, r))
            .collect();

        let columns: Vec<u16> = (0..sensor.0)
            .filter(|&x| enabled.iter().any(|(_, r)| (r.start_x..=r.end_x).contains(&x)))
            .collect();
        let mut rows: Vec<u16> = (0..sensor.1)
            .filter(|&y| enabled.iter().any(|(_, r)| (r.start_y..=r.end_y).contains(&y)))
            .collect();
        if interleaved {
            // Even rows of a column are read before the odd ones.
            rows.sort_by_key(|&y| (y % 2, y));
        }

        let layouts: Vec<RegionLayout> = enabled
            .iter()
            .map(|&(id, r)| {
                let x = if orientation.flip_x { sensor.0 - 1 - r.end_x } else { r.start_x };
                let y = if orientation.flip_y { sensor.1 - 1 - r.end_y } else { r.start_y };
                let (position_x, position_y, length_x, length_y) = if orientation.invert_xy {
                    (y, x, r.size_y(), r.size_x())
                } else {
                    (x, y, r.size_x(), r.size_y())
                };
                RegionLayout {
                    roi_id: id,
                    position_x,
                    position_y,
                    length_x,
                    length_y,
                }
            })
            .collect();

        let mut target_offsets = Vec::with_capacity(columns.len() * rows.len() + 1);
        let mut targets = Vec::new();
        target_offsets.push(0);

        for &x in &columns {
            for &y in &rows {
                for (index, &(_, r)) in enabled.iter().enumerate() {
                    if !r.contains(x, y) {
                        continue;
                    }
                    let mut local_x = x - r.start_x;
                    let mut local_y = y - r.start_y;
                    if orientation.flip_x {
                        local_x = r.size_x() - 1 - local_x;
                    }
                    if orientation.flip_y {
                        local_y = r.size_y() - 1 - local_y;
                    }
                    let (out_x, out_y, width) = if orientation.invert_xy {
                        (local_y, local_x, r.size_y())
                    } else {
                        (local_x, local_y, r.size_x())
                    };
                    targets.push(PixelTarget {
                        region: index as u8,
                        offset: u32::from(out_y) * u32::from(width) + u32::from(out_x),
                    });
                }
                target_offsets.push(targets.len() as u32);
            }
        }

        Self {
            columns,
            rows,
            regions: layouts,
            target_offsets,
            targets,
        }
    }

    /// Columns per readout.
    pub fn expected_columns(&self) -> u16 {
        self.columns.len() as u16
    }

    /// Rows per column.
    pub fn expected_rows(&self) -> u16 {
        self.rows.len() as u16
    }

    pub fn pixel_count(&self) -> usize {
        self.columns.len() * self.rows.len()
    }

    pub fn regions(&self) -> &[RegionLayout] {
        &self.regions
    }

    #[inline]
    fn targets(&self, index: usize) -> &[PixelTarget] {
        let start = self.target_offsets[index] as usize;
        let end = self.target_offsets[index + 1] as usize;
        &self.targets[start..end]
    }
}

/// Correlated double sampling of one pixel, normalized to 16 bits.
#[inline]
pub fn cds(reset: u16, signal: u16, adc_depth: u8) -> u16 {
    let adc_max = (1u16 << adc_depth) - 1;
    let value = if reset < adc_max / 2 || signal == 0 {
        // Saturated pixel.
        adc_max
    } else {
        reset.saturating_sub(signal).min(adc_max)
    };
    value << (16 - adc_depth)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingState {
    Idle,
    Accumulating,
    /// Frame end seen, frames finalized but not yet written out.
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readout {
    Reset = 0,
    Signal = 1,
}

/// Frame assembly between frame start and frame end markers.
#[derive(Debug)]
pub struct FrameStaging {
    state: StagingState,
    ignore: bool,
    sensor: (u16, u16),
    orientation: ApsOrientation,
    interleaved: bool,
    adc_depth: u8,
    color_filter: ColorFilter,
    regions: [RoiRegion; ROI_REGIONS],
    geometry_dirty: bool,
    geometry: ReadoutGeometry,
    global_shutter: bool,
    reset_read: bool,
    readout: Readout,
    count_x: [u16; 2],
    count_y: [u16; 2],
    reset_values: Vec<u16>,
    frames: Vec<FrameEvent>,
    valid: bool,
    ts_start_of_frame: i32,
    ts_end_of_frame: i32,
    ts_start_of_exposure: i32,
    ts_end_of_exposure: i32,
}

impl FrameStaging {
    pub fn new(
        sensor: (u16, u16),
        orientation: ApsOrientation,
        interleaved: bool,
        adc_depth: u8,
        color_filter: ColorFilter,
    ) -> Self {
        let mut regions = [RoiRegion::default(); ROI_REGIONS];
        regions[0] = RoiRegion::full(sensor.0, sensor.1);

        Self {
            state: StagingState::Idle,
            ignore: false,
            sensor,
            orientation,
            interleaved,
            adc_depth,
            color_filter,
            regions,
            geometry_dirty: true,
            geometry: ReadoutGeometry::default(),
            global_shutter: true,
            reset_read: true,
            readout: Readout::Reset,
            count_x: [0; 2],
            count_y: [0; 2],
            reset_values: Vec::new(),
            frames: Vec::new(),
            valid: false,
            ts_start_of_frame: 0,
            ts_end_of_frame: 0,
            ts_start_of_exposure: 0,
            ts_end_of_exposure: 0,
        }
    }

    pub fn state(&self) -> StagingState {
        self.state
    }

    pub fn geometry(&self) -> &ReadoutGeometry {
        &self.geometry
    }

    pub fn regions(&self) -> &[RoiRegion; ROI_REGIONS] {
        &self.regions
    }

    #[inline]
    fn active(&self) -> bool {
        self.state == StagingState::Accumulating && !self.ignore
    }

    /// Drops whatever readout is in flight until the next frame start.
    pub fn abandon(&mut self) {
        self.ignore = true;
    }

    /// Replaces a region's bounds; applied at the next frame start.
    pub fn set_region(&mut self, id: usize, region: RoiRegion) -> bool {
        let fits = region.start_x <= region.end_x
            && region.start_y <= region.end_y
            && region.end_x < self.sensor.0
            && region.end_y < self.sensor.1;
        if id >= ROI_REGIONS || !fits {
            return false;
        }
        self.regions[id] = RoiRegion {
            enabled: true,
            ..region
        };
        self.geometry_dirty = true;
        true
    }

    pub fn disable_region(&mut self, id: usize) {
        if let Some(region) = self.regions.get_mut(id) {
            region.enabled = false;
            self.geometry_dirty = true;
        }
    }

    pub fn frame_start(
        &mut self,
        global_shutter: bool,
        reset_read: bool,
        ctx: &mut TranslateContext,
    ) -> Result<(), PacketError> {
        if self.state == StagingState::Accumulating && !self.ignore {
            device_log!(ctx.diag(), Error, "APS: new frame started before the previous one ended, dropping it.");
        }

        if self.geometry_dirty {
            self.geometry =
                ReadoutGeometry::build(&self.regions, self.sensor, self.orientation, self.interleaved);
            self.reset_values = vec![0; self.geometry.pixel_count()];
            self.geometry_dirty = false;
        }

        let now = ctx.current();
        self.global_shutter = global_shutter;
        self.reset_read = reset_read;
        self.readout = Readout::Reset;
        self.count_x = [0; 2];
        self.count_y = [0; 2];
        self.valid = true;
        self.ts_start_of_frame = now;
        self.ts_end_of_frame = now;
        self.ts_start_of_exposure = now;
        self.ts_end_of_exposure = now;

        if self.geometry.regions().is_empty() {
            device_log!(ctx.diag(), Warning, "APS: frame started with no ROI region enabled, ignoring it.");
            self.state = StagingState::Idle;
            self.ignore = true;
            return Ok(());
        }

        let color_filter = self.color_filter;
        self.frames = self
            .geometry
            .regions()
            .iter()
            .map(|r| FrameEvent {
                roi_id: r.roi_id,
                color_filter,
                length_x: r.length_x,
                length_y: r.length_y,
                position_x: r.position_x,
                position_y: r.position_y,
                pixels: vec![0; usize::from(r.length_x) * usize::from(r.length_y)],
                ..Default::default()
            })
            .collect();
        self.state = StagingState::Accumulating;
        self.ignore = false;

        ctx.push_special(SpecialEventType::ApsFrameStart)?;
        if !reset_read {
            // Without reset read the exposure starts with the frame.
            ctx.push_special(SpecialEventType::ApsExposureStart)?;
        }
        Ok(())
    }

    pub fn column_start(&mut self, readout: Readout, ctx: &mut TranslateContext) -> Result<(), PacketError> {
        if !self.active() {
            return Ok(());
        }

        let r = readout as usize;
        self.readout = readout;
        self.count_y[r] = 0;

        match readout {
            Readout::Reset if !self.global_shutter && self.count_x[r] == 0 => {
                // Rolling shutter: exposure starts with the first column reset.
                self.ts_start_of_exposure = ctx.current();
                ctx.push_special(SpecialEventType::ApsExposureStart)?;
            }
            Readout::Signal if self.count_x[r] == 0 => {
                self.ts_end_of_exposure = ctx.current();
                ctx.push_special(SpecialEventType::ApsExposureEnd)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn column_end(&mut self, ctx: &mut TranslateContext) -> Result<(), PacketError> {
        if !self.active() {
            return Ok(());
        }

        let r = self.readout as usize;
        if self.count_y[r] != self.geometry.expected_rows() {
            device_log!(
                ctx.diag(),
                Error,
                "APS: column {} of {:?} read has {} rows, expected {}.",
                self.count_x[r],
                self.readout,
                self.count_y[r],
                self.geometry.expected_rows()
            );
            self.valid = false;
        }
        self.count_x[r] += 1;

        if self.readout == Readout::Reset
            && self.global_shutter
            && self.count_x[r] == self.geometry.expected_columns()
        {
            // Global shutter: exposure starts once every column was reset.
            self.ts_start_of_exposure = ctx.current();
            ctx.push_special(SpecialEventType::ApsExposureStart)?;
        }
        Ok(())
    }

    /// Stores one ADC sample at the current readout position.
    pub fn sample(&mut self, value: u16, ctx: &mut TranslateContext) {
        if !self.active() {
            return;
        }

        let r = self.readout as usize;
        let (x, y) = (self.count_x[r], self.count_y[r]);
        if x >= self.geometry.expected_columns() || y >= self.geometry.expected_rows() {
            device_log!(
                ctx.diag(),
                Error,
                "APS: ADC sample outside the readout geometry (column {}, row {}).",
                x,
                y
            );
            self.valid = false;
            return;
        }
        self.count_y[r] += 1;

        let adc_max = (1u16 << self.adc_depth) - 1;
        let value = value & adc_max;
        let index = usize::from(x) * usize::from(self.geometry.expected_rows()) + usize::from(y);

        match self.readout {
            Readout::Reset => self.reset_values[index] = value,
            Readout::Signal => {
                let reset = if self.reset_read {
                    self.reset_values[index]
                } else {
                    adc_max
                };
                let pixel = cds(reset, value, self.adc_depth);
                for target in self.geometry.targets(index) {
                    self.frames[usize::from(target.region)].pixels[target.offset as usize] = pixel;
                }
            }
        }
    }

    /// Finishes the readout, writes its frames out and returns a new exposure
    /// suggestion when auto exposure is on.
    pub fn frame_end(
        &mut self,
        reported_exposure: Option<u32>,
        ctx: &mut TranslateContext,
    ) -> Result<Option<u32>, PacketError> {
        if !self.active() {
            self.state = StagingState::Idle;
            return Ok(None);
        }

        self.ts_end_of_frame = ctx.current();
        self.finalize(ctx);
        ctx.push_special(SpecialEventType::ApsFrameEnd)?;

        let suggestion = match reported_exposure {
            Some(exposure) if self.valid && ctx.settings().auto_exposure() => {
                autoexposure::calculate(&self.frames, exposure, ctx.settings().last_exposure())
            }
            _ => None,
        };

        self.commit_into(ctx)?;

        if let Some(exposure) = suggestion {
            ctx.request_write(MODULE_APS, APS_EXPOSURE, exposure);
        }
        Ok(suggestion)
    }

    /// Checks the column counts and stamps the frames.
    fn finalize(&mut self, ctx: &TranslateContext) {
        let expected = self.geometry.expected_columns();
        let expected_reset = if self.reset_read { expected } else { 0 };

        if self.count_x[Readout::Reset as usize] != expected_reset {
            device_log!(
                ctx.diag(),
                Error,
                "APS: reset read has {} columns, expected {}.",
                self.count_x[Readout::Reset as usize],
                expected_reset
            );
            self.valid = false;
        }
        if self.count_x[Readout::Signal as usize] != expected {
            device_log!(
                ctx.diag(),
                Error,
                "APS: signal read has {} columns, expected {}.",
                self.count_x[Readout::Signal as usize],
                expected
            );
            self.valid = false;
        }

        for frame in self.frames.iter_mut() {
            frame.ts_start_of_frame = self.ts_start_of_frame;
            frame.ts_end_of_frame = self.ts_end_of_frame;
            frame.ts_start_of_exposure = self.ts_start_of_exposure;
            frame.ts_end_of_exposure = self.ts_end_of_exposure;
            frame.valid = self.valid;
        }
        self.state = StagingState::Ready;
    }

    /// Moves the finalized frames into the output packet.
    fn commit_into(&mut self, ctx: &mut TranslateContext) -> Result<(), PacketError> {
        debug_assert_eq!(self.state, StagingState::Ready);
        for frame in self.frames.drain(..) {
            ctx.push(frame)?;
        }
        self.state = StagingState::Idle;
        Ok(())
    }
}
