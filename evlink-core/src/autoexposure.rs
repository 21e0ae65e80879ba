//! Closed-loop exposure control from completed APS frames.
//!
//! [`calculate`] looks at the pixel distribution of one readout (all its ROI
//! regions together) and suggests the next exposure time. Heavily under- or
//! over-exposed frames are corrected from the fraction of saturated pixels;
//! otherwise the mean sample value is pulled towards mid-scale.

use crate::types::FrameEvent;

pub const EXPOSURE_MIN: u32 = 1;
pub const EXPOSURE_MAX: u32 = 1_000_000;

const PIXEL_BUCKETS: usize = 256;
const MSV_BUCKETS: usize = 5;

/// Buckets below this fraction of the range count as under-exposed.
const LOW_BOUNDARY: f32 = 0.10;
/// Buckets at or above this fraction of the range count as over-exposed.
const HIGH_BOUNDARY: f32 = 0.90;

/// Fraction of under- or over-exposed pixels that switches to saturation correction.
const UNDEROVER_FRAC: f32 = 0.33;
const UNDEROVER_CORRECTION: f32 = 14_000.0;
const UNDEROVER_EXPONENT: f32 = 1.65;

/// Mean sample value of a well exposed frame, buckets weighted 1..=5.
const MSV_TARGET: f32 = 3.0;
const MSV_TOLERANCE: f32 = 0.1;
/// Relative exposure change per unit of squared MSV error.
const MSV_CORRECTION: f32 = 0.25;
const MSV_DAMPING_GAIN: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
struct Histogram {
    pixels: [u32; PIXEL_BUCKETS],
    msv: [u32; MSV_BUCKETS],
    total: u32,
}

impl Histogram {
    fn from_frames(frames: &[FrameEvent]) -> Self {
        let mut hist = Self {
            pixels: [0; PIXEL_BUCKETS],
            msv: [0; MSV_BUCKETS],
            total: 0,
        };

        for &value in frames.iter().flat_map(|f| f.pixels.iter()) {
            let bucket = usize::from(value >> 8);
            hist.pixels[bucket] += 1;
            hist.msv[bucket * MSV_BUCKETS / PIXEL_BUCKETS] += 1;
            hist.total += 1;
        }
        hist
    }

    fn fraction_below(&self, boundary: f32) -> f32 {
        let limit = (boundary * PIXEL_BUCKETS as f32) as usize;
        let count: u32 = self.pixels[..limit].iter().sum();
        count as f32 / self.total as f32
    }

    fn fraction_at_or_above(&self, boundary: f32) -> f32 {
        let limit = (boundary * PIXEL_BUCKETS as f32) as usize;
        let count: u32 = self.pixels[limit..].iter().sum();
        count as f32 / self.total as f32
    }

    fn mean_sample_value(&self) -> f32 {
        let weighted: f32 = self
            .msv
            .iter()
            .enumerate()
            .map(|(i, &count)| (i + 1) as f32 * count as f32)
            .sum();
        weighted / self.total as f32
    }
}

/// Suggests a new exposure in µs, or `None` to keep the current one.
///
/// `frame_exposure` is the exposure the frames were taken with and
/// `last_set` the exposure most recently sent to the device. When they differ
/// the frames predate the last change and are not used.
pub fn calculate(frames: &[FrameEvent], frame_exposure: u32, last_set: u32) -> Option<u32> {
    if frame_exposure != last_set || frames.is_empty() {
        return None;
    }

    let hist = Histogram::from_frames(frames);
    if hist.total == 0 {
        return None;
    }

    let frac_low = hist.fraction_below(LOW_BOUNDARY);
    let frac_high = hist.fraction_at_or_above(HIGH_BOUNDARY);
    let exposure = frame_exposure as f32;

    let target = if frac_low > UNDEROVER_FRAC || frac_high > UNDEROVER_FRAC {
        let (excess, direction) = if frac_low >= frac_high {
            (frac_low - UNDEROVER_FRAC, 1.0)
        } else {
            (frac_high - UNDEROVER_FRAC, -1.0)
        };
        let mut correction = UNDEROVER_CORRECTION * excess.powf(UNDEROVER_EXPONENT);
        // A saturated frame always moves the exposure.
        if correction < 1.0 {
            correction = 1.0;
        }
        exposure + direction * correction
    } else {
        let error = MSV_TARGET - hist.mean_sample_value();
        if error.abs() <= MSV_TOLERANCE {
            return None;
        }

        let closest = frac_low.max(frac_high);
        let damping = 1.0 + MSV_DAMPING_GAIN * (UNDEROVER_FRAC - closest) / UNDEROVER_FRAC;
        let correction = exposure * MSV_CORRECTION * error * error.abs() / damping;

        let step = if correction.abs() < 1.0 {
            correction.signum()
        } else {
            correction
        };
        exposure + step
    };

    let new_exposure = target
        .round()
        .clamp(EXPOSURE_MIN as f32, EXPOSURE_MAX as f32) as u32;

    (new_exposure != frame_exposure).then_some(new_exposure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pixels: Vec<u16>) -> FrameEvent {
        FrameEvent {
            length_x: pixels.len() as u16,
            length_y: 1,
            pixels,
            valid: true,
            ..Default::default()
        }
    }

    fn uniform(value: u16, count: usize) -> FrameEvent {
        frame(vec![value; count])
    }

    #[test]
    fn test_stale_exposure_tag_ignored() {
        let frames = [uniform(0, 100)];
        assert_eq!(calculate(&frames, 1000, 2000), None);
    }

    #[test]
    fn test_no_frames_no_change() {
        assert_eq!(calculate(&[], 1000, 1000), None);
    }

    #[test]
    fn test_dark_frame_increases_exposure() {
        let frames = [uniform(0, 100)];
        let new = calculate(&frames, 1000, 1000).unwrap();
        // All pixels under-exposed: excess 0.67.
        let expected = 1000.0 + 14_000.0 * 0.67f32.powf(1.65);
        assert_eq!(new, expected.round() as u32);
    }

    #[test]
    fn test_bright_frame_decreases_exposure() {
        let frames = [uniform(u16::MAX, 100)];
        let new = calculate(&frames, 10_000, 10_000).unwrap();
        assert!(new < 10_000);
    }

    #[test]
    fn test_clipped_to_bounds() {
        let frames = [uniform(u16::MAX, 100)];
        assert_eq!(calculate(&frames, 5, 5), Some(EXPOSURE_MIN));
        let frames = [uniform(0, 100)];
        assert_eq!(calculate(&frames, EXPOSURE_MAX - 10, EXPOSURE_MAX - 10), Some(EXPOSURE_MAX));
        assert_eq!(calculate(&frames, EXPOSURE_MAX, EXPOSURE_MAX), None);
    }

    #[test]
    fn test_mid_gray_within_tolerance() {
        // Bucket 128 lands in the middle MSV bucket.
        let frames = [uniform(128 << 8, 50), uniform(128 << 8, 50)];
        assert_eq!(calculate(&frames, 4000, 4000), None);
    }

    #[test]
    fn test_msv_correction_direction() {
        // Darker than mid-scale but not saturated: bucket 70 is MSV bucket 1.
        let frames = [uniform(70 << 8, 100)];
        let new = calculate(&frames, 4000, 4000).unwrap();
        assert!(new > 4000);

        // Brighter: bucket 190 is MSV bucket 3.
        let frames = [uniform(190 << 8, 100)];
        let new = calculate(&frames, 4000, 4000).unwrap();
        assert!(new < 4000);
    }

    #[test]
    fn test_damping_weaker_near_threshold() {
        // Same MSV error; the second frame's dark pixels are under-exposed,
        // putting it close to the saturation threshold.
        let calm = [frame([vec![30 << 8; 30], vec![100 << 8; 70]].concat())];
        let near = [frame([vec![0; 30], vec![100 << 8; 70]].concat())];

        let calm_step = calculate(&calm, 4000, 4000).unwrap() as i64 - 4000;
        let near_step = calculate(&near, 4000, 4000).unwrap() as i64 - 4000;
        assert!(calm_step > 0);
        assert!(near_step > 0);
        assert!(near_step > calm_step);
    }
}
