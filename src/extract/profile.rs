//! Spatial-profile helpers: collapse a frame along the dispersion axis and
//! locate the resolvable spectra on the slit.

use crate::frame::Frame;
use crate::stats::robust_background;

/// A resolvable spectrum's footprint in the collapsed spatial profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialPeak {
    /// Spatial row of the profile maximum.
    pub row: usize,
    /// Profile height above the estimated background.
    pub height: f32,
}

/// Collapse a frame along the dispersion axis into a per-row spatial profile.
pub(crate) fn spatial_profile(frame: &Frame) -> Vec<f32> {
    let mut profile = vec![0.0_f32; frame.height()];
    for (row, slot) in profile.iter_mut().enumerate() {
        let mut sum = 0.0_f64;
        for col in 0..frame.width() {
            sum += frame.get(col, row) as f64;
        }
        *slot = (sum / frame.width() as f64) as f32;
    }
    profile
}

/// Detect resolvable peaks in a spatial profile.
///
/// A row is a peak when it clears `median + snr * sigma` (robust estimates)
/// and is the maximum within `min_separation` rows on either side. Peaks are
/// returned brightest-first, matching the extraction order downstream.
pub(crate) fn find_spatial_peaks(
    profile: &[f32],
    snr: f32,
    min_separation: usize,
    max_targets: usize,
) -> Vec<SpatialPeak> {
    let (median, sigma) = robust_background(profile, 5, 3.0);
    let threshold = median + snr * sigma;

    let n = profile.len();
    let mut peaks = Vec::new();
    for row in 0..n {
        let v = profile[row];
        if v <= threshold {
            continue;
        }
        let lo = row.saturating_sub(min_separation);
        let hi = (row + min_separation + 1).min(n);
        let window_max = profile[lo..hi]
            .iter()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);
        if v < window_max {
            continue;
        }
        // On a flat-topped (saturated) peak, keep only the first row
        if row > lo && profile[lo..row].iter().any(|&w| w == v) {
            continue;
        }
        peaks.push(SpatialPeak {
            row,
            height: v - median,
        });
    }

    peaks.sort_by(|a, b| {
        b.height
            .partial_cmp(&a.height)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    peaks.truncate(max_targets);
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameHeader;

    fn frame_with_rows(width: usize, rows: &[(usize, f32)], height: usize) -> Frame {
        let mut pixels = vec![5.0_f32; width * height];
        for &(row, level) in rows {
            for col in 0..width {
                pixels[row * width + col] = level;
            }
        }
        Frame::from_raw(pixels, width, height, FrameHeader::default()).unwrap()
    }

    #[test]
    fn single_bright_row_is_found() {
        let frame = frame_with_rows(64, &[(20, 500.0)], 48);
        let profile = spatial_profile(&frame);
        let peaks = find_spatial_peaks(&profile, 3.0, 3, 3);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].row, 20);
    }

    #[test]
    fn two_separated_rows_sorted_by_brightness() {
        let frame = frame_with_rows(64, &[(10, 300.0), (35, 900.0)], 48);
        let profile = spatial_profile(&frame);
        let peaks = find_spatial_peaks(&profile, 3.0, 3, 3);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].row, 35);
        assert_eq!(peaks[1].row, 10);
    }

    #[test]
    fn flat_profile_yields_no_peaks() {
        let frame = frame_with_rows(64, &[], 48);
        let profile = spatial_profile(&frame);
        let peaks = find_spatial_peaks(&profile, 3.0, 3, 3);
        assert!(peaks.is_empty());
    }
}
