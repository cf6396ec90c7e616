//! Aperture extraction: build a spatial mask from a trace and collapse the
//! frame into a 1-D spectrum.
//!
//! Each dispersion column sums the rows inside `center ± half_width`. An
//! optional background mode samples two strips adjacent to the aperture,
//! takes their median per column, and subtracts it before summing. Columns
//! whose window leaves the frame are flagged invalid instead of failing.

use tracing::warn;

use crate::error::ReduceError;
use crate::frame::Frame;
use crate::spectrum::{ExtractedSpectrum, FrameKind};

use super::trace::Trace;

/// How aperture pixels are combined into a 1-D intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionStrategy {
    /// Straight sum of aperture pixels.
    #[default]
    Sum,
    /// Variance-weighted (optimal) extraction. Reserved; selecting it is an
    /// error until the weighting numerics land.
    Optimal,
}

/// Background-strip sampling parameters.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundConfig {
    /// Strip width in rows. Default: 5.
    pub width: usize,
    /// Gap between the aperture edge and the strip, in rows. Default: 3.
    pub gap: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { width: 5, gap: 3 }
    }
}

/// Configuration for aperture extraction.
#[derive(Debug, Clone)]
pub struct ApertureConfig {
    /// Spatial half-width of the aperture, in rows. Default: 5.
    pub half_width: usize,
    /// Background estimation; `None` disables subtraction. Default: enabled
    /// with [`BackgroundConfig::default`].
    pub background: Option<BackgroundConfig>,
    /// Pixel-combination strategy. Default: [`ExtractionStrategy::Sum`].
    pub strategy: ExtractionStrategy,
}

impl Default for ApertureConfig {
    fn default() -> Self {
        Self {
            half_width: 5,
            background: Some(BackgroundConfig::default()),
            strategy: ExtractionStrategy::Sum,
        }
    }
}

/// Inclusive spatial window for one dispersion column.
#[derive(Debug, Clone, Copy)]
pub struct ApertureColumn {
    /// First aperture row.
    pub lo: usize,
    /// Last aperture row (inclusive).
    pub hi: usize,
    /// False when the window was clipped by the frame edge.
    pub valid: bool,
}

/// Per-column spatial windows derived from a trace. Ephemeral; recomputed
/// for every extraction.
#[derive(Debug, Clone)]
pub struct ApertureMask {
    /// One window per dispersion column.
    pub columns: Vec<ApertureColumn>,
    /// Aperture half-width the mask was built with.
    pub half_width: usize,
}

/// Build the aperture mask for a frame/trace pair.
///
/// A column is valid only when the full `center ± half_width` window fits
/// inside the frame; partially clipped windows are marked invalid per the
/// edge policy.
pub fn build_mask(frame: &Frame, trace: &Trace, half_width: usize) -> ApertureMask {
    let height = frame.height() as isize;
    let hw = half_width as isize;

    let columns = (0..frame.width())
        .map(|col| {
            let center = trace.center_at(col as f64).round() as isize;
            let lo = center - hw;
            let hi = center + hw;
            if lo < 0 || hi >= height {
                ApertureColumn {
                    lo: 0,
                    hi: 0,
                    valid: false,
                }
            } else {
                ApertureColumn {
                    lo: lo as usize,
                    hi: hi as usize,
                    valid: true,
                }
            }
        })
        .collect();

    ApertureMask {
        columns,
        half_width,
    }
}

/// Extract a 1-D spectrum by summing the frame inside an aperture mask.
///
/// `kind` records the provenance of the frame being collapsed; lamps are
/// routinely extracted through a mask built from their science frame's
/// trace, since both share the optical path.
pub fn extract_spectrum(
    frame: &Frame,
    trace: &Trace,
    config: &ApertureConfig,
    kind: FrameKind,
) -> Result<ExtractedSpectrum, ReduceError> {
    if config.strategy == ExtractionStrategy::Optimal {
        return Err(ReduceError::UnsupportedStrategy("optimal"));
    }

    let mask = build_mask(frame, trace, config.half_width);
    let mut values = vec![0.0_f32; frame.width()];
    let mut valid = vec![false; frame.width()];
    let mut invalid_columns = 0usize;
    let mut background_fallback_columns = 0usize;
    let mut strip = Vec::new();

    for (col, window) in mask.columns.iter().enumerate() {
        if !window.valid {
            invalid_columns += 1;
            continue;
        }

        let background = match &config.background {
            Some(bg) => {
                strip.clear();
                collect_strip(
                    frame,
                    col,
                    window.lo as isize - (bg.gap + bg.width) as isize,
                    window.lo as isize - bg.gap as isize - 1,
                    &mut strip,
                );
                collect_strip(
                    frame,
                    col,
                    window.hi as isize + bg.gap as isize + 1,
                    window.hi as isize + (bg.gap + bg.width) as isize,
                    &mut strip,
                );
                if strip.is_empty() {
                    background_fallback_columns += 1;
                    0.0
                } else {
                    median_f32(&mut strip)
                }
            }
            None => 0.0,
        };

        let mut sum = 0.0_f64;
        for row in window.lo..=window.hi {
            sum += (frame.get(col, row) - background) as f64;
        }
        values[col] = sum as f32;
        valid[col] = true;
    }

    if background_fallback_columns > 0 {
        warn!(
            columns = background_fallback_columns,
            object = frame.header().object.as_str(),
            "background strips fell outside the frame; subtracted nothing there"
        );
    }

    Ok(ExtractedSpectrum {
        values,
        valid,
        source: frame.header().object.clone(),
        kind,
        trace_rms: trace.rms(),
        invalid_columns,
        background_fallback_columns,
    })
}

/// Gather in-frame pixels of one column between two (possibly out-of-range)
/// row bounds.
fn collect_strip(frame: &Frame, col: usize, lo: isize, hi: isize, out: &mut Vec<f32>) {
    let height = frame.height() as isize;
    let lo = lo.max(0);
    let hi = hi.min(height - 1);
    for row in lo..=hi {
        out.push(frame.get(col, row as usize));
    }
}

fn median_f32(values: &mut [f32]) -> f32 {
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::trace::{fit_trace, TraceConfig};
    use crate::frame::FrameHeader;

    fn gaussian_frame(
        width: usize,
        height: usize,
        center: f64,
        amplitude: f64,
        sigma: f64,
        background: f32,
    ) -> Frame {
        let mut pixels = vec![background; width * height];
        for col in 0..width {
            for row in 0..height {
                let d = row as f64 - center;
                pixels[row * width + col] +=
                    (amplitude * (-d * d / (2.0 * sigma * sigma)).exp()) as f32;
            }
        }
        Frame::from_raw(pixels, width, height, FrameHeader::default()).unwrap()
    }

    fn trace_for(frame: &Frame) -> Trace {
        fit_trace(frame, None, &TraceConfig::default()).unwrap()
    }

    #[test]
    fn summed_flux_matches_analytic_integral() {
        let amplitude = 400.0;
        let sigma = 2.0;
        let frame = gaussian_frame(128, 64, 30.0, amplitude, sigma, 0.0);
        let trace = trace_for(&frame);
        let config = ApertureConfig {
            half_width: 10,
            background: None,
            strategy: ExtractionStrategy::Sum,
        };
        let spectrum = extract_spectrum(&frame, &trace, &config, FrameKind::Science).unwrap();

        // Analytic integral of the profile; truncation at 5 sigma is negligible
        let expected = amplitude * sigma * (2.0 * std::f64::consts::PI).sqrt();
        for (col, (&v, &ok)) in spectrum.values.iter().zip(&spectrum.valid).enumerate() {
            assert!(ok, "column {col} unexpectedly invalid");
            assert!(
                (v as f64 - expected).abs() / expected < 0.01,
                "column {col}: flux {v} vs analytic {expected}"
            );
        }
    }

    #[test]
    fn background_strips_remove_constant_level() {
        let amplitude = 400.0;
        let sigma = 2.0;
        let level = 50.0_f32;
        let frame = gaussian_frame(128, 64, 30.0, amplitude, sigma, level);
        let trace = trace_for(&frame);
        let config = ApertureConfig {
            half_width: 10,
            background: Some(BackgroundConfig { width: 5, gap: 4 }),
            strategy: ExtractionStrategy::Sum,
        };
        let spectrum = extract_spectrum(&frame, &trace, &config, FrameKind::Science).unwrap();

        let expected = amplitude * sigma * (2.0 * std::f64::consts::PI).sqrt();
        let mid = spectrum.values[64] as f64;
        assert!(
            (mid - expected).abs() / expected < 0.02,
            "flux {mid} vs analytic {expected}"
        );
        assert_eq!(spectrum.background_fallback_columns, 0);
    }

    #[test]
    fn edge_clipped_columns_are_flagged_not_fatal() {
        // Spectrum near the bottom edge; a wide aperture must clip
        let frame = gaussian_frame(128, 32, 4.0, 600.0, 1.5, 10.0);
        let trace = fit_trace(
            &frame,
            Some(4.0),
            &TraceConfig {
                centroid_half_width: 4,
                ..TraceConfig::default()
            },
        )
        .unwrap();
        let config = ApertureConfig {
            half_width: 6,
            background: None,
            strategy: ExtractionStrategy::Sum,
        };
        let spectrum = extract_spectrum(&frame, &trace, &config, FrameKind::Science).unwrap();
        assert_eq!(spectrum.invalid_columns, 128);
        assert!(spectrum.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn optimal_strategy_is_rejected() {
        let frame = gaussian_frame(128, 64, 30.0, 400.0, 2.0, 0.0);
        let trace = trace_for(&frame);
        let config = ApertureConfig {
            strategy: ExtractionStrategy::Optimal,
            ..ApertureConfig::default()
        };
        let err = extract_spectrum(&frame, &trace, &config, FrameKind::Science).unwrap_err();
        assert!(matches!(err, ReduceError::UnsupportedStrategy(_)));
    }
}
