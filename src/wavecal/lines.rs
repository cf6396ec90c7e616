//! Emission-line detection and sub-pixel centroiding in a 1-D lamp spectrum.
//!
//! Detection thresholds on a robust noise estimate, takes windowed local
//! maxima as raw peaks, then refines each to a sub-pixel centroid with a
//! Gaussian profile fit (log-parabola over the background-subtracted peak
//! samples). Peaks whose fitted width is inconsistent with an isolated line,
//! or whose fit degenerates, are flagged rather than dropped.

use tracing::{debug, warn};

use crate::spectrum::ExtractedSpectrum;
use crate::stats::{polyfit, robust_background};

/// Quality of a detected line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineQuality {
    /// Isolated line with a trustworthy Gaussian centroid.
    WellResolved,
    /// Fitted width outside the isolated-line range; likely a blend.
    Blended,
    /// The profile fit degenerated; centroid fell back to a weighted mean.
    FitFailed,
}

/// A detected emission line in a lamp spectrum.
#[derive(Debug, Clone, Copy)]
pub struct IdentifiedLine {
    /// Sub-pixel centroid along the dispersion axis.
    pub pixel: f64,
    /// Fitted amplitude above background.
    pub amplitude: f64,
    /// Fitted Gaussian sigma, in pixels.
    pub sigma: f64,
    /// Quality flag; only [`LineQuality::WellResolved`] lines feed the
    /// automatic solution fitter.
    pub quality: LineQuality,
}

/// Configuration for line detection.
#[derive(Debug, Clone)]
pub struct LineFinderConfig {
    /// Detection threshold in noise sigmas above the background level.
    /// Default: 5.0.
    pub snr_threshold: f32,
    /// A raw peak must be the maximum within this many pixels on either
    /// side. Default: 6.
    pub min_separation: usize,
    /// Half-width of the profile-fit window around a raw peak, in pixels.
    /// Default: 5.
    pub fit_half_width: usize,
    /// Smallest fitted sigma accepted as a real (resolved) line. Default: 0.5.
    pub min_line_sigma: f64,
    /// Largest fitted sigma accepted as an isolated line. Default: 6.0.
    pub max_line_sigma: f64,
    /// Iterations for the sigma-clipped noise estimate. Default: 5.
    pub clip_iterations: usize,
    /// Clip factor for the noise estimate. Default: 3.0.
    pub clip_factor: f32,
}

impl Default for LineFinderConfig {
    fn default() -> Self {
        Self {
            snr_threshold: 5.0,
            min_separation: 6,
            fit_half_width: 5,
            min_line_sigma: 0.5,
            max_line_sigma: 6.0,
            clip_iterations: 5,
            clip_factor: 3.0,
        }
    }
}

/// Detect and centroid emission lines in a lamp spectrum.
///
/// Invalid (edge-flagged) pixels are treated as background. Lines are
/// returned ordered by pixel position; flagged lines are kept with their
/// flag so nothing is dropped silently.
pub fn find_lines(spectrum: &ExtractedSpectrum, config: &LineFinderConfig) -> Vec<IdentifiedLine> {
    find_lines_in(&spectrum.values, config)
}

/// Detect and centroid emission lines in a bare intensity array.
pub fn find_lines_in(values: &[f32], config: &LineFinderConfig) -> Vec<IdentifiedLine> {
    let n = values.len();
    if n < 3 {
        return Vec::new();
    }

    let (median, sigma) = robust_background(values, config.clip_iterations, config.clip_factor);
    let threshold = median + config.snr_threshold * sigma;

    let mut lines = Vec::new();
    let sep = config.min_separation.max(1);

    for i in 1..n - 1 {
        let v = values[i];
        if v <= threshold || v < values[i - 1] || v < values[i + 1] {
            continue;
        }
        let lo = i.saturating_sub(sep);
        let hi = (i + sep + 1).min(n);
        let window_max = values[lo..hi].iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        if v < window_max {
            continue;
        }
        // Plateau: keep only the leftmost sample of a flat top
        if values[lo..i].iter().any(|&w| w == v) {
            continue;
        }

        lines.push(centroid_line(values, i, median as f64, config));
    }

    let flagged = lines
        .iter()
        .filter(|l| l.quality != LineQuality::WellResolved)
        .count();
    if flagged > 0 {
        warn!(
            detected = lines.len(),
            flagged, "some detected lines were flagged as blended or unfit"
        );
    }
    debug!(detected = lines.len(), threshold, "line detection");

    lines
}

/// Refine a raw peak to a sub-pixel centroid.
///
/// Fits a parabola to the log of the background-subtracted samples around
/// the peak; for a Gaussian profile this recovers center, sigma, and
/// amplitude exactly. Falls back to an intensity-weighted mean when the
/// parabola is not concave or wanders out of the window.
fn centroid_line(
    values: &[f32],
    peak: usize,
    background: f64,
    config: &LineFinderConfig,
) -> IdentifiedLine {
    let n = values.len();
    let lo = peak.saturating_sub(config.fit_half_width);
    let hi = (peak + config.fit_half_width + 1).min(n);

    let peak_amp = (values[peak] as f64 - background).max(0.0);

    let mut xs = Vec::with_capacity(hi - lo);
    let mut ln_ys = Vec::with_capacity(hi - lo);
    for (j, &v) in values[lo..hi].iter().enumerate() {
        let y = v as f64 - background;
        // Only the upper part of the profile carries Gaussian shape;
        // near-zero samples would blow up the log weights
        if y > 0.05 * peak_amp && y > 0.0 {
            xs.push((lo + j) as f64 - peak as f64);
            ln_ys.push(y.ln());
        }
    }

    let parabola = if xs.len() >= 3 {
        polyfit(&xs, &ln_ys, 2)
    } else {
        None
    };

    if let Some(c) = parabola {
        let a2 = c[2];
        if a2 < -1e-12 {
            let center_off = -c[1] / (2.0 * a2);
            let sigma = (-1.0 / (2.0 * a2)).sqrt();
            let amplitude = (c[0] - c[1] * c[1] / (4.0 * a2)).exp();
            if center_off.abs() <= config.fit_half_width as f64 {
                let quality = if sigma >= config.min_line_sigma && sigma <= config.max_line_sigma {
                    LineQuality::WellResolved
                } else {
                    LineQuality::Blended
                };
                return IdentifiedLine {
                    pixel: peak as f64 + center_off,
                    amplitude,
                    sigma,
                    quality,
                };
            }
        }
    }

    // Degenerate fit: weighted-mean fallback, flagged
    let mut weight_sum = 0.0_f64;
    let mut moment = 0.0_f64;
    for (j, &v) in values[lo..hi].iter().enumerate() {
        let w = (v as f64 - background).max(0.0);
        weight_sum += w;
        moment += (lo + j) as f64 * w;
    }
    let pixel = if weight_sum > 0.0 {
        moment / weight_sum
    } else {
        peak as f64
    };
    IdentifiedLine {
        pixel,
        amplitude: peak_amp,
        sigma: 0.0,
        quality: LineQuality::FitFailed,
    }
}
