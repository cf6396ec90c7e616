//! Trace model: fit a smooth curve describing where a spectrum's spatial
//! center falls as a function of dispersion pixel.
//!
//! The frame is sampled in narrow dispersion-axis bins. Each bin is collapsed
//! to a spatial profile and centroided with an intensity-weighted mean
//! restricted to a window around the previous bin's center, so the trace
//! cannot jump to noise or to a neighboring spectrum. A low-order polynomial
//! is then fit through the bin centroids.

use tracing::debug;

use crate::error::ReduceError;
use crate::frame::Frame;
use crate::stats::{polyfit, polyval, robust_background};

/// Configuration for trace fitting.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Width of each dispersion-axis sampling bin, in columns. Default: 16.
    pub bin_width: usize,
    /// Half-width of the spatial centroiding window around the previous
    /// bin's center, in rows. Default: 10.
    pub centroid_half_width: usize,
    /// Signal-to-noise floor a bin's windowed peak must clear to contribute
    /// a centroid. Default: 3.0.
    pub min_snr: f32,
    /// Minimum number of contributing bins below which the trace fails.
    /// Default: 6.
    pub min_valid_bins: usize,
    /// Degree of the polynomial fit through the bin centroids. Default: 2.
    pub poly_degree: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            bin_width: 16,
            centroid_half_width: 10,
            min_snr: 3.0,
            min_valid_bins: 6,
            poly_degree: 2,
        }
    }
}

/// A fitted trace: `center(dispersion_pixel) -> spatial_pixel`.
///
/// Coefficients are stored against a normalized abscissa (`x / scale`) so
/// they stay well-conditioned on wide detectors. Read-only once fit.
#[derive(Debug, Clone)]
pub struct Trace {
    coeffs: Vec<f64>,
    scale: f64,
    domain: [f64; 2],
    rms: f64,
    bins_used: usize,
}

impl Trace {
    /// Spatial center at dispersion pixel `x`.
    pub fn center_at(&self, x: f64) -> f64 {
        polyval(&self.coeffs, x / self.scale)
    }

    /// Dispersion-pixel range over which the trace was fit.
    pub fn domain(&self) -> (f64, f64) {
        (self.domain[0], self.domain[1])
    }

    /// RMS residual of the centroid fit, in pixels.
    pub fn rms(&self) -> f64 {
        self.rms
    }

    /// Number of dispersion bins that contributed a centroid.
    pub fn bins_used(&self) -> usize {
        self.bins_used
    }
}

/// Fit a trace through a frame.
///
/// `start_hint` seeds the first bin's centroiding window with an approximate
/// spatial position; without it, the peak of the full-frame collapsed
/// spatial profile is used. Pure function of its inputs.
pub fn fit_trace(
    frame: &Frame,
    start_hint: Option<f64>,
    config: &TraceConfig,
) -> Result<Trace, ReduceError> {
    let width = frame.width();
    let height = frame.height();
    let bin_width = config.bin_width.max(1);

    let start = match start_hint {
        Some(hint) => hint,
        None => {
            let profile = super::profile::spatial_profile(frame);
            let peak_row = profile
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(row, _)| row)
                .unwrap_or(height / 2);
            peak_row as f64
        }
    };

    let mut xs: Vec<f64> = Vec::new();
    let mut ys: Vec<f64> = Vec::new();
    let mut prev_center = start;
    let mut bin_profile = vec![0.0_f32; height];

    let mut x0 = 0usize;
    while x0 < width {
        let x1 = (x0 + bin_width).min(width);

        for (row, slot) in bin_profile.iter_mut().enumerate() {
            let mut sum = 0.0_f64;
            for col in x0..x1 {
                sum += frame.get(col, row) as f64;
            }
            *slot = (sum / (x1 - x0) as f64) as f32;
        }

        let (median, sigma) = robust_background(&bin_profile, 5, 3.0);

        let lo = (prev_center - config.centroid_half_width as f64)
            .floor()
            .max(0.0) as usize;
        let hi = ((prev_center + config.centroid_half_width as f64).ceil() as usize + 1)
            .min(height);

        if lo < hi {
            let window = &bin_profile[lo..hi];
            let peak = window.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

            if peak - median >= config.min_snr * sigma.max(1e-6) {
                let mut weight_sum = 0.0_f64;
                let mut moment = 0.0_f64;
                for (offset, &v) in window.iter().enumerate() {
                    let w = (v - median).max(0.0) as f64;
                    weight_sum += w;
                    moment += (lo + offset) as f64 * w;
                }
                if weight_sum > 0.0 {
                    let centroid = moment / weight_sum;
                    xs.push((x0 + x1 - 1) as f64 / 2.0);
                    ys.push(centroid);
                    prev_center = centroid;
                }
            }
        }

        x0 = x1;
    }

    if xs.len() < config.min_valid_bins {
        return Err(ReduceError::TraceNotFound {
            valid_bins: xs.len(),
            required: config.min_valid_bins,
        });
    }

    let scale = (width.saturating_sub(1)).max(1) as f64;
    let degree = config.poly_degree.min(xs.len() - 1);
    let us: Vec<f64> = xs.iter().map(|&x| x / scale).collect();
    let coeffs = polyfit(&us, &ys, degree).ok_or(ReduceError::TraceNotFound {
        valid_bins: xs.len(),
        required: config.min_valid_bins,
    })?;

    let mut sum_sq = 0.0_f64;
    for (&u, &y) in us.iter().zip(ys.iter()) {
        let r = y - polyval(&coeffs, u);
        sum_sq += r * r;
    }
    let rms = (sum_sq / xs.len() as f64).sqrt();

    debug!("trace fit: {} bins, rms {:.3} px", xs.len(), rms);

    Ok(Trace {
        coeffs,
        scale,
        domain: [xs[0], xs[xs.len() - 1]],
        rms,
        bins_used: xs.len(),
    })
}
