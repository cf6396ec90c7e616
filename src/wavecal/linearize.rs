//! Resample a calibrated spectrum onto a uniform wavelength grid.
//!
//! Non-linear wavelength solutions are awkward to persist in standard
//! headers, so the spectrum is linearized instead: every pixel is mapped to
//! its wavelength, a uniform grid is laid over the mapped range (step = the
//! solution's local dispersion at the domain centre), and the intensities
//! are resampled with a natural cubic spline. A Jacobian factor rescales
//! each sample by the local pixel-per-step width so total flux is preserved
//! for a monotonic solution; with the identity solution the operation
//! reproduces its input exactly.

use tracing::debug;

use crate::error::ReduceError;
use crate::spectrum::ExtractedSpectrum;

use super::solution::WavelengthSolution;

/// Configuration for linearization.
#[derive(Debug, Clone, Default)]
pub struct LinearizeConfig {
    /// Odd kernel size for an optional median filter applied after
    /// resampling. `None` (the default) keeps linearization idempotent.
    pub median_kernel: Option<usize>,
}

/// A spectrum resampled onto a uniform wavelength grid.
#[derive(Debug, Clone)]
pub struct LinearizedSpectrum {
    /// Wavelength of the first sample.
    pub start: f64,
    /// Uniform wavelength step.
    pub step: f64,
    /// Resampled intensities.
    pub values: Vec<f32>,
    /// Coefficients of the solution that produced the grid (normalized
    /// representation, ascending powers).
    pub solution_coeffs: Vec<f64>,
    /// RMS residual of that solution, in wavelength units.
    pub solution_rms: f64,
    /// Object name of the source spectrum.
    pub source: String,
}

impl LinearizedSpectrum {
    /// Number of grid samples.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Wavelength of sample `index`.
    pub fn wavelength_at(&self, index: usize) -> f64 {
        self.start + self.step * index as f64
    }

    /// FITS-style keyword cards describing the grid and the solution, for
    /// the external I/O collaborator to write alongside the data.
    pub fn header_cards(&self) -> Vec<(String, String)> {
        vec![
            ("CTYPE1".into(), "LINEAR".into()),
            ("CRPIX1".into(), "1".into()),
            ("CRVAL1".into(), format!("{:.6}", self.start)),
            ("CDELT1".into(), format!("{:.6}", self.step)),
            ("CD1_1".into(), format!("{:.6}", self.step)),
            ("NAXIS1".into(), format!("{}", self.count())),
            (
                "HISTORY".into(),
                format!(
                    "wavelength solution rms = {:.4}, coefficients = {:?}",
                    self.solution_rms, self.solution_coeffs
                ),
            ),
        ]
    }
}

/// Resample a spectrum onto the uniform grid implied by a solution.
///
/// Fails with [`ReduceError::CalibrationFailed`] when the solution is not
/// strictly monotonic over the spectrum, or when its dispersion degenerates.
pub fn linearize(
    spectrum: &ExtractedSpectrum,
    solution: &WavelengthSolution,
    config: &LinearizeConfig,
) -> Result<LinearizedSpectrum, ReduceError> {
    let n = spectrum.values.len();
    if n < 2 {
        return Err(ReduceError::CalibrationFailed(
            "spectrum too short to linearize".into(),
        ));
    }

    let mut wavelengths: Vec<f64> = (0..n).map(|p| solution.wavelength_at(p as f64)).collect();
    let mut values: Vec<f64> = spectrum.values.iter().map(|&v| v as f64).collect();
    let mut pixels: Vec<f64> = (0..n).map(|p| p as f64).collect();

    let increasing = wavelengths.windows(2).all(|w| w[1] > w[0]);
    let decreasing = wavelengths.windows(2).all(|w| w[1] < w[0]);
    if decreasing {
        wavelengths.reverse();
        values.reverse();
        pixels.reverse();
    } else if !increasing {
        return Err(ReduceError::CalibrationFailed(
            "wavelength solution is not monotonic over the spectrum".into(),
        ));
    }

    let mid_pixel = (n - 1) as f64 / 2.0;
    let step = solution.dispersion_at(mid_pixel).abs();
    if !(step.is_finite() && step > 0.0) {
        return Err(ReduceError::CalibrationFailed(format!(
            "degenerate dispersion {step} at the reference pixel"
        )));
    }

    let start = wavelengths[0];
    let span = wavelengths[n - 1] - start;
    let count = (span / step).floor() as usize + 1;

    let intensity = CubicSpline::new(&wavelengths, &values);
    let pixel_of = CubicSpline::new(&wavelengths, &pixels);

    let mut resampled = Vec::with_capacity(count);
    for k in 0..count {
        let lambda = start + step * k as f64;
        let p = pixel_of.evaluate(lambda);
        let local = solution.dispersion_at(p).abs();
        // Jacobian: pixels spanned by one output step at this wavelength
        let jacobian = if local > 0.0 { step / local } else { 1.0 };
        resampled.push((intensity.evaluate(lambda) * jacobian) as f32);
    }

    if let Some(kernel) = config.median_kernel {
        resampled = median_filter(&resampled, kernel);
    }

    debug!("linearized: start {start:.3}, step {step:.5}, {count} samples");

    Ok(LinearizedSpectrum {
        start,
        step,
        values: resampled,
        solution_coeffs: solution.coeffs.clone(),
        solution_rms: solution.rms,
        source: spectrum.source.clone(),
    })
}

/// Sliding odd-kernel median filter with edge replication.
fn median_filter(values: &[f32], kernel: usize) -> Vec<f32> {
    let kernel = kernel.max(1) | 1; // force odd
    let half = kernel / 2;
    let n = values.len();
    let mut window = Vec::with_capacity(kernel);
    (0..n)
        .map(|i| {
            window.clear();
            for j in i.saturating_sub(half)..(i + half + 1).min(n) {
                window.push(values[j]);
            }
            window.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            window[window.len() / 2]
        })
        .collect()
}

// ── Natural cubic spline ────────────────────────────────────────────────────

/// Natural cubic spline over strictly increasing knots.
struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    y2s: Vec<f64>,
}

impl CubicSpline {
    fn new(xs: &[f64], ys: &[f64]) -> Self {
        debug_assert_eq!(xs.len(), ys.len());
        debug_assert!(xs.len() >= 2);
        let n = xs.len();
        let mut y2s = vec![0.0; n];
        let mut u = vec![0.0; n - 1];

        for i in 1..n - 1 {
            let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
            let p = sig * y2s[i - 1] + 2.0;
            y2s[i] = (sig - 1.0) / p;
            u[i] = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i])
                - (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
            u[i] = (6.0 * u[i] / (xs[i + 1] - xs[i - 1]) - sig * u[i - 1]) / p;
        }
        for k in (0..n - 2).rev() {
            y2s[k + 1] = y2s[k + 1] * y2s[k + 2] + u[k + 1];
        }

        Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            y2s,
        }
    }

    fn evaluate(&self, x: f64) -> f64 {
        let n = self.xs.len();
        let mut lo = 0;
        let mut hi = n - 1;
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.xs[mid] > x {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        let h = self.xs[hi] - self.xs[lo];
        let a = (self.xs[hi] - x) / h;
        let b = (x - self.xs[lo]) / h;
        a * self.ys[lo]
            + b * self.ys[hi]
            + ((a * a * a - a) * self.y2s[lo] + (b * b * b - b) * self.y2s[hi]) * h * h / 6.0
    }
}
