//! Robust statistics and least-squares helpers shared by the extraction and
//! calibration stages.

use nalgebra::{DMatrix, DVector};

/// Estimate background level and noise of a 1-D sample set.
///
/// Uses the median as the background level and estimates noise from the
/// pixels at or below the median (uncontaminated by emission), with
/// sigma-clipping to reject remaining outliers. The lower-half RMS is
/// mirrored to give the full Gaussian sigma.
pub(crate) fn robust_background(
    values: &[f32],
    clip_iterations: usize,
    clip_factor: f32,
) -> (f32, f32) {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return (0.0, 0.0);
    }
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };

    let mut low_half: Vec<f32> = sorted.into_iter().filter(|&v| v <= median).collect();

    let mut sigma = 0.0_f32;
    for _ in 0..clip_iterations {
        if low_half.is_empty() {
            break;
        }
        let sum: f64 = low_half.iter().map(|&v| v as f64).sum();
        let mean_low = (sum / low_half.len() as f64) as f32;
        let var_sum: f64 = low_half
            .iter()
            .map(|&v| ((v - mean_low) as f64).powi(2))
            .sum();
        sigma = (var_sum / low_half.len() as f64).sqrt() as f32;
        if sigma < 1e-10 {
            break;
        }
        let lo = mean_low - clip_factor * sigma;
        let hi = mean_low + clip_factor * sigma;
        let before = low_half.len();
        low_half.retain(|&v| v >= lo && v <= hi);
        if low_half.len() == before {
            break; // converged
        }
    }

    (median, sigma)
}

/// Median of an unsorted f64 slice. Returns 0.0 for empty input.
pub(crate) fn median_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Robust sigma estimate from the median absolute deviation.
pub(crate) fn mad_sigma(residuals: &[f64]) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    let med = median_f64(residuals);
    let abs_devs: Vec<f64> = residuals.iter().map(|&r| (r - med).abs()).collect();
    median_f64(&abs_devs) * 1.4826
}

/// Least-squares polynomial fit via SVD.
///
/// Returns coefficients in ascending-power order (`c[0] + c[1]*x + ...`),
/// or `None` when the system is underdetermined or the solve fails.
/// Callers are expected to pass normalized abscissae so the Vandermonde
/// matrix stays well-conditioned.
pub(crate) fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(xs.len(), ys.len());
    if xs.len() < degree + 1 {
        return None;
    }
    let mut a = DMatrix::<f64>::zeros(xs.len(), degree + 1);
    let mut b = DVector::<f64>::zeros(xs.len());
    for (i, (&x, &y)) in xs.iter().zip(ys.iter()).enumerate() {
        let mut term = 1.0;
        for j in 0..=degree {
            a[(i, j)] = term;
            term *= x;
        }
        b[i] = y;
    }
    let svd = a.svd(true, true);
    svd.solve(&b, 1e-12).ok().map(|c| c.iter().copied().collect())
}

/// Evaluate an ascending-power polynomial at `x` (Horner form).
pub(crate) fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_of_uniform_data() {
        let values = vec![100.0_f32; 500];
        let (median, sigma) = robust_background(&values, 5, 3.0);
        assert!((median - 100.0).abs() < 1e-6);
        assert!(sigma < 1e-6);
    }

    #[test]
    fn background_ignores_bright_contamination() {
        // Flat floor at 10 with a handful of bright "lines"
        let mut values = vec![10.0_f32; 400];
        for i in (0..400).step_by(80) {
            values[i] = 5000.0;
        }
        let (median, sigma) = robust_background(&values, 5, 3.0);
        assert!((median - 10.0).abs() < 0.5);
        assert!(sigma < 1.0);
    }

    #[test]
    fn polyfit_recovers_quadratic() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 / 19.0).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| 2.0 - 3.0 * x + 0.5 * x * x).collect();
        let coeffs = polyfit(&xs, &ys, 2).unwrap();
        assert!((coeffs[0] - 2.0).abs() < 1e-9);
        assert!((coeffs[1] + 3.0).abs() < 1e-9);
        assert!((coeffs[2] - 0.5).abs() < 1e-9);
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            assert!((polyval(&coeffs, x) - y).abs() < 1e-9);
        }
    }

    #[test]
    fn mad_sigma_matches_gaussian_scale() {
        // Residuals symmetric around zero with unit-ish spread
        let residuals: Vec<f64> = (-50..=50).map(|i| i as f64 / 50.0).collect();
        let sigma = mad_sigma(&residuals);
        // MAD of uniform [-1, 1] is 0.5 -> sigma estimate 0.7413
        assert!((sigma - 0.7413).abs() < 0.01);
    }
}
