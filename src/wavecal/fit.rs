//! Fit a pixel → wavelength polynomial from detected lamp lines and a
//! reference line list.
//!
//! Matching is seeded by a linear guess derived from the frame header
//! (approximate central wavelength and dispersion): each detected line's
//! predicted wavelength is paired with the nearest reference line inside a
//! tolerance window. The polynomial is then fit by SVD least squares and
//! refined iteratively, dropping matches whose residuals exceed a
//! MAD-derived sigma threshold, until the inlier set stabilizes.
//!
//! The fitting step is exposed separately ([`refit_matches`]) for the
//! interactive refiner, which supplies operator-designated pairs instead of
//! automatic matches.

use tracing::debug;

use crate::stats::{mad_sigma, polyfit, polyval};

use super::linelist::ReferenceLineList;
use super::lines::{IdentifiedLine, LineQuality};
use super::solution::{LineMatch, MatchOrigin, WavelengthSolution};

/// Linear seed for the automatic matcher, derived from header metadata.
#[derive(Debug, Clone, Copy)]
pub struct DispersionGuess {
    /// Approximate wavelength at the reference pixel.
    pub center_wavelength: f64,
    /// Approximate dispersion in wavelength units per pixel.
    pub dispersion: f64,
    /// Pixel the central wavelength refers to (usually the frame center).
    pub reference_pixel: f64,
}

impl DispersionGuess {
    /// Predicted wavelength of `pixel` under the linear seed.
    pub fn predict(&self, pixel: f64) -> f64 {
        self.center_wavelength + self.dispersion * (pixel - self.reference_pixel)
    }
}

/// Configuration for the solution fitter.
#[derive(Debug, Clone)]
pub struct SolutionFitConfig {
    /// Polynomial degree of the wavelength solution. Default: 3.
    pub degree: usize,
    /// Maximum distance between a predicted and a reference wavelength for
    /// an automatic match, in wavelength units. Default: 10.0.
    pub match_tolerance: f64,
    /// Residual threshold for outlier rejection, in MAD-derived sigmas.
    /// Default: 3.0.
    pub outlier_sigma: f64,
    /// Cap on rejection/refit iterations. Default: 20.
    pub max_iterations: u32,
    /// RMS residual below which the solution counts as converged, in
    /// wavelength units. Default: 1.0.
    pub rms_threshold: f64,
    /// After a first solution exists, re-match every detected line through
    /// it and refit — recovers lines the linear seed mispredicted.
    /// Default: true.
    pub rematch_pass: bool,
}

impl Default for SolutionFitConfig {
    fn default() -> Self {
        Self {
            degree: 3,
            match_tolerance: 10.0,
            outlier_sigma: 3.0,
            max_iterations: 20,
            rms_threshold: 1.0,
            rematch_pass: true,
        }
    }
}

/// Terminal state of a fit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// RMS fell below the acceptance threshold.
    Converged,
    /// Too few matches, or RMS stayed above threshold. The orchestrator may
    /// hand the result to the interactive refiner.
    Unconverged,
}

/// Result of [`fit_solution`].
#[derive(Debug, Clone)]
pub struct SolutionFitResult {
    /// The fitted solution; present even when unconverged (for diagnostics
    /// and interactive seeding) as long as a fit was possible at all.
    pub solution: Option<WavelengthSolution>,
    /// Terminal state.
    pub status: FitStatus,
    /// Rejection/refit iterations performed.
    pub iterations: u32,
    /// Matches retained in the final fit.
    pub n_inliers: usize,
    /// Matches rejected as outliers.
    pub n_outliers: usize,
}

impl SolutionFitResult {
    fn unconverged() -> Self {
        Self {
            solution: None,
            status: FitStatus::Unconverged,
            iterations: 0,
            n_inliers: 0,
            n_outliers: 0,
        }
    }
}

/// Fit a wavelength solution from detected lines.
///
/// Only [`LineQuality::WellResolved`] lines participate. `n_pixels` is the
/// length of the lamp spectrum's pixel axis and fixes the solution's
/// domain and normalization.
pub fn fit_solution(
    lines: &[IdentifiedLine],
    list: &ReferenceLineList,
    guess: &DispersionGuess,
    n_pixels: usize,
    config: &SolutionFitConfig,
) -> SolutionFitResult {
    let usable: Vec<&IdentifiedLine> = lines
        .iter()
        .filter(|l| l.quality == LineQuality::WellResolved)
        .collect();

    let candidates = match_candidates(&usable, list, |pixel| guess.predict(pixel), config);
    debug!(
        usable = usable.len(),
        matched = candidates.len(),
        "initial line matching"
    );

    let min_matches = config.degree + 2;
    if candidates.len() < min_matches {
        debug!(
            matched = candidates.len(),
            required = min_matches,
            "too few matches for a fit"
        );
        return SolutionFitResult::unconverged();
    }

    let scale = (n_pixels.saturating_sub(1)).max(1) as f64;
    let mut fit = match reject_and_fit(&candidates, scale, config) {
        Some(fit) => fit,
        None => return SolutionFitResult::unconverged(),
    };
    let mut pairs = candidates;

    // Re-match through the fitted solution: lines the linear seed missed or
    // mispredicted can now be paired correctly.
    if config.rematch_pass {
        let coeffs = fit.coeffs.clone();
        let rematched =
            match_candidates(&usable, list, |pixel| polyval(&coeffs, pixel / scale), config);
        if rematched.len() > pairs.iter().zip(&fit.mask).filter(|(_, &m)| m).count() {
            if let Some(refit) = reject_and_fit(&rematched, scale, config) {
                debug!(
                    before = pairs.len(),
                    after = rematched.len(),
                    "rematch pass adopted"
                );
                pairs = rematched;
                fit = refit;
            }
        }
    }

    let n_inliers = fit.mask.iter().filter(|&&m| m).count();
    let n_outliers = pairs.len() - n_inliers;
    let matches: Vec<LineMatch> = pairs
        .iter()
        .zip(&fit.mask)
        .filter(|(_, &m)| m)
        .map(|(&(pixel, wavelength), _)| LineMatch {
            pixel,
            wavelength,
            residual: wavelength - polyval(&fit.coeffs, pixel / scale),
            origin: MatchOrigin::Auto,
        })
        .collect();

    let converged = fit.rms <= config.rms_threshold;
    let solution = WavelengthSolution {
        degree: fit.coeffs.len().saturating_sub(1),
        coeffs: fit.coeffs,
        scale,
        domain: [0.0, scale],
        rms: fit.rms,
        matches,
        converged,
    };

    debug!(
        "solution fit: rms {:.4}, {} inliers / {} outliers, {} iterations, converged={}",
        fit.rms, n_inliers, n_outliers, fit.iterations, converged
    );

    SolutionFitResult {
        solution: Some(solution),
        status: if converged {
            FitStatus::Converged
        } else {
            FitStatus::Unconverged
        },
        iterations: fit.iterations,
        n_inliers,
        n_outliers,
    }
}

/// Fit a solution straight through the given matches, with no automatic
/// matching and no outlier rejection — the operator curates the pairs.
///
/// Returns `None` when the system is underdetermined. The effective degree
/// is capped at `matches.len() - 1`.
pub fn refit_matches(
    matches: &[LineMatch],
    n_pixels: usize,
    degree: usize,
    rms_threshold: f64,
) -> Option<WavelengthSolution> {
    if matches.is_empty() {
        return None;
    }
    let scale = (n_pixels.saturating_sub(1)).max(1) as f64;
    let degree = degree.min(matches.len() - 1);
    let us: Vec<f64> = matches.iter().map(|m| m.pixel / scale).collect();
    let ws: Vec<f64> = matches.iter().map(|m| m.wavelength).collect();
    let coeffs = polyfit(&us, &ws, degree)?;

    let mut sum_sq = 0.0;
    let refitted: Vec<LineMatch> = matches
        .iter()
        .map(|m| {
            let residual = m.wavelength - polyval(&coeffs, m.pixel / scale);
            sum_sq += residual * residual;
            LineMatch { residual, ..*m }
        })
        .collect();
    let rms = (sum_sq / matches.len() as f64).sqrt();

    Some(WavelengthSolution {
        degree,
        coeffs,
        scale,
        domain: [0.0, scale],
        rms,
        matches: refitted,
        converged: rms <= rms_threshold,
    })
}

// ── Internal helpers ────────────────────────────────────────────────────────

/// Pair usable lines with reference wavelengths through a prediction
/// function. Each reference line serves at most one detected line (the
/// closest prediction wins). Pairs come back ordered by pixel.
fn match_candidates(
    usable: &[&IdentifiedLine],
    list: &ReferenceLineList,
    predict: impl Fn(f64) -> f64,
    config: &SolutionFitConfig,
) -> Vec<(f64, f64)> {
    // (pixel, reference wavelength, distance)
    let mut raw: Vec<(f64, f64, f64)> = Vec::new();
    for line in usable {
        let predicted = predict(line.pixel);
        if let Some((wavelength, dist)) = list.nearest(predicted) {
            if dist <= config.match_tolerance {
                raw.push((line.pixel, wavelength, dist));
            }
        }
    }

    // Closest claim per reference line wins
    raw.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
    });
    raw.dedup_by(|a, b| a.1 == b.1);

    let mut pairs: Vec<(f64, f64)> = raw.into_iter().map(|(p, w, _)| (p, w)).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    pairs
}

struct RejectedFit {
    coeffs: Vec<f64>,
    mask: Vec<bool>,
    rms: f64,
    iterations: u32,
}

/// Iterative sigma-clipped polynomial fit over (pixel, wavelength) pairs.
fn reject_and_fit(
    pairs: &[(f64, f64)],
    scale: f64,
    config: &SolutionFitConfig,
) -> Option<RejectedFit> {
    let n = pairs.len();
    let min_inliers = config.degree + 2;
    let mut mask = vec![true; n];
    let mut iterations = 0u32;

    let mut coeffs = fit_masked(pairs, &mask, scale, config.degree)?;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let residuals: Vec<f64> = pairs
            .iter()
            .map(|&(p, w)| w - polyval(&coeffs, p / scale))
            .collect();
        let inlier_resids: Vec<f64> = residuals
            .iter()
            .zip(&mask)
            .filter(|(_, &m)| m)
            .map(|(&r, _)| r)
            .collect();
        if inlier_resids.is_empty() {
            break;
        }

        // Absolute floor keeps the clip meaningful when the inliers are
        // numerically exact (MAD collapses to zero)
        let sigma = mad_sigma(&inlier_resids).max(1e-6);
        let center = crate::stats::median_f64(&inlier_resids);
        let threshold = config.outlier_sigma * sigma;
        let new_mask: Vec<bool> = residuals
            .iter()
            .map(|&r| (r - center).abs() <= threshold)
            .collect();

        let n_inliers = new_mask.iter().filter(|&&m| m).count();
        if n_inliers < min_inliers {
            break;
        }

        let changed = mask.iter().zip(&new_mask).any(|(&a, &b)| a != b);
        mask = new_mask;
        coeffs = fit_masked(pairs, &mask, scale, config.degree)?;

        if !changed {
            break;
        }
    }

    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for (&(p, w), &m) in pairs.iter().zip(&mask) {
        if m {
            let r = w - polyval(&coeffs, p / scale);
            sum_sq += r * r;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let rms = (sum_sq / count as f64).sqrt();

    Some(RejectedFit {
        coeffs,
        mask,
        rms,
        iterations,
    })
}

fn fit_masked(
    pairs: &[(f64, f64)],
    mask: &[bool],
    scale: f64,
    degree: usize,
) -> Option<Vec<f64>> {
    let us: Vec<f64> = pairs
        .iter()
        .zip(mask)
        .filter(|(_, &m)| m)
        .map(|(&(p, _), _)| p / scale)
        .collect();
    let ws: Vec<f64> = pairs
        .iter()
        .zip(mask)
        .filter(|(_, &m)| m)
        .map(|(&(_, w), _)| w)
        .collect();
    let degree = degree.min(us.len().saturating_sub(1));
    polyfit(&us, &ws, degree)
}
