//! The fitted pixel → wavelength mapping.
//!
//! Coefficients are stored against a normalized abscissa (`pixel / scale`)
//! so the Vandermonde systems behind them stay well-conditioned on wide
//! detectors. Solutions serialize with rkyv so a converged solution can be
//! saved and recycled for later targets taken with the same instrument
//! configuration.

use rkyv::{Archive, Deserialize, Serialize};

use crate::stats::polyval;

/// How a line match was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum MatchOrigin {
    /// Established by the automatic matcher from the header-seeded guess.
    Auto,
    /// Designated by the operator during interactive refinement.
    Operator,
}

/// A pairing of a detected line's pixel centroid with a reference wavelength.
#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
pub struct LineMatch {
    /// Detected line centroid, in dispersion pixels.
    pub pixel: f64,
    /// Reference wavelength assigned to the line.
    pub wavelength: f64,
    /// Residual `wavelength - solution(pixel)` under the current solution.
    pub residual: f64,
    /// How the pairing was established.
    pub origin: MatchOrigin,
}

/// A fitted polynomial wavelength solution.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct WavelengthSolution {
    /// Polynomial degree of the fit.
    pub degree: usize,
    /// Coefficients in ascending powers of the normalized pixel `p / scale`.
    pub coeffs: Vec<f64>,
    /// Pixel normalization scale (the last pixel index of the fit domain).
    pub scale: f64,
    /// Dispersion-pixel range the solution is valid over.
    pub domain: [f64; 2],
    /// RMS residual over the inlier matches, in wavelength units.
    pub rms: f64,
    /// The line matches the solution was fit from (inliers only).
    pub matches: Vec<LineMatch>,
    /// Whether the fit reached the configured RMS acceptance threshold.
    pub converged: bool,
}

impl WavelengthSolution {
    /// Build a solution from a polynomial in raw pixel coordinates.
    ///
    /// `pixel_coeffs` are ascending powers of the *pixel* index; they are
    /// converted to the normalized representation internally. Mostly useful
    /// for constructing known solutions in tests and for identity mappings.
    pub fn from_pixel_polynomial(pixel_coeffs: &[f64], n_pixels: usize) -> Self {
        let scale = (n_pixels.saturating_sub(1)).max(1) as f64;
        let coeffs: Vec<f64> = pixel_coeffs
            .iter()
            .enumerate()
            .map(|(i, &c)| c * scale.powi(i as i32))
            .collect();
        Self {
            degree: pixel_coeffs.len().saturating_sub(1),
            coeffs,
            scale,
            domain: [0.0, scale],
            rms: 0.0,
            matches: Vec::new(),
            converged: true,
        }
    }

    /// Wavelength at dispersion pixel `pixel`.
    pub fn wavelength_at(&self, pixel: f64) -> f64 {
        polyval(&self.coeffs, pixel / self.scale)
    }

    /// Local dispersion (dλ/dpixel) at `pixel`, from the analytic derivative.
    pub fn dispersion_at(&self, pixel: f64) -> f64 {
        let u = pixel / self.scale;
        let mut deriv = 0.0;
        let mut term = 1.0;
        for (i, &c) in self.coeffs.iter().enumerate().skip(1) {
            deriv += i as f64 * c * term;
            term *= u;
        }
        deriv / self.scale
    }

    /// Number of line matches behind the fit.
    pub fn n_matches(&self) -> usize {
        self.matches.len()
    }

    /// Serialize to rkyv bytes.
    pub fn to_rkyv_bytes(&self) -> Vec<u8> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .expect("rkyv serialization failed")
            .to_vec()
    }

    /// Save the solution to a file for recycling across targets.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        std::fs::write(path, self.to_rkyv_bytes())?;
        Ok(())
    }

    /// Load a previously saved solution.
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let solution = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&bytes)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        Ok(solution)
    }
}
