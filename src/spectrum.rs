//! Extracted 1-D spectra and the science pack passed between the two
//! reduction stages.

use crate::error::ReduceError;
use crate::frame::FrameHeader;

/// What kind of frame a spectrum was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A science target exposure.
    Science,
    /// A comparison-lamp exposure.
    Lamp,
}

/// A 1-D spectrum extracted from a frame: one intensity per dispersion pixel.
///
/// Columns where the aperture fell partially or fully outside the frame are
/// flagged invalid (intensity 0) rather than dropped, so the pixel axis
/// always matches the originating frame's width.
#[derive(Debug, Clone)]
pub struct ExtractedSpectrum {
    /// Summed intensity per dispersion pixel.
    pub values: Vec<f32>,
    /// Per-pixel validity; `false` marks columns clipped by the frame edge.
    pub valid: Vec<bool>,
    /// Object name of the originating frame.
    pub source: String,
    /// Frame kind of the originating frame.
    pub kind: FrameKind,
    /// RMS residual of the trace used for the extraction, in pixels.
    pub trace_rms: f64,
    /// Number of columns flagged invalid.
    pub invalid_columns: usize,
    /// Columns where both background strips fell outside the frame and no
    /// background could be estimated (only populated in background mode).
    pub background_fallback_columns: usize,
}

impl ExtractedSpectrum {
    /// Number of dispersion pixels.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the spectrum has no pixels.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum intensity over valid pixels, or `None` if no pixel is valid.
    pub fn peak_intensity(&self) -> Option<f32> {
        self.values
            .iter()
            .zip(&self.valid)
            .filter(|(_, &ok)| ok)
            .map(|(&v, _)| v)
            .fold(None, |acc, v| match acc {
                Some(m) if m >= v => Some(m),
                _ => Some(v),
            })
    }
}

/// One target's extracted spectra: the unit handed from spectral extraction
/// to wavelength calibration.
#[derive(Debug, Clone)]
pub struct SciencePack {
    /// The target spectrum.
    pub target: ExtractedSpectrum,
    /// Comparison-lamp spectra extracted through the target's aperture mask.
    pub lamps: Vec<ExtractedSpectrum>,
    /// Header of the originating science frame.
    pub header: FrameHeader,
}

impl SciencePack {
    /// Build a pack with at least one comparison lamp.
    pub fn new(
        target: ExtractedSpectrum,
        lamps: Vec<ExtractedSpectrum>,
        header: FrameHeader,
    ) -> Result<Self, ReduceError> {
        if lamps.is_empty() {
            return Err(ReduceError::NoLampAvailable);
        }
        Ok(Self {
            target,
            lamps,
            header,
        })
    }

    /// Build a pack that explicitly declares "no lamp".
    ///
    /// Such a pack can only be calibrated with a recycled wavelength
    /// solution; the per-lamp modes report [`ReduceError::NoLampAvailable`].
    pub fn without_lamps(target: ExtractedSpectrum, header: FrameHeader) -> Self {
        Self {
            target,
            lamps: Vec::new(),
            header,
        }
    }
}
