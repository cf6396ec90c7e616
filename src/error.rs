use thiserror::Error;

/// Errors produced while reducing a single science target.
///
/// Every variant is scoped to one target's reduction: the run driver in
/// [`crate::pipeline`] catches these per target and continues with the rest
/// of the night.
#[derive(Error, Debug)]
pub enum ReduceError {
    /// Too few dispersion bins yielded a centroid above the signal floor.
    #[error("trace not found: {valid_bins} usable bins, {required} required")]
    TraceNotFound {
        /// Bins that cleared the signal-to-noise floor.
        valid_bins: usize,
        /// Minimum bins required by the trace configuration.
        required: usize,
    },

    /// The extracted spectrum is unusable (no spatial peak, or flux below floor).
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// No usable calibration lines were detected in any comparison lamp.
    #[error("no usable calibration lines in lamp '{lamp}'")]
    LineIdentificationFailed {
        /// Lamp object name from the frame header.
        lamp: String,
    },

    /// The automatic wavelength solution did not reach the RMS threshold
    /// and no interactive fallback was available.
    #[error("wavelength solution did not converge: rms {rms:.3} > threshold {threshold:.3}")]
    SolutionUnconverged {
        /// RMS residual of the last fit, in wavelength units.
        rms: f64,
        /// Configured acceptance threshold.
        threshold: f64,
    },

    /// The operator aborted interactive calibration for this target.
    #[error("interactive calibration aborted by operator")]
    InteractiveAborted,

    /// Calibration could not proceed (degenerate solution, non-monotonic
    /// wavelength mapping, missing header hints).
    #[error("calibration failed: {0}")]
    CalibrationFailed(String),

    /// The science pack carries no comparison lamp and the calibration mode
    /// requires one.
    #[error("science pack has no comparison lamp")]
    NoLampAvailable,

    /// The requested extraction strategy is reserved but not implemented.
    #[error("extraction strategy '{0}' is not implemented")]
    UnsupportedStrategy(&'static str),
}
