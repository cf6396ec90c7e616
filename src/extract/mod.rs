//! Spectral extraction: locate targets on the slit, fit their traces, and
//! collapse target + lamp frames into 1-D spectra.
//!
//! The entry point is [`reduce_target`]:
//!
//! 1. Collapse the science frame along the dispersion axis and detect the
//!    resolvable spectra in the spatial profile.
//! 2. For each spectrum, fit a [`Trace`] seeded at its profile peak.
//! 3. Extract the target through its aperture, then extract every
//!    comparison lamp through the **same** trace — lamps travel the same
//!    optical path, so they share the target's aperture geometry.
//! 4. Emit one [`SciencePack`] per identified target.
//!
//! Deblending of overlapping spectra is out of scope; each resolvable
//! profile peak is treated as an independent target.

pub mod aperture;
pub mod profile;
pub mod trace;

use tracing::{info, warn};

use crate::error::ReduceError;
use crate::frame::Frame;
use crate::spectrum::{FrameKind, SciencePack};

pub use aperture::{
    build_mask, extract_spectrum, ApertureColumn, ApertureConfig, ApertureMask,
    BackgroundConfig, ExtractionStrategy,
};
pub use profile::SpatialPeak;
pub use trace::{fit_trace, Trace, TraceConfig};

/// Configuration for the extraction stage.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Trace-fitting parameters.
    pub trace: TraceConfig,
    /// Aperture parameters, shared by target and lamp extraction.
    pub aperture: ApertureConfig,
    /// Signal-to-noise threshold for a spatial-profile peak to count as a
    /// resolvable spectrum. Default: 5.0.
    pub peak_snr: f32,
    /// Minimum spatial separation between resolvable peaks, in rows.
    /// Default: 10.
    pub min_peak_separation: usize,
    /// Upper bound on targets extracted from one frame. Default: 3.
    pub max_targets: usize,
    /// Floor on the extracted target's peak intensity; a spectrum entirely
    /// below this fails with [`ReduceError::ExtractionFailed`]. Default: 1.0.
    pub min_flux: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            trace: TraceConfig::default(),
            aperture: ApertureConfig::default(),
            peak_snr: 5.0,
            min_peak_separation: 10,
            max_targets: 3,
            min_flux: 1.0,
        }
    }
}

/// Extract every resolvable target from a science frame, pairing each with
/// the lamp spectra pulled through its trace.
///
/// Fails with [`ReduceError::ExtractionFailed`] when no spectrum can be
/// located, and with the per-target trace/flux errors when the only
/// identified target is unusable. When several targets are found, failures
/// are logged and the survivors are returned.
pub fn reduce_target(
    target_frame: &Frame,
    lamp_frames: &[Frame],
    config: &ExtractionConfig,
) -> Result<Vec<SciencePack>, ReduceError> {
    let spatial = profile::spatial_profile(target_frame);
    let peaks = profile::find_spatial_peaks(
        &spatial,
        config.peak_snr,
        config.min_peak_separation,
        config.max_targets,
    );

    if peaks.is_empty() {
        return Err(ReduceError::ExtractionFailed(format!(
            "no resolvable spectrum in the spatial profile of '{}'",
            target_frame.header().object
        )));
    }

    info!(
        object = target_frame.header().object.as_str(),
        targets = peaks.len(),
        lamps = lamp_frames.len(),
        "identified spectra"
    );

    let mut packs = Vec::with_capacity(peaks.len());
    let mut first_error: Option<ReduceError> = None;

    for peak in &peaks {
        match extract_one(target_frame, lamp_frames, peak, config) {
            Ok(pack) => packs.push(pack),
            Err(err) => {
                warn!(
                    object = target_frame.header().object.as_str(),
                    row = peak.row,
                    %err,
                    "skipping spectrum"
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    if packs.is_empty() {
        return Err(first_error.unwrap_or_else(|| {
            ReduceError::ExtractionFailed("no spectrum survived extraction".into())
        }));
    }
    Ok(packs)
}

fn extract_one(
    target_frame: &Frame,
    lamp_frames: &[Frame],
    peak: &SpatialPeak,
    config: &ExtractionConfig,
) -> Result<SciencePack, ReduceError> {
    let trace = fit_trace(target_frame, Some(peak.row as f64), &config.trace)?;

    let target = extract_spectrum(target_frame, &trace, &config.aperture, FrameKind::Science)?;
    match target.peak_intensity() {
        Some(flux) if flux >= config.min_flux => {}
        _ => {
            return Err(ReduceError::ExtractionFailed(format!(
                "extracted flux below floor {} for '{}'",
                config.min_flux,
                target_frame.header().object
            )));
        }
    }

    // Lamp lines illuminate the full slit, so the background strips would
    // contain the line signal itself; lamps are summed without subtraction.
    let lamp_aperture = ApertureConfig {
        background: None,
        ..config.aperture.clone()
    };
    let mut lamps = Vec::with_capacity(lamp_frames.len());
    for lamp in lamp_frames {
        lamps.push(extract_spectrum(lamp, &trace, &lamp_aperture, FrameKind::Lamp)?);
    }

    if lamps.is_empty() {
        warn!(
            object = target_frame.header().object.as_str(),
            "no comparison lamp supplied; pack can only be calibrated with a recycled solution"
        );
        return Ok(SciencePack::without_lamps(
            target,
            target_frame.header().clone(),
        ));
    }

    SciencePack::new(target, lamps, target_frame.header().clone())
}
