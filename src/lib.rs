//! # longslit
//!
//! Reduction of **long-slit spectrograph exposures**: from a raw 2-D
//! detector frame to a wavelength-calibrated, linearized 1-D spectrum.
//!
//! Given a science frame and its associated comparison-lamp frames,
//! `longslit` locates each spectrum on the slit, extracts it (and its lamps)
//! to 1-D, derives a pixel → wavelength polynomial from the lamp's emission
//! lines, and resamples everything onto a uniform wavelength grid ready to
//! be written out.
//!
//! ## Features
//!
//! - **Trace fitting** — binned intensity-weighted centroids with a
//!   continuity constraint, fit with a low-order polynomial
//! - **Aperture extraction** — straight-sum collapse with optional
//!   two-strip background subtraction; edge-clipped columns are flagged,
//!   never fatal
//! - **Automatic wavelength calibration** — noise-thresholded line
//!   detection with Gaussian sub-pixel centroids, header-seeded matching
//!   against a reference line list, and iterative sigma-clipped polynomial
//!   fitting
//! - **Interactive fallback** — a display-agnostic request/response
//!   protocol for operator-curated line matching when the automatic fit
//!   does not converge
//! - **Linearization** — flux-preserving cubic-spline resampling onto a
//!   uniform grid, with the grid and solution recorded for the output header
//! - **Solution recycling** — converged solutions serialize with
//!   [rkyv](https://docs.rs/rkyv) and can be reapplied to later targets
//!
//! ## Example
//!
//! ```no_run
//! use longslit::{
//!     reduce_target, ExtractionConfig, Frame, FrameHeader,
//!     CalibrationConfig, ReferenceLineList, WavelengthCalibration,
//! };
//!
//! // Frames come from the observatory's I/O layer
//! let header = FrameHeader {
//!     object: "NGC 2392".into(),
//!     center_wavelength: Some(5500.0),
//!     dispersion: Some(2.0),
//!     ..Default::default()
//! };
//! let science = Frame::from_raw(vec![0.0; 2048 * 512], 2048, 512, header).unwrap();
//! let lamp = Frame::from_raw(
//!     vec![0.0; 2048 * 512],
//!     2048,
//!     512,
//!     FrameHeader { object: "HgAr".into(), ..Default::default() },
//! )
//! .unwrap();
//!
//! // Stage 1: extraction
//! let packs = reduce_target(&science, &[lamp], &ExtractionConfig::default()).unwrap();
//!
//! // Stage 2: wavelength calibration
//! let list = ReferenceLineList::from_file("HgAr", "data/hgar.dat").unwrap();
//! let calibration = WavelengthCalibration::new(CalibrationConfig::default());
//! for pack in &packs {
//!     let outcome = calibration.run(pack, &list, None).unwrap();
//!     println!(
//!         "{}: {} samples from {:.1} step {:.3}",
//!         outcome.target.source,
//!         outcome.target.count(),
//!         outcome.target.start,
//!         outcome.target.step,
//!     );
//! }
//! ```
//!
//! ## Pipeline overview
//!
//! 1. **Spatial profiling** — collapse the frame along dispersion and find
//!    the resolvable spectra on the slit
//! 2. **Trace** — follow each spectrum's spatial center across the frame
//! 3. **Extraction** — sum an aperture around the trace; lamps are pulled
//!    through the *same* aperture since they share the optical path
//! 4. **Line identification** — detect and centroid lamp emission lines
//! 5. **Solution fitting** — match lines to the reference list and fit the
//!    pixel → wavelength polynomial, rejecting outliers
//! 6. **Linearization** — resample onto a uniform wavelength grid
//!
//! Failures are contained per target: [`pipeline::reduce_run`] reduces a
//! whole night and reports each target's status instead of aborting.

pub mod error;
pub mod extract;
pub mod frame;
pub mod pipeline;
pub mod spectrum;
pub mod wavecal;

pub(crate) mod stats;

pub use error::ReduceError;
pub use extract::{
    build_mask, extract_spectrum, fit_trace, reduce_target, ApertureConfig, ApertureMask,
    BackgroundConfig, ExtractionConfig, ExtractionStrategy, Trace, TraceConfig,
};
pub use frame::{Frame, FrameHeader};
pub use pipeline::{reduce_run, RunConfig, RunReport, TargetReport, TargetSet};
pub use spectrum::{ExtractedSpectrum, FrameKind, SciencePack};
pub use wavecal::{
    find_lines, fit_solution, linearize, refine_interactively, CalibrationConfig,
    CalibrationMode, CalibrationOutcome, CalibrationState, DispersionGuess, FitStatus,
    IdentifiedLine, LineFinderConfig, LineMatch, LineQuality, LinearizeConfig,
    LinearizedSpectrum, MatchOrigin, Operator, OperatorDecision, ReferenceLine,
    ReferenceLineList, RefineProposal, ScriptedOperator, SolutionFitConfig, SolutionFitResult,
    WavelengthCalibration, WavelengthSolution,
};
