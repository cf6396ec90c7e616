//! Wavelength calibration: turn a science pack's lamp spectra into a
//! pixel → wavelength solution and linearize the pack onto a uniform grid.
//!
//! The orchestrator walks a fixed state machine per target:
//!
//! ```text
//! Init -> LineIdentification -> SolutionFitting
//!     -> Converged   -> Linearization -> Done
//!     -> Unconverged -> InteractiveRefinement -> Linearization -> Done
//! ```
//!
//! `LineIdentification` failing on every lamp is terminal
//! ([`ReduceError::LineIdentificationFailed`]); an unconverged fit without
//! an operator is terminal ([`ReduceError::SolutionUnconverged`]). There
//! are no implicit retries beyond the fitter's internal rejection loop.

pub mod fit;
pub mod interactive;
pub mod linearize;
pub mod linelist;
pub mod lines;
pub mod solution;

use tracing::{debug, info, warn};

use crate::error::ReduceError;
use crate::spectrum::SciencePack;

pub use fit::{fit_solution, DispersionGuess, FitStatus, SolutionFitConfig, SolutionFitResult};
pub use interactive::{
    refine_interactively, Operator, OperatorDecision, RefineProposal, ScriptedOperator,
};
pub use linearize::{linearize, LinearizeConfig, LinearizedSpectrum};
pub use linelist::{ReferenceLine, ReferenceLineList};
pub use lines::{find_lines, find_lines_in, IdentifiedLine, LineFinderConfig, LineQuality};
pub use solution::{LineMatch, MatchOrigin, WavelengthSolution};

/// How a target's wavelength solution is obtained.
#[derive(Debug, Clone, Default)]
pub enum CalibrationMode {
    /// Identify lines and fit a solution from the pack's own lamps; fall
    /// back to the interactive refiner when the fit is unconverged and an
    /// operator is available.
    #[default]
    PerLamp,
    /// Skip the automatic matcher entirely and go straight to the
    /// interactive refiner (requires an operator).
    InteractiveOnly,
    /// Reuse a previously fitted solution; the pack's lamps (if any) are
    /// linearized with it for archival but never refit. This is the only
    /// mode that can calibrate a pack declared "no lamp".
    Recycled(WavelengthSolution),
}

/// Configuration for the calibration stage.
#[derive(Debug, Clone, Default)]
pub struct CalibrationConfig {
    /// Line detection parameters.
    pub line_finder: LineFinderConfig,
    /// Solution fit parameters.
    pub fit: SolutionFitConfig,
    /// Linearization parameters.
    pub linearize: LinearizeConfig,
    /// Solution acquisition mode.
    pub mode: CalibrationMode,
}

/// States of the calibration state machine, exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    /// Nothing done yet.
    Init,
    /// Detecting and centroiding lamp lines.
    LineIdentification,
    /// Automatic matching and polynomial fitting.
    SolutionFitting,
    /// Operator-driven refinement of an unconverged fit.
    InteractiveRefinement,
    /// Resampling target and lamps onto the uniform grid.
    Linearization,
    /// Calibration finished.
    Done,
}

/// Everything produced by a successful calibration.
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    /// The linearized target spectrum.
    pub target: LinearizedSpectrum,
    /// The pack's lamp spectra linearized with the same solution.
    pub lamps: Vec<LinearizedSpectrum>,
    /// The wavelength solution that was applied.
    pub solution: WavelengthSolution,
    /// Object name of the lamp that produced the solution, or `"recycled"`.
    pub lamp_used: String,
}

/// The wavelength calibration orchestrator.
///
/// One instance per configuration; [`Self::run`] is invoked once per
/// science pack and owns no state across targets.
#[derive(Debug, Clone, Default)]
pub struct WavelengthCalibration {
    config: CalibrationConfig,
}

impl WavelengthCalibration {
    /// Build an orchestrator with the given configuration.
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    /// Calibrate one science pack.
    ///
    /// `operator` enables the interactive fallback; without one, an
    /// unconverged automatic fit is terminal for the target.
    pub fn run(
        &self,
        pack: &SciencePack,
        list: &ReferenceLineList,
        mut operator: Option<&mut (dyn Operator + '_)>,
    ) -> Result<CalibrationOutcome, ReduceError> {
        let mut state = CalibrationState::Init;
        info!(
            object = pack.header.object.as_str(),
            lamps = pack.lamps.len(),
            "wavelength calibration"
        );
        debug!(?state, "state");

        if let CalibrationMode::Recycled(solution) = &self.config.mode {
            info!("reusing recycled wavelength solution");
            state = CalibrationState::Linearization;
            debug!(?state, "state");
            return self.linearize_pack(pack, solution.clone(), "recycled".into());
        }

        if pack.lamps.is_empty() {
            return Err(ReduceError::NoLampAvailable);
        }

        let mut last_error: Option<ReduceError> = None;
        for lamp in &pack.lamps {
            state = CalibrationState::LineIdentification;
            debug!(?state, lamp = lamp.source.as_str(), "state");

            let lines = find_lines(lamp, &self.config.line_finder);
            let usable = lines
                .iter()
                .filter(|l| l.quality == LineQuality::WellResolved)
                .count();
            if usable == 0 {
                warn!(lamp = lamp.source.as_str(), "no usable lines");
                last_error = Some(ReduceError::LineIdentificationFailed {
                    lamp: lamp.source.clone(),
                });
                continue;
            }

            let solution = match self.solve_lamp(pack, lamp, &lines, list, &mut operator) {
                Ok(solution) => solution,
                Err(err @ ReduceError::InteractiveAborted) => return Err(err),
                Err(err) => {
                    warn!(lamp = lamp.source.as_str(), %err, "lamp failed");
                    last_error = Some(err);
                    continue;
                }
            };

            state = CalibrationState::Linearization;
            debug!(?state, "state");
            let outcome = self.linearize_pack(pack, solution, lamp.source.clone())?;
            state = CalibrationState::Done;
            debug!(?state, "state");
            return Ok(outcome);
        }

        Err(last_error.unwrap_or(ReduceError::NoLampAvailable))
    }

    /// Obtain a solution from one lamp: automatic fit, then the interactive
    /// fallback when the fit leaves `Unconverged`.
    fn solve_lamp(
        &self,
        pack: &SciencePack,
        lamp: &crate::spectrum::ExtractedSpectrum,
        lines: &[IdentifiedLine],
        list: &ReferenceLineList,
        operator: &mut Option<&mut (dyn Operator + '_)>,
    ) -> Result<WavelengthSolution, ReduceError> {
        let n_pixels = lamp.len();

        if matches!(self.config.mode, CalibrationMode::InteractiveOnly) {
            let op = operator.as_deref_mut().ok_or_else(|| {
                ReduceError::CalibrationFailed("interactive-only mode requires an operator".into())
            })?;
            return refine_interactively(lines, list, n_pixels, Vec::new(), &self.config.fit, op);
        }

        debug!(state = ?CalibrationState::SolutionFitting, "state");
        let guess = pack.header.dispersion_guess(n_pixels).ok_or_else(|| {
            ReduceError::CalibrationFailed(
                "header lacks central-wavelength/dispersion hints for the automatic matcher"
                    .into(),
            )
        })?;

        let result = fit_solution(lines, list, &guess, n_pixels, &self.config.fit);
        match (result.status, result.solution) {
            (FitStatus::Converged, Some(solution)) => {
                info!(
                    "automatic solution converged: rms {:.4}, {} matches",
                    solution.rms,
                    solution.n_matches()
                );
                Ok(solution)
            }
            (_, solution) => {
                let rms = solution.as_ref().map(|s| s.rms).unwrap_or(f64::NAN);
                match operator.as_deref_mut() {
                    Some(op) => {
                        debug!(state = ?CalibrationState::InteractiveRefinement, "state");
                        warn!("automatic fit unconverged (rms {rms:.4}); entering interactive refinement");
                        let seed = solution.map(|s| s.matches).unwrap_or_default();
                        refine_interactively(
                            lines,
                            list,
                            n_pixels,
                            seed,
                            &self.config.fit,
                            op,
                        )
                    }
                    None => Err(ReduceError::SolutionUnconverged {
                        rms,
                        threshold: self.config.fit.rms_threshold,
                    }),
                }
            }
        }
    }

    fn linearize_pack(
        &self,
        pack: &SciencePack,
        solution: WavelengthSolution,
        lamp_used: String,
    ) -> Result<CalibrationOutcome, ReduceError> {
        let target = linearize(&pack.target, &solution, &self.config.linearize)?;
        let mut lamps = Vec::with_capacity(pack.lamps.len());
        for lamp in &pack.lamps {
            lamps.push(linearize(lamp, &solution, &self.config.linearize)?);
        }
        Ok(CalibrationOutcome {
            target,
            lamps,
            solution,
            lamp_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameHeader;
    use crate::spectrum::{ExtractedSpectrum, FrameKind};

    fn truth(p: f64) -> f64 {
        4000.0 + 2.0 * p + 2e-5 * p * p
    }

    fn lamp_with_lines(n: usize, pixels: &[f64]) -> ExtractedSpectrum {
        let mut values = vec![25.0_f32; n];
        for &center in pixels {
            for (i, v) in values.iter_mut().enumerate() {
                let d = i as f64 - center;
                *v += (800.0 * (-d * d / 4.5).exp()) as f32;
            }
        }
        ExtractedSpectrum {
            values,
            valid: vec![true; n],
            source: "HgAr".into(),
            kind: FrameKind::Lamp,
            trace_rms: 0.02,
            invalid_columns: 0,
            background_fallback_columns: 0,
        }
    }

    fn target_spectrum(n: usize) -> ExtractedSpectrum {
        let values: Vec<f32> = (0..n)
            .map(|i| 200.0 + 50.0 * ((i as f32) / 31.0).sin())
            .collect();
        ExtractedSpectrum {
            values,
            valid: vec![true; n],
            source: "target".into(),
            kind: FrameKind::Science,
            trace_rms: 0.02,
            invalid_columns: 0,
            background_fallback_columns: 0,
        }
    }

    fn pack_with_lamp(n: usize, pixels: &[f64]) -> SciencePack {
        let header = FrameHeader {
            object: "target".into(),
            center_wavelength: Some(truth((n - 1) as f64 / 2.0)),
            dispersion: Some(2.0 + 2.0 * 2e-5 * (n - 1) as f64 / 2.0),
            ..Default::default()
        };
        SciencePack::new(target_spectrum(n), vec![lamp_with_lines(n, pixels)], header).unwrap()
    }

    fn line_list(pixels: &[f64]) -> ReferenceLineList {
        let wavelengths: Vec<f64> = pixels.iter().map(|&p| truth(p)).collect();
        ReferenceLineList::new("HgAr", &wavelengths)
    }

    const LINE_PIXELS: [f64; 6] = [90.0, 230.0, 380.0, 520.0, 660.0, 810.0];

    #[test]
    fn automatic_path_converges_and_linearizes() {
        let pack = pack_with_lamp(900, &LINE_PIXELS);
        let list = line_list(&LINE_PIXELS);
        let calibration = WavelengthCalibration::new(CalibrationConfig {
            fit: SolutionFitConfig {
                degree: 2,
                ..Default::default()
            },
            ..Default::default()
        });

        let outcome = calibration.run(&pack, &list, None).unwrap();
        assert!(outcome.solution.converged);
        assert!(outcome.solution.rms < 0.1);
        assert_eq!(outcome.lamp_used, "HgAr");
        assert_eq!(outcome.lamps.len(), 1);
        // Grid step tracks the true dispersion at the frame centre
        let true_step = 2.0 + 2.0 * 2e-5 * 449.5;
        assert!((outcome.target.step - true_step).abs() / true_step < 0.01);
    }

    #[test]
    fn featureless_lamp_is_line_identification_failure() {
        let pack = pack_with_lamp(900, &[]);
        let list = line_list(&LINE_PIXELS);
        let calibration = WavelengthCalibration::default();
        let err = calibration.run(&pack, &list, None).unwrap_err();
        assert!(matches!(err, ReduceError::LineIdentificationFailed { .. }));
    }

    #[test]
    fn unconverged_without_operator_is_terminal() {
        // Reference list shifted off the truth: matches form, residuals stay
        // large, and nobody is there to fix it
        let pack = pack_with_lamp(900, &LINE_PIXELS);
        let shifted: Vec<f64> = LINE_PIXELS
            .iter()
            .enumerate()
            .map(|(i, &p)| truth(p) + if i % 2 == 0 { 6.0 } else { -6.0 })
            .collect();
        let list = ReferenceLineList::new("HgAr", &shifted);
        let calibration = WavelengthCalibration::new(CalibrationConfig {
            fit: SolutionFitConfig {
                degree: 2,
                rms_threshold: 0.05,
                rematch_pass: false,
                ..Default::default()
            },
            ..Default::default()
        });
        let err = calibration.run(&pack, &list, None).unwrap_err();
        assert!(matches!(err, ReduceError::SolutionUnconverged { .. }));
    }

    #[test]
    fn recycled_solution_skips_fitting() {
        let target = target_spectrum(600);
        let header = FrameHeader {
            object: "target".into(),
            ..Default::default()
        };
        // "No lamp" pack: only a recycled solution can calibrate it
        let pack = SciencePack::without_lamps(target, header);
        let solution = WavelengthSolution::from_pixel_polynomial(&[4000.0, 2.0], 600);
        let calibration = WavelengthCalibration::new(CalibrationConfig {
            mode: CalibrationMode::Recycled(solution),
            ..Default::default()
        });
        let list = ReferenceLineList::new("HgAr", &[4100.0]);
        let outcome = calibration.run(&pack, &list, None).unwrap();
        assert_eq!(outcome.lamp_used, "recycled");
        assert!(outcome.lamps.is_empty());
        assert!((outcome.target.start - 4000.0).abs() < 1e-9);
    }

    #[test]
    fn lampless_pack_without_recycled_solution_fails() {
        let pack = SciencePack::without_lamps(target_spectrum(600), FrameHeader::default());
        let calibration = WavelengthCalibration::default();
        let list = ReferenceLineList::new("HgAr", &[4100.0]);
        let err = calibration.run(&pack, &list, None).unwrap_err();
        assert!(matches!(err, ReduceError::NoLampAvailable));
    }

    #[test]
    fn operator_abort_is_reported() {
        let pack = pack_with_lamp(900, &LINE_PIXELS);
        let list = line_list(&LINE_PIXELS);
        let calibration = WavelengthCalibration::new(CalibrationConfig {
            mode: CalibrationMode::InteractiveOnly,
            ..Default::default()
        });
        let mut operator = ScriptedOperator::new([OperatorDecision::Abort]);
        let err = calibration
            .run(&pack, &list, Some(&mut operator))
            .unwrap_err();
        assert!(matches!(err, ReduceError::InteractiveAborted));
    }

    #[test]
    fn interactive_only_mode_uses_the_operator() {
        let pack = pack_with_lamp(900, &LINE_PIXELS);
        let list = line_list(&LINE_PIXELS);
        let calibration = WavelengthCalibration::new(CalibrationConfig {
            mode: CalibrationMode::InteractiveOnly,
            fit: SolutionFitConfig {
                degree: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        let mut decisions: Vec<OperatorDecision> = LINE_PIXELS
            .iter()
            .map(|&p| OperatorDecision::AssignPair {
                pixel: p,
                wavelength: truth(p),
            })
            .collect();
        decisions.push(OperatorDecision::Accept);
        let mut operator = ScriptedOperator::new(decisions);
        let outcome = calibration.run(&pack, &list, Some(&mut operator)).unwrap();
        assert!(outcome.solution.rms < 0.1);
    }
}
