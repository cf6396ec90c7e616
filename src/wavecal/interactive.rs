//! Human-in-the-loop wavelength refinement.
//!
//! The refiner is a synchronous request/response protocol, decoupled from
//! any display technology: each iteration the core emits a
//! [`RefineProposal`] (current matches, current solution, current residual)
//! and blocks on a single [`OperatorDecision`]. A terminal UI, a GUI, or a
//! scripted test harness all implement the same [`Operator`] trait.
//!
//! The operator designates (pixel, wavelength) pairs — snapped to the
//! nearest detected line centroid and the nearest reference wavelength —
//! or lets the current solution propose more matches, and accepts once the
//! residuals look right.

use tracing::{debug, info, warn};

use crate::error::ReduceError;

use super::fit::{refit_matches, SolutionFitConfig};
use super::linelist::ReferenceLineList;
use super::lines::IdentifiedLine;
use super::solution::{LineMatch, MatchOrigin, WavelengthSolution};

/// Minimum operator-designated pairs before a fit is attempted.
const MIN_PAIRS: usize = 4;

/// The state shown to the operator on each iteration.
#[derive(Debug)]
pub struct RefineProposal<'a> {
    /// Iteration counter, starting at 0.
    pub iteration: u32,
    /// Lines detected in the lamp spectrum, for display.
    pub lines: &'a [IdentifiedLine],
    /// Current set of matches (operator-designated and auto-proposed).
    pub matches: &'a [LineMatch],
    /// Current solution, once enough pairs exist to fit one.
    pub solution: Option<&'a WavelengthSolution>,
    /// RMS residual of the current solution.
    pub rms: Option<f64>,
}

/// One operator action per iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorDecision {
    /// Pair a pixel position with a reference wavelength. Both values are
    /// snapped: the pixel to the nearest detected line centroid, the
    /// wavelength to the nearest reference line.
    AssignPair {
        /// Approximate pixel position (e.g. a cursor position).
        pixel: f64,
        /// Approximate wavelength to pair it with.
        wavelength: f64,
    },
    /// Remove the match nearest to a pixel position.
    RemoveNearest {
        /// Approximate pixel position of the match to drop.
        pixel: f64,
    },
    /// Let the current solution propose matches for all unmatched lines.
    FindMoreLines,
    /// Discard every recorded match and start over.
    Clear,
    /// Accept the current solution and finish.
    Accept,
    /// Abort calibration for this target.
    Abort,
}

/// The operator side of the protocol.
pub trait Operator {
    /// Inspect the proposal and return one decision.
    fn decide(&mut self, proposal: &RefineProposal<'_>) -> OperatorDecision;
}

/// A canned decision sequence, for tests and headless replay.
///
/// Runs out of decisions → [`OperatorDecision::Abort`].
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    decisions: std::collections::VecDeque<OperatorDecision>,
}

impl ScriptedOperator {
    /// Build from a decision sequence, consumed front to back.
    pub fn new(decisions: impl IntoIterator<Item = OperatorDecision>) -> Self {
        Self {
            decisions: decisions.into_iter().collect(),
        }
    }
}

impl Operator for ScriptedOperator {
    fn decide(&mut self, _proposal: &RefineProposal<'_>) -> OperatorDecision {
        self.decisions.pop_front().unwrap_or(OperatorDecision::Abort)
    }
}

/// Run an interactive refinement session.
///
/// `seed_matches` pre-populates the session (typically the inliers of an
/// unconverged automatic fit, which the operator can prune or extend).
/// Returns the accepted solution, or [`ReduceError::InteractiveAborted`].
pub fn refine_interactively(
    lines: &[IdentifiedLine],
    list: &ReferenceLineList,
    n_pixels: usize,
    seed_matches: Vec<LineMatch>,
    config: &SolutionFitConfig,
    operator: &mut dyn Operator,
) -> Result<WavelengthSolution, ReduceError> {
    let mut matches = seed_matches;
    let mut solution: Option<WavelengthSolution> = None;
    if matches.len() >= MIN_PAIRS {
        solution = refit_matches(&matches, n_pixels, config.degree, config.rms_threshold);
    }

    let mut iteration = 0u32;
    loop {
        let proposal = RefineProposal {
            iteration,
            lines,
            matches: &matches,
            solution: solution.as_ref(),
            rms: solution.as_ref().map(|s| s.rms),
        };
        let decision = operator.decide(&proposal);
        debug!(iteration, ?decision, "operator decision");
        iteration += 1;

        match decision {
            OperatorDecision::AssignPair { pixel, wavelength } => {
                let snapped_pixel = nearest_line_pixel(lines, pixel).unwrap_or(pixel);
                let snapped_wavelength = list
                    .nearest(wavelength)
                    .map(|(w, _)| w)
                    .unwrap_or(wavelength);
                matches.retain(|m| m.pixel != snapped_pixel);
                matches.push(LineMatch {
                    pixel: snapped_pixel,
                    wavelength: snapped_wavelength,
                    residual: 0.0,
                    origin: MatchOrigin::Operator,
                });
                matches.sort_by(|a, b| {
                    a.pixel
                        .partial_cmp(&b.pixel)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            OperatorDecision::RemoveNearest { pixel } => {
                if let Some(idx) = matches
                    .iter()
                    .enumerate()
                    .min_by(|a, b| {
                        let da = (a.1.pixel - pixel).abs();
                        let db = (b.1.pixel - pixel).abs();
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(i, _)| i)
                {
                    matches.remove(idx);
                }
            }
            OperatorDecision::FindMoreLines => match &solution {
                Some(s) => {
                    let added = propose_from_solution(lines, list, s, config, &mut matches);
                    debug!(added, "solution-proposed matches");
                }
                None => warn!("no solution yet; cannot propose more lines"),
            },
            OperatorDecision::Clear => {
                matches.clear();
                solution = None;
                continue;
            }
            OperatorDecision::Accept => match solution.take() {
                Some(s) => {
                    info!(
                        "operator accepted solution: rms {:.4}, {} matches",
                        s.rms,
                        s.n_matches()
                    );
                    return Ok(s);
                }
                None => {
                    warn!("nothing to accept yet; a solution needs {MIN_PAIRS} pairs");
                    continue;
                }
            },
            OperatorDecision::Abort => {
                info!("operator aborted interactive calibration");
                return Err(ReduceError::InteractiveAborted);
            }
        }

        solution = if matches.len() >= MIN_PAIRS {
            refit_matches(&matches, n_pixels, config.degree, config.rms_threshold)
        } else {
            None
        };
    }
}

/// Snap a cursor position to the nearest detected line centroid.
fn nearest_line_pixel(lines: &[IdentifiedLine], pixel: f64) -> Option<f64> {
    lines
        .iter()
        .min_by(|a, b| {
            let da = (a.pixel - pixel).abs();
            let db = (b.pixel - pixel).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|l| l.pixel)
}

/// Predict every unmatched line through the solution and pair it with the
/// nearest reference wavelength, sigma-clipping gross mispredictions.
fn propose_from_solution(
    lines: &[IdentifiedLine],
    list: &ReferenceLineList,
    solution: &WavelengthSolution,
    config: &SolutionFitConfig,
    matches: &mut Vec<LineMatch>,
) -> usize {
    let mut added = 0usize;
    for line in lines {
        if matches.iter().any(|m| m.pixel == line.pixel) {
            continue;
        }
        let predicted = solution.wavelength_at(line.pixel);
        if let Some((wavelength, dist)) = list.nearest(predicted) {
            let tolerance = (config.outlier_sigma * solution.rms).max(config.match_tolerance);
            if dist <= tolerance && !matches.iter().any(|m| m.wavelength == wavelength) {
                matches.push(LineMatch {
                    pixel: line.pixel,
                    wavelength,
                    residual: wavelength - predicted,
                    origin: MatchOrigin::Auto,
                });
                added += 1;
            }
        }
    }
    matches.sort_by(|a, b| {
        a.pixel
            .partial_cmp(&b.pixel)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    added
}
