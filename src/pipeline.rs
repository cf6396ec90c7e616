//! Batch driver: reduce a night's independent targets, containing failures
//! per target.
//!
//! Each [`TargetSet`] is a self-contained reduction request — its science
//! frame plus the lamps the night plan associated with it. Targets share
//! nothing mutable: the reference line list and the configurations are
//! read-only, so callers that want parallelism can hand each `TargetSet` to
//! its own worker thread and merge the reports.

use tracing::{info, warn};

use crate::error::ReduceError;
use crate::extract::{reduce_target, ExtractionConfig};
use crate::frame::Frame;
use crate::wavecal::{
    CalibrationConfig, CalibrationOutcome, Operator, ReferenceLineList, WavelengthCalibration,
};

/// One target's reduction request: the per-target slice of the night plan.
#[derive(Debug, Clone)]
pub struct TargetSet {
    /// The science frame.
    pub frame: Frame,
    /// Comparison lamps taken for this target's slit position.
    pub lamps: Vec<Frame>,
}

/// Full-run configuration.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Extraction-stage parameters.
    pub extraction: ExtractionConfig,
    /// Calibration-stage parameters.
    pub calibration: CalibrationConfig,
}

/// Per-target outcome in a [`RunReport`].
#[derive(Debug)]
pub struct TargetReport {
    /// Object name from the science frame header.
    pub object: String,
    /// Calibrated spectra (one per spectrum resolved on the slit), or the
    /// error that stopped this target.
    pub result: Result<Vec<CalibrationOutcome>, ReduceError>,
}

/// Summary of a batch reduction.
#[derive(Debug, Default)]
pub struct RunReport {
    /// One report per input target, in input order.
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    /// Number of targets that produced at least one calibrated spectrum.
    pub fn n_reduced(&self) -> usize {
        self.targets.iter().filter(|t| t.result.is_ok()).count()
    }

    /// Number of targets that failed.
    pub fn n_failed(&self) -> usize {
        self.targets.len() - self.n_reduced()
    }

    /// One status line per target.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for target in &self.targets {
            match &target.result {
                Ok(outcomes) => {
                    out.push_str(&format!(
                        "{}: reduced ({} spectrum{})\n",
                        target.object,
                        outcomes.len(),
                        if outcomes.len() == 1 { "" } else { "s" }
                    ));
                }
                Err(err) => out.push_str(&format!("{}: FAILED - {}\n", target.object, err)),
            }
        }
        out
    }
}

/// Reduce a set of independent targets, continuing past per-target failures.
///
/// The optional operator serves interactive refinement requests serially;
/// it only ever blocks the target currently being calibrated.
pub fn reduce_run(
    targets: &[TargetSet],
    list: &ReferenceLineList,
    config: &RunConfig,
    mut operator: Option<&mut dyn Operator>,
) -> RunReport {
    let calibration = WavelengthCalibration::new(config.calibration.clone());
    let mut report = RunReport::default();

    for target in targets {
        let object = target.frame.header().object.clone();
        info!(object = object.as_str(), "reducing target");

        let result = match reduce_target(&target.frame, &target.lamps, &config.extraction) {
            Err(err) => Err(err),
            Ok(packs) => {
                let mut outcomes = Vec::with_capacity(packs.len());
                let mut failure = None;
                for pack in &packs {
                    match calibration.run(pack, list, operator.as_deref_mut()) {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(outcomes),
                }
            }
        };

        if let Err(err) = &result {
            warn!(object = object.as_str(), %err, "target failed; continuing");
        }
        report.targets.push(TargetReport { object, result });
    }

    info!(
        reduced = report.n_reduced(),
        failed = report.n_failed(),
        "run complete"
    );
    report
}
