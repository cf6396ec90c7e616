//! Integration tests: build synthetic science and lamp frames with a known
//! wavelength solution, run the full reduction, and verify the calibrated
//! output against the truth.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use longslit::{
    reduce_run, reduce_target, CalibrationConfig, CalibrationMode, ExtractionConfig, Frame,
    FrameHeader, ReferenceLineList, RunConfig, SolutionFitConfig, TargetSet,
    WavelengthCalibration, WavelengthSolution,
};

const WIDTH: usize = 800;
const HEIGHT: usize = 80;
const TRACE_ROW: f64 = 40.0;
const TRACE_SIGMA: f64 = 2.0;

/// Degree-2 truth: lambda(p) = 5000 + 1.2 p + 3e-5 p^2.
fn true_wavelength(p: f64) -> f64 {
    5000.0 + 1.2 * p + 3e-5 * p * p
}

fn true_dispersion(p: f64) -> f64 {
    1.2 + 2.0 * 3e-5 * p
}

const LAMP_LINES: [f64; 5] = [100.0, 250.0, 420.0, 600.0, 750.0];

fn science_header() -> FrameHeader {
    let mid = (WIDTH - 1) as f64 / 2.0;
    FrameHeader {
        object: "synthetic-target".into(),
        center_wavelength: Some(true_wavelength(mid)),
        dispersion: Some(true_dispersion(mid)),
        exposure_seconds: Some(900.0),
        ..Default::default()
    }
}

/// A continuum source on a Gaussian spatial profile, plus optional noise.
fn science_frame(noise_sigma: f32) -> Frame {
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0_f32, noise_sigma.max(1e-6)).unwrap();
    let mut pixels = vec![0.0_f32; WIDTH * HEIGHT];
    for col in 0..WIDTH {
        // Slowly varying continuum
        let continuum = 300.0 + 40.0 * ((col as f64) / 120.0).sin();
        for row in 0..HEIGHT {
            let d = row as f64 - TRACE_ROW;
            let profile = (-d * d / (2.0 * TRACE_SIGMA * TRACE_SIGMA)).exp();
            let mut v = 15.0 + (continuum * profile) as f32;
            if noise_sigma > 0.0 {
                v += noise.sample(&mut rng);
            }
            pixels[row * WIDTH + col] = v;
        }
    }
    Frame::from_raw(pixels, WIDTH, HEIGHT, science_header()).unwrap()
}

/// A lamp frame: emission lines at known pixels, uniform along the slit.
fn lamp_frame() -> Frame {
    let mut pixels = vec![20.0_f32; WIDTH * HEIGHT];
    for &line in &LAMP_LINES {
        for col in 0..WIDTH {
            let d = col as f64 - line;
            let v = (1200.0 * (-d * d / (2.0 * 1.5 * 1.5)).exp()) as f32;
            for row in 0..HEIGHT {
                pixels[row * WIDTH + col] += v;
            }
        }
    }
    let header = FrameHeader {
        object: "HgAr".into(),
        lamp: Some("HgAr".into()),
        ..Default::default()
    };
    Frame::from_raw(pixels, WIDTH, HEIGHT, header).unwrap()
}

fn reference_list() -> ReferenceLineList {
    // The known laboratory wavelengths of the 5 lamp lines, plus decoys
    // well outside the matching tolerance
    let mut wavelengths: Vec<f64> = LAMP_LINES.iter().map(|&p| true_wavelength(p)).collect();
    wavelengths.push(3800.0);
    wavelengths.push(7400.0);
    ReferenceLineList::new("HgAr", &wavelengths)
}

fn calibration_config() -> CalibrationConfig {
    CalibrationConfig {
        fit: SolutionFitConfig {
            degree: 2,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn end_to_end_synthetic_reduction() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    // ── Stage 1: extraction ──
    let science = science_frame(0.0);
    let lamps = vec![lamp_frame()];
    let packs = reduce_target(&science, &lamps, &ExtractionConfig::default())
        .expect("extraction failed");
    assert_eq!(packs.len(), 1, "expected a single target on the slit");
    let pack = &packs[0];
    assert_eq!(pack.lamps.len(), 1);
    assert_eq!(pack.target.len(), WIDTH);
    assert_eq!(pack.target.invalid_columns, 0);

    // ── Stage 2: calibration ──
    let list = reference_list();
    let calibration = WavelengthCalibration::new(calibration_config());
    let outcome = calibration.run(pack, &list, None).expect("calibration failed");

    println!(
        "solution rms = {:.4}, {} matches, grid start {:.2} step {:.4} x {}",
        outcome.solution.rms,
        outcome.solution.n_matches(),
        outcome.target.start,
        outcome.target.step,
        outcome.target.count()
    );

    assert!(outcome.solution.converged, "automatic fit must converge");
    assert_eq!(outcome.solution.n_matches(), LAMP_LINES.len());
    assert!(outcome.solution.rms < 0.1, "rms = {}", outcome.solution.rms);

    // The grid step must match the true local dispersion at the frame
    // centre within 1%
    let true_step = true_dispersion((WIDTH - 1) as f64 / 2.0);
    assert!(
        (outcome.target.step - true_step).abs() / true_step < 0.01,
        "grid step {} vs true dispersion {}",
        outcome.target.step,
        true_step
    );

    // The solution must reproduce the truth across the whole domain
    for p in (0..WIDTH).step_by(100) {
        let fitted = outcome.solution.wavelength_at(p as f64);
        let truth = true_wavelength(p as f64);
        assert!(
            (fitted - truth).abs() < 0.5,
            "wavelength_at({p}) = {fitted}, truth {truth}"
        );
    }

    // Output metadata must describe the grid
    let cards = outcome.target.header_cards();
    assert!(cards.iter().any(|(k, _)| k == "CRVAL1"));
    assert!(cards.iter().any(|(k, _)| k == "CDELT1"));
}

#[test]
fn end_to_end_survives_detector_noise() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let science = science_frame(3.0);
    let lamps = vec![lamp_frame()];
    let packs = reduce_target(&science, &lamps, &ExtractionConfig::default())
        .expect("extraction failed");
    let list = reference_list();
    let calibration = WavelengthCalibration::new(calibration_config());
    let outcome = calibration
        .run(&packs[0], &list, None)
        .expect("calibration failed");

    assert!(outcome.solution.converged);
    let true_step = true_dispersion((WIDTH - 1) as f64 / 2.0);
    assert!((outcome.target.step - true_step).abs() / true_step < 0.01);
}

#[test]
fn converged_solution_recycles_through_a_file() {
    let science = science_frame(0.0);
    let lamps = vec![lamp_frame()];
    let packs = reduce_target(&science, &lamps, &ExtractionConfig::default()).unwrap();
    let list = reference_list();
    let calibration = WavelengthCalibration::new(calibration_config());
    let outcome = calibration.run(&packs[0], &list, None).unwrap();

    // Persist the solution, reload it, and calibrate a second target with
    // it — no lamp needed the second time around
    let path = std::env::temp_dir().join("longslit_recycled_solution.rkyv");
    let path = path.to_str().unwrap();
    outcome.solution.save_to_file(path).unwrap();
    let restored = WavelengthSolution::load_from_file(path).unwrap();
    assert!((restored.wavelength_at(400.0) - outcome.solution.wavelength_at(400.0)).abs() < 1e-12);

    let second = science_frame(0.0);
    let second_packs = reduce_target(&second, &[], &ExtractionConfig::default()).unwrap();
    assert!(second_packs[0].lamps.is_empty());

    let recycled = WavelengthCalibration::new(CalibrationConfig {
        mode: CalibrationMode::Recycled(restored),
        ..calibration_config()
    });
    let second_outcome = recycled.run(&second_packs[0], &list, None).unwrap();
    assert_eq!(second_outcome.lamp_used, "recycled");
    assert!((second_outcome.target.start - outcome.target.start).abs() < 1e-9);
}

#[test]
fn batch_run_reports_every_target() {
    let good = TargetSet {
        frame: science_frame(0.0),
        lamps: vec![lamp_frame()],
    };
    // A frame with no spectrum on the slit at all
    let blank = {
        let pixels = vec![15.0_f32; WIDTH * HEIGHT];
        let mut header = science_header();
        header.object = "blank".into();
        TargetSet {
            frame: Frame::from_raw(pixels, WIDTH, HEIGHT, header).unwrap(),
            lamps: vec![lamp_frame()],
        }
    };

    let config = RunConfig {
        calibration: calibration_config(),
        ..Default::default()
    };
    let report = reduce_run(&[good, blank], &reference_list(), &config, None);

    assert_eq!(report.targets.len(), 2);
    assert_eq!(report.n_reduced(), 1);
    assert_eq!(report.n_failed(), 1);
    let summary = report.summary();
    assert!(summary.contains("synthetic-target: reduced"));
    assert!(summary.contains("blank: FAILED"));
}
