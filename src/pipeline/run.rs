// src/pipeline/run.rs
//
// Top-level modes. Inference is a strict sequence:
//   load → capture → detect → track → estimate → save
// Every fallible resource (lane file, classifier model) is loaded before
// detection starts, and nothing is written unless all stages succeed.

use super::metrics::StageTimer;
use super::result::TrafficResult;
use crate::analysis::dataset::{label_summary, load_dataset};
use crate::analysis::flow_estimator::{FlowEstimator, FlowMeasurement};
use crate::analysis::traffic_classifier::{TrafficClassifier, TrainingParams};
use crate::analysis::vehicle_tracker::{TrackingOutcome, VehicleTracker};
use crate::detection::DetectorKind;
use crate::error::EstimatorError;
use crate::lane_model::LaneSet;
use crate::report::{self, SavedReport};
use crate::types::Config;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct RunOutput {
    pub result: TrafficResult,
    pub outcome: TrackingOutcome,
    pub measurement: FlowMeasurement,
    pub report: SavedReport,
}

/// Run the estimator on the configured image pair.
///
/// The saved files carry the time up to the start of saving; the returned
/// result also includes `saving_time` and the final `total_time`.
pub fn run_inference(config: &Config, detector: DetectorKind) -> Result<RunOutput> {
    let mut timer = StageTimer::new();
    let mut result = TrafficResult::new();

    // ── load ──
    let lanes = LaneSet::load(&config.lanes_path()).context("loading lane definition")?;
    let classifier = TrafficClassifier::load(Path::new(&config.estimation.classifier_model))
        .context("loading classifier model")?;
    result.loading_time = timer.lap("load");

    // ── capture ──
    let images = config.image_paths();
    for image in &images {
        debug!("Capture: {}", image.display());
    }
    result.capturing_time = timer.lap("capture");

    // ── detection ──
    info!("🔍 Detecting vehicles with {}", detector.display_name());
    let frames = detector.predict(&images, config.frame_size(), &config.detection)?;
    let (first, second) = match frames.as_slice() {
        [first, second, ..] => (first, second),
        _ => {
            return Err(EstimatorError::mismatch(format!(
                "detector returned {} frame(s), expected 2",
                frames.len()
            ))
            .into())
        }
    };
    result.total_detected_vehicles = first.len() + second.len();
    result.detection_time = timer.lap("detection");

    // ── tracking ──
    let tracker = VehicleTracker::new(config.tracking.clone(), config.frame_size());
    let outcome = tracker.track(first, second, &lanes, config.estimation.elapsed_seconds);
    if !outcome.untracked.is_empty() {
        debug!("{} frame-1 detection(s) left untracked", outcome.untracked.len());
    }
    result.tracking_time = timer.lap("tracking");

    // ── estimation ──
    let estimator = FlowEstimator::new(config.estimation.clone(), classifier);
    let measurement = estimator.estimate(&outcome.tracked, &lanes, &mut result)?;
    result.estimation_time = timer.lap("estimation");

    // ── saving ──
    result.total_time = timer.total();
    let report = report::save(
        Path::new(&config.output.result_dir),
        &result,
        &outcome.tracked,
    )?;
    result.saving_time = timer.lap("saving");
    result.total_time = timer.total();

    info!(
        "✓ Run complete in {:.3}s ({} tracked / {} detected)",
        result.total_time, result.total_tracked_vehicles, result.total_detected_vehicles
    );

    Ok(RunOutput {
        result,
        outcome,
        measurement,
        report,
    })
}

/// Train the classifier on the configured dataset and write the model file.
pub fn run_training(config: &Config) -> Result<TrafficClassifier> {
    info!("🧠 Training traffic classifier");
    let samples = load_dataset(Path::new(&config.training.dataset))?;
    let params = TrainingParams::from(&config.training);
    debug!(
        "Training params: C={}, tolerance={}",
        params.soft_margin, params.tolerance
    );

    let classifier = TrafficClassifier::train(&samples, &params)?;

    let correct = samples
        .iter()
        .map(|s| classifier.classify(&s.features).map(|label| label == s.label))
        .collect::<Result<Vec<bool>>>()?
        .into_iter()
        .filter(|ok| *ok)
        .count();
    info!(
        "Training accuracy: {}/{} ({:.1}%)",
        correct,
        samples.len(),
        percent(correct, samples.len())
    );

    classifier.save(Path::new(&config.estimation.classifier_model))?;
    Ok(classifier)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub total: usize,
    pub correct: usize,
    /// expected label → predicted label → count
    pub confusion: BTreeMap<String, BTreeMap<String, usize>>,
}

impl EvaluationReport {
    pub fn accuracy(&self) -> f64 {
        percent(self.correct, self.total)
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Accuracy: {}/{} ({:.1}%)",
            self.correct,
            self.total,
            self.accuracy()
        );
        for (expected, predicted) in &self.confusion {
            let row: Vec<String> = predicted
                .iter()
                .map(|(label, n)| format!("{}={}", label, n))
                .collect();
            let _ = writeln!(out, "  {:<10} → {}", expected, row.join(", "));
        }
        out
    }
}

/// Score the trained model against a labeled dataset.
pub fn run_evaluation(config: &Config) -> Result<EvaluationReport> {
    info!("📊 Evaluating traffic classifier");
    let classifier = TrafficClassifier::load(Path::new(&config.estimation.classifier_model))?;
    let samples = load_dataset(Path::new(&config.training.dataset))?;

    let mut report = EvaluationReport {
        total: samples.len(),
        correct: 0,
        confusion: BTreeMap::new(),
    };
    for sample in &samples {
        let predicted = classifier.classify(&sample.features)?;
        if predicted == sample.label {
            report.correct += 1;
        }
        *report
            .confusion
            .entry(sample.label.clone())
            .or_default()
            .entry(predicted)
            .or_insert(0) += 1;
    }

    let unseen: Vec<&String> = report
        .confusion
        .keys()
        .filter(|l| !classifier.labels.contains(l))
        .collect();
    if !unseen.is_empty() {
        warn!("⚠️  Dataset labels unknown to the model: {:?}", unseen);
    }

    info!(
        "Evaluation on [{}]: {:.1}% correct",
        label_summary(&samples),
        report.accuracy()
    );
    Ok(report)
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
