// src/analysis/traffic_classifier.rs
//
// Traffic-state classifier: linear-kernel SVMs (linfa-svm, SMO solver),
// one per label pair, over z-scored features. Prediction is pairwise
// voting; a tied vote goes to the label that sorts first.
//
// The model file is JSON: labels, feature means/scales and the serialized
// pairwise machines.

use super::dataset::LabeledSample;
use super::flow_estimator::{FEATURE_NAMES, FEATURE_WIDTH};
use crate::error::EstimatorError;
use crate::types::TrainingConfig;
use anyhow::{Context, Result};
use linfa::prelude::*;
use linfa_svm::Svm;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct TrainingParams {
    /// Soft-margin penalty C, applied to both classes
    pub soft_margin: f64,
    pub tolerance: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            soft_margin: 1.0,
            tolerance: 1e-7,
        }
    }
}

impl From<&TrainingConfig> for TrainingParams {
    fn from(cfg: &TrainingConfig) -> Self {
        Self {
            soft_margin: cfg.soft_margin,
            tolerance: cfg.tolerance,
        }
    }
}

/// Binary machine: `true` votes for `labels[positive]`, `false` for `labels[negative]`
#[derive(Debug, Serialize, Deserialize)]
pub struct PairwiseSvm {
    pub positive: usize,
    pub negative: usize,
    pub svm: Svm<f64, bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrafficClassifier {
    pub feature_names: Vec<String>,
    pub labels: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub machines: Vec<PairwiseSvm>,
}

impl TrafficClassifier {
    pub fn train(samples: &[LabeledSample], params: &TrainingParams) -> Result<Self> {
        if samples.is_empty() {
            return Err(EstimatorError::dataset("cannot train on an empty dataset").into());
        }
        let labels: Vec<String> = samples
            .iter()
            .map(|s| s.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if labels.len() < 2 {
            return Err(EstimatorError::dataset(format!(
                "need at least two distinct labels, found {:?}",
                labels
            ))
            .into());
        }

        // Population mean / std per feature; a constant feature keeps scale 1
        let n = samples.len() as f64;
        let mut means = vec![0.0; FEATURE_WIDTH];
        for s in samples {
            for (m, x) in means.iter_mut().zip(&s.features) {
                *m += x / n;
            }
        }
        let mut scales = vec![0.0; FEATURE_WIDTH];
        for s in samples {
            for (k, var) in scales.iter_mut().enumerate() {
                *var += (s.features[k] - means[k]).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = if *s > 1e-18 { s.sqrt() } else { 1.0 };
        }

        let mut machines = Vec::new();
        for pos in 0..labels.len() {
            for neg in (pos + 1)..labels.len() {
                let subset: Vec<(Vec<f64>, bool)> = samples
                    .iter()
                    .filter(|s| s.label == labels[pos] || s.label == labels[neg])
                    .map(|s| (standardize(&s.features, &means, &scales), s.label == labels[pos]))
                    .collect();

                let flat: Vec<f64> = subset.iter().flat_map(|(z, _)| z.iter().copied()).collect();
                let records = Array2::from_shape_vec((subset.len(), FEATURE_WIDTH), flat)?;
                let targets: Array1<bool> = subset.iter().map(|(_, y)| *y).collect();
                let dataset = Dataset::new(records, targets);

                let svm = Svm::<f64, bool>::params()
                    .pos_neg_weights(params.soft_margin, params.soft_margin)
                    .eps(params.tolerance)
                    .linear_kernel()
                    .fit(&dataset)
                    .map_err(|e| {
                        EstimatorError::dataset(format!(
                            "training {} vs {} failed: {}",
                            labels[pos], labels[neg], e
                        ))
                    })?;

                let predicted: Array1<bool> = svm.predict(dataset.records());
                let errors = predicted
                    .iter()
                    .zip(dataset.targets().iter())
                    .filter(|(p, y)| p != y)
                    .count();
                debug!(
                    "SVM {} vs {}: {} samples, {} training error(s)",
                    labels[pos],
                    labels[neg],
                    subset.len(),
                    errors
                );
                if errors > 0 {
                    warn!(
                        "⚠️  {} vs {} is not separated on the training data ({} errors)",
                        labels[pos], labels[neg], errors
                    );
                }
                machines.push(PairwiseSvm {
                    positive: pos,
                    negative: neg,
                    svm,
                });
            }
        }

        info!(
            "✓ Trained {} pairwise SVM(s) over labels {:?}",
            machines.len(),
            labels
        );

        Ok(Self {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            labels,
            means,
            scales,
            machines,
        })
    }

    /// Majority vote over the pairwise machines
    pub fn classify(&self, features: &[f64]) -> Result<String> {
        if features.len() != self.means.len() {
            return Err(EstimatorError::config(format!(
                "classifier expects {} features, got {}",
                self.means.len(),
                features.len()
            ))
            .into());
        }

        let z = standardize(features, &self.means, &self.scales);
        let record = Array2::from_shape_vec((1, z.len()), z)?;
        let mut votes = vec![0usize; self.labels.len()];
        for m in &self.machines {
            let decision: Array1<bool> = m.svm.predict(&record);
            let winner = if decision.iter().next().copied().unwrap_or(false) {
                m.positive
            } else {
                m.negative
            };
            votes[winner] += 1;
        }

        // Strictly greater keeps the first label on ties
        let mut best = 0;
        for k in 1..votes.len() {
            if votes[k] > votes[best] {
                best = k;
            }
        }
        Ok(self.labels[best].clone())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating model directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing model {}", path.display()))?;
        info!("✓ Classifier model saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EstimatorError::config(format!(
                "no trained classifier model at {} (run with --train first)",
                path.display()
            ))
            .into());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading model {}", path.display()))?;
        let model: Self = serde_json::from_str(&text).map_err(|e| {
            EstimatorError::config(format!("invalid classifier model {}: {}", path.display(), e))
        })?;
        model.check()?;
        debug!("Loaded classifier with labels {:?}", model.labels);
        Ok(model)
    }

    /// Structural consistency of a deserialized model
    fn check(&self) -> Result<()> {
        let width = self.means.len();
        let pairs = self.labels.len() * self.labels.len().saturating_sub(1) / 2;
        let consistent = width == FEATURE_WIDTH
            && self.scales.len() == width
            && self.labels.len() >= 2
            && self.machines.len() == pairs
            && self
                .machines
                .iter()
                .all(|m| m.positive < self.labels.len() && m.negative < self.labels.len());
        if !consistent {
            return Err(EstimatorError::config(format!(
                "classifier model is inconsistent with a {}-feature input",
                FEATURE_WIDTH
            ))
            .into());
        }
        Ok(())
    }
}

fn standardize(x: &[f64], means: &[f64], scales: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(means.iter().zip(scales))
        .map(|(v, (m, s))| (v - m) / s)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;

    fn three_class_dataset() -> Vec<LabeledSample> {
        let mut samples = Vec::new();
        for i in 0..6 {
            let k = i as f64;
            samples.push(LabeledSample::new([5.0 + 2.0 * k, 85.0 - k, 0.8, 0.4, 5.0], "light"));
            samples.push(LabeledSample::new([40.0 + 2.0 * k, 50.0 - k, 0.7, 0.5, 10.0], "moderate"));
            samples.push(LabeledSample::new([80.0 + 2.0 * k, 12.0 - k, 0.5, 0.6, 3.0], "heavy"));
        }
        samples
    }

    #[test]
    fn test_training_reproduces_labels() {
        let data = three_class_dataset();
        let clf = TrafficClassifier::train(&data, &TrainingParams::default()).unwrap();
        assert_eq!(clf.labels, vec!["heavy", "light", "moderate"]);
        assert_eq!(clf.machines.len(), 3);
        for s in &data {
            assert_eq!(clf.classify(&s.features).unwrap(), s.label, "{:?}", s.features);
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let data = three_class_dataset();
        let a = TrafficClassifier::train(&data, &TrainingParams::default()).unwrap();
        let b = TrafficClassifier::train(&data, &TrainingParams::default()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/svm.json");
        let clf = TrafficClassifier::train(&three_class_dataset(), &TrainingParams::default()).unwrap();
        clf.save(&path).unwrap();

        let loaded = TrafficClassifier::load(&path).unwrap();
        assert_eq!(loaded.labels, clf.labels);
        for sample in [
            [82.0, 10.0, 0.5, 0.6, 3.0],
            [42.0, 48.0, 0.7, 0.5, 10.0],
            [6.0, 84.0, 0.8, 0.4, 5.0],
        ] {
            assert_eq!(loaded.classify(&sample).unwrap(), clf.classify(&sample).unwrap());
        }
        assert_eq!(loaded.classify(&[82.0, 10.0, 0.5, 0.6, 3.0]).unwrap(), "heavy");
    }

    #[test]
    fn test_missing_model_is_config_error() {
        let err = TrafficClassifier::load(Path::new("/nonexistent/svm.json")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(EstimatorError::Config(_))));
    }

    #[test]
    fn test_corrupt_model_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svm.json");
        fs::write(&path, r#"{"labels": ["a"]}"#).unwrap();
        let err = TrafficClassifier::load(&path).unwrap_err();
        assert!(matches!(kind_of(&err), Some(EstimatorError::Config(_))));
    }

    #[test]
    fn test_wrong_width_model_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svm.json");
        let mut clf = TrafficClassifier::train(&three_class_dataset(), &TrainingParams::default()).unwrap();
        clf.means.pop();
        clf.scales.pop();
        clf.save(&path).unwrap();
        let err = TrafficClassifier::load(&path).unwrap_err();
        assert!(matches!(kind_of(&err), Some(EstimatorError::Config(_))));
    }

    #[test]
    fn test_single_label_is_dataset_error() {
        let data = vec![LabeledSample::new([1.0; FEATURE_WIDTH], "light")];
        let err = TrafficClassifier::train(&data, &TrainingParams::default()).unwrap_err();
        assert!(matches!(kind_of(&err), Some(EstimatorError::Dataset(_))));
    }

    #[test]
    fn test_empty_dataset_is_dataset_error() {
        let err = TrafficClassifier::train(&[], &TrainingParams::default()).unwrap_err();
        assert!(matches!(kind_of(&err), Some(EstimatorError::Dataset(_))));
    }

    #[test]
    fn test_wrong_width_rejected() {
        let clf = TrafficClassifier::train(&three_class_dataset(), &TrainingParams::default()).unwrap();
        assert!(clf.classify(&[1.0, 2.0]).is_err());
    }
}
