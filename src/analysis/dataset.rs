// src/analysis/dataset.rs
//
// Labeled feature rows for classifier training and evaluation.
//
// CSV layout (header required, `#` lines ignored):
//   density,average_speed,tracked_ratio,busiest_lane_share,speed_spread,label
//
// A dataset path may be a single file or a directory; directories are
// searched recursively for *.csv files, read in sorted path order.

use super::flow_estimator::{FEATURE_NAMES, FEATURE_WIDTH};
use crate::error::EstimatorError;
use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub features: [f64; FEATURE_WIDTH],
    pub label: String,
}

impl LabeledSample {
    pub fn new(features: [f64; FEATURE_WIDTH], label: &str) -> Self {
        Self {
            features,
            label: label.to_string(),
        }
    }
}

pub fn load_dataset(path: &Path) -> Result<Vec<LabeledSample>> {
    let files = dataset_files(path)?;
    let mut samples = Vec::new();
    for file in &files {
        let text = fs::read_to_string(file).map_err(|e| {
            EstimatorError::dataset(format!("cannot read {}: {}", file.display(), e))
        })?;
        let rows = parse_csv(&text).map_err(|msg| {
            EstimatorError::dataset(format!("{}: {}", file.display(), msg))
        })?;
        debug!("{}: {} sample(s)", file.display(), rows.len());
        samples.extend(rows);
    }

    if samples.is_empty() {
        return Err(
            EstimatorError::dataset(format!("no samples found in {}", path.display())).into(),
        );
    }

    info!(
        "✓ Dataset: {} sample(s) from {} file(s) [{}]",
        samples.len(),
        files.len(),
        label_summary(&samples)
    );
    Ok(samples)
}

fn dataset_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(
            EstimatorError::dataset(format!("dataset {} does not exist", path.display())).into(),
        );
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    density: f64,
    average_speed: f64,
    tracked_ratio: f64,
    busiest_lane_share: f64,
    speed_spread: f64,
    label: String,
}

/// Parse one CSV document; errors name the offending line.
pub fn parse_csv(text: &str) -> std::result::Result<Vec<LabeledSample>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let expected: Vec<&str> = FEATURE_NAMES.iter().copied().chain(["label"]).collect();
    let headers = reader.headers().map_err(|e| describe(&e))?.clone();
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    if headers.iter().collect::<Vec<_>>() != expected {
        let line = headers.position().map_or(1, |p| p.line());
        return Err(format!(
            "line {}: header must be '{}'",
            line,
            expected.join(",")
        ));
    }

    let mut samples = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(|e| describe(&e))?;
        let features = [
            row.density,
            row.average_speed,
            row.tracked_ratio,
            row.busiest_lane_share,
            row.speed_spread,
        ];
        if let Some(k) = features.iter().position(|v| !v.is_finite()) {
            return Err(format!(
                "{} row '{}': {} is not finite",
                FEATURE_NAMES[k], row.label, features[k]
            ));
        }
        if row.label.is_empty() {
            return Err(format!("empty label in row {:?}", features));
        }
        samples.push(LabeledSample::new(features, &row.label));
    }
    Ok(samples)
}

fn describe(err: &csv::Error) -> String {
    match err.position() {
        Some(pos) => format!("line {}: {}", pos.line(), err),
        None => err.to_string(),
    }
}

/// "heavy=12, light=30" style count per label
pub fn label_summary(samples: &[LabeledSample]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for s in samples {
        *counts.entry(s.label.as_str()).or_insert(0) += 1;
    }
    counts
        .iter()
        .map(|(label, n)| format!("{}={}", label, n))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;

    const HEADER: &str = "density,average_speed,tracked_ratio,busiest_lane_share,speed_spread,label";

    #[test]
    fn test_parse_rows() {
        let text = format!("{}\n# comment\n10,80,0.9,0.5,4,light\n90, 8, 0.4, 0.7, 2, heavy\n", HEADER);
        let rows = parse_csv(&text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].label, "heavy");
        assert_eq!(rows[1].features[1], 8.0);
    }

    #[test]
    fn test_wrong_header() {
        let err = parse_csv("a,b,c\n1,2,3\n").unwrap_err();
        assert!(err.contains("line 1"));
    }

    #[test]
    fn test_bad_rows_name_the_line() {
        let short = format!("{}\n10,80,light\n", HEADER);
        assert!(parse_csv(&short).unwrap_err().contains("line 2"));

        let nan = format!("{}\n10,80,0.9,0.5,4,light\n10,fast,0.9,0.5,4,light\n", HEADER);
        let err = parse_csv(&nan).unwrap_err();
        assert!(err.contains("line 3"), "{}", err);

        let unlabeled = format!("{}\n10,80,0.9,0.5,4,\n", HEADER);
        assert!(parse_csv(&unlabeled).unwrap_err().contains("empty label"));
    }

    #[test]
    fn test_quoted_label_with_comma() {
        let text = format!("{}\n50,30,0.6,0.5,4,\"stop, go\"\n", HEADER);
        let rows = parse_csv(&text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "stop, go");
        assert_eq!(rows[0].features, [50.0, 30.0, 0.6, 0.5, 4.0]);
    }

    #[test]
    fn test_directory_of_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("day2")).unwrap();
        fs::write(
            dir.path().join("a.csv"),
            format!("{}\n10,80,0.9,0.5,4,light\n", HEADER),
        )
        .unwrap();
        fs::write(
            dir.path().join("day2/b.CSV"),
            format!("{}\n90,8,0.4,0.7,2,heavy\n", HEADER),
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let samples = load_dataset(dir.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(label_summary(&samples), "heavy=1, light=1");
    }

    #[test]
    fn test_empty_dataset_is_dataset_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, format!("{}\n", HEADER)).unwrap();
        let err = load_dataset(&path).unwrap_err();
        assert!(matches!(kind_of(&err), Some(EstimatorError::Dataset(_))));
    }

    #[test]
    fn test_missing_dataset_is_dataset_error() {
        let err = load_dataset(Path::new("/nonexistent/dataset")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(EstimatorError::Dataset(_))));
    }
}
