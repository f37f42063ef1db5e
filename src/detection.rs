// src/detection.rs
//
// Adapter for the external vehicle detectors. Inference runs outside this
// crate; each detector leaves its boxes for an image in a JSON sidecar
// `<image-stem>.<detector>.json` next to the image. This module reads the
// sidecars, filters to vehicle classes and reduces boxes to centroids.

use crate::error::EstimatorError;
use crate::types::{Centroid, DetectionConfig, FrameSize};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Supported detectors. The set is closed; adding one means adding a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// YOLOv5n, boxes in input-frame pixels
    Yolo,
    /// MobileNet-SSDv2, boxes normalised to [0, 1]
    Mobilenet,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yolo => "yolo",
            Self::Mobilenet => "mobilenet",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Yolo => "YOLOv5n",
            Self::Mobilenet => "MobileNet_SSDv2",
        }
    }

    pub fn sidecar_path(&self, image: &Path) -> PathBuf {
        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        image.with_file_name(format!("{}.{}.json", stem, self.as_str()))
    }

    /// Map a raw box to input-frame pixels
    fn to_pixels(&self, bbox: [f32; 4], frame: FrameSize) -> [f32; 4] {
        match self {
            Self::Yolo => bbox,
            Self::Mobilenet => {
                let (w, h) = (frame.width as f32, frame.height as f32);
                [bbox[0] * w, bbox[1] * h, bbox[2] * w, bbox[3] * h]
            }
        }
    }

    /// One centroid list per image, in image order
    pub fn predict(
        &self,
        image_paths: &[PathBuf],
        frame: FrameSize,
        cfg: &DetectionConfig,
    ) -> Result<Vec<Vec<Centroid>>> {
        if image_paths.len() < 2 {
            return Err(EstimatorError::mismatch(format!(
                "need two frames, got {}",
                image_paths.len()
            ))
            .into());
        }

        let mut frames = Vec::with_capacity(image_paths.len());
        for (frame_idx, image) in image_paths.iter().enumerate() {
            let sidecar = self.sidecar_path(image);
            let raw = read_sidecar(&sidecar)?;
            let total = raw.len();

            let centroids: Vec<Centroid> = raw
                .into_iter()
                .filter(|d| {
                    d.confidence >= cfg.min_confidence
                        && cfg.vehicle_classes.iter().any(|c| c == &d.class)
                })
                .map(|d| {
                    let b = self.to_pixels(d.bbox, frame);
                    Centroid {
                        confidence: Some(d.confidence),
                        ..Centroid::new((b[0] + b[2]) * 0.5, (b[1] + b[3]) * 0.5, frame_idx)
                    }
                })
                .collect();

            info!(
                "{}: {} vehicle(s) in {} ({} raw boxes)",
                self.display_name(),
                centroids.len(),
                image.display(),
                total
            );
            for c in &centroids {
                debug!("  frame {} centroid ({:.1}, {:.1})", frame_idx, c.x, c.y);
            }
            frames.push(centroids);
        }

        Ok(frames)
    }
}

impl FromStr for DetectorKind {
    type Err = EstimatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yolo" => Ok(Self::Yolo),
            "mobilenet" => Ok(Self::Mobilenet),
            other => Err(EstimatorError::config(format!(
                "unsupported detector '{}' (expected yolo or mobilenet)",
                other
            ))),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawDetection {
    bbox: [f32; 4],
    class: String,
    confidence: f32,
}

fn read_sidecar(path: &Path) -> Result<Vec<RawDetection>> {
    if !path.exists() {
        return Err(EstimatorError::mismatch(format!(
            "no detector output at {}",
            path.display()
        ))
        .into());
    }
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let detections: Vec<RawDetection> = serde_json::from_str(&text)
        .map_err(|e| EstimatorError::mismatch(format!("{}: {}", path.display(), e)))?;
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("yolo".parse::<DetectorKind>().unwrap(), DetectorKind::Yolo);
        assert_eq!(
            "MobileNet".parse::<DetectorKind>().unwrap(),
            DetectorKind::Mobilenet
        );
        assert!(matches!(
            "rcnn".parse::<DetectorKind>(),
            Err(EstimatorError::Config(_))
        ));
    }

    #[test]
    fn test_sidecar_name() {
        let p = DetectorKind::Mobilenet.sidecar_path(Path::new("data/img1.jpg"));
        assert_eq!(p, Path::new("data/img1.mobilenet.json"));
    }

    #[test]
    fn test_yolo_centroids_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "img1.yolo.json",
            r#"[
                {"bbox": [100, 100, 140, 160], "class": "car", "confidence": 0.9},
                {"bbox": [0, 0, 10, 10], "class": "person", "confidence": 0.9},
                {"bbox": [0, 0, 10, 10], "class": "truck", "confidence": 0.1}
            ]"#,
        );
        write(dir.path(), "img2.yolo.json", "[]");

        let images = vec![dir.path().join("img1.jpg"), dir.path().join("img2.jpg")];
        let frames = DetectorKind::Yolo
            .predict(&images, FrameSize::new(640, 640), &DetectionConfig::default())
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 1);
        assert_eq!((frames[0][0].x, frames[0][0].y), (120.0, 130.0));
        assert_eq!(frames[0][0].frame, 0);
        assert!(frames[1].is_empty());
    }

    #[test]
    fn test_mobilenet_boxes_are_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"[{"bbox": [0.25, 0.5, 0.75, 1.0], "class": "bus", "confidence": 0.7}]"#;
        write(dir.path(), "a.mobilenet.json", body);
        write(dir.path(), "b.mobilenet.json", body);

        let images = vec![dir.path().join("a.png"), dir.path().join("b.png")];
        let frames = DetectorKind::Mobilenet
            .predict(&images, FrameSize::new(640, 480), &DetectionConfig::default())
            .unwrap();
        assert_eq!((frames[1][0].x, frames[1][0].y), (320.0, 360.0));
        assert_eq!(frames[1][0].frame, 1);
    }

    #[test]
    fn test_missing_sidecar_is_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "img1.yolo.json", "[]");
        let images = vec![dir.path().join("img1.jpg"), dir.path().join("img2.jpg")];
        let err = DetectorKind::Yolo
            .predict(&images, FrameSize::new(640, 640), &DetectionConfig::default())
            .unwrap_err();
        assert!(matches!(
            kind_of(&err),
            Some(EstimatorError::DetectionMismatch(_))
        ));
    }

    #[test]
    fn test_single_frame_is_mismatch() {
        let err = DetectorKind::Yolo
            .predict(
                &[PathBuf::from("img1.jpg")],
                FrameSize::new(640, 640),
                &DetectionConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(
            kind_of(&err),
            Some(EstimatorError::DetectionMismatch(_))
        ));
    }
}
