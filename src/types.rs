use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub estimation: EstimationConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub data_path: String,
    pub images: [String; 2],
    /// Resolved against `data_path`
    pub lanes_file: String,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            data_path: "media/traffic/road_1/".to_string(),
            images: ["img1.jpg".to_string(), "img2.jpg".to_string()],
            lanes_file: "../lines.txt".to_string(),
            frame_width: 640,
            frame_height: 640,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub detector: String,
    pub min_confidence: f32,
    pub vehicle_classes: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            detector: "yolo".to_string(),
            min_confidence: 0.25,
            vehicle_classes: vec![
                "car".to_string(),
                "motorcycle".to_string(),
                "bus".to_string(),
                "truck".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Smallest displacement along the lane axis accepted for a pair.
    /// 0 admits vehicles standing still in a queue.
    pub min_axis_displacement_px: f32,
    /// Largest displacement along the lane axis accepted for a pair
    pub max_axis_displacement_px: Option<f32>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_axis_displacement_px: 0.0,
            max_axis_displacement_px: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Fixed gap between the two captures
    pub elapsed_seconds: f64,
    /// Tracked vehicles that correspond to 100% density
    pub capacity_baseline: u32,
    pub classifier_model: String,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            elapsed_seconds: 1.0,
            capacity_baseline: 20,
            classifier_model: "models/traffic_svm.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// CSV file, or a directory searched recursively for *.csv
    pub dataset: String,
    /// Soft-margin penalty C of each pairwise SVM
    pub soft_margin: f64,
    /// Stopping tolerance of the SMO solver
    pub tolerance: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset: "media/svm_dataset/".to_string(),
            soft_margin: 1.0,
            tolerance: 1e-7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub result_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            result_dir: "result".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub mode: String,
    pub sink: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            mode: "ENABLE".to_string(),
            sink: "CONSOLE".to_string(),
            level: "INFO".to_string(),
        }
    }
}

// ============================================================================
// SHARED DATA TYPES
// ============================================================================

/// 1-based lane identifier, in lane-file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneId(pub u32);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A detected vehicle reduced to its image-plane centre
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f32,
    pub y: f32,
    /// 0 for the first capture, 1 for the second
    pub frame: usize,
    pub confidence: Option<f32>,
}

impl Centroid {
    pub fn new(x: f32, y: f32, frame: usize) -> Self {
        Self {
            x,
            y,
            frame,
            confidence: None,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
