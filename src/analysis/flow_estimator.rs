// src/analysis/flow_estimator.rs
//
// Turns tracked vehicle pairs into traffic metrics:
//   per-vehicle speed → per-lane count / mean speed → density, busiest lane
//   → fixed-width feature vector → traffic-state label.
//
// Speed uses only the displacement along the lane's travel axis, scaled by
// the lane's metres-per-pixel factor.

use super::traffic_classifier::TrafficClassifier;
use super::vehicle_tracker::TrackedVehicle;
use crate::error::EstimatorError;
use crate::lane_model::LaneSet;
use crate::pipeline::result::{LaneFlow, TrafficResult};
use crate::types::{EstimationConfig, LaneId};
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

const MPS_TO_KMH: f64 = 3.6;

/// Number of values the classifier sees
pub const FEATURE_WIDTH: usize = 5;

/// Column names of the classifier input, in order
pub const FEATURE_NAMES: [&str; FEATURE_WIDTH] = [
    "density",
    "average_speed",
    "tracked_ratio",
    "busiest_lane_share",
    "speed_spread",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSpeed {
    pub vehicle_id: u32,
    pub lane: LaneId,
    pub speed_kmh: f64,
}

/// Per-run numeric summary; also the unit of training data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub total_detected: usize,
    pub total_tracked: usize,
    pub lane_counts: Vec<usize>,
    pub lane_mean_speeds: Vec<f64>,
    pub density: f64,
    pub average_speed: f64,
}

impl FeatureVector {
    /// Lane-count independent view used by the classifier
    pub fn classifier_input(&self) -> [f64; FEATURE_WIDTH] {
        let tracked_ratio = if self.total_detected > 0 {
            self.total_tracked as f64 / self.total_detected as f64
        } else {
            0.0
        };
        let busiest_lane_share = match (self.lane_counts.iter().max(), self.total_tracked) {
            (Some(&max), total) if total > 0 => max as f64 / total as f64,
            _ => 0.0,
        };
        let occupied: Vec<f64> = self
            .lane_counts
            .iter()
            .zip(&self.lane_mean_speeds)
            .filter(|(count, _)| **count > 0)
            .map(|(_, speed)| *speed)
            .collect();
        let speed_spread = if occupied.is_empty() {
            0.0
        } else {
            let max = occupied.iter().copied().fold(f64::MIN, f64::max);
            let min = occupied.iter().copied().fold(f64::MAX, f64::min);
            max - min
        };

        [
            self.density,
            self.average_speed,
            tracked_ratio,
            busiest_lane_share,
            speed_spread,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowMeasurement {
    pub vehicle_speeds: Vec<VehicleSpeed>,
    pub lane_flows: Vec<LaneFlow>,
    pub density: f64,
    pub average_speed_kmh: f64,
    pub highest_lane_flow: Option<LaneId>,
    pub features: FeatureVector,
}

/// Pure metric computation; no classification.
pub fn measure_flow(
    tracked: &[TrackedVehicle],
    total_detected: usize,
    lanes: &LaneSet,
    cfg: &EstimationConfig,
) -> Result<FlowMeasurement> {
    if cfg.capacity_baseline == 0 {
        return Err(EstimatorError::config("capacity baseline must be > 0").into());
    }

    // ── per-vehicle speed ──
    let mut vehicle_speeds = Vec::with_capacity(tracked.len());
    for v in tracked {
        let scale = lanes.scale_of(v.lane)?;
        if !(v.elapsed_seconds.is_finite() && v.elapsed_seconds > 0.0) {
            return Err(EstimatorError::config(format!(
                "elapsed time between captures must be > 0 (got {})",
                v.elapsed_seconds
            ))
            .into());
        }
        let metres = v.axial_displacement_px as f64 * scale as f64;
        let speed_kmh = metres / v.elapsed_seconds * MPS_TO_KMH;
        debug!(
            "V{} lane {}: {:.1}px × {:.4} m/px / {:.2}s = {:.1} km/h",
            v.id, v.lane, v.axial_displacement_px, scale, v.elapsed_seconds, speed_kmh
        );
        vehicle_speeds.push(VehicleSpeed {
            vehicle_id: v.id,
            lane: v.lane,
            speed_kmh,
        });
    }

    // ── per-lane aggregate ──
    let lane_flows: Vec<LaneFlow> = lanes
        .ids()
        .map(|lane| {
            let speeds: Vec<f64> = vehicle_speeds
                .iter()
                .filter(|s| s.lane == lane)
                .map(|s| s.speed_kmh)
                .collect();
            LaneFlow {
                lane,
                vehicle_count: speeds.len(),
                mean_speed_kmh: mean(&speeds),
            }
        })
        .collect();

    // ── global ──
    let density =
        (tracked.len() as f64 / cfg.capacity_baseline as f64 * 100.0).clamp(0.0, 100.0);
    let all_speeds: Vec<f64> = vehicle_speeds.iter().map(|s| s.speed_kmh).collect();
    let average_speed_kmh = mean(&all_speeds);

    // Strictly greater keeps the lowest lane id on ties
    let mut highest_lane_flow: Option<(LaneId, usize)> = None;
    for flow in &lane_flows {
        if flow.vehicle_count == 0 {
            continue;
        }
        match highest_lane_flow {
            Some((_, best)) if flow.vehicle_count <= best => {}
            _ => highest_lane_flow = Some((flow.lane, flow.vehicle_count)),
        }
    }

    let features = FeatureVector {
        total_detected,
        total_tracked: tracked.len(),
        lane_counts: lane_flows.iter().map(|f| f.vehicle_count).collect(),
        lane_mean_speeds: lane_flows.iter().map(|f| f.mean_speed_kmh).collect(),
        density,
        average_speed: average_speed_kmh,
    };

    Ok(FlowMeasurement {
        vehicle_speeds,
        lane_flows,
        density,
        average_speed_kmh,
        highest_lane_flow: highest_lane_flow.map(|(lane, _)| lane),
        features,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// ============================================================================
// ESTIMATOR
// ============================================================================

pub struct FlowEstimator {
    config: EstimationConfig,
    classifier: TrafficClassifier,
}

impl FlowEstimator {
    pub fn new(config: EstimationConfig, classifier: TrafficClassifier) -> Self {
        Self { config, classifier }
    }

    /// Fill the traffic metrics of `result`. `total_detected_vehicles`
    /// must already be set by the caller.
    pub fn estimate(
        &self,
        tracked: &[TrackedVehicle],
        lanes: &LaneSet,
        result: &mut TrafficResult,
    ) -> Result<FlowMeasurement> {
        let measurement = measure_flow(tracked, result.total_detected_vehicles, lanes, &self.config)?;
        let prediction = self
            .classifier
            .classify(&measurement.features.classifier_input())?;

        result.total_tracked_vehicles = tracked.len();
        result.density = measurement.density;
        result.average_flow_speed = measurement.average_speed_kmh;
        result.highest_lane_flow = measurement.highest_lane_flow;
        result.lane_flows = measurement.lane_flows.clone();
        result.prediction = prediction;

        info!(
            "Traffic: {} | density {:.0}% | avg speed {:.1} km/h | busiest lane {}",
            result.prediction,
            result.density,
            result.average_flow_speed,
            result.highest_lane_label()
        );
        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dataset::LabeledSample;
    use crate::analysis::traffic_classifier::TrainingParams;
    use crate::types::Centroid;

    const LANES: &str = "\
0.05 down 100,0 200,0 200,640 100,640
0.10 down 200,0 300,0 300,640 200,640
0.05 down 300,0 400,0 400,640 300,640
";

    fn lanes() -> LaneSet {
        LaneSet::parse(LANES).unwrap()
    }

    fn vehicle(id: u32, lane: u32, disp: f32, elapsed: f64) -> TrackedVehicle {
        TrackedVehicle {
            id,
            lane: LaneId(lane),
            first: Centroid::new(0.0, 0.0, 0),
            second: Centroid::new(0.0, disp, 1),
            axial_displacement_px: disp,
            elapsed_seconds: elapsed,
        }
    }

    fn cfg() -> EstimationConfig {
        EstimationConfig {
            elapsed_seconds: 2.0,
            capacity_baseline: 10,
            classifier_model: String::new(),
        }
    }

    #[test]
    fn test_speed_from_scale_and_time() {
        // 200 px × 0.05 m/px = 10 m in 2 s = 5 m/s = 18 km/h
        let m = measure_flow(&[vehicle(1, 1, 200.0, 2.0)], 2, &lanes(), &cfg()).unwrap();
        assert!((m.vehicle_speeds[0].speed_kmh - 18.0).abs() < 1e-6);
        assert!((m.average_speed_kmh - 18.0).abs() < 1e-6);
        assert_eq!(m.highest_lane_flow, Some(LaneId(1)));
    }

    #[test]
    fn test_lane_aggregates() {
        let tracked = vec![
            vehicle(1, 1, 100.0, 1.0), // 5 m/s
            vehicle(2, 2, 100.0, 1.0), // 10 m/s
            vehicle(3, 2, 50.0, 1.0),  // 5 m/s
        ];
        let m = measure_flow(&tracked, 6, &lanes(), &cfg()).unwrap();
        assert_eq!(m.lane_flows.len(), 3);
        assert_eq!(m.lane_flows[0].vehicle_count, 1);
        assert_eq!(m.lane_flows[1].vehicle_count, 2);
        assert_eq!(m.lane_flows[2].vehicle_count, 0);
        assert!((m.lane_flows[1].mean_speed_kmh - 27.0).abs() < 1e-6);
        assert_eq!(m.lane_flows[2].mean_speed_kmh, 0.0);
        assert_eq!(m.highest_lane_flow, Some(LaneId(2)));
        assert!((m.density - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_busiest_lane_tie_takes_lowest_id() {
        let tracked = vec![vehicle(1, 3, 10.0, 1.0), vehicle(2, 2, 10.0, 1.0)];
        let m = measure_flow(&tracked, 2, &lanes(), &cfg()).unwrap();
        assert_eq!(m.highest_lane_flow, Some(LaneId(2)));
    }

    #[test]
    fn test_density_is_clamped() {
        let tracked: Vec<TrackedVehicle> = (1..=15).map(|k| vehicle(k, 1, 10.0, 1.0)).collect();
        let m = measure_flow(&tracked, 30, &lanes(), &cfg()).unwrap();
        assert_eq!(m.density, 100.0);
    }

    #[test]
    fn test_no_vehicles_gives_zero_metrics() {
        let m = measure_flow(&[], 3, &lanes(), &cfg()).unwrap();
        assert_eq!(m.density, 0.0);
        assert_eq!(m.average_speed_kmh, 0.0);
        assert_eq!(m.highest_lane_flow, None);
        assert_eq!(m.features.classifier_input(), [0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unknown_lane_is_config_error() {
        let err = measure_flow(&[vehicle(1, 9, 10.0, 1.0)], 1, &lanes(), &cfg()).unwrap_err();
        assert!(matches!(
            crate::error::kind_of(&err),
            Some(EstimatorError::Config(_))
        ));
    }

    #[test]
    fn test_zero_elapsed_is_config_error() {
        assert!(measure_flow(&[vehicle(1, 1, 10.0, 0.0)], 1, &lanes(), &cfg()).is_err());
    }

    #[test]
    fn test_classifier_input() {
        let tracked = vec![
            vehicle(1, 1, 100.0, 1.0), // 18 km/h
            vehicle(2, 2, 100.0, 1.0), // 36 km/h
            vehicle(3, 2, 100.0, 1.0), // 36 km/h
        ];
        let m = measure_flow(&tracked, 6, &lanes(), &cfg()).unwrap();
        let x = m.features.classifier_input();
        // f32 lane scales widen to f64 with a little residue
        assert!((x[0] - 30.0).abs() < 1e-9);
        assert!((x[1] - 30.0).abs() < 1e-4);
        assert!((x[2] - 0.5).abs() < 1e-9);
        assert!((x[3] - 2.0 / 3.0).abs() < 1e-9);
        assert!((x[4] - 18.0).abs() < 1e-4);
    }

    #[test]
    fn test_wide_lane_speed_uses_declared_direction() {
        let wide = LaneSet::parse("0.05 down 0,500 640,500 640,640 0,640").unwrap();
        let tracker = crate::analysis::vehicle_tracker::VehicleTracker::new(
            crate::types::TrackingConfig::default(),
            crate::types::FrameSize::new(640, 640),
        );
        let out = tracker.track(
            &[Centroid::new(320.0, 520.0, 0)],
            &[Centroid::new(320.0, 620.0, 1)],
            &wide,
            1.0,
        );
        // 100 px × 0.05 m/px in 1 s = 5 m/s = 18 km/h
        let m = measure_flow(&out.tracked, 2, &wide, &cfg()).unwrap();
        assert_eq!(m.vehicle_speeds.len(), 1);
        assert!((m.vehicle_speeds[0].speed_kmh - 18.0).abs() < 1e-3);
    }

    fn toy_classifier() -> TrafficClassifier {
        let mut samples = Vec::new();
        for k in 0..4 {
            let k = k as f64;
            samples.push(LabeledSample::new([5.0 + k, 80.0 - k, 0.8, 0.4, 5.0], "light"));
            samples.push(LabeledSample::new([85.0 + k, 10.0 - k, 0.5, 0.6, 3.0], "heavy"));
        }
        TrafficClassifier::train(&samples, &TrainingParams::default()).unwrap()
    }

    #[test]
    fn test_estimate_fills_result_and_is_idempotent() {
        let estimator = FlowEstimator::new(cfg(), toy_classifier());
        let tracked = vec![vehicle(1, 1, 100.0, 1.0), vehicle(2, 2, 100.0, 1.0)];

        let mut first = TrafficResult::new();
        first.total_detected_vehicles = 4;
        estimator.estimate(&tracked, &lanes(), &mut first).unwrap();

        let mut second = TrafficResult::new();
        second.total_detected_vehicles = 4;
        estimator.estimate(&tracked, &lanes(), &mut second).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_tracked_vehicles, 2);
        assert!((first.density - 20.0).abs() < 1e-9);
        assert_eq!(first.prediction, "light");
        assert!(first.total_tracked_vehicles <= first.total_detected_vehicles);
    }
}
