// src/pipeline/result.rs
//
// Accumulator handed from stage to stage. Each stage fills its own fields;
// the report module reads the finished record.

use crate::types::LaneId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneFlow {
    pub lane: LaneId,
    pub vehicle_count: usize,
    /// 0 when the lane holds no tracked vehicle
    pub mean_speed_kmh: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrafficResult {
    // Stage timings, seconds
    /// Lane file and classifier model
    pub loading_time: f64,
    pub capturing_time: f64,
    pub detection_time: f64,
    pub tracking_time: f64,
    pub estimation_time: f64,
    pub saving_time: f64,
    pub total_time: f64,

    // Traffic metrics
    pub prediction: String,
    /// Percent of the capacity baseline, within [0, 100]
    pub density: f64,
    pub average_flow_speed: f64,
    pub highest_lane_flow: Option<LaneId>,
    pub lane_flows: Vec<LaneFlow>,
    pub total_detected_vehicles: usize,
    pub total_tracked_vehicles: usize,
}

impl TrafficResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highest_lane_label(&self) -> String {
        self.highest_lane_flow
            .map(|l| l.to_string())
            .unwrap_or_else(|| "none".to_string())
    }
}
