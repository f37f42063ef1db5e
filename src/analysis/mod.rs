// src/analysis/mod.rs
//
// Two-frame traffic analysis.
//
// Signal flow:
//   centroids (frame 1, frame 2) → vehicle_tracker → TrackedVehicle pairs
//   → flow_estimator (speeds, lane counts, density) → traffic_classifier
//
// dataset feeds labeled feature rows to traffic_classifier for training
// and evaluation.

pub mod dataset;
pub mod flow_estimator;
pub mod traffic_classifier;
pub mod vehicle_tracker;
