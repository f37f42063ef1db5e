// src/pipeline/mod.rs

pub mod metrics;
pub mod result;
pub mod run;

pub use run::{run_evaluation, run_inference, run_training};
