// src/main.rs

mod analysis;
mod config;
mod detection;
mod error;
mod lane_model;
mod logging;
mod pipeline;
mod report;
mod types;

use anyhow::Result;
use clap::Parser;
use detection::DetectorKind;
use logging::LogSettings;
use std::path::Path;
use tracing::{debug, error, info};
use types::{Config, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "traffic_estimator")]
#[command(about = "Estimate road traffic state from two timed captures")]
#[command(version)]
struct Args {
    /// Directory holding the two captures and their detector output
    #[arg(short, long)]
    input: Option<String>,

    /// First capture, relative to the input directory
    #[arg(long)]
    img1: Option<String>,

    /// Second capture, relative to the input directory
    #[arg(long)]
    img2: Option<String>,

    /// Vehicle detector: yolo | mobilenet
    #[arg(short, long)]
    detector: Option<String>,

    /// Score the trained classifier on the labeled dataset
    #[arg(short, long, conflicts_with = "train")]
    evaluate: bool,

    /// Train the classifier on the labeled dataset
    #[arg(short, long)]
    train: bool,

    /// Labeled CSV file or directory for --train / --evaluate
    #[arg(long)]
    dataset: Option<String>,

    /// Classifier model file
    #[arg(short, long)]
    model: Option<String>,

    /// Result directory
    #[arg(short = 'l', long)]
    path: Option<String>,

    /// Config file (default: config.yaml when present)
    #[arg(short = 'f', long)]
    config: Option<String>,

    /// Print the result summary to stdout
    #[arg(short, long)]
    show: bool,

    /// ENABLE | DISABLE
    #[arg(long)]
    log_mode: Option<String>,

    /// FILE | CONSOLE | ALL
    #[arg(long)]
    log_type: Option<String>,

    /// ERROR | WARNING | INFO | DEBUG | TRACE
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        let set = |slot: &mut String, value: &Option<String>| {
            if let Some(v) = value {
                *slot = v.clone();
            }
        };
        set(&mut config.input.data_path, &self.input);
        set(&mut config.input.images[0], &self.img1);
        set(&mut config.input.images[1], &self.img2);
        set(&mut config.detection.detector, &self.detector);
        set(&mut config.training.dataset, &self.dataset);
        set(&mut config.estimation.classifier_model, &self.model);
        set(&mut config.output.result_dir, &self.path);
        set(&mut config.logging.mode, &self.log_mode);
        set(&mut config.logging.sink, &self.log_type);
        set(&mut config.logging.level, &self.log_level);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Infer,
    Train,
    Evaluate,
}

impl Args {
    fn mode(&self) -> Mode {
        if self.train {
            Mode::Train
        } else if self.evaluate {
            Mode::Evaluate
        } else {
            Mode::Infer
        }
    }
}

fn main() {
    let args = Args::parse();

    // Console logging with defaults until the run's own settings are known
    let bootstrap = LogSettings::from_config(&LoggingConfig::default())
        .and_then(|s| s.build(Path::new(".")))
        .unwrap_or_else(|_| tracing::Dispatch::none());

    let prepared = tracing::dispatcher::with_default(&bootstrap, || prepare(&args));
    let (config, detector, dispatch) = match prepared {
        Ok(p) => p,
        Err(e) => {
            tracing::dispatcher::with_default(&bootstrap, || error!("❌ {:#}", e));
            std::process::exit(exit_code(&e));
        }
    };

    let outcome = tracing::dispatcher::with_default(&dispatch, || {
        info!(
            "🚦 Traffic Estimator v{} starting",
            env!("CARGO_PKG_VERSION")
        );
        let result = execute(&args, &config, detector);
        if let Err(e) = &result {
            error!("❌ {:#}", e);
        }
        result
    });

    if let Err(e) = outcome {
        std::process::exit(exit_code(&e));
    }
}

/// Non-zero status per failure kind; 1 for anything untyped
fn exit_code(err: &anyhow::Error) -> i32 {
    match error::kind_of(err) {
        Some(error::EstimatorError::Config(_)) => 2,
        Some(error::EstimatorError::Dataset(_)) => 3,
        Some(error::EstimatorError::DetectionMismatch(_)) => 4,
        None => 1,
    }
}

/// Load and validate everything that can be rejected before a stage runs.
fn prepare(args: &Args) -> Result<(Config, DetectorKind, tracing::Dispatch)> {
    let mut config = Config::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let detector: DetectorKind = config.detection.detector.parse()?;
    let dispatch = LogSettings::from_config(&config.logging)?
        .build(Path::new(&config.output.result_dir))?;
    Ok((config, detector, dispatch))
}

fn execute(args: &Args, config: &Config, detector: DetectorKind) -> Result<()> {
    match args.mode() {
        Mode::Train => {
            let classifier = pipeline::run_training(config)?;
            info!(
                "✓ Model with labels {:?} written to {}",
                classifier.labels, config.estimation.classifier_model
            );
        }
        Mode::Evaluate => {
            let report = pipeline::run_evaluation(config)?;
            println!("{}", report.summary());
        }
        Mode::Infer => {
            let output = pipeline::run_inference(config, detector)?;
            if args.show {
                println!("{}", report::console_summary(&output.result));
            }
            for v in &output.measurement.vehicle_speeds {
                debug!("V{} lane {}: {:.1} km/h", v.vehicle_id, v.lane, v.speed_kmh);
            }
            if !output.outcome.untracked.is_empty() {
                info!(
                    "{} frame-1 detection(s) could not be paired",
                    output.outcome.untracked.len()
                );
            }
            info!(
                "Reports: {}, {}",
                output.report.text.display(),
                output.report.json.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "traffic_estimator",
            "-i",
            "data/road_2",
            "--img2",
            "late.jpg",
            "-d",
            "mobilenet",
            "-l",
            "out",
            "--log-level",
            "DEBUG",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.input.data_path, "data/road_2");
        assert_eq!(config.input.images[0], "img1.jpg");
        assert_eq!(config.input.images[1], "late.jpg");
        assert_eq!(config.detection.detector, "mobilenet");
        assert_eq!(config.output.result_dir, "out");
        assert_eq!(config.logging.level, "DEBUG");
        assert_eq!(args.mode(), Mode::Infer);
    }

    #[test]
    fn test_modes() {
        assert_eq!(Args::parse_from(["t", "--train"]).mode(), Mode::Train);
        assert_eq!(Args::parse_from(["t", "-e"]).mode(), Mode::Evaluate);
        assert!(Args::try_parse_from(["t", "-e", "-t"]).is_err());
    }

    #[test]
    fn test_exit_codes_by_kind() {
        assert_eq!(exit_code(&error::EstimatorError::config("x").into()), 2);
        assert_eq!(exit_code(&error::EstimatorError::dataset("x").into()), 3);
        assert_eq!(exit_code(&error::EstimatorError::mismatch("x").into()), 4);
        assert_eq!(exit_code(&anyhow::anyhow!("disk full")), 1);
    }

    #[test]
    fn test_unknown_detector_rejected_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("config.yaml");
        Config::default().write_to(&cfg_path).unwrap();
        let args = Args::parse_from([
            "t",
            "-f",
            cfg_path.to_str().unwrap(),
            "-d",
            "rcnn",
        ]);
        let err = prepare(&args).unwrap_err();
        assert!(matches!(
            error::kind_of(&err),
            Some(error::EstimatorError::Config(_))
        ));
        assert_eq!(exit_code(&err), 2);
    }
}
