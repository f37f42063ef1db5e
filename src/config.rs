use crate::error::EstimatorError;
use crate::types::{Config, FrameSize};
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EstimatorError::config(format!("cannot read config '{}': {}", path, e)))?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| EstimatorError::config(format!("invalid config '{}': {}", path, e)))?;
        Ok(config)
    }

    /// Load the config file if it exists; the built-in defaults otherwise.
    /// Only the default path is allowed to be absent.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => {
                warn!(
                    "No {} found, running with built-in defaults",
                    DEFAULT_CONFIG_PATH
                );
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let est = &self.estimation;
        if !(est.elapsed_seconds.is_finite() && est.elapsed_seconds > 0.0) {
            return Err(EstimatorError::config(format!(
                "estimation.elapsed_seconds must be > 0 (got {})",
                est.elapsed_seconds
            ))
            .into());
        }
        if est.capacity_baseline == 0 {
            return Err(EstimatorError::config("estimation.capacity_baseline must be > 0").into());
        }
        if self.detection.vehicle_classes.is_empty() {
            return Err(EstimatorError::config("detection.vehicle_classes is empty").into());
        }
        if self.input.frame_width == 0 || self.input.frame_height == 0 {
            return Err(EstimatorError::config("input frame size must be non-zero").into());
        }
        let trk = &self.tracking;
        if let Some(max) = trk.max_axis_displacement_px {
            if max < trk.min_axis_displacement_px {
                return Err(EstimatorError::config(format!(
                    "tracking.max_axis_displacement_px ({}) < min_axis_displacement_px ({})",
                    max, trk.min_axis_displacement_px
                ))
                .into());
            }
        }
        let trn = &self.training;
        if !(trn.soft_margin > 0.0 && trn.tolerance > 0.0) {
            return Err(EstimatorError::config(
                "training needs soft_margin > 0 and tolerance > 0",
            )
            .into());
        }
        Ok(())
    }

    pub fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.input.frame_width, self.input.frame_height)
    }

    pub fn image_paths(&self) -> Vec<PathBuf> {
        let base = Path::new(&self.input.data_path);
        self.input.images.iter().map(|name| base.join(name)).collect()
    }

    pub fn lanes_path(&self) -> PathBuf {
        Path::new(&self.input.data_path).join(&self.input.lanes_file)
    }

    #[cfg(test)]
    pub fn write_to(&self, path: &Path) -> Result<()> {
        use anyhow::Context;
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml).with_context(|| format!("writing {}", path.display()))
    }
}
