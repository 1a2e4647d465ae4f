// External crates
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// Local modules
use crate::constants;
use crate::error::{GridError, GridResult};
use crate::grid::step_3_lstm_model_arch::GridForecasterConfig;
use crate::grid::step_4_train_model::TrainingConfig;
use crate::grid::step_5_prediction::EvaluationConfig;
use crate::grid::step_6_model_serialization::ExportConfig;
use crate::util::pre_processor::LoaderConfig;

/// Sliding-window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub window_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: constants::WINDOW_SIZE,
        }
    }
}

/// Where tensors are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeTarget {
    Cpu,
    Cuda(usize),
    Mps,
}

impl FromStr for ComputeTarget {
    type Err = GridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ComputeTarget::Cpu),
            "mps" => Ok(ComputeTarget::Mps),
            "cuda" => Ok(ComputeTarget::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(ComputeTarget::Cuda)
                .ok_or_else(|| GridError::InvalidConfig(format!("unknown compute target '{}'", value))),
        }
    }
}

impl fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeTarget::Cpu => write!(f, "cpu"),
            ComputeTarget::Cuda(index) => write!(f, "cuda:{}", index),
            ComputeTarget::Mps => write!(f, "mps"),
        }
    }
}

/// Every setting of one experiment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub data_file: PathBuf,
    pub runs_dir: PathBuf,
    /// `cpu`, `cuda:N` or `mps`
    pub device: String,
    pub loader: LoaderConfig,
    pub window: WindowConfig,
    pub model: GridForecasterConfig,
    pub training: TrainingConfig,
    pub evaluation: EvaluationConfig,
    pub export: ExportConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(constants::DATA_FILE),
            runs_dir: PathBuf::from(constants::RUNS_DIR),
            device: ComputeTarget::Cpu.to_string(),
            loader: LoaderConfig::default(),
            window: WindowConfig::default(),
            model: GridForecasterConfig::default(),
            training: TrainingConfig::default(),
            evaluation: EvaluationConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Reads a JSON config; absent fields keep their defaults
    pub fn load(path: &Path) -> GridResult<Self> {
        if !path.exists() {
            return Err(GridError::FileNotFound(path.to_path_buf()));
        }
        let config: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> GridResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn compute_target(&self) -> GridResult<ComputeTarget> {
        self.device.parse()
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.window.window_size == 0 {
            return Err(GridError::InvalidConfig("window size must be at least 1".to_string()));
        }
        if self.model.input_size != constants::FEATURES_PER_STEP {
            return Err(GridError::InvalidConfig(format!(
                "model input size must be {} (day_sin, minute_sin, load), got {}",
                constants::FEATURES_PER_STEP,
                self.model.input_size
            )));
        }
        self.model.validate()?;
        self.training.validate()?;
        self.compute_target()?;
        Ok(())
    }
}
