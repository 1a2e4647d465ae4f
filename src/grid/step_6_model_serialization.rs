// External imports
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// Internal imports
use super::step_3_lstm_model_arch::{GridForecaster, GridForecasterConfig};
use super::step_5_prediction::tensor_to_vec;
use crate::build_info;
use crate::constants::{self, FEATURES_PER_STEP};
use crate::error::{GridError, GridResult};

pub const INPUT_NAME: &str = "input";
pub const OUTPUT_NAME: &str = "output";

/// Where and how the trained model is exported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Artifact path without extension; `.bin` and `.graph.json` are appended
    pub path: PathBuf,
    /// Batch size of the traced dummy input
    pub trace_batch_size: usize,
    pub dummy_input_seed: u64,
    /// Largest accepted deviation between traced and reloaded outputs
    pub tolerance: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(constants::EXPORT_PATH),
            trace_batch_size: 1,
            dummy_input_seed: constants::DUMMY_INPUT_SEED,
            tolerance: constants::EXPORT_TOLERANCE,
        }
    }
}

/// Self-description stored next to the exported weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub version: String,
    pub rustc_version: String,
    pub timestamp: u64,
    pub input_name: String,
    pub output_name: String,
    /// Traced input shape `[batch, window, features]`
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    /// Axes that may vary at inference time (the batch axis)
    pub dynamic_axes: Vec<usize>,
    pub window_size: usize,
    /// Whether the model was trained on loads scaled into [0, 1]
    #[serde(default)]
    pub normalized_inputs: bool,
    pub model: GridForecasterConfig,
    pub dummy_input_seed: u64,
    #[serde(with = "crate::util::json_float::vec_f32")]
    pub traced_output: Vec<f32>,
    /// Set once the reloaded artifact has been checked against the trace
    pub simplified: bool,
}

/// Appends `suffix` to the full file name, so dotted stems like `model.v2` survive
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn weights_path(path: &Path) -> PathBuf {
    with_suffix(path, ".bin")
}

pub fn manifest_path(path: &Path) -> PathBuf {
    with_suffix(path, ".graph.json")
}

/// Seeded dummy input of shape `[batch, window, 3]`, uniform in [0, 1)
pub fn dummy_input<B: Backend>(
    batch_size: usize,
    window_size: usize,
    seed: u64,
    device: &B::Device,
) -> Tensor<B, 3> {
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..batch_size * window_size * FEATURES_PER_STEP)
        .map(|_| rng.random::<f32>())
        .collect();
    Tensor::from_data(
        TensorData::new(values, [batch_size, window_size, FEATURES_PER_STEP]),
        device,
    )
}

fn max_abs_deviation(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() {
        return f64::INFINITY;
    }
    left.iter()
        .zip(right)
        .map(|(l, r)| f64::from((l - r).abs()))
        .fold(0.0, f64::max)
}

fn save_weights<B: Backend>(model: &GridForecaster<B>, path: &Path) -> GridResult<()> {
    model
        .clone()
        .save_file::<BinFileRecorder<FullPrecisionSettings>, _>(weights_path(path), &Default::default())
        .map_err(|e| GridError::Record(e.to_string()))
}

fn write_manifest(manifest: &ExportManifest, path: &Path) -> GridResult<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(manifest_path(path), json)?;
    Ok(())
}

/// Exports an inference-mode model as weights plus a graph manifest
///
/// One forward pass on a seeded dummy input traces the reference output.
/// The artifact is then reloaded into a fresh model; if it reproduces the
/// trace within `config.tolerance` the verified artifact overwrites the
/// first one and the manifest is marked `simplified`.
///
/// # Arguments
///
/// * `model` - Trained model in inference mode (see `to_inference`)
/// * `model_config` - Configuration the model was built from
/// * `window_size` - Fixed sequence length of the input
/// * `normalized_inputs` - Whether training loads were scaled into [0, 1]
/// * `config` - Destination and verification settings
/// * `device` - Compute target used for tracing and reloading
///
/// # Returns
///
/// Returns the final manifest
pub fn export_model<B: Backend>(
    model: &GridForecaster<B>,
    model_config: &GridForecasterConfig,
    window_size: usize,
    normalized_inputs: bool,
    config: &ExportConfig,
    device: &B::Device,
) -> GridResult<ExportManifest> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let batch_size = config.trace_batch_size.max(1);
    let input = dummy_input::<B>(batch_size, window_size, config.dummy_input_seed, device);
    let output = model.forward(input.clone());
    let output_shape = output.dims().to_vec();
    let traced_output = tensor_to_vec(output)?;
    debug!("Traced output for export: {:?}", traced_output);

    let mut manifest = ExportManifest {
        version: build_info::PKG_VERSION.to_string(),
        rustc_version: build_info::RUSTC_VERSION.to_string(),
        timestamp: SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        input_name: INPUT_NAME.to_string(),
        output_name: OUTPUT_NAME.to_string(),
        input_shape: vec![batch_size, window_size, FEATURES_PER_STEP],
        output_shape,
        dynamic_axes: vec![0],
        window_size,
        normalized_inputs,
        model: model_config.clone(),
        dummy_input_seed: config.dummy_input_seed,
        traced_output,
        simplified: false,
    };
    save_weights(model, &config.path)?;
    write_manifest(&manifest, &config.path)?;
    info!("Model exported to {}", weights_path(&config.path).display());

    // Verification pass on a freshly loaded copy
    let (reloaded, _) = load_exported_model::<B>(&config.path, device)?;
    let reloaded_output = tensor_to_vec(reloaded.forward(input))?;
    let deviation = max_abs_deviation(&manifest.traced_output, &reloaded_output);
    if deviation > config.tolerance {
        return Err(GridError::ExportMismatch {
            deviation,
            tolerance: config.tolerance,
        });
    }

    manifest.simplified = true;
    save_weights(&reloaded, &config.path)?;
    write_manifest(&manifest, &config.path)?;
    info!(
        "Verified export at {} (max deviation {:e})",
        manifest_path(&config.path).display(),
        deviation
    );

    Ok(manifest)
}

/// Loads an exported model and its manifest onto `device`
pub fn load_exported_model<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> GridResult<(GridForecaster<B>, ExportManifest)> {
    let manifest_file = manifest_path(path);
    if !manifest_file.exists() {
        return Err(GridError::FileNotFound(manifest_file));
    }
    let manifest: ExportManifest = serde_json::from_str(&std::fs::read_to_string(&manifest_file)?)?;
    manifest.model.validate()?;

    let model = manifest
        .model
        .init::<B>(device)
        .load_file::<BinFileRecorder<FullPrecisionSettings>, _>(weights_path(path), &Default::default(), device)
        .map_err(|e| GridError::Record(e.to_string()))?;

    Ok((model, manifest))
}
