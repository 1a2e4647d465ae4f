// External imports
use burn::data::dataloader::DataLoaderBuilder;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Internal imports
use super::step_1_tensor_preparation::{GridBatcher, GridDataset};
use super::step_3_lstm_model_arch::GridForecaster;
use super::step_6_model_serialization::load_exported_model;
use crate::constants::{self, FEATURES_PER_STEP, TAG_EVAL_R2};
use crate::error::{GridError, GridResult};
use crate::util::feature_engineering::generate_sin_components;
use crate::util::file_utils::{column_to_decimals, read_semicolon_csv, required_column};
use crate::util::metrics::r2_score;
use crate::util::model_logger::MetricsSink;

/// Held-out evaluation and production-forecast comparison settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationConfig {
    /// External forecast/actual CSV; `None` disables the comparison
    pub comparison_file: Option<PathBuf>,
    pub forecast_column: String,
    pub actual_column: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            comparison_file: Some(PathBuf::from(constants::PRODUCTION_FORECAST_FILE)),
            forecast_column: constants::FORECAST_COLUMN.to_string(),
            actual_column: constants::ACTUAL_COLUMN.to_string(),
        }
    }
}

/// Predictions and targets gathered over the held-out set
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub r2: f64,
    pub predictions: Vec<f64>,
    pub targets: Vec<f64>,
}

pub(crate) fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> GridResult<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| GridError::TensorData(format!("{:?}", e)))
}

/// Runs an inference-mode model over the held-out windows
///
/// The model must come from `valid()` (or live on a non-autodiff backend),
/// so no gradients are tracked. Batches are not shuffled. R² is written to
/// `sink` under `R2/eval` at `step`, normally the number of training epochs.
pub fn evaluate_model<B: Backend>(
    model: &GridForecaster<B>,
    dataset: GridDataset,
    batch_size: usize,
    device: &B::Device,
    sink: &mut dyn MetricsSink,
    step: usize,
) -> GridResult<EvaluationReport> {
    if batch_size == 0 {
        return Err(GridError::InvalidConfig("batch size must be at least 1".to_string()));
    }

    let batcher = GridBatcher::<B>::new(dataset.window_size(), device.clone());
    let eval_loader = DataLoaderBuilder::new(batcher).batch_size(batch_size).build(dataset);

    let mut predictions = Vec::new();
    let mut targets = Vec::new();
    for batch in eval_loader.iter() {
        let output = model.forward(batch.window_stack);
        predictions.extend(tensor_to_vec(output)?.into_iter().map(f64::from));
        targets.extend(tensor_to_vec(batch.next_value)?.into_iter().map(f64::from));
    }

    let r2 = r2_score(&targets, &predictions)?;
    sink.add_scalar(TAG_EVAL_R2, r2, step)?;
    sink.flush()?;
    info!("Evaluation over {} windows, R²: {:.4}", targets.len(), r2);

    Ok(EvaluationReport {
        r2,
        predictions,
        targets,
    })
}

/// R² of an external forecast against the recorded actual load
///
/// Independent of any trained model. Rows where either column is missing or
/// unparseable are dropped. A missing file is logged and yields `None`.
pub fn calculate_r2_from_csv(path: &Path, config: &EvaluationConfig) -> GridResult<Option<f64>> {
    let df = match read_semicolon_csv(path) {
        Ok((df, _)) => df,
        Err(GridError::FileNotFound(missing)) => {
            warn!("Comparison file {} not found, skipping", missing.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let forecast = column_to_decimals(required_column(&df, &config.forecast_column)?)?;
    let actual = column_to_decimals(required_column(&df, &config.actual_column)?)?;

    let (actual, forecast): (Vec<f64>, Vec<f64>) = actual
        .into_iter()
        .zip(forecast)
        .filter_map(|pair| match pair {
            (Some(a), Some(f)) if a.is_finite() && f.is_finite() => Some((a, f)),
            _ => None,
        })
        .unzip();

    let r2 = r2_score(&actual, &forecast)?;
    info!(
        "Production forecast R² over {} rows of {}: {:.4}",
        actual.len(),
        path.display(),
        r2
    );
    Ok(Some(r2))
}

/// Min-max scale fitted on the readings of a single window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowScale {
    pub min: f64,
    pub max: f64,
}

impl WindowScale {
    pub fn fit(values: &[f64]) -> Self {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self { min, max }
    }

    /// Constant windows map to 0
    pub fn normalize(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 {
            (value - self.min) / range
        } else {
            0.0
        }
    }

    /// Constant windows return the minimum
    pub fn denormalize(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 {
            value * range + self.min
        } else {
            self.min
        }
    }
}

/// Serves next-reading predictions from a trained or exported model
pub struct LoadPredictor<B: Backend> {
    model: GridForecaster<B>,
    window_size: usize,
    /// Model was trained on loads scaled into [0, 1]
    normalized_inputs: bool,
    device: B::Device,
}

impl<B: Backend> LoadPredictor<B> {
    pub fn new(
        model: GridForecaster<B>,
        window_size: usize,
        normalized_inputs: bool,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            window_size,
            normalized_inputs,
            device,
        }
    }

    /// Loads an exported artifact onto `device`
    pub fn load(path: &Path, device: &B::Device) -> GridResult<Self> {
        let (model, manifest) = load_exported_model::<B>(path, device)?;
        info!(
            "Loaded {} predictor (window {}, normalized inputs: {}) from {}",
            manifest.model.variant_name(),
            manifest.window_size,
            manifest.normalized_inputs,
            path.display()
        );
        Ok(Self::new(
            model,
            manifest.window_size,
            manifest.normalized_inputs,
            device.clone(),
        ))
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn normalized_inputs(&self) -> bool {
        self.normalized_inputs
    }

    /// Predicts the reading following `readings`
    ///
    /// `readings` are `(epoch_seconds, load)` pairs in time order; exactly
    /// `window_size` of them are required. For a model trained on scaled
    /// loads, the window is min-max scaled before inference and the
    /// prediction is mapped back to the original units. Otherwise raw loads
    /// go in and the raw output comes back.
    pub fn predict_load(&self, readings: &[(i64, f64)]) -> GridResult<f64> {
        if readings.len() != self.window_size {
            return Err(GridError::InsufficientData(format!(
                "expected {} readings, got {}",
                self.window_size,
                readings.len()
            )));
        }

        let scale = if self.normalized_inputs {
            let loads: Vec<f64> = readings.iter().map(|(_, load)| *load).collect();
            Some(WindowScale::fit(&loads))
        } else {
            None
        };

        let mut features = Vec::with_capacity(self.window_size * FEATURES_PER_STEP);
        for (epoch_seconds, load) in readings {
            let (day_sin, minute_sin) = generate_sin_components(*epoch_seconds)?;
            features.push(day_sin);
            features.push(minute_sin);
            let load = scale.map_or(*load, |scale| scale.normalize(*load));
            features.push(load as f32);
        }

        let input = Tensor::<B, 3>::from_data(
            TensorData::new(features, [1, self.window_size, FEATURES_PER_STEP]),
            &self.device,
        );
        let output = tensor_to_vec(self.model.forward(input))?;
        let predicted = output
            .first()
            .copied()
            .map(f64::from)
            .ok_or_else(|| GridError::TensorData("model returned an empty output".to_string()))?;

        Ok(scale.map_or(predicted, |scale| scale.denormalize(predicted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::step_1_tensor_preparation::WindowExample;
    use crate::grid::step_3_lstm_model_arch::GridForecasterConfig;
    use crate::util::model_logger::MemorySink;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    fn small_model() -> GridForecaster<TestBackend> {
        GridForecasterConfig::attention()
            .with_hidden_size(6)
            .with_num_layers(1)
            .init::<TestBackend>(&NdArrayDevice::Cpu)
    }

    fn examples(count: usize, window: usize) -> Vec<WindowExample> {
        (0..count)
            .map(|i| WindowExample {
                date: NaiveDate::from_ymd_opt(2013, 7, 1).unwrap(),
                offset: i,
                values: vec![i as f32 / count as f32; window],
                day_sin: vec![0.5; window],
                minute_sin: vec![0.0; window],
                next_value: i as f32 / count as f32,
            })
            .collect()
    }

    #[test]
    fn test_evaluate_model_collects_every_window() {
        let device = NdArrayDevice::Cpu;
        let dataset = GridDataset::new(&examples(11, 4)).unwrap();
        let mut sink = MemorySink::default();

        let report = evaluate_model(&small_model(), dataset, 4, &device, &mut sink, 300).unwrap();

        assert_eq!(report.predictions.len(), 11);
        assert_eq!(report.targets.len(), 11);
        // Not shuffled: targets keep dataset order
        assert_eq!(report.targets[3], f64::from(3.0_f32 / 11.0));
        let recorded = sink.scalars(TAG_EVAL_R2);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, 300);
        assert!(recorded[0].1.is_finite());
    }

    #[test]
    fn test_calculate_r2_from_csv() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("forecast.csv");
        std::fs::write(
            &path,
            "TIME;FORECAST;ACTUAL\n\
             a;2,5;3\n\
             b;0;-0,5\n\
             c;;9\n\
             d;2;2\n\
             e;8;7\n",
        )
        .unwrap();

        let r2 = calculate_r2_from_csv(&path, &EvaluationConfig::default()).unwrap().unwrap();
        assert!((r2 - 0.948_608_137_044_967_9).abs() < 1e-12);
    }

    #[test]
    fn test_calculate_r2_from_missing_csv_is_skipped() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("absent.csv");
        assert_eq!(calculate_r2_from_csv(&missing, &EvaluationConfig::default()).unwrap(), None);
    }

    #[test]
    fn test_calculate_r2_missing_column() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("forecast.csv");
        std::fs::write(&path, "TIME;PREDICTED;ACTUAL\na;1;1\n").unwrap();
        assert!(matches!(
            calculate_r2_from_csv(&path, &EvaluationConfig::default()),
            Err(GridError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_window_scale() {
        let scale = WindowScale::fit(&[10.0, 30.0, 20.0]);
        assert_eq!(scale.normalize(20.0), 0.5);
        assert_eq!(scale.denormalize(0.5), 20.0);

        let flat = WindowScale::fit(&[4.0, 4.0]);
        assert_eq!(flat.normalize(4.0), 0.0);
        assert_eq!(flat.denormalize(0.3), 4.0);
    }

    #[test]
    fn test_predict_load_requires_full_window() {
        let predictor = LoadPredictor::new(small_model(), 3, true, NdArrayDevice::Cpu);
        let readings = [(1_356_998_400, 1.0), (1_356_999_300, 2.0)];
        assert!(matches!(
            predictor.predict_load(&readings),
            Err(GridError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_predict_load_constant_window_returns_minimum() {
        let predictor = LoadPredictor::new(small_model(), 3, true, NdArrayDevice::Cpu);
        let readings = [(1_356_998_400, 42.0), (1_356_999_300, 42.0), (1_357_000_200, 42.0)];
        assert_eq!(predictor.predict_load(&readings).unwrap(), 42.0);
    }

    #[test]
    fn test_predict_load_matches_manual_forward() {
        let device = NdArrayDevice::Cpu;
        let model = small_model();
        let readings = [(1_356_998_400_i64, 100.0), (1_356_999_300, 300.0), (1_357_000_200, 200.0)];

        let mut features = Vec::new();
        for ((seconds, _), normalized) in readings.iter().zip([0.0_f32, 1.0, 0.5]) {
            let (day_sin, minute_sin) = generate_sin_components(*seconds).unwrap();
            features.extend([day_sin, minute_sin, normalized]);
        }
        let input = Tensor::<TestBackend, 3>::from_data(TensorData::new(features, [1, 3, 3]), &device);
        let expected = tensor_to_vec(model.forward(input)).unwrap()[0] as f64 * 200.0 + 100.0;

        let predictor = LoadPredictor::new(model, 3, true, device);
        let predicted = predictor.predict_load(&readings).unwrap();
        assert!((predicted - expected).abs() < 1e-3);
    }

    #[test]
    fn test_predict_load_raw_inputs_skip_scaling() {
        let device = NdArrayDevice::Cpu;
        let model = small_model();
        let readings = [(1_356_998_400_i64, 1.25), (1_356_999_300, 3.5), (1_357_000_200, 2.0)];

        let mut features = Vec::new();
        for (seconds, load) in &readings {
            let (day_sin, minute_sin) = generate_sin_components(*seconds).unwrap();
            features.extend([day_sin, minute_sin, *load as f32]);
        }
        let input = Tensor::<TestBackend, 3>::from_data(TensorData::new(features, [1, 3, 3]), &device);
        let expected = f64::from(tensor_to_vec(model.forward(input)).unwrap()[0]);

        let predictor = LoadPredictor::new(model, 3, false, device);
        let predicted = predictor.predict_load(&readings).unwrap();
        assert!((predicted - expected).abs() < 1e-5);
    }

    #[test]
    fn test_predict_load_raw_constant_window_is_not_clamped() {
        let device = NdArrayDevice::Cpu;
        let model = small_model();
        let readings = [(1_356_998_400_i64, 42.0), (1_356_999_300, 42.0), (1_357_000_200, 42.0)];

        let mut features = Vec::new();
        for (seconds, load) in &readings {
            let (day_sin, minute_sin) = generate_sin_components(*seconds).unwrap();
            features.extend([day_sin, minute_sin, *load as f32]);
        }
        let input = Tensor::<TestBackend, 3>::from_data(TensorData::new(features, [1, 3, 3]), &device);
        let expected = f64::from(tensor_to_vec(model.forward(input)).unwrap()[0]);

        let predictor = LoadPredictor::new(model, 3, false, device);
        assert!((predictor.predict_load(&readings).unwrap() - expected).abs() < 1e-5);
    }
}
