// External imports
use burn::data::dataloader::DataLoaderBuilder;
use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::cast::ToElement;
use burn::tensor::Tensor;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Instant;

// Internal imports
use super::step_1_tensor_preparation::{GridBatcher, GridDataset};
use super::step_3_lstm_model_arch::GridForecaster;
use crate::constants::{self, TAG_TRAIN_LOSS, TAG_TRAIN_R2};
use crate::error::{GridError, GridResult};
use crate::util::metrics::r2_score_tensor;
use crate::util::model_logger::MetricsSink;

/// Configuration for training the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub test_split: f64,
    pub split_seed: u64,
    /// Seed of the per-epoch shuffle of training batches
    pub shuffle_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: constants::LEARNING_RATE,
            batch_size: constants::BATCH_SIZE,
            epochs: constants::EPOCHS,
            test_split: constants::TEST_SPLIT_RATIO,
            split_seed: constants::SPLIT_SEED,
            shuffle_seed: constants::SPLIT_SEED,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> GridResult<()> {
        if self.batch_size == 0 {
            return Err(GridError::InvalidConfig("batch size must be at least 1".to_string()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(GridError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Metrics of one pass over the training set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    #[serde(with = "crate::util::json_float")]
    pub loss: f64,
    /// Not guarded: a constant-target epoch gives a non-finite value
    #[serde(with = "crate::util::json_float")]
    pub r2: f64,
}

/// Trains the forecaster with Adam on mean squared error
///
/// Every epoch visits the whole (shuffled) training set once, one optimizer
/// step per batch. Average loss and R² over all predictions of the epoch are
/// written to `sink` under `Loss/train` and `R2/train`, with the zero-based
/// epoch as step.
///
/// # Arguments
///
/// * `model` - Freshly initialized (or partially trained) model
/// * `dataset` - Training windows
/// * `config` - Optimizer and batching parameters
/// * `device` - Compute target every batch is placed on
/// * `sink` - Destination of the per-epoch scalars
///
/// # Returns
///
/// Returns the trained model and one report per epoch
pub fn train_model<B: AutodiffBackend>(
    mut model: GridForecaster<B>,
    dataset: GridDataset,
    config: &TrainingConfig,
    device: &B::Device,
    sink: &mut dyn MetricsSink,
) -> GridResult<(GridForecaster<B>, Vec<EpochReport>)> {
    config.validate()?;
    let num_windows = burn::data::dataset::Dataset::len(&dataset);
    info!(
        "Starting model training: {} windows, {} epochs, batch size {}",
        num_windows, config.epochs, config.batch_size
    );

    let batcher = GridBatcher::<B>::new(dataset.window_size(), device.clone());
    let train_loader = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .shuffle(config.shuffle_seed)
        .build(dataset);

    let mut optimizer = AdamConfig::new().init();
    let loss_fn = MseLoss::new();
    let mut reports = Vec::with_capacity(config.epochs);
    let start = Instant::now();

    for epoch in 0..config.epochs {
        let mut epoch_loss = 0.0;
        let mut num_batches = 0;
        let mut predictions = Vec::new();
        let mut targets = Vec::new();

        for batch in train_loader.iter() {
            let [batch_size, _, _] = batch.window_stack.dims();
            let output = model.forward(batch.window_stack).reshape([batch_size]);

            let loss = loss_fn.forward(output.clone(), batch.next_value.clone(), Reduction::Mean);
            epoch_loss += loss.clone().into_scalar().to_f64();
            num_batches += 1;

            predictions.push(output.inner());
            targets.push(batch.next_value.inner());

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);
        }

        if num_batches == 0 {
            return Err(GridError::EmptyDataset);
        }

        let avg_loss = epoch_loss / num_batches as f64;
        let r2 = r2_score_tensor(Tensor::cat(targets, 0), Tensor::cat(predictions, 0));

        sink.add_scalar(TAG_TRAIN_LOSS, avg_loss, epoch)?;
        sink.add_scalar(TAG_TRAIN_R2, r2, epoch)?;
        info!("Epoch {}, Loss: {:.6}, R²: {:.4}", epoch, avg_loss, r2);
        debug!("Epoch {} took {} batches", epoch, num_batches);

        reports.push(EpochReport {
            epoch,
            loss: avg_loss,
            r2,
        });
    }

    sink.flush()?;
    info!("Training finished in {:.2?}", start.elapsed());
    Ok((model, reports))
}

/// Inference-mode copy of a trained model
pub fn to_inference<B: AutodiffBackend>(model: &GridForecaster<B>) -> GridForecaster<B::InnerBackend> {
    model.valid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::step_1_tensor_preparation::WindowExample;
    use crate::grid::step_3_lstm_model_arch::GridForecasterConfig;
    use crate::util::model_logger::{MemorySink, RunLogger};
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use chrono::NaiveDate;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn ramp_examples(count: usize, window: usize) -> Vec<WindowExample> {
        (0..count)
            .map(|i| {
                let base = (i % 10) as f32 / 10.0;
                WindowExample {
                    date: NaiveDate::from_ymd_opt(2012, 1, 1).unwrap(),
                    offset: i,
                    values: (0..window).map(|s| base + s as f32 * 0.01).collect(),
                    day_sin: vec![0.0; window],
                    minute_sin: (0..window).map(|s| (s as f32 / window as f32).sin()).collect(),
                    next_value: base + window as f32 * 0.01,
                }
            })
            .collect()
    }

    fn small_config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            learning_rate: 0.01,
            batch_size: 8,
            epochs,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_train_model_reports_every_epoch() {
        let device = NdArrayDevice::Cpu;
        let model = GridForecasterConfig::default()
            .with_hidden_size(8)
            .with_num_layers(1)
            .init::<TestBackend>(&device);
        let dataset = GridDataset::new(&ramp_examples(20, 5)).unwrap();
        let mut sink = MemorySink::default();

        let (_, reports) = train_model(model, dataset, &small_config(3), &device, &mut sink).unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.loss.is_finite()));
        let steps: Vec<usize> = sink.scalars(TAG_TRAIN_LOSS).iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(sink.scalars(TAG_TRAIN_R2).len(), 3);
    }

    #[test]
    fn test_training_reduces_loss() {
        let device = NdArrayDevice::Cpu;
        let model = GridForecasterConfig::default()
            .with_hidden_size(8)
            .with_num_layers(1)
            .init::<TestBackend>(&device);
        let dataset = GridDataset::new(&ramp_examples(32, 4)).unwrap();
        let mut sink = MemorySink::default();

        let (_, reports) = train_model(model, dataset, &small_config(25), &device, &mut sink).unwrap();

        let first = reports.first().unwrap().loss;
        let last = reports.last().unwrap().loss;
        assert!(last < first, "loss did not decrease: {} -> {}", first, last);
    }

    #[test]
    fn test_constant_targets_give_non_finite_r2() {
        let device = NdArrayDevice::Cpu;
        let model = GridForecasterConfig::default()
            .with_hidden_size(4)
            .with_num_layers(1)
            .init::<TestBackend>(&device);
        let mut examples = ramp_examples(6, 3);
        for example in &mut examples {
            example.next_value = 0.5;
        }
        let dataset = GridDataset::new(&examples).unwrap();
        let mut sink = MemorySink::default();

        let (_, reports) = train_model(model, dataset, &small_config(1), &device, &mut sink).unwrap();
        assert!(!reports[0].r2.is_finite());
    }

    #[test]
    fn test_non_finite_r2_survives_run_log() {
        let device = NdArrayDevice::Cpu;
        let model = GridForecasterConfig::default()
            .with_hidden_size(4)
            .with_num_layers(1)
            .init::<TestBackend>(&device);
        let mut examples = ramp_examples(6, 3);
        for example in &mut examples {
            example.next_value = 0.5;
        }
        let dataset = GridDataset::new(&examples).unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::open(temp_dir.path().to_path_buf()).unwrap();

        let (_, reports) = train_model(model, dataset, &small_config(1), &device, &mut logger).unwrap();
        logger.flush().unwrap();

        let events = RunLogger::read_events(temp_dir.path()).unwrap();
        let r2: Vec<f64> = events
            .iter()
            .filter(|event| event.tag == TAG_TRAIN_R2)
            .map(|event| event.value)
            .collect();
        assert_eq!(r2.len(), 1);
        assert!(!r2[0].is_finite());
        assert_eq!(r2[0].is_nan(), reports[0].r2.is_nan());

        let json = serde_json::to_string(&reports[0]).unwrap();
        let back: EpochReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.r2.is_nan(), reports[0].r2.is_nan());
    }

    #[test]
    fn test_invalid_training_config() {
        let config = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(TrainingConfig::default().validate().is_ok());
    }
}
