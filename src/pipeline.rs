// External crates
use anyhow::{Context, Result};
use burn::tensor::backend::{AutodiffBackend, Backend};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

// Local modules
use crate::config::ExperimentConfig;
use crate::constants::{TAG_PRODUCTION_R2, TIMESTAMP_COLUMN, LOAD_COLUMN};
use crate::grid::step_1_tensor_preparation::{
    create_daily_sliding_windows, split_dataset, GridDataset, WindowExample,
};
use crate::grid::step_4_train_model::{to_inference, train_model, EpochReport};
use crate::grid::step_5_prediction::{calculate_r2_from_csv, evaluate_model, LoadPredictor};
use crate::grid::step_6_model_serialization::{export_model, ExportManifest};
use crate::util::feature_engineering::{add_sinusoidal_features, normalize_load_per_year};
use crate::util::file_utils::required_column;
use crate::util::model_logger::{MetricsSink, ModelExperiment, RunLogger};
use crate::util::pre_processor::{load_and_preprocess, LoadReport};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Window examples cut from one raw file
#[derive(Debug, Clone)]
pub struct PreparedWindows {
    pub examples: Vec<WindowExample>,
    pub report: LoadReport,
}

/// Outcome of a full train/evaluate/export run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub epochs: Vec<EpochReport>,
    pub eval_r2: f64,
    pub production_r2: Option<f64>,
    pub manifest: ExportManifest,
    pub training_seconds: f64,
}

/// Raw file to window examples: load, optional per-year scaling, features, windows
pub fn prepare_windows(config: &ExperimentConfig) -> Result<PreparedWindows> {
    let (df, report) = load_and_preprocess(&config.data_file, &config.loader)
        .with_context(|| format!("Failed to preprocess {}", config.data_file.display()))?;

    let df = if config.loader.normalize_per_year {
        normalize_load_per_year(&df).context("Failed to normalize load per year")?
    } else {
        df
    };

    let df = add_sinusoidal_features(&df).context("Failed to add sinusoidal features")?;
    let examples = create_daily_sliding_windows(&df, config.window.window_size)
        .context("Failed to create sliding windows")?;

    Ok(PreparedWindows { examples, report })
}

/// Trains, evaluates and exports one model, logging into a fresh run directory
pub fn run_experiment<B: AutodiffBackend>(config: &ExperimentConfig, device: &B::Device) -> Result<RunSummary> {
    config.validate().context("Invalid configuration")?;

    let prepared = prepare_windows(config)?;
    let (train, test) = split_dataset(
        prepared.examples,
        config.training.test_split,
        config.training.split_seed,
    )
    .context("Failed to split windows into train and test sets")?;
    let (train_windows, eval_windows) = (train.len(), test.len());
    let train_dataset = GridDataset::new(&train).context("Failed to build training dataset")?;
    let eval_dataset = GridDataset::new(&test).context("Failed to build evaluation dataset")?;

    let mut logger = RunLogger::create(&config.runs_dir).context("Failed to create run directory")?;
    config
        .save(&logger.dir().join("config.json"))
        .context("Failed to save run configuration")?;
    info!("Logging run to {}", logger.dir().display());

    let mut experiment = ModelExperiment::new(
        config.model.variant_name(),
        config.window.window_size,
        config.model.hidden_size,
        config.model.num_layers,
        config.model.bidirectional,
        config.model.attention,
        config.training.batch_size,
        config.training.learning_rate,
        config.training.epochs,
    );
    experiment.set_dataset_sizes(train_windows, eval_windows);
    experiment.add_note(&format!(
        "rows kept {} of {}, zero columns dropped: {:?}",
        prepared.report.rows_kept, prepared.report.rows_read, prepared.report.zero_columns_dropped
    ));

    let model = config.model.init::<B>(device);
    let start = Instant::now();
    let (model, epochs) = train_model(model, train_dataset, &config.training, device, &mut logger)
        .context("Training failed")?;
    let training_seconds = start.elapsed().as_secs_f64();
    experiment.set_training_time(training_seconds);
    if let Some(last) = epochs.last() {
        experiment.set_train_metrics(last.loss, last.r2);
    }

    let inference = to_inference(&model);
    let evaluation = evaluate_model(
        &inference,
        eval_dataset,
        config.training.batch_size,
        device,
        &mut logger,
        config.training.epochs,
    )
    .context("Evaluation failed")?;
    experiment.set_eval_r2(evaluation.r2);

    let production_r2 = match &config.evaluation.comparison_file {
        Some(path) => calculate_r2_from_csv(path, &config.evaluation)
            .with_context(|| format!("Failed to compare forecasts in {}", path.display()))?,
        None => None,
    };
    if let Some(r2) = production_r2 {
        logger.add_scalar(TAG_PRODUCTION_R2, r2, config.training.epochs)?;
        experiment.set_production_r2(r2);
    }

    let manifest = export_model(
        &inference,
        &config.model,
        config.window.window_size,
        config.loader.normalize_per_year,
        &config.export,
        device,
    )
    .context("Failed to export model")?;

    logger.flush()?;
    experiment
        .save(logger.dir())
        .context("Failed to save experiment summary")?;

    Ok(RunSummary {
        run_dir: logger.dir().to_path_buf(),
        epochs,
        eval_r2: evaluation.r2,
        production_r2,
        manifest,
        training_seconds,
    })
}

/// Predicts the reading after the last window of `recent_file` with the exported model
pub fn predict_from_csv<B: Backend>(
    config: &ExperimentConfig,
    recent_file: &Path,
    device: &B::Device,
) -> Result<f64> {
    let predictor = LoadPredictor::<B>::load(&config.export.path, device)
        .with_context(|| format!("Failed to load exported model from {}", config.export.path.display()))?;

    let (df, _) = load_and_preprocess(recent_file, &config.loader)
        .with_context(|| format!("Failed to preprocess {}", recent_file.display()))?;
    let timestamps = required_column(&df, TIMESTAMP_COLUMN)?.i64()?;
    let loads = required_column(&df, LOAD_COLUMN)?.f64()?;

    let readings: Vec<(i64, f64)> = timestamps
        .into_iter()
        .zip(loads.into_iter())
        .filter_map(|(nanos, load)| Some((nanos?.div_euclid(NANOS_PER_SECOND), load?)))
        .collect();
    let window_size = predictor.window_size();
    if readings.len() > window_size {
        warn!(
            "Using the last {} of {} readings from {}",
            window_size,
            readings.len(),
            recent_file.display()
        );
    }
    let recent = &readings[readings.len().saturating_sub(window_size)..];

    let prediction = predictor
        .predict_load(recent)
        .context("Prediction failed")?;
    info!("Predicted next load: {:.4}", prediction);
    Ok(prediction)
}
