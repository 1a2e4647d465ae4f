// External crates
use anyhow::{anyhow, bail, Context, Result};
use burn::tensor::backend::{AutodiffBackend, Backend};
use log::info;
use std::env;
use std::path::{Path, PathBuf};

// Local modules
use electrical_grid_model::config::{ComputeTarget, ExperimentConfig};
use electrical_grid_model::pipeline::{predict_from_csv, run_experiment};

#[cfg(not(feature = "tch"))]
mod backend {
    use anyhow::{bail, Result};
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use electrical_grid_model::config::ComputeTarget;

    pub type TrainBackend = Autodiff<NdArray<f32>>;

    pub fn device(target: ComputeTarget) -> Result<NdArrayDevice> {
        match target {
            ComputeTarget::Cpu => Ok(NdArrayDevice::Cpu),
            other => bail!("compute target '{}' requires building with the `tch` feature", other),
        }
    }
}

#[cfg(feature = "tch")]
mod backend {
    use anyhow::Result;
    use burn::backend::libtorch::LibTorchDevice;
    use burn::backend::LibTorch;
    use burn_autodiff::Autodiff;
    use electrical_grid_model::config::ComputeTarget;

    pub type TrainBackend = Autodiff<LibTorch<f32>>;

    pub fn device(target: ComputeTarget) -> Result<LibTorchDevice> {
        Ok(match target {
            ComputeTarget::Cpu => LibTorchDevice::Cpu,
            ComputeTarget::Cuda(index) => LibTorchDevice::Cuda(index),
            ComputeTarget::Mps => LibTorchDevice::Mps,
        })
    }
}

type InferenceBackend = <backend::TrainBackend as AutodiffBackend>::InnerBackend;

fn setup_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

fn load_config(path: Option<&String>) -> Result<ExperimentConfig> {
    match path {
        Some(path) => ExperimentConfig::load(Path::new(path))
            .with_context(|| format!("Failed to load configuration from {}", path)),
        None => Ok(ExperimentConfig::default()),
    }
}

fn device_for(config: &ExperimentConfig) -> Result<<backend::TrainBackend as Backend>::Device> {
    let target: ComputeTarget = config.compute_target()?;
    info!("Using compute target: {}", target);
    backend::device(target)
}

fn train(config: &ExperimentConfig) -> Result<()> {
    let device = device_for(config)?;
    let summary = run_experiment::<backend::TrainBackend>(config, &device)?;

    info!(
        "Training and evaluation completed in {:.1}s, eval R²: {:.4}",
        summary.training_seconds, summary.eval_r2
    );
    if let Some(r2) = summary.production_r2 {
        info!("Production forecast R²: {:.4}", r2);
    }
    info!(
        "Model exported to {} (run logged in {})",
        config.export.path.display(),
        summary.run_dir.display()
    );
    Ok(())
}

fn predict(config: &ExperimentConfig, recent_file: &Path) -> Result<()> {
    let device = device_for(config)?;
    let prediction = predict_from_csv::<InferenceBackend>(config, recent_file, &device)?;
    println!("{:.4}", prediction);
    Ok(())
}

fn main() -> Result<()> {
    setup_logging();

    // Usage: electrical_grid_model [train [config.json] | predict <recent.csv> [config.json]]
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("train");

    match command {
        "train" => {
            let config = load_config(args.get(2))?;
            train(&config)
        }
        "predict" => {
            let recent_file = args
                .get(2)
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("usage: predict <recent.csv> [config.json]"))?;
            let config = load_config(args.get(3))?;
            predict(&config, &recent_file)
        }
        other => bail!("unknown command '{}', expected 'train' or 'predict'", other),
    }
}
