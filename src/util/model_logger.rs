use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use chrono::Local;
use serde::{Serialize, Deserialize};

use crate::error::{GridError, GridResult};

/// Destination for scalar training metrics keyed by tag and step
pub trait MetricsSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> GridResult<()>;

    fn flush(&mut self) -> GridResult<()> {
        Ok(())
    }
}

/// One scalar observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub step: usize,
    #[serde(with = "crate::util::json_float")]
    pub value: f64,
    pub wall_time: String,
}

impl ScalarEvent {
    fn new(tag: &str, value: f64, step: usize) -> Self {
        Self {
            tag: tag.to_string(),
            step,
            value,
            wall_time: Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        }
    }
}

/// In-memory sink, mostly useful for tests and notebooks
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<ScalarEvent>,
}

impl MemorySink {
    /// `(step, value)` pairs recorded under `tag`, in insertion order
    pub fn scalars(&self, tag: &str) -> Vec<(usize, f64)> {
        self.events
            .iter()
            .filter(|event| event.tag == tag)
            .map(|event| (event.step, event.value))
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> GridResult<()> {
        self.events.push(ScalarEvent::new(tag, value, step));
        Ok(())
    }
}

/// Append-only JSON-lines scalar log living in a timestamped run directory
pub struct RunLogger {
    dir: PathBuf,
    writer: BufWriter<File>,
}

impl RunLogger {
    pub const SCALARS_FILE: &'static str = "scalars.jsonl";

    /// Creates `<runs_dir>/<YYYYmmdd_HHMMSS>/` and opens its scalar log
    pub fn create(runs_dir: &Path) -> GridResult<Self> {
        let dir = runs_dir.join(Local::now().format("%Y%m%d_%H%M%S").to_string());
        Self::open(dir)
    }

    /// Opens (or continues) the scalar log inside `dir`
    pub fn open(dir: PathBuf) -> GridResult<Self> {
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(Self::SCALARS_FILE))?;
        Ok(Self {
            dir,
            writer: BufWriter::new(file),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads every event back from a run directory
    pub fn read_events(dir: &Path) -> GridResult<Vec<ScalarEvent>> {
        let contents = fs::read_to_string(dir.join(Self::SCALARS_FILE))?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(GridError::from))
            .collect()
    }
}

impl MetricsSink for RunLogger {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> GridResult<()> {
        let line = serde_json::to_string(&ScalarEvent::new(tag, value, step))?;
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    fn flush(&mut self) -> GridResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Summary of one training run, saved next to its scalar log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelExperiment {
    pub timestamp: String,
    pub model_type: String,
    pub window_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub bidirectional: bool,
    pub attention: bool,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub train_windows: usize,
    pub eval_windows: usize,
    #[serde(default, with = "crate::util::json_float::option")]
    pub train_loss: Option<f64>,
    #[serde(default, with = "crate::util::json_float::option")]
    pub train_r2: Option<f64>,
    #[serde(default, with = "crate::util::json_float::option")]
    pub eval_r2: Option<f64>,
    #[serde(default, with = "crate::util::json_float::option")]
    pub production_r2: Option<f64>,
    #[serde(default, with = "crate::util::json_float::option")]
    pub training_time_seconds: Option<f64>,
    pub notes: String,
}

impl ModelExperiment {
    pub const FILE_NAME: &'static str = "experiment.json";

    pub fn new(
        model_type: &str,
        window_size: usize,
        hidden_size: usize,
        num_layers: usize,
        bidirectional: bool,
        attention: bool,
        batch_size: usize,
        learning_rate: f64,
        epochs: usize,
    ) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            model_type: model_type.to_string(),
            window_size,
            hidden_size,
            num_layers,
            bidirectional,
            attention,
            batch_size,
            learning_rate,
            epochs,
            train_windows: 0,
            eval_windows: 0,
            train_loss: None,
            train_r2: None,
            eval_r2: None,
            production_r2: None,
            training_time_seconds: None,
            notes: "".to_string(),
        }
    }

    pub fn set_dataset_sizes(&mut self, train_windows: usize, eval_windows: usize) {
        self.train_windows = train_windows;
        self.eval_windows = eval_windows;
    }

    pub fn set_train_metrics(&mut self, loss: f64, r2: f64) {
        self.train_loss = Some(loss);
        self.train_r2 = Some(r2);
    }

    pub fn set_eval_r2(&mut self, r2: f64) {
        self.eval_r2 = Some(r2);
    }

    pub fn set_production_r2(&mut self, r2: f64) {
        self.production_r2 = Some(r2);
    }

    pub fn set_training_time(&mut self, seconds: f64) {
        self.training_time_seconds = Some(seconds);
    }

    pub fn add_note(&mut self, note: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }

    pub fn save(&self, experiment_dir: &Path) -> GridResult<PathBuf> {
        fs::create_dir_all(experiment_dir)?;

        let file_path = experiment_dir.join(Self::FILE_NAME);
        let json = serde_json::to_string_pretty(&self)?;
        let mut file = File::create(&file_path)?;
        file.write_all(json.as_bytes())?;

        Ok(file_path)
    }
}
