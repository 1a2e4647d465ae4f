// External crates
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use chrono::NaiveDate;
use log::{info, warn};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

// Internal modules
use crate::constants::{DATE_COLUMN, DAY_SIN_COLUMN, FEATURES_PER_STEP, LOAD_COLUMN, MINUTE_SIN_COLUMN};
use crate::error::{GridError, GridResult};
use crate::util::file_utils::required_column;

/// One training pair cut from a contiguous slice of a single day
#[derive(Debug, Clone, PartialEq)]
pub struct WindowExample {
    pub date: NaiveDate,
    /// Position of the first reading inside its day
    pub offset: usize,
    pub values: Vec<f32>,
    pub day_sin: Vec<f32>,
    pub minute_sin: Vec<f32>,
    /// Reading immediately after the window
    pub next_value: f32,
}

impl WindowExample {
    pub fn window_size(&self) -> usize {
        self.values.len()
    }

    /// Per-step `(day_sin, minute_sin, load)` features, flattened row-major
    ///
    /// The day sine of the first step is replicated over the window; it is
    /// constant within a day anyway.
    pub fn combined_features(&self) -> Vec<f32> {
        let day_sin = self.day_sin.first().copied().unwrap_or_default();
        let mut combined = Vec::with_capacity(self.values.len() * FEATURES_PER_STEP);
        for (minute_sin, value) in self.minute_sin.iter().zip(&self.values) {
            combined.push(day_sin);
            combined.push(*minute_sin);
            combined.push(*value);
        }
        combined
    }
}

fn date_from_days(days_from_ce: i32) -> GridResult<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days_from_ce).ok_or_else(|| GridError::Timestamp {
        value: days_from_ce.to_string(),
        format: "days from the common era".to_string(),
    })
}

/// Creates sliding windows grouped by calendar day
///
/// For a day with `n > window_size` readings, offsets `0..n - window_size`
/// each produce one example: readings `[i, i + window_size)` as input and
/// reading `i + window_size` as the target. Days with `n <= window_size`
/// readings are skipped with a warning. An empty result is logged but not
/// an error here; [`GridDataset::new`] rejects it.
///
/// # Arguments
///
/// * `df` - Featurized table (see `add_sinusoidal_features`), sorted by timestamp
/// * `window_size` - Readings per input sequence
///
/// # Returns
///
/// Returns the examples in ascending date order, then ascending offset
pub fn create_daily_sliding_windows(
    df: &DataFrame,
    window_size: usize,
) -> GridResult<Vec<WindowExample>> {
    if window_size == 0 {
        return Err(GridError::InvalidConfig(
            "window size must be at least 1".to_string(),
        ));
    }

    let dates = required_column(df, DATE_COLUMN)?.i32()?;
    let loads = required_column(df, LOAD_COLUMN)?.f64()?;
    let day_sins = required_column(df, DAY_SIN_COLUMN)?.f64()?;
    let minute_sins = required_column(df, MINUTE_SIN_COLUMN)?.f64()?;

    // Group row indices by day; rows keep their timestamp order inside a group
    let mut daily_groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (row, date) in dates.into_iter().enumerate() {
        if let Some(date) = date {
            daily_groups.entry(date).or_default().push(row);
        }
    }

    let value_at = |column: &Float64Chunked, row: usize| column.get(row).unwrap_or(f64::NAN) as f32;

    let mut windows = Vec::new();
    for (days, rows) in &daily_groups {
        let date = date_from_days(*days)?;
        if rows.len() <= window_size {
            warn!(
                "The group for {} has too few records for the window size ({} <= {})",
                date,
                rows.len(),
                window_size
            );
            continue;
        }

        for offset in 0..rows.len() - window_size {
            let slice = &rows[offset..offset + window_size];
            windows.push(WindowExample {
                date,
                offset,
                values: slice.iter().map(|&row| value_at(loads, row)).collect(),
                day_sin: slice.iter().map(|&row| value_at(day_sins, row)).collect(),
                minute_sin: slice.iter().map(|&row| value_at(minute_sins, row)).collect(),
                next_value: value_at(loads, rows[offset + window_size]),
            });
        }
    }

    if windows.is_empty() {
        warn!("No sliding windows have been generated, check the size of your groups and the window");
    } else {
        info!(
            "Generated {} sliding windows from {} daily groups",
            windows.len(),
            daily_groups.len()
        );
    }

    Ok(windows)
}

/// A single dataset item: combined `(W x 3)` features and the target
#[derive(Debug, Clone, PartialEq)]
pub struct GridItem {
    pub window_stack: Vec<f32>,
    pub next_value: f32,
}

/// Indexed access to precomputed combined feature windows
#[derive(Debug, Clone)]
pub struct GridDataset {
    window_size: usize,
    combined_features: Vec<Vec<f32>>,
    next_values: Vec<f32>,
}

impl GridDataset {
    /// Eagerly stacks every example into its combined feature layout
    pub fn new(examples: &[WindowExample]) -> GridResult<Self> {
        let first = examples.first().ok_or(GridError::EmptyDataset)?;
        let window_size = first.window_size();
        if let Some(bad) = examples.iter().find(|example| example.window_size() != window_size) {
            return Err(GridError::InvalidConfig(format!(
                "mixed window sizes in dataset: {} and {}",
                window_size,
                bad.window_size()
            )));
        }

        Ok(Self {
            window_size,
            combined_features: examples.iter().map(WindowExample::combined_features).collect(),
            next_values: examples.iter().map(|example| example.next_value).collect(),
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn targets(&self) -> &[f32] {
        &self.next_values
    }
}

impl Dataset<GridItem> for GridDataset {
    fn get(&self, index: usize) -> Option<GridItem> {
        Some(GridItem {
            window_stack: self.combined_features.get(index)?.clone(),
            next_value: *self.next_values.get(index)?,
        })
    }

    fn len(&self) -> usize {
        self.next_values.len()
    }
}

/// Seeded random train/test split of the window examples
///
/// The test side holds `ceil(n * test_ratio)` examples. Both sides must be
/// non-empty.
pub fn split_dataset(
    examples: Vec<WindowExample>,
    test_ratio: f64,
    seed: u64,
) -> GridResult<(Vec<WindowExample>, Vec<WindowExample>)> {
    if !(0.0..1.0).contains(&test_ratio) {
        return Err(GridError::InvalidConfig(format!(
            "test split must be in [0, 1), got {}",
            test_ratio
        )));
    }

    let total = examples.len();
    let test_size = (total as f64 * test_ratio).ceil() as usize;
    if test_size == 0 || test_size >= total {
        return Err(GridError::InsufficientData(format!(
            "cannot split {} windows with test ratio {}",
            total, test_ratio
        )));
    }

    let mut indices: Vec<usize> = (0..total).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let test_indices: std::collections::HashSet<usize> = indices[..test_size].iter().copied().collect();

    let (test, train): (Vec<_>, Vec<_>) = examples
        .into_iter()
        .enumerate()
        .partition(|(index, _)| test_indices.contains(index));

    info!("Data split: train windows: {}, test windows: {}", train.len(), test.len());
    Ok((
        train.into_iter().map(|(_, example)| example).collect(),
        test.into_iter().map(|(_, example)| example).collect(),
    ))
}

/// Batch of windows placed on the compute target
#[derive(Debug, Clone)]
pub struct GridBatch<B: Backend> {
    /// Shape [batch_size, window_size, 3]
    pub window_stack: Tensor<B, 3>,
    /// Shape [batch_size]
    pub next_value: Tensor<B, 1>,
}

/// Stacks [`GridItem`]s into tensors on a fixed device
#[derive(Debug, Clone)]
pub struct GridBatcher<B: Backend> {
    window_size: usize,
    device: B::Device,
}

impl<B: Backend> GridBatcher<B> {
    pub fn new(window_size: usize, device: B::Device) -> Self {
        Self { window_size, device }
    }
}

impl<B: Backend> Batcher<B, GridItem, GridBatch<B>> for GridBatcher<B> {
    fn batch(&self, items: Vec<GridItem>, _device: &B::Device) -> GridBatch<B> {
        let batch_size = items.len();
        let mut features = Vec::with_capacity(batch_size * self.window_size * FEATURES_PER_STEP);
        let mut targets = Vec::with_capacity(batch_size);
        for item in items {
            features.extend_from_slice(&item.window_stack);
            targets.push(item.next_value);
        }

        // Items always land on the configured compute target
        let window_stack = Tensor::<B, 3>::from_data(
            TensorData::new(features, [batch_size, self.window_size, FEATURES_PER_STEP]),
            &self.device,
        );
        let next_value = Tensor::<B, 1>::from_data(TensorData::new(targets, [batch_size]), &self.device);

        GridBatch {
            window_stack,
            next_value,
        }
    }
}
