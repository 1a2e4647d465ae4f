// External imports
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

// Internal imports
use super::step_2_lstm_cell::StackedLstm;
use crate::constants::{FEATURES_PER_STEP, HIDDEN_SIZE, NUM_LAYERS, OUTPUT_SIZE};
use crate::error::{GridError, GridResult};

/// Hyperparameters of the forecaster
///
/// `attention = false` pools the encoder output by its mean over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridForecasterConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub output_size: usize,
    pub attention: bool,
    pub bidirectional: bool,
}

impl Default for GridForecasterConfig {
    fn default() -> Self {
        Self::mean_pool()
    }
}

impl GridForecasterConfig {
    /// Unidirectional encoder, mean over time
    pub fn mean_pool() -> Self {
        Self {
            input_size: FEATURES_PER_STEP,
            hidden_size: HIDDEN_SIZE,
            num_layers: NUM_LAYERS,
            output_size: OUTPUT_SIZE,
            attention: false,
            bidirectional: false,
        }
    }

    /// Unidirectional encoder, learned attention over time
    pub fn attention() -> Self {
        Self {
            attention: true,
            ..Self::mean_pool()
        }
    }

    /// Bidirectional encoder (double width), learned attention over time
    pub fn bidirectional_attention() -> Self {
        Self {
            attention: true,
            bidirectional: true,
            ..Self::mean_pool()
        }
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Short name used in run summaries
    pub fn variant_name(&self) -> &'static str {
        match (self.bidirectional, self.attention) {
            (false, false) => "lstm_mean",
            (false, true) => "lstm_attention",
            (true, false) => "bilstm_mean",
            (true, true) => "bilstm_attention",
        }
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.input_size == 0 || self.hidden_size == 0 || self.num_layers == 0 || self.output_size == 0 {
            return Err(GridError::InvalidConfig(format!(
                "model dimensions must be positive: {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GridForecaster<B> {
        let encoder = StackedLstm::new(
            self.input_size,
            self.hidden_size,
            self.num_layers,
            self.bidirectional,
            device,
        );
        let encoded_size = encoder.output_size();
        let attention = self
            .attention
            .then(|| TemporalAttention::new(encoded_size, device));
        let output = LinearConfig::new(encoded_size, self.output_size).init(device);

        GridForecaster {
            input_size: self.input_size,
            encoder,
            attention,
            output,
        }
    }
}

/// Scores each time step with a linear projection and softmax-normalizes over time
#[derive(Module, Debug)]
pub struct TemporalAttention<B: Backend> {
    score: Linear<B>,
}

impl<B: Backend> TemporalAttention<B> {
    pub fn new(hidden_size: usize, device: &B::Device) -> Self {
        Self {
            score: LinearConfig::new(hidden_size, 1).init(device),
        }
    }

    /// Attention weights, shape `[batch, seq_len]`; each row sums to 1
    pub fn weights(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, seq_len, _] = x.dims();
        let scores = self.score.forward(x).reshape([batch_size, seq_len]);
        activation::softmax(scores, 1)
    }

    /// Weighted sum of the hidden states over time, `[batch, hidden]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, seq_len, hidden_size] = x.dims();
        let weights = self.weights(x.clone()).reshape([batch_size, seq_len, 1]);
        (x * weights).sum_dim(1).reshape([batch_size, hidden_size])
    }
}

/// Stacked recurrent encoder followed by temporal pooling and a linear head
#[derive(Module, Debug)]
pub struct GridForecaster<B: Backend> {
    input_size: usize,
    encoder: StackedLstm<B>,
    attention: Option<TemporalAttention<B>>,
    output: Linear<B>,
}

impl<B: Backend> GridForecaster<B> {
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn attention(&self) -> Option<&TemporalAttention<B>> {
        self.attention.as_ref()
    }

    /// `[batch, window, input_size]` -> `[batch, output_size]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let encoded = self.encoder.forward(x);
        let [batch_size, _, encoded_size] = encoded.dims();

        let pooled = match &self.attention {
            Some(attention) => attention.forward(encoded),
            None => encoded.mean_dim(1).reshape([batch_size, encoded_size]),
        };

        self.output.forward(pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn small(config: GridForecasterConfig) -> GridForecaster<TestBackend> {
        config
            .with_hidden_size(8)
            .with_num_layers(2)
            .init::<TestBackend>(&NdArrayDevice::Cpu)
    }

    #[test]
    fn test_output_shape_is_batch_by_one() {
        let device = NdArrayDevice::Cpu;
        let variants = [
            GridForecasterConfig::mean_pool(),
            GridForecasterConfig::attention(),
            GridForecasterConfig::bidirectional_attention(),
        ];
        for config in variants {
            let model = small(config);
            for (batch_size, window) in [(1, 19), (5, 19), (3, 4), (2, 30)] {
                let input = Tensor::<TestBackend, 3>::random(
                    [batch_size, window, 3],
                    burn::tensor::Distribution::Default,
                    &device,
                );
                assert_eq!(model.forward(input).dims(), [batch_size, 1]);
            }
        }
    }

    #[test]
    fn test_default_model_uses_driving_configuration() {
        let config = GridForecasterConfig::default();
        assert_eq!(config.input_size, 3);
        assert_eq!(config.hidden_size, 64);
        assert_eq!(config.num_layers, 4);
        assert!(!config.attention);
        assert!(!config.bidirectional);
        assert_eq!(config.variant_name(), "lstm_mean");

        let model = config.init::<TestBackend>(&NdArrayDevice::Cpu);
        assert!(model.attention().is_none());
        let input = Tensor::<TestBackend, 3>::zeros([2, 19, 3], &NdArrayDevice::Cpu);
        assert_eq!(model.forward(input).dims(), [2, 1]);
    }

    #[test]
    fn test_attention_weights_sum_to_one_over_time() {
        let device = NdArrayDevice::Cpu;
        let attention = TemporalAttention::<TestBackend>::new(6, &device);
        let hidden = Tensor::<TestBackend, 3>::random([4, 9, 6], burn::tensor::Distribution::Default, &device);

        let weights = attention.weights(hidden.clone());
        assert_eq!(weights.dims(), [4, 9]);
        let sums = weights.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5);
        }
        assert_eq!(attention.forward(hidden).dims(), [4, 6]);
    }

    #[test]
    fn test_attention_over_identical_steps_returns_that_step() {
        let device = NdArrayDevice::Cpu;
        let attention = TemporalAttention::<TestBackend>::new(2, &device);
        let step = Tensor::<TestBackend, 3>::from_floats([[[0.5, -1.5]]], &device);
        let hidden = Tensor::cat(vec![step.clone(), step.clone(), step], 1);

        let context = attention.forward(hidden).into_data().to_vec::<f32>().unwrap();
        assert!((context[0] - 0.5).abs() < 1e-5);
        assert!((context[1] + 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_validate_rejects_zero_dimensions() {
        assert!(GridForecasterConfig::default().validate().is_ok());
        assert!(GridForecasterConfig::default().with_num_layers(0).validate().is_err());
        assert!(GridForecasterConfig::default().with_hidden_size(0).validate().is_err());
    }

    #[test]
    fn test_config_json_round_trip_with_defaults() {
        let config: GridForecasterConfig = serde_json::from_str(r#"{"attention": true}"#).unwrap();
        assert_eq!(config, GridForecasterConfig::attention());
        assert!(serde_json::from_str::<GridForecasterConfig>(r#"{"dropout": 0.1}"#).is_err());
    }
}
