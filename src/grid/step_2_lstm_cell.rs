// External imports
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Tensor};

/// One recurrent layer, optionally running a second pass over the reversed sequence
#[derive(Module, Debug)]
pub struct LstmLayer<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    bidirectional: bool,

    // All four gates (input, forget, cell, output) share one projection
    input_weights: Linear<B>,
    hidden_weights: Linear<B>,

    reverse_input_weights: Option<Linear<B>>,
    reverse_hidden_weights: Option<Linear<B>>,
}

impl<B: Backend> LstmLayer<B> {
    pub fn new(input_size: usize, hidden_size: usize, bidirectional: bool, device: &B::Device) -> Self {
        let gate_size = 4 * hidden_size;

        let input_weights = LinearConfig::new(input_size, gate_size).init(device);
        let hidden_weights = LinearConfig::new(hidden_size, gate_size).init(device);

        let (reverse_input_weights, reverse_hidden_weights) = if bidirectional {
            (
                Some(LinearConfig::new(input_size, gate_size).init(device)),
                Some(LinearConfig::new(hidden_size, gate_size).init(device)),
            )
        } else {
            (None, None)
        };

        Self {
            input_size,
            hidden_size,
            bidirectional,
            input_weights,
            hidden_weights,
            reverse_input_weights,
            reverse_hidden_weights,
        }
    }

    /// Width of the per-step output: `hidden_size`, doubled when bidirectional
    pub fn output_size(&self) -> usize {
        if self.bidirectional {
            2 * self.hidden_size
        } else {
            self.hidden_size
        }
    }

    fn gate(gates: &Tensor<B, 3>, index: usize, batch_size: usize, hidden_size: usize) -> Tensor<B, 2> {
        gates
            .clone()
            .narrow(1, index, 1)
            .reshape([batch_size, hidden_size])
    }

    /// Runs the recurrence over the sequence, returning one hidden state per step
    ///
    /// The reverse pass reads the sequence back to front but its outputs are
    /// realigned with the input time axis.
    fn process_direction(
        &self,
        x: Tensor<B, 3>,
        input_weights: &Linear<B>,
        hidden_weights: &Linear<B>,
        reverse: bool,
    ) -> Tensor<B, 3> {
        let device = x.device();
        let [batch_size, seq_len, _] = x.dims();

        let mut h = Tensor::zeros([batch_size, self.hidden_size], &device);
        let mut c = Tensor::zeros([batch_size, self.hidden_size], &device);
        let mut hidden_states = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let time_idx = if reverse { seq_len - 1 - t } else { t };
            let x_t = x
                .clone()
                .narrow(1, time_idx, 1)
                .reshape([batch_size, self.input_size]);

            let gates = input_weights.forward(x_t) + hidden_weights.forward(h);
            let gates = gates.reshape([batch_size, 4, self.hidden_size]);

            let i = activation::sigmoid(Self::gate(&gates, 0, batch_size, self.hidden_size));
            let f = activation::sigmoid(Self::gate(&gates, 1, batch_size, self.hidden_size));
            let g = activation::tanh(Self::gate(&gates, 2, batch_size, self.hidden_size));
            let o = activation::sigmoid(Self::gate(&gates, 3, batch_size, self.hidden_size));

            c = f * c + i * g;
            h = o * activation::tanh(c.clone());
            hidden_states.push(h.clone());
        }

        if reverse {
            hidden_states.reverse();
        }
        Tensor::stack::<3>(hidden_states, 1)
    }

    /// `[batch, seq_len, input_size]` -> `[batch, seq_len, output_size()]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let forward_output = self.process_direction(x.clone(), &self.input_weights, &self.hidden_weights, false);

        match (&self.reverse_input_weights, &self.reverse_hidden_weights) {
            (Some(reverse_input), Some(reverse_hidden)) => {
                let reverse_output = self.process_direction(x, reverse_input, reverse_hidden, true);
                Tensor::cat(vec![forward_output, reverse_output], 2)
            }
            _ => forward_output,
        }
    }
}

/// Stack of recurrent layers; layer `k > 0` consumes the full output of layer `k - 1`
#[derive(Module, Debug)]
pub struct StackedLstm<B: Backend> {
    layers: Vec<LstmLayer<B>>,
    output_size: usize,
}

impl<B: Backend> StackedLstm<B> {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        bidirectional: bool,
        device: &B::Device,
    ) -> Self {
        let directions = if bidirectional { 2 } else { 1 };
        let layers = (0..num_layers.max(1))
            .map(|k| {
                let layer_input = if k == 0 { input_size } else { hidden_size * directions };
                LstmLayer::new(layer_input, hidden_size, bidirectional, device)
            })
            .collect();

        Self {
            layers,
            output_size: hidden_size * directions,
        }
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.layers.iter().fold(x, |sequence, layer| layer.forward(sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_layer_output_shapes() {
        let device = NdArrayDevice::Cpu;
        let input = Tensor::<TestBackend, 3>::ones([2, 5, 3], &device);

        let layer = LstmLayer::<TestBackend>::new(3, 8, false, &device);
        assert_eq!(layer.forward(input.clone()).dims(), [2, 5, 8]);

        let layer = LstmLayer::<TestBackend>::new(3, 8, true, &device);
        assert_eq!(layer.output_size(), 16);
        assert_eq!(layer.forward(input).dims(), [2, 5, 16]);
    }

    #[test]
    fn test_stacked_output_shapes() {
        let device = NdArrayDevice::Cpu;
        let input = Tensor::<TestBackend, 3>::ones([4, 7, 3], &device);

        let encoder = StackedLstm::<TestBackend>::new(3, 6, 4, false, &device);
        assert_eq!(encoder.num_layers(), 4);
        assert_eq!(encoder.forward(input.clone()).dims(), [4, 7, 6]);

        let encoder = StackedLstm::<TestBackend>::new(3, 6, 2, true, &device);
        assert_eq!(encoder.output_size(), 12);
        assert_eq!(encoder.forward(input).dims(), [4, 7, 12]);
    }

    #[test]
    fn test_hidden_states_are_bounded() {
        let device = NdArrayDevice::Cpu;
        let input = Tensor::<TestBackend, 3>::ones([1, 4, 3], &device).mul_scalar(50.0);
        let layer = LstmLayer::<TestBackend>::new(3, 4, true, &device);

        let values = layer.forward(input).into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }
}
