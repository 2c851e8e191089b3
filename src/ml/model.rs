use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::activation::relu,
};

use crate::ml::amp::Autocast;
use crate::ml::params::{linear_params, HasParams, ParamRef};

// ─── LinearStack ──────────────────────────────────────────────────────────────
// (num_layers - 1) x [Linear(in, in) → ReLU] → Linear(in, out)

#[derive(Config, Debug)]
pub struct LinearStackConfig {
    pub in_size:    usize,
    pub out_size:   usize,
    pub num_layers: usize,
}

impl LinearStackConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinearStack<B> {
        let hidden = self.num_layers.max(1) - 1;
        let mut layers: Vec<Linear<B>> = (0..hidden)
            .map(|_| LinearConfig::new(self.in_size, self.in_size).init(device))
            .collect();
        layers.push(LinearConfig::new(self.in_size, self.out_size).init(device));
        LinearStack { layers }
    }
}

#[derive(Module, Debug)]
pub struct LinearStack<B: Backend> {
    pub layers: Vec<Linear<B>>,
}

impl<B: Backend> LinearStack<B> {
    /// input: [batch, in_size] → [batch, out_size]
    pub fn forward(&self, input: Tensor<B, 2>, autocast: &Autocast) -> Tensor<B, 2> {
        let last = self.layers.len() - 1;
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            // Matmuls run in the autocast precision
            x = autocast.cast(layer.forward(x));
            if i < last {
                x = relu(x);
            }
        }
        x
    }
}

impl<B: Backend> HasParams for LinearStack<B> {
    fn float_params(&self) -> Vec<ParamRef> {
        self.layers.iter().flat_map(linear_params).collect()
    }
}

// ─── ExampleModel ─────────────────────────────────────────────────────────────
// flatten → Linear(input_size, num_classes) → ReLU

#[derive(Config, Debug)]
pub struct ExampleModelConfig {
    #[config(default = 784)]
    pub input_size:  usize,
    #[config(default = 10)]
    pub num_classes: usize,
}

impl ExampleModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ExampleModel<B> {
        ExampleModel {
            net1: LinearConfig::new(self.input_size, self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct ExampleModel<B: Backend> {
    pub net1: Linear<B>,
}

impl<B: Backend> ExampleModel<B> {
    /// images: [batch, channels, height, width] → [batch, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>, autocast: &Autocast) -> Tensor<B, 2> {
        let x = images.flatten::<2>(1, 3);
        let x = autocast.cast(self.net1.forward(x));
        relu(x)
    }
}

impl<B: Backend> HasParams for ExampleModel<B> {
    fn float_params(&self) -> Vec<ParamRef> {
        linear_params(&self.net1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_linear_stack_shapes() {
        let device = Default::default();
        let model  = LinearStackConfig::new(8, 3, 4).init::<TestBackend>(&device);
        assert_eq!(model.layers.len(), 4);
        assert_eq!(model.float_params().len(), 8);

        let out = model.forward(Tensor::zeros([5, 8], &device), &Autocast::disabled());
        assert_eq!(out.dims(), [5, 3]);
    }

    #[test]
    fn test_single_layer_stack() {
        let model = LinearStackConfig::new(4, 2, 1).init::<TestBackend>(&Default::default());
        assert_eq!(model.layers.len(), 1);
    }

    #[test]
    fn test_example_model_is_non_negative() {
        let device = Default::default();
        let model  = ExampleModelConfig::new().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::random(
            [2, 1, 28, 28],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let out = model.forward(images, &Autocast::disabled());
        assert_eq!(out.dims(), [2, 10]);
        let min: f32 = out.min().into_scalar().elem();
        assert!(min >= 0.0);
    }
}
