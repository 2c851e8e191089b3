// ============================================================
// Layer 5 — Parameter & Gradient Plumbing
// ============================================================
// The gradient scaler has to touch every parameter gradient
// between backward() and the optimizer step:
//
//   round to the autocast precision → check for inf/NaN →
//   divide by the loss scale
//
// It works on a GradBucket: every gradient of the model copied
// from burn's GradientsParams into one flat host buffer, in a
// fixed parameter order, then registered back under the same
// parameter ids.

use anyhow::Result;
use burn::{
    module::ParamId,
    nn::Linear,
    optim::GradientsParams,
    prelude::*,
};

use crate::ml::host::to_host;

/// A float parameter of a model, by tensor rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRef {
    Vector(ParamId),
    Matrix(ParamId),
}

/// Models that can list their float parameters in a stable order.
pub trait HasParams {
    fn float_params(&self) -> Vec<ParamRef>;
}

/// Weight then (optional) bias of a linear layer.
pub fn linear_params<B: Backend>(linear: &Linear<B>) -> Vec<ParamRef> {
    let mut out = vec![ParamRef::Matrix(linear.weight.id)];
    if let Some(bias) = &linear.bias {
        out.push(ParamRef::Vector(bias.id));
    }
    out
}

struct Slot<B: Backend> {
    param:  ParamRef,
    dims:   Vec<usize>,
    device: B::Device,
    offset: usize,
    len:    usize,
}

/// The gradients of a model flattened into one host buffer.
/// Parameters that received no gradient are left out.
pub struct GradBucket<B: Backend> {
    values: Vec<f32>,
    slots:  Vec<Slot<B>>,
}

impl<B: Backend> GradBucket<B> {
    pub fn gather(params: &[ParamRef], grads: &GradientsParams) -> Result<Self> {
        let mut values = Vec::new();
        let mut slots  = Vec::with_capacity(params.len());
        for &param in params {
            let found = match param {
                ParamRef::Vector(id) => grads
                    .get::<B, 1>(id)
                    .map(|g| (g.dims().to_vec(), g.device(), g)),
                ParamRef::Matrix(id) => grads
                    .get::<B, 2>(id)
                    .map(|g| (g.dims().to_vec(), g.device(), g.flatten::<1>(0, 1))),
            };
            let Some((dims, device, grad)) = found else { continue };

            let g = to_host(grad)?;
            slots.push(Slot { param, dims, device, offset: values.len(), len: g.len() });
            values.extend(g);
        }
        Ok(Self { values, slots })
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn all_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    pub fn scale(&mut self, factor: f32) {
        for v in self.values.iter_mut() {
            *v *= factor;
        }
    }

    /// Register the (possibly modified) values back as the parameters' gradients.
    pub fn scatter(self, grads: &mut GradientsParams) {
        let Self { values, slots } = self;
        for slot in slots {
            let data = TensorData::new(values[slot.offset..slot.offset + slot.len].to_vec(), slot.dims);
            match slot.param {
                ParamRef::Vector(id) => {
                    grads.register::<B, 1>(id, Tensor::from_data(data, &slot.device))
                }
                ParamRef::Matrix(id) => {
                    grads.register::<B, 2>(id, Tensor::from_data(data, &slot.device))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::amp::Autocast;
    use crate::ml::model::{LinearStack, LinearStackConfig};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn grads_of(model: &LinearStack<TestBackend>) -> GradientsParams {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::ones([2, 3], &device);
        let loss = model.forward(x, &Autocast::disabled()).sum();
        GradientsParams::from_grads(loss.backward(), model)
    }

    #[test]
    fn test_gather_scale_scatter_updates_every_gradient() {
        let model = LinearStackConfig::new(3, 2, 2).init::<TestBackend>(&Default::default());
        let params = model.float_params();
        let mut grads = grads_of(&model);

        let mut bucket = GradBucket::<NdArray<f32>>::gather(&params, &grads).unwrap();
        assert_eq!(bucket.slots.len(), 4);
        let before = bucket.values_mut().to_vec();
        bucket.scale(0.5);
        bucket.scatter(&mut grads);

        let after = GradBucket::<NdArray<f32>>::gather(&params, &grads).unwrap();
        assert_eq!(after.values.len(), before.len());
        for (a, b) in after.values.iter().zip(&before) {
            assert!((a - b * 0.5).abs() < 1e-6);
        }
        assert!(after.all_finite());
    }
}
