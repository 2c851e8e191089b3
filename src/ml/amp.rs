// ============================================================
// Layer 5 — Mixed Precision
// ============================================================
// Two pieces, used together by the AMP and combined recipes:
//
//   Autocast    — rounds the activations a model produces to a
//                 reduced precision. Values are rounded in the
//                 forward pass; gradients flow through unchanged
//                 (straight-through estimate).
//
//   GradScaler  — dynamic loss scaling. The loss is multiplied
//                 by a large factor before backward so small
//                 gradients survive reduced precision. Before the
//                 optimizer step gradients are rounded, checked
//                 for inf/NaN and divided by the factor again.
//                 A step with non-finite gradients is skipped and
//                 the factor halves; after `growth_interval`
//                 clean steps in a row it doubles.
//
// Typical loop:
//
//   let out   = model.forward(x, &autocast);
//   let loss  = loss_fn.forward(out, y, Reduction::Mean);
//   let grads = scaler.scale(loss).backward();
//   let grads = GradientsParams::from_grads(grads, &model);
//   model     = scaler.step(&mut optim, lr, model, grads)?;
//   scaler.update();

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::domain::precision::Precision;
use crate::ml::host::{from_host, to_host};
use crate::ml::params::{GradBucket, HasParams, ParamRef};

// ─── Autocast ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Autocast {
    precision: Precision,
    enabled:   bool,
}

impl Autocast {
    pub fn new(precision: Precision, enabled: bool) -> Self {
        Self { precision, enabled }
    }

    pub fn disabled() -> Self {
        Self::new(Precision::F32, false)
    }

    /// The precision activations are actually rounded to.
    pub fn active_precision(&self) -> Precision {
        if self.enabled { self.precision } else { Precision::F32 }
    }

    /// Round `x` to the active precision; identity in full precision.
    pub fn cast<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let precision = self.active_precision();
        if !precision.is_reduced() {
            return x;
        }

        let dims   = x.dims();
        let device = x.device();
        let mut values = match to_host(x.clone()) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Autocast skipped, cannot read activations: {e}");
                return x;
            }
        };
        precision.round_slice(&mut values);

        let rounded = from_host::<B, D>(values, dims, &device);
        // Forward sees the rounded values, backward sees identity
        let delta = (rounded - x.clone()).detach();
        x + delta
    }
}

// ─── GradScaler ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradScalerConfig {
    pub init_scale:      f64,
    pub growth_factor:   f64,
    pub backoff_factor:  f64,
    pub growth_interval: usize,
}

impl Default for GradScalerConfig {
    fn default() -> Self {
        Self {
            init_scale:      65536.0,
            growth_factor:   2.0,
            backoff_factor:  0.5,
            growth_interval: 2000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradScaler {
    config:         GradScalerConfig,
    enabled:        bool,
    precision:      Precision,
    scale:          f64,
    growth_tracker: usize,
    /// Outcome of the last unscale, consumed by `update`
    found_inf:      Option<bool>,
    skipped_steps:  usize,
}

impl GradScaler {
    pub fn new(enabled: bool, precision: Precision) -> Self {
        Self::with_config(GradScalerConfig::default(), enabled, precision)
    }

    pub fn with_config(config: GradScalerConfig, enabled: bool, precision: Precision) -> Self {
        let scale = config.init_scale;
        Self {
            config,
            enabled,
            precision,
            scale,
            growth_tracker: 0,
            found_inf:      None,
            skipped_steps:  0,
        }
    }

    /// Current loss scale; 1.0 when disabled.
    pub fn get_scale(&self) -> f64 {
        if self.enabled { self.scale } else { 1.0 }
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    pub fn scale<B: Backend>(&self, loss: Tensor<B, 1>) -> Tensor<B, 1> {
        if self.enabled {
            loss.mul_scalar(self.scale)
        } else {
            loss
        }
    }

    /// Round, check and unscale gradients in place.
    /// Returns false when any gradient is inf or NaN; the gradients are
    /// then left untouched since the step will be skipped.
    pub fn unscale<B: Backend>(
        &mut self,
        params: &[ParamRef],
        grads:  &mut GradientsParams,
    ) -> Result<bool> {
        let mut bucket = GradBucket::<B>::gather(params, grads)?;
        self.precision.round_slice(bucket.values_mut());

        let finite = bucket.all_finite();
        self.record(finite);
        if finite {
            bucket.scale((1.0 / self.scale) as f32);
            bucket.scatter(grads);
        }
        Ok(finite)
    }

    /// Unscale and step the optimizer, or skip the step on overflow.
    /// In a data-parallel run `grads` must already be synchronised, so
    /// every rank takes the same decision.
    pub fn step<B, M, O>(
        &mut self,
        optim: &mut O,
        lr:    f64,
        model: M,
        grads: GradientsParams,
    ) -> Result<M>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + HasParams,
        O: Optimizer<M, B>,
    {
        let mut grads = grads;
        if self.enabled && !self.unscale::<B::InnerBackend>(&model.float_params(), &mut grads)? {
            self.skipped_steps += 1;
            tracing::debug!(
                "Non-finite gradients at scale {}, skipping optimizer step",
                self.scale
            );
            return Ok(model);
        }
        Ok(optim.step(lr, model, grads))
    }

    /// Adjust the scale from the outcome of the last step.
    pub fn update(&mut self) {
        if !self.enabled {
            return;
        }
        match self.found_inf.take() {
            None => {}
            Some(true) => {
                self.scale *= self.config.backoff_factor;
                self.growth_tracker = 0;
            }
            Some(false) => {
                self.growth_tracker += 1;
                if self.growth_tracker == self.config.growth_interval {
                    self.scale *= self.config.growth_factor;
                    self.growth_tracker = 0;
                }
            }
        }
    }

    fn record(&mut self, finite: bool) {
        self.found_inf = Some(!finite);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::{LinearStack, LinearStackConfig};
    use burn::{
        backend::{Autodiff, NdArray},
        optim::SgdConfig,
    };

    type TestBackend = Autodiff<NdArray<f32>>;

    fn weights(model: &LinearStack<TestBackend>) -> Vec<f32> {
        model.layers[0].weight.val().into_data().to_vec().unwrap()
    }

    fn small_config(init_scale: f64, growth_interval: usize) -> GradScalerConfig {
        GradScalerConfig { init_scale, growth_interval, ..Default::default() }
    }

    #[test]
    fn test_autocast_rounds_forward_values() {
        let device = Default::default();
        let x = Tensor::<NdArray<f32>, 1>::from_floats([1.0001, 70000.0], &device);

        let out: Vec<f32> = Autocast::new(Precision::F16, true)
            .cast(x.clone())
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(out[0], 1.0);
        assert!(out[1].is_infinite());

        let same: Vec<f32> = Autocast::new(Precision::F16, false)
            .cast(x)
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(same[0], 1.0001);
    }

    #[test]
    fn test_autocast_passes_gradients_through() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([1.0001, 2.0], &device).require_grad();
        let y = Autocast::new(Precision::BF16, true).cast(x.clone()).sum();
        let grads = y.backward();
        let g: Vec<f32> = x.grad(&grads).unwrap().into_data().to_vec().unwrap();
        assert_eq!(g, vec![1.0, 1.0]);
    }

    #[test]
    fn test_update_backs_off_and_grows() {
        let mut scaler = GradScaler::with_config(small_config(1024.0, 2), true, Precision::F16);

        scaler.record(false);
        scaler.update();
        assert_eq!(scaler.get_scale(), 1024.0);

        scaler.record(false);
        scaler.update();
        assert_eq!(scaler.get_scale(), 2048.0);

        scaler.record(true);
        scaler.update();
        assert_eq!(scaler.get_scale(), 1024.0);

        // Tracker was reset by the overflow
        scaler.record(false);
        scaler.update();
        assert_eq!(scaler.get_scale(), 1024.0);
    }

    #[test]
    fn test_disabled_scaler_is_identity() {
        let scaler = GradScaler::new(false, Precision::F16);
        assert_eq!(scaler.get_scale(), 1.0);

        let loss = Tensor::<NdArray<f32>, 1>::from_floats([3.0], &Default::default());
        let scaled: f32 = scaler.scale(loss).into_scalar().elem();
        assert_eq!(scaled, 3.0);
    }

    #[test]
    fn test_overflowing_step_is_skipped() {
        let device = Default::default();
        let model  = LinearStackConfig::new(4, 2, 1).init::<TestBackend>(&device);
        let before = weights(&model);

        // Any gradient above ~6e-5 overflows f16 at this scale
        let mut scaler = GradScaler::with_config(small_config(1e9, 2000), true, Precision::F16);
        let mut optim  = SgdConfig::new().init::<TestBackend, LinearStack<TestBackend>>();

        let x = Tensor::<TestBackend, 2>::ones([3, 4], &device);
        let loss  = model.forward(x, &Autocast::disabled()).sum();
        let grads = GradientsParams::from_grads(scaler.scale(loss).backward(), &model);
        let model = scaler.step(&mut optim, 0.1, model, grads).unwrap();
        scaler.update();

        assert_eq!(weights(&model), before);
        assert_eq!(scaler.skipped_steps(), 1);
        assert_eq!(scaler.get_scale(), 5e8);
    }

    #[test]
    fn test_finite_step_matches_unscaled_update() {
        let device = Default::default();
        let base   = LinearStackConfig::new(4, 2, 1).init::<TestBackend>(&device);
        let x      = Tensor::<TestBackend, 2>::ones([3, 4], &device);

        let mut plain_optim = SgdConfig::new().init::<TestBackend, LinearStack<TestBackend>>();
        let loss  = base.forward(x.clone(), &Autocast::disabled()).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &base);
        let plain = plain_optim.step(0.1, base.clone(), grads);

        let mut scaler = GradScaler::with_config(small_config(8.0, 2000), true, Precision::F32);
        let mut optim  = SgdConfig::new().init::<TestBackend, LinearStack<TestBackend>>();
        let loss   = base.forward(x, &Autocast::disabled()).sum();
        let grads  = GradientsParams::from_grads(scaler.scale(loss).backward(), &base);
        let scaled = scaler.step(&mut optim, 0.1, base, grads).unwrap();

        for (a, b) in weights(&plain).iter().zip(weights(&scaled)) {
            assert!((a - b).abs() < 1e-5);
        }
        assert_eq!(scaler.skipped_steps(), 0);
    }
}
