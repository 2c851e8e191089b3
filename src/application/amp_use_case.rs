// ============================================================
// Layer 2 — AmpUseCase
// ============================================================
// Mixed-precision training of a stack of linear layers on
// random data:
//
//   Step 1: Generate random (input, target) batches
//   Step 2: Build the LinearStack
//   Step 3: For each epoch and batch:
//             forward under autocast → MSE loss (full precision)
//             → scaled backward → scaler step → scaler update
//
// With `use_amp = false` the same loop runs in full precision
// with the scaler disabled, which is the baseline the reduced
// precision loop is compared against.

use anyhow::Result;
use burn::{
    nn::loss::{MseLoss, Reduction},
    optim::{GradientsParams, SgdConfig},
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use serde::{Deserialize, Serialize};

use super::TrainingReport;
use crate::domain::precision::Precision;
use crate::ml::{
    amp::{Autocast, GradScaler, GradScalerConfig},
    model::{LinearStack, LinearStackConfig},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmpConfig {
    pub batch_size:  usize,
    pub in_size:     usize,
    pub out_size:    usize,
    pub num_layers:  usize,
    pub num_batches: usize,
    pub epochs:      usize,
    pub lr:          f64,
    pub use_amp:     bool,
    pub precision:   Precision,
    pub init_scale:  f64,
}

impl Default for AmpConfig {
    fn default() -> Self {
        Self {
            batch_size:  256,
            in_size:     4096,
            out_size:    4096,
            num_layers:  12,
            num_batches: 50,
            epochs:      3,
            lr:          0.001,
            use_amp:     true,
            precision:   Precision::F16,
            init_scale:  GradScalerConfig::default().init_scale,
        }
    }
}

pub type Batch<B> = (Tensor<B, 2>, Tensor<B, 2>);

pub struct AmpUseCase {
    config: AmpConfig,
}

impl AmpUseCase {
    pub fn new(config: AmpConfig) -> Self {
        Self { config }
    }

    pub fn execute<B: AutodiffBackend>(&self, device: &B::Device) -> Result<TrainingReport> {
        let cfg = &self.config;
        tracing::info!(
            "AMP recipe: {} layers of {}x{}, {} batches of {}, precision {}",
            cfg.num_layers,
            cfg.in_size,
            cfg.out_size,
            cfg.num_batches,
            cfg.batch_size,
            if cfg.use_amp { cfg.precision } else { Precision::F32 },
        );

        let data  = self.random_batches::<B>(device);
        let model = LinearStackConfig::new(cfg.in_size, cfg.out_size, cfg.num_layers).init(device);
        let (_, report) = self.train(model, &data)?;
        Ok(report)
    }

    /// Random inputs and targets, created in full precision.
    pub fn random_batches<B: Backend>(&self, device: &B::Device) -> Vec<Batch<B>> {
        let cfg = &self.config;
        (0..cfg.num_batches)
            .map(|_| {
                (
                    Tensor::random([cfg.batch_size, cfg.in_size], Distribution::Normal(0.0, 1.0), device),
                    Tensor::random([cfg.batch_size, cfg.out_size], Distribution::Normal(0.0, 1.0), device),
                )
            })
            .collect()
    }

    pub fn train<B: AutodiffBackend>(
        &self,
        model: LinearStack<B>,
        data:  &[Batch<B>],
    ) -> Result<(LinearStack<B>, TrainingReport)> {
        let cfg = &self.config;
        let mut model    = model;
        let autocast     = Autocast::new(cfg.precision, cfg.use_amp);
        let scaler_cfg   = GradScalerConfig { init_scale: cfg.init_scale, ..Default::default() };
        let mut scaler   = GradScaler::with_config(scaler_cfg, cfg.use_amp, cfg.precision);
        let mut optim    = SgdConfig::new().init::<B, LinearStack<B>>();
        let loss_fn      = MseLoss::new();
        let mut report   = TrainingReport { world_size: 1, ..Default::default() };

        println!("Training model");
        for epoch in 0..cfg.epochs {
            let mut total = 0.0;
            for (input, target) in data {
                let output = model.forward(input.clone(), &autocast);
                // Loss in full precision
                let loss = loss_fn.forward(output, target.clone(), Reduction::Mean);
                total += loss.clone().into_scalar().elem::<f64>();

                let grads = GradientsParams::from_grads(scaler.scale(loss).backward(), &model);
                model = scaler.step(&mut optim, cfg.lr, model, grads)?;
                scaler.update();
                report.optimizer_steps += 1;
            }

            let mean = total / data.len().max(1) as f64;
            tracing::info!("Epoch {epoch}: loss={mean:.6} scale={}", scaler.get_scale());
            report.epoch_losses.push(mean);
        }

        report.skipped_steps    = scaler.skipped_steps();
        report.optimizer_steps -= report.skipped_steps;
        report.final_scale      = scaler.get_scale();
        report.best_loss        = report.epoch_losses.iter().copied().reduce(f64::min);
        println!("Successfully finished");
        Ok((model, report))
    }
}
