// ============================================================
// Layer 2 — AugmentUseCase
// ============================================================
// Training with augmentation on the device:
//
//   Step 1: Load FashionMNIST (pixels scaled to 0..1)
//   Step 2: For each epoch and batch:
//             move batch to device (batcher)
//             → Gaussian blur on the device
//             → forward → cross-entropy → backward
//             → accumulate gradients
//   Step 3: Step the optimizer once per accumulation window
//
// The default window is the whole epoch, so there is one
// optimizer step per epoch. Set `accumulation` to step every
// N batches instead.

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsAccumulator, GradientsParams, Optimizer, SgdConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use super::{DataConfig, TrainingReport};
use crate::data::{
    batcher::{ImageBatcher, PixelScale},
    dataset::ImageDataset,
};
use crate::ml::{
    amp::Autocast,
    augment::{Compose, GaussianBlur, Transform},
    model::{ExampleModel, ExampleModelConfig},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentConfig {
    pub data:         DataConfig,
    pub epochs:       usize,
    pub batch_size:   usize,
    pub lr:           f64,
    pub blur_kernel:  usize,
    /// Output width of the linear layer
    pub hidden_size:  usize,
    /// Batches per optimizer step; None = whole epoch
    pub accumulation: Option<usize>,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            data:         DataConfig::default(),
            epochs:       3,
            batch_size:   1024,
            lr:           1e-3,
            blur_kernel:  11,
            hidden_size:  128,
            accumulation: None,
        }
    }
}

pub struct AugmentUseCase {
    config: AugmentConfig,
}

impl AugmentUseCase {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    pub fn execute<B: AutodiffBackend>(&self, device: &B::Device) -> Result<TrainingReport> {
        let cfg    = &self.config;
        let source = cfg.data.source();
        tracing::info!("Loading training images from {}", source.describe());
        let dataset = ImageDataset::new(source.load_train()?);

        let mut transforms = Compose::<B>::new(vec![Box::new(GaussianBlur::new(cfg.blur_kernel))]);
        let mut model: ExampleModel<B> = ExampleModelConfig::new()
            .with_num_classes(cfg.hidden_size)
            .init(device);
        let loss_fn   = CrossEntropyLossConfig::new().init(device);
        let mut optim = SgdConfig::new().init::<B, ExampleModel<B>>();
        let window    = cfg.accumulation.filter(|&n| n > 0);
        let mut report = TrainingReport { world_size: 1, final_scale: 1.0, ..Default::default() };

        for epoch in 0..cfg.epochs {
            println!("Epoch {epoch}/{}", cfg.epochs);

            let loader = DataLoaderBuilder::<B, _, _>::new(batcher())
                .batch_size(cfg.batch_size)
                .set_device(device.clone())
                .build(dataset.clone());

            let mut accumulator = GradientsAccumulator::<ExampleModel<B>>::new();
            let mut pending = 0;
            let mut total   = 0.0;
            let mut batches = 0;

            for batch in loader.iter() {
                let images = transforms.apply(batch.images);
                let logits = model.forward(images, &Autocast::disabled());
                let loss   = loss_fn.forward(logits, batch.labels);
                total   += loss.clone().into_scalar().elem::<f64>();
                batches += 1;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                accumulator.accumulate(&model, grads);
                pending += 1;

                if window == Some(pending) {
                    model = optim.step(cfg.lr, model, accumulator.grads());
                    report.optimizer_steps += 1;
                    pending = 0;
                }
            }
            if pending > 0 {
                model = optim.step(cfg.lr, model, accumulator.grads());
                report.optimizer_steps += 1;
            }

            let mean = total / batches.max(1) as f64;
            tracing::info!("Epoch {epoch}: loss={mean:.6}");
            report.epoch_losses.push(mean);
        }

        report.best_loss = report.epoch_losses.iter().copied().reduce(f64::min);
        Ok(report)
    }
}

/// The blur keeps pixel values inside the input range, so scale before it.
fn batcher() -> ImageBatcher {
    ImageBatcher::new(PixelScale::Unit)
}
