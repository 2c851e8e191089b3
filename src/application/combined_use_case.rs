// ============================================================
// Layer 2 — CombinedUseCase
// ============================================================
// Every technique at once, run by every process of the group:
//
//   Step 1: Join the process group; pick up this rank's shard
//   Step 2: Device pipeline: RandomAffine → ToDtype (/255, autocast
//           precision)
//   Step 3: Warm-up compile the model (failure → warn, carry on)
//   Step 4: Broadcast rank 0's weights to every replica
//   Step 5: For each epoch:
//             reshuffle the shard (seed + epoch)
//             per batch: augment → forward under autocast → CE
//             → scaled backward → gradient all-reduce
//             → scaler step → scaler update
//             rank 0: save the model when the epoch loss is a new best
//   Step 6: Barrier; rank 0 loads the best weights into a fresh
//           model, scores it on the first training batch, then
//           deletes the checkpoint
//   Step 7: Leave the group

use std::sync::Arc;

use anyhow::{Context, Result};
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::{GradientsParams, SgdConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use super::{DataConfig, TrainingReport};
use crate::data::{
    batcher::{ImageBatcher, PixelScale},
    dataset::ImageDataset,
    sampler::{ShardOptions, ShardedDataset},
};
use crate::domain::image::IMAGE_SIDE;
use crate::domain::precision::Precision;
use crate::infra::{
    checkpoint::BestCheckpoint,
    dist::{DistEnv, ProcessGroup, Rank},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    amp::{Autocast, GradScaler},
    augment::{Compose, RandomAffine, ToDtype, Transform},
    compile::{try_compile, CompileMode},
    model::{ExampleModel, ExampleModelConfig},
    parallel::DataParallel,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileSettings {
    /// None trains without warm-up
    pub mode:       Option<CompileMode>,
    /// Side of the square probe image used for warm-up
    pub probe_side: usize,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self { mode: Some(CompileMode::MaxAutotune), probe_side: IMAGE_SIDE }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedConfig {
    pub data:         DataConfig,
    pub num_epochs:   usize,
    pub use_amp:      bool,
    pub precision:    Precision,
    pub batch_size:   usize,
    pub lr:           f64,
    pub compile:      CompileSettings,
    pub shuffle:      bool,
    pub seed:         u64,
    /// Seed for augmentation draws; None = entropy
    pub augment_seed: Option<u64>,
    pub metrics_dir:  Option<String>,
}

impl Default for CombinedConfig {
    fn default() -> Self {
        Self {
            data:         DataConfig::default(),
            num_epochs:   3,
            use_amp:      true,
            precision:    Precision::F16,
            batch_size:   128,
            lr:           1e-4,
            compile:      CompileSettings::default(),
            shuffle:      true,
            seed:         0,
            augment_seed: None,
            metrics_dir:  None,
        }
    }
}

pub struct CombinedUseCase {
    config: CombinedConfig,
}

impl CombinedUseCase {
    pub fn new(config: CombinedConfig) -> Self {
        Self { config }
    }

    pub fn execute<B: AutodiffBackend>(&self, env: &DistEnv, device: B::Device) -> Result<TrainingReport> {
        let cfg   = &self.config;
        let group = ProcessGroup::<B::InnerBackend>::init(env, device.clone())
            .context("Cannot initialise the process group")?;
        let g = Some(&group);
        print0!(g, "Initialized process group on {} ranks", group.world_size());

        // ── Data ──────────────────────────────────────────────────────────────
        let source = cfg.data.source();
        tracing::info!("Loading training images from {}", source.describe());
        let dataset = Arc::new(ImageDataset::new(source.load_train()?));
        let batcher = ImageBatcher::new(PixelScale::Raw);
        let shard_options = ShardOptions { shuffle: cfg.shuffle, seed: cfg.seed, ..Default::default() };

        // ── Device pipeline ───────────────────────────────────────────────────
        let autocast   = Autocast::new(cfg.precision, cfg.use_amp);
        let mut affine = RandomAffine::new(15.0, (0.1, 0.1), (0.9, 1.1), 10.0);
        if let Some(seed) = cfg.augment_seed {
            affine = affine.with_seed(seed + group.rank() as u64);
        }
        let mut transforms = Compose::<B>::new(vec![
            Box::new(affine),
            Box::new(ToDtype { precision: autocast.active_precision(), scale: true }),
        ]);

        // ── Model ─────────────────────────────────────────────────────────────
        let model: ExampleModel<B> = ExampleModelConfig::new().init(&device);
        let compiled = self.compile(&model, &autocast, &device, &group);

        let ddp       = DataParallel::<B>::new(&group);
        let mut model = ddp.broadcast_parameters(model)?;
        let loss_fn   = CrossEntropyLossConfig::new().init(&device);
        let mut optim  = SgdConfig::new().init::<B, ExampleModel<B>>();
        let mut scaler = GradScaler::new(cfg.use_amp, cfg.precision);

        // Rank 0 tracks the best epoch
        let mut best = if group.is_primary() { Some(BestCheckpoint::new()?) } else { None };
        let metrics = match (&cfg.metrics_dir, group.is_primary()) {
            (Some(dir), true) => Some(MetricsLogger::new(dir.as_str())?),
            _ => None,
        };

        let mut report = TrainingReport {
            rank:       group.rank(),
            world_size: group.world_size(),
            compiled,
            ..Default::default()
        };

        // ── Training ──────────────────────────────────────────────────────────
        for epoch in 0..cfg.num_epochs {
            let shard = ShardedDataset::new(
                Arc::clone(&dataset),
                group.rank(),
                group.world_size(),
                shard_options.for_epoch(epoch as u64),
            );
            let loader = DataLoaderBuilder::<B, _, _>::new(batcher.clone())
                .batch_size(cfg.batch_size)
                .set_device(device.clone())
                .build(shard);

            let mut total   = 0.0;
            let mut batches = 0;
            for batch in loader.iter() {
                let images = transforms.apply(batch.images);
                let logits = model.forward(images, &autocast);
                let loss   = loss_fn.forward(logits, batch.labels);
                total   += loss.clone().into_scalar().elem::<f64>();
                batches += 1;

                let grads = GradientsParams::from_grads(scaler.scale(loss).backward(), &model);
                let grads = ddp.sync_gradients(grads)?;
                model = scaler.step(&mut optim, cfg.lr, model, grads)?;
                scaler.update();
                report.optimizer_steps += 1;
            }

            let loss = total / batches.max(1) as f64;
            print0!(g, "Epoch {epoch}: loss={loss:.6}");
            report.epoch_losses.push(loss);

            if let Some(best) = best.as_mut() {
                best.observe::<B, _>(epoch, loss, &model)?;
            }
            if let Some(metrics) = &metrics {
                metrics.log(&EpochMetrics::new(epoch, loss, scaler.skipped_steps(), scaler.get_scale()))?;
            }
        }

        report.skipped_steps    = scaler.skipped_steps();
        report.optimizer_steps -= report.skipped_steps;
        report.final_scale      = scaler.get_scale();
        drop(model);

        // ── Reload the best weights ───────────────────────────────────────────
        print0!(g, "Finished training and now showing how loading the model works");
        group.barrier()?;

        if let Some(mut best) = best {
            report.best_loss = best.best_loss();
            if best.best().is_some() {
                let meta = best.load_meta()?;
                print0!(g, "Best epoch was {} with loss {:.6}", meta.epoch, meta.loss);
                print0!(g, "Initializing fresh model");
                let fresh: ExampleModel<B> = ExampleModelConfig::new().init(&device);
                print0!(g, "Now loading model");
                let restored = best.load_into::<B, _>(fresh, &device)?;
                report.restored = true;

                let items: Vec<_> = (0..cfg.batch_size).filter_map(|i| dataset.get(i)).collect();
                if !items.is_empty() {
                    let batch  = Batcher::<B, _, _>::batch(&batcher, items, &device);
                    let images = ToDtype { precision: autocast.active_precision(), scale: true }
                        .apply(batch.images);
                    let loss = score(&restored, &loss_fn, images, batch.labels, &autocast);
                    print0!(g, "Restored model loss on the first batch: {loss:.6}");
                    report.restored_loss = Some(loss);
                }
            } else {
                warn0!(g, "No finite epoch loss was observed, nothing to load");
            }
            best.remove()?;
        }

        print0!(g, "Done!");
        group.destroy()?;
        Ok(report)
    }

    /// Warm-up compile on a probe batch; false when it failed.
    fn compile<B: Backend, R: Rank>(
        &self,
        model:    &ExampleModel<B>,
        autocast: &Autocast,
        device:   &B::Device,
        group:    &R,
    ) -> bool {
        let g = Some(group);
        let Some(mode) = self.config.compile.mode else {
            return false;
        };

        let side  = self.config.compile.probe_side;
        let probe = Tensor::<B, 4>::zeros([1, 1, side, side], device);
        match try_compile(mode, probe, |x| model.forward(x, autocast)) {
            Ok(report) => {
                print0!(g, "Successful model compilation, carrying on with training.");
                tracing::debug!(
                    "{:?} warm-up: {} passes took {:?}",
                    report.mode,
                    report.passes,
                    report.elapsed
                );
                true
            }
            Err(e) => {
                warn0!(g, "Tried and failed to compile model, continuing in standard mode: {e}");
                false
            }
        }
    }
}

/// Mean cross-entropy of `model` on one batch.
fn score<B: Backend>(
    model:    &ExampleModel<B>,
    loss_fn:  &CrossEntropyLoss<B>,
    images:   Tensor<B, 4>,
    labels:   Tensor<B, 1, Int>,
    autocast: &Autocast,
) -> f64 {
    let logits = model.forward(images, autocast);
    loss_fn.forward(logits, labels).into_scalar().elem::<f64>()
}
