// ============================================================
// Layer 2 — DdpUseCase
// ============================================================
// One data-parallel training step, run by every process of the
// group:
//
//   Step 1: Join the process group (environment defaults)
//   Step 2: Load FashionMNIST and take this rank's shard
//   Step 3: Build the model, broadcast rank 0's weights
//   Step 4: One batch: forward → MSE against one-hot labels
//           → backward → gradient all-reduce → SGD step
//   Step 5: Leave the group
//
// The CLI launches one call per rank (WORLD_SIZE threads); with
// no environment at all the group is a single process.

use std::sync::Arc;

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    nn::loss::{MseLoss, Reduction},
    optim::{GradientsParams, Optimizer, SgdConfig},
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
use crate::infra::dist::{DistEnv, ProcessGroup, Rank};
use crate::ml::{
    amp::Autocast,
    model::{ExampleModel, ExampleModelConfig},
    parallel::DataParallel,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdpConfig {
    pub data:       DataConfig,
    pub batch_size: usize,
    pub lr:         f64,
}

impl Default for DdpConfig {
    fn default() -> Self {
        Self {
            data:       DataConfig::default(),
            batch_size: 32,
            lr:         1e-3,
        }
    }
}

pub struct DdpUseCase {
    config: DdpConfig,
}

impl DdpUseCase {
    pub fn new(config: DdpConfig) -> Self {
        Self { config }
    }

    pub fn execute<B: AutodiffBackend>(&self, env: &DistEnv, device: B::Device) -> Result<TrainingReport> {
        let cfg   = &self.config;
        let group = ProcessGroup::<B::InnerBackend>::init(env, device.clone())
            .context("Cannot initialise the process group")?;
        let g = Some(&group);

        print0!(g, "======= To get a printout from every process, replace print0! with println!. Printing from rank 0.");
        print0!(g, "====== DDP example is on rank {}", group.rank());

        // ── Data: this rank's shard ──────────────────────────────────────────
        let source  = cfg.data.source();
        tracing::info!("Loading training images from {}", source.describe());
        let dataset = Arc::new(ImageDataset::new(source.load_train()?));
        let shard   = ShardedDataset::new(dataset, group.rank(), group.world_size(), ShardOptions::default());

        let loader = DataLoaderBuilder::<B, _, _>::new(ImageBatcher::new(PixelScale::Unit))
            .batch_size(cfg.batch_size)
            .set_device(device.clone())
            .build(shard);

        // ── Model: identical replicas ─────────────────────────────────────────
        let ddp   = DataParallel::<B>::new(&group);
        let model: ExampleModel<B> = ExampleModelConfig::new().init(&device);
        let model = ddp.broadcast_parameters(model)?;
        let mut optim = SgdConfig::new().init::<B, ExampleModel<B>>();

        // ── One step ──────────────────────────────────────────────────────────
        let batch   = loader.iter().next().context("This rank's shard is empty")?;
        let outputs = model.forward(batch.images, &Autocast::disabled());
        let loss    = MseLoss::new().forward(outputs, batch.one_hot, Reduction::Mean);
        let value   = loss.clone().into_scalar().elem::<f64>();

        let grads  = GradientsParams::from_grads(loss.backward(), &model);
        let grads  = ddp.sync_gradients(grads)?;
        let _model = optim.step(cfg.lr, model, grads);

        print0!(g, "Done training");
        let report = TrainingReport {
            rank:            group.rank(),
            world_size:      group.world_size(),
            epoch_losses:    vec![value],
            best_loss:       Some(value),
            optimizer_steps: 1,
            final_scale:     1.0,
            ..Default::default()
        };
        group.destroy()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::dist::{
        launch,
        testing::{collective_lock, TestInner},
    };
    use burn::backend::Autodiff;

    type TestBackend = Autodiff<TestInner>;

    fn config() -> DdpConfig {
        DdpConfig { data: DataConfig::synthetic(96), ..Default::default() }
    }

    #[test]
    fn test_single_process_step() {
        let report = DdpUseCase::new(config())
            .execute::<TestBackend>(&DistEnv::default(), Default::default())
            .unwrap();
        assert_eq!(report.world_size, 1);
        assert_eq!(report.optimizer_steps, 1);
        assert!(report.epoch_losses[0].is_finite());
    }

    #[test]
    fn test_two_rank_step() {
        let _lock = collective_lock();
        let env   = DistEnv { world_size: 2, ..DistEnv::default() };
        let reports = launch(&env, |peer| {
            DdpUseCase::new(config()).execute::<TestBackend>(&peer, Default::default())
        })
        .unwrap();

        assert_eq!((reports[0].rank, reports[1].rank), (0, 1));
        assert!(reports.iter().all(|r| r.world_size == 2));
        // Each rank scores its own shard before the sync
        assert!(reports.iter().all(|r| r.epoch_losses[0].is_finite()));
    }
}
