// ============================================================
// Layer 6 — Best-Checkpoint Tracker
// ============================================================
// Keeps the weights of the best epoch seen so far.
//
// Rank 0 calls observe() once per epoch with the mean loss of
// that epoch. When the loss is a new minimum the full parameter
// set is written to a fixed path, overwriting the previous best,
// so at most one checkpoint exists at any time.
//
// Files, inside a private temporary directory:
//   ddp_model.mpk   ← weights (named MessagePack, full precision)
//   best.json       ← {"epoch": .., "loss": ..} of those weights
//
// The directory is deleted when the tracker is dropped.
//
// Full precision settings are used so a save → load round trip
// restores every parameter bit for bit.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

use crate::domain::traits::Persistable;

const MODEL_STEM: &str = "ddp_model";
const META_FILE:  &str = "best.json";

/// Metadata of the saved best checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub loss:  f64,
}

impl Persistable for CheckpointMeta {
    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Cannot write checkpoint metadata to '{}'", path.display()))
    }

    fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read checkpoint metadata '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

pub struct BestCheckpoint {
    dir:  TempDir,
    best: Option<CheckpointMeta>,
}

impl BestCheckpoint {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("train-recipes-")
            .tempdir()
            .context("Cannot create a temporary checkpoint directory")?;
        tracing::debug!("Checkpoint directory: '{}'", dir.path().display());
        Ok(Self { dir, best: None })
    }

    /// Path without extension, as passed to the recorder.
    fn stem(&self) -> PathBuf {
        self.dir.path().join(MODEL_STEM)
    }

    pub fn model_path(&self) -> PathBuf {
        self.stem().with_extension("mpk")
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.path().join(META_FILE)
    }

    pub fn best(&self) -> Option<CheckpointMeta> {
        self.best
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best.map(|m| m.loss)
    }

    /// Save `model` if `loss` beats every loss seen so far.
    /// Returns whether a save happened. NaN never counts as better.
    pub fn observe<B: Backend, M: Module<B>>(
        &mut self,
        epoch: usize,
        loss:  f64,
        model: &M,
    ) -> Result<bool> {
        let improved = match self.best {
            None       => loss.is_finite(),
            Some(best) => loss < best.loss,
        };
        if !improved {
            return Ok(false);
        }

        let path = self.model_path();
        model
            .clone()
            .save_file(self.stem(), &recorder())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let meta = CheckpointMeta { epoch, loss };
        meta.save(&self.meta_path())?;
        self.best = Some(meta);

        tracing::info!("New best loss {loss:.6} at epoch {epoch}, saved '{}'", path.display());
        Ok(true)
    }

    /// Restore the saved weights into `model`.
    pub fn load_into<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M> {
        let path = self.model_path();
        model
            .load_file(self.stem(), &recorder(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))
    }

    /// Metadata as stored on disk.
    pub fn load_meta(&self) -> Result<CheckpointMeta> {
        CheckpointMeta::load(&self.meta_path())
    }

    /// Delete the saved files; the directory goes when the tracker drops.
    pub fn remove(&mut self) -> Result<()> {
        for path in [self.model_path(), self.meta_path()] {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Cannot remove '{}'", path.display()))?;
            }
        }
        self.best = None;
        Ok(())
    }
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}
