// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:         the epoch number (0, 1, 2, ...)
//   - loss:          mean training loss over the epoch's batches
//   - skipped_steps: optimizer steps skipped by the gradient scaler
//                    (non-finite gradients) so far
//   - loss_scale:    the scaler's loss scale at the end of the epoch
//
// Example CSV output:
//   epoch,loss,skipped_steps,loss_scale
//   0,2.301200,1,32768.0
//   1,2.288100,1,32768.0
//
// A loss_scale that keeps halving means gradients overflow the
// reduced precision on most steps.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:         usize,
    pub loss:          f64,
    pub skipped_steps: usize,
    pub loss_scale:    f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, loss: f64, skipped_steps: usize, loss_scale: f64) -> Self {
        Self { epoch, loss, skipped_steps, loss_scale }
    }
}

/// Appends epoch metrics to `<dir>/metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");

        // Appending across runs keeps earlier rows
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,loss,skipped_steps,loss_scale")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{},{:.1}",
            m.epoch,
            m.loss,
            m.skipped_steps,
            m.loss_scale,
        )?;

        tracing::debug!("Logged epoch {} metrics: loss={:.4}", m.epoch, m.loss);
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}
