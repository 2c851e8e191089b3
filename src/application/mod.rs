// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// One use case per recipe. Each orchestrates the other layers
// to run one complete training program:
//
//   amp_use_case       — mixed precision on a linear stack
//   ddp_use_case       — one data-parallel step on FashionMNIST
//   augment_use_case   — device-side blur + gradient accumulation
//   combined_use_case  — all of the above plus warm-up compilation
//                        and a best-checkpoint round trip
//
// Rules for this layer:
//   - No tensor math beyond calling models and losses
//   - No clap types (configs come in through From<Args>)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

use serde::{Deserialize, Serialize};

use crate::data::{fashion_mnist::FashionMnist, synthetic::SyntheticImages};
use crate::domain::traits::ImageSource;

pub mod amp_use_case;
pub mod ddp_use_case;
pub mod augment_use_case;
pub mod combined_use_case;

// ─── Data Source Configuration ───────────────────────────────────────────────
// Shared by every image recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// FashionMNIST root; files live under <root>/FashionMNIST/raw
    pub data_root:         String,
    pub download:          bool,
    /// Use this many generated images instead of FashionMNIST
    pub synthetic_samples: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_root:         "data".to_string(),
            download:          true,
            synthetic_samples: None,
        }
    }
}

impl DataConfig {
    pub fn synthetic(count: usize) -> Self {
        Self { synthetic_samples: Some(count), ..Self::default() }
    }

    pub fn source(&self) -> Box<dyn ImageSource> {
        match self.synthetic_samples {
            Some(count) => Box::new(SyntheticImages::new(count, 0)),
            None        => Box::new(FashionMnist::new(&self.data_root, self.download)),
        }
    }
}

// ─── Training Report ─────────────────────────────────────────────────────────
// What a recipe hands back to the CLI (and to tests).
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    pub rank:            usize,
    pub world_size:      usize,
    /// Mean batch loss per epoch, on this rank
    pub epoch_losses:    Vec<f64>,
    pub best_loss:       Option<f64>,
    pub optimizer_steps: usize,
    pub skipped_steps:   usize,
    pub final_scale:     f64,
    pub compiled:        bool,
    /// Rank 0 reloaded the best checkpoint into a fresh model
    pub restored:        bool,
    /// Loss of the reloaded model on the first training batch
    pub restored_loss:   Option<f64>,
}
