// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// By programming against traits instead of concrete types,
// each recipe can swap where its data comes from without any
// change to the training code:
//   - FashionMnist     implements ImageSource (downloads)
//   - SyntheticImages  implements ImageSource (generated, offline)

use anyhow::Result;
use crate::domain::image::ImageItem;

// ─── ImageSource ──────────────────────────────────────────────────────────────
/// Any component that can provide a labelled image training set.
pub trait ImageSource {
    /// Load every training image from this source.
    fn load_train(&self) -> Result<Vec<ImageItem>>;

    /// Short human readable name used in log lines.
    fn describe(&self) -> String;
}

// ─── Persistable ──────────────────────────────────────────────────────────────
/// Any component whose state can be saved and restored from disk.
///
/// Implementations:
///   - BestCheckpoint metadata → best.json
pub trait Persistable: Sized {
    /// Save this component's state to the given path
    fn save(&self, path: &std::path::Path) -> Result<()>;

    /// Load a component's state from the given path.
    fn load(path: &std::path::Path) -> Result<Self>;
}
