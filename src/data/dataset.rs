use burn::data::dataset::Dataset;
use std::sync::Arc;

use crate::domain::image::ImageItem;

/// In-memory image dataset. Cloning shares the underlying items, so a fresh
/// per-epoch view (see `ShardedDataset`) costs nothing.
#[derive(Clone)]
pub struct ImageDataset {
    items: Arc<Vec<ImageItem>>,
}

impl ImageDataset {
    pub fn new(items: Vec<ImageItem>) -> Self {
        Self { items: Arc::new(items) }
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
