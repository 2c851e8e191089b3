// ============================================================
// Layer 3 — ImageItem Domain Type
// ============================================================
// One grayscale image with its class label, exactly as it is
// stored on disk: row-major u8 pixels, no normalisation.
//
// Keeping raw bytes here (rather than floats) means the host
// side of the pipeline stays 4x smaller; conversion to float
// and any scaling happens on the device after batching.

use serde::{Deserialize, Serialize};

/// Side length of a FashionMNIST image.
pub const IMAGE_SIDE: usize = 28;

/// Number of FashionMNIST classes.
pub const NUM_CLASSES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageItem {
    /// Row-major pixels, `height * width` bytes
    pub pixels: Vec<u8>,

    /// Class index in `0..NUM_CLASSES`
    pub label: u8,
}

impl ImageItem {
    pub fn new(pixels: Vec<u8>, label: u8) -> Self {
        Self { pixels, label }
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }
}
