// ============================================================
// Layer 4 — Synthetic Images
// ============================================================
// An offline ImageSource producing FashionMNIST-shaped data.
// Each class draws a bright horizontal band at a class-specific
// row over low-level noise, so a linear model can separate the
// classes and loss visibly decreases during training.

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::domain::image::{ImageItem, IMAGE_SIDE, NUM_CLASSES};
use crate::domain::traits::ImageSource;

pub struct SyntheticImages {
    count: usize,
    seed:  u64,
}

impl SyntheticImages {
    pub fn new(count: usize, seed: u64) -> Self {
        Self { count, seed }
    }
}

impl ImageSource for SyntheticImages {
    fn load_train(&self) -> Result<Vec<ImageItem>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let items = (0..self.count)
            .map(|i| {
                let label = (i % NUM_CLASSES) as u8;
                let band  = 3 + 2 * label as usize;
                let pixels = (0..IMAGE_SIDE * IMAGE_SIDE)
                    .map(|p| {
                        let row = p / IMAGE_SIDE;
                        if row == band || row == band + 1 {
                            rng.gen_range(200..=255)
                        } else {
                            rng.gen_range(0..40)
                        }
                    })
                    .collect();
                ImageItem::new(pixels, label)
            })
            .collect();
        Ok(items)
    }

    fn describe(&self) -> String {
        format!("{} synthetic images (seed {})", self.count, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes_and_labels() {
        let items = SyntheticImages::new(25, 3).load_train().unwrap();
        assert_eq!(items.len(), 25);
        assert!(items.iter().all(|it| it.pixel_count() == IMAGE_SIDE * IMAGE_SIDE));
        assert_eq!(items[13].label, 3);
    }

    #[test]
    fn test_same_seed_same_images() {
        let a = SyntheticImages::new(4, 9).load_train().unwrap();
        let b = SyntheticImages::new(4, 9).load_train().unwrap();
        assert_eq!(a[2].pixels, b[2].pixels);
    }
}
