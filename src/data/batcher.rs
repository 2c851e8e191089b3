// ============================================================
// Layer 4 — Image Batcher
// ============================================================
// Implements Burn's Batcher trait to convert a Vec<ImageItem>
// into device tensors.
//
// This is the host → device boundary of every image recipe:
// pixels leave host memory here, and every augmentation that
// follows runs on the device the loader was built for.
//
// Output shapes:
//   images  [N, 1, H, W]  float (raw 0..255 or scaled to 0..1)
//   labels  [N]           int
//   one_hot [N, classes]  float, for regression-style losses

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::image::{ImageItem, NUM_CLASSES};

/// How pixel bytes become floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelScale {
    /// Keep 0..255 — scaling is left to a device transform
    Raw,
    /// Divide by 255 during batching
    Unit,
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    pub images:  Tensor<B, 4>,
    pub labels:  Tensor<B, 1, Int>,
    pub one_hot: Tensor<B, 2>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher {
    pub scale: PixelScale,
}

impl ImageBatcher {
    pub fn new(scale: PixelScale) -> Self {
        Self { scale }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        // Images are square; every item has the same pixel count
        let side = (items[0].pixel_count() as f64).sqrt() as usize;

        let divisor = match self.scale {
            PixelScale::Raw  => 1.0f32,
            PixelScale::Unit => 255.0f32,
        };
        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|it| it.pixels.iter().map(move |&p| p as f32 / divisor))
            .collect();

        let labels: Vec<i32> = items.iter().map(|it| it.label as i32).collect();

        let mut one_hot = vec![0.0f32; batch_size * NUM_CLASSES];
        for (row, it) in items.iter().enumerate() {
            one_hot[row * NUM_CLASSES + it.label as usize] = 1.0;
        }

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device)
            .reshape([batch_size, 1, side, side]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), device);
        let one_hot = Tensor::<B, 1>::from_floats(one_hot.as_slice(), device)
            .reshape([batch_size, NUM_CLASSES]);

        ImageBatch { images, labels, one_hot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn items() -> Vec<ImageItem> {
        vec![
            ImageItem::new(vec![255; 16], 2),
            ImageItem::new(vec![0; 16], 9),
        ]
    }

    #[test]
    fn test_shapes_and_one_hot() {
        let batcher = ImageBatcher::new(PixelScale::Raw);
        let batch: ImageBatch<TestBackend> = batcher.batch(items(), &Default::default());
        assert_eq!(batch.images.dims(), [2, 1, 4, 4]);
        assert_eq!(batch.one_hot.dims(), [2, NUM_CLASSES]);

        let hot: Vec<f32> = batch.one_hot.into_data().to_vec().unwrap();
        assert_eq!(hot[2], 1.0);
        assert_eq!(hot[NUM_CLASSES + 9], 1.0);
        assert_eq!(hot.iter().sum::<f32>(), 2.0);
    }

    #[test]
    fn test_unit_scale() {
        let batcher = ImageBatcher::new(PixelScale::Unit);
        let batch: ImageBatch<TestBackend> = batcher.batch(items(), &Default::default());
        let max: f32 = batch.images.max().into_scalar().elem();
        assert_eq!(max, 1.0);
    }
}
