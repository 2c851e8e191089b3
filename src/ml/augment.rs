// ============================================================
// Layer 5 — Device-Resident Augmentation
// ============================================================
// Image transforms that take and return device tensors of shape
// [N, C, H, W]. Batches are moved to the device once by the
// batcher; every transform here runs as tensor ops on that same
// device, so pixel data never makes a round trip to the host.
//
//   GaussianBlur  — separable depthwise convolution, reflect padding
//   RandomAffine  — rotation / translation / scale / shear with
//                   nearest-neighbour sampling and zero fill
//   ToDtype       — optional /255 scaling, rounding to a precision
//   Compose       — applies a list of transforms in order
//
// RandomAffine draws one set of parameters per call and applies it
// to the whole batch. Only the per-pixel index map (H*W integers)
// is built on the host; the gather itself happens on the device.

use burn::{
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::domain::precision::Precision;
use crate::ml::amp::Autocast;

pub trait Transform<B: Backend>: Send {
    fn apply(&mut self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

// ─── Compose ──────────────────────────────────────────────────────────────────

pub struct Compose<B: Backend> {
    transforms: Vec<Box<dyn Transform<B>>>,
}

impl<B: Backend> Compose<B> {
    pub fn new(transforms: Vec<Box<dyn Transform<B>>>) -> Self {
        Self { transforms }
    }
}

impl<B: Backend> Transform<B> for Compose<B> {
    fn apply(&mut self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.transforms
            .iter_mut()
            .fold(images, |x, t| t.apply(x))
    }
}

// ─── GaussianBlur ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GaussianBlur {
    kernel_size: usize,
    sigma:       f32,
}

impl GaussianBlur {
    /// Blur with the conventional sigma for this kernel size.
    pub fn new(kernel_size: usize) -> Self {
        let sigma = 0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
        Self::with_sigma(kernel_size, sigma)
    }

    pub fn with_sigma(kernel_size: usize, sigma: f32) -> Self {
        Self { kernel_size, sigma }
    }

    /// Normalised 1-D gaussian weights.
    pub fn kernel_1d(&self) -> Vec<f32> {
        let half = (self.kernel_size as f32 - 1.0) * 0.5;
        let raw: Vec<f32> = (0..self.kernel_size)
            .map(|i| {
                let x = i as f32 - half;
                (-0.5 * (x / self.sigma).powi(2)).exp()
            })
            .collect();
        let total: f32 = raw.iter().sum();
        raw.into_iter().map(|w| w / total).collect()
    }
}

/// Reflect index `i` (may be negative or past the end) into 0..n.
fn reflect(i: isize, n: usize) -> i32 {
    let last = n as isize - 1;
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i > last {
        i = 2 * last - i;
    }
    i.clamp(0, last) as i32
}

/// Pad `dim` by `pad` on both sides, mirroring without repeating the edge.
fn reflect_pad<B: Backend>(x: Tensor<B, 4>, dim: usize, pad: usize) -> Tensor<B, 4> {
    let n = x.dims()[dim];
    let index: Vec<i32> = (-(pad as isize)..(n + pad) as isize)
        .map(|i| reflect(i, n))
        .collect();
    let index = Tensor::<B, 1, Int>::from_ints(index.as_slice(), &x.device());
    x.select(dim, index)
}

impl<B: Backend> Transform<B> for GaussianBlur {
    fn apply(&mut self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let device   = images.device();
        tracing::debug!("Performing gaussian blur on {:?}", device);

        let channels = images.dims()[1];
        let k        = self.kernel_size;
        let pad      = k / 2;
        let kernel   = self.kernel_1d();
        let weights: Vec<f32> = (0..channels).flat_map(|_| kernel.iter().copied()).collect();

        let vertical   = Tensor::<B, 1>::from_floats(weights.as_slice(), &device)
            .reshape([channels, 1, k, 1]);
        let horizontal = vertical.clone().reshape([channels, 1, 1, k]);
        let options    = ConvOptions::new([1, 1], [0, 0], [1, 1], channels);

        let x = reflect_pad(images, 2, pad);
        let x = reflect_pad(x, 3, pad);
        let x = conv2d(x, vertical, None, options.clone());
        conv2d(x, horizontal, None, options)
    }
}

// ─── RandomAffine ─────────────────────────────────────────────────────────────

/// One draw of affine parameters. Translation is in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    pub angle:     f32,
    pub translate: (f32, f32),
    pub scale:     f32,
    pub shear:     (f32, f32),
}

impl AffineParams {
    /// Output → input mapping about the image centre, as a 2x3 matrix.
    fn inverse_matrix(&self) -> [f32; 6] {
        let rot = self.angle.to_radians();
        let sx  = self.shear.0.to_radians();
        let sy  = self.shear.1.to_radians();
        let (tx, ty) = self.translate;

        let a = (rot - sy).cos() / sy.cos();
        let b = -(rot - sy).cos() * sx.tan() / sy.cos() - rot.sin();
        let c = (rot - sy).sin() / sy.cos();
        let d = -(rot - sy).sin() * sx.tan() / sy.cos() + rot.cos();

        let mut m = [d, -b, 0.0, -c, a, 0.0].map(|v| v / self.scale);
        m[2] += m[0] * -tx + m[1] * -ty;
        m[5] += m[3] * -tx + m[4] * -ty;
        m
    }

    /// Flat source index for every output pixel, and a 0/1 mask marking
    /// pixels that fall outside the input.
    pub fn source_indices(&self, height: usize, width: usize) -> (Vec<i32>, Vec<f32>) {
        let m  = self.inverse_matrix();
        let cx = (width as f32 - 1.0) * 0.5;
        let cy = (height as f32 - 1.0) * 0.5;

        let mut index = Vec::with_capacity(height * width);
        let mut mask  = Vec::with_capacity(height * width);
        for row in 0..height {
            for col in 0..width {
                let x = col as f32 - cx;
                let y = row as f32 - cy;
                let src_col = (m[0] * x + m[1] * y + m[2] + cx).round();
                let src_row = (m[3] * x + m[4] * y + m[5] + cy).round();

                let inside = src_col >= 0.0
                    && src_row >= 0.0
                    && src_col < width as f32
                    && src_row < height as f32;
                if inside {
                    index.push(src_row as i32 * width as i32 + src_col as i32);
                    mask.push(1.0);
                } else {
                    index.push(0);
                    mask.push(0.0);
                }
            }
        }
        (index, mask)
    }
}

pub struct RandomAffine {
    degrees:   f32,
    translate: (f32, f32),
    scale:     (f32, f32),
    shear:     f32,
    rng:       StdRng,
}

impl RandomAffine {
    pub fn new(degrees: f32, translate: (f32, f32), scale: (f32, f32), shear: f32) -> Self {
        Self { degrees, translate, scale, shear, rng: StdRng::from_entropy() }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn uniform(&mut self, low: f32, high: f32) -> f32 {
        if high > low { self.rng.gen_range(low..=high) } else { low }
    }

    pub fn sample(&mut self, height: usize, width: usize) -> AffineParams {
        let angle = self.uniform(-self.degrees, self.degrees);
        let max_dx = self.translate.0 * width as f32;
        let max_dy = self.translate.1 * height as f32;
        let tx = self.uniform(-max_dx, max_dx).round();
        let ty = self.uniform(-max_dy, max_dy).round();
        let scale = self.uniform(self.scale.0, self.scale.1);
        let shear_x = self.uniform(-self.shear, self.shear);

        AffineParams { angle, translate: (tx, ty), scale, shear: (shear_x, 0.0) }
    }
}

/// Apply fixed affine parameters to a batch on its device.
pub fn warp<B: Backend>(images: Tensor<B, 4>, params: &AffineParams) -> Tensor<B, 4> {
    let [n, c, h, w] = images.dims();
    let device = images.device();
    let (index, mask) = params.source_indices(h, w);

    let index = Tensor::<B, 1, Int>::from_ints(index.as_slice(), &device);
    let mask  = Tensor::<B, 1>::from_floats(mask.as_slice(), &device).reshape([1, 1, h * w]);

    let flat = images.reshape([n, c, h * w]).select(2, index);
    (flat * mask).reshape([n, c, h, w])
}

impl<B: Backend> Transform<B> for RandomAffine {
    fn apply(&mut self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = images.dims();
        let params = self.sample(h, w);
        warp(images, &params)
    }
}

// ─── ToDtype ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ToDtype {
    pub precision: Precision,
    /// Divide by 255 first
    pub scale:     bool,
}

impl<B: Backend> Transform<B> for ToDtype {
    fn apply(&mut self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = if self.scale { images.div_scalar(255.0) } else { images };
        Autocast::new(self.precision, true).cast(x)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn values(x: Tensor<TestBackend, 4>) -> Vec<f32> {
        x.into_data().to_vec().unwrap()
    }

    fn identity() -> AffineParams {
        AffineParams { angle: 0.0, translate: (0.0, 0.0), scale: 1.0, shear: (0.0, 0.0) }
    }

    fn ramp(h: usize, w: usize) -> Tensor<TestBackend, 4> {
        let data: Vec<f32> = (0..h * w).map(|v| v as f32 + 1.0).collect();
        Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &Default::default())
            .reshape([1, 1, h, w])
    }

    #[test]
    fn test_default_sigma_and_kernel() {
        let blur = GaussianBlur::new(11);
        assert!((blur.sigma - 2.0).abs() < 1e-6);

        let k = blur.kernel_1d();
        assert_eq!(k.len(), 11);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[10]).abs() < 1e-7);
        assert!(k[5] > k[4]);
    }

    #[test]
    fn test_blur_preserves_constant_image() {
        let images = Tensor::<TestBackend, 4>::full([2, 3, 12, 12], 7.0, &Default::default());
        let out    = GaussianBlur::new(11).apply(images);
        assert_eq!(out.dims(), [2, 3, 12, 12]);
        for v in values(out) {
            assert!((v - 7.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_blur_smooths_a_spike() {
        let mut data = vec![0.0f32; 9 * 9];
        data[4 * 9 + 4] = 1.0;
        let images = Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &Default::default())
            .reshape([1, 1, 9, 9]);
        let out = values(GaussianBlur::new(3).apply(images));
        assert!(out[4 * 9 + 4] < 1.0);
        assert!(out[4 * 9 + 5] > 0.0);
        assert!((out.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_reflect_indices() {
        let idx: Vec<i32> = (-2..6).map(|i| reflect(i, 4)).collect();
        assert_eq!(idx, vec![2, 1, 0, 1, 2, 3, 2, 1]);
    }

    #[test]
    fn test_identity_affine_is_noop() {
        let images = ramp(5, 6);
        let out    = warp(images.clone(), &identity());
        assert_eq!(values(out), values(images));
    }

    #[test]
    fn test_translation_shifts_and_zero_fills() {
        let params = AffineParams { translate: (1.0, 0.0), ..identity() };
        let out    = values(warp(ramp(3, 4), &params));
        assert_eq!(
            out,
            vec![0.0, 1.0, 2.0, 3.0, 0.0, 5.0, 6.0, 7.0, 0.0, 9.0, 10.0, 11.0]
        );
    }

    #[test]
    fn test_sampled_params_stay_in_range() {
        let mut affine = RandomAffine::new(15.0, (0.1, 0.1), (0.9, 1.1), 10.0).with_seed(3);
        for _ in 0..50 {
            let p = affine.sample(28, 28);
            assert!(p.angle.abs() <= 15.0);
            assert!(p.translate.0.abs() <= 3.0 && p.translate.1.abs() <= 3.0);
            assert_eq!(p.translate.0, p.translate.0.round());
            assert!((0.9..=1.1).contains(&p.scale));
            assert!(p.shear.0.abs() <= 10.0);
            assert_eq!(p.shear.1, 0.0);
        }
    }

    #[test]
    fn test_random_affine_keeps_shape() {
        let mut affine = RandomAffine::new(15.0, (0.1, 0.1), (0.9, 1.1), 10.0).with_seed(1);
        let out = affine.apply(Tensor::<TestBackend, 4>::ones([4, 1, 28, 28], &Default::default()));
        assert_eq!(out.dims(), [4, 1, 28, 28]);
    }

    #[test]
    fn test_to_dtype_scales_and_rounds() {
        let images = Tensor::<TestBackend, 4>::full([1, 1, 2, 2], 255.0, &Default::default());
        let mut t  = ToDtype { precision: Precision::F16, scale: true };
        for v in values(t.apply(images)) {
            assert_eq!(v, 1.0);
        }
    }

    #[test]
    fn test_compose_runs_in_order() {
        let mut pipeline = Compose::<TestBackend>::new(vec![
            Box::new(ToDtype { precision: Precision::F32, scale: true }),
            Box::new(GaussianBlur::new(3)),
        ]);
        assert_eq!(pipeline.transforms.len(), 2);
        let out = pipeline.apply(Tensor::full([1, 1, 6, 6], 51.0, &Default::default()));
        for v in values(out) {
            assert!((v - 0.2).abs() < 1e-5);
        }
    }
}
