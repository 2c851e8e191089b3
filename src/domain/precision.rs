// ============================================================
// Layer 3 — Precision
// ============================================================
// The floating point formats a recipe can compute in.
//
//   F32  — full precision, 8 exponent bits, 23 mantissa bits
//   F16  — IEEE half, 5 exponent bits, max finite value 65504
//   BF16 — bfloat16, f32 exponent range with 7 mantissa bits
//
// Tensors in this crate are always stored as f32. Reduced
// precision is emulated by rounding each value to the nearest
// representable half/bfloat value and widening it back, which
// reproduces both the rounding error and the overflow to ±inf
// that real half-precision kernels exhibit.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Precision {
    #[default]
    F32,
    F16,
    BF16,
}

impl Precision {
    /// Round a single value to this precision and widen it back to f32.
    pub fn round(self, value: f32) -> f32 {
        match self {
            Precision::F32  => value,
            Precision::F16  => half::f16::from_f32(value).to_f32(),
            Precision::BF16 => half::bf16::from_f32(value).to_f32(),
        }
    }

    /// Round every value in place.
    pub fn round_slice(self, values: &mut [f32]) {
        if self == Precision::F32 {
            return;
        }
        for v in values.iter_mut() {
            *v = self.round(*v);
        }
    }

    pub fn is_reduced(self) -> bool {
        self != Precision::F32
    }

    pub fn name(self) -> &'static str {
        match self {
            Precision::F32  => "float32",
            Precision::F16  => "float16",
            Precision::BF16 => "bfloat16",
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
