// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds or transforms tensors.
//
//   model.rs     — LinearStack (AMP recipe) and ExampleModel
//                  (single linear layer over flattened images)
//
//   amp.rs       — Autocast (reduced-precision activations) and
//                  GradScaler (dynamic loss scaling)
//
//   augment.rs   — Device-resident transforms: GaussianBlur,
//                  RandomAffine, ToDtype, Compose
//
//   parallel.rs  — DataParallel: weight broadcast from rank 0
//                  and gradient averaging across ranks, on
//                  burn's collective operations
//
//   compile.rs   — Kernel warm-up before training, best-effort
//
//   params.rs    — Parameter listing and the flat gradient
//                  bucket the scaler rounds and unscales
//
//   host.rs      — Tensor ↔ host Vec<f32> helpers
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Micikevicius et al. (2018) Mixed Precision Training

/// Model architectures
pub mod model;

/// Autocast and gradient scaling
pub mod amp;

/// Image transforms on device tensors
pub mod augment;

/// Data-parallel replica synchronisation
pub mod parallel;

/// Warm-up compilation
pub mod compile;

/// Parameter and gradient plumbing
pub mod params;

/// Host transfer helpers
pub mod host;
