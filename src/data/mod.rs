// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from image files on disk to device tensor batches.
//
//   FashionMNIST idx files        SyntheticImages
//   (downloaded on first use)     (generated, offline)
//       │                              │
//       └──────────────┬───────────────┘
//                      ▼
//   ImageSource  → Vec<ImageItem>
//       │
//       ▼
//   ImageDataset     → implements Burn's Dataset trait
//       │
//       ▼
//   ShardedDataset   → this rank's slice (multi-process only)
//       │
//       ▼
//   ImageBatcher     → host bytes → device tensors
//       │
//       ▼
//   DataLoader       → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// FashionMNIST download and idx parsing
pub mod fashion_mnist;

/// Deterministic generated images for tests and offline runs
pub mod synthetic;

/// Implements Burn's Dataset trait for images
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Rank-partitioned dataset view
pub mod sampler;
