// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns shared by the recipes:
//
//   dist/          — Process group for data-parallel training
//                    Environment defaults, one thread per rank on
//                    burn's collective server (all-reduce /
//                    broadcast / barrier), and the rank-zero
//                    print0! / warn0! macros.
//
//   checkpoint.rs  — Best-checkpoint tracking
//                    Keeps the weights of the lowest-loss epoch
//                    in a temporary directory, using Burn's
//                    named MessagePack recorder.
//
//   metrics.rs     — Training metrics logging
//                    Writes epoch-level metrics (loss, skipped
//                    steps, loss scale) to a CSV file.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Process group, collectives and rank-zero gating macros
#[macro_use]
pub mod dist;

/// Best-loss checkpoint tracking
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
