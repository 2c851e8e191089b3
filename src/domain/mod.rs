// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types shared by every recipe.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or network calls
//   - Only plain structs, enums, and traits
//
// The ML layer turns these into tensors; the data layer
// produces them from disk or from a generator.

// Numeric precision used by autocast and ToDtype
pub mod precision;

// A single labelled grayscale image
pub mod image;

// Core abstractions (traits) that other layers implement
pub mod traits;
