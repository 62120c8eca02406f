// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types that define what the packer talks about:
// streams, layouts, the utterance source contract, errors and
// configuration.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O (texts are handed in by the caller)
//   - Only plain Rust structs, enums, and traits

/// Reader configuration (serde, JSON)
pub mod config;

/// Typed errors of the packing core
pub mod error;

/// Label → target vector mapping
pub mod label_map;

/// Per-cell sequence flags of one minibatch
pub mod layout;

/// Stream identities and the name → id registry
pub mod stream;

/// The utterance source pull protocol
pub mod traits;
