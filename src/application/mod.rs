// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer drives the reader through whole workflows.
//
// Rules for this layer:
//   - No packing logic here (that's Layer 4)
//   - No printing here (that's Layer 1)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Runs epochs and collects packing metrics
pub mod simulate_use_case;

// Renders the layouts of the first minibatches
pub mod inspect_use_case;
