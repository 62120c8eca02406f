// ============================================================
// Layer 5 — ML Layer (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code.
// No other layer imports from burn directly — only this one.
//
// What's in this layer:
//
//   batch.rs     — Converts a packed minibatch (stream matrices
//                  plus its layout) into Burn tensors:
//                  • features  [steps, parallel, dim]
//                  • targets   [steps, parallel, dim]
//                  • mask      [steps, parallel]  (Int)
//                  • starts    [steps, parallel]  (Int)
//
// Reference: Burn Book §4 (Datasets and Batchers)

/// Packed minibatch → Burn tensors
pub mod batch;
