// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the file system:
//
//   config_store.rs — Run configuration persistence
//                     Saves/loads SimulateConfig as pretty JSON
//                     and reads the label-to-target mapping
//                     files a reader configuration points at.
//
//   metrics.rs      — Epoch metrics logging
//                     Writes per-epoch packing statistics
//                     (minibatches, valid and padding frames,
//                     gap-packed utterances) to a CSV file.
//
// The packing core never does I/O itself; it is handed texts
// and utterances by this layer and the application layer.
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Rust Book §12 (I/O and File Handling)

/// Run configuration JSON and mapping files
pub mod config_store;

/// Epoch metrics CSV logger
pub mod metrics;
