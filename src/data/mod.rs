// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer turns a stream of variable-length utterances into
// fixed-shape minibatches.
//
// The pipeline flows in this order:
//
//   UtteranceSource     → hands out one utterance at a time
//       │
//       ▼
//   UtteranceRefill     → loads the next utterance into a channel
//       │
//       ▼
//   ChannelBuffer       → per-channel frames + progress + state
//       │
//       ▼
//   Frame / Bptt / Write packer
//                       → places channel frames into the arena
//                         and records the layout
//       │
//       ▼
//   MinibatchArena      → per-stream staging matrices
//       │
//       ▼
//   MinibatchReader     → start_loop / get_minibatch surface
//
// Reference: Rust Book §13 (Iterators and Closures)

/// Named per-stream frame storage of one utterance
pub mod stream_buffer;

/// One parallel channel and its progress
pub mod channel;

/// Loads utterances into channels
pub mod refill;

/// Minibatch staging matrices
pub mod arena;

/// Whole-utterance and frame-mode packing, with gap-packing
pub mod frame_packer;

/// Truncated back-propagation-through-time packing
pub mod bptt_packer;

/// One utterance per minibatch for writing outputs
pub mod write_packer;

/// The public minibatch reader
pub mod reader;

/// In-memory utterance source
pub mod source;

/// Synthetic corpus generation
pub mod synthetic;
