// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The packer never reads files itself. Whole utterances arrive
// from an external source through a narrow, strictly sequential
// pull protocol:
//
//   has_more() → current_*() / feature_frames() / ... → advance()
//
// The source may randomise, page from disk or prefetch on other
// threads internally; the packer only ever sees one ordered
// stream of utterances.
//
// Implementations:
//   - MemoryUtteranceSource → utterances held in memory
//   - (future) an HTK/MLF backed block-randomised source

use std::sync::Arc;

use crate::domain::error::ReaderResult;

// ─── Lattice Side Data ────────────────────────────────────────────────────────
/// Opaque denominator lattice attached to an utterance for
/// sequence-level training. The archive format belongs to the
/// source; the packer only carries the handle along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lattice {
    pub key:  String,
    pub data: Vec<u8>,
}

/// Shared so that channel buffers and the aux output can both
/// hold the same lattice without copying it.
pub type LatticeHandle = Arc<Lattice>;

// ─── Frame View ───────────────────────────────────────────────────────────────
/// Borrowed frame matrix: `frames × dim` values, frame-major.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub dim:  usize,
    pub data: &'a [f32],
}

impl<'a> FrameView<'a> {
    pub fn new(dim: usize, data: &'a [f32]) -> Self {
        Self { dim, data }
    }

    pub fn frames(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }
}

// ─── Epoch Request ────────────────────────────────────────────────────────────
/// What the reader asks of the source at the start of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochRequest {
    pub epoch:          usize,
    /// Frames per minibatch (frame mode) or truncation length
    pub minibatch_size: usize,
    pub subset_index:   usize,
    pub num_subsets:    usize,
    /// Frames to serve this epoch, already adjusted for the
    /// partial-minibatch policy
    pub epoch_samples:  usize,
    /// Serve independent frame blocks instead of utterances
    pub frame_mode:     bool,
}

// ─── UtteranceSource ──────────────────────────────────────────────────────────
pub trait UtteranceSource {
    /// Position the source at the first utterance of an epoch.
    fn begin_epoch(&mut self, request: &EpochRequest) -> ReaderResult<()>;

    /// Frames in one full sweep over the data.
    fn total_frames(&self) -> usize;

    /// True while a current utterance is available.
    fn has_more(&self) -> bool;

    /// Frame count of the current utterance (may be zero).
    fn current_frame_count(&self) -> usize;

    /// Frames of one feature stream of the current utterance.
    fn feature_frames(&self, stream: usize) -> FrameView<'_>;

    /// Label indices of one category stream of the current utterance.
    fn label_indices(&self, stream: usize) -> &[usize];

    fn has_lattice(&self) -> bool;

    fn lattice(&self) -> Option<LatticeHandle>;

    fn phone_boundaries(&self) -> &[usize];

    /// Move to the next utterance.
    fn advance(&mut self);
}
