// ============================================================
// Layer 4 — Channel Buffer
// ============================================================
// One parallel-sequence slot of the minibatch. A channel holds
// the ENTIRE current utterance for every stream, plus a cursor
// recording how many of its frames have already been handed
// out:
//
//   frames:     0 1 2 3 4 5 6 7 8 9
//                           ▲
//                   processed_frames = 6
//
//   remaining = total_frames - processed_frames = 4
//
// "remaining" is the single notion of emptiness: a channel whose
// utterance has been fully consumed and could not be refilled
// simply reports zero remaining frames.

use crate::data::stream_buffer::{FrameElement, NamedStreamBuffer};
use crate::domain::stream::{StreamId, StreamKind, StreamRegistry};
use crate::domain::traits::LatticeHandle;

/// Truncated-mode progress of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// A fresh utterance is loaded and nothing has been emitted yet
    Filling,
    /// The held utterance continues in the next window
    Continuing,
    /// A new utterance began inside the last window
    Switching,
    /// The source ran dry; nothing more will arrive
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ChannelBuffer<E> {
    features:         Vec<NamedStreamBuffer<E>>,
    labels:           Vec<NamedStreamBuffer<E>>,
    /// Start of the utterance inside each stream buffer.
    /// Every stream owns its own buffer, so these stay 0.
    feature_offsets:  Vec<usize>,
    label_offsets:    Vec<usize>,
    pub(crate) total_frames:     usize,
    pub(crate) processed_frames: usize,
    pub(crate) state:            ChannelState,
    pub(crate) lattice:          Option<LatticeHandle>,
    pub(crate) phone_boundaries: Vec<usize>,
    pub(crate) label_ids:        Vec<usize>,
}

impl<E: FrameElement> ChannelBuffer<E> {
    /// One empty buffer per registered stream.
    pub fn new(registry: &StreamRegistry) -> Self {
        let n_feat  = registry.features().len();
        let n_label = registry.labels().len();
        Self {
            features:         (0..n_feat).map(|_| NamedStreamBuffer::new()).collect(),
            labels:           (0..n_label).map(|_| NamedStreamBuffer::new()).collect(),
            feature_offsets:  vec![0; n_feat],
            label_offsets:    vec![0; n_label],
            total_frames:     0,
            processed_frames: 0,
            state:            ChannelState::Filling,
            lattice:          None,
            phone_boundaries: Vec::new(),
            label_ids:        Vec::new(),
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn processed_frames(&self) -> usize {
        self.processed_frames
    }

    pub fn remaining(&self) -> usize {
        self.total_frames - self.processed_frames
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn lattice(&self) -> Option<&LatticeHandle> {
        self.lattice.as_ref()
    }

    pub fn phone_boundaries(&self) -> &[usize] {
        &self.phone_boundaries
    }

    pub fn label_ids(&self) -> &[usize] {
        &self.label_ids
    }

    /// Hand out `frames` more frames of the held utterance.
    pub fn consume(&mut self, frames: usize) {
        debug_assert!(frames <= self.remaining());
        self.processed_frames += frames;
    }

    /// Mark the whole held utterance as handed out.
    pub fn consume_all(&mut self) {
        self.processed_frames = self.total_frames;
    }

    pub fn stream(&self, id: StreamId) -> &NamedStreamBuffer<E> {
        match id.kind {
            StreamKind::Real     => &self.features[id.index],
            StreamKind::Category => &self.labels[id.index],
        }
    }

    pub(crate) fn stream_mut(&mut self, id: StreamId) -> &mut NamedStreamBuffer<E> {
        match id.kind {
            StreamKind::Real     => &mut self.features[id.index],
            StreamKind::Category => &mut self.labels[id.index],
        }
    }

    pub fn start_offset(&self, id: StreamId) -> usize {
        match id.kind {
            StreamKind::Real     => self.feature_offsets[id.index],
            StreamKind::Category => self.label_offsets[id.index],
        }
    }

    /// Values of frame `frame` of a stream.
    pub fn frame(&self, id: StreamId, dim: usize, frame: usize) -> &[E] {
        self.stream(id).slice(self.start_offset(id) + frame * dim, dim)
    }
}
