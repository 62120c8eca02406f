// ============================================================
// Layer 4 — In-Memory Utterance Source
// ============================================================
// Implements the UtteranceSource pull protocol over utterances
// held in memory. Used by the simulator and by every packer test.
//
// One "sweep" is one pass over the whole corpus. The source
// walks sweep after sweep until the epoch's frame budget is
// spent:
//
//   sweep 0: u3 u0 u4 u1 u2 │ sweep 1: u1 u4 u0 ...
//            ───────────────┴──────────▶ budget reached → done
//
// Order within a sweep is either sequential or shuffled with a
// seed derived from (seed, epoch, sweep), so a run is fully
// reproducible.
//
// Partitions: every worker walks the SAME global order. Order
// position k belongs to partition k % num_subsets. Frames of
// other partitions still count against the budget, so all
// workers end the epoch at the same global position.
//
// Frame mode: instead of whole utterances the source serves
// blocks of exactly `minibatch_size` frames cut across utterance
// boundaries (only the last block of an epoch may be shorter).
// Blocks never carry lattice data.
//
// Empty utterances are passed through untouched; skipping them
// is the reader's job.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::domain::error::{ReaderError, ReaderResult};
use crate::domain::traits::{EpochRequest, FrameView, Lattice, LatticeHandle, UtteranceSource};

// ─── FrameMatrix ──────────────────────────────────────────────────────────────
/// Owned `frames × dim` matrix, frame-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMatrix {
    dim:  usize,
    data: Vec<f32>,
}

impl FrameMatrix {
    pub fn new(dim: usize, data: Vec<f32>) -> Self {
        debug_assert!(dim == 0 || data.len() % dim == 0);
        Self { dim, data }
    }

    pub fn with_capacity(dim: usize, frames: usize) -> Self {
        Self { dim, data: Vec::with_capacity(dim * frames) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn frames(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn row(&self, frame: usize) -> &[f32] {
        &self.data[frame * self.dim..(frame + 1) * self.dim]
    }

    /// Append frames `[start, end)` of another matrix.
    pub fn extend_rows(&mut self, other: &FrameMatrix, start: usize, end: usize) {
        self.data.extend_from_slice(&other.data[start * other.dim..end * other.dim]);
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView::new(self.dim, &self.data)
    }
}

// ─── Utterance ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub key:              String,
    /// One matrix per feature stream
    pub features:         Vec<FrameMatrix>,
    /// One label index per frame, per label stream
    pub labels:           Vec<Vec<usize>>,
    pub lattice:          Option<LatticeHandle>,
    pub phone_boundaries: Vec<usize>,
}

impl Utterance {
    pub fn new(key: impl Into<String>, features: Vec<FrameMatrix>, labels: Vec<Vec<usize>>) -> Self {
        Self {
            key: key.into(),
            features,
            labels,
            lattice: None,
            phone_boundaries: Vec::new(),
        }
    }

    /// Attach lattice side data, keyed by the utterance key.
    pub fn with_lattice(mut self, data: Vec<u8>, phone_boundaries: Vec<usize>) -> Self {
        self.lattice = Some(LatticeHandle::new(Lattice { key: self.key.clone(), data }));
        self.phone_boundaries = phone_boundaries;
        self
    }

    pub fn frames(&self) -> usize {
        match (self.features.first(), self.labels.first()) {
            (Some(f), _)    => f.frames(),
            (None, Some(l)) => l.len(),
            (None, None)    => 0,
        }
    }
}

// ─── MemoryUtteranceSource ────────────────────────────────────────────────────
#[derive(Debug, Clone)]
enum Current {
    /// Index into the corpus
    Whole(usize),
    /// Frame-mode block assembled across utterances
    Block(Utterance),
}

#[derive(Debug, Clone)]
pub struct MemoryUtteranceSource {
    utterances:   Vec<Utterance>,
    total_frames: usize,
    seed:         Option<u64>,
    request:      Option<EpochRequest>,
    order:        Vec<usize>,
    sweep:        usize,
    pos:          usize,
    /// Frames of `order[pos]` already cut into blocks (frame mode)
    offset:       usize,
    /// Global frames accounted for this epoch
    served:       usize,
    current:      Option<Current>,
}

impl MemoryUtteranceSource {
    /// Sequential order in every sweep.
    pub fn new(utterances: Vec<Utterance>) -> Self {
        let total_frames = utterances.iter().map(Utterance::frames).sum();
        Self {
            utterances,
            total_frames,
            seed:    None,
            request: None,
            order:   Vec::new(),
            sweep:   0,
            pos:     0,
            offset:  0,
            served:  0,
            current: None,
        }
    }

    /// Shuffle every sweep with a seed derived from `seed`.
    pub fn shuffled(utterances: Vec<Utterance>, seed: u64) -> Self {
        Self { seed: Some(seed), ..Self::new(utterances) }
    }

    /// Frames handed to this worker or skipped for other partitions
    /// since the epoch began.
    pub fn epoch_frames(&self) -> usize {
        self.served
    }

    fn start_sweep(&mut self, sweep: usize) {
        self.sweep = sweep;
        self.pos = 0;
        self.offset = 0;
        self.order = (0..self.utterances.len()).collect();
        if let (Some(seed), Some(req)) = (self.seed, &self.request) {
            let mixed = seed
                ^ (req.epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
                ^ (sweep as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
            let mut rng = StdRng::seed_from_u64(mixed);
            self.order.shuffle(&mut rng);
        }
    }

    fn budget(&self) -> usize {
        self.request.map(|r| r.epoch_samples).unwrap_or(0)
    }

    fn owns(&self, pos: usize) -> bool {
        match &self.request {
            Some(r) => pos % r.num_subsets == r.subset_index,
            None    => false,
        }
    }

    /// Position on the next utterance of this partition.
    fn load_whole(&mut self) {
        self.current = None;
        if self.total_frames == 0 {
            return;
        }
        while self.served < self.budget() {
            if self.pos == self.order.len() {
                self.start_sweep(self.sweep + 1);
            }
            let idx = self.order[self.pos];
            if self.owns(self.pos) {
                self.current = Some(Current::Whole(idx));
                return;
            }
            self.served += self.utterances[idx].frames();
            self.pos += 1;
        }
    }

    /// Cut the next block of up to `minibatch_size` frames.
    fn load_block(&mut self) {
        self.current = None;
        let Some(req) = self.request else { return };
        if self.total_frames == 0 || self.utterances.is_empty() {
            return;
        }

        let template = &self.utterances[0];
        let mut block = Utterance::new(
            "block",
            template
                .features
                .iter()
                .map(|f| FrameMatrix::with_capacity(f.dim(), req.minibatch_size))
                .collect(),
            vec![Vec::with_capacity(req.minibatch_size); template.labels.len()],
        );
        let mut filled = 0;

        while filled < req.minibatch_size && self.served < self.budget() {
            if self.pos == self.order.len() {
                self.start_sweep(self.sweep + 1);
            }
            let utt = &self.utterances[self.order[self.pos]];
            let n   = utt.frames();
            if !self.owns(self.pos) {
                self.served += n - self.offset;
                self.pos += 1;
                self.offset = 0;
                continue;
            }

            let take = (n - self.offset)
                .min(req.minibatch_size - filled)
                .min(self.budget() - self.served);
            let (start, end) = (self.offset, self.offset + take);
            for (dst, src) in block.features.iter_mut().zip(&utt.features) {
                dst.extend_rows(src, start, end);
            }
            for (dst, src) in block.labels.iter_mut().zip(&utt.labels) {
                dst.extend_from_slice(&src[start..end]);
            }

            filled += take;
            self.served += take;
            self.offset += take;
            if self.offset == n {
                self.pos += 1;
                self.offset = 0;
            }
        }

        if filled > 0 {
            self.current = Some(Current::Block(block));
        }
    }

    fn current_utterance(&self) -> Option<&Utterance> {
        match &self.current {
            Some(Current::Whole(idx)) => Some(&self.utterances[*idx]),
            Some(Current::Block(b))   => Some(b),
            None                      => None,
        }
    }
}

impl UtteranceSource for MemoryUtteranceSource {
    fn begin_epoch(&mut self, request: &EpochRequest) -> ReaderResult<()> {
        if request.num_subsets == 0 || request.subset_index >= request.num_subsets {
            return Err(ReaderError::InvalidPartition {
                subset:      request.subset_index,
                num_subsets: request.num_subsets,
            });
        }
        if request.frame_mode && request.minibatch_size == 0 {
            return Err(ReaderError::ZeroMinibatchSize);
        }

        self.request = Some(*request);
        self.served = 0;
        self.start_sweep(0);
        if request.frame_mode {
            self.load_block();
        } else {
            self.load_whole();
        }

        tracing::debug!(
            "Source epoch {}: {} utterances, {} frames per sweep, budget {}",
            request.epoch,
            self.utterances.len(),
            self.total_frames,
            request.epoch_samples,
        );
        Ok(())
    }

    fn total_frames(&self) -> usize {
        self.total_frames
    }

    fn has_more(&self) -> bool {
        self.current.is_some()
    }

    fn current_frame_count(&self) -> usize {
        self.current_utterance().map(Utterance::frames).unwrap_or(0)
    }

    fn feature_frames(&self, stream: usize) -> FrameView<'_> {
        match self.current_utterance().and_then(|u| u.features.get(stream)) {
            Some(m) => m.view(),
            None    => FrameView::new(0, &[]),
        }
    }

    fn label_indices(&self, stream: usize) -> &[usize] {
        self.current_utterance()
            .and_then(|u| u.labels.get(stream))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn has_lattice(&self) -> bool {
        self.current_utterance().is_some_and(|u| u.lattice.is_some())
    }

    fn lattice(&self) -> Option<LatticeHandle> {
        self.current_utterance().and_then(|u| u.lattice.clone())
    }

    fn phone_boundaries(&self) -> &[usize] {
        self.current_utterance()
            .map(|u| u.phone_boundaries.as_slice())
            .unwrap_or(&[])
    }

    fn advance(&mut self) {
        match self.current.take() {
            Some(Current::Whole(idx)) => {
                self.served += self.utterances[idx].frames();
                self.pos += 1;
                self.load_whole();
            }
            Some(Current::Block(_)) => self.load_block(),
            None => {}
        }
    }
}
