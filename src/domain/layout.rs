// ============================================================
// Layer 3 — Minibatch Layout
// ============================================================
// Describes the shape and validity of one packed minibatch.
//
// The grid is (parallel sequences × time steps). Each cell
// carries a set of flags:
//
//   SEQUENCE_START  first frame of an utterance
//   SEQUENCE_END    last frame of an utterance
//   NO_INPUT        padding; the consumer must never read it
//
// Flags are ORed, never overwritten: a one-frame utterance is
// START and END in the same cell.
//
// Example (3 channels, 5 steps, gap-packed):
//
//   channel 0:  S . . . E
//   channel 1:  S . E B -        B = start+end, - = no input
//   channel 2:  S E - - -
//
// Frame mode is the degenerate case: every frame is its own
// independent one-step sequence, so the grid is (frames × 1)
// and no flags are set.

use std::ops::{BitOr, BitOrAssign, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PackingFlags(u8);

impl PackingFlags {
    pub const NONE:           PackingFlags = PackingFlags(0);
    pub const SEQUENCE_START: PackingFlags = PackingFlags(1);
    pub const SEQUENCE_END:   PackingFlags = PackingFlags(1 << 1);
    pub const NO_INPUT:       PackingFlags = PackingFlags(1 << 2);

    pub fn contains(self, other: PackingFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PackingFlags {
    type Output = PackingFlags;

    fn bitor(self, rhs: PackingFlags) -> PackingFlags {
        PackingFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PackingFlags {
    fn bitor_assign(&mut self, rhs: PackingFlags) {
        self.0 |= rhs.0;
    }
}

// ─── MinibatchLayout ──────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinibatchLayout {
    num_parallel: usize,
    num_steps:    usize,
    sequential:   bool,
    /// Cell (s, t) lives at t * num_parallel + s, matching the
    /// time-major column order of the stream tensors.
    flags:        Vec<PackingFlags>,
    /// Declared sentence ranges per parallel sequence
    ranges:       Vec<Vec<Range<usize>>>,
}

impl MinibatchLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to an empty grid of the given shape.
    pub fn init(&mut self, num_parallel: usize, num_steps: usize, sequential: bool) {
        self.num_parallel = num_parallel;
        self.num_steps    = num_steps;
        self.sequential   = sequential;
        self.flags.clear();
        self.flags.resize(num_parallel * num_steps, PackingFlags::NONE);
        self.ranges.clear();
        self.ranges.resize(num_parallel, Vec::new());
    }

    /// One independent sequence per frame.
    pub fn init_frame_mode(&mut self, num_steps: usize) {
        self.init(num_steps, 1, false);
    }

    /// Each channel is one sequential row of `num_steps` cells.
    pub fn init_sequence_mode(&mut self, channels: usize, num_steps: usize) {
        self.init(channels, num_steps, true);
    }

    pub fn num_parallel_sequences(&self) -> usize {
        self.num_parallel
    }

    pub fn num_time_steps(&self) -> usize {
        self.num_steps
    }

    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    fn index(&self, channel: usize, step: usize) -> usize {
        debug_assert!(channel < self.num_parallel && step < self.num_steps);
        step * self.num_parallel + channel
    }

    /// OR a flag into one cell.
    pub fn set(&mut self, channel: usize, step: usize, flag: PackingFlags) {
        let i = self.index(channel, step);
        self.flags[i] |= flag;
    }

    pub fn get(&self, channel: usize, step: usize) -> PackingFlags {
        self.flags[self.index(channel, step)]
    }

    pub fn is_valid(&self, channel: usize, step: usize) -> bool {
        !self.get(channel, step).contains(PackingFlags::NO_INPUT)
    }

    /// Record `[start, end)` of a channel as frames of one utterance
    /// without flagging its ends. A truncated window uses this for the
    /// part of an utterance it holds.
    pub fn set_segment(&mut self, channel: usize, start: usize, end: usize) {
        if start >= end {
            return;
        }
        debug_assert!(
            self.ranges[channel].iter().all(|r| end <= r.start || start >= r.end),
            "sentence ranges of channel {channel} overlap"
        );
        self.ranges[channel].push(start..end);
    }

    /// Mark `[start, end)` of a channel as one whole utterance.
    pub fn set_sentence_range(&mut self, channel: usize, start: usize, end: usize) {
        if start >= end {
            return;
        }
        self.set_segment(channel, start, end);
        self.set(channel, start, PackingFlags::SEQUENCE_START);
        self.set(channel, end - 1, PackingFlags::SEQUENCE_END);
    }

    /// Mark `[start, end)` of a channel as padding.
    pub fn set_no_input(&mut self, channel: usize, start: usize, end: usize) {
        for step in start..end {
            self.set(channel, step, PackingFlags::NO_INPUT);
        }
    }

    /// Cells of a channel holding utterance frames, one range per
    /// utterance (or utterance piece in truncated mode), in placement
    /// order.
    pub fn sentence_ranges(&self, channel: usize) -> &[Range<usize>] {
        &self.ranges[channel]
    }

    /// Number of cells the consumer may read.
    pub fn valid_frame_count(&self) -> usize {
        self.flags
            .iter()
            .filter(|f| !f.contains(PackingFlags::NO_INPUT))
            .count()
    }

    /// Validity of every cell in tensor column order.
    pub fn validity_mask(&self) -> Vec<bool> {
        self.flags
            .iter()
            .map(|f| !f.contains(PackingFlags::NO_INPUT))
            .collect()
    }

    /// One text row per parallel sequence, e.g. `S..E-`.
    pub fn render(&self) -> Vec<String> {
        (0..self.num_parallel)
            .map(|s| {
                (0..self.num_steps)
                    .map(|t| {
                        let f     = self.get(s, t);
                        let start = f.contains(PackingFlags::SEQUENCE_START);
                        let end   = f.contains(PackingFlags::SEQUENCE_END);
                        match (f.contains(PackingFlags::NO_INPUT), start, end) {
                            (true, _, _)         => '-',
                            (false, true, true)  => 'B',
                            (false, true, false) => 'S',
                            (false, false, true) => 'E',
                            _                    => '.',
                        }
                    })
                    .collect()
            })
            .collect()
    }
}
