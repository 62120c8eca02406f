// ============================================================
// Layer 4 — Truncated BPTT Packer
// ============================================================
// Produces fixed (channels × T) windows for recurrent training.
// Each channel walks its utterance T frames per call and carries
// straight on into the next utterance when one ends mid-window:
//
//   T = 4, utterances A (10 frames) then B (3 frames):
//
//   call 1:  A0 A1 A2 A3        S . . .
//   call 2:  A4 A5 A6 A7        . . . .
//   call 3:  A8 A9 B0 B1        . E S .
//   call 4:  B2 -- -- --        E - - -   (source dry)
//
// Per channel, from cursor p:
//   remaining > T  → copy [p, p+T), START at 0 if p == 0
//   remaining ≤ T  → copy the tail, END at its last frame, then
//                    refill and keep filling the window with
//                    fresh utterances (START at each), or mark
//                    the rest NO_INPUT once the source is dry
//
// A refill that lands exactly at the window edge leaves the new
// utterance untouched for the next call.

use crate::data::arena::{MinibatchArena, PackInput};
use crate::data::channel::{ChannelBuffer, ChannelState};
use crate::data::refill::UtteranceRefill;
use crate::data::stream_buffer::FrameElement;
use crate::domain::error::{ReaderError, ReaderResult};
use crate::domain::layout::{MinibatchLayout, PackingFlags};
use crate::domain::stream::StreamRegistry;
use crate::domain::traits::UtteranceSource;

#[derive(Debug, Clone)]
pub struct BpttPacker<E> {
    channels:   Vec<ChannelBuffer<E>>,
    refill:     UtteranceRefill,
    arena:      MinibatchArena<E>,
    layout:     MinibatchLayout,
    truncation: usize,
}

impl<E: FrameElement> BpttPacker<E> {
    pub fn new(registry: &StreamRegistry, channels: usize, truncation: usize) -> ReaderResult<Self> {
        if truncation == 0 {
            return Err(ReaderError::ZeroMinibatchSize);
        }
        Ok(Self {
            channels:   (0..channels).map(|_| ChannelBuffer::new(registry)).collect(),
            refill:     UtteranceRefill::new(),
            arena:      MinibatchArena::new(),
            layout:     MinibatchLayout::new(),
            truncation,
        })
    }

    pub fn begin<S: UtteranceSource>(
        &mut self,
        registry: &StreamRegistry,
        source:   &mut S,
    ) -> ReaderResult<()> {
        self.refill.start(registry, source, &mut self.channels)
    }

    pub fn layout(&self) -> &MinibatchLayout {
        &self.layout
    }

    pub fn arena(&self) -> &MinibatchArena<E> {
        &self.arena
    }

    pub fn channels(&self) -> &[ChannelBuffer<E>] {
        &self.channels
    }

    /// Assemble the next window; Ok(false) at end of epoch.
    pub fn next<S: UtteranceSource>(&mut self, input: PackInput<'_, S>) -> ReaderResult<bool> {
        let PackInput { registry, source, requested } = input;
        let Self { channels, refill, arena, layout, truncation } = self;
        let t = *truncation;

        if refill.no_more_data() && channels.iter().all(|c| c.remaining() == 0) {
            return Ok(false);
        }

        layout.init_sequence_mode(channels.len(), t);
        arena.prepare(requested, t, channels.len());

        for (i, channel) in channels.iter_mut().enumerate() {
            let p   = channel.processed_frames();
            let rem = channel.remaining();

            if rem > t {
                arena.place(requested, channel, p, t, i, 0);
                layout.set_segment(i, 0, t);
                if p == 0 {
                    layout.set(i, 0, PackingFlags::SEQUENCE_START);
                }
                channel.consume(t);
                channel.state = ChannelState::Continuing;
                continue;
            }

            if rem > 0 {
                arena.place(requested, channel, p, rem, i, 0);
                layout.set_segment(i, 0, rem);
                if p == 0 {
                    layout.set(i, 0, PackingFlags::SEQUENCE_START);
                }
                layout.set(i, rem - 1, PackingFlags::SEQUENCE_END);
                channel.consume(rem);
            }

            let mut offset = rem;
            loop {
                if !refill.refill(registry, source, channel)? {
                    layout.set_no_input(i, offset, t);
                    channel.state = ChannelState::Exhausted;
                    break;
                }
                if offset == t {
                    break;
                }

                let avail = channel.total_frames();
                let taken = avail.min(t - offset);
                arena.place(requested, channel, 0, taken, i, offset);
                layout.set_segment(i, offset, offset + taken);
                layout.set(i, offset, PackingFlags::SEQUENCE_START);
                channel.consume(taken);
                channel.state = ChannelState::Switching;

                if taken < avail {
                    break;
                }
                layout.set(i, offset + taken - 1, PackingFlags::SEQUENCE_END);
                offset += taken;
            }
        }

        tracing::debug!(
            "Truncated window: {} channels x {} steps, {} valid frames",
            channels.len(),
            t,
            layout.valid_frame_count(),
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::{MemoryUtteranceSource, Utterance};
    use crate::data::synthetic::ramp_utterance;
    use crate::domain::stream::RequestedStream;
    use crate::domain::traits::EpochRequest;

    struct Rig {
        registry:  StreamRegistry,
        source:    MemoryUtteranceSource,
        requested: Vec<RequestedStream>,
        packer:    BpttPacker<f32>,
    }

    impl Rig {
        fn new(lengths: &[usize], channels: usize, truncation: usize) -> Self {
            let mut registry = StreamRegistry::new();
            registry.add_feature("features", 1).unwrap();
            registry.add_label("labels", 2, None).unwrap();
            let requested = registry.resolve(&["features".to_string()]).unwrap();

            let utts: Vec<Utterance> = lengths
                .iter()
                .enumerate()
                .map(|(i, &n)| ramp_utterance(format!("u{i}"), i, n, &[1], &[2]))
                .collect();
            let mut source = MemoryUtteranceSource::new(utts);
            let request = EpochRequest {
                epoch:          0,
                minibatch_size: truncation,
                subset_index:   0,
                num_subsets:    1,
                epoch_samples:  source.total_frames(),
                frame_mode:     false,
            };
            source.begin_epoch(&request).unwrap();

            let mut packer = BpttPacker::new(&registry, channels, truncation).unwrap();
            packer.begin(&registry, &mut source).unwrap();
            Self { registry, source, requested, packer }
        }

        fn next(&mut self) -> bool {
            self.packer
                .next(PackInput {
                    registry:  &self.registry,
                    source:    &mut self.source,
                    requested: &self.requested,
                })
                .unwrap()
        }

        fn row(&self, channel: usize) -> Vec<f32> {
            let layout = self.packer.layout();
            let values = self.packer.arena().stream(0);
            (0..layout.num_time_steps())
                .map(|t| values[t * layout.num_parallel_sequences() + channel])
                .collect()
        }
    }

    #[test]
    fn test_window_walks_utterance_then_pads() {
        let mut rig = Rig::new(&[10], 1, 4);

        assert!(rig.next());
        assert_eq!(rig.packer.layout().render(), vec!["S..."]);
        assert_eq!(rig.packer.layout().sentence_ranges(0), &[0..4]);
        assert_eq!(rig.row(0), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(rig.packer.channels()[0].state(), ChannelState::Continuing);

        assert!(rig.next());
        assert_eq!(rig.packer.layout().render(), vec!["...."]);
        assert_eq!(rig.row(0), vec![4.0, 5.0, 6.0, 7.0]);

        assert!(rig.next());
        assert_eq!(rig.packer.layout().render(), vec![".E--"]);
        assert_eq!(rig.row(0), vec![8.0, 9.0, 0.0, 0.0]);
        assert_eq!(rig.packer.channels()[0].state(), ChannelState::Exhausted);

        assert!(!rig.next());
    }

    #[test]
    fn test_next_utterance_starts_mid_window() {
        let mut rig = Rig::new(&[10, 3], 1, 4);
        rig.next();
        rig.next();

        assert!(rig.next());
        assert_eq!(rig.packer.layout().render(), vec![".ES."]);
        assert_eq!(rig.packer.layout().sentence_ranges(0), &[0..2, 2..4]);
        assert_eq!(rig.row(0), vec![8.0, 9.0, 1000.0, 1001.0]);
        assert_eq!(rig.packer.channels()[0].state(), ChannelState::Switching);

        assert!(rig.next());
        assert_eq!(rig.packer.layout().render(), vec!["E---"]);
        assert_eq!(rig.packer.layout().sentence_ranges(0), &[0..1]);
        assert_eq!(rig.row(0), vec![1002.0, 0.0, 0.0, 0.0]);

        assert!(!rig.next());
    }

    #[test]
    fn test_short_utterances_chain_inside_one_window() {
        let mut rig = Rig::new(&[2, 1, 3], 1, 4);
        assert!(rig.next());
        // u0 fills [0,2), u1 is a single frame at 2, u2 starts at 3
        assert_eq!(rig.packer.layout().render(), vec!["SEBS"]);
        assert_eq!(rig.packer.layout().sentence_ranges(0), &[0..2, 2..3, 3..4]);
        assert_eq!(rig.row(0), vec![0.0, 1.0, 1000.0, 2000.0]);
        assert!(rig.next());
        assert_eq!(rig.packer.layout().render(), vec![".E--"]);
        assert!(!rig.next());
    }

    #[test]
    fn test_window_edge_refill_waits_for_next_call() {
        let mut rig = Rig::new(&[4, 2], 1, 4);
        assert!(rig.next());
        assert_eq!(rig.packer.layout().render(), vec!["S..E"]);
        assert_eq!(rig.packer.channels()[0].processed_frames(), 0);
        assert!(rig.next());
        assert_eq!(rig.packer.layout().render(), vec!["SE--"]);
        assert!(!rig.next());
    }

    #[test]
    fn test_channels_reconstruct_their_utterances() {
        let lengths = [9, 3, 5, 1, 7, 2, 6];
        let mut rig = Rig::new(&lengths, 3, 4);
        let mut streams: Vec<Vec<f32>> = vec![Vec::new(); 3];
        let mut starts = 0;
        let mut ends = 0;

        while rig.next() {
            let layout = rig.packer.layout();
            for (ch, stream) in streams.iter_mut().enumerate() {
                let row = rig.row(ch);
                for (t, v) in row.into_iter().enumerate() {
                    let flags = layout.get(ch, t);
                    starts += flags.contains(PackingFlags::SEQUENCE_START) as usize;
                    ends += flags.contains(PackingFlags::SEQUENCE_END) as usize;
                    if layout.is_valid(ch, t) {
                        stream.push(v);
                    }
                }
            }
        }

        assert_eq!(starts, lengths.len());
        assert_eq!(ends, lengths.len());
        let total: usize = streams.iter().map(Vec::len).sum();
        assert_eq!(total, lengths.iter().sum::<usize>());
        // within a channel frames of an utterance arrive contiguously and in order
        for stream in &streams {
            for pair in stream.windows(2) {
                let (a, b) = (pair[0] as usize, pair[1] as usize);
                assert!(b == a + 1 || b % 1000 == 0, "{a} followed by {b}");
            }
        }
    }

    #[test]
    fn test_zero_truncation_is_rejected() {
        let mut registry = StreamRegistry::new();
        registry.add_feature("features", 1).unwrap();
        assert_eq!(
            BpttPacker::<f32>::new(&registry, 2, 0).unwrap_err(),
            ReaderError::ZeroMinibatchSize
        );
    }
}
