// ============================================================
// Layer 4 — Minibatch Reader (top-level entry point)
// ============================================================
// What the training loop talks to:
//
//   reader.start_loop(&LoopRequest { .. })?;     once per epoch
//   while reader.get_minibatch(&mut matrices)? {
//       reader.layout();                         flags of this minibatch
//       reader.sequence_training_aux();          lattices etc.
//       ...train...
//   }
//
// `start_loop` picks ONE packer for the whole epoch:
//
//   action = write          → WritePacker
//   truncated               → BpttPacker
//   otherwise               → FramePacker (frame or sequence mode)
//
// and never mixes their state. The caller names the streams it
// wants through the keys of the matrix map; names are resolved
// into stream ids once and re-resolved only when the key set
// changes.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::data::arena::{MinibatchArena, PackInput, StreamMatrix};
use crate::data::bptt_packer::BpttPacker;
use crate::data::channel::ChannelState;
use crate::data::frame_packer::{FramePacker, FramePackerOptions, SequenceTrainingAux};
use crate::data::stream_buffer::FrameElement;
use crate::data::write_packer::WritePacker;
use crate::domain::config::ReaderConfig;
use crate::domain::error::{ReaderError, ReaderResult};
use crate::domain::layout::MinibatchLayout;
use crate::domain::stream::{RequestedStream, StreamKind, StreamRegistry};
use crate::domain::traits::{EpochRequest, UtteranceSource};

// ─── Epoch Sample Budget ──────────────────────────────────────────────────────
/// Frames the source should serve for one epoch.
///
/// Without partial minibatches the corpus total is rounded down
/// to a multiple of the minibatch size, and an explicit request
/// grows by the tail frames skipped in every extra sweep.
pub fn epoch_sample_budget(
    total_frames:   usize,
    minibatch_size: usize,
    partial:        bool,
    requested:      Option<usize>,
) -> usize {
    if partial || minibatch_size == 0 {
        return requested.unwrap_or(total_frames);
    }

    let extra       = total_frames % minibatch_size;
    let minibatches = total_frames / minibatch_size;
    let rounded     = if total_frames > minibatch_size { total_frames - extra } else { total_frames };

    match requested {
        None => rounded,
        Some(r) if minibatches > 0 && r > 0 => {
            let sweeps = (r - 1) / rounded;
            r + extra * sweeps
        }
        Some(r) => r,
    }
}

/// Channels this worker reads when `channels` are split over
/// `num_subsets` partitions.
pub fn partition_channels(channels: usize, subset: usize, num_subsets: usize) -> ReaderResult<usize> {
    if channels < num_subsets {
        return Err(ReaderError::InsufficientChannels { channels, num_subsets });
    }
    let extra = usize::from(subset < channels % num_subsets);
    Ok(channels / num_subsets + extra)
}

// ─── LoopRequest ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRequest {
    /// Parallel channels; None takes the configured schedule
    pub channels:                Option<usize>,
    /// Frames per minibatch, or the truncation length
    pub minibatch_size:          usize,
    pub epoch:                   usize,
    pub subset_index:            usize,
    pub num_subsets:             usize,
    /// None reads the whole corpus once
    pub requested_epoch_samples: Option<usize>,
}

impl LoopRequest {
    pub fn new(minibatch_size: usize, epoch: usize) -> Self {
        Self {
            channels: None,
            minibatch_size,
            epoch,
            subset_index: 0,
            num_subsets: 1,
            requested_epoch_samples: None,
        }
    }
}

/// Running totals of the current loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochStats {
    pub minibatches:      usize,
    pub valid_frames:     usize,
    pub padding_frames:   usize,
    /// Utterances gap-packed behind another utterance
    pub packed_sequences: usize,
}

// ─── Packer selection ─────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
enum Packer<E> {
    Frame(FramePacker<E>),
    Bptt(BpttPacker<E>),
    Write(WritePacker<E>),
}

impl<E: FrameElement> Packer<E> {
    fn begin<S: UtteranceSource>(&mut self, registry: &StreamRegistry, source: &mut S) -> ReaderResult<()> {
        match self {
            Packer::Frame(p) => p.begin(registry, source),
            Packer::Bptt(p)  => p.begin(registry, source),
            Packer::Write(p) => p.begin(registry, source),
        }
    }

    fn next<S: UtteranceSource>(&mut self, input: PackInput<'_, S>) -> ReaderResult<bool> {
        match self {
            Packer::Frame(p) => p.next(input),
            Packer::Bptt(p)  => p.next(input),
            Packer::Write(p) => p.next(input),
        }
    }

    fn layout(&self) -> &MinibatchLayout {
        match self {
            Packer::Frame(p) => p.layout(),
            Packer::Bptt(p)  => p.layout(),
            Packer::Write(p) => p.layout(),
        }
    }

    fn arena(&self) -> &MinibatchArena<E> {
        match self {
            Packer::Frame(p) => p.arena(),
            Packer::Bptt(p)  => p.arena(),
            Packer::Write(p) => p.arena(),
        }
    }

    fn channel_states(&self) -> Vec<ChannelState> {
        match self {
            Packer::Frame(p) => p.channels().iter().map(|c| c.state()).collect(),
            Packer::Bptt(p)  => p.channels().iter().map(|c| c.state()).collect(),
            Packer::Write(p) => vec![p.channel().state()],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Packer::Frame(_) => "frame",
            Packer::Bptt(_)  => "truncated",
            Packer::Write(_) => "write",
        }
    }
}

// ─── MinibatchReader ──────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct MinibatchReader<S, E = f32> {
    config:    ReaderConfig,
    registry:  StreamRegistry,
    source:    S,
    packer:    Option<Packer<E>>,
    requested: Vec<RequestedStream>,
    stats:     EpochStats,
    /// Returned while no loop is running
    idle_layout: MinibatchLayout,
    /// Returned outside frame / whole-utterance mode
    no_aux:      SequenceTrainingAux,
}

impl<S: UtteranceSource, E: FrameElement> MinibatchReader<S, E> {
    pub fn new(config: ReaderConfig, registry: StreamRegistry, source: S) -> ReaderResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            source,
            packer:      None,
            requested:   Vec::new(),
            stats:       EpochStats::default(),
            idle_layout: MinibatchLayout::new(),
            no_aux:      SequenceTrainingAux::default(),
        })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stats(&self) -> EpochStats {
        self.stats
    }

    /// Start reading one epoch.
    pub fn start_loop(&mut self, request: &LoopRequest) -> ReaderResult<()> {
        if request.minibatch_size == 0 {
            return Err(ReaderError::ZeroMinibatchSize);
        }
        if request.num_subsets == 0 || request.subset_index >= request.num_subsets {
            return Err(ReaderError::InvalidPartition {
                subset:      request.subset_index,
                num_subsets: request.num_subsets,
            });
        }

        let training = self.config.is_training();
        if !training && request.num_subsets > 1 {
            return Err(ReaderError::DistributedWrite);
        }

        let mut channels = request
            .channels
            .unwrap_or_else(|| self.config.channels_for_epoch(request.epoch));
        if channels == 0 {
            return Err(ReaderError::ZeroChannels);
        }

        let frame_mode = training && self.config.frame_mode;
        if frame_mode && channels > 1 {
            return Err(ReaderError::TooManyChannelsInFrameMode(channels));
        }
        if training && !frame_mode && request.num_subsets > 1 {
            let total = channels;
            channels = partition_channels(total, request.subset_index, request.num_subsets)?;
            tracing::warn!(
                "Partition {}/{} reads {} of {} parallel channels",
                request.subset_index,
                request.num_subsets,
                channels,
                total
            );
        }

        let partial = self.config.partial_minibatches();
        // Writing covers exactly one sweep, whatever the minibatch policy.
        let budget = if training {
            epoch_sample_budget(
                self.source.total_frames(),
                request.minibatch_size,
                partial,
                request.requested_epoch_samples,
            )
        } else {
            self.source.total_frames()
        };
        self.source.begin_epoch(&EpochRequest {
            epoch:          request.epoch,
            minibatch_size: request.minibatch_size,
            subset_index:   request.subset_index,
            num_subsets:    request.num_subsets,
            epoch_samples:  budget,
            frame_mode,
        })?;

        let mut packer = if !training {
            Packer::Write(WritePacker::new(&self.registry))
        } else if self.config.truncated {
            Packer::Bptt(BpttPacker::new(&self.registry, channels, request.minibatch_size)?)
        } else {
            Packer::Frame(FramePacker::new(
                &self.registry,
                channels,
                FramePackerOptions { frame_mode, partial, minibatch_size: request.minibatch_size },
            ))
        };
        packer.begin(&self.registry, &mut self.source)?;

        tracing::info!(
            "Epoch {}: {} packer, {} channels, minibatch size {}, {} of {} frames",
            request.epoch,
            packer.name(),
            channels,
            request.minibatch_size,
            budget,
            self.source.total_frames(),
        );

        self.packer = Some(packer);
        self.requested.clear();
        self.stats = EpochStats::default();
        Ok(())
    }

    /// Fill one matrix per map key. Ok(false) means end of epoch
    /// and leaves the matrices untouched.
    pub fn get_minibatch(&mut self, matrices: &mut BTreeMap<String, StreamMatrix<E>>) -> ReaderResult<bool> {
        let Some(packer) = self.packer.as_mut() else {
            return Err(ReaderError::LoopNotStarted);
        };

        if !self.requested.iter().map(|r| &r.name).eq(matrices.keys()) {
            let requested = self.registry.resolve(matrices.keys())?;
            if let Packer::Write(_) = packer {
                check_write_request(&self.registry, &requested)?;
            }
            self.requested = requested;
        }

        let started = Instant::now();
        let produced = packer.next(PackInput {
            registry:  &self.registry,
            source:    &mut self.source,
            requested: &self.requested,
        })?;
        if !produced {
            tracing::debug!("End of epoch after {} minibatches", self.stats.minibatches);
            return Ok(false);
        }

        let arena = packer.arena();
        for (k, matrix) in matrices.values_mut().enumerate() {
            arena.export(k, matrix);
        }

        let layout = packer.layout();
        let valid  = layout.valid_frame_count();
        self.stats.minibatches    += 1;
        self.stats.valid_frames   += valid;
        self.stats.padding_frames += layout.num_parallel_sequences() * layout.num_time_steps() - valid;
        if let Packer::Frame(p) = packer {
            self.stats.packed_sequences += p.aux().channel_map.iter().filter(|s| s.start > 0).count();
        }

        tracing::trace!(
            "Minibatch {} read in {:.3} ms",
            self.stats.minibatches,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(true)
    }

    /// Lattices, label ids and boundaries of the sequences in the
    /// current minibatch. Empty outside frame / whole-utterance mode.
    pub fn sequence_training_aux(&self) -> &SequenceTrainingAux {
        match &self.packer {
            Some(Packer::Frame(p)) => p.aux(),
            _                      => &self.no_aux,
        }
    }

    /// Layout of the current minibatch.
    pub fn layout(&self) -> &MinibatchLayout {
        match &self.packer {
            Some(p) => p.layout(),
            None    => &self.idle_layout,
        }
    }

    /// Parallel sequences of the current minibatch (in frame mode
    /// every frame is its own sequence).
    pub fn num_parallel_sequences(&self) -> usize {
        self.layout().num_parallel_sequences()
    }

    pub fn channel_states(&self) -> Vec<ChannelState> {
        self.packer.as_ref().map(Packer::channel_states).unwrap_or_default()
    }
}

/// Write mode produces features only, and all of them.
fn check_write_request(registry: &StreamRegistry, requested: &[RequestedStream]) -> ReaderResult<()> {
    if let Some(label) = requested.iter().find(|r| r.id.kind == StreamKind::Category) {
        return Err(ReaderError::Config(format!(
            "write mode produces feature streams only, '{}' is a label stream",
            label.name
        )));
    }
    for info in registry.features() {
        if !requested.iter().any(|r| r.id == info.id) {
            return Err(ReaderError::MissingFeatureStream(info.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::{MemoryUtteranceSource, Utterance};
    use crate::data::synthetic::ramp_utterance;
    use crate::domain::config::{MinibatchMode, ReaderAction};

    fn corpus(lengths: &[usize]) -> Vec<Utterance> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &n)| ramp_utterance(format!("u{i}"), i, n, &[2], &[3]))
            .collect()
    }

    fn config(frame_mode: bool, truncated: bool) -> ReaderConfig {
        let mut cfg = ReaderConfig::default();
        cfg.features[0].dim = 2;
        cfg.labels[0].dim = 3;
        cfg.frame_mode = frame_mode;
        cfg.truncated = truncated;
        if frame_mode {
            cfg.channels_per_epoch = vec![1];
        }
        cfg
    }

    fn reader<E: FrameElement>(
        cfg: ReaderConfig,
        lengths: &[usize],
    ) -> MinibatchReader<MemoryUtteranceSource, E> {
        let registry = cfg.resolve_streams(|_| Ok(String::new())).unwrap();
        MinibatchReader::new(cfg, registry, MemoryUtteranceSource::new(corpus(lengths))).unwrap()
    }

    fn matrices<E: FrameElement>(names: &[&str]) -> BTreeMap<String, StreamMatrix<E>> {
        names.iter().map(|n| (n.to_string(), StreamMatrix::new())).collect()
    }

    #[test]
    fn test_budget_partial_passes_request_through() {
        assert_eq!(epoch_sample_budget(10, 4, true, None), 10);
        assert_eq!(epoch_sample_budget(10, 4, true, Some(7)), 7);
    }

    #[test]
    fn test_budget_full_rounds_down() {
        assert_eq!(epoch_sample_budget(10, 4, false, None), 8);
        assert_eq!(epoch_sample_budget(3, 4, false, None), 3);
        // two extra sweeps each skip a 2-frame tail
        assert_eq!(epoch_sample_budget(10, 4, false, Some(20)), 24);
        assert_eq!(epoch_sample_budget(3, 4, false, Some(5)), 5);
        assert_eq!(epoch_sample_budget(10, 4, false, Some(0)), 0);
    }

    #[test]
    fn test_partition_channels() {
        assert_eq!(partition_channels(5, 0, 2).unwrap(), 3);
        assert_eq!(partition_channels(5, 1, 2).unwrap(), 2);
        assert_eq!(
            partition_channels(1, 0, 2).unwrap_err(),
            ReaderError::InsufficientChannels { channels: 1, num_subsets: 2 }
        );
    }

    #[test]
    fn test_minibatch_before_start_is_misuse() {
        let mut r = reader::<f32>(config(false, false), &[3]);
        let mut m = matrices(&["features"]);
        assert_eq!(r.get_minibatch(&mut m).unwrap_err(), ReaderError::LoopNotStarted);
        assert_eq!(r.num_parallel_sequences(), 0);
    }

    #[test]
    fn test_unknown_stream_is_misuse() {
        let mut r = reader::<f32>(config(false, false), &[3]);
        r.start_loop(&LoopRequest::new(4, 0)).unwrap();
        let mut m = matrices(&["features", "ivectors"]);
        assert_eq!(
            r.get_minibatch(&mut m).unwrap_err(),
            ReaderError::UnknownStream("ivectors".into())
        );
    }

    #[test]
    fn test_start_loop_rejects_bad_requests() {
        let mut r = reader::<f32>(config(true, false), &[3]);
        assert_eq!(r.start_loop(&LoopRequest::new(0, 0)).unwrap_err(), ReaderError::ZeroMinibatchSize);
        assert_eq!(
            r.start_loop(&LoopRequest { channels: Some(2), ..LoopRequest::new(4, 0) }).unwrap_err(),
            ReaderError::TooManyChannelsInFrameMode(2)
        );
        assert_eq!(
            r.start_loop(&LoopRequest { subset_index: 1, ..LoopRequest::new(4, 0) }).unwrap_err(),
            ReaderError::InvalidPartition { subset: 1, num_subsets: 1 }
        );

        let write = ReaderConfig { action: ReaderAction::Write, ..config(false, false) };
        let mut w = reader::<f32>(write, &[3]);
        assert_eq!(
            w.start_loop(&LoopRequest { num_subsets: 2, ..LoopRequest::new(4, 0) }).unwrap_err(),
            ReaderError::DistributedWrite
        );
    }

    #[test]
    fn test_sequence_mode_conserves_frames() {
        let lengths = [7, 1, 3, 9, 2, 0, 2, 5, 1, 1, 6];
        let mut r = reader::<f64>(config(false, false), &lengths);
        r.start_loop(&LoopRequest::new(16, 0)).unwrap();
        let mut m = matrices::<f64>(&["features", "labels"]);

        let mut valid = 0;
        while r.get_minibatch(&mut m).unwrap() {
            let layout = r.layout();
            assert_eq!(m["features"].rows(), 2);
            assert_eq!(m["labels"].rows(), 3);
            assert_eq!(m["labels"].cols(), layout.num_parallel_sequences() * layout.num_time_steps());
            for (cell, ok) in layout.validity_mask().into_iter().enumerate() {
                let hot: f64 = m["labels"].column(cell).iter().sum();
                assert_eq!(hot, if ok { 1.0 } else { 0.0 });
            }
            valid += layout.valid_frame_count();
            assert_eq!(r.sequence_training_aux().lattices.len(), r.sequence_training_aux().channel_map.len());
        }
        assert_eq!(valid, lengths.iter().sum::<usize>());
        assert_eq!(r.stats().valid_frames, valid);
        assert_eq!(r.layout().num_parallel_sequences(), 4);
    }

    #[test]
    fn test_frame_mode_full_minibatches() {
        let mut cfg = config(true, false);
        cfg.minibatch_mode = MinibatchMode::Full;
        let mut r = reader::<f32>(cfg, &[3, 2, 5]);
        r.start_loop(&LoopRequest::new(4, 0)).unwrap();
        let mut m = matrices(&["features", "labels"]);

        let mut sizes = Vec::new();
        while r.get_minibatch(&mut m).unwrap() {
            assert_eq!(r.layout().num_time_steps(), 1);
            sizes.push(r.num_parallel_sequences());
        }
        // 10 frames round down to 8
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn test_truncated_mode_has_no_aux() {
        let mut r = reader::<f32>(config(false, true), &[10, 3, 6]);
        r.start_loop(&LoopRequest { channels: Some(2), ..LoopRequest::new(4, 0) }).unwrap();
        let mut m = matrices(&["features"]);

        let mut valid = 0;
        while r.get_minibatch(&mut m).unwrap() {
            assert_eq!(r.layout().num_time_steps(), 4);
            assert!(r.sequence_training_aux().is_empty());
            valid += r.layout().valid_frame_count();
        }
        assert_eq!(valid, 19);
        assert!(r.channel_states().iter().all(|s| *s == ChannelState::Exhausted));
    }

    #[test]
    fn test_partitions_share_the_corpus() {
        let lengths = [4, 6, 1, 3, 8, 2, 5];
        let mut total = 0;
        for subset in 0..2 {
            let mut r = reader::<f32>(config(false, false), &lengths);
            r.start_loop(&LoopRequest { subset_index: subset, num_subsets: 2, ..LoopRequest::new(8, 0) })
                .unwrap();
            let mut m = matrices(&["features"]);
            while r.get_minibatch(&mut m).unwrap() {
                assert!(r.num_parallel_sequences() <= 2);
            }
            total += r.stats().valid_frames;
        }
        assert_eq!(total, lengths.iter().sum::<usize>());
    }

    #[test]
    fn test_write_mode_requires_every_feature() {
        let mut cfg = config(false, false);
        cfg.action = ReaderAction::Write;
        let registry = {
            let mut r = StreamRegistry::new();
            r.add_feature("features", 2).unwrap();
            r.add_feature("pitch", 2).unwrap();
            r
        };
        let source = MemoryUtteranceSource::new(vec![ramp_utterance("u0", 0, 3, &[2, 2], &[])]);
        let mut r = MinibatchReader::<_, f32>::new(cfg, registry, source).unwrap();
        r.start_loop(&LoopRequest::new(1, 0)).unwrap();

        let mut m = matrices(&["features"]);
        assert_eq!(
            r.get_minibatch(&mut m).unwrap_err(),
            ReaderError::MissingFeatureStream("pitch".into())
        );

        let mut m = matrices(&["features", "pitch"]);
        assert!(r.get_minibatch(&mut m).unwrap());
        assert_eq!(r.layout().render(), vec!["S.E"]);
        assert!(r.sequence_training_aux().is_empty());
        assert!(!r.get_minibatch(&mut m).unwrap());
    }

    #[test]
    fn test_write_mode_reads_every_utterance_once() {
        let mut cfg = config(false, false);
        cfg.action = ReaderAction::Write;
        cfg.minibatch_mode = MinibatchMode::Full;
        let mut r = reader::<f32>(cfg, &[4, 4, 1]);
        r.start_loop(&LoopRequest { requested_epoch_samples: Some(4), ..LoopRequest::new(4, 0) })
            .unwrap();

        let mut m = matrices(&["features"]);
        let mut rows = Vec::new();
        while r.get_minibatch(&mut m).unwrap() {
            rows.extend(r.layout().render());
        }
        assert_eq!(rows, vec!["S..E", "S..E", "B"]);
        assert_eq!(r.stats().valid_frames, 9);
    }
}
