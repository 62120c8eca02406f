// ============================================================
// Layer 2 — SimulateUseCase
// ============================================================
// Drives whole epochs through the minibatch reader over a
// synthetic corpus, the way a training loop would:
//
//   Step 1: Resolve the reader's streams        (Layer 6 - infra)
//   Step 2: Generate the synthetic corpus       (Layer 4 - data)
//   Step 3: Build the utterance source + reader (Layer 4 - data)
//   Step 4: Per epoch: start_loop, then pull minibatches until
//           the reader reports end of epoch
//   Step 5: Per minibatch: build Burn tensors   (Layer 5 - ml)
//           and cross-check them against the layout
//   Step 6: Log per-epoch metrics               (Layer 6 - infra)
//
// Reference: Rust Book §13 (Iterators and Closures)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::data::arena::StreamMatrix;
use crate::data::reader::{LoopRequest, MinibatchReader};
use crate::data::source::MemoryUtteranceSource;
use crate::data::synthetic::CorpusConfig;
use crate::domain::config::ReaderConfig;
use crate::infra::config_store;
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::batch::SequenceBatcher;

type SimBackend = burn::backend::NdArray;

fn default_subsets() -> usize {
    1
}

// ─── Simulation Configuration ────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulateConfig {
    pub reader:         ReaderConfig,
    #[serde(default)]
    pub corpus:         CorpusConfig,
    pub epochs:         usize,
    /// Frames per minibatch, or the truncation length
    pub minibatch_size: usize,
    #[serde(default)]
    pub subset_index:   usize,
    #[serde(default = "default_subsets")]
    pub num_subsets:    usize,
    #[serde(default)]
    pub requested_epoch_samples: Option<usize>,
    /// Write metrics.csv here when set
    #[serde(default)]
    pub metrics_dir:    Option<String>,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            reader:                  ReaderConfig::default(),
            corpus:                  CorpusConfig::default(),
            epochs:                  2,
            minibatch_size:          64,
            subset_index:            0,
            num_subsets:             default_subsets(),
            requested_epoch_samples: None,
            metrics_dir:             None,
        }
    }
}

impl SimulateConfig {
    pub fn loop_request(&self, epoch: usize) -> LoopRequest {
        LoopRequest {
            channels:                None,
            minibatch_size:          self.minibatch_size,
            epoch,
            subset_index:            self.subset_index,
            num_subsets:             self.num_subsets,
            requested_epoch_samples: self.requested_epoch_samples,
        }
    }
}

/// Reader over a freshly generated synthetic corpus.
pub(crate) fn build_reader(
    cfg:      &SimulateConfig,
    base_dir: &std::path::Path,
) -> Result<MinibatchReader<MemoryUtteranceSource>> {
    let registry   = config_store::resolve_streams(&cfg.reader, base_dir)?;
    let utterances = cfg.corpus.generate(&registry);
    tracing::info!(
        "Generated {} synthetic utterances ({} feature / {} label streams)",
        utterances.len(),
        registry.features().len(),
        registry.labels().len()
    );

    let source = if cfg.corpus.shuffle {
        MemoryUtteranceSource::shuffled(utterances, cfg.corpus.seed)
    } else {
        MemoryUtteranceSource::new(utterances)
    };
    MinibatchReader::new(cfg.reader.clone(), registry, source).context("Invalid reader configuration")
}

/// One empty output matrix per stream the reader should fill.
pub(crate) fn output_matrices(reader: &MinibatchReader<MemoryUtteranceSource>) -> BTreeMap<String, StreamMatrix<f32>> {
    let registry = reader.registry();
    let labels   = if reader.config().is_training() { registry.labels().len() } else { 0 };
    registry
        .features()
        .iter()
        .chain(&registry.labels()[..labels])
        .map(|s| (s.name.clone(), StreamMatrix::new()))
        .collect()
}

// ─── SimulateUseCase ─────────────────────────────────────────────────────────
pub struct SimulateUseCase {
    config:   SimulateConfig,
    /// Directory mapping files are resolved against
    base_dir: PathBuf,
}

impl SimulateUseCase {
    pub fn new(config: SimulateConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self { config, base_dir: base_dir.into() }
    }

    /// Run every epoch and return its metrics.
    pub fn execute(&self) -> Result<Vec<EpochMetrics>> {
        let cfg = &self.config;

        // ── Steps 1-3: streams, corpus, reader ───────────────────────────────
        let mut reader = build_reader(cfg, &self.base_dir)?;
        let mut matrices = output_matrices(&reader);
        let feature_name = reader
            .registry()
            .features()
            .first()
            .map(|s| s.name.clone())
            .context("The reader config declares no feature stream")?;
        let target_name  = reader
            .registry()
            .labels()
            .first()
            .map(|s| s.name.clone())
            .filter(|name| matrices.contains_key(name));

        let batcher = SequenceBatcher::<SimBackend>::new(Default::default());
        let logger  = match &cfg.metrics_dir {
            Some(dir) => Some(MetricsLogger::new(dir)?),
            None      => None,
        };

        let mut history = Vec::with_capacity(cfg.epochs);
        for epoch in 0..cfg.epochs {
            // ── Step 4: one epoch ────────────────────────────────────────────
            reader
                .start_loop(&cfg.loop_request(epoch))
                .with_context(|| format!("Cannot start epoch {epoch}"))?;

            while reader
                .get_minibatch(&mut matrices)
                .with_context(|| format!("Reading a minibatch of epoch {epoch} failed"))?
            {
                // ── Step 5: tensors + cross-check ────────────────────────────
                let layout = reader.layout();
                let batch = batcher.batch(
                    layout,
                    &matrices[&feature_name],
                    target_name.as_ref().map(|name| &matrices[name]),
                );
                let tensor_frames = batch.valid_frames() as usize;
                if tensor_frames != layout.valid_frame_count() {
                    bail!(
                        "mask tensor counts {} frames but the layout has {}",
                        tensor_frames,
                        layout.valid_frame_count()
                    );
                }
                // padding is zero, so masking must not change the sum
                let features = &matrices[&feature_name];
                let all: f64 = features.as_slice().iter().map(|&v| f64::from(v)).sum();
                let masked = batch.masked_feature_sum();
                if (masked - all).abs() > 1e-3 * all.abs().max(1.0) {
                    bail!("padding cells carry feature values ({masked} masked vs {all} total)");
                }
                let aux = reader.sequence_training_aux();
                if aux.lattices.len() != aux.channel_map.len() {
                    bail!("sequence-training aux output is out of step with its channel map");
                }
            }

            // ── Step 6: metrics ──────────────────────────────────────────────
            let stats = reader.stats();
            let metrics = EpochMetrics {
                epoch,
                minibatches:      stats.minibatches,
                valid_frames:     stats.valid_frames,
                padding_frames:   stats.padding_frames,
                packed_sequences: stats.packed_sequences,
                source_frames:    reader.source().epoch_frames(),
            };
            if cfg.num_subsets == 1 && metrics.valid_frames != metrics.source_frames {
                tracing::warn!(
                    "Epoch {}: delivered {} of {} source frames",
                    epoch,
                    metrics.valid_frames,
                    metrics.source_frames
                );
            }
            tracing::info!(
                "Epoch {}: {} minibatches, {} valid / {} padding frames, {} gap-packed, efficiency {:.3}",
                epoch,
                metrics.minibatches,
                metrics.valid_frames,
                metrics.padding_frames,
                metrics.packed_sequences,
                metrics.efficiency(),
            );
            if let Some(logger) = &logger {
                logger.log(&metrics)?;
            }
            history.push(metrics);
        }

        Ok(history)
    }
}
