// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Reads the first minibatches of epoch 0 and reports how they
// were packed: one rendered row per parallel sequence plus the
// utterances that went into each row.
//
// Row legend:
//   S  sequence starts here      E  sequence ends here
//   B  one-frame sequence        .  frame inside a sequence
//   -  padding (no input)

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::application::simulate_use_case::{build_reader, output_matrices, SimulateConfig};
use crate::data::channel::ChannelState;
use crate::data::frame_packer::PackedSequence;

/// How one minibatch was packed.
#[derive(Debug, Clone)]
pub struct MinibatchReport {
    pub index:      usize,
    pub steps:      usize,
    pub parallel:   usize,
    /// False in frame mode, where every cell is its own sequence
    pub sequential: bool,
    pub rows:       Vec<String>,
    /// Sequences placed in whole-utterance mode
    pub packed:     Vec<PackedSequence>,
    /// Channel states after the minibatch
    pub states:     Vec<ChannelState>,
}

pub struct InspectUseCase {
    config:      SimulateConfig,
    base_dir:    PathBuf,
    minibatches: usize,
}

impl InspectUseCase {
    pub fn new(config: SimulateConfig, base_dir: impl Into<PathBuf>, minibatches: usize) -> Self {
        Self { config, base_dir: base_dir.into(), minibatches }
    }

    pub fn execute(&self) -> Result<Vec<MinibatchReport>> {
        let mut reader   = build_reader(&self.config, &self.base_dir)?;
        let mut matrices = output_matrices(&reader);

        reader
            .start_loop(&self.config.loop_request(0))
            .context("Cannot start epoch 0")?;

        let mut reports = Vec::with_capacity(self.minibatches);
        while reports.len() < self.minibatches && reader.get_minibatch(&mut matrices)? {
            let layout = reader.layout();
            reports.push(MinibatchReport {
                index:      reports.len(),
                steps:      layout.num_time_steps(),
                parallel:   layout.num_parallel_sequences(),
                sequential: layout.is_sequential(),
                rows:       layout.render(),
                packed:     reader.sequence_training_aux().channel_map.clone(),
                states:     reader.channel_states(),
            });
        }

        tracing::info!("Inspected {} minibatches", reports.len());
        Ok(reports)
    }
}
