// ============================================================
// Layer 4 — Synthetic Corpus
// ============================================================
// Deterministic utterances for the simulator and the tests.
//
// Every value is a "ramp" that encodes where it came from:
//
//   value = base * 1000 + frame index
//
// so a packed minibatch can be checked cell by cell: reading
// 3004.0 means "utterance 3, frame 4". Label streams carry
// `frame % label_count`, which keeps every index in range.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::source::{FrameMatrix, Utterance};
use crate::domain::stream::StreamRegistry;

/// Build one ramp utterance.
///
/// `feature_dims` / `label_dims` give one entry per stream; label
/// dims are the number of distinct label indices.
pub fn ramp_utterance(
    key:          impl Into<String>,
    base:         usize,
    frames:       usize,
    feature_dims: &[usize],
    label_dims:   &[usize],
) -> Utterance {
    let features = feature_dims
        .iter()
        .map(|&dim| {
            let data = (0..frames)
                .flat_map(|t| std::iter::repeat((base * 1000 + t) as f32).take(dim))
                .collect();
            FrameMatrix::new(dim, data)
        })
        .collect();
    let labels = label_dims
        .iter()
        .map(|&n| (0..frames).map(|t| t % n).collect())
        .collect();
    Utterance::new(key, features, labels)
}

fn default_utterances() -> usize {
    64
}

fn default_min_frames() -> usize {
    20
}

fn default_max_frames() -> usize {
    120
}

fn default_seed() -> u64 {
    42
}

// ─── CorpusConfig ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusConfig {
    #[serde(default = "default_utterances")]
    pub utterances: usize,
    #[serde(default = "default_min_frames")]
    pub min_frames: usize,
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
    /// Make every n-th utterance empty (0 = never)
    #[serde(default)]
    pub empty_every: usize,
    /// Attach lattice side data to every utterance
    #[serde(default)]
    pub lattices: bool,
    /// Shuffle every sweep of the source
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            utterances:  default_utterances(),
            min_frames:  default_min_frames(),
            max_frames:  default_max_frames(),
            empty_every: 0,
            lattices:    false,
            shuffle:     false,
            seed:        default_seed(),
        }
    }
}

impl CorpusConfig {
    /// Generate the corpus for the streams of `registry`.
    pub fn generate(&self, registry: &StreamRegistry) -> Vec<Utterance> {
        let feature_dims: Vec<usize> = registry.features().iter().map(|s| s.dim).collect();
        let label_dims:   Vec<usize> = registry.labels().iter().map(|s| s.label_count()).collect();
        let (lo, hi) = (self.min_frames.min(self.max_frames), self.max_frames.max(self.min_frames));
        let mut rng = StdRng::seed_from_u64(self.seed);

        (0..self.utterances)
            .map(|i| {
                let frames = if self.empty_every > 0 && (i + 1) % self.empty_every == 0 {
                    0
                } else {
                    rng.gen_range(lo..=hi)
                };
                let utt = ramp_utterance(format!("utt{i:05}"), i, frames, &feature_dims, &label_dims);
                if self.lattices && frames > 0 {
                    let data: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
                    let boundaries = (0..frames).step_by(5).collect();
                    utt.with_lattice(data, boundaries)
                } else {
                    utt
                }
            })
            .collect()
    }
}
