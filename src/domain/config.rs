// ============================================================
// Layer 3 — Reader Configuration
// ============================================================
// Serialisable description of a reader: which streams exist,
// how minibatches are shaped, and whether the run trains or
// writes. Saved and loaded as JSON by the infra layer.
//
// Example:
//   {
//     "features": [{ "name": "features", "dim": 13, "context_window": [11] }],
//     "labels":   [{ "name": "labels", "dim": 132 }],
//     "frame_mode": false,
//     "truncated": true,
//     "channels_per_epoch": [16, 32]
//   }

use serde::{Deserialize, Serialize};

use crate::domain::error::{ReaderError, ReaderResult};
use crate::domain::label_map::LabelTargetMap;
use crate::domain::stream::StreamRegistry;

fn default_context_window() -> Vec<usize> {
    vec![1]
}

fn default_true() -> bool {
    true
}

fn default_channels() -> Vec<usize> {
    vec![1]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStreamConfig {
    pub name: String,
    /// Native feature dimension, before context expansion
    pub dim:  usize,
    /// One odd value (symmetric window) or [left, right]
    #[serde(default = "default_context_window")]
    pub context_window: Vec<usize>,
}

impl FeatureStreamConfig {
    /// Frame dimension after neighbour expansion.
    pub fn expanded_dim(&self) -> ReaderResult<usize> {
        let (left, right) = match self.context_window.as_slice() {
            [window] => {
                if window % 2 == 0 {
                    return Err(ReaderError::Config(format!(
                        "context window {} of '{}' is not symmetrical",
                        window, self.name
                    )));
                }
                (window / 2, window / 2)
            }
            [left, right] => (*left, *right),
            other => {
                return Err(ReaderError::Config(format!(
                    "context window of '{}' must have 1 or 2 values, found {}",
                    self.name,
                    other.len()
                )))
            }
        };
        Ok(self.dim * (1 + left + right))
    }
}

/// Paths of the texts describing a label → target mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelToTargetFiles {
    pub label_list: String,
    pub mapping:    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelStreamConfig {
    pub name: String,
    pub dim:  usize,
    /// Required together with `label_to_target`; becomes the stream dim
    #[serde(default)]
    pub target_dim: Option<usize>,
    #[serde(default)]
    pub label_to_target: Option<LabelToTargetFiles>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinibatchMode {
    #[default]
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderAction {
    #[default]
    Train,
    Write,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub features: Vec<FeatureStreamConfig>,
    #[serde(default)]
    pub labels:   Vec<LabelStreamConfig>,
    #[serde(default = "default_true")]
    pub frame_mode: bool,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default = "default_channels")]
    pub channels_per_epoch: Vec<usize>,
    #[serde(default)]
    pub minibatch_mode: MinibatchMode,
    #[serde(default)]
    pub action: ReaderAction,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            features: vec![FeatureStreamConfig {
                name:           "features".to_string(),
                dim:            13,
                context_window: default_context_window(),
            }],
            labels: vec![LabelStreamConfig {
                name:            "labels".to_string(),
                dim:             32,
                target_dim:      None,
                label_to_target: None,
            }],
            frame_mode:         false,
            truncated:          false,
            channels_per_epoch: vec![4],
            minibatch_mode:     MinibatchMode::Partial,
            action:             ReaderAction::Train,
        }
    }
}

impl ReaderConfig {
    pub fn is_training(&self) -> bool {
        self.action == ReaderAction::Train
    }

    pub fn partial_minibatches(&self) -> bool {
        self.minibatch_mode == MinibatchMode::Partial
    }

    /// Parallel channels for an epoch; the last entry repeats.
    pub fn channels_for_epoch(&self, epoch: usize) -> usize {
        self.channels_per_epoch
            .get(epoch)
            .or_else(|| self.channels_per_epoch.last())
            .copied()
            .unwrap_or(1)
    }

    /// Check the settings that do not depend on any stream data.
    pub fn validate(&self) -> ReaderResult<()> {
        if self.channels_per_epoch.iter().any(|&n| n < 1) {
            return Err(ReaderError::ZeroChannels);
        }
        if self.truncated && self.frame_mode {
            return Err(ReaderError::Config(
                "truncated reading requires frame_mode = false".into(),
            ));
        }
        if self.is_training() && self.features.len() + self.labels.len() <= 1 {
            return Err(ReaderError::Config(
                "training needs at least 1 input and 1 output stream".into(),
            ));
        }
        Ok(())
    }

    /// Resolve stream declarations into a registry.
    ///
    /// `read_text` loads the label list / mapping texts of label
    /// streams that declare a label → target mapping.
    pub fn resolve_streams<F>(&self, mut read_text: F) -> ReaderResult<StreamRegistry>
    where
        F: FnMut(&str) -> std::io::Result<String>,
    {
        self.validate()?;
        let mut registry = StreamRegistry::new();

        for feature in &self.features {
            registry.add_feature(feature.name.clone(), feature.expanded_dim()?)?;
        }

        for label in &self.labels {
            match &label.label_to_target {
                Some(files) => {
                    let target_dim = label.target_dim.ok_or_else(|| {
                        ReaderError::Config(format!(
                            "label stream '{}' must specify target_dim with a label-to-target mapping",
                            label.name
                        ))
                    })?;
                    let list    = read_mapping_text(&mut read_text, &files.label_list)?;
                    let mapping = read_mapping_text(&mut read_text, &files.mapping)?;
                    let map     = LabelTargetMap::parse(&list, &mapping)?;
                    registry.add_label(label.name.clone(), target_dim, Some(map))?;
                }
                None => {
                    registry.add_label(label.name.clone(), label.dim, None)?;
                }
            }
        }

        Ok(registry)
    }
}

fn read_mapping_text<F>(read_text: &mut F, path: &str) -> ReaderResult<String>
where
    F: FnMut(&str) -> std::io::Result<String>,
{
    read_text(path).map_err(|e| ReaderError::LabelMapping(format!("cannot read '{}': {}", path, e)))
}
