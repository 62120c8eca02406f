// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `simulate`, `inspect` and
// `init-config`, and all their configurable flags.
//
// A run is described by a JSON config (see `init-config`); the
// flags below override single fields of it.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::application::simulate_use_case::SimulateConfig;
use crate::domain::config::MinibatchMode;

/// The top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run whole epochs through the reader and report packing metrics
    Simulate(SimulateArgs),

    /// Print the packing of the first minibatches of epoch 0
    Inspect(InspectArgs),

    /// Write a default run config to edit by hand
    InitConfig(InitConfigArgs),
}

/// Where a run config comes from.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// JSON run config; built-in defaults when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Frames per minibatch (truncation length in truncated mode)
    #[arg(long)]
    pub minibatch_size: Option<usize>,

    /// Parallel channels for every epoch
    #[arg(long)]
    pub channels: Option<usize>,

    /// Read in truncated (BPTT) mode
    #[arg(long)]
    pub truncated: bool,

    /// Read in frame mode
    #[arg(long, conflicts_with = "truncated")]
    pub frame_mode: bool,

    /// Drop trailing partial minibatches
    #[arg(long)]
    pub full_minibatches: bool,

    /// Number of synthetic utterances
    #[arg(long)]
    pub utterances: Option<usize>,
}

impl ConfigArgs {
    /// Directory mapping files are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Apply the flag overrides on top of `cfg`.
    pub fn apply(&self, mut cfg: SimulateConfig) -> SimulateConfig {
        if let Some(n) = self.minibatch_size {
            cfg.minibatch_size = n;
        }
        if let Some(n) = self.channels {
            cfg.reader.channels_per_epoch = vec![n];
        }
        if self.truncated {
            cfg.reader.truncated  = true;
            cfg.reader.frame_mode = false;
        }
        if self.frame_mode {
            cfg.reader.frame_mode = true;
            cfg.reader.truncated  = false;
            cfg.reader.channels_per_epoch = vec![1];
        }
        if self.full_minibatches {
            cfg.reader.minibatch_mode = MinibatchMode::Full;
        }
        if let Some(n) = self.utterances {
            cfg.corpus.utterances = n;
        }
        cfg
    }
}

/// All arguments for the `simulate` command.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// Number of epochs to read
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Samples per epoch (defaults to one sweep of the corpus)
    #[arg(long)]
    pub epoch_samples: Option<usize>,

    /// Directory for metrics.csv
    #[arg(long)]
    pub metrics_dir: Option<String>,
}

impl SimulateArgs {
    pub fn apply(&self, cfg: SimulateConfig) -> SimulateConfig {
        let mut cfg = self.source.apply(cfg);
        if let Some(n) = self.epochs {
            cfg.epochs = n;
        }
        if self.epoch_samples.is_some() {
            cfg.requested_epoch_samples = self.epoch_samples;
        }
        if self.metrics_dir.is_some() {
            cfg.metrics_dir = self.metrics_dir.clone();
        }
        cfg
    }
}

/// All arguments for the `inspect` command
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// How many minibatches to print
    #[arg(long, default_value_t = 4)]
    pub count: usize,
}

/// All arguments for the `init-config` command
#[derive(Args, Debug)]
pub struct InitConfigArgs {
    /// Where to write the config
    #[arg(long, default_value = "simulate.json")]
    pub path: PathBuf,
}
