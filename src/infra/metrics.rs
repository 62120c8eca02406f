// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records packing statistics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:            the epoch number (0, 1, 2, ...)
//   - minibatches:      minibatches produced
//   - valid_frames:     cells holding a real frame
//   - padding_frames:   NO_INPUT cells
//   - packed_sequences: utterances gap-packed behind another one
//   - source_frames:    frames the source accounted for
//
// Output file: <metrics_dir>/metrics.csv
//
// Example CSV output:
//   epoch,minibatches,valid_frames,padding_frames,packed_sequences,source_frames,efficiency
//   0,12,4410,230,9,4410,0.950431
//   1,12,4410,198,11,4410,0.957031
//
// How to read the metrics:
//   - valid_frames should equal source_frames every epoch
//   - efficiency = valid / (valid + padding); gap-packing
//     pushes it up, long utterance length spreads push it down
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

/// One row of metrics data for a single epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:            usize,
    pub minibatches:      usize,
    pub valid_frames:     usize,
    pub padding_frames:   usize,
    pub packed_sequences: usize,
    pub source_frames:    usize,
}

impl EpochMetrics {
    /// Fraction of produced cells that carry a real frame
    pub fn efficiency(&self) -> f64 {
        let cells = self.valid_frames + self.padding_frames;
        if cells == 0 {
            return 0.0;
        }
        self.valid_frames as f64 / cells as f64
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create a new MetricsLogger.
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(
                f,
                "epoch,minibatches,valid_frames,padding_frames,packed_sequences,source_frames,efficiency"
            )?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{},{},{},{},{},{:.6}",
            m.epoch,
            m.minibatches,
            m.valid_frames,
            m.padding_frames,
            m.packed_sequences,
            m.source_frames,
            m.efficiency(),
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: {} minibatches, efficiency={:.4}",
            m.epoch,
            m.minibatches,
            m.efficiency(),
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
