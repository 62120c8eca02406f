// ============================================================
// Layer 6 — Config Store
// ============================================================
// Persists the simulator's run configuration as pretty JSON and
// resolves the reader's stream declarations against the files
// they reference.
//
// Label-to-target mapping files are looked up relative to the
// directory holding the config file, so a config and its
// mapping files can be moved around together:
//
//   run/
//     simulate.json        ← "label_list": "states.list"
//     states.list
//     states.map
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::simulate_use_case::SimulateConfig;
use crate::domain::config::ReaderConfig;
use crate::domain::stream::StreamRegistry;

/// Write the run configuration, creating parent directories.
pub fn save_config(path: &Path, cfg: &SimulateConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json)
        .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

    tracing::debug!("Saved run config to '{}'", path.display());
    Ok(())
}

/// Read a run configuration written by `save_config` (or by hand).
pub fn load_config(path: &Path) -> Result<SimulateConfig> {
    let json = fs::read_to_string(path).with_context(|| {
        format!(
            "Cannot read config from '{}'. Run 'init-config' to create one.",
            path.display()
        )
    })?;

    serde_json::from_str(&json)
        .with_context(|| format!("Invalid run config in '{}'", path.display()))
}

/// Build the stream registry of a reader config, reading mapping
/// files relative to `base_dir`.
pub fn resolve_streams(reader: &ReaderConfig, base_dir: &Path) -> Result<StreamRegistry> {
    let registry = reader
        .resolve_streams(|name| fs::read_to_string(mapping_path(base_dir, name)))
        .context("Cannot resolve reader streams")?;

    tracing::debug!(
        "Resolved {} feature and {} label streams",
        registry.features().len(),
        registry.labels().len()
    );
    Ok(registry)
}

fn mapping_path(base_dir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
