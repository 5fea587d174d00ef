use crate::snap::paths::SnapPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Summary of the most recent cycle, for `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    pub schema_version: u32,
    pub last_cycle_epoch_secs: Option<u64>,
    pub last_cycle_status: Option<String>,
    pub last_stored: usize,
    pub last_duplicates: usize,
    pub last_failed_slots: Vec<String>,
    pub ledger_len: usize,
    pub latest_key: Option<String>,
    pub consecutive_failed_cycles: u64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_cycle_epoch_secs: None,
            last_cycle_status: None,
            last_stored: 0,
            last_duplicates: 0,
            last_failed_slots: Vec::new(),
            ledger_len: 0,
            latest_key: None,
            consecutive_failed_cycles: 0,
        }
    }
}

pub fn state_file_path(paths: &SnapPaths) -> PathBuf {
    paths.state_dir.join("sync_state.json")
}

pub fn load(paths: &SnapPaths) -> Result<SyncState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(SyncState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: SyncState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &SnapPaths, state: &SyncState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(state)?;
    fs::write(&file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}
