use crate::error::StoreError;
use crate::snap::key::TimestampKey;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Every stored key, most recent first. Always rebuilt from a scan, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexLedger {
    keys: Vec<TimestampKey>,
}

impl IndexLedger {
    pub fn rebuild<'a>(keys: impl IntoIterator<Item = &'a TimestampKey>) -> Self {
        let unique = keys.into_iter().cloned().collect::<BTreeSet<_>>();
        Self {
            keys: unique.into_iter().rev().collect(),
        }
    }

    pub fn keys(&self) -> &[TimestampKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn latest(&self) -> Option<&TimestampKey> {
        self.keys.first()
    }

    /// Full overwrite through a temp file in the same directory.
    pub fn persist(&self, path: &Path) -> Result<PathBuf, StoreError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|err| StoreError::io(dir, err))?;

        let data = serde_json::to_string_pretty(&self.keys)
            .map_err(|err| StoreError::io(path, err.into()))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
        tmp.write_all(format!("{data}\n").as_bytes())
            .map_err(|err| StoreError::io(tmp.path(), err))?;
        tmp.persist(path)
            .map_err(|err| StoreError::io(path, err.error))?;
        Ok(path.to_path_buf())
    }
}

/// Raw ledger entries in file order, duplicates and all. Missing file reads as empty.
pub fn read_entries(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let entries: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(entries)
}
