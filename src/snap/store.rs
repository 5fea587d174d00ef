use crate::error::StoreError;
use crate::snap::config::{ConflictPolicy, StoreConfig};
use crate::snap::fingerprint::Fingerprint;
use crate::snap::key::TimestampKey;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStatus {
    Created,
    /// Key existed with identical content.
    Unchanged,
    /// Key existed with different content; the stored record won.
    KeptExisting,
    /// Key existed with different content; it was replaced.
    Replaced,
}

impl WriteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Unchanged => "unchanged",
            Self::KeptExisting => "kept-existing",
            Self::Replaced => "replaced",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub status: WriteStatus,
}

/// One JSON file per timestamp key, under a single directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    extension: String,
    conflict_policy: ConflictPolicy,
}

impl SnapshotStore {
    pub fn new(cfg: &StoreConfig) -> Self {
        Self {
            root: cfg.root.clone(),
            extension: cfg.extension.clone(),
            conflict_policy: cfg.conflict_policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &TimestampKey) -> PathBuf {
        self.root.join(format!("{key}.{}", self.extension))
    }

    pub fn exists(&self, key: &TimestampKey) -> bool {
        self.path_for(key).is_file()
    }

    pub fn read(&self, key: &TimestampKey) -> Result<Value, StoreError> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(StoreError::io(path, err)),
        };
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt { path, source })
    }

    /// Write-once under `keep-first`; see [`ConflictPolicy`] for the other policies.
    pub fn write(&self, key: &TimestampKey, content: &Value) -> Result<WriteOutcome, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return match self.persist(&path, content, false) {
                Ok(()) => Ok(WriteOutcome {
                    path,
                    status: WriteStatus::Created,
                }),
                // Lost a race for the key; treat like any existing record.
                Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::AlreadyExists => {
                    self.resolve_existing(key, path, content)
                }
                Err(err) => Err(err),
            };
        }
        self.resolve_existing(key, path, content)
    }

    fn resolve_existing(
        &self,
        key: &TimestampKey,
        path: PathBuf,
        content: &Value,
    ) -> Result<WriteOutcome, StoreError> {
        if self.fingerprint_of(&path)?.as_ref() == Some(&Fingerprint::of(content)) {
            return Ok(WriteOutcome {
                path,
                status: WriteStatus::Unchanged,
            });
        }
        match self.conflict_policy {
            ConflictPolicy::KeepFirst => Ok(WriteOutcome {
                path,
                status: WriteStatus::KeptExisting,
            }),
            ConflictPolicy::KeepLatest => {
                self.persist(&path, content, true)?;
                Ok(WriteOutcome {
                    path,
                    status: WriteStatus::Replaced,
                })
            }
            ConflictPolicy::FailOnConflict => Err(StoreError::Conflict {
                key: key.to_string(),
            }),
        }
    }

    fn persist(&self, path: &Path, content: &Value, overwrite: bool) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|err| StoreError::io(&self.root, err))?;
        let mut tmp =
            NamedTempFile::new_in(&self.root).map_err(|err| StoreError::io(&self.root, err))?;
        tmp.write_all(&render_pretty(content))
            .map_err(|err| StoreError::io(tmp.path(), err))?;
        let persisted = if overwrite {
            tmp.persist(path)
        } else {
            tmp.persist_noclobber(path)
        };
        persisted.map_err(|err| StoreError::io(path, err.error))?;
        Ok(())
    }

    /// `None` when nothing is stored at `path`.
    pub fn fingerprint_of(&self, path: &Path) -> Result<Option<Fingerprint>, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(path, err)),
        };
        let content: Value = serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(Fingerprint::of(&content)))
    }

    /// Every file named `<key>.<ext>`. Anything else in the directory is ignored.
    pub fn scan_all(&self) -> Result<BTreeMap<TimestampKey, PathBuf>, StoreError> {
        let mut out = BTreeMap::new();
        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(StoreError::io(&self.root, err)),
        };

        for entry in read_dir {
            let entry = entry.map_err(|err| StoreError::io(&self.root, err))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(TimestampKey::parse)
            else {
                continue;
            };
            out.insert(key, path);
        }
        Ok(out)
    }
}

/// Four-space indented JSON with a trailing newline.
fn render_pretty(content: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    // Serializing a `Value` into memory cannot fail.
    let _ = content.serialize(&mut ser);
    buf.push(b'\n');
    buf
}
