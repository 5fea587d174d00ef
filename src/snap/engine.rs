//! One reconciliation cycle: fetch every slot, drop content the store already
//! holds, write the rest under its derived key, then rebuild the index ledger
//! from a fresh scan of the store.

use crate::error::{FetchError, StoreError};
use crate::snap::config::SyncConfig;
use crate::snap::fetch::ContentFetcher;
use crate::snap::fingerprint::Fingerprint;
use crate::snap::key::{Slot, TimestampKey};
use crate::snap::ledger::IndexLedger;
use crate::snap::store::{SnapshotStore, WriteStatus};
use crate::snap::warn::{self, WarnEvent};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct SlotFailure {
    pub slot: String,
    pub key: TimestampKey,
    pub kind: String,
    pub message: String,
}

/// Fetch failed, but a record for the slot's key is already on disk.
#[derive(Debug, Clone, Serialize)]
pub struct StaleSlot {
    pub slot: String,
    pub key: TimestampKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredSlot {
    pub slot: String,
    pub key: TimestampKey,
    pub path: PathBuf,
    pub status: WriteStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateSlot {
    pub slot: String,
    pub key: TimestampKey,
    pub reused_key: TimestampKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentConflict {
    pub slot: String,
    pub key: TimestampKey,
    pub resolution: WriteStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeWarning {
    pub slot: String,
    pub key: TimestampKey,
    pub previous: Fingerprint,
    pub current: Fingerprint,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_key: TimestampKey,
    pub failed: Vec<SlotFailure>,
    pub stale: Vec<StaleSlot>,
    pub change_warnings: Vec<ChangeWarning>,
    pub stored: Vec<StoredSlot>,
    pub duplicates: Vec<DuplicateSlot>,
    pub conflicts: Vec<ContentConflict>,
    pub corrupt_records: BTreeSet<TimestampKey>,
    pub ledger_path: Option<PathBuf>,
    pub ledger_len: usize,
}

impl CycleReport {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            cycle_key: TimestampKey::from_datetime(now),
            failed: Vec::new(),
            stale: Vec::new(),
            change_warnings: Vec::new(),
            stored: Vec::new(),
            duplicates: Vec::new(),
            conflicts: Vec::new(),
            corrupt_records: BTreeSet::new(),
            ledger_path: None,
            ledger_len: 0,
        }
    }

    pub fn failed_slots(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.slot.clone()).collect()
    }

    pub fn stale_slots(&self) -> Vec<String> {
        self.stale.iter().map(|s| s.slot.clone()).collect()
    }

    /// Records that now exist because of this cycle (created or replaced).
    pub fn written_count(&self) -> usize {
        self.stored
            .iter()
            .filter(|s| matches!(s.status, WriteStatus::Created | WriteStatus::Replaced))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && self.conflicts.is_empty()
            && self.change_warnings.is_empty()
            && self.corrupt_records.is_empty()
    }
}

/// A store failure stopped the cycle. The ledger was not rewritten.
#[derive(Debug, Error)]
#[error("cycle {} aborted: {source}", .report.cycle_key)]
pub struct CycleAborted {
    pub report: Box<CycleReport>,
    #[source]
    pub source: StoreError,
}

pub struct Reconciler<F> {
    fetcher: F,
    store: SnapshotStore,
    index_path: PathBuf,
    slot_count: u8,
    last_seen: BTreeMap<Slot, Fingerprint>,
}

impl<F: ContentFetcher> Reconciler<F> {
    pub fn new(fetcher: F, store: SnapshotStore, index_path: PathBuf, slot_count: u8) -> Self {
        Self {
            fetcher,
            store,
            index_path,
            slot_count,
            last_seen: BTreeMap::new(),
        }
    }

    pub fn from_config(fetcher: F, cfg: &SyncConfig) -> Self {
        Self::new(
            fetcher,
            SnapshotStore::new(&cfg.store),
            cfg.store.index_path(),
            cfg.upstream.slot_count,
        )
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Forget fingerprints seen by earlier passes of this engine.
    pub fn reset_change_table(&mut self) {
        self.last_seen.clear();
    }

    pub fn run_cycle(&mut self, now: NaiveDateTime) -> Result<CycleReport, CycleAborted> {
        let mut report = CycleReport::new(now);
        match self.reconcile_slots(now, &mut report) {
            Ok(()) => Ok(report),
            Err(source) => Err(CycleAborted {
                report: Box::new(report),
                source,
            }),
        }
    }

    fn reconcile_slots(
        &mut self,
        now: NaiveDateTime,
        report: &mut CycleReport,
    ) -> Result<(), StoreError> {
        let mut known = self.store.scan_all()?;

        for slot in Slot::all(self.slot_count) {
            let key = TimestampKey::derive(now, slot);

            let content = match self.fetcher.fetch(slot) {
                Ok(content) => content,
                Err(err) => {
                    record_fetch_failure(report, slot, &key, self.store.exists(&key), &err);
                    continue;
                }
            };
            let fingerprint = Fingerprint::of(&content);

            if let Some(reused_key) = self.find_duplicate(&known, &fingerprint, report)? {
                report.duplicates.push(DuplicateSlot {
                    slot: slot.label(),
                    key,
                    reused_key,
                });
                continue;
            }

            let outcome = self.store.write(&key, &content)?;
            if matches!(
                outcome.status,
                WriteStatus::KeptExisting | WriteStatus::Replaced
            ) {
                warn::emit(WarnEvent {
                    code: "WRITE_CONFLICT",
                    stage: "store",
                    action: if outcome.status == WriteStatus::Replaced {
                        "replace-existing"
                    } else {
                        "keep-existing"
                    },
                    slot: &slot.label(),
                    key: key.as_str(),
                    retry: "none",
                    reason: "key-holds-different-content",
                    err: "na",
                });
                report.conflicts.push(ContentConflict {
                    slot: slot.label(),
                    key: key.clone(),
                    resolution: outcome.status,
                });
            }
            known.insert(key.clone(), outcome.path.clone());
            report.stored.push(StoredSlot {
                slot: slot.label(),
                key: key.clone(),
                path: outcome.path,
                status: outcome.status,
            });

            // The table tracks stored content; a kept-existing write stored nothing.
            if outcome.status != WriteStatus::KeptExisting
                && let Some(previous) = self.last_seen.insert(slot, fingerprint.clone())
                && previous != fingerprint
            {
                report.change_warnings.push(ChangeWarning {
                    slot: slot.label(),
                    key,
                    previous,
                    current: fingerprint,
                });
            }
        }

        // Rescan rather than trust `known`: the directory is the source of truth.
        let scanned = self.store.scan_all()?;
        let ledger = IndexLedger::rebuild(scanned.keys());
        report.ledger_path = Some(ledger.persist(&self.index_path)?);
        report.ledger_len = ledger.len();
        Ok(())
    }

    /// Newest stored record whose content fingerprint matches, recomputed from disk.
    fn find_duplicate(
        &self,
        known: &BTreeMap<TimestampKey, PathBuf>,
        fingerprint: &Fingerprint,
        report: &mut CycleReport,
    ) -> Result<Option<TimestampKey>, StoreError> {
        for (key, path) in known.iter().rev() {
            match self.store.fingerprint_of(path) {
                Ok(Some(existing)) if existing == *fingerprint => return Ok(Some(key.clone())),
                Ok(_) => {}
                Err(err @ StoreError::Corrupt { .. }) => {
                    if report.corrupt_records.insert(key.clone()) {
                        warn::emit(WarnEvent {
                            code: "RECORD_CORRUPT",
                            stage: "dedup",
                            action: "skip-record",
                            slot: "na",
                            key: key.as_str(),
                            retry: "none",
                            reason: "stored-record-unparseable",
                            err: &err.to_string(),
                        });
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

fn record_fetch_failure(
    report: &mut CycleReport,
    slot: Slot,
    key: &TimestampKey,
    already_stored: bool,
    err: &FetchError,
) {
    let quiet = matches!(err, FetchError::UnexpectedContentType { .. });
    if !quiet {
        warn::emit(WarnEvent {
            code: err.code(),
            stage: "fetch",
            action: "skip-slot",
            slot: &slot.label(),
            key: key.as_str(),
            retry: "next-cycle",
            reason: err.kind(),
            err: &err.to_string(),
        });
    }
    if already_stored {
        report.stale.push(StaleSlot {
            slot: slot.label(),
            key: key.clone(),
        });
    }
    report.failed.push(SlotFailure {
        slot: slot.label(),
        key: key.clone(),
        kind: err.kind().to_string(),
        message: err.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snap::config::{ConflictPolicy, StoreConfig};
    use crate::snap::ledger::read_entries;
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    enum Scripted {
        Content(Value),
        Transport,
        NotJson,
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        slots: BTreeMap<u8, Scripted>,
    }

    impl ScriptedFetcher {
        fn distinct(count: u8) -> Self {
            let slots = (0..count)
                .map(|i| (i, Scripted::Content(json!([[f64::from(i), 1.0, 2.0]]))))
                .collect();
            Self { slots }
        }

        fn set(&mut self, slot: u8, entry: Scripted) {
            self.slots.insert(slot, entry);
        }
    }

    impl ContentFetcher for ScriptedFetcher {
        fn fetch(&self, slot: Slot) -> Result<Value, FetchError> {
            match self.slots.get(&slot.index()) {
                Some(Scripted::Content(value)) => Ok(value.clone()),
                Some(Scripted::NotJson) => Err(FetchError::UnexpectedContentType {
                    slot: slot.label(),
                    content_type: "text/html".into(),
                }),
                Some(Scripted::Transport) | None => Err(FetchError::Transport {
                    slot: slot.label(),
                    message: "connection refused".into(),
                }),
            }
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 2, 20)
            .and_then(|d| d.and_hms_opt(14, 7, 30))
            .expect("valid now")
    }

    fn engine(
        root: &Path,
        fetcher: ScriptedFetcher,
        slot_count: u8,
        policy: ConflictPolicy,
    ) -> Reconciler<ScriptedFetcher> {
        let cfg = StoreConfig {
            root: root.to_path_buf(),
            conflict_policy: policy,
            ..StoreConfig::default()
        };
        Reconciler::new(
            fetcher,
            SnapshotStore::new(&cfg),
            cfg.index_path(),
            slot_count,
        )
    }

    fn slot_key(slot: u8) -> TimestampKey {
        TimestampKey::derive(now(), Slot::new(slot))
    }

    fn assert_ledger_matches_store(engine: &Reconciler<ScriptedFetcher>, root: &Path) {
        let entries = read_entries(&root.join("index.json")).expect("ledger");
        let mut expected = engine
            .store()
            .scan_all()
            .expect("scan")
            .keys()
            .map(|k| k.to_string())
            .collect::<Vec<_>>();
        expected.reverse();
        assert_eq!(entries, expected);
    }

    #[test]
    fn partial_failures_are_isolated() {
        let tmp = tempdir().expect("tempdir");
        let mut fetcher = ScriptedFetcher::distinct(24);
        fetcher.set(3, Scripted::Transport);
        fetcher.set(7, Scripted::Transport);
        let mut engine = engine(tmp.path(), fetcher, 24, ConflictPolicy::KeepFirst);

        let report = engine.run_cycle(now()).expect("cycle");

        assert_eq!(report.failed_slots(), vec!["03", "07"]);
        assert!(report.stale.is_empty());
        assert_eq!(report.written_count(), 22);
        assert_eq!(report.ledger_len, 22);
        for slot in (0..24u8).filter(|s| *s != 3 && *s != 7) {
            assert!(engine.store().exists(&slot_key(slot)), "slot {slot} missing");
        }
        assert!(!engine.store().exists(&slot_key(3)));
        assert_ledger_matches_store(&engine, tmp.path());
    }

    #[test]
    fn duplicate_content_is_not_written_again() {
        let tmp = tempdir().expect("tempdir");
        let content = json!([[51.5, -0.12, 9.8]]);
        let older = TimestampKey::parse("20250219-0000").expect("key");
        let store = SnapshotStore::new(&StoreConfig {
            root: tmp.path().to_path_buf(),
            ..StoreConfig::default()
        });
        store.write(&older, &content).expect("seed");

        let mut fetcher = ScriptedFetcher::default();
        fetcher.set(0, Scripted::Content(content));
        let mut engine = engine(tmp.path(), fetcher, 1, ConflictPolicy::KeepFirst);

        let report = engine.run_cycle(now()).expect("cycle");

        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].reused_key, older);
        assert!(!engine.store().exists(&slot_key(0)));
        let entries = read_entries(&tmp.path().join("index.json")).expect("ledger");
        assert_eq!(entries, vec!["20250219-0000"]);
    }

    #[test]
    fn over_precise_floats_still_deduplicate_against_stored_record() {
        let tmp = tempdir().expect("tempdir");
        let content: Value =
            serde_json::from_str("[[9.73575876580499574, 1], [51.50735095374219871, 2]]")
                .expect("parse body");
        let older = TimestampKey::parse("20250219-0000").expect("key");
        SnapshotStore::new(&StoreConfig {
            root: tmp.path().to_path_buf(),
            ..StoreConfig::default()
        })
        .write(&older, &content)
        .expect("seed");

        let mut fetcher = ScriptedFetcher::default();
        fetcher.set(0, Scripted::Content(content));
        let mut engine = engine(tmp.path(), fetcher, 1, ConflictPolicy::KeepFirst);

        let report = engine.run_cycle(now()).expect("cycle");

        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].reused_key, older);
        assert_eq!(report.written_count(), 0);
    }

    #[test]
    fn identical_slots_within_one_cycle_store_once() {
        let tmp = tempdir().expect("tempdir");
        let mut fetcher = ScriptedFetcher::default();
        fetcher.set(0, Scripted::Content(json!({"b": 2, "a": 1})));
        fetcher.set(1, Scripted::Content(json!({"a": 1, "b": 2})));
        let mut engine = engine(tmp.path(), fetcher, 2, ConflictPolicy::KeepFirst);

        let report = engine.run_cycle(now()).expect("cycle");

        assert_eq!(report.written_count(), 1);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].reused_key, slot_key(0));
    }

    #[test]
    fn failed_fetch_over_existing_key_is_stale() {
        let tmp = tempdir().expect("tempdir");
        let mut fetcher = ScriptedFetcher::distinct(4);
        fetcher.set(2, Scripted::Transport);
        fetcher.set(3, Scripted::NotJson);
        let mut engine = engine(tmp.path(), fetcher, 4, ConflictPolicy::KeepFirst);
        engine
            .store()
            .write(&slot_key(2), &json!(["earlier"]))
            .expect("seed");

        let report = engine.run_cycle(now()).expect("cycle");

        assert_eq!(report.failed_slots(), vec!["02", "03"]);
        assert_eq!(report.stale_slots(), vec!["02"]);
        assert_eq!(report.failed[1].kind, "unexpected-content-type");
        assert_eq!(report.ledger_len, 3);
        assert_ledger_matches_store(&engine, tmp.path());
    }

    #[test]
    fn keep_first_reports_conflict_and_keeps_old_content() {
        let tmp = tempdir().expect("tempdir");
        let mut fetcher = ScriptedFetcher::default();
        fetcher.set(0, Scripted::Content(json!(["new"])));
        let mut engine = engine(tmp.path(), fetcher, 1, ConflictPolicy::KeepFirst);
        engine
            .store()
            .write(&slot_key(0), &json!(["old"]))
            .expect("seed");

        let report = engine.run_cycle(now()).expect("cycle");

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].resolution, WriteStatus::KeptExisting);
        assert_eq!(report.written_count(), 0);
        assert_eq!(
            engine.store().read(&slot_key(0)).expect("read"),
            json!(["old"])
        );
    }

    #[test]
    fn fail_on_conflict_aborts_without_touching_ledger() {
        let tmp = tempdir().expect("tempdir");
        let mut fetcher = ScriptedFetcher::distinct(3);
        fetcher.set(1, Scripted::Content(json!(["new"])));
        let mut engine = engine(tmp.path(), fetcher, 3, ConflictPolicy::FailOnConflict);
        engine
            .store()
            .write(&slot_key(1), &json!(["old"]))
            .expect("seed");

        let err = engine.run_cycle(now()).expect_err("should abort");

        assert!(matches!(err.source, StoreError::Conflict { .. }));
        assert_eq!(err.report.written_count(), 1);
        assert!(err.report.ledger_path.is_none());
        assert!(!tmp.path().join("index.json").exists());
        assert!(!engine.store().exists(&slot_key(2)));
    }

    #[test]
    fn ledger_rebuild_drops_keys_removed_outside_the_engine() {
        let tmp = tempdir().expect("tempdir");
        let mut engine = engine(
            tmp.path(),
            ScriptedFetcher::distinct(2),
            2,
            ConflictPolicy::KeepFirst,
        );
        fs::write(tmp.path().join("index.json"), r#"["20990101-0000"]"#).expect("stale ledger");

        engine.run_cycle(now()).expect("cycle");

        assert_ledger_matches_store(&engine, tmp.path());
        let entries = read_entries(&tmp.path().join("index.json")).expect("ledger");
        assert_eq!(entries, vec!["20250220-1407", "20250220-1307"]);
    }

    #[test]
    fn corrupt_record_is_skipped_during_dedup() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("20250101-0000.json"), "{not json").expect("corrupt");
        let mut engine = engine(
            tmp.path(),
            ScriptedFetcher::distinct(1),
            1,
            ConflictPolicy::KeepFirst,
        );

        let report = engine.run_cycle(now()).expect("cycle");

        assert_eq!(report.written_count(), 1);
        assert_eq!(report.corrupt_records.len(), 1);
        assert_eq!(report.ledger_len, 2);
    }

    #[test]
    fn kept_existing_content_is_not_remembered_for_change_warnings() {
        let tmp = tempdir().expect("tempdir");
        let mut fetcher = ScriptedFetcher::default();
        fetcher.set(0, Scripted::Content(json!(["stored"])));
        let mut engine = engine(tmp.path(), fetcher, 1, ConflictPolicy::KeepFirst);
        engine.run_cycle(now()).expect("first cycle");

        engine.fetcher.set(0, Scripted::Content(json!(["rejected"])));
        let rerun = engine.run_cycle(now()).expect("same-key cycle");
        assert_eq!(rerun.conflicts.len(), 1);
        assert!(rerun.change_warnings.is_empty());

        engine.fetcher.set(0, Scripted::Content(json!(["next"])));
        let later = engine
            .run_cycle(now() + chrono::TimeDelta::hours(1))
            .expect("later cycle");
        assert_eq!(later.change_warnings.len(), 1);
        assert_eq!(
            later.change_warnings[0].previous,
            Fingerprint::of(&json!(["stored"]))
        );
    }

    #[test]
    fn change_warning_fires_only_when_engine_is_reused() {
        let tmp = tempdir().expect("tempdir");
        let mut fetcher = ScriptedFetcher::default();
        fetcher.set(0, Scripted::Content(json!(["first"])));
        let mut engine = engine(tmp.path(), fetcher, 1, ConflictPolicy::KeepFirst);

        let first = engine.run_cycle(now()).expect("first cycle");
        assert!(first.change_warnings.is_empty());

        engine.fetcher.set(0, Scripted::Content(json!(["second"])));
        let later = now() + chrono::TimeDelta::hours(1);
        let second = engine.run_cycle(later).expect("second cycle");
        assert_eq!(second.change_warnings.len(), 1);
        assert_eq!(second.change_warnings[0].slot, "00");

        engine.reset_change_table();
        engine.fetcher.set(0, Scripted::Content(json!(["third"])));
        let third = engine
            .run_cycle(later + chrono::TimeDelta::hours(1))
            .expect("third cycle");
        assert!(third.change_warnings.is_empty());
    }
}
