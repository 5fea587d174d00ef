use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::commands::CommandReport;
use crate::error::StoreError;
use crate::snap::config::load_config;
use crate::snap::fingerprint::Fingerprint;
use crate::snap::key::TimestampKey;
use crate::snap::ledger::{self, IndexLedger};
use crate::snap::paths::resolve_paths;
use crate::snap::store::SnapshotStore;

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub strict: bool,
}

pub fn run(opts: &VerifyOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.home, &paths.data_dir)?;
    let store = SnapshotStore::new(&cfg.store);
    let mut report = CommandReport::new("verify");

    let scanned = store.scan_all()?;
    let expected = IndexLedger::rebuild(scanned.keys());
    report.detail(format!("records={}", scanned.len()));

    let index_path = cfg.store.index_path();
    match ledger::read_entries(&index_path) {
        Ok(entries) => check_ledger(&mut report, &entries, &expected),
        Err(err) => report.issue(format!("ledger unreadable: {err:#}")),
    }

    let mut groups: BTreeMap<Fingerprint, Vec<&TimestampKey>> = BTreeMap::new();
    for key in scanned.keys() {
        match store.read(key) {
            Ok(content) => groups.entry(Fingerprint::of(&content)).or_default().push(key),
            Err(StoreError::NotFound { .. }) => {
                report.issue(format!("record vanished during verify: {key}"));
            }
            Err(err @ StoreError::Corrupt { .. }) => {
                report.issue(format!("corrupt record {key}: {err}"));
            }
            Err(err) => return Err(err.into()),
        }
    }

    let mut shared = 0usize;
    for (fingerprint, keys) in groups.iter().filter(|(_, keys)| keys.len() > 1) {
        shared += 1;
        let joined = keys
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let line = format!(
            "identical content fingerprint={} keys={joined}",
            fingerprint.short()
        );
        if opts.strict {
            report.issue(line);
        } else {
            report.detail(line);
        }
    }
    report.detail(format!("identical_content_groups={shared}"));

    Ok(report)
}

fn check_ledger(report: &mut CommandReport, entries: &[String], expected: &IndexLedger) {
    report.detail(format!("ledger.entries={}", entries.len()));
    if entries.is_empty() && !expected.is_empty() {
        report.issue("ledger is missing or empty while records exist");
        return;
    }

    let stored = expected
        .keys()
        .iter()
        .map(|k| k.as_str())
        .collect::<BTreeSet<_>>();
    let mut seen = BTreeSet::new();
    for entry in entries {
        if !seen.insert(entry.as_str()) {
            report.issue(format!("ledger lists {entry} more than once"));
        }
        if !stored.contains(entry.as_str()) {
            report.issue(format!("ledger lists {entry} but no record exists"));
        }
    }
    for key in stored.difference(&seen) {
        report.issue(format!("record {key} missing from ledger"));
    }

    let mut listed = entries
        .iter()
        .filter(|e| stored.contains(e.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();
    listed.dedup();
    let descending = listed.windows(2).all(|pair| pair[0] > pair[1]);
    if !descending {
        report.issue("ledger is not sorted most recent first");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_of(raw: &[&str]) -> IndexLedger {
        let keys = raw
            .iter()
            .map(|k| TimestampKey::parse(k).expect("key"))
            .collect::<Vec<_>>();
        IndexLedger::rebuild(&keys)
    }

    fn entries(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matching_ledger_has_no_issues() {
        let mut report = CommandReport::new("verify");
        check_ledger(
            &mut report,
            &entries(&["20250220-1400", "20250220-1300"]),
            &ledger_of(&["20250220-1300", "20250220-1400"]),
        );
        assert!(report.ok, "{:?}", report.issues);
    }

    #[test]
    fn drift_is_reported_per_kind() {
        let mut report = CommandReport::new("verify");
        check_ledger(
            &mut report,
            &entries(&["20250220-1300", "20250220-1400", "20250220-1400", "20990101-0000"]),
            &ledger_of(&["20250220-1300", "20250220-1400", "20250220-1500"]),
        );
        assert!(!report.ok);
        let joined = report.issues.join("\n");
        assert!(joined.contains("20250220-1400 more than once"));
        assert!(joined.contains("20990101-0000 but no record exists"));
        assert!(joined.contains("record 20250220-1500 missing from ledger"));
        assert!(joined.contains("not sorted most recent first"));
    }
}
