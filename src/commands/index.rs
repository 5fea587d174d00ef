use anyhow::Result;

use crate::commands::CommandReport;
use crate::snap::audit;
use crate::snap::config::load_config;
use crate::snap::ledger::IndexLedger;
use crate::snap::lock::CycleLock;
use crate::snap::paths::resolve_paths;
use crate::snap::state;
use crate::snap::store::SnapshotStore;

/// Rebuild the ledger from whatever is on disk, without fetching.
pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.home, &paths.data_dir)?;
    let mut report = CommandReport::new("index");

    let lock = CycleLock::acquire(&paths.logs_dir)?;
    report.detail(format!("lock_file={}", lock.path().display()));

    let store = SnapshotStore::new(&cfg.store);
    report.detail(format!("data_dir={}", store.root().display()));

    let scanned = store.scan_all()?;
    let ledger = IndexLedger::rebuild(scanned.keys());
    let ledger_path = ledger.persist(&cfg.store.index_path())?;

    report.detail(format!("ledger.path={}", ledger_path.display()));
    report.detail(format!("ledger.len={}", ledger.len()));
    match ledger.latest() {
        Some(latest) => report.detail(format!("ledger.latest={latest}")),
        None => report.detail("ledger.latest=none"),
    }

    audit::append_event(
        &paths,
        "ledger",
        "ok",
        &format!("rebuilt ledger={} len={}", ledger_path.display(), ledger.len()),
    )?;

    let mut st = state::load(&paths)?;
    st.ledger_len = ledger.len();
    st.latest_key = ledger.latest().map(|k| k.to_string());
    state::save(&paths, &st)?;

    Ok(report)
}
