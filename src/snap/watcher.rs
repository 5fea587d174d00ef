use crate::snap::audit;
use crate::snap::commit::{self, CommitOutcome, CommitRequest};
use crate::snap::config::{SyncConfig, load_config};
use crate::snap::engine::{CycleAborted, CycleReport, Reconciler};
use crate::snap::fetch::HttpFetcher;
use crate::snap::lock::CycleLock;
use crate::snap::paths::{SnapPaths, resolve_paths};
use crate::snap::state::{self, SyncState};
use crate::snap::util::now_epoch_secs;
use crate::snap::warn::{self, WarnEvent};
use anyhow::Result;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    pub skip_commit: bool,
}

#[derive(Debug)]
pub struct SyncCycleOutcome {
    pub paths: SnapPaths,
    pub poll_interval_secs: u64,
    pub conflict_policy: String,
    pub report: CycleReport,
    pub commit: Option<CommitOutcome>,
    pub commit_error: Option<String>,
    pub state_file: String,
}

impl SyncCycleOutcome {
    pub fn status(&self) -> &'static str {
        if self.report.is_clean() && self.commit_error.is_none() {
            "ok"
        } else {
            "degraded"
        }
    }
}

fn summarize(report: &CycleReport) -> String {
    format!(
        "cycle={} written={} duplicates={} failed=[{}] stale=[{}] conflicts={} change_warnings={} corrupt={} ledger_len={}",
        report.cycle_key,
        report.written_count(),
        report.duplicates.len(),
        report.failed_slots().join(","),
        report.stale_slots().join(","),
        report.conflicts.len(),
        report.change_warnings.len(),
        report.corrupt_records.len(),
        report.ledger_len
    )
}

fn record_aborted_cycle(paths: &SnapPaths, aborted: &CycleAborted) -> Result<()> {
    audit::append_event(
        paths,
        "sync",
        "failed",
        &format!("{} error={aborted}", summarize(&aborted.report)),
    )?;
    let mut st = state::load(paths)?;
    st.last_cycle_epoch_secs = Some(now_epoch_secs()?);
    st.last_cycle_status = Some("failed".to_string());
    st.last_failed_slots = aborted.report.failed_slots();
    st.consecutive_failed_cycles += 1;
    state::save(paths, &st)?;
    Ok(())
}

fn run_commit(paths: &SnapPaths, cfg: &SyncConfig) -> (Option<CommitOutcome>, Option<String>) {
    let req = CommitRequest {
        repo_dir: &paths.repo_dir,
        data_dir: &cfg.store.root,
        message: &cfg.commit.message,
        push: cfg.commit.push,
        timeout_secs: cfg.commit.timeout_secs,
    };
    match commit::commit_and_push(&req) {
        Ok(outcome) => (Some(outcome), None),
        Err(err) => {
            let message = format!("{err:#}");
            warn::emit(WarnEvent {
                code: "COMMIT_FAILED",
                stage: "commit",
                action: "commit-data-dir",
                slot: "na",
                key: "na",
                retry: "next-cycle",
                reason: "git-failed",
                err: &message,
            });
            (None, Some(message))
        }
    }
}

/// One full cycle with a fresh engine, so change warnings never carry over between cycles.
pub fn run_once(opts: &CycleOptions) -> Result<SyncCycleOutcome> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.home, &paths.data_dir)?;
    let clock = cfg.clock()?;
    let _lock = CycleLock::acquire(&paths.logs_dir)?;

    let fetcher = HttpFetcher::new(&cfg.upstream)?;
    let mut engine = Reconciler::from_config(fetcher, &cfg);
    let report = match engine.run_cycle(clock.now()) {
        Ok(report) => report,
        Err(aborted) => {
            record_aborted_cycle(&paths, &aborted)?;
            return Err(aborted.into());
        }
    };

    let summary = summarize(&report);
    audit::append_event(
        &paths,
        "sync",
        if report.is_clean() { "ok" } else { "degraded" },
        &summary,
    )?;

    let (commit, commit_error) = if cfg.commit.enabled && !opts.skip_commit {
        let (outcome, error) = run_commit(&paths, &cfg);
        audit::append_event(
            &paths,
            "commit",
            if error.is_none() { "ok" } else { "degraded" },
            &match (&outcome, &error) {
                (Some(outcome), _) => format!("outcome={}", outcome.as_str()),
                (None, Some(err)) => format!("error={err}"),
                (None, None) => "outcome=unknown".to_string(),
            },
        )?;
        (outcome, error)
    } else {
        (None, None)
    };

    let previous = state::load(&paths)?;
    let st = SyncState {
        last_cycle_epoch_secs: Some(now_epoch_secs()?),
        last_cycle_status: Some(if report.is_clean() { "ok" } else { "degraded" }.to_string()),
        last_stored: report.written_count(),
        last_duplicates: report.duplicates.len(),
        last_failed_slots: report.failed_slots(),
        ledger_len: report.ledger_len,
        latest_key: engine
            .store()
            .scan_all()?
            .keys()
            .next_back()
            .map(|k| k.to_string()),
        consecutive_failed_cycles: if report.written_count() == 0 && !report.failed.is_empty() {
            previous.consecutive_failed_cycles + 1
        } else {
            0
        },
        ..previous
    };
    let state_file = state::save(&paths, &st)?;

    Ok(SyncCycleOutcome {
        paths,
        poll_interval_secs: cfg.watcher.poll_interval_secs,
        conflict_policy: cfg.store.conflict_policy.to_string(),
        report,
        commit,
        commit_error,
        state_file: state_file.display().to_string(),
    })
}

pub fn run_daemon(opts: &CycleOptions) -> Result<()> {
    loop {
        let cycle = run_once(opts)?;
        eprintln!("windsnap cycle: {}", summarize(&cycle.report));
        thread::sleep(Duration::from_secs(cycle.poll_interval_secs));
    }
}
