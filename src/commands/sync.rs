use anyhow::Result;

use crate::commands::{CommandReport, describe_cycle};
use crate::snap::watcher::{self, CycleOptions};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub no_commit: bool,
}

pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("sync");

    let cycle = watcher::run_once(&CycleOptions {
        skip_commit: opts.no_commit,
    })?;
    report.detail(format!("data_dir={}", cycle.paths.data_dir.display()));
    report.detail(format!("conflict_policy={}", cycle.conflict_policy));
    describe_cycle(&mut report, &cycle.report);

    match (&cycle.commit, &cycle.commit_error) {
        (Some(outcome), _) => report.detail(format!("commit={}", outcome.as_str())),
        (None, Some(err)) => report.issue(format!("commit failed: {err}")),
        (None, None) => report.detail("commit=skipped"),
    }
    report.detail(format!("state_file={}", cycle.state_file));
    report.detail(format!("status={}", cycle.status()));

    Ok(report)
}
