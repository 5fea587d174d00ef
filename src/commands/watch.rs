use anyhow::Result;

use crate::commands::{CommandReport, describe_cycle};
use crate::snap::watcher::{self, CycleOptions};

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
    pub no_commit: bool,
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");
    let cycle_opts = CycleOptions {
        skip_commit: opts.no_commit,
    };

    if !opts.once {
        report.detail("starting windsnap watcher in daemon mode");
        watcher::run_daemon(&cycle_opts)?;
        return Ok(report);
    }

    let cycle = watcher::run_once(&cycle_opts)?;
    report.detail("windsnap watcher cycle completed");
    report.detail(format!("poll_interval_secs={}", cycle.poll_interval_secs));
    describe_cycle(&mut report, &cycle.report);
    if let Some(outcome) = cycle.commit {
        report.detail(format!("commit={}", outcome.as_str()));
    }
    if let Some(err) = cycle.commit_error {
        report.issue(format!("commit failed: {err}"));
    }
    report.detail(format!("state_file={}", cycle.state_file));

    Ok(report)
}
