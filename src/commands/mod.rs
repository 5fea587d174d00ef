pub mod index;
pub mod status;
pub mod sync;
pub mod verify;
pub mod watch;

use crate::snap::engine::CycleReport;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// Per-slot failures are expected, so they land in details rather than issues.
pub fn describe_cycle(report: &mut CommandReport, cycle: &CycleReport) {
    report.detail(format!("cycle.key={}", cycle.cycle_key));
    report.detail(format!("cycle.written={}", cycle.written_count()));
    report.detail(format!("cycle.duplicates={}", cycle.duplicates.len()));
    report.detail(format!("cycle.failed_slots={}", cycle.failed_slots().join(",")));
    report.detail(format!("cycle.stale_slots={}", cycle.stale_slots().join(",")));
    for failure in &cycle.failed {
        report.detail(format!(
            "cycle.failed slot={} key={} kind={}",
            failure.slot, failure.key, failure.kind
        ));
    }
    for dup in &cycle.duplicates {
        report.detail(format!(
            "cycle.duplicate slot={} key={} reused_key={}",
            dup.slot, dup.key, dup.reused_key
        ));
    }
    for conflict in &cycle.conflicts {
        report.detail(format!(
            "cycle.conflict slot={} key={} resolution={}",
            conflict.slot,
            conflict.key,
            conflict.resolution.as_str()
        ));
    }
    for warning in &cycle.change_warnings {
        report.detail(format!(
            "cycle.change_warning slot={} key={} previous={} current={}",
            warning.slot,
            warning.key,
            warning.previous.short(),
            warning.current.short()
        ));
    }
    for key in &cycle.corrupt_records {
        report.detail(format!("cycle.corrupt_record key={key}"));
    }
    if let Some(path) = &cycle.ledger_path {
        report.detail(format!("ledger.path={}", path.display()));
    }
    report.detail(format!("ledger.len={}", cycle.ledger_len));
}

#[cfg(test)]
mod tests {
    use super::CommandReport;

    #[test]
    fn issue_marks_report_not_ok_and_merge_propagates() {
        let mut outer = CommandReport::new("sync");
        let mut inner = CommandReport::new("verify");
        inner.issue("ledger drift");
        outer.detail("cycle.written=2");
        outer.merge(inner);

        assert!(!outer.ok);
        assert_eq!(outer.details, vec!["cycle.written=2"]);
        assert_eq!(outer.issues, vec!["ledger drift"]);
    }
}
