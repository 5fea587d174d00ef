use anyhow::Result;
use std::env;
use std::fs;

use crate::commands::CommandReport;
use crate::env_keys::ENV_PREFIX;
use crate::snap::audit;
use crate::snap::config::load_config;
use crate::snap::lock::CYCLE_LOCK_FILE;
use crate::snap::paths::resolve_paths;
use crate::snap::state;

include!(concat!(env!("OUT_DIR"), "/windsnap_env_allowlist.rs"));

/// Prefixed variables that are set but never read, most likely typos.
fn unknown_env_vars(vars: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unknown = vars
        .into_iter()
        .filter(|name| name.starts_with(ENV_PREFIX))
        .filter(|name| !GENERATED_ENV_ALLOWLIST.contains(&name.as_str()))
        .collect::<Vec<_>>();
    unknown.sort();
    unknown
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_uuid={}", env!("BUILD_UUID")));
    report.detail(format!("home={}", paths.home.display()));
    for (name, path) in [
        ("data_dir", &paths.data_dir),
        ("logs_dir", &paths.logs_dir),
        ("state_dir", &paths.state_dir),
    ] {
        if path.exists() {
            report.detail(format!("path.{name}={}", path.display()));
        } else {
            report.detail(format!("path.{name}={} (not created yet)", path.display()));
        }
    }
    report.detail(format!("audit_log={}", audit::audit_log_path(&paths).display()));

    match load_config(&paths.home, &paths.data_dir) {
        Ok(cfg) => {
            report.detail(format!("upstream.url_template={}", cfg.upstream.url_template));
            report.detail(format!("upstream.slot_count={}", cfg.upstream.slot_count));
            report.detail(format!(
                "upstream.request_timeout_secs={}",
                cfg.upstream.request_timeout_secs
            ));
            report.detail(format!("store.conflict_policy={}", cfg.store.conflict_policy));
            report.detail(format!("store.index_path={}", cfg.store.index_path().display()));
            report.detail(format!(
                "watcher.poll_interval_secs={}",
                cfg.watcher.poll_interval_secs
            ));
            report.detail(format!("commit.enabled={}", cfg.commit.enabled));
            report.detail(format!("commit.push={}", cfg.commit.push));
            report.detail(format!("clock.timezone={}", cfg.clock.timezone));
        }
        Err(err) => report.issue(format!("invalid config: {err:#}")),
    }

    let lock_path = paths.logs_dir.join(CYCLE_LOCK_FILE);
    match fs::read_to_string(&lock_path) {
        Ok(raw) if !raw.trim().is_empty() => {
            report.detail(format!("cycle_lock.last_pid={}", raw.trim()));
        }
        _ => report.detail("cycle_lock=not_found"),
    }

    match state::load(&paths) {
        Ok(st) => {
            report.detail(format!(
                "state.last_cycle_status={}",
                st.last_cycle_status.as_deref().unwrap_or("never")
            ));
            if let Some(at) = st.last_cycle_epoch_secs {
                report.detail(format!("state.last_cycle_epoch_secs={at}"));
            }
            report.detail(format!("state.last_stored={}", st.last_stored));
            report.detail(format!("state.last_duplicates={}", st.last_duplicates));
            report.detail(format!(
                "state.last_failed_slots={}",
                st.last_failed_slots.join(",")
            ));
            report.detail(format!("state.ledger_len={}", st.ledger_len));
            report.detail(format!(
                "state.latest_key={}",
                st.latest_key.as_deref().unwrap_or("none")
            ));
            report.detail(format!(
                "state.consecutive_failed_cycles={}",
                st.consecutive_failed_cycles
            ));
        }
        Err(err) => report.issue(format!("state unreadable: {err:#}")),
    }

    for name in unknown_env_vars(env::vars_os().filter_map(|(name, _)| name.into_string().ok())) {
        report.issue(format!("unknown environment variable {name}"));
    }

    Ok(report)
}
