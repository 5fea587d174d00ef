use crate::snap::key::TimestampKey;
use anyhow::{Result, anyhow};
use chrono::{Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_URL_TEMPLATE: &str = "https://a.windbornesystems.com/treasure/{slot}.json";
pub const SLOT_PLACEHOLDER: &str = "{slot}";
const MAX_SLOT_COUNT: u8 = 100;

/// What a write does when its key already holds different content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    #[default]
    KeepFirst,
    KeepLatest,
    FailOnConflict,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepFirst => "keep-first",
            Self::KeepLatest => "keep-latest",
            Self::FailOnConflict => "fail-on-conflict",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "keep-first" => Ok(Self::KeepFirst),
            "keep-latest" => Ok(Self::KeepLatest),
            "fail-on-conflict" => Ok(Self::FailOnConflict),
            other => Err(anyhow!(
                "invalid conflict policy `{other}`: use keep-first, keep-latest or fail-on-conflict"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url_template: String,
    pub slot_count: u8,
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            slot_count: 24,
            request_timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    pub fn url_for(&self, slot_label: &str) -> String {
        self.url_template.replace(SLOT_PLACEHOLDER, slot_label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Filled from the resolved paths, never from the config file.
    #[serde(skip)]
    pub root: PathBuf,
    pub extension: String,
    pub index_file: String,
    pub conflict_policy: ConflictPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            extension: "json".to_string(),
            index_file: "index.json".to_string(),
            conflict_policy: ConflictPolicy::KeepFirst,
        }
    }
}

impl StoreConfig {
    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.index_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub enabled: bool,
    pub push: bool,
    pub message: String,
    pub timeout_secs: u64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            push: false,
            message: "Update data".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// `local`, `utc`, or an IANA zone name.
    pub timezone: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timezone: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Clock {
    Local,
    Utc,
    Zone(Tz),
}

impl Clock {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "local" | "" => Ok(Self::Local),
            "utc" | "UTC" => Ok(Self::Utc),
            name => name
                .parse::<Tz>()
                .map(Self::Zone)
                .map_err(|err| anyhow!("invalid timezone `{name}`: {err}")),
        }
    }

    /// Wall-clock time in the configured zone; keys are derived from this.
    pub fn now(self) -> NaiveDateTime {
        match self {
            Self::Local => Local::now().naive_local(),
            Self::Utc => Utc::now().naive_utc(),
            Self::Zone(tz) => Utc::now().with_timezone(&tz).naive_local(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    pub upstream: UpstreamConfig,
    pub store: StoreConfig,
    pub watcher: WatcherConfig,
    pub commit: CommitConfig,
    pub clock: ClockConfig,
}

impl SyncConfig {
    pub fn clock(&self) -> Result<Clock> {
        Clock::parse(&self.clock.timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSyncConfig {
    upstream: Option<UpstreamConfig>,
    store: Option<StoreConfig>,
    watcher: Option<WatcherConfig>,
    commit: Option<CommitConfig>,
    clock: Option<ClockConfig>,
}

/// Unset or blank keeps `fallback`; anything unparseable is an error.
fn parse_override<T>(var: &str, raw: Option<String>, fallback: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(fallback),
        Some(v) => v
            .parse::<T>()
            .map_err(|err| anyhow!("invalid {var}=`{v}`: {err}")),
    }
}

fn parse_bool_override(var: &str, raw: Option<String>, fallback: bool) -> Result<bool> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(fallback),
        Some("1" | "true" | "TRUE" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "FALSE" | "no" | "off") => Ok(false),
        Some(v) => Err(anyhow!("invalid {var}=`{v}`: expected true or false")),
    }
}

fn env_or_parsed<T>(var: &str, fallback: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    parse_override(var, env::var(var).ok(), fallback)
}

fn env_or_bool(var: &str, fallback: bool) -> Result<bool> {
    parse_bool_override(var, env::var(var).ok(), fallback)
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

pub fn validate(cfg: &SyncConfig) -> Result<()> {
    if !cfg.upstream.url_template.contains(SLOT_PLACEHOLDER) {
        return Err(anyhow!(
            "invalid url template: must contain the {SLOT_PLACEHOLDER} placeholder"
        ));
    }
    if cfg.upstream.slot_count == 0 || cfg.upstream.slot_count > MAX_SLOT_COUNT {
        return Err(anyhow!(
            "invalid slot count: require 1 <= slot_count <= {MAX_SLOT_COUNT}"
        ));
    }
    if cfg.upstream.request_timeout_secs == 0 {
        return Err(anyhow!("invalid request timeout: must be >= 1 second"));
    }
    let ext = cfg.store.extension.trim();
    if ext.is_empty() || ext.contains('.') || ext.contains('/') {
        return Err(anyhow!("invalid store extension `{ext}`"));
    }
    let index_file = cfg.store.index_file.trim();
    if index_file.is_empty() || index_file.contains('/') {
        return Err(anyhow!("invalid index file name `{index_file}`"));
    }
    let index_stem = Path::new(index_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if TimestampKey::parse(index_stem).is_some() {
        return Err(anyhow!(
            "invalid index file name `{index_file}`: collides with a record key"
        ));
    }
    if cfg.watcher.poll_interval_secs == 0 {
        return Err(anyhow!(
            "invalid watcher poll interval: must be >= 1 second"
        ));
    }
    if cfg.commit.message.trim().is_empty() {
        return Err(anyhow!("invalid commit message: cannot be empty"));
    }
    cfg.clock()?;
    Ok(())
}

fn resolve_config_path(home: &Path) -> PathBuf {
    if let Ok(custom) = env::var("WINDSNAP_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    home.join("windsnap.toml")
}

fn merge_file_config(base: &mut SyncConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PartialSyncConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    if let Some(upstream) = parsed.upstream {
        base.upstream = upstream;
    }
    if let Some(store) = parsed.store {
        base.store = store;
    }
    if let Some(watcher) = parsed.watcher {
        base.watcher = watcher;
    }
    if let Some(commit) = parsed.commit {
        base.commit = commit;
    }
    if let Some(clock) = parsed.clock {
        base.clock = clock;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut SyncConfig) -> Result<()> {
    cfg.upstream.url_template = env_or_string("WINDSNAP_URL_TEMPLATE", &cfg.upstream.url_template);
    cfg.upstream.slot_count = env_or_parsed("WINDSNAP_SLOT_COUNT", cfg.upstream.slot_count)?;
    cfg.upstream.request_timeout_secs = env_or_parsed(
        "WINDSNAP_REQUEST_TIMEOUT_SECS",
        cfg.upstream.request_timeout_secs,
    )?;
    cfg.store.extension = env_or_string("WINDSNAP_STORE_EXT", &cfg.store.extension);
    cfg.store.index_file = env_or_string("WINDSNAP_INDEX_FILE", &cfg.store.index_file);
    cfg.store.conflict_policy =
        env_or_parsed("WINDSNAP_CONFLICT_POLICY", cfg.store.conflict_policy)?;
    cfg.watcher.poll_interval_secs =
        env_or_parsed("WINDSNAP_POLL_INTERVAL_SECS", cfg.watcher.poll_interval_secs)?;
    cfg.commit.enabled = env_or_bool("WINDSNAP_COMMIT_ENABLED", cfg.commit.enabled)?;
    cfg.commit.push = env_or_bool("WINDSNAP_COMMIT_PUSH", cfg.commit.push)?;
    cfg.commit.message = env_or_string("WINDSNAP_COMMIT_MESSAGE", &cfg.commit.message);
    cfg.clock.timezone = env_or_string("WINDSNAP_TIMEZONE", &cfg.clock.timezone);
    Ok(())
}

/// Defaults, then `windsnap.toml`, then `WINDSNAP_*` overrides. `data_dir` becomes the store root.
pub fn load_config(home: &Path, data_dir: &Path) -> Result<SyncConfig> {
    let mut cfg = SyncConfig::default();
    merge_file_config(&mut cfg, &resolve_config_path(home))?;
    apply_env_overrides(&mut cfg)?;
    cfg.store.root = data_dir.to_path_buf();

    validate(&cfg)?;
    Ok(cfg)
}
