use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SnapPaths {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub state_dir: PathBuf,
    pub repo_dir: PathBuf,
}

impl SnapPaths {
    /// Layout rooted at `home` without consulting the environment.
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            data_dir: home.join("data"),
            logs_dir: home.join("logs"),
            state_dir: home.join("state"),
            repo_dir: home.clone(),
            home,
        }
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<SnapPaths> {
    let home = match env::var("WINDSNAP_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join("windsnap"),
    };
    let defaults = SnapPaths::under(&home);

    Ok(SnapPaths {
        data_dir: env_or_default_path("WINDSNAP_DATA_DIR", defaults.data_dir),
        logs_dir: env_or_default_path("WINDSNAP_LOGS_DIR", defaults.logs_dir),
        state_dir: defaults.state_dir,
        repo_dir: env_or_default_path("WINDSNAP_REPO_DIR", defaults.repo_dir),
        home,
    })
}
