#[path = "src/env_keys.rs"]
mod env_keys;

use env_keys::{ENV_PREFIX, WARN_TAG};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

fn rust_sources(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            rust_sources(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

/// Setting names mentioned in `source`: the prefix followed by at least one `[A-Z0-9_]`.
fn setting_names(source: &str) -> impl Iterator<Item = &str> {
    source.match_indices(ENV_PREFIX).filter_map(move |(start, _)| {
        let tail = &source[start + ENV_PREFIX.len()..];
        let len = tail
            .bytes()
            .take_while(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
            .count();
        let name = &source[start..start + ENV_PREFIX.len() + len];
        (len > 0 && name != WARN_TAG).then_some(name)
    })
}

fn write_setting_allowlist() -> std::io::Result<()> {
    let mut sources = Vec::new();
    rust_sources(Path::new("src"), &mut sources)?;

    let mut names = BTreeSet::new();
    for file in sources {
        if let Ok(content) = fs::read_to_string(&file) {
            names.extend(setting_names(&content).map(str::to_string));
        }
    }

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let mut f = fs::File::create(Path::new(&out_dir).join("windsnap_env_allowlist.rs"))?;
    writeln!(f, "pub const GENERATED_ENV_ALLOWLIST: &[&str] = &[")?;
    for name in names {
        writeln!(f, "    \"{name}\",")?;
    }
    writeln!(f, "];")?;
    Ok(())
}

fn main() {
    write_setting_allowlist().expect("failed to generate WINDSNAP setting allowlist");

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("clock before epoch");
    println!(
        "cargo:rustc-env=BUILD_UUID={:x}-{:x}",
        now.as_secs(),
        now.subsec_nanos()
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
