use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Write bytes durably: temp file in the same directory, fsync, rename over
/// the target, then fsync the directory so the rename itself survives a crash.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;

    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)
            .with_context(|| format!("create temp file {:?}", temp_path))?;
        file.write_all(bytes)
            .with_context(|| format!("write temp file {:?}", temp_path))?;
        file.sync_all()
            .with_context(|| format!("fsync temp file {:?}", temp_path))?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("rename {:?} -> {:?}", temp_path, path))?;

    #[cfg(unix)]
    {
        let dir = File::open(parent).with_context(|| format!("open dir {:?}", parent))?;
        dir.sync_all().with_context(|| format!("fsync dir {:?}", parent))?;
    }

    Ok(())
}

/// Pretty JSON + trailing newline, written with [`write_atomic`].
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).context("serialize json")?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// `Ok(None)` when the file does not exist; parse errors propagate.
pub fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    let v = serde_json::from_str(&raw).with_context(|| format!("parse {:?}", path))?;
    Ok(Some(v))
}
