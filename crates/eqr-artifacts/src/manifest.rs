use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use eqr_audit::{read_json_opt, write_json_atomic};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MANIFEST_JSON: &str = "manifest.json";
pub const EVENTS_JSONL: &str = "events.jsonl";
pub const DAILY_REPORT_JSON: &str = "daily_report.json";
pub const TRADES_CSV: &str = "trades.csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: i32,
    pub run_id: Uuid,
    pub engine_id: String,
    /// `PAPER` for the in-process broker, `BACKTEST` for harness runs.
    pub mode: String,
    pub config_hash: String,
    pub session_date: Option<chrono::NaiveDate>,
    pub created_at_utc: DateTime<Utc>,
    pub artifacts: ArtifactList,
}

/// File names relative to the run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactList {
    pub events_jsonl: String,
    pub manifest_json: String,
    pub daily_report_json: String,
    pub trades_csv: String,
}

impl Default for ArtifactList {
    fn default() -> Self {
        Self {
            events_jsonl: EVENTS_JSONL.to_string(),
            manifest_json: MANIFEST_JSON.to_string(),
            daily_report_json: DAILY_REPORT_JSON.to_string(),
            trades_csv: TRADES_CSV.to_string(),
        }
    }
}

pub struct InitRunArtifactsArgs<'a> {
    pub exports_root: &'a Path,
    pub schema_version: i32,
    pub run_id: Uuid,
    pub engine_id: &'a str,
    pub mode: &'a str,
    pub config_hash: &'a str,
    pub session_date: Option<chrono::NaiveDate>,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub manifest: RunManifest,
}

impl RunArtifacts {
    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join(&self.manifest.artifacts.manifest_json)
    }

    pub fn events_path(&self) -> PathBuf {
        self.run_dir.join(&self.manifest.artifacts.events_jsonl)
    }

    pub fn daily_report_path(&self) -> PathBuf {
        self.run_dir.join(&self.manifest.artifacts.daily_report_json)
    }

    pub fn trades_path(&self) -> PathBuf {
        self.run_dir.join(&self.manifest.artifacts.trades_csv)
    }
}

/// Create `<exports_root>/<run_id>/` and write its manifest.
///
/// Re-initialising an existing run directory rewrites the manifest only;
/// the event log and exports already there are left alone.
pub fn init_run_artifacts(args: InitRunArtifactsArgs<'_>) -> Result<RunArtifacts> {
    let run_dir = args.exports_root.join(args.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("create exports dir failed: {}", run_dir.display()))?;

    let manifest = RunManifest {
        schema_version: args.schema_version,
        run_id: args.run_id,
        engine_id: args.engine_id.to_string(),
        mode: args.mode.to_string(),
        config_hash: args.config_hash.to_string(),
        session_date: args.session_date,
        created_at_utc: args.created_at_utc,
        artifacts: ArtifactList::default(),
    };

    let artifacts = RunArtifacts { run_dir, manifest };
    write_json_atomic(&artifacts.manifest_path(), &artifacts.manifest)?;
    tracing::debug!(run_id = %args.run_id, dir = %artifacts.run_dir.display(), "run artifacts initialised");
    Ok(artifacts)
}

/// Open an existing run directory by reading its manifest.
pub fn open_run_dir(run_dir: &Path) -> Result<RunArtifacts> {
    let path = run_dir.join(MANIFEST_JSON);
    let manifest: RunManifest = read_json_opt(&path)?
        .with_context(|| format!("no manifest in run dir {}", run_dir.display()))?;
    Ok(RunArtifacts {
        run_dir: run_dir.to_path_buf(),
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips_through_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let made = init_run_artifacts(InitRunArtifactsArgs {
            exports_root: dir.path(),
            schema_version: 1,
            run_id,
            engine_id: "eqr",
            mode: "PAPER",
            config_hash: "abc",
            session_date: None,
            created_at_utc: Utc::now(),
        })
        .unwrap();
        assert_eq!(made.run_dir, dir.path().join(run_id.to_string()));

        let opened = open_run_dir(&made.run_dir).unwrap();
        assert_eq!(opened.manifest, made.manifest);
        assert!(open_run_dir(dir.path()).is_err());
    }
}
