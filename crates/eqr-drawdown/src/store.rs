use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use eqr_audit::{read_json_opt, write_json_atomic};

use crate::machine::{DrawdownState, Transition};

const STATE_FILE: &str = "drawdown_state.json";
const TRANSITIONS_DIR: &str = "drawdown_transitions";

/// On-disk layout under a state directory:
///
/// ```text
/// <dir>/drawdown_state.json
/// <dir>/drawdown_transitions/<ts>_s<session>_<FROM>_to_<TO>.json
/// ```
#[derive(Clone, Debug)]
pub struct DrawdownStore {
    dir: PathBuf,
}

impl DrawdownStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn transitions_dir(&self) -> PathBuf {
        self.dir.join(TRANSITIONS_DIR)
    }

    pub fn load(&self) -> Result<Option<DrawdownState>> {
        read_json_opt(&self.state_path())
    }

    pub fn save(&self, state: &DrawdownState) -> Result<()> {
        write_json_atomic(&self.state_path(), state)
    }

    pub fn write_transition(&self, t: &Transition) -> Result<PathBuf> {
        let name = format!(
            "{}_s{:06}_{}_to_{}.json",
            t.at.format("%Y%m%dT%H%M%S%.6fZ"),
            t.session_index,
            t.from.as_str(),
            t.to.as_str()
        );
        let path = self.transitions_dir().join(name);
        write_json_atomic(&path, t)?;
        Ok(path)
    }

    /// All recorded transitions, oldest first.
    pub fn list_transitions(&self) -> Result<Vec<Transition>> {
        let dir = self.transitions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("read_dir {:?}", dir))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect();
        paths.sort();

        let mut out = Vec::with_capacity(paths.len());
        for p in paths {
            if let Some(t) = read_json_opt::<Transition>(&p)? {
                out.push(t);
            }
        }
        Ok(out)
    }
}
