use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deterministic client order id: uuid v5 of the signal id under the run id.
/// A replayed session cannot mint a second id for the same signal.
pub fn client_order_id(run_id: Uuid, signal_id: &str) -> String {
    Uuid::new_v5(&run_id, signal_id.as_bytes()).to_string()
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    /// Journaled before the order goes to the broker.
    #[default]
    Submit,
    /// A second attempt for an id already journaled; refused, never sent.
    Duplicate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub signal_id: String,
    pub symbol: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub kind: IntentKind,
}

/// Append-only journal of order intents, one JSON line each, fsynced before
/// the order is sent. Survives runs; feeds the duplicate-intent health check.
#[derive(Debug, Clone)]
pub struct OrderIntentJournal {
    path: PathBuf,
}

impl OrderIntentJournal {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, intent: &OrderIntent) -> Result<()> {
        let line = serde_json::to_string(intent).context("serialize order intent")?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open intent journal {:?}", self.path))?;
        f.write_all(line.as_bytes())
            .and_then(|_| f.write_all(b"\n"))
            .context("write order intent")?;
        f.sync_data().context("fsync intent journal")?;
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<OrderIntent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read intent journal {:?}", self.path))?;
        raw.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| {
                serde_json::from_str(l)
                    .with_context(|| format!("parse intent journal line {}", i + 1))
            })
            .collect()
    }

    /// Has this client order id been submitted before (any time)?
    pub fn contains(&self, client_order_id: &str) -> Result<bool> {
        Ok(self
            .load()?
            .iter()
            .any(|i| i.kind == IntentKind::Submit && i.client_order_id == client_order_id))
    }

    /// Journal a refused second attempt so the health check can see it.
    pub fn record_duplicate(&self, intent: &OrderIntent) -> Result<()> {
        self.append(&OrderIntent {
            kind: IntentKind::Duplicate,
            ..intent.clone()
        })
    }

    /// Duplicate attempts in `(now - window, now]`: every refused attempt,
    /// plus each extra submit of one client order id inside the window.
    pub fn duplicates_within(&self, now: DateTime<Utc>, window: Duration) -> Result<u32> {
        Ok(count_duplicates(&self.load()?, now, window))
    }
}

pub(crate) fn count_duplicates(intents: &[OrderIntent], now: DateTime<Utc>, window: Duration) -> u32 {
    let from = now - window;
    let mut seen: BTreeMap<&str, u32> = BTreeMap::new();
    let mut refused = 0u32;
    for i in intents.iter().filter(|i| i.at > from && i.at <= now) {
        match i.kind {
            IntentKind::Submit => *seen.entry(i.client_order_id.as_str()).or_insert(0) += 1,
            IntentKind::Duplicate => refused += 1,
        }
    }
    refused + seen.values().map(|n| n.saturating_sub(1)).sum::<u32>()
}
