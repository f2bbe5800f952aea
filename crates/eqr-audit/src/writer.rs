use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::event::{AuditEvent, EventSink, NewEvent};

/// Append-only event log writer. Writes JSON Lines (one event per line) and
/// fsyncs every line before returning.
///
/// With `hash_chain` on, each event carries `hash_prev` + `hash_self` so that
/// any later edit of the file is detectable by [`verify_hash_chain`].
pub struct AuditWriter {
    path: PathBuf,
    run_id: Uuid,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Number of events already in the log; the next event's `seq`.
    seq: u64,
}

impl AuditWriter {
    /// Creates the writer and ensures parent dirs exist. If the log already
    /// exists (restart), the sequence counter and chain head are restored from
    /// its last line so the chain continues unbroken.
    pub fn new(path: impl AsRef<Path>, run_id: Uuid, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        let mut w = Self {
            path,
            run_id,
            hash_chain,
            last_hash: None,
            seq: 0,
        };

        if w.path.exists() {
            let existing = read_events(&w.path)?;
            w.seq = existing.len() as u64;
            w.last_hash = existing.last().and_then(|e| e.hash_self.clone());
        }

        Ok(w)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    fn append(&mut self, event: NewEvent) -> Result<AuditEvent> {
        let event_id = derive_event_id(self.run_id, self.last_hash.as_deref(), &event.payload, self.seq)?;

        let mut ev = AuditEvent {
            event_id,
            run_id: self.run_id,
            seq: self.seq,
            ts_utc: Utc::now(),
            event_type: event.event_type,
            strategy_id: event.strategy_id,
            symbol: event.symbol,
            stage: event.stage,
            payload: event.payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            let self_hash = compute_event_hash(&ev)?;
            ev.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;
        self.seq += 1;

        Ok(ev)
    }
}

impl EventSink for AuditWriter {
    fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn emit(&mut self, event: NewEvent) -> Result<AuditEvent> {
        self.append(event)
    }
}

/// Deterministic id: v5 under the run namespace over (seq, chain head, payload).
fn derive_event_id(run_id: Uuid, prev: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let payload_json = serde_json::to_string(payload).context("serialize payload for event id")?;
    let name = format!("{}:{}:{}", seq, prev.unwrap_or("-"), payload_json);
    Ok(Uuid::new_v5(&run_id, name.as_bytes()))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open event log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write event line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    f.sync_data().context("fsync event log failed")?;
    Ok(())
}

/// Sort keys recursively and emit compact JSON: one event == one line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize event failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash over the canonical JSON of the event WITHOUT `hash_self`.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read event log {:?}", path.as_ref()))?;
    read_events_str(&content)
}

pub fn read_events_str(content: &str) -> Result<Vec<AuditEvent>> {
    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse event at line {}", i + 1))?;
        out.push(ev);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read event log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse event at line {}", i + 1))?;
        line_count += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        if let Some(ref claimed) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}
