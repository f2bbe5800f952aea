//! Snapshot monotonicity.
//!
//! A snapshot is accepted only if its `captured_at` is not older than the last
//! accepted one. Rejections do not move the watermark.

use chrono::{DateTime, Utc};
use eqr_schemas::BrokerSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotFreshness {
    Fresh,
    Stale {
        watermark: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

impl SnapshotFreshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SnapshotFreshness::Fresh)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotWatermark {
    last_accepted: Option<DateTime<Utc>>,
}

impl SnapshotWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted watermark.
    pub fn at(last_accepted: Option<DateTime<Utc>>) -> Self {
        Self { last_accepted }
    }

    pub fn check(&self, snap: &BrokerSnapshot) -> SnapshotFreshness {
        match self.last_accepted {
            Some(wm) if snap.captured_at < wm => SnapshotFreshness::Stale {
                watermark: wm,
                got: snap.captured_at,
            },
            _ => SnapshotFreshness::Fresh,
        }
    }

    pub fn accept(&mut self, snap: &BrokerSnapshot) -> SnapshotFreshness {
        let r = self.check(snap);
        if r.is_fresh() {
            self.last_accepted = Some(snap.captured_at);
        }
        r
    }

    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }
}
