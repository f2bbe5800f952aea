use std::time::Duration;

use chrono::{DateTime, Utc};
use eqr_schemas::{BrokerSnapshot, SnapshotKind};
use serde::{Deserialize, Serialize};

use crate::types::{BrokerClient, BrokerError};

/// Bounded exponential backoff for idempotent reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests, backtests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// base * 2^(attempt-1), capped. attempt is 1-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Run a read. Only [`BrokerError::Transient`] is retried; the last error
    /// is returned once attempts are exhausted.
    pub fn read<T, F>(&self, op: &'static str, mut f: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Result<T, BrokerError>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < max => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(op, attempt, max_attempts = max, delay_ms = delay.as_millis() as u64, error = %e, "broker read failed, retrying");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Positions + account + open orders as one tagged snapshot. Each read is
/// retried independently under `retry`.
pub fn capture_snapshot(
    broker: &mut dyn BrokerClient,
    retry: &RetryPolicy,
    kind: SnapshotKind,
    captured_at: DateTime<Utc>,
) -> Result<BrokerSnapshot, BrokerError> {
    let positions = retry.read("get_positions", || broker.get_positions())?;
    let account = retry.read("get_account", || broker.get_account())?;
    let open_orders = retry.read("get_open_orders", || broker.get_open_orders())?;
    BrokerSnapshot::from_parts(kind, captured_at, positions, &account, open_orders).map_err(|e| {
        BrokerError::Malformed {
            op: "get_positions",
            reason: e.to_string(),
        }
    })
}
