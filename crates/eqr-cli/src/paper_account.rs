//! Paper broker state carried between CLI invocations, so consecutive
//! `run-session` calls reconcile against the account the previous one left.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use eqr_audit::{read_json_opt, write_json_atomic};
use eqr_broker::{capture_snapshot, PaperBroker, RetryPolicy};
use eqr_portfolio::CostModelConfig;
use eqr_schemas::{BrokerPosition, SnapshotKind};
use serde::{Deserialize, Serialize};

pub const PAPER_BROKER_JSON: &str = "paper_broker.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperAccount {
    pub cash_micros: i64,
    pub positions: Vec<BrokerPosition>,
    #[serde(default)]
    pub open_order_ids: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

pub fn paper_account_path(state_dir: &Path) -> PathBuf {
    state_dir.join(PAPER_BROKER_JSON)
}

/// Rebuild the broker from its saved account, or open a fresh one funded
/// with `initial_cash_micros`.
pub fn open_paper_broker(state_dir: &Path, initial_cash_micros: i64, cost: CostModelConfig) -> Result<PaperBroker> {
    let path = paper_account_path(state_dir);
    let Some(account) = read_json_opt::<PaperAccount>(&path)? else {
        tracing::info!(path = %path.display(), cash_micros = initial_cash_micros, "new paper account");
        return Ok(PaperBroker::new(initial_cash_micros, cost));
    };
    let mut broker = PaperBroker::new(account.cash_micros, cost);
    for p in &account.positions {
        broker.set_position(p.symbol.clone(), p.shares, p.avg_price_micros);
    }
    for id in &account.open_order_ids {
        broker.add_open_order(id.clone());
    }
    Ok(broker)
}

pub fn save_paper_broker(state_dir: &Path, broker: &mut PaperBroker, at: DateTime<Utc>) -> Result<()> {
    let snap = capture_snapshot(broker, &RetryPolicy::immediate(1), SnapshotKind::End, at)
        .context("read paper account")?;
    let account = PaperAccount {
        cash_micros: snap.cash_micros,
        positions: snap.positions.into_values().collect(),
        open_order_ids: snap.open_order_ids.into_iter().collect(),
        saved_at: at,
    };
    write_json_atomic(&paper_account_path(state_dir), &account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_round_trips_through_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = open_paper_broker(dir.path(), 50_000_000, CostModelConfig::zero()).unwrap();
        b.set_position("AAA", 3, 10_000_000);
        b.set_cash(20_000_000);
        b.add_open_order("x-1");
        save_paper_broker(dir.path(), &mut b, Utc::now()).unwrap();

        let reopened = open_paper_broker(dir.path(), 1, CostModelConfig::zero()).unwrap();
        assert_eq!(reopened.cash_micros(), 20_000_000);
        assert_eq!(reopened.shares("AAA"), 3);
    }
}
