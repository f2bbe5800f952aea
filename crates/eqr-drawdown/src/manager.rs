use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use eqr_audit::{notify_best_effort, Notification, Notifier, Severity};
use eqr_broker::{BrokerClient, OrderAck, RetryPolicy};
use eqr_schemas::DrawdownMode;

use crate::health::HealthCheckInput;
use crate::machine::{step, DrawdownConfig, DrawdownState, Transition, TransitionKind};
use crate::store::DrawdownStore;

/// Result of one [`DrawdownStopManager::evaluate`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionEvaluation {
    pub mode: DrawdownMode,
    pub sizing_multiplier: f64,
    pub drawdown_bps: i64,
    pub transition: Option<Transition>,
    pub artifact_path: Option<PathBuf>,
    pub notified: bool,
    /// Entered PANIC with `force_flatten_on_panic` set; the caller should
    /// run [`flatten_all`].
    pub flatten_required: bool,
}

impl SessionEvaluation {
    pub fn blocks_new_entries(&self) -> bool {
        self.mode.blocks_new_entries()
    }
}

pub struct DrawdownStopManager {
    config: DrawdownConfig,
    state: DrawdownState,
    store: DrawdownStore,
}

impl DrawdownStopManager {
    /// Restore persisted state, or start fresh in NORMAL.
    pub fn open(config: DrawdownConfig, store: DrawdownStore) -> Result<Self> {
        let state = match store.load()? {
            Some(s) => {
                tracing::info!(
                    mode = %s.mode,
                    peak_value_micros = s.peak_value_micros,
                    cooldown_end = ?s.cooldown_end,
                    rampup_end = ?s.rampup_end,
                    "drawdown state restored"
                );
                s
            }
            None => DrawdownState::default(),
        };
        Ok(Self {
            config,
            state,
            store,
        })
    }

    pub fn config(&self) -> &DrawdownConfig {
        &self.config
    }

    pub fn state(&self) -> &DrawdownState {
        &self.state
    }

    pub fn store(&self) -> &DrawdownStore {
        &self.store
    }

    pub fn mode(&self) -> DrawdownMode {
        self.state.mode
    }

    pub fn sizing_multiplier(&self) -> f64 {
        self.state.sizing_multiplier
    }

    /// Evaluate at the start of a session. State and any transition artifact
    /// are durable before this returns; a persistence failure leaves the
    /// in-memory state untouched and is returned to the caller.
    pub fn evaluate(
        &mut self,
        session_index: u64,
        portfolio_value_micros: i64,
        health: &HealthCheckInput,
        notifier: &dyn Notifier,
        at: DateTime<Utc>,
    ) -> Result<SessionEvaluation> {
        let mut next = self.state.clone();
        let transition = step(
            &self.config,
            &mut next,
            session_index,
            portfolio_value_micros,
            health,
            at,
        );

        let artifact_path = match &transition {
            Some(t) => Some(self.store.write_transition(t)?),
            None => None,
        };
        self.store.save(&next)?;
        self.state = next;

        let drawdown_bps =
            crate::machine::drawdown_bps(self.state.peak_value_micros, portfolio_value_micros);

        let mut notified = false;
        let mut flatten_required = false;
        if let Some(t) = &transition {
            tracing::warn!(
                kind = ?t.kind,
                from = %t.from,
                to = %t.to,
                session_index,
                drawdown_bps = t.drawdown_bps,
                reason = %t.reason,
                "drawdown transition"
            );
            notified = notify_best_effort(notifier, notification_for(t));
            flatten_required = self.config.force_flatten_on_panic
                && t.to == DrawdownMode::Panic
                && t.from != DrawdownMode::Panic;
        }

        Ok(SessionEvaluation {
            mode: self.state.mode,
            sizing_multiplier: self.state.sizing_multiplier,
            drawdown_bps,
            transition,
            artifact_path,
            notified,
            flatten_required,
        })
    }
}

fn notification_for(t: &Transition) -> Notification {
    let severity = match t.kind {
        TransitionKind::Panic | TransitionKind::Escalate => Severity::Critical,
        TransitionKind::Halt | TransitionKind::CooldownExtended => Severity::Warning,
        TransitionKind::Rampup | TransitionKind::Resume => Severity::Info,
    };
    Notification::new(
        severity,
        format!("drawdown {} -> {}", t.from, t.to),
        format!("session {}: {}", t.session_index, t.reason),
    )
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlattenReport {
    pub closed: Vec<OrderAck>,
    /// (symbol, error)
    pub failures: Vec<(String, String)>,
}

impl FlattenReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Close every position the broker reports. Each close is attempted once;
/// failures are logged and collected, never fatal.
pub fn flatten_all(broker: &mut dyn BrokerClient, retry: &RetryPolicy) -> FlattenReport {
    let mut report = FlattenReport::default();
    let positions = match retry.read("get_positions", || broker.get_positions()) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "flatten: cannot list positions");
            report.failures.push(("*".to_string(), e.to_string()));
            return report;
        }
    };

    for p in positions.into_iter().filter(|p| p.shares != 0) {
        match broker.close_position(&p.symbol) {
            Ok(ack) => {
                tracing::warn!(symbol = %p.symbol, shares = p.shares, "flatten: position closed");
                report.closed.push(ack);
            }
            Err(e) => {
                tracing::error!(symbol = %p.symbol, error = %e, "flatten: close failed");
                report.failures.push((p.symbol, e.to_string()));
            }
        }
    }
    report
}
