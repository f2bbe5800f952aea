use eqr_schemas::{BrokerAccount, BrokerPosition, Side};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Deterministic per (run, signal); see [`crate::client_order_id`].
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub shares: i64,
    /// Price the engine sized and costed the order at.
    pub reference_price_micros: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Filled,
    Accepted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub broker_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub filled_shares: i64,
    pub avg_fill_price_micros: i64,
    pub commission_micros: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerError {
    /// Timeout, connection reset, rate limit. Safe to retry for reads only.
    Transient { op: &'static str, reason: String },
    /// The broker definitively refused the request.
    Rejected { reason: String },
    /// Outcome unknown (e.g. timeout after send). Never retried.
    Ambiguous { reason: String },
    /// A read answered with data the engine cannot trust. Never retried.
    Malformed { op: &'static str, reason: String },
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Transient { .. })
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient { op, reason } => write!(f, "broker {op} transient failure: {reason}"),
            Self::Rejected { reason } => write!(f, "broker rejected: {reason}"),
            Self::Ambiguous { reason } => write!(f, "broker outcome ambiguous: {reason}"),
            Self::Malformed { op, reason } => write!(f, "broker {op} malformed: {reason}"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Broker boundary. Every call site in the engine handles the error path:
/// reads feed reconciliation discrepancies, writes feed `REJECTED_BY_BROKER`.
pub trait BrokerClient {
    fn get_positions(&mut self) -> Result<Vec<BrokerPosition>, BrokerError>;
    fn get_account(&mut self) -> Result<BrokerAccount, BrokerError>;
    fn get_open_orders(&mut self) -> Result<Vec<String>, BrokerError>;
    fn submit_order(&mut self, req: &OrderRequest) -> Result<OrderAck, BrokerError>;
    fn close_position(&mut self, symbol: &str) -> Result<OrderAck, BrokerError>;
}
