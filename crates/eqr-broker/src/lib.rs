//! eqr-broker
//!
//! The broker boundary: a request/response trait ([`BrokerClient`]), its
//! error taxonomy, a read-only retry policy, deterministic client order ids,
//! the order-intent journal used for duplicate detection, and a deterministic
//! in-memory [`PaperBroker`].
//!
//! Retry rules:
//! - `get_positions` / `get_account` / `get_open_orders` are idempotent and
//!   may be retried with backoff on [`BrokerError::Transient`].
//! - `submit_order` and `close_position` are never retried. An ambiguous
//!   outcome surfaces as [`BrokerError::Ambiguous`] and the caller resolves
//!   the signal as a broker rejection; reconciliation catches the rest.

mod intents;
mod paper;
mod retry;
mod types;

pub use intents::{client_order_id, IntentKind, OrderIntent, OrderIntentJournal};
pub use paper::{PaperBroker, PaperFaults};
pub use retry::{capture_snapshot, RetryPolicy};
pub use types::{BrokerClient, BrokerError, OrderAck, OrderRequest, OrderStatus};
