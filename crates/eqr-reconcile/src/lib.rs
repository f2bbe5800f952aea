//! eqr-reconcile
//!
//! Broker reconciliation. The broker is the system of record: any difference
//! between the local book and a broker snapshot pauses the reconciler, and a
//! paused reconciler blocks all new admission until a clean reconciliation or
//! a manual resume with an operator reason.
//!
//! - [`reconcile`] is the pure comparison (no IO).
//! - [`Reconciler`] owns the durable ACTIVE/PAUSED state, the snapshot
//!   watermark, event emission and notification.
//! - [`SnapshotLog`] tracks the mandatory START/END snapshots per session.

mod engine;
mod reconciler;
mod snapshot_log;
mod types;
mod watermark;

pub use engine::{reconcile, within_tolerance};
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerState};
pub use snapshot_log::{log_snapshot, SnapshotLog};
pub use types::{Discrepancy, LocalBook, LocalPosition, ReconcileConfig, ReconcileReport};
pub use watermark::{SnapshotFreshness, SnapshotWatermark};
