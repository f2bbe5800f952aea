use std::ops::Range;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub train_sessions: usize,
    pub test_sessions: usize,
    pub step_sessions: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_sessions: 504,
            test_sessions: 126,
            step_sessions: 126,
        }
    }
}

/// One walk-forward split, as session index ranges into the history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub index: usize,
    pub train: Range<usize>,
    pub test: Range<usize>,
}

/// Windows start at 0 and advance by `step` while
/// `start < n - train - test`. A zero step yields at most one window.
pub fn walk_forward_windows(n_sessions: usize, cfg: &WalkForwardConfig) -> Vec<Window> {
    let span = cfg.train_sessions + cfg.test_sessions;
    let Some(limit) = n_sessions.checked_sub(span) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut start = 0usize;
    while start < limit {
        let train_end = start + cfg.train_sessions;
        out.push(Window {
            index: out.len(),
            train: start..train_end,
            test: train_end..train_end + cfg.test_sessions,
        });
        if cfg.step_sessions == 0 {
            break;
        }
        start += cfg.step_sessions;
    }
    out
}
