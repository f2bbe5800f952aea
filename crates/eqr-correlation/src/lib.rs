//! eqr-correlation
//!
//! Dual-window correlation gate for candidate BUYs.
//!
//! The gate keeps a rolling close history per symbol and compares the simple
//! returns of a candidate against every held symbol over a long and a short
//! window. The candidate is rejected if EITHER window's |correlation| exceeds
//! the threshold: a long-window check alone misses a recent regime shift, a
//! short-window check alone misses a persistent relationship.
//!
//! SELLs reduce exposure and bypass the gate.

use std::collections::{BTreeMap, VecDeque};

use eqr_schemas::Side;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Returns in the long window (sessions).
    pub long_window: usize,
    /// Returns in the short window (sessions).
    pub short_window: usize,
    /// Reject when |corr| is strictly above this.
    pub threshold: f64,
    /// Reject a BUY when some held symbol cannot be compared in either
    /// window for lack of closes. Off: admit it and report the pair as
    /// unchecked.
    pub reject_on_short_history: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            long_window: 60,
            short_window: 20,
            threshold: 0.7,
            reject_on_short_history: true,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationWindow {
    Long,
    Short,
}

/// Outcome of [`CorrelationGate::accepts`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationDecision {
    pub accepted: bool,
    /// Largest |corr| seen against any held symbol in either window.
    pub max_abs_corr: f64,
    /// Held symbol that caused the rejection (first one past the threshold,
    /// in symbol order).
    pub conflicting_symbol: Option<String>,
    /// None with a conflicting symbol: rejected for short history.
    pub window: Option<CorrelationWindow>,
    /// Held symbols that could not be compared in either window.
    #[serde(default)]
    pub unchecked: Vec<String>,
}

impl CorrelationDecision {
    fn accept(max_abs_corr: f64) -> Self {
        Self {
            accepted: true,
            max_abs_corr,
            conflicting_symbol: None,
            window: None,
            unchecked: Vec::new(),
        }
    }

    /// Human-readable reason for a rejection.
    pub fn reason(&self, candidate: &str) -> Option<String> {
        let sym = self.conflicting_symbol.as_deref()?;
        let w = match self.window {
            Some(CorrelationWindow::Short) => "short",
            Some(CorrelationWindow::Long) => "long",
            None => {
                return Some(format!(
                    "{candidate} vs held {sym}: not enough closes to check correlation"
                ))
            }
        };
        Some(format!(
            "{candidate} |corr|={:.3} vs held {sym} ({w} window)",
            self.max_abs_corr
        ))
    }
}

#[derive(Clone, Debug, Default)]
pub struct CorrelationGate {
    config: CorrelationConfig,
    closes: BTreeMap<String, VecDeque<i64>>,
}

impl CorrelationGate {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            closes: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    fn capacity(&self) -> usize {
        self.config.long_window.max(self.config.short_window) + 1
    }

    /// Append one session close. History is capped to what the longer
    /// window needs.
    pub fn record_close(&mut self, symbol: &str, close_micros: i64) {
        let cap = self.capacity();
        let h = self.closes.entry(symbol.to_string()).or_default();
        h.push_back(close_micros);
        while h.len() > cap {
            h.pop_front();
        }
    }

    pub fn record_closes<'a, I>(&mut self, closes: I)
    where
        I: IntoIterator<Item = (&'a String, &'a i64)>,
    {
        for (sym, px) in closes {
            self.record_close(sym, *px);
        }
    }

    /// Replace a symbol's history, oldest first.
    pub fn load_history(&mut self, symbol: &str, closes: &[i64]) {
        let cap = self.capacity();
        let start = closes.len().saturating_sub(cap);
        self.closes
            .insert(symbol.to_string(), closes[start..].iter().copied().collect());
    }

    pub fn history_len(&self, symbol: &str) -> usize {
        self.closes.get(symbol).map(VecDeque::len).unwrap_or(0)
    }

    /// Last `window` simple returns, or None without `window + 1` closes.
    fn returns(&self, symbol: &str, window: usize) -> Option<Vec<f64>> {
        let h = self.closes.get(symbol)?;
        if window == 0 || h.len() < window + 1 {
            return None;
        }
        let tail: Vec<i64> = h.iter().skip(h.len() - (window + 1)).copied().collect();
        Some(
            tail.windows(2)
                .map(|w| {
                    if w[0] == 0 {
                        0.0
                    } else {
                        (w[1] - w[0]) as f64 / w[0] as f64
                    }
                })
                .collect(),
        )
    }

    fn window_len(&self, window: CorrelationWindow) -> usize {
        match window {
            CorrelationWindow::Long => self.config.long_window,
            CorrelationWindow::Short => self.config.short_window,
        }
    }

    /// Correlation of `a` and `b` over one window, if both have the data.
    pub fn correlation(&self, a: &str, b: &str, window: CorrelationWindow) -> Option<f64> {
        let n = self.window_len(window);
        let ra = self.returns(a, n)?;
        let rb = self.returns(b, n)?;
        pearson(&ra, &rb)
    }

    /// Admission check for a candidate BUY against the held symbols.
    ///
    /// A flat series contributes no rejection. A held symbol that neither
    /// window can compare (too few closes on either side) is listed in
    /// `unchecked` and, with `reject_on_short_history`, rejects the
    /// candidate. A held symbol equal to the candidate is skipped; adding to
    /// an existing position is the heat gate's concern.
    pub fn accepts<S: AsRef<str>>(&self, candidate: &str, held: &[S]) -> CorrelationDecision {
        let mut max_abs = 0.0_f64;
        let mut conflict: Option<(String, CorrelationWindow)> = None;
        let mut unchecked: Vec<String> = Vec::new();

        for h in held {
            let h = h.as_ref();
            if h == candidate {
                continue;
            }
            let mut compared = false;
            for window in [CorrelationWindow::Long, CorrelationWindow::Short] {
                let n = self.window_len(window);
                let (Some(ra), Some(rb)) = (self.returns(candidate, n), self.returns(h, n)) else {
                    continue;
                };
                compared = true;
                let Some(c) = pearson(&ra, &rb) else {
                    tracing::debug!(candidate, held = h, ?window, "flat series, no correlation");
                    continue;
                };
                let abs = c.abs();
                if abs > max_abs {
                    max_abs = abs;
                }
                if abs > self.config.threshold && conflict.is_none() {
                    conflict = Some((h.to_string(), window));
                }
            }
            if !compared {
                tracing::warn!(
                    candidate,
                    held = h,
                    candidate_closes = self.history_len(candidate),
                    held_closes = self.history_len(h),
                    "correlation unchecked: short history"
                );
                unchecked.push(h.to_string());
            }
        }

        let (conflicting_symbol, window) = match conflict {
            Some((sym, window)) => (Some(sym), Some(window)),
            None if self.config.reject_on_short_history && !unchecked.is_empty() => {
                (unchecked.first().cloned(), None)
            }
            None => (None, None),
        };
        CorrelationDecision {
            accepted: conflicting_symbol.is_none(),
            max_abs_corr: max_abs,
            conflicting_symbol,
            window,
            unchecked,
        }
    }

    /// Side-aware wrapper: SELLs always pass.
    pub fn check<S: AsRef<str>>(&self, side: Side, candidate: &str, held: &[S]) -> CorrelationDecision {
        match side {
            Side::Sell => CorrelationDecision::accept(0.0),
            Side::Buy => self.accepts(candidate, held),
        }
    }
}

/// Pearson correlation. None for mismatched/short input or zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - ma;
        let dy = y - mb;
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }
    if va <= 0.0 || vb <= 0.0 {
        return None;
    }
    Some((cov / (va * vb).sqrt()).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_basics() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[1.0, 1.0, 1.0, 1.0]), None);
        assert_eq!(pearson(&a, &b[..3]), None);
    }

    #[test]
    fn history_is_capped() {
        let mut g = CorrelationGate::new(CorrelationConfig {
            long_window: 3,
            short_window: 2,
            threshold: 0.7,
            ..CorrelationConfig::default()
        });
        for px in 1..=10 {
            g.record_close("SPY", px);
        }
        assert_eq!(g.history_len("SPY"), 4);
    }
}
