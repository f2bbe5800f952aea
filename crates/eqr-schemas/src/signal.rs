use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Side;

/// A signal exactly as a strategy produced it. Every field is optional here so
/// that a missing field is caught by [`Signal::try_from`] instead of silently
/// reading as absent downstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub id: Option<String>,
    pub strategy_id: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
    pub confidence: Option<f64>,
    pub as_of: Option<NaiveDate>,
}

/// Validated, immutable signal. Maps to exactly one terminal state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    pub generated_at: DateTime<Utc>,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub as_of: NaiveDate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SignalValidationError {
    MissingField { field: &'static str },
    EmptyField { field: &'static str },
    UnknownSide { value: String },
    ConfidenceOutOfRange { value: f64 },
}

impl std::fmt::Display for SignalValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "signal field '{field}' is missing"),
            Self::EmptyField { field } => write!(f, "signal field '{field}' is empty"),
            Self::UnknownSide { value } => {
                write!(f, "signal side '{value}' is not BUY or SELL")
            }
            Self::ConfidenceOutOfRange { value } => {
                write!(f, "signal confidence {value} is outside [0, 1]")
            }
        }
    }
}

impl std::error::Error for SignalValidationError {}

fn required_str(v: Option<String>, field: &'static str) -> Result<String, SignalValidationError> {
    let s = v.ok_or(SignalValidationError::MissingField { field })?;
    let s = s.trim().to_string();
    if s.is_empty() {
        return Err(SignalValidationError::EmptyField { field });
    }
    Ok(s)
}

impl TryFrom<RawSignal> for Signal {
    type Error = SignalValidationError;

    fn try_from(raw: RawSignal) -> Result<Self, Self::Error> {
        let id = required_str(raw.id, "id")?;
        let strategy_id = required_str(raw.strategy_id, "strategy_id")?;
        let symbol = required_str(raw.symbol, "symbol")?.to_ascii_uppercase();
        let side_raw = required_str(raw.side, "side")?;
        let side = Side::parse(&side_raw)
            .ok_or_else(|| SignalValidationError::UnknownSide { value: side_raw.clone() })?;
        let generated_at = raw
            .generated_at
            .ok_or(SignalValidationError::MissingField { field: "generated_at" })?;
        let confidence = raw
            .confidence
            .ok_or(SignalValidationError::MissingField { field: "confidence" })?;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(SignalValidationError::ConfidenceOutOfRange { value: confidence });
        }
        let as_of = raw
            .as_of
            .ok_or(SignalValidationError::MissingField { field: "as_of" })?;

        Ok(Signal {
            id,
            strategy_id,
            symbol,
            side,
            generated_at,
            confidence,
            as_of,
        })
    }
}

impl Signal {
    /// Raw record carrying every field of this signal (used by sources that
    /// build signals programmatically).
    pub fn to_raw(&self) -> RawSignal {
        RawSignal {
            id: Some(self.id.clone()),
            strategy_id: Some(self.strategy_id.clone()),
            symbol: Some(self.symbol.clone()),
            side: Some(self.side.as_str().to_string()),
            generated_at: Some(self.generated_at),
            confidence: Some(self.confidence),
            as_of: Some(self.as_of),
        }
    }
}
