use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inputs to the resume health checks, gathered by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckInput {
    pub last_reconciliation_passed: bool,
    pub data_as_of: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub duplicate_order_intents_24h: u32,
    pub enabled_strategies: usize,
}

impl HealthCheckInput {
    /// Everything green at `now`.
    pub fn healthy(now: DateTime<Utc>) -> Self {
        Self {
            last_reconciliation_passed: true,
            data_as_of: Some(now),
            now,
            duplicate_order_intents_24h: 0,
            enabled_strategies: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthFailure {
    ReconciliationNotPassed,
    NoMarketData,
    DataStale { age_hours: i64 },
    DuplicateOrderIntents { count: u32 },
    NoStrategyEnabled,
}

impl std::fmt::Display for HealthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReconciliationNotPassed => write!(f, "last reconciliation did not pass"),
            Self::NoMarketData => write!(f, "no market data timestamp"),
            Self::DataStale { age_hours } => write!(f, "market data is {age_hours}h old"),
            Self::DuplicateOrderIntents { count } => {
                write!(f, "{count} duplicate order intent(s) in trailing 24h")
            }
            Self::NoStrategyEnabled => write!(f, "no strategy enabled"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub passed: bool,
    pub failures: Vec<HealthFailure>,
}

impl HealthReport {
    pub fn describe(&self) -> String {
        if self.passed {
            return "all checks passed".to_string();
        }
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// All checks are required. Data must be strictly younger than
/// `max_data_age_hours`.
pub fn run_health_checks(input: &HealthCheckInput, max_data_age_hours: i64) -> HealthReport {
    let mut failures = Vec::new();

    if !input.last_reconciliation_passed {
        failures.push(HealthFailure::ReconciliationNotPassed);
    }
    match input.data_as_of {
        None => failures.push(HealthFailure::NoMarketData),
        Some(as_of) => {
            let age = input.now - as_of;
            if age >= chrono::Duration::hours(max_data_age_hours) {
                failures.push(HealthFailure::DataStale {
                    age_hours: age.num_hours(),
                });
            }
        }
    }
    if input.duplicate_order_intents_24h > 0 {
        failures.push(HealthFailure::DuplicateOrderIntents {
            count: input.duplicate_order_intents_24h,
        });
    }
    if input.enabled_strategies == 0 {
        failures.push(HealthFailure::NoStrategyEnabled);
    }

    HealthReport {
        passed: failures.is_empty(),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn each_check_is_required() {
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 21, 0, 0).unwrap();
        assert!(run_health_checks(&HealthCheckInput::healthy(now), 72).passed);

        let mut i = HealthCheckInput::healthy(now);
        i.data_as_of = Some(now - Duration::hours(72));
        let r = run_health_checks(&i, 72);
        assert_eq!(r.failures, vec![HealthFailure::DataStale { age_hours: 72 }]);

        let mut i = HealthCheckInput::healthy(now);
        i.data_as_of = Some(now - Duration::hours(71) - Duration::minutes(59));
        assert!(run_health_checks(&i, 72).passed);

        let i = HealthCheckInput {
            last_reconciliation_passed: false,
            data_as_of: None,
            now,
            duplicate_order_intents_24h: 2,
            enabled_strategies: 0,
        };
        assert_eq!(run_health_checks(&i, 72).failures.len(), 4);
    }
}
