use config::{Config, ConfigError, Environment};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::entities::ledger_transaction::TransactionType;

const DEFAULT_LOOKBACK_DAYS: i64 = 30;
const DEFAULT_SAFETY_DAYS: i64 = 3;
const DEFAULT_LEAD_TIME_DAYS: i32 = 7;

/// Application configuration (database wiring, event buffer).
///
/// Loaded from the environment with the `STOCKLEDGER__` prefix, e.g.
/// `STOCKLEDGER__DATABASE_URL=postgres://...`.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_event_buffer() -> usize {
    256
}

impl AppConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
            event_buffer: default_event_buffer(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("STOCKLEDGER").separator("__"))
            .build()?
            .try_deserialize()
    }
}

/// Per-tenant forecast configuration.
///
/// Passed explicitly into every forecast computation rather than read from
/// ambient state, so results are deterministic and independently testable.
/// Callers may override individual fields per call.
#[derive(Clone, Debug, Deserialize)]
pub struct ForecastSettings {
    /// Size of the historical consumption window, in days. Must be positive.
    pub lookback_days: i64,

    /// Buffer added on top of lead time when recommending a reorder date.
    pub safety_days: i64,

    /// Lead time used for components that do not specify their own.
    pub default_lead_time_days: i32,

    /// Multiplier applied to a component's reorder point when flagging it as
    /// below the warning threshold.
    pub reorder_warning_multiplier: Decimal,

    /// Transaction types excluded from the consumption calculation, e.g.
    /// seed adjustments that would inflate the apparent burn rate.
    pub excluded_types: Vec<TransactionType>,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            safety_days: DEFAULT_SAFETY_DAYS,
            default_lead_time_days: DEFAULT_LEAD_TIME_DAYS,
            reorder_warning_multiplier: dec!(1.0),
            excluded_types: vec![TransactionType::Adjustment],
        }
    }
}

impl ForecastSettings {
    /// Returns a copy with the supplied overrides applied.
    pub fn with_overrides(&self, overrides: &ForecastOverrides) -> Self {
        let mut settings = self.clone();
        if let Some(lookback) = overrides.lookback_days {
            settings.lookback_days = lookback;
        }
        if let Some(safety) = overrides.safety_days {
            settings.safety_days = safety;
        }
        if let Some(excluded) = &overrides.excluded_types {
            settings.excluded_types = excluded.clone();
        }
        settings
    }
}

/// Per-call overrides for [`ForecastSettings`].
#[derive(Clone, Debug, Default)]
pub struct ForecastOverrides {
    pub lookback_days: Option<i64>,
    pub safety_days: Option<i64>,
    pub excluded_types: Option<Vec<TransactionType>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_supplied_fields() {
        let base = ForecastSettings::default();
        let over = ForecastOverrides {
            lookback_days: Some(90),
            ..Default::default()
        };
        let merged = base.with_overrides(&over);
        assert_eq!(merged.lookback_days, 90);
        assert_eq!(merged.safety_days, base.safety_days);
        assert_eq!(merged.excluded_types, base.excluded_types);
    }
}
