//! Trading session gate.
//!
//! A signal arriving outside the session is skipped without consuming its
//! dedup slot: the gate is an environmental condition, not a disposition,
//! and the feed will re-deliver.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::MarketHoursConfig;

#[derive(Debug, Clone)]
pub struct MarketHours {
    enabled: bool,
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketHours {
    /// Builds the gate from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the timezone name or the HH:MM session bounds
    /// cannot be parsed.
    pub fn from_config(config: &MarketHoursConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid market timezone {}: {e}", config.timezone))?;
        let open = NaiveTime::parse_from_str(&config.open, "%H:%M")
            .with_context(|| format!("invalid session open: {}", config.open))?;
        let close = NaiveTime::parse_from_str(&config.close, "%H:%M")
            .with_context(|| format!("invalid session close: {}", config.close))?;

        Ok(Self {
            enabled: config.enabled,
            timezone,
            open,
            close,
        })
    }

    /// True if `at` falls inside the trading session (weekday, within the
    /// configured window, in the market timezone). Always true when the
    /// gate is disabled.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }

        let local = at.with_timezone(&self.timezone);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }

        let time = local.time();
        time >= self.open && time <= self.close
    }
}
