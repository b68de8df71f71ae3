use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Storage resolution, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Raw,
    Minute,
    Hour,
    Day,
    Month,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Raw, Tier::Minute, Tier::Hour, Tier::Day, Tier::Month];
    /// Summary tiers in cascade order
    pub const SUMMARIES: [Tier; 4] = [Tier::Minute, Tier::Hour, Tier::Day, Tier::Month];

    pub fn table(self) -> &'static str {
        match self {
            Tier::Raw => "power_raw",
            Tier::Minute => "power_minute",
            Tier::Hour => "power_hour",
            Tier::Day => "power_day",
            Tier::Month => "power_month",
        }
    }

    /// Minimum spacing between two rows of this tier; raw has none.
    pub fn threshold(self) -> Duration {
        match self {
            Tier::Raw => Duration::zero(),
            Tier::Minute => Duration::minutes(1),
            Tier::Hour => Duration::minutes(60),
            Tier::Day => Duration::hours(24),
            Tier::Month => Duration::days(30),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Minute => "minute",
            Tier::Hour => "hour",
            Tier::Day => "day",
            Tier::Month => "month",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::Config(format!("unknown tier: {}", s)))
    }
}

/// Common view over rows of every tier.
pub trait MeterRecord {
    fn timestamp(&self) -> DateTime<Utc>;
    fn energy_nt(&self) -> f64;
    fn energy_ht(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct RawRow {
    #[serde(rename = "timestamp")]
    pub ts: DateTime<Utc>,
    #[serde(rename = "energyNT")]
    pub energy_nt: f64,
    #[serde(rename = "energyHT")]
    pub energy_ht: f64,
    pub power: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct SummaryRow {
    #[serde(rename = "timestamp")]
    pub ts: DateTime<Utc>,
    #[serde(rename = "energyNT")]
    pub energy_nt: f64,
    #[serde(rename = "energyHT")]
    pub energy_ht: f64,
}

impl MeterRecord for RawRow {
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn energy_nt(&self) -> f64 {
        self.energy_nt
    }
    fn energy_ht(&self) -> f64 {
        self.energy_ht
    }
}

impl MeterRecord for SummaryRow {
    fn timestamp(&self) -> DateTime<Utc> {
        self.ts
    }
    fn energy_nt(&self) -> f64 {
        self.energy_nt
    }
    fn energy_ht(&self) -> f64 {
        self.energy_ht
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TierRow {
    Raw(RawRow),
    Summary(SummaryRow),
}

impl MeterRecord for TierRow {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TierRow::Raw(r) => r.timestamp(),
            TierRow::Summary(r) => r.timestamp(),
        }
    }
    fn energy_nt(&self) -> f64 {
        match self {
            TierRow::Raw(r) => r.energy_nt,
            TierRow::Summary(r) => r.energy_nt,
        }
    }
    fn energy_ht(&self) -> f64 {
        match self {
            TierRow::Raw(r) => r.energy_ht,
            TierRow::Summary(r) => r.energy_ht,
        }
    }
}
