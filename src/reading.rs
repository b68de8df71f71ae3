use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One decoded meter telegram. Any field may be missing when its register
/// was not present in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// Cumulative register 1.8.1 (low tariff), kWh
    #[serde(rename = "energyNT", default)]
    pub energy_nt: Option<f64>,
    /// Cumulative register 1.8.2 (high tariff), kWh
    #[serde(rename = "energyHT", default)]
    pub energy_ht: Option<f64>,
    /// Instantaneous active power, W
    #[serde(default)]
    pub power: Option<f64>,
}

impl Reading {
    pub fn new(
        timestamp: DateTime<Utc>,
        energy_nt: Option<f64>,
        energy_ht: Option<f64>,
        power: Option<f64>,
    ) -> Self {
        Self {
            timestamp,
            energy_nt,
            energy_ht,
            power,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.energy_nt.is_none() && self.energy_ht.is_none() && self.power.is_none()
    }

    /// Both tariff registers, when the frame carried them.
    pub fn energy_pair(&self) -> Option<(f64, f64)> {
        Some((self.energy_nt?, self.energy_ht?))
    }
}

/// Parse an ISO-8601 timestamp. Offset-less values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| AppError::Time(format!("unrecognised timestamp: {}", raw)))
}
