use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LevelConfig;
use crate::tier::TierRow;
use crate::window::WindowEntry;

/// Body of a pushed reading from a device-attached forwarder.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub timestamp: String,
    #[serde(rename = "energyNT", default)]
    pub energy_nt: Option<f64>,
    #[serde(rename = "energyHT", default)]
    pub energy_ht: Option<f64>,
    #[serde(default)]
    pub power: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    /// False when the reading carried no register values
    pub applied: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub committed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            applied: false,
            committed: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionLevel {
    Low,
    Middle,
    High,
}

impl ConsumptionLevel {
    pub fn classify(power_w: f64, levels: &LevelConfig) -> Self {
        if power_w <= levels.low_max_w {
            ConsumptionLevel::Low
        } else if power_w <= levels.middle_max_w {
            ConsumptionLevel::Middle
        } else {
            ConsumptionLevel::High
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LatestReadingResponse {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "energyNT")]
    pub energy_nt: f64,
    #[serde(rename = "energyHT")]
    pub energy_ht: f64,
    pub power: Option<f64>,
    pub level: Option<ConsumptionLevel>,
}

#[derive(Debug, Serialize)]
pub struct TierRowsResponse {
    pub tier: String,
    pub rows: Vec<TierRow>,
}

#[derive(Debug, Serialize)]
pub struct LiveResponse {
    pub current_power: Option<f64>,
    pub current_timestamp: Option<DateTime<Utc>>,
    pub window: Vec<WindowEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TierQuery {
    pub limit: Option<u32>,
}
