use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;

pub const WINDOW_CAPACITY: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowEntry {
    #[serde(rename = "timeLabel")]
    pub time_label: String,
    pub power: f64,
    #[serde(skip)]
    pub timestamp: DateTime<Utc>,
}

/// Live power history: one sample per minute, last hour only.
#[derive(Debug)]
pub struct RollingWindow {
    entries: VecDeque<WindowEntry>,
    capacity: usize,
    spacing: Duration,
}

impl RollingWindow {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY, Duration::minutes(1))
    }

    pub fn with_capacity(capacity: usize, spacing: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            spacing,
        }
    }

    /// Returns false when the sample came too soon after the last kept one.
    pub fn append(&mut self, timestamp: DateTime<Utc>, power: f64) -> bool {
        if let Some(last) = self.entries.back() {
            if timestamp - last.timestamp < self.spacing {
                return false;
            }
        }
        self.entries.push_back(WindowEntry {
            time_label: timestamp.format("%H:%M").to_string(),
            power,
            timestamp,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        true
    }

    pub fn snapshot(&self) -> Vec<WindowEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new()
    }
}
