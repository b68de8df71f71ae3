//! Cascading downsampling into the minute/hour/day/month tiers.
//!
//! Every reading lands in the raw tier. A summary tier is only considered
//! when the next finer tier accepted the same reading, so a coarse row always
//! coincides with a row in every tier beneath it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::reading::Reading;
use crate::repositories::TierStore;
use crate::tier::{MeterRecord, RawRow, SummaryRow, Tier};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Tiers written for this reading, finest first
    pub committed: Vec<Tier>,
    /// Tiers whose insert failed; the row for that tier is lost
    pub failed: Vec<Tier>,
    /// An energy register went backwards compared to the previous raw row
    pub energy_regression: bool,
}

impl CommitReport {
    pub fn is_committed(&self, tier: Tier) -> bool {
        self.committed.contains(&tier)
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    last_committed: HashMap<Tier, DateTime<Utc>>,
    last_energy: Option<(f64, f64)>,
}

pub struct Aggregator {
    store: Arc<dyn TierStore>,
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    /// Aggregator with no history; every tier commits on the first reading.
    pub fn new(store: Arc<dyn TierStore>) -> Self {
        Self {
            store,
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Rebuild per-tier state from the newest row of each table.
    pub async fn restore(store: Arc<dyn TierStore>) -> Self {
        let mut state = AggregatorState::default();
        for tier in Tier::SUMMARIES {
            match store.last_timestamp(tier).await {
                Ok(Some(ts)) => {
                    state.last_committed.insert(tier, ts);
                }
                Ok(None) => debug!(%tier, "tier empty; first reading commits unconditionally"),
                Err(e) => {
                    warn!(%tier, error = %e, "could not read last commit; treating threshold as met")
                }
            }
        }
        match store.latest_raw().await {
            Ok(row) => state.last_energy = row.map(|r| (r.energy_nt(), r.energy_ht())),
            Err(e) => warn!(error = %e, "could not read latest raw row"),
        }
        Self {
            store,
            state: Mutex::new(state),
        }
    }

    pub fn store(&self) -> &Arc<dyn TierStore> {
        &self.store
    }

    pub async fn last_committed(&self, tier: Tier) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_committed.get(&tier).copied()
    }

    /// Persist a reading and cascade it through the summary tiers.
    ///
    /// Readings without both energy registers are ignored. Store failures are
    /// logged and reported but never returned as errors.
    pub async fn record(&self, reading: &Reading) -> CommitReport {
        let mut report = CommitReport::default();
        let Some((energy_nt, energy_ht)) = reading.energy_pair() else {
            debug!(ts = %reading.timestamp, "reading without energy registers; not persisted");
            return report;
        };
        let ts = reading.timestamp;

        // Held for the whole cascade so concurrent callers cannot interleave.
        let mut state = self.state.lock().await;

        if let Some((prev_nt, prev_ht)) = state.last_energy {
            if energy_nt < prev_nt || energy_ht < prev_ht {
                report.energy_regression = true;
                warn!(
                    %ts,
                    prev_nt, energy_nt, prev_ht, energy_ht,
                    "energy register decreased; meter reset or decode error"
                );
            }
        }

        let raw = RawRow {
            ts,
            energy_nt,
            energy_ht,
            power: reading.power,
        };
        match self.store.insert_raw(&raw).await {
            Ok(()) => {
                report.committed.push(Tier::Raw);
                state.last_energy = Some((energy_nt, energy_ht));
            }
            Err(e) => {
                report.failed.push(Tier::Raw);
                error!(%ts, error = %e, "raw insert failed; reading dropped from raw tier");
            }
        }

        let summary = SummaryRow {
            ts,
            energy_nt,
            energy_ht,
        };
        for tier in Tier::SUMMARIES {
            let due = match state.last_committed.get(&tier) {
                Some(last) => ts - *last >= tier.threshold(),
                None => true,
            };
            if !due {
                break;
            }
            if let Err(e) = self.store.insert_summary(tier, &summary).await {
                report.failed.push(tier);
                error!(%tier, %ts, error = %e, "summary insert failed; cascade stopped");
                break;
            }
            state.last_committed.insert(tier, ts);
            report.committed.push(tier);
        }

        debug!(%ts, committed = ?report.committed, "reading recorded");
        report
    }
}
