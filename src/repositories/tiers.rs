use crate::db::DbPool;
use crate::error::AppError;
use crate::tier::{RawRow, SummaryRow, Tier, TierRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Append-only access to the five tier tables.
#[async_trait]
pub trait TierStore: Send + Sync {
    async fn insert_raw(&self, row: &RawRow) -> Result<(), AppError>;

    /// `tier` must be one of the summary tiers.
    async fn insert_summary(&self, tier: Tier, row: &SummaryRow) -> Result<(), AppError>;

    /// Timestamp of the most recently inserted row, `None` for an empty tier.
    async fn last_timestamp(&self, tier: Tier) -> Result<Option<DateTime<Utc>>, AppError>;

    async fn latest_raw(&self) -> Result<Option<RawRow>, AppError>;

    /// Most recent `limit` rows, newest first.
    async fn recent(&self, tier: Tier, limit: u32) -> Result<Vec<TierRow>, AppError>;
}

pub struct SqliteTierStore {
    pool: DbPool,
}

impl SqliteTierStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TierStore for SqliteTierStore {
    async fn insert_raw(&self, row: &RawRow) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO power_raw (ts, energy_nt, energy_ht, power) VALUES (?, ?, ?, ?)",
        )
        .bind(row.ts)
        .bind(row.energy_nt)
        .bind(row.energy_ht)
        .bind(row.power)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_summary(&self, tier: Tier, row: &SummaryRow) -> Result<(), AppError> {
        if tier == Tier::Raw {
            return Err(AppError::Config(
                "raw rows must go through insert_raw".into(),
            ));
        }
        let sql = format!(
            "INSERT INTO {} (ts, energy_nt, energy_ht) VALUES (?, ?, ?)",
            tier.table()
        );
        sqlx::query(&sql)
            .bind(row.ts)
            .bind(row.energy_nt)
            .bind(row.energy_ht)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_timestamp(&self, tier: Tier) -> Result<Option<DateTime<Utc>>, AppError> {
        let sql = format!("SELECT ts FROM {} ORDER BY id DESC LIMIT 1", tier.table());
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        Ok(row.map(|(ts,)| ts))
    }

    async fn latest_raw(&self) -> Result<Option<RawRow>, AppError> {
        sqlx::query_as::<_, RawRow>(
            "SELECT ts, energy_nt, energy_ht, power FROM power_raw ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Db)
    }

    async fn recent(&self, tier: Tier, limit: u32) -> Result<Vec<TierRow>, AppError> {
        if tier == Tier::Raw {
            let rows = sqlx::query_as::<_, RawRow>(
                "SELECT ts, energy_nt, energy_ht, power FROM power_raw ORDER BY id DESC LIMIT ?",
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            return Ok(rows.into_iter().map(TierRow::Raw).collect());
        }
        let sql = format!(
            "SELECT ts, energy_nt, energy_ht FROM {} ORDER BY id DESC LIMIT ?",
            tier.table()
        );
        let rows = sqlx::query_as::<_, SummaryRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TierRow::Summary).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::tier::MeterRecord;
    use chrono::{Duration, TimeZone};

    async fn store() -> SqliteTierStore {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::ensure_schema(&pool).await.unwrap();
        SqliteTierStore::new(pool)
    }

    #[tokio::test]
    async fn test_empty_tier_has_no_timestamp() {
        let store = store().await;
        for tier in Tier::ALL {
            assert_eq!(store.last_timestamp(tier).await.unwrap(), None);
        }
        assert!(store.latest_raw().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_raw_round_trip_and_ordering() {
        let store = store().await;
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        for i in 0..3 {
            store
                .insert_raw(&RawRow {
                    ts: t0 + Duration::seconds(i * 10),
                    energy_nt: 100.0 + i as f64,
                    energy_ht: 50.0,
                    power: if i == 1 { None } else { Some(250.5) },
                })
                .await
                .unwrap();
        }

        let latest = store.latest_raw().await.unwrap().unwrap();
        assert_eq!(latest.ts, t0 + Duration::seconds(20));
        assert_eq!(latest.energy_nt, 102.0);
        assert_eq!(latest.power, Some(250.5));

        let recent = store.recent(Tier::Raw, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp(), t0 + Duration::seconds(20));
        assert!(matches!(&recent[1], TierRow::Raw(r) if r.power.is_none()));
    }

    #[tokio::test]
    async fn test_summary_tiers_are_independent() {
        let store = store().await;
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let row = SummaryRow {
            ts,
            energy_nt: 1.0,
            energy_ht: 2.0,
        };
        store.insert_summary(Tier::Hour, &row).await.unwrap();

        assert_eq!(store.last_timestamp(Tier::Hour).await.unwrap(), Some(ts));
        assert_eq!(store.last_timestamp(Tier::Minute).await.unwrap(), None);
        assert_eq!(store.recent(Tier::Hour, 10).await.unwrap(), vec![TierRow::Summary(row.clone())]);
        assert!(store.insert_summary(Tier::Raw, &row).await.is_err());
    }
}
