use crate::error::AppError;
use crate::tier::Tier;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub type DbPool = Pool<Sqlite>;

pub async fn connect(url: &str) -> Result<DbPool, AppError> {
    let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let mut pool_opts = SqlitePoolOptions::new().max_connections(5);
    if url.contains(":memory:") {
        // Every connection to ":memory:" is its own database; keep exactly one alive.
        pool_opts = pool_opts
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    let pool = pool_opts.connect_with(opts).await?;
    Ok(pool)
}

/// Create the five tier tables if they do not exist yet.
pub async fn ensure_schema(pool: &DbPool) -> Result<(), AppError> {
    for tier in Tier::ALL {
        let power_col = if tier == Tier::Raw { ", power REAL" } else { "" };
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                ts TEXT NOT NULL, \
                energy_nt REAL NOT NULL, \
                energy_ht REAL NOT NULL{})",
            tier.table(),
            power_col
        );
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = connect("sqlite::memory:").await.unwrap();
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'power_%'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 5);
    }
}
