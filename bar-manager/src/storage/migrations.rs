//! Schema setup for the per-timeframe bar tables
//!
//! Tables are plain PostgreSQL; when the timescaledb extension is present
//! they are additionally turned into hypertables.

use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::RepositoryResult;
use bar_common::Timeframe;

/// Schema migrations
pub struct Migrations {
    pool: PgPool,
}

impl Migrations {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create every bar table and its time index. Safe to run repeatedly.
    pub async fn run(&self) -> RepositoryResult<()> {
        info!("Running bar table migrations...");

        let timescale = self.timescale_available().await;

        for timeframe in Timeframe::ALL {
            let table = timeframe.table_name();

            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    symbol TEXT NOT NULL,
                    time TIMESTAMPTZ NOT NULL,
                    open NUMERIC NOT NULL,
                    high NUMERIC NOT NULL,
                    low NUMERIC NOT NULL,
                    close NUMERIC NOT NULL,
                    volume NUMERIC NOT NULL,
                    open_interest NUMERIC,
                    PRIMARY KEY (symbol, time)
                )
                "#
            ))
            .execute(&self.pool)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {table}_time_idx ON {table} (time DESC)"
            ))
            .execute(&self.pool)
            .await?;

            if timescale {
                self.make_hypertable(table).await;
            }

            debug!(table, "Bar table ready");
        }

        info!("Migrations complete");
        Ok(())
    }

    async fn timescale_available(&self) -> bool {
        match sqlx::query("CREATE EXTENSION IF NOT EXISTS timescaledb CASCADE")
            .execute(&self.pool)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("timescaledb not available, using plain tables: {}", e);
                false
            }
        }
    }

    async fn make_hypertable(&self, table: &str) {
        let result = sqlx::query(&format!(
            "SELECT create_hypertable('{table}', 'time', if_not_exists => TRUE, migrate_data => TRUE)"
        ))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => debug!(table, "Hypertable ready"),
            Err(e) => warn!("Failed to create hypertable {}: {}", table, e),
        }
    }
}
