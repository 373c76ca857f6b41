use anyhow::{anyhow, Result};
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::db::is_valid_table_name;

/// Create every plate table that does not exist yet
pub async fn run_migrations(pool: &PgPool, tables: &[&str]) -> Result<()> {
    for table in tables {
        ensure_plate_table(pool, table).await?;
        info!("Plate table ready: {}", table);
    }

    Ok(())
}

/// Create one plate table with its lookup indexes.
///
/// `PicName` is indexed but not unique; deduplication happens in the sync
/// loop.
pub async fn ensure_plate_table(pool: &PgPool, table: &str) -> Result<()> {
    if !is_valid_table_name(table) {
        return Err(anyhow!("Invalid table name: {}", table));
    }

    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{table}" (
            "Id" BIGSERIAL PRIMARY KEY,
            "CaptureTime" TIMESTAMPTZ NOT NULL,
            "PlateNumber" VARCHAR(32) NOT NULL,
            "PicName" VARCHAR(128) NOT NULL,
            "Country" VARCHAR(8) NOT NULL,
            "Direction" VARCHAR(16) NOT NULL,
            "InsertTime" TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE INDEX IF NOT EXISTS "{table}_picname_idx" ON "{table}" ("PicName");
        CREATE INDEX IF NOT EXISTS "{table}_capturetime_idx" ON "{table}" ("CaptureTime");
        "#,
        table = table
    );

    pool.execute(&*sql).await?;

    Ok(())
}
