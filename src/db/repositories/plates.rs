use crate::db::models::DetectionEvent;
use crate::db::{is_valid_table_name, repositories::EventStore};
use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;

/// Plate reads of one camera, stored in that camera's own table
#[derive(Clone)]
pub struct PlatesRepository {
    pool: Arc<PgPool>,
    table: String,
}

impl PlatesRepository {
    /// Create a repository over `table`; the name must be a plain SQL identifier
    pub fn new(pool: Arc<PgPool>, table: &str) -> Result<Self, Error> {
        if !is_valid_table_name(table) {
            return Err(Error::Config(format!("Invalid table name: {}", table)));
        }

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Most recent plate reads, newest first
    #[cfg(test)]
    async fn recent(&self, limit: i64) -> Result<Vec<DetectionEvent>, Error> {
        let sql = format!(
            r#"
            SELECT "CaptureTime", "PlateNumber", "PicName", "Country", "Direction"
            FROM "{}"
            ORDER BY "CaptureTime" DESC
            LIMIT $1
            "#,
            self.table
        );

        let result = sqlx::query_as::<_, DetectionEvent>(&sql)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to list plates: {}", e)))?;

        Ok(result)
    }
}

#[async_trait]
impl EventStore for PlatesRepository {
    fn table(&self) -> &str {
        &self.table
    }

    async fn latest_capture_time(&self) -> Result<Option<DateTime<Utc>>, Error> {
        let sql = format!(r#"SELECT MAX("CaptureTime") FROM "{}""#, self.table);

        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to read watermark: {}", e)))?;

        Ok(latest)
    }

    async fn exists(&self, picture_name: &str) -> Result<bool, Error> {
        let sql = format!(
            r#"SELECT EXISTS(SELECT 1 FROM "{}" WHERE "PicName" = $1)"#,
            self.table
        );

        let found = sqlx::query_scalar::<_, bool>(&sql)
            .bind(picture_name)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to look up {}: {}", picture_name, e)))?;

        Ok(found)
    }

    async fn insert(&self, event: &DetectionEvent) -> Result<(), Error> {
        let sql = format!(
            r#"
            INSERT INTO "{}" ("CaptureTime", "PlateNumber", "PicName", "Country", "Direction", "InsertTime")
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
            self.table
        );

        sqlx::query(&sql)
            .bind(event.capture_time)
            .bind(&event.plate_number)
            .bind(&event.picture_name)
            .bind(&event.country)
            .bind(&event.direction)
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                Error::StoreUnavailable(format!("Failed to insert {}: {}", event.picture_name, e))
            })?;

        debug!("Inserted plate {} into {}", event.picture_name, self.table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::ensure_plate_table;
    use crate::utils::time_codec::TimeCodec;
    use chrono::TimeZone;
    use sqlx::postgres::PgPoolOptions;

    async fn test_repository() -> Option<PlatesRepository> {
        // Skip unless a scratch database is available
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("connect to TEST_DATABASE_URL");

        let table = format!(
            "plates_test_{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        ensure_plate_table(&pool, &table).await.unwrap();
        Some(PlatesRepository::new(Arc::new(pool), &table).unwrap())
    }

    async fn drop_table(repo: &PlatesRepository) {
        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{}""#, repo.table))
            .execute(&*repo.pool)
            .await
            .unwrap();
    }

    fn event(pic: &str, hour: u32) -> DetectionEvent {
        DetectionEvent {
            capture_time: Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap(),
            plate_number: "ABC123".to_string(),
            picture_name: pic.to_string(),
            country: "JP".to_string(),
            direction: "forward".to_string(),
        }
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        // lazy pool never connects
        let pool = Arc::new(
            PgPoolOptions::new()
                .connect_lazy("postgres://localhost/unused")
                .unwrap(),
        );
        assert!(PlatesRepository::new(pool.clone(), "plates\"; DROP TABLE x; --").is_err());
        assert!(PlatesRepository::new(pool.clone(), "").is_err());
        assert!(PlatesRepository::new(pool, "PlatesGateNorth").is_ok());
    }

    #[tokio::test]
    async fn append_if_absent_dedups_by_picture_name() {
        let Some(repo) = test_repository().await else {
            println!("Skipping database test. Set TEST_DATABASE_URL to run.");
            return;
        };

        assert!(repo.append_if_absent(&event("pic-1", 1)).await.unwrap());
        assert!(!repo.append_if_absent(&event("pic-1", 1)).await.unwrap());
        assert!(repo.append_if_absent(&event("pic-2", 2)).await.unwrap());

        let stored = repo.recent(10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].picture_name, "pic-2");

        drop_table(&repo).await;
    }

    #[tokio::test]
    async fn watermark_tracks_latest_capture_time() {
        let Some(repo) = test_repository().await else {
            println!("Skipping database test. Set TEST_DATABASE_URL to run.");
            return;
        };
        let codec = TimeCodec::new(chrono_tz::Asia::Tokyo);

        assert_eq!(repo.latest_capture_time().await.unwrap(), None);
        assert_eq!(
            repo.resolve_watermark(&codec).await,
            codec.start_of_day(Utc::now())
        );

        repo.insert(&event("pic-1", 3)).await.unwrap();
        repo.insert(&event("pic-2", 1)).await.unwrap();
        assert_eq!(
            repo.resolve_watermark(&codec).await,
            Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap()
        );

        drop_table(&repo).await;
    }
}
