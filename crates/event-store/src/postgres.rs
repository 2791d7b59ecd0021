use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventId, EventRecord, EventStoreError, Result, Snapshot, Version,
    storage::EventStorage,
};

const RECORD_COLUMNS: &str =
    "id, aggregate_id, aggregate_type, event_type, version, payload, timestamp";

/// PostgreSQL-backed [`EventStorage`].
#[derive(Clone)]
pub struct PostgresEventStorage {
    pool: PgPool,
}

impl PostgresEventStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `events`, `snapshots` and `saga_states` tables.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<EventRecord> {
        Ok(EventRecord {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            version: Version::new(row.try_get("version")?),
            payload: row.try_get("payload")?,
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
        })
    }
}

#[async_trait]
impl EventStorage for PostgresEventStorage {
    async fn last_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn insert(&self, record: &EventRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events
                (id, aggregate_id, aggregate_type, event_type, version, payload, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.aggregate_id.as_uuid())
        .bind(&record.aggregate_type)
        .bind(&record.event_type)
        .bind(record.version.as_i64())
        .bind(&record.payload)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_aggregate_version")
            {
                return EventStoreError::VersionTaken {
                    aggregate_id: record.aggregate_id,
                    version: record.version,
                };
            }
            EventStoreError::Database(e)
        })?;

        Ok(())
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM events WHERE aggregate_id = $1 ORDER BY version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn load_after(
        &self,
        aggregate_id: AggregateId,
        after: Version,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM events \
             WHERE aggregate_id = $1 AND version > $2 ORDER BY version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id.as_uuid())
            .bind(after.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, timestamp, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                timestamp = EXCLUDED.timestamp,
                state = EXCLUDED.state
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version.as_i64())
        .bind(snapshot.timestamp)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, timestamp, state
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Snapshot> {
            Ok(Snapshot {
                aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                version: Version::new(row.try_get("version")?),
                timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
                state: row.try_get("state")?,
            })
        })
        .transpose()
    }
}
