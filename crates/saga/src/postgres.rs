use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{Result, SagaState, SagaStateRepository};

/// PostgreSQL-backed [`SagaStateRepository`] over the `saga_states` table.
///
/// The table is created by the shared workspace migrations, run through
/// `PostgresEventStorage::run_migrations`.
#[derive(Clone)]
pub struct PostgresSagaStateRepository {
    pool: PgPool,
}

impl PostgresSagaStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_state(row: PgRow) -> Result<SagaState> {
        Ok(SagaState {
            id: row.try_get::<Uuid, _>("id")?,
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            step_name: row.try_get("step_name")?,
            payload: row.try_get("payload")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl SagaStateRepository for PostgresSagaStateRepository {
    async fn save(&self, state: &SagaState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_states (id, saga_id, step_name, payload, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (saga_id) DO UPDATE
            SET step_name = EXCLUDED.step_name,
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.id)
        .bind(state.saga_id.as_uuid())
        .bind(&state.step_name)
        .bind(&state.payload)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        let row = sqlx::query(
            "SELECT id, saga_id, step_name, payload, updated_at \
             FROM saga_states WHERE saga_id = $1",
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_state).transpose()
    }

    async fn delete(&self, saga_id: SagaId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saga_states WHERE saga_id = $1")
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM saga_states")
            .fetch_one(&self.pool)
            .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }
}
