use async_trait::async_trait;
use common::CheckoutId;
use sqlx::{PgPool, Row};

use crate::error::{PricingError, Result};
use crate::snapshot::PriceSnapshot;
use crate::store::SnapshotStore;

/// PostgreSQL-backed snapshot store.
///
/// The snapshot body is stored as JSONB; `(checkout_id, scope_key)` is unique.
#[derive(Clone)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn insert_all(&self, snapshots: Vec<PriceSnapshot>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for snapshot in &snapshots {
            let scope = snapshot.scope().key();
            let body = serde_json::to_value(snapshot)?;
            let result = sqlx::query(
                r#"
                INSERT INTO price_snapshots (id, checkout_id, scope_key, body, captured_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (checkout_id, scope_key) DO NOTHING
                "#,
            )
            .bind(snapshot.id().as_uuid())
            .bind(snapshot.checkout_id().as_uuid())
            .bind(&scope)
            .bind(body)
            .bind(snapshot.captured_at())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(PricingError::SnapshotExists {
                    checkout_id: snapshot.checkout_id(),
                    scope,
                });
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn for_checkout(&self, checkout_id: CheckoutId) -> Result<Vec<PriceSnapshot>> {
        let rows = sqlx::query(
            "SELECT body FROM price_snapshots WHERE checkout_id = $1 ORDER BY scope_key",
        )
        .bind(checkout_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let body: serde_json::Value = row.try_get("body")?;
                Ok(serde_json::from_value(body)?)
            })
            .collect()
    }

    async fn delete_for_checkout(&self, checkout_id: CheckoutId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM price_snapshots WHERE checkout_id = $1")
            .bind(checkout_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
