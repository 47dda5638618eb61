use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, CheckoutId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{CheckoutError, Result};
use crate::failure::FailureReason;
use crate::lock::{CheckoutLock, SessionIdentity};
use crate::state::CheckoutState;
use crate::store::CheckoutStore;

const LOCK_COLUMNS: &str = "id, cart_id, session_id, user_id, state, phase, failure, locked_at, \
     expires_at, completed_at, failed_at, metadata, version, updated_at";

const ACTIVE_CART_CONSTRAINT: &str = "uq_checkout_locks_active_cart";

const NON_TERMINAL: &str = "state NOT IN ('completed', 'failed')";

fn parse_state(row: &PgRow, column: &str) -> Result<CheckoutState> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(CheckoutError::InvalidRow)
}

fn row_to_lock(row: &PgRow) -> Result<CheckoutLock> {
    let failure: Option<serde_json::Value> = row.try_get("failure")?;
    let failure: Option<FailureReason> = failure.map(serde_json::from_value).transpose()?;
    let metadata = match row.try_get::<serde_json::Value, _>("metadata")? {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(CheckoutError::InvalidRow(format!(
                "checkout metadata must be an object, got {other}"
            )));
        }
    };

    Ok(CheckoutLock {
        id: CheckoutId::from_uuid(row.try_get("id")?),
        cart_id: CartId::from_uuid(row.try_get("cart_id")?),
        session: SessionIdentity {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
        },
        state: parse_state(row, "state")?,
        phase: parse_state(row, "phase")?,
        failure,
        locked_at: row.try_get("locked_at")?,
        expires_at: row.try_get("expires_at")?,
        completed_at: row.try_get("completed_at")?,
        failed_at: row.try_get("failed_at")?,
        metadata,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// PostgreSQL-backed checkout store.
///
/// A partial unique index on `cart_id` over non-terminal states enforces one
/// active checkout per cart.
#[derive(Clone)]
pub struct PostgresCheckoutStore {
    pool: PgPool,
}

impl PostgresCheckoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CheckoutStore for PostgresCheckoutStore {
    async fn create(&self, lock: CheckoutLock) -> Result<()> {
        let failure = lock.failure().map(serde_json::to_value).transpose()?;
        let result = sqlx::query(
            r#"
            INSERT INTO checkout_locks (
                id, cart_id, session_id, user_id, state, phase, failure, locked_at,
                expires_at, completed_at, failed_at, metadata, version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(lock.id().as_uuid())
        .bind(lock.cart_id().as_uuid())
        .bind(&lock.session().session_id)
        .bind(&lock.session().user_id)
        .bind(lock.state().as_str())
        .bind(lock.phase().as_str())
        .bind(failure)
        .bind(lock.locked_at())
        .bind(lock.expires_at())
        .bind(lock.completed_at())
        .bind(lock.failed_at())
        .bind(serde_json::Value::Object(lock.metadata().clone()))
        .bind(lock.version())
        .bind(lock.updated_at())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(ACTIVE_CART_CONSTRAINT) => {
                match self.active_for_cart(lock.cart_id()).await? {
                    Some(active) => Err(CheckoutError::ActiveCheckoutExists {
                        cart_id: lock.cart_id(),
                        checkout_id: active.id(),
                    }),
                    None => Err(CheckoutError::Database(sqlx::Error::Database(db))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: CheckoutId) -> Result<Option<CheckoutLock>> {
        let query = format!("SELECT {LOCK_COLUMNS} FROM checkout_locks WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_lock).transpose()
    }

    async fn active_for_cart(&self, cart_id: CartId) -> Result<Option<CheckoutLock>> {
        let query = format!(
            "SELECT {LOCK_COLUMNS} FROM checkout_locks WHERE cart_id = $1 AND {NON_TERMINAL}"
        );
        let row = sqlx::query(&query)
            .bind(cart_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_lock).transpose()
    }

    async fn transition(
        &self,
        next: &CheckoutLock,
        expected_state: CheckoutState,
        expected_version: i64,
    ) -> Result<()> {
        let failure = next.failure().map(serde_json::to_value).transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE checkout_locks
            SET state = $2, phase = $3, failure = $4, expires_at = $5, completed_at = $6,
                failed_at = $7, metadata = $8, version = $9, updated_at = $10
            WHERE id = $1 AND state = $11 AND version = $12
            "#,
        )
        .bind(next.id().as_uuid())
        .bind(next.state().as_str())
        .bind(next.phase().as_str())
        .bind(failure)
        .bind(next.expires_at())
        .bind(next.completed_at())
        .bind(next.failed_at())
        .bind(serde_json::Value::Object(next.metadata().clone()))
        .bind(next.version())
        .bind(next.updated_at())
        .bind(expected_state.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        if self.get(next.id()).await?.is_none() {
            return Err(CheckoutError::NotFound(next.id()));
        }
        Err(CheckoutError::StateConflict {
            checkout_id: next.id(),
            expected: expected_state,
            version: expected_version,
        })
    }

    async fn list_active(&self) -> Result<Vec<CheckoutLock>> {
        let query = format!(
            "SELECT {LOCK_COLUMNS} FROM checkout_locks WHERE {NON_TERMINAL} ORDER BY locked_at"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_lock).collect()
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CheckoutLock>> {
        let query = format!(
            "SELECT {LOCK_COLUMNS} FROM checkout_locks \
             WHERE {NON_TERMINAL} AND expires_at <= $1 ORDER BY expires_at LIMIT $2"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_lock).collect()
    }

    async fn terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CheckoutId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM checkout_locks
            WHERE state IN ('completed', 'failed') AND updated_at < $1
            ORDER BY updated_at
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(CheckoutId::from_uuid(row.try_get("id")?)))
            .collect()
    }

    async fn delete_terminal(&self, id: CheckoutId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM checkout_locks WHERE id = $1 AND state IN ('completed', 'failed')",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
