use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Reference, ReservationId, TransactionId, VariantId, WarehouseId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{InventoryError, Result};
use crate::level::{InventoryKey, InventoryLevel};
use crate::reservation::{LockToken, StockReservation};
use crate::store::{LedgerStore, ReservationStore, WriteGuard};
use crate::transaction::{Counter, Counters, InventoryTransaction};

const LEVEL_COLUMNS: &str = "variant_id, warehouse_id, quantity, reserved_quantity, \
     damaged_quantity, incoming_quantity, preorder_quantity, backorder_limit, reorder_point, \
     safety_stock, version, updated_at";

const TRANSACTION_COLUMNS: &str = "id, variant_id, warehouse_id, kind, counter, delta, \
     quantity_before, reserved_before, damaged_before, quantity_after, reserved_after, \
     damaged_after, actor, reference_kind, reference_key, reservation_id, note, created_at";

const RESERVATION_COLUMNS: &str = "id, variant_id, warehouse_id, requested_quantity, \
     reserved_quantity, is_partial, status, owner_kind, owner_key, lock_token, lock_expires_at, \
     expires_at, is_released, released_at, version, created_at, updated_at";

/// Runs the workspace migrations against `pool`.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

fn row_to_key(row: &PgRow) -> Result<InventoryKey> {
    Ok(InventoryKey {
        variant_id: VariantId::from(row.try_get::<String, _>("variant_id")?),
        warehouse_id: WarehouseId::from(row.try_get::<String, _>("warehouse_id")?),
    })
}

fn row_to_reference(row: &PgRow, kind: &str, key: &str) -> Result<Option<Reference>> {
    let kind: Option<String> = row.try_get(kind)?;
    let key: Option<String> = row.try_get(key)?;
    match (kind, key) {
        (Some(kind), Some(key)) => Ok(Some(Reference::from_parts(&kind, &key)?)),
        (None, None) => Ok(None),
        _ => Err(InventoryError::InvalidRow(
            "reference kind and key must both be set".to_string(),
        )),
    }
}

/// PostgreSQL-backed inventory ledger.
///
/// Lock tokens live on the level row itself, so acquiring one is a single
/// conditional `UPDATE`.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        run_migrations(&self.pool).await
    }

    fn row_to_level(row: PgRow) -> Result<InventoryLevel> {
        Ok(InventoryLevel {
            key: row_to_key(&row)?,
            quantity: row.try_get("quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            damaged_quantity: row.try_get("damaged_quantity")?,
            incoming_quantity: row.try_get("incoming_quantity")?,
            preorder_quantity: row.try_get("preorder_quantity")?,
            backorder_limit: row.try_get("backorder_limit")?,
            reorder_point: row.try_get("reorder_point")?,
            safety_stock: row.try_get("safety_stock")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_transaction(row: PgRow) -> Result<InventoryTransaction> {
        let reservation_id: Option<Uuid> = row.try_get("reservation_id")?;
        Ok(InventoryTransaction {
            id: TransactionId::from_uuid(row.try_get("id")?),
            key: row_to_key(&row)?,
            kind: row.try_get::<String, _>("kind")?.parse()?,
            counter: row.try_get::<String, _>("counter")?.parse()?,
            delta: row.try_get("delta")?,
            before: Counters {
                quantity: row.try_get("quantity_before")?,
                reserved: row.try_get("reserved_before")?,
                damaged: row.try_get("damaged_before")?,
            },
            after: Counters {
                quantity: row.try_get("quantity_after")?,
                reserved: row.try_get("reserved_after")?,
                damaged: row.try_get("damaged_after")?,
            },
            actor: row.try_get("actor")?,
            reference: row_to_reference(&row, "reference_kind", "reference_key")?,
            reservation_id: reservation_id.map(ReservationId::from_uuid),
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Works out why a conditional level update matched no row.
    async fn conflict_reason(
        &self,
        key: &InventoryKey,
        expected_version: i64,
        guard: WriteGuard,
    ) -> Result<InventoryError> {
        let row = sqlx::query(
            "SELECT version, lock_token, lock_expires_at FROM inventory_levels \
             WHERE variant_id = $1 AND warehouse_id = $2",
        )
        .bind(key.variant_id.as_str())
        .bind(key.warehouse_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(InventoryError::LevelNotFound(key.clone()));
        };
        let version: i64 = row.try_get("version")?;
        if version != expected_version {
            return Ok(InventoryError::ConcurrencyConflict {
                entity: format!("inventory level {key}"),
                expected: expected_version,
            });
        }
        match guard {
            WriteGuard::Token { .. } => Ok(InventoryError::TokenNotHeld(key.clone())),
            WriteGuard::Version => Ok(InventoryError::ConcurrencyConflict {
                entity: format!("inventory level {key}"),
                expected: expected_version,
            }),
        }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn insert_level(&self, level: InventoryLevel) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO inventory_levels
                (variant_id, warehouse_id, quantity, reserved_quantity, damaged_quantity,
                 incoming_quantity, preorder_quantity, backorder_limit, reorder_point,
                 safety_stock, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (variant_id, warehouse_id) DO NOTHING
            "#,
        )
        .bind(level.key.variant_id.as_str())
        .bind(level.key.warehouse_id.as_str())
        .bind(level.quantity)
        .bind(level.reserved_quantity)
        .bind(level.damaged_quantity)
        .bind(level.incoming_quantity)
        .bind(level.preorder_quantity)
        .bind(level.backorder_limit)
        .bind(level.reorder_point)
        .bind(level.safety_stock)
        .bind(level.version)
        .bind(level.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InventoryError::LevelExists(level.key));
        }
        Ok(())
    }

    async fn get_level(&self, key: &InventoryKey) -> Result<Option<InventoryLevel>> {
        let sql = format!(
            "SELECT {LEVEL_COLUMNS} FROM inventory_levels WHERE variant_id = $1 AND warehouse_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(key.variant_id.as_str())
            .bind(key.warehouse_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_level).transpose()
    }

    async fn list_levels(&self) -> Result<Vec<InventoryLevel>> {
        let sql =
            format!("SELECT {LEVEL_COLUMNS} FROM inventory_levels ORDER BY variant_id, warehouse_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_level).collect()
    }

    async fn commit(
        &self,
        expected_version: i64,
        next: InventoryLevel,
        transaction: InventoryTransaction,
        guard: WriteGuard,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let (token, at) = match guard {
            WriteGuard::Version => (None, None),
            WriteGuard::Token { token, at } => (Some(token.as_uuid()), Some(at)),
        };

        // $11 is false for version-only writes, which skips the token check.
        let updated = sqlx::query(
            r#"
            UPDATE inventory_levels
            SET quantity = $3, reserved_quantity = $4, damaged_quantity = $5,
                incoming_quantity = $6, preorder_quantity = $7, version = $8, updated_at = $9
            WHERE variant_id = $1 AND warehouse_id = $2 AND version = $10
              AND ($11::BOOLEAN = FALSE OR (lock_token = $12 AND lock_expires_at > $13))
            "#,
        )
        .bind(next.key.variant_id.as_str())
        .bind(next.key.warehouse_id.as_str())
        .bind(next.quantity)
        .bind(next.reserved_quantity)
        .bind(next.damaged_quantity)
        .bind(next.incoming_quantity)
        .bind(next.preorder_quantity)
        .bind(next.version)
        .bind(next.updated_at)
        .bind(expected_version)
        .bind(token.is_some())
        .bind(token)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self
                .conflict_reason(&next.key, expected_version, guard)
                .await?);
        }

        let reference = transaction.reference.as_ref();
        sqlx::query(
            r#"
            INSERT INTO inventory_transactions
                (id, variant_id, warehouse_id, kind, counter, delta,
                 quantity_before, reserved_before, damaged_before,
                 quantity_after, reserved_after, damaged_after,
                 actor, reference_kind, reference_key, reservation_id, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.key.variant_id.as_str())
        .bind(transaction.key.warehouse_id.as_str())
        .bind(transaction.kind.as_str())
        .bind(transaction.counter.as_str())
        .bind(transaction.delta)
        .bind(transaction.before.quantity)
        .bind(transaction.before.reserved)
        .bind(transaction.before.damaged)
        .bind(transaction.after.quantity)
        .bind(transaction.after.reserved)
        .bind(transaction.after.damaged)
        .bind(&transaction.actor)
        .bind(reference.map(|r| r.kind().as_str()))
        .bind(reference.map(|r| r.key()))
        .bind(transaction.reservation_id.map(|id| id.as_uuid()))
        .bind(&transaction.note)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn transactions(&self, key: &InventoryKey) -> Result<Vec<InventoryTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions \
             WHERE variant_id = $1 AND warehouse_id = $2 ORDER BY seq ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(key.variant_id.as_str())
            .bind(key.warehouse_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn reserved_for(&self, key: &InventoryKey, reservation_id: ReservationId) -> Result<i64> {
        let held: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(delta), 0)::BIGINT FROM inventory_transactions
            WHERE reservation_id = $1 AND variant_id = $2 AND warehouse_id = $3 AND counter = $4
            "#,
        )
        .bind(reservation_id.as_uuid())
        .bind(key.variant_id.as_str())
        .bind(key.warehouse_id.as_str())
        .bind(Counter::Reserved.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(held)
    }

    async fn acquire_token(
        &self,
        key: &InventoryKey,
        token: LockToken,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE inventory_levels
            SET lock_token = $3, lock_expires_at = $4
            WHERE variant_id = $1 AND warehouse_id = $2
              AND (lock_token IS NULL OR lock_expires_at <= $5)
            "#,
        )
        .bind(key.variant_id.as_str())
        .bind(key.warehouse_id.as_str())
        .bind(token.as_uuid())
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_level(key).await? {
            Some(_) => Ok(false),
            None => Err(InventoryError::LevelNotFound(key.clone())),
        }
    }

    async fn release_token(&self, key: &InventoryKey, token: LockToken) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE inventory_levels
            SET lock_token = NULL, lock_expires_at = NULL
            WHERE variant_id = $1 AND warehouse_id = $2 AND lock_token = $3
            "#,
        )
        .bind(key.variant_id.as_str())
        .bind(key.warehouse_id.as_str())
        .bind(token.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// PostgreSQL-backed reservation store.
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_reservation(row: PgRow) -> Result<StockReservation> {
        let owner = row_to_reference(&row, "owner_kind", "owner_key")?.ok_or_else(|| {
            InventoryError::InvalidRow("reservation without owner".to_string())
        })?;
        let lock_token: Option<Uuid> = row.try_get("lock_token")?;
        Ok(StockReservation {
            id: ReservationId::from_uuid(row.try_get("id")?),
            key: row_to_key(&row)?,
            requested_quantity: row.try_get("requested_quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            is_partial: row.try_get("is_partial")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            owner,
            lock_token: lock_token.map(LockToken::from_uuid),
            lock_expires_at: row.try_get("lock_expires_at")?,
            expires_at: row.try_get("expires_at")?,
            is_released: row.try_get("is_released")?,
            released_at: row.try_get("released_at")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    async fn insert(&self, r: StockReservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_reservations
                (id, variant_id, warehouse_id, requested_quantity, reserved_quantity, is_partial,
                 status, owner_kind, owner_key, lock_token, lock_expires_at, expires_at,
                 is_released, released_at, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(r.id.as_uuid())
        .bind(r.key.variant_id.as_str())
        .bind(r.key.warehouse_id.as_str())
        .bind(r.requested_quantity)
        .bind(r.reserved_quantity)
        .bind(r.is_partial)
        .bind(r.status.as_str())
        .bind(r.owner.kind().as_str())
        .bind(r.owner.key())
        .bind(r.lock_token.map(|t| t.as_uuid()))
        .bind(r.lock_expires_at)
        .bind(r.expires_at)
        .bind(r.is_released)
        .bind(r.released_at)
        .bind(r.version)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: ReservationId) -> Result<Option<StockReservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_reservation).transpose()
    }

    async fn update(&self, next: StockReservation, expected_version: i64) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET reserved_quantity = $2, is_partial = $3, status = $4, lock_token = $5,
                lock_expires_at = $6, expires_at = $7, is_released = $8, released_at = $9,
                version = $10, updated_at = $11
            WHERE id = $1 AND version = $12
            "#,
        )
        .bind(next.id.as_uuid())
        .bind(next.reserved_quantity)
        .bind(next.is_partial)
        .bind(next.status.as_str())
        .bind(next.lock_token.map(|t| t.as_uuid()))
        .bind(next.lock_expires_at)
        .bind(next.expires_at)
        .bind(next.is_released)
        .bind(next.released_at)
        .bind(next.version)
        .bind(next.updated_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT version FROM stock_reservations WHERE id = $1")
                    .bind(next.id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match exists {
                None => InventoryError::ReservationNotFound(next.id),
                Some(_) => InventoryError::ConcurrencyConflict {
                    entity: format!("reservation {}", next.id),
                    expected: expected_version,
                },
            });
        }
        Ok(())
    }

    async fn for_owner(&self, owner: &Reference) -> Result<Vec<StockReservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE owner_kind = $1 AND owner_key = $2 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(owner.kind().as_str())
            .bind(owner.key())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE is_released = FALSE AND status NOT IN ('order_confirmed', 'released') \
               AND expires_at <= $1 \
             ORDER BY expires_at ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_reservation).collect()
    }
}
