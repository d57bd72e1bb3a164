use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::config::PoolConfig;
use crate::error::StoreError;
use crate::lease::{LeasePatch, SlotLease, TERMINAL_STATES};
use crate::store::{AllocationSnapshot, LeaseStore};

const SELECT_LEASE: &str = r#"
SELECT slot_id, state, checkpoint_pos, updated_at, start_pos, end_pos, chunk_size
FROM slot_leases
"#;

/// A `LeaseStore` backed by the `slot_leases` table.
#[derive(Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub async fn new(config: &PoolConfig) -> Result<Self, StoreError> {
        let pool = config
            .connect()
            .await
            .map_err(|error| StoreError::PoolCreationError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates or updates the lease table. Meant to be run once, before serving any request.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|error| StoreError::MigrationError { error })
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn get_lease(&self, slot_id: i64) -> Result<Option<SlotLease>, StoreError> {
        let query = format!("{SELECT_LEASE} WHERE slot_id = $1");

        sqlx::query_as::<_, SlotLease>(&query)
            .bind(slot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    async fn upsert_lease(&self, slot_id: i64, patch: &LeasePatch) -> Result<(), StoreError> {
        // A NULL bind means "not sent", so COALESCE falls back to the stored value.
        sqlx::query(
            r#"
INSERT INTO slot_leases
    (slot_id, state, checkpoint_pos, start_pos, end_pos, chunk_size, updated_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (slot_id) DO UPDATE SET
    state = COALESCE(EXCLUDED.state, slot_leases.state),
    checkpoint_pos = COALESCE(EXCLUDED.checkpoint_pos, slot_leases.checkpoint_pos),
    start_pos = COALESCE(EXCLUDED.start_pos, slot_leases.start_pos),
    end_pos = COALESCE(EXCLUDED.end_pos, slot_leases.end_pos),
    chunk_size = COALESCE(EXCLUDED.chunk_size, slot_leases.chunk_size),
    updated_at = COALESCE(EXCLUDED.updated_at, slot_leases.updated_at)
            "#,
        )
        .bind(slot_id)
        .bind(&patch.state)
        .bind(&patch.checkpoint_pos)
        .bind(&patch.start_pos)
        .bind(&patch.end_pos)
        .bind(patch.chunk_size)
        .bind(patch.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    async fn list_leases(&self) -> Result<Vec<SlotLease>, StoreError> {
        let query = format!("{SELECT_LEASE} ORDER BY slot_id ASC");

        sqlx::query_as::<_, SlotLease>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    async fn allocation_snapshot(
        &self,
        total_slots: i64,
        prefer_active: bool,
    ) -> Result<AllocationSnapshot, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| StoreError::TransactionError {
                command: "BEGIN".to_owned(),
                error,
            })?;

        // All three reads must see the same table.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|error| StoreError::TransactionError {
                command: "SET TRANSACTION".to_owned(),
                error,
            })?;

        // Either slot 0 is free, or the first gap sits right after some occupied slot.
        let first_free: Option<i64> = sqlx::query_scalar(
            r#"
SELECT CASE
    WHEN NOT EXISTS (SELECT 1 FROM slot_leases WHERE slot_id = 0) THEN 0::BIGINT
    ELSE (
        SELECT MIN(l.slot_id + 1)
        FROM slot_leases l
        WHERE l.slot_id >= 0
            AND l.slot_id + 1 < $1
            AND NOT EXISTS (SELECT 1 FROM slot_leases n WHERE n.slot_id = l.slot_id + 1)
    )
END
            "#,
        )
        .bind(total_slots)
        .fetch_one(&mut *tx)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        let snapshot = if first_free.is_some() {
            AllocationSnapshot {
                first_free,
                ..Default::default()
            }
        } else {
            let stalest_active = if prefer_active {
                let terminal_states: Vec<String> =
                    TERMINAL_STATES.iter().map(|s| s.to_string()).collect();
                let query = format!(
                    r#"{SELECT_LEASE}
WHERE NOT (COALESCE(LOWER(state), '') = ANY($1))
ORDER BY updated_at ASC NULLS FIRST, slot_id ASC
LIMIT 1
                    "#
                );

                sqlx::query_as::<_, SlotLease>(&query)
                    .bind(terminal_states)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|error| StoreError::QueryError {
                        command: "SELECT".to_owned(),
                        error,
                    })?
            } else {
                None
            };

            let query = format!(
                r#"{SELECT_LEASE}
ORDER BY updated_at ASC NULLS FIRST, slot_id ASC
LIMIT 1
                "#
            );
            let stalest_any = sqlx::query_as::<_, SlotLease>(&query)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|error| StoreError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?;

            AllocationSnapshot {
                first_free: None,
                stalest_active,
                stalest_any,
            }
        };

        tx.commit()
            .await
            .map_err(|error| StoreError::TransactionError {
                command: "COMMIT".to_owned(),
                error,
            })?;

        Ok(snapshot)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "PING".to_owned(),
                error,
            })?;

        Ok(())
    }
}
