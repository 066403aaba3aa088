//! Matter repository implementation.
//!
//! Conceptual schema (managed externally, see the workspace README):
//!
//! ```sql
//! CREATE TABLE matters (
//!     id              UUID PRIMARY KEY,
//!     owner_id        UUID NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
//!     external_id     TEXT NOT NULL,
//!     display_name    TEXT NOT NULL,
//!     client_name     TEXT NOT NULL,
//!     practice_area   TEXT,
//!     sync_status     TEXT NOT NULL DEFAULT 'idle',
//!     sync_started_at TIMESTAMPTZ,
//!     last_synced_at  TIMESTAMPTZ,
//!     created_at      TIMESTAMPTZ NOT NULL,
//!     updated_at      TIMESTAMPTZ NOT NULL,
//!     UNIQUE (owner_id, external_id)
//! );
//! ```
//!
//! The sync lock lives in `sync_status`/`sync_started_at`. Every transition
//! is a single conditional UPDATE so acquisition is linearizable: the
//! read-then-write form ("select status, then update if idle") is a race
//! window and is deliberately absent from this file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use attest_core::{
    Error, Matter, MatterRepository, Result, SyncOutcome, SyncStatus, UpsertMatterRequest,
};

/// PostgreSQL implementation of MatterRepository.
pub struct PgMatterRepository {
    pool: Pool<Postgres>,
}

impl PgMatterRepository {
    /// Create a new PgMatterRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert SyncStatus to string for database.
    fn sync_status_to_str(status: SyncStatus) -> &'static str {
        match status {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Failed => "failed",
        }
    }

    /// Convert string from database to SyncStatus.
    fn str_to_sync_status(s: &str) -> SyncStatus {
        match s {
            "idle" => SyncStatus::Idle,
            "syncing" => SyncStatus::Syncing,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::Idle, // fallback
        }
    }

    /// Parse a matter row into a Matter struct.
    fn parse_matter_row(row: sqlx::postgres::PgRow) -> Matter {
        Matter {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            external_id: row.get("external_id"),
            display_name: row.get("display_name"),
            client_name: row.get("client_name"),
            practice_area: row.get("practice_area"),
            sync_status: Self::str_to_sync_status(row.get("sync_status")),
            sync_started_at: row.get("sync_started_at"),
            last_synced_at: row.get("last_synced_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    const MATTER_COLUMNS: &'static str =
        "id, owner_id, external_id, display_name, client_name, practice_area, \
         sync_status, sync_started_at, last_synced_at, created_at, updated_at";
}

#[async_trait]
impl MatterRepository for PgMatterRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Matter>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM matters WHERE id = $1",
            Self::MATTER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_matter_row))
    }

    async fn find_by_external_id(
        &self,
        owner_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Matter>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM matters WHERE owner_id = $1 AND external_id = $2",
            Self::MATTER_COLUMNS
        ))
        .bind(owner_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_matter_row))
    }

    async fn upsert(&self, req: UpsertMatterRequest) -> Result<Uuid> {
        let now = Utc::now();
        let id = Uuid::now_v7();

        // Sync state columns are untouched on conflict: reconciliation must
        // never clobber a lock another worker holds.
        let matter_id: Uuid = sqlx::query_scalar(
            "INSERT INTO matters
                 (id, owner_id, external_id, display_name, client_name, practice_area,
                  sync_status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'idle', $7, $7)
             ON CONFLICT (owner_id, external_id) DO UPDATE
                 SET display_name = EXCLUDED.display_name,
                     client_name = EXCLUDED.client_name,
                     practice_area = EXCLUDED.practice_area,
                     updated_at = EXCLUDED.updated_at
             RETURNING id",
        )
        .bind(id)
        .bind(req.owner_id)
        .bind(&req.external_id)
        .bind(&req.display_name)
        .bind(&req.client_name)
        .bind(&req.practice_area)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(matter_id)
    }

    async fn try_begin_sync(
        &self,
        matter_id: Uuid,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<Option<Matter>> {
        // Idle and Failed are always claimable; a Syncing lock is claimable
        // only once stale (abandoned by a crashed worker). One statement, so
        // two concurrent callers cannot both observe idle and both proceed.
        let row = sqlx::query(&format!(
            "UPDATE matters
             SET sync_status = $4, sync_started_at = $2, updated_at = $2
             WHERE id = $1
               AND (sync_status IN ('idle', 'failed')
                    OR (sync_status = $4 AND sync_started_at < $3))
             RETURNING {}",
            Self::MATTER_COLUMNS
        ))
        .bind(matter_id)
        .bind(now)
        .bind(stale_cutoff)
        .bind(Self::sync_status_to_str(SyncStatus::Syncing))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_matter_row))
    }

    async fn end_sync(
        &self,
        matter_id: Uuid,
        outcome: SyncOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Conditional on still holding the lock, so releasing an expired or
        // already-released lease is a harmless no-op.
        let query = match outcome {
            SyncOutcome::Success => {
                "UPDATE matters
                 SET sync_status = 'idle', sync_started_at = NULL,
                     last_synced_at = $2, updated_at = $2
                 WHERE id = $1 AND sync_status = 'syncing'"
            }
            SyncOutcome::Failure => {
                "UPDATE matters
                 SET sync_status = 'failed', sync_started_at = NULL, updated_at = $2
                 WHERE id = $1 AND sync_status = 'syncing'"
            }
        };

        sqlx::query(query)
            .bind(matter_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }

    async fn recover_stale(&self, owner_id: Uuid, stale_cutoff: DateTime<Utc>) -> Result<i64> {
        let result = sqlx::query(
            "UPDATE matters
             SET sync_status = 'idle', sync_started_at = NULL, updated_at = NOW()
             WHERE owner_id = $1
               AND sync_status = 'syncing'
               AND sync_started_at < $2",
        )
        .bind(owner_id)
        .bind(stale_cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }

    async fn syncing_count(&self, owner_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM matters WHERE owner_id = $1 AND sync_status = 'syncing'",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_to_str_all_variants() {
        assert_eq!(PgMatterRepository::sync_status_to_str(SyncStatus::Idle), "idle");
        assert_eq!(
            PgMatterRepository::sync_status_to_str(SyncStatus::Syncing),
            "syncing"
        );
        assert_eq!(
            PgMatterRepository::sync_status_to_str(SyncStatus::Failed),
            "failed"
        );
    }

    #[test]
    fn test_str_to_sync_status_all_variants() {
        assert_eq!(PgMatterRepository::str_to_sync_status("idle"), SyncStatus::Idle);
        assert_eq!(
            PgMatterRepository::str_to_sync_status("syncing"),
            SyncStatus::Syncing
        );
        assert_eq!(
            PgMatterRepository::str_to_sync_status("failed"),
            SyncStatus::Failed
        );
    }

    #[test]
    fn test_str_to_sync_status_unknown_fallback() {
        assert_eq!(PgMatterRepository::str_to_sync_status(""), SyncStatus::Idle);
        assert_eq!(
            PgMatterRepository::str_to_sync_status("locked"),
            SyncStatus::Idle
        );
    }

    #[test]
    fn test_sync_status_round_trip() {
        for status in [SyncStatus::Idle, SyncStatus::Syncing, SyncStatus::Failed] {
            let s = PgMatterRepository::sync_status_to_str(status);
            assert_eq!(PgMatterRepository::str_to_sync_status(s), status);
        }
    }

    #[test]
    fn test_sync_status_strings_are_unique() {
        let strings = [
            PgMatterRepository::sync_status_to_str(SyncStatus::Idle),
            PgMatterRepository::sync_status_to_str(SyncStatus::Syncing),
            PgMatterRepository::sync_status_to_str(SyncStatus::Failed),
        ];
        let mut unique = strings.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(strings.len(), unique.len());
    }
}
