//! Witness provenance storage.
//!
//! Conceptual schema:
//!
//! ```sql
//! CREATE TABLE canonical_witnesses (
//!     id           UUID PRIMARY KEY,
//!     matter_id    UUID NOT NULL REFERENCES matters(id) ON DELETE CASCADE,
//!     display_name TEXT NOT NULL,
//!     merged_count INT NOT NULL DEFAULT 0,
//!     created_at   TIMESTAMPTZ NOT NULL,
//!     UNIQUE (matter_id, display_name)
//! );
//!
//! CREATE TABLE witnesses (
//!     id                   UUID PRIMARY KEY,
//!     document_id          UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
//!     job_id               BIGINT REFERENCES processing_jobs(id) ON DELETE SET NULL,
//!     canonical_witness_id UUID REFERENCES canonical_witnesses(id) ON DELETE SET NULL,
//!     name                 TEXT NOT NULL,
//!     role                 TEXT,
//!     snippet              TEXT,
//!     created_at           TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! Written by the extraction worker, not by the sync core. The core's only
//! promise to these rows is that `job_id` and the job's document snapshot
//! stay stable.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use attest_core::{CanonicalWitness, Error, NewWitness, Result, Witness, WitnessRepository};

/// PostgreSQL implementation of WitnessRepository.
pub struct PgWitnessRepository {
    pool: Pool<Postgres>,
}

impl PgWitnessRepository {
    /// Create a new PgWitnessRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_witness_row(row: sqlx::postgres::PgRow) -> Witness {
        Witness {
            id: row.get("id"),
            document_id: row.get("document_id"),
            job_id: row.get("job_id"),
            canonical_witness_id: row.get("canonical_witness_id"),
            name: row.get("name"),
            role: row.get("role"),
            snippet: row.get("snippet"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl WitnessRepository for PgWitnessRepository {
    async fn insert(&self, witness: NewWitness) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO witnesses (id, document_id, job_id, name, role, snippet, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(witness.document_id)
        .bind(witness.job_id)
        .bind(&witness.name)
        .bind(&witness.role)
        .bind(&witness.snippet)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn find_or_create_canonical(
        &self,
        matter_id: Uuid,
        display_name: &str,
    ) -> Result<CanonicalWitness> {
        let now = Utc::now();

        // The no-op DO UPDATE makes RETURNING yield the existing row on
        // conflict, keeping find-or-create a single atomic statement.
        let row = sqlx::query(
            "INSERT INTO canonical_witnesses (id, matter_id, display_name, merged_count, created_at)
             VALUES ($1, $2, $3, 0, $4)
             ON CONFLICT (matter_id, display_name) DO UPDATE
                 SET display_name = EXCLUDED.display_name
             RETURNING id, matter_id, display_name, merged_count, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(matter_id)
        .bind(display_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(CanonicalWitness {
            id: row.get("id"),
            matter_id: row.get("matter_id"),
            display_name: row.get("display_name"),
            merged_count: row.get("merged_count"),
            created_at: row.get("created_at"),
        })
    }

    async fn link_canonical(&self, witness_id: Uuid, canonical_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let affected = sqlx::query(
            "UPDATE witnesses SET canonical_witness_id = $1
             WHERE id = $2 AND canonical_witness_id IS DISTINCT FROM $1",
        )
        .bind(canonical_id)
        .bind(witness_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if affected == 1 {
            sqlx::query(
                "UPDATE canonical_witnesses SET merged_count = merged_count + 1 WHERE id = $1",
            )
            .bind(canonical_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_for_job(&self, job_id: i64) -> Result<Vec<Witness>> {
        let rows = sqlx::query(
            "SELECT id, document_id, job_id, canonical_witness_id, name, role, snippet, created_at
             FROM witnesses
             WHERE job_id = $1
             ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_witness_row).collect())
    }
}
