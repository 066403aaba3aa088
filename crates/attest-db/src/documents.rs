//! Document repository implementation.
//!
//! Conceptual schema:
//!
//! ```sql
//! CREATE TABLE documents (
//!     id                 UUID PRIMARY KEY,
//!     matter_id          UUID NOT NULL REFERENCES matters(id) ON DELETE CASCADE,
//!     owner_id           UUID NOT NULL,
//!     external_id        TEXT NOT NULL,
//!     display_name       TEXT NOT NULL,
//!     folder_external_id TEXT,
//!     content_hash       TEXT,
//!     is_soft_deleted    BOOLEAN NOT NULL DEFAULT FALSE,
//!     retry_count        INT NOT NULL DEFAULT 0,
//!     created_at         TIMESTAMPTZ NOT NULL,
//!     updated_at         TIMESTAMPTZ NOT NULL,
//!     UNIQUE (owner_id, matter_id, external_id)
//! );
//! ```
//!
//! Rows are created and updated only by the reconciler. Absence from an
//! external stream never deletes a row here: `is_soft_deleted` records
//! "gone at the source, retained locally for history", and the only hard
//! delete is the explicitly-confirmed clear path.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use attest_core::{
    Document, DocumentRepository, Error, ProcessScope, Result, UpsertBatchStats,
    UpsertDocumentRequest,
};

/// Compute the de-dup cache hash for document content.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Order resolved (id, external_id) pairs by the original external-id input
/// order, omitting unknowns. Snapshot ordering must follow the source
/// observation order, not whatever the database returned.
fn order_by_external(external_ids: &[String], rows: Vec<(Uuid, String)>) -> Vec<Uuid> {
    let by_external: HashMap<String, Uuid> = rows.into_iter().map(|(id, ext)| (ext, id)).collect();
    external_ids
        .iter()
        .filter_map(|ext| by_external.get(ext).copied())
        .collect()
}

/// PostgreSQL implementation of DocumentRepository.
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    /// Create a new PgDocumentRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_document_row(row: sqlx::postgres::PgRow) -> Document {
        Document {
            id: row.get("id"),
            matter_id: row.get("matter_id"),
            owner_id: row.get("owner_id"),
            external_id: row.get("external_id"),
            display_name: row.get("display_name"),
            folder_external_id: row.get("folder_external_id"),
            content_hash: row.get("content_hash"),
            is_soft_deleted: row.get("is_soft_deleted"),
            retry_count: row.get("retry_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn upsert_batch(&self, batch: Vec<UpsertDocumentRequest>) -> Result<UpsertBatchStats> {
        if batch.is_empty() {
            return Ok(UpsertBatchStats::default());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut stats = UpsertBatchStats::default();

        // Rows that disappeared at the source earlier and are about to
        // reappear. Counted separately from plain updates; the conflict
        // update below is guaranteed to fire for each of them (the
        // soft-delete flag differs), so their restoration rides on it.
        let owner_id = batch[0].owner_id;
        let matter_id = batch[0].matter_id;
        let external_ids: Vec<String> = batch.iter().map(|r| r.external_id.clone()).collect();

        stats.restored = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM documents
             WHERE owner_id = $1 AND matter_id = $2
               AND external_id = ANY($3)
               AND is_soft_deleted = TRUE",
        )
        .bind(owner_id)
        .bind(matter_id)
        .bind(&external_ids)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)? as u64;

        let mut changed: u64 = 0;
        for req in batch {
            // The DO UPDATE is predicated on a real difference: reconciling
            // an unchanged record must not rewrite the row or bump
            // updated_at. xmax = 0 distinguishes a fresh insert from a
            // conflict-update; no row back means the record was unchanged.
            let row: Option<bool> = sqlx::query_scalar(
                "INSERT INTO documents
                     (id, matter_id, owner_id, external_id, display_name,
                      folder_external_id, is_soft_deleted, retry_count, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, FALSE, 0, $7, $7)
                 ON CONFLICT (owner_id, matter_id, external_id) DO UPDATE
                     SET display_name = EXCLUDED.display_name,
                         folder_external_id = EXCLUDED.folder_external_id,
                         is_soft_deleted = FALSE,
                         updated_at = EXCLUDED.updated_at
                     WHERE (documents.display_name, documents.folder_external_id,
                            documents.is_soft_deleted)
                           IS DISTINCT FROM
                           (EXCLUDED.display_name, EXCLUDED.folder_external_id, FALSE)
                 RETURNING (xmax = 0)",
            )
            .bind(Uuid::now_v7())
            .bind(req.matter_id)
            .bind(req.owner_id)
            .bind(&req.external_id)
            .bind(&req.display_name)
            .bind(&req.folder_external_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;

            match row {
                Some(true) => stats.inserted += 1,
                Some(false) => changed += 1,
                None => {} // unchanged, untouched
            }
        }

        // Every restored row also fired the conflict update; the remainder
        // were plain field updates.
        stats.updated = changed.saturating_sub(stats.restored);

        tx.commit().await.map_err(Error::Database)?;
        Ok(stats)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, matter_id, owner_id, external_id, display_name, folder_external_id,
                    content_hash, is_soft_deleted, retry_count, created_at, updated_at
             FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_document_row))
    }

    async fn ids_for_external_ids(
        &self,
        matter_id: Uuid,
        external_ids: &[String],
    ) -> Result<Vec<Uuid>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, external_id FROM documents
             WHERE matter_id = $1 AND external_id = ANY($2)",
        )
        .bind(matter_id)
        .bind(external_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let pairs = rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("external_id")))
            .collect();

        Ok(order_by_external(external_ids, pairs))
    }

    async fn ids_for_scope(&self, matter_id: Uuid, scope: &ProcessScope) -> Result<Vec<Uuid>> {
        // Local fallback only. Folder scopes match the exact folder: the
        // local mirror stores parent ids, not the folder tree, so a
        // subfolder-recursive fallback could not attribute descendants
        // reliably and would risk over-inclusion. The primary (source-fetch)
        // path handles recursion.
        let rows = match scope {
            ProcessScope::WholeMatter => {
                sqlx::query(
                    "SELECT id FROM documents
                     WHERE matter_id = $1 AND is_soft_deleted = FALSE
                     ORDER BY created_at ASC",
                )
                .bind(matter_id)
                .fetch_all(&self.pool)
                .await
            }
            ProcessScope::Folder {
                folder_external_id,
                exclude_folder_external_id,
                ..
            } => {
                sqlx::query(
                    "SELECT id FROM documents
                     WHERE matter_id = $1 AND is_soft_deleted = FALSE
                       AND folder_external_id = $2
                       AND ($3::text IS NULL OR folder_external_id IS DISTINCT FROM $3)
                     ORDER BY created_at ASC",
                )
                .bind(matter_id)
                .bind(folder_external_id)
                .bind(exclude_folder_external_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn set_content_hash(&self, id: Uuid, content_hash: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET content_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(content_hash)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn delete_for_matter(&self, matter_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE matter_id = $1")
            .bind(matter_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}
