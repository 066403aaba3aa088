//! Non-destructive reconciliation of source listings into local rows.
//!
//! The reconciler is an upsert engine: local rows are created or updated to
//! mirror the source, and rows that disappeared at the source are left alone
//! (soft deletion is someone else's call to make, never a side effect of a
//! listing that happened to be partial). Malformed records are skipped and
//! counted, not fatal; a failed source call aborts the pass with whatever
//! was already durably upserted still in place.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use attest_core::{
    defaults, DocumentRepository, Matter, MatterRepository, ReconcileStats, Result, SourceClient,
    FolderScope, UpsertDocumentRequest, UpsertMatterRequest,
};

/// What the reconciler saw at the source for one document, retained so the
/// snapshot builder can freeze exactly the just-synchronized set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedDocument {
    pub external_id: String,
    pub parent_folder_id: Option<String>,
}

/// Mirrors source matters and documents into local storage.
pub struct Reconciler {
    matters: Arc<dyn MatterRepository>,
    documents: Arc<dyn DocumentRepository>,
    source: Arc<dyn SourceClient>,
}

impl Reconciler {
    pub fn new(
        matters: Arc<dyn MatterRepository>,
        documents: Arc<dyn DocumentRepository>,
        source: Arc<dyn SourceClient>,
    ) -> Self {
        Self {
            matters,
            documents,
            source,
        }
    }

    /// Reconcile the owner's matter list from the source.
    ///
    /// Records without a client linkage are skipped: they are incomplete at
    /// the source and must not create local rows.
    pub async fn reconcile_matters(&self, owner_id: Uuid) -> Result<ReconcileStats> {
        let listed = self.source.list_matters(owner_id).await?;
        let mut stats = ReconcileStats::default();

        for record in listed {
            let client_name = match record.client.value() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    warn!(
                        subsystem = "sync",
                        component = "reconciler",
                        op = "reconcile_matters",
                        owner_id = %owner_id,
                        external_id = %record.id,
                        "Skipping matter without client linkage"
                    );
                    stats.skipped += 1;
                    continue;
                }
            };

            let existing = self.matters.find_by_external_id(owner_id, &record.id).await?;
            let practice_area = record.practice_area.into_inner();

            // Re-listing an unchanged matter is not an update: no row write,
            // no counter.
            if let Some(ref current) = existing {
                if current.display_name == record.display_name
                    && current.client_name == client_name
                    && current.practice_area == practice_area
                {
                    continue;
                }
            }

            self.matters
                .upsert(UpsertMatterRequest {
                    owner_id,
                    external_id: record.id,
                    display_name: record.display_name,
                    client_name,
                    practice_area,
                })
                .await?;

            if existing.is_some() {
                stats.updated += 1;
            } else {
                stats.inserted += 1;
            }
        }

        info!(
            subsystem = "sync",
            component = "reconciler",
            op = "reconcile_matters",
            owner_id = %owner_id,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            "Reconciled matters"
        );
        Ok(stats)
    }

    /// Reconcile one matter's documents from the source, optionally scoped to
    /// a folder. Returns the upsert counters and the external ids observed in
    /// listing order, for the snapshot builder.
    pub async fn reconcile_documents(
        &self,
        matter: &Matter,
        folder: Option<&FolderScope>,
    ) -> Result<(ReconcileStats, Vec<ObservedDocument>)> {
        let listed = self
            .source
            .list_documents(matter.owner_id, &matter.external_id, folder)
            .await?;

        let mut stats = ReconcileStats::default();
        let mut observed = Vec::with_capacity(listed.len());
        let mut batch: Vec<UpsertDocumentRequest> = Vec::new();

        for record in listed {
            if record.id.is_empty() || record.display_name.is_empty() {
                warn!(
                    subsystem = "sync",
                    component = "reconciler",
                    op = "reconcile_documents",
                    matter_id = %matter.id,
                    "Skipping malformed document record"
                );
                stats.skipped += 1;
                continue;
            }

            observed.push(ObservedDocument {
                external_id: record.id.clone(),
                parent_folder_id: record.parent_folder_id.clone(),
            });
            batch.push(UpsertDocumentRequest {
                matter_id: matter.id,
                owner_id: matter.owner_id,
                external_id: record.id,
                display_name: record.display_name,
                folder_external_id: record.parent_folder_id,
            });

            if batch.len() >= defaults::RECONCILE_BATCH_SIZE {
                stats.merge(self.documents.upsert_batch(std::mem::take(&mut batch)).await?);
            }
        }
        if !batch.is_empty() {
            stats.merge(self.documents.upsert_batch(batch).await?);
        }

        info!(
            subsystem = "sync",
            component = "reconciler",
            op = "reconcile_documents",
            matter_id = %matter.id,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            restored = stats.restored,
            total_documents = observed.len(),
            "Reconciled documents"
        );
        Ok((stats, observed))
    }

    /// Destructive variant: wipe the matter's documents, then re-mirror from
    /// the source. Callers must have confirmed the cascade; the façade's
    /// clear path is the only intended caller.
    pub async fn clear_and_reconcile_documents(
        &self,
        matter: &Matter,
    ) -> Result<(ReconcileStats, Vec<ObservedDocument>)> {
        let deleted = self.documents.delete_for_matter(matter.id).await?;
        warn!(
            subsystem = "sync",
            component = "reconciler",
            op = "clear_and_reconcile_documents",
            matter_id = %matter.id,
            deleted,
            "Deleted matter documents before full re-sync"
        );
        self.reconcile_documents(matter, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        InMemoryDocumentRepository, InMemoryMatterRepository, StaticSourceClient,
    };
    use attest_core::{SourceDocument, SourceField, SourceMatter, SyncStatus};
    use chrono::Utc;

    fn source_matter(id: &str, client: Option<&str>) -> SourceMatter {
        SourceMatter {
            id: id.to_string(),
            display_name: format!("Matter {id}"),
            client: SourceField(client.map(str::to_string)),
            practice_area: SourceField(None),
            status: SourceField(None),
        }
    }

    fn source_doc(id: &str, parent: Option<&str>) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            display_name: format!("{id}.pdf"),
            parent_folder_id: parent.map(str::to_string),
            category: SourceField(None),
        }
    }

    fn fixture() -> (
        Arc<InMemoryMatterRepository>,
        Arc<InMemoryDocumentRepository>,
        Arc<StaticSourceClient>,
        Reconciler,
    ) {
        let matters = Arc::new(InMemoryMatterRepository::new());
        let documents = Arc::new(InMemoryDocumentRepository::new());
        let source = Arc::new(StaticSourceClient::new());
        let reconciler = Reconciler::new(matters.clone(), documents.clone(), source.clone());
        (matters, documents, source, reconciler)
    }

    fn matter_for(owner: Uuid, id: Uuid, external_id: &str) -> Matter {
        Matter {
            id,
            owner_id: owner,
            external_id: external_id.to_string(),
            display_name: "Test".to_string(),
            client_name: "Client".to_string(),
            practice_area: None,
            sync_status: SyncStatus::Syncing,
            sync_started_at: Some(Utc::now()),
            last_synced_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_matters_insert_update_skip() {
        let (matters, _documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        matters.seed_matter(owner, "m-known", SyncStatus::Idle, None);

        source.add_matter(source_matter("m-known", Some("Acme")));
        source.add_matter(source_matter("m-new", Some("Beta LLC")));
        source.add_matter(source_matter("m-no-client", None));

        let stats = reconciler.reconcile_matters(owner).await.unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.skipped, 1);

        // The skipped record created no local row.
        assert!(matters
            .find_by_external_id(owner, "m-no-client")
            .await
            .unwrap()
            .is_none());
        let updated = matters
            .find_by_external_id(owner, "m-known")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.client_name, "Acme");
    }

    #[tokio::test]
    async fn test_reconcile_unchanged_records_is_noop() {
        let (_matters, documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let matter = matter_for(owner, matter_id, "m-1");

        source.add_matter(source_matter("m-1", Some("Acme")));
        source.add_document("m-1", source_doc("d-1", Some("f-1")));

        let first = reconciler.reconcile_matters(owner).await.unwrap();
        assert_eq!(first.inserted, 1);
        let (first_docs, _) = reconciler.reconcile_documents(&matter, None).await.unwrap();
        assert_eq!(first_docs.inserted, 1);

        let doc_id = documents
            .ids_for_scope(matter_id, &attest_core::ProcessScope::WholeMatter)
            .await
            .unwrap()[0];
        let before = documents.get(doc_id).await.unwrap().unwrap().updated_at;

        // Identical listings the second time around: no duplicate rows, no
        // spurious updates, rows untouched.
        let second = reconciler.reconcile_matters(owner).await.unwrap();
        assert_eq!(second, ReconcileStats::default());

        let (second_docs, observed) =
            reconciler.reconcile_documents(&matter, None).await.unwrap();
        assert_eq!(second_docs, ReconcileStats::default());
        assert_eq!(observed.len(), 1, "Unchanged documents are still observed");

        assert_eq!(documents.count(), 1);
        let after = documents.get(doc_id).await.unwrap().unwrap().updated_at;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_reconcile_matters_does_not_touch_sync_lock() {
        let (matters, _documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        let started = Utc::now();
        let id = matters.seed_matter(owner, "m-1", SyncStatus::Syncing, Some(started));
        source.add_matter(source_matter("m-1", Some("Acme")));

        reconciler.reconcile_matters(owner).await.unwrap();

        let after = matters.get(id).await.unwrap().unwrap();
        assert_eq!(after.sync_status, SyncStatus::Syncing);
        assert_eq!(after.sync_started_at, Some(started));
    }

    #[tokio::test]
    async fn test_reconcile_documents_counts_and_order() {
        let (_matters, documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let matter = matter_for(owner, matter_id, "m-1");

        documents.seed_document(matter_id, owner, "d-existing", None);
        documents.seed_document(matter_id, owner, "d-deleted", None);
        documents.soft_delete(matter_id, "d-deleted");

        source.add_document("m-1", source_doc("d-new", None));
        source.add_document("m-1", source_doc("d-existing", Some("f-1")));
        source.add_document("m-1", source_doc("d-deleted", None));
        source.add_document("m-1", source_doc("", None)); // malformed

        let (stats, observed) = reconciler.reconcile_documents(&matter, None).await.unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.restored, 1);
        assert_eq!(stats.skipped, 1);

        let ids: Vec<&str> = observed.iter().map(|o| o.external_id.as_str()).collect();
        assert_eq!(ids, vec!["d-new", "d-existing", "d-deleted"]);

        // Restored row is visible again.
        let scope_ids = documents
            .ids_for_scope(matter_id, &attest_core::ProcessScope::WholeMatter)
            .await
            .unwrap();
        assert_eq!(scope_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_documents_batches_large_listings() {
        let (_matters, documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let matter = matter_for(owner, matter_id, "m-1");

        let total = defaults::RECONCILE_BATCH_SIZE * 2 + 7;
        for i in 0..total {
            source.add_document("m-1", source_doc(&format!("d-{i}"), None));
        }

        let (stats, observed) = reconciler.reconcile_documents(&matter, None).await.unwrap();
        assert_eq!(stats.inserted as usize, total);
        assert_eq!(observed.len(), total);
        assert_eq!(documents.count(), total);
    }

    #[tokio::test]
    async fn test_reconcile_documents_folder_scope() {
        let (_matters, _documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        let matter = matter_for(owner, Uuid::new_v4(), "m-1");

        source.add_document("m-1", source_doc("d-root", None));
        source.add_document("m-1", source_doc("d-in", Some("f-1")));
        source.add_document("m-1", source_doc("d-sub", Some("f-1-child")));
        source.add_subfolder("f-1", "f-1-child");

        let shallow = FolderScope {
            folder_external_id: "f-1".to_string(),
            include_subfolders: false,
        };
        let (_, observed) = reconciler
            .reconcile_documents(&matter, Some(&shallow))
            .await
            .unwrap();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].external_id, "d-in");

        let deep = FolderScope {
            folder_external_id: "f-1".to_string(),
            include_subfolders: true,
        };
        let (_, observed) = reconciler
            .reconcile_documents(&matter, Some(&deep))
            .await
            .unwrap();
        let ids: Vec<&str> = observed.iter().map(|o| o.external_id.as_str()).collect();
        assert_eq!(ids, vec!["d-in", "d-sub"]);
    }

    #[tokio::test]
    async fn test_reconcile_documents_source_failure_propagates() {
        let (_matters, documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        let matter = matter_for(owner, Uuid::new_v4(), "m-1");

        source.fail_documents(true);
        let err = reconciler.reconcile_documents(&matter, None).await;
        assert!(matches!(err, Err(attest_core::Error::ExternalApi(_))));
        assert_eq!(documents.count(), 0);
    }

    #[tokio::test]
    async fn test_disappeared_documents_not_deleted() {
        let (_matters, documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let matter = matter_for(owner, matter_id, "m-1");

        documents.seed_document(matter_id, owner, "d-gone-from-source", None);
        source.add_document("m-1", source_doc("d-still-there", None));

        reconciler.reconcile_documents(&matter, None).await.unwrap();

        // The row absent from the listing is untouched, not deleted.
        assert_eq!(documents.count(), 2);
        let ids = documents
            .ids_for_scope(matter_id, &attest_core::ProcessScope::WholeMatter)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_and_reconcile_is_destructive() {
        let (_matters, documents, source, reconciler) = fixture();
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let matter = matter_for(owner, matter_id, "m-1");

        documents.seed_document(matter_id, owner, "d-old", None);
        source.add_document("m-1", source_doc("d-fresh", None));

        let (stats, observed) = reconciler
            .clear_and_reconcile_documents(&matter)
            .await
            .unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(observed.len(), 1);
        assert_eq!(documents.count(), 1);
    }
}
