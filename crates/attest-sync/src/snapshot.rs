//! Document snapshot construction for processing jobs.
//!
//! A job processes exactly the set of documents frozen at creation, so the
//! snapshot must come from the freshest data available: the preferred path
//! resolves the external ids just observed by the reconciler, and only when
//! the source listing came back empty does the builder fall back to the local
//! mirror. The mirror tracks direct parent folders only, so the fallback
//! resolves recursive folder scopes against the named folder alone. Either
//! way the result is an ordered, non-empty id list or [`Error::NoDocuments`].

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use attest_core::{DocumentRepository, Error, Matter, ProcessScope, Result};

use crate::reconcile::ObservedDocument;

/// Freezes the document id list a new job will cover.
pub struct SnapshotBuilder {
    documents: Arc<dyn DocumentRepository>,
}

impl SnapshotBuilder {
    pub fn new(documents: Arc<dyn DocumentRepository>) -> Self {
        Self { documents }
    }

    /// Build the ordered snapshot for a scope from what the reconciler just
    /// observed at the source.
    ///
    /// The excluded reference-material folder (if the scope names one) is
    /// filtered here, after listing: the source API has no exclusion
    /// parameter, so exclusion is always a local decision.
    pub async fn build(
        &self,
        matter: &Matter,
        scope: &ProcessScope,
        observed: &[ObservedDocument],
    ) -> Result<Vec<Uuid>> {
        let excluded = scope.excluded_folder();
        let external_ids: Vec<String> = observed
            .iter()
            .filter(|doc| match (excluded, doc.parent_folder_id.as_deref()) {
                (Some(excluded), Some(parent)) => parent != excluded,
                _ => true,
            })
            .map(|doc| doc.external_id.clone())
            .collect();

        let ids = if external_ids.is_empty() {
            // Source listing observed nothing usable; serve the job from the
            // local mirror rather than refusing outright. The mirror stores
            // only each document's direct parent folder, so for a recursive
            // folder scope this path matches the named folder alone and can
            // under-include subfolder documents. Acceptable for a degraded
            // path: the source listing, when available, is authoritative.
            let ids = self.documents.ids_for_scope(matter.id, scope).await?;
            warn!(
                subsystem = "sync",
                component = "snapshot",
                op = "build",
                matter_id = %matter.id,
                path = "local_fallback",
                total_documents = ids.len(),
                "Snapshot built from local mirror"
            );
            ids
        } else {
            let ids = self
                .documents
                .ids_for_external_ids(matter.id, &external_ids)
                .await?;
            info!(
                subsystem = "sync",
                component = "snapshot",
                op = "build",
                matter_id = %matter.id,
                path = "source",
                total_documents = ids.len(),
                "Snapshot built from source observation"
            );
            ids
        };

        if ids.is_empty() {
            return Err(Error::NoDocuments);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryDocumentRepository;
    use attest_core::SyncStatus;
    use chrono::Utc;

    fn matter(owner: Uuid, id: Uuid) -> Matter {
        Matter {
            id,
            owner_id: owner,
            external_id: "m-1".to_string(),
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

    fn observed(external_id: &str, parent: Option<&str>) -> ObservedDocument {
        ObservedDocument {
            external_id: external_id.to_string(),
            parent_folder_id: parent.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_snapshot_preserves_observation_order() {
        let docs = Arc::new(InMemoryDocumentRepository::new());
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let m = matter(owner, matter_id);

        let id_b = docs.seed_document(matter_id, owner, "d-b", None);
        let id_a = docs.seed_document(matter_id, owner, "d-a", None);

        let builder = SnapshotBuilder::new(docs);
        let snapshot = builder
            .build(
                &m,
                &ProcessScope::WholeMatter,
                &[observed("d-a", None), observed("d-b", None)],
            )
            .await
            .unwrap();
        assert_eq!(snapshot, vec![id_a, id_b]);
    }

    #[tokio::test]
    async fn test_snapshot_omits_unknown_external_ids() {
        let docs = Arc::new(InMemoryDocumentRepository::new());
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let m = matter(owner, matter_id);

        let known = docs.seed_document(matter_id, owner, "d-known", None);

        let builder = SnapshotBuilder::new(docs);
        let snapshot = builder
            .build(
                &m,
                &ProcessScope::WholeMatter,
                &[observed("d-known", None), observed("d-phantom", None)],
            )
            .await
            .unwrap();
        assert_eq!(snapshot, vec![known]);
    }

    #[tokio::test]
    async fn test_snapshot_excludes_reference_folder() {
        let docs = Arc::new(InMemoryDocumentRepository::new());
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let m = matter(owner, matter_id);

        let wanted = docs.seed_document(matter_id, owner, "d-wanted", Some("f-work"));
        docs.seed_document(matter_id, owner, "d-ref", Some("f-ref"));

        let scope = ProcessScope::Folder {
            folder_external_id: "f-work".to_string(),
            include_subfolders: true,
            exclude_folder_external_id: Some("f-ref".to_string()),
        };
        let builder = SnapshotBuilder::new(docs);
        let snapshot = builder
            .build(
                &m,
                &scope,
                &[
                    observed("d-wanted", Some("f-work")),
                    observed("d-ref", Some("f-ref")),
                ],
            )
            .await
            .unwrap();
        assert_eq!(snapshot, vec![wanted]);
    }

    #[tokio::test]
    async fn test_snapshot_local_fallback_when_nothing_observed() {
        let docs = Arc::new(InMemoryDocumentRepository::new());
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let m = matter(owner, matter_id);

        let local = docs.seed_document(matter_id, owner, "d-local", None);

        let builder = SnapshotBuilder::new(docs);
        let snapshot = builder
            .build(&m, &ProcessScope::WholeMatter, &[])
            .await
            .unwrap();
        assert_eq!(snapshot, vec![local]);
    }

    #[tokio::test]
    async fn test_snapshot_fallback_skips_soft_deleted() {
        let docs = Arc::new(InMemoryDocumentRepository::new());
        let owner = Uuid::new_v4();
        let matter_id = Uuid::new_v4();
        let m = matter(owner, matter_id);

        let live = docs.seed_document(matter_id, owner, "d-live", None);
        docs.seed_document(matter_id, owner, "d-dead", None);
        docs.soft_delete(matter_id, "d-dead");

        let builder = SnapshotBuilder::new(docs);
        let snapshot = builder
            .build(&m, &ProcessScope::WholeMatter, &[])
            .await
            .unwrap();
        assert_eq!(snapshot, vec![live]);
    }

    #[tokio::test]
    async fn test_snapshot_empty_is_error() {
        let docs = Arc::new(InMemoryDocumentRepository::new());
        let owner = Uuid::new_v4();
        let m = matter(owner, Uuid::new_v4());

        let builder = SnapshotBuilder::new(docs);
        let err = builder.build(&m, &ProcessScope::WholeMatter, &[]).await;
        assert!(matches!(err, Err(Error::NoDocuments)));
    }
}
