//! Record types for the practice-management source.
//!
//! The source API returns some attribute fields either as a flat value
//! (`"status": "Open"`) or as a nested object (`"status": {"name": "Open"}`),
//! depending on endpoint and API version. [`SourceField`] normalizes that
//! quirk once, at the deserialization boundary, so nothing downstream ever
//! branches on source shape again.

use serde::{Deserialize, Serialize};

use crate::models::ProcessScope;

/// A source attribute that arrives flat or as `{ "name": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SourceField(pub Option<String>);

impl SourceField {
    pub fn value(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

impl Default for SourceField {
    fn default() -> Self {
        SourceField(None)
    }
}

impl<'de> Deserialize<'de> for SourceField {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flat(String),
            Nested { name: Option<String> },
            Missing(Option<()>),
        }

        let normalized = match Raw::deserialize(deserializer)? {
            Raw::Flat(s) => Some(s),
            Raw::Nested { name } => name,
            Raw::Missing(_) => None,
        };
        Ok(SourceField(normalized))
    }
}

/// A matter record as returned by the source's matter listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMatter {
    /// Opaque identifier at the source.
    pub id: String,
    pub display_name: String,
    /// Client linkage. Absent on incomplete source data; such records must
    /// not create local rows.
    #[serde(default)]
    pub client: SourceField,
    #[serde(default)]
    pub practice_area: SourceField,
    #[serde(default)]
    pub status: SourceField,
}

/// A document record as returned by the source's document listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub display_name: String,
    /// Parent-folder identifier, if the document lives in a folder.
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub category: SourceField,
}

/// Folder scope passed to the source when listing documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderScope {
    pub folder_external_id: String,
    pub include_subfolders: bool,
}

impl ProcessScope {
    /// The source-side folder scope this processing scope implies, if any.
    pub fn folder_scope(&self) -> Option<FolderScope> {
        match self {
            ProcessScope::WholeMatter => None,
            ProcessScope::Folder {
                folder_external_id,
                include_subfolders,
                ..
            } => Some(FolderScope {
                folder_external_id: folder_external_id.clone(),
                include_subfolders: *include_subfolders,
            }),
        }
    }

    /// The reference-material folder excluded from this scope, if any.
    pub fn excluded_folder(&self) -> Option<&str> {
        match self {
            ProcessScope::WholeMatter => None,
            ProcessScope::Folder {
                exclude_folder_external_id,
                ..
            } => exclude_folder_external_id.as_deref(),
        }
    }
}

/// Worker-side extraction seam: which canonical fields a witness extraction
/// produced for one document. Defined here so both the worker crate and test
/// fakes share it without depending on inference details.
#[derive(Debug, Clone, Default)]
pub struct ExtractedWitness {
    pub name: String,
    pub role: Option<String>,
    pub snippet: Option<String>,
}

/// Identifier bundle the orchestration façade hands to async dispatch.
/// Deliberately only the job id: the worker re-reads everything else from
/// persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTicket {
    pub job_id: i64,
}
