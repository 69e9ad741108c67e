//! Core data models used throughout citemark.
//!
//! These types represent the tracked items, their companion-document state,
//! and the reference entries that flow through the resolver and
//! reconciliation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::paths;

/// Matching strategy that produced a [`ReferenceEntry`].
///
/// Strategies are tried in this order; the first one that yields at least one
/// match for a record/document pair suppresses all later ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStrategy {
    Link,
    IdentityKey,
    FileName,
    Title,
    Author,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Link => "link",
            MatchStrategy::IdentityKey => "identity-key",
            MatchStrategy::FileName => "file-name",
            MatchStrategy::Title => "title",
            MatchStrategy::Author => "author",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "link" => Some(MatchStrategy::Link),
            "identity-key" => Some(MatchStrategy::IdentityKey),
            "file-name" => Some(MatchStrategy::FileName),
            "title" => Some(MatchStrategy::Title),
            "author" => Some(MatchStrategy::Author),
            _ => None,
        }
    }
}

/// One observed mention of a record in another document.
///
/// Reference entries are transient: they are rebuilt in full on each resolver
/// pass and never independently persisted or hand-edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    /// Vault-relative path of the mentioning document.
    pub source_path: String,
    /// Display name of the mentioning document (file stem).
    pub source_name: String,
    /// 1-based line of the mention, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Whitespace-normalized excerpt around the mention, bounded length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub strategy: MatchStrategy,
}

/// One tracked reference/attachment item.
///
/// All optional fields default so that older persisted snapshots still parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque UUID, unique and immutable once created.
    pub id: String,

    /// Optional DOI-like external identifier. Compared case-insensitively;
    /// blank values never participate in duplicate detection.
    #[serde(default)]
    pub identity_key: Option<String>,

    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,

    /// Vault-relative path of the primary file.
    pub file_path: String,
    pub file_name: String,
    /// Lowercased extension of the primary file.
    #[serde(default)]
    pub file_type: String,
    /// Best-effort size in bytes.
    #[serde(default)]
    pub file_size: Option<u64>,

    /// Semantically a set; order is only used for stable rendering.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub has_companion: bool,
    #[serde(default)]
    pub companion_path: Option<String>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// A companion previously existed but is no longer resolvable. Items that
    /// never had one stay `false`.
    #[serde(default)]
    pub lost: bool,
    /// Cache of the last captured free-text body. Not authoritative; the
    /// companion document owns the body.
    #[serde(default)]
    pub user_notes: Option<String>,

    /// Companion moved but the primary file was not found at the derived
    /// location; an external actor must supply a replacement path.
    #[serde(default)]
    pub needs_reassignment: bool,

    /// Always derived from `references`, never hand-edited.
    #[serde(default)]
    pub reference_count: usize,
    #[serde(default)]
    pub references: Vec<ReferenceEntry>,

    #[serde(default)]
    pub citation_text: Option<String>,
    /// Opaque pass-through payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Create a record bound to a primary file, deriving name and type from
    /// the path.
    pub fn new(title: impl Into<String>, file_path: impl Into<String>) -> Self {
        let file_path = file_path.into();
        let file_name = paths::file_name(&file_path).to_string();
        let file_type = paths::extension(&file_name).to_lowercase();
        Record {
            id: Uuid::new_v4().to_string(),
            identity_key: None,
            title: title.into(),
            author: None,
            year: None,
            publisher: None,
            tier: None,
            file_path,
            file_name,
            file_type,
            file_size: None,
            tags: Vec::new(),
            has_companion: false,
            companion_path: None,
            last_synced_at: None,
            lost: false,
            user_notes: None,
            needs_reassignment: false,
            reference_count: 0,
            references: Vec::new(),
            citation_text: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Trimmed, lowercased identity key; `None` when blank or absent.
    pub fn identity_key_normalized(&self) -> Option<String> {
        self.identity_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase)
    }

    /// Rebind the primary file fields to a new path. Size is left for the
    /// caller to refresh best-effort.
    pub fn rebind_primary(&mut self, new_path: &str) {
        self.file_path = new_path.to_string();
        self.file_name = paths::file_name(new_path).to_string();
        self.file_type = paths::extension(new_path).to_lowercase();
    }
}
