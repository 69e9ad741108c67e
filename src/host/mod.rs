//! Host environment boundary.
//!
//! citemark never touches the disk, the document index, or the persistence
//! blob directly. The host implements these traits and feeds change
//! notifications into the reconciliation engine; the core stays testable
//! against the in-memory vault and usable against the filesystem vault.
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`ContentStore`] | Read/write/remove files, existence, listing, size |
//! | [`DocumentIndex`] | Enumerate text documents and their structural links |
//! | [`Persistence`] | Load/save the opaque record-store snapshot |
//! | [`NotificationSink`] | Fire-and-forget user-facing messages |

pub mod fs;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// A text document known to the host index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Vault-relative path.
    pub path: String,
    /// Display name (file stem).
    pub name: String,
}

impl DocumentInfo {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = crate::paths::file_stem(&path).to_string();
        DocumentInfo { path, name }
    }
}

/// A structural link or embed discovered in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedLink {
    /// Raw link target, before alias/heading stripping.
    pub target: String,
    /// 1-based line the link appears on.
    pub line: usize,
    /// True for embeds (`![[...]]`), false for plain links.
    pub embed: bool,
}

/// Externally-originated file change, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Renamed { old_path: String, new_path: String },
    Deleted { path: String },
    Created { path: String },
    Modified { path: String },
}

/// File read/write primitives of the managed content tree.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn read_text(&self, path: &str) -> Result<String>;
    /// Create-or-overwrite.
    async fn write_text(&self, path: &str, content: &str) -> Result<()>;
    async fn remove(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> bool;
    /// Recursive listing of every file in the tree, vault-relative.
    async fn list_files(&self) -> Result<Vec<String>>;
    async fn create_dir_all(&self, path: &str) -> Result<()>;
    /// Best-effort size in bytes; `None` when the file cannot be statted.
    async fn file_size(&self, path: &str) -> Option<u64>;
}

/// Enumeration of text documents plus per-document structural links.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn text_documents(&self) -> Result<Vec<DocumentInfo>>;
    async fn links_in(&self, path: &str) -> Result<Vec<IndexedLink>>;
}

/// Load/save of the record store's opaque JSON snapshot.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, data: &str) -> Result<()>;
    /// Consulted once when [`load`](Persistence::load) finds nothing, so a
    /// store left by an older installation can be migrated.
    async fn load_legacy(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Fire-and-forget message display. Never required for correctness.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Sink that drops every message (headless hosts, tests).
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _message: &str) {}
}

fn wiki_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(!)?\[\[([^\[\]]+)\]\]").unwrap())
}

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)\)").unwrap())
}

/// Extract wiki-style links/embeds (`[[target]]`, `![[target]]`) and
/// markdown links (`[label](target)`) with 1-based line positions. Shared by
/// the bundled vault implementations.
pub fn extract_links(text: &str) -> Vec<IndexedLink> {
    let mut links = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        for caps in wiki_link_re().captures_iter(line) {
            links.push(IndexedLink {
                target: caps[2].trim().to_string(),
                line: idx + 1,
                embed: caps.get(1).is_some(),
            });
        }
        for caps in markdown_link_re().captures_iter(line) {
            let target = caps[1].trim();
            // External URLs are not vault targets.
            if target.contains("://") {
                continue;
            }
            links.push(IndexedLink {
                target: target.to_string(),
                line: idx + 1,
                embed: false,
            });
        }
    }
    links
}
