//! Companion-document lifecycle.
//!
//! One regenerable text document per record: a machine-owned header plus a
//! user-owned body (see [`crate::header`]). The manager computes document
//! paths from the configured template, writes documents without ever
//! touching preserved body content, and parses documents back into records.
//!
//! Methods never mutate the store; they return next-state [`Record`] values
//! for the caller to hand to `RecordStore::update`.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::debug;

use crate::config::CompanionConfig;
use crate::header::{self, DEFAULT_BODY};
use crate::host::ContentStore;
use crate::models::Record;
use crate::paths;
use crate::template;

#[derive(Clone)]
pub struct CompanionManager {
    content: Arc<dyn ContentStore>,
    cfg: CompanionConfig,
}

impl CompanionManager {
    pub fn new(content: Arc<dyn ContentStore>, cfg: CompanionConfig) -> Self {
        Self { content, cfg }
    }

    pub fn config(&self) -> &CompanionConfig {
        &self.cfg
    }

    /// Global enable flag plus the allow/deny-by-file-type policy.
    pub fn should_generate(&self, record: &Record) -> bool {
        self.cfg.enabled && self.cfg.permits(&record.file_type)
    }

    /// The record's recorded companion path, or the template-derived one for
    /// records that have none yet.
    pub fn companion_path(&self, record: &Record) -> String {
        match &record.companion_path {
            Some(path) => path.clone(),
            None => template::render_companion_path(record, &self.cfg.template, Utc::now()),
        }
    }

    /// Write (or rewrite) the companion document. Returns `None` when policy
    /// forbids it and `forced` is false; `forced` covers explicit user
    /// action.
    pub async fn generate(&self, record: &Record, forced: bool) -> Result<Option<Record>> {
        if !forced && !self.should_generate(record) {
            return Ok(None);
        }
        Ok(Some(self.write_document(record).await?))
    }

    /// Re-emit the header, re-inserting the preserved body region exactly.
    pub async fn regenerate(&self, record: &Record) -> Result<Record> {
        self.write_document(record).await
    }

    async fn write_document(&self, record: &Record) -> Result<Record> {
        let path = self.companion_path(record);

        // A document already at the target path is adopted as the companion:
        // its body region survives, only the header is ours to rewrite.
        let preserved = if self.content.exists(&path).await {
            let text = self.content.read_text(&path).await?;
            header::extract_body(&text)
        } else {
            None
        };
        let body = preserved.unwrap_or_else(|| DEFAULT_BODY.to_string());

        let mut next = record.clone();
        next.has_companion = true;
        next.companion_path = Some(path.clone());
        next.last_synced_at = Some(Utc::now());
        next.lost = false;
        next.user_notes = Some(body.clone());

        let dir = paths::parent(&path);
        if !dir.is_empty() {
            self.content.create_dir_all(dir).await?;
        }
        let document = header::render_document(&next, &body);
        self.content.write_text(&path, &document).await?;
        debug!(path, "wrote companion document");
        Ok(next)
    }

    /// Apply a companion document's header to the record: descriptive
    /// fields, tags, and references are overwritten (the document is the
    /// source of truth), `reference_count` is recomputed from the parsed
    /// list, and the body is captured into the `user_notes` cache. File
    /// binding and companion state are untouched.
    pub fn parse_into_record(&self, record: &Record, text: &str) -> Record {
        let parsed = header::parse_header(text);
        let mut next = record.clone();
        if let Some(title) = parsed.title {
            next.title = title;
        }
        next.author = parsed.author;
        next.year = parsed.year;
        next.publisher = parsed.publisher;
        next.tier = parsed.tier;
        next.identity_key = parsed.identity_key;
        next.tags = parsed.tags;
        next.references = parsed.references;
        next.reference_count = next.references.len();
        next.citation_text = parsed.citation;
        next.user_notes = header::extract_body(text);
        next
    }

    /// Read and parse the recorded companion document. `None` when the
    /// record has no resolvable companion.
    pub async fn sync_from_companion(&self, record: &Record) -> Result<Option<Record>> {
        let Some(path) = record.companion_path.clone() else {
            return Ok(None);
        };
        if !self.content.exists(&path).await {
            return Ok(None);
        }
        let text = self.content.read_text(&path).await?;
        let mut next = self.parse_into_record(record, &text);
        next.last_synced_at = Some(Utc::now());
        Ok(Some(next))
    }

    /// Delete the companion document and clear the record's companion
    /// state. An explicit delete is not a loss; `lost` stays false.
    pub async fn delete(&self, record: &Record) -> Result<Record> {
        if let Some(path) = &record.companion_path {
            if self.content.exists(path).await {
                self.content.remove(path).await?;
            }
        }
        let mut next = record.clone();
        next.has_companion = false;
        next.companion_path = None;
        next.last_synced_at = None;
        next.lost = false;
        next.user_notes = None;
        Ok(next)
    }

    /// Whether the recorded companion path currently resolves. Pure check;
    /// the reconciliation engine decides what to do with the result.
    pub async fn verify_exists(&self, record: &Record) -> bool {
        match &record.companion_path {
            Some(path) => self.content.exists(path).await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryVault;

    fn manager(vault: &Arc<MemoryVault>) -> CompanionManager {
        CompanionManager::new(vault.clone(), CompanionConfig::default())
    }

    fn manager_with(vault: &Arc<MemoryVault>, cfg: CompanionConfig) -> CompanionManager {
        CompanionManager::new(vault.clone(), cfg)
    }

    fn record() -> Record {
        let mut r = Record::new("A Study of Things", "papers/a-study.pdf");
        r.author = Some("Doe, J.".to_string());
        r.year = Some("2001".to_string());
        r.identity_key = Some("10.1/ABC".to_string());
        r.tags = vec!["alpha".to_string(), "beta".to_string()];
        r
    }

    #[tokio::test]
    async fn test_generate_then_parse_round_trips_descriptive_fields() {
        let vault = Arc::new(MemoryVault::new());
        let m = manager(&vault);
        let r = record();

        let next = m.generate(&r, false).await.unwrap().unwrap();
        assert!(next.has_companion);
        let path = next.companion_path.clone().unwrap();
        assert_eq!(path, "papers/a-study.md");

        let text = vault.read_text(&path).await.unwrap();
        let parsed = m.parse_into_record(&next, &text);
        assert_eq!(parsed.title, r.title);
        assert_eq!(parsed.author, r.author);
        assert_eq!(parsed.year, r.year);
        assert_eq!(parsed.identity_key, r.identity_key);
        assert_eq!(parsed.tags, r.tags);
        assert_eq!(parsed.reference_count, 0);
    }

    #[tokio::test]
    async fn test_regenerate_preserves_edited_body() {
        let vault = Arc::new(MemoryVault::new());
        let m = manager(&vault);
        let r = record();

        let next = m.generate(&r, false).await.unwrap().unwrap();
        let path = next.companion_path.clone().unwrap();

        // User rewrites the body between the markers.
        let text = vault.read_text(&path).await.unwrap();
        let start = text.find(header::BODY_START).unwrap() + header::BODY_START.len();
        let end = text.find(header::BODY_END).unwrap();
        let edited = format!(
            "{}\nmy own notes\n\nwith two paragraphs\n{}",
            &text[..start],
            &text[end..]
        );
        vault.add_text(&path, &edited);

        let mut changed = next.clone();
        changed.title = "A Different Title".to_string();
        let regenerated = m.regenerate(&changed).await.unwrap();

        let after = vault.read_text(&path).await.unwrap();
        assert!(after.contains("title: A Different Title"));
        assert_eq!(
            header::extract_body(&after).as_deref(),
            Some("my own notes\n\nwith two paragraphs")
        );
        assert_eq!(
            regenerated.user_notes.as_deref(),
            Some("my own notes\n\nwith two paragraphs")
        );
    }

    #[tokio::test]
    async fn test_policy_denies_unless_forced() {
        let vault = Arc::new(MemoryVault::new());
        let mut cfg = CompanionConfig::default();
        cfg.policy = "allow".to_string();
        cfg.file_types = vec!["epub".to_string()];
        let m = manager_with(&vault, cfg);
        let r = record(); // pdf

        assert!(!m.should_generate(&r));
        assert!(m.generate(&r, false).await.unwrap().is_none());
        let forced = m.generate(&r, true).await.unwrap();
        assert!(forced.is_some());
    }

    #[tokio::test]
    async fn test_disabled_blocks_generation() {
        let vault = Arc::new(MemoryVault::new());
        let mut cfg = CompanionConfig::default();
        cfg.enabled = false;
        let m = manager_with(&vault, cfg);
        assert!(m.generate(&record(), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existing_document_at_target_is_adopted() {
        let vault = Arc::new(MemoryVault::new());
        let m = manager(&vault);
        let r = record();

        // Hand-created document at the expected path, with a body region.
        vault.add_text(
            "papers/a-study.md",
            &format!("{}\nhand written\n{}\n", header::BODY_START, header::BODY_END),
        );
        let next = m.generate(&r, false).await.unwrap().unwrap();
        assert_eq!(next.user_notes.as_deref(), Some("hand written"));
        let text = vault.read_text("papers/a-study.md").await.unwrap();
        assert!(text.starts_with(header::HEADER_MARKER));
        assert_eq!(header::extract_body(&text).as_deref(), Some("hand written"));
    }

    #[tokio::test]
    async fn test_fresh_document_gets_suggested_headings() {
        let vault = Arc::new(MemoryVault::new());
        let m = manager(&vault);
        let next = m.generate(&record(), false).await.unwrap().unwrap();
        let text = vault
            .read_text(next.companion_path.as_deref().unwrap())
            .await
            .unwrap();
        assert!(text.contains("## Summary"));
        assert!(text.contains("## Key points"));
    }

    #[tokio::test]
    async fn test_delete_clears_state_without_lost() {
        let vault = Arc::new(MemoryVault::new());
        let m = manager(&vault);
        let next = m.generate(&record(), false).await.unwrap().unwrap();
        let path = next.companion_path.clone().unwrap();
        assert!(vault.exists(&path).await);

        let cleared = m.delete(&next).await.unwrap();
        assert!(!vault.exists(&path).await);
        assert!(!cleared.has_companion);
        assert!(cleared.companion_path.is_none());
        assert!(cleared.last_synced_at.is_none());
        assert!(!cleared.lost);
    }

    #[tokio::test]
    async fn test_verify_exists() {
        let vault = Arc::new(MemoryVault::new());
        let m = manager(&vault);
        let r = record();
        assert!(!m.verify_exists(&r).await);

        let next = m.generate(&r, false).await.unwrap().unwrap();
        assert!(m.verify_exists(&next).await);

        vault.remove_file(next.companion_path.as_deref().unwrap());
        assert!(!m.verify_exists(&next).await);
    }

    #[tokio::test]
    async fn test_sync_from_companion_overwrites_record() {
        let vault = Arc::new(MemoryVault::new());
        let m = manager(&vault);
        let next = m.generate(&record(), false).await.unwrap().unwrap();
        let path = next.companion_path.clone().unwrap();

        // User edits header fields and tags in place.
        let text = vault.read_text(&path).await.unwrap();
        let edited = text
            .replace("title: A Study of Things", "title: Retitled by Hand")
            .replace("  - alpha", "  - gamma");
        vault.add_text(&path, &edited);

        let synced = m.sync_from_companion(&next).await.unwrap().unwrap();
        assert_eq!(synced.title, "Retitled by Hand");
        assert_eq!(synced.tags, vec!["gamma", "beta"]);
        // File binding is not the header's to change.
        assert_eq!(synced.file_path, "papers/a-study.pdf");
    }
}
