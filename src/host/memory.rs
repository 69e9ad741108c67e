//! In-memory host implementation for tests and embedded use.
//!
//! Uses `BTreeMap` and `Vec` behind `std::sync::RwLock` for thread safety
//! and deterministic enumeration order. One [`MemoryVault`] serves all four
//! host traits; wrap it in an `Arc` and hand the same instance everywhere.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{
    extract_links, ContentStore, DocumentIndex, DocumentInfo, IndexedLink, NotificationSink,
    Persistence,
};
use crate::paths;

enum FileEntry {
    Text(String),
    /// Non-text file, tracked by size only.
    Binary(u64),
}

/// In-memory vault: content store, document index, persistence, and
/// notification sink in one.
pub struct MemoryVault {
    files: RwLock<BTreeMap<String, FileEntry>>,
    persisted: RwLock<Option<String>>,
    legacy: RwLock<Option<String>>,
    messages: RwLock<Vec<String>>,
    fail_saves: AtomicBool,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            persisted: RwLock::new(None),
            legacy: RwLock::new(None),
            messages: RwLock::new(Vec::new()),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn add_text(&self, path: &str, content: &str) {
        self.files
            .write()
            .unwrap()
            .insert(path.to_string(), FileEntry::Text(content.to_string()));
    }

    pub fn add_binary(&self, path: &str, size: u64) {
        self.files
            .write()
            .unwrap()
            .insert(path.to_string(), FileEntry::Binary(size));
    }

    pub fn remove_file(&self, path: &str) {
        self.files.write().unwrap().remove(path);
    }

    /// Simulate an external rename without going through the engine.
    pub fn rename_file(&self, old_path: &str, new_path: &str) {
        let mut files = self.files.write().unwrap();
        if let Some(entry) = files.remove(old_path) {
            files.insert(new_path.to_string(), entry);
        }
    }

    /// Seed the legacy persistence location for migration tests.
    pub fn seed_legacy(&self, blob: &str) {
        *self.legacy.write().unwrap() = Some(blob.to_string());
    }

    /// Make every subsequent save fail, to exercise the non-fatal
    /// persistence path.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn persisted(&self) -> Option<String> {
        self.persisted.read().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.read().unwrap().clone()
    }
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryVault {
    async fn read_text(&self, path: &str) -> Result<String> {
        let files = self.files.read().unwrap();
        match files.get(path) {
            Some(FileEntry::Text(content)) => Ok(content.clone()),
            Some(FileEntry::Binary(_)) => bail!("not a text file: {}", path),
            None => bail!("file not found: {}", path),
        }
    }

    async fn write_text(&self, path: &str, content: &str) -> Result<()> {
        self.add_text(path, content);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.files.write().unwrap().remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        self.files.read().unwrap().contains_key(path)
    }

    async fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files.read().unwrap().keys().cloned().collect())
    }

    async fn create_dir_all(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn file_size(&self, path: &str) -> Option<u64> {
        let files = self.files.read().unwrap();
        match files.get(path) {
            Some(FileEntry::Text(content)) => Some(content.len() as u64),
            Some(FileEntry::Binary(size)) => Some(*size),
            None => None,
        }
    }
}

#[async_trait]
impl DocumentIndex for MemoryVault {
    async fn text_documents(&self) -> Result<Vec<DocumentInfo>> {
        let files = self.files.read().unwrap();
        Ok(files
            .iter()
            .filter(|(path, entry)| {
                matches!(entry, FileEntry::Text(_))
                    && paths::extension(path.as_str()).eq_ignore_ascii_case("md")
            })
            .map(|(path, _)| DocumentInfo::new(path.as_str()))
            .collect())
    }

    async fn links_in(&self, path: &str) -> Result<Vec<IndexedLink>> {
        let text = self.read_text(path).await?;
        Ok(extract_links(&text))
    }
}

#[async_trait]
impl Persistence for MemoryVault {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.persisted.read().unwrap().clone())
    }

    async fn save(&self, data: &str) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("simulated persistence failure");
        }
        *self.persisted.write().unwrap() = Some(data.to_string());
        Ok(())
    }

    async fn load_legacy(&self) -> Result<Option<String>> {
        Ok(self.legacy.read().unwrap().clone())
    }
}

impl NotificationSink for MemoryVault {
    fn notify(&self, message: &str) {
        self.messages.write().unwrap().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_documents_lists_markdown_only() {
        let vault = MemoryVault::new();
        vault.add_text("notes/a.md", "hello");
        vault.add_text("notes/raw.txt", "hello");
        vault.add_binary("papers/a.pdf", 100);
        let docs = vault.text_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "notes/a.md");
    }

    #[tokio::test]
    async fn test_read_binary_fails() {
        let vault = MemoryVault::new();
        vault.add_binary("papers/a.pdf", 100);
        assert!(vault.read_text("papers/a.pdf").await.is_err());
        assert_eq!(vault.file_size("papers/a.pdf").await, Some(100));
    }

    #[tokio::test]
    async fn test_links_in_reads_current_content() {
        let vault = MemoryVault::new();
        vault.add_text("notes/a.md", "see [[papers/x.pdf]]");
        let links = vault.links_in("notes/a.md").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "papers/x.pdf");
    }
}
