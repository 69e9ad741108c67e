//! Filesystem host implementation rooted at a directory.
//!
//! Paths cross this boundary as `/`-separated strings relative to the root.
//! Text-document discovery uses the same include-glob approach as any other
//! local-first scan: markdown by default, tunable per vault.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use super::{
    extract_links, ContentStore, DocumentIndex, DocumentInfo, IndexedLink, Persistence,
};

/// Content store + document index over a directory tree.
pub struct FsVault {
    root: PathBuf,
    text_globs: GlobSet,
}

impl FsVault {
    /// Vault with the default text-document patterns (`**/*.md`).
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_text_globs(root, &["**/*.md".to_string()])
    }

    pub fn with_text_globs(root: impl Into<PathBuf>, patterns: &[String]) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            bail!("vault root does not exist: {}", root.display());
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            root,
            text_globs: builder.build()?,
        })
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn walk(&self) -> Vec<String> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
        // Sort for deterministic ordering
        out.sort();
        out
    }
}

#[async_trait]
impl ContentStore for FsVault {
    async fn read_text(&self, path: &str) -> Result<String> {
        std::fs::read_to_string(self.absolute(path))
            .with_context(|| format!("failed to read {}", path))
    }

    async fn write_text(&self, path: &str, content: &str) -> Result<()> {
        let absolute = self.absolute(path);
        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&absolute, content).with_context(|| format!("failed to write {}", path))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        std::fs::remove_file(self.absolute(path))
            .with_context(|| format!("failed to remove {}", path))
    }

    async fn exists(&self, path: &str) -> bool {
        self.absolute(path).is_file()
    }

    async fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.walk())
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        std::fs::create_dir_all(self.absolute(path))
            .with_context(|| format!("failed to create directory {}", path))
    }

    async fn file_size(&self, path: &str) -> Option<u64> {
        std::fs::metadata(self.absolute(path)).ok().map(|m| m.len())
    }
}

#[async_trait]
impl DocumentIndex for FsVault {
    async fn text_documents(&self) -> Result<Vec<DocumentInfo>> {
        Ok(self
            .walk()
            .into_iter()
            .filter(|path| self.text_globs.is_match(path))
            .map(DocumentInfo::new)
            .collect())
    }

    async fn links_in(&self, path: &str) -> Result<Vec<IndexedLink>> {
        let text = self.read_text(path).await?;
        Ok(extract_links(&text))
    }
}

/// Snapshot persistence in a JSON file, with an optional legacy location
/// consulted once on first load.
pub struct JsonFilePersistence {
    path: PathBuf,
    legacy_path: Option<PathBuf>,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_path: None,
        }
    }

    pub fn with_legacy(path: impl Into<PathBuf>, legacy_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_path: Some(legacy_path.into()),
        }
    }

    fn read_if_present(path: &Path) -> Result<Option<String>> {
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path).with_context(|| {
            format!("failed to read store snapshot: {}", path.display())
        })?))
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn load(&self) -> Result<Option<String>> {
        Self::read_if_present(&self.path)
    }

    async fn save(&self, data: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, data).with_context(|| {
            format!("failed to write store snapshot: {}", self.path.display())
        })
    }

    async fn load_legacy(&self) -> Result<Option<String>> {
        match &self.legacy_path {
            Some(path) => Self::read_if_present(path),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vault_with_files() -> (TempDir, FsVault) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("notes")).unwrap();
        std::fs::write(tmp.path().join("notes/a.md"), "see [[papers/x.pdf]]").unwrap();
        std::fs::write(tmp.path().join("notes/raw.txt"), "plain").unwrap();
        let vault = FsVault::new(tmp.path()).unwrap();
        (tmp, vault)
    }

    #[tokio::test]
    async fn test_text_documents_respect_globs() {
        let (_tmp, vault) = vault_with_files();
        let docs = vault.text_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "notes/a.md");
        assert_eq!(docs[0].name, "a");
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let (_tmp, vault) = vault_with_files();
        vault.write_text("deep/nested/b.md", "content").await.unwrap();
        assert!(vault.exists("deep/nested/b.md").await);
        assert_eq!(vault.file_size("deep/nested/b.md").await, Some(7));
    }

    #[tokio::test]
    async fn test_persistence_round_trip_and_legacy() {
        let tmp = TempDir::new().unwrap();
        let current = tmp.path().join("store.json");
        let legacy = tmp.path().join("legacy.json");
        std::fs::write(&legacy, "{\"old\":true}").unwrap();

        let persistence = JsonFilePersistence::with_legacy(&current, &legacy);
        assert_eq!(persistence.load().await.unwrap(), None);
        assert_eq!(
            persistence.load_legacy().await.unwrap(),
            Some("{\"old\":true}".to_string())
        );

        persistence.save("{\"new\":true}").await.unwrap();
        assert_eq!(
            persistence.load().await.unwrap(),
            Some("{\"new\":true}".to_string())
        );
    }
}
