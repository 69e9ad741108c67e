//! Record store: the single owner of all tracked items.
//!
//! Holds records in a `BTreeMap` keyed by id (stable iteration order keeps
//! snapshots, `all()`, and `tags_union()` deterministic) and owns snapshot
//! persistence. Every other component computes a next-state [`Record`] and
//! hands it to [`RecordStore::update`]; nothing else mutates stored records.
//!
//! Persistence is best-effort by design: a failed save is reported to the
//! notification sink and logged, but never propagates — the in-memory store
//! stays authoritative for the session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::host::{NotificationSink, Persistence};
use crate::models::Record;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    #[serde(default)]
    records: Vec<Record>,
}

/// Whether a mutation persists immediately or defers to a later
/// [`RecordStore::flush`] (batch owners must flush exactly once).
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    pub persist: bool,
}

impl SaveOptions {
    pub fn immediate() -> Self {
        Self { persist: true }
    }

    pub fn deferred() -> Self {
        Self { persist: false }
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self::immediate()
    }
}

/// Result of an add: the stored id, plus the id of an existing record whose
/// identity key collides (duplicates are surfaced, never rejected).
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub id: String,
    pub duplicate_of: Option<String>,
}

/// How a surfaced duplicate pair should be settled. The unattended default
/// is keep-both; data is never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateDecision {
    KeepBoth,
    /// Keep the existing record, filling only its blank fields and unioning
    /// tags from the incoming one.
    Merge,
    /// Keep the existing record's id and companion state, but take the
    /// incoming record's descriptive fields and file binding.
    Overwrite,
}

pub struct RecordStore {
    records: BTreeMap<String, Record>,
    persistence: Arc<dyn Persistence>,
    sink: Arc<dyn NotificationSink>,
}

impl RecordStore {
    /// Load the store from the persisted snapshot. Never fails: missing
    /// state falls back to a one-time legacy-location migration, and any
    /// error degrades to an empty store with a reported message.
    pub async fn load(persistence: Arc<dyn Persistence>, sink: Arc<dyn NotificationSink>) -> Self {
        let mut store = Self {
            records: BTreeMap::new(),
            persistence,
            sink,
        };

        match store.persistence.load().await {
            Ok(Some(raw)) => store.ingest_snapshot(&raw),
            Ok(None) => match store.persistence.load_legacy().await {
                Ok(Some(raw)) => {
                    store.ingest_snapshot(&raw);
                    // Settle the migrated state into the primary location.
                    store.flush().await;
                }
                Ok(None) => {}
                Err(e) => store.report(&format!("Failed to read legacy record store: {e}")),
            },
            Err(e) => store.report(&format!("Failed to load record store: {e}")),
        }

        store
    }

    fn ingest_snapshot(&mut self, raw: &str) {
        match serde_json::from_str::<StoreSnapshot>(raw) {
            Ok(snapshot) => {
                for record in snapshot.records {
                    self.records.insert(record.id.clone(), record);
                }
            }
            Err(e) => self.report(&format!("Record store snapshot is unreadable: {e}")),
        }
    }

    fn report(&self, message: &str) {
        warn!("{message}");
        self.sink.notify(message);
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Case-insensitive identity-key lookup. Blank or whitespace-only keys
    /// never match anything.
    pub fn find_by_identity_key(&self, key: &str) -> Option<&Record> {
        let needle = key.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.records
            .values()
            .find(|r| r.identity_key_normalized().as_deref() == Some(needle.as_str()))
    }

    /// Lookup by primary file path.
    pub fn find_by_path(&self, path: &str) -> Option<&Record> {
        self.records.values().find(|r| r.file_path == path)
    }

    /// Sorted union of every record's tags.
    pub fn tags_union(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .records
            .values()
            .flat_map(|r| r.tags.iter())
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        set.into_iter().map(str::to_string).collect()
    }

    /// Insert a new record. A colliding non-blank identity key is surfaced
    /// through the outcome (and the sink) but the record is stored anyway.
    pub async fn add(&mut self, record: Record, opts: SaveOptions) -> Result<AddOutcome> {
        if self.records.contains_key(&record.id) {
            bail!("record id already exists: {}", record.id);
        }

        let duplicate_of = record.identity_key_normalized().and_then(|key| {
            self.records
                .values()
                .find(|r| r.identity_key_normalized().as_deref() == Some(key.as_str()))
                .map(|r| r.id.clone())
        });
        if let Some(existing) = &duplicate_of {
            self.report(&format!(
                "Duplicate identity key '{}' (already on record {existing})",
                record.identity_key.as_deref().unwrap_or_default()
            ));
        }

        let id = record.id.clone();
        self.records.insert(id.clone(), record);
        if opts.persist {
            self.flush().await;
        }
        Ok(AddOutcome { id, duplicate_of })
    }

    /// Replace a stored record with its next state. The id must already be
    /// known; ids are immutable.
    pub async fn update(&mut self, record: Record, opts: SaveOptions) -> Result<()> {
        if !self.records.contains_key(&record.id) {
            bail!("unknown record id: {}", record.id);
        }
        self.records.insert(record.id.clone(), record);
        if opts.persist {
            self.flush().await;
        }
        Ok(())
    }

    /// Remove a record, returning it. Companion-document cleanup is the
    /// caller's concern (see `sync::SyncService::delete_record`).
    pub async fn remove(&mut self, id: &str) -> Option<Record> {
        let removed = self.records.remove(id);
        if removed.is_some() {
            self.flush().await;
        }
        removed
    }

    /// Bulk import: inserts every record with persistence deferred, then
    /// flushes exactly once.
    pub async fn add_batch(&mut self, records: Vec<Record>) -> Result<Vec<AddOutcome>> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.add(record, SaveOptions::deferred()).await?);
        }
        self.flush().await;
        Ok(outcomes)
    }

    /// Settle a surfaced duplicate pair. Returns the id of the surviving
    /// record (both survive under [`DuplicateDecision::KeepBoth`]).
    pub async fn resolve_duplicate(
        &mut self,
        existing_id: &str,
        incoming_id: &str,
        decision: DuplicateDecision,
    ) -> Result<String> {
        if decision == DuplicateDecision::KeepBoth {
            return Ok(incoming_id.to_string());
        }

        let incoming = self
            .records
            .remove(incoming_id)
            .with_context(|| format!("unknown record id: {incoming_id}"))?;
        let existing = match self.records.get(existing_id) {
            Some(r) => r.clone(),
            None => {
                // Put the incoming record back before failing.
                self.records.insert(incoming.id.clone(), incoming);
                bail!("unknown record id: {existing_id}");
            }
        };

        let merged = match decision {
            DuplicateDecision::Overwrite => merge_records(&existing, &incoming, true),
            DuplicateDecision::Merge => merge_records(&existing, &incoming, false),
            DuplicateDecision::KeepBoth => unreachable!(),
        };
        self.records.insert(existing_id.to_string(), merged);
        self.flush().await;
        Ok(existing_id.to_string())
    }

    /// Persist the current snapshot. Failures are reported, never raised.
    pub async fn flush(&mut self) {
        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            records: self.records.values().cloned().collect(),
        };
        let raw = match serde_json::to_string(&snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                error!("failed to serialize record store: {e}");
                self.sink.notify(&format!("Failed to serialize record store: {e}"));
                return;
            }
        };
        if let Err(e) = self.persistence.save(&raw).await {
            error!("failed to persist record store: {e}");
            self.sink
                .notify(&format!("Failed to save record store: {e}"));
        }
    }
}

/// Merge a duplicate pair into the surviving record. The survivor keeps its
/// id, companion state, reconciliation state, and references; `prefer_other`
/// decides whose descriptive fields and file binding win.
fn merge_records(base: &Record, other: &Record, prefer_other: bool) -> Record {
    let mut merged = base.clone();

    let pick = |a: &Option<String>, b: &Option<String>| -> Option<String> {
        let blank = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").is_empty();
        if prefer_other {
            if blank(b) { a.clone() } else { b.clone() }
        } else if blank(a) {
            b.clone()
        } else {
            a.clone()
        }
    };

    if prefer_other && !other.title.trim().is_empty() {
        merged.title = other.title.clone();
    }
    merged.author = pick(&base.author, &other.author);
    merged.year = pick(&base.year, &other.year);
    merged.publisher = pick(&base.publisher, &other.publisher);
    merged.tier = pick(&base.tier, &other.tier);
    merged.identity_key = pick(&base.identity_key, &other.identity_key);
    merged.citation_text = pick(&base.citation_text, &other.citation_text);

    if prefer_other {
        merged.file_path = other.file_path.clone();
        merged.file_name = other.file_name.clone();
        merged.file_type = other.file_type.clone();
        merged.file_size = other.file_size;
        for (key, value) in &other.metadata {
            merged.metadata.insert(key.clone(), value.clone());
        }
    } else {
        for (key, value) in &other.metadata {
            merged.metadata.entry(key.clone()).or_insert(value.clone());
        }
    }

    for tag in &other.tags {
        if !merged.tags.iter().any(|t| t == tag) {
            merged.tags.push(tag.clone());
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryVault;

    async fn empty_store(vault: &Arc<MemoryVault>) -> RecordStore {
        let persistence: Arc<dyn Persistence> = vault.clone();
        let sink: Arc<dyn NotificationSink> = vault.clone();
        RecordStore::load(persistence, sink).await
    }

    fn record(title: &str, path: &str, key: Option<&str>) -> Record {
        let mut r = Record::new(title, path);
        r.identity_key = key.map(str::to_string);
        r
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;

        let r = record("A", "papers/a.pdf", Some("10.1/ABC"));
        let id = r.id.clone();
        let outcome = store.add(r, SaveOptions::immediate()).await.unwrap();
        assert_eq!(outcome.id, id);
        assert!(outcome.duplicate_of.is_none());

        assert!(store.get(&id).is_some());
        assert_eq!(
            store.find_by_identity_key(" 10.1/abc ").map(|r| r.id.clone()),
            Some(id.clone())
        );
        assert_eq!(
            store.find_by_path("papers/a.pdf").map(|r| r.id.clone()),
            Some(id)
        );
        assert!(vault.persisted().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_surfaced_not_rejected() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;

        let first = record("A", "a.pdf", Some("10.1/ABC"));
        let first_id = first.id.clone();
        store.add(first, SaveOptions::immediate()).await.unwrap();

        let second = record("B", "b.pdf", Some("10.1/abc"));
        let outcome = store.add(second, SaveOptions::immediate()).await.unwrap();
        assert_eq!(outcome.duplicate_of, Some(first_id));
        // Keep-both default: both records are stored.
        assert_eq!(store.len(), 2);
        assert!(vault.messages().iter().any(|m| m.contains("Duplicate")));
    }

    #[tokio::test]
    async fn test_blank_keys_never_collide() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;

        let a = record("A", "a.pdf", Some("  "));
        let b = record("B", "b.pdf", None);
        let oa = store.add(a, SaveOptions::immediate()).await.unwrap();
        let ob = store.add(b, SaveOptions::immediate()).await.unwrap();
        assert!(oa.duplicate_of.is_none());
        assert!(ob.duplicate_of.is_none());
        assert!(store.find_by_identity_key("").is_none());
        assert!(store.find_by_identity_key("   ").is_none());
    }

    #[tokio::test]
    async fn test_resolve_duplicate_overwrite_merges() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;

        let mut first = record("Old Title", "a.pdf", Some("10.1/ABC"));
        first.tags = vec!["kept".to_string()];
        first.has_companion = true;
        first.companion_path = Some("a.md".to_string());
        let first_id = first.id.clone();
        store.add(first, SaveOptions::immediate()).await.unwrap();

        let mut second = record("New Title", "b.pdf", Some("10.1/ABC"));
        second.tags = vec!["incoming".to_string()];
        second.author = Some("Doe".to_string());
        let second_id = second.id.clone();
        store.add(second, SaveOptions::immediate()).await.unwrap();

        let survivor = store
            .resolve_duplicate(&first_id, &second_id, DuplicateDecision::Overwrite)
            .await
            .unwrap();
        assert_eq!(survivor, first_id);
        assert_eq!(store.len(), 1);

        let merged = store.get(&first_id).unwrap();
        assert_eq!(merged.title, "New Title");
        assert_eq!(merged.author.as_deref(), Some("Doe"));
        assert_eq!(merged.file_path, "b.pdf");
        // Companion state survives from the existing record.
        assert!(merged.has_companion);
        assert_eq!(merged.companion_path.as_deref(), Some("a.md"));
        assert_eq!(merged.tags, vec!["kept", "incoming"]);
    }

    #[tokio::test]
    async fn test_resolve_duplicate_merge_fills_blanks_only() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;

        let mut first = record("Title", "a.pdf", Some("10.1/ABC"));
        first.author = Some("Kept Author".to_string());
        let first_id = first.id.clone();
        store.add(first, SaveOptions::immediate()).await.unwrap();

        let mut second = record("Other", "b.pdf", Some("10.1/ABC"));
        second.author = Some("Ignored".to_string());
        second.year = Some("2001".to_string());
        let second_id = second.id.clone();
        store.add(second, SaveOptions::immediate()).await.unwrap();

        store
            .resolve_duplicate(&first_id, &second_id, DuplicateDecision::Merge)
            .await
            .unwrap();
        let merged = store.get(&first_id).unwrap();
        assert_eq!(merged.title, "Title");
        assert_eq!(merged.author.as_deref(), Some("Kept Author"));
        assert_eq!(merged.year.as_deref(), Some("2001"));
        assert_eq!(merged.file_path, "a.pdf");
    }

    #[tokio::test]
    async fn test_add_batch_flushes_once() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;

        let records = vec![
            record("A", "a.pdf", None),
            record("B", "b.pdf", None),
            record("C", "c.pdf", None),
        ];
        let outcomes = store.add_batch(records).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(store.len(), 3);

        let raw = vault.persisted().unwrap();
        let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot["records"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported_not_raised() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;
        vault.set_fail_saves(true);

        let r = record("A", "a.pdf", None);
        let id = r.id.clone();
        store.add(r, SaveOptions::immediate()).await.unwrap();
        // In-memory state stays authoritative.
        assert!(store.get(&id).is_some());
        assert!(vault
            .messages()
            .iter()
            .any(|m| m.contains("Failed to save record store")));
    }

    #[tokio::test]
    async fn test_legacy_migration_on_first_load() {
        let vault = Arc::new(MemoryVault::new());
        let r = record("Legacy", "a.pdf", None);
        let legacy = serde_json::to_string(&StoreSnapshot {
            version: SNAPSHOT_VERSION,
            records: vec![r.clone()],
        })
        .unwrap();
        vault.seed_legacy(&legacy);

        let store = empty_store(&vault).await;
        assert_eq!(store.len(), 1);
        assert!(store.get(&r.id).is_some());
        // Migration settles into the primary location.
        assert!(vault.persisted().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_degrades_to_empty() {
        let vault = Arc::new(MemoryVault::new());
        vault.save("not json at all").await.unwrap();
        let store = empty_store(&vault).await;
        assert!(store.is_empty());
        assert!(vault.messages().iter().any(|m| m.contains("unreadable")));
    }

    #[tokio::test]
    async fn test_tags_union_sorted_and_deduped() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;

        let mut a = record("A", "a.pdf", None);
        a.tags = vec!["zeta".to_string(), "alpha".to_string()];
        let mut b = record("B", "b.pdf", None);
        b.tags = vec!["alpha".to_string(), " ".to_string(), "mid".to_string()];
        store.add_batch(vec![a, b]).await.unwrap();

        assert_eq!(store.tags_union(), vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_update_unknown_id_fails() {
        let vault = Arc::new(MemoryVault::new());
        let mut store = empty_store(&vault).await;
        let r = record("A", "a.pdf", None);
        assert!(store.update(r, SaveOptions::immediate()).await.is_err());
    }
}
