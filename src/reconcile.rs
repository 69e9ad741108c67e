//! Path reconciliation: keeping records coherent under external file moves.
//!
//! The host reports renames and deletes it observes; the engine classifies
//! each path (primary file, companion document, or other) by store lookup
//! and applies the matching transition. All record updates for one
//! notification are deferred and persisted with a single flush, so readers
//! never observe a partial write.
//!
//! Create/modify notifications are accepted and ignored: a companion write
//! is itself an I/O mutation the host may echo back, and reacting to it
//! would re-enter the sync that caused it.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::companion::CompanionManager;
use crate::host::{ContentStore, NotificationSink, VaultEvent};
use crate::models::Record;
use crate::paths;
use crate::store::{RecordStore, SaveOptions};

pub struct ReconciliationEngine {
    content: Arc<dyn ContentStore>,
    companions: CompanionManager,
    sink: Arc<dyn NotificationSink>,
}

impl ReconciliationEngine {
    pub fn new(
        content: Arc<dyn ContentStore>,
        companions: CompanionManager,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            content,
            companions,
            sink,
        }
    }

    /// Entry point for host change notifications.
    pub async fn handle_event(&self, store: &mut RecordStore, event: &VaultEvent) -> Result<()> {
        match event {
            VaultEvent::Renamed { old_path, new_path } => {
                self.handle_rename(store, old_path, new_path).await
            }
            VaultEvent::Deleted { path } => self.handle_delete(store, path).await,
            VaultEvent::Created { .. } | VaultEvent::Modified { .. } => Ok(()),
        }
    }

    /// React to an external rename/move of `old` to `new`.
    pub async fn handle_rename(
        &self,
        store: &mut RecordStore,
        old: &str,
        new: &str,
    ) -> Result<()> {
        let mut touched = false;

        // Primary files first: rebind path/name/type, refresh size.
        let primary_ids: Vec<String> = store
            .all()
            .filter(|r| r.file_path == old)
            .map(|r| r.id.clone())
            .collect();
        for id in primary_ids {
            let Some(record) = store.get(&id) else { continue };
            let mut next = record.clone();
            next.rebind_primary(new);
            next.file_size = self.content.file_size(new).await;
            store.update(next, SaveOptions::deferred()).await?;
            touched = true;
            debug!(id, old, new, "primary file renamed");
        }

        // Companion documents: follow the path, and when the move crossed
        // directories, try to carry a co-located primary along.
        let companion_ids: Vec<String> = store
            .all()
            .filter(|r| r.companion_path.as_deref() == Some(old))
            .map(|r| r.id.clone())
            .collect();
        for id in companion_ids {
            let Some(record) = store.get(&id) else { continue };
            let mut next = record.clone();
            next.companion_path = Some(new.to_string());

            let old_dir = paths::parent(old);
            let new_dir = paths::parent(new);
            if old_dir != new_dir {
                if let Some(candidate) = paths::apply_dir_delta(&next.file_path, old_dir, new_dir)
                {
                    if self.content.exists(&candidate).await {
                        next.rebind_primary(&candidate);
                        next.file_size = self.content.file_size(&candidate).await;
                        next.needs_reassignment = false;
                        info!(id, candidate, "primary followed companion move");
                    } else {
                        next.needs_reassignment = true;
                        self.sink.notify(&format!(
                            "Companion for '{}' moved, but the file was not found at {}; choose a new file",
                            next.title, candidate
                        ));
                    }
                }
            }

            store.update(next, SaveOptions::deferred()).await?;
            touched = true;
        }

        if touched {
            store.flush().await;
        }
        Ok(())
    }

    /// React to an external delete. A deleted primary leaves the record
    /// untouched (it merely fails existence checks); a deleted companion
    /// marks the record lost.
    pub async fn handle_delete(&self, store: &mut RecordStore, path: &str) -> Result<()> {
        let mut touched = false;

        let companion_ids: Vec<String> = store
            .all()
            .filter(|r| r.companion_path.as_deref() == Some(path))
            .map(|r| r.id.clone())
            .collect();
        for id in companion_ids {
            let Some(record) = store.get(&id) else { continue };
            if !record.has_companion {
                continue;
            }
            let next = mark_companion_lost(record);
            store.update(next, SaveOptions::deferred()).await?;
            touched = true;
            info!(id, path, "companion document lost");
        }

        if touched {
            store.flush().await;
        }
        Ok(())
    }

    /// Atomic verification pass for one record: a companion that no longer
    /// resolves is marked lost, and a record that should have one per policy
    /// gets one generated. Detection and remediation deliberately live in
    /// one function.
    pub async fn validate_companion_state(
        &self,
        store: &mut RecordStore,
        id: &str,
    ) -> Result<()> {
        let Some(record) = store.get(id).cloned() else {
            return Ok(());
        };

        if record.has_companion {
            if !self.companions.verify_exists(&record).await {
                let next = mark_companion_lost(&record);
                store.update(next, SaveOptions::immediate()).await?;
                info!(id, "companion no longer resolves; marked lost");
            }
        } else if self.companions.should_generate(&record) {
            if let Some(next) = self.companions.generate(&record, false).await? {
                store.update(next, SaveOptions::immediate()).await?;
                info!(id, "companion generated during verification pass");
            }
        }
        Ok(())
    }

    /// Records waiting for an external actor to supply a new primary path.
    pub fn records_needing_reassignment<'a>(
        &self,
        store: &'a RecordStore,
    ) -> Vec<&'a Record> {
        store.all().filter(|r| r.needs_reassignment).collect()
    }

    /// Name-similarity search over the content tree for reassignment
    /// candidates, best first.
    pub async fn suggest_reassignment_candidates(&self, record: &Record) -> Result<Vec<String>> {
        let stem = paths::file_stem(&record.file_name).to_lowercase();
        if stem.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u8, String)> = Vec::new();
        for path in self.content.list_files().await? {
            if record.companion_path.as_deref() == Some(path.as_str()) {
                continue;
            }
            let candidate_stem = paths::file_stem(&path).to_lowercase();
            let score = if candidate_stem == stem {
                if paths::extension(&path).eq_ignore_ascii_case(&record.file_type) {
                    0
                } else {
                    1
                }
            } else if candidate_stem.starts_with(&stem) || stem.starts_with(&candidate_stem) {
                2
            } else if stem.len() > 2 && candidate_stem.contains(&stem) {
                3
            } else {
                continue;
            };
            scored.push((score, path));
        }

        scored.sort();
        Ok(scored.into_iter().map(|(_, path)| path).take(10).collect())
    }

    /// Accept an externally chosen primary path. The path must resolve to a
    /// real file before it is adopted.
    pub async fn reassign_primary(
        &self,
        store: &mut RecordStore,
        id: &str,
        path: &str,
    ) -> Result<()> {
        if !self.content.exists(path).await {
            bail!("cannot reassign: file does not exist: {path}");
        }
        let Some(record) = store.get(id) else {
            bail!("unknown record id: {id}");
        };
        let mut next = record.clone();
        next.rebind_primary(path);
        next.file_size = self.content.file_size(path).await;
        next.needs_reassignment = false;
        store.update(next, SaveOptions::immediate()).await?;
        Ok(())
    }
}

fn mark_companion_lost(record: &Record) -> Record {
    let mut next = record.clone();
    next.has_companion = false;
    next.companion_path = None;
    next.last_synced_at = None;
    next.lost = true;
    next
}
