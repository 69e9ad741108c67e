//! Bulk synchronization drivers.
//!
//! Bulk entry points (resync-all, recompute-all) are guarded against
//! reentrancy: writing a companion document is itself an I/O mutation the
//! host may report back as a change notification, which could re-trigger the
//! very sync that caused it. [`SyncGuard`] combines an in-progress flag with
//! a minimum-interval throttle; acquisition yields an RAII permit whose
//! `Drop` releases the flag and stamps the throttle clock on every exit
//! path, including errors.
//!
//! Work is chunked into fixed-size batches with a short cooperative sleep in
//! between so the host's own background indexing is not starved. Batch size
//! and delay are tunable config, not correctness-relevant.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::companion::CompanionManager;
use crate::config::SyncConfig;
use crate::host::NotificationSink;
use crate::models::Record;
use crate::resolver::{RecomputeSummary, ReferenceResolver};
use crate::store::{AddOutcome, RecordStore, SaveOptions};

/// Why a bulk operation did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSkip {
    /// Another bulk operation holds the permit.
    InProgress,
    /// The previous run finished less than the cooldown ago.
    Throttled,
}

impl fmt::Display for SyncSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSkip::InProgress => write!(f, "a sync operation is already running"),
            SyncSkip::Throttled => write!(f, "last sync finished too recently"),
        }
    }
}

/// Reentrancy guard for bulk entry points: an in-progress flag plus a
/// timestamp-vs-cooldown throttle.
#[derive(Debug)]
pub struct SyncGuard {
    busy: AtomicBool,
    last_run: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl SyncGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            busy: AtomicBool::new(false),
            last_run: Mutex::new(None),
            cooldown,
        }
    }

    pub fn try_acquire(&self) -> Result<SyncPermit<'_>, SyncSkip> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(SyncSkip::InProgress);
        }
        let throttled = self
            .last_run
            .lock()
            .unwrap()
            .is_some_and(|t| t.elapsed() < self.cooldown);
        if throttled {
            self.busy.store(false, Ordering::SeqCst);
            return Err(SyncSkip::Throttled);
        }
        Ok(SyncPermit { guard: self })
    }
}

/// Held for the duration of a bulk operation; releasing is automatic.
#[derive(Debug)]
pub struct SyncPermit<'a> {
    guard: &'a SyncGuard,
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        *self.guard.last_run.lock().unwrap() = Some(Instant::now());
        self.guard.busy.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default, Clone)]
pub struct ResyncSummary {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SaveRecordOptions {
    /// Bulk import path: store the record without touching its companion.
    pub skip_companion: bool,
}

/// Orchestrates store mutations with companion writes and resolver passes.
pub struct SyncService {
    companions: CompanionManager,
    resolver: ReferenceResolver,
    sink: Arc<dyn NotificationSink>,
    cfg: SyncConfig,
    guard: SyncGuard,
}

impl SyncService {
    pub fn new(
        companions: CompanionManager,
        resolver: ReferenceResolver,
        sink: Arc<dyn NotificationSink>,
        cfg: SyncConfig,
    ) -> Self {
        let guard = SyncGuard::new(Duration::from_secs(cfg.cooldown_secs));
        Self {
            companions,
            resolver,
            sink,
            cfg,
            guard,
        }
    }

    /// Add or update a record, then regenerate its companion unless the
    /// caller skipped that (policy still applies). A companion write failure
    /// is reported, not fatal; the record mutation always lands.
    pub async fn save_record(
        &self,
        store: &mut RecordStore,
        record: Record,
        opts: SaveRecordOptions,
    ) -> Result<AddOutcome> {
        let outcome = if store.get(&record.id).is_some() {
            let id = record.id.clone();
            store.update(record, SaveOptions::deferred()).await?;
            AddOutcome {
                id,
                duplicate_of: None,
            }
        } else {
            store.add(record, SaveOptions::deferred()).await?
        };

        if !opts.skip_companion {
            if let Some(current) = store.get(&outcome.id).cloned() {
                match self.companions.generate(&current, false).await {
                    Ok(Some(next)) => store.update(next, SaveOptions::deferred()).await?,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(id = %outcome.id, "companion write failed: {e}");
                        self.sink
                            .notify(&format!("Failed to write companion document: {e}"));
                    }
                }
            }
        }

        store.flush().await;
        Ok(outcome)
    }

    /// Delete a record and its companion document, if present.
    pub async fn delete_record(&self, store: &mut RecordStore, id: &str) -> Result<()> {
        let Some(record) = store.get(id).cloned() else {
            bail!("unknown record id: {id}");
        };
        if let Err(e) = self.companions.delete(&record).await {
            warn!(id, "companion delete failed: {e}");
            self.sink
                .notify(&format!("Failed to delete companion document: {e}"));
        }
        store.remove(id).await;
        Ok(())
    }

    /// Regenerate every eligible record's companion document, in batches,
    /// persisting once at the end. Per-record failures are counted and
    /// reported, never fatal.
    pub async fn resync_all(&self, store: &mut RecordStore) -> Result<ResyncSummary> {
        let _permit = match self.guard.try_acquire() {
            Ok(permit) => permit,
            Err(skip) => bail!("resync skipped: {skip}"),
        };

        let ids: Vec<String> = store.all().map(|r| r.id.clone()).collect();
        let mut summary = ResyncSummary::default();

        for (i, chunk) in ids.chunks(self.cfg.batch_size.max(1)).enumerate() {
            if i > 0 && self.cfg.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.batch_delay_ms)).await;
            }
            for id in chunk {
                let Some(record) = store.get(id).cloned() else { continue };
                match self.companions.generate(&record, false).await {
                    Ok(Some(next)) => {
                        store.update(next, SaveOptions::deferred()).await?;
                        summary.synced += 1;
                    }
                    Ok(None) => summary.skipped += 1,
                    Err(e) => {
                        warn!(id, "companion sync failed: {e}");
                        summary.failed += 1;
                    }
                }
            }
        }

        store.flush().await;
        info!(
            synced = summary.synced,
            skipped = summary.skipped,
            failed = summary.failed,
            "companion resync finished"
        );
        self.sink.notify(&format!(
            "Companion sync: {} updated, {} skipped, {} failed",
            summary.synced, summary.skipped, summary.failed
        ));
        Ok(summary)
    }

    /// Recompute every record's reference fields from the full document
    /// corpus, in batches, persisting once at the end.
    pub async fn recompute_all_references(
        &self,
        store: &mut RecordStore,
    ) -> Result<RecomputeSummary> {
        let _permit = match self.guard.try_acquire() {
            Ok(permit) => permit,
            Err(skip) => bail!("recompute skipped: {skip}"),
        };

        let mut records: Vec<Record> = store.all().cloned().collect();
        let summary = self
            .resolver
            .recompute_all_with(
                &mut records,
                self.cfg.batch_size.max(1),
                Duration::from_millis(self.cfg.batch_delay_ms),
            )
            .await?;

        for record in records {
            store.update(record, SaveOptions::deferred()).await?;
        }
        store.flush().await;

        info!(
            scanned = summary.documents_scanned,
            skipped = summary.documents_skipped,
            found = summary.references_found,
            "reference recompute finished"
        );
        Ok(summary)
    }
}
