//! # Sync Orchestrator
//!
//! Drives one sync run end to end:
//!
//! 1. Take the process-wide run lock (overlapping runs are rejected)
//! 2. Make sure the remote root and config folder exist
//! 3. Scan local and remote concurrently
//! 4. Reconcile the two snapshots
//! 5. Execute uploads/downloads with bounded concurrency, in path order
//! 6. Sync the shared settings file
//! 7. Append conflict records and a summary line to the conflict log
//!
//! Per-action failures end up in [`SyncReport::failed`]; only run-level
//! failures are returned as [`SyncError`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::new(config, adapter, fs, clock, event_bus);
//! let report = orchestrator.sync_now(CancellationToken::new()).await?;
//! println!("{} uploaded, {} failed", report.uploaded.len(), report.failed.len());
//! ```

use crate::conflict_log::{ConflictLog, ConflictRecord};
use crate::error::{Result, SyncError};
use crate::job::{FailedAction, RunId, SettingsOutcome, SyncPhase, SyncReport};
use crate::reconcile::{reconcile, SyncAction};
use crate::retry::RetryPolicy;
use crate::scanner::{LocalScanner, RemoteScanner, ScanFilter};
use crate::settings_sync::SettingsSync;
use crate::transfer::{ActionError, Transfers};
use bridge_traits::storage::{FileSystemAccess, StorageAdapter};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, DocumentChange, DocumentEvent, EventBus, SyncEvent};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub struct SyncOrchestrator {
    config: Arc<CoreConfig>,
    adapter: Arc<dyn StorageAdapter>,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    conflict_log: ConflictLog,
    retry: RetryPolicy,
    run_lock: Mutex<()>,
    phase: RwLock<SyncPhase>,
    last_sync_at: RwLock<Option<DateTime<Utc>>>,
}

impl SyncOrchestrator {
    pub fn new(
        config: Arc<CoreConfig>,
        adapter: Arc<dyn StorageAdapter>,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        let conflict_log = ConflictLog::new(fs.clone(), config.conflict_log_path());
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            config,
            adapter,
            fs,
            clock,
            event_bus,
            conflict_log,
            retry,
            run_lock: Mutex::new(()),
            phase: RwLock::new(SyncPhase::Idle),
            last_sync_at: RwLock::new(None),
        }
    }

    pub fn conflict_log(&self) -> &ConflictLog {
        &self.conflict_log
    }

    pub async fn phase(&self) -> SyncPhase {
        *self.phase.read().await
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Finish time of the last run that reached the logging phase.
    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_at.read().await
    }

    /// Run one sync. Rejects with [`SyncError::SyncInProgress`] if a run is
    /// already active. `cancel` is checked before each action starts.
    #[instrument(skip_all, fields(provider = self.adapter.provider_name()))]
    pub async fn sync_now(&self, cancel: CancellationToken) -> Result<SyncReport> {
        let _guard = self.run_lock.try_lock().map_err(|_| {
            debug!("Rejecting overlapping sync request");
            SyncError::SyncInProgress
        })?;

        let run_id = RunId::new();
        info!(run_id = %run_id, "Sync started");
        self.emit(CoreEvent::Sync(SyncEvent::Started {
            run_id: run_id.to_string(),
            provider: self.adapter.provider_name().to_string(),
        }));

        let result = match self.config.sync_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run(run_id, &cancel)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(limit.as_secs())),
            },
            None => self.run(run_id, &cancel).await,
        };

        match &result {
            Ok(report) if report.cancelled => {
                info!(run_id = %run_id, completed = report.completed_actions(), "Sync cancelled");
                self.emit(CoreEvent::Sync(SyncEvent::Cancelled {
                    run_id: run_id.to_string(),
                    completed_actions: report.completed_actions() as u64,
                }));
            }
            Ok(report) => {
                info!(
                    run_id = %run_id,
                    uploaded = report.uploaded.len(),
                    downloaded = report.downloaded.len(),
                    conflicts = report.conflicts(),
                    failed = report.failed.len(),
                    "Sync completed"
                );
                self.emit(CoreEvent::Sync(SyncEvent::Completed {
                    run_id: run_id.to_string(),
                    uploaded: report.uploaded.len() as u64,
                    downloaded: report.downloaded.len() as u64,
                    conflicts: report.conflicts() as u64,
                    failed: report.failed.len() as u64,
                    duration_secs: report.duration_secs(),
                }));
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Sync failed");
                self.force_phase(run_id, SyncPhase::Failed).await;
                self.emit(CoreEvent::Sync(SyncEvent::Failed {
                    run_id: run_id.to_string(),
                    message: e.to_string(),
                }));
            }
        }

        self.force_phase(run_id, SyncPhase::Idle).await;
        result
    }

    async fn run(&self, run_id: RunId, cancel: &CancellationToken) -> Result<SyncReport> {
        let mut report = SyncReport::new(run_id, self.clock.now());

        self.enter(run_id, SyncPhase::Locking).await?;
        self.enter(run_id, SyncPhase::EnsuringLayout).await?;
        self.ensure_layout().await?;

        self.enter(run_id, SyncPhase::Scanning).await?;
        let filter = ScanFilter::from_config(&self.config);
        let local_scanner =
            LocalScanner::new(self.fs.clone(), self.config.sync_root.clone(), filter.clone());
        let remote_scanner = RemoteScanner::new(self.adapter.clone(), filter);
        let (local, remote) = tokio::join!(
            local_scanner.scan(),
            self.retry.execute("list", || remote_scanner.scan())
        );
        let local = local?;
        let remote = remote.map_err(SyncError::RemoteUnreachable)?;

        self.enter(run_id, SyncPhase::Reconciling).await?;
        let plan = reconcile(&local, &remote, self.config.tolerance);
        report.unchanged = plan.unchanged.len();
        debug!(
            local = local.len(),
            remote = remote.len(),
            actions = plan.actions.len(),
            conflicts = plan.conflicts.len(),
            "Reconciled"
        );

        self.enter(run_id, SyncPhase::Executing).await?;
        let transfers = Transfers::new(
            self.adapter.clone(),
            self.fs.clone(),
            self.retry.clone(),
            self.config.sync_root.clone(),
        );
        let aborted = AtomicBool::new(false);

        let outcomes: Vec<(&SyncAction, Option<std::result::Result<(), ActionError>>)> =
            stream::iter(plan.actions.iter())
                .map(|action| {
                    let transfers = &transfers;
                    let aborted = &aborted;
                    let remote = &remote;
                    async move {
                        if cancel.is_cancelled() || aborted.load(Ordering::SeqCst) {
                            return (action, None);
                        }
                        let result = match action {
                            SyncAction::Upload(path) => transfers.upload(path).await,
                            SyncAction::Download(path) => {
                                let modified_at =
                                    remote.get(path).map(|s| s.modified_at).unwrap_or_default();
                                transfers.download(path, modified_at).await
                            }
                        };
                        if matches!(&result, Err(e) if e.is_fatal()) {
                            aborted.store(true, Ordering::SeqCst);
                        }
                        (action, Some(result))
                    }
                })
                .buffered(self.config.max_concurrent_transfers.max(1))
                // Type-erase the stream so the enclosing future is provably `Send`
                // (works around rustc's higher-ranked closure inference, rust#102211).
                .boxed()
                .collect()
                .await;

        let mut skipped = 0usize;
        for (action, outcome) in outcomes {
            match outcome {
                None => skipped += 1,
                Some(Ok(())) => {
                    let (change, list) = match action {
                        SyncAction::Upload(_) => (DocumentChange::Uploaded, &mut report.uploaded),
                        SyncAction::Download(_) => {
                            (DocumentChange::Downloaded, &mut report.downloaded)
                        }
                    };
                    list.push(action.path().to_string());
                    self.emit(CoreEvent::Document(DocumentEvent::Changed {
                        path: action.path().to_string(),
                        change,
                    }));
                }
                Some(Err(e)) => {
                    warn!(path = %action.path(), reason = %e, "Sync action failed");
                    self.emit(CoreEvent::Sync(SyncEvent::ActionFailed {
                        run_id: run_id.to_string(),
                        path: action.path().to_string(),
                        reason: e.reason(),
                    }));
                    report.failed.push(FailedAction {
                        path: action.path().to_string(),
                        reason: e.reason(),
                    });
                }
            }
        }
        report.aborted = aborted.load(Ordering::SeqCst);
        report.cancelled = skipped > 0 && !report.aborted;
        if report.aborted {
            warn!("Fatal storage error, remaining actions were skipped");
        }

        let mut conflicts = plan.conflicts;
        if !report.aborted && !report.cancelled {
            let settings_path = self.config.remote_settings_path();
            let settings = SettingsSync {
                adapter: &self.adapter,
                fs: &self.fs,
                transfers: &transfers,
                relative_path: &settings_path,
                tolerance: self.config.tolerance,
            };
            let (outcome, settings_conflict) = settings.run().await;
            if outcome == SettingsOutcome::Downloaded {
                self.emit(CoreEvent::Document(DocumentEvent::Changed {
                    path: settings_path.clone(),
                    change: DocumentChange::SettingsChanged,
                }));
            }
            report.settings_outcome = outcome;
            conflicts.extend(settings_conflict);
        }

        self.enter(run_id, SyncPhase::Logging).await?;
        let now = self.clock.now();
        let records: Vec<ConflictRecord> = conflicts
            .iter()
            .map(|conflict| {
                warn!(
                    path = %conflict.path,
                    resolution = conflict.resolution.as_str(),
                    local_modified_at = conflict.local_modified_at,
                    remote_modified_at = conflict.remote_modified_at,
                    "Sync conflict"
                );
                report.count_conflict(conflict.resolution);
                ConflictRecord::from_conflict(conflict, now)
            })
            .collect();
        self.conflict_log.append_conflicts(&records).await?;
        self.conflict_log
            .append_summary(
                now,
                report.uploaded.len(),
                report.downloaded.len(),
                report.failed.len(),
            )
            .await?;

        report.finished_at = self.clock.now();
        *self.last_sync_at.write().await = Some(report.finished_at);
        Ok(report)
    }

    async fn ensure_layout(&self) -> Result<()> {
        self.retry
            .execute("ensure_root", || self.adapter.ensure_folder(""))
            .await
            .map_err(SyncError::RemoteUnreachable)?;
        self.retry
            .execute("ensure_config_dir", || {
                self.adapter.ensure_folder(&self.config.config_dir_name)
            })
            .await
            .map_err(SyncError::RemoteUnreachable)
    }

    async fn enter(&self, run_id: RunId, next: SyncPhase) -> Result<()> {
        let mut phase = self.phase.write().await;
        *phase = phase.transition(next)?;
        drop(phase);
        self.emit(CoreEvent::Sync(SyncEvent::PhaseChanged {
            run_id: run_id.to_string(),
            phase: next.to_string(),
        }));
        Ok(())
    }

    /// Unvalidated reset used when a run ends abnormally.
    async fn force_phase(&self, run_id: RunId, next: SyncPhase) {
        let mut phase = self.phase.write().await;
        if *phase == next {
            return;
        }
        *phase = next;
        drop(phase);
        self.emit(CoreEvent::Sync(SyncEvent::PhaseChanged {
            run_id: run_id.to_string(),
            phase: next.to_string(),
        }));
    }

    fn emit(&self, event: CoreEvent) {
        // No subscribers is fine
        let _ = self.event_bus.emit(event);
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("provider", &self.adapter.provider_name())
            .field("sync_root", &self.config.sync_root)
            .finish_non_exhaustive()
    }
}
