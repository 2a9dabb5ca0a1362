//! Two-way sync of the single settings file kept under the config directory.
//!
//! The same timestamp rule as documents applies, through [`reconcile`] on
//! one-entry maps.

use crate::job::SettingsOutcome;
use crate::reconcile::{reconcile, Conflict, SyncAction};
use crate::scanner::{FileState, StateMap};
use crate::transfer::Transfers;
use bridge_traits::error::StorageError;
use bridge_traits::storage::{FileSystemAccess, StorageAdapter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) struct SettingsSync<'a> {
    pub adapter: &'a Arc<dyn StorageAdapter>,
    pub fs: &'a Arc<dyn FileSystemAccess>,
    pub transfers: &'a Transfers,
    /// Same relative path on both sides, e.g. `.purse_config/settings.yml`
    pub relative_path: &'a str,
    pub tolerance: Duration,
}

impl SettingsSync<'_> {
    /// Returns the outcome and, when timestamps diverged, the conflict.
    pub(crate) async fn run(&self) -> (SettingsOutcome, Option<Conflict>) {
        let local = match self.local_state().await {
            Ok(state) => state,
            Err(reason) => return (SettingsOutcome::Failed(reason), None),
        };
        let remote = match self.remote_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Could not read remote settings metadata");
                return (SettingsOutcome::Failed(e.to_string()), None);
            }
        };

        let plan = reconcile(&local, &remote, self.tolerance);
        let conflict = plan.conflicts.into_iter().next();

        let outcome = match plan.actions.first() {
            None if local.is_empty() => SettingsOutcome::Absent,
            None => SettingsOutcome::Unchanged,
            Some(SyncAction::Upload(path)) => match self.transfers.upload(path).await {
                Ok(()) => {
                    info!("Settings uploaded");
                    SettingsOutcome::Uploaded
                }
                Err(e) => SettingsOutcome::Failed(e.reason()),
            },
            Some(SyncAction::Download(path)) => {
                let modified_at = remote[path].modified_at;
                match self.transfers.download(path, modified_at).await {
                    Ok(()) => {
                        info!("Settings downloaded");
                        SettingsOutcome::Downloaded
                    }
                    Err(e) => SettingsOutcome::Failed(e.reason()),
                }
            }
        };
        debug!(outcome = ?outcome, "Settings sync finished");
        (outcome, conflict)
    }

    async fn local_state(&self) -> Result<StateMap, String> {
        let path = self.transfers.local_path(self.relative_path);
        let mut map = StateMap::new();
        if !self.fs.exists(&path).await.map_err(|e| e.to_string())? {
            return Ok(map);
        }
        let metadata = self.fs.metadata(&path).await.map_err(|e| e.to_string())?;
        if let Some(modified_at) = metadata.modified_at {
            map.insert(
                self.relative_path.to_string(),
                FileState::new(self.relative_path, modified_at, metadata.size),
            );
        }
        Ok(map)
    }

    async fn remote_state(&self) -> Result<StateMap, StorageError> {
        let mut map = StateMap::new();
        let metadata = self
            .transfers
            .retry
            .execute("settings_metadata", || {
                self.adapter.get_metadata(self.relative_path)
            })
            .await?;
        match metadata {
            Some(meta) if !meta.is_folder && !meta.is_deleted => {
                map.insert(
                    self.relative_path.to_string(),
                    FileState::new(self.relative_path, meta.modified_at, meta.size),
                );
            }
            _ => {}
        }
        Ok(map)
    }
}
