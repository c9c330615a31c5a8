// src/core/replication/restore.rs

//! Drives the initial snapshot restore that seeds a subscription's relations
//! before ongoing change capture takes over.
//!
//! Restores run on an external snapshot executor. The coordinator submits the
//! request, walks the listed relations through `RESTORING`, waits for the
//! completion (directly, or by watching the in-progress-restores table in the
//! cluster state), classifies the shard-level outcome, and records the
//! terminal relation state before the outcome becomes observable.

use crate::core::cluster::applier::ClusterStateApplier;
use crate::core::cluster::state::RestoreProgress;
use crate::core::errors::ReplicationError;
use crate::core::remote::client::PublicationsStateResponse;
use crate::core::replication::metadata::{RelationName, RelationState};
use crate::core::replication::state_machine::SubscriptionStateMachine;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Prefix of the synthetic repository registered per subscription.
pub const REMOTE_REPOSITORY_PREFIX: &str = "_subscription_";

/// The snapshot tag restores are taken from; the publisher always exposes the
/// most recent snapshot under it.
const RESTORE_SNAPSHOT_NAME: &str = "LATEST";

const RESTORE_FAILED_REASON: &str = "Error while initial restoring the subscription relations";

pub fn remote_repository_name(subscription_name: &str) -> String {
    format!("{REMOTE_REPOSITORY_PREFIX}{subscription_name}")
}

/// Wildcard expansion applied to the index list of a restore request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicesOptions {
    pub ignore_unavailable: bool,
    pub expand_open: bool,
}

impl IndicesOptions {
    /// Expands open indices and tolerates missing ones; partitioned tables may
    /// have no partitions yet at restore time.
    pub const fn lenient_expand_open() -> Self {
        Self {
            ignore_unavailable: true,
            expand_open: true,
        }
    }
}

/// A restore submission against the subscription's synthetic repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    /// Keys the entry in the in-progress-restores table.
    pub id: String,
    pub repository: String,
    pub snapshot: String,
    pub indices: Vec<String>,
    pub templates: Vec<String>,
    pub index_options: IndicesOptions,
    #[serde(with = "humantime_serde")]
    pub master_timeout: Duration,
    pub settings: IndexMap<String, String>,
}

/// Shard-level result of a finished restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreInfo {
    pub total_shards: u32,
    pub failed_shards: u32,
}

impl RestoreInfo {
    pub fn successful_shards(&self) -> u32 {
        self.total_shards - self.failed_shards
    }
}

impl From<RestoreProgress> for RestoreInfo {
    fn from(progress: RestoreProgress) -> Self {
        Self {
            total_shards: progress.total_shards,
            failed_shards: progress.failed_shards,
        }
    }
}

/// Completion of an accepted restore. `restore_info` is absent when the
/// executor answered before the restore finished; the final result must then
/// be observed through the in-progress-restores table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreCompletionResponse {
    pub restore_info: Option<RestoreInfo>,
}

/// The external snapshot executor.
#[async_trait]
pub trait RestoreService: Send + Sync {
    /// Submits `request` on the dedicated snapshot thread. `Err` means the
    /// executor refused the submission (queue full or shut down); `Ok`
    /// carries the completion channel. An executor that completes without
    /// `RestoreInfo` has already recorded the restore in the
    /// in-progress-restores table.
    async fn submit(
        &self,
        request: RestoreRequest,
    ) -> Result<oneshot::Receiver<RestoreCompletionResponse>, ReplicationError>;
}

/// Classification of a finished restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Every shard restored.
    Synchronized,
    /// Some shards failed.
    Partial {
        failed_shards: u32,
        total_shards: u32,
    },
    /// No shard restored.
    Total,
    /// The restore entry vanished without a result: a new master dropped it.
    MasterLost,
}

impl RestoreOutcome {
    pub fn classify(restore_info: Option<RestoreInfo>) -> Self {
        match restore_info {
            None => RestoreOutcome::MasterLost,
            Some(info) if info.failed_shards == 0 => RestoreOutcome::Synchronized,
            Some(info) if info.failed_shards < info.total_shards => RestoreOutcome::Partial {
                failed_shards: info.failed_shards,
                total_shards: info.total_shards,
            },
            Some(_) => RestoreOutcome::Total,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, RestoreOutcome::Synchronized)
    }

    /// The reason recorded into the relation state, if the restore failed.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            RestoreOutcome::Synchronized => None,
            RestoreOutcome::Partial {
                failed_shards,
                total_shards,
            } => Some(format!(
                "{RESTORE_FAILED_REASON}, {failed_shards}/{total_shards} shards failed"
            )),
            RestoreOutcome::Total | RestoreOutcome::MasterLost => {
                Some(RESTORE_FAILED_REASON.to_string())
            }
        }
    }
}

/// Local schema lookups for the pre-flight collision check.
pub trait SchemaCatalog: Send + Sync {
    fn index_exists(&self, index: &str) -> bool;
    fn template_exists(&self, template: &str) -> bool;
}

/// Pre-flight check before the initial restore: every concrete index and
/// template the publisher reports must be absent locally. Partitioned tables
/// collide on the template name, which is translated back to the logical
/// relation name for the error.
pub fn verify_relations_do_not_exist(
    catalog: &dyn SchemaCatalog,
    response: &PublicationsStateResponse,
) -> Result<(), ReplicationError> {
    for index in &response.concrete_indices {
        if catalog.index_exists(index) {
            let relation = RelationName::from_index_name(index)
                .map(|relation| relation.to_string())
                .unwrap_or_else(|| index.clone());
            return Err(ReplicationError::RelationAlreadyExists(relation));
        }
    }
    for template in &response.concrete_templates {
        if catalog.template_exists(template) {
            let relation = RelationName::from_template_name(template)
                .map(|relation| relation.to_string())
                .unwrap_or_else(|| template.clone());
            return Err(ReplicationError::RelationAlreadyExists(relation));
        }
    }
    Ok(())
}

/// Drives initial snapshot restores per subscription.
#[derive(Clone)]
pub struct RestoreCoordinator {
    restore_service: Arc<dyn RestoreService>,
    state_machine: Arc<SubscriptionStateMachine>,
    applier: Arc<ClusterStateApplier>,
    master_timeout: Duration,
}

impl RestoreCoordinator {
    pub fn new(
        restore_service: Arc<dyn RestoreService>,
        state_machine: Arc<SubscriptionStateMachine>,
        applier: Arc<ClusterStateApplier>,
        master_timeout: Duration,
    ) -> Self {
        Self {
            restore_service,
            state_machine,
            applier,
            master_timeout,
        }
    }

    /// Submits the initial restore for `subscription_name`.
    ///
    /// An `Err` means the submission was refused and no relation state was
    /// touched. On acceptance the returned receiver resolves with the final
    /// outcome, strictly after the terminal relation-state update has been
    /// issued: any observer seeing the outcome also sees the updated states.
    pub async fn restore(
        &self,
        subscription_name: &str,
        restore_settings: IndexMap<String, String>,
        relation_names: Vec<RelationName>,
        indices_to_restore: Vec<String>,
        templates_to_restore: Vec<String>,
    ) -> Result<oneshot::Receiver<Result<bool, ReplicationError>>, ReplicationError> {
        let request = RestoreRequest {
            id: Uuid::new_v4().to_string(),
            repository: remote_repository_name(subscription_name),
            snapshot: RESTORE_SNAPSHOT_NAME.to_string(),
            indices: indices_to_restore,
            templates: templates_to_restore,
            index_options: IndicesOptions::lenient_expand_open(),
            master_timeout: self.master_timeout,
            settings: restore_settings,
        };
        let restore_id = request.id.clone();
        info!(
            "Submitting initial restore {} for subscription '{}' covering {} relation(s)",
            restore_id,
            subscription_name,
            relation_names.len()
        );
        let completion = self.restore_service.submit(request).await.inspect_err(|error| {
            warn!(
                "Restore submission for subscription '{}' was refused: {}",
                subscription_name, error
            );
        })?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let coordinator = self.clone();
        let name = subscription_name.to_string();
        tokio::spawn(async move {
            let outcome = coordinator
                .drive_restore(&name, &relation_names, &restore_id, completion)
                .await;
            let _ = outcome_tx.send(outcome);
        });
        Ok(outcome_rx)
    }

    async fn drive_restore(
        &self,
        name: &str,
        relations: &[RelationName],
        restore_id: &str,
        completion: oneshot::Receiver<RestoreCompletionResponse>,
    ) -> Result<bool, ReplicationError> {
        match self
            .try_drive_restore(name, relations, restore_id, completion)
            .await
        {
            Ok(succeeded) => Ok(succeeded),
            Err(error) => {
                error!(
                    "Initial restore for subscription '{}' failed: {}",
                    name, error
                );
                // The failure is recorded into the relation state; the error
                // still propagates to direct observers of the outcome.
                if let Err(update_error) = self
                    .state_machine
                    .update(name, relations, RelationState::failed(RESTORE_FAILED_REASON))
                    .await
                {
                    warn!(
                        "Failed to record the restore failure for subscription '{}': {}",
                        name, update_error
                    );
                }
                Err(error)
            }
        }
    }

    async fn try_drive_restore(
        &self,
        name: &str,
        relations: &[RelationName],
        restore_id: &str,
        completion: oneshot::Receiver<RestoreCompletionResponse>,
    ) -> Result<bool, ReplicationError> {
        self.state_machine
            .update(name, relations, RelationState::Restoring)
            .await?;

        let response = completion.await.map_err(|_| {
            ReplicationError::Internal("restore executor dropped the completion channel".to_string())
        })?;
        let restore_info = match response.restore_info {
            Some(info) => Some(info),
            None => self.await_restore_finished(restore_id).await?,
        };

        let outcome = RestoreOutcome::classify(restore_info);
        match outcome.failure_reason() {
            None => {
                self.state_machine
                    .update(name, relations, RelationState::Synchronized)
                    .await?;
                info!(
                    "Initial restore for subscription '{}' finished, {} relation(s) synchronized",
                    name,
                    relations.len()
                );
            }
            Some(reason) => {
                warn!(
                    "Initial restore for subscription '{}' failed: {}",
                    name, reason
                );
                self.state_machine
                    .update(name, relations, RelationState::failed(reason))
                    .await?;
            }
        }
        Ok(outcome.succeeded())
    }

    /// Waits until the entry for `restore_id` disappears from the
    /// in-progress-restores table, remembering the last progress observed;
    /// those are the final counts. An entry never observed means a new master
    /// dropped the restore mid-flight.
    async fn await_restore_finished(
        &self,
        restore_id: &str,
    ) -> Result<Option<RestoreInfo>, ReplicationError> {
        let mut states = self.applier.subscribe();
        let mut last_seen: Option<RestoreInfo> = None;
        loop {
            let finished = {
                let state = states.borrow_and_update();
                match state.restore_in_progress(restore_id) {
                    Some(progress) => {
                        last_seen = Some(progress.into());
                        false
                    }
                    None => true,
                }
            };
            if finished {
                return Ok(last_seen);
            }
            if states.changed().await.is_err() {
                return Err(ReplicationError::Internal(
                    "cluster state stream closed while awaiting restore completion".to_string(),
                ));
            }
        }
    }
}
