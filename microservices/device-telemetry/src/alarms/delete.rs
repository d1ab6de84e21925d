//! Background delete-by-rule job

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use telemetry_docdb::{DocDbError, Document, QueryOptions, SqlQuerySpec, StorageClient};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AlarmsConfig;
use crate::types::{DeleteState, DeleteStatus};

/// Handle to a running delete job. Dropping it leaves the job running.
#[derive(Debug)]
pub struct DeleteJobHandle {
    operation_id: String,
    cancel: CancellationToken,
    task: JoinHandle<DeleteStatus>,
}

impl DeleteJobHandle {
    pub(super) fn new(operation_id: String, cancel: CancellationToken, task: JoinHandle<DeleteStatus>) -> Self {
        Self {
            operation_id,
            cancel,
            task,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Stop after the current batch. The job still records a final status.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job and return the status it finalized with.
    pub async fn wait(self) -> Result<DeleteStatus, JoinError> {
        self.task.await
    }
}

/// Upsert a status record. Failures are logged and swallowed.
pub(super) async fn persist_status(storage: &dyn StorageClient, config: &AlarmsConfig, status: &DeleteStatus) {
    let doc = match status.to_document() {
        Ok(doc) => doc,
        Err(e) => {
            error!(operation_id = %status.id, error = %e, "Failed to serialize delete status");
            return;
        }
    };

    match storage.upsert_document(&config.database, &config.collection, &doc).await {
        Ok(_) => debug!(operation_id = %status.id, state = ?status.status, "Delete status written"),
        Err(e) => error!(
            operation_id = %status.id,
            state = ?status.status,
            error = %e,
            "Failed to write delete status"
        ),
    }
}

/// Raised once a batch can make no further progress. Logged where it happens.
struct Aborted;

pub(super) struct DeleteJob {
    pub(super) storage: Arc<dyn StorageClient>,
    pub(super) config: Arc<AlarmsConfig>,
    pub(super) operation_id: String,
    pub(super) query: SqlQuerySpec,
    pub(super) skip: usize,
    pub(super) limit: Option<usize>,
    pub(super) cancel: CancellationToken,
}

impl DeleteJob {
    pub(super) async fn run(self) -> DeleteStatus {
        let status = self.execute().await;
        self.write_status(&status).await;
        status
    }

    async fn execute(&self) -> DeleteStatus {
        let docs = match self
            .storage
            .query_documents(
                &self.config.database,
                &self.config.collection,
                &QueryOptions::cross_partition(),
                &self.query,
                self.skip,
                self.limit,
            )
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                error!(error = %e, "Failed to query alarms to delete");
                return self.finished(DeleteState::Failed, 0);
            }
        };

        if docs.is_empty() {
            info!("No alarms matched, nothing to delete");
            return self.finished(DeleteState::NothingToDelete, 0);
        }

        let total = docs.len() as u64;
        info!(total, batch_size = self.config.delete_batch_size, "Deleting alarms");
        self.write_status(&DeleteStatus::in_progress(&self.operation_id, 0, total))
            .await;

        match self.delete_in_batches(&docs).await {
            Ok(deleted) => {
                info!(deleted, "Delete by rule completed");
                self.finished(DeleteState::Success, deleted)
            }
            Err((Aborted, deleted)) => self.finished(DeleteState::Failed, deleted),
        }
    }

    async fn delete_in_batches(&self, docs: &[Document]) -> Result<u64, (Aborted, u64)> {
        let total = docs.len() as u64;
        let batch_count = docs.len().div_ceil(self.config.delete_batch_size);
        let mut deleted = 0u64;
        let mut last_progress = Instant::now();

        for (index, batch) in docs.chunks(self.config.delete_batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                warn!(deleted, remaining = total - deleted, "Delete by rule cancelled");
                return Err((Aborted, deleted));
            }

            let batch_started = Instant::now();
            self.delete_batch(index, batch)
                .await
                .map_err(|aborted| (aborted, deleted))?;
            deleted += batch.len() as u64;
            debug!(batch = index, deleted, "Batch deleted");

            if last_progress.elapsed() >= self.config.status_update_interval {
                self.write_status(&DeleteStatus::in_progress(&self.operation_id, deleted, total - deleted))
                    .await;
                last_progress = Instant::now();
            }

            if index + 1 < batch_count {
                let remaining = self.config.delete_interval.saturating_sub(batch_started.elapsed());
                if !remaining.is_zero() && !self.pause(remaining).await {
                    warn!(deleted, remaining = total - deleted, "Delete by rule cancelled");
                    return Err((Aborted, deleted));
                }
            }
        }

        Ok(deleted)
    }

    /// Delete one batch concurrently, retrying the whole batch on transient
    /// failures. Documents already gone count as deleted.
    async fn delete_batch(&self, index: usize, batch: &[Document]) -> Result<(), Aborted> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let results = join_all(batch.iter().map(|doc| {
                self.storage
                    .delete_document(&self.config.database, &self.config.collection, &doc.id)
            }))
            .await;

            let failures: Vec<DocDbError> = results
                .into_iter()
                .filter_map(Result::err)
                .filter(|e| !e.is_not_found())
                .collect();

            let Some(first) = failures.first() else {
                return Ok(());
            };

            if let Some(fatal) = failures.iter().find(|e| !e.is_transient()) {
                error!(
                    batch = index,
                    attempt,
                    failed = failures.len(),
                    error = %fatal,
                    "Unrecoverable error deleting alarms"
                );
                return Err(Aborted);
            }

            if attempt >= self.config.max_retry_count {
                error!(
                    batch = index,
                    attempts = attempt,
                    failed = failures.len(),
                    error = %first,
                    "Failed to delete batch of alarms, retries exhausted"
                );
                return Err(Aborted);
            }

            let delay = failures
                .iter()
                .filter_map(DocDbError::retry_after)
                .max()
                .unwrap_or(Duration::ZERO);

            warn!(
                batch = index,
                attempt,
                failed = failures.len(),
                retry_in_ms = delay.as_millis() as u64,
                error = %first,
                "Error deleting alarms, retrying batch"
            );

            if !self.pause(delay).await {
                warn!(batch = index, "Delete by rule cancelled during retry");
                return Err(Aborted);
            }
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn finished(&self, state: DeleteState, deleted: u64) -> DeleteStatus {
        DeleteStatus::finished(&self.operation_id, state, deleted)
    }

    async fn write_status(&self, status: &DeleteStatus) {
        persist_status(self.storage.as_ref(), &self.config, status).await;
    }
}
