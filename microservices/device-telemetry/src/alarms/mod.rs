//! Alarm storage operations and delete-by-rule orchestration

mod delete;

pub use delete::DeleteJobHandle;

use std::sync::Arc;

use chrono::Utc;
use telemetry_docdb::{Document, QueryOptions, SqlQuerySpec, StorageClient};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::AlarmsConfig;
use crate::error::{AlarmsError, Result};
use crate::query::{by_id_query, validate_identifier, CountQuery, DocumentsQuery};
use crate::types::*;

use delete::{persist_status, DeleteJob};

/// Page size used when a listing does not specify one.
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AlarmsService {
    storage: Arc<dyn StorageClient>,
    config: Arc<AlarmsConfig>,
    shutdown: CancellationToken,
    jobs: TaskTracker,
}

impl AlarmsService {
    /// Fails with `InvalidConfig` when `config` does not pass `validate`.
    pub fn new(storage: Arc<dyn StorageClient>, config: AlarmsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
            jobs: TaskTracker::new(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Alarm> {
        let doc = self
            .get_document_by_id(id)
            .await?
            .ok_or_else(|| AlarmsError::ResourceNotFound(format!("alarm {}", id)))?;
        Ok(Alarm::from(&doc))
    }

    #[instrument(skip(self, filter))]
    pub async fn list(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>> {
        self.list_documents(None, filter).await
    }

    #[instrument(skip(self, filter))]
    pub async fn list_by_rule(&self, rule_id: &str, filter: &AlarmFilter) -> Result<Vec<Alarm>> {
        validate_identifier(rule_id)?;
        self.list_documents(Some(rule_id), filter).await
    }

    /// Open and acknowledged alarms raised by `rule_id`.
    #[instrument(skip(self, filter))]
    pub async fn get_count_by_rule(&self, rule_id: &str, filter: &AlarmFilter) -> Result<u64> {
        let query = CountQuery {
            schema_name: ALARM_SCHEMA_KEY,
            by_id: Some(rule_id),
            by_id_property: Some(RULE_ID_KEY),
            from: filter.from,
            from_property: MESSAGE_RECEIVED_KEY,
            to: filter.to,
            to_property: MESSAGE_RECEIVED_KEY,
            devices: &filter.devices,
            devices_property: DEVICE_ID_KEY,
            filter_values: &ACTIVE_ALARM_STATUSES,
            filter_property: STATUS_KEY,
        }
        .build()?;

        debug!(query = %query.query, "Counting alarms");
        let count = self
            .storage
            .query_count(
                &self.config.database,
                &self.config.collection,
                &QueryOptions::cross_partition(),
                &query,
            )
            .await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn update(&self, id: &str, status: AlarmStatus) -> Result<Alarm> {
        let mut doc = self
            .get_document_by_id(id)
            .await?
            .ok_or_else(|| AlarmsError::ResourceNotFound(format!("alarm {}", id)))?;

        doc.set(STATUS_KEY, status.as_str());
        doc.set(MODIFIED_KEY, Utc::now().timestamp_millis());

        let saved = self
            .storage
            .upsert_document(&self.config.database, &self.config.collection, &doc)
            .await?;

        info!(alarm_id = %id, status = %status, "Alarm status updated");
        Ok(Alarm::from(&saved))
    }

    /// Record a `Started` status for `operation_id` and launch the deletion
    /// in the background. Returns as soon as the job is spawned.
    pub async fn start_delete_by_rule(
        &self,
        rule_id: &str,
        filter: AlarmFilter,
        operation_id: Uuid,
    ) -> Result<DeleteJobHandle> {
        validate_identifier(rule_id)?;
        let query = self.documents_query(Some(rule_id), &filter, filter.limit)?;
        let operation_id = operation_id.to_string();

        persist_status(
            self.storage.as_ref(),
            &self.config,
            &DeleteStatus::started(&operation_id),
        )
        .await;

        let cancel = self.shutdown.child_token();
        let job = DeleteJob {
            storage: self.storage.clone(),
            config: self.config.clone(),
            operation_id: operation_id.clone(),
            query,
            skip: filter.skip,
            limit: filter.limit,
            cancel: cancel.clone(),
        };

        let span = tracing::info_span!(
            "delete_by_rule",
            operation_id = %operation_id,
            rule_id = %rule_id
        );
        span.in_scope(|| info!("Delete by rule started"));
        let task = self.jobs.spawn(job.run().instrument(span));

        Ok(DeleteJobHandle::new(operation_id, cancel, task))
    }

    /// Stored progress for `operation_id`, or `Unknown` when there is no
    /// record or a running record has gone stale.
    #[instrument(skip(self))]
    pub async fn get_delete_by_rule_status(&self, operation_id: &str) -> Result<DeleteStatus> {
        let Some(doc) = self.get_document_by_id(operation_id).await? else {
            return Ok(DeleteStatus::unknown(operation_id));
        };

        let status = DeleteStatus::from_document(&doc)?;
        if status.is_stale(Utc::now(), self.config.stale_after()) {
            debug!(state = ?status.status, "Delete status is stale");
            return Ok(DeleteStatus::unknown(operation_id));
        }
        Ok(status)
    }

    /// Cancel every running delete job and wait, up to the configured
    /// shutdown timeout, for each to record its final status. Returns
    /// `false` when jobs were still running at the deadline.
    pub async fn shutdown(&self) -> bool {
        self.shutdown.cancel();
        self.jobs.close();

        let running = self.jobs.len();
        if running > 0 {
            info!(running, "Waiting for delete jobs to finish");
        }

        match tokio::time::timeout(self.config.shutdown_timeout, self.jobs.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    running = self.jobs.len(),
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Delete jobs still running at shutdown deadline"
                );
                false
            }
        }
    }

    async fn list_documents(&self, rule_id: Option<&str>, filter: &AlarmFilter) -> Result<Vec<Alarm>> {
        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let query = self.documents_query(rule_id, filter, Some(limit))?;

        debug!(query = %query.query, "Listing alarms");
        let docs = self
            .storage
            .query_documents(
                &self.config.database,
                &self.config.collection,
                &QueryOptions::cross_partition(),
                &query,
                filter.skip,
                Some(limit),
            )
            .await?;

        Ok(docs.iter().map(Alarm::from).collect())
    }

    fn documents_query(
        &self,
        rule_id: Option<&str>,
        filter: &AlarmFilter,
        limit: Option<usize>,
    ) -> Result<SqlQuerySpec> {
        DocumentsQuery {
            schema_name: ALARM_SCHEMA_KEY,
            by_id: rule_id,
            by_id_property: rule_id.map(|_| RULE_ID_KEY),
            from: filter.from,
            from_property: MESSAGE_RECEIVED_KEY,
            to: filter.to,
            to_property: MESSAGE_RECEIVED_KEY,
            order: filter.order.as_deref(),
            order_property: MESSAGE_RECEIVED_KEY,
            skip: filter.skip,
            limit,
            devices: &filter.devices,
            devices_property: DEVICE_ID_KEY,
        }
        .build()
    }

    async fn get_document_by_id(&self, id: &str) -> Result<Option<Document>> {
        let query = by_id_query(id)?;
        let docs = self
            .storage
            .query_documents(
                &self.config.database,
                &self.config.collection,
                &QueryOptions::default(),
                &query,
                0,
                Some(1),
            )
            .await?;
        Ok(docs.into_iter().next())
    }
}
