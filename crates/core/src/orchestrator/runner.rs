//! Order orchestrator implementation.
//!
//! Drives orders through their lifecycle:
//! - Preview: resolve and quote items, persist pending tasks (no charge)
//! - Commit: charge each task once, then place the vendor order detached
//! - Poll: bounded status polling until ready, then resolve the link

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::batch::{BatchStats, MAX_BATCH_SIZE};
use crate::ledger::LedgerError;
use crate::metrics;
use crate::order::{NewTask, StoreError, Task, TaskFilter, TaskStatus, TaskUpdate};
use crate::pricing::PricingCache;
use crate::resolver;
use crate::store::{ChargeError, ChargeOutcome, OrderStore};
use crate::vendor::{
    DownloadLink, ResponseType, StockSite, VendorError, VendorGateway, VendorState,
    MAX_COST_POINTS,
};

use super::config::OrchestratorConfig;
use super::types::{
    BatchStatusResponse, CommitFailure, CommitRequest, CommitResponse, ErrorKind, ItemError,
    OrchestratorError, OrchestratorStatus, PreviewItem, PreviewItemResult, PreviewRequest,
    PreviewResponse, RedownloadResponse,
};

/// Tasks listed per page while recovering after a restart.
const RECOVERY_PAGE_SIZE: i64 = 500;

/// Handles shared with detached commit and poll tasks.
#[derive(Clone)]
struct Shared {
    config: OrchestratorConfig,
    store: Arc<dyn OrderStore>,
    vendor: Arc<dyn VendorGateway>,
    active_polls: Arc<RwLock<HashSet<String>>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// The order orchestrator.
pub struct OrderOrchestrator {
    shared: Shared,
    pricing: Arc<PricingCache>,
    running: Arc<AtomicBool>,
}

impl OrderOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn OrderStore>,
        vendor: Arc<dyn VendorGateway>,
        pricing: Arc<PricingCache>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shared: Shared {
                config,
                store,
                vendor,
                active_polls: Arc::new(RwLock::new(HashSet::new())),
                shutdown_tx,
            },
            pricing,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the orchestrator and recover in-flight orders.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting order orchestrator");

        if self.shared.config.recover_on_start {
            self.recover_in_flight_tasks().await;
        }

        info!("Order orchestrator started");
    }

    /// Stop the orchestrator. Background pollers exit at their next wait.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping order orchestrator");
        let _ = self.shared.shutdown_tx.send(());
        info!("Order orchestrator stopped");
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            running: self.running.load(Ordering::Relaxed),
            active_polls: self.shared.active_polls.read().await.len(),
        }
    }

    /// Site catalog, through the pricing cache.
    pub async fn list_sites(&self) -> Result<Vec<StockSite>, OrchestratorError> {
        Ok(self.pricing.get_sites().await?)
    }

    /// Task owned by `user_id`.
    pub fn get_task(&self, task_id: &str, user_id: &str) -> Result<Task, OrchestratorError> {
        self.shared
            .store
            .get_task(task_id)?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("task not found: {}", task_id)))
    }

    // =========================================================================
    // Preview
    // =========================================================================

    /// Resolve and quote up to five items. Never touches the balance.
    pub async fn preview_order(
        &self,
        request: PreviewRequest,
    ) -> Result<PreviewResponse, OrchestratorError> {
        validate_item_count(request.items.len(), "items")?;

        // The catalog is advisory: without it, unknown sites go straight to
        // the quote.
        let catalog = match self.pricing.get_sites().await {
            Ok(sites) => Some(sites),
            Err(e) => {
                warn!("Site catalog unavailable, skipping availability check: {}", e);
                None
            }
        };

        let results = join_all(request.items.into_iter().map(|item| {
            self.preview_one(
                &request.user_id,
                item,
                request.response_type,
                catalog.as_deref(),
            )
        }))
        .await;

        let total_cost = results
            .iter()
            .filter_map(|r| r.task.as_ref())
            .filter(|t| t.status == TaskStatus::Pending)
            .filter_map(|t| t.cost_points)
            .sum();

        let balance = self.shared.store.get_balance(&request.user_id)?;

        Ok(PreviewResponse {
            results,
            balance,
            total_cost,
        })
    }

    async fn preview_one(
        &self,
        user_id: &str,
        item: PreviewItem,
        response_type: ResponseType,
        catalog: Option<&[StockSite]>,
    ) -> PreviewItemResult {
        let result = self
            .preview_item(user_id, &item, response_type, catalog)
            .await;

        let (task, error) = match result {
            Ok((task, error)) => (Some(task), error),
            Err(error) => (None, Some(error)),
        };

        let label = if error.is_none() { "priced" } else { "failed" };
        metrics::PREVIEW_ITEMS.with_label_values(&[label]).inc();

        PreviewItemResult {
            input: item,
            task,
            error,
        }
    }

    async fn preview_item(
        &self,
        user_id: &str,
        item: &PreviewItem,
        response_type: ResponseType,
        catalog: Option<&[StockSite]>,
    ) -> Result<(Task, Option<ItemError>), ItemError> {
        let asset = resolver::resolve_item(
            item.url.as_deref(),
            item.site.as_deref(),
            item.id.as_deref(),
        )
        .ok_or_else(|| {
            ItemError::new(
                ErrorKind::ResolutionFailure,
                "could not identify the stock site and asset id, please provide them explicitly",
            )
        })?;

        if let Some(site) = catalog.and_then(|c| c.iter().find(|s| s.site == asset.site)) {
            if !site.active {
                return Err(ItemError::new(
                    ErrorKind::VendorRejected,
                    format!("{} is currently unavailable", site.display_name),
                ));
            }
        }

        let info = self
            .pricing
            .quote(&asset.site, &asset.asset_id, asset.source_url.as_deref())
            .await
            .map_err(|e| ItemError::from_vendor(&e))?;

        let (status, item_error) = match (info.state, info.cost_points) {
            (VendorState::Failed, _) => {
                let message = info
                    .message
                    .clone()
                    .unwrap_or_else(|| "asset is not available for ordering".to_string());
                (
                    TaskStatus::Error,
                    Some(ItemError::new(ErrorKind::VendorRejected, message)),
                )
            }
            (_, None) => {
                return Err(ItemError::new(
                    ErrorKind::VendorRejected,
                    "vendor returned no price for this asset",
                ))
            }
            (_, Some(cost)) if cost > MAX_COST_POINTS => {
                return Err(ItemError::new(
                    ErrorKind::VendorRejected,
                    format!("vendor price of {} points is out of range", cost),
                ))
            }
            _ => (TaskStatus::Pending, None),
        };

        let task = self
            .shared
            .store
            .create_task(NewTask {
                user_id: user_id.to_string(),
                site: asset.site,
                asset_id: asset.asset_id,
                source_url: asset.source_url,
                status,
                cost_points: info.cost_points,
                cost_amount: info.cost_amount,
                currency: info.currency,
                title: info.title,
                preview_url: info.preview_url,
                latest_message: item_error.as_ref().map(|e| e.message.clone()),
                response_type,
            })
            .map_err(|e| ItemError::new(ErrorKind::Internal, e.to_string()))?;

        debug!(
            "Previewed {}:{} as task {} ({:?} points)",
            task.site, task.asset_id, task.id, task.cost_points
        );

        Ok((task, item_error))
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Charge and place up to five previewed tasks. Each task succeeds or
    /// fails on its own; failures never roll back siblings.
    pub async fn commit_order(
        &self,
        request: CommitRequest,
    ) -> Result<CommitResponse, OrchestratorError> {
        let mut seen = HashSet::new();
        let task_ids: Vec<String> = request
            .task_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        validate_item_count(task_ids.len(), "task_ids")?;

        let batch_id = uuid::Uuid::new_v4().to_string();
        let user_id = request.user_id;
        let response_type = request.response_type;

        let outcomes = join_all(task_ids.iter().map(|task_id| {
            Self::commit_one(
                self.shared.clone(),
                task_id.clone(),
                user_id.clone(),
                batch_id.clone(),
                response_type,
            )
        }))
        .await;

        let mut tasks = Vec::new();
        let mut failures = Vec::new();
        for (task_id, outcome) in task_ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(task) => tasks.push(task),
                Err(error) => failures.push(CommitFailure { task_id, error }),
            }
        }

        let batch_id = self
            .shared
            .store
            .get_batch(&batch_id)?
            .map(|b| b.id);
        let balance = self.shared.store.get_balance(&user_id)?;

        info!(
            "Commit for {}: {} placed, {} failed",
            user_id,
            tasks.len(),
            failures.len()
        );

        Ok(CommitResponse {
            tasks,
            failures,
            balance,
            batch_id,
        })
    }

    async fn commit_one(
        shared: Shared,
        task_id: String,
        user_id: String,
        batch_id: String,
        response_type: Option<ResponseType>,
    ) -> Result<Task, ItemError> {
        let task = match shared.store.charge_task(&task_id, &user_id, &batch_id) {
            Ok(ChargeOutcome::Charged { task, .. }) => task,
            Ok(ChargeOutcome::AlreadyCharged(task)) => {
                metrics::ORDERS_COMMITTED
                    .with_label_values(&["duplicate"])
                    .inc();
                return Ok(task);
            }
            Err(e) => {
                let label = match e {
                    ChargeError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                        "insufficient_balance"
                    }
                    _ => "error",
                };
                metrics::ORDERS_COMMITTED.with_label_values(&[label]).inc();
                debug!("Task {} not charged: {}", task_id, e);
                return Err(ItemError::from(&e));
            }
        };

        // Points are spent: from here on the outcome must be persisted even
        // if the caller goes away, so the vendor call runs detached.
        let handle = tokio::spawn(Self::place_order(shared, task, response_type));
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Order placement task for {} panicked: {}", task_id, e);
                Err(ItemError::new(ErrorKind::Internal, "order placement failed"))
            }
        }
    }

    async fn place_order(
        shared: Shared,
        task: Task,
        response_type: Option<ResponseType>,
    ) -> Result<Task, ItemError> {
        let placed = shared
            .vendor
            .create_order(&task.site, &task.asset_id, task.source_url.as_deref())
            .await
            .and_then(|placed| match placed.state {
                VendorState::Failed => Err(VendorError::Rejected {
                    status: None,
                    message: placed
                        .message
                        .unwrap_or_else(|| "vendor refused the order".to_string()),
                }),
                _ => Ok(placed),
            });

        let placed = match placed {
            Ok(placed) => placed,
            Err(e) => {
                warn!("Vendor refused order for task {}: {}", task.id, e);
                metrics::ORDERS_COMMITTED
                    .with_label_values(&["vendor_rejected"])
                    .inc();
                Self::fail_task(&shared, &task, &e.to_string(), true);
                return Err(ItemError::from_vendor(&e));
            }
        };

        let mut update = TaskUpdate::new()
            .with_external_task_id(placed.external_task_id.clone())
            .with_message_opt(placed.message);
        if let Some(rt) = response_type {
            update = update.with_response_type(rt);
        }
        if let Some(url) = placed.download_url {
            update.status = Some(TaskStatus::Completed);
            update = update.with_download(url, None);
        }

        let task = shared.store.update_task(&task.id, update).map_err(|e| {
            error!(
                "Failed to persist vendor task {} for {}: {}",
                placed.external_task_id, task.id, e
            );
            ItemError::new(ErrorKind::Internal, e.to_string())
        })?;

        metrics::ORDERS_COMMITTED.with_label_values(&["placed"]).inc();
        info!(
            "Placed order for task {} (vendor task {})",
            task.id, placed.external_task_id
        );

        if task.status == TaskStatus::Completed {
            metrics::TASKS_COMPLETED.inc();
        } else if shared.config.background_polling {
            Self::spawn_poller(&shared, task.id.clone()).await;
        }

        Ok(task)
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Poll a task in the foreground until it reaches a terminal status.
    ///
    /// A task has at most one poller. The poll runs detached so the
    /// registration is released even if the caller goes away.
    pub async fn poll_order(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        if !self
            .shared
            .active_polls
            .write()
            .await
            .insert(task_id.to_string())
        {
            return Err(OrchestratorError::InvalidState(format!(
                "task {} is already being polled",
                task_id
            )));
        }

        let shared = self.shared.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let result = Self::poll_until_done(&shared, &task_id, None).await;
            shared.active_polls.write().await.remove(&task_id);
            result
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("poll task failed: {}", e)))?
    }

    async fn spawn_poller(shared: &Shared, task_id: String) {
        if !shared.active_polls.write().await.insert(task_id.clone()) {
            debug!("Task {} already has a poller", task_id);
            return;
        }

        let shared = shared.clone();
        let shutdown_rx = shared.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = Self::poll_until_done(&shared, &task_id, Some(shutdown_rx)).await {
                warn!("Polling task {} failed: {}", task_id, e);
            }
            shared.active_polls.write().await.remove(&task_id);
        });
    }

    async fn poll_until_done(
        shared: &Shared,
        task_id: &str,
        mut shutdown_rx: Option<broadcast::Receiver<()>>,
    ) -> Result<Task, OrchestratorError> {
        let interval = Duration::from_millis(shared.config.poll_interval_ms);

        loop {
            let task = shared
                .store
                .get_task(task_id)?
                .ok_or_else(|| OrchestratorError::NotFound(format!("task not found: {}", task_id)))?;

            match task.status {
                s if s.is_terminal() => return Ok(task),
                TaskStatus::Ready | TaskStatus::Downloading => {
                    return Ok(Self::finish_download(shared, task, None).await);
                }
                TaskStatus::Pending => {
                    return Err(OrchestratorError::InvalidState(format!(
                        "task {} has not been committed",
                        task_id
                    )));
                }
                _ => {}
            }

            let Some(external_id) = task.external_task_id.clone() else {
                return Err(OrchestratorError::InvalidState(format!(
                    "task {} has no vendor task id",
                    task_id
                )));
            };

            if task.retry_count >= shared.config.max_poll_attempts {
                warn!(
                    "Task {} timed out after {} polls",
                    task_id, task.retry_count
                );
                metrics::POLL_OUTCOMES.with_label_values(&["timeout"]).inc();
                let task = shared.store.update_task(
                    task_id,
                    TaskUpdate::status(TaskStatus::Timeout).with_message(format!(
                        "vendor did not finish after {} status checks",
                        task.retry_count
                    )),
                )?;
                return Ok(task);
            }

            match shutdown_rx.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = rx.recv() => {
                            debug!("Poller for task {} received shutdown signal", task_id);
                            return Ok(task);
                        }
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                None => tokio::time::sleep(interval).await,
            }

            let Some(task) = shared
                .store
                .increment_retry_count(task_id, shared.config.max_poll_attempts)?
            else {
                // Bound reached; the next pass times the task out.
                continue;
            };

            match shared.vendor.get_order_status(&external_id).await {
                Ok(report) => match report.state {
                    VendorState::Ready => {
                        metrics::POLL_OUTCOMES.with_label_values(&["ready"]).inc();
                        let task = shared.store.update_task(
                            task_id,
                            TaskUpdate::status(TaskStatus::Ready).with_message_opt(report.message),
                        )?;
                        return Ok(Self::finish_download(shared, task, report.download_url).await);
                    }
                    VendorState::Failed => {
                        metrics::POLL_OUTCOMES.with_label_values(&["error"]).inc();
                        let message = report
                            .message
                            .unwrap_or_else(|| "vendor reported the order as failed".to_string());
                        warn!("Vendor failed task {}: {}", task_id, message);
                        return Ok(Self::fail_task(
                            shared,
                            &task,
                            &message,
                            shared.config.refund_on_vendor_error,
                        ));
                    }
                    VendorState::Processing => {
                        if let Some(message) = report.message {
                            shared
                                .store
                                .update_task(task_id, TaskUpdate::new().with_message(message))?;
                        }
                        debug!(
                            "Task {} still processing (attempt {}, progress {:?})",
                            task_id, task.retry_count, report.progress
                        );
                    }
                },
                Err(e @ VendorError::Rejected { .. }) => {
                    metrics::POLL_OUTCOMES.with_label_values(&["error"]).inc();
                    warn!("Vendor rejected status check for task {}: {}", task_id, e);
                    return Ok(Self::fail_task(
                        shared,
                        &task,
                        &e.to_string(),
                        shared.config.refund_on_vendor_error,
                    ));
                }
                Err(e) => {
                    // Consumes an attempt; the bound still applies.
                    warn!(
                        "Status check for task {} failed (attempt {}): {}",
                        task_id, task.retry_count, e
                    );
                }
            }
        }
    }

    /// Move a ready task through `downloading` to `completed`. A failed link
    /// resolution leaves the task in `error`, still eligible for redownload.
    async fn finish_download(shared: &Shared, task: Task, known_url: Option<String>) -> Task {
        let task = if task.status == TaskStatus::Ready {
            match shared
                .store
                .update_task(&task.id, TaskUpdate::status(TaskStatus::Downloading))
            {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to mark task {} downloading: {}", task.id, e);
                    return task;
                }
            }
        } else {
            task
        };

        let link = match (known_url, task.external_task_id.as_deref()) {
            (Some(url), _) => Ok(DownloadLink {
                download_url: url,
                file_name: None,
            }),
            (None, Some(external_id)) => {
                shared
                    .vendor
                    .resolve_download(external_id, task.response_type)
                    .await
            }
            (None, None) => Err(VendorError::InvalidResponse(
                "task has no vendor task id".to_string(),
            )),
        };

        let update = match link {
            Ok(link) => TaskUpdate::status(TaskStatus::Completed)
                .with_download(link.download_url, link.file_name),
            Err(e) => {
                warn!("Could not resolve download for task {}: {}", task.id, e);
                TaskUpdate::status(TaskStatus::Error)
                    .with_message(format!("download link unavailable: {}", e))
            }
        };

        match shared.store.update_task(&task.id, update) {
            Ok(t) => {
                if t.status == TaskStatus::Completed {
                    metrics::TASKS_COMPLETED.inc();
                    info!("Task {} completed", t.id);
                }
                t
            }
            Err(e) => {
                error!("Failed to finish task {}: {}", task.id, e);
                task
            }
        }
    }

    /// Move a task to `error`, optionally reversing its charge.
    fn fail_task(shared: &Shared, task: &Task, message: &str, refund: bool) -> Task {
        let failed = match shared.store.update_task(
            &task.id,
            TaskUpdate::status(TaskStatus::Error).with_message(message),
        ) {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to mark task {} as error: {}", task.id, e);
                task.clone()
            }
        };

        if refund {
            if let Err(e) = shared
                .store
                .refund(&task.user_id, &task.id, &format!("refund: {}", message))
            {
                error!("Failed to refund task {}: {}", task.id, e);
            }
        }

        failed
    }

    // =========================================================================
    // Batches, redownload, recovery
    // =========================================================================

    /// Current batch status with its tasks.
    pub fn get_batch_status(&self, batch_id: &str) -> Result<BatchStatusResponse, OrchestratorError> {
        let batch = self
            .shared
            .store
            .get_batch(batch_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("batch not found: {}", batch_id)))?;

        let tasks = self.shared.store.list_tasks(
            &TaskFilter::new()
                .with_batch(batch_id)
                .with_limit(MAX_BATCH_SIZE as i64),
        )?;

        Ok(BatchStatusResponse {
            batch,
            stats: BatchStats::from_tasks(&tasks),
            tasks,
        })
    }

    /// Resolve a fresh download link for a finished task. Never charges.
    pub async fn redownload(
        &self,
        task_id: &str,
        user_id: &str,
        response_type: Option<ResponseType>,
    ) -> Result<RedownloadResponse, OrchestratorError> {
        let task = self.get_task(task_id, user_id)?;
        if !task.can_redownload() {
            return Err(OrchestratorError::InvalidState(format!(
                "task {} is {} and cannot be downloaded again",
                task.id, task.status
            )));
        }

        let response_type = response_type.unwrap_or(task.response_type);
        let external_id = task.external_task_id.as_deref().unwrap_or_default();
        let download = self
            .shared
            .vendor
            .resolve_download(external_id, response_type)
            .await?;

        let task = self.shared.store.update_task(
            &task.id,
            TaskUpdate::new()
                .with_download(download.download_url.clone(), download.file_name.clone())
                .with_response_type(response_type),
        )?;

        info!("Redownload link issued for task {}", task.id);
        Ok(RedownloadResponse { download, task })
    }

    /// Re-attach pollers after a restart.
    async fn recover_in_flight_tasks(&self) {
        let shared = &self.shared;

        // Listed in full before acting, since recovery moves tasks out of
        // these statuses and would shift later pages.
        let mut in_flight = Vec::new();
        for status in [
            TaskStatus::Processing,
            TaskStatus::Ready,
            TaskStatus::Downloading,
        ] {
            match list_all_with_status(shared.store.as_ref(), status, RECOVERY_PAGE_SIZE) {
                Ok(tasks) => in_flight.extend(tasks),
                Err(e) => error!("Failed to list {} tasks for recovery: {}", status, e),
            }
        }

        for task in in_flight {
            if task.external_task_id.is_none() {
                // Charged, but the vendor call never reported back.
                warn!(
                    "Task {} has no vendor task id after restart, flagging for review",
                    task.id
                );
                Self::fail_task(
                    shared,
                    &task,
                    "vendor outcome unknown after restart, charge kept for manual review",
                    false,
                );
                continue;
            }

            info!("Recovering {} task {}", task.status, task.id);
            Self::spawn_poller(shared, task.id).await;
        }
    }
}

/// Every task in `status`, fetched `page_size` rows at a time.
fn list_all_with_status(
    store: &dyn OrderStore,
    status: TaskStatus,
    page_size: i64,
) -> Result<Vec<Task>, StoreError> {
    let mut tasks = Vec::new();
    loop {
        let page = store.list_tasks(
            &TaskFilter::new()
                .with_status(status)
                .with_limit(page_size)
                .with_offset(tasks.len() as i64),
        )?;
        let last = (page.len() as i64) < page_size;
        tasks.extend(page);
        if last {
            return Ok(tasks);
        }
    }
}

fn validate_item_count(count: usize, field: &str) -> Result<(), OrchestratorError> {
    if count == 0 {
        return Err(OrchestratorError::InvalidRequest(format!(
            "{} must not be empty",
            field
        )));
    }
    if count > MAX_BATCH_SIZE {
        return Err(OrchestratorError::InvalidRequest(format!(
            "at most {} {} per request, got {}",
            MAX_BATCH_SIZE, field, count
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchStore;
    use crate::ledger::{BalanceLedger, LedgerEntryKind};
    use crate::order::TaskStore;
    use crate::pricing::PricingConfig;
    use crate::store::SqliteStore;
    use crate::testing::{fixtures, MockVendor};

    struct Harness {
        orchestrator: OrderOrchestrator,
        store: Arc<SqliteStore>,
        vendor: Arc<MockVendor>,
    }

    fn harness(config: OrchestratorConfig) -> Harness {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let vendor = Arc::new(MockVendor::new());
        let pricing = Arc::new(PricingCache::new(vendor.clone(), &PricingConfig::default()));
        let orchestrator = OrderOrchestrator::new(config, store.clone(), vendor.clone(), pricing);
        Harness {
            orchestrator,
            store,
            vendor,
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            background_polling: false,
            poll_interval_ms: 1,
            max_poll_attempts: 5,
            refund_on_vendor_error: true,
            recover_on_start: true,
        }
    }

    async fn preview_one(h: &Harness, user: &str, item: PreviewItem) -> PreviewItemResult {
        let response = h
            .orchestrator
            .preview_order(PreviewRequest {
                user_id: user.to_string(),
                items: vec![item],
                response_type: ResponseType::Any,
            })
            .await
            .unwrap();
        response.results.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_preview_rejects_empty_and_oversized() {
        let h = harness(fast_config());
        let err = h
            .orchestrator
            .preview_order(PreviewRequest {
                user_id: "alice".into(),
                items: vec![],
                response_type: ResponseType::Any,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = h
            .orchestrator
            .preview_order(PreviewRequest {
                user_id: "alice".into(),
                items: vec![PreviewItem::site_and_id("shutterstock", "1"); 6],
                response_type: ResponseType::Any,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_preview_unresolvable_item_creates_no_task() {
        let h = harness(fast_config());
        let result = preview_one(&h, "alice", PreviewItem::url("https://example.com/x")).await;
        assert!(result.task.is_none());
        assert_eq!(result.error.unwrap().kind, ErrorKind::ResolutionFailure);
        assert_eq!(h.vendor.call_count("get_asset_info").await, 0);
    }

    #[tokio::test]
    async fn test_preview_inactive_site_is_rejected() {
        let h = harness(fast_config());
        h.vendor
            .set_sites(vec![fixtures::stock_site("freepik", false)])
            .await;
        let result = preview_one(&h, "alice", PreviewItem::site_and_id("freepik", "1")).await;
        assert!(result.task.is_none());
        assert_eq!(result.error.unwrap().kind, ErrorKind::VendorRejected);
    }

    #[tokio::test]
    async fn test_preview_unavailable_asset_stores_error_task() {
        let h = harness(fast_config());
        let mut info = fixtures::asset_info("adobestock", "9", 2);
        info.state = VendorState::Failed;
        info.message = Some("removed by contributor".into());
        h.vendor.set_asset("adobestock", "9", info).await;

        let result = preview_one(&h, "alice", PreviewItem::site_and_id("adobestock", "9")).await;
        let task = result.task.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::VendorRejected);
        assert_eq!(error.message, "removed by contributor");
    }

    #[tokio::test]
    async fn test_preview_rejects_price_beyond_ledger_range() {
        let h = harness(fast_config());
        h.store.credit("alice", 5, "top-up").unwrap();
        let mut info = fixtures::asset_info("shutterstock", "8", 1);
        info.cost_points = Some(u64::MAX);
        h.vendor.set_asset("shutterstock", "8", info).await;

        let response = h
            .orchestrator
            .preview_order(PreviewRequest {
                user_id: "alice".into(),
                items: vec![PreviewItem::site_and_id("shutterstock", "8")],
                response_type: ResponseType::Any,
            })
            .await
            .unwrap();
        let result = &response.results[0];
        assert!(result.task.is_none());
        assert_eq!(
            result.error.as_ref().unwrap().kind,
            ErrorKind::VendorRejected
        );
        assert_eq!(response.total_cost, 0);
        assert!(h.store.list_tasks(&TaskFilter::new()).unwrap().is_empty());
        assert_eq!(h.store.get_balance("alice").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_preview_does_not_touch_balance() {
        let h = harness(fast_config());
        h.store.credit("alice", 10, "top-up").unwrap();
        h.vendor
            .set_asset("shutterstock", "5", fixtures::asset_info("shutterstock", "5", 4))
            .await;

        let response = h
            .orchestrator
            .preview_order(PreviewRequest {
                user_id: "alice".into(),
                items: vec![PreviewItem::site_and_id("shutterstock", "5")],
                response_type: ResponseType::Any,
            })
            .await
            .unwrap();
        assert_eq!(response.balance, 10);
        assert_eq!(response.total_cost, 4);
        assert_eq!(h.store.get_balance("alice").unwrap(), 10);
        assert_eq!(h.store.history("alice", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_insufficient_balance_keeps_task_pending() {
        let h = harness(fast_config());
        h.store.credit("alice", 1, "top-up").unwrap();
        h.vendor
            .set_asset("shutterstock", "5", fixtures::asset_info("shutterstock", "5", 4))
            .await;
        let task = preview_one(&h, "alice", PreviewItem::site_and_id("shutterstock", "5"))
            .await
            .task
            .unwrap();

        let response = h
            .orchestrator
            .commit_order(CommitRequest {
                user_id: "alice".into(),
                task_ids: vec![task.id.clone()],
                response_type: None,
            })
            .await
            .unwrap();

        assert!(response.tasks.is_empty());
        assert_eq!(response.failures.len(), 1);
        assert_eq!(response.failures[0].error.kind, ErrorKind::InsufficientBalance);
        assert!(response.batch_id.is_none());
        assert_eq!(response.balance, 1);
        assert_eq!(h.vendor.call_count("create_order").await, 0);
        assert_eq!(
            h.store.get_task(&task.id).unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_vendor_rejection_refunds_charge() {
        let h = harness(fast_config());
        h.store.credit("alice", 10, "top-up").unwrap();
        h.vendor
            .set_asset("freepik", "3", fixtures::asset_info("freepik", "3", 2))
            .await;
        h.vendor
            .fail_order(
                "freepik",
                "3",
                VendorError::Rejected {
                    status: None,
                    message: "premium only".into(),
                },
            )
            .await;
        let task = preview_one(&h, "alice", PreviewItem::site_and_id("freepik", "3"))
            .await
            .task
            .unwrap();

        let response = h
            .orchestrator
            .commit_order(CommitRequest {
                user_id: "alice".into(),
                task_ids: vec![task.id.clone()],
                response_type: None,
            })
            .await
            .unwrap();

        assert_eq!(response.failures[0].error.kind, ErrorKind::VendorRejected);
        assert_eq!(response.balance, 10);
        let task = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(h
            .store
            .find_entry(&task.id, LedgerEntryKind::Refund)
            .unwrap()
            .is_some());

        let batch = h.store.get_batch(response.batch_id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(batch.total_cost, 0);
    }

    #[tokio::test]
    async fn test_poll_to_completion() {
        let h = harness(fast_config());
        h.store.credit("alice", 10, "top-up").unwrap();
        h.vendor
            .set_asset("adobestock", "7", fixtures::asset_info("adobestock", "7", 3))
            .await;
        h.vendor
            .set_status_script(
                "adobestock",
                "7",
                vec![
                    Ok(fixtures::processing_report()),
                    Err(VendorError::Network("reset".into())),
                    Ok(fixtures::ready_report(None)),
                ],
            )
            .await;
        let task = preview_one(&h, "alice", PreviewItem::site_and_id("adobestock", "7"))
            .await
            .task
            .unwrap();
        h.orchestrator
            .commit_order(CommitRequest {
                user_id: "alice".into(),
                task_ids: vec![task.id.clone()],
                response_type: Some(ResponseType::Gdrive),
            })
            .await
            .unwrap();

        let task = h.orchestrator.poll_order(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 3);
        assert_eq!(task.response_type, ResponseType::Gdrive);
        assert_eq!(
            task.download_url.as_deref(),
            Some("https://cdn.mock.test/gdrive/vt-1")
        );
        assert_eq!(h.store.get_balance("alice").unwrap(), 7);
    }

    #[tokio::test]
    async fn test_concurrent_polls_share_one_attempt_budget() {
        let h = harness(OrchestratorConfig {
            max_poll_attempts: 3,
            ..fast_config()
        });
        h.store.credit("alice", 10, "top-up").unwrap();
        h.vendor
            .set_asset("adobestock", "7", fixtures::asset_info("adobestock", "7", 3))
            .await;
        h.vendor
            .set_status_script("adobestock", "7", vec![Ok(fixtures::processing_report())])
            .await;
        let task = preview_one(&h, "alice", PreviewItem::site_and_id("adobestock", "7"))
            .await
            .task
            .unwrap();
        h.orchestrator
            .commit_order(CommitRequest {
                user_id: "alice".into(),
                task_ids: vec![task.id.clone()],
                response_type: None,
            })
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            h.orchestrator.poll_order(&task.id),
            h.orchestrator.poll_order(&task.id)
        );

        let task = first.unwrap();
        assert_eq!(task.status, TaskStatus::Timeout);
        assert_eq!(task.retry_count, 3);
        assert_eq!(second.unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(h.vendor.call_count("get_order_status").await, 3);
        assert_eq!(h.orchestrator.status().await.active_polls, 0);

        // Terminal now; a later poll is free to run and returns at once.
        let task = h.orchestrator.poll_order(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Timeout);
        assert_eq!(h.vendor.call_count("get_order_status").await, 3);
    }

    #[tokio::test]
    async fn test_foreground_poll_refused_while_background_poller_runs() {
        let h = harness(OrchestratorConfig {
            background_polling: true,
            max_poll_attempts: 3,
            ..fast_config()
        });
        h.store.credit("alice", 10, "top-up").unwrap();
        h.vendor
            .set_asset("adobestock", "7", fixtures::asset_info("adobestock", "7", 3))
            .await;
        h.vendor
            .set_status_script("adobestock", "7", vec![Ok(fixtures::processing_report())])
            .await;
        let task = preview_one(&h, "alice", PreviewItem::site_and_id("adobestock", "7"))
            .await
            .task
            .unwrap();
        h.orchestrator
            .commit_order(CommitRequest {
                user_id: "alice".into(),
                task_ids: vec![task.id.clone()],
                response_type: None,
            })
            .await
            .unwrap();

        let err = h.orchestrator.poll_order(&task.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let mut task = h.store.get_task(&task.id).unwrap().unwrap();
        for _ in 0..200 {
            if task.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            task = h.store.get_task(&task.id).unwrap().unwrap();
        }
        assert_eq!(task.status, TaskStatus::Timeout);
        assert_eq!(task.retry_count, 3);
        assert_eq!(h.vendor.call_count("get_order_status").await, 3);
    }

    #[tokio::test]
    async fn test_poll_vendor_failure_refunds() {
        let h = harness(fast_config());
        h.store.credit("alice", 10, "top-up").unwrap();
        h.vendor
            .set_asset("adobestock", "7", fixtures::asset_info("adobestock", "7", 3))
            .await;
        h.vendor
            .set_status_script("adobestock", "7", vec![Ok(fixtures::failed_report("file missing"))])
            .await;
        let task = preview_one(&h, "alice", PreviewItem::site_and_id("adobestock", "7"))
            .await
            .task
            .unwrap();
        h.orchestrator
            .commit_order(CommitRequest {
                user_id: "alice".into(),
                task_ids: vec![task.id.clone()],
                response_type: None,
            })
            .await
            .unwrap();

        let task = h.orchestrator.poll_order(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.latest_message.as_deref(), Some("file missing"));
        assert_eq!(h.store.get_balance("alice").unwrap(), 10);
    }

    #[tokio::test]
    async fn test_download_failure_allows_redownload() {
        let h = harness(fast_config());
        h.store.credit("alice", 10, "top-up").unwrap();
        h.vendor
            .set_asset("vecteezy", "11", fixtures::asset_info("vecteezy", "11", 1))
            .await;
        h.vendor
            .set_download_error(Some(VendorError::Network("cdn down".into())))
            .await;
        let task = preview_one(&h, "alice", PreviewItem::site_and_id("vecteezy", "11"))
            .await
            .task
            .unwrap();
        h.orchestrator
            .commit_order(CommitRequest {
                user_id: "alice".into(),
                task_ids: vec![task.id.clone()],
                response_type: None,
            })
            .await
            .unwrap();

        let task = h.orchestrator.poll_order(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.ready_at.is_some());
        assert_eq!(h.store.get_balance("alice").unwrap(), 9);

        h.vendor.set_download_error(None).await;
        let response = h
            .orchestrator
            .redownload(&task.id, "alice", Some(ResponseType::Asia))
            .await
            .unwrap();
        assert_eq!(
            response.download.download_url,
            "https://cdn.mock.test/asia/vt-1"
        );
        assert_eq!(h.store.get_balance("alice").unwrap(), 9);
    }

    #[tokio::test]
    async fn test_redownload_rejects_unfinished_and_foreign_tasks() {
        let h = harness(fast_config());
        h.vendor
            .set_asset("vecteezy", "11", fixtures::asset_info("vecteezy", "11", 1))
            .await;
        let task = preview_one(&h, "alice", PreviewItem::site_and_id("vecteezy", "11"))
            .await
            .task
            .unwrap();

        let err = h
            .orchestrator
            .redownload(&task.id, "alice", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let err = h
            .orchestrator
            .redownload(&task.id, "mallory", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_recovery_flags_tasks_without_vendor_id() {
        let h = harness(fast_config());
        h.store.credit("alice", 5, "top-up").unwrap();
        let task = h
            .store
            .create_task(fixtures::new_task("alice", "shutterstock", "77", 2))
            .unwrap();
        // Charged, vendor never reached.
        h.store.charge_task(&task.id, "alice", "b-crash").unwrap();

        h.orchestrator.start().await;
        let task = h.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.latest_message.unwrap().contains("vendor outcome unknown"));
        assert_eq!(h.store.get_balance("alice").unwrap(), 3);
        h.orchestrator.stop().await;
    }

    #[test]
    fn test_in_flight_listing_walks_every_page() {
        let store = SqliteStore::in_memory().unwrap();
        for i in 0..5 {
            let mut new = fixtures::new_task("alice", "shutterstock", &i.to_string(), 1);
            new.status = TaskStatus::Processing;
            store.create_task(new).unwrap();
        }
        store
            .create_task(fixtures::new_task("alice", "shutterstock", "pending", 1))
            .unwrap();

        let tasks = list_all_with_status(&store, TaskStatus::Processing, 2).unwrap();
        assert_eq!(tasks.len(), 5);
        let ids: HashSet<_> = tasks.iter().map(|t| t.asset_id.clone()).collect();
        assert_eq!(ids.len(), 5);

        assert_eq!(
            list_all_with_status(&store, TaskStatus::Processing, 5).unwrap().len(),
            5
        );
        assert!(list_all_with_status(&store, TaskStatus::Ready, 2)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let h = harness(fast_config());
        h.orchestrator.start().await;
        h.orchestrator.start().await;
        assert!(h.orchestrator.status().await.running);
        h.orchestrator.stop().await;
        h.orchestrator.stop().await;
        assert!(!h.orchestrator.status().await.running);
    }
}
