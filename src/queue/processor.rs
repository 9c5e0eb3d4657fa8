//! Download-then-deploy batches

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::mods::{DeployOutcome, ModManager};
use crate::queue::{BatchState, Event, EventSender, ItemStatus};
use crate::steamcmd::{DownloadEvent, DownloadRequest, Downloader};

/// Final per-item results of a batch, in request order
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch_id: String,
    pub items: Vec<(String, ItemStatus, Option<String>)>,
}

impl BatchSummary {
    pub fn state(&self) -> BatchState {
        BatchState::from_statuses(self.items.iter().map(|(_, status, _)| status))
    }

    pub fn status_of(&self, id: &str) -> Option<ItemStatus> {
        self.items.iter().find(|(i, _, _)| i == id).map(|(_, s, _)| *s)
    }
}

/// Downloads a batch with one tool run and deploys each item as soon as
/// its download is reported complete.
pub struct BatchProcessor {
    mods: Arc<ModManager>,
    downloader: Arc<dyn Downloader>,
    events: EventSender,
}

impl BatchProcessor {
    pub fn new(mods: Arc<ModManager>, downloader: Arc<dyn Downloader>, events: EventSender) -> Self {
        Self {
            mods,
            downloader,
            events,
        }
    }

    /// Run one batch. Once `cancel` fires no further deploy starts; a deploy
    /// already underway finishes.
    pub async fn process_batch(&self, ids: Vec<String>, cancel: CancellationToken) -> BatchSummary {
        let batch_id = Uuid::new_v4().to_string();
        let game = self.mods.game();
        let request = DownloadRequest::new(
            game.profile.app_id,
            self.mods.cache_root().to_path_buf(),
            ids,
        );
        let mut tracker = ItemTracker::new(&request.ids, self.events.clone());

        if request.ids.is_empty() {
            return tracker.into_summary(batch_id);
        }
        if cancel.is_cancelled() {
            tracker.cancel_pending("cancelled before start");
            return tracker.into_summary(batch_id);
        }

        tracing::info!("Processing batch {} with {} items", batch_id, request.ids.len());
        self.events.info(format!("Downloading {} item(s)...", request.ids.len()));
        for id in &request.ids {
            tracker.set(id, ItemStatus::Downloading, None);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let downloader = Arc::clone(&self.downloader);
        let download_cancel = cancel.clone();
        let download = tokio::spawn(async move { downloader.run_batch(request, download_cancel, tx).await });

        while let Some(event) = rx.recv().await {
            match event {
                DownloadEvent::Progress { id, percent, overall } => {
                    self.events.send(Event::Progress { id, percent, overall });
                }
                DownloadEvent::ItemSucceeded(id) => {
                    tracker.set(&id, ItemStatus::Downloaded, None);
                    self.deploy_item(&id, &cancel, &mut tracker).await;
                }
                DownloadEvent::ItemFailed { id, reason } => {
                    self.events.error(format!("Download failed for {}: {}", id, reason));
                    tracker.set(&id, ItemStatus::Failed, Some(reason));
                }
                DownloadEvent::Output { line, error: true } => self.events.warn(line),
                DownloadEvent::Output { line, error: false } => {
                    tracing::debug!("steamcmd: {}", line);
                }
            }
        }

        match download.await {
            Ok(Ok(report)) => {
                // Items the tool never reported on may still have landed
                for id in report.unreported {
                    if report.cancelled || cancel.is_cancelled() {
                        tracker.set(&id, ItemStatus::Cancelled, Some("cancelled".into()));
                    } else if self.mods.is_cached(&id) {
                        self.deploy_item(&id, &cancel, &mut tracker).await;
                    } else {
                        self.events.error(format!("No download result for {}", id));
                        tracker.set(&id, ItemStatus::Failed, Some("no result reported".into()));
                    }
                }
            }
            Ok(Err(e)) => {
                self.events.error(format!("Download tool failed: {}", e));
                tracker.fail_pending(&e.to_string());
            }
            Err(e) => {
                tracing::error!("Download task panicked: {}", e);
                tracker.fail_pending("download task failed");
            }
        }

        let summary = tracker.into_summary(batch_id);
        let state = summary.state();
        tracing::info!(
            "Batch {} complete: {} completed, {} failed, {} cancelled",
            summary.batch_id,
            state.completed,
            state.failed,
            state.cancelled
        );
        summary
    }

    async fn deploy_item(&self, id: &str, cancel: &CancellationToken, tracker: &mut ItemTracker) {
        if cancel.is_cancelled() {
            self.events.warn(format!("Skipping deploy of {} (cancelled)", id));
            tracker.set(id, ItemStatus::Cancelled, Some("downloaded, not deployed".into()));
            return;
        }

        tracker.set(id, ItemStatus::Deploying, None);
        match self.mods.redeploy(id).await {
            Ok(outcome) => {
                let verb = match outcome {
                    DeployOutcome::AlreadyDeployed => "already enabled",
                    _ => "enabled",
                };
                self.events.success(format!("{} downloaded and {}", id, verb));
                tracker.set(id, ItemStatus::Completed, None);
            }
            Err(e) => {
                self.events.error(format!("Deploy failed for {}: {}", id, e));
                tracker.set(id, ItemStatus::Failed, Some(e.to_string()));
            }
        }
    }
}

struct ItemTracker {
    order: Vec<String>,
    statuses: HashMap<String, (ItemStatus, Option<String>)>,
    events: EventSender,
}

impl ItemTracker {
    fn new(ids: &[String], events: EventSender) -> Self {
        Self {
            order: ids.to_vec(),
            statuses: ids
                .iter()
                .map(|id| (id.clone(), (ItemStatus::Pending, None)))
                .collect(),
            events,
        }
    }

    fn set(&mut self, id: &str, status: ItemStatus, detail: Option<String>) {
        if let Some(entry) = self.statuses.get_mut(id) {
            if entry.0.is_final() {
                return;
            }
            *entry = (status, detail.clone());
            self.events.status(id, status, detail);
        }
    }

    fn pending(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.statuses.get(*id).is_some_and(|(s, _)| !s.is_final()))
            .cloned()
            .collect()
    }

    fn fail_pending(&mut self, reason: &str) {
        for id in self.pending() {
            self.set(&id, ItemStatus::Failed, Some(reason.to_string()));
        }
    }

    fn cancel_pending(&mut self, reason: &str) {
        for id in self.pending() {
            self.set(&id, ItemStatus::Cancelled, Some(reason.to_string()));
        }
    }

    fn into_summary(mut self, batch_id: String) -> BatchSummary {
        let items = self
            .order
            .iter()
            .map(|id| {
                let (status, detail) = self
                    .statuses
                    .remove(id)
                    .unwrap_or((ItemStatus::Pending, None));
                (id.clone(), status, detail)
            })
            .collect();
        BatchSummary { batch_id, items }
    }
}
