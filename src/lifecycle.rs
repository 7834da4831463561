use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};
use url::Url;

use crate::error::{DownloadError, EngineError};
use crate::fetcher;
use crate::http_client::HttpClient;
use crate::merger;
use crate::planner;
use crate::progress::ProgressBus;
use crate::state_store::{StateStore, TaskHandle};
use crate::types::{
    now_millis, DownloadId, DownloadOptions, DownloadProgress, DownloadState, DownloadStatus,
    MediaType,
};

/// Orchestrates a single download's task and its state transitions:
/// INIT -> DOWNLOAD -> MERGE -> COMPLETE, with pause/resume/cancel.
pub struct LifecycleController {
    store: Arc<StateStore>,
    progress: Arc<ProgressBus>,
    http: Arc<HttpClient>,
}

impl LifecycleController {
    pub fn new(store: Arc<StateStore>, progress: Arc<ProgressBus>, http: Arc<HttpClient>) -> Self {
        Self { store, progress, http }
    }

    /// Register an INITIALIZING entry, plan inline, then launch the task.
    /// A no-op if `id` is already present. The planner runs before the task
    /// is launched; a planner failure leaves the entry FAILED with no task
    /// ever attached.
    pub async fn download_with_id(
        &self,
        id: DownloadId,
        url: Url,
        output_path: PathBuf,
        options: DownloadOptions,
    ) {
        let media_type = MediaType::infer(&url);
        let cache_dir = planner::cache_dir_for(&output_path, id.as_str());

        let initial = DownloadState::new_initializing(
            id.clone(),
            url.clone(),
            output_path,
            cache_dir.clone(),
            media_type,
        );

        if !self.store.insert_or_reject(id.clone(), initial) {
            // Idempotent replay of an already-handled download.
            return;
        }
        self.emit_current(&id);

        if let Err(e) = tokio::fs::create_dir_all(&cache_dir).await {
            self.fail(&id, EngineError::Io(e));
            return;
        }

        match planner::plan(&self.http, &url, media_type, &cache_dir).await {
            Ok(segments) => {
                let total = segments.len() as u64;
                self.store.update(&id, |s| {
                    let mut next = s.clone();
                    next.segments = segments.clone();
                    next.total_segments = total;
                    next.timestamp = now_millis();
                    next
                });
                self.launch_task(id, options).await;
            }
            Err(e) => {
                self.fail(&id, e);
            }
        }
    }

    /// `resume`/relaunch path: spawn the task and block until it reports
    /// its first transition out of the pre-launch state (the non-deferred
    /// start contract), then detach back to the caller.
    async fn launch_task(&self, id: DownloadId, options: DownloadOptions) {
        let cancel = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel();

        let store = self.store.clone();
        let progress = self.progress.clone();
        let http = self.http.clone();
        let task_id = id.clone();
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            run_download_task(store, progress, http, task_id, options, task_cancel, started_tx).await;
        });

        self.store.attach_task(&id, TaskHandle { cancel, join });

        // Wait for the task to confirm it has started so the caller
        // observes at least the INITIALIZING -> DOWNLOADING transition
        // before this call returns.
        let _ = started_rx.await;
    }

    /// `pause(id)`: succeeds only if a task is attached and active.
    pub async fn pause(&self, id: &DownloadId) -> bool {
        let Some(state) = self.store.get(id) else {
            return false;
        };
        if !state.status.is_active() || !self.store.has_active_task(id) {
            return false;
        }

        let task = self.store.detach_task(id);
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.join.await;
        } else {
            return false;
        }

        if let Some((new_state, _)) = self.store.set_status_and_detach(id, DownloadStatus::Paused) {
            self.progress.emit(DownloadProgress::from_state(&new_state));
            true
        } else {
            false
        }
    }

    /// `resume(id)`: succeeds only if current status is Paused or Failed.
    /// If a task is already active, returns true without relaunching.
    /// Resume discards the original `DownloadOptions` (headers, concurrency)
    /// in favor of defaults — an intentional, spec-preserved limitation.
    pub async fn resume(&self, id: &DownloadId) -> bool {
        let Some(state) = self.store.get(id) else {
            return false;
        };

        if self.store.has_active_task(id) {
            return true;
        }

        if !matches!(state.status, DownloadStatus::Paused | DownloadStatus::Failed) {
            return false;
        }

        self.store.update(id, |s| {
            let mut next = s.clone();
            next.status = DownloadStatus::Downloading;
            next.error = None;
            next.timestamp = now_millis();
            next
        });
        self.emit_current(id);

        self.launch_task(id.clone(), DownloadOptions::default()).await;
        true
    }

    /// `cancel(id)`: cancels any active task and forces status to Canceled
    /// regardless of prior status. False only if the id is absent.
    pub async fn cancel(&self, id: &DownloadId) -> bool {
        if self.store.get(id).is_none() {
            return false;
        }

        if let Some(task) = self.store.detach_task(id) {
            task.cancel.cancel();
            let _ = task.join.await;
        }

        if let Some((new_state, _)) = self.store.set_status_and_detach(id, DownloadStatus::Canceled) {
            self.progress.emit(DownloadProgress::from_state(&new_state));
        }
        true
    }

    /// Cancel every active task; any entry whose status is Initializing,
    /// Downloading, Paused, or Merging becomes Canceled. Terminal entries
    /// are left untouched.
    pub async fn cancel_all(&self) {
        let ids: Vec<DownloadId> = self
            .store
            .all()
            .into_iter()
            .filter(|s| {
                s.status.is_active()
                    || s.status == DownloadStatus::Paused
                    || s.status == DownloadStatus::Merging
            })
            .map(|s| s.download_id)
            .collect();

        for id in ids {
            self.cancel(&id).await;
        }
    }

    /// Pause every currently-active download; returns the affected ids.
    pub async fn pause_all(&self) -> Vec<DownloadId> {
        let ids: Vec<DownloadId> = self
            .store
            .all()
            .into_iter()
            .filter(|s| s.status.is_active())
            .map(|s| s.download_id)
            .collect();

        let mut paused = Vec::new();
        for id in ids {
            if self.pause(&id).await {
                paused.push(id);
            }
        }
        paused
    }

    /// Await the task's completion, if one is running. A no-op if absent.
    pub async fn join_download(&self, id: &DownloadId) {
        if let Some(task) = self.store.detach_task(id) {
            let _ = task.join.await;
        }
    }

    fn fail(&self, id: &DownloadId, err: EngineError) {
        let download_error = DownloadError::from_engine_error(&err);
        event!(Level::WARN, "download {} failed during planning: {}", id, err);
        let new_state = self.store.update(id, |s| {
            let mut next = s.clone();
            next.status = DownloadStatus::Failed;
            next.error = Some(download_error.clone());
            next.timestamp = now_millis();
            next
        });
        if let Some(state) = new_state {
            self.progress.emit(DownloadProgress::from_state(&state));
        }
    }

    fn emit_current(&self, id: &DownloadId) {
        if let Some(state) = self.store.get(id) {
            self.progress.emit(DownloadProgress::from_state(&state));
        }
    }
}

/// Body of a per-download task: DOWNLOADING -> MERGING -> COMPLETED, or
/// FAILED on the first unrecovered error. Cancellation is intercepted here
/// and never turned into a FAILED transition; the caller that initiated the
/// cancellation (`pause`/`cancel`) sets the final status itself.
#[allow(clippy::too_many_arguments)]
async fn run_download_task(
    store: Arc<StateStore>,
    progress: Arc<ProgressBus>,
    http: Arc<HttpClient>,
    id: DownloadId,
    options: DownloadOptions,
    cancel: CancellationToken,
    started_tx: oneshot::Sender<()>,
) {
    let new_state = store.update(&id, |s| {
        let mut next = s.clone();
        next.status = DownloadStatus::Downloading;
        next.timestamp = now_millis();
        next
    });
    if let Some(state) = &new_state {
        progress.emit(DownloadProgress::from_state(state));
    }
    let _ = started_tx.send(());

    if new_state.is_none() {
        // Entry was removed from under us (shouldn't happen in practice).
        return;
    }

    match fetcher::fetch_all(&http, &store, &progress, &id, &options, &cancel).await {
        Ok(()) => {}
        Err(EngineError::Canceled) => return,
        Err(e) => {
            fail_task(&store, &progress, &id, e);
            return;
        }
    }

    let new_state = store.update(&id, |s| {
        let mut next = s.clone();
        next.status = DownloadStatus::Merging;
        next.timestamp = now_millis();
        next
    });
    if let Some(state) = &new_state {
        progress.emit(DownloadProgress::from_state(state));
    }

    let Some(state_for_merge) = store.get(&id) else {
        return;
    };

    match merger::merge(&state_for_merge).await {
        Ok(_) => {
            // A concurrent cancel() may have already forced a terminal
            // status while the merge (not cleanly cancellable) ran to
            // completion; don't clobber it.
            let new_state = store.update(&id, |s| {
                let mut next = s.clone();
                if !next.status.is_terminal() {
                    next.status = DownloadStatus::Completed;
                    next.timestamp = now_millis();
                }
                next
            });
            if let Some(state) = new_state {
                progress.emit(DownloadProgress::from_state(&state));
            }
        }
        Err(e) => fail_task(&store, &progress, &id, e),
    }
}

fn fail_task(store: &StateStore, progress: &ProgressBus, id: &DownloadId, err: EngineError) {
    let download_error = DownloadError::from_engine_error(&err);
    event!(Level::WARN, "download {} failed: {}", id, err);
    let new_state = store.update(id, |s| {
        let mut next = s.clone();
        if !next.status.is_terminal() {
            next.status = DownloadStatus::Failed;
            next.error = Some(download_error.clone());
            next.timestamp = now_millis();
        }
        next
    });
    if let Some(state) = new_state {
        progress.emit(DownloadProgress::from_state(&state));
    }
}
