use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::watch;
use url::Url;

use crate::error::DownloadError;
use crate::http_client::{EngineConfig, HttpClient};
use crate::lifecycle::LifecycleController;
use crate::progress::ProgressBus;
use crate::state_store::StateStore;
use crate::types::{DownloadId, DownloadOptions, DownloadProgress, DownloadState};

/// Public facade over the State Store, Progress Bus and Lifecycle
/// Controller. One `Engine` owns every in-flight download; cloning it is
/// cheap (all fields are `Arc`-backed) and safe to share across tasks.
#[derive(Clone)]
pub struct Engine {
    store: Arc<StateStore>,
    progress: Arc<ProgressBus>,
    lifecycle: Arc<LifecycleController>,
    closed: Arc<AtomicBool>,
}

impl Engine {
    /// Build a fresh engine. Equivalent to `init()` with a default
    /// `EngineConfig`.
    pub fn new() -> reqwest::Result<Self> {
        Self::init(EngineConfig::default())
    }

    /// Build a fresh engine with an explicit HTTP configuration.
    pub fn init(config: EngineConfig) -> reqwest::Result<Self> {
        let http = Arc::new(HttpClient::new(&config)?);
        let store = Arc::new(StateStore::new());
        let progress = Arc::new(ProgressBus::new());
        let lifecycle = Arc::new(LifecycleController::new(store.clone(), progress.clone(), http));
        Ok(Self { store, progress, lifecycle, closed: Arc::new(AtomicBool::new(false)) })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Start a new download with a freshly generated id, returning it.
    pub async fn download(&self, url: Url, output_path: PathBuf, options: DownloadOptions) -> DownloadId {
        let id = DownloadId::new();
        self.download_with_id(id.clone(), url, output_path, options).await;
        id
    }

    /// Start a new download under a caller-supplied id. A no-op if `id` is
    /// already known to the engine (covers replayed/duplicate requests), or
    /// if the engine has been closed.
    pub async fn download_with_id(
        &self,
        id: DownloadId,
        url: Url,
        output_path: PathBuf,
        options: DownloadOptions,
    ) {
        if self.is_closed() {
            return;
        }
        self.lifecycle.download_with_id(id, url, output_path, options).await;
    }

    /// Resume a paused or failed download. Returns `false` if the id is
    /// unknown, the download isn't in a resumable state, or the engine has
    /// been closed.
    pub async fn resume(&self, id: &DownloadId) -> bool {
        if self.is_closed() {
            return false;
        }
        self.lifecycle.resume(id).await
    }

    /// Pause an active download. Returns `false` if the id is unknown, has
    /// no active task, or the engine has been closed.
    pub async fn pause(&self, id: &DownloadId) -> bool {
        if self.is_closed() {
            return false;
        }
        self.lifecycle.pause(id).await
    }

    /// Cancel a download regardless of its current status. Returns `false`
    /// if the id is unknown or the engine has been closed.
    pub async fn cancel(&self, id: &DownloadId) -> bool {
        if self.is_closed() {
            return false;
        }
        self.lifecycle.cancel(id).await
    }

    /// Pause every currently active download. Returns the ids affected; an
    /// empty list once the engine has been closed.
    pub async fn pause_all(&self) -> Vec<DownloadId> {
        if self.is_closed() {
            return Vec::new();
        }
        self.lifecycle.pause_all().await
    }

    /// Cancel every active or paused download. A no-op once the engine has
    /// been closed.
    pub async fn cancel_all(&self) {
        if self.is_closed() {
            return;
        }
        self.lifecycle.cancel_all().await
    }

    /// Snapshot of a single download's state.
    pub fn get_state(&self, id: &DownloadId) -> Option<DownloadState> {
        self.store.get(id)
    }

    /// Snapshot of every known download's state.
    pub fn get_all_states(&self) -> Vec<DownloadState> {
        self.store.all()
    }

    /// Ids of downloads currently initializing or downloading.
    pub fn get_active_download_ids(&self) -> Vec<DownloadId> {
        self.store.active_ids()
    }

    /// Progress stream for a single download. Replays a fresh snapshot of
    /// the current state before forwarding live updates.
    pub fn get_progress_flow(&self, id: DownloadId) -> impl Stream<Item = DownloadProgress> + Send + 'static {
        self.progress.progress_flow_for(id, &self.store)
    }

    /// Progress stream across all downloads, replaying the last emitted
    /// value before forwarding live updates.
    pub fn progress_flow(&self) -> impl Stream<Item = DownloadProgress> + Send + 'static {
        self.progress.progress_flow()
    }

    /// Watch channel of the full state snapshot list, updated on every
    /// mutation to any download.
    pub fn download_states_flow(&self) -> watch::Receiver<Vec<DownloadState>> {
        self.store.states_watch()
    }

    /// Block until a download's task finishes (completes, fails, or is
    /// canceled out from under it). A no-op if no task is attached.
    pub async fn join_download(&self, id: &DownloadId) {
        self.lifecycle.join_download(id).await;
    }

    /// Cancel and join every task, then empty the state map. Terminal: after
    /// `close()` returns, every other `Engine` method is a no-op (`false` /
    /// empty / absent, as appropriate) rather than an error.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.lifecycle.cancel_all().await;
        self.store.clear();
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Suspend-fn spelling of [`Engine::close`] for callers following the
    /// source engine's sync/suspend naming pair. Identical behavior: this is
    /// not a "pause everything" operation, it is the same terminal shutdown
    /// as `close()`.
    pub async fn close_suspend(&self) {
        self.close().await;
    }

    /// Last reported error for a download, if it ended in `Failed`.
    pub fn get_error(&self, id: &DownloadId) -> Option<DownloadError> {
        self.store.get(id).and_then(|s| s.error)
    }
}
