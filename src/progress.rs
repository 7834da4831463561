use std::sync::Mutex;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::state_store::StateStore;
use crate::types::{DownloadId, DownloadProgress};

const CHANNEL_CAPACITY: usize = 64;

/// Broadcasts `DownloadProgress` snapshots to subscribers. A single shared
/// stream backs both the all-downloads feed and the per-id feed; bounded
/// capacity with drop-oldest-on-overflow semantics comes from
/// `tokio::sync::broadcast`'s `Lagged` resynchronization.
pub struct ProgressBus {
    tx: broadcast::Sender<DownloadProgress>,
    last: Mutex<Option<DownloadProgress>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            last: Mutex::new(None),
        }
    }

    /// Emit a progress snapshot. Called after every status change and after
    /// every segment completion, outside the State Store's mutex.
    pub fn emit(&self, progress: DownloadProgress) {
        *self.last.lock().unwrap() = Some(progress.clone());
        // No active subscribers is not an error.
        let _ = self.tx.send(progress);
    }

    /// Stream of progress for all downloads, replaying the last emitted
    /// value (if any) before live updates.
    pub fn progress_flow(&self) -> impl Stream<Item = DownloadProgress> + Send + 'static {
        let replay = self.last.lock().unwrap().clone();
        let live = BroadcastStream::new(self.tx.subscribe()).filter_map(|r| async { r.ok() });
        stream::iter(replay).chain(live)
    }

    /// Stream of progress for a single download, filtered by id. Its first
    /// element is a freshly-computed snapshot from the current state (if
    /// any), so late subscribers see the current value without waiting for
    /// the next mutation.
    pub fn progress_flow_for(
        &self,
        id: DownloadId,
        store: &StateStore,
    ) -> impl Stream<Item = DownloadProgress> + Send + 'static {
        let initial = store.get(&id).map(|s| DownloadProgress::from_state(&s));
        let live = BroadcastStream::new(self.tx.subscribe()).filter_map(move |r| {
            let id = id.clone();
            async move {
                match r {
                    Ok(p) if p.download_id == id => Some(p),
                    _ => None,
                }
            }
        });
        stream::iter(initial).chain(live)
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DownloadStatus, MediaType};
    use url::Url;

    fn sample_progress(id: &str) -> DownloadProgress {
        DownloadProgress {
            download_id: DownloadId::from(id),
            url: Url::parse("https://host/a.m3u8").unwrap(),
            total_segments: 3,
            downloaded_segments: 1,
            downloaded_bytes: 100,
            total_bytes: 300,
            status: DownloadStatus::Downloading,
            error: None,
        }
    }

    #[tokio::test]
    async fn per_id_stream_filters_by_download_id() {
        let bus = ProgressBus::new();
        let store = StateStore::new();

        let target = sample_progress("target");
        let other = sample_progress("other");

        let mut stream = Box::pin(bus.progress_flow_for(DownloadId::from("target"), &store));
        bus.emit(other);
        bus.emit(target.clone());

        let first = stream.next().await.unwrap();
        assert_eq!(first.download_id, DownloadId::from("target"));
        assert_eq!(first.downloaded_bytes, target.downloaded_bytes);
        let _ = MediaType::M3u8;
    }

    #[tokio::test]
    async fn global_stream_replays_last_value() {
        let bus = ProgressBus::new();
        bus.emit(sample_progress("a"));

        let mut stream = Box::pin(bus.progress_flow());
        let first = stream.next().await.unwrap();
        assert_eq!(first.download_id, DownloadId::from("a"));
    }
}
