use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use crate::error::{EngineError, EngineResult};
use crate::http_client::HttpClient;
use crate::progress::ProgressBus;
use crate::state_store::StateStore;
use crate::types::{DownloadId, DownloadOptions, DownloadProgress, SegmentInfo};

/// Bounded-concurrency segment downloader. Fetches every not-yet-downloaded
/// segment of a download under a counting semaphore; segments already
/// marked downloaded are skipped (this is what makes resume-after-pause
/// work). If any segment fails, the remaining in-flight segments are
/// cancelled cooperatively and the first failure is returned.
pub async fn fetch_all(
    http: &HttpClient,
    store: &StateStore,
    progress: &ProgressBus,
    id: &DownloadId,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    let state = store
        .get(id)
        .ok_or_else(|| EngineError::Other(anyhow::anyhow!("download {} vanished from store", id)))?;

    let todo: Vec<SegmentInfo> = state
        .segments
        .iter()
        .filter(|s| !s.is_downloaded)
        .cloned()
        .collect();

    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_segments.max(1) as usize));
    let mut tasks = JoinSet::new();

    for segment in todo {
        let http = http.clone();
        let semaphore = semaphore.clone();
        let headers = options.headers.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let _permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit
                    .map_err(|_| EngineError::Other(anyhow::anyhow!("segment semaphore closed")))?,
                _ = cancel.cancelled() => return Err(EngineError::Canceled),
            };

            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }

            fetch_segment(&http, &headers, segment, &cancel).await
        });
    }

    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(r) => r,
            Err(join_err) if join_err.is_cancelled() => Err(EngineError::Canceled),
            Err(join_err) => Err(EngineError::Other(anyhow::anyhow!(join_err))),
        };

        match result {
            Ok((index, bytes_written)) => {
                mark_segment_downloaded(store, progress, id, index, bytes_written);
            }
            Err(EngineError::Canceled) => {}
            Err(e) => {
                if first_error.is_none() {
                    event!(Level::WARN, "segment fetch failed: {}", e);
                    first_error = Some(e);
                }
                cancel.cancel();
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if cancel.is_cancelled() {
        return Err(EngineError::Canceled);
    }

    Ok(())
}

/// Fetch a single segment and stream it to its temp file. Returns the
/// segment's index and the number of bytes written.
async fn fetch_segment(
    http: &HttpClient,
    extra_headers: &HashMap<String, String>,
    segment: SegmentInfo,
    cancel: &CancellationToken,
) -> EngineResult<(u64, u64)> {
    let mut header_map = HeaderMap::new();
    for (k, v) in extra_headers {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(k.as_bytes()),
            reqwest::header::HeaderValue::from_str(v),
        ) {
            header_map.insert(name, value);
        }
    }
    if let Some(range) = segment.range_header_value() {
        header_map.insert(
            reqwest::header::RANGE,
            reqwest::header::HeaderValue::from_str(&range)
                .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?,
        );
    }

    event!(Level::TRACE, "fetching segment {} {}", segment.index, segment.url);

    let resp = http.get(segment.url.clone()).headers(header_map).send().await?;
    if !resp.status().is_success() {
        return Err(EngineError::from_bad_response(&resp));
    }

    if let Some(parent) = segment.temp_file_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let file = fs::File::create(&segment.temp_file_path).await?;
    let mut writer = BufWriter::with_capacity(64 * 1024, file);
    let mut stream = resp.bytes_stream();
    let mut bytes_written: u64 = 0;

    loop {
        let next = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => return Err(EngineError::Canceled),
        };

        match next {
            Some(chunk) => {
                let chunk = chunk?;
                writer.write_all(&chunk).await?;
                bytes_written += chunk.len() as u64;
            }
            None => break,
        }
    }

    writer.flush().await?;

    event!(
        Level::INFO,
        "downloaded segment {} ({} bytes)",
        segment.index,
        bytes_written
    );

    Ok((segment.index, bytes_written))
}

/// Record a segment as downloaded under the State Store's mutex, then emit
/// a progress snapshot outside the lock.
fn mark_segment_downloaded(
    store: &StateStore,
    progress: &ProgressBus,
    id: &DownloadId,
    index: u64,
    bytes_written: u64,
) {
    let new_state = store.update(id, |state| {
        let mut next = state.clone();
        let mut delta = 0i64;
        for seg in &mut next.segments {
            if seg.index == index && !seg.is_downloaded {
                seg.is_downloaded = true;
                delta = bytes_written as i64 - seg.byte_size.max(0);
                seg.byte_size = bytes_written as i64;
            }
        }
        if delta != 0 {
            next.downloaded_bytes = (next.downloaded_bytes as i64 + delta).max(0) as u64;
        }
        next.timestamp = crate::types::now_millis();
        next
    });

    if let Some(state) = new_state {
        progress.emit(DownloadProgress::from_state(&state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DownloadState, MediaType};
    use std::path::PathBuf;
    use url::Url;

    fn state_with_segments(id: &DownloadId, sizes: &[i64]) -> DownloadState {
        let mut state = DownloadState::new_initializing(
            id.clone(),
            Url::parse("https://host/video.mp4").unwrap(),
            PathBuf::from("out.mp4"),
            PathBuf::from("out_segments"),
            MediaType::Mp4,
        );
        state.segments = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| SegmentInfo {
                index: i as u64,
                url: state.url.clone(),
                range_start: None,
                range_end: None,
                byte_size: size,
                temp_file_path: PathBuf::from(format!("{}.part", i)),
                is_downloaded: false,
            })
            .collect();
        state.total_segments = state.segments.len() as u64;
        state
    }

    #[test]
    fn mark_segment_downloaded_updates_bytes_and_flags() {
        let store = StateStore::new();
        let progress = ProgressBus::new();
        let id = DownloadId::from("abc");
        store.insert_or_reject(id.clone(), state_with_segments(&id, &[-1, -1]));

        mark_segment_downloaded(&store, &progress, &id, 0, 500);
        let state = store.get(&id).unwrap();
        assert!(state.segments[0].is_downloaded);
        assert_eq!(state.segments[0].byte_size, 500);
        assert_eq!(state.downloaded_bytes, 500);

        mark_segment_downloaded(&store, &progress, &id, 1, 300);
        let state = store.get(&id).unwrap();
        assert_eq!(state.downloaded_bytes, 800);
    }

    #[test]
    fn mark_segment_downloaded_is_idempotent_per_segment() {
        let store = StateStore::new();
        let progress = ProgressBus::new();
        let id = DownloadId::from("abc");
        store.insert_or_reject(id.clone(), state_with_segments(&id, &[-1]));

        mark_segment_downloaded(&store, &progress, &id, 0, 500);
        // A duplicate completion signal (e.g. a stray retry) must not double
        // count bytes since is_downloaded is already true.
        mark_segment_downloaded(&store, &progress, &id, 0, 500);
        let state = store.get(&id).unwrap();
        assert_eq!(state.downloaded_bytes, 500);
    }
}
