use std::path::Path;

use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tracing::{event, Level};

use crate::error::EngineResult;
use crate::types::DownloadState;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Concatenate all segment files into the final output, in ascending
/// `index` order, using a fixed-size streaming buffer so no segment or the
/// output is ever materialized whole in memory. On success, every segment
/// file and the cache directory are removed.
pub async fn merge(state: &DownloadState) -> EngineResult<u64> {
    let mut segments = state.segments.clone();
    segments.sort_by_key(|s| s.index);

    if let Some(parent) = state.output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let output_file = fs::File::create(&state.output_path).await?;
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, output_file);
    let mut total_bytes = 0u64;

    for segment in &segments {
        let input_file = fs::File::open(&segment.temp_file_path).await?;
        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, input_file);
        total_bytes += tokio::io::copy_buf(&mut reader, &mut writer).await?;
    }

    writer.flush().await?;

    event!(
        Level::INFO,
        "merged {} segments into {:?} ({} bytes)",
        segments.len(),
        state.output_path,
        total_bytes
    );

    cleanup(&segments, &state.segment_cache_dir).await?;

    Ok(total_bytes)
}

/// Remove every segment file, then the cache directory itself. A stray
/// per-file removal failure is logged and ignored (`remove_dir_all` below
/// will sweep it up regardless); a failure to remove the cache directory is
/// propagated so `merge()` fails instead of silently completing with the
/// cache dir still on disk, which invariant 5 in the data model forbids.
async fn cleanup(segments: &[crate::types::SegmentInfo], cache_dir: &Path) -> EngineResult<()> {
    for segment in segments {
        if let Err(e) = fs::remove_file(&segment.temp_file_path).await {
            event!(Level::WARN, "failed to remove segment file {:?}: {}", segment.temp_file_path, e);
        }
    }

    fs::remove_dir_all(cache_dir).await?;

    Ok(())
}
