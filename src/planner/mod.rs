mod m3u8;
mod range;

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::EngineResult;
use crate::http_client::HttpClient;
use crate::types::{MediaType, SegmentInfo};

/// Cache directory for a download's segment part files:
/// `<output parent>/<output file-name>_segments_<download-id>/`.
pub fn cache_dir_for(output_path: &Path, download_id: &str) -> PathBuf {
    let parent = output_path.parent().filter(|p| !p.as_os_str().is_empty());
    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let dir_name = format!("{}_segments_{}", file_name, download_id);

    match parent {
        Some(p) => p.join(dir_name),
        None => PathBuf::from(dir_name),
    }
}

/// Produce the segment plan for a download. M3U8 playlists are resolved
/// recursively to their highest-bandwidth media playlist; MP4/MKV files are
/// probed for byte-range support and split into chunks.
pub async fn plan(
    http: &HttpClient,
    url: &Url,
    media_type: MediaType,
    cache_dir: &Path,
) -> EngineResult<Vec<SegmentInfo>> {
    match media_type {
        MediaType::M3u8 => m3u8::resolve(http, url, cache_dir).await,
        MediaType::Mp4 | MediaType::Mkv => range::plan(http, url, cache_dir).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_dir_derives_from_output_file_name() {
        let dir = cache_dir_for(Path::new("/tmp/out/video.mp4"), "abc123");
        assert_eq!(dir, PathBuf::from("/tmp/out/video.mp4_segments_abc123"));
    }

    #[test]
    fn cache_dir_falls_back_to_cwd_when_no_parent() {
        let dir = cache_dir_for(Path::new("video.mp4"), "abc123");
        assert_eq!(dir, PathBuf::from("video.mp4_segments_abc123"));
    }
}
