use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;
use uuid::Uuid;

use crate::error::DownloadError;

/// Opaque identifier for a single download, globally unique per download.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DownloadId(String);

impl DownloadId {
    /// Generate a fresh id from a UUID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for DownloadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DownloadId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media type of the resource being downloaded, inferred from the URL path suffix.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MediaType {
    M3u8,
    Mp4,
    Mkv,
}

impl MediaType {
    /// Infer from a URL path suffix, case-insensitively. Defaults to M3u8 when
    /// nothing matches.
    pub fn infer(url: &Url) -> Self {
        let path = url.path().to_ascii_lowercase();
        if path.ends_with(".mp4") {
            Self::Mp4
        } else if path.ends_with(".mkv") {
            Self::Mkv
        } else {
            Self::M3u8
        }
    }
}

/// Lifecycle state of a download.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DownloadStatus {
    Initializing,
    Downloading,
    Paused,
    Merging,
    Completed,
    Failed,
    Canceled,
}

impl DownloadStatus {
    /// Terminal states never transition further without a fresh resume/download.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Initializing | Self::Downloading)
    }
}

/// One fetchable unit of the final artifact: a byte range of a container
/// file, or a media chunk from an HLS playlist.
#[derive(Clone, Debug)]
pub struct SegmentInfo {
    pub index: u64,
    pub url: Url,
    pub range_start: Option<u64>,
    pub range_end: Option<u64>,
    pub byte_size: i64,
    pub temp_file_path: PathBuf,
    pub is_downloaded: bool,
}

impl SegmentInfo {
    pub fn range_header_value(&self) -> Option<String> {
        match (self.range_start, self.range_end) {
            (Some(s), Some(e)) => Some(format!("bytes={}-{}", s, e)),
            _ => None,
        }
    }
}

/// Immutable snapshot of a download's state. Replaced atomically on every
/// mutation; never mutated in place.
#[derive(Clone, Debug)]
pub struct DownloadState {
    pub download_id: DownloadId,
    pub url: Url,
    pub output_path: PathBuf,
    pub segment_cache_dir: PathBuf,
    pub segments: Vec<SegmentInfo>,
    pub total_segments: u64,
    pub downloaded_bytes: u64,
    pub timestamp: u64,
    pub status: DownloadStatus,
    pub media_type: MediaType,
    pub error: Option<DownloadError>,
}

impl DownloadState {
    pub fn new_initializing(
        download_id: DownloadId,
        url: Url,
        output_path: PathBuf,
        segment_cache_dir: PathBuf,
        media_type: MediaType,
    ) -> Self {
        Self {
            download_id,
            url,
            output_path,
            segment_cache_dir,
            segments: Vec::new(),
            total_segments: 0,
            downloaded_bytes: 0,
            timestamp: now_millis(),
            status: DownloadStatus::Initializing,
            media_type,
            error: None,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Per-call configuration consumed by the engine.
#[derive(Clone, Debug)]
pub struct DownloadOptions {
    pub headers: HashMap<String, String>,
    pub max_concurrent_segments: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            max_concurrent_segments: 4,
        }
    }
}

/// Point-in-time summary of a download's state shipped to subscribers.
#[derive(Clone, Debug)]
pub struct DownloadProgress {
    pub download_id: DownloadId,
    pub url: Url,
    pub total_segments: u64,
    pub downloaded_segments: u64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub status: DownloadStatus,
    pub error: Option<DownloadError>,
}

impl DownloadProgress {
    /// Compute a fresh snapshot from a state reference.
    pub fn from_state(state: &DownloadState) -> Self {
        let downloaded_segments = state.segments.iter().filter(|s| s.is_downloaded).count() as u64;
        let known_bytes: i64 = state
            .segments
            .iter()
            .map(|s| s.byte_size.max(0))
            .sum();
        let total_bytes = known_bytes.max(state.downloaded_bytes as i64) as u64;

        Self {
            download_id: state.download_id.clone(),
            url: state.url.clone(),
            total_segments: state.total_segments,
            downloaded_segments,
            downloaded_bytes: state.downloaded_bytes,
            total_bytes,
            status: state.status,
            error: state.error.clone(),
        }
    }
}
