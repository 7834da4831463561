pub mod engine;
pub mod error;
mod fetcher;
mod http_client;
mod lifecycle;
mod merger;
mod planner;
mod progress;
mod state_store;
pub mod types;
mod util;

pub use engine::Engine;
pub use error::{DownloadError, DownloadErrorCode};
pub use http_client::EngineConfig;
pub use types::{
    DownloadId, DownloadOptions, DownloadProgress, DownloadState, DownloadStatus, MediaType,
    SegmentInfo,
};
