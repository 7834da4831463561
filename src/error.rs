use reqwest::Response;
use thiserror::Error;

/// Public error taxonomy. Carried on every `FAILED` state.
#[non_exhaustive]
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DownloadErrorCode {
    /// Master-playlist recursion exhausted, empty variant set, or media
    /// playlist unresolvable.
    NoMediaList,
    /// Any other failure: network, parse, I/O, unexpected status code.
    UnexpectedError,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DownloadError {
    pub code: DownloadErrorCode,
    pub technical_message: Option<String>,
}

impl DownloadError {
    pub fn no_media_list(msg: impl Into<String>) -> Self {
        Self {
            code: DownloadErrorCode::NoMediaList,
            technical_message: Some(msg.into()),
        }
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self {
            code: DownloadErrorCode::UnexpectedError,
            technical_message: Some(msg.into()),
        }
    }

    /// Fold an internal `anyhow` failure into the public taxonomy. Errors
    /// produced by the planner's playlist resolution already carry a
    /// `NoMediaList` code via `EngineError::NoMediaList`; everything else is
    /// `UnexpectedError`.
    pub fn from_engine_error(err: &EngineError) -> Self {
        match err {
            EngineError::NoMediaList(msg) => Self::no_media_list(msg.clone()),
            other => Self::unexpected(other.to_string()),
        }
    }
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.technical_message {
            Some(m) => write!(f, "{:?}: {}", self.code, m),
            None => write!(f, "{:?}", self.code),
        }
    }
}

/// Internal error type used across Planner/Fetcher/Merger. Mapped down to
/// `DownloadError` at the Lifecycle Controller boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no media list: {0}")]
    NoMediaList(String),

    #[error("http request to {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("failed to parse m3u8 playlist from {0}")]
    ParseM3u8(String),

    /// Cooperative cancellation signal. Never surfaced as a `DownloadError`;
    /// caught at the Lifecycle Controller boundary and folded into a
    /// `Paused`/`Canceled` transition instead.
    #[error("operation canceled")]
    Canceled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
}

impl EngineError {
    pub fn from_bad_response(resp: &Response) -> Self {
        Self::HttpStatus {
            url: resp.url().to_string(),
            status: resp.status().as_u16(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
