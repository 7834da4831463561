use std::path::Path;

use reqwest::header::{self, HeaderMap};
use url::Url;

use crate::error::EngineResult;
use crate::http_client::HttpClient;
use crate::types::SegmentInfo;

/// 5 MiB, the chunk size used once range support is confirmed.
const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

struct ProbeResult {
    content_length: i64,
    range_supported: bool,
}

/// Probe range support with a single `Range: bytes=0-0` request, then plan
/// the byte-range segments for a container file.
pub async fn plan(http: &HttpClient, url: &Url, cache_dir: &Path) -> EngineResult<Vec<SegmentInfo>> {
    let probe = probe(http, url).await;

    let segments = match probe {
        None => vec![single_segment(url.clone(), -1, None, None, cache_dir)],
        Some(ProbeResult {
            range_supported: false,
            content_length,
        }) => vec![single_segment(url.clone(), content_length, None, None, cache_dir)],
        Some(ProbeResult {
            range_supported: true,
            content_length,
        }) if content_length <= CHUNK_SIZE as i64 => {
            let end = (content_length - 1).max(0);
            vec![single_segment(url.clone(), content_length, Some(0), Some(end as u64), cache_dir)]
        }
        Some(ProbeResult {
            range_supported: true,
            content_length,
        }) => chunked_segments(url.clone(), content_length as u64, cache_dir),
    };

    Ok(segments)
}

fn single_segment(
    url: Url,
    byte_size: i64,
    range_start: Option<u64>,
    range_end: Option<u64>,
    cache_dir: &Path,
) -> SegmentInfo {
    SegmentInfo {
        index: 0,
        url,
        range_start,
        range_end,
        byte_size,
        temp_file_path: cache_dir.join("0.part"),
        is_downloaded: false,
    }
}

fn chunked_segments(url: Url, content_length: u64, cache_dir: &Path) -> Vec<SegmentInfo> {
    let mut segments = Vec::new();
    let mut offset = 0u64;
    let mut index = 0u64;

    while offset < content_length {
        let end = (offset + CHUNK_SIZE - 1).min(content_length - 1);
        segments.push(SegmentInfo {
            index,
            url: url.clone(),
            range_start: Some(offset),
            range_end: Some(end),
            byte_size: (end - offset + 1) as i64,
            temp_file_path: cache_dir.join(format!("{}.part", index)),
            is_downloaded: false,
        });
        offset = end + 1;
        index += 1;
    }

    segments
}

/// Issue the `Range: bytes=0-0` probe request. Returns `None` on probe
/// failure (non-206/200 status, network error, or malformed headers) so
/// the caller can fall back to a single whole-file segment.
async fn probe(http: &HttpClient, url: &Url) -> Option<ProbeResult> {
    let mut headers = HeaderMap::new();
    headers.insert(header::RANGE, "bytes=0-0".parse().ok()?);

    let resp = http.get(url.clone()).headers(headers).send().await.ok()?;

    match resp.status().as_u16() {
        206 => {
            let content_range = resp.headers().get(header::CONTENT_RANGE)?.to_str().ok()?;
            let total = parse_content_range_total(content_range)?;
            Some(ProbeResult {
                content_length: total,
                range_supported: true,
            })
        }
        200 => {
            let content_length = resp
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(-1);
            Some(ProbeResult {
                content_length,
                range_supported: false,
            })
        }
        _ => None,
    }
}

/// Parse the total size out of a `Content-Range: bytes 0-0/<total>` header.
fn parse_content_range_total(header_value: &str) -> Option<i64> {
    let total_str = header_value.rsplit('/').next()?;
    total_str.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_range_total() {
        assert_eq!(
            parse_content_range_total("bytes 0-0/12582912"),
            Some(12582912)
        );
    }

    #[test]
    fn malformed_content_range_yields_none() {
        assert_eq!(parse_content_range_total("not-a-content-range"), None);
    }

    #[test]
    fn chunked_segments_cover_large_file_in_5mib_pieces() {
        let url = Url::parse("https://host/big.mp4").unwrap();
        let segments = chunked_segments(url, 12_582_912, Path::new("/cache"));
        assert_eq!(segments.len(), 3);
        assert_eq!((segments[0].range_start, segments[0].range_end), (Some(0), Some(5_242_879)));
        assert_eq!(
            (segments[1].range_start, segments[1].range_end),
            (Some(5_242_880), Some(10_485_759))
        );
        assert_eq!(
            (segments[2].range_start, segments[2].range_end),
            (Some(10_485_760), Some(12_582_911))
        );
    }

    #[test]
    fn small_range_supported_file_yields_single_full_range_segment() {
        // content_length <= 5 MiB with range support -> one segment, full range.
        let content_length = 1000i64;
        let seg = single_segment(
            Url::parse("https://host/small.mp4").unwrap(),
            content_length,
            Some(0),
            Some((content_length - 1) as u64),
            Path::new("/cache"),
        );
        assert_eq!(seg.range_start, Some(0));
        assert_eq!(seg.range_end, Some(999));
    }
}
