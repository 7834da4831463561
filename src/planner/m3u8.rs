use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use m3u8_rs::Playlist;
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::http_client::HttpClient;
use crate::types::SegmentInfo;
use crate::util::make_absolute_url;

const MAX_MASTER_PLAYLIST_DEPTH: u32 = 5;

/// Resolve a (possibly master) M3U8 playlist into its flat list of media
/// segments, recursively following master playlists to the highest
/// bandwidth variant.
pub async fn resolve(
    http: &HttpClient,
    url: &Url,
    cache_dir: &Path,
) -> EngineResult<Vec<SegmentInfo>> {
    resolve_depth(http, url, 0, cache_dir).await
}

type BoxedResolve<'a> =
    Pin<Box<dyn Future<Output = EngineResult<Vec<SegmentInfo>>> + Send + 'a>>;

/// Boxed because master playlists recurse into this function; an `async fn`
/// here would have a self-referential, infinitely-sized future type.
#[tracing::instrument(skip(http, cache_dir), fields(depth = depth))]
fn resolve_depth<'a>(
    http: &'a HttpClient,
    url: &'a Url,
    depth: u32,
    cache_dir: &'a Path,
) -> BoxedResolve<'a> {
    Box::pin(async move {
        if depth >= MAX_MASTER_PLAYLIST_DEPTH {
            return Err(EngineError::NoMediaList(format!(
                "master playlist recursion exceeded depth {}",
                MAX_MASTER_PLAYLIST_DEPTH
            )));
        }

        let resp = http.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(EngineError::from_bad_response(&resp));
        }
        let final_url = resp.url().clone();
        let bytes = resp.bytes().await?;

        match m3u8_rs::parse_playlist(&bytes) {
            Ok((_, Playlist::MasterPlaylist(master))) => {
                // Pick the variant with maximum bandwidth; ties broken by
                // insertion order (scan forward, only replace on strictly
                // greater so the earliest-inserted maximal variant wins).
                let mut best: Option<(u64, &m3u8_rs::VariantStream)> = None;
                for v in &master.variants {
                    let bandwidth = v.bandwidth.parse::<u64>().unwrap_or(0);
                    match &best {
                        Some((b, _)) if bandwidth <= *b => {}
                        _ => best = Some((bandwidth, v)),
                    }
                }
                let variant = best
                    .ok_or_else(|| EngineError::NoMediaList("empty master playlist".to_string()))?
                    .1;

                let variant_url = make_absolute_url(&final_url, &variant.uri)?;
                resolve_depth(http, &variant_url, depth + 1, cache_dir).await
            }
            Ok((_, Playlist::MediaPlaylist(media))) => {
                let mut segments = Vec::with_capacity(media.segments.len());
                for (i, seg) in media.segments.iter().enumerate() {
                    let index = media.media_sequence + i as u64;
                    let seg_url = make_absolute_url(&final_url, &seg.uri)?;
                    let byte_size = seg
                        .byte_range
                        .as_ref()
                        .map(|b| b.length as i64)
                        .unwrap_or(-1);

                    segments.push(SegmentInfo {
                        index,
                        url: seg_url,
                        range_start: None,
                        range_end: None,
                        byte_size,
                        temp_file_path: cache_dir.join(format!("{}.ts", index)),
                        is_downloaded: false,
                    });
                }

                if segments.is_empty() {
                    return Err(EngineError::NoMediaList(
                        "media playlist contains no segments".to_string(),
                    ));
                }

                Ok(segments)
            }
            Err(_) => Err(EngineError::ParseM3u8(final_url.to_string())),
        }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_tie_break_keeps_first_inserted() {
        // variant selection logic mirrors max_by_key with insertion-order
        // tie-break: exercised indirectly via resolve_depth's scan, here we
        // assert the scan rule directly against synthetic bandwidths.
        let bandwidths = vec![("a", 500_000u64), ("b", 500_000u64), ("c", 200_000u64)];
        let mut best: Option<(u64, &str)> = None;
        for (name, bw) in &bandwidths {
            match &best {
                Some((b, _)) if *bw <= *b => {}
                _ => best = Some((*bw, name)),
            }
        }
        assert_eq!(best.unwrap().1, "a");
    }
}
