use url::Url;

use crate::error::EngineError;

/// Create an absolute url from a possibly relative url and a base url.
pub fn make_absolute_url(base: &Url, url: &str) -> Result<Url, EngineError> {
    match Url::parse(url) {
        Ok(u) => Ok(u),
        Err(e) if e == url::ParseError::RelativeUrlWithoutBase => Ok(base.join(url)?),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_relative_url_against_base() {
        let base = Url::parse("https://host/path/index.m3u8").unwrap();
        let joined = make_absolute_url(&base, "segment_001.ts").unwrap();
        assert_eq!(joined.as_str(), "https://host/path/segment_001.ts");
    }

    #[test]
    fn keeps_absolute_url_unchanged() {
        let base = Url::parse("https://host/path/index.m3u8").unwrap();
        let joined = make_absolute_url(&base, "https://other/seg.ts").unwrap();
        assert_eq!(joined.as_str(), "https://other/seg.ts");
    }
}
