//! Purpose: Build request URLs from a base URL and raw path segments.
//! Exports: `build_url`.
//! Role: Shared by the gateway client and the HTTP document store.
//! Invariants: Each segment is percent-encoded as one path segment; `/` never splits an id.
use url::Url;

use crate::core::error::{Error, ErrorKind};

/// Replaces the path of `base_url` with `segments`.
///
/// `what` names the base in the error, e.g. "store url".
pub fn build_url(base_url: &Url, segments: &[&str], what: &str) -> Result<Url, Error> {
    let mut url = base_url.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| Error::new(ErrorKind::Usage).with_message(format!("{what} cannot be a base")))?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::build_url;
    use crate::core::error::ErrorKind;
    use url::Url;

    #[test]
    fn segments_replace_the_base_path() {
        let base = Url::parse("http://localhost:3000/ignored").expect("url");
        let url = build_url(&base, &["records", "card::42"], "base url").expect("url");
        assert_eq!(url.as_str(), "http://localhost:3000/records/card::42");
        let url = build_url(&base, &["records", "a/b"], "base url").expect("url");
        assert_eq!(url.as_str(), "http://localhost:3000/records/a%2Fb");
    }

    #[test]
    fn opaque_urls_are_rejected() {
        let base = Url::parse("mailto:someone@example.com").expect("url");
        let err = build_url(&base, &["records"], "gateway url").expect_err("cannot be a base");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.message(), Some("gateway url cannot be a base"));
    }
}
