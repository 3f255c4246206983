//! Stable identifiers for items that arrive without one.

use cryptfeed_shared::RecordId;
use sha2::{Digest, Sha256};
use url::Url;

/// Hex-encoded SHA-256 of `content`.
pub(crate) fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalise a link so trivially different URLs of one article compare equal.
///
/// Drops the fragment, `utm_*` tracking parameters, and a trailing slash.
/// Scheme and host are lower-cased by the URL parser. Unparseable input is
/// returned trimmed.
pub(crate) fn canonical_link(link: &str) -> String {
    let trimmed = link.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

/// Pick the identifier for a feed item.
///
/// Preference: upstream GUID, then a hash of the canonical link, then a hash
/// of the title. `None` when the item carries none of them.
pub(crate) fn derive_article_id(
    guid: Option<&str>,
    link: Option<&str>,
    title: Option<&str>,
) -> Option<RecordId> {
    fn non_blank(s: Option<&str>) -> Option<&str> {
        s.map(str::trim).filter(|s| !s.is_empty())
    }

    if let Some(guid) = non_blank(guid) {
        return Some(RecordId::new(guid));
    }
    if let Some(link) = non_blank(link) {
        return Some(RecordId::new(sha256_hex(&canonical_link(link))));
    }
    non_blank(title).map(|t| RecordId::new(sha256_hex(t)))
}
