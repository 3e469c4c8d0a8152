//! Stable page identifiers derived from URLs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Strip the fragment so `/a#top` and `/a` address the same page.
fn strip_fragment(url: &str) -> &str {
    match url.find('#') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Derive the page id for a URL.
///
/// The id is the fragment-less URL encoded as URL-safe base64 without
/// padding, so it is stable across crawls and reversible.
pub fn page_id_for_url(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(strip_fragment(url.trim()).as_bytes())
}

/// Recover the URL a page id was derived from.
pub fn url_for_page_id(page_id: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(page_id).ok()?;
    String::from_utf8(bytes).ok()
}
