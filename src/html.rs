// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTML fetching and parsing helpers.

use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestOptions};
use crate::util::urls::{fragmentless, UrlParts};
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::info;

static META_REFRESH: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[http-equiv="refresh"]"#).expect("valid meta refresh selector")
});

static WITH_ID: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[id]").expect("valid id selector"));

/// Parses an HTML document.
///
/// [`Html`] is not `Send`, so parse, extract and drop it between awaits.
pub fn parse_html(text: &str) -> Html {
    Html::parse_document(text)
}

/// Extracts the URL from a `<meta http-equiv="refresh">` content value, e.g.
/// `0; URL='http://foo/'`. Returns an empty string if there's no `URL=`.
pub fn parse_http_equiv(content: &str) -> String {
    match content.rsplit_once("URL=") {
        Some((_, url)) => url.trim_matches('\'').to_string(),
        None => String::new(),
    }
}

/// Returns the URL of a document's `<meta http-equiv="refresh">` tag, or an
/// empty string if it doesn't have one.
pub fn fetch_http_equiv(html: &Html) -> String {
    html.select(&META_REFRESH)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(parse_http_equiv)
        .unwrap_or_default()
}

/// Outer HTML of the element with the given id, if any.
pub fn element_by_id(html: &Html, id: &str) -> Option<String> {
    html.select(&WITH_ID)
        .find(|e| e.value().id() == Some(id))
        .map(|e| e.html())
}

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedHtml {
    /// Final URL after redirects
    pub url: String,
    /// The page, or just the element named by the URL's fragment. `None` if
    /// there's a fragment and no element has that id.
    pub html: Option<String>,
}

/// Fetches an HTML page.
///
/// The URL is fetched without its fragment. If it has one, only the element
/// with that id is returned. If `require_backlink` is non-empty, one of its
/// strings must appear somewhere in the page, else this errors.
pub async fn fetch_html(
    client: &HttpClient,
    url: &str,
    require_backlink: &[&str],
    opts: RequestOptions,
) -> Result<FetchedHtml> {
    let resp = client
        .get(&fragmentless(url), opts)
        .await?
        .error_for_status()?;
    let text = resp.text();

    if !require_backlink.is_empty() && !require_backlink.iter().any(|link| text.contains(link)) {
        return Err(Error::InvalidValue(format!(
            "Couldn't find {require_backlink:?} in {url}"
        )));
    }

    let fragment = UrlParts::split(url).map(|p| p.fragment).unwrap_or_default();
    let html = if fragment.is_empty() {
        Some(text)
    } else {
        info!(id = %fragment, "Extracting just DOM element");
        element_by_id(&parse_html(&text), &fragment)
    };

    Ok(FetchedHtml { url: resp.url, html })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_equiv() {
        assert_eq!(parse_http_equiv("0; URL='http://foo/bar'"), "http://foo/bar");
        assert_eq!(parse_http_equiv("0;URL=http://foo/bar"), "http://foo/bar");
        assert_eq!(parse_http_equiv("0; url=http://foo"), "");
        assert_eq!(parse_http_equiv(""), "");
    }

    #[test]
    fn test_fetch_http_equiv() {
        let html = parse_html(
            r#"<html><head><meta http-equiv="refresh" content="0;URL='http://a/b'"></head></html>"#,
        );
        assert_eq!(fetch_http_equiv(&html), "http://a/b");

        let html = parse_html(r#"<html><head><meta http-equiv="refresh"></head></html>"#);
        assert_eq!(fetch_http_equiv(&html), "");
        assert_eq!(fetch_http_equiv(&parse_html("<p>hi</p>")), "");
    }

    #[test]
    fn test_element_by_id() {
        let html = parse_html(r#"<div><p id="a">one</p><p id="b">two</p></div>"#);
        assert_eq!(element_by_id(&html, "b").as_deref(), Some(r#"<p id="b">two</p>"#));
        assert_eq!(element_by_id(&html, "c"), None);
    }
}
