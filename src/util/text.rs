// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Link detection and text rendering helpers.

use crate::util::data::uniquify;
use crate::util::urls::{unquote_plus, UrlParts};
use regex::Regex;
use std::sync::LazyLock;

/// ASCII punctuation except `-` and `.`, which are allowed in hosts.
pub const PUNCT: &str = "!\"#$%&'()*+,/:;<=>?@[\\]^_`{|}~";

const SCHEME_RE: &str = r"\b(?:[a-z]{3,9}:/{1,3})";
const PATH_QUERY_RE: &str = r"(?:(?:/[\w/.\-_~.;:%?@$\#\&()=+]*)|\b)";

/// `PUNCT` escaped for use inside a character class.
fn punct_class() -> String {
    PUNCT
        .chars()
        .map(|c| match c {
            '<' | '>' => c.to_string(),
            _ => format!("\\{c}"),
        })
        .collect()
}

fn host_re() -> String {
    format!(r"(?:[^\s{}])+(?::\d{{2,6}})?", punct_class())
}

fn domain_re() -> String {
    format!(r"(?:[^\s.{}]+\.)+[a-z]{{2,}}(?::\d{{2,6}})?", punct_class())
}

/// Full URL with a scheme.
pub static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i){SCHEME_RE}{}{PATH_QUERY_RE}", host_re())).expect("valid URL regex")
});

/// URL or bare domain link, scheme optional.
pub static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i){SCHEME_RE}?{}{PATH_QUERY_RE}", domain_re()))
        .expect("valid link regex")
});

/// A whole string that is a valid host, optionally with port.
pub static FULL_HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{}$", host_re())).expect("valid host regex")
});

static BARE_CC_TLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^[^\s{}]+\.[a-z]{{2}}$", punct_class())).expect("valid cc TLD regex")
});

/// Escapes `&`, `<` and `>`, plus quotes if `quote` is set.
pub fn escape_html(s: &str, quote: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quote => out.push_str("&quot;"),
            '\'' if quote => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Splits text into link and non-link text.
///
/// Returns `(links, splits)`, where `splits` has one more element than
/// `links` and they interleave: `splits[0] links[0] splits[1] ...`.
/// Trailing punctuation is moved out of links, allowing one `(`…`)` pair.
/// With `skip_html_links`, links in `<a>` tag attributes or text are left
/// as text. With `skip_bare_cc_tlds`, so are scheme-less `domain.xx` links.
pub fn tokenize_links(
    text: &str,
    skip_bare_cc_tlds: bool,
    skip_html_links: bool,
    require_scheme: bool,
) -> (Vec<String>, Vec<String>) {
    let regex = if require_scheme { &*URL_RE } else { &*LINK_RE };

    let mut links = Vec::new();
    let mut splits = Vec::new();
    let mut last = 0;
    for m in regex.find_iter(text) {
        splits.push(text[last..m.start()].to_string());
        links.push(m.as_str().to_string());
        last = m.end();
    }
    splits.push(text[last..].to_string());

    let mut skipped = vec![false; links.len()];
    for ii in 0..links.len() {
        let link = &links[ii];
        let has_open_paren = link.contains('(');
        let mut end = link.len();
        while let Some(c) = link[..end].chars().next_back() {
            if ".!?,;:)".contains(c) && (c != ')' || !has_open_paren) {
                end -= c.len_utf8();
            } else {
                break;
            }
        }
        if end < link.len() {
            let trailing = link[end..].to_string();
            splits[ii + 1].insert_str(0, &trailing);
            links[ii].truncate(end);
        }

        let before = splits[ii].trim();
        let in_html = skip_html_links
            && (before.ends_with("=\"")
                || before.ends_with("='")
                || splits[ii + 1].trim().starts_with("</a"));
        if in_html || (skip_bare_cc_tlds && BARE_CC_TLD_RE.is_match(&links[ii])) {
            let link = links[ii].clone();
            splits[ii].push_str(&link);
            skipped[ii] = true;
        }
    }

    for ii in (0..links.len()).rev() {
        if skipped[ii] {
            let next = splits.remove(ii + 1);
            splits[ii].push_str(&next);
            links.remove(ii);
        }
    }

    (links, splits)
}

/// Options for [`pretty_link`].
#[derive(Debug, Clone)]
pub struct PrettyLink {
    /// Link text. Defaults to a shortened form of the URL.
    pub text: Option<String>,
    /// Added to the beginning of the text
    pub text_prefix: Option<String>,
    /// Keep the host in the default link text
    pub keep_host: bool,
    /// Glyphicon name rendered after the text
    pub glyphicon: Option<String>,
    /// Extra `<a>` attributes
    pub attrs: Vec<(String, String)>,
    /// Adds `target="_blank"`
    pub new_tab: bool,
    /// Max text length in characters before ellipsizing. `Some(0)` disables.
    pub max_length: Option<usize>,
}

impl Default for PrettyLink {
    fn default() -> Self {
        Self {
            text: None,
            text_prefix: None,
            keep_host: true,
            glyphicon: None,
            attrs: Vec::new(),
            new_tab: false,
            max_length: None,
        }
    }
}

/// Renders a short HTML link to a URL.
///
/// Without explicit text, the text is the URL minus `http(s)://` and `www.`,
/// unquoted, and ellipsized past the host plus 15 characters.
pub fn pretty_link(url: &str, opts: &PrettyLink) -> String {
    let (text, max_length) = match opts.text.as_deref().filter(|t| !t.is_empty()) {
        Some(text) => (text.to_string(), opts.max_length.unwrap_or(30)),
        None => {
            let parts = UrlParts::split(url).unwrap_or_default();
            let mut text = url
                .strip_prefix(&format!("{}://", parts.scheme))
                .unwrap_or(url)
                .to_string();
            let mut host_len = parts.netloc.chars().count() as i64;
            let has_params = parts.path.rsplit('/').next().is_some_and(|s| s.contains(';'));

            if opts.keep_host && !has_params && parts.query.is_empty() && parts.fragment.is_empty() {
                text = text.trim_matches('/').to_string();
            } else if !opts.keep_host {
                text = text.chars().skip(host_len as usize + 1).collect();
                host_len = 0;
            }
            if let Some(rest) = text.strip_prefix("www.") {
                text = rest.to_string();
                host_len -= 4;
            }

            let max_length = opts
                .max_length
                .unwrap_or_else(|| (host_len + 15).max(0) as usize);
            (unquote_plus(&text), max_length)
        }
    };

    let full_text = text.clone();
    let text = if max_length > 0 && text.chars().count() > max_length {
        format!("{}...", text.chars().take(max_length).collect::<String>())
    } else {
        text
    };

    let mut escaped = escape_html(&text, false);
    if let Some(prefix) = opts.text_prefix.as_deref().filter(|p| !p.is_empty()) {
        escaped = format!("{prefix} {escaped}");
    }
    if let Some(glyphicon) = &opts.glyphicon {
        escaped.push_str(&format!(r#" <span class="glyphicon glyphicon-{glyphicon}"></span>"#));
    }

    let title = if text.ends_with("...") {
        format!(r#"title="{full_text}" "#)
    } else {
        String::new()
    };
    let attrs: String = opts
        .attrs
        .iter()
        .map(|(attr, val)| format!(r#"{attr}="{val}" "#))
        .collect();
    let target = if opts.new_tab { r#"target="_blank" "# } else { "" };
    let href = url.replace('<', "%3C").replace('>', "%3E");

    format!(r#"<a {title}{attrs}{target}href="{href}">{escaped}</a>"#)
}

/// Adds HTML links to URLs in plain text.
///
/// Links already inside `<a>` tags are left alone. With `pretty`, link text
/// is rendered by [`pretty_link`] using `opts`.
pub fn linkify(text: &str, pretty: bool, skip_bare_cc_tlds: bool, opts: &PrettyLink) -> String {
    let (links, splits) = tokenize_links(text, skip_bare_cc_tlds, true, false);
    let mut result = String::with_capacity(text.len());

    for (link, split) in links.iter().zip(&splits) {
        result.push_str(split);
        let href = if link.starts_with("http://") || link.starts_with("https://") {
            link.clone()
        } else {
            format!("http://{link}")
        };
        if pretty {
            result.push_str(&pretty_link(&href, opts));
        } else {
            result.push_str(&format!(r#"<a href="{href}">{link}</a>"#));
        }
    }
    if let Some(last) = splits.last() {
        result.push_str(last);
    }
    result
}

/// Returns the unique links with schemes in text, in order of appearance.
pub fn extract_links(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    uniquify(tokenize_links(text, false, false, true).0)
}

/// Truncates and ellipsizes `s` if it's longer than `words` or `chars`.
///
/// Words are split on whitespace.
pub fn ellipsize(s: &str, words: usize, chars: usize) -> String {
    let split: Vec<&str> = s.split_whitespace().collect();
    if split.len() <= words && s.chars().count() <= chars {
        return s.to_string();
    }
    let joined = split[..words.min(split.len())].join(" ");
    let truncated: String = joined.chars().take(chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}
