// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! XRD and JRD discovery documents, and the host-meta routes.
//!
//! JRD is served if the request path ends in `.jrd` or `.json`, or the
//! `format` query param is `jrd` or `json`. XRD is served for `.xrd`, `.xml`,
//! `format=xrd` or `format=xml`. Otherwise whichever of jrd|json and xrd|xml
//! comes first in the Accept header wins, falling back to the default.
//! Content types are from RFC 7033 section 10.2.

use super::host_url;
use crate::util::text::escape_html;
use crate::web::errors::HttpError;
use crate::web::params::Params;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

pub const JRD_CONTENT_TYPE: &str = "application/jrd+json";
pub const XRD_CONTENT_TYPE: &str = "application/xrd+xml; charset=utf-8";
pub const XRDS_CONTENT_TYPE: &str = "application/xrds+xml";

static JRD_ACCEPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("jrd|json").expect("valid jrd accept regex"));
static XRD_ACCEPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("xrd|xml").expect("valid xrd accept regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum XrdFormat {
    #[default]
    Jrd,
    Xrd,
}

/// Picks JRD or XRD for a request.
pub fn negotiate(path: &str, format: Option<&str>, headers: &HeaderMap, default: XrdFormat) -> XrdFormat {
    let format = format.unwrap_or_default().to_lowercase();
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .unwrap_or_default();

    if matches!(ext, "jrd" | "json") || matches!(format.as_str(), "jrd" | "json") {
        return XrdFormat::Jrd;
    } else if matches!(ext, "xrd" | "xml") || matches!(format.as_str(), "xrd" | "xml") {
        return XrdFormat::Xrd;
    }

    // not full content negotiation, just which comes first
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();
    let jrd = JRD_ACCEPT_RE.find(&accept).map(|m| m.start());
    let xrd = XRD_ACCEPT_RE.find(&accept).map(|m| m.start());
    match (jrd, xrd) {
        (Some(j), Some(x)) if j < x => XrdFormat::Jrd,
        (Some(_), None) => XrdFormat::Jrd,
        (Some(_), Some(_)) | (None, Some(_)) => XrdFormat::Xrd,
        (None, None) => default,
    }
}

/// A link in a JRD or XRD document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JrdLink {
    pub rel: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// A JSON Resource Descriptor, RFC 7033.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jrd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub links: Vec<JrdLink>,
}

impl Jrd {
    /// The equivalent XRD 1.0 document.
    pub fn to_xrd(&self) -> String {
        let mut xrd = String::from(
            "<?xml version='1.0' encoding='UTF-8'?>\n<XRD xmlns='http://docs.oasis-open.org/ns/xri/xrd-1.0' xmlns:xsi='http://www.w3.org/2001/XMLSchema-instance'>\n",
        );
        if let Some(subject) = &self.subject {
            xrd.push_str(&format!("<Subject>{}</Subject>\n", escape_html(subject, false)));
        }
        for alias in &self.aliases {
            xrd.push_str(&format!("<Alias>{}</Alias>\n", escape_html(alias, false)));
        }
        for (name, value) in &self.properties {
            match value {
                Some(value) => xrd.push_str(&format!(
                    "<Property type='{}'>{}</Property>\n",
                    escape_html(name, true),
                    escape_html(value, false)
                )),
                None => xrd.push_str(&format!(
                    "<Property type='{}' xsi:nil='true' />\n",
                    escape_html(name, true)
                )),
            }
        }
        for link in &self.links {
            xrd.push_str(&format!("<Link rel='{}'", escape_html(&link.rel, true)));
            for (attr, value) in [
                ("type", &link.media_type),
                ("href", &link.href),
                ("template", &link.template),
            ] {
                if let Some(value) = value {
                    xrd.push_str(&format!(" {attr}='{}'", escape_html(value, true)));
                }
            }
            xrd.push_str(" />\n");
        }
        xrd.push_str("</XRD>\n");
        xrd
    }
}

/// A resource served as JRD or XRD depending on the request.
pub trait XrdOrJrd {
    /// Served when the request doesn't ask for a format.
    const DEFAULT_FORMAT: XrdFormat = XrdFormat::Jrd;

    /// Builds the document. `host_url` is e.g. `https://example.com`.
    fn jrd(&self, host_url: &str, params: &Params) -> Result<Jrd, HttpError>;

    /// Builds the document and renders it in the negotiated format.
    fn respond(&self, uri: &Uri, headers: &HeaderMap, params: &Params) -> Response {
        let jrd = match self.jrd(&host_url(uri, headers), params) {
            Ok(jrd) => jrd,
            Err(err) => return err.into_response(),
        };
        match negotiate(uri.path(), params.get("format"), headers, Self::DEFAULT_FORMAT) {
            XrdFormat::Jrd => (
                [(header::CONTENT_TYPE, HeaderValue::from_static(JRD_CONTENT_TYPE))],
                Json(jrd),
            )
                .into_response(),
            XrdFormat::Xrd => (
                [(header::CONTENT_TYPE, HeaderValue::from_static(XRD_CONTENT_TYPE))],
                jrd.to_xrd(),
            )
                .into_response(),
        }
    }
}

/// `/.well-known/host-meta`, with an LRDD link to the site's WebFinger
/// endpoint plus any extra links.
#[derive(Debug, Clone, Default)]
pub struct HostMeta {
    pub links: Vec<JrdLink>,
}

impl HostMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(mut self, link: JrdLink) -> Self {
        self.links.push(link);
        self
    }

    /// Routes for `/.well-known/host-meta`, `/.well-known/host-meta.json`
    /// and `/.well-known/host-meta.xrds`.
    pub fn routes<S>(self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new()
            .route("/.well-known/host-meta", get(host_meta))
            .route("/.well-known/host-meta.json", get(host_meta))
            .route("/.well-known/host-meta.xrds", get(host_meta_xrds))
            .with_state(Arc::new(self))
    }

    /// XRDS-Simple version of the document.
    pub fn to_xrds(&self, host_url: &str) -> String {
        let mut xrds = String::from(concat!(
            "<?xml version='1.0' encoding='UTF-8'?>\n",
            "<XRDS xmlns='xri://$xrds'>\n",
            "<XRD xmlns='xri://$xrd*($v*2.0)' xmlns:simple='http://xrds-simple.net/core/1.0' version='2.0'>\n",
            "<Type>xri://$xrds*simple</Type>\n",
        ));
        xrds.push_str(&format!(
            "<Service>\n<Type>lrdd</Type>\n<URI>{}</URI>\n</Service>\n",
            escape_html(&webfinger_template(host_url), false)
        ));
        xrds.push_str("</XRD>\n</XRDS>\n");
        xrds
    }
}

fn webfinger_template(host_url: &str) -> String {
    format!("{host_url}/.well-known/webfinger?resource={{uri}}")
}

impl XrdOrJrd for HostMeta {
    fn jrd(&self, host_url: &str, _params: &Params) -> Result<Jrd, HttpError> {
        let mut links = vec![JrdLink {
            rel: "lrdd".to_string(),
            media_type: Some("application/json".to_string()),
            template: Some(webfinger_template(host_url)),
            ..Default::default()
        }];
        links.extend(self.links.iter().cloned());
        Ok(Jrd {
            links,
            ..Default::default()
        })
    }
}

fn cache_control() -> [(header::HeaderName, HeaderValue); 1] {
    [(header::CACHE_CONTROL, HeaderValue::from_static("max-age=300"))]
}

async fn host_meta(
    State(host_meta): State<Arc<HostMeta>>,
    uri: Uri,
    headers: HeaderMap,
    params: Params,
) -> Response {
    (cache_control(), host_meta.respond(&uri, &headers, &params)).into_response()
}

async fn host_meta_xrds(
    State(host_meta): State<Arc<HostMeta>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    (
        cache_control(),
        [(header::CONTENT_TYPE, HeaderValue::from_static(XRDS_CONTENT_TYPE))],
        host_meta.to_xrds(&host_url(&uri, &headers)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::extract::Request;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn accept(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_negotiate() {
        let none = HeaderMap::new();
        let default = XrdFormat::Jrd;
        assert_eq!(negotiate("/x.json", None, &none, XrdFormat::Xrd), XrdFormat::Jrd);
        assert_eq!(negotiate("/x.jrd", Some("xml"), &none, default), XrdFormat::Jrd);
        assert_eq!(negotiate("/x.xml", None, &none, default), XrdFormat::Xrd);
        assert_eq!(negotiate("/x", Some("XRD"), &none, default), XrdFormat::Xrd);
        assert_eq!(negotiate("/x", Some("json"), &accept("application/xrd+xml"), default), XrdFormat::Jrd);
        assert_eq!(negotiate("/x", None, &accept("application/xrd+xml"), default), XrdFormat::Xrd);
        assert_eq!(
            negotiate("/x", None, &accept("application/json, application/xml"), XrdFormat::Xrd),
            XrdFormat::Jrd
        );
        assert_eq!(
            negotiate("/x", None, &accept("text/xml, application/json"), default),
            XrdFormat::Xrd
        );
        assert_eq!(negotiate("/x", None, &accept("text/html"), XrdFormat::Xrd), XrdFormat::Xrd);
        assert_eq!(negotiate("/a.b/x", None, &none, default), XrdFormat::Jrd);
    }

    #[test]
    fn test_to_xrd() {
        let jrd = Jrd {
            subject: Some("acct:me@site.com".to_string()),
            aliases: vec!["https://site.com/".to_string()],
            properties: BTreeMap::new(),
            links: vec![JrdLink {
                rel: "self".to_string(),
                media_type: Some("text/html".to_string()),
                href: Some("https://site.com/?a=b&c=d".to_string()),
                template: None,
            }],
        };
        assert_eq!(
            jrd.to_xrd(),
            "<?xml version='1.0' encoding='UTF-8'?>\n\
             <XRD xmlns='http://docs.oasis-open.org/ns/xri/xrd-1.0' xmlns:xsi='http://www.w3.org/2001/XMLSchema-instance'>\n\
             <Subject>acct:me@site.com</Subject>\n\
             <Alias>https://site.com/</Alias>\n\
             <Link rel='self' type='text/html' href='https://site.com/?a=b&amp;c=d' />\n\
             </XRD>\n"
        );
    }

    async fn fetch(app: &Router, uri: &str, accept: Option<&str>) -> (StatusCode, HeaderMap, String) {
        let mut builder = Request::builder().uri(uri).header(header::HOST, "site.com");
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_host_meta_routes() {
        let app: Router = HostMeta::new().routes();

        let (status, headers, body) = fetch(&app, "/.well-known/host-meta", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], JRD_CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "max-age=300");
        let jrd: Jrd = serde_json::from_str(&body).unwrap();
        assert_eq!(
            jrd.links[0].template.as_deref(),
            Some("http://site.com/.well-known/webfinger?resource={uri}")
        );

        let (_, headers, body) = fetch(&app, "/.well-known/host-meta", Some("application/xrd+xml")).await;
        assert_eq!(headers[header::CONTENT_TYPE], XRD_CONTENT_TYPE);
        assert!(body.contains("<Link rel='lrdd' type='application/json' template='http://site.com/.well-known/webfinger?resource={uri}' />"));

        let (_, headers, _) = fetch(&app, "/.well-known/host-meta.json", Some("text/xml")).await;
        assert_eq!(headers[header::CONTENT_TYPE], JRD_CONTENT_TYPE);

        let (status, headers, body) = fetch(&app, "/.well-known/host-meta.xrds", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], XRDS_CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "max-age=300");
        assert!(body.contains("<URI>http://site.com/.well-known/webfinger?resource={uri}</URI>"));
    }
}
