use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{ParamKind, Tool, ToolSpec, WEB_FETCH_TOOL};
use crate::LitScoutError;

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const MAX_TEXT_CHARS: usize = 4_000;

/// Elements whose text never counts as page content.
const HIDDEN_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "svg", "template"];

static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("invalid title selector"));
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("invalid body selector"));

/// Text extracted from a fetched page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPage {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
}

/// Generic web fetcher. Unreachable hosts and non-2xx responses are failures.
pub struct WebFetchTool {
    client: Client,
}

impl WebFetchTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            WEB_FETCH_TOOL,
            "Fetch a web page and return its title and text content.",
        )
        .required("url", ParamKind::String, "Absolute http(s) URL to fetch")
        .optional(
            "timeout_secs",
            ParamKind::Integer,
            "Request timeout in seconds",
        )
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text under `root`; comments and hidden elements are skipped.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| HIDDEN_ELEMENTS.contains(&element.name()))
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    collapse(&parts.join(" "))
}

/// Reduce an HTML document to a title and readable text.
pub(crate) fn extract_page(url: &str, body: &str, is_html: bool) -> WebPage {
    if !is_html {
        return WebPage {
            url: url.to_string(),
            title: None,
            text: truncate(&collapse(body)),
        };
    }

    let document = Html::parse_document(body);
    let title = document
        .select(&TITLE)
        .next()
        .map(|element| collapse(&element.text().collect::<String>()))
        .filter(|t| !t.is_empty());
    let root = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element());

    WebPage {
        url: url.to_string(),
        title,
        text: truncate(&visible_text(root)),
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        WEB_FETCH_TOOL
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<String, LitScoutError> {
        let raw_url = arguments
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = Url::parse(raw_url).map_err(|err| {
            LitScoutError::provider(WEB_FETCH_TOOL, format!("invalid url `{raw_url}`: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LitScoutError::provider(
                WEB_FETCH_TOOL,
                format!("unsupported scheme `{}`", url.scheme()),
            ));
        }
        let timeout = arguments
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let response = self
            .client
            .get(url.clone())
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
            .map_err(|err| LitScoutError::provider(WEB_FETCH_TOOL, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LitScoutError::provider(
                WEB_FETCH_TOOL,
                format!("HTTP {} from {url}", status.as_u16()),
            ));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = response
            .text()
            .await
            .map_err(|err| LitScoutError::provider(WEB_FETCH_TOOL, err.to_string()))?;

        let page = extract_page(url.as_str(), &body, is_html);
        debug!(url = %page.url, chars = page.text.len(), "fetched web page");
        serde_json::to_string(&page).map_err(|err| LitScoutError::Other(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn html_is_reduced_to_text() {
        let html = r#"<html><head><title>Quantum &amp; Codes</title>
            <style>body { color: red; }</style></head>
            <body><h1>Error correction</h1><script>var x = 1;</script>
            <p>Logical   qubits&nbsp;survive.</p></body></html>"#;
        let page = extract_page("https://example.org", html, true);
        assert_eq!(page.title.as_deref(), Some("Quantum & Codes"));
        assert_eq!(page.text, "Error correction Logical qubits survive.");
    }

    #[test]
    fn numeric_entities_decode_and_markup_stays_out() {
        let html = r#"<html><head><title>Decoders &#8212; a review</title></head>
            <body><!-- <p>draft note</p> -->
            <p>Google&#8217;s chip &#x2014; below threshold.</p>
            <svg><text>axis label</text></svg></body></html>"#;
        let page = extract_page("https://example.org", html, true);
        assert_eq!(page.title.as_deref(), Some("Decoders \u{2014} a review"));
        assert_eq!(page.text, "Google\u{2019}s chip \u{2014} below threshold.");
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tool = WebFetchTool::new(Client::new());
        let mut args = Map::new();
        args.insert("url".into(), json!(format!("{}/missing", server.uri())));
        let err = tool.invoke(&args).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let tool = WebFetchTool::new(Client::new());
        let mut args = Map::new();
        args.insert("url".into(), json!("file:///etc/passwd"));
        assert!(tool.invoke(&args).await.is_err());
    }
}
