//! Web tools - fetch pages and call HTTP APIs

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Method, Url};
use tracing::debug;

use super::{Args, ParamSpec, ParamType, SideEffect, Tool, ToolOutput, ToolSpec};
use crate::error::ToolError;

const USER_AGENT: &str = concat!("codeagent/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 120;
const MAX_BODY_CHARS: usize = 50_000;
const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Accepts `example.com/x` as https; anything but http(s) is refused.
fn parse_url(raw: &str) -> Result<Url, ToolError> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&with_scheme).map_err(|e| ToolError::invalid_args(format!("invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ToolError::invalid_args(format!(
            "only http and https URLs are supported, got {other}"
        ))),
    }
}

fn client(timeout: Duration) -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ToolError::execution(format!("failed to create HTTP client: {e}")))
}

fn timeout_from(args: &Args) -> Duration {
    Duration::from_secs(args.u64_or("timeout", DEFAULT_TIMEOUT_SECS).clamp(1, MAX_TIMEOUT_SECS))
}

fn request_failure(err: &reqwest::Error, timeout: Duration) -> ToolError {
    if err.is_timeout() {
        ToolError::execution(format!("request timed out after {}s", timeout.as_secs()))
    } else {
        ToolError::execution(format!("request failed: {err}"))
    }
}

fn clip(mut text: String, marker: &str) -> String {
    if let Some((cut, _)) = text.char_indices().nth(MAX_BODY_CHARS) {
        text.truncate(cut);
        text.push_str(marker);
    }
    text
}

/// Pretty JSON when the body parses, the raw text otherwise.
fn pretty_json(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| body.to_string())
}

struct HtmlPatterns {
    script: Regex,
    style: Regex,
    line_break: Regex,
    block: Regex,
    tag: Regex,
    blank_lines: Regex,
    spaces: Regex,
}

fn html_patterns() -> Option<&'static HtmlPatterns> {
    static PATTERNS: OnceLock<Option<HtmlPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(HtmlPatterns {
                script: Regex::new(r"(?is)<script[^>]*>.*?</script>").ok()?,
                style: Regex::new(r"(?is)<style[^>]*>.*?</style>").ok()?,
                line_break: Regex::new(r"(?i)<br\s*/?>").ok()?,
                block: Regex::new(r"(?i)</?(p|div|h[1-6]|li|tr)(\s[^>]*)?>").ok()?,
                tag: Regex::new(r"<[^>]+>").ok()?,
                blank_lines: Regex::new(r"\n[ \t]*(\n[ \t]*)+").ok()?,
                spaces: Regex::new(r"[ \t]+").ok()?,
            })
        })
        .as_ref()
}

/// Readable text from an HTML page.
pub(crate) fn html_to_text(html: &str) -> String {
    let Some(p) = html_patterns() else {
        return html.to_string();
    };
    let text = p.script.replace_all(html, "");
    let text = p.style.replace_all(&text, "");
    let text = p.line_break.replace_all(&text, "\n");
    let text = p.block.replace_all(&text, "\n");
    let text = p.tag.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = p.spaces.replace_all(&text, " ");
    let text = p.blank_lines.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Fetch a URL as text
#[derive(Debug, Default)]
pub struct WebFetchTool;

impl WebFetchTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_fetch",
            description: "Fetch a URL and return its content as text. HTML is reduced to readable text, \
                          JSON is pretty-printed. Useful for documentation and API responses.",
            params: vec![
                ParamSpec::required("url", ParamType::String, "URL to fetch (https:// is assumed when missing)"),
                ParamSpec::optional("timeout", ParamType::Integer, "Timeout in seconds (default 30, max 120)"),
            ],
            effect: SideEffect::ReadOnly,
        }
    }

    fn preflight(&self, args: &Args) -> Result<(), ToolError> {
        parse_url(args.str("url")?).map(|_| ())
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let url = parse_url(args.str("url")?)?;
        let timeout = timeout_from(&args);
        debug!(%url, "fetching");

        let response = client(timeout)?
            .get(url.clone())
            .send()
            .await
            .map_err(|e| request_failure(&e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::execution(format!(
                "HTTP error {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown")
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = response
            .text()
            .await
            .map_err(|e| request_failure(&e, timeout))?;

        let content = if content_type.contains("application/json") {
            pretty_json(&body)
        } else if content_type.contains("text/html") {
            html_to_text(&body)
        } else {
            body
        };
        let content = clip(content, "\n\n... (content truncated)");
        Ok(ToolOutput::text(format!("URL: {url}\nStatus: {}\n\n{content}", status.as_u16())))
    }
}

/// Call an HTTP endpoint with any common method
#[derive(Debug, Default)]
pub struct HttpRequestTool;

impl HttpRequestTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "http_request",
            description: "Send an HTTP request to an API and return status, headers and body. \
                          Anything other than GET asks for confirmation.",
            params: vec![
                ParamSpec::required("url", ParamType::String, "Request URL"),
                ParamSpec::optional("method", ParamType::String, "HTTP method (default GET)").one_of(METHODS),
                ParamSpec::optional("headers", ParamType::Object, "Request headers, e.g. {\"Authorization\": \"Bearer ...\"}"),
                ParamSpec::optional("body", ParamType::String, "Request body; JSON bodies get a JSON content type"),
                ParamSpec::optional("timeout", ParamType::Integer, "Timeout in seconds (default 30, max 120)"),
            ],
            effect: SideEffect::Destructive,
        }
    }

    /// GET only reads; every other method changes something on a remote.
    fn effect_for(&self, args: &Args) -> SideEffect {
        match args.opt_str("method").unwrap_or("GET") {
            "GET" => SideEffect::ReadOnly,
            _ => SideEffect::Destructive,
        }
    }

    fn preflight(&self, args: &Args) -> Result<(), ToolError> {
        parse_url(args.str("url")?).map(|_| ())
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let url = parse_url(args.str("url")?)?;
        let method_name = args.opt_str("method").unwrap_or("GET");
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| ToolError::invalid_args(format!("unsupported method {method_name}")))?;
        let timeout = timeout_from(&args);

        let mut request = client(timeout)?.request(method, url.clone());
        let mut has_content_type = false;
        if let Some(headers) = args.object("headers") {
            for (name, value) in headers {
                has_content_type |= name.eq_ignore_ascii_case("content-type");
                let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                request = request.header(name.as_str(), value);
            }
        }
        if let Some(body) = args.opt_str("body") {
            if !has_content_type && serde_json::from_str::<serde_json::Value>(body).is_ok() {
                request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
            }
            request = request.body(body.to_string());
        }
        debug!(%url, method = method_name, "http request");

        let response = request.send().await.map_err(|e| request_failure(&e, timeout))?;
        let status = response.status();
        let mut out = format!(
            "Status: {} {}\nURL: {}\n\nResponse Headers:\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            response.url()
        );
        for (name, value) in response.headers() {
            out.push_str(&format!("  {name}: {}\n", value.to_str().unwrap_or("<binary>")));
        }
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let body = response
            .text()
            .await
            .map_err(|e| request_failure(&e, timeout))?;
        let body = if is_json { pretty_json(&body) } else { body };

        out.push_str("\nResponse Body:\n");
        if body.is_empty() {
            out.push_str("(empty body)");
        } else {
            out.push_str(&clip(body, "\n\n... (body truncated)"));
        }
        Ok(ToolOutput::text(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_parse_url() {
        assert_eq!(parse_url("example.com/docs").unwrap().as_str(), "https://example.com/docs");
        assert_eq!(parse_url("http://localhost:8080").unwrap().scheme(), "http");
        let err = parse_url("ftp://example.com").unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgs);
        assert!(parse_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><style>p{color:red}</style><script>alert(1)</script></head>\
                    <body><h1>Title</h1><p>Hello&nbsp;&amp; welcome<br>line two</p></body></html>";
        let text = html_to_text(html);
        assert!(text.starts_with("Title"));
        assert!(text.contains("Hello & welcome\nline two"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/page");
                then.status(200)
                    .header("content-type", "text/html; charset=utf-8")
                    .body("<p>Install with <b>cargo</b></p>");
            })
            .await;
        let out = WebFetchTool::new()
            .execute(Args::new(json!({"url": server.url("/page")})))
            .await
            .unwrap();
        assert!(out.text.contains("Status: 200"));
        assert!(out.text.ends_with("Install with cargo"));
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/missing");
                then.status(404);
            })
            .await;
        let err = WebFetchTool::new()
            .execute(Args::new(json!({"url": server.url("/missing")})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ExecutionFailure);
        assert!(err.message.contains("404"));
    }

    #[tokio::test]
    async fn test_http_request_posts_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/items")
                    .header("content-type", "application/json")
                    .header("x-token", "abc")
                    .json_body(json!({"name": "widget"}));
                then.status(201)
                    .header("content-type", "application/json")
                    .body(r#"{"id":7}"#);
            })
            .await;
        let out = HttpRequestTool::new()
            .execute(Args::new(json!({
                "url": server.url("/items"),
                "method": "POST",
                "headers": {"X-Token": "abc"},
                "body": "{\"name\": \"widget\"}",
            })))
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(out.text.starts_with("Status: 201 Created"));
        assert!(out.text.contains("\"id\": 7"));
    }

    #[test]
    fn test_http_request_effect_by_method() {
        let tool = HttpRequestTool::new();
        let effect = |v| tool.effect_for(&Args::new(v));
        assert_eq!(effect(json!({"url": "x"})), SideEffect::ReadOnly);
        assert_eq!(effect(json!({"url": "x", "method": "GET"})), SideEffect::ReadOnly);
        assert_eq!(effect(json!({"url": "x", "method": "DELETE"})), SideEffect::Destructive);
    }
}
