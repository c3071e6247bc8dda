//! Provider-agnostic plumbing shared across vendor adapters.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::Stream;
use futures_util::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::setting::{CustomBody, CustomHeader, ProviderCommon, ProxyConfig};
use crate::key_roulette::KeyRoulette;
use crate::message::{MessageChunk, ToolPart, UIMessage, UIMessagePart};

/// Standard User-Agent header for relay API requests.
pub const USER_AGENT: &str = concat!("relay/", env!("CARGO_PKG_VERSION"));

/// Categories of provider errors for consistent error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection timeout or request timeout
    Timeout,
    /// Connection dropped or DNS failure
    Transport,
    /// Failed to parse a buffered response
    Parse,
    /// API-level error returned by the provider (e.g., overloaded, `rate_limit`)
    ApiError,
    /// The provider sent something this client refuses to handle
    Protocol,
    /// Operation not offered by this provider
    Unsupported,
    /// Missing keys, bad base URL, bad proxy
    Config,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderErrorKind::HttpStatus => "http_status",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Parse => "parse",
            ProviderErrorKind::ApiError => "api_error",
            ProviderErrorKind::Protocol => "protocol",
            ProviderErrorKind::Unsupported => "unsupported",
            ProviderErrorKind::Config => "config",
        };
        f.write_str(label)
    }
}

/// Structured error from the provider with kind and details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    /// Error category
    pub kind: ProviderErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
    /// HTTP status, for `HttpStatus` errors
    pub status: Option<u16>,
}

impl ProviderError {
    /// Creates a new provider error.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            status: None,
        }
    }

    /// Creates an HTTP status error, keeping the raw body as details.
    pub fn http_status(status: u16, body: &str) -> Self {
        // Prefer the vendor's own message when the body is a JSON error object
        let vendor_message = serde_json::from_str::<Value>(body).ok().and_then(|json| {
            let error = json.get("error")?;
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map(str::to_string)
        });
        let message = match vendor_message {
            Some(msg) => format!("HTTP {status}: {msg}"),
            None => format!("HTTP {status}"),
        };
        Self {
            kind: ProviderErrorKind::HttpStatus,
            message,
            details: (!body.is_empty()).then(|| body.to_string()),
            status: Some(status),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    /// Creates an API error (from mid-stream error event).
    pub fn api_error(error_type: &str, message: &str) -> Self {
        Self::new(
            ProviderErrorKind::ApiError,
            format!("{error_type}: {message}"),
        )
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Protocol, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Parse, message)
    }

    pub fn unsupported(provider: &str, operation: &str) -> Self {
        Self::new(
            ProviderErrorKind::Unsupported,
            format!("{operation} is not supported by {provider}"),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Config, message)
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Boxed stream of message chunks. Dropping it closes the connection.
pub type ChunkStream = BoxStream<'static, ProviderResult<MessageChunk>>;

pub(crate) fn classify_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProviderError::new(
            ProviderErrorKind::Transport,
            format!("Connection failed: {e}"),
        )
    } else if e.is_decode() {
        ProviderError::parse(format!("Failed to decode response: {e}"))
    } else {
        ProviderError::new(ProviderErrorKind::Transport, format!("Network error: {e}"))
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Timeouts applied to every provider client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    /// Per-read timeout; generation can be slow, so this is minutes.
    pub read_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(600),
        }
    }
}

/// Shared connection pools: one default client plus one per proxy.
pub struct HttpTransport {
    options: TransportOptions,
    default_client: reqwest::Client,
    proxied: Mutex<HashMap<ProxyConfig, reqwest::Client>>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(options: TransportOptions) -> ProviderResult<Self> {
        let default_client = build_client(options, None)?;
        Ok(Self {
            options,
            default_client,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> TransportOptions {
        self.options
    }

    /// Client to use for a provider, honoring its proxy.
    ///
    /// # Errors
    /// Returns a `Config` error for an invalid proxy URL.
    pub fn client_for(&self, proxy: Option<&ProxyConfig>) -> ProviderResult<reqwest::Client> {
        let Some(proxy) = proxy else {
            return Ok(self.default_client.clone());
        };

        let mut proxied = self.proxied.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = proxied.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(self.options, Some(proxy))?;
        proxied.insert(proxy.clone(), client.clone());
        Ok(client)
    }
}

fn build_client(
    options: TransportOptions,
    proxy: Option<&ProxyConfig>,
) -> ProviderResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(options.connect_timeout)
        .read_timeout(options.read_timeout);

    if let Some(proxy) = proxy {
        let mut p = reqwest::Proxy::all(&proxy.url).map_err(|e| {
            ProviderError::config(format!("Invalid proxy URL {}: {e}", proxy.url))
        })?;
        if let Some(username) = &proxy.username {
            p = p.basic_auth(username, proxy.password.as_deref().unwrap_or_default());
        }
        builder = builder.proxy(p);
    }

    builder
        .build()
        .map_err(|e| ProviderError::config(format!("Failed to build HTTP client: {e}")))
}

// ============================================================================
// Config resolution helpers
// ============================================================================

/// Environment variable name for a provider-scoped override.
///
/// `deep-seek` + `API_KEYS` becomes `RELAY_DEEP_SEEK_API_KEYS`.
pub fn provider_env_var(provider_id: &str, suffix: &str) -> String {
    let normalized: String = provider_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("RELAY_{normalized}_{suffix}")
}

/// API keys with precedence: config list > env var (comma/whitespace separated).
pub fn resolve_api_keys(common: &ProviderCommon) -> Vec<String> {
    let configured: Vec<String> = common
        .api_keys
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();
    if !configured.is_empty() {
        return configured;
    }

    std::env::var(provider_env_var(&common.id, "API_KEYS"))
        .map(|raw| {
            raw.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Base URL with precedence: env > config > default. Trailing slashes are removed.
///
/// # Errors
/// Returns a `Config` error if the chosen URL is not an http(s) URL.
pub fn resolve_base_url(common: &ProviderCommon, default_url: &str) -> ProviderResult<String> {
    let from_env = std::env::var(provider_env_var(&common.id, "BASE_URL")).ok();
    let chosen = [from_env.as_deref(), common.base_url.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|url| !url.is_empty())
        .unwrap_or(default_url);

    validate_url(chosen, &common.id)?;
    Ok(chosen.trim_end_matches('/').to_string())
}

fn validate_url(url: &str, provider_id: &str) -> ProviderResult<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ProviderError::config(format!("Invalid {provider_id} base URL {url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProviderError::config(format!(
            "Invalid {provider_id} base URL {url}: scheme must be http or https"
        )));
    }
    Ok(())
}

/// Picks the next key for the provider through the shared roulette.
///
/// # Errors
/// Returns a `Config` error when the provider has no keys.
pub(crate) fn select_api_key(
    roulette: &KeyRoulette,
    common: &ProviderCommon,
) -> ProviderResult<String> {
    let keys = resolve_api_keys(common);
    roulette
        .next(&common.id, &keys)
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::config(format!(
                "No API key available for provider '{}'. Set api_keys or {}.",
                common.id,
                provider_env_var(&common.id, "API_KEYS")
            ))
        })
}

// ============================================================================
// Request customisation
// ============================================================================

/// Applies custom headers in order, overriding vendor defaults.
pub(crate) fn apply_custom_headers<'a>(
    headers: &mut HeaderMap,
    custom: impl IntoIterator<Item = &'a CustomHeader>,
) {
    for header in custom {
        let name = HeaderName::from_bytes(header.name.trim().as_bytes());
        let value = HeaderValue::from_str(header.value.trim());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %header.name, "skipping invalid custom header"),
        }
    }
}

/// Deep-merges custom body fields into a vendor request body.
pub(crate) fn merge_custom_body<'a>(
    body: &mut Value,
    custom: impl IntoIterator<Item = &'a CustomBody>,
) {
    let Value::Object(map) = body else {
        return;
    };
    for field in custom {
        match map.get_mut(&field.key) {
            Some(existing) => deep_merge(existing, &field.value),
            None => {
                map.insert(field.key.clone(), field.value.clone());
            }
        }
    }
}

fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Serializes a typed request body and applies setting-level then call-level overrides.
pub(crate) fn finalize_body<T: Serialize>(
    request: &T,
    setting: &[CustomBody],
    call: &[CustomBody],
) -> ProviderResult<Value> {
    let mut body = serde_json::to_value(request)
        .map_err(|e| ProviderError::parse(format!("Failed to serialize request: {e}")))?;
    merge_custom_body(&mut body, setting.iter().chain(call));
    Ok(body)
}

// ============================================================================
// Responses
// ============================================================================

/// Fails with status + raw body on non-2xx responses.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::http_status(status.as_u16(), &body))
}

/// Reads a successful response body as JSON.
pub(crate) async fn read_json(response: reqwest::Response) -> ProviderResult<Value> {
    let response = ensure_success(response).await?;
    let text = response.text().await.map_err(classify_reqwest_error)?;
    serde_json::from_str(&text).map_err(|e| {
        ProviderError::parse(format!("Failed to parse response JSON: {e}")).with_details(text)
    })
}

/// Parses one SSE `data:` payload. Malformed payloads are logged and skipped.
pub(crate) fn parse_event_json(provider: &str, data: &str) -> Option<Value> {
    let trimmed = data.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(provider, "skipping malformed stream event: {err}");
            None
        }
    }
}

pub(crate) fn sse_transport_error(e: impl fmt::Display) -> ProviderError {
    ProviderError::new(ProviderErrorKind::Transport, format!("SSE stream error: {e}"))
}

pub(crate) fn new_chunk_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Balance
// ============================================================================

/// Resolves a dot/bracket path such as `data.items[0].balance`.
pub fn resolve_json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in parse_path(path)? {
        current = match segment {
            PathSegment::Key(key) => current.get(key.as_str())?,
            PathSegment::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = path.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                let mut inner = String::new();
                loop {
                    match chars.next()? {
                        ']' => break,
                        ch => inner.push(ch),
                    }
                }
                let inner = inner.trim();
                let quoted = inner
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
                match quoted {
                    Some(name) => segments.push(PathSegment::Key(name.to_string())),
                    None => segments.push(PathSegment::Index(inner.parse().ok()?)),
                }
            }
            other => key.push(other),
        }
    }
    if !key.is_empty() {
        segments.push(PathSegment::Key(key));
    }
    Some(segments)
}

/// Formats a balance value: numeric values get two decimals (half-up),
/// anything else is returned as-is.
pub fn format_balance(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    match raw.parse::<f64>() {
        Ok(number) if number.is_finite() => round_half_up_2(&number.to_string()),
        _ => raw,
    }
}

/// Rounds a plain decimal string to two places, half-up, without binary drift.
fn round_half_up_2(repr: &str) -> String {
    let (negative, digits) = match repr.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, repr),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));

    let mut frac: Vec<u8> = frac_part.bytes().collect();
    let round_up = frac.get(2).is_some_and(|d| *d >= b'5');
    frac.resize(2, b'0');

    let mut all: Vec<u8> = int_part.bytes().chain(frac).collect();
    if round_up {
        let mut i = all.len();
        loop {
            if i == 0 {
                all.insert(0, b'1');
                break;
            }
            i -= 1;
            if all[i] == b'9' {
                all[i] = b'0';
            } else {
                all[i] += 1;
                break;
            }
        }
    }

    let split = all.len() - 2;
    let int_digits = String::from_utf8_lossy(&all[..split]);
    let frac_digits = String::from_utf8_lossy(&all[split..]);
    let int_digits = if int_digits.is_empty() {
        "0".into()
    } else {
        int_digits
    };
    let is_zero = all.iter().all(|d| *d == b'0');
    let sign = if negative && !is_zero { "-" } else { "" };
    format!("{sign}{int_digits}.{frac_digits}")
}

// ============================================================================
// Media
// ============================================================================

/// Where a media part's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MediaSource {
    Inline { mime_type: String, data: String },
    Remote(String),
}

/// Splits a `data:` URL or passes an http(s) URL through.
///
/// Local paths are rejected here; [`load_local_media`] turns them into
/// `data:` URLs before a request body is built.
pub(crate) fn media_source(url: &str) -> anyhow::Result<MediaSource> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (meta, data) = rest
            .split_once(',')
            .context("data URL is missing its payload")?;
        let mime_type = meta.strip_suffix(";base64").context("data URL is not base64")?;
        return Ok(MediaSource::Inline {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        });
    }
    if is_remote(url) {
        return Ok(MediaSource::Remote(url.to_string()));
    }
    anyhow::bail!("local media {url} could not be read")
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Loads a media URL for inlining: files are read and base64-encoded with a
/// sniffed MIME type, other URLs go through [`media_source`].
pub(crate) async fn load_media(url: &str) -> anyhow::Result<MediaSource> {
    if url.starts_with("data:") || is_remote(url) {
        return media_source(url);
    }

    let path = if url.starts_with("file://") {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .with_context(|| format!("invalid file URL {url}"))?
    } else {
        std::path::PathBuf::from(url)
    };
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let mime_type = infer::get(&bytes).map_or_else(
        || mime_from_extension(&path).to_string(),
        |kind| kind.mime_type().to_string(),
    );
    Ok(MediaSource::Inline {
        mime_type,
        data: BASE64.encode(bytes),
    })
}

/// Rewrites local media and document paths as `data:` URLs.
///
/// Paths that cannot be read are left untouched; the request builders then
/// send an empty text part in their place.
pub(crate) async fn load_local_media(messages: &[UIMessage]) -> Vec<UIMessage> {
    let mut loaded = messages.to_vec();
    for part in loaded.iter_mut().flat_map(|m| m.parts.iter_mut()) {
        let (UIMessagePart::Image { url }
        | UIMessagePart::Video { url }
        | UIMessagePart::Audio { url }
        | UIMessagePart::Document { url, .. }) = part
        else {
            continue;
        };
        if url.starts_with("data:") || is_remote(url) {
            continue;
        }
        match load_media(url.as_str()).await {
            Ok(MediaSource::Inline { mime_type, data }) => {
                *url = format!("data:{mime_type};base64,{data}");
            }
            Ok(MediaSource::Remote(_)) => {}
            Err(err) => tracing::debug!(url = %url, "loading media failed: {err:#}"),
        }
    }
    loaded
}

fn mime_from_extension(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Inline media or, when loading fails, `None` after logging.
pub(crate) fn inline_media_or_warn(url: &str) -> Option<MediaSource> {
    match media_source(url) {
        Ok(source) => Some(source),
        Err(err) => {
            tracing::warn!(url, "media encoding failed, sending empty text instead: {err:#}");
            None
        }
    }
}

// ============================================================================
// Tool call grouping
// ============================================================================

/// A run of content parts followed by the tool calls that end it.
#[derive(Debug, Default)]
pub(crate) struct ToolStep<'a> {
    pub content: Vec<&'a UIMessagePart>,
    pub tools: Vec<&'a ToolPart>,
}

/// Splits assistant parts at tool-call groups.
///
/// `[text, tool A, tool B, text]` becomes `{[text], [A, B]}, {[text], []}` so
/// each tool group can be sent as its own call/result exchange.
pub(crate) fn split_tool_steps(parts: &[UIMessagePart]) -> Vec<ToolStep<'_>> {
    let mut steps = Vec::new();
    let mut current = ToolStep::default();
    for part in parts {
        if let UIMessagePart::Tool(tool) = part {
            current.tools.push(tool);
        } else {
            if !current.tools.is_empty() {
                steps.push(std::mem::take(&mut current));
            }
            current.content.push(part);
        }
    }
    if !current.content.is_empty() || !current.tools.is_empty() {
        steps.push(current);
    }
    steps
}

// ============================================================================
// SSE
// ============================================================================

/// Appends a blank line at EOF so a final event without a trailing
/// separator is still dispatched by the SSE parser.
pub(crate) struct SseTerminatedStream<S> {
    inner: S,
    emitted_terminator: bool,
}

impl<S> SseTerminatedStream<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            emitted_terminator: false,
        }
    }
}

impl<S, E> Stream for SseTerminatedStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
{
    type Item = std::result::Result<bytes::Bytes, E>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        if self.emitted_terminator {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                self.emitted_terminator = true;
                Poll::Ready(Some(Ok(bytes::Bytes::from_static(b"\n\n"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_balance_path_formats_two_decimals() {
        let value = json!({"data": {"balance": "12.345"}});
        let resolved = resolve_json_path(&value, "data.balance").unwrap();
        assert_eq!(format_balance(resolved), "12.35");
    }

    #[test]
    fn test_balance_path_with_indices_and_numbers() {
        let value = json!({"balance_infos": [{"total_balance": 7}], "label": "n/a"});
        let resolved = resolve_json_path(&value, "balance_infos[0].total_balance").unwrap();
        assert_eq!(format_balance(resolved), "7.00");

        let quoted = resolve_json_path(&value, "[\"label\"]").unwrap();
        assert_eq!(format_balance(quoted), "n/a");

        assert!(resolve_json_path(&value, "balance_infos[3]").is_none());
        assert!(resolve_json_path(&value, "balance_infos[x").is_none());
    }

    #[test]
    fn test_round_half_up_carries() {
        assert_eq!(round_half_up_2("9.995"), "10.00");
        assert_eq!(round_half_up_2("0.005"), "0.01");
        assert_eq!(round_half_up_2("-1.234"), "-1.23");
        assert_eq!(round_half_up_2("3"), "3.00");
    }

    #[test]
    fn test_http_status_extracts_vendor_message() {
        let err = ProviderError::http_status(
            429,
            r#"{"error":{"type":"rate_limit","message":"slow down"}}"#,
        );
        assert_eq!(err.kind, ProviderErrorKind::HttpStatus);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.message, "HTTP 429: slow down");
        assert!(err.details.unwrap().contains("rate_limit"));

        let plain = ProviderError::http_status(502, "bad gateway");
        assert_eq!(plain.message, "HTTP 502");
        assert_eq!(plain.details.as_deref(), Some("bad gateway"));
    }

    #[test]
    fn test_custom_body_deep_merges() {
        let mut body = json!({"model": "m", "generationConfig": {"temperature": 0.5}});
        let overrides = [
            CustomBody {
                key: "generationConfig".to_string(),
                value: json!({"topK": 3}),
            },
            CustomBody {
                key: "model".to_string(),
                value: json!("other"),
            },
        ];
        merge_custom_body(&mut body, overrides.iter());
        assert_eq!(
            body,
            json!({"model": "other", "generationConfig": {"temperature": 0.5, "topK": 3}})
        );
    }

    #[test]
    fn test_custom_headers_override_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("default"));
        let custom = [CustomHeader {
            name: "x-api-key".to_string(),
            value: "override".to_string(),
        }];
        apply_custom_headers(&mut headers, custom.iter());
        assert_eq!(headers["x-api-key"], "override");
    }

    #[test]
    fn test_split_tool_steps_alternates() {
        let parts = vec![
            UIMessagePart::text("before"),
            UIMessagePart::Tool(ToolPart::new("a", "t", "{}")),
            UIMessagePart::Tool(ToolPart::new("b", "t", "{}")),
            UIMessagePart::text("after"),
        ];
        let steps = split_tool_steps(&parts);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].content.len(), 1);
        assert_eq!(steps[0].tools.len(), 2);
        assert_eq!(steps[1].content.len(), 1);
        assert!(steps[1].tools.is_empty());
    }

    #[tokio::test]
    async fn test_load_media_reads_file_and_sniffs_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.bin");
        // PNG magic bytes
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();

        let MediaSource::Inline { mime_type, data } =
            load_media(path.to_str().unwrap()).await.unwrap()
        else {
            panic!("expected inline media");
        };
        assert_eq!(mime_type, "image/png");
        assert!(!data.is_empty());

        assert_eq!(
            load_media("data:image/jpeg;base64,AAAA").await.unwrap(),
            MediaSource::Inline {
                mime_type: "image/jpeg".to_string(),
                data: "AAAA".to_string()
            }
        );
        assert!(load_media("/definitely/missing.png").await.is_err());
    }

    #[tokio::test]
    async fn test_load_local_media_inlines_readable_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();
        let local = path.to_str().unwrap().to_string();

        let messages = vec![UIMessage::new(
            crate::message::Role::User,
            vec![
                UIMessagePart::Image { url: local.clone() },
                UIMessagePart::Image {
                    url: "https://example.com/a.png".to_string(),
                },
                UIMessagePart::Image {
                    url: "/definitely/missing.png".to_string(),
                },
            ],
        )];
        let loaded = load_local_media(&messages).await;

        let urls: Vec<&str> = loaded[0]
            .parts
            .iter()
            .filter_map(|part| match part {
                UIMessagePart::Image { url } => Some(url.as_str()),
                _ => None,
            })
            .collect();
        assert!(urls[0].starts_with("data:image/png;base64,"), "{}", urls[0]);
        assert_eq!(urls[1], "https://example.com/a.png");
        assert_eq!(urls[2], "/definitely/missing.png");
        // the input is not modified
        assert_eq!(messages[0].parts[0], UIMessagePart::Image { url: local });

        assert!(inline_media_or_warn(urls[0]).is_some());
        assert_eq!(inline_media_or_warn(urls[2]), None);
    }

    #[test]
    fn test_provider_env_var_normalizes_id() {
        assert_eq!(
            provider_env_var("deep-seek", "API_KEYS"),
            "RELAY_DEEP_SEEK_API_KEYS"
        );
    }
}
