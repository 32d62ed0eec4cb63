//! Endpoint resolution for the socket and proxy URLs.

use url::Url;

/// Socket path used when none is configured.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// API base used when none is configured (same-origin).
pub const DEFAULT_API_BASE: &str = "/api";

/// Proxy endpoint used when none is configured.
pub const DEFAULT_PROXY_PATH: &str = "/api/ai/perplexity";

/// Errors produced while resolving an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    /// The assembled address is not a valid URL.
    #[error("invalid URL {url}: {source}")]
    Parse {
        /// The text that failed to parse.
        url: String,
        /// Underlying parse failure.
        source: url::ParseError,
    },

    /// The URL parsed but uses a scheme this endpoint cannot speak.
    #[error("unsupported scheme in {0}")]
    UnsupportedScheme(String),

    /// A relative address was given and there is no origin to resolve it
    /// against.
    #[error("cannot resolve relative address {0} without a page origin")]
    NoOrigin(String),
}

fn parse(url: &str) -> Result<Url, AddressError> {
    Url::parse(url).map_err(|source| AddressError::Parse {
        url: url.to_string(),
        source,
    })
}

/// Joins `base` and `path` with exactly one slash between them.
#[must_use]
pub fn join_single_slash(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn is_absolute_http(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolves the WebSocket endpoint.
///
/// A configured `ws_base` wins; otherwise the address is derived from the
/// page origin, using `wss` when the origin is `https` and `ws` otherwise.
/// A `token` is appended as the `token` query parameter.
///
/// # Errors
///
/// Returns [`AddressError::NoOrigin`] when neither a base nor an origin is
/// available, [`AddressError::UnsupportedScheme`] when the result is not a
/// `ws`/`wss` URL, or [`AddressError::Parse`] for malformed input.
pub fn resolve_socket_url(
    ws_base: Option<&str>,
    page_origin: Option<&Url>,
    path: &str,
    token: Option<&str>,
) -> Result<Url, AddressError> {
    let mut url = match (ws_base.filter(|b| !b.trim().is_empty()), page_origin) {
        (Some(base), _) => parse(&join_single_slash(base.trim(), path))?,
        (None, Some(origin)) => {
            let scheme = if origin.scheme() == "https" { "wss" } else { "ws" };
            let host = origin
                .host_str()
                .ok_or_else(|| AddressError::NoOrigin(path.to_string()))?;
            let authority = origin
                .port()
                .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"));
            parse(&join_single_slash(&format!("{scheme}://{authority}"), path))?
        }
        (None, None) => return Err(AddressError::NoOrigin(path.to_string())),
    };

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(AddressError::UnsupportedScheme(url.to_string()));
    }
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Resolves the AI proxy endpoint.
///
/// An absolute `http(s)` proxy URL is used as-is. A relative one is joined to
/// `api_base` when that is absolute, and otherwise resolved against the page
/// origin.
///
/// # Errors
///
/// Returns [`AddressError::NoOrigin`] when both are relative and there is no
/// origin, or [`AddressError::Parse`] for malformed input.
pub fn resolve_proxy_url(
    proxy: &str,
    api_base: &str,
    page_origin: Option<&Url>,
) -> Result<Url, AddressError> {
    if is_absolute_http(proxy) {
        return parse(proxy);
    }
    if is_absolute_http(api_base) {
        return parse(&join_single_slash(api_base, proxy));
    }
    match page_origin {
        Some(origin) => origin.join(proxy).map_err(|source| AddressError::Parse {
            url: proxy.to_string(),
            source,
        }),
        None => Err(AddressError::NoOrigin(proxy.to_string())),
    }
}
