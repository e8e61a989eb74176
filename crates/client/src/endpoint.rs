//! Realtime endpoint derivation.

use shiftwire_shared::RealtimeError;
use url::Url;

/// Derive the WebSocket URL from the HTTP API base.
///
/// `http` maps to `ws` and `https` to `wss`; `path` is appended to whatever
/// path the base already carries. Query and fragment are dropped.
pub fn realtime_url(api_base: &str, path: &str) -> Result<String, RealtimeError> {
    let invalid = |reason: String| RealtimeError::InvalidUrl {
        url: api_base.to_string(),
        reason,
    };

    let mut url = Url::parse(api_base.trim()).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch scheme to '{scheme}'")))?;

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}
