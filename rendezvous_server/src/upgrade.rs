use crate::{registry::PeerRegistry, router::run_peer};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, Request, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared by every upgrade request handled by one server.
#[derive(Debug, Clone)]
pub(crate) struct SignalingContext {
    pub registry: PeerRegistry,
    pub shutdown: CancellationToken,
    pub buffer_size: usize,
}

/// Check the `Upgrade` and `Connection` headers, case-insensitively.
///
/// A `Connection` header listing `upgrade` among other tokens (typically
/// `keep-alive, Upgrade`) is rewritten to a plain `Upgrade`.
pub(crate) fn accept_upgrade_headers(headers: &mut HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !upgrade.trim().eq_ignore_ascii_case("websocket") {
        return false;
    }

    let connection = headers
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if connection.trim().eq_ignore_ascii_case("upgrade") {
        return true;
    }
    let lists_upgrade = connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if lists_upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    }
    lists_upgrade
}

/// Middleware dropping anything that is not a websocket upgrade before it reaches
/// [`ws_handler`]. Dropped requests get an empty `200 OK`.
pub(crate) async fn upgrade_filter(mut request: Request, next: Next) -> Response {
    if !accept_upgrade_headers(request.headers_mut()) {
        debug!("ignoring non-upgrade request to {}", request.uri());
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

/// The handler for the HTTP request to upgrade to WebSockets.
/// This is the last point where we can extract metadata such as IP address of the client.
pub(crate) async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(context): State<SignalingContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            warn!("`{addr}` sent an incomplete upgrade request: {e}");
            return StatusCode::OK.into_response();
        }
    };
    info!("`{addr}` connected.");

    let SignalingContext {
        registry,
        shutdown,
        buffer_size,
    } = context;

    // Finalize the upgrade process by returning upgrade callback to client
    ws.read_buffer_size(buffer_size)
        .write_buffer_size(buffer_size)
        .on_failed_upgrade(move |e| warn!("websocket upgrade for `{addr}` failed: {e}"))
        .on_upgrade(move |ws| run_peer(ws, registry, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn plain_upgrade_is_accepted_untouched() {
        let mut map = headers(&[
            (header::UPGRADE, "WebSocket"),
            (header::CONNECTION, "Upgrade"),
        ]);
        assert!(accept_upgrade_headers(&mut map));
        assert_eq!(map[header::CONNECTION], "Upgrade");
    }

    #[test]
    fn keep_alive_upgrade_is_normalized() {
        let mut map = headers(&[
            (header::UPGRADE, "websocket"),
            (header::CONNECTION, "keep-alive, Upgrade"),
        ]);
        assert!(accept_upgrade_headers(&mut map));
        assert_eq!(map[header::CONNECTION], "Upgrade");
    }

    #[test]
    fn missing_or_foreign_headers_are_rejected() {
        assert!(!accept_upgrade_headers(&mut HeaderMap::new()));
        assert!(!accept_upgrade_headers(&mut headers(&[(
            header::CONNECTION,
            "upgrade"
        )])));
        assert!(!accept_upgrade_headers(&mut headers(&[
            (header::UPGRADE, "h2c"),
            (header::CONNECTION, "upgrade"),
        ])));
        assert!(!accept_upgrade_headers(&mut headers(&[
            (header::UPGRADE, "websocket"),
            (header::CONNECTION, "keep-alive"),
        ])));
    }
}
