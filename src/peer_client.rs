use std::future::Future;
use std::time::Duration;

use crate::error::{ControllerError, Result};
use crate::types::PatternId;

/// How a peer answered a pattern selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectOutcome {
    Accepted,
    /// 4xx: the peer is reachable but refused this pattern.
    Rejected(u16),
}

/// Outbound side of the peer protocol.
pub trait PeerTransport: Send + Sync {
    /// Raw body of `GET /list?dir=/`.
    fn fetch_listing(&self, peer: &str) -> impl Future<Output = Result<String>> + Send;

    /// `GET /pattern?patternChooserChange=<id>`.
    fn select_pattern(
        &self,
        peer: &str,
        pattern: PatternId,
    ) -> impl Future<Output = Result<SelectOutcome>> + Send;
}

/// Plain-HTTP client for peers addressed as `host` or `host:port`.
///
/// # Timeouts
/// - Pattern selection: the short send timeout, so a dead peer delays the
///   control loop by at most that long
/// - Listing: a longer discovery timeout, since listings can be large
#[derive(Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
    send_timeout: Duration,
    discovery_timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(send_timeout: Duration, discovery_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(send_timeout)
            .user_agent(concat!("pattern_spinner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ControllerError::Transport { peer: "-".to_string(), reason: e.to_string() })?;

        Ok(HttpPeerClient { client, send_timeout, discovery_timeout })
    }

    fn transport_error(peer: &str, err: reqwest::Error) -> ControllerError {
        let reason = if err.is_timeout() { "timeout".to_string() } else { err.to_string() };
        ControllerError::Transport { peer: peer.to_string(), reason }
    }
}

impl PeerTransport for HttpPeerClient {
    async fn fetch_listing(&self, peer: &str) -> Result<String> {
        let url = format!("http://{}/list?dir=/", peer);
        let response = self
            .client
            .get(&url)
            .timeout(self.discovery_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error(peer, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::HttpStatus { peer: peer.to_string(), status: status.as_u16() });
        }

        response.text().await.map_err(|e| Self::transport_error(peer, e))
    }

    async fn select_pattern(&self, peer: &str, pattern: PatternId) -> Result<SelectOutcome> {
        let url = format!("http://{}/pattern?patternChooserChange={}", peer, pattern);
        let response = self
            .client
            .get(&url)
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error(peer, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(SelectOutcome::Accepted)
        } else if status.is_client_error() {
            Ok(SelectOutcome::Rejected(status.as_u16()))
        } else {
            Err(ControllerError::HttpStatus { peer: peer.to_string(), status: status.as_u16() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::get, Router};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    async fn spawn_peer() -> String {
        let app = Router::new()
            .route("/list", get(|| async { r#"[{"name":"a.bin"},{"name":"notes.txt"}]"# }))
            .route(
                "/pattern",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    match q.get("patternChooserChange").map(String::as_str) {
                        Some("8") => (StatusCode::OK, "Pattern set"),
                        Some("13") => (StatusCode::INTERNAL_SERVER_ERROR, "boom"),
                        _ => (StatusCode::BAD_REQUEST, "Invalid pattern"),
                    }
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    fn client() -> HttpPeerClient {
        HttpPeerClient::new(Duration::from_secs(1), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_listing() {
        let peer = spawn_peer().await;
        let body = client().fetch_listing(&peer).await.unwrap();
        assert!(body.contains("a.bin"));
    }

    #[tokio::test]
    async fn test_select_outcomes() {
        let peer = spawn_peer().await;
        let client = client();
        assert_eq!(client.select_pattern(&peer, PatternId(8)).await, Ok(SelectOutcome::Accepted));
        assert_eq!(client.select_pattern(&peer, PatternId(9)).await, Ok(SelectOutcome::Rejected(400)));
        assert!(matches!(
            client.select_pattern(&peer, PatternId(13)).await,
            Err(ControllerError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = client().select_pattern(&addr, PatternId(8)).await;
        assert!(matches!(result, Err(ControllerError::Transport { .. })));
    }
}
