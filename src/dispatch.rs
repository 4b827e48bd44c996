use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::peer_client::{PeerTransport, SelectOutcome};
use crate::types::PatternId;

/// Result of sending one pattern to one peer.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerOutcome {
    Accepted,
    Rejected(u16),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct DispatchReport {
    pub pattern: PatternId,
    pub outcomes: Vec<(String, PeerOutcome)>,
}

impl DispatchReport {
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == PeerOutcome::Accepted).count()
    }
}

/// Fans a pattern selection out to every peer, best effort.
///
/// Each peer gets its own bounded send; a slow or dead peer never holds up the
/// others. Failures are logged and dropped, there is no retry.
pub struct Dispatcher<T> {
    transport: Arc<T>,
    peers: Arc<[String]>,
    send_timeout: Duration,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            peers: Arc::clone(&self.peers),
            send_timeout: self.send_timeout,
        }
    }
}

impl<T: PeerTransport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, peers: Vec<String>, send_timeout: Duration) -> Self {
        Self { transport, peers: peers.into(), send_timeout }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn shared_transport(&self) -> Arc<T> {
        Arc::clone(&self.transport)
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub async fn send_to_all(&self, pattern: PatternId) -> DispatchReport {
        let sends = self.peers.iter().map(|peer| async move {
            let outcome =
                match tokio::time::timeout(self.send_timeout, self.transport.select_pattern(peer, pattern)).await {
                    Ok(Ok(SelectOutcome::Accepted)) => {
                        log::info!("[DISPATCH] {}: pattern {} set", peer, pattern);
                        PeerOutcome::Accepted
                    }
                    Ok(Ok(SelectOutcome::Rejected(status))) => {
                        log::warn!("[DISPATCH] {}: invalid pattern {} (HTTP {})", peer, pattern, status);
                        PeerOutcome::Rejected(status)
                    }
                    Ok(Err(e)) => {
                        log::warn!("[DISPATCH] {}", e);
                        PeerOutcome::Failed(e.to_string())
                    }
                    Err(_) => {
                        log::warn!("[DISPATCH] {}: timed out after {:?}", peer, self.send_timeout);
                        PeerOutcome::Failed("timeout".to_string())
                    }
                };
            (peer.clone(), outcome)
        });

        DispatchReport { pattern, outcomes: join_all(sends).await }
    }
}
