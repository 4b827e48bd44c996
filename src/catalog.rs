use serde::Deserialize;

use crate::error::{ControllerError, Result};
use crate::peer_client::PeerTransport;
use crate::types::{PatternId, PATTERN_MIN};

/// One entry of a peer's `/list` response. Extra fields are ignored.
#[derive(Debug, Deserialize)]
struct ListingEntry {
    name: Option<String>,
}

/// Map a listing file name of the exact form `<c>.bin` to its pattern.
///
/// `a..z` -> 8..33, `A..Z` -> 34..59, `0..9` -> 60..69.
pub fn pattern_for_name(name: &str) -> Option<PatternId> {
    let bytes = name.as_bytes();
    if bytes.len() != 5 || &bytes[1..] != b".bin" {
        return None;
    }
    let c = bytes[0];
    let index = match c {
        b'a'..=b'z' => c - b'a',
        b'A'..=b'Z' => 26 + (c - b'A'),
        b'0'..=b'9' => 52 + (c - b'0'),
        _ => return None,
    };
    Some(PatternId(PATTERN_MIN + index))
}

/// Parse a JSON listing into patterns, keeping discovery order and dropping
/// duplicates.
pub fn parse_listing(body: &str) -> serde_json::Result<Vec<PatternId>> {
    let entries: Vec<ListingEntry> = serde_json::from_str(body)?;
    let mut patterns = Vec::new();
    for entry in entries {
        if let Some(pattern) = entry.name.as_deref().and_then(pattern_for_name) {
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
    }
    Ok(patterns)
}

/// Ordered, cursor-addressed set of patterns learned from peers.
#[derive(Debug, Default)]
pub struct PatternCatalog {
    patterns: Vec<PatternId>,
    cursor: usize,
    loaded: bool,
}

impl PatternCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn the catalog from the first peer that lists at least one pattern.
    ///
    /// Cached once loaded: later calls return the cached size without
    /// touching the network. Use [`PatternCatalog::rediscover`] to refresh.
    pub async fn discover<T: PeerTransport>(&mut self, transport: &T, peers: &[String]) -> Result<usize> {
        if self.loaded {
            return Ok(self.patterns.len());
        }

        for peer in peers {
            let body = match transport.fetch_listing(peer).await {
                Ok(body) => body,
                Err(e) => {
                    log::warn!("[CATALOG] {}", e);
                    continue;
                }
            };

            match parse_listing(&body) {
                Ok(patterns) if !patterns.is_empty() => {
                    log::info!("[CATALOG] Loaded {} patterns from {}: {:?}", patterns.len(), peer, patterns);
                    self.load(patterns);
                    return Ok(self.patterns.len());
                }
                Ok(_) => log::warn!("[CATALOG] {} lists no patterns", peer),
                Err(e) => {
                    let err = ControllerError::Listing { peer: peer.clone(), reason: e.to_string() };
                    log::warn!("[CATALOG] {}", err);
                }
            }
        }

        Err(ControllerError::NoListing)
    }

    pub async fn rediscover<T: PeerTransport>(&mut self, transport: &T, peers: &[String]) -> Result<usize> {
        self.loaded = false;
        self.discover(transport, peers).await
    }

    fn load(&mut self, patterns: Vec<PatternId>) {
        self.patterns = patterns;
        self.cursor = 0;
        self.loaded = !self.patterns.is_empty();
    }

    pub fn current(&self) -> Option<PatternId> {
        if self.loaded {
            self.patterns.get(self.cursor).copied()
        } else {
            None
        }
    }

    pub fn advance(&mut self) {
        if self.patterns.is_empty() {
            return;
        }
        self.cursor = (self.cursor + 1) % self.patterns.len();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[PatternId] {
        &self.patterns
    }
}
