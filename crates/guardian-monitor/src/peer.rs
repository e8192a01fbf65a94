//! Tracking of the most recently seen sending device.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

/// Shared, last-writer-wins record of the active peer.
///
/// The ingress worker writes it; the alert dispatcher and any observer read
/// it. Cloning yields another handle to the same record.
#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    current: Arc<RwLock<Option<SocketAddr>>>,
}

impl PeerTracker {
    /// No peer seen yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a datagram source. Returns `true` when it replaced a different
    /// (or absent) peer.
    pub fn observe(&self, addr: SocketAddr) -> bool {
        if *self.current.read() == Some(addr) {
            return false;
        }
        let mut current = self.current.write();
        if *current == Some(addr) {
            return false;
        }
        *current = Some(addr);
        true
    }

    /// The active peer, if any.
    pub fn current(&self) -> Option<SocketAddr> {
        *self.current.read()
    }
}
