//! Admission control for concurrent connections

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::MAX_CONNECTIONS;

/// Caps the number of connections served at once
///
/// Connections over the cap are refused, not queued.
#[derive(Debug, Clone)]
pub struct ConnectionLimit {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionLimit {
    /// Allow up to `max_connections` at once
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        assert!(max_connections > 0, "max_connections must be > 0");

        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Admit `peer` if a slot is free
    ///
    /// The slot is released when the returned permit is dropped.
    pub fn try_admit(&self, peer: SocketAddr) -> Option<ConnectionPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        debug!("Connection from {} admitted", peer);

        Some(ConnectionPermit {
            _permit: permit,
            peer,
        })
    }

    /// Connections currently admitted
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Configured cap
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Default for ConnectionLimit {
    fn default() -> Self {
        Self::new(MAX_CONNECTIONS)
    }
}

/// Slot held for the lifetime of one connection
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
    peer: SocketAddr,
}

impl ConnectionPermit {
    /// Remote address of the connection
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        debug!("Connection from {} released", self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_limit_basic() {
        let limit = ConnectionLimit::new(2);

        assert_eq!(limit.active_connections(), 0);
        assert_eq!(limit.max_connections(), 2);
    }

    #[test]
    fn test_limit_admits_up_to_max() {
        let limit = ConnectionLimit::new(2);

        let first = limit.try_admit(peer(1000)).unwrap();
        let _second = limit.try_admit(peer(1001)).unwrap();
        assert_eq!(limit.active_connections(), 2);
        assert_eq!(first.peer(), peer(1000));

        assert!(limit.try_admit(peer(1002)).is_none());
    }

    #[test]
    fn test_limit_release_on_drop() {
        let limit = ConnectionLimit::new(1);

        {
            let _permit = limit.try_admit(peer(1000)).unwrap();
            assert!(limit.try_admit(peer(1001)).is_none());
        }

        assert_eq!(limit.active_connections(), 0);
        assert!(limit.try_admit(peer(1001)).is_some());
    }

    #[test]
    fn test_clones_share_slots() {
        let limit = ConnectionLimit::new(1);
        let clone = limit.clone();

        let _permit = limit.try_admit(peer(1000)).unwrap();
        assert!(clone.try_admit(peer(1001)).is_none());
        assert_eq!(clone.active_connections(), 1);
    }

    #[test]
    #[should_panic(expected = "max_connections must be > 0")]
    fn test_limit_zero_panic() {
        let _ = ConnectionLimit::new(0);
    }
}
