//! Reference-counted connection lifecycle
//!
//! Tables, providers, indexes and filtered views share one state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! N calls to connect need N calls to disconnect before teardown. Only the
//! first connect performs the expensive work (open the file, full scan) and
//! only the last disconnect tears it down. The owning structure mutates its
//! `Lifecycle` under its own lock, together with the side effects.

use std::fmt;

/// Connection state of a maintained structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// First connect in progress (file open, full scan)
    Connecting,
    Connected,
    /// Last disconnect in progress (flush, teardown)
    Disconnecting,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "DISCONNECTED",
            LinkState::Connecting => "CONNECTING",
            LinkState::Connected => "CONNECTED",
            LinkState::Disconnecting => "DISCONNECTING",
        };
        f.write_str(s)
    }
}

/// Outcome of [`Lifecycle::begin_disconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Nothing to release.
    NotConnected,
    /// Other connections remain; no teardown.
    Shared,
    /// This was the last connection; the caller must tear down then call
    /// [`Lifecycle::finish_disconnect`].
    Last,
}

/// Connection counter plus state
#[derive(Debug)]
pub struct Lifecycle {
    state: LinkState,
    connections: usize,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            connections: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn connections(&self) -> usize {
        self.connections
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Registers a connect.
    ///
    /// Returns `true` when this is the first connection: the caller must
    /// build the structure and then call [`finish_connect`](Self::finish_connect)
    /// or [`abort_connect`](Self::abort_connect).
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            LinkState::Connected => {
                self.connections += 1;
                false
            }
            LinkState::Disconnected => {
                self.state = LinkState::Connecting;
                true
            }
            state => panic!("connect while {}", state),
        }
    }

    pub fn finish_connect(&mut self) {
        assert_eq!(self.state, LinkState::Connecting);
        self.state = LinkState::Connected;
        self.connections = 1;
    }

    /// First connect failed: back to disconnected.
    pub fn abort_connect(&mut self) {
        assert_eq!(self.state, LinkState::Connecting);
        self.state = LinkState::Disconnected;
        self.connections = 0;
    }

    /// Registers a disconnect.
    pub fn begin_disconnect(&mut self) -> Release {
        match self.state {
            LinkState::Connected if self.connections > 1 => {
                self.connections -= 1;
                Release::Shared
            }
            LinkState::Connected => {
                self.state = LinkState::Disconnecting;
                Release::Last
            }
            _ => Release::NotConnected,
        }
    }

    pub fn finish_disconnect(&mut self) {
        assert_eq!(self.state, LinkState::Disconnecting);
        self.state = LinkState::Disconnected;
        self.connections = 0;
    }

    /// # Panics
    ///
    /// Panics unless connected. `what` names the structure in the message.
    pub fn assert_connected(&self, what: &str) {
        assert!(self.is_connected(), "{} is not connected ({})", what, self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_n_connects_need_n_disconnects() {
        let mut lc = Lifecycle::new();
        assert!(lc.begin_connect());
        lc.finish_connect();
        assert!(!lc.begin_connect());
        assert!(!lc.begin_connect());
        assert_eq!(lc.connections(), 3);

        assert_eq!(lc.begin_disconnect(), Release::Shared);
        assert_eq!(lc.begin_disconnect(), Release::Shared);
        assert!(lc.is_connected());
        assert_eq!(lc.begin_disconnect(), Release::Last);
        assert_eq!(lc.state(), LinkState::Disconnecting);
        lc.finish_disconnect();
        assert_eq!(lc.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_abort_returns_to_disconnected() {
        let mut lc = Lifecycle::new();
        assert!(lc.begin_connect());
        lc.abort_connect();
        assert_eq!(lc.state(), LinkState::Disconnected);
        assert!(lc.begin_connect());
    }

    #[test]
    fn test_disconnect_when_idle_is_noop() {
        let mut lc = Lifecycle::new();
        assert_eq!(lc.begin_disconnect(), Release::NotConnected);
    }

    #[test]
    #[should_panic(expected = "not connected")]
    fn test_assert_connected() {
        Lifecycle::new().assert_connected("index");
    }
}
