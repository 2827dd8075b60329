//! Lifecycle of an established client connection.

/// Connection state after a successful opening handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Data may flow both ways.
    #[default]
    Open,
    /// A close frame was sent; waiting for the server's reply.
    Closing,
    /// Close handshake finished or the stream ended.
    Closed,
}

impl ConnectionState {
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_allowed() {
        assert!(ConnectionState::Open.can_send());
        assert!(ConnectionState::Open.can_receive());
        assert!(!ConnectionState::Closing.can_send());
        assert!(ConnectionState::Closing.can_receive());
        assert!(!ConnectionState::Closed.can_send());
        assert!(!ConnectionState::Closed.can_receive());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Closing.to_string(), "Closing");
    }
}
