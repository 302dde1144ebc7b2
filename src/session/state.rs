//! Voice session lifecycle

use std::fmt;

/// Lifecycle of a voice session
///
/// `Idle → Connecting → Open → Closing → Closed`, with `Errored`
/// reachable from every non-idle, non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl SessionState {
    /// Whether moving from `self` to `next` is allowed
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting | Self::Closing)
                | (Self::Connecting, Self::Open | Self::Closing | Self::Errored)
                | (Self::Open, Self::Closing | Self::Errored)
                | (Self::Closing, Self::Closed | Self::Errored)
        )
    }

    /// `Closed` and `Errored` accept no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
