//! Typed errors surfaced by the cycling controller.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabKind {
    Keyboard,
    Pointer,
}

impl fmt::Display for GrabKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrabKind::Keyboard => write!(f, "keyboard"),
            GrabKind::Pointer => write!(f, "pointer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CycleError {
    /// A cycle-advance was requested with no modifier held. Without a
    /// modifier to watch, the session could never observe "key released"
    /// and would have no way to end, so the binding itself is rejected.
    #[error("cycle binding has no modifier to watch for release")]
    InvalidBinding,

    /// Another client already holds the exclusive grab. The session is not
    /// opened; the next key event will try again from scratch.
    #[error("exclusive {0} grab unavailable")]
    GrabUnavailable(GrabKind),
}
