//! Focus-history bookkeeping.
//!
//! Preview activations during a cycle must not reshuffle the history, so
//! the controller arms a one-shot skip before each preview focus request;
//! the skip is consumed by the next notification only.

use std::collections::VecDeque;

use crate::window::WindowHandle;

const MAX_HISTORY: usize = 32;

#[derive(Debug, Default)]
pub struct FocusTracker {
    history: VecDeque<WindowHandle>,
    focused: Option<WindowHandle>,
    skip_next: bool,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a focus-change notification from the host.
    ///
    /// Returns false when the notification was consumed by a pending skip;
    /// the focused window still updates, the history does not.
    pub fn note_focus(&mut self, window: WindowHandle) -> bool {
        self.focused = Some(window);
        if self.skip_next {
            self.skip_next = false;
            return false;
        }
        self.history.retain(|&w| w != window);
        self.history.push_front(window);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_back();
        }
        true
    }

    pub fn note_unfocus(&mut self) {
        self.focused = None;
    }

    pub fn skip_next_notification(&mut self) {
        self.skip_next = true;
    }

    pub fn focused(&self) -> Option<WindowHandle> {
        self.focused
    }

    /// Most-recently-focused first.
    pub fn history(&self) -> impl Iterator<Item = WindowHandle> + '_ {
        self.history.iter().copied()
    }

    /// Drop a closed window from the bookkeeping.
    pub fn forget(&mut self, window: WindowHandle) {
        self.history.retain(|&w| w != window);
        if self.focused == Some(window) {
            self.focused = None;
        }
    }
}
