//! Service seams between the cycling controller and its host.
//!
//! Each trait mirrors one external collaborator: the window registry, the
//! exclusive input grabs, the popup display, the desktop/viewport, focus
//! transfer, and the policy store. The real implementations live in the
//! `x11` and `ui_commands` modules; tests substitute in-memory mocks.

use anyhow::Result;

use crate::config::PolicyFlags;
use crate::errors::CycleError;
use crate::window::{WindowHandle, WindowInfo};

pub trait WindowRegistry {
    /// Snapshot every known top-level window, in registry enumeration
    /// order. That order is what keeps the cycle list stable run to run.
    fn snapshot(&mut self) -> Result<Vec<WindowInfo>>;
}

/// Exclusive keyboard and pointer capture for the duration of a session.
pub trait GrabService {
    fn grab_keyboard(&mut self) -> Result<(), CycleError>;
    fn grab_pointer(&mut self) -> Result<(), CycleError>;
    fn ungrab_keyboard(&mut self);
    fn ungrab_pointer(&mut self);
}

pub trait PopupDisplay {
    fn open(&mut self, labels: Vec<String>, highlight: usize);
    fn update(&mut self, labels: Vec<String>, highlight: usize);
    fn close(&mut self);
}

pub trait DesktopService {
    fn current_desktop(&mut self) -> Result<u32>;
    fn switch_to(&mut self, desktop: u32) -> Result<()>;
}

pub trait FocusService {
    /// Handle of the window the host currently considers focused.
    fn focused(&mut self) -> Option<WindowHandle>;

    /// Ask the host to focus `window`. A stale handle is not an error.
    fn focus(&mut self, window: WindowHandle) -> Result<()>;

    /// Raise `window` to the top of its stacking layer.
    fn raise(&mut self, window: WindowHandle) -> Result<()>;

    /// Arm a one-shot skip of the next focus-change notification, so a
    /// preview focus does not reshuffle focus-history bookkeeping.
    fn skip_next_notification(&mut self);
}

pub trait PolicyStore {
    /// Current policy flags. Read fresh on every evaluation so changes
    /// take effect on the next reconciliation, mid-session included.
    fn flags(&self) -> PolicyFlags;
}

impl PolicyStore for crate::config::Config {
    fn flags(&self) -> PolicyFlags {
        self.policy_flags()
    }
}
