//! Candidate eligibility rules.

use crate::config::PolicyFlags;
use crate::window::WindowInfo;

/// Decide whether `window` may appear in the cycle list right now.
///
/// Rules are applied in order; the first failing rule excludes the window.
/// Pure function of the snapshot and the flags at call time.
pub fn is_eligible(window: &WindowInfo, current_desktop: u32, flags: &PolicyFlags) -> bool {
    if !window.normal {
        return false;
    }
    if !window.can_focus && !window.focus_notify {
        return false;
    }
    if flags.avoid_skip_taskbar && window.skip_taskbar {
        return false;
    }
    if window.iconic {
        return flags.include_icons
            && (flags.include_icons_all_desktops || window.desktop == current_desktop);
    }
    if window.omnipresent() {
        return flags.include_omnipresent;
    }
    if flags.include_all_desktops {
        return true;
    }
    window.desktop == current_desktop
}
