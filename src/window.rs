//! Window snapshot types shared by the filter, reconciler and controller.

use std::fmt;

/// EWMH sentinel desktop for a window that lives on every desktop.
pub const ALL_DESKTOPS: u32 = 0xFFFF_FFFF;

/// Stable identifier for a top-level X11 window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u32);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Point-in-time snapshot of the per-window attributes the cycling logic
/// consumes. Snapshots are rebuilt from the registry on every
/// reconciliation, never kept alive across one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
    pub icon_title: String,
    /// Desktop index, or [`ALL_DESKTOPS`] for an omnipresent window.
    pub desktop: u32,
    pub iconic: bool,
    pub skip_taskbar: bool,
    /// Regular application window, as opposed to a desktop, dock, menu,
    /// splash screen and the like.
    pub normal: bool,
    /// WM_HINTS input flag: the window takes focus directly.
    pub can_focus: bool,
    /// The window participates in the WM_TAKE_FOCUS protocol.
    pub focus_notify: bool,
}

impl WindowInfo {
    /// Text shown for this window in the popup: the icon title while
    /// iconified, the display title otherwise.
    pub fn label(&self) -> &str {
        if self.iconic {
            &self.icon_title
        } else {
            &self.title
        }
    }

    pub fn omnipresent(&self) -> bool {
        self.desktop == ALL_DESKTOPS
    }
}

/// Truncate a popup label to `budget` characters, keeping the head and tail
/// of the title with an ellipsis in the middle.
pub fn truncate_label(s: &str, budget: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= budget || budget < 7 {
        return s.to_string();
    }
    let keep = budget / 2 - 2;
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(iconic: bool) -> WindowInfo {
        WindowInfo {
            handle: WindowHandle(1),
            title: "Title".to_string(),
            icon_title: "Icon Title".to_string(),
            desktop: 0,
            iconic,
            skip_taskbar: false,
            normal: true,
            can_focus: true,
            focus_notify: false,
        }
    }

    #[test]
    fn test_label_uses_icon_title_when_iconic() {
        assert_eq!(window(false).label(), "Title");
        assert_eq!(window(true).label(), "Icon Title");
    }

    #[test]
    fn test_truncate_short_label_unchanged() {
        assert_eq!(truncate_label("hello", 80), "hello");
    }

    #[test]
    fn test_truncate_at_exact_budget_unchanged() {
        let s = "x".repeat(80);
        assert_eq!(truncate_label(&s, 80), s);
    }

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let s: String = ('a'..='z').cycle().take(100).collect();
        let t = truncate_label(&s, 80);
        // budget/2 - 2 = 38 chars from each end, plus the ellipsis
        assert_eq!(t.chars().count(), 38 + 3 + 38);
        assert!(t.starts_with(&s[..38]));
        assert!(t.ends_with(&s[100 - 38..]));
        assert!(t.contains("..."));
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let s = "\u{00e9}".repeat(100);
        let t = truncate_label(&s, 80);
        assert_eq!(t.chars().count(), 38 + 3 + 38);
    }

    #[test]
    fn test_omnipresent() {
        let mut w = window(false);
        assert!(!w.omnipresent());
        w.desktop = ALL_DESKTOPS;
        assert!(w.omnipresent());
    }
}
