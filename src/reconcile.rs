//! Candidate-list reconciliation.
//!
//! The cycle list is rebuilt from scratch whenever the window set changes
//! under an active session. The cursor must keep pointing at the same
//! window across the rebuild whenever that window survives, not merely at
//! the same numeric slot.

use crate::config::PolicyFlags;
use crate::filter::is_eligible;
use crate::window::{WindowHandle, WindowInfo};

/// Cursor position carried across a reconciliation: the window identity
/// under the cursor plus its old numeric index as a fallback.
#[derive(Debug, Clone, Copy)]
pub struct CursorMemo {
    pub window: WindowHandle,
    pub index: usize,
}

/// Rebuild the candidate list and re-locate the cursor.
///
/// Eligible non-iconic windows come first, eligible iconic windows after,
/// each partition preserving registry enumeration order. The cursor
/// resolves to, in order of preference: the previous window by identity,
/// the previous numeric index if still in range, the last entry.
pub fn reconcile(
    all_windows: &[WindowInfo],
    current_desktop: u32,
    flags: &PolicyFlags,
    previous: Option<CursorMemo>,
) -> (Vec<WindowInfo>, Option<usize>) {
    let mut list: Vec<WindowInfo> = Vec::with_capacity(all_windows.len());
    let mut icons: Vec<WindowInfo> = Vec::new();
    for w in all_windows {
        if !is_eligible(w, current_desktop, flags) {
            continue;
        }
        if w.iconic {
            icons.push(w.clone());
        } else {
            list.push(w.clone());
        }
    }
    list.append(&mut icons);

    let cursor = locate_cursor(&list, previous);
    if let Some(i) = cursor {
        // contract with the session state machine
        assert!(i < list.len(), "reconciled cursor {} out of range {}", i, list.len());
    }
    (list, cursor)
}

fn locate_cursor(list: &[WindowInfo], previous: Option<CursorMemo>) -> Option<usize> {
    if list.is_empty() {
        return None;
    }
    let Some(memo) = previous else {
        return Some(0);
    };
    if let Some(pos) = list.iter().position(|w| w.handle == memo.window) {
        return Some(pos);
    }
    if memo.index < list.len() {
        // the old slot is now occupied by whatever moved into it
        return Some(memo.index);
    }
    Some(list.len() - 1)
}
