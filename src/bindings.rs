//! Key bindings.
//!
//! Chords resolve through an explicit table keyed by (keysym, modifier
//! mask). The table owns what a key means; the controller only sees
//! [`Action`]s.

/// X11 core keysyms this daemon cares about.
pub mod keysym {
    pub const TAB: u32 = 0xff09;
    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
}

/// Modifier bits, matching the low bits of the X11 KeyButMask.
pub mod modmask {
    pub const SHIFT: u16 = 1 << 0;
    pub const LOCK: u16 = 1 << 1;
    pub const CONTROL: u16 = 1 << 2;
    /// Alt on most keymaps.
    pub const MOD1: u16 = 1 << 3;
    /// NumLock on most keymaps.
    pub const MOD2: u16 = 1 << 4;
    pub const MOD4: u16 = 1 << 6;

    /// Bits ignored when matching a chord.
    pub const IGNORED: u16 = LOCK | MOD2;

    /// The keyboard-modifier bits of a KeyButMask. Bits above these carry
    /// pointer button state, which must never count as a held modifier.
    pub const MODIFIER_BITS: u16 = 0x00ff;
}

/// What a resolved chord asks the controller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Advance { backward: bool },
    Commit,
    Revert,
}

/// A key event as seen by the session's grab handler, already translated
/// from raw keycodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Press { keysym: u32, mods: u16 },
    /// A key went up; `remaining_mods` is the modifier state with the
    /// released key already accounted for.
    Release { remaining_mods: u16 },
}

/// Chord table mapping (keysym, modifier set) to actions.
#[derive(Debug, Clone)]
pub struct BindingTable {
    entries: Vec<(u32, u16, Action)>,
}

impl BindingTable {
    pub fn empty() -> Self {
        BindingTable { entries: Vec::new() }
    }

    /// Bind a chord, replacing any previous binding for the same chord.
    pub fn bind(&mut self, keysym: u32, mods: u16, action: Action) {
        let mods = mods & !modmask::IGNORED;
        self.entries.retain(|&(k, m, _)| !(k == keysym && m == mods));
        self.entries.push((keysym, mods, action));
    }

    /// Chords that must be passively grabbed to trigger a session from Idle.
    pub fn advance_chords(&self) -> impl Iterator<Item = (u32, u16)> + '_ {
        self.entries
            .iter()
            .filter(|(_, _, a)| matches!(a, Action::Advance { .. }))
            .map(|&(k, m, _)| (k, m))
    }

    /// Resolve a key press. Lock, NumLock and pointer buttons never
    /// participate in matching.
    ///
    /// Commit and Revert bindings match on the bare keysym: whatever cycle
    /// modifier is still held when Return or Escape goes down must not
    /// prevent the match.
    pub fn lookup(&self, keysym: u32, mods: u16) -> Option<Action> {
        let mods = mods & modmask::MODIFIER_BITS & !modmask::IGNORED;
        if let Some(action) = self
            .entries
            .iter()
            .find_map(|&(k, m, a)| (k == keysym && m == mods).then_some(a))
        {
            return Some(action);
        }
        self.entries.iter().find_map(|&(k, m, a)| {
            (k == keysym && m == 0 && matches!(a, Action::Commit | Action::Revert)).then_some(a)
        })
    }
}

impl Default for BindingTable {
    /// Alt+Tab / Alt+Shift+Tab cycling, Return commits, Escape reverts.
    fn default() -> Self {
        let mut table = BindingTable::empty();
        table.bind(keysym::TAB, modmask::MOD1, Action::Advance { backward: false });
        table.bind(
            keysym::TAB,
            modmask::MOD1 | modmask::SHIFT,
            Action::Advance { backward: true },
        );
        table.bind(keysym::RETURN, 0, Action::Commit);
        table.bind(keysym::ESCAPE, 0, Action::Revert);
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chords() {
        let table = BindingTable::default();
        assert_eq!(
            table.lookup(keysym::TAB, modmask::MOD1),
            Some(Action::Advance { backward: false })
        );
        assert_eq!(
            table.lookup(keysym::TAB, modmask::MOD1 | modmask::SHIFT),
            Some(Action::Advance { backward: true })
        );
        assert_eq!(table.lookup(keysym::TAB, 0), None);
    }

    #[test]
    fn test_lock_and_numlock_ignored() {
        let table = BindingTable::default();
        assert_eq!(
            table.lookup(keysym::TAB, modmask::MOD1 | modmask::LOCK | modmask::MOD2),
            Some(Action::Advance { backward: false })
        );
    }

    #[test]
    fn test_held_pointer_button_ignored() {
        let button1: u16 = 1 << 8;
        let table = BindingTable::default();
        assert_eq!(
            table.lookup(keysym::TAB, modmask::MOD1 | button1),
            Some(Action::Advance { backward: false })
        );
    }

    #[test]
    fn test_terminators_match_with_held_modifiers() {
        let table = BindingTable::default();
        assert_eq!(table.lookup(keysym::RETURN, modmask::MOD1), Some(Action::Commit));
        assert_eq!(
            table.lookup(keysym::ESCAPE, modmask::MOD1 | modmask::SHIFT),
            Some(Action::Revert)
        );
    }

    #[test]
    fn test_rebind_replaces() {
        let mut table = BindingTable::default();
        table.bind(keysym::TAB, modmask::MOD1, Action::Advance { backward: true });
        assert_eq!(
            table.lookup(keysym::TAB, modmask::MOD1),
            Some(Action::Advance { backward: true })
        );
        assert_eq!(table.advance_chords().count(), 2);
    }

    #[test]
    fn test_advance_chords_excludes_terminators() {
        let table = BindingTable::default();
        let chords: Vec<_> = table.advance_chords().collect();
        assert_eq!(chords.len(), 2);
        assert!(chords.iter().all(|&(k, _)| k == keysym::TAB));
    }
}
