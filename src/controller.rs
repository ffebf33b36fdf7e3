//! The cycling controller.
//!
//! Owns the one-at-a-time session state, drives reconciliation against the
//! window registry, and applies the activation policy. All host specifics
//! come in through the `services` traits; the controller itself never
//! touches X11 or GTK.

use anyhow::Result;
use tracing::{debug, info};

use crate::bindings::{Action, BindingTable, KeyEvent, modmask};
use crate::errors::CycleError;
use crate::reconcile::{CursorMemo, reconcile};
use crate::services::{
    DesktopService, FocusService, GrabService, PolicyStore, PopupDisplay, WindowRegistry,
};
use crate::window::{WindowHandle, WindowInfo, truncate_label};

/// Ephemeral state for one cycling interaction.
#[derive(Debug)]
struct Session {
    /// Modifier mask held when the session opened. Releasing the last of
    /// these bits commits the selection.
    initial_mods: u16,
    list: Vec<WindowInfo>,
    cursor: Option<usize>,
    /// Selection at session start, kept for the revert path.
    initial_cursor: Option<usize>,
    initial_window: Option<WindowHandle>,
    keyboard_grabbed: bool,
    pointer_grabbed: bool,
    popup_open: bool,
}

/// Snapshot of controller state for the IPC status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStatus {
    pub cycling: bool,
    pub window_count: usize,
    pub cursor: Option<usize>,
}

pub struct CycleController<R, G, P, D, F, C> {
    registry: R,
    grabs: G,
    popup: P,
    desktops: D,
    focus: F,
    policy: C,
    bindings: BindingTable,
    session: Option<Session>,
}

impl<R, G, P, D, F, C> CycleController<R, G, P, D, F, C>
where
    R: WindowRegistry,
    G: GrabService,
    P: PopupDisplay,
    D: DesktopService,
    F: FocusService,
    C: PolicyStore,
{
    pub fn new(registry: R, grabs: G, popup: P, desktops: D, focus: F, policy: C) -> Self {
        Self::with_bindings(registry, grabs, popup, desktops, focus, policy, BindingTable::default())
    }

    pub fn with_bindings(
        registry: R,
        grabs: G,
        popup: P,
        desktops: D,
        focus: F,
        policy: C,
        bindings: BindingTable,
    ) -> Self {
        CycleController {
            registry,
            grabs,
            popup,
            desktops,
            focus,
            policy,
            bindings,
            session: None,
        }
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn is_cycling(&self) -> bool {
        self.session.is_some()
    }

    pub fn status(&self) -> CycleStatus {
        match &self.session {
            Some(s) => CycleStatus {
                cycling: true,
                window_count: s.list.len(),
                cursor: s.cursor,
            },
            None => CycleStatus {
                cycling: false,
                window_count: 0,
                cursor: None,
            },
        }
    }

    /// Feed one key event from the grab handler.
    pub fn handle_key(&mut self, event: KeyEvent) -> Result<()> {
        match event {
            KeyEvent::Press { keysym, mods } => match self.bindings.lookup(keysym, mods) {
                Some(Action::Advance { backward }) => self.advance(backward, mods),
                Some(Action::Commit) if self.is_cycling() => self.commit(),
                Some(Action::Revert) if self.is_cycling() => self.revert(),
                _ => Ok(()),
            },
            KeyEvent::Release { remaining_mods } => {
                // a mouse button held through the cycle must not keep the
                // session alive once the real modifiers are up
                let remaining = remaining_mods & modmask::MODIFIER_BITS;
                let released_all = self
                    .session
                    .as_ref()
                    .is_some_and(|s| remaining & s.initial_mods == 0);
                if released_all { self.commit() } else { Ok(()) }
            }
        }
    }

    /// Move the selection one step. Opens a session first when Idle; a
    /// request arriving while already cycling only moves the cursor and
    /// never re-grabs or resets the watched modifiers.
    pub fn advance(&mut self, backward: bool, mods: u16) -> Result<()> {
        if self.session.is_none() {
            self.start_session(mods)?;
        }
        self.move_cursor(backward)
    }

    /// Open a session: acquire both grabs (all or nothing), build the
    /// initial candidate list, place the cursor on the focused window, and
    /// show the popup when there is something to choose between.
    pub fn start_session(&mut self, mods: u16) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let mods = mods & modmask::MODIFIER_BITS & !modmask::IGNORED;
        if mods == 0 {
            return Err(CycleError::InvalidBinding.into());
        }

        self.grabs.grab_keyboard()?;
        if let Err(e) = self.grabs.grab_pointer() {
            self.grabs.ungrab_keyboard();
            return Err(e.into());
        }

        self.session = Some(Session {
            initial_mods: mods,
            list: Vec::new(),
            cursor: None,
            initial_cursor: None,
            initial_window: None,
            keyboard_grabbed: true,
            pointer_grabbed: true,
            popup_open: false,
        });

        if let Err(e) = self.populate_initial() {
            self.teardown();
            return Err(e);
        }
        let status = self.status();
        info!(windows = status.window_count, cursor = ?status.cursor, "cycle session opened");
        Ok(())
    }

    fn populate_initial(&mut self) -> Result<()> {
        let flags = self.policy.flags();
        let all = self.registry.snapshot()?;
        let current = self.desktops.current_desktop()?;
        let (list, mut cursor) = reconcile(&all, current, &flags, None);

        if let Some(focused) = self.focus.focused()
            && let Some(pos) = list.iter().position(|w| w.handle == focused)
        {
            cursor = Some(pos);
        }

        let session = self.session.as_mut().expect("session exists during populate");
        session.list = list;
        session.cursor = cursor;
        session.initial_cursor = cursor;
        session.initial_window = cursor.map(|i| session.list[i].handle);
        self.refresh_popup();
        Ok(())
    }

    fn move_cursor(&mut self, backward: bool) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let len = session.list.len();
        if len == 0 {
            return Ok(());
        }
        let cur = session.cursor.unwrap_or(0);
        let next = if backward {
            if cur == 0 { len - 1 } else { cur - 1 }
        } else {
            (cur + 1) % len
        };
        session.cursor = Some(next);
        debug!(cursor = next, window = %session.list[next].handle, "cursor moved");

        self.refresh_popup();
        if self.policy.flags().activate_while_cycling {
            let target = self.window_at_cursor();
            self.activate(target.as_ref(), false, false)?;
        }
        Ok(())
    }

    /// End the session, activating the window under the cursor.
    pub fn commit(&mut self) -> Result<()> {
        let target = self.window_at_cursor();
        let result = self.activate(target.as_ref(), true, false);
        self.teardown();
        result
    }

    /// End the session, going back to the selection the session opened
    /// with. The original window is located by identity; the numeric slot
    /// is only a fallback for when it has closed meanwhile.
    pub fn revert(&mut self) -> Result<()> {
        let target = self.session.as_ref().and_then(|s| {
            if let Some(handle) = s.initial_window
                && let Some(w) = s.list.iter().find(|w| w.handle == handle)
            {
                return Some(w.clone());
            }
            let last = s.list.len().checked_sub(1)?;
            s.initial_cursor.and_then(|i| s.list.get(i.min(last)).cloned())
        });
        let result = self.activate(target.as_ref(), true, true);
        self.teardown();
        result
    }

    /// Forced teardown (host shutdown). Ends any active session through
    /// the revert path so the grabs and the popup are never leaked.
    pub fn shutdown(&mut self) {
        if self.is_cycling() {
            info!("shutting down mid-cycle, reverting");
            if let Err(e) = self.revert() {
                debug!("revert during shutdown failed: {e:#}");
            }
        }
    }

    /// Re-run reconciliation after a window add/remove notification.
    /// No-op while Idle.
    pub fn resync(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        let flags = self.policy.flags();
        let all = self.registry.snapshot()?;
        let current = self.desktops.current_desktop()?;

        let session = self.session.as_mut().expect("session exists during resync");
        let memo = session.cursor.map(|i| CursorMemo {
            window: session.list[i].handle,
            index: i,
        });
        let (list, cursor) = reconcile(&all, current, &flags, memo);
        debug!(windows = list.len(), cursor = ?cursor, "candidate list reconciled");
        session.list = list;
        session.cursor = cursor;
        self.refresh_popup();
        Ok(())
    }

    fn window_at_cursor(&self) -> Option<WindowInfo> {
        let session = self.session.as_ref()?;
        session.cursor.map(|i| session.list[i].clone())
    }

    /// Activation policy. `is_final` distinguishes a commit from a live
    /// preview; `reverted` marks a final activation the user backed away
    /// to, which must not be raised.
    fn activate(&mut self, window: Option<&WindowInfo>, is_final: bool, reverted: bool) -> Result<()> {
        let Some(window) = window else {
            return Ok(());
        };
        if window.iconic && !is_final {
            // icons are only restored on commit, never previewed
            return Ok(());
        }
        if !window.omnipresent() {
            let current = self.desktops.current_desktop()?;
            if window.desktop != current {
                self.desktops.switch_to(window.desktop)?;
            }
        }
        if !is_final {
            self.focus.skip_next_notification();
        }
        if let Err(e) = self.focus.focus(window.handle) {
            // the window can vanish between reconciliation and activation;
            // the remove notification will fix the list up
            debug!(window = %window.handle, "activation target gone: {e:#}");
            return Ok(());
        }
        if is_final && !reverted && self.policy.flags().raise_on_commit {
            if let Err(e) = self.focus.raise(window.handle) {
                debug!(window = %window.handle, "raise failed: {e:#}");
            }
        }
        Ok(())
    }

    fn refresh_popup(&mut self) {
        let budget = self.policy.flags().title_budget;
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let labels: Vec<String> = session
            .list
            .iter()
            .map(|w| truncate_label(w.label(), budget))
            .collect();
        let highlight = session.cursor.unwrap_or(0);
        let open = session.popup_open;
        let count = session.list.len();

        if open {
            if count == 0 {
                self.popup.close();
                self.session.as_mut().expect("session open").popup_open = false;
            } else {
                self.popup.update(labels, highlight);
            }
        } else if count > 1 {
            // a list of 0 or 1 does not warrant a popup
            self.popup.open(labels, highlight);
            self.session.as_mut().expect("session open").popup_open = true;
        }
    }

    /// Release every session-scoped resource. Safe on any exit path.
    fn teardown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if session.popup_open {
            self.popup.close();
        }
        if session.pointer_grabbed {
            self.grabs.ungrab_pointer();
        }
        if session.keyboard_grabbed {
            self.grabs.ungrab_keyboard();
        }
        info!("cycle session closed");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::bindings::keysym;
    use crate::config::PolicyFlags;
    use crate::errors::GrabKind;

    /// In-memory host shared by all mock services.
    #[derive(Debug)]
    struct Host {
        windows: Vec<WindowInfo>,
        focused: Option<WindowHandle>,
        desktop: u32,
        flags: PolicyFlags,
        keyboard_grabs: u32,
        pointer_grabs: u32,
        keyboard_fails: bool,
        pointer_fails: bool,
        focus_calls: Vec<WindowHandle>,
        raise_calls: Vec<WindowHandle>,
        switch_calls: Vec<u32>,
        skip_calls: u32,
        popup_events: Vec<PopupEvent>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum PopupEvent {
        Open(Vec<String>, usize),
        Update(Vec<String>, usize),
        Close,
    }

    impl Host {
        fn new(windows: Vec<WindowInfo>) -> Rc<RefCell<Host>> {
            Rc::new(RefCell::new(Host {
                windows,
                focused: None,
                desktop: 0,
                flags: PolicyFlags::default(),
                keyboard_grabs: 0,
                pointer_grabs: 0,
                keyboard_fails: false,
                pointer_fails: false,
                focus_calls: Vec::new(),
                raise_calls: Vec::new(),
                switch_calls: Vec::new(),
                skip_calls: 0,
                popup_events: Vec::new(),
            }))
        }
    }

    struct Registry(Rc<RefCell<Host>>);
    impl WindowRegistry for Registry {
        fn snapshot(&mut self) -> Result<Vec<WindowInfo>> {
            Ok(self.0.borrow().windows.clone())
        }
    }

    struct Grabs(Rc<RefCell<Host>>);
    impl GrabService for Grabs {
        fn grab_keyboard(&mut self) -> Result<(), CycleError> {
            let mut host = self.0.borrow_mut();
            if host.keyboard_fails {
                return Err(CycleError::GrabUnavailable(GrabKind::Keyboard));
            }
            host.keyboard_grabs += 1;
            Ok(())
        }
        fn grab_pointer(&mut self) -> Result<(), CycleError> {
            let mut host = self.0.borrow_mut();
            if host.pointer_fails {
                return Err(CycleError::GrabUnavailable(GrabKind::Pointer));
            }
            host.pointer_grabs += 1;
            Ok(())
        }
        fn ungrab_keyboard(&mut self) {
            self.0.borrow_mut().keyboard_grabs -= 1;
        }
        fn ungrab_pointer(&mut self) {
            self.0.borrow_mut().pointer_grabs -= 1;
        }
    }

    struct Popup(Rc<RefCell<Host>>);
    impl PopupDisplay for Popup {
        fn open(&mut self, labels: Vec<String>, highlight: usize) {
            self.0.borrow_mut().popup_events.push(PopupEvent::Open(labels, highlight));
        }
        fn update(&mut self, labels: Vec<String>, highlight: usize) {
            self.0.borrow_mut().popup_events.push(PopupEvent::Update(labels, highlight));
        }
        fn close(&mut self) {
            self.0.borrow_mut().popup_events.push(PopupEvent::Close);
        }
    }

    struct Desktops(Rc<RefCell<Host>>);
    impl DesktopService for Desktops {
        fn current_desktop(&mut self) -> Result<u32> {
            Ok(self.0.borrow().desktop)
        }
        fn switch_to(&mut self, desktop: u32) -> Result<()> {
            let mut host = self.0.borrow_mut();
            host.desktop = desktop;
            host.switch_calls.push(desktop);
            Ok(())
        }
    }

    struct Focus(Rc<RefCell<Host>>);
    impl FocusService for Focus {
        fn focused(&mut self) -> Option<WindowHandle> {
            self.0.borrow().focused
        }
        fn focus(&mut self, window: WindowHandle) -> Result<()> {
            let mut host = self.0.borrow_mut();
            host.focused = Some(window);
            host.focus_calls.push(window);
            Ok(())
        }
        fn raise(&mut self, window: WindowHandle) -> Result<()> {
            self.0.borrow_mut().raise_calls.push(window);
            Ok(())
        }
        fn skip_next_notification(&mut self) {
            self.0.borrow_mut().skip_calls += 1;
        }
    }

    struct Policy(Rc<RefCell<Host>>);
    impl PolicyStore for Policy {
        fn flags(&self) -> PolicyFlags {
            self.0.borrow().flags
        }
    }

    type TestController = CycleController<Registry, Grabs, Popup, Desktops, Focus, Policy>;

    fn controller(host: &Rc<RefCell<Host>>) -> TestController {
        CycleController::new(
            Registry(host.clone()),
            Grabs(host.clone()),
            Popup(host.clone()),
            Desktops(host.clone()),
            Focus(host.clone()),
            Policy(host.clone()),
        )
    }

    fn window(id: u32) -> WindowInfo {
        WindowInfo {
            handle: WindowHandle(id),
            title: format!("window {}", id),
            icon_title: format!("window {}", id),
            desktop: 0,
            iconic: false,
            skip_taskbar: false,
            normal: true,
            can_focus: true,
            focus_notify: false,
        }
    }

    const ALT: u16 = modmask::MOD1;
    /// Button1 bit of a KeyButMask, above the keyboard modifiers.
    const BUTTON1: u16 = 1 << 8;

    #[test]
    fn test_wraparound_both_directions() {
        let host = Host::new(vec![window(1), window(2), window(3)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        assert_eq!(ctl.status().cursor, Some(0));
        ctl.advance(true, 0).unwrap(); // backward wraps to the end
        assert_eq!(ctl.status().cursor, Some(2));
        ctl.advance(false, 0).unwrap(); // forward wraps back to 0
        assert_eq!(ctl.status().cursor, Some(0));
    }

    #[test]
    fn test_advance_without_modifier_is_invalid_binding() {
        let host = Host::new(vec![window(1)]);
        let mut ctl = controller(&host);
        let err = ctl.advance(false, 0).unwrap_err();
        assert_eq!(err.downcast_ref::<CycleError>(), Some(&CycleError::InvalidBinding));
        assert!(!ctl.is_cycling());
        assert_eq!(host.borrow().keyboard_grabs, 0);
    }

    #[test]
    fn test_lock_bits_alone_do_not_count_as_modifier() {
        let host = Host::new(vec![window(1)]);
        let mut ctl = controller(&host);
        let err = ctl.advance(false, modmask::LOCK | modmask::MOD2).unwrap_err();
        assert_eq!(err.downcast_ref::<CycleError>(), Some(&CycleError::InvalidBinding));
    }

    #[test]
    fn test_button_bits_alone_are_not_a_modifier() {
        let host = Host::new(vec![window(1)]);
        let mut ctl = controller(&host);
        let err = ctl.advance(false, BUTTON1).unwrap_err();
        assert_eq!(err.downcast_ref::<CycleError>(), Some(&CycleError::InvalidBinding));
    }

    #[test]
    fn test_held_mouse_button_not_watched_for_release() {
        let host = Host::new(vec![window(1), window(2)]);
        let mut ctl = controller(&host);
        ctl.advance(false, ALT | BUTTON1).unwrap();
        assert!(ctl.is_cycling());
        // Alt goes up while the button stays down: the session commits
        ctl.handle_key(KeyEvent::Release { remaining_mods: BUTTON1 }).unwrap();
        assert!(!ctl.is_cycling());
        assert_eq!(host.borrow().keyboard_grabs, 0);
    }

    #[test]
    fn test_grabs_acquired_once_and_released_on_commit() {
        let host = Host::new(vec![window(1), window(2)]);
        let mut ctl = controller(&host);
        ctl.advance(false, ALT).unwrap();
        // a second advance must not re-grab or reset the watched modifiers
        ctl.advance(false, ALT | modmask::SHIFT).unwrap();
        assert_eq!(host.borrow().keyboard_grabs, 1);
        assert_eq!(host.borrow().pointer_grabs, 1);
        ctl.commit().unwrap();
        assert_eq!(host.borrow().keyboard_grabs, 0);
        assert_eq!(host.borrow().pointer_grabs, 0);
        assert!(!ctl.is_cycling());
    }

    #[test]
    fn test_keyboard_grab_released_when_pointer_grab_fails() {
        let host = Host::new(vec![window(1), window(2)]);
        host.borrow_mut().pointer_fails = true;
        let mut ctl = controller(&host);
        let err = ctl.advance(false, ALT).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CycleError>(),
            Some(&CycleError::GrabUnavailable(GrabKind::Pointer))
        );
        assert!(!ctl.is_cycling());
        assert_eq!(host.borrow().keyboard_grabs, 0);
        assert_eq!(host.borrow().pointer_grabs, 0);
    }

    #[test]
    fn test_session_starts_on_focused_window() {
        let host = Host::new(vec![window(1), window(2), window(3)]);
        host.borrow_mut().focused = Some(WindowHandle(2));
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        assert_eq!(ctl.status().cursor, Some(1));
    }

    #[test]
    fn test_popup_opens_only_for_two_or_more() {
        let host = Host::new(vec![window(1)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        assert!(host.borrow().popup_events.is_empty());
        ctl.commit().unwrap();

        let host = Host::new(vec![window(1), window(2)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        assert!(matches!(
            host.borrow().popup_events.first(),
            Some(PopupEvent::Open(labels, 0)) if labels.len() == 2
        ));
        ctl.commit().unwrap();
        assert_eq!(host.borrow().popup_events.last(), Some(&PopupEvent::Close));
    }

    #[test]
    fn test_empty_candidate_list_session_is_inert() {
        let host = Host::new(Vec::new());
        let mut ctl = controller(&host);
        ctl.advance(false, ALT).unwrap();
        assert!(ctl.is_cycling());
        assert_eq!(ctl.status().window_count, 0);
        assert!(host.borrow().popup_events.is_empty());
        // terminating key event returns to Idle with no activation
        ctl.handle_key(KeyEvent::Release { remaining_mods: 0 }).unwrap();
        assert!(!ctl.is_cycling());
        assert!(host.borrow().focus_calls.is_empty());
        assert_eq!(host.borrow().keyboard_grabs, 0);
    }

    #[test]
    fn test_preview_activation_skips_focus_history() {
        let host = Host::new(vec![window(1), window(2), window(3)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap();
        let host_ref = host.borrow();
        assert_eq!(host_ref.focus_calls, vec![WindowHandle(2)]);
        assert_eq!(host_ref.skip_calls, 1);
        assert!(host_ref.raise_calls.is_empty());
    }

    #[test]
    fn test_preview_disabled_by_policy() {
        let host = Host::new(vec![window(1), window(2)]);
        host.borrow_mut().flags.activate_while_cycling = false;
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap();
        assert!(host.borrow().focus_calls.is_empty());
    }

    #[test]
    fn test_iconic_window_not_previewed_but_committed() {
        let mut icon = window(3);
        icon.iconic = true;
        let host = Host::new(vec![window(1), window(2), icon]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap();
        ctl.advance(false, 0).unwrap(); // cursor on the iconic window
        assert_eq!(ctl.status().cursor, Some(2));
        assert_eq!(host.borrow().focus_calls, vec![WindowHandle(2)]);
        ctl.commit().unwrap();
        assert_eq!(
            host.borrow().focus_calls,
            vec![WindowHandle(2), WindowHandle(3)]
        );
    }

    #[test]
    fn test_commit_raises_when_policy_says_so() {
        let host = Host::new(vec![window(1), window(2)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap();
        ctl.handle_key(KeyEvent::Release { remaining_mods: 0 }).unwrap();
        let host_ref = host.borrow();
        assert_eq!(host_ref.raise_calls, vec![WindowHandle(2)]);
        assert_eq!(*host_ref.focus_calls.last().unwrap(), WindowHandle(2));
    }

    #[test]
    fn test_commit_does_not_raise_when_disabled() {
        let host = Host::new(vec![window(1), window(2)]);
        host.borrow_mut().flags.raise_on_commit = false;
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap();
        ctl.commit().unwrap();
        assert!(host.borrow().raise_calls.is_empty());
    }

    #[test]
    fn test_commit_switches_desktop_before_focus() {
        let mut away = window(2);
        away.desktop = 3;
        let host = Host::new(vec![window(1), away]);
        host.borrow_mut().flags.include_all_desktops = true;
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap();
        ctl.commit().unwrap();
        let host_ref = host.borrow();
        // the preview already switched; the commit finds itself home
        assert_eq!(host_ref.switch_calls, vec![3]);
        assert_eq!(host_ref.desktop, 3);
        assert_eq!(*host_ref.focus_calls.last().unwrap(), WindowHandle(2));
    }

    #[test]
    fn test_revert_restores_initial_selection_without_raise() {
        let host = Host::new(vec![window(1), window(2), window(3), window(4)]);
        host.borrow_mut().focused = Some(WindowHandle(1));
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        for _ in 0..3 {
            ctl.advance(false, 0).unwrap();
        }
        assert_eq!(ctl.status().cursor, Some(3));
        ctl.handle_key(KeyEvent::Press { keysym: keysym::ESCAPE, mods: ALT }).unwrap();
        let host_ref = host.borrow();
        // final activation targets the original window, but never raises it
        assert_eq!(*host_ref.focus_calls.last().unwrap(), WindowHandle(1));
        assert!(host_ref.raise_calls.is_empty());
        drop(host_ref);
        assert!(!ctl.is_cycling());
        assert_eq!(host.borrow().keyboard_grabs, 0);
    }

    #[test]
    fn test_revert_finds_initial_window_after_list_churn() {
        let host = Host::new(vec![window(1), window(2), window(3)]);
        host.borrow_mut().focused = Some(WindowHandle(1));
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap();
        // a new window opens ahead of the original selection
        host.borrow_mut().windows.insert(0, window(9));
        ctl.resync().unwrap();
        ctl.revert().unwrap();
        assert_eq!(*host.borrow().focus_calls.last().unwrap(), WindowHandle(1));
    }

    #[test]
    fn test_resync_keeps_cursor_identity() {
        let host = Host::new(vec![window(1), window(2), window(3)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap(); // cursor on window 2
        host.borrow_mut().windows.retain(|w| w.handle != WindowHandle(1));
        ctl.resync().unwrap();
        assert_eq!(ctl.status().cursor, Some(0));
        ctl.commit().unwrap();
        assert_eq!(*host.borrow().focus_calls.last().unwrap(), WindowHandle(2));
    }

    #[test]
    fn test_resync_clamps_cursor_when_tail_window_closes() {
        let host = Host::new(vec![window(1), window(2), window(3)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.advance(false, 0).unwrap();
        ctl.advance(false, 0).unwrap(); // cursor on window 3
        host.borrow_mut().windows.retain(|w| w.handle != WindowHandle(3));
        ctl.resync().unwrap();
        assert_eq!(ctl.status().cursor, Some(1));
        assert_eq!(ctl.status().window_count, 2);
    }

    #[test]
    fn test_resync_refreshes_popup() {
        let host = Host::new(vec![window(1), window(2), window(3)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        host.borrow_mut().windows.push(window(4));
        ctl.resync().unwrap();
        assert!(matches!(
            host.borrow().popup_events.last(),
            Some(PopupEvent::Update(labels, _)) if labels.len() == 4
        ));
        ctl.commit().unwrap();
    }

    #[test]
    fn test_policy_change_applies_on_next_reconciliation() {
        let mut icon = window(3);
        icon.iconic = true;
        let host = Host::new(vec![window(1), window(2), icon]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        assert_eq!(ctl.status().window_count, 3);
        host.borrow_mut().flags.include_icons = false;
        ctl.resync().unwrap();
        assert_eq!(ctl.status().window_count, 2);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let host = Host::new(vec![window(1), window(2)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT).unwrap();
        ctl.shutdown();
        assert!(!ctl.is_cycling());
        let host_ref = host.borrow();
        assert_eq!(host_ref.keyboard_grabs, 0);
        assert_eq!(host_ref.pointer_grabs, 0);
        assert_eq!(host_ref.popup_events.last(), Some(&PopupEvent::Close));
    }

    #[test]
    fn test_shutdown_while_idle_is_a_no_op() {
        let host = Host::new(vec![window(1)]);
        let mut ctl = controller(&host);
        ctl.shutdown();
        assert!(host.borrow().focus_calls.is_empty());
    }

    #[test]
    fn test_release_of_unrelated_modifier_keeps_cycling() {
        let host = Host::new(vec![window(1), window(2)]);
        let mut ctl = controller(&host);
        ctl.start_session(ALT | modmask::SHIFT).unwrap();
        // Shift goes up, Alt is still down
        ctl.handle_key(KeyEvent::Release { remaining_mods: ALT }).unwrap();
        assert!(ctl.is_cycling());
        ctl.handle_key(KeyEvent::Release { remaining_mods: 0 }).unwrap();
        assert!(!ctl.is_cycling());
    }

    #[test]
    fn test_end_to_end_scenario() {
        // T1(normal), T2(normal), T3(iconic) on desktop 0, T2 focused
        let mut t3 = window(3);
        t3.iconic = true;
        let host = Host::new(vec![window(1), window(2), t3]);
        host.borrow_mut().focused = Some(WindowHandle(2));
        let mut ctl = controller(&host);

        ctl.handle_key(KeyEvent::Press { keysym: keysym::TAB, mods: ALT }).unwrap();
        // session opened on T2, first advance lands on T3 (iconic, no preview)
        assert_eq!(ctl.status().cursor, Some(2));
        assert!(host.borrow().focus_calls.is_empty());

        ctl.handle_key(KeyEvent::Press { keysym: keysym::TAB, mods: ALT }).unwrap();
        // wrapped to T1, previewed
        assert_eq!(ctl.status().cursor, Some(0));
        assert_eq!(*host.borrow().focus_calls.last().unwrap(), WindowHandle(1));

        ctl.handle_key(KeyEvent::Press { keysym: keysym::RETURN, mods: ALT }).unwrap();
        let host_ref = host.borrow();
        assert_eq!(*host_ref.focus_calls.last().unwrap(), WindowHandle(1));
        assert_eq!(host_ref.raise_calls, vec![WindowHandle(1)]);
        drop(host_ref);
        assert!(!ctl.is_cycling());
    }
}
