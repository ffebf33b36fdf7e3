//! X11 host adapters.
//!
//! Everything the controller consumes through the `services` traits is
//! implemented here on top of `x11rb`: EWMH property reads for the window
//! registry, active keyboard/pointer grabs for the session, client
//! messages for focus/desktop changes, and the root event stream feeding
//! the daemon loop.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::bindings::{BindingTable, KeyEvent, modmask};
use crate::errors::{CycleError, GrabKind};
use crate::focus_tracker::FocusTracker;
use crate::services::{DesktopService, FocusService, GrabService, WindowRegistry};
use crate::ui::POPUP_WM_CLASS;
use crate::window::{WindowHandle, WindowInfo};

/// IconicState from ICCCM WM_STATE.
const WM_STATE_ICONIC: u32 = 3;
/// _NET_ACTIVE_WINDOW source indication: pager/switcher.
const SOURCE_PAGER: u32 = 2;

/// Events the daemon loop consumes, already translated from raw X11.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Key(KeyEvent),
    /// _NET_CLIENT_LIST changed on the root: a window came or went.
    ClientListChanged,
    /// _NET_ACTIVE_WINDOW changed on the root.
    FocusChanged(Option<WindowHandle>),
}

/// Interned atoms this daemon cares about.
#[derive(Debug, Clone, Copy)]
pub struct Atoms {
    pub net_client_list: Atom,
    pub net_current_desktop: Atom,
    pub net_active_window: Atom,
    pub net_wm_name: Atom,
    pub net_wm_icon_name: Atom,
    pub net_wm_desktop: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_window_type_normal: Atom,
    pub net_wm_window_type_dialog: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_hidden: Atom,
    pub net_wm_state_skip_taskbar: Atom,
    pub wm_protocols: Atom,
    pub wm_take_focus: Atom,
    pub wm_state: Atom,
    pub utf8_string: Atom,
}

impl Atoms {
    pub fn new(conn: &RustConnection) -> Result<Self> {
        let intern = |name: &str| -> Result<Atom> {
            Ok(conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
        };

        Ok(Atoms {
            net_client_list: intern("_NET_CLIENT_LIST")?,
            net_current_desktop: intern("_NET_CURRENT_DESKTOP")?,
            net_active_window: intern("_NET_ACTIVE_WINDOW")?,
            net_wm_name: intern("_NET_WM_NAME")?,
            net_wm_icon_name: intern("_NET_WM_ICON_NAME")?,
            net_wm_desktop: intern("_NET_WM_DESKTOP")?,
            net_wm_window_type: intern("_NET_WM_WINDOW_TYPE")?,
            net_wm_window_type_normal: intern("_NET_WM_WINDOW_TYPE_NORMAL")?,
            net_wm_window_type_dialog: intern("_NET_WM_WINDOW_TYPE_DIALOG")?,
            net_wm_state: intern("_NET_WM_STATE")?,
            net_wm_state_hidden: intern("_NET_WM_STATE_HIDDEN")?,
            net_wm_state_skip_taskbar: intern("_NET_WM_STATE_SKIP_TASKBAR")?,
            wm_protocols: intern("WM_PROTOCOLS")?,
            wm_take_focus: intern("WM_TAKE_FOCUS")?,
            wm_state: intern("WM_STATE")?,
            utf8_string: intern("UTF8_STRING")?,
        })
    }
}

/// First-column keysym lookup plus the modifier bit each keycode carries.
#[derive(Debug)]
pub struct Keymap {
    min_keycode: u8,
    keysyms_per_keycode: u8,
    keysyms: Vec<u32>,
    modifier_bits: HashMap<u8, u16>,
}

impl Keymap {
    pub fn load(conn: &RustConnection) -> Result<Self> {
        let setup = conn.setup();
        let min = setup.min_keycode;
        let max = setup.max_keycode;
        let mapping = conn
            .get_keyboard_mapping(min, max - min + 1)?
            .reply()
            .context("keyboard mapping")?;

        let modifiers = conn.get_modifier_mapping()?.reply().context("modifier mapping")?;
        let per_modifier = modifiers.keycodes_per_modifier() as usize;
        let mut modifier_bits = HashMap::new();
        for (i, chunk) in modifiers.keycodes.chunks(per_modifier).enumerate() {
            for &keycode in chunk {
                if keycode != 0 {
                    modifier_bits.insert(keycode, 1u16 << i);
                }
            }
        }

        Ok(Keymap {
            min_keycode: min,
            keysyms_per_keycode: mapping.keysyms_per_keycode,
            keysyms: mapping.keysyms,
            modifier_bits,
        })
    }

    /// Unshifted keysym for a keycode, 0 if unmapped.
    pub fn keysym(&self, keycode: u8) -> u32 {
        if keycode < self.min_keycode {
            return 0;
        }
        let index = (keycode - self.min_keycode) as usize * self.keysyms_per_keycode as usize;
        self.keysyms.get(index).copied().unwrap_or(0)
    }

    pub fn keycodes_for(&self, keysym: u32) -> Vec<u8> {
        let mut keycodes = Vec::new();
        let per = self.keysyms_per_keycode as usize;
        for (i, chunk) in self.keysyms.chunks(per).enumerate() {
            if chunk.first() == Some(&keysym) {
                keycodes.push(self.min_keycode + i as u8);
            }
        }
        keycodes
    }

    /// Modifier bit set by a keycode, 0 for non-modifier keys.
    pub fn modifier_bit(&self, keycode: u8) -> u16 {
        self.modifier_bits.get(&keycode).copied().unwrap_or(0)
    }
}

/// Shared X11 connection state.
pub struct XClient {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
    keymap: Keymap,
}

impl XClient {
    pub fn connect() -> Result<Arc<Self>> {
        let (conn, screen_num) = x11rb::connect(None).context("connecting to X server")?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = Atoms::new(&conn)?;
        let keymap = Keymap::load(&conn)?;

        // Root property changes drive reconciliation and focus tracking.
        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )?;
        conn.flush()?;

        info!(screen = screen_num, "connected to X server");
        Ok(Arc::new(XClient {
            conn,
            root,
            atoms,
            keymap,
        }))
    }

    /// Passively grab the trigger chords on the root window so the first
    /// Tab press reaches us while Idle. Lock and NumLock variants are
    /// grabbed alongside each chord.
    pub fn grab_cycle_keys(&self, bindings: &BindingTable) -> Result<()> {
        const LOCK_VARIANTS: [u16; 4] = [
            0,
            crate::bindings::modmask::LOCK,
            crate::bindings::modmask::MOD2,
            crate::bindings::modmask::LOCK | crate::bindings::modmask::MOD2,
        ];
        for (keysym, mods) in bindings.advance_chords() {
            let keycodes = self.keymap.keycodes_for(keysym);
            if keycodes.is_empty() {
                warn!("no keycode for bound keysym 0x{keysym:x}");
                continue;
            }
            for keycode in keycodes {
                for variant in LOCK_VARIANTS {
                    if let Err(e) = self.conn.grab_key(
                        false,
                        self.root,
                        ModMask::from(mods | variant),
                        keycode,
                        GrabMode::ASYNC,
                        GrabMode::ASYNC,
                    ) {
                        warn!("Failed to grab chord (keycode {keycode}): {e}");
                    }
                }
            }
        }
        self.conn.flush()?;
        Ok(())
    }

    /// Current _NET_CLIENT_LIST, in the window manager's enumeration order.
    pub fn client_list(&self) -> Result<Vec<WindowHandle>> {
        let handles = self
            .prop32(self.root, self.atoms.net_client_list, AtomEnum::WINDOW.into())
            .unwrap_or_default();
        Ok(handles.into_iter().map(WindowHandle).collect())
    }

    pub fn current_desktop(&self) -> Result<u32> {
        self.prop32(self.root, self.atoms.net_current_desktop, AtomEnum::CARDINAL.into())
            .and_then(|v| v.first().copied())
            .context("_NET_CURRENT_DESKTOP unset; is an EWMH window manager running?")
    }

    pub fn active_window(&self) -> Option<WindowHandle> {
        self.prop32(self.root, self.atoms.net_active_window, AtomEnum::WINDOW.into())
            .and_then(|v| v.first().copied())
            .filter(|&w| w != 0)
            .map(WindowHandle)
    }

    /// Snapshot one window. Returns None when the window vanished or is
    /// the daemon's own popup.
    fn window_info(&self, handle: WindowHandle, current_desktop: u32) -> Option<WindowInfo> {
        let win = handle.0;

        if self.wm_class_instance(win).as_deref() == Some(POPUP_WM_CLASS) {
            return None;
        }

        let title = self
            .text_prop(win, self.atoms.net_wm_name, self.atoms.utf8_string)
            .or_else(|| self.text_prop(win, AtomEnum::WM_NAME.into(), AtomEnum::STRING.into()))
            .unwrap_or_default();
        let icon_title = self
            .text_prop(win, self.atoms.net_wm_icon_name, self.atoms.utf8_string)
            .or_else(|| self.text_prop(win, AtomEnum::WM_ICON_NAME.into(), AtomEnum::STRING.into()))
            .unwrap_or_else(|| title.clone());

        let desktop = self
            .prop32(win, self.atoms.net_wm_desktop, AtomEnum::CARDINAL.into())
            .and_then(|v| v.first().copied())
            .unwrap_or(current_desktop);

        let states = self
            .prop32(win, self.atoms.net_wm_state, AtomEnum::ATOM.into())
            .unwrap_or_default();
        let iconic = states.contains(&self.atoms.net_wm_state_hidden) || self.icccm_iconic(win);
        let skip_taskbar = states.contains(&self.atoms.net_wm_state_skip_taskbar);

        let types = self
            .prop32(win, self.atoms.net_wm_window_type, AtomEnum::ATOM.into())
            .unwrap_or_default();
        // untyped windows are regular windows per EWMH
        let normal = types.is_empty()
            || types.contains(&self.atoms.net_wm_window_type_normal)
            || types.contains(&self.atoms.net_wm_window_type_dialog);

        let can_focus = self.input_hint(win);
        let protocols = self
            .prop32(win, self.atoms.wm_protocols, AtomEnum::ATOM.into())
            .unwrap_or_default();
        let focus_notify = protocols.contains(&self.atoms.wm_take_focus);

        Some(WindowInfo {
            handle,
            title,
            icon_title,
            desktop,
            iconic,
            skip_taskbar,
            normal,
            can_focus,
            focus_notify,
        })
    }

    fn icccm_iconic(&self, win: Window) -> bool {
        self.prop32(win, self.atoms.wm_state, self.atoms.wm_state)
            .and_then(|v| v.first().copied())
            == Some(WM_STATE_ICONIC)
    }

    /// WM_HINTS input flag; absent hints mean the window takes focus.
    fn input_hint(&self, win: Window) -> bool {
        const INPUT_HINT: u32 = 1 << 0;
        match self.prop32(win, AtomEnum::WM_HINTS.into(), AtomEnum::WM_HINTS.into()) {
            Some(hints) if hints.len() >= 2 && hints[0] & INPUT_HINT != 0 => hints[1] != 0,
            _ => true,
        }
    }

    fn wm_class_instance(&self, win: Window) -> Option<String> {
        let raw = self.raw_prop(win, AtomEnum::WM_CLASS.into(), AtomEnum::STRING.into())?;
        let instance = raw.split(|&b| b == 0).next()?;
        Some(String::from_utf8_lossy(instance).into_owned())
    }

    fn text_prop(&self, win: Window, prop: Atom, type_: Atom) -> Option<String> {
        let raw = self.raw_prop(win, prop, type_)?;
        if raw.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    fn raw_prop(&self, win: Window, prop: Atom, type_: Atom) -> Option<Vec<u8>> {
        let reply = self
            .conn
            .get_property(false, win, prop, type_, 0, 1024)
            .ok()?
            .reply()
            .ok()?;
        if reply.value.is_empty() {
            return None;
        }
        Some(reply.value)
    }

    fn prop32(&self, win: Window, prop: Atom, type_: Atom) -> Option<Vec<u32>> {
        let reply = self
            .conn
            .get_property(false, win, prop, type_, 0, 1024)
            .ok()?
            .reply()
            .ok()?;
        let values: Vec<u32> = reply.value32()?.collect();
        if values.is_empty() { None } else { Some(values) }
    }

    fn send_root_message(&self, window: Window, type_: Atom, data: [u32; 5]) -> Result<()> {
        let event = ClientMessageEvent::new(32, window, type_, data);
        self.conn.send_event(
            false,
            self.root,
            EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
            event,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    /// Blocking loop translating raw X11 events into [`HostEvent`]s. Runs
    /// on a dedicated thread; exits when the receiver side goes away or
    /// the connection breaks.
    pub fn event_loop(self: Arc<Self>, tx: mpsc::UnboundedSender<HostEvent>) {
        loop {
            let event = match self.conn.wait_for_event() {
                Ok(event) => event,
                Err(e) => {
                    error!("X11 connection lost: {e}");
                    return;
                }
            };
            let translated = match event {
                Event::KeyPress(e) => Some(HostEvent::Key(KeyEvent::Press {
                    keysym: self.keymap.keysym(e.detail),
                    // KeyButMask carries pointer buttons in its high bits
                    mods: u16::from(e.state) & modmask::MODIFIER_BITS,
                })),
                Event::KeyRelease(e) => {
                    // state still contains the key going up
                    let remaining = u16::from(e.state)
                        & modmask::MODIFIER_BITS
                        & !self.keymap.modifier_bit(e.detail);
                    Some(HostEvent::Key(KeyEvent::Release {
                        remaining_mods: remaining,
                    }))
                }
                Event::PropertyNotify(e) if e.window == self.root => {
                    if e.atom == self.atoms.net_client_list {
                        Some(HostEvent::ClientListChanged)
                    } else if e.atom == self.atoms.net_active_window {
                        Some(HostEvent::FocusChanged(self.active_window()))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some(host_event) = translated
                && tx.send(host_event).is_err()
            {
                debug!("host event receiver dropped, stopping X event loop");
                return;
            }
        }
    }
}

/// [`WindowRegistry`] over _NET_CLIENT_LIST.
pub struct X11Registry {
    x: Arc<XClient>,
}

impl X11Registry {
    pub fn new(x: Arc<XClient>) -> Self {
        X11Registry { x }
    }
}

impl WindowRegistry for X11Registry {
    fn snapshot(&mut self) -> Result<Vec<WindowInfo>> {
        let current = self.x.current_desktop()?;
        let mut windows = Vec::new();
        for handle in self.x.client_list()? {
            // a window can close between the list read and the property
            // reads; it simply drops out of the snapshot
            if let Some(info) = self.x.window_info(handle, current) {
                windows.push(info);
            }
        }
        Ok(windows)
    }
}

/// Active grabs on the root window for the duration of a session.
pub struct X11Grabs {
    x: Arc<XClient>,
}

impl X11Grabs {
    pub fn new(x: Arc<XClient>) -> Self {
        X11Grabs { x }
    }
}

impl GrabService for X11Grabs {
    fn grab_keyboard(&mut self) -> Result<(), CycleError> {
        let status = self
            .x
            .conn
            .grab_keyboard(false, self.x.root, x11rb::CURRENT_TIME, GrabMode::ASYNC, GrabMode::ASYNC)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .map(|reply| reply.status);
        match status {
            Some(GrabStatus::SUCCESS) => Ok(()),
            _ => Err(CycleError::GrabUnavailable(GrabKind::Keyboard)),
        }
    }

    fn grab_pointer(&mut self) -> Result<(), CycleError> {
        // no pointer events are wanted; the grab only suppresses ordinary
        // hover focus while the user cycles
        let status = self
            .x
            .conn
            .grab_pointer(
                false,
                self.x.root,
                EventMask::NO_EVENT,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                x11rb::NONE,
                x11rb::CURRENT_TIME,
            )
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .map(|reply| reply.status);
        match status {
            Some(GrabStatus::SUCCESS) => Ok(()),
            _ => Err(CycleError::GrabUnavailable(GrabKind::Pointer)),
        }
    }

    fn ungrab_keyboard(&mut self) {
        let _ = self.x.conn.ungrab_keyboard(x11rb::CURRENT_TIME);
        let _ = self.x.conn.flush();
    }

    fn ungrab_pointer(&mut self) {
        let _ = self.x.conn.ungrab_pointer(x11rb::CURRENT_TIME);
        let _ = self.x.conn.flush();
    }
}

/// [`DesktopService`] over _NET_CURRENT_DESKTOP.
pub struct X11Desktops {
    x: Arc<XClient>,
}

impl X11Desktops {
    pub fn new(x: Arc<XClient>) -> Self {
        X11Desktops { x }
    }
}

impl DesktopService for X11Desktops {
    fn current_desktop(&mut self) -> Result<u32> {
        self.x.current_desktop()
    }

    fn switch_to(&mut self, desktop: u32) -> Result<()> {
        debug!(desktop, "switching desktop");
        self.x
            .send_root_message(self.x.root, self.x.atoms.net_current_desktop, [desktop, 0, 0, 0, 0])
    }
}

/// [`FocusService`] over _NET_ACTIVE_WINDOW, sharing the daemon's focus
/// tracker for history bookkeeping and the preview skip.
pub struct X11Focus {
    x: Arc<XClient>,
    tracker: Rc<RefCell<FocusTracker>>,
}

impl X11Focus {
    pub fn new(x: Arc<XClient>, tracker: Rc<RefCell<FocusTracker>>) -> Self {
        X11Focus { x, tracker }
    }
}

impl FocusService for X11Focus {
    fn focused(&mut self) -> Option<WindowHandle> {
        self.tracker
            .borrow()
            .focused()
            .or_else(|| self.x.active_window())
    }

    fn focus(&mut self, window: WindowHandle) -> Result<()> {
        self.x.send_root_message(
            window.0,
            self.x.atoms.net_active_window,
            [SOURCE_PAGER, x11rb::CURRENT_TIME, 0, 0, 0],
        )
    }

    fn raise(&mut self, window: WindowHandle) -> Result<()> {
        self.x
            .conn
            .configure_window(window.0, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
        self.x.conn.flush()?;
        Ok(())
    }

    fn skip_next_notification(&mut self) {
        self.tracker.borrow_mut().skip_next_notification();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keymap_lookup() {
        let keymap = Keymap {
            min_keycode: 8,
            keysyms_per_keycode: 2,
            // keycode 8 -> Tab, keycode 9 -> Return, keycode 10 -> unmapped
            keysyms: vec![0xff09, 0xfe20, 0xff0d, 0, 0, 0],
            modifier_bits: HashMap::from([(64, 1 << 3)]),
        };
        assert_eq!(keymap.keysym(8), 0xff09);
        assert_eq!(keymap.keysym(9), 0xff0d);
        assert_eq!(keymap.keysym(10), 0);
        assert_eq!(keymap.keysym(7), 0);
        assert_eq!(keymap.keycodes_for(0xff09), vec![8]);
        assert_eq!(keymap.keycodes_for(0xffff), Vec::<u8>::new());
        assert_eq!(keymap.modifier_bit(64), 1 << 3);
        assert_eq!(keymap.modifier_bit(8), 0);
    }
}
