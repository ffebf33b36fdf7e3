//! Daemon event loop.
//!
//! One task owns the [`CycleController`] and serializes everything that can
//! touch it: translated X11 events, IPC requests from the CLI client, and
//! the shutdown signal. The GTK popup runs on the main thread and is only
//! reached through the UI command channel.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::controller::CycleController;
use crate::errors::CycleError;
use crate::focus_tracker::FocusTracker;
use crate::ipc::{IpcCommand, IpcResponse};
use crate::socket_server::{IpcRequest, start_server};
use crate::ui_commands::{ChannelPopup, UiCommand};
use crate::window::WindowHandle;
use crate::x11::{HostEvent, X11Desktops, X11Focus, X11Grabs, X11Registry, XClient};

type Controller =
    CycleController<X11Registry, X11Grabs, ChannelPopup, X11Desktops, X11Focus, Config>;

/// Removes the pidfile when the daemon exits.
pub struct PidfileGuard {
    path: PathBuf,
}

impl Drop for PidfileGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && self.path.exists()
        {
            warn!("Failed to remove pidfile: {e}");
        }
    }
}

fn pidfile_path() -> Result<PathBuf> {
    let runtime_dir = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .context("Could not determine runtime directory")?;
    Ok(runtime_dir.join("x11-alttab.pid"))
}

/// Write the pidfile, refusing to start when another live daemon holds it.
/// A pidfile whose process is gone is treated as stale and replaced.
pub fn acquire_pidfile() -> Result<PidfileGuard> {
    let path = pidfile_path()?;

    if let Ok(contents) = fs::read_to_string(&path) {
        let pid = contents.trim();
        if !pid.is_empty() && Path::new("/proc").join(pid).exists() {
            bail!("Another daemon is already running (pid {pid})");
        }
        info!("Removing stale pidfile at {}", path.display());
        fs::remove_file(&path).ok();
    }

    fs::write(&path, std::process::id().to_string())
        .with_context(|| format!("Failed to write pidfile at {}", path.display()))?;
    Ok(PidfileGuard { path })
}

pub async fn run_daemon(config: Config, ui_tx: mpsc::UnboundedSender<UiCommand>) -> Result<()> {
    let _pidfile = acquire_pidfile()?;

    let x = XClient::connect()?;
    let tracker = Rc::new(RefCell::new(FocusTracker::new()));
    if let Some(active) = x.active_window() {
        tracker.borrow_mut().note_focus(active);
    }

    let mut controller: Controller = CycleController::new(
        X11Registry::new(Arc::clone(&x)),
        X11Grabs::new(Arc::clone(&x)),
        ChannelPopup::new(ui_tx),
        X11Desktops::new(Arc::clone(&x)),
        X11Focus::new(Arc::clone(&x), Rc::clone(&tracker)),
        config,
    );

    x.grab_cycle_keys(controller.bindings())?;
    let mut known = x.client_list()?;
    info!(windows = known.len(), "daemon ready");

    let (host_tx, mut host_rx) = mpsc::unbounded_channel();
    {
        let x = Arc::clone(&x);
        std::thread::spawn(move || x.event_loop(host_tx));
    }

    let (mut ipc_rx, _socket_guard) = start_server().await?;

    loop {
        tokio::select! {
            event = host_rx.recv() => {
                let Some(event) = event else {
                    bail!("X11 event stream ended");
                };
                handle_host_event(&mut controller, &tracker, &x, &mut known, event);
            }
            request = ipc_rx.recv() => {
                let Some(request) = request else {
                    bail!("IPC server stopped");
                };
                if handle_ipc_request(&mut controller, request) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                controller.shutdown();
                break;
            }
        }
    }

    Ok(())
}

fn handle_host_event(
    controller: &mut Controller,
    tracker: &Rc<RefCell<FocusTracker>>,
    x: &Arc<XClient>,
    known: &mut Vec<WindowHandle>,
    event: HostEvent,
) {
    match event {
        HostEvent::Key(key) => {
            if let Err(e) = controller.handle_key(key) {
                warn!("key handling failed: {e:#}");
            }
        }
        HostEvent::ClientListChanged => {
            let fresh = match x.client_list() {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("client list read failed: {e:#}");
                    return;
                }
            };
            for &gone in known.iter().filter(|w| !fresh.contains(*w)) {
                debug!(window = %gone, "window closed");
                tracker.borrow_mut().forget(gone);
            }
            *known = fresh;
            if let Err(e) = controller.resync() {
                warn!("reconciliation failed: {e:#}");
            }
        }
        HostEvent::FocusChanged(Some(window)) => {
            tracker.borrow_mut().note_focus(window);
        }
        HostEvent::FocusChanged(None) => {
            tracker.borrow_mut().note_unfocus();
        }
    }
}

/// Dispatch one IPC request and answer it. Returns true when the daemon
/// should exit.
fn handle_ipc_request(controller: &mut Controller, request: IpcRequest) -> bool {
    let mut should_exit = false;
    let response = match request.command {
        IpcCommand::Next => reply_for(controller.advance(false, 0)),
        IpcCommand::Prev => reply_for(controller.advance(true, 0)),
        IpcCommand::Select => {
            if controller.is_cycling() {
                reply_for(controller.commit())
            } else {
                IpcResponse::Error("no cycle session is open".to_string())
            }
        }
        IpcCommand::Cancel => {
            if controller.is_cycling() {
                reply_for(controller.revert())
            } else {
                IpcResponse::Error("no cycle session is open".to_string())
            }
        }
        IpcCommand::Status => {
            let status = controller.status();
            IpcResponse::Status {
                cycling: status.cycling,
                window_count: status.window_count,
                cursor: status.cursor,
            }
        }
        IpcCommand::Shutdown => {
            controller.shutdown();
            should_exit = true;
            IpcResponse::Ok
        }
    };
    if request.reply.send(response).is_err() {
        debug!("IPC client went away before the reply");
    }
    should_exit
}

fn reply_for(result: Result<()>) -> IpcResponse {
    match result {
        Ok(()) => IpcResponse::Ok,
        Err(e) => match e.downcast_ref::<CycleError>() {
            Some(cycle_error) => IpcResponse::Error(cycle_error.to_string()),
            None => IpcResponse::Error(format!("{e:#}")),
        },
    }
}
