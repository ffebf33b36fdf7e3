mod bindings;
mod config;
mod controller;
mod daemon;
mod errors;
mod filter;
mod focus_tracker;
mod ipc;
mod reconcile;
mod services;
mod socket_client;
mod socket_server;
mod ui;
mod ui_commands;
mod ui_handler;
mod window;
mod x11;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use config::{Command, Config};
use gtk4::prelude::*;
use ipc::IpcCommand;
use tokio::sync::mpsc;
use tracing::{error, info};
use ui::CyclePopup;

fn main() -> Result<()> {
    let config = Config::parse();

    let log_level = if config.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    // Client verbs talk to a running daemon over the socket and exit.
    match config.command() {
        Command::Daemon => {}
        Command::Next => socket_client::send_command_and_exit(IpcCommand::Next),
        Command::Prev => socket_client::send_command_and_exit(IpcCommand::Prev),
        Command::Select => socket_client::send_command_and_exit(IpcCommand::Select),
        Command::Cancel => socket_client::send_command_and_exit(IpcCommand::Cancel),
        Command::Status => socket_client::send_command_and_exit(IpcCommand::Status),
        Command::Shutdown => socket_client::send_command_and_exit(IpcCommand::Shutdown),
    }

    info!("Starting x11-alttab daemon");

    // WM_CLASS of the popup comes from the program name; the registry
    // relies on it to exclude the popup from the candidate list.
    glib::set_prgname(Some(ui::POPUP_WM_CLASS));
    gtk4::init()?;

    let app = gtk4::Application::builder()
        .application_id("io.github.x11-alttab")
        .build();

    app.connect_activate(move |app| {
        ui::setup_css();

        let popup = Rc::new(RefCell::new(CyclePopup::new(app)));
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        ui_handler::handle_ui_commands(popup.clone(), ui_rx);

        // The controller and the X11 connection live on their own thread
        // with a dedicated Tokio runtime; the GTK main loop stays free for
        // the popup.
        let config = config.clone();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create Tokio runtime: {e}");
                    std::process::exit(1);
                }
            };

            let exit_code = rt.block_on(async move {
                match daemon::run_daemon(config, ui_tx).await {
                    Ok(()) => {
                        info!("Daemon exited");
                        0
                    }
                    Err(e) => {
                        error!("Daemon error: {e:#}");
                        1
                    }
                }
            });

            // GTK has no work left once the daemon is gone.
            std::process::exit(exit_code);
        });
    });

    // Keep GTK away from our clap arguments.
    app.run_with_args::<&str>(&[]);

    Ok(())
}
