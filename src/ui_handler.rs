use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::ui::CyclePopup;
use crate::ui_commands::UiCommand;

/// Applies daemon-side popup commands on the GTK main thread.
pub fn handle_ui_commands(
    popup: Rc<RefCell<CyclePopup>>,
    mut ui_rx: mpsc::UnboundedReceiver<UiCommand>,
) {
    glib::spawn_future_local(async move {
        while let Some(command) = ui_rx.recv().await {
            debug!("UI command: {:?}", command);
            match command {
                UiCommand::Open { labels, highlight } => {
                    popup.borrow_mut().open(labels, highlight);
                }
                UiCommand::Update { labels, highlight } => {
                    popup.borrow_mut().update(labels, highlight);
                }
                UiCommand::Close => {
                    popup.borrow().close();
                }
            }
        }

        error!("UI command handler stopped - channel closed");
    });
}
