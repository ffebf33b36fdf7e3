use tokio::sync::mpsc;
use tracing::warn;

use crate::services::PopupDisplay;

/// Commands sent from the daemon to the GTK popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    /// Open the popup with the given labels, highlighting one of them.
    Open { labels: Vec<String>, highlight: usize },
    /// Replace the labels and the highlight (list or cursor changed).
    Update { labels: Vec<String>, highlight: usize },
    /// Close the popup.
    Close,
}

/// [`PopupDisplay`] that forwards to the GTK main thread over a channel.
///
/// The daemon owns the authoritative list and cursor; the UI side only
/// renders what it is told.
pub struct ChannelPopup {
    tx: mpsc::UnboundedSender<UiCommand>,
}

impl ChannelPopup {
    pub fn new(tx: mpsc::UnboundedSender<UiCommand>) -> Self {
        ChannelPopup { tx }
    }

    fn send(&self, command: UiCommand) {
        if self.tx.send(command).is_err() {
            warn!("popup channel closed, dropping UI command");
        }
    }
}

impl PopupDisplay for ChannelPopup {
    fn open(&mut self, labels: Vec<String>, highlight: usize) {
        self.send(UiCommand::Open { labels, highlight });
    }

    fn update(&mut self, labels: Vec<String>, highlight: usize) {
        self.send(UiCommand::Update { labels, highlight });
    }

    fn close(&mut self) {
        self.send(UiCommand::Close);
    }
}
