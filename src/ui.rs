use gtk4::prelude::*;
use gtk4::{Application, ApplicationWindow, Box as GtkBox, Label, Orientation};
use tracing::debug;

const WINDOW_PADDING: i32 = 12;
const ROW_SPACING: i32 = 2;

/// WM_CLASS instance name of the popup window. The registry snapshot uses
/// this to keep the popup itself out of the candidate list.
pub const POPUP_WM_CLASS: &str = "x11-alttab-popup";

/// The cycling popup: one row per candidate, the selection highlighted.
pub struct CyclePopup {
    window: ApplicationWindow,
    container: GtkBox,
    rows: Vec<Label>,
    highlight: usize,
}

impl CyclePopup {
    pub fn new(app: &Application) -> Self {
        let window = ApplicationWindow::builder()
            .application(app)
            .title(POPUP_WM_CLASS)
            .default_width(480)
            .decorated(false)
            .resizable(false)
            .build();

        let container = GtkBox::new(Orientation::Vertical, ROW_SPACING);
        container.set_margin_start(WINDOW_PADDING);
        container.set_margin_end(WINDOW_PADDING);
        container.set_margin_top(WINDOW_PADDING);
        container.set_margin_bottom(WINDOW_PADDING);
        window.set_child(Some(&container));

        CyclePopup {
            window,
            container,
            rows: Vec::new(),
            highlight: 0,
        }
    }

    /// Open the popup with a fresh label list.
    pub fn open(&mut self, labels: Vec<String>, highlight: usize) {
        self.rebuild(labels, highlight);
        self.window.set_visible(true);
        self.window.present();
    }

    /// Replace labels and highlight. Rebuilding rows wholesale keeps the
    /// update path identical whether the list or only the cursor changed.
    pub fn update(&mut self, labels: Vec<String>, highlight: usize) {
        if labels.len() == self.rows.len() {
            for (row, text) in self.rows.iter().zip(&labels) {
                row.set_text(text);
            }
            self.move_highlight(highlight);
        } else {
            self.rebuild(labels, highlight);
        }
    }

    /// Hide the popup. The window object stays alive so the GTK app does
    /// not tear down between sessions.
    pub fn close(&self) {
        debug!("hiding popup");
        self.window.set_visible(false);
    }

    fn rebuild(&mut self, labels: Vec<String>, highlight: usize) {
        while let Some(child) = self.container.first_child() {
            self.container.remove(&child);
        }
        self.rows.clear();

        for (i, text) in labels.iter().enumerate() {
            let row = Label::new(Some(text));
            row.set_xalign(0.0);
            if i == highlight {
                row.add_css_class("selected");
            }
            self.container.append(&row);
            self.rows.push(row);
        }
        self.highlight = highlight.min(labels.len().saturating_sub(1));
    }

    fn move_highlight(&mut self, highlight: usize) {
        if let Some(old) = self.rows.get(self.highlight) {
            old.remove_css_class("selected");
        }
        if let Some(new) = self.rows.get(highlight) {
            new.add_css_class("selected");
        }
        self.highlight = highlight;
    }
}

/// Setup CSS styling for the popup
pub fn setup_css() {
    let provider = gtk4::CssProvider::new();
    provider.load_from_data(
        r#"
        window {
            background-color: rgba(30, 30, 30, 0.95);
            border-radius: 8px;
            border: 2px solid rgba(100, 100, 100, 0.5);
        }

        label {
            color: #ffffff;
            font-size: 13px;
            padding: 2px 6px;
        }

        .selected {
            background-color: rgba(70, 130, 180, 0.7);
            border-radius: 4px;
        }
        "#,
    );

    gtk4::style_context_add_provider_for_display(
        &gtk4::gdk::Display::default().expect("Failed to get default display"),
        &provider,
        gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
    );
}
