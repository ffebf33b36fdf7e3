use clap::{Parser, Subcommand};

/// Policy knobs consulted by the candidate filter and activation policy.
///
/// These are re-read on every filter evaluation rather than cached in the
/// session, so flipping one mid-cycle takes effect on the next
/// reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyFlags {
    pub include_all_desktops: bool,
    pub include_icons: bool,
    pub include_icons_all_desktops: bool,
    pub include_omnipresent: bool,
    pub avoid_skip_taskbar: bool,
    pub activate_while_cycling: bool,
    pub raise_on_commit: bool,
    /// Character budget for popup labels before middle-ellipsis truncation.
    pub title_budget: usize,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        PolicyFlags {
            include_all_desktops: false,
            include_icons: true,
            include_icons_all_desktops: true,
            include_omnipresent: true,
            avoid_skip_taskbar: true,
            activate_while_cycling: true,
            raise_on_commit: true,
            title_budget: 80,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run as daemon (default if no command specified)
    Daemon,
    /// Cycle to next window
    Next,
    /// Cycle to previous window
    Prev,
    /// Select the current window and end the cycle
    Select,
    /// Cancel cycling without selecting
    Cancel,
    /// Query daemon status
    Status,
    /// Shutdown the daemon
    Shutdown,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "x11-alttab")]
#[command(about = "Windows-style Alt+Tab window cycling daemon for X11", long_about = None)]
pub struct Config {
    /// Cycle windows from every desktop, not just the current one
    #[arg(long)]
    pub all_desktops: bool,

    /// Leave iconified windows out of the cycle list
    #[arg(long)]
    pub skip_icons: bool,

    /// Only pick up iconified windows from the current desktop
    #[arg(long)]
    pub icons_current_desktop_only: bool,

    /// Leave windows that are on all desktops out of the cycle list
    #[arg(long)]
    pub skip_omnipresent: bool,

    /// Also cycle windows that asked to stay off the taskbar
    #[arg(long)]
    pub allow_skip_taskbar: bool,

    /// Do not focus windows while cycling, only on selection
    #[arg(long)]
    pub no_preview_focus: bool,

    /// Do not raise the selected window on commit
    #[arg(long)]
    pub no_raise: bool,

    /// Character budget for popup labels
    #[arg(long, default_value_t = 80)]
    pub title_budget: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Config {
    pub fn parse() -> Self {
        <Config as Parser>::parse()
    }

    /// Get the command, defaulting to Daemon if none specified
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Daemon)
    }

    pub fn policy_flags(&self) -> PolicyFlags {
        PolicyFlags {
            include_all_desktops: self.all_desktops,
            include_icons: !self.skip_icons,
            include_icons_all_desktops: !self.icons_current_desktop_only,
            include_omnipresent: !self.skip_omnipresent,
            avoid_skip_taskbar: !self.allow_skip_taskbar,
            activate_while_cycling: !self.no_preview_focus,
            raise_on_commit: !self.no_raise,
            title_budget: self.title_budget,
        }
    }
}
