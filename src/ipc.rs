use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Commands sent from the CLI client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IpcCommand {
    /// Cycle to the next window (only valid while a session is open)
    Next,
    /// Cycle to the previous window
    Prev,
    /// Select the current window and end the cycle
    Select,
    /// Cancel cycling without selecting
    Cancel,
    /// Query daemon status
    Status,
    /// Shutdown the daemon gracefully
    Shutdown,
}

/// Response from the daemon to the CLI client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IpcResponse {
    /// Command executed successfully
    Ok,
    /// Error occurred
    Error(String),
    /// Status response
    Status {
        cycling: bool,
        window_count: usize,
        cursor: Option<usize>,
    },
}

/// Get the path to the Unix socket
pub fn get_socket_path() -> Result<PathBuf> {
    let runtime_dir = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .context("Could not determine runtime directory")?;

    Ok(runtime_dir.join("x11-alttab.sock"))
}

/// Error returned when parsing an invalid IpcCommand string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIpcCommandError;

impl fmt::Display for ParseIpcCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid IPC command")
    }
}

impl std::error::Error for ParseIpcCommandError {}

impl FromStr for IpcCommand {
    type Err = ParseIpcCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "next" => Ok(IpcCommand::Next),
            "prev" => Ok(IpcCommand::Prev),
            "select" => Ok(IpcCommand::Select),
            "cancel" => Ok(IpcCommand::Cancel),
            "status" => Ok(IpcCommand::Status),
            "shutdown" => Ok(IpcCommand::Shutdown),
            _ => Err(ParseIpcCommandError),
        }
    }
}

impl fmt::Display for IpcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IpcCommand::Next => "next",
            IpcCommand::Prev => "prev",
            IpcCommand::Select => "select",
            IpcCommand::Cancel => "cancel",
            IpcCommand::Status => "status",
            IpcCommand::Shutdown => "shutdown",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipc_command_from_str() {
        assert_eq!("next".parse(), Ok(IpcCommand::Next));
        assert_eq!("prev".parse(), Ok(IpcCommand::Prev));
        assert_eq!("select".parse(), Ok(IpcCommand::Select));
        assert_eq!("cancel".parse(), Ok(IpcCommand::Cancel));
        assert_eq!("status".parse(), Ok(IpcCommand::Status));
        assert_eq!("shutdown".parse(), Ok(IpcCommand::Shutdown));
        assert_eq!("invalid".parse::<IpcCommand>(), Err(ParseIpcCommandError));
    }

    #[test]
    fn test_ipc_command_from_str_case_insensitive() {
        assert_eq!("NEXT".parse(), Ok(IpcCommand::Next));
        assert_eq!("Next".parse(), Ok(IpcCommand::Next));
        assert_eq!("  next  ".parse(), Ok(IpcCommand::Next));
    }

    #[test]
    fn test_ipc_command_roundtrip() {
        let commands = [
            IpcCommand::Next,
            IpcCommand::Prev,
            IpcCommand::Select,
            IpcCommand::Cancel,
            IpcCommand::Status,
            IpcCommand::Shutdown,
        ];

        for cmd in commands {
            let s = cmd.to_string();
            let parsed: IpcCommand = s.parse().unwrap();
            assert_eq!(parsed, cmd);
        }
    }

    #[test]
    fn test_ipc_response_serialization() {
        let json = serde_json::to_string(&IpcResponse::Ok).unwrap();
        assert!(json.contains("ok"));

        let json = serde_json::to_string(&IpcResponse::Error("no session".to_string())).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("no session"));

        let status = IpcResponse::Status {
            cycling: true,
            window_count: 5,
            cursor: Some(2),
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_get_socket_path() {
        let path = get_socket_path().unwrap();
        assert!(path.ends_with("x11-alttab.sock"));
    }
}
