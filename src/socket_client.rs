//! CLI side of the control socket: one command in, one JSON reply out.

use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::ipc::{IpcCommand, IpcResponse, get_socket_path};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Send one command to a running daemon and return its reply.
pub fn send_command(command: IpcCommand) -> Result<IpcResponse> {
    exchange(connect()?, command)
}

fn connect() -> Result<UnixStream> {
    let socket_path = get_socket_path()?;
    let stream = UnixStream::connect(&socket_path).with_context(|| {
        format!(
            "Failed to connect to daemon at {}. Is the daemon running?",
            socket_path.display()
        )
    })?;
    stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
    stream.set_write_timeout(Some(REPLY_TIMEOUT))?;
    Ok(stream)
}

fn exchange(mut stream: UnixStream, command: IpcCommand) -> Result<IpcResponse> {
    writeln!(stream, "{command}")?;
    stream.flush()?;

    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line)?;
    serde_json::from_str(&line).context("Failed to parse daemon response")
}

/// Human-readable rendering of a status reply.
struct StatusReport {
    cycling: bool,
    window_count: usize,
    cursor: Option<usize>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.cycling {
            return write!(f, "idle");
        }
        write!(f, "cycling, {} windows", self.window_count)?;
        if let Some(i) = self.cursor {
            write!(f, ", cursor at {}", i)?;
        }
        Ok(())
    }
}

/// Send a command, print the outcome, exit with the matching code.
pub fn send_command_and_exit(command: IpcCommand) -> ! {
    let code = match send_command(command) {
        Ok(IpcResponse::Ok) => 0,
        Ok(IpcResponse::Status {
            cycling,
            window_count,
            cursor,
        }) => {
            println!(
                "{}",
                StatusReport {
                    cycling,
                    window_count,
                    cursor
                }
            );
            0
        }
        Ok(IpcResponse::Error(e)) => {
            eprintln!("Error: {e}");
            1
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
