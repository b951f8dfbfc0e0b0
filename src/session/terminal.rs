// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::fmt;
use std::{
    io::{self, Write as _},
    process::Command,
    thread::sleep,
    time::{Duration, Instant},
};

use nix::errno::Errno;

use crate::{
    error::{Error, Result},
    utils,
};

const READ_BACKOFF: Duration = Duration::from_millis(5);

/// Byte-level connection to an interactive process.
pub trait Terminal: fmt::Debug {
    /// Writes all of `bytes` to the process.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads output, waiting at most `timeout` for some to arrive.
    ///
    /// Returns `None` if nothing arrived in time and `Some(0)` once the process closed its end.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    /// Whether the process is still running.
    fn is_alive(&mut self) -> bool;

    /// Stops the process.
    fn terminate(&mut self) -> io::Result<()>;
}

/// A process running on a pseudo-terminal.
pub struct PtyTerminal {
    command: String,
    session: expectrl::Session,
}

impl PtyTerminal {
    /// Spawns a command line.  Arguments are split on whitespace, honoring quotes.
    pub fn spawn(command: &str) -> Result<Self> {
        debug!("Spawning {command}");
        let session = expectrl::spawn(command).map_err(|source| Error::Spawn {
            command: command.to_owned(),
            source,
        })?;
        Ok(Self {
            command: command.to_owned(),
            session,
        })
    }

    /// Spawns a prepared command.
    pub fn spawn_command(command: Command) -> Result<Self> {
        let display = utils::display_command(&command);
        debug!("Spawning {display}");
        let session = expectrl::Session::spawn(command).map_err(|source| Error::Spawn {
            command: display.clone(),
            source,
        })?;
        Ok(Self {
            command: display,
            session,
        })
    }

    /// Command line of the process.
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl fmt::Debug for PtyTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyTerminal")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl Terminal for PtyTerminal {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.session.write_all(bytes)?;
        self.session.flush()
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.session.try_read(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                // Linux reports a hung-up PTY as EIO
                Err(err) if err.raw_os_error() == Some(Errno::EIO as i32) => return Ok(Some(0)),
                Err(err) => return Err(err),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep((deadline - now).min(READ_BACKOFF));
        }
    }

    fn is_alive(&mut self) -> bool {
        self.session.get_process().is_alive().unwrap_or(false)
    }

    fn terminate(&mut self) -> io::Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.session
            .get_process_mut()
            .exit(true)
            .map(drop)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}
