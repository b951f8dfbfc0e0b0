// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Interactive sessions on a pseudo-terminal.
//!
//! A [`Session`] records all output of its process in a [`Transcript`].  Expectations search the
//! output after the read cursor and move the cursor past the match, so a prompt is never matched
//! twice.  Every chunk of output is logged at debug level under the `sc_harness::transcript`
//! target.

mod pattern;
mod terminal;
mod transcript;

pub use pattern::Pattern;
pub use terminal::{PtyTerminal, Terminal};
pub use transcript::Transcript;

use std::{
    io,
    process::Command,
    time::{Duration, Instant},
};

use crate::{
    config::Config,
    error::{Error, ExpectFailure, ExpectationError, Result},
    prompt::Prompt,
};

/// Default timeout of expectations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default upper bound for a single wait for output.
pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(50);

const TRANSCRIPT_TARGET: &str = "sc_harness::transcript";
const READ_CHUNK: usize = 4096;

/// Result of a successful expectation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Match {
    /// Index of the pattern that matched.
    pub index: usize,
    /// Matched text.
    pub text: String,
    /// Unread output before the match.
    pub before: String,
    /// Capture groups of a regular expression, starting with group 1.
    pub captures: Vec<Option<String>>,
}

impl Match {
    /// Capture group `group`, starting at 1.
    pub fn group(&self, group: usize) -> Option<&str> {
        self.captures.get(group.checked_sub(1)?)?.as_deref()
    }
}

/// An interactive process and the output it produced.
///
/// Only one expectation can be outstanding at a time since all operations borrow the session
/// mutably.
#[derive(Debug)]
pub struct Session<T: Terminal = PtyTerminal> {
    name: String,
    terminal: T,
    transcript: Transcript,
    timeout: Duration,
    poll_slice: Duration,
    eof: bool,
    closed: bool,
}

impl Session<PtyTerminal> {
    /// Spawns a command line on a pseudo-terminal.
    pub fn spawn(command: &str) -> Result<Self> {
        let terminal = PtyTerminal::spawn(command)?;
        Ok(Self::with_terminal(command, terminal, DEFAULT_TIMEOUT))
    }

    /// Spawns a prepared command on a pseudo-terminal.
    pub fn spawn_command(command: Command) -> Result<Self> {
        let terminal = PtyTerminal::spawn_command(command)?;
        let name = terminal.command().to_owned();
        Ok(Self::with_terminal(name, terminal, DEFAULT_TIMEOUT))
    }

    /// Spawns the configured shell as root.
    pub fn root_shell(config: &Config) -> Result<Self> {
        let command = Command::new(&config.session.shell);
        Ok(Self::spawn_command(command)?.with_timeout(config.session.timeout()))
    }

    /// Spawns the configured shell and switches to the unprivileged base user.
    ///
    /// Scenarios use this shell to run `su` for the user under test so that a PIN or password is
    /// actually requested.
    pub fn user_shell(config: &Config) -> Result<Self> {
        let mut command = Command::new(&config.session.shell);
        command
            .arg("-c")
            .arg(format!("su {}", config.session.base_user));
        Ok(Self::spawn_command(command)?.with_timeout(config.session.timeout()))
    }
}

impl<T: Terminal> Session<T> {
    /// Drives an already running process.
    pub fn with_terminal(name: impl Into<String>, terminal: T, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            terminal,
            transcript: Transcript::new(),
            timeout,
            poll_slice: DEFAULT_POLL_SLICE,
            eof: false,
            closed: false,
        }
    }

    /// Sets the default timeout of expectations.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the upper bound for a single wait for output.
    pub fn with_poll_slice(mut self, poll_slice: Duration) -> Self {
        self.poll_slice = poll_slice.max(Duration::from_millis(1));
        self
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default timeout of expectations.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Everything the process printed so far.
    pub fn transcript(&self) -> &str {
        self.transcript.as_str()
    }

    /// Output that no expectation consumed yet.
    pub fn unread(&self) -> &str {
        self.transcript.unread()
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        !self.closed && self.terminal.is_alive()
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Sends `text` followed by a newline.
    pub fn send_line(&mut self, text: &str) -> Result<()> {
        self.ensure_open()?;
        debug!("{} <- {text:?}", self.name);
        self.write(format!("{text}\n").as_bytes())
    }

    /// Sends `secret` followed by a newline without logging it.
    pub fn send_secret_line(&mut self, secret: &str) -> Result<()> {
        self.ensure_open()?;
        debug!("{} <- ********", self.name);
        self.write(format!("{secret}\n").as_bytes())
    }

    /// Sends raw bytes, then collects output for `wait_after` if given.
    pub fn send_raw(&mut self, bytes: &[u8], wait_after: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        debug!("{} <- {} raw bytes", self.name, bytes.len());
        self.write(bytes)?;
        if let Some(wait) = wait_after {
            let deadline = Instant::now() + wait;
            while !self.eof {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                self.fill((deadline - now).min(self.poll_slice))?;
            }
        }
        Ok(())
    }

    /// Sends a control character, for example `'c'` for Ctrl-C.
    pub fn send_control(&mut self, c: char) -> Result<()> {
        self.ensure_open()?;
        let byte = control_byte(c).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no control character for {c:?}"),
            )
        })?;
        debug!("{} <- ^{}", self.name, c.to_ascii_uppercase());
        self.write(&[byte])
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.terminal.write_all(bytes).map_err(Error::from)
    }

    /// Waits for `pattern` with the default timeout.
    pub fn expect(&mut self, pattern: impl Into<Pattern>) -> Result<Match> {
        self.expect_timeout(pattern, self.timeout)
    }

    /// Waits for `pattern` for at most `timeout`.
    pub fn expect_timeout(
        &mut self,
        pattern: impl Into<Pattern>,
        timeout: Duration,
    ) -> Result<Match> {
        self.expect_any_timeout(&[pattern.into()], timeout)
    }

    /// Waits for whichever of `patterns` shows up first, with the default timeout.
    pub fn expect_any(&mut self, patterns: &[Pattern]) -> Result<Match> {
        self.expect_any_timeout(patterns, self.timeout)
    }

    /// Waits for whichever of `patterns` shows up first, for at most `timeout`.
    ///
    /// The pattern whose match starts earliest in the unread output wins; ties go to the pattern
    /// listed first.
    pub fn expect_any_timeout(&mut self, patterns: &[Pattern], timeout: Duration) -> Result<Match> {
        self.ensure_open()?;
        let started = Instant::now();
        let deadline = started + timeout;
        let cursor = self.transcript.cursor();
        loop {
            if let Some(found) = self.search(patterns) {
                debug!(
                    "{} matched {} after {:.1?}",
                    self.name,
                    patterns[found.index],
                    started.elapsed()
                );
                return Ok(found);
            }
            let reason = if self.eof {
                Some(ExpectFailure::Eof)
            } else if Instant::now() >= deadline {
                Some(ExpectFailure::Timeout)
            } else {
                None
            };
            if let Some(reason) = reason {
                let error = ExpectationError {
                    session: self.name.clone(),
                    patterns: patterns.iter().map(ToString::to_string).collect(),
                    timeout,
                    elapsed: started.elapsed(),
                    reason,
                    transcript: self.transcript.as_str().to_owned(),
                    cursor,
                };
                warn!("{} expectation failed: {reason:?}", self.name);
                return Err(error.into());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.fill(remaining.min(self.poll_slice))?;
        }
    }

    /// Waits for a well-known prompt with the default timeout.
    pub fn expect_prompt(&mut self, prompt: &Prompt) -> Result<Match> {
        self.expect(prompt.pattern())
    }

    /// Waits for a well-known prompt for at most `timeout`.
    pub fn expect_prompt_timeout(&mut self, prompt: &Prompt, timeout: Duration) -> Result<Match> {
        self.expect_timeout(prompt.pattern(), timeout)
    }

    fn search(&mut self, patterns: &[Pattern]) -> Option<Match> {
        let unread = self.transcript.unread();
        let mut best: Option<(usize, pattern::Found)> = None;
        for (index, pattern) in patterns.iter().enumerate() {
            if let Some(found) = pattern.find(unread) {
                if best.as_ref().map_or(true, |(_, b)| found.start < b.start) {
                    best = Some((index, found));
                }
            }
        }
        let (index, found) = best?;
        let result = Match {
            index,
            text: unread[found.start..found.end].to_owned(),
            before: unread[..found.start].to_owned(),
            captures: found.captures,
        };
        self.transcript.consume(found.end);
        Some(result)
    }

    fn fill(&mut self, timeout: Duration) -> Result<()> {
        let mut buf = [0; READ_CHUNK];
        match self.terminal.read_timeout(&mut buf, timeout)? {
            None => {}
            Some(0) => {
                debug!("{} closed its terminal", self.name);
                self.transcript.finish();
                self.eof = true;
            }
            Some(n) => {
                let chunk = self.transcript.push(&buf[..n]);
                debug!(target: TRANSCRIPT_TARGET, "{} -> {chunk:?}", self.name);
            }
        }
        Ok(())
    }

    /// Terminates the process and returns the full transcript.
    ///
    /// Output that is already available is collected first.  Every later operation fails with
    /// [`Error::SessionClosed`].
    pub fn close(&mut self) -> Result<String> {
        self.ensure_open()?;
        for _ in 0..16 {
            if self.eof {
                break;
            }
            let before = self.transcript.as_str().len();
            self.fill(Duration::ZERO)?;
            if self.transcript.as_str().len() == before {
                break;
            }
        }
        self.closed = true;
        self.terminal.terminate()?;
        info!("Closed session {}", self.name);
        Ok(self.transcript.as_str().to_owned())
    }
}

impl<T: Terminal> Drop for Session<T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.terminal.terminate() {
            warn!("Failed to terminate session {}: {err}", self.name);
        }
    }
}

fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' => Some(0),
        '[' => Some(0x1b),
        '\\' => Some(0x1c),
        ']' => Some(0x1d),
        '^' => Some(0x1e),
        '_' => Some(0x1f),
        '?' => Some(0x7f),
        _ => None,
    }
}
