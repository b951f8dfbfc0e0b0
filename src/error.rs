// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use std::{fmt, io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Result type used throughout the harness.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Number of transcript bytes rendered by the `Display` implementation of [`ExpectationError`].
const TRANSCRIPT_TAIL: usize = 2048;

/// Errors raised by cards, sessions and their collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// The card could not be set up.  Never retried.
    #[error("failed to provision card: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Inserting or removing a card did not converge within the retry budget.
    #[error("failed to {action} card {service} after {attempts} attempts")]
    Device {
        /// Name of the backing service.
        service: String,
        /// `"insert"` or `"remove"`.
        action: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// Last error reported by the service manager, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// An expected pattern did not show up.
    #[error(transparent)]
    Expectation(Box<ExpectationError>),

    /// The session was already closed.
    #[error("session is closed")]
    SessionClosed,

    /// Two mutating operations overlapped on the same card.
    #[error("card {service} is already being inserted or removed")]
    ConcurrentAccess {
        /// Name of the backing service.
        service: String,
    },

    /// The process for a session could not be started.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// Command line.
        command: String,
        /// Error reported by the PTY layer.
        #[source]
        source: expectrl::Error,
    },

    /// An external command exited unsuccessfully.
    #[error("{command} failed with {status}: {stderr}")]
    Command {
        /// Command line.
        command: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<ExpectationError> for Error {
    fn from(error: ExpectationError) -> Self {
        Self::Expectation(Box::new(error))
    }
}

/// Reasons for which a card could not be provisioned.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Another active card already uses the backing service name.
    #[error("backing service {0} is already in use")]
    NameCollision(String),

    /// The certificate or key file is missing or unreadable.
    #[error("cannot read {}: {source}", path.display())]
    MissingMaterial {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The certificate file is not a PEM-encoded X.509 certificate.
    #[error("{} is not a valid certificate: {reason}", path.display())]
    InvalidCertificate {
        /// Offending file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The user has no card material configured.
    #[error("user {0} has no card configured")]
    NoCardMaterial(String),

    /// The PIN is empty or not numeric.
    #[error("PIN for {0} must be a non-empty string of digits")]
    InvalidPin(String),

    /// A descriptor artifact could not be written or the token could not be enrolled.
    #[error("failed to create {}: {source}", path.display())]
    Artifact {
        /// Artifact that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

/// Why an expectation failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpectFailure {
    /// The timeout elapsed.
    Timeout,
    /// The process closed its terminal before any pattern matched.
    Eof,
}

/// An `expect` call that failed, with the full transcript for diagnosis.
#[derive(Debug)]
pub struct ExpectationError {
    /// Name of the session.
    pub session: String,
    /// Patterns that were awaited.
    pub patterns: Vec<String>,
    /// Timeout of the call.
    pub timeout: Duration,
    /// Time actually spent waiting.
    pub elapsed: Duration,
    /// Why the call failed.
    pub reason: ExpectFailure,
    /// Everything the process printed so far.
    pub transcript: String,
    /// Offset of the read cursor into `transcript` when the call started.
    pub cursor: usize,
}

impl ExpectationError {
    /// Output that was not yet consumed by earlier expectations.
    pub fn unread(&self) -> &str {
        self.transcript.get(self.cursor..).unwrap_or_default()
    }
}

impl fmt::Display for ExpectationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.reason {
            ExpectFailure::Timeout => "timed out",
            ExpectFailure::Eof => "reached end of output",
        };
        writeln!(
            f,
            "{}: {} after {:.1?} (timeout {:?}) waiting for {:?}",
            self.session, reason, self.elapsed, self.timeout, self.patterns
        )?;
        let unread = self.unread();
        let tail = if unread.len() > TRANSCRIPT_TAIL {
            let mut start = unread.len() - TRANSCRIPT_TAIL;
            while !unread.is_char_boundary(start) {
                start += 1;
            }
            &unread[start..]
        } else {
            unread
        };
        writeln!(f, "--- unread output ---")?;
        writeln!(f, "{tail}")?;
        f.write_str("--- end of output ---")
    }
}

impl std::error::Error for ExpectationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expectation_error_shows_unread_output() {
        let error = ExpectationError {
            session: "su".into(),
            patterns: vec!["PIN for alice:".into()],
            timeout: Duration::from_secs(2),
            elapsed: Duration::from_secs(2),
            reason: ExpectFailure::Timeout,
            transcript: "$ su alice\nPassword: ".into(),
            cursor: 11,
        };
        assert_eq!(error.unread(), "Password: ");
        let message = Error::from(error).to_string();
        assert!(message.contains("timed out"), "{message}");
        assert!(message.contains("Password: "), "{message}");
        assert!(!message.contains("$ su alice"), "{message}");
    }
}
