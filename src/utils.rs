// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use std::process::{Command, Output};

use crate::error::{Error, Result};

/// Renders a command the way it would be typed in a shell, for logs and errors.
pub fn display_command(command: &Command) -> String {
    let mut line = command.get_program().to_string_lossy().into_owned();
    for arg in command.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Runs `command` to completion and fails with [`Error::Command`] if it exits unsuccessfully.
pub fn run(command: &mut Command) -> Result<Output> {
    let output = run_unchecked(command)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(Error::Command {
            command: display_command(command),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Runs `command` to completion and returns its output regardless of the exit status.
pub fn run_unchecked(command: &mut Command) -> Result<Output> {
    let line = display_command(command);
    debug!("Running {line}");
    let output = command.output()?;
    trace!(
        "{line} exited with {}: stdout {:?}, stderr {:?}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_command_reports_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo broken >&2; exit 3"]);
        match run(&mut command) {
            Err(Error::Command {
                command, stderr, ..
            }) => {
                assert_eq!(command, "sh -c echo broken >&2; exit 3");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn unchecked_keeps_status() {
        let output = run_unchecked(Command::new("sh").args(["-c", "exit 1"])).unwrap();
        assert_eq!(output.status.code(), Some(1));
    }
}
