// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use std::{
    collections::VecDeque,
    io,
    process::Command,
    time::{Duration, Instant},
};

use rand::Rng;
use regex::Regex;
use sc_harness::{
    Error, ExpectFailure, ExpectationError, Pattern, Prompt, Session, Terminal, Transcript,
};
use test_log::test;

fn expectation_error(err: Error) -> Box<ExpectationError> {
    match err {
        Error::Expectation(err) => err,
        other => panic!("expected an expectation error, got {other}"),
    }
}

fn script(script: &str) -> Session {
    let mut command = Command::new("sh");
    command.args(["-c", script]);
    Session::spawn_command(command)
        .unwrap()
        .with_timeout(Duration::from_secs(10))
}

#[test]
fn output_is_consumed_in_order() {
    let mut session = script("echo first; echo second; echo first");
    session.expect("first").unwrap();
    let found = session.expect("second").unwrap();
    assert_eq!(found.text, "second");
    session.expect("first").unwrap();

    let err = expectation_error(session.expect("second").unwrap_err());
    assert_eq!(err.reason, ExpectFailure::Eof);
    assert!(err.transcript.contains("second"));
    assert!(!err.unread().contains("second"));
}

#[test]
fn echoed_input_and_response() {
    let mut session = Session::spawn("cat").unwrap();
    session.send_line("hello").unwrap();
    // once from the terminal echo, once from cat
    session.expect("hello").unwrap();
    session.expect("hello").unwrap();
    assert!(session.is_alive());
    let transcript = session.close().unwrap();
    assert_eq!(transcript.matches("hello").count(), 2);
}

#[test]
fn raw_bytes_collect_output_while_waiting() {
    let mut session = Session::spawn("cat").unwrap();
    let wait = Duration::from_secs(1);
    let started = Instant::now();
    session.send_raw(b"ping\n", Some(wait)).unwrap();
    assert!(started.elapsed() >= wait);
    // echo and cat's copy, both still unread
    assert_eq!(session.transcript().matches("ping").count(), 2);
    assert_eq!(session.unread(), session.transcript());

    session.send_raw(b"pong", None).unwrap();
    session.expect("pong").unwrap();
}

#[test]
fn timeout_is_honored() {
    let mut session = Session::spawn("cat").unwrap();
    let timeout = Duration::from_secs(1);
    let started = Instant::now();
    let err = expectation_error(session.expect_timeout("never printed", timeout).unwrap_err());
    let elapsed = started.elapsed();

    assert_eq!(err.reason, ExpectFailure::Timeout);
    assert_eq!(err.timeout, timeout);
    assert!(elapsed >= timeout, "{elapsed:?}");
    assert!(elapsed < timeout + Duration::from_millis(500), "{elapsed:?}");
    assert_eq!(err.patterns, ["\"never printed\""]);
}

#[test]
fn first_prompt_wins() {
    let mut session = script("printf 'Password: '; read answer; echo \"got-$answer\"");
    let found = session
        .expect_any(&[
            Prompt::Pin("alice".into()).pattern(),
            Prompt::Password.pattern(),
        ])
        .unwrap();
    assert_eq!(found.index, 1);

    session.send_secret_line("654321").unwrap();
    session.expect("got-654321").unwrap();
}

#[test]
fn regex_patterns() {
    let mut session = script("echo 'pam_authenticate for user [alice]: Success'");
    let found = session
        .expect(Regex::new(r"pam_authenticate for user \[(\w+)\]").unwrap())
        .unwrap();
    assert_eq!(found.group(1), Some("alice"));
    session.expect(": Success").unwrap();
}

#[test]
fn control_characters_interrupt() {
    let mut session = script("echo ready; sleep 30");
    session.expect("ready").unwrap();
    session.send_control('c').unwrap();
    let started = Instant::now();
    let err = expectation_error(
        session
            .expect_timeout(Pattern::from("never printed"), Duration::from_secs(10))
            .unwrap_err(),
    );
    assert_eq!(err.reason, ExpectFailure::Eof);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn closed_sessions_reject_io() {
    let mut session = script("echo ready; cat");
    session.expect("ready").unwrap();
    let transcript = session.close().unwrap();
    assert!(transcript.contains("ready"));
    assert!(!session.is_alive());

    assert!(matches!(session.send_line("x"), Err(Error::SessionClosed)));
    assert!(matches!(
        session.send_raw(b"x", None),
        Err(Error::SessionClosed)
    ));
    assert!(matches!(session.expect("ready"), Err(Error::SessionClosed)));
    assert!(matches!(session.close(), Err(Error::SessionClosed)));
    assert_eq!(session.transcript(), transcript);
}

/// Replays output in the given chunks, then hangs up.
#[derive(Debug)]
struct Replay(VecDeque<Vec<u8>>);

impl Terminal for Replay {
    fn write_all(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<Option<usize>> {
        Ok(Some(self.0.pop_front().map_or(0, |chunk| {
            buf[..chunk.len()].copy_from_slice(&chunk);
            chunk.len()
        })))
    }

    fn is_alive(&mut self) -> bool {
        !self.0.is_empty()
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.0.clear();
        Ok(())
    }
}

fn random_chunks(output: &[u8], rng: &mut impl Rng) -> VecDeque<Vec<u8>> {
    let mut chunks = VecDeque::new();
    let mut rest = output;
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rng.gen_range(1..=rest.len().min(8)));
        chunks.push_back(chunk.to_vec());
        rest = tail;
    }
    chunks
}

#[test]
fn prompts_survive_arbitrary_chunking() {
    let output = "Passwort für jürgen wird geändert.\r\nPIN for jürgen: \r\n\
                  pam_authenticate for user [jürgen]: Success\r\n";
    let mut rng = rand::thread_rng();
    for _ in 0..100 {
        let chunks = random_chunks(output.as_bytes(), &mut rng);

        let mut transcript = Transcript::new();
        for chunk in &chunks {
            transcript.push(chunk);
        }
        transcript.finish();
        assert_eq!(transcript.as_str(), output);

        let mut session =
            Session::with_terminal("replay", Replay(chunks), Duration::from_secs(1));
        session
            .expect_prompt(&Prompt::Pin("jürgen".into()))
            .unwrap();
        session
            .expect_prompt(&Prompt::PamSuccess("jürgen".into()))
            .unwrap();
        assert!(output.starts_with(session.transcript()));
        assert_eq!(session.close().unwrap(), output);
    }
}
