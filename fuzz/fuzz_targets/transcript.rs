// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: CC0-1.0

#![no_main]
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use sc_harness::{Session, Transcript};
use sc_harness_fuzz::{Input, Replay};

fuzz_target!(|input: Input| {
    #[cfg(feature = "log")]
    let _ = env_logger::builder().is_test(true).try_init();

    let Input { needles, chunks } = input;

    let mut transcript = Transcript::new();
    let mut raw = Vec::new();
    for chunk in &chunks {
        transcript.push(chunk);
        raw.extend_from_slice(chunk);
    }
    transcript.finish();
    assert_eq!(transcript.as_str(), String::from_utf8_lossy(&raw));

    let mut session = Session::with_terminal("fuzz", Replay::new(chunks), Duration::from_secs(1));
    let mut consumed = 0;
    for needle in needles {
        let needle = String::from_utf8_lossy(&needle).into_owned();
        let Ok(found) = session.expect(needle.as_str()) else {
            break;
        };
        assert_eq!(found.text, needle);
        let cursor = session.transcript().len() - session.unread().len();
        assert!(cursor >= consumed);
        consumed = cursor;
    }
});
