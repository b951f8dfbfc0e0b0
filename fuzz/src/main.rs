// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: CC0-1.0

//! Writes transcripts of typical PAM conversations to `corpus/` to seed the fuzzer.

use std::fs;

use arbitrary::Arbitrary;
use sc_harness_fuzz::Input;

/// Splits `output` after every `step` bytes, so that multi-byte characters and prompts straddle
/// chunk boundaries.
fn chunked(output: &str, step: usize) -> Vec<Vec<u8>> {
    output.as_bytes().chunks(step).map(<[u8]>::to_vec).collect()
}

/// Encodes a vector the way `arbitrary` decodes it: a set low bit before every element, then a
/// clear one.
fn push_vec<T>(res: &mut Vec<u8>, items: &[T], mut push_item: impl FnMut(&mut Vec<u8>, &T)) {
    for item in items {
        res.push(1);
        push_item(res, item);
    }
    res.push(0);
}

fn push_bytes(res: &mut Vec<u8>, bytes: &[u8]) {
    push_vec(res, bytes, |res, &b| res.push(b));
}

fn as_corpus(input: &Input) -> Vec<u8> {
    let mut res = Vec::new();
    push_vec(&mut res, &input.needles, |res, needle| push_bytes(res, needle));
    push_vec(&mut res, &input.chunks, |res, chunk| push_bytes(res, chunk));

    let mut unstructured = arbitrary::Unstructured::new(&res);
    let parsed = Input::arbitrary(&mut unstructured).unwrap();
    assert_eq!(&parsed, input);
    res
}

fn write_corpus(needles: &[&str], output: &str, step: usize, file: &str) {
    let input = Input {
        needles: needles.iter().map(|n| n.as_bytes().to_vec()).collect(),
        chunks: chunked(output, step),
    };
    fs::create_dir_all("corpus").unwrap();
    fs::write(format!("corpus/{file}"), as_corpus(&input)).unwrap();
    println!("Wrote {file}");
}

fn main() {
    write_corpus(
        &["PIN for alice:", "alice"],
        "$ su alice -c \"whoami\"\r\nPIN for alice: \r\nalice\r\n",
        7,
        "su-pin",
    );
    write_corpus(
        &["PIN for alice:", "su: Authentication failure"],
        "$ su alice -c \"whoami\"\r\nPIN for alice: \r\nsu: Authentication failure\r\n",
        5,
        "su-wrong-pin",
    );
    write_corpus(
        &[
            "Please insert smart card",
            "PIN for alice",
            "pam_authenticate for user [alice]: Success",
        ],
        "user: alice\r\naction: auth\r\nservice: gdm-smartcard\r\n\r\nPlease insert smart card\r\n\
         PIN for alice: \r\npam_authenticate for user [alice]: Success\r\n",
        11,
        "sssctl-insert",
    );
    write_corpus(
        &["Password:", "alice"],
        "$ su - alice -c whoami\r\nPassword: \r\nalice\r\n",
        3,
        "su-password",
    );
    write_corpus(
        &["PIN für jürgen:", "Aktuelles Passwort"],
        "PIN für jürgen: \r\nPasswort für jürgen wird geändert.\r\nAktuelles Passwort: ",
        2,
        "utf8-split",
    );
    write_corpus(
        &["Changing password for user alice.", "Current password"],
        "Changing password for user alice.\r\nCurrent password: ",
        64,
        "passwd",
    );
}
