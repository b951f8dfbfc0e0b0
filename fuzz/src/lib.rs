// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: CC0-1.0

use std::{collections::VecDeque, io, time::Duration};

use arbitrary::Arbitrary;
use sc_harness::Terminal;

/// Patterns a scenario waits for and the output chunks of the process.
#[derive(Arbitrary, Debug, Default, PartialEq, Eq)]
pub struct Input {
    pub needles: Vec<Vec<u8>>,
    pub chunks: Vec<Vec<u8>>,
}

/// Terminal replaying recorded output, then hanging up.
#[derive(Debug)]
pub struct Replay(VecDeque<Vec<u8>>);

impl Replay {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self(chunks.into_iter().filter(|c| !c.is_empty()).collect())
    }
}

impl Terminal for Replay {
    fn write_all(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<Option<usize>> {
        let Some(mut chunk) = self.0.pop_front() else {
            return Ok(Some(0));
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.0.push_front(chunk.split_off(n));
        }
        Ok(Some(n))
    }

    fn is_alive(&mut self) -> bool {
        !self.0.is_empty()
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.0.clear();
        Ok(())
    }
}
