// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only
#![allow(unused)]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use sc_harness::{
    cert::{CertDir, CertificateSource},
    config::{CardPaths, Timing},
    CardIdentity, Controller, Error, NoEnroll, Result, ServiceManager, ServiceState,
};
use tempfile::TempDir;

#[derive(Debug, Default)]
struct Unit {
    active: bool,
    // state queries left before the unit settles
    pending: u32,
}

#[derive(Debug, Default)]
struct Inner {
    units: HashMap<String, Unit>,
    start_delay: u32,
    failing_starts: u32,
    failing_stops: u32,
    stuck: bool,
    calls: Vec<String>,
}

/// In-memory service manager with scriptable misbehavior.
#[derive(Debug, Default)]
pub struct FakeServices(Mutex<Inner>);

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Started units report `activating` for `polls` state queries.
    pub fn with_start_delay(self, polls: u32) -> Self {
        self.inner().start_delay = polls;
        self
    }

    /// The next `count` start requests fail.
    pub fn with_failing_starts(self, count: u32) -> Self {
        self.inner().failing_starts = count;
        self
    }

    /// The next `count` stop requests fail without stopping the unit.
    pub fn with_failing_stops(self, count: u32) -> Self {
        self.inner().failing_stops = count;
        self
    }

    /// Started units never leave `activating`.
    pub fn stuck(self) -> Self {
        self.inner().stuck = true;
        self
    }

    /// Changes a unit behind the controller's back.
    pub fn set_active(&self, name: &str, active: bool) {
        let mut inner = self.inner();
        let unit = inner.units.entry(name.to_owned()).or_default();
        unit.active = active;
        unit.pending = 0;
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.inner().units.get(name).map_or(false, |u| u.active)
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.inner()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap()
    }
}

fn failure(command: &str) -> Error {
    Error::Command {
        command: command.to_owned(),
        status: "exit status: 1".to_owned(),
        stderr: "Job failed".to_owned(),
    }
}

impl ServiceManager for FakeServices {
    fn start(&self, name: &str) -> Result<()> {
        let mut inner = self.inner();
        inner.calls.push(format!("start {name}"));
        if inner.failing_starts > 0 {
            inner.failing_starts -= 1;
            return Err(failure("systemctl start"));
        }
        let pending = if inner.stuck {
            u32::MAX
        } else {
            inner.start_delay
        };
        let unit = inner.units.entry(name.to_owned()).or_default();
        unit.active = true;
        unit.pending = pending;
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        let mut inner = self.inner();
        inner.calls.push(format!("stop {name}"));
        if inner.failing_stops > 0 {
            inner.failing_stops -= 1;
            return Err(failure("systemctl stop"));
        }
        let unit = inner.units.entry(name.to_owned()).or_default();
        unit.active = false;
        unit.pending = 0;
        Ok(())
    }

    fn state(&self, name: &str) -> Result<ServiceState> {
        let mut inner = self.inner();
        inner.calls.push(format!("state {name}"));
        let unit = inner.units.entry(name.to_owned()).or_default();
        Ok(if unit.pending > 0 {
            unit.pending -= 1;
            ServiceState::Activating
        } else if unit.active {
            ServiceState::Active
        } else {
            ServiceState::Inactive
        })
    }

    fn reload(&self) -> Result<()> {
        self.inner().calls.push("reload".to_owned());
        Ok(())
    }
}

pub fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

pub fn alice() -> CardIdentity {
    let issued = CertDir::new(data("")).generate_cert("CN=alice").unwrap();
    CardIdentity::new("alice", "123456", issued.cert, issued.key)
}

pub fn paths(root: &Path) -> CardPaths {
    CardPaths {
        cards_dir: root.join("cards"),
        unit_dir: root.join("units"),
        ..CardPaths::default()
    }
}

/// Controller over `services` with its artifacts in a temporary directory.
pub fn controller(services: FakeServices) -> (TempDir, Controller<FakeServices, NoEnroll>) {
    let root = tempfile::tempdir().unwrap();
    let controller =
        Controller::with_parts(paths(root.path()), Timing::immediate(), services, NoEnroll);
    (root, controller)
}
