// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use std::process::Command;

use super::{ServiceManager, ServiceState};
use crate::{error::Result, utils};

/// [`ServiceManager`] backed by `systemctl`.
#[derive(Clone, Debug)]
pub struct Systemd {
    systemctl: String,
}

impl Systemd {
    /// Uses `systemctl` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("systemctl")
    }

    /// Uses the given `systemctl` binary.
    pub fn with_binary(systemctl: impl Into<String>) -> Self {
        Self {
            systemctl: systemctl.into(),
        }
    }

    fn command<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Command {
        let mut command = Command::new(&self.systemctl);
        command.args(args);
        command
    }
}

impl Default for Systemd {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for Systemd {
    fn start(&self, name: &str) -> Result<()> {
        utils::run(&mut self.command(["start", name])).map(drop)
    }

    fn stop(&self, name: &str) -> Result<()> {
        utils::run(&mut self.command(["stop", name])).map(drop)
    }

    fn state(&self, name: &str) -> Result<ServiceState> {
        // is-active exits non-zero for anything but "active", the state is on stdout either way
        let output = utils::run_unchecked(&mut self.command(["is-active", name]))?;
        Ok(ServiceState::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    fn restart(&self, name: &str) -> Result<()> {
        utils::run(&mut self.command(["restart", name])).map(drop)
    }

    fn reload(&self) -> Result<()> {
        utils::run(&mut self.command(["daemon-reload"])).map(drop)
    }
}
