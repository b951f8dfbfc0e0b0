// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::config::CardPaths;

/// Files that make a virtual card known to the host.
///
/// Every card has its own directory with a SoftHSM configuration and token storage, and a
/// systemd unit that runs `virt_cacard` against that token.  Starting the unit inserts the card.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    /// Per-card directory.
    pub card_dir: PathBuf,
    /// SoftHSM token storage inside `card_dir`.
    pub token_dir: PathBuf,
    /// SoftHSM configuration inside `card_dir`.
    pub softhsm_conf: PathBuf,
    /// systemd unit file.
    pub unit: PathBuf,
}

impl Descriptor {
    /// Locations of the artifacts for the given backing service.
    pub fn new(paths: &CardPaths, service: &str) -> Self {
        let card_dir = paths.cards_dir.join(service);
        Self {
            token_dir: card_dir.join("tokens"),
            softhsm_conf: card_dir.join("softhsm2.conf"),
            unit: paths.unit_dir.join(format!("{service}.service")),
            card_dir,
        }
    }

    /// Whether the unit is already installed.
    pub fn exists(&self) -> bool {
        self.unit.exists()
    }

    /// Renders the SoftHSM configuration.
    pub fn softhsm_config(&self) -> String {
        format!(
            "directories.tokendir = {}/\n\
             slots.removable = true\n\
             objectstore.backend = file\n\
             log.level = INFO\n",
            self.token_dir.display()
        )
    }

    /// Renders the systemd unit.
    pub fn unit_file(&self, user: &str, virt_cacard: &Path) -> String {
        format!(
            "[Unit]\n\
             Description=virtual card for {user}\n\
             Requires=pcscd.service\n\
             \n\
             [Service]\n\
             Environment=SOFTHSM2_CONF=\"{conf}\"\n\
             WorkingDirectory={dir}\n\
             ExecStart={exec}\n\
             KillMode=process\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            conf = self.softhsm_conf.display(),
            dir = self.card_dir.display(),
            exec = virt_cacard.display(),
        )
    }

    /// Creates the card directory, token storage and SoftHSM configuration.
    pub fn write_token_config(&self) -> io::Result<()> {
        fs::create_dir_all(&self.token_dir)?;
        fs::write(&self.softhsm_conf, self.softhsm_config())
    }

    /// Installs the systemd unit.
    pub fn write_unit(&self, user: &str, virt_cacard: &Path) -> io::Result<()> {
        if let Some(parent) = self.unit.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.unit, self.unit_file(user, virt_cacard))
    }

    /// Deletes all artifacts.  Artifacts that do not exist are skipped.
    pub fn remove(&self) -> io::Result<()> {
        let unit = match fs::remove_file(&self.unit) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        };
        let dir = match fs::remove_dir_all(&self.card_dir) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        };
        unit.and(dir)
    }
}
