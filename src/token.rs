// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Attaching key material to the token behind a virtual card.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use crate::{card::CardIdentity, config::CardPaths, error::Result, utils};

/// Initializes a card's token and imports the holder's key and certificate.
pub trait Enroller: core::fmt::Debug + Send + Sync {
    /// Enrolls `identity` into the token configured by `softhsm_conf`.
    fn enroll(&self, identity: &CardIdentity, softhsm_conf: &Path) -> Result<()>;
}

/// Enroller for tokens that were prepared outside of the harness.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEnroll;

impl Enroller for NoEnroll {
    fn enroll(&self, identity: &CardIdentity, _softhsm_conf: &Path) -> Result<()> {
        debug!("Token for {} is enrolled externally", identity.user);
        Ok(())
    }
}

/// Enrolls SoftHSM tokens with `softhsm2-util` and `pkcs11-tool`.
#[derive(Clone, Debug)]
pub struct SoftHsm {
    module: PathBuf,
    so_pin: String,
}

impl SoftHsm {
    /// Uses the module and security officer PIN from the card paths.
    pub fn new(paths: &CardPaths) -> Self {
        Self {
            module: paths.softhsm_module.clone(),
            so_pin: paths.so_pin.clone(),
        }
    }

    fn import(
        &self,
        identity: &CardIdentity,
        softhsm_conf: &Path,
        file: &Path,
        kind: &str,
    ) -> Result<()> {
        let mut command = Command::new("pkcs11-tool");
        command
            .env("SOFTHSM2_CONF", softhsm_conf)
            .arg("--module")
            .arg(&self.module)
            .args(["--slot-index", "0", "--write-object"])
            .arg(file)
            .args(["--type", kind, "--label", &identity.user])
            .args(["--login", "--pin", &identity.pin])
            .args(["--id", "01"]);
        utils::run(&mut command).map(drop)
    }
}

impl Enroller for SoftHsm {
    fn enroll(&self, identity: &CardIdentity, softhsm_conf: &Path) -> Result<()> {
        info!("Initializing token for {}", identity.user);
        let label = identity.label.as_deref().unwrap_or(&identity.user);
        let mut init = Command::new("softhsm2-util");
        init.env("SOFTHSM2_CONF", softhsm_conf)
            .args(["--init-token", "--free", "--label", label])
            .args(["--so-pin", &self.so_pin, "--pin", &identity.pin]);
        utils::run(&mut init)?;

        self.import(identity, softhsm_conf, &identity.key, "privkey")?;
        self.import(identity, softhsm_conf, &identity.cert, "cert")
    }
}
