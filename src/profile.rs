// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Authentication profiles selected with `authselect`.

use std::{
    process::Command,
    sync::atomic::{AtomicU32, Ordering},
};

use bitflags::bitflags;

use crate::{error::Result, utils};

bitflags! {
    /// Features of the `sssd` authselect profile.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct AuthProfile: u8 {
        /// Allow smart card authentication.
        const SMARTCARD = 1;
        /// Require a smart card, disabling password authentication.
        const REQUIRED = 1 << 1;
        /// Lock the screen when the card is removed.
        const LOCK_ON_REMOVAL = 1 << 2;
        /// Create home directories on first login.
        const MKHOMEDIR = 1 << 3;
    }
}

impl Default for AuthProfile {
    fn default() -> Self {
        Self::SMARTCARD
    }
}

impl AuthProfile {
    /// Smart card authentication with password fallback.
    pub fn optional() -> Self {
        Self::SMARTCARD
    }

    /// Smart card authentication without password fallback.
    pub fn required() -> Self {
        Self::SMARTCARD | Self::REQUIRED
    }

    /// `authselect select` feature arguments.
    pub fn features(self) -> Vec<&'static str> {
        [
            (Self::SMARTCARD, "with-smartcard"),
            (Self::REQUIRED, "with-smartcard-required"),
            (Self::LOCK_ON_REMOVAL, "with-smartcard-lock-on-removal"),
            (Self::MKHOMEDIR, "with-mkhomedir"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, feature)| feature)
        .collect()
    }
}

static BACKUPS: AtomicU32 = AtomicU32::new(0);

/// Name for a new authselect backup, unique within the host.
fn backup_name() -> String {
    let n = BACKUPS.fetch_add(1, Ordering::Relaxed);
    format!("sc-harness-{}-{n}", std::process::id())
}

/// Applies an authentication profile to the host and restores the previous one.
pub trait ProfileApplier: core::fmt::Debug {
    /// Selects `profile`, saving the current configuration under `backup`.
    fn apply(&self, profile: AuthProfile, backup: &str) -> Result<()>;

    /// Restores and discards the configuration saved under `backup`.
    fn restore(&self, backup: &str) -> Result<()>;

    /// Applies `profile` until the returned guard is dropped.
    fn scoped(&self, profile: AuthProfile) -> Result<ProfileGuard<'_, Self>>
    where
        Self: Sized,
    {
        let backup = backup_name();
        self.apply(profile, &backup)?;
        Ok(ProfileGuard {
            applier: self,
            backup,
            restored: false,
        })
    }
}

/// `authselect` applier for the `sssd` profile.
#[derive(Clone, Debug)]
pub struct Authselect {
    binary: String,
}

impl Default for Authselect {
    fn default() -> Self {
        Self::new()
    }
}

impl Authselect {
    /// Uses `authselect` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("authselect")
    }

    /// Uses the given `authselect` binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }
}

impl ProfileApplier for Authselect {
    fn apply(&self, profile: AuthProfile, backup: &str) -> Result<()> {
        info!("Selecting authselect profile sssd {:?}", profile.features());
        let mut command = self.command();
        command
            .args(["select", "sssd"])
            .args(profile.features())
            .arg(format!("--backup={backup}"))
            .arg("--force");
        utils::run(&mut command).map(drop)
    }

    fn restore(&self, backup: &str) -> Result<()> {
        info!("Restoring authselect backup {backup}");
        utils::run(self.command().args(["backup-restore", backup]))?;
        utils::run(self.command().args(["backup-remove", backup])).map(drop)
    }
}

/// An applied profile that is restored when dropped.
#[derive(Debug)]
pub struct ProfileGuard<'a, A: ProfileApplier> {
    applier: &'a A,
    backup: String,
    restored: bool,
}

impl<A: ProfileApplier> ProfileGuard<'_, A> {
    /// Name of the authselect backup.
    pub fn backup(&self) -> &str {
        &self.backup
    }

    /// Restores the previous profile, returning the error if that fails.
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.applier.restore(&self.backup)
    }
}

impl<A: ProfileApplier> Drop for ProfileGuard<'_, A> {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(err) = self.applier.restore(&self.backup) {
                error!("Failed to restore authselect backup {}: {err}", self.backup);
            }
        }
    }
}
