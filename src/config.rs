// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Harness configuration.
//!
//! The configuration is read once when a test binary starts and is then passed around by
//! reference.  It is a JSON document:
//!
//! ```json
//! {
//!     "root_password": "redhat",
//!     "local_username": "local-user",
//!     "user_type": "local",
//!     "users": [
//!         {
//!             "kind": "local",
//!             "username": "local-user",
//!             "password": "654321",
//!             "pin": "123456",
//!             "card": { "cert": "/root/certs/local-user.pem", "key": "/root/keys/local-user.pem" }
//!         }
//!     ],
//!     "timing": { "insert_settle_ms": 10000 }
//! }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    user::User,
};

/// Environment variable holding the path of the configuration file.
pub const CONFIG_ENV: &str = "SC_HARNESS_CONFIG";
/// Configuration file used if [`CONFIG_ENV`] is not set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sc-harness/config.json";

/// Which users parametrized scenarios run with.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// Only the local user.
    #[default]
    Local,
    /// Only the IPA user.
    Ipa,
    /// Both.
    All,
}

impl std::str::FromStr for UserType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "ipa" => Ok(Self::Ipa),
            "all" => Ok(Self::All),
            _ => Err(Error::Config(format!("unknown user type {s:?}"))),
        }
    }
}

/// Full harness configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root password, for scenarios that switch back to root.
    pub root_password: Option<String>,
    /// All known users.
    pub users: Vec<User>,
    /// Name of the local user under test.
    pub local_username: String,
    /// Name of the IPA user under test.
    pub ipa_username: String,
    /// Which users parametrized scenarios run with.
    pub user_type: UserType,
    /// Where card artifacts are placed.
    pub cards: CardPaths,
    /// Waits and retry budgets for card operations.
    pub timing: Timing,
    /// Defaults for interactive sessions.
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_password: None,
            users: Vec::new(),
            local_username: "local-user".into(),
            ipa_username: "ipa-user".into(),
            user_type: UserType::default(),
            cards: CardPaths::default(),
            timing: Timing::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Locations of virtual card artifacts.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CardPaths {
    /// Parent directory of the per-card directories (SoftHSM config and token storage).
    pub cards_dir: PathBuf,
    /// Directory the per-card systemd units are written to.
    pub unit_dir: PathBuf,
    /// The `virt_cacard` binary.
    pub virt_cacard: PathBuf,
    /// The SoftHSM PKCS#11 module.
    pub softhsm_module: PathBuf,
    /// Security officer PIN for newly initialized tokens.
    pub so_pin: String,
}

impl Default for CardPaths {
    fn default() -> Self {
        Self {
            cards_dir: "/var/lib/sc-harness/cards".into(),
            unit_dir: "/etc/systemd/system".into(),
            virt_cacard: "/usr/bin/virt_cacard".into(),
            softhsm_module: "/usr/lib64/pkcs11/libsofthsm2.so".into(),
            so_pin: "12345678".into(),
        }
    }
}

/// Waits and retry budgets for inserting and removing cards, in milliseconds.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Timing {
    /// Delay between two state queries while waiting for the backing service.
    pub poll_interval_ms: u64,
    /// State queries per attempt before the attempt counts as failed.
    pub poll_attempts: u32,
    /// Attempts to insert or remove a card before giving up.
    pub retries: u32,
    /// Delay between two attempts.
    pub backoff_ms: u64,
    /// Delay after insertion so that pcscd and SSSD pick up the token.
    pub insert_settle_ms: u64,
    /// Delay after removal.
    pub remove_settle_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            poll_attempts: 10,
            retries: 3,
            backoff_ms: 500,
            insert_settle_ms: 10_000,
            remove_settle_ms: 2000,
        }
    }
}

impl Timing {
    /// No delays at all, for service managers that converge immediately.
    pub fn immediate() -> Self {
        Self {
            poll_interval_ms: 0,
            poll_attempts: 5,
            retries: 3,
            backoff_ms: 0,
            insert_settle_ms: 0,
            remove_settle_ms: 0,
        }
    }

    /// See [`Timing::poll_interval_ms`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// See [`Timing::backoff_ms`].
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// See [`Timing::insert_settle_ms`].
    pub fn insert_settle(&self) -> Duration {
        Duration::from_millis(self.insert_settle_ms)
    }

    /// See [`Timing::remove_settle_ms`].
    pub fn remove_settle(&self) -> Duration {
        Duration::from_millis(self.remove_settle_ms)
    }
}

/// Defaults for interactive sessions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default timeout of `expect` calls.
    pub timeout_ms: u64,
    /// Shell used for user and root shells.
    pub shell: String,
    /// Unprivileged user the user shell runs as.
    pub base_user: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            shell: "/usr/bin/sh".into(),
            base_user: "base-user".into(),
        }
    }
}

impl SessionConfig {
    /// See [`SessionConfig::timeout_ms`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Parses a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))
    }

    /// Reads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("cannot read {}: {err}", path.display())))?;
        let config = Self::from_json(&json)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads the file named by `SC_HARNESS_CONFIG` (or the default path) and applies the
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load(path)?.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `SC_HARNESS_LOCAL_USER`, `SC_HARNESS_IPA_USER` and `SC_HARNESS_USER_TYPE`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(name) = lookup("SC_HARNESS_LOCAL_USER") {
            self.local_username = name;
        }
        if let Some(name) = lookup("SC_HARNESS_IPA_USER") {
            self.ipa_username = name;
        }
        if let Some(user_type) = lookup("SC_HARNESS_USER_TYPE") {
            self.user_type = user_type.parse()?;
        }
        Ok(self)
    }

    /// Looks up a user by name.
    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|user| user.username() == username)
    }

    /// The local user under test.
    pub fn local_user(&self) -> Result<&User> {
        self.user_of_kind(&self.local_username, true)
    }

    /// The IPA user under test.
    pub fn ipa_user(&self) -> Result<&User> {
        self.user_of_kind(&self.ipa_username, false)
    }

    /// Users that parametrized scenarios should run with, according to [`Config::user_type`].
    pub fn users_under_test(&self) -> Result<Vec<&User>> {
        let mut users = Vec::new();
        if matches!(self.user_type, UserType::Local | UserType::All) {
            users.push(self.local_user()?);
        }
        if matches!(self.user_type, UserType::Ipa | UserType::All) {
            users.push(self.ipa_user()?);
        }
        Ok(users)
    }

    fn user_of_kind(&self, username: &str, local: bool) -> Result<&User> {
        let user = self
            .user(username)
            .ok_or_else(|| Error::Config(format!("user {username} is not configured")))?;
        if user.is_local() != local {
            return Err(Error::Config(format!(
                "user {username} is a {} user",
                user.kind()
            )));
        }
        Ok(user)
    }
}
