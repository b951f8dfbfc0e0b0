// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only
#![allow(unused)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use sc_harness::{
    AuthProfile, Authselect, Config, ConfigBackup, Controller, ProfileApplier, ProfileGuard,
    Session, Systemd, User,
};

pub const SSSD_CONF: &str = "/etc/sssd/sssd.conf";

/// Scenarios share the host's PAM stack and cards, so only one runs at a time.
static HOST: Mutex<()> = Mutex::new(());

/// Everything a scenario on the live host needs.
#[derive(Debug)]
pub struct Fixture {
    pub config: Config,
    pub controller: Controller<Systemd>,
    pub systemd: Systemd,
    authselect: Authselect,
    _host: MutexGuard<'static, ()>,
}

pub fn fixture() -> Fixture {
    let host = HOST.lock().unwrap_or_else(PoisonError::into_inner);
    let config = Config::from_env().unwrap();
    Fixture {
        controller: Controller::systemd(&config),
        systemd: Systemd::new(),
        authselect: Authselect::new(),
        config,
        _host: host,
    }
}

impl Fixture {
    pub fn local_user(&self) -> &User {
        self.config.local_user().unwrap()
    }

    pub fn users(&self) -> Vec<&User> {
        self.config.users_under_test().unwrap()
    }

    /// Shell of the unprivileged base user.
    pub fn user_shell(&self) -> Session {
        Session::user_shell(&self.config).unwrap()
    }

    pub fn root_shell(&self) -> Session {
        Session::root_shell(&self.config).unwrap()
    }

    pub fn profile(&self, profile: AuthProfile) -> ProfileGuard<'_, Authselect> {
        self.authselect.scoped(profile).unwrap()
    }

    /// Backs up `sssd.conf`, restoring it and restarting SSSD when dropped.
    pub fn sssd_conf(&self) -> ConfigBackup<'_, Systemd> {
        ConfigBackup::new(SSSD_CONF, &self.systemd, &["sssd"]).unwrap()
    }
}
