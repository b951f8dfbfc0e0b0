// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Harness for smart card login tests against a host configured with SSSD and authselect.
//!
//! # Virtual cards
//!
//! A virtual card is a software token exposed to the host's PKCS#11 stack by a per-card system
//! service (`virt_cacard` backed by SoftHSM).  The [`Controller`] provisions the device
//! descriptor for a user, inserts and removes the card by starting and stopping that service and
//! guarantees teardown through [`CardGuard`] even if a scenario panics.  The service manager is
//! abstracted by the [`ServiceManager`][`service::ServiceManager`] trait; [`Systemd`] is the
//! implementation used on real hosts.
//!
//! # Interactive sessions
//!
//! A [`Session`] runs a command (`su`, `login`, `ssh`, `sssctl`, a shell) on a pseudo-terminal,
//! records everything it prints into a transcript and lets a scenario wait for prompts with
//! bounded timeouts.  Common prompts are available as [`Prompt`] values so scenarios do not
//! have to repeat the regular expressions.
//!
//! ```no_run
//! use sc_harness::{Config, Controller, Prompt, Session};
//!
//! # fn main() -> sc_harness::Result<()> {
//! let config = Config::from_env()?;
//! let controller = Controller::systemd(&config);
//! let user = config.local_user()?;
//! controller.with_card(user, true, |_card| -> sc_harness::Result<()> {
//!     let mut shell = Session::spawn("sh")?;
//!     shell.send_line(&format!("su {} -c whoami", user.username()))?;
//!     shell.expect_prompt(&Prompt::Pin(user.username().into()))?;
//!     shell.send_secret_line(user.pin().unwrap_or_default())?;
//!     shell.expect(user.username())?;
//!     Ok(())
//! })??;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    non_ascii_idents,
    trivial_casts,
    unused,
    unused_qualifications,
    clippy::expect_used,
    clippy::unwrap_used
)]
#![deny(unsafe_code)]

#[macro_use]
extern crate log;

pub mod backup;
pub mod card;
pub mod cert;
pub mod config;
mod error;
pub mod profile;
pub mod prompt;
pub mod service;
pub mod session;
pub mod token;
pub mod user;
mod utils;

pub use backup::ConfigBackup;
pub use card::{Card, CardGuard, CardIdentity, CardInfo, Controller, Presence};
pub use config::Config;
pub use error::{Error, ExpectFailure, ExpectationError, ProvisioningError, Result};
pub use profile::{AuthProfile, Authselect, ProfileApplier, ProfileGuard};
pub use prompt::Prompt;
pub use service::{ServiceManager, ServiceState, Systemd};
pub use session::{Match, Pattern, PtyTerminal, Session, Terminal, Transcript};
pub use token::{Enroller, NoEnroll, SoftHsm};
pub use user::User;
