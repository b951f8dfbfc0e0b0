// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Virtual smart cards.
//!
//! A [`Card`] is a handle to a provisioned virtual card.  Clones share the same card; inserting or
//! removing it from two places at once fails with [`Error::ConcurrentAccess`].

mod controller;
mod descriptor;
mod guard;
mod state;

pub use controller::Controller;
pub use descriptor::Descriptor;
pub use guard::CardGuard;
pub use state::Presence;

use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    thread::sleep,
};

use crate::{
    config::Timing,
    error::{Error, ProvisioningError, Result},
    service::ServiceManager,
    user::User,
};
use state::Busy;

/// Prefix of the backing service names.
pub const SERVICE_PREFIX: &str = "virt-sc-";

/// What is needed to provision a card for a user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CardIdentity {
    /// Owner of the card.
    pub user: String,
    /// User PIN of the token.
    pub pin: String,
    /// PEM certificate whose subject maps to `user`.
    pub cert: PathBuf,
    /// PEM private key matching `cert`.
    pub key: PathBuf,
    /// Optional label to tell several cards of one user apart.
    pub label: Option<String>,
}

impl CardIdentity {
    /// Creates an identity without label.
    pub fn new(
        user: impl Into<String>,
        pin: impl Into<String>,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            user: user.into(),
            pin: pin.into(),
            cert: cert.into(),
            key: key.into(),
            label: None,
        }
    }

    /// Sets the card label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builds the identity from the user's configured card material.
    pub fn for_user(user: &User) -> Result<Self, ProvisioningError> {
        let (Some(card), Some(pin)) = (user.card(), user.pin()) else {
            return Err(ProvisioningError::NoCardMaterial(user.username().into()));
        };
        Ok(Self {
            user: user.username().into(),
            pin: pin.into(),
            cert: card.cert.clone(),
            key: card.key.clone(),
            label: card.label.clone(),
        })
    }

    /// Name of the backing service, derived from user and label.
    pub fn service_name(&self) -> String {
        let mut name = String::from(SERVICE_PREFIX);
        name.push_str(&self.user);
        if let Some(label) = &self.label {
            name.push('-');
            name.push_str(label);
        }
        name.chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                _ => '-',
            })
            .collect()
    }

    pub(crate) fn check_pin(&self) -> Result<(), ProvisioningError> {
        if self.pin.is_empty() || !self.pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProvisioningError::InvalidPin(self.user.clone()));
        }
        Ok(())
    }
}

/// Facts about a provisioned card.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CardInfo {
    /// Owner of the card.
    pub user: String,
    /// User PIN of the token.
    pub pin: String,
    /// Card label.
    pub label: Option<String>,
    /// Name of the backing service.
    pub service: String,
    /// Certificate file.
    pub cert: PathBuf,
    /// Private key file.
    pub key: PathBuf,
    /// Certificate subject in RFC 4514 notation.
    pub subject: String,
    /// Directory holding the token.
    pub card_dir: PathBuf,
}

impl CardInfo {
    /// Token label as shown by PKCS#11 tools.
    pub fn token_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.user)
    }

    /// PKCS#11 URI matching the token emulated by `virt_cacard`.
    pub fn pkcs11_uri(&self) -> String {
        format!(
            "pkcs11:token={};manufacturer=Common%20Access%20Card;model=PKCS%2315%20emulated",
            pkcs11_escape(self.token_label())
        )
    }
}

fn pkcs11_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                escaped.push(char::from(byte))
            }
            _ => escaped.push_str(&format!("%{byte:02X}")),
        }
    }
    escaped
}

struct CardInner<S> {
    info: CardInfo,
    services: Arc<S>,
    timing: Timing,
    busy: AtomicBool,
}

/// Handle to a provisioned virtual card.
pub struct Card<S: ServiceManager> {
    inner: Arc<CardInner<S>>,
}

impl<S: ServiceManager> Clone for Card<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: ServiceManager> core::fmt::Debug for Card<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Card")
            .field("user", &self.inner.info.user)
            .field("service", &self.inner.info.service)
            .finish_non_exhaustive()
    }
}

impl<S: ServiceManager> Card<S> {
    pub(crate) fn new(info: CardInfo, services: Arc<S>, timing: Timing) -> Self {
        Self {
            inner: Arc::new(CardInner {
                info,
                services,
                timing,
                busy: AtomicBool::new(false),
            }),
        }
    }

    /// Facts about the card.
    pub fn info(&self) -> &CardInfo {
        &self.inner.info
    }

    /// Owner of the card.
    pub fn user(&self) -> &str {
        &self.inner.info.user
    }

    /// User PIN of the token.
    pub fn pin(&self) -> &str {
        &self.inner.info.pin
    }

    /// Name of the backing service.
    pub fn service(&self) -> &str {
        &self.inner.info.service
    }

    /// Certificate subject.
    pub fn subject(&self) -> &str {
        &self.inner.info.subject
    }

    /// PKCS#11 URI of the token.  See [`CardInfo::pkcs11_uri`].
    pub fn pkcs11_uri(&self) -> String {
        self.inner.info.pkcs11_uri()
    }

    /// Queries whether the card is currently inserted.
    ///
    /// This always asks the service manager, so insertions and removals made behind the
    /// harness' back are reported correctly.
    pub fn status(&self) -> Result<Presence> {
        let state = self.inner.services.state(self.service())?;
        Ok(Presence::of(&state))
    }

    /// Inserts the card and waits until the backing service is active.  Inserting an inserted card
    /// does nothing.
    pub fn insert(&self) -> Result<()> {
        self.converge(Presence::Present)
    }

    /// Removes the card and waits until the backing service has stopped.  Removing a removed card
    /// does nothing.
    pub fn remove(&self) -> Result<()> {
        self.converge(Presence::Absent)
    }

    fn converge(&self, target: Presence) -> Result<()> {
        let service = self.service();
        let _busy = Busy::acquire(&self.inner.busy, service)?;

        // a service that is still starting counts as absent but must be stopped all the same
        let state = self.inner.services.state(service)?;
        if target.reached(&state) {
            debug!("Card {service} is already {target}");
            return Ok(());
        }

        let timing = &self.inner.timing;
        let attempts = timing.retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(timing.backoff());
            }
            debug!("{} card {service}, attempt {attempt}/{attempts}", target.action());
            let request = match target {
                Presence::Present => self.inner.services.start(service),
                Presence::Absent => self.inner.services.stop(service),
            };
            if let Err(err) = request {
                warn!("Failed to {} card {service}: {err}", target.action());
                last_error = Some(err);
                // a failed stop still counts if the service is down anyway
                if target == Presence::Present {
                    continue;
                }
            }
            match self.poll(target) {
                Ok(true) => {
                    let settle = match target {
                        Presence::Present => timing.insert_settle(),
                        Presence::Absent => timing.remove_settle(),
                    };
                    sleep(settle);
                    info!("Card {service} is {target}");
                    return Ok(());
                }
                Ok(false) => warn!("Card {service} did not become {target} in time"),
                Err(err) => {
                    warn!("Failed to query card {service}: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(Error::Device {
            service: service.to_owned(),
            action: target.action(),
            attempts,
            source: last_error.map(Box::new),
        })
    }

    fn poll(&self, target: Presence) -> Result<bool> {
        let timing = &self.inner.timing;
        for poll in 0..timing.poll_attempts.max(1) {
            if poll > 0 {
                sleep(timing.poll_interval());
            }
            let state = self.inner.services.state(self.service())?;
            trace!("Card {} backing service is {state:?}", self.service());
            if target.reached(&state) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> CardIdentity {
        CardIdentity::new("alice", "123456", "alice-cert.pem", "alice-key.pem")
    }

    #[test]
    fn service_names() {
        assert_eq!(identity().service_name(), "virt-sc-alice");
        assert_eq!(
            identity().with_label("backup card").service_name(),
            "virt-sc-alice-backup-card"
        );
        assert_eq!(
            CardIdentity::new("dom\\bob@EXAMPLE", "1", "c", "k").service_name(),
            "virt-sc-dom-bob-EXAMPLE"
        );
    }

    #[test]
    fn pin_must_be_numeric() {
        assert!(identity().check_pin().is_ok());
        let mut bad = identity();
        bad.pin = "12a456".into();
        assert!(matches!(
            bad.check_pin(),
            Err(ProvisioningError::InvalidPin(user)) if user == "alice"
        ));
        bad.pin.clear();
        assert!(bad.check_pin().is_err());
    }

    #[test]
    fn pkcs11_uri() {
        let info = CardInfo {
            user: "alice".into(),
            pin: "123456".into(),
            label: Some("Alice #2".into()),
            service: "virt-sc-alice-Alice--2".into(),
            cert: "alice-cert.pem".into(),
            key: "alice-key.pem".into(),
            subject: "CN=alice".into(),
            card_dir: "/tmp/cards/virt-sc-alice".into(),
        };
        assert_eq!(
            info.pkcs11_uri(),
            "pkcs11:token=Alice%20%232;manufacturer=Common%20Access%20Card;model=PKCS%2315%20emulated"
        );
    }
}
