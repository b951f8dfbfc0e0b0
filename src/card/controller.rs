// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use super::{Card, CardGuard, CardIdentity, CardInfo, Descriptor, Presence};
use crate::{
    cert,
    config::{CardPaths, Config, Timing},
    error::{Error, ProvisioningError, Result},
    service::{ServiceManager, Systemd},
    token::{Enroller, SoftHsm},
    user::User,
};

/// Unit files of all active cards in this process, across controllers.
static CLAIMED: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();

fn claimed() -> MutexGuard<'static, HashSet<PathBuf>> {
    CLAIMED
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Provisions virtual cards and controls their presence.
///
/// No two active cards share a backing service, also if they were provisioned by different
/// controllers of the same process.  Artifacts the controller created are deleted again when the card is
/// deprovisioned; artifacts that already existed on the host are reused and left alone.
#[derive(Debug)]
pub struct Controller<S: ServiceManager, E: Enroller = SoftHsm> {
    services: Arc<S>,
    enroller: E,
    paths: CardPaths,
    timing: Timing,
    // backing service name -> whether the controller created the descriptor
    active: Mutex<HashMap<String, bool>>,
}

impl Controller<Systemd, SoftHsm> {
    /// Controller for the local host, using systemd and SoftHSM.
    pub fn systemd(config: &Config) -> Self {
        Self::new(config, Systemd::new(), SoftHsm::new(&config.cards))
    }
}

impl<S: ServiceManager, E: Enroller> Controller<S, E> {
    /// Creates a controller with the paths and timing from `config`.
    pub fn new(config: &Config, services: S, enroller: E) -> Self {
        Self::with_parts(config.cards.clone(), config.timing.clone(), services, enroller)
    }

    /// Creates a controller from explicit paths and timing.
    pub fn with_parts(paths: CardPaths, timing: Timing, services: S, enroller: E) -> Self {
        Self {
            services: Arc::new(services),
            enroller,
            paths,
            timing,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The service manager backing the cards.
    pub fn services(&self) -> &S {
        &self.services
    }

    /// Names of the backing services of all active cards.
    pub fn active_cards(&self) -> Vec<String> {
        let mut names: Vec<_> = self.registry().keys().cloned().collect();
        names.sort();
        names
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Provisions a card for `identity`.
    ///
    /// Fails if another active card uses the same backing service or if the certificate or key
    /// cannot be read.  The returned card is not inserted.
    pub fn provision(&self, identity: CardIdentity) -> Result<Card<S>> {
        let service = identity.service_name();
        let unit = Descriptor::new(&self.paths, &service).unit;
        if !claimed().insert(unit.clone()) {
            return Err(ProvisioningError::NameCollision(service).into());
        }

        match self.prepare(&identity, &service) {
            Ok((info, created)) => {
                self.registry().insert(service, created);
                info!("Provisioned card {} for {}", info.service, info.user);
                Ok(Card::new(info, self.services.clone(), self.timing.clone()))
            }
            Err(err) => {
                claimed().remove(&unit);
                Err(err)
            }
        }
    }

    fn prepare(&self, identity: &CardIdentity, service: &str) -> Result<(CardInfo, bool)> {
        identity.check_pin()?;
        cert::read_material(&identity.key)?;
        let subject = cert::subject(&identity.cert)?;
        debug!("Certificate for {} has subject {subject}", identity.user);

        let descriptor = Descriptor::new(&self.paths, service);
        let created = if descriptor.exists() {
            info!("Reusing existing card descriptor {}", descriptor.unit.display());
            false
        } else {
            if let Err(err) = self.create(identity, &descriptor) {
                if let Err(cleanup) = descriptor.remove() {
                    warn!("Failed to clean up after failed provisioning: {cleanup}");
                }
                return Err(err);
            }
            true
        };

        let info = CardInfo {
            user: identity.user.clone(),
            pin: identity.pin.clone(),
            label: identity.label.clone(),
            service: service.to_owned(),
            cert: identity.cert.clone(),
            key: identity.key.clone(),
            subject,
            card_dir: descriptor.card_dir,
        };
        Ok((info, created))
    }

    fn create(&self, identity: &CardIdentity, descriptor: &Descriptor) -> Result<()> {
        let artifact = |path: &std::path::Path, source: Error| ProvisioningError::Artifact {
            path: path.to_owned(),
            source: Box::new(source),
        };
        descriptor
            .write_token_config()
            .map_err(|err| artifact(descriptor.softhsm_conf.as_path(), err.into()))?;
        self.enroller
            .enroll(identity, &descriptor.softhsm_conf)
            .map_err(|err| artifact(descriptor.token_dir.as_path(), err))?;
        descriptor
            .write_unit(&identity.user, &self.paths.virt_cacard)
            .map_err(|err| artifact(descriptor.unit.as_path(), err.into()))?;
        self.services
            .reload()
            .map_err(|err| artifact(descriptor.unit.as_path(), err))?;
        Ok(())
    }

    /// Inserts `card`.  See [`Card::insert`].
    pub fn insert(&self, card: &Card<S>) -> Result<()> {
        card.insert()
    }

    /// Removes `card`.  See [`Card::remove`].
    pub fn remove(&self, card: &Card<S>) -> Result<()> {
        card.remove()
    }

    /// Queries the presence of `card`.  See [`Card::status`].
    pub fn status(&self, card: &Card<S>) -> Result<Presence> {
        card.status()
    }

    /// Removes the card, deletes the artifacts created for it and releases its backing service
    /// name.
    ///
    /// All steps run even if an earlier one fails; the first error is returned.
    pub fn deprovision(&self, card: &Card<S>) -> Result<()> {
        let service = card.service();
        let mut first_error = card.remove().err();

        let created = self.registry().get(service).copied().unwrap_or(false);
        if created {
            let descriptor = Descriptor::new(&self.paths, service);
            if let Err(err) = descriptor.remove() {
                warn!("Failed to delete descriptor of {service}: {err}");
                first_error.get_or_insert(err.into());
            }
            if let Err(err) = self.services.reload() {
                warn!("Failed to reload services after deleting {service}: {err}");
                first_error.get_or_insert(err);
            }
        }

        if self.registry().remove(service).is_some() {
            claimed().remove(&Descriptor::new(&self.paths, service).unit);
        }
        info!("Deprovisioned card {service}");
        first_error.map_or(Ok(()), Err)
    }

    /// Provisions the card of `user`, inserting it if requested.
    ///
    /// The card is removed and deprovisioned when the returned guard goes out of scope, also
    /// when the scenario panics.
    pub fn scoped_card(&self, user: &User, insert: bool) -> Result<CardGuard<'_, S, E>> {
        let identity = user.card_identity()?;
        let guard = CardGuard::new(self, self.provision(identity)?);
        if insert {
            guard.insert()?;
        }
        Ok(guard)
    }

    /// Runs `f` with the card of `user`, inserting it first if requested.
    ///
    /// Teardown errors are returned if `f` completes; if `f` panics they are logged and the panic
    /// continues.
    pub fn with_card<F: FnOnce(&Card<S>) -> R, R>(
        &self,
        user: &User,
        insert: bool,
        f: F,
    ) -> Result<R> {
        let guard = self.scoped_card(user, insert)?;
        let result = f(guard.card());
        guard.finish()?;
        Ok(result)
    }
}
