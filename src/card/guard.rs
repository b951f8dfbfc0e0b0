// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::{fmt, ops::Deref};

use super::{Card, Controller};
use crate::{error::Result, service::ServiceManager, token::Enroller};

/// A provisioned card that is removed and deprovisioned when dropped.
///
/// Use [`CardGuard::finish`] to observe teardown errors.  When dropped during a panic, teardown
/// still runs and its errors are logged.
pub struct CardGuard<'c, S: ServiceManager, E: Enroller> {
    controller: &'c Controller<S, E>,
    card: Card<S>,
    released: bool,
}

impl<'c, S: ServiceManager, E: Enroller> CardGuard<'c, S, E> {
    pub(crate) fn new(controller: &'c Controller<S, E>, card: Card<S>) -> Self {
        Self {
            controller,
            card,
            released: false,
        }
    }

    /// The guarded card.
    pub fn card(&self) -> &Card<S> {
        &self.card
    }

    /// Removes and deprovisions the card, returning the first teardown error.
    pub fn finish(mut self) -> Result<()> {
        self.released = true;
        self.controller.deprovision(&self.card)
    }
}

impl<S: ServiceManager, E: Enroller> Deref for CardGuard<'_, S, E> {
    type Target = Card<S>;

    fn deref(&self) -> &Card<S> {
        &self.card
    }
}

impl<S: ServiceManager, E: Enroller> fmt::Debug for CardGuard<'_, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardGuard")
            .field("card", &self.card)
            .field("released", &self.released)
            .finish()
    }
}

impl<S: ServiceManager, E: Enroller> Drop for CardGuard<'_, S, E> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.controller.deprovision(&self.card) {
            if std::thread::panicking() {
                error!(
                    "Teardown of card {} failed while unwinding: {err}",
                    self.card.service()
                );
            } else {
                error!("Teardown of card {} failed: {err}", self.card.service());
            }
        }
    }
}
