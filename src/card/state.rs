// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    error::{Error, Result},
    service::ServiceState,
};

/// Whether a card is inserted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Presence {
    /// The backing service is active and the host can enumerate the token.
    Present,
    /// The backing service is not active.
    Absent,
}

impl Presence {
    /// Presence reported for a backing service in the given state.
    pub fn of(state: &ServiceState) -> Self {
        if state.is_active() {
            Self::Present
        } else {
            Self::Absent
        }
    }

    /// Whether a service in `state` has settled in this presence.
    ///
    /// Transitional states count for neither presence.
    pub(crate) fn reached(self, state: &ServiceState) -> bool {
        match self {
            Self::Present => state.is_active(),
            Self::Absent => state.is_stopped(),
        }
    }

    pub(crate) fn action(self) -> &'static str {
        match self {
            Self::Present => "insert",
            Self::Absent => "remove",
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Present => "inserted",
            Self::Absent => "removed",
        })
    }
}

/// Marks a card as being mutated for as long as it lives.
#[derive(Debug)]
pub(crate) struct Busy<'a>(&'a AtomicBool);

impl<'a> Busy<'a> {
    pub fn acquire(flag: &'a AtomicBool, service: &str) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ConcurrentAccess {
                service: service.to_owned(),
            })?;
        Ok(Self(flag))
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitional_states_are_not_settled() {
        assert!(!Presence::Absent.reached(&ServiceState::Deactivating));
        assert!(!Presence::Present.reached(&ServiceState::Activating));
        assert_eq!(Presence::of(&ServiceState::Activating), Presence::Absent);
        assert!(Presence::Absent.reached(&ServiceState::Failed));
    }

    #[test]
    fn busy_flag_is_exclusive() {
        let flag = AtomicBool::new(false);
        let busy = Busy::acquire(&flag, "virt-sc-alice").unwrap();
        assert!(matches!(
            Busy::acquire(&flag, "virt-sc-alice"),
            Err(Error::ConcurrentAccess { service }) if service == "virt-sc-alice"
        ));
        drop(busy);
        assert!(Busy::acquire(&flag, "virt-sc-alice").is_ok());
    }
}
