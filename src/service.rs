// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Service managers that back virtual cards.
//!
//! A virtual card is present while its backing service runs.  The [`Controller`][`crate::Controller`]
//! only needs to start, stop and query services by name, so these operations are abstracted by the
//! [`ServiceManager`] trait.  [`Systemd`] implements it with `systemctl`.

mod systemd;

pub use systemd::Systemd;

use core::fmt::Debug;

use crate::error::Result;

/// Starts, stops and queries system services by name.
pub trait ServiceManager: Debug + Send + Sync {
    /// Starts the service.  Returns once the start request has been accepted.
    fn start(&self, name: &str) -> Result<()>;

    /// Stops the service.
    fn stop(&self, name: &str) -> Result<()>;

    /// Returns the current state of the service.
    fn state(&self, name: &str) -> Result<ServiceState>;

    /// Restarts the service.
    fn restart(&self, name: &str) -> Result<()> {
        self.stop(name)?;
        self.start(name)
    }

    /// Reloads service definitions after descriptors were added or removed.
    fn reload(&self) -> Result<()>;
}

impl<S: ServiceManager + ?Sized> ServiceManager for std::sync::Arc<S> {
    fn start(&self, name: &str) -> Result<()> {
        (**self).start(name)
    }

    fn stop(&self, name: &str) -> Result<()> {
        (**self).stop(name)
    }

    fn state(&self, name: &str) -> Result<ServiceState> {
        (**self).state(name)
    }

    fn restart(&self, name: &str) -> Result<()> {
        (**self).restart(name)
    }

    fn reload(&self) -> Result<()> {
        (**self).reload()
    }
}

/// Activity state of a service, as reported by `systemctl is-active`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceState {
    /// Running.
    Active,
    /// Starting up.
    Activating,
    /// Shutting down.
    Deactivating,
    /// Not running.
    Inactive,
    /// Stopped after a failure.
    Failed,
    /// Any other state string.
    Unknown(String),
}

impl ServiceState {
    /// Parses the output of `systemctl is-active`.
    pub fn parse(state: &str) -> Self {
        match state.trim() {
            "active" | "reloading" | "refreshing" => Self::Active,
            "activating" => Self::Activating,
            "deactivating" => Self::Deactivating,
            "inactive" | "" => Self::Inactive,
            "failed" => Self::Failed,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Whether the service is running.
    pub fn is_active(&self) -> bool {
        *self == Self::Active
    }

    /// Whether the service is settled in a stopped state.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Inactive | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_states() {
        assert_eq!(ServiceState::parse("active\n"), ServiceState::Active);
        assert_eq!(ServiceState::parse("activating"), ServiceState::Activating);
        assert_eq!(ServiceState::parse("inactive\n"), ServiceState::Inactive);
        assert_eq!(ServiceState::parse("failed"), ServiceState::Failed);
        assert_eq!(
            ServiceState::parse("maintenance"),
            ServiceState::Unknown("maintenance".into())
        );
        assert!(ServiceState::Failed.is_stopped());
        assert!(!ServiceState::Deactivating.is_stopped());
    }
}
