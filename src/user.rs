// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Users that scenarios authenticate as.

use std::path::PathBuf;

use serde::Deserialize;

use crate::{card::CardIdentity, error::ProvisioningError};

/// A user under test, either a local (files provider) user or an IPA user.
///
/// Deserialized from a JSON object with a `"kind"` field set to `"local"` or `"ipa"`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum User {
    /// User from `/etc/passwd`.
    Local(LocalUser),
    /// User managed by an IPA server.
    Ipa(IpaUser),
}

/// A local user.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LocalUser {
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Smart card PIN.
    #[serde(default)]
    pub pin: Option<String>,
    /// Material for the user's virtual card.
    #[serde(default)]
    pub card: Option<CardMaterial>,
}

/// An IPA user.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct IpaUser {
    /// Login name.
    pub username: String,
    /// Kerberos password.
    pub password: String,
    /// Smart card PIN.
    #[serde(default)]
    pub pin: Option<String>,
    /// Material for the user's virtual card.
    #[serde(default)]
    pub card: Option<CardMaterial>,
    /// Hostname of the IPA server.
    pub ipa_server: String,
}

/// Certificate and key files for a user's virtual card.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CardMaterial {
    /// PEM certificate whose subject maps to the user.
    pub cert: PathBuf,
    /// PEM private key matching `cert`.
    pub key: PathBuf,
    /// Card label, used to tell several cards of one user apart.
    #[serde(default)]
    pub label: Option<String>,
}

impl User {
    /// Login name.
    pub fn username(&self) -> &str {
        match self {
            Self::Local(user) => &user.username,
            Self::Ipa(user) => &user.username,
        }
    }

    /// Password for password-based login.
    pub fn password(&self) -> &str {
        match self {
            Self::Local(user) => &user.password,
            Self::Ipa(user) => &user.password,
        }
    }

    /// Smart card PIN, if the user has a card.
    pub fn pin(&self) -> Option<&str> {
        match self {
            Self::Local(user) => user.pin.as_deref(),
            Self::Ipa(user) => user.pin.as_deref(),
        }
    }

    /// Card material, if the user has a card.
    pub fn card(&self) -> Option<&CardMaterial> {
        match self {
            Self::Local(user) => user.card.as_ref(),
            Self::Ipa(user) => user.card.as_ref(),
        }
    }

    /// Whether this is a local user.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// `"local"` or `"ipa"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Ipa(_) => "ipa",
        }
    }

    /// Identity for provisioning the user's card.
    pub fn card_identity(&self) -> Result<CardIdentity, ProvisioningError> {
        CardIdentity::for_user(self)
    }
}
