// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Prompts printed by PAM, SSSD and the shadow utilities.

use regex::Regex;

use crate::session::Pattern;

/// A prompt a scenario waits for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Prompt {
    /// `PIN for <user>:`, printed by `pam_sss` when a card is present.
    Pin(String),
    /// `Password:`, the password fallback.
    Password,
    /// `Please insert smart card` or `Please enter smart card`, printed when a card is required
    /// but missing.
    InsertCard,
    /// `su: Authentication failure`.
    AuthFailure,
    /// `pam_authenticate for user [<user>]: Success`, printed by `sssctl user-checks`.
    PamSuccess(String),
    /// `Changing password for user <user>.`, printed by `passwd`.
    PasswordChange(String),
    /// `Current password`, printed by `passwd` for the old password.
    CurrentPassword,
}

impl Prompt {
    /// Pattern matching the prompt.
    pub fn pattern(&self) -> Pattern {
        match self {
            Self::Pin(user) => Pattern::Exact(format!("PIN for {user}:")),
            Self::Password => Pattern::from("Password:"),
            Self::InsertCard => {
                #[allow(clippy::expect_used)]
                let regex = Regex::new("Please (insert|enter) smart card")
                    .expect("Constant regex should compile");
                Pattern::Regex(regex)
            }
            Self::AuthFailure => Pattern::from("su: Authentication failure"),
            Self::PamSuccess(user) => {
                Pattern::Exact(format!("pam_authenticate for user [{user}]: Success"))
            }
            Self::PasswordChange(user) => {
                Pattern::Exact(format!("Changing password for user {user}."))
            }
            Self::CurrentPassword => Pattern::from("Current password"),
        }
    }
}

impl From<Prompt> for Pattern {
    fn from(prompt: Prompt) -> Self {
        prompt.pattern()
    }
}

impl From<&Prompt> for Pattern {
    fn from(prompt: &Prompt) -> Self {
        prompt.pattern()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(prompt: Prompt, text: &str) -> bool {
        prompt.pattern().find(text).is_some()
    }

    #[test]
    fn prompts_match_pam_output() {
        assert!(matches(Prompt::Pin("alice".into()), "PIN for alice: "));
        assert!(!matches(Prompt::Pin("alice".into()), "PIN for bob: "));
        assert!(matches(Prompt::InsertCard, "Please insert smart card\n"));
        assert!(matches(Prompt::InsertCard, "Please enter smart card\n"));
        assert!(matches(
            Prompt::PamSuccess("dom\\alice".into()),
            "pam_authenticate for user [dom\\alice]: Success\n"
        ));
        assert!(matches(
            Prompt::PasswordChange("alice".into()),
            "Changing password for user alice.\nCurrent password: "
        ));
        assert!(matches(Prompt::AuthFailure, "su: Authentication failure\n"));
    }
}
