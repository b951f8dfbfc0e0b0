// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Certificate material for virtual cards.
//!
//! Issuing certificates is the job of an external CA; the harness only needs the resulting
//! files and checks that they are usable before a card is provisioned.

use std::{
    fs,
    path::{Path, PathBuf},
};

use x509_cert::{der::DecodePem, Certificate};

use crate::error::{ProvisioningError, Result};

/// Paths of a certificate and its private key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertKeyPair {
    /// PEM certificate.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

/// Issues certificates for card holders.
pub trait CertificateSource {
    /// Issues a certificate and key with the given subject, e.g. `CN=alice`.
    fn generate_cert(&self, subject: &str) -> Result<CertKeyPair>;
}

/// Certificates issued ahead of time, stored as `<cn>-cert.pem` and `<cn>-key.pem`.
#[derive(Clone, Debug)]
pub struct CertDir {
    dir: PathBuf,
}

impl CertDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CertificateSource for CertDir {
    fn generate_cert(&self, subject: &str) -> Result<CertKeyPair> {
        let invalid = |path: &Path, reason: String| ProvisioningError::InvalidCertificate {
            path: path.to_owned(),
            reason,
        };
        let name = common_name(subject)
            .ok_or_else(|| invalid(&self.dir, format!("no common name in {subject:?}")))?;
        let pair = CertKeyPair {
            cert: self.dir.join(format!("{name}-cert.pem")),
            key: self.dir.join(format!("{name}-key.pem")),
        };
        read_material(&pair.key)?;
        let issued = self::subject(&pair.cert)?;
        if common_name(&issued) != Some(name) {
            return Err(invalid(&pair.cert, format!("issued for {issued}")).into());
        }
        debug!("Using certificate {} for {subject}", pair.cert.display());
        Ok(pair)
    }
}

fn common_name(subject: &str) -> Option<&str> {
    subject
        .split(',')
        .find_map(|rdn| rdn.trim().strip_prefix("CN="))
}

/// Checks that `path` is readable and returns its contents.
pub fn read_material(path: &Path) -> Result<Vec<u8>, ProvisioningError> {
    fs::read(path).map_err(|source| ProvisioningError::MissingMaterial {
        path: path.to_owned(),
        source,
    })
}

/// Returns the subject of a PEM certificate in RFC 4514 notation, e.g. `CN=alice,O=Example`.
pub fn subject(path: &Path) -> Result<String, ProvisioningError> {
    let pem = read_material(path)?;
    let certificate =
        Certificate::from_pem(&pem).map_err(|err| ProvisioningError::InvalidCertificate {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
    Ok(certificate.tbs_certificate.subject.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/data")
            .join(name)
    }

    #[test]
    fn subject_of_certificate() {
        let subject = subject(&data("alice-cert.pem")).unwrap();
        assert!(subject.contains("CN=alice"), "{subject}");
        assert!(subject.contains("O=Example"), "{subject}");
    }

    #[test]
    fn key_is_not_a_certificate() {
        assert!(matches!(
            subject(&data("alice-key.pem")),
            Err(ProvisioningError::InvalidCertificate { .. })
        ));
    }

    #[test]
    fn issued_certificates() {
        let source = CertDir::new(data(""));
        let pair = source.generate_cert("CN=alice,O=Example").unwrap();
        assert_eq!(pair.cert, data("alice-cert.pem"));
        assert_eq!(pair.key, data("alice-key.pem"));

        assert!(matches!(
            source.generate_cert("CN=bob"),
            Err(crate::Error::Provisioning(ProvisioningError::MissingMaterial { .. }))
        ));
        assert!(matches!(
            source.generate_cert("O=Example"),
            Err(crate::Error::Provisioning(ProvisioningError::InvalidCertificate { .. }))
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            subject(&data("nobody-cert.pem")),
            Err(ProvisioningError::MissingMaterial { .. })
        ));
    }
}
