// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Scoped backups of configuration files.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::{error::Result, service::ServiceManager};

/// A copy of a configuration file that is put back when dropped.
///
/// The listed services are restarted once after the backup is taken and again after the file is
/// restored.
#[derive(Debug)]
pub struct ConfigBackup<'a, S: ServiceManager> {
    path: PathBuf,
    copy: PathBuf,
    services: &'a S,
    restart: Vec<String>,
    restored: bool,
    _dir: TempDir,
}

impl<'a, S: ServiceManager> ConfigBackup<'a, S> {
    /// Backs up `path` and restarts `restart`.
    pub fn new(path: impl AsRef<Path>, services: &'a S, restart: &[&str]) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let dir = tempfile::Builder::new().prefix("sc-harness-backup").tempdir()?;
        let copy = dir.path().join("original");
        fs::copy(&path, &copy)?;
        debug!("Backed up {} to {}", path.display(), copy.display());

        let backup = Self {
            path,
            copy,
            services,
            restart: restart.iter().map(|&s| s.to_owned()).collect(),
            restored: false,
            _dir: dir,
        };
        backup.restart_services()?;
        Ok(backup)
    }

    /// The backed up file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contents of the file at the time of the backup.
    pub fn original(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.copy)?)
    }

    fn restart_services(&self) -> Result<()> {
        for service in &self.restart {
            self.services.restart(service)?;
        }
        Ok(())
    }

    fn put_back(&mut self) -> Result<()> {
        self.restored = true;
        fs::copy(&self.copy, &self.path)?;
        info!("Restored {}", self.path.display());
        self.restart_services()
    }

    /// Restores the file and restarts the services, returning the first error.
    pub fn restore(mut self) -> Result<()> {
        self.put_back()
    }
}

impl<S: ServiceManager> Drop for ConfigBackup<'_, S> {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(err) = self.put_back() {
                error!("Failed to restore {}: {err}", self.path.display());
            }
        }
    }
}
