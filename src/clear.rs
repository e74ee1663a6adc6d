/*
 * Copyright 2023 Aon Cyber Solutions
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Blanks local account passwords (SAM) and domain cached credentials (SECURITY) in place.

use crate::cached_credential;
use crate::dump;
use crate::err::Error;
use crate::hive::HiveImage;
use crate::key_material::KeyMaterial;
use crate::log::{LogCode, Logs};
use crate::parser::{ParseOptions, Parser};
use crate::patch::PatchSet;
use crate::reg_path::NameMatch;
use crate::sam;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Why a run did or did not modify any accounts.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ClearOutcome {
    /// The accounts whose passwords were blanked.
    Cleared(Vec<String>),
    NothingToClear,
    NoSyskey,
    NoLsaKey,
    NoCacheKey,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ClearReport {
    pub outcome: ClearOutcome,
    /// One pwdump or mscash line per account, with the hashes as they were before clearing.
    pub dump: String,
    pub written: bool,
    pub logs: Logs,
}

impl ClearReport {
    fn new(outcome: ClearOutcome, logs: Logs) -> Self {
        ClearReport {
            outcome,
            dump: String::new(),
            written: false,
            logs,
        }
    }

    /// The accounts that were modified; empty for every outcome other than `Cleared`.
    pub fn cleared(&self) -> &[String] {
        match &self.outcome {
            ClearOutcome::Cleared(accounts) => accounts,
            _ => &[],
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClearBuilder {
    options: ParseOptions,
    write_back: bool,
    dump_path: Option<PathBuf>,
}

impl Default for ClearBuilder {
    fn default() -> Self {
        ClearBuilder {
            options: ParseOptions::default(),
            write_back: true,
            dump_path: None,
        }
    }
}

impl ClearBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_match(mut self, name_match: NameMatch) -> Self {
        self.options.name_match = name_match;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.options.max_depth = max_depth;
        self
    }

    /// When false, accounts are decrypted and blanked in memory only and no hive file is modified.
    pub fn write_back(mut self, write_back: bool) -> Self {
        self.write_back = write_back;
        self
    }

    pub fn dump_path<P: AsRef<Path>>(mut self, dump_path: P) -> Self {
        self.dump_path = Some(dump_path.as_ref().to_path_buf());
        self
    }

    /// Blanks the password of every local account in the SAM hive.
    pub fn clear_local<P: AsRef<Path>, Q: AsRef<Path>>(&self, system_path: P, sam_path: Q) -> Result<ClearReport, Error> {
        let system = HiveImage::from_path(system_path)?;
        let key_material = KeyMaterial::from_system(&Parser::with_options(&system, self.options))?;
        if key_material.boot_key.is_none() {
            return Ok(ClearReport::new(ClearOutcome::NoSyskey, key_material.logs));
        }

        let sam_path = sam_path.as_ref();
        let mut sam_hive = HiveImage::from_path(sam_path)?;
        let sam = Parser::with_options(&sam_hive, self.options);
        let key_material = key_material.with_sam(&sam)?;
        let mut logs = key_material.logs;
        let hashed_boot_key = match key_material.hashed_boot_key {
            Some(hashed_boot_key) => hashed_boot_key,
            None => return Ok(ClearReport::new(ClearOutcome::NoSyskey, logs)),
        };

        let mut accounts = sam::read_local_accounts(&sam, &hashed_boot_key)?;
        accounts.logs.prepend_all("SAM: ");
        logs.extend(accounts.logs);
        let mut dump = String::new();
        let mut cleared = Vec::new();
        let mut patches = PatchSet::new();
        for record in &accounts.records {
            dump.push_str(&dump::pwdump_line(record));
            dump.push('\n');
            if record.is_blank() {
                logs.add(LogCode::Info, &format!("{} has no password", record.username));
                continue;
            }
            patches.extend(record.blank_patches())?;
            cleared.push(record.username.clone());
        }

        let written = self.write_patches(&mut sam_hive, sam_path, &patches)?;
        self.finish(cleared, dump, written, logs)
    }

    /// Blanks every domain cached credential in the SECURITY hive.
    pub fn clear_domain<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        system_path: P,
        security_path: Q,
    ) -> Result<ClearReport, Error> {
        let system = HiveImage::from_path(system_path)?;
        let key_material = KeyMaterial::from_system(&Parser::with_options(&system, self.options))?;
        if key_material.boot_key.is_none() {
            return Ok(ClearReport::new(ClearOutcome::NoSyskey, key_material.logs));
        }

        let security_path = security_path.as_ref();
        let mut security_hive = HiveImage::from_path(security_path)?;
        let security = Parser::with_options(&security_hive, self.options);
        let key_material = key_material.with_security(&security)?;
        let mut logs = key_material.logs;
        if key_material.lsa_key.is_none() {
            return Ok(ClearReport::new(ClearOutcome::NoLsaKey, logs));
        }
        let nl_km = match key_material.nl_km {
            Some(nl_km) => nl_km,
            None => return Ok(ClearReport::new(ClearOutcome::NoCacheKey, logs)),
        };

        let mut credentials = cached_credential::read_cached_credentials(&security, &nl_km)?;
        credentials.logs.prepend_all("SECURITY: ");
        logs.extend(credentials.logs);
        let mut dump = String::new();
        let mut cleared = Vec::new();
        let mut patches = PatchSet::new();
        for mut record in credentials.records {
            let blanked = dump::mscash_line(&record).and_then(|line| {
                let username = record.username()?;
                record.blank()?;
                record.encrypt(&nl_km)?;
                Ok((line, username, record.to_patch()?))
            });
            match blanked {
                Ok((line, username, patch)) => {
                    dump.push_str(&line);
                    dump.push('\n');
                    patches.add(patch)?;
                    cleared.push(username);
                }
                Err(e) if e.is_record_level() => {
                    warn!("clear: skipping {}: {}", record.name, e);
                    logs.add(LogCode::for_error(&e), &format!("skipping {}: {}", record.name, e));
                }
                Err(e) => return Err(e),
            }
        }

        let written = self.write_patches(&mut security_hive, security_path, &patches)?;
        self.finish(cleared, dump, written, logs)
    }

    /// Writes the patches to the file the hive was loaded from and mirrors them into the image.
    fn write_patches(&self, hive: &mut HiveImage, path: &Path, patches: &PatchSet) -> Result<bool, Error> {
        if !self.write_back || patches.is_empty() {
            return Ok(false);
        }
        patches.apply_to_path(path)?;
        for patch in patches.patches() {
            hive.apply(patch)?;
        }
        info!("clear: wrote {} patches to {}", patches.len(), path.display());
        Ok(true)
    }

    fn finish(&self, cleared: Vec<String>, dump: String, written: bool, logs: Logs) -> Result<ClearReport, Error> {
        if let Some(dump_path) = &self.dump_path {
            dump::write_dump(dump_path, &dump)?;
        }
        let outcome = if cleared.is_empty() {
            ClearOutcome::NothingToClear
        } else {
            ClearOutcome::Cleared(cleared)
        };
        Ok(ClearReport {
            outcome,
            dump,
            written,
            logs,
        })
    }
}

/// Blanks local account passwords with the default options.
pub fn clear_local_passwords<P: AsRef<Path>, Q: AsRef<Path>>(system_path: P, sam_path: Q) -> Result<ClearReport, Error> {
    ClearBuilder::new().clear_local(system_path, sam_path)
}

/// Blanks domain cached credentials with the default options.
pub fn clear_domain_passwords<P: AsRef<Path>, Q: AsRef<Path>>(
    system_path: P,
    security_path: Q,
) -> Result<ClearReport, Error> {
    ClearBuilder::new().clear_domain(system_path, security_path)
}
