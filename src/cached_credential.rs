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

//! Domain cached credentials (`\Cache\NL$<n>` values of the SECURITY hive).

use crate::cell_key_value::ValueNode;
use crate::crypto;
use crate::err::Error;
use crate::log::{LogCode, Logs};
use crate::parser::Parser;
use crate::patch::Patch;
use crate::util;
use chrono::{DateTime, Utc};
use nom::{
    bytes::complete::take,
    number::complete::{le_u16, le_u32, le_u64},
    IResult,
};
use tracing::{debug, warn};

/// Record revision written by the NT5 family.
pub const SUPPORTED_REVISION: u32 = 0x0001_0002;
pub const FLAG_ENCRYPTED: u32 = 0x0000_0001;
pub const CACHE_PATH: &str = "\\Cache";

const TAG_OFFSET: usize = 0x50;
const DCE_OFFSET: usize = 0x60;
const DCE_HASH_SIZE: usize = 16;
const DCE_USERNAME_OFFSET: usize = 0x48;

/// Fixed-width fields ahead of the DCE.
#[derive(Clone, Debug, Eq, PartialEq)]
struct CacheHeader {
    username_length: u16,
    domain_length: u16,
    user_id: u32,
    primary_group_id: u32,
    last_write: u64,
    revision: u32,
    flags: u32,
    full_domain_length: u16,
    cipher_key: [u8; 16],
    tag: [u8; 16],
}

impl CacheHeader {
    fn from_bytes(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, username_length) = le_u16(input)?;
        let (input, domain_length) = le_u16(input)?;
        let (input, _) = take(12usize)(input)?;
        let (input, user_id) = le_u32(input)?;
        let (input, primary_group_id) = le_u32(input)?;
        let (input, _) = take(8usize)(input)?;
        let (input, last_write) = le_u64(input)?;
        let (input, revision) = le_u32(input)?;
        let (input, _) = take(4usize)(input)?;
        let (input, flags) = le_u32(input)?;
        let (input, _) = take(8usize)(input)?;
        let (input, full_domain_length) = le_u16(input)?;
        let (input, _) = take(2usize)(input)?;
        let (input, cipher_key) = take(16usize)(input)?;
        let (input, tag) = take(16usize)(input)?;

        let mut header = CacheHeader {
            username_length,
            domain_length,
            user_id,
            primary_group_id,
            last_write,
            revision,
            flags,
            full_domain_length,
            cipher_key: [0; 16],
            tag: [0; 16],
        };
        header.cipher_key.copy_from_slice(cipher_key);
        header.tag.copy_from_slice(tag);
        Ok((input, header))
    }
}

/// One `NL$<n>` record. The DCE is an owned copy that is decrypted, blanked and re-encrypted
/// without touching the hive; `to_patch` produces the bytes to write back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CachedCredentialRecord {
    pub name: String,
    /// Absolute file offset of the record's first byte.
    pub file_offset: u64,
    header: CacheHeader,
    dce: Vec<u8>,
    decrypted: bool,
    /// Set by `blank` until `encrypt` recomputes the tag.
    modified: bool,
}

impl CachedCredentialRecord {
    pub fn from_bytes(name: &str, data: &[u8], file_offset: u64) -> Result<Self, Error> {
        let (dce, header) = CacheHeader::from_bytes(data)
            .map_err(|e| Error::format(format!("{}: {}", name, Error::from(e))))?;
        if header.username_length != 0 && header.revision != SUPPORTED_REVISION {
            return Err(Error::UnsupportedVersion {
                version: header.revision,
            });
        }
        Ok(CachedCredentialRecord {
            name: name.to_string(),
            file_offset,
            decrypted: header.flags & FLAG_ENCRYPTED == 0,
            modified: false,
            header,
            dce: dce.to_vec(),
        })
    }

    /// An unused cache slot.
    pub fn is_empty(&self) -> bool {
        self.header.username_length == 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_decrypted(&self) -> bool {
        self.decrypted
    }

    pub fn revision(&self) -> u32 {
        self.header.revision
    }

    pub fn user_id(&self) -> u32 {
        self.header.user_id
    }

    pub fn primary_group_id(&self) -> u32 {
        self.header.primary_group_id
    }

    pub fn cipher_key(&self) -> &[u8; 16] {
        &self.header.cipher_key
    }

    pub fn tag(&self) -> &[u8; 16] {
        &self.header.tag
    }

    pub fn last_write(&self) -> Option<DateTime<Utc>> {
        util::get_date_time_from_filetime(self.header.last_write)
    }

    fn rc4_key(&self, nl_km: &[u8]) -> Result<[u8; 16], Error> {
        crypto::hmac_md5(nl_km, &self.header.cipher_key)
    }

    /// Decrypts the DCE and checks its tag. On a tag mismatch the record keeps its encrypted DCE.
    pub fn decrypt(&mut self, nl_km: &[u8]) -> Result<(), Error> {
        if self.decrypted {
            return Ok(());
        }
        let key = self.rc4_key(nl_km)?;
        let mut plaintext = self.dce.clone();
        crypto::rc4(&key, &mut plaintext)?;
        crypto::hmac_md5_verify(&key, &plaintext, &self.header.tag)?;
        self.dce = plaintext;
        self.decrypted = true;
        Ok(())
    }

    /// Recomputes the tag over the plaintext DCE. A record flagged encrypted is RC4-encrypted
    /// again; a plaintext record keeps its DCE as is.
    pub fn encrypt(&mut self, nl_km: &[u8]) -> Result<(), Error> {
        self.require_decrypted()?;
        let key = self.rc4_key(nl_km)?;
        self.header.tag = crypto::hmac_md5(&key, &self.dce)?;
        self.modified = false;
        if self.is_encrypted() {
            crypto::rc4(&key, &mut self.dce)?;
            self.decrypted = false;
        }
        Ok(())
    }

    fn require_decrypted(&self) -> Result<(), Error> {
        if self.decrypted {
            Ok(())
        } else {
            Err(Error::format(format!("{} has not been decrypted", self.name)))
        }
    }

    /// The DCE field at `offset` of `length` bytes, with the offset of the field that follows it.
    fn dce_field(&self, offset: usize, length: u16) -> Result<(&[u8], usize), Error> {
        let length = length as usize;
        let field = util::slice_at(&self.dce, offset, length)?;
        Ok((field, offset + length + 2 * ((length / 2) % 2)))
    }

    pub fn hash(&self) -> Result<[u8; 16], Error> {
        self.require_decrypted()?;
        util::read_array_16(&self.dce, 0)
    }

    pub fn hash_string(&self) -> Result<String, Error> {
        Ok(util::to_hex_string(&self.hash()?))
    }

    pub fn username(&self) -> Result<String, Error> {
        self.require_decrypted()?;
        let (username, _) = self.dce_field(DCE_USERNAME_OFFSET, self.header.username_length)?;
        Ok(util::from_utf16_le_string(username))
    }

    pub fn domain(&self) -> Result<String, Error> {
        self.require_decrypted()?;
        let (_, next) = self.dce_field(DCE_USERNAME_OFFSET, self.header.username_length)?;
        let (domain, _) = self.dce_field(next, self.header.domain_length)?;
        Ok(util::from_utf16_le_string(domain))
    }

    pub fn full_domain(&self) -> Result<String, Error> {
        self.require_decrypted()?;
        let (_, next) = self.dce_field(DCE_USERNAME_OFFSET, self.header.username_length)?;
        let (_, next) = self.dce_field(next, self.header.domain_length)?;
        let (full_domain, _) = self.dce_field(next, self.header.full_domain_length)?;
        Ok(util::from_utf16_le_string(full_domain))
    }

    /// Replaces the stored hash with the cached hash of an empty password.
    pub fn blank(&mut self) -> Result<(), Error> {
        let username = self.username()?.to_lowercase();
        let mut input = crypto::md4(&util::to_utf16_le_bytes("")).to_vec();
        input.extend_from_slice(&util::to_utf16_le_bytes(&username));
        let blank_hash = crypto::md4(&input);
        util::slice_at(&self.dce, 0, DCE_HASH_SIZE)?;
        self.dce[..DCE_HASH_SIZE].copy_from_slice(&blank_hash);
        self.modified = true;
        debug!("cached_credential: blanked {} ({})", self.name, username);
        Ok(())
    }

    /// The tag and DCE as stored, to be written over the original record. A blanked record must
    /// go through `encrypt` first.
    pub fn to_patch(&self) -> Result<Patch, Error> {
        if self.modified || (self.decrypted && self.is_encrypted()) {
            return Err(Error::format(format!("{} must be encrypted before write-back", self.name)));
        }
        let mut bytes = self.header.tag.to_vec();
        bytes.extend_from_slice(&self.dce);
        Ok(Patch::new(self.file_offset + TAG_OFFSET as u64, bytes))
    }
}

#[derive(Debug, Default)]
pub struct CachedCredentials {
    pub records: Vec<CachedCredentialRecord>,
    pub logs: Logs,
}

/// Reads and decrypts `\Cache\NL$1`, `NL$2`, ... until a slot is missing or unused. The `Cache`
/// key and its value list are decoded once; a failure there ends enumeration for the hive. Values
/// and records that fail to decode or verify are logged and skipped.
pub fn read_cached_credentials(security: &Parser, nl_km: &[u8]) -> Result<CachedCredentials, Error> {
    let mut credentials = CachedCredentials::default();
    let cache = match security.key(CACHE_PATH) {
        Ok(cache) => cache,
        Err(e) if e.is_not_found() => {
            debug!("cached_credential: no {} key", CACHE_PATH);
            return Ok(credentials);
        }
        Err(e) => return Err(e),
    };

    let mut slots = Vec::new();
    for offset in cache.value_offsets(security.hive())? {
        match ValueNode::read(security.hive(), offset) {
            Ok(value) => slots.push(value),
            Err(e) if e.is_record_level() => {
                warn!("cached_credential: skipping value at {:#X}: {}", offset, e);
                credentials
                    .logs
                    .add(LogCode::for_error(&e), &format!("skipping value at {:#X}: {}", offset, e));
            }
            Err(e) => return Err(e),
        }
    }

    // Each decoded value backs at most one slot.
    for n in 1..=slots.len() {
        let name = format!("NL${}", n);
        let value = match slots
            .iter()
            .find(|value| value.name_matches(&name, security.options().name_match))
        {
            Some(value) => value,
            None => {
                debug!("cached_credential: no {}; stopping", name);
                break;
            }
        };
        let mut record = match read_record(security, &name, value) {
            Ok(record) => record,
            Err(e) if e.is_record_level() => {
                warn!("cached_credential: skipping {}: {}", name, e);
                credentials.logs.add(LogCode::for_error(&e), &format!("skipping {}: {}", name, e));
                continue;
            }
            Err(e) => return Err(e),
        };
        if record.is_empty() {
            debug!("cached_credential: {} is unused; stopping", name);
            break;
        }
        match record.decrypt(nl_km) {
            Ok(()) => credentials.records.push(record),
            Err(e) if e.is_record_level() => {
                warn!("cached_credential: skipping {}: {}", name, e);
                credentials.logs.add(LogCode::for_error(&e), &format!("skipping {}: {}", name, e));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(credentials)
}

fn read_record<'a>(security: &Parser<'a>, name: &str, value: &ValueNode<'a>) -> Result<CachedCredentialRecord, Error> {
    let data_offset = value
        .data_cell_offset(security.hive())
        .ok_or_else(|| Error::format(format!("{} has no data cell", name)))?;
    CachedCredentialRecord::from_bytes(name, &value.data(security.hive())?, data_offset as u64 + 4)
}
