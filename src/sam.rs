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

//! Local account password hashes from the SAM hive's `V` values.

use crate::cell_key_value::{ValueNode, INLINE_RID_SENTINEL};
use crate::crypto;
use crate::err::Error;
use crate::log::{LogCode, Logs};
use crate::parser::Parser;
use crate::patch::Patch;
use crate::reg_path::DEFAULT_VALUE_NAME;
use crate::util;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const ACCOUNT_USERS_PATH: &str = "\\SAM\\Domains\\Account\\Users";
pub const NAMES_PATH: &str = "\\SAM\\Domains\\Account\\Users\\Names";

pub const EMPTY_LM_HASH: &str = "aad3b435b51404eeaad3b435b51404ee";
pub const EMPTY_NT_HASH: &str = "31d6cfe0d16ae931b73c59d7e0c089c0";

/// Offset and length slots are relative to the end of the V header.
const V_HEADER_SIZE: usize = 0xCC;
const V_USERNAME_OFFSET: usize = 0x0C;
const V_USERNAME_LENGTH: usize = 0x10;
const V_LM_HASH_OFFSET: usize = 0x9C;
const V_LM_HASH_LENGTH: usize = 0xA0;
const V_NT_HASH_OFFSET: usize = 0xA8;
const V_NT_HASH_LENGTH: usize = 0xAC;

const HASH_SIZE: usize = 16;
/// A 4-byte header followed by the RC4 encrypted hash.
const SYSKEY_HASH_SIZE: usize = 20;
const SYSKEY_HASH_HEADER: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashKind {
    Lm,
    Nt,
}

impl HashKind {
    fn magic(self) -> &'static [u8] {
        match self {
            HashKind::Lm => b"LMPASSWORD\0",
            HashKind::Nt => b"NTPASSWORD\0",
        }
    }

    fn length_slot(self) -> usize {
        match self {
            HashKind::Lm => V_LM_HASH_LENGTH,
            HashKind::Nt => V_NT_HASH_LENGTH,
        }
    }
}

/// Decrypts one stored hash. `Ok(None)` when no hash is stored.
pub fn decrypt_hash(
    stored: &[u8],
    hashed_boot_key: &[u8; 16],
    rid: u32,
    kind: HashKind,
) -> Result<Option<[u8; 16]>, Error> {
    let mut obfuscated = match stored.len() {
        SYSKEY_HASH_SIZE => {
            let rc4_key = crypto::md5(&[&hashed_boot_key[..], &rid.to_le_bytes(), kind.magic()]);
            let mut hash = stored[SYSKEY_HASH_HEADER..].to_vec();
            crypto::rc4(&rc4_key, &mut hash)?;
            hash
        }
        HASH_SIZE => stored.to_vec(),
        len if len < HASH_SIZE => return Ok(None),
        _ => {
            return Err(Error::UnsupportedVersion {
                version: u32::from(util::read_u16(stored, 2)?),
            })
        }
    };
    let (key1, key2) = crypto::rid_to_des_keys(rid);
    let mut hash = [0u8; 16];
    hash[..8].copy_from_slice(&crypto::des_decrypt_block(&key1, &obfuscated[..8])?);
    hash[8..].copy_from_slice(&crypto::des_decrypt_block(&key2, &obfuscated[8..16])?);
    obfuscated.iter_mut().for_each(|b| *b = 0);
    Ok(Some(hash))
}

/// A decrypted local account and the file offsets of its hash length fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountHashRecord {
    pub username: String,
    pub rid: u32,
    pub lm_hash: Option<[u8; 16]>,
    pub nt_hash: Option<[u8; 16]>,
    pub lm_length_offset: u64,
    pub nt_length_offset: u64,
}

impl AccountHashRecord {
    /// Decodes a `V` value. `v_file_offset` is the absolute file offset of the value's first data byte.
    /// An empty `username` falls back to the name stored in the value.
    pub fn from_v(
        v: &[u8],
        v_file_offset: u64,
        username: &str,
        rid: u32,
        hashed_boot_key: &[u8; 16],
    ) -> Result<Self, Error> {
        if v.len() < V_HEADER_SIZE {
            return Err(Error::format(format!("V value for RID {} is only {} bytes", rid, v.len())));
        }
        let username = if username.is_empty() {
            util::from_utf16_le_string(v_field(v, V_USERNAME_OFFSET, V_USERNAME_LENGTH)?)
        } else {
            username.to_string()
        };
        let lm_hash = decrypt_hash(v_field(v, V_LM_HASH_OFFSET, V_LM_HASH_LENGTH)?, hashed_boot_key, rid, HashKind::Lm)?;
        let nt_hash = decrypt_hash(v_field(v, V_NT_HASH_OFFSET, V_NT_HASH_LENGTH)?, hashed_boot_key, rid, HashKind::Nt)?;
        Ok(AccountHashRecord {
            username,
            rid,
            lm_hash,
            nt_hash,
            lm_length_offset: v_file_offset + HashKind::Lm.length_slot() as u64,
            nt_length_offset: v_file_offset + HashKind::Nt.length_slot() as u64,
        })
    }

    pub fn lm_hash_string(&self) -> String {
        self.lm_hash
            .map(|hash| util::to_hex_string(&hash))
            .unwrap_or_else(|| EMPTY_LM_HASH.to_string())
    }

    pub fn nt_hash_string(&self) -> String {
        self.nt_hash
            .map(|hash| util::to_hex_string(&hash))
            .unwrap_or_else(|| EMPTY_NT_HASH.to_string())
    }

    /// True when neither hash is stored.
    pub fn is_blank(&self) -> bool {
        self.lm_hash.is_none() && self.nt_hash.is_none()
    }

    /// Zeroes both stored hash lengths, which leaves the account without a password.
    pub fn blank_patches(&self) -> Vec<Patch> {
        vec![
            Patch::new(self.lm_length_offset, vec![0; 4]),
            Patch::new(self.nt_length_offset, vec![0; 4]),
        ]
    }
}

fn v_field(v: &[u8], offset_slot: usize, length_slot: usize) -> Result<&[u8], Error> {
    let offset = util::read_u32(v, offset_slot)? as usize;
    let length = util::read_u32(v, length_slot)? as usize;
    if length == 0 {
        return Ok(&[]);
    }
    let start = V_HEADER_SIZE
        .checked_add(offset)
        .ok_or_else(|| Error::format(format!("V field offset {:#X} overflows", offset)))?;
    util::slice_at(v, start, length)
}

/// The RID stored in the type field of a `Names\<user>` default value.
pub fn rid_from_marker(value: &ValueNode) -> Option<u32> {
    if value.data_size_raw == INLINE_RID_SENTINEL {
        Some(value.data_type_raw)
    } else {
        None
    }
}

#[derive(Debug, Default)]
pub struct LocalAccounts {
    pub records: Vec<AccountHashRecord>,
    pub logs: Logs,
}

/// Reads every local account. Accounts that cannot be decoded are logged and skipped.
pub fn read_local_accounts(sam: &Parser, hashed_boot_key: &[u8; 16]) -> Result<LocalAccounts, Error> {
    let mut accounts = LocalAccounts::default();
    let names = match sam.key(NAMES_PATH) {
        Ok(names) => names,
        Err(e) if e.is_record_level() => {
            warn!("sam: {}: {}", NAMES_PATH, e);
            accounts.logs.add(LogCode::for_error(&e), &format!("{}: {}", NAMES_PATH, e));
            return Ok(accounts);
        }
        Err(e) => return Err(e),
    };

    let mut seen = HashSet::new();
    for name_key in sam.sub_keys(&names)? {
        let username = name_key.key_name();
        let rid = match sam
            .resolve_from(name_key.absolute_file_offset, DEFAULT_VALUE_NAME, true)
            .and_then(|offset| ValueNode::read(sam.hive(), offset))
        {
            Ok(value) => rid_from_marker(&value),
            Err(e) if e.is_record_level() => None,
            Err(e) => return Err(e),
        };
        let rid = match rid {
            Some(rid) => rid,
            None => {
                accounts.logs.add(
                    LogCode::WarningSkipped,
                    &format!("sam: {} has no RID marker", username),
                );
                continue;
            }
        };
        seen.insert(rid);
        record_or_log(&mut accounts, read_account(sam, &username, rid, hashed_boot_key))?;
    }

    // Accounts with a V value but no usable Names entry keep the name stored in V.
    let users = sam.key(ACCOUNT_USERS_PATH)?;
    for user_key in sam.sub_keys(&users)? {
        let rid = match u32::from_str_radix(&user_key.key_name(), 16) {
            Ok(rid) => rid,
            Err(_) => continue,
        };
        if seen.insert(rid) {
            debug!("sam: RID {} is not listed under Names", rid);
            record_or_log(&mut accounts, read_account(sam, "", rid, hashed_boot_key))?;
        }
    }
    Ok(accounts)
}

fn record_or_log(accounts: &mut LocalAccounts, record: Result<AccountHashRecord, Error>) -> Result<(), Error> {
    match record {
        Ok(record) => {
            debug!("sam: decrypted {} (RID {})", record.username, record.rid);
            accounts.records.push(record);
            Ok(())
        }
        Err(e) if e.is_record_level() => {
            warn!("sam: skipping account: {}", e);
            accounts.logs.add(LogCode::for_error(&e), &format!("sam: skipping account: {}", e));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn read_account(sam: &Parser, username: &str, rid: u32, hashed_boot_key: &[u8; 16]) -> Result<AccountHashRecord, Error> {
    let v = sam.value(&format!("{}\\{:08X}\\V", ACCOUNT_USERS_PATH, rid))?;
    let data_offset = v
        .data_cell_offset(sam.hive())
        .ok_or_else(|| Error::format(format!("V value for RID {} has no data cell", rid)))?;
    AccountHashRecord::from_v(&v.data(sam.hive())?, data_offset as u64 + 4, username, rid, hashed_boot_key)
}
