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

//! LSA key and LSA secrets from the SECURITY hive (pre-Vista key format).

use crate::crypto::{self, DES_BLOCK_SIZE};
use crate::err::Error;
use crate::parser::Parser;
use crate::util;
use std::convert::TryInto;
use tracing::debug;

pub const POL_SECRET_ENCRYPTION_KEY_PATH: &str = "\\Policy\\PolSecretEncryptionKey\\@";
pub const NL_KM: &str = "NL$KM";
const DIGEST_ROUNDS: usize = 1000;
const KEY_SALT: std::ops::Range<usize> = 60..76;
const KEY_ENCRYPTED: std::ops::Range<usize> = 12..60;
const KEY_OFFSET: usize = 28;
const SECRET_HEADER_SIZE: usize = 12;
const SECRET_DATA_OFFSET: usize = 8;
const DES_KEY_WINDOW: usize = 7;

/// Decrypts the LSA key from the `PolSecretEncryptionKey` default value.
pub fn lsa_key_from_value(value: &[u8], boot_key: &[u8; 16]) -> Result<[u8; 16], Error> {
    let salt = util::slice_at(value, KEY_SALT.start, KEY_SALT.len())?;
    let mut parts: Vec<&[u8]> = Vec::with_capacity(DIGEST_ROUNDS + 1);
    parts.push(boot_key);
    parts.extend(std::iter::repeat(salt).take(DIGEST_ROUNDS));
    let rc4_key = crypto::md5(&parts);

    let mut decrypted = util::slice_at(value, 0, KEY_SALT.start)?.to_vec();
    crypto::rc4(&rc4_key, &mut decrypted[KEY_ENCRYPTED])?;
    util::read_array_16(&decrypted, KEY_OFFSET)
}

/// `Ok(None)` when the hive has no `PolSecretEncryptionKey`, as on systems that keep the key in `PolEKList`.
pub fn lsa_key(security: &Parser, boot_key: &[u8; 16]) -> Result<Option<[u8; 16]>, Error> {
    match security.value_data(POL_SECRET_ENCRYPTION_KEY_PATH) {
        Ok(value) => Ok(Some(lsa_key_from_value(&value, boot_key)?)),
        Err(e) if e.is_not_found() => {
            debug!("lsa_key: {} is absent", POL_SECRET_ENCRYPTION_KEY_PATH);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Walks the LSA key in 7-byte windows, one per 8-byte block. A window that would run past the end
/// of the key restarts at the number of bytes that were left.
fn des_key_schedule(lsa_key: &[u8], blocks: usize) -> Result<Vec<[u8; 8]>, Error> {
    let mut keys = Vec::with_capacity(blocks);
    let mut j = 0;
    for _ in 0..blocks {
        let window: [u8; 7] = util::slice_at(lsa_key, j, DES_KEY_WINDOW)?.try_into()?;
        keys.push(crypto::des_key_with_parity(&window));
        j += DES_KEY_WINDOW;
        let remaining = lsa_key.len().saturating_sub(j);
        if remaining < DES_KEY_WINDOW {
            j = remaining;
        }
    }
    Ok(keys)
}

/// Decrypts an LSA secret blob. Only whole 8-byte blocks are decrypted; the plaintext starts with
/// a little-endian length and the secret follows at offset 8.
pub fn decrypt_secret(ciphertext: &[u8], lsa_key: &[u8; 16]) -> Result<Vec<u8>, Error> {
    let blocks: Vec<&[u8]> = ciphertext.chunks_exact(DES_BLOCK_SIZE).collect();
    let keys = des_key_schedule(lsa_key, blocks.len())?;
    let mut plaintext = Vec::with_capacity(blocks.len() * DES_BLOCK_SIZE);
    for (block, key) in blocks.iter().zip(keys.iter()) {
        plaintext.extend_from_slice(&crypto::des_decrypt_block(key, block)?);
    }
    let len = util::read_u32(&plaintext, 0)? as usize;
    Ok(util::slice_at(&plaintext, SECRET_DATA_OFFSET, len)?.to_vec())
}

#[cfg(test)]
pub(crate) fn encrypt_secret(secret: &[u8], lsa_key: &[u8; 16]) -> Vec<u8> {
    let mut plaintext = (secret.len() as u32).to_le_bytes().to_vec();
    plaintext.extend_from_slice(&[1, 0, 0, 0]);
    plaintext.extend_from_slice(secret);
    while plaintext.len() % DES_BLOCK_SIZE != 0 {
        plaintext.push(0);
    }
    let keys = des_key_schedule(lsa_key, plaintext.len() / DES_BLOCK_SIZE).unwrap();
    plaintext
        .chunks_exact(DES_BLOCK_SIZE)
        .zip(keys.iter())
        .flat_map(|(block, key)| crypto::des_encrypt_block(key, block).unwrap())
        .collect()
}

/// Reads and decrypts `\Policy\Secrets\<name>\CurrVal`.
pub fn lsa_secret(security: &Parser, lsa_key: &[u8; 16], name: &str) -> Result<Vec<u8>, Error> {
    let value = security.value_data(&format!("\\Policy\\Secrets\\{}\\CurrVal\\@", name))?;
    let ciphertext = value.get(SECRET_HEADER_SIZE..).ok_or_else(|| {
        Error::format(format!("secret {} is only {} bytes", name, value.len()))
    })?;
    let secret = decrypt_secret(ciphertext, lsa_key)?;
    debug!("lsa_secret: {} is {} bytes", name, secret.len());
    Ok(secret)
}

/// The domain cached credential key. `Ok(None)` when the secret is not stored.
pub fn nl_km(security: &Parser, lsa_key: &[u8; 16]) -> Result<Option<Vec<u8>>, Error> {
    match lsa_secret(security, lsa_key, NL_KM) {
        Ok(secret) => Ok(Some(secret)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
