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

//! Thin wrappers over the RustCrypto primitives the credential stores are built from.

use crate::err::Error;
use des::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use des::Des;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::{Digest, Md5};
use rc4::{consts::U16, Rc4, StreamCipher};

type HmacMd5 = Hmac<Md5>;

pub const DES_BLOCK_SIZE: usize = 8;

/// MD5 over the concatenation of `parts`.
pub fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn md4(data: &[u8]) -> [u8; 16] {
    Md4::digest(data).into()
}

pub fn hmac_md5(key: &[u8], data: &[u8]) -> Result<[u8; 16], Error> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key)
        .map_err(|e| Error::crypto_unavailable(format!("HMAC-MD5: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Checks `tag` against HMAC-MD5(key, data) in constant time.
pub fn hmac_md5_verify(key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), Error> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key)
        .map_err(|e| Error::crypto_unavailable(format!("HMAC-MD5: {}", e)))?;
    mac.update(data);
    mac.verify_slice(tag)
        .map_err(|_| Error::integrity("HMAC-MD5 tag does not match the data"))
}

/// RC4 with a 128-bit key, in place. Encrypting and decrypting are the same operation.
pub fn rc4(key: &[u8; 16], data: &mut [u8]) -> Result<(), Error> {
    let mut cipher = Rc4::<U16>::new_from_slice(key)
        .map_err(|e| Error::crypto_unavailable(format!("RC4: {}", e)))?;
    cipher.apply_keystream(data);
    Ok(())
}

/// Spreads 56 key bits over 8 bytes and sets each byte's low bit for odd parity.
pub fn des_key_with_parity(key: &[u8; 7]) -> [u8; 8] {
    let spread = [
        key[0] >> 1,
        ((key[0] & 0x01) << 6) | (key[1] >> 2),
        ((key[1] & 0x03) << 5) | (key[2] >> 3),
        ((key[2] & 0x07) << 4) | (key[3] >> 4),
        ((key[3] & 0x0F) << 3) | (key[4] >> 5),
        ((key[4] & 0x1F) << 2) | (key[5] >> 6),
        ((key[5] & 0x3F) << 1) | (key[6] >> 7),
        key[6] & 0x7F,
    ];
    let mut out = [0u8; 8];
    for (dst, b) in out.iter_mut().zip(spread.iter()) {
        let shifted = (b << 1) & 0xFE;
        *dst = if shifted.count_ones() % 2 == 0 {
            shifted | 1
        } else {
            shifted
        };
    }
    out
}

/// The two DES keys that protect a SAM hash, derived from the account RID.
pub fn rid_to_des_keys(rid: u32) -> ([u8; 8], [u8; 8]) {
    let s = rid.to_le_bytes();
    let key1 = [s[0], s[1], s[2], s[3], s[0], s[1], s[2]];
    let key2 = [s[3], s[0], s[1], s[2], s[3], s[0], s[1]];
    (des_key_with_parity(&key1), des_key_with_parity(&key2))
}

fn des_cipher(key: &[u8; 8]) -> Result<Des, Error> {
    Des::new_from_slice(key).map_err(|e| Error::crypto_unavailable(format!("DES: {}", e)))
}

/// DES-ECB decryption of one 8-byte block.
pub fn des_decrypt_block(key: &[u8; 8], block: &[u8]) -> Result<[u8; 8], Error> {
    if block.len() != DES_BLOCK_SIZE {
        return Err(Error::format(format!("DES block of {} bytes", block.len())));
    }
    let cipher = des_cipher(key)?;
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buf);
    Ok(buf.into())
}

pub fn des_encrypt_block(key: &[u8; 8], block: &[u8]) -> Result<[u8; 8], Error> {
    if block.len() != DES_BLOCK_SIZE {
        return Err(Error::format(format!("DES block of {} bytes", block.len())));
    }
    let cipher = des_cipher(key)?;
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    Ok(buf.into())
}

#[cfg(test)]
pub(crate) fn from_hex(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::to_hex_string;

    #[test]
    fn test_digests() {
        assert_eq!("d41d8cd98f00b204e9800998ecf8427e", to_hex_string(&md5(&[])));
        assert_eq!(
            md5(&[b"The quick brown fox ", b"jumps over the lazy dog"]),
            md5(&[b"The quick brown fox jumps over the lazy dog"]),
            "Parts are concatenated"
        );
        assert_eq!("31d6cfe0d16ae931b73c59d7e0c089c0", to_hex_string(&md4(&[])), "MD4 of the empty password");
        assert_eq!("a448017aaf21d8525fc10ae87aa6729d", to_hex_string(&md4(b"abc")));
    }

    #[test]
    fn test_hmac_md5() {
        // RFC 2104 test case 2
        let tag = hmac_md5(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!("750c783e6ab0b503eaa86e310a5db738", to_hex_string(&tag));
        assert!(hmac_md5_verify(b"Jefe", b"what do ya want for nothing?", &tag).is_ok());

        let mut flipped = tag;
        flipped[15] ^= 0x01;
        let err = hmac_md5_verify(b"Jefe", b"what do ya want for nothing?", &flipped).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn test_rc4_is_symmetric() {
        let key = [0x42u8; 16];
        let plain = b"NTPASSWORD\0 plaintext".to_vec();
        let mut data = plain.clone();
        rc4(&key, &mut data).unwrap();
        assert_ne!(plain, data);
        rc4(&key, &mut data).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn test_rid_to_des_keys() {
        let (key1, key2) = rid_to_des_keys(500);
        assert_eq!("f40140010ea10401", to_hex_string(&key1));
        assert_eq!("017a01200107d002", to_hex_string(&key2));
        assert!(key1.iter().chain(key2.iter()).all(|b| b.count_ones() % 2 == 1), "Odd parity");
    }

    #[test]
    fn test_des_known_answer() {
        let (key1, key2) = rid_to_des_keys(500);
        let cipher = from_hex("a291d14b768a6ac455a0ab9d376d8551");
        let mut plain = des_decrypt_block(&key1, &cipher[..8]).unwrap().to_vec();
        plain.extend_from_slice(&des_decrypt_block(&key2, &cipher[8..]).unwrap());
        assert_eq!("32ed87bdb5fdc5e9cba88547376818d4", to_hex_string(&plain));

        assert_eq!(
            &cipher[..8],
            &des_encrypt_block(&key1, &plain[..8]).unwrap()[..],
            "Encrypt inverts decrypt"
        );
        assert!(des_decrypt_block(&key1, &cipher[..7]).is_err());
    }
}
