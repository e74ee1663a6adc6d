//! Boot key recovery from the SYSTEM hive and the hashed boot key from the SAM hive.

use crate::crypto;
use crate::err::Error;
use crate::parser::Parser;
use crate::util;
use tracing::debug;

/// Byte positions of the class name material that make up the boot key.
pub const BOOT_KEY_PERMUTATION: [usize; 16] = [
    0x08, 0x05, 0x04, 0x02, 0x0B, 0x09, 0x0D, 0x03, 0x00, 0x06, 0x01, 0x0C, 0x0E, 0x0A, 0x0F, 0x07,
];

/// Lsa sub keys whose class names hold the scrambled boot key, in order.
pub const LSA_KEY_NAMES: [&str; 4] = ["JD", "Skew1", "GBG", "Data"];

pub const ACCOUNT_F_PATH: &str = "\\SAM\\Domains\\Account\\F";
const QWERTY: &[u8] = b"!@#$%^&*()qwertyUIOPAzxcvbnmQQQQQQQQQQQQ)(*@&%\0";
const DIGITS: &[u8] = b"0123456789012345678901234567890123456789\0";
const F_KEY_REVISION_OFFSET: usize = 0x68;
const F_SALT: std::ops::Range<usize> = 0x70..0x80;
const F_ENCRYPTED_KEY: std::ops::Range<usize> = 0x80..0xA0;
const F_KEY_REVISION_RC4: u32 = 1;

pub fn descramble_boot_key(unsorted: &[u8; 16]) -> [u8; 16] {
    let mut boot_key = [0u8; 16];
    for (dst, &position) in boot_key.iter_mut().zip(BOOT_KEY_PERMUTATION.iter()) {
        *dst = unsorted[position];
    }
    boot_key
}

/// The class name is eight hex digits stored as UTF-16LE text; every two digits are one key byte.
pub fn decode_class_name(class_name: &str) -> Result<[u8; 4], Error> {
    let digits: Vec<char> = class_name.chars().collect();
    if digits.len() != 8 {
        return Err(Error::format(format!(
            "boot key class name {:?} is not eight hex digits",
            class_name
        )));
    }
    let mut fragment = [0u8; 4];
    for (dst, pair) in fragment.iter_mut().zip(digits.chunks(2)) {
        let pair: String = pair.iter().collect();
        *dst = u8::from_str_radix(&pair, 16).map_err(|e| {
            Error::format(format!("boot key class name {:?}: {}", class_name, e))
        })?;
    }
    Ok(fragment)
}

/// The control set the machine boots, from `\Select\Default`, falling back to `\Select\Current`.
pub fn control_set(system: &Parser) -> Result<u32, Error> {
    match system.value("\\Select\\Default") {
        Ok(value) => value.data_u32(system.hive()),
        Err(e) if e.is_not_found() => system.value("\\Select\\Current")?.data_u32(system.hive()),
        Err(e) => Err(e),
    }
}

/// Recovers the boot key. `Ok(None)` means syskey material is absent from this hive.
pub fn boot_key(system: &Parser) -> Result<Option<[u8; 16]>, Error> {
    let control_set = match control_set(system) {
        Ok(control_set) => control_set,
        Err(e) if e.is_not_found() => {
            debug!("boot_key: no control set selected");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let lsa_path = format!("\\ControlSet{:03}\\Control\\Lsa", control_set);
    debug!("boot_key: using {}", lsa_path);

    let mut unsorted = [0u8; 16];
    for (chunk, name) in unsorted.chunks_mut(4).zip(LSA_KEY_NAMES.iter()) {
        let key = match system.key(&format!("{}\\{}", lsa_path, name)) {
            Ok(key) => key,
            Err(e) if e.is_not_found() => {
                debug!("boot_key: {}\\{} is absent", lsa_path, name);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let class_name = match key.class_name(system.hive())? {
            Some(class_name) => class_name,
            None => {
                debug!("boot_key: {}\\{} has no class name", lsa_path, name);
                return Ok(None);
            }
        };
        chunk.copy_from_slice(&decode_class_name(&class_name)?);
    }
    Ok(Some(descramble_boot_key(&unsorted)))
}

/// Decrypts the hashed boot key held in the account domain's `F` value.
pub fn hashed_boot_key_from_f(f: &[u8], boot_key: &[u8; 16]) -> Result<[u8; 16], Error> {
    let revision = util::read_u32(f, F_KEY_REVISION_OFFSET)?;
    if revision != F_KEY_REVISION_RC4 {
        return Err(Error::UnsupportedVersion { version: revision });
    }
    let salt = util::slice_at(f, F_SALT.start, F_SALT.len())?;
    let rc4_key = crypto::md5(&[salt, QWERTY, boot_key, DIGITS]);
    let mut key = util::slice_at(f, F_ENCRYPTED_KEY.start, F_ENCRYPTED_KEY.len())?.to_vec();
    crypto::rc4(&rc4_key, &mut key)?;
    util::read_array_16(&key, 0)
}

pub fn hashed_boot_key(sam: &Parser, boot_key: &[u8; 16]) -> Result<[u8; 16], Error> {
    let f = sam.value_data(ACCOUNT_F_PATH)?;
    debug!("hashed_boot_key: F value is {} bytes", f.len());
    hashed_boot_key_from_f(&f, boot_key)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::from_hex;
    use crate::hive::HiveImage;
    use crate::test_hive::{HiveBuilder, TestKey, TestValue};
    use crate::util::to_hex_string;

    pub(crate) const CLASS_NAMES: [&str; 4] = ["5d5991a3", "486c0596", "5af83341", "3f2cceb9"];
    pub(crate) const BOOT_KEY: &str = "5a6c489141f82ca35d05593fce33b996";
    pub(crate) const F_VALUE: &str = "02000100000000008922ABD40ABBD00102000000000000000080A60AFFDEFFFF0000000000000000000000000000008000CC1DCFFBFFFFFF00CC1DCFFBFFFFFF0000000000000000EA03000000000000000000000000000001000000030000000100000000000100010000003800000070A7884DA3FA7F816CBD324E7AC3996F97700B19AB0FA48F3F5FED8ED046C6800D46426B8A38966C5E0963469F6DB0930000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000100000038000000DD4EFAEE9909FAC10C3184FD2E5BCFCEDE87D82F0DAEA73417E2850654CD9C7ED3AFF93CB2010B59DA9B8D1FEC3FBC140000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000300000000000000";
    pub(crate) const HASHED_BOOT_KEY: &str = "afe7e35df020b79484a1c49440f90f18";

    /// A SYSTEM hive whose Lsa class names hold `class_names`.
    pub(crate) fn system_key(class_names: &[&str]) -> TestKey {
        let mut lsa = TestKey::new("Lsa");
        for (name, class_name) in LSA_KEY_NAMES.iter().zip(class_names.iter()) {
            lsa = lsa.sub_key(TestKey::new(name).class_name(class_name));
        }
        TestKey::new("ROOT")
            .sub_key(TestKey::new("ControlSet001").sub_key(TestKey::new("Control").sub_key(lsa)))
            .sub_key(
                TestKey::new("Select")
                    .value(TestValue::dword("Current", 1))
                    .value(TestValue::dword("Default", 1)),
            )
    }

    #[test]
    fn test_descramble_boot_key() {
        let mut unsorted = [0u8; 16];
        for (i, b) in unsorted.iter_mut().enumerate() {
            *b = i as u8;
        }
        assert_eq!(
            "080504020b090d030006010c0e0a0f07",
            to_hex_string(&descramble_boot_key(&unsorted))
        );
    }

    #[test]
    fn test_decode_class_name() {
        assert_eq!([0x5d, 0x59, 0x91, 0xa3], decode_class_name("5d5991a3").unwrap());
        assert_eq!([0x3f, 0x2c, 0xce, 0xb9], decode_class_name("3F2CCEB9").unwrap());
        assert!(decode_class_name("5d5991").is_err());
        assert!(decode_class_name("5d59zz a").is_err());
    }

    #[test]
    fn test_boot_key_from_system_hive() {
        let hive = HiveImage::from_bytes(HiveBuilder::new(system_key(&CLASS_NAMES)).build()).unwrap();
        let parser = Parser::new(&hive);
        assert_eq!(1, control_set(&parser).unwrap());
        assert_eq!(BOOT_KEY, to_hex_string(&boot_key(&parser).unwrap().unwrap()));
    }

    #[test]
    fn test_boot_key_absent() {
        let hive = HiveImage::from_bytes(HiveBuilder::new(system_key(&CLASS_NAMES[..3])).build()).unwrap();
        assert_eq!(None, boot_key(&Parser::new(&hive)).unwrap(), "No Data key means no syskey");

        let hive = HiveImage::from_bytes(HiveBuilder::new(TestKey::new("ROOT")).build()).unwrap();
        assert_eq!(None, boot_key(&Parser::new(&hive)).unwrap(), "No Select key");
    }

    #[test]
    fn test_hashed_boot_key() {
        let f = from_hex(F_VALUE);
        let mut boot_key = [0u8; 16];
        boot_key.copy_from_slice(&from_hex(BOOT_KEY));
        assert_eq!(HASHED_BOOT_KEY, to_hex_string(&hashed_boot_key_from_f(&f, &boot_key).unwrap()));

        let mut aes = f.clone();
        aes[F_KEY_REVISION_OFFSET] = 2;
        assert!(matches!(
            hashed_boot_key_from_f(&aes, &boot_key),
            Err(Error::UnsupportedVersion { version: 2 })
        ));
        assert!(matches!(hashed_boot_key_from_f(&f[..0x90], &boot_key), Err(Error::Format { .. })));

        let sam = HiveImage::from_bytes(
            HiveBuilder::new(
                TestKey::new("ROOT").path(&["SAM", "Domains"], TestKey::new("Account").value(TestValue::binary("F", f))),
            )
            .build(),
        )
        .unwrap();
        assert_eq!(
            HASHED_BOOT_KEY,
            to_hex_string(&hashed_boot_key(&Parser::new(&sam), &boot_key).unwrap())
        );
    }
}
