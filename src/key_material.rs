use crate::err::Error;
use crate::log::{LogCode, Logs};
use crate::lsa;
use crate::parser::Parser;
use crate::syskey;
use tracing::{debug, warn};

/// Keys derived from the hives, each present or absent. A key is only derived when the key it
/// depends on is present.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyMaterial {
    pub boot_key: Option<[u8; 16]>,
    pub hashed_boot_key: Option<[u8; 16]>,
    pub lsa_key: Option<[u8; 16]>,
    pub nl_km: Option<Vec<u8>>,
    pub logs: Logs,
}

impl KeyMaterial {
    pub fn from_system(system: &Parser) -> Result<Self, Error> {
        let mut key_material = KeyMaterial::default();
        key_material.boot_key = key_material.absent_on_record_error("boot key", syskey::boot_key(system))?.flatten();
        if key_material.boot_key.is_none() {
            key_material.logs.add(LogCode::WarningKeyAbsent, &"SYSTEM: syskey is not enabled");
        }
        Ok(key_material)
    }

    /// Derives the hashed boot key from the SAM hive.
    pub fn with_sam(mut self, sam: &Parser) -> Result<Self, Error> {
        if let Some(boot_key) = self.boot_key {
            let derived = syskey::hashed_boot_key(sam, &boot_key);
            self.hashed_boot_key = self.absent_on_record_error("hashed boot key", derived)?;
        }
        Ok(self)
    }

    /// Derives the LSA key and the NL$KM secret from the SECURITY hive.
    pub fn with_security(mut self, security: &Parser) -> Result<Self, Error> {
        if let Some(boot_key) = self.boot_key {
            let derived = lsa::lsa_key(security, &boot_key);
            self.lsa_key = self.absent_on_record_error("LSA key", derived)?.flatten();
            if self.lsa_key.is_none() {
                self.logs.add(
                    LogCode::WarningKeyAbsent,
                    &"SECURITY: no PolSecretEncryptionKey (newer LSA key formats are not supported)",
                );
            }
        }
        if let Some(lsa_key) = self.lsa_key {
            let derived = lsa::nl_km(security, &lsa_key);
            self.nl_km = self.absent_on_record_error("NL$KM", derived)?.flatten();
            if self.nl_km.is_none() {
                self.logs.add(LogCode::WarningKeyAbsent, &"SECURITY: NL$KM secret is not present");
            }
        }
        Ok(self)
    }

    /// Record-level failures leave the key absent and are logged; anything else aborts.
    fn absent_on_record_error<T>(&mut self, what: &str, derived: Result<T, Error>) -> Result<Option<T>, Error> {
        match derived {
            Ok(key) => {
                debug!("key_material: {} derived", what);
                Ok(Some(key))
            }
            Err(e) if e.is_record_level() => {
                warn!("key_material: {} unavailable: {}", what, e);
                self.logs.add(LogCode::for_error(&e), &format!("{}: {}", what, e));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
