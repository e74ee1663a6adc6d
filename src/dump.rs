use crate::cached_credential::CachedCredentialRecord;
use crate::err::Error;
use crate::sam::AccountHashRecord;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// `username:RID:LMhash:NThash:::`
pub fn pwdump_line(record: &AccountHashRecord) -> String {
    format!(
        "{}:{}:{}:{}:::",
        record.username,
        record.rid,
        record.lm_hash_string(),
        record.nt_hash_string()
    )
}

/// `username:hash:domain:fullDomain`. The record must be decrypted.
pub fn mscash_line(record: &CachedCredentialRecord) -> Result<String, Error> {
    Ok(format!(
        "{}:{}:{}:{}",
        record.username()?,
        record.hash_string()?,
        record.domain()?,
        record.full_domain()?
    ))
}

/// Writes dump text to `path`, replacing any existing file.
pub fn write_dump<P: AsRef<Path>>(path: P, dump: &str) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(dump.as_bytes())?;
    writer.flush()?;
    Ok(())
}
