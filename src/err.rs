use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("An I/O error has occurred: {}", source)]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("Invalid hive structure: {}", detail)]
    Format { detail: String },
    #[error("Key or value not found: {}", path)]
    KeyNotFound { path: String },
    #[error("Unsupported record version: {:#010X}", version)]
    UnsupportedVersion { version: u32 },
    #[error("Integrity check failed: {}", detail)]
    Integrity { detail: String },
    #[error("Cryptographic primitive unavailable: {}", detail)]
    CryptoUnavailable { detail: String },
}

impl Error {
    pub(crate) fn format<T: ToString>(detail: T) -> Self {
        Error::Format {
            detail: detail.to_string(),
        }
    }

    pub(crate) fn key_not_found<T: ToString>(path: T) -> Self {
        Error::KeyNotFound {
            path: path.to_string(),
        }
    }

    pub(crate) fn integrity<T: ToString>(detail: T) -> Self {
        Error::Integrity {
            detail: detail.to_string(),
        }
    }

    pub(crate) fn crypto_unavailable<T: ToString>(detail: T) -> Self {
        Error::CryptoUnavailable {
            detail: detail.to_string(),
        }
    }

    /// True for errors that mean "this key or value is not present in this hive".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound { .. })
    }

    /// True for errors that should not abort enumeration of the remaining records.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            Error::Format { .. }
                | Error::KeyNotFound { .. }
                | Error::UnsupportedVersion { .. }
                | Error::Integrity { .. }
        )
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(error: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match error {
            nom::Err::Incomplete(needed) => Error::format(format!("truncated cell: {:?}", needed)),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::format(format!("{:?} at {} remaining bytes", e.code, e.input.len()))
            }
        }
    }
}

impl From<std::array::TryFromSliceError> for Error {
    fn from(error: std::array::TryFromSliceError) -> Self {
        Error::format(error)
    }
}
