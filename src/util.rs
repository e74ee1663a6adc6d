use crate::err::Error;
use chrono::{DateTime, TimeZone, Utc};
use std::char::REPLACEMENT_CHARACTER;
use std::convert::TryInto;
use std::fmt::Write as FmtWrite;
use std::mem;

const SIZE_OF_UTF16_CHAR: usize = mem::size_of::<u16>();

/// Reads a UTF-16LE string, stopping at the first null if one is present.
pub(crate) fn from_utf16_le_string(slice: &[u8]) -> String {
    let iter = slice
        .chunks_exact(SIZE_OF_UTF16_CHAR)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    std::char::decode_utf16(iter)
        .map(|r| r.unwrap_or(REPLACEMENT_CHARACTER))
        .take_while(|c| c != &'\0')
        .collect()
}

/// Converts a slice of (possibly extended) ascii bytes into a String. Bytes above 0x7F map onto the matching Latin-1 code point.
pub(crate) fn from_ascii(slice: &[u8]) -> String {
    slice.iter().map(|b| *b as char).collect()
}

pub(crate) fn string_from_bytes(is_ascii: bool, slice: &[u8]) -> String {
    if is_ascii {
        from_ascii(slice)
    } else {
        from_utf16_le_string(slice)
    }
}

pub(crate) fn to_utf16_le_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Converts a u64 filetime to a DateTime<Utc>
pub fn get_date_time_from_filetime(filetime: u64) -> Option<DateTime<Utc>> {
    const UNIX_EPOCH_SECONDS_SINCE_WINDOWS_EPOCH: i64 = 11_644_473_600;
    const HUNDRED_NANOS_PER_SECOND: u64 = 10_000_000;
    let seconds = (filetime / HUNDRED_NANOS_PER_SECOND) as i64 - UNIX_EPOCH_SECONDS_SINCE_WINDOWS_EPOCH;
    let nanos = (filetime % HUNDRED_NANOS_PER_SECOND) as u32 * 100;
    Utc.timestamp_opt(seconds, nanos).single()
}

/// Lowercase, unseparated hex as used by the pwdump and mscash formats.
pub fn to_hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String cannot fail
        let _ = write!(s, "{:02x}", byte);
    }
    s
}

pub(crate) fn slice_at(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], Error> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or_else(|| {
            Error::format(format!(
                "read of {} bytes at {:#X} is outside a buffer of {:#X} bytes",
                len,
                offset,
                bytes.len()
            ))
        })
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, Error> {
    Ok(u16::from_le_bytes(slice_at(bytes, offset, 2)?.try_into()?))
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, Error> {
    Ok(u32::from_le_bytes(slice_at(bytes, offset, 4)?.try_into()?))
}

pub(crate) fn read_array_16(bytes: &[u8], offset: usize) -> Result<[u8; 16], Error> {
    Ok(slice_at(bytes, offset, 16)?.try_into()?)
}
