use crate::err::Error;
use crate::patch::Patch;
use crate::util;
use chrono::{DateTime, Utc};
use enum_primitive_derive::Primitive;
use nom::{
    bytes::complete::{tag, take},
    number::complete::{le_u32, le_u64},
    IResult,
};
use serde::Serialize;
use std::convert::TryFrom;
use std::path::{Path, PathBuf};

/// Size of the base block; every stored cell offset is relative to this point.
pub const HIVE_BIN_START: usize = 0x1000;
const HIVE_BIN_HEADER_SIZE: usize = 0x20;
const CHECKSUM_OFFSET: usize = 508;
const INVALID_OFFSET: u32 = 0xFFFF_FFFF;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Primitive, Serialize)]
#[repr(u32)]
pub enum FileType {
    Normal = 0,
    TransactionLog = 1,
    Unknown = 0x0fffffff,
}
crate::impl_enum_from_value! { FileType }

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BaseBlock {
    pub primary_sequence_number: u32,
    pub secondary_sequence_number: u32,
    pub last_modification_date_and_time: Option<DateTime<Utc>>,
    pub major_version: u32,
    pub minor_version: u32,
    pub file_type: FileType,
    pub root_cell_offset_relative: u32,
    pub hive_bins_data_size: u32,
    pub filename: String,
    pub checksum: u32, // XOR-32 checksum of the previous 508 bytes
}

impl BaseBlock {
    /// Uses nom to parse the registry file header.
    pub fn from_bytes(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _signature) = tag("regf")(input)?;
        let (input, primary_sequence_number) = le_u32(input)?;
        let (input, secondary_sequence_number) = le_u32(input)?;
        let (input, last_modification_date_and_time) = le_u64(input)?;
        let (input, major_version) = le_u32(input)?;
        let (input, minor_version) = le_u32(input)?;
        let (input, file_type) = le_u32(input)?;
        let (input, _format) = le_u32(input)?;
        let (input, root_cell_offset_relative) = le_u32(input)?;
        let (input, hive_bins_data_size) = le_u32(input)?;
        let (input, _clustering_factor) = le_u32(input)?;
        let (input, filename_bytes) = take(64usize)(input)?;
        let (input, _unk2) = take(396usize)(input)?;
        let (input, checksum) = le_u32(input)?;

        Ok((
            input,
            BaseBlock {
                primary_sequence_number,
                secondary_sequence_number,
                last_modification_date_and_time: util::get_date_time_from_filetime(
                    last_modification_date_and_time,
                ),
                major_version,
                minor_version,
                file_type: FileType::from_value(file_type),
                root_cell_offset_relative,
                hive_bins_data_size,
                filename: util::from_utf16_le_string(filename_bytes),
                checksum,
            },
        ))
    }

    pub fn calculate_checksum(header: &[u8]) -> u32 {
        header[..CHECKSUM_OFFSET.min(header.len())]
            .chunks_exact(4)
            .fold(0, |acc, dword| {
                acc ^ u32::from_le_bytes([dword[0], dword[1], dword[2], dword[3]])
            })
    }

    /// Dirty hives (unequal sequence numbers) still parse; their pending log entries are not applied.
    pub fn is_dirty(&self) -> bool {
        self.primary_sequence_number != self.secondary_sequence_number
    }
}

/// The whole byte image of one hive file.
#[derive(Debug)]
pub struct HiveImage {
    bytes: Vec<u8>,
    base_block: BaseBlock,
    root_offset: usize,
    path: Option<PathBuf>,
}

impl HiveImage {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut hive = Self::from_bytes(bytes)?;
        tracing::debug!("Loaded hive {} ({} bytes)", path.display(), hive.bytes.len());
        hive.path = Some(path.to_path_buf());
        Ok(hive)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        if bytes.len() < HIVE_BIN_START + HIVE_BIN_HEADER_SIZE {
            return Err(Error::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("short read: {} bytes is smaller than a hive header", bytes.len()),
                ),
            });
        }
        let (_, base_block) = BaseBlock::from_bytes(&bytes)?;
        if BaseBlock::calculate_checksum(&bytes[..HIVE_BIN_START]) != base_block.checksum {
            tracing::warn!("Base block checksum mismatch (stored {:#010X})", base_block.checksum);
        }
        if base_block.is_dirty() {
            tracing::warn!(
                "Hive is dirty (sequence numbers {} and {})",
                base_block.primary_sequence_number,
                base_block.secondary_sequence_number
            );
        }
        let hbin: IResult<&[u8], &[u8]> = tag("hbin")(&bytes[HIVE_BIN_START..]);
        hbin.map_err(|_| Error::format("missing hbin signature at 0x1000"))?;

        let root_offset = HIVE_BIN_START
            .checked_add(usize::try_from(base_block.root_cell_offset_relative).map_err(Error::format)?)
            .ok_or_else(|| Error::format("root cell offset overflows"))?;
        if root_offset >= bytes.len() {
            return Err(Error::format(format!(
                "root cell offset {:#X} is past the end of the file",
                root_offset
            )));
        }
        Ok(HiveImage {
            bytes,
            base_block,
            root_offset,
            path: None,
        })
    }

    pub fn base_block(&self) -> &BaseBlock {
        &self.base_block
    }

    /// Absolute file offset of the root key node cell.
    pub fn root_offset(&self) -> usize {
        self.root_offset
    }

    /// The file this image was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], Error> {
        util::slice_at(&self.bytes, offset, len)
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16, Error> {
        util::read_u16(&self.bytes, offset)
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, Error> {
        util::read_u32(&self.bytes, offset)
    }

    /// Converts a stored (hive-bins relative) offset into an absolute file offset.
    /// Returns `None` for the 0xFFFFFFFF "no cell" marker.
    pub fn cell_offset(&self, relative: u32) -> Option<usize> {
        if relative == INVALID_OFFSET {
            return None;
        }
        HIVE_BIN_START.checked_add(usize::try_from(relative).ok()?)
    }

    /// Returns the cell at `offset`, starting with its 4-byte size field and bounded by that size.
    pub fn cell(&self, offset: usize) -> Result<&[u8], Error> {
        let raw_size = self.read_u32(offset)? as i32;
        let size = raw_size.unsigned_abs() as usize;
        if size < 4 {
            return Err(Error::format(format!("cell at {:#X} has invalid size {}", offset, raw_size)));
        }
        let available = self.bytes.len() - offset;
        self.slice(offset, size.min(available))
    }

    /// Returns the payload of the cell at `offset` (the bytes following its size field).
    pub fn cell_data(&self, offset: usize) -> Result<&[u8], Error> {
        Ok(&self.cell(offset)?[4..])
    }

    /// Mirrors a patch written to disk into this image.
    pub fn apply(&mut self, patch: &Patch) -> Result<(), Error> {
        let start = usize::try_from(patch.offset).map_err(Error::format)?;
        util::slice_at(&self.bytes, start, patch.bytes.len())?;
        self.bytes[start..start + patch.bytes.len()].copy_from_slice(&patch.bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_hive::{HiveBuilder, TestKey};

    #[test]
    fn test_base_block() {
        let bytes = HiveBuilder::new(TestKey::new("ROOT").sub_key(TestKey::new("SAM"))).build();
        let hive = HiveImage::from_bytes(bytes.clone()).unwrap();
        assert_eq!(0x1020, hive.root_offset(), "Root cell follows the first hbin header");
        assert_eq!(0x20, hive.base_block().root_cell_offset_relative);
        assert_eq!(FileType::Normal, hive.base_block().file_type);
        assert!(!hive.base_block().is_dirty());
        assert_eq!(
            hive.base_block().checksum,
            BaseBlock::calculate_checksum(&bytes[..0x1000])
        );
        assert_eq!(bytes.len() as u32 - 0x1000, hive.base_block().hive_bins_data_size);
        assert!(hive.path().is_none());
    }

    #[test]
    fn test_rejects_bad_headers() {
        let err = HiveImage::from_bytes(vec![0; 0x800]).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "Short buffers are short reads: {:?}", err);

        let mut bytes = HiveBuilder::new(TestKey::new("ROOT")).build();
        bytes[0] = b'x';
        assert!(matches!(HiveImage::from_bytes(bytes).unwrap_err(), Error::Format { .. }));

        let mut bytes = HiveBuilder::new(TestKey::new("ROOT")).build();
        bytes[0x1000] = b'x';
        assert!(matches!(HiveImage::from_bytes(bytes).unwrap_err(), Error::Format { .. }));
    }

    #[test]
    fn test_reads_and_apply() {
        let mut hive = HiveImage::from_bytes(HiveBuilder::new(TestKey::new("ROOT")).build()).unwrap();
        assert_eq!(u32::from_le_bytes(*b"hbin"), hive.read_u32(0x1000).unwrap());
        assert_eq!(u16::from_le_bytes(*b"nk"), hive.read_u16(hive.root_offset() + 4).unwrap());
        assert_eq!(Some(0x1020), hive.cell_offset(0x20));
        assert_eq!(None, hive.cell_offset(0xFFFF_FFFF));

        let root_cell = hive.cell(hive.root_offset()).unwrap().len();
        assert_eq!(root_cell - 4, hive.cell_data(hive.root_offset()).unwrap().len());

        let patch = Patch::new(0x1000, b"HBIN".to_vec());
        hive.apply(&patch).unwrap();
        assert_eq!(b"HBIN", hive.slice(0x1000, 4).unwrap());

        let len = hive.len() as u64;
        assert!(hive.apply(&Patch::new(len - 2, vec![0; 4])).is_err());
    }

    #[test]
    fn test_from_path() {
        let path = std::env::temp_dir().join(format!("hivecred_hive_from_path_{}", std::process::id()));
        std::fs::write(&path, HiveBuilder::new(TestKey::new("ROOT")).build()).unwrap();
        let hive = HiveImage::from_path(&path).unwrap();
        assert_eq!(Some(path.as_path()), hive.path());
        std::fs::remove_file(&path).unwrap();

        let err = HiveImage::from_path(&path).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
