use crate::err::Error;
use crate::hive::HiveImage;
use crate::impl_serialize_for_bitflags;
use crate::reg_path::NameMatch;
use crate::util;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use nom::{
    bytes::complete::{tag, take},
    number::complete::{le_i32, le_u16, le_u32, le_u64},
    IResult,
};
use serde::Serialize;

/// A key node (nk) cell. The name borrows the hive's bytes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyNode<'a> {
    pub absolute_file_offset: usize,
    pub size: u32,
    pub flags: KeyNodeFlags,
    pub last_key_written_date_and_time: u64,
    pub parent_key_offset: u32, // Offset of a parent key node in bytes, relative from the start of the hive bins data
    pub number_of_sub_keys: u32,
    pub sub_keys_list_offset: u32, // Relative; may point to an index root (ri)
    pub number_of_key_values: u32,
    pub key_values_list_offset: u32,
    pub security_key_offset: u32,
    pub class_name_offset: u32,
    pub class_name_size: u16,
    pub key_name_bytes: &'a [u8], // ASCII (extended) string or UTF-16LE string
    pub allocated: bool,
}

impl<'a> KeyNode<'a> {
    /// Uses nom to parse a key node (nk) hive bin cell.
    pub fn from_bytes(input: &'a [u8]) -> IResult<&'a [u8], Self> {
        let (input, size) = le_i32(input)?;
        let (input, _signature) = tag("nk")(input)?;
        let (input, flags) = le_u16(input)?;
        let (input, last_key_written_date_and_time) = le_u64(input)?;
        let (input, _access_bits) = le_u32(input)?;
        let (input, parent_key_offset) = le_u32(input)?;
        let (input, number_of_sub_keys) = le_u32(input)?;
        let (input, _number_of_volatile_sub_keys) = le_u32(input)?;
        let (input, sub_keys_list_offset) = le_u32(input)?;
        let (input, _volatile_sub_keys_list_offset) = le_u32(input)?;
        let (input, number_of_key_values) = le_u32(input)?;
        let (input, key_values_list_offset) = le_u32(input)?;
        let (input, security_key_offset) = le_u32(input)?;
        let (input, class_name_offset) = le_u32(input)?;
        let (input, _largest_sizes) = take(16usize)(input)?;
        let (input, _work_var) = le_u32(input)?;
        let (input, key_name_size) = le_u16(input)?;
        let (input, class_name_size) = le_u16(input)?;
        let (input, key_name_bytes) = take(key_name_size)(input)?;

        Ok((
            input,
            KeyNode {
                absolute_file_offset: 0,
                size: size.unsigned_abs(),
                flags: KeyNodeFlags::from_bits_truncate(flags),
                last_key_written_date_and_time,
                parent_key_offset,
                number_of_sub_keys,
                sub_keys_list_offset,
                number_of_key_values,
                key_values_list_offset,
                security_key_offset,
                class_name_offset,
                class_name_size,
                key_name_bytes,
                allocated: size < 0,
            },
        ))
    }

    /// Decodes the key node at an absolute file offset; a missing `nk` signature is a `Format` error.
    pub fn read(hive: &'a HiveImage, offset: usize) -> Result<Self, Error> {
        let cell = hive.cell(offset)?;
        let (_, mut key_node) = Self::from_bytes(cell).map_err(|e| {
            Error::format(format!("expected key node at {:#X}: {}", offset, Error::from(e)))
        })?;
        key_node.absolute_file_offset = offset;
        Ok(key_node)
    }

    pub fn key_name(&self) -> String {
        util::string_from_bytes(self.flags.contains(KeyNodeFlags::KEY_COMP_NAME), self.key_name_bytes)
    }

    pub fn name_matches(&self, component: &str, name_match: NameMatch) -> bool {
        name_match.matches(&self.key_name(), component)
    }

    pub fn is_root(&self) -> bool {
        self.flags.contains(KeyNodeFlags::KEY_HIVE_ENTRY)
    }

    pub fn last_written(&self) -> Option<DateTime<Utc>> {
        util::get_date_time_from_filetime(self.last_key_written_date_and_time)
    }

    /// Raw class name blob (UTF-16LE), or `None` when the key has no class name.
    pub fn class_name_bytes(&self, hive: &'a HiveImage) -> Result<Option<&'a [u8]>, Error> {
        match hive.cell_offset(self.class_name_offset) {
            Some(offset) if self.class_name_size > 0 => {
                Ok(Some(hive.slice(offset + 4, self.class_name_size.into())?))
            }
            _ => Ok(None),
        }
    }

    pub fn class_name(&self, hive: &'a HiveImage) -> Result<Option<String>, Error> {
        Ok(self.class_name_bytes(hive)?.map(util::from_utf16_le_string))
    }

    /// Absolute offset of the sub key index, when the key has sub keys.
    pub fn sub_key_list_offset(&self, hive: &HiveImage) -> Option<usize> {
        if self.number_of_sub_keys == 0 {
            return None;
        }
        hive.cell_offset(self.sub_keys_list_offset)
    }

    /// Absolute offsets of this key's value nodes, in stored order.
    pub fn value_offsets(&self, hive: &HiveImage) -> Result<Vec<usize>, Error> {
        if self.number_of_key_values == 0 {
            return Ok(Vec::new());
        }
        let list_offset = hive.cell_offset(self.key_values_list_offset).ok_or_else(|| {
            Error::format(format!(
                "key at {:#X} has {} values but no value list",
                self.absolute_file_offset, self.number_of_key_values
            ))
        })?;
        let list = hive.cell_data(list_offset)?;
        let count = self.number_of_key_values as usize;
        let mut offsets = Vec::with_capacity(count.min(list.len() / 4));
        for i in 0..count {
            let relative = util::read_u32(list, i * 4)?;
            let offset = hive
                .cell_offset(relative)
                .ok_or_else(|| Error::format(format!("value list at {:#X} holds an empty slot", list_offset)))?;
            offsets.push(offset);
        }
        Ok(offsets)
    }
}

bitflags! {
    #[derive(Default)]
    pub struct KeyNodeFlags: u16 {
        const KEY_VOLATILE       = 0x0001; // Is volatile (not used, a key node on a disk isn't expected to have this flag set)
        const KEY_HIVE_EXIT      = 0x0002; // Is the mount point of another hive
        const KEY_HIVE_ENTRY     = 0x0004; // Is the root key for this hive
        const KEY_NO_DELETE      = 0x0008; // This key can't be deleted
        const KEY_SYM_LINK       = 0x0010; // This key is a symlink
        const KEY_COMP_NAME      = 0x0020; // Key name is an ASCII string, possibly an extended ASCII string (otherwise it is a UTF-16LE string)
        const KEY_PREDEF_HANDLE  = 0x0040; // Is a predefined handle
        const KEY_VIRTUAL_SOURCE = 0x0080;
        const KEY_VIRTUAL_TARGET = 0x0100;
        const KEY_VIRTUAL_STORE  = 0x0200;
    }
}
impl_serialize_for_bitflags! {KeyNodeFlags}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_hive::{HiveBuilder, TestKey, TestValue, DEFAULT_LAST_WRITTEN};

    #[test]
    fn test_parse_cell_key_node() {
        let slice = [
            0xA0, 0xFF, 0xFF, 0xFF, 0x6E, 0x6B, 0x20, 0x00, 0x6B, 0x05, 0x5C, 0x41, 0x4F, 0xE7,
            0xD1, 0x01, 0x02, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x30, 0x02, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00,
            0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x78, 0x00, 0x00, 0x00, 0x40, 0x02, 0x00, 0x00,
            0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x08, 0x00, 0x47, 0x42, 0x47,
        ];
        let (remaining, key_node) = KeyNode::from_bytes(&slice).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(96, key_node.size);
        assert!(key_node.allocated);
        assert_eq!(KeyNodeFlags::KEY_COMP_NAME, key_node.flags);
        assert_eq!(0x20, key_node.parent_key_offset);
        assert_eq!(1, key_node.number_of_sub_keys);
        assert_eq!(0x230, key_node.sub_keys_list_offset);
        assert_eq!(0, key_node.number_of_key_values);
        assert_eq!(0x240, key_node.class_name_offset);
        assert_eq!(8, key_node.class_name_size);
        assert_eq!("GBG", key_node.key_name());
        assert!(key_node.name_matches("gb", NameMatch::Prefix));
        assert!(!key_node.name_matches("gb", NameMatch::Exact));
    }

    #[test]
    fn test_read_key_node_from_hive() {
        let bytes = HiveBuilder::new(
            TestKey::new("ROOT")
                .sub_key(TestKey::new("Lsa").class_name("5d5991a3"))
                .sub_key(TestKey::new("Ünïcode").utf16_name())
                .value(TestValue::dword("Default", 1)),
        )
        .build();
        let hive = HiveImage::from_bytes(bytes).unwrap();
        let root = KeyNode::read(&hive, hive.root_offset()).unwrap();
        assert!(root.is_root());
        assert_eq!("ROOT", root.key_name());
        assert_eq!(2, root.number_of_sub_keys);
        assert_eq!(1, root.value_offsets(&hive).unwrap().len());
        assert_eq!(DEFAULT_LAST_WRITTEN, root.last_key_written_date_and_time);
        assert_eq!(
            "2012-04-06T15:52:25.146808300+00:00",
            root.last_written().unwrap().to_rfc3339()
        );
        assert_eq!(None, root.class_name(&hive).unwrap());
        assert!(root.sub_key_list_offset(&hive).is_some());
    }

    #[test]
    fn test_read_key_node_rejects_other_cells() {
        let bytes = HiveBuilder::new(TestKey::new("ROOT").value(TestValue::dword("Current", 1))).build();
        let hive = HiveImage::from_bytes(bytes).unwrap();
        let root = KeyNode::read(&hive, hive.root_offset()).unwrap();
        let value_offset = root.value_offsets(&hive).unwrap()[0];
        let err = KeyNode::read(&hive, value_offset).unwrap_err();
        assert!(matches!(err, Error::Format { .. }), "A vk cell is not a key node: {:?}", err);
    }
}
