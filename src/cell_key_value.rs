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

use crate::err::Error;
use crate::hive::HiveImage;
use crate::impl_enum_from_value;
use crate::impl_serialize_for_bitflags;
use crate::reg_path::NameMatch;
use crate::util;
use bitflags::bitflags;
use enum_primitive_derive::Primitive;
use nom::{
    bytes::complete::{tag, take},
    number::complete::{le_i32, le_u16, le_u32},
    IResult,
};
use serde::Serialize;
use std::borrow::Cow;

/// Top bit of the data size: data lives in the data offset field instead of a separate cell.
pub const DATA_IS_RESIDENT_MASK: u32 = 0x8000_0000;
/// Data size of a resident value holding no data; `Users\Names` entries use it with the RID in the type field.
pub const INLINE_RID_SENTINEL: u32 = DATA_IS_RESIDENT_MASK;
const BIG_DATA_THRESHOLD: u32 = 16344;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Primitive, Serialize)]
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum DataType {
    REG_NONE = 0x0000,
    REG_SZ = 0x0001,
    REG_EXPAND_SZ = 0x0002,
    REG_BIN = 0x0003,
    REG_DWORD = 0x0004,
    REG_DWORD_BIG_ENDIAN = 0x0005,
    REG_LINK = 0x0006,
    REG_MULTI_SZ = 0x0007,
    REG_RESOURCE_LIST = 0x0008,
    REG_FULL_RESOURCE_DESCRIPTOR = 0x0009,
    REG_RESOURCE_REQUIREMENTS_LIST = 0x000A,
    REG_QWORD = 0x000B,
    Unknown = 0x0fffffff,
}
impl_enum_from_value! { DataType }

bitflags! {
    #[derive(Default)]
    pub struct ValueFlags: u16 {
        const VALUE_COMP_NAME = 0x0001; // Name is an ASCII string, possibly extended (otherwise UTF-16LE)
        const IS_TOMBSTONE    = 0x0002;
    }
}
impl_serialize_for_bitflags! {ValueFlags}

/// A value node (vk) cell.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValueNode<'a> {
    pub absolute_file_offset: usize,
    pub size: u32,
    pub data_size_raw: u32, // Top bit set: data is stored in data_offset_relative
    pub data_offset_relative: u32,
    pub data_type_raw: u32,
    pub flags: ValueFlags,
    pub value_name_bytes: &'a [u8],
}

impl<'a> ValueNode<'a> {
    /// Uses nom to parse a key value (vk) hive bin cell.
    pub fn from_bytes(input: &'a [u8]) -> IResult<&'a [u8], Self> {
        let (input, size) = le_i32(input)?;
        let (input, _signature) = tag("vk")(input)?;
        let (input, value_name_size) = le_u16(input)?;
        let (input, data_size_raw) = le_u32(input)?;
        let (input, data_offset_relative) = le_u32(input)?;
        let (input, data_type_raw) = le_u32(input)?;
        let (input, flags) = le_u16(input)?;
        let (input, _padding) = le_u16(input)?;
        let (input, value_name_bytes) = take(value_name_size)(input)?;

        Ok((
            input,
            ValueNode {
                absolute_file_offset: 0,
                size: size.unsigned_abs(),
                data_size_raw,
                data_offset_relative,
                data_type_raw,
                flags: ValueFlags::from_bits_truncate(flags),
                value_name_bytes,
            },
        ))
    }

    pub fn read(hive: &'a HiveImage, offset: usize) -> Result<Self, Error> {
        let cell = hive.cell(offset)?;
        let (_, mut value_node) = Self::from_bytes(cell).map_err(|e| {
            Error::format(format!("expected value node at {:#X}: {}", offset, Error::from(e)))
        })?;
        value_node.absolute_file_offset = offset;
        Ok(value_node)
    }

    pub fn value_name(&self) -> String {
        util::string_from_bytes(self.flags.contains(ValueFlags::VALUE_COMP_NAME), self.value_name_bytes)
    }

    /// True for the key's unnamed value, addressed as `@`.
    pub fn is_default(&self) -> bool {
        self.value_name_bytes.is_empty()
    }

    pub fn name_matches(&self, component: &str, name_match: NameMatch) -> bool {
        !self.is_default() && name_match.matches(&self.value_name(), component)
    }

    pub fn is_resident(&self) -> bool {
        self.data_size_raw & DATA_IS_RESIDENT_MASK != 0
    }

    pub fn data_size(&self) -> u32 {
        self.data_size_raw & !DATA_IS_RESIDENT_MASK
    }

    pub fn data_type(&self) -> DataType {
        DataType::from_value(self.data_type_raw)
    }

    /// Absolute offset of the data cell; `None` for resident data.
    pub fn data_cell_offset(&self, hive: &HiveImage) -> Option<usize> {
        if self.is_resident() {
            return None;
        }
        hive.cell_offset(self.data_offset_relative)
    }

    /// The value's data. Resident data (at most 4 bytes) is copied out of the data offset field.
    pub fn data(&self, hive: &'a HiveImage) -> Result<Cow<'a, [u8]>, Error> {
        let size = self.data_size() as usize;
        if self.is_resident() {
            let resident = self.data_offset_relative.to_le_bytes();
            return Ok(Cow::Owned(resident[..size.min(resident.len())].to_vec()));
        }
        if size == 0 {
            return Ok(Cow::Borrowed(&[]));
        }
        let offset = self.data_cell_offset(hive).ok_or_else(|| {
            Error::format(format!("value at {:#X} has no data cell", self.absolute_file_offset))
        })?;
        let cell = hive.cell_data(offset)?;
        if self.data_size() > BIG_DATA_THRESHOLD && cell.starts_with(b"db") {
            return Err(Error::format(format!(
                "value at {:#X} uses big data storage",
                self.absolute_file_offset
            )));
        }
        Ok(Cow::Borrowed(util::slice_at(cell, 0, size)?))
    }

    pub fn data_u32(&self, hive: &'a HiveImage) -> Result<u32, Error> {
        util::read_u32(&self.data(hive)?, 0)
    }
}
