//! Builds small synthetic hives in memory so tests do not depend on binary test data.

use crate::hive::{BaseBlock, HIVE_BIN_START};
use crate::util;

const HBIN_HEADER_SIZE: usize = 0x20;
const HBIN_ALIGNMENT: usize = 0x1000;
const NO_CELL: u32 = 0xFFFF_FFFF;
const KEY_HIVE_ENTRY: u16 = 0x0004;
const KEY_COMP_NAME: u16 = 0x0020;
const VALUE_COMP_NAME: u16 = 0x0001;
pub(crate) const DEFAULT_LAST_WRITTEN: u64 = 129782011451468083;

#[derive(Clone, Copy, Debug)]
pub(crate) enum IndexKind {
    Lf,
    Lh,
    Li,
    /// Two-level index whose leaves are `lf` lists holding at most this many entries.
    Ri(usize),
    /// Malformed: an `ri` list whose only child is another `ri` list.
    NestedRi,
}

#[derive(Clone, Debug)]
enum ValueData {
    Stored(Vec<u8>),
    Inline { raw_len: u32, raw_offset: u32 },
}

#[derive(Clone, Debug)]
pub(crate) struct TestValue {
    name: String,
    data_type: u32,
    data: ValueData,
}

impl TestValue {
    pub(crate) fn new<T: Into<Vec<u8>>>(name: &str, data_type: u32, data: T) -> Self {
        TestValue {
            name: name.to_string(),
            data_type,
            data: ValueData::Stored(data.into()),
        }
    }

    pub(crate) fn binary<T: Into<Vec<u8>>>(name: &str, data: T) -> Self {
        Self::new(name, 3, data)
    }

    /// A REG_DWORD stored inline in the data offset field.
    pub(crate) fn dword(name: &str, value: u32) -> Self {
        TestValue {
            name: name.to_string(),
            data_type: 4,
            data: ValueData::Inline {
                raw_len: 0x8000_0004,
                raw_offset: value,
            },
        }
    }

    /// The unnamed value of a `Users\Names\<user>` key: zero-length inline data, RID in the type field.
    pub(crate) fn rid_marker(rid: u32) -> Self {
        TestValue {
            name: String::new(),
            data_type: rid,
            data: ValueData::Inline {
                raw_len: 0x8000_0000,
                raw_offset: 0,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct TestKey {
    name: String,
    utf16_name: bool,
    class_name: Option<String>,
    last_written: u64,
    values: Vec<TestValue>,
    sub_keys: Vec<TestKey>,
    index: IndexKind,
}

impl TestKey {
    pub(crate) fn new(name: &str) -> Self {
        TestKey {
            name: name.to_string(),
            utf16_name: false,
            class_name: None,
            last_written: DEFAULT_LAST_WRITTEN,
            values: Vec::new(),
            sub_keys: Vec::new(),
            index: IndexKind::Lf,
        }
    }

    pub(crate) fn utf16_name(mut self) -> Self {
        self.utf16_name = true;
        self
    }

    pub(crate) fn class_name(mut self, class_name: &str) -> Self {
        self.class_name = Some(class_name.to_string());
        self
    }

    pub(crate) fn value(mut self, value: TestValue) -> Self {
        self.values.push(value);
        self
    }

    pub(crate) fn sub_key(mut self, key: TestKey) -> Self {
        self.sub_keys.push(key);
        self
    }

    pub(crate) fn index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    /// Adds each path component as a nested key, with `leaf` as the innermost key.
    pub(crate) fn path(self, components: &[&str], leaf: TestKey) -> Self {
        match components.split_first() {
            None => self.sub_key(leaf),
            Some((first, rest)) => self.sub_key(TestKey::new(first).path(rest, leaf)),
        }
    }
}

pub(crate) struct HiveBuilder {
    root: TestKey,
    hbins: Vec<u8>,
}

impl HiveBuilder {
    pub(crate) fn new(root: TestKey) -> Self {
        let mut hbins = vec![0; HBIN_HEADER_SIZE];
        hbins[..4].copy_from_slice(b"hbin");
        HiveBuilder { root, hbins }
    }

    pub(crate) fn build(mut self) -> Vec<u8> {
        let root = self.root.clone();
        let root_offset = self.emit_key(&root, NO_CELL, true);

        let padded = (self.hbins.len() + HBIN_ALIGNMENT - 1) / HBIN_ALIGNMENT * HBIN_ALIGNMENT;
        self.hbins.resize(padded, 0);
        let hbins_size = padded as u32;
        self.hbins[8..12].copy_from_slice(&hbins_size.to_le_bytes());

        let mut file = vec![0; HIVE_BIN_START];
        file[..4].copy_from_slice(b"regf");
        file[4..8].copy_from_slice(&1u32.to_le_bytes());
        file[8..12].copy_from_slice(&1u32.to_le_bytes());
        file[12..20].copy_from_slice(&DEFAULT_LAST_WRITTEN.to_le_bytes());
        file[20..24].copy_from_slice(&1u32.to_le_bytes());
        file[24..28].copy_from_slice(&5u32.to_le_bytes());
        file[32..36].copy_from_slice(&1u32.to_le_bytes());
        file[36..40].copy_from_slice(&root_offset.to_le_bytes());
        file[40..44].copy_from_slice(&hbins_size.to_le_bytes());
        file[44..48].copy_from_slice(&1u32.to_le_bytes());
        let filename = util::to_utf16_le_bytes("SYNTHETIC");
        file[48..48 + filename.len()].copy_from_slice(&filename);
        let checksum = BaseBlock::calculate_checksum(&file);
        file[508..512].copy_from_slice(&checksum.to_le_bytes());

        file.extend_from_slice(&self.hbins);
        file
    }

    /// Appends an allocated cell holding `payload_len` bytes and returns its relative offset.
    fn alloc(&mut self, payload_len: usize) -> u32 {
        let offset = self.hbins.len();
        let size = (4 + payload_len + 7) / 8 * 8;
        self.hbins.resize(offset + size, 0);
        self.hbins[offset..offset + 4].copy_from_slice(&(-(size as i32)).to_le_bytes());
        offset as u32
    }

    fn write(&mut self, cell: u32, at: usize, bytes: &[u8]) {
        let start = cell as usize + 4 + at;
        self.hbins[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn emit_data(&mut self, bytes: &[u8]) -> u32 {
        let cell = self.alloc(bytes.len());
        self.write(cell, 0, bytes);
        cell
    }

    fn emit_key(&mut self, key: &TestKey, parent: u32, is_root: bool) -> u32 {
        let name = if key.utf16_name {
            util::to_utf16_le_bytes(&key.name)
        } else {
            key.name.as_bytes().to_vec()
        };
        let nk = self.alloc(76 + name.len());

        let (class_offset, class_len) = match &key.class_name {
            Some(class_name) => {
                let bytes = util::to_utf16_le_bytes(class_name);
                (self.emit_data(&bytes), bytes.len() as u16)
            }
            None => (NO_CELL, 0),
        };

        let mut value_offsets = Vec::new();
        for value in &key.values {
            value_offsets.push(self.emit_value(value));
        }
        let value_list = if value_offsets.is_empty() {
            NO_CELL
        } else {
            let bytes: Vec<u8> = value_offsets.iter().flat_map(|o| o.to_le_bytes()).collect();
            self.emit_data(&bytes)
        };

        let mut children = Vec::new();
        for sub_key in &key.sub_keys {
            let offset = self.emit_key(sub_key, nk, false);
            children.push((offset, sub_key.name.clone()));
        }
        let sub_key_list = if children.is_empty() {
            NO_CELL
        } else {
            self.emit_index(key.index, &children)
        };

        let mut flags = 0;
        if !key.utf16_name {
            flags |= KEY_COMP_NAME;
        }
        if is_root {
            flags |= KEY_HIVE_ENTRY;
        }
        self.write(nk, 0, b"nk");
        self.write(nk, 2, &flags.to_le_bytes());
        self.write(nk, 4, &key.last_written.to_le_bytes());
        self.write(nk, 16, &parent.to_le_bytes());
        self.write(nk, 20, &(children.len() as u32).to_le_bytes());
        self.write(nk, 28, &sub_key_list.to_le_bytes());
        self.write(nk, 32, &NO_CELL.to_le_bytes());
        self.write(nk, 36, &(value_offsets.len() as u32).to_le_bytes());
        self.write(nk, 40, &value_list.to_le_bytes());
        self.write(nk, 44, &NO_CELL.to_le_bytes());
        self.write(nk, 48, &class_offset.to_le_bytes());
        self.write(nk, 72, &(name.len() as u16).to_le_bytes());
        self.write(nk, 74, &class_len.to_le_bytes());
        self.write(nk, 76, &name);
        nk
    }

    fn emit_value(&mut self, value: &TestValue) -> u32 {
        let (raw_len, raw_offset) = match &value.data {
            ValueData::Stored(bytes) => (bytes.len() as u32, self.emit_data(bytes)),
            ValueData::Inline { raw_len, raw_offset } => (*raw_len, *raw_offset),
        };
        let name = value.name.as_bytes();
        let vk = self.alloc(20 + name.len());
        self.write(vk, 0, b"vk");
        self.write(vk, 2, &(name.len() as u16).to_le_bytes());
        self.write(vk, 4, &raw_len.to_le_bytes());
        self.write(vk, 8, &raw_offset.to_le_bytes());
        self.write(vk, 12, &value.data_type.to_le_bytes());
        self.write(vk, 16, &VALUE_COMP_NAME.to_le_bytes());
        self.write(vk, 20, name);
        vk
    }

    fn emit_index(&mut self, kind: IndexKind, children: &[(u32, String)]) -> u32 {
        match kind {
            IndexKind::Lf => self.emit_hashed_list(b"lf", children),
            IndexKind::Lh => self.emit_hashed_list(b"lh", children),
            IndexKind::Li => {
                let mut bytes = b"li".to_vec();
                bytes.extend_from_slice(&(children.len() as u16).to_le_bytes());
                for (offset, _) in children {
                    bytes.extend_from_slice(&offset.to_le_bytes());
                }
                self.emit_data(&bytes)
            }
            IndexKind::Ri(leaf_size) => {
                let leaves: Vec<u32> = children
                    .chunks(leaf_size.max(1))
                    .map(|chunk| self.emit_hashed_list(b"lf", chunk))
                    .collect();
                self.emit_root_list(&leaves)
            }
            IndexKind::NestedRi => {
                let leaf = self.emit_hashed_list(b"lf", children);
                let inner = self.emit_root_list(&[leaf]);
                self.emit_root_list(&[inner])
            }
        }
    }

    fn emit_hashed_list(&mut self, signature: &[u8; 2], children: &[(u32, String)]) -> u32 {
        let mut bytes = signature.to_vec();
        bytes.extend_from_slice(&(children.len() as u16).to_le_bytes());
        for (offset, name) in children {
            bytes.extend_from_slice(&offset.to_le_bytes());
            if signature == b"lh" {
                bytes.extend_from_slice(&name_hash(name).to_le_bytes());
            } else {
                let mut hint = [0u8; 4];
                for (dst, src) in hint.iter_mut().zip(name.bytes()) {
                    *dst = src;
                }
                bytes.extend_from_slice(&hint);
            }
        }
        self.emit_data(&bytes)
    }

    fn emit_root_list(&mut self, lists: &[u32]) -> u32 {
        let mut bytes = b"ri".to_vec();
        bytes.extend_from_slice(&(lists.len() as u16).to_le_bytes());
        for offset in lists {
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        self.emit_data(&bytes)
    }
}

/// The `lh` name hash: uppercase characters folded as `hash * 37 + c`.
pub(crate) fn name_hash(name: &str) -> u32 {
    name.to_uppercase()
        .chars()
        .fold(0u32, |hash, c| hash.wrapping_mul(37).wrapping_add(c as u32))
}
