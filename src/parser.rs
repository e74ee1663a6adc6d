use crate::cell_key_node::KeyNode;
use crate::cell_key_value::ValueNode;
use crate::err::Error;
use crate::hive::HiveImage;
use crate::reg_path::{NameMatch, RegistryPath, DEFAULT_VALUE_NAME};
use crate::sub_key_list::IndexNode;
use serde::Serialize;
use std::borrow::Cow;

pub const DEFAULT_MAX_DEPTH: usize = 512;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ParseOptions {
    pub name_match: NameMatch,
    /// Maximum number of path components a single resolve may descend through.
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            name_match: NameMatch::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Read-only path resolution over one hive.
#[derive(Clone, Copy, Debug)]
pub struct Parser<'a> {
    hive: &'a HiveImage,
    options: ParseOptions,
}

impl<'a> Parser<'a> {
    pub fn new(hive: &'a HiveImage) -> Self {
        Self::with_options(hive, ParseOptions::default())
    }

    pub fn with_options(hive: &'a HiveImage, options: ParseOptions) -> Self {
        Parser { hive, options }
    }

    pub fn hive(&self) -> &'a HiveImage {
        self.hive
    }

    pub fn options(&self) -> ParseOptions {
        self.options
    }

    /// Resolves an absolute path to the offset of a key node, or of a value node when `want_value` is set.
    pub fn resolve(&self, path: &str, want_value: bool) -> Result<usize, Error> {
        self.resolve_from(self.hive.root_offset(), path, want_value)
    }

    /// Like `resolve`, but a relative path starts at the key node at `start` rather than the root.
    ///
    /// When `want_value` is set, the last component is first tried against the current key's values;
    /// `@` selects only the unnamed value. If no value matches, the component is searched as a sub key,
    /// and once the path is exhausted the last component names a value of the key reached.
    pub fn resolve_from(&self, start: usize, path: &str, want_value: bool) -> Result<usize, Error> {
        let reg_path = RegistryPath::parse(path);
        let components = reg_path.components();
        if components.len() > self.options.max_depth {
            return Err(Error::format(format!(
                "path {} is deeper than the maximum of {} components",
                reg_path, self.options.max_depth
            )));
        }
        let mut current = if reg_path.is_absolute() {
            self.hive.root_offset()
        } else {
            start
        };

        for (depth, component) in components.iter().enumerate() {
            let key = KeyNode::read(self.hive, current)?;
            let is_last = depth + 1 == components.len();
            if is_last && want_value && key.number_of_key_values > 0 {
                if let Some(value) = self.find_value(&key, component)? {
                    return Ok(value.absolute_file_offset);
                }
            }
            current = match self.find_sub_key(&key, component)? {
                Some(sub_key) => sub_key.absolute_file_offset,
                None => return Err(Error::key_not_found(&reg_path)),
            };
        }

        let key = KeyNode::read(self.hive, current)?;
        if !want_value {
            return Ok(current);
        }
        let last = reg_path.last().ok_or_else(|| Error::key_not_found(&reg_path))?;
        match self.find_value(&key, last)? {
            Some(value) => Ok(value.absolute_file_offset),
            None => Err(Error::key_not_found(&reg_path)),
        }
    }

    pub fn key(&self, path: &str) -> Result<KeyNode<'a>, Error> {
        KeyNode::read(self.hive, self.resolve(path, false)?)
    }

    pub fn value(&self, path: &str) -> Result<ValueNode<'a>, Error> {
        ValueNode::read(self.hive, self.resolve(path, true)?)
    }

    pub fn value_data(&self, path: &str) -> Result<Cow<'a, [u8]>, Error> {
        self.value(path)?.data(self.hive)
    }

    /// Decodes the key's sub keys in index order.
    pub fn sub_keys(&self, key: &KeyNode) -> Result<Vec<KeyNode<'a>>, Error> {
        match key.sub_key_list_offset(self.hive) {
            None => Ok(Vec::new()),
            Some(offset) => IndexNode::read(self.hive, offset)?
                .entries(self.hive)?
                .into_iter()
                .map(|entry| KeyNode::read(self.hive, entry.offset))
                .collect(),
        }
    }

    /// Decodes the key's values in stored order.
    pub fn values(&self, key: &KeyNode) -> Result<Vec<ValueNode<'a>>, Error> {
        key.value_offsets(self.hive)?
            .into_iter()
            .map(|offset| ValueNode::read(self.hive, offset))
            .collect()
    }

    fn find_value(&self, key: &KeyNode, component: &str) -> Result<Option<ValueNode<'a>>, Error> {
        for value in self.values(key)? {
            let matched = if component == DEFAULT_VALUE_NAME {
                value.is_default()
            } else {
                value.name_matches(component, self.options.name_match)
            };
            if matched {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn find_sub_key(&self, key: &KeyNode, component: &str) -> Result<Option<KeyNode<'a>>, Error> {
        let offset = match key.sub_key_list_offset(self.hive) {
            Some(offset) => offset,
            None => return Ok(None),
        };
        for entry in IndexNode::read(self.hive, offset)?.entries(self.hive)? {
            let candidate = KeyNode::read(self.hive, entry.offset)?;
            if candidate.name_matches(component, self.options.name_match) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}
