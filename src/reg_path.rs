use serde::Serialize;
use std::fmt;

pub const PATH_SEPARATOR: char = '\\';
/// Path component that addresses a key's unnamed (default) value.
pub const DEFAULT_VALUE_NAME: &str = "@";

/// How a path component is compared against key and value names. Both modes ignore case.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum NameMatch {
    /// A name matches when the component is a prefix of it; `Account` matches `AccountOperators`.
    Prefix,
    /// A name matches only when it equals the component.
    Exact,
}

impl Default for NameMatch {
    fn default() -> Self {
        NameMatch::Prefix
    }
}

impl NameMatch {
    pub fn matches(self, name: &str, component: &str) -> bool {
        let name = name.to_lowercase();
        let component = component.to_lowercase();
        match self {
            NameMatch::Prefix => name.starts_with(&component),
            NameMatch::Exact => name == component,
        }
    }
}

/// A backslash-delimited path; a leading backslash anchors it at the hive root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistryPath<'p> {
    absolute: bool,
    components: Vec<&'p str>,
}

impl<'p> RegistryPath<'p> {
    pub fn parse(path: &'p str) -> Self {
        RegistryPath {
            absolute: path.starts_with(PATH_SEPARATOR),
            components: path
                .split(PATH_SEPARATOR)
                .filter(|component| !component.is_empty())
                .collect(),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn components(&self) -> &[&'p str] {
        &self.components
    }

    pub fn last(&self) -> Option<&'p str> {
        self.components.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl fmt::Display for RegistryPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.absolute {
            write!(f, "{}", PATH_SEPARATOR)?;
        }
        write!(f, "{}", self.components.join("\\"))
    }
}
