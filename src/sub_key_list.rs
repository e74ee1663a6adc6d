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
use nom::{
    branch::alt,
    bytes::complete::tag,
    combinator::map,
    multi::length_count,
    number::complete::{le_i32, le_u16, le_u32},
    sequence::{pair, preceded},
    IResult,
};
use serde::Serialize;

/// One sub key reference. `hash` is the lf name hint or lh hash; li entries carry none.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct IndexEntry {
    pub hash: Option<u32>,
    pub offset: usize,
}

/// A key's sub key index, decided once from the cell signature.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum IndexNode {
    /// lf, lh or li: the entries themselves.
    Flat(Vec<IndexEntry>),
    /// ri: absolute offsets of leaf lists.
    TwoLevel(Vec<usize>),
}

/// List cell contents; offsets are still relative to the first hive bin.
#[derive(Debug, Eq, PartialEq)]
enum RawList {
    /// lf and lh: (offset, hint) pairs
    Hinted(Vec<(u32, u32)>),
    Plain(Vec<u32>),
    Root(Vec<u32>),
}

/// Cell size, two byte signature, then the entry count.
fn list_header<'a>(signature: &'static str) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], u16> {
    preceded(pair(le_i32, tag(signature)), le_u16)
}

fn parse_raw_list(input: &[u8]) -> IResult<&[u8], RawList> {
    alt((
        map(length_count(list_header("ri"), le_u32), RawList::Root),
        map(length_count(list_header("li"), le_u32), RawList::Plain),
        map(
            length_count(alt((list_header("lf"), list_header("lh"))), pair(le_u32, le_u32)),
            RawList::Hinted,
        ),
    ))(input)
}

impl IndexNode {
    pub fn read(hive: &HiveImage, offset: usize) -> Result<Self, Error> {
        let cell = hive.cell(offset)?;
        let (_, raw) = parse_raw_list(cell).map_err(|e| {
            Error::format(format!("expected sub key list at {:#X}: {}", offset, Error::from(e)))
        })?;
        let absolute = |relative: u32| {
            hive.cell_offset(relative).ok_or_else(|| {
                Error::format(format!("sub key list at {:#X} holds an empty slot", offset))
            })
        };
        Ok(match raw {
            RawList::Hinted(items) => IndexNode::Flat(
                items
                    .into_iter()
                    .map(|(relative, hint)| {
                        Ok(IndexEntry {
                            hash: Some(hint),
                            offset: absolute(relative)?,
                        })
                    })
                    .collect::<Result<_, Error>>()?,
            ),
            RawList::Plain(items) => IndexNode::Flat(
                items
                    .into_iter()
                    .map(|relative| {
                        Ok(IndexEntry {
                            hash: None,
                            offset: absolute(relative)?,
                        })
                    })
                    .collect::<Result<_, Error>>()?,
            ),
            RawList::Root(items) => IndexNode::TwoLevel(
                items
                    .into_iter()
                    .map(|relative| absolute(relative))
                    .collect::<Result<_, Error>>()?,
            ),
        })
    }

    /// Flattens the index into its sub key entries, reading leaf lists for a two-level index.
    /// A leaf that is itself an ri list is malformed.
    pub fn entries(self, hive: &HiveImage) -> Result<Vec<IndexEntry>, Error> {
        match self {
            IndexNode::Flat(entries) => Ok(entries),
            IndexNode::TwoLevel(leaves) => {
                let mut entries = Vec::new();
                for leaf in leaves {
                    match IndexNode::read(hive, leaf)? {
                        IndexNode::Flat(mut leaf_entries) => entries.append(&mut leaf_entries),
                        IndexNode::TwoLevel(_) => {
                            return Err(Error::format(format!(
                                "index root at {:#X} nests another index root",
                                leaf
                            )))
                        }
                    }
                }
                Ok(entries)
            }
        }
    }
}
