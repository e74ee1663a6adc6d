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
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Bytes to write over a hive file at an absolute offset.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Patch {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl Patch {
    pub fn new(offset: u64, bytes: Vec<u8>) -> Self {
        Patch { offset, bytes }
    }

    /// One past the last byte this patch writes.
    pub fn end(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }

    fn overlaps(&self, other: &Patch) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// The patches for one hive file. Patches in a set never overlap.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, patch: Patch) -> Result<(), Error> {
        if let Some(existing) = self.patches.iter().find(|p| p.overlaps(&patch)) {
            return Err(Error::format(format!(
                "patch at {:#X} ({} bytes) overlaps patch at {:#X} ({} bytes)",
                patch.offset,
                patch.bytes.len(),
                existing.offset,
                existing.bytes.len()
            )));
        }
        self.patches.push(patch);
        Ok(())
    }

    pub fn extend<I: IntoIterator<Item = Patch>>(&mut self, patches: I) -> Result<(), Error> {
        for patch in patches {
            self.add(patch)?;
        }
        Ok(())
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Writes every patch into the file at `path`. All ranges are checked against the file
    /// length before the first write.
    pub fn apply_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if let Some(outside) = self.patches.iter().find(|p| p.end() > file_len) {
            return Err(Error::format(format!(
                "patch at {:#X} ({} bytes) runs past the end of {} ({} bytes)",
                outside.offset,
                outside.bytes.len(),
                path.display(),
                file_len
            )));
        }
        for patch in &self.patches {
            file.seek(SeekFrom::Start(patch.offset))?;
            file.write_all(&patch.bytes)?;
            debug!("patch: wrote {} bytes at {:#X} in {}", patch.bytes.len(), patch.offset, path.display());
        }
        file.flush()?;
        Ok(())
    }
}
