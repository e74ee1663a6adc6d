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

pub(crate) mod macros;

pub mod cached_credential;
pub mod cell_key_node;
pub mod cell_key_value;
pub mod clear;
pub mod crypto;
pub mod dump;
pub mod err;
pub mod hive;
pub mod key_material;
pub mod log;
pub mod lsa;
pub mod parser;
pub mod patch;
pub mod reg_path;
pub mod sam;
pub mod sub_key_list;
pub mod syskey;
pub mod util;

#[cfg(test)]
mod test_hive;
