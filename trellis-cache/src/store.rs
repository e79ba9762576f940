// Copyright 2025 trellis Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{
    error::Result,
    tx::Transaction,
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Persistent backing store for read-through and write-through.
///
/// Store calls block; the entry deliberately performs them outside its lock
/// on transactional paths and accepts the in-lock cost on atomic paths.
pub trait Store: Send + Sync + 'static {
    fn load(&self, tx: Option<&dyn Transaction>, key: &CacheKey) -> Result<Option<CacheValue>>;

    fn put(
        &self,
        tx: Option<&dyn Transaction>,
        key: &CacheKey,
        value: &CacheValue,
        version: &EntryVersion,
    ) -> Result<()>;

    fn remove(&self, tx: Option<&dyn Transaction>, key: &CacheKey) -> Result<()>;

    /// Local stores receive preloaded values as well.
    fn is_local(&self) -> bool {
        false
    }
}
