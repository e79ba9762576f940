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

use bytes::Bytes;

use crate::{
    error::Result,
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Loader id tags carried alongside swapped values so the host runtime can
/// resolve the right deserialization context on promote.
pub type LoaderId = u64;

/// One value as it exists in the swap/off-heap tier.
#[derive(Debug, Clone)]
pub struct SwapEntry {
    pub value_bytes: Bytes,
    pub type_tag: u8,
    pub version: EntryVersion,
    pub ttl: i64,
    pub expire_time: i64,
    /// Set when the bytes stayed off-heap and only the pointer travels.
    pub offheap_ptr: Option<u64>,
    pub key_loader: Option<LoaderId>,
    pub value_loader: Option<LoaderId>,
}

impl SwapEntry {
    pub fn value(&self) -> CacheValue {
        CacheValue::from_parts(self.type_tag, self.value_bytes.clone())
    }
}

/// Descriptor handed back by batched eviction so the caller can flush many
/// evicted entries in one swap write.
#[derive(Debug, Clone)]
pub struct BatchSwapEntry {
    pub key: CacheKey,
    pub partition: u32,
    pub value_bytes: Bytes,
    pub type_tag: u8,
    pub version: EntryVersion,
    pub ttl: i64,
    pub expire_time: i64,
    pub key_loader: Option<LoaderId>,
    pub value_loader: Option<LoaderId>,
}

/// Swap tier manager.
///
/// Externally thread-safe; the entry calls `read_and_remove` under its own
/// lock because that call participates in the promote-once protocol.
pub trait SwapManager: Send + Sync + 'static {
    fn read(
        &self,
        key: &CacheKey,
        peek_only: bool,
        include_offheap: bool,
        include_swap: bool,
    ) -> Result<Option<SwapEntry>>;

    /// Remove-on-read used when promoting a value back into the entry.
    fn read_and_remove(&self, key: &CacheKey) -> Result<Option<SwapEntry>>;

    /// Read only the off-heap pointer for tiered caches; the bytes stay put.
    fn read_offheap_pointer(&self, key: &CacheKey) -> Result<Option<SwapEntry>>;

    fn write(&self, key: &CacheKey, entry: SwapEntry) -> Result<()>;

    fn remove(&self, key: &CacheKey) -> Result<()>;

    /// Drop only the off-heap copy. Returns whether one existed.
    fn remove_offheap(&self, key: &CacheKey) -> bool;

    fn offheap_eviction_enabled(&self) -> bool {
        false
    }

    fn enable_offheap_eviction(&self, _key: &CacheKey) {}
}
