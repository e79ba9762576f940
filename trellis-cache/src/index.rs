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
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Query/index manager.
///
/// Index updates happen inside the entry lock because loaders may also touch
/// the index; failures here are fatal to the current operation and surface
/// wrapped as index errors.
pub trait QueryIndex: Send + Sync + 'static {
    fn store(
        &self,
        key: &CacheKey,
        value: &CacheValue,
        version: &EntryVersion,
        expire_time: i64,
    ) -> Result<()>;

    fn remove(&self, key: &CacheKey) -> Result<()>;
}
