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
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Origin tag of an update for cross-data-center replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrType {
    /// Not replicated.
    None,
    /// Originated on a primary node of this data center.
    Primary,
    /// Originated on a backup node of this data center.
    Backup,
    /// Preloaded/rebalanced value.
    Preload,
}

/// Cross-data-center replication dispatcher.
pub trait Replicator: Send + Sync + 'static {
    #[allow(clippy::too_many_arguments)]
    fn replicate(
        &self,
        key: &CacheKey,
        value: Option<&CacheValue>,
        ttl: i64,
        expire_time: i64,
        conflict_version: &EntryVersion,
        dr_type: DrType,
    );
}
