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

use std::sync::Arc;

use crate::{
    context::NodeId,
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Pending operation for a key in a transaction's write set.
#[derive(Debug, Clone)]
pub enum TxPending {
    Write(CacheValue),
    Remove,
}

/// The slice of a transaction the entry cell consumes.
///
/// Lock acquisition/commit ordering lives in the transaction manager; the
/// entry only identifies the transaction, asks what it has pending for the
/// key, and stamps its write version on commits.
pub trait Transaction: Send + Sync + 'static {
    /// Transaction id version.
    fn xid(&self) -> EntryVersion;

    /// Version assigned to this transaction's writes at commit.
    fn write_version(&self) -> EntryVersion;

    fn topology_version(&self) -> u32;

    fn is_local(&self) -> bool {
        true
    }

    /// Whether the transaction is still accepting operations.
    fn is_active(&self) -> bool;

    /// Sanity hook: does this transaction hold the entry lock for `key`?
    fn owns_lock(&self, _key: &CacheKey) -> bool {
        true
    }

    /// Pending write-set operation for `key`, if any.
    fn pending(&self, key: &CacheKey) -> Option<TxPending>;

    /// TTL the transaction will apply to `key`, if it set one.
    fn pending_ttl(&self, _key: &CacheKey) -> Option<i64> {
        None
    }

    /// Expire time the transaction will apply to `key`, if it set one.
    fn pending_expire_time(&self, _key: &CacheKey) -> Option<i64> {
        None
    }

    /// Whether `key` was removed within this transaction.
    fn removed(&self, key: &CacheKey) -> bool {
        matches!(self.pending(key), Some(TxPending::Remove))
    }

    fn originating_node(&self) -> NodeId;
}

/// Transaction manager surface.
pub trait TxManager: Send + Sync + 'static {
    /// Transaction bound to the current thread, if any.
    fn local_tx(&self) -> Option<Arc<dyn Transaction>>;

    /// User (explicitly started) transaction bound to the current thread.
    fn user_tx(&self) -> Option<Arc<dyn Transaction>> {
        self.local_tx()
    }

    /// Registers a version whose entry was removed while its lock may still
    /// be pending, so a later lock release can finish the cleanup.
    fn add_removed(&self, _version: &EntryVersion) {}
}

/// Manager with no transactions, for atomic caches.
#[derive(Debug, Default)]
pub struct NoopTxManager;

impl TxManager for NoopTxManager {
    fn local_tx(&self) -> Option<Arc<dyn Transaction>> {
        None
    }
}
