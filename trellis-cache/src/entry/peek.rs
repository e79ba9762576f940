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

//! Peek/inspect surface: non-mutating reads, snapshots and wrappers.
//!
//! The single exception to "peek never mutates" is a GLOBAL peek detecting an
//! expired value, which marks the entry obsolete and asks the owning map to
//! drop it.

use std::sync::Arc;

use trellis_common::strict_assert;

use crate::{
    conflict::VersionedEntryView,
    error::Result,
    mvcc::MvccCandidate,
    op::{EntryFilter, EntryInfo, PeekMode, Peeked},
    ttl::ExpiryPolicy,
    tx::{Transaction, TxPending},
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

use super::{EntryInner, MapEntry};

/// Externally visible key/value snapshot.
#[derive(Debug, Clone)]
pub struct WrappedEntry {
    pub key: CacheKey,
    pub value: Option<CacheValue>,
}

/// Deferred-value snapshot: dereferencing re-peeks the entry.
#[derive(Clone)]
pub struct LazyEntry {
    entry: Arc<MapEntry>,
}

impl LazyEntry {
    pub fn key(&self) -> &CacheKey {
        self.entry.key()
    }

    /// Current visible value; every call re-peeks.
    pub fn value(&self) -> Option<CacheValue> {
        self.entry.peek_visible_value()
    }
}

impl std::fmt::Debug for LazyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEntry").field("key", self.entry.key()).finish()
    }
}

/// Façade handed to the eviction policy.
#[derive(Clone)]
pub struct EvictionView {
    entry: Arc<MapEntry>,
}

impl EvictionView {
    pub fn key(&self) -> &CacheKey {
        self.entry.key()
    }

    pub fn value(&self) -> Option<CacheValue> {
        self.entry.raw_get()
    }

    /// Evict the backing entry, without writing it to swap.
    pub fn evict(&self, obsolete_ver: &EntryVersion) -> Result<bool> {
        self.entry.evict_internal(false, obsolete_ver, None)
    }
}

/// Version-aware façade for user code.
#[derive(Debug, Clone)]
pub struct VersionedView {
    pub key: CacheKey,
    pub version: EntryVersion,
}

impl MapEntry {
    /// Peek honoring one mode. Filter rejections surface as `None`.
    pub fn peek(
        &self,
        mode: PeekMode,
        filter: Option<&EntryFilter>,
    ) -> Result<Option<CacheValue>> {
        let tx = self.context().tx_manager().local_tx();
        Ok(self.peek0(false, mode, filter, tx.as_deref())?.into_value())
    }

    /// Peek through a list of modes, returning the first definite value.
    pub fn peek_modes(
        &self,
        modes: &[PeekMode],
        filter: Option<&EntryFilter>,
    ) -> Result<Option<CacheValue>> {
        let tx = self.context().tx_manager().local_tx();
        for mode in modes {
            match self.peek0(false, *mode, filter, tx.as_deref())? {
                Peeked::Value(value) => return Ok(value),
                Peeked::FilterFailed => return Ok(None),
                Peeked::Miss => {}
            }
        }
        Ok(None)
    }

    /// Peek across the in-memory, off-heap and swap tiers.
    pub fn peek_tiers(
        &self,
        heap: bool,
        offheap: bool,
        swap: bool,
        topology_version: u32,
        expiry: Option<&dyn ExpiryPolicy>,
    ) -> Result<Option<CacheValue>> {
        strict_assert!(heap || offheap || swap);

        if heap {
            if let Peeked::Value(value) = self.peek_global(topology_version, None, expiry)? {
                if value.is_some() {
                    return Ok(value);
                }
            }
        }

        if offheap || swap {
            let Some(swap_mgr) = self.context().swap() else {
                return Ok(None);
            };
            let entry = swap_mgr.read(self.key(), true, offheap, swap)?;
            return Ok(entry.map(|e| e.value()));
        }

        Ok(None)
    }

    /// Mode dispatch used by the public peeks.
    pub fn peek0(
        &self,
        fail_fast: bool,
        mode: PeekMode,
        filter: Option<&EntryFilter>,
        tx: Option<&dyn Transaction>,
    ) -> Result<Peeked> {
        let top_ver = tx
            .map(|tx| tx.topology_version())
            .unwrap_or_else(|| self.context().affinity().topology_version());

        match mode {
            PeekMode::Tx => Ok(self.peek_tx(fail_fast, filter, tx)),
            PeekMode::Global | PeekMode::NearOnly | PeekMode::PartitionedOnly => {
                self.peek_global(top_ver, filter, None)
            }
            PeekMode::Smart => {
                // Only an ACTIVE transaction may still enlist new values;
                // otherwise its entries were already validated and a second
                // filter pass against them would always fail.
                match tx {
                    Some(tx) if tx.is_active() => self.peek_tx_then_global(fail_fast, filter, tx),
                    _ => self.peek_global(top_ver, filter, None),
                }
            }
            PeekMode::Swap => self.peek_swap(filter),
            PeekMode::Db => self.peek_db(filter),
        }
    }

    fn peek_tx(
        &self,
        _fail_fast: bool,
        filter: Option<&EntryFilter>,
        tx: Option<&dyn Transaction>,
    ) -> Peeked {
        let Some(tx) = tx else {
            return Peeked::Miss;
        };

        match tx.pending(self.key()) {
            None => Peeked::Miss,
            Some(TxPending::Write(value)) => match filter {
                Some(filter) if !filter(Some(&value)) => Peeked::FilterFailed,
                _ => Peeked::Value(Some(value)),
            },
            Some(TxPending::Remove) => match filter {
                Some(filter) if !filter(None) => Peeked::FilterFailed,
                _ => Peeked::Value(None),
            },
        }
    }

    fn peek_tx_then_global(
        &self,
        fail_fast: bool,
        filter: Option<&EntryFilter>,
        tx: &dyn Transaction,
    ) -> Result<Peeked> {
        // A transaction value wins, including a pending delete.
        match self.peek_tx(fail_fast, filter, Some(tx)) {
            Peeked::Miss => self.peek_global(tx.topology_version(), filter, None),
            peeked => Ok(peeked),
        }
    }

    pub(crate) fn peek_global(
        &self,
        topology_version: u32,
        filter: Option<&EntryFilter>,
        expiry: Option<&dyn ExpiryPolicy>,
    ) -> Result<Peeked> {
        if !self.family().is_valid(topology_version) {
            return Ok(Peeked::Miss);
        }

        let mut rmv = false;

        let result = loop {
            let (ver, val) = {
                let mut inner = self.lock();

                if self.check_expired_locked(&mut inner)? {
                    let next_ver = self.next_version_locked(&inner);
                    rmv = self.mark_obsolete0_locked(&mut inner, &next_ver, true);
                    break Ok(Peeked::Miss);
                }

                if let Err(e) = self.check_obsolete(&inner) {
                    break Err(e);
                }

                let ver = inner.version.clone();
                let val = self.raw_get_or_unmarshal_locked(&inner)?;

                if val.is_some() {
                    if let Some(policy) = expiry {
                        self.update_ttl_with_policy_locked(&mut inner, policy);
                    }
                }

                (ver, val)
            };

            match filter {
                None => break Ok(Peeked::Value(val)),
                Some(f) => {
                    if !f(val.as_ref()) {
                        break Ok(Peeked::FilterFailed);
                    }
                    // Retry when a concurrent change invalidated the filter
                    // decision.
                    let current = {
                        let inner = self.lock();
                        self.check_obsolete(&inner)?;
                        inner.version.clone()
                    };
                    if ver == current {
                        break Ok(Peeked::Value(val));
                    }
                }
            }
        };

        if rmv {
            self.family().on_marked_obsolete(self.key());
            self.context().owner().remove_entry(self.key());
        }

        result
    }

    fn peek_swap(&self, filter: Option<&EntryFilter>) -> Result<Peeked> {
        if !self.eval_filter(filter)? {
            return Ok(Peeked::FilterFailed);
        }

        {
            let mut inner = self.lock();
            if self.check_expired_locked(&mut inner)? {
                return Ok(Peeked::Miss);
            }
        }

        let Some(swap) = self.context().swap() else {
            return Ok(Peeked::Miss);
        };

        Ok(match swap.read(self.key(), true, true, true)? {
            Some(entry) => Peeked::Value(Some(entry.value())),
            None => Peeked::Miss,
        })
    }

    fn peek_db(&self, filter: Option<&EntryFilter>) -> Result<Peeked> {
        if !self.eval_filter(filter)? {
            return Ok(Peeked::FilterFailed);
        }

        {
            let mut inner = self.lock();
            if self.check_expired_locked(&mut inner)? {
                return Ok(Peeked::Miss);
            }
        }

        let Some(store) = self.context().store() else {
            return Ok(Peeked::Miss);
        };

        let tx = self.context().tx_manager().local_tx();
        Ok(match store.load(tx.as_deref(), self.key())? {
            Some(value) => Peeked::Value(Some(value)),
            None => Peeked::Miss,
        })
    }

    /// Value visible to the current thread: the transaction's pending value
    /// if one exists, the committed value otherwise.
    pub fn peek_visible_value(&self) -> Option<CacheValue> {
        if let Some(tx) = self.context().tx_manager().user_tx() {
            match tx.pending(self.key()) {
                Some(TxPending::Write(value)) => return Some(value),
                Some(TxPending::Remove) => return None,
                None => {}
            }
        }

        if self.family().is_detached() {
            return self.raw_get();
        }

        let top_ver = self.context().affinity().topology_version();
        match self.peek_global(top_ver, None, None) {
            Ok(peeked) => peeked.into_value(),
            // Obsolete entries are re-fetched by the owner; nothing visible
            // here.
            Err(_) => None,
        }
    }

    /// Snapshot to an externally visible key/value record, honoring the
    /// current user transaction.
    pub fn wrap(&self) -> Result<WrappedEntry> {
        let value = if let Some(tx) = self.context().tx_manager().user_tx() {
            match tx.pending(self.key()) {
                Some(TxPending::Write(value)) => Some(value),
                Some(TxPending::Remove) => None,
                None => self.raw_get_or_unmarshal()?,
            }
        } else {
            self.raw_get_or_unmarshal()?
        };

        Ok(WrappedEntry {
            key: self.key().clone(),
            value,
        })
    }

    pub fn wrap_lazy(self: &Arc<Self>) -> LazyEntry {
        LazyEntry {
            entry: self.clone(),
        }
    }

    pub fn wrap_eviction(self: &Arc<Self>) -> EvictionView {
        EvictionView {
            entry: self.clone(),
        }
    }

    pub fn wrap_versioned(&self) -> VersionedView {
        let inner = self.lock();
        VersionedView {
            key: self.key().clone(),
            version: inner.version.clone(),
        }
    }

    /// Read the current value (promoting from swap if the entry is new) and
    /// snapshot it with TTL, expire time, conflict version and new-flag.
    pub fn versioned_entry(&self) -> Result<VersionedEntryView> {
        let mut inner = self.lock();
        self.versioned_entry_locked(&mut inner)
    }

    pub(crate) fn versioned_entry_locked(
        &self,
        inner: &mut EntryInner,
    ) -> Result<VersionedEntryView> {
        let is_new = self.is_start_version(inner);

        let value = if is_new {
            self.unswap_locked(inner, true, true)?
        } else {
            self.raw_get_or_unmarshal_locked(inner)?
        };

        Ok(VersionedEntryView {
            key: self.key().clone(),
            value,
            ttl: inner.extras.ttl(),
            expire_time: inner.extras.expire_time(),
            version: inner.version.conflict_version().clone(),
            is_new,
        })
    }

    /// Snapshot served to preloader/replication peers; absent for obsolete
    /// entries.
    pub fn info(&self) -> Option<EntryInfo> {
        let inner = self.lock();

        if inner.extras.obsolete_version().is_some() {
            return None;
        }

        let expire_time = inner.extras.expire_time();
        let expired = expire_time != 0 && expire_time <= self.context().now_millis();

        let value = if expired {
            None
        } else {
            self.raw_get_or_unmarshal_locked(&inner).ok().flatten()
        };

        Some(EntryInfo {
            key: self.key().clone(),
            version: inner.version.clone(),
            ttl: inner.extras.ttl(),
            expire_time,
            is_new: self.is_start_version(&inner),
            deleted: self.deleted_locked(&inner),
            value,
        })
    }

    /// Value bytes only when the entry is still at the requested version.
    pub fn value_bytes(&self, ver: Option<&EntryVersion>) -> Result<Option<CacheValue>> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;

        if ver.is_none() || ver == Some(&inner.version) {
            return self.raw_get_or_unmarshal_locked(&inner);
        }

        Ok(None)
    }

    /// Scan visibility: not obsolete, not deleted, passes the filter, and
    /// not removed by the current thread's transaction.
    pub fn visitable(&self, filter: Option<&EntryFilter>) -> bool {
        if self.obsolete_or_deleted() {
            return false;
        }

        match self.eval_filter(filter) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::error!("an exception was thrown while filter checking: {e}");
                return false;
            }
        }

        match self.context().tx_manager().local_tx() {
            Some(tx) => !tx.removed(self.key()),
            None => true,
        }
    }

    // ===== lock-candidate queries =====

    pub fn has_lock_candidate(&self, ver: &EntryVersion) -> Result<bool> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner.extras.mvcc().is_some_and(|m| m.has_candidate(ver)))
    }

    pub fn has_lock_candidate_for_thread(&self, thread_id: u64) -> Result<bool> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner
            .extras
            .mvcc()
            .is_some_and(|m| m.local_candidate(thread_id).is_some()))
    }

    pub fn locked_by_any(&self, exclude: &[&EntryVersion]) -> Result<bool> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner.extras.mvcc().is_some_and(|m| !m.is_empty(exclude)))
    }

    pub fn locked_by(&self, ver: &EntryVersion) -> Result<bool> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(self.locked_by_locked(&inner, ver))
    }

    pub fn locked_by_thread(&self, thread_id: u64) -> Result<bool> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner
            .extras
            .mvcc()
            .is_some_and(|m| m.is_locally_owned_by_thread(thread_id, &[])))
    }

    pub fn locked_by_thread_excluding(
        &self,
        thread_id: u64,
        exclude: &EntryVersion,
    ) -> Result<bool> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner
            .extras
            .mvcc()
            .is_some_and(|m| m.is_locally_owned_by_thread(thread_id, &[exclude])))
    }

    pub fn locked_locally(&self, lock_ver: &EntryVersion) -> Result<bool> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner
            .extras
            .mvcc()
            .is_some_and(|m| m.is_locally_owned(lock_ver)))
    }

    pub fn locked_locally_by_id_or_thread(
        &self,
        lock_ver: &EntryVersion,
        thread_id: u64,
    ) -> bool {
        let inner = self.lock();
        inner
            .extras
            .mvcc()
            .is_some_and(|m| m.is_locally_owned_by_id_or_thread(lock_ver, thread_id))
    }

    /// No obsolete check; safe to call on entries in any state.
    pub fn locked_by_unsafe(&self, ver: &EntryVersion) -> bool {
        let inner = self.lock();
        inner.extras.mvcc().is_some_and(|m| m.is_owned_by(ver))
    }

    pub fn locked_by_thread_unsafe(&self, thread_id: u64) -> bool {
        let inner = self.lock();
        inner
            .extras
            .mvcc()
            .is_some_and(|m| m.is_locally_owned_by_thread(thread_id, &[]))
    }

    pub fn locked_locally_unsafe(&self, lock_ver: &EntryVersion) -> bool {
        let inner = self.lock();
        inner
            .extras
            .mvcc()
            .is_some_and(|m| m.is_locally_owned(lock_ver))
    }

    pub fn has_lock_candidate_unsafe(&self, ver: &EntryVersion) -> bool {
        let inner = self.lock();
        inner.extras.mvcc().is_some_and(|m| m.has_candidate(ver))
    }

    pub fn local_candidates(&self, exclude: &[&EntryVersion]) -> Result<Vec<MvccCandidate>> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner
            .extras
            .mvcc()
            .map(|m| m.local_candidates(exclude).into_iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn candidate(&self, ver: &EntryVersion) -> Result<Option<MvccCandidate>> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner.extras.mvcc().and_then(|m| m.candidate(ver).cloned()))
    }

    pub fn local_candidate(&self, thread_id: u64) -> Result<Option<MvccCandidate>> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner
            .extras
            .mvcc()
            .and_then(|m| m.local_candidate(thread_id).cloned()))
    }

    pub fn candidate_for(
        &self,
        node: crate::context::NodeId,
        thread_id: u64,
    ) -> Result<Option<MvccCandidate>> {
        let local = node == self.context().local_node();

        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner.extras.mvcc().and_then(|m| {
            if local {
                m.local_candidate(thread_id).cloned()
            } else {
                m.remote_candidate(node, thread_id).cloned()
            }
        }))
    }

    pub fn local_owner(&self) -> Result<Option<MvccCandidate>> {
        let inner = self.lock();
        self.check_obsolete(&inner)?;
        Ok(inner.extras.mvcc().and_then(|m| m.local_owner().cloned()))
    }
}
