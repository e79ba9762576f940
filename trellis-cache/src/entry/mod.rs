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

//! Per-key entry cell.
//!
//! Every operation on a key is dispatched to exactly one [`MapEntry`]. The
//! entry is the lock, the value holder, the TTL tracker registration site,
//! the index-update site, the write-through sink, the swap handle and the
//! event source for its key. All mutable state sits behind one inline mutex;
//! store I/O happens outside that mutex on transactional paths and the
//! optimistic `start version` capture guards the re-locked commit.

mod get;
mod maint;
mod peek;
mod swap;
mod update;

pub use peek::{EvictionView, LazyEntry, VersionedView, WrappedEntry};

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bitflags::bitflags;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use trellis_common::strict_assert;

use crate::{
    context::{CacheContext, NodeId},
    error::{Error, Result},
    extras::Extras,
    mvcc::Mvcc,
    offheap::OffHeapRef,
    op::EntryFilter,
    ttl::{
        expire_time_in_past, to_expire_time, ExpiryPolicy, TTL_MINIMUM, TTL_NOT_CHANGED, TTL_ZERO,
    },
    value::{CacheKey, CacheValue},
    variant::EntryFamily,
    version::EntryVersion,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct EntryFlags: u8 {
        /// Deferred-delete tombstone.
        const IS_DELETED = 0x01;
        /// Swap has already been consulted for this entry.
        const IS_UNSWAPPED = 0x02;
    }
}

/// On-heap footprint of the entry itself, excluding extras, key and value
/// bytes. Recalculate whenever fields are added or removed.
const SIZE_OVERHEAD: usize = 77;

/// Off-heap pointer slot of the entry.
///
/// In off-heap-values mode the entry owns the blob and releases it when the
/// slot is replaced. In tiered mode the blob belongs to the swap manager and
/// the entry only carries the address.
#[derive(Debug)]
pub(crate) enum ValPtr {
    Owned(OffHeapRef),
    Tiered(u64),
}

impl ValPtr {
    fn read(&self, cctx: &CacheContext) -> Result<(Bytes, u8)> {
        match self {
            Self::Owned(handle) => handle.read(),
            Self::Tiered(ptr) => cctx
                .offheap()
                .ok_or_else(|| Error::offheap(anyhow::anyhow!("off-heap memory is not configured")))?
                .get(*ptr),
        }
    }
}

pub(crate) struct EntryInner {
    pub(crate) value: Option<CacheValue>,
    pub(crate) val_ptr: Option<ValPtr>,
    pub(crate) version: EntryVersion,
    pub(crate) extras: Extras,
    pub(crate) flags: EntryFlags,
}

/// The per-key entry cell.
pub struct MapEntry {
    cctx: Arc<CacheContext>,
    family: Arc<dyn EntryFamily>,
    key: CacheKey,
    hash: u32,
    /// Order component of the construction version; still matching the
    /// current version means the entry was never updated.
    start_version_order: u64,
    /// Bucket-chain successors, one per segment parity. Written only by the
    /// owning map under its bucket lock.
    next: [ArcSwapOption<MapEntry>; 2],
    inner: Mutex<EntryInner>,
}

impl MapEntry {
    pub fn new(
        cctx: Arc<CacheContext>,
        family: Arc<dyn EntryFamily>,
        key: CacheKey,
        value: Option<CacheValue>,
        ttl: i64,
    ) -> Result<Arc<Self>> {
        assert!(ttl >= 0, "ttl: {ttl}");

        let version = cctx.versions().next();
        let start_version_order = version.order();
        let hash = key.hash();

        let entry = Arc::new(Self {
            cctx,
            family,
            key,
            hash,
            start_version_order,
            next: [ArcSwapOption::empty(), ArcSwapOption::empty()],
            inner: Mutex::new(EntryInner {
                value: None,
                val_ptr: None,
                version,
                extras: Extras::default(),
                flags: EntryFlags::empty(),
            }),
        });

        {
            let mut inner = entry.inner.lock();
            let expire_time = to_expire_time(entry.cctx.clock(), ttl);
            inner.extras.set_ttl(ttl, expire_time);
            entry.set_value_locked(&mut inner, value)?;
        }

        Ok(entry)
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.cctx
    }

    pub(crate) fn family(&self) -> &dyn EntryFamily {
        self.family.as_ref()
    }

    pub fn is_internal(&self) -> bool {
        self.key.is_internal()
    }

    pub fn start_version_order(&self) -> u64 {
        self.start_version_order
    }

    pub fn partition(&self) -> u32 {
        self.family.partition(&self.key)
    }

    /// Bucket-chain successor for the given map segment.
    pub fn next(&self, seg_id: usize) -> Option<Arc<MapEntry>> {
        self.next[seg_id % 2].load_full()
    }

    /// Set the bucket-chain successor; only the owning map calls this, under
    /// its bucket lock.
    pub fn set_next(&self, seg_id: usize, next: Option<Arc<MapEntry>>) {
        self.next[seg_id % 2].store(next);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryInner> {
        self.inner.lock()
    }

    // ===== value store =====

    /// Replace the value slot; off-heap-values caches serialize into native
    /// memory instead of holding the heap object.
    pub(crate) fn set_value_locked(
        &self,
        inner: &mut EntryInner,
        value: Option<CacheValue>,
    ) -> Result<()> {
        match value {
            Some(value) => self.write_value_locked(inner, value),
            None => {
                self.clear_value_locked(inner);
                Ok(())
            }
        }
    }

    fn write_value_locked(&self, inner: &mut EntryInner, value: CacheValue) -> Result<()> {
        self.account_fs_data(inner, Some(&value));

        if !self.cctx.offheap_values_only() {
            inner.value = Some(value);
            inner.val_ptr = None;
            return Ok(());
        }

        let memory = self.cctx.offheap().expect("off-heap memory").clone();
        let bytes = value.value_bytes().clone();
        let tag = value.type_tag();

        match inner.val_ptr.as_mut() {
            Some(ValPtr::Owned(handle)) => handle.replace(&bytes, tag).inspect_err(|e| {
                tracing::error!("failed to serialize value off-heap [entry={self:?}]: {e}");
            })?,
            _ => {
                let ptr = memory.put(None, &bytes, tag).inspect_err(|e| {
                    tracing::error!("failed to serialize value off-heap [entry={self:?}]: {e}");
                })?;
                inner.val_ptr = Some(ValPtr::Owned(OffHeapRef::new(ptr, memory)));
            }
        }

        inner.value = None;
        Ok(())
    }

    pub(crate) fn clear_value_locked(&self, inner: &mut EntryInner) {
        self.account_fs_data(inner, None);
        inner.value = None;
        inner.val_ptr = None;
    }

    /// Report the serialized size delta to the data-size accountant of
    /// filesystem-block data caches before the slot changes.
    fn account_fs_data(&self, inner: &EntryInner, new: Option<&CacheValue>) {
        let Some(fs) = self.cctx.fs_data() else {
            return;
        };
        if self.family.is_near() || !fs.is_block_key(&self.key) {
            return;
        }

        let new_len = new.map(|v| v.len()).unwrap_or(0) as i64;
        let old_len = match (&inner.value, &inner.val_ptr) {
            (Some(value), _) => value.len() as i64,
            (None, Some(ptr)) => ptr
                .read(&self.cctx)
                .map(|(bytes, _)| bytes.len())
                .unwrap_or(0) as i64,
            (None, None) => 0,
        };

        let delta = new_len - old_len;
        if delta != 0 {
            fs.on_data_size_changed(delta);
        }
    }

    /// Value bytes plus type tag from whichever representation holds the
    /// value. Callers guarantee one does.
    pub(crate) fn value_bytes_locked(&self, inner: &EntryInner) -> Result<(Bytes, u8)> {
        if let Some(ptr) = &inner.val_ptr {
            strict_assert!(self.cctx.offheap_values_only() || self.cctx.offheap_tiered());
            return ptr.read(&self.cctx);
        }

        match &inner.value {
            Some(value) => Ok((value.value_bytes().clone(), value.type_tag())),
            None => Err(Error::codec(anyhow::anyhow!(
                "entry holds no value in either representation"
            ))),
        }
    }

    /// Current value, rehydrating from the off-heap representation if the
    /// heap slot is empty.
    pub(crate) fn raw_get_or_unmarshal_locked(
        &self,
        inner: &EntryInner,
    ) -> Result<Option<CacheValue>> {
        if let Some(value) = &inner.value {
            return Ok(Some(value.clone()));
        }
        if let Some(ptr) = &inner.val_ptr {
            let (bytes, tag) = ptr.read(&self.cctx)?;
            return Ok(Some(CacheValue::from_parts(tag, bytes)));
        }
        Ok(None)
    }

    pub(crate) fn has_value_locked(&self, inner: &EntryInner) -> bool {
        inner.value.is_some() || inner.val_ptr.is_some()
    }

    /// Value snapshot under the lock, as-is.
    pub fn raw_get(&self) -> Option<CacheValue> {
        self.inner.lock().value.clone()
    }

    pub fn raw_get_or_unmarshal(&self) -> Result<Option<CacheValue>> {
        let inner = self.inner.lock();
        self.raw_get_or_unmarshal_locked(&inner)
    }

    pub fn has_value(&self) -> bool {
        let inner = self.inner.lock();
        self.has_value_locked(&inner)
    }

    /// Unconditional in-place update under the next version. Maintenance
    /// hatch: no events, no index, no interceptor.
    pub fn raw_put(&self, value: CacheValue, ttl: i64) -> Result<Option<CacheValue>> {
        let mut inner = self.inner.lock();
        let old = inner.value.clone();
        let expire_time = to_expire_time(self.cctx.clock(), ttl);
        let ver = self.next_version_locked(&inner);
        self.update_locked(&mut inner, Some(value), expire_time, ttl, ver)?;
        Ok(old)
    }

    // ===== versions and state tests =====

    pub(crate) fn check_obsolete(&self, inner: &EntryInner) -> Result<()> {
        if inner.extras.obsolete_version().is_some() {
            return Err(Error::removed());
        }
        Ok(())
    }

    pub(crate) fn is_start_version(&self, inner: &EntryInner) -> bool {
        inner.version.node_order() == self.cctx.versions().node_order()
            && inner.version.order() == self.start_version_order
    }

    pub(crate) fn is_new_locked_inner(&self, inner: &EntryInner) -> Result<bool> {
        self.check_obsolete(inner)?;
        Ok(self.is_start_version(inner))
    }

    /// Whether the entry was never updated since construction.
    pub fn is_new(&self) -> Result<bool> {
        let inner = self.inner.lock();
        self.is_new_locked_inner(&inner)
    }

    pub fn version(&self) -> Result<EntryVersion> {
        let inner = self.inner.lock();
        self.check_obsolete(&inner)?;
        Ok(inner.version.clone())
    }

    pub(crate) fn next_version_locked(&self, inner: &EntryInner) -> EntryVersion {
        // Topology version never changes when deriving the next version.
        self.cctx.versions().next_after(&inner.version)
    }

    // ===== deferred delete =====

    pub(crate) fn deleted_locked(&self, inner: &EntryInner) -> bool {
        self.cctx.deferred_delete() && inner.flags.contains(EntryFlags::IS_DELETED)
    }

    pub fn deleted(&self) -> bool {
        if !self.cctx.deferred_delete() {
            return false;
        }
        let inner = self.inner.lock();
        self.deleted_locked(&inner)
    }

    pub(crate) fn set_deleted_locked(&self, inner: &mut EntryInner, deleted: bool) {
        strict_assert!(self.cctx.deferred_delete());
        strict_assert!(!self.family.is_detached() && !self.is_internal());

        if deleted {
            strict_assert!(!inner.flags.contains(EntryFlags::IS_DELETED));
            inner.flags.insert(EntryFlags::IS_DELETED);
            self.cctx.owner().decrement_public_size(&self.key);
        } else {
            strict_assert!(inner.flags.contains(EntryFlags::IS_DELETED));
            inner.flags.remove(EntryFlags::IS_DELETED);
            self.cctx.owner().increment_public_size(&self.key);
        }
    }

    // ===== obsolescence =====

    pub fn obsolete_version(&self) -> Option<EntryVersion> {
        self.inner.lock().extras.obsolete_version().cloned()
    }

    pub fn obsolete(&self) -> bool {
        self.inner.lock().extras.obsolete_version().is_some()
    }

    /// Obsolete with a version differing from the excluded one.
    pub fn obsolete_excluding(&self, exclude: &EntryVersion) -> bool {
        self.inner
            .lock()
            .extras
            .obsolete_version()
            .is_some_and(|v| v != exclude)
    }

    pub fn obsolete_or_deleted(&self) -> bool {
        let inner = self.inner.lock();
        inner.extras.obsolete_version().is_some()
            || (self.cctx.deferred_delete()
                && (self.deleted_locked(&inner) || !self.has_value_locked(&inner)))
    }

    /// Terminal transition. Fails (returns the current obsolete state without
    /// setting it) while lock candidates other than `ver` remain.
    pub(crate) fn mark_obsolete0_locked(
        &self,
        inner: &mut EntryInner,
        ver: &EntryVersion,
        clear: bool,
    ) -> bool {
        if inner.extras.obsolete_version().is_some() {
            return true;
        }

        let permitted = inner.extras.mvcc().map_or(true, |mvcc| mvcc.is_empty(&[ver]));
        if permitted {
            inner.extras.set_obsolete_version(Some(ver.clone()));
            if clear {
                self.clear_value_locked(inner);
            }
        }

        inner.extras.obsolete_version().is_some()
    }

    pub fn mark_obsolete(&self, ver: &EntryVersion) -> bool {
        let obsolete = {
            let mut inner = self.inner.lock();
            self.mark_obsolete0_locked(&mut inner, ver, true)
        };

        if obsolete {
            self.family.on_marked_obsolete(&self.key);
        }

        obsolete
    }

    /// Obsolete only when the entry holds no value or is expired. Under
    /// deferred delete a live entry gets a tombstone and is enqueued with the
    /// sweeper instead.
    pub fn mark_obsolete_if_empty(&self, ver: Option<EntryVersion>) -> Result<bool> {
        let mut obsolete = false;
        let mut deferred: Option<EntryVersion> = None;

        {
            let mut inner = self.inner.lock();

            if inner.extras.obsolete_version().is_some() {
                return Ok(false);
            }

            if !self.has_value_locked(&inner) || self.check_expired_locked(&mut inner)? {
                let ver = ver.unwrap_or_else(|| self.next_version_locked(&inner));

                if self.cctx.deferred_delete()
                    && !self.is_start_version(&inner)
                    && !self.family.is_detached()
                    && !self.is_internal()
                {
                    if !self.deleted_locked(&inner) {
                        self.update_locked(&mut inner, None, 0, 0, ver.clone())?;
                        self.set_deleted_locked(&mut inner, true);
                        deferred = Some(ver);
                    }
                } else {
                    obsolete = self.mark_obsolete0_locked(&mut inner, &ver, true);
                }
            }
        }

        if obsolete {
            self.family.on_marked_obsolete(&self.key);
        }
        if let Some(ver) = deferred {
            self.cctx.owner().on_deferred_delete(&self.key, &ver);
        }

        Ok(obsolete)
    }

    /// Deferred-delete sweeper helper: obsolete only if the entry is still at
    /// exactly `ver`.
    pub fn mark_obsolete_version(&self, ver: &EntryVersion) -> bool {
        strict_assert!(self.cctx.deferred_delete());

        let marked = {
            let mut inner = self.inner.lock();

            if inner.extras.obsolete_version().is_some() {
                return true;
            }
            if &inner.version != ver {
                return false;
            }

            self.mark_obsolete0_locked(&mut inner, ver, true)
        };

        if marked {
            self.family.on_marked_obsolete(&self.key);
        }

        marked
    }

    // ===== the update primitive =====

    /// Commit a new value, TTL pair and version, keeping the eager-TTL
    /// tracker registration in step with the expire time.
    pub(crate) fn update_locked(
        &self,
        inner: &mut EntryInner,
        value: Option<CacheValue>,
        expire_time: i64,
        ttl: i64,
        ver: EntryVersion,
    ) -> Result<()> {
        strict_assert!(ttl != TTL_ZERO && ttl != TTL_NOT_CHANGED && ttl >= 0);

        let old_expire = inner.extras.expire_time();

        if old_expire != 0 && expire_time != old_expire && self.cctx.eager_ttl() {
            if let Some(tracker) = self.cctx.ttl_tracker() {
                tracker.remove_tracked(&self.key, old_expire);
            }
        }

        self.set_value_locked(inner, value)?;
        inner.extras.set_ttl(ttl, expire_time);

        if expire_time != 0 && expire_time != old_expire && self.cctx.eager_ttl() {
            if let Some(tracker) = self.cctx.ttl_tracker() {
                tracker.add_tracked(&self.key, expire_time);
            }
        }

        inner.version = ver;
        Ok(())
    }

    pub(crate) fn update_ttl_locked(&self, inner: &mut EntryInner, ttl: i64) {
        strict_assert!(ttl >= 0 || ttl == TTL_ZERO);

        let (ttl, expire_time) = if ttl == TTL_ZERO {
            (TTL_MINIMUM, expire_time_in_past(self.cctx.clock()))
        } else {
            (ttl, to_expire_time(self.cctx.clock(), ttl))
        };

        let old_expire = inner.extras.expire_time();

        if old_expire != 0 && expire_time != old_expire && self.cctx.eager_ttl() {
            if let Some(tracker) = self.cctx.ttl_tracker() {
                tracker.remove_tracked(&self.key, old_expire);
            }
        }

        inner.extras.set_ttl(ttl, expire_time);

        if expire_time != 0 && expire_time != old_expire && self.cctx.eager_ttl() {
            if let Some(tracker) = self.cctx.ttl_tracker() {
                tracker.add_tracked(&self.key, expire_time);
            }
        }
    }

    /// Refresh the TTL per the access rule of the given policy.
    pub(crate) fn update_ttl_with_policy_locked(
        &self,
        inner: &mut EntryInner,
        policy: &dyn ExpiryPolicy,
    ) {
        let ttl = policy.for_access();
        if ttl != TTL_NOT_CHANGED {
            self.update_ttl_locked(inner, ttl);
            policy.on_ttl_updated(&self.key, &inner.version);
        }
    }

    /// External TTL refresh entry point. The version argument records the
    /// caller's expectation but the refresh applies unconditionally.
    pub fn update_ttl(&self, _ver: Option<&EntryVersion>, ttl: i64) {
        let mut inner = self.inner.lock();
        self.update_ttl_locked(&mut inner, ttl);
    }

    /// Detect and clean an in-place expiry: releases swap and clears the
    /// index, leaving the caller to decide tombstone vs obsolete.
    pub(crate) fn check_expired_locked(&self, inner: &mut EntryInner) -> Result<bool> {
        let expire_time = inner.extras.expire_time();
        if expire_time > 0 {
            let delta = expire_time - self.cctx.now_millis();
            tracing::trace!("checked expiration time for entry [timeLeft={delta}]");

            if delta <= 0 {
                self.release_swap_locked()?;
                let prev = self.save_value_for_index_locked(inner)?;
                self.clear_index_locked(prev.as_ref())?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    // ===== index =====

    pub(crate) fn update_index_locked(
        &self,
        value: &CacheValue,
        expire_time: i64,
        ver: &EntryVersion,
        _prev: Option<&CacheValue>,
    ) -> Result<()> {
        if let Some(index) = self.cctx.index() {
            index
                .store(&self.key, value, ver, expire_time)
                .map_err(|e| Error::index(e))?;
        }
        Ok(())
    }

    pub(crate) fn clear_index_locked(&self, _prev: Option<&CacheValue>) -> Result<()> {
        if let Some(index) = self.cctx.index() {
            index.remove(&self.key).map_err(|e| Error::index(e))?;
        }
        Ok(())
    }

    /// The previous value, only when the index requires it on clears.
    pub(crate) fn save_value_for_index_locked(
        &self,
        inner: &EntryInner,
    ) -> Result<Option<CacheValue>> {
        if !self.cctx.config().index_previous_value {
            return Ok(None);
        }
        self.raw_get_or_unmarshal_locked(inner)
    }

    // ===== filters =====

    /// Evaluate a filter against the current value snapshot.
    pub(crate) fn eval_filter(&self, filter: Option<&EntryFilter>) -> Result<bool> {
        match filter {
            None => Ok(true),
            Some(filter) => {
                let value = {
                    let inner = self.inner.lock();
                    self.raw_get_or_unmarshal_locked(&inner)?
                };
                Ok(filter(value.as_ref()))
            }
        }
    }

    // ===== mvcc =====

    /// Install or replace the candidate list. The lock manager drives this.
    pub fn set_mvcc(&self, mvcc: Option<Mvcc>) {
        self.inner.lock().extras.set_mvcc(mvcc);
    }

    pub(crate) fn locked_by_locked(&self, inner: &EntryInner, ver: &EntryVersion) -> bool {
        inner.extras.mvcc().is_some_and(|mvcc| mvcc.is_owned_by(ver))
    }

    // ===== attributes =====

    pub fn add_attr(&self, name: &str, value: Bytes) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        inner
            .extras
            .with_attrs_mut(|attrs| attrs.insert(name.into(), value))
    }

    pub fn attr(&self, name: &str) -> Option<Bytes> {
        let inner = self.inner.lock();
        inner.extras.attrs().and_then(|attrs| attrs.get(name).cloned())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn remove_attr(&self, name: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        inner.extras.with_attrs_mut(|attrs| attrs.remove(name))
    }

    /// Remove the attribute only if it currently equals `value`.
    pub fn remove_attr_eq(&self, name: &str, value: &Bytes) -> bool {
        let mut inner = self.inner.lock();
        inner.extras.with_attrs_mut(|attrs| {
            if attrs.get(name) == Some(value) {
                attrs.remove(name);
                true
            } else {
                false
            }
        })
    }

    pub fn attr_if_absent(&self, name: &str, value: Bytes) -> Bytes {
        let mut inner = self.inner.lock();
        inner
            .extras
            .with_attrs_mut(|attrs| attrs.entry(name.into()).or_insert(value).clone())
    }

    pub fn replace_attr(&self, name: &str, cur: &Bytes, new: Bytes) -> bool {
        let mut inner = self.inner.lock();
        inner.extras.with_attrs_mut(|attrs| {
            if attrs.get(name) == Some(cur) {
                attrs.insert(name.into(), new);
                true
            } else {
                false
            }
        })
    }

    // ===== footprint =====

    /// On-heap footprint of the entry:
    /// `77 + extras + key bytes + max(1, value bytes)`.
    pub fn memory_size(&self) -> usize {
        let inner = self.inner.lock();
        let value_len = inner.value.as_ref().map(|v| v.len()).unwrap_or(0);
        SIZE_OVERHEAD + inner.extras.size() + self.key.len() + value_len.max(1)
    }

    // ===== ttl accessors =====

    pub fn raw_ttl(&self) -> i64 {
        self.inner.lock().extras.ttl()
    }

    pub fn raw_expire_time(&self) -> i64 {
        self.inner.lock().extras.expire_time()
    }

    /// TTL visible to the caller: a pending transactional TTL for this key
    /// wins over the entry's own.
    pub fn ttl(&self) -> Result<i64> {
        if let Some(tx) = self.cctx.tx_manager().local_tx() {
            if let Some(ttl) = tx.pending_ttl(&self.key) {
                if ttl > 0 {
                    return Ok(ttl);
                }
            }
        }

        let inner = self.inner.lock();
        self.check_obsolete(&inner)?;
        Ok(inner.extras.ttl())
    }

    pub fn expire_time(&self) -> Result<i64> {
        if let Some(tx) = self.cctx.tx_manager().local_tx() {
            if let Some(expire_time) = tx.pending_expire_time(&self.key) {
                if expire_time > 0 {
                    return Ok(expire_time);
                }
            }
        }

        let inner = self.inner.lock();
        self.check_obsolete(&inner)?;
        Ok(inner.extras.expire_time())
    }

    // ===== event helper =====

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_event(
        &self,
        event_type: crate::event::EventType,
        node: NodeId,
        tx_xid: Option<EntryVersion>,
        ver: Option<EntryVersion>,
        new_value: Option<CacheValue>,
        has_new: bool,
        old_value: Option<CacheValue>,
        has_old: bool,
        subject: Option<crate::context::SubjectId>,
        transform_closure: Option<Box<str>>,
        task: Option<Box<str>>,
    ) {
        self.cctx.events().record(crate::event::EntryEvent {
            partition: self.partition(),
            key: self.key.clone(),
            node,
            tx_xid,
            version: ver,
            event_type,
            new_value,
            has_new,
            old_value,
            has_old,
            subject,
            transform_closure,
            task,
        });
    }
}

impl std::fmt::Debug for MapEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Best-effort: never block on the entry lock from Debug.
        let mut s = f.debug_struct("MapEntry");
        s.field("key", &self.key).field("hash", &self.hash);
        if let Some(inner) = self.inner.try_lock() {
            s.field("ver", &inner.version)
                .field("hasValue", &self.has_value_locked(&inner))
                .field("flags", &inner.flags);
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests;
