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

//! Swap/off-heap tier bridge of the entry cell.

use crate::{error::Result, swap::BatchSwapEntry, value::CacheValue, version::EntryVersion};

use super::{EntryFlags, EntryInner, MapEntry, ValPtr};

impl MapEntry {
    /// Promote the swapped/off-heap value into the live entry.
    ///
    /// Runs at most once per entry: the promote is guarded by the unswapped
    /// flag and only fires while the entry is still at its start version. A
    /// value whose expire time already passed is released instead.
    pub fn unswap(&self, ignore_flags: bool, need_val: bool) -> Result<Option<CacheValue>> {
        let mut inner = self.lock();
        self.unswap_locked(&mut inner, ignore_flags, need_val)
    }

    pub(crate) fn unswap_locked(
        &self,
        inner: &mut EntryInner,
        _ignore_flags: bool,
        need_val: bool,
    ) -> Result<Option<CacheValue>> {
        let cctx = self.context().clone();

        if !cctx.swap_or_offheap_enabled() {
            return Ok(None);
        }
        let swap = cctx.swap().expect("swap manager").clone();

        if !self.is_start_version(inner) || inner.flags.contains(EntryFlags::IS_UNSWAPPED) {
            return Ok(None);
        }

        let entry = if cctx.offheap_tiered() {
            let entry = swap.read_offheap_pointer(self.key())?;
            if let Some(swap_entry) = &entry {
                inner.val_ptr = swap_entry.offheap_ptr.map(ValPtr::Tiered);
            }
            entry
        } else if self.family().is_detached() {
            swap.read(self.key(), true, true, true)?
        } else {
            // Remove-on-read: the promoted value now lives here only.
            swap.read_and_remove(self.key())?
        };

        tracing::trace!("read swap entry [swapEntry={entry:?}, entry={self:?}]");

        inner.flags.insert(EntryFlags::IS_UNSWAPPED);

        let Some(swap_entry) = entry else {
            return Ok(None);
        };

        let delta = if swap_entry.expire_time == 0 {
            0
        } else {
            swap_entry.expire_time - cctx.now_millis()
        };

        if delta < 0 {
            // Expired while swapped out.
            self.release_swap_locked()?;
            self.clear_index_locked(None)?;
            return Ok(None);
        }

        let promoted = if cctx.offheap_tiered() {
            match (&inner.val_ptr, need_val) {
                (Some(ptr), true) => {
                    let (bytes, tag) = ptr.read(&cctx)?;
                    Some(CacheValue::from_parts(tag, bytes))
                }
                _ => None,
            }
        } else {
            Some(swap_entry.value())
        };

        self.update_locked(
            inner,
            promoted.clone(),
            swap_entry.expire_time,
            swap_entry.ttl,
            swap_entry.version.clone(),
        )?;

        // update_locked reset the pointer slot.
        if cctx.offheap_tiered() {
            if let Some(ptr) = swap_entry.offheap_ptr {
                inner.val_ptr = Some(ValPtr::Tiered(ptr));
            }
        }

        Ok(promoted)
    }

    /// Write the current live value to swap.
    ///
    /// Expired entries only drop their off-heap copy; values already living
    /// off-heap-only are not re-written, their off-heap eviction is merely
    /// re-enabled.
    pub(crate) fn swap_out_locked(&self, inner: &mut EntryInner) -> Result<()> {
        let cctx = self.context().clone();

        if !cctx.swap_or_offheap_enabled()
            || self.deleted_locked(inner)
            || !self.has_value_locked(inner)
            || self.family().is_detached()
        {
            return Ok(());
        }

        let swap = cctx.swap().expect("swap manager");
        let expire_time = inner.extras.expire_time();

        if expire_time > 0 && cctx.now_millis() >= expire_time {
            // The entry expired under us; never swap stale values.
            if cctx.offheap_tiered() {
                swap.remove_offheap(self.key());
                inner.val_ptr = None;
            }
            return Ok(());
        }

        if inner.value.is_none() && cctx.offheap_tiered() && inner.val_ptr.is_some() {
            tracing::trace!("value did not change, skip write swap entry: {self:?}");
            if swap.offheap_eviction_enabled() {
                swap.enable_offheap_eviction(self.key());
            }
            return Ok(());
        }

        let (bytes, tag) = self.value_bytes_locked(inner)?;

        swap.write(
            self.key(),
            crate::swap::SwapEntry {
                value_bytes: bytes,
                type_tag: tag,
                version: inner.version.clone(),
                ttl: inner.extras.ttl(),
                expire_time,
                offheap_ptr: None,
                key_loader: None,
                value_loader: None,
            },
        )?;

        tracing::trace!("wrote swap entry: {self:?}");
        Ok(())
    }

    /// Write the current live value to swap.
    pub fn swap_out(&self) -> Result<()> {
        let mut inner = self.lock();
        self.swap_out_locked(&mut inner)
    }

    /// Drop any swapped/off-heap copy of this key.
    pub(crate) fn release_swap_locked(&self) -> Result<()> {
        if self.context().swap_or_offheap_enabled() {
            self.context().swap().expect("swap manager").remove(self.key())?;
            tracing::trace!("removed swap entry [entry={self:?}]");
        }
        Ok(())
    }

    /// Mark obsolete without clearing the value and hand back a descriptor so
    /// the caller can flush many evictions in one swap write.
    pub fn evict_in_batch(&self, obsolete_ver: &EntryVersion) -> Result<Option<BatchSwapEntry>> {
        let cctx = self.context().clone();
        debug_assert!(cctx.swap_or_offheap_enabled());

        let mut inner = self.lock();

        let mut descriptor = None;

        if !self.family().has_readers(self.key())
            && self.mark_obsolete0_locked(&mut inner, obsolete_ver, false)
        {
            if !self.is_start_version(&inner) && self.has_value_locked(&inner) {
                let (bytes, tag) = self.value_bytes_locked(&inner)?;

                descriptor = Some(BatchSwapEntry {
                    key: self.key().clone(),
                    partition: self.partition(),
                    value_bytes: bytes,
                    type_tag: tag,
                    version: inner.version.clone(),
                    ttl: inner.extras.ttl(),
                    expire_time: inner.extras.expire_time(),
                    key_loader: None,
                    value_loader: None,
                });
            }

            self.clear_value_locked(&mut inner);
        }

        Ok(descriptor)
    }
}
