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

//! Maintenance operations: pokes, initial loads, invalidation, clearing,
//! TTL expiry and eviction.

use trellis_common::strict_assert;

use crate::{
    dr::DrType,
    error::Result,
    event::EventType,
    op::EntryFilter,
    swap::SwapEntry,
    ttl::to_expire_time,
    value::CacheValue,
    version::EntryVersion,
};

use super::MapEntry;

impl MapEntry {
    /// Update the value in place without an externally observable version
    /// change. Maintenance hatch: the interceptor is deliberately bypassed
    /// and no events fire; the index is refreshed under the next version.
    pub fn poke(&self, val: CacheValue) -> Result<Option<CacheValue>> {
        let old;

        {
            let mut inner = self.lock();
            self.check_obsolete(&inner)?;

            if self.is_start_version(&inner) {
                self.unswap_locked(&mut inner, true, true)?;
            }

            if self.deleted_locked(&inner) {
                return Ok(None);
            }

            old = self.raw_get_or_unmarshal_locked(&inner)?;

            let next_ver = self.next_version_locked(&inner);
            let expire_time = inner.extras.expire_time();
            let ttl = inner.extras.ttl();

            self.update_index_locked(&val, expire_time, &next_ver, old.as_ref())?;
            self.update_locked(&mut inner, Some(val.clone()), expire_time, ttl, next_ver)?;
        }

        tracing::debug!("poked cache entry [newVal={val:?}, oldVal={old:?}, entry={self:?}]");

        Ok(old)
    }

    /// Install a value only if the entry is new (or tombstoned, unless this
    /// is a preload). Load semantics: the version is adopted, not advanced.
    #[allow(clippy::too_many_arguments)]
    pub fn initial_value(
        &self,
        val: Option<CacheValue>,
        ver: EntryVersion,
        ttl: i64,
        expire_time: i64,
        preload: bool,
        topology_version: u32,
        dr_type: DrType,
    ) -> Result<bool> {
        let cctx = self.context().clone();

        let mut inner = self.lock();
        self.check_obsolete(&inner)?;

        if !self.is_start_version(&inner) && !(!preload && self.deleted_locked(&inner)) {
            return Ok(false);
        }

        let expire_time = if expire_time < 0 {
            to_expire_time(cctx.clock(), ttl)
        } else {
            expire_time
        };

        if let Some(value) = &val {
            self.update_index_locked(value, expire_time, &ver, None)?;
        }

        self.update_locked(&mut inner, val.clone(), expire_time, ttl, ver.clone())?;

        let mut skip_query_notify = false;

        match &val {
            None => {
                skip_query_notify = true;

                if cctx.deferred_delete() && !self.is_internal() {
                    strict_assert!(!self.deleted_locked(&inner));
                    self.set_deleted_locked(&mut inner, true);
                }
            }
            Some(_) => {
                if self.deleted_locked(&inner) {
                    self.set_deleted_locked(&mut inner, false);
                }
            }
        }

        self.replicate_locked(&inner, val.as_ref(), &ver, dr_type);

        if !skip_query_notify {
            if cctx.is_local()
                || cctx.is_replicated()
                || cctx.affinity().is_primary(self.key(), topology_version)
            {
                cctx.continuous_queries()
                    .on_entry_updated(self.key(), val.as_ref(), None, preload);
            }

            cctx.data_structures().on_entry_updated(self.key(), false);
        }

        // Local stores receive preloaded values as well.
        if let Some(store) = cctx.store() {
            if store.is_local() {
                if let Some(value) = &val {
                    store.put(None, self.key(), value, &ver)?;
                }
            }
        }

        Ok(true)
    }

    /// Install a value promoted from swap, only while the entry is new.
    pub fn initial_value_from_swap(&self, unswapped: SwapEntry) -> Result<bool> {
        let mut inner = self.lock();
        self.check_obsolete(&inner)?;

        if !self.is_start_version(&inner) {
            return Ok(false);
        }

        let val = unswapped.value();

        self.update_locked(
            &mut inner,
            Some(val),
            unswapped.expire_time,
            unswapped.ttl,
            unswapped.version,
        )?;

        Ok(true)
    }

    /// Swap the value only if the entry is still at `cur_ver`. Load
    /// semantics: issues a fresh version when none is supplied.
    pub fn versioned_value(
        &self,
        val: CacheValue,
        cur_ver: Option<&EntryVersion>,
        new_ver: Option<EntryVersion>,
    ) -> Result<bool> {
        let mut inner = self.lock();
        self.check_obsolete(&inner)?;

        if let Some(cur_ver) = cur_ver {
            if cur_ver != &inner.version {
                return Ok(false);
            }
        }

        if inner.value.as_ref() != Some(&val) {
            let new_ver = new_ver.unwrap_or_else(|| self.next_version_locked(&inner));

            let old = self.raw_get_or_unmarshal_locked(&inner)?;
            let ttl = inner.extras.ttl();
            let expire_time = to_expire_time(self.context().clock(), ttl);

            self.update_index_locked(&val, expire_time, &new_ver, old.as_ref())?;

            if self.deleted_locked(&inner) {
                self.set_deleted_locked(&mut inner, false);
            }

            self.update_locked(&mut inner, Some(val), expire_time, ttl, new_ver)?;
        }

        Ok(true)
    }

    /// Empty the entry if it is still at `cur_ver`: clear the value, bump the
    /// version, release swap and the index. The entry is not obsoleted.
    pub fn invalidate(
        &self,
        cur_ver: Option<&EntryVersion>,
        new_ver: EntryVersion,
    ) -> Result<bool> {
        let mut inner = self.lock();

        if cur_ver.is_none() || cur_ver == Some(&inner.version) {
            self.invalidate_locked(&mut inner, new_ver)?;
        }

        Ok(inner.extras.obsolete_version().is_some())
    }

    fn invalidate_locked(
        &self,
        inner: &mut super::EntryInner,
        new_ver: EntryVersion,
    ) -> Result<()> {
        let val = self.save_value_for_index_locked(inner)?;

        self.clear_value_locked(inner);
        inner.version = new_ver;

        self.release_swap_locked()?;
        self.clear_index_locked(val.as_ref())?;

        self.family().on_invalidate(self.key());
        Ok(())
    }

    /// Filtered invalidation with optimistic version retry.
    pub fn invalidate_filtered(&self, filter: Option<&EntryFilter>) -> Result<bool> {
        if filter.is_none() {
            let mut inner = self.lock();
            self.check_obsolete(&inner)?;
            let new_ver = self.next_version_locked(&inner);
            self.invalidate_locked(&mut inner, new_ver)?;
            return Ok(true);
        }

        loop {
            let start_ver = {
                let inner = self.lock();
                self.check_obsolete(&inner)?;
                inner.version.clone()
            };

            if !self.eval_filter(filter)? {
                return Ok(false);
            }

            let mut inner = self.lock();
            self.check_obsolete(&inner)?;

            if start_ver != inner.version {
                // Version changed since filter checking; do it again.
                continue;
            }

            let new_ver = self.next_version_locked(&inner);
            self.invalidate_locked(&mut inner, new_ver)?;
            return Ok(true);
        }
    }

    /// Attempt to make the entry obsolete, retrying if a concurrent change
    /// altered the version, and failing gracefully while readers remain.
    pub fn clear(
        &self,
        ver: &EntryVersion,
        readers: bool,
        filter: Option<&EntryFilter>,
    ) -> Result<bool> {
        let mut marked = false;
        let mut ret = false;
        let mut rmv = false;

        loop {
            let start_ver = if filter.is_some() {
                let v = self.lock().version.clone();
                if !self.eval_filter(filter)? {
                    return Ok(false);
                }
                Some(v)
            } else {
                None
            };

            let mut inner = self.lock();

            if let Some(start_ver) = &start_ver {
                if start_ver != &inner.version {
                    // Version has changed since filter checking.
                    continue;
                }
            }

            if inner.extras.obsolete_version().is_some() {
                // Got removed entry when clearing; simply return.
                ret = true;
                break;
            }

            let val = self.save_value_for_index_locked(&inner)?;

            if self.family().has_readers(self.key()) && !readers {
                tracing::debug!(
                    "entry could not be marked obsolete (it still has readers): {self:?}"
                );
                break;
            }

            if !self.mark_obsolete0_locked(&mut inner, ver, true) {
                tracing::debug!("entry could not be marked obsolete (it is still used): {self:?}");
                break;
            }

            marked = true;
            self.family().clear_readers(self.key());

            tracing::debug!("entry has been marked obsolete: {self:?}");

            self.clear_index_locked(val.as_ref())?;
            self.release_swap_locked()?;

            ret = true;
            rmv = true;
            break;
        }

        if marked {
            self.family().on_marked_obsolete(self.key());
        }

        if rmv {
            self.context().owner().remove_entry(self.key());
        }

        Ok(ret)
    }

    /// No-op for live values; expired or empty entries get cleared.
    pub fn compact(&self, filter: Option<&EntryFilter>) -> Result<bool> {
        loop {
            let start_ver = {
                let inner = self.lock();
                self.check_obsolete(&inner)?;
                inner.version.clone()
            };

            if !self.eval_filter(filter)? {
                return Ok(false);
            }

            let (retry, cleared_ver) = {
                let mut inner = self.lock();
                self.check_obsolete(&inner)?;

                if self.deleted_locked(&inner) {
                    // Soft-deleted entries cannot be compacted.
                    return Ok(false);
                }

                if start_ver == inner.version {
                    if self.has_value_locked(&inner) && !self.check_expired_locked(&mut inner)? {
                        return Ok(false);
                    }
                    (false, self.next_version_locked(&inner))
                } else {
                    (true, start_ver)
                }
            };

            if retry {
                // Version changed; do it again.
                continue;
            }

            return self.clear(&cleared_ver, false, filter);
        }
    }

    /// TTL sweeper callback.
    ///
    /// A tombstoned entry transitions straight to obsolete without an event;
    /// an expired live entry either gets the tombstone (deferred delete) or
    /// becomes obsolete, and emits one EXPIRED event.
    pub fn on_ttl_expired(&self, obsolete_ver: &EntryVersion) -> bool {
        let cctx = self.context().clone();

        let mut obsolete = false;
        let mut deferred = false;

        let result: Result<()> = (|| {
            let mut inner = self.lock();

            let expired_val = inner.value.clone();
            let has_old_bytes = inner.val_ptr.is_some();

            if self.deleted_locked(&inner) && !self.has_value_locked(&inner) {
                // Already tombstoned; finish the termination quietly.
                if self.mark_obsolete0_locked(&mut inner, obsolete_ver, true) {
                    obsolete = true;
                }
                return Ok(());
            }

            if self.check_expired_locked(&mut inner)? {
                if cctx.deferred_delete() && !self.family().is_detached() && !self.is_internal() {
                    if !self.deleted_locked(&inner) {
                        let cur_ver = inner.version.clone();
                        self.update_locked(&mut inner, None, 0, 0, cur_ver)?;
                        self.set_deleted_locked(&mut inner, true);
                        deferred = true;
                    }
                } else if self.mark_obsolete0_locked(&mut inner, obsolete_ver, true) {
                    obsolete = true;
                }

                if cctx.events().is_recordable(EventType::Expired) {
                    self.add_event(
                        EventType::Expired,
                        cctx.local_node(),
                        None,
                        None,
                        None,
                        false,
                        expired_val.clone(),
                        expired_val.is_some() || has_old_bytes,
                        None,
                        None,
                        None,
                    );
                }

                if cctx.statistics_enabled() {
                    cctx.metrics().on_expire();
                }

                cctx.continuous_queries()
                    .on_entry_expired(self.key(), expired_val.as_ref());
            }

            Ok(())
        })();

        if let Err(e) = result {
            tracing::error!("failed to clean up expired cache entry [entry={self:?}]: {e}");
        }

        if obsolete {
            self.family().on_marked_obsolete(self.key());
        }

        if deferred {
            self.context()
                .owner()
                .on_deferred_delete(self.key(), obsolete_ver);
        }

        obsolete
    }

    /// Evict the entry, optionally writing it to swap first.
    pub fn evict_internal(
        &self,
        swap: bool,
        obsolete_ver: &EntryVersion,
        filter: Option<&EntryFilter>,
    ) -> Result<bool> {
        let mut marked = false;

        let result = (|| -> Result<bool> {
            if filter.is_none() {
                let mut inner = self.lock();

                if inner.extras.obsolete_version().is_some() {
                    // Got removed entry when evicting; simply return.
                    return Ok(true);
                }

                let prev = self.save_value_for_index_locked(&inner)?;

                if !self.family().has_readers(self.key())
                    && self.mark_obsolete0_locked(&mut inner, obsolete_ver, false)
                {
                    if swap {
                        if !self.is_start_version(&inner) {
                            if let Err(e) = self.swap_out_locked(&mut inner) {
                                tracing::error!(
                                    "failed to write entry to swap storage [entry={self:?}]: {e}"
                                );
                            }
                        }
                    } else {
                        self.clear_index_locked(prev.as_ref())?;
                    }

                    // Nullify the value after swap.
                    self.clear_value_locked(&mut inner);

                    marked = true;

                    return Ok(true);
                }

                Ok(false)
            } else {
                // Optimistic filtered eviction.
                loop {
                    let start_ver = {
                        let inner = self.lock();

                        if inner.extras.obsolete_version().is_some() {
                            return Ok(true);
                        }

                        inner.version.clone()
                    };

                    if !self.eval_filter(filter)? {
                        return Ok(false);
                    }

                    let mut inner = self.lock();

                    if inner.extras.obsolete_version().is_some() {
                        return Ok(true);
                    }

                    if start_ver != inner.version {
                        // Version changed since the entry passed the filter.
                        continue;
                    }

                    let prev = self.save_value_for_index_locked(&inner)?;

                    if !self.family().has_readers(self.key())
                        && self.mark_obsolete0_locked(&mut inner, obsolete_ver, false)
                    {
                        if swap {
                            if !self.is_start_version(&inner) {
                                if let Err(e) = self.swap_out_locked(&mut inner) {
                                    tracing::error!(
                                        "failed to write entry to swap storage [entry={self:?}]: {e}"
                                    );
                                }
                            }
                        } else {
                            self.clear_index_locked(prev.as_ref())?;
                        }

                        self.clear_value_locked(&mut inner);

                        marked = true;

                        return Ok(true);
                    }

                    return Ok(false);
                }
            }
        })();

        if marked {
            self.family().on_marked_obsolete(self.key());
        }

        result
    }
}
