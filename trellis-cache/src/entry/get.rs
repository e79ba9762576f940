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

//! Read paths: `inner_get` and `inner_reload`.

use crate::{
    error::{Error, Result},
    event::EventType,
    op::GetRequest,
    ttl::to_expire_time,
    tx::Transaction,
    value::CacheValue,
};

use super::MapEntry;

impl MapEntry {
    /// Read the entry, optionally falling through to swap and the store.
    ///
    /// The store load runs outside the entry lock; the commit after the load
    /// only applies if the version captured before unlocking has not moved.
    pub fn inner_get(
        &self,
        tx: Option<&dyn Transaction>,
        req: GetRequest,
    ) -> Result<Option<CacheValue>> {
        let cctx = self.context().clone();
        let read_through = req.read_through && cctx.read_through();

        let mut evt = req.event;
        let mut expired = false;
        let mut expired_val: Option<CacheValue> = None;
        let mut ret: Option<CacheValue> = None;

        let start_ver;
        let old;
        let has_old_bytes;

        {
            let mut inner = self.lock();
            self.check_obsolete(&inner)?;

            // Version captured for the optimistic read-through commit.
            start_ver = inner.version.clone();

            let expire_time = inner.extras.expire_time();
            if expire_time > 0 && expire_time - cctx.now_millis() <= 0 {
                expired = true;
            }

            let mut val = inner.value.clone();
            has_old_bytes = inner.val_ptr.is_some();

            if (req.unmarshal || cctx.offheap_values_only())
                && !expired
                && val.is_none()
                && has_old_bytes
            {
                val = self.raw_get_or_unmarshal_locked(&inner)?;
            }

            let top_ver = tx
                .map(|tx| tx.topology_version())
                .unwrap_or_else(|| cctx.affinity().topology_version());
            let valid = self.family().is_valid(top_ver);

            // Attempt to load from swap; only promote when loading initial
            // state.
            if val.is_none() && !has_old_bytes && req.read_swap {
                if self.is_start_version(&inner) || !valid {
                    if expired {
                        // Expired before it was ever touched: drop the swap
                        // copy, the index never saw a value.
                        self.release_swap_locked()?;
                        self.clear_index_locked(None)?;
                    } else {
                        val = self.unswap_locked(&mut inner, false, !req.temporary)?;

                        // Recalculate expiration after the swap read.
                        if expire_time > 0 && expire_time - cctx.now_millis() <= 0 {
                            expired = true;
                        }
                    }
                }
            }

            old = if expired || !valid { None } else { val.clone() };

            if expired {
                expired_val = val;
                self.clear_value_locked(&mut inner);
            }

            if old.is_none() && !has_old_bytes {
                if req.update_metrics && cctx.statistics_enabled() {
                    cctx.metrics().on_read(false);
                }
            } else {
                if req.update_metrics && cctx.statistics_enabled() {
                    cctx.metrics().on_read(true);
                }
                ret = old.clone();
            }

            if evt && expired {
                if cctx.events().is_recordable(EventType::Expired) {
                    self.add_event(
                        EventType::Expired,
                        cctx.local_node(),
                        tx.map(|tx| tx.xid()),
                        None,
                        None,
                        false,
                        expired_val.clone(),
                        expired_val.is_some() || has_old_bytes,
                        req.subject,
                        None,
                        req.task.clone(),
                    );
                }
                if req.update_metrics && cctx.statistics_enabled() {
                    cctx.metrics().on_expire();
                }

                cctx.continuous_queries()
                    .on_entry_expired(self.key(), expired_val.as_ref());

                // No more notifications for this access.
                evt = false;
            }

            if evt && !expired && cctx.events().is_recordable(EventType::Read) {
                self.add_event(
                    EventType::Read,
                    cctx.local_node(),
                    tx.map(|tx| tx.xid()),
                    None,
                    ret.clone(),
                    ret.is_some(),
                    old.clone(),
                    has_old_bytes || old.is_some(),
                    req.subject,
                    req.transform_closure.clone(),
                    req.task.clone(),
                );

                evt = false;
            }

            if ret.is_some() {
                if let Some(policy) = &req.expiry {
                    self.update_ttl_with_policy_locked(&mut inner, policy.as_ref());
                }
            }
        }

        if ret.is_some() {
            // Consistent in-memory value; done.
            return Ok(ret);
        }

        if !read_through {
            return Ok(None);
        }

        // Read through the store outside the lock.
        let store = cctx.store().expect("store").clone();
        ret = store.load(tx, self.key())?;

        {
            let mut inner = self.lock();
            let ttl = inner.extras.ttl();

            // If the version matched, set the value.
            if start_ver == inner.version {
                if let Some(value) = &ret {
                    let next_ver = self.next_version_locked(&inner);
                    let prev = self.raw_get_or_unmarshal_locked(&inner)?;
                    let expire_time = to_expire_time(cctx.clock(), ttl);

                    // Update indexes before the actual write to the entry.
                    self.update_index_locked(value, expire_time, &next_ver, prev.as_ref())?;

                    let had_val_ptr = inner.val_ptr.is_some();

                    self.update_locked(&mut inner, ret.clone(), expire_time, ttl, next_ver)?;

                    if had_val_ptr && cctx.offheap_tiered() {
                        cctx.swap().expect("swap manager").remove_offheap(self.key());
                    }

                    if cctx.deferred_delete()
                        && self.deleted_locked(&inner)
                        && !self.is_internal()
                        && !self.family().is_detached()
                    {
                        self.set_deleted_locked(&mut inner, false);
                    }
                }

                if evt && cctx.events().is_recordable(EventType::Read) {
                    self.add_event(
                        EventType::Read,
                        cctx.local_node(),
                        tx.map(|tx| tx.xid()),
                        None,
                        ret.clone(),
                        ret.is_some(),
                        old.clone(),
                        has_old_bytes,
                        req.subject,
                        req.transform_closure.clone(),
                        req.task.clone(),
                    );
                }
            }
        }

        Ok(ret)
    }

    /// Unconditionally re-read the store and commit the loaded value under a
    /// fresh load version, provided no concurrent update slipped in.
    pub fn inner_reload(&self) -> Result<Option<CacheValue>> {
        let cctx = self.context().clone();
        let Some(store) = cctx.store().cloned() else {
            return Err(Error::store(anyhow::anyhow!("store is not configured")));
        };

        let start_ver;
        let was_new;
        {
            let inner = self.lock();
            self.check_obsolete(&inner)?;
            start_ver = inner.version.clone();
            was_new = self.is_start_version(&inner);
        }

        // Check before load.
        let ret = store.load(None, self.key())?;

        let mut touch = false;
        let mut committed_ret = ret;

        {
            let mut inner = self.lock();
            let ttl = inner.extras.ttl();

            let next_ver = cctx.versions().next_for_load(&inner.version);

            if was_new && !self.is_start_version(&inner) {
                // Entry was loaded while we read the store.
                return Ok(committed_ret);
            }

            if start_ver == inner.version {
                self.release_swap_locked()?;

                let old = self.raw_get_or_unmarshal_locked(&inner)?;
                let expire_time = to_expire_time(cctx.clock(), ttl);

                match &committed_ret {
                    Some(value) => {
                        self.update_index_locked(value, expire_time, &next_ver, old.as_ref())?;

                        if cctx.deferred_delete()
                            && !self.is_internal()
                            && !self.family().is_detached()
                            && self.deleted_locked(&inner)
                        {
                            self.set_deleted_locked(&mut inner, false);
                        }
                    }
                    None => {
                        self.clear_index_locked(old.as_ref())?;

                        if cctx.deferred_delete()
                            && !self.is_internal()
                            && !self.family().is_detached()
                            && !self.deleted_locked(&inner)
                        {
                            self.set_deleted_locked(&mut inner, true);
                        }
                    }
                }

                self.update_locked(
                    &mut inner,
                    committed_ret.clone(),
                    expire_time,
                    ttl,
                    next_ver,
                )?;

                touch = true;
            } else {
                // A concurrent update won; still report what the store said.
                touch = true;
            }
        }

        if touch {
            cctx.evictions()
                .touch(self.key(), cctx.affinity().topology_version());
        }

        Ok(committed_ret)
    }
}
