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

//! Write paths: transactional set/remove and atomic updates.

use std::cmp::Ordering;

use trellis_common::strict_assert;

use crate::{
    conflict::{ConflictContext, ConflictDecision, VersionedEntryView},
    dr::DrType,
    error::Result,
    event::EventType,
    op::{
        AtomicUpdateOutcome, AtomicUpdateRequest, InvokeEntry, InvokeOutcome, LocalUpdateOutcome,
        LocalUpdateRequest, TxRemoveRequest, TxUpdateOutcome, TxWriteRequest, WriteCommand,
    },
    ttl::{
        expire_time_in_past, to_expire_time, ExpiryPolicy, EXPIRE_TIME_CALCULATE,
        EXPIRE_TIME_ETERNAL, TTL_ETERNAL, TTL_MINIMUM, TTL_NOT_CHANGED, TTL_ZERO,
    },
    tx::Transaction,
    value::CacheValue,
    version::EntryVersion,
};

use super::{EntryInner, MapEntry};

impl MapEntry {
    /// Transactional write.
    ///
    /// The in-memory mutation, index update and notifications happen inside
    /// the entry lock; the write-through store put happens after release —
    /// the surrounding transaction owns the correctness of that ordering.
    pub fn inner_set(
        &self,
        tx: Option<&dyn Transaction>,
        req: TxWriteRequest,
    ) -> Result<TxUpdateOutcome> {
        let cctx = self.context().clone();

        let valid = self
            .family()
            .is_valid(tx.map(|tx| tx.topology_version()).unwrap_or(req.topology_version));

        // The lock is held by the transaction by now; filters see a stable
        // value.
        if !self.eval_filter(req.filter.as_ref())? {
            return Ok(TxUpdateOutcome {
                updated: false,
                value: None,
            });
        }

        let intercept = cctx.interceptor().is_some();
        let mut val = req.value.clone();

        let old;
        let new_ver;

        {
            let mut inner = self.lock();
            self.check_obsolete(&inner)?;

            if cctx.config().sanity_checks {
                if let Some(tx) = tx {
                    assert!(
                        tx.owns_lock(self.key()),
                        "transaction does not own lock for update [entry={self:?}]"
                    );
                }
            }

            // Load and remove from swap if the entry was never touched.
            if self.is_start_version(&inner) {
                self.unswap_locked(&mut inner, true, req.retval)?;
            }

            new_ver = req.explicit_version.clone().unwrap_or_else(|| match tx {
                Some(tx) => tx.write_version(),
                None => self.next_version_locked(&inner),
            });

            old = if req.retval || intercept {
                self.raw_get_or_unmarshal_locked(&inner)?
            } else {
                inner.value.clone()
            };

            if intercept {
                let interceptor = cctx.interceptor().expect("interceptor");
                match interceptor.on_before_put(self.key(), old.as_ref(), &val) {
                    None => {
                        return Ok(TxUpdateOutcome {
                            updated: false,
                            value: old,
                        })
                    }
                    Some(adopted) => val = adopted,
                }
            }

            // Determine new TTL and expire time.
            let (ttl, expire_time) = if req.dr_expire_time >= 0 {
                strict_assert!(req.ttl >= 0);
                (req.ttl, req.dr_expire_time)
            } else if req.ttl == TTL_NOT_CHANGED {
                (inner.extras.ttl(), inner.extras.expire_time())
            } else {
                (req.ttl, to_expire_time(cctx.clock(), req.ttl))
            };

            // Update the index inside the lock: loaders may update it without
            // holding the entry lock otherwise.
            self.update_index_locked(&val, expire_time, &new_ver, old.as_ref())?;

            if cctx.deferred_delete()
                && self.deleted_locked(&inner)
                && !self.is_internal()
                && !self.family().is_detached()
            {
                self.set_deleted_locked(&mut inner, false);
            }

            self.update_locked(
                &mut inner,
                Some(val.clone()),
                expire_time,
                ttl,
                new_ver.clone(),
            )?;

            self.replicate_locked(&inner, Some(&val), &new_ver, req.dr_type);

            self.family().record_node_id(self.key(), req.affinity_node);

            if req.metrics && cctx.statistics_enabled() {
                cctx.metrics().on_write();
            }

            if req.event && cctx.events().is_recordable(EventType::Put) {
                let has_old = old.is_some() || self.has_value_locked(&inner);
                self.add_event(
                    EventType::Put,
                    req.event_node,
                    tx.map(|tx| tx.xid()),
                    Some(new_ver.clone()),
                    Some(val.clone()),
                    true,
                    old.clone(),
                    has_old,
                    req.subject,
                    None,
                    req.task.clone(),
                );
            }

            if cctx.is_local()
                || cctx.is_replicated()
                || tx.is_some_and(|tx| tx.is_local() && !self.family().is_near())
            {
                cctx.continuous_queries()
                    .on_entry_updated(self.key(), Some(&val), old.as_ref(), false);
            }

            cctx.data_structures().on_entry_updated(self.key(), false);
        }

        tracing::debug!("updated cache entry [val={val:?}, old={old:?}, entry={self:?}]");

        // Persist outside of the lock; the transaction orders this write.
        if req.write_through {
            if let Some(store) = cctx.store() {
                store.put(tx, self.key(), &val, &new_ver)?;
            }
        }

        if intercept {
            cctx.interceptor()
                .expect("interceptor")
                .on_after_put(self.key(), &val);
        }

        Ok(if valid {
            TxUpdateOutcome {
                updated: true,
                value: if req.retval { old } else { None },
            }
        } else {
            TxUpdateOutcome {
                updated: false,
                value: None,
            }
        })
    }

    /// Transactional delete.
    pub fn inner_remove(
        &self,
        tx: Option<&dyn Transaction>,
        req: TxRemoveRequest,
    ) -> Result<TxUpdateOutcome> {
        let cctx = self.context().clone();
        strict_assert!(cctx.transactional());

        let valid = self
            .family()
            .is_valid(tx.map(|tx| tx.topology_version()).unwrap_or(req.topology_version));

        if !self.eval_filter(req.filter.as_ref())? {
            return Ok(TxUpdateOutcome {
                updated: false,
                value: None,
            });
        }

        let intercept = cctx.interceptor().is_some();
        let mut intercept_value: Option<CacheValue> = None;
        let mut obsolete_ver: Option<EntryVersion> = None;

        let mut old;
        let new_ver;

        {
            let mut inner = self.lock();
            self.check_obsolete(&inner)?;

            if cctx.config().sanity_checks {
                if let Some(tx) = tx {
                    assert!(
                        tx.owns_lock(self.key()),
                        "transaction does not own lock for remove [entry={self:?}]"
                    );
                }
            }

            if self.is_start_version(&inner) {
                self.release_swap_locked()?;
            }

            new_ver = req.explicit_version.clone().unwrap_or_else(|| match tx {
                Some(tx) => tx.write_version(),
                None => self.next_version_locked(&inner),
            });

            old = if req.retval || intercept {
                self.raw_get_or_unmarshal_locked(&inner)?
            } else {
                inner.value.clone()
            };

            if intercept {
                let interceptor = cctx.interceptor().expect("interceptor");
                let res = interceptor.on_before_remove(self.key(), old.as_ref());
                if res.cancel {
                    return Ok(TxUpdateOutcome {
                        updated: false,
                        value: res.value,
                    });
                }
                intercept_value = res.value;
            }

            if old.is_none() {
                old = self.save_value_for_index_locked(&inner)?;
            }

            // Clear the index inside the lock for the same reason writes
            // update it there.
            self.clear_index_locked(old.as_ref())?;

            let had_val_ptr = inner.val_ptr.is_some();

            self.update_locked(&mut inner, None, 0, 0, new_ver.clone())?;

            if cctx.offheap_tiered() && had_val_ptr {
                let removed = cctx.swap().expect("swap manager").remove_offheap(self.key());
                strict_assert!(removed);
            }

            if cctx.deferred_delete() && !self.family().is_detached() && !self.is_internal() {
                if !self.deleted_locked(&inner) {
                    self.set_deleted_locked(&mut inner, true);

                    if let Some(tx) = tx {
                        let xid = tx.xid();
                        let lone = inner
                            .extras
                            .mvcc()
                            .map_or(true, |mvcc| mvcc.is_empty(&[&xid]));
                        if lone {
                            self.family().clear_readers(self.key());
                        } else {
                            self.family()
                                .clear_reader(self.key(), tx.originating_node());
                        }
                    }
                }
            }

            self.replicate_locked(&inner, None, &new_ver, req.dr_type);

            if req.metrics && cctx.statistics_enabled() {
                cctx.metrics().on_remove();
            }

            match tx {
                None => obsolete_ver = Some(new_ver.clone()),
                Some(tx) => {
                    // Only delete the entry outright if the lock is not
                    // explicit.
                    let xid = tx.xid();
                    if self.locked_by_locked(&inner, &xid) {
                        obsolete_ver = Some(xid);
                    } else {
                        tracing::debug!(
                            "obsolete version was not set because lock was explicit: {self:?}"
                        );
                    }
                }
            }

            if req.event && cctx.events().is_recordable(EventType::Removed) {
                let has_old = old.is_some() || self.has_value_locked(&inner);
                self.add_event(
                    EventType::Removed,
                    req.event_node,
                    tx.map(|tx| tx.xid()),
                    Some(new_ver.clone()),
                    None,
                    false,
                    old.clone(),
                    has_old,
                    req.subject,
                    None,
                    req.task.clone(),
                );
            }

            if cctx.is_local()
                || cctx.is_replicated()
                || tx.is_some_and(|tx| tx.is_local() && !self.family().is_near())
            {
                cctx.continuous_queries()
                    .on_entry_updated(self.key(), None, old.as_ref(), false);
            }

            cctx.data_structures().on_entry_updated(self.key(), true);
        }

        // Persist outside of the lock.
        if req.write_through {
            if let Some(store) = cctx.store() {
                store.remove(tx, self.key())?;
            }
        }

        if !cctx.deferred_delete() {
            let mut marked = false;

            {
                let mut inner = self.lock();

                // If the entry is still the one we removed.
                if new_ver == inner.version {
                    match &obsolete_ver {
                        Some(ov) if self.mark_obsolete0_locked(&mut inner, ov, true) => {
                            marked = true;

                            self.family().record_node_id(self.key(), req.affinity_node);

                            // A removed lock is registered so a later lock
                            // release can finish the cleanup.
                            cctx.tx_manager().add_removed(ov);

                            tracing::debug!("entry was marked obsolete: {self:?}");
                        }
                        _ => {
                            tracing::debug!(
                                "entry could not be marked obsolete (it is still used): {self:?}"
                            );
                        }
                    }
                }
            }

            if marked {
                self.family().on_marked_obsolete(self.key());
            }
        }

        if intercept {
            cctx.interceptor()
                .expect("interceptor")
                .on_after_remove(self.key(), old.as_ref());
        }

        Ok(if valid {
            TxUpdateOutcome {
                updated: true,
                value: if intercept { intercept_value } else { old },
            }
        } else {
            TxUpdateOutcome {
                updated: false,
                value: None,
            }
        })
    }

    /// Atomic update fast path for a local cache: single owner, so the
    /// write-through happens inside the lock and no version check exists.
    pub fn inner_update_local(&self, req: LocalUpdateRequest) -> Result<LocalUpdateOutcome> {
        let cctx = self.context().clone();
        strict_assert!(cctx.is_local() && cctx.atomic());

        let mut inner = self.lock();

        let need_val = req.retval
            || req.intercept
            || req.command.is_transform()
            || req.filter.is_some();

        self.check_obsolete(&inner)?;

        if self.is_start_version(&inner) {
            self.unswap_locked(&mut inner, true, req.retval)?;
        }

        let mut old = if need_val {
            self.raw_get_or_unmarshal_locked(&inner)?
        } else {
            inner.value.clone()
        };

        let mut read_through = false;

        // Possibly get the old value from the store.
        if need_val
            && old.is_none()
            && cctx.read_through()
            && (req.command.is_transform() || cctx.load_previous_value())
        {
            let store = cctx.store().expect("store").clone();
            old = store.load(None, self.key())?;
            read_through = true;

            let (ttl, expire_time) = match (&req.expiry, &old) {
                (Some(policy), Some(_)) => initial_ttl_and_expire_time(self, policy.as_ref()),
                _ => (TTL_ETERNAL, EXPIRE_TIME_ETERNAL),
            };

            match &old {
                Some(value) => {
                    self.update_index_locked(value, expire_time, &req.version, None)?
                }
                None => self.clear_index_locked(None)?,
            }

            self.update_locked(&mut inner, old.clone(), expire_time, ttl, req.version.clone())?;
        }

        // Put-if-absent guards must not skew hit/miss statistics.
        if req.metrics && cctx.statistics_enabled() && need_val && !req.put_if_absent_filter {
            cctx.metrics().on_read(old.is_some());
        }

        if let Some(filter) = &req.filter {
            if !filter(old.as_ref()) {
                if req.expiry.is_some()
                    && !read_through
                    && !req.put_if_absent_filter
                    && self.has_value_locked(&inner)
                {
                    self.update_ttl_with_policy_locked(
                        &mut inner,
                        req.expiry.as_deref().expect("expiry"),
                    );
                }

                return Ok(LocalUpdateOutcome {
                    changed: false,
                    value: if req.retval { old } else { None },
                    invoke: None,
                });
            }
        }

        // Calculate the new value.
        let mut invoke: Option<InvokeOutcome> = None;
        let mut transform_closure: Option<Box<str>> = None;

        let mut updated = match &req.command {
            WriteCommand::Transform(processor) => {
                transform_closure = Some(processor.name().into());

                let mut entry = InvokeEntry::new(self.key(), old.clone());
                let (modified, computed) = match processor.process(&mut entry) {
                    Ok(computed) => {
                        if computed.is_some() {
                            invoke = Some(InvokeOutcome::Computed(computed));
                        }
                        (entry.modified(), entry.into_value())
                    }
                    Err(e) => {
                        invoke = Some(InvokeOutcome::Failed(e.to_string()));
                        (entry.modified(), old.clone())
                    }
                };

                if !modified {
                    if req.expiry.is_some() && !read_through && self.has_value_locked(&inner) {
                        self.update_ttl_with_policy_locked(
                            &mut inner,
                            req.expiry.as_deref().expect("expiry"),
                        );
                    }

                    return Ok(LocalUpdateOutcome {
                        changed: false,
                        value: None,
                        invoke,
                    });
                }

                computed
            }
            WriteCommand::Put(value) => Some(value.clone()),
            WriteCommand::Remove => None,
        };

        let had_val = self.has_value_locked(&inner);

        // Resolve TTL and expire time.
        let mut delete = updated.is_none();
        let mut ttl = TTL_ETERNAL;
        let mut expire_time = EXPIRE_TIME_ETERNAL;

        if !delete {
            match &req.expiry {
                Some(policy) => {
                    ttl = if had_val {
                        policy.for_update()
                    } else {
                        policy.for_create()
                    };

                    if ttl == TTL_NOT_CHANGED {
                        ttl = inner.extras.ttl();
                        expire_time = inner.extras.expire_time();
                    } else if ttl != TTL_ZERO {
                        expire_time = to_expire_time(cctx.clock(), ttl);
                    }
                }
                None => {
                    ttl = inner.extras.ttl();
                    expire_time = inner.extras.expire_time();
                }
            }

            if ttl == TTL_ZERO {
                delete = true;
                updated = None;
                ttl = TTL_ETERNAL;
                expire_time = EXPIRE_TIME_ETERNAL;
            }
        }

        let mut res = true;
        let mut intercept_value: Option<CacheValue> = None;

        if !delete {
            let mut value = updated.clone().expect("update value");

            if req.intercept {
                if let Some(interceptor) = cctx.interceptor() {
                    match interceptor.on_before_put(self.key(), old.as_ref(), &value) {
                        None => {
                            return Ok(LocalUpdateOutcome {
                                changed: false,
                                value: old,
                                invoke,
                            })
                        }
                        Some(adopted) => {
                            value = adopted;
                            updated = Some(value.clone());
                        }
                    }
                }
            }

            // Non-transactional mode must persist inside the lock.
            if req.write_through {
                if let Some(store) = cctx.store() {
                    store.put(None, self.key(), &value, &req.version)?;
                }
            }

            self.update_index_locked(&value, expire_time, &req.version, old.as_ref())?;

            strict_assert!(ttl != TTL_ZERO);

            self.update_locked(
                &mut inner,
                Some(value.clone()),
                expire_time,
                ttl,
                req.version.clone(),
            )?;

            if req.event {
                if transform_closure.is_some() && cctx.events().is_recordable(EventType::Read) {
                    self.add_event(
                        EventType::Read,
                        cctx.local_node(),
                        None,
                        None,
                        old.clone(),
                        old.is_some() || had_val,
                        old.clone(),
                        old.is_some() || had_val,
                        req.subject,
                        transform_closure.clone(),
                        req.task.clone(),
                    );
                }

                if cctx.events().is_recordable(EventType::Put) {
                    self.add_event(
                        EventType::Put,
                        cctx.local_node(),
                        None,
                        None,
                        Some(value.clone()),
                        true,
                        old.clone(),
                        old.is_some() || had_val,
                        req.subject,
                        None,
                        req.task.clone(),
                    );
                }
            }
        } else {
            if req.intercept {
                if let Some(interceptor) = cctx.interceptor() {
                    let res0 = interceptor.on_before_remove(self.key(), old.as_ref());
                    if res0.cancel {
                        return Ok(LocalUpdateOutcome {
                            changed: false,
                            value: res0.value,
                            invoke,
                        });
                    }
                    intercept_value = res0.value;
                }
            }

            if req.write_through {
                if let Some(store) = cctx.store() {
                    store.remove(None, self.key())?;
                }
            }

            let had_val_ptr = inner.val_ptr.is_some();

            self.clear_index_locked(old.as_ref())?;

            self.update_locked(
                &mut inner,
                None,
                EXPIRE_TIME_ETERNAL,
                TTL_ETERNAL,
                req.version.clone(),
            )?;

            if cctx.offheap_tiered() && had_val_ptr {
                let removed = cctx.swap().expect("swap manager").remove_offheap(self.key());
                strict_assert!(removed);
            }

            if req.event {
                if transform_closure.is_some() && cctx.events().is_recordable(EventType::Read) {
                    self.add_event(
                        EventType::Read,
                        cctx.local_node(),
                        None,
                        None,
                        None,
                        had_val,
                        None,
                        had_val,
                        req.subject,
                        transform_closure.clone(),
                        req.task.clone(),
                    );
                }

                if cctx.events().is_recordable(EventType::Removed) {
                    self.add_event(
                        EventType::Removed,
                        cctx.local_node(),
                        None,
                        None,
                        None,
                        false,
                        old.clone(),
                        old.is_some() || had_val,
                        req.subject,
                        None,
                        req.task.clone(),
                    );
                }
            }

            res = had_val;
        }

        if res && req.metrics && cctx.statistics_enabled() {
            if delete {
                cctx.metrics().on_remove();
            } else {
                cctx.metrics().on_write();
            }
        }

        cctx.continuous_queries().on_entry_updated(
            self.key(),
            updated.as_ref(),
            old.as_ref(),
            false,
        );

        cctx.data_structures().on_entry_updated(self.key(), delete);

        if req.intercept {
            if let Some(interceptor) = cctx.interceptor() {
                if !delete {
                    interceptor.on_after_put(self.key(), updated.as_ref().expect("updated"));
                } else {
                    interceptor.on_after_remove(self.key(), old.as_ref());
                }
            }
        }

        Ok(LocalUpdateOutcome {
            changed: res,
            value: if delete && intercept_value.is_some() {
                intercept_value
            } else {
                old
            },
            invoke,
        })
    }

    /// Atomic update for replicated/partitioned caches, including the
    /// version-conflict protocol.
    pub fn inner_update(&self, req: AtomicUpdateRequest) -> Result<AtomicUpdateOutcome> {
        let cctx = self.context().clone();
        strict_assert!(cctx.atomic());

        let mut inner = self.lock();

        let need_val =
            req.intercept || req.retval || req.command.is_transform() || req.filter.is_some();

        self.check_obsolete(&inner)?;

        // Load and remove from swap if the entry was never touched.
        if self.is_start_version(&inner) {
            self.unswap_locked(&mut inner, true, req.retval)?;
        }

        let mut command = req.command.clone();
        let mut conflict_ver = req.conflict_version.clone();
        let mut conflict_ctx: Option<ConflictContext> = None;
        let mut transform_closure: Option<Box<str>> = None;
        let mut invoke: Option<InvokeOutcome> = None;

        // Request-level conflict resolution: we do not know in advance who
        // wins.
        if req.conflict_resolve {
            let old_conflict_ver = inner.version.conflict_version().clone();

            if cctx.conflict_need_resolve() {
                // Prospective new value, transform applied.
                let write_obj = match &command {
                    WriteCommand::Transform(processor) => {
                        transform_closure = Some(processor.name().into());
                        let current = self.raw_get_or_unmarshal_locked(&inner)?;
                        let mut entry = InvokeEntry::new(self.key(), current);
                        match processor.process(&mut entry) {
                            Ok(_) => entry.into_value(),
                            Err(e) => {
                                invoke = Some(InvokeOutcome::Failed(e.to_string()));
                                entry.into_value()
                            }
                        }
                    }
                    WriteCommand::Put(value) => Some(value.clone()),
                    WriteCommand::Remove => None,
                };

                let (new_ttl, new_expire, _rmv) = self.ttl_and_expire_time_locked(
                    &inner,
                    req.expiry.as_deref(),
                    req.explicit_ttl,
                    req.explicit_expire_time,
                );

                let old_entry = self.versioned_entry_locked(&mut inner)?;
                let new_entry = VersionedEntryView {
                    key: self.key().clone(),
                    value: write_obj.clone(),
                    ttl: new_ttl,
                    expire_time: new_expire,
                    version: conflict_ver.clone().unwrap_or_else(|| req.new_version.clone()),
                    is_new: false,
                };

                let resolver = cctx.conflict_resolver().expect("conflict resolver");
                let ctx = resolver.resolve(&old_entry, &new_entry, req.version_check);

                if ctx.is_use_old() {
                    let new_conflict_ver =
                        conflict_ver.clone().unwrap_or_else(|| req.new_version.clone());

                    // Store-repair on an equal-version duplicate from the
                    // same data center.
                    if !self.is_start_version(&inner)
                        && req.version_check
                        && old_conflict_ver.data_center_id() == new_conflict_ver.data_center_id()
                        && old_conflict_ver.atomic_cmp(&new_conflict_ver) == Ordering::Equal
                        && cctx.write_through()
                        && req.primary
                    {
                        self.repair_store_locked(&inner)?;
                    }

                    let old_val = if req.retval {
                        self.raw_get_or_unmarshal_locked(&inner)?
                    } else {
                        None
                    };
                    return Ok(AtomicUpdateOutcome::no_change(old_val, invoke));
                }

                // Merge overrides the incoming value and discards the
                // conflict version so later updates use regular versions.
                match &ctx.decision {
                    ConflictDecision::Merge(merged) => {
                        command = match merged {
                            Some(value) => WriteCommand::Put(value.clone()),
                            None => WriteCommand::Remove,
                        };
                        conflict_ver = None;
                    }
                    ConflictDecision::UseNew => {
                        // The resolved value is known now; transform became a
                        // plain update.
                        command = match write_obj {
                            Some(value) => WriteCommand::Put(value),
                            None => WriteCommand::Remove,
                        };
                    }
                    ConflictDecision::UseOld => unreachable!(),
                }

                conflict_ctx = Some(ctx);
            } else {
                // Not conflict-enabled: drop the conflict version so the next
                // updates use regular versions.
                conflict_ver = None;
            }
        }

        // Version check only when no explicit conflict resolution happened.
        if conflict_ctx.is_none() {
            if req.version_check {
                if !self.is_start_version(&inner)
                    && inner.version.atomic_cmp(&req.new_version) != Ordering::Less
                {
                    if inner.version.atomic_cmp(&req.new_version) == Ordering::Equal
                        && cctx.write_through()
                        && req.primary
                    {
                        tracing::debug!(
                            "received entry update with same version as current (will update store) \
                             [entry={self:?}, newVer={:?}]",
                            req.new_version
                        );

                        self.repair_store_locked(&inner)?;
                    } else {
                        tracing::debug!(
                            "received entry update with smaller version than current (will ignore) \
                             [entry={self:?}, newVer={:?}]",
                            req.new_version
                        );
                    }

                    let old_val = if req.retval {
                        self.raw_get_or_unmarshal_locked(&inner)?
                    } else {
                        None
                    };
                    return Ok(AtomicUpdateOutcome::no_change(old_val, invoke));
                }
            } else {
                strict_assert!(
                    self.is_start_version(&inner)
                        || inner.version.atomic_cmp(&req.new_version) != Ordering::Greater,
                    "invalid version for inner update"
                );
            }
        }

        // Prepare the old value.
        let mut old_val = if need_val {
            self.raw_get_or_unmarshal_locked(&inner)?
        } else {
            inner.value.clone()
        };

        let mut read_through = false;

        if need_val
            && old_val.is_none()
            && cctx.read_through()
            && (command.is_transform() || cctx.load_previous_value())
        {
            let store = cctx.store().expect("store").clone();
            old_val = store.load(None, self.key())?;
            read_through = true;

            let (init_ttl, init_expire) = match (&req.expiry, &old_val) {
                (Some(policy), Some(_)) => initial_ttl_and_expire_time(self, policy.as_ref()),
                _ => (TTL_ETERNAL, EXPIRE_TIME_ETERNAL),
            };

            match &old_val {
                Some(value) => {
                    self.update_index_locked(value, init_expire, &inner.version, None)?
                }
                None => self.clear_index_locked(None)?,
            }

            let cur_ver = inner.version.clone();
            self.update_locked(&mut inner, old_val.clone(), init_expire, init_ttl, cur_ver)?;

            if self.deleted_locked(&inner) && old_val.is_some() && !self.is_internal() {
                self.set_deleted_locked(&mut inner, false);
            }
        }

        if req.metrics && cctx.statistics_enabled() && need_val && !req.put_if_absent_filter {
            cctx.metrics().on_read(old_val.is_some());
        }

        // Filter under the lock.
        if let Some(filter) = &req.filter {
            if !filter(old_val.as_ref()) {
                if req.expiry.is_some()
                    && !read_through
                    && self.has_value_locked(&inner)
                    && !req.put_if_absent_filter
                {
                    self.update_ttl_with_policy_locked(
                        &mut inner,
                        req.expiry.as_deref().expect("expiry"),
                    );
                }

                let old_val = if req.retval { old_val } else { None };
                return Ok(AtomicUpdateOutcome::no_change(old_val, invoke));
            }
        }

        // Calculate the new value for a transform.
        let mut updated = match &command {
            WriteCommand::Transform(processor) => {
                strict_assert!(conflict_ctx.is_none());

                transform_closure = Some(processor.name().into());

                let mut entry = InvokeEntry::new(self.key(), old_val.clone());
                let (modified, value) = match processor.process(&mut entry) {
                    Ok(computed) => {
                        if computed.is_some() {
                            invoke = Some(InvokeOutcome::Computed(computed));
                        }
                        (entry.modified(), entry.into_value())
                    }
                    Err(e) => {
                        invoke = Some(InvokeOutcome::Failed(e.to_string()));
                        (entry.modified(), old_val.clone())
                    }
                };

                if !modified {
                    if req.expiry.is_some() && !read_through && self.has_value_locked(&inner) {
                        self.update_ttl_with_policy_locked(
                            &mut inner,
                            req.expiry.as_deref().expect("expiry"),
                        );
                    }

                    let old_val = if req.retval { old_val } else { None };
                    return Ok(AtomicUpdateOutcome::no_change(old_val, invoke));
                }

                value
            }
            WriteCommand::Put(value) => Some(value.clone()),
            WriteCommand::Remove => None,
        };

        let mut delete = updated.is_none();
        let had_val = self.has_value_locked(&inner);

        // Incorporate the conflict version into the committed version.
        let mut new_ver = req.new_version.clone();
        if let Some(cv) = &conflict_ver {
            if cv != &new_ver {
                new_ver = new_ver.with_conflict(cv.clone());
            }
        }

        // Resolve TTL/expire plus the system pair reported to backups.
        let mut new_sys_ttl = TTL_NOT_CHANGED;
        let mut new_sys_expire = EXPIRE_TIME_CALCULATE;
        let mut new_ttl = TTL_ETERNAL;
        let mut new_expire = EXPIRE_TIME_ETERNAL;

        if !delete {
            match &conflict_ctx {
                Some(ctx) => {
                    new_sys_ttl = ctx.ttl;
                    new_ttl = ctx.ttl;
                    new_sys_expire = ctx.expire_time;
                    new_expire = ctx.expire_time;
                }
                None => {
                    if req.explicit_ttl != TTL_NOT_CHANGED {
                        // A conflict update always carries an explicit expire
                        // time.
                        strict_assert!(
                            conflict_ver.is_none()
                                || req.explicit_expire_time != EXPIRE_TIME_CALCULATE
                        );

                        new_sys_ttl = req.explicit_ttl;
                        new_ttl = req.explicit_ttl;
                        new_sys_expire = req.explicit_expire_time;
                        new_expire = if req.explicit_expire_time != EXPIRE_TIME_CALCULATE {
                            req.explicit_expire_time
                        } else {
                            to_expire_time(cctx.clock(), req.explicit_ttl)
                        };
                    } else {
                        new_sys_ttl = match &req.expiry {
                            None => TTL_NOT_CHANGED,
                            Some(policy) => {
                                if had_val {
                                    policy.for_update()
                                } else {
                                    policy.for_create()
                                }
                            }
                        };

                        if new_sys_ttl == TTL_NOT_CHANGED {
                            new_sys_expire = EXPIRE_TIME_CALCULATE;
                            new_ttl = inner.extras.ttl();
                            new_expire = inner.extras.expire_time();
                        } else if new_sys_ttl == TTL_ZERO {
                            // Zero TTL rewrites the update into a delete.
                            delete = true;
                            updated = None;

                            new_sys_ttl = TTL_NOT_CHANGED;
                            new_sys_expire = EXPIRE_TIME_CALCULATE;
                            new_ttl = TTL_ETERNAL;
                            new_expire = EXPIRE_TIME_ETERNAL;
                        } else {
                            new_sys_expire = EXPIRE_TIME_CALCULATE;
                            new_ttl = new_sys_ttl;
                            new_expire = to_expire_time(cctx.clock(), new_ttl);
                        }
                    }
                }
            }
        }

        strict_assert!(new_ttl != TTL_NOT_CHANGED && new_ttl != TTL_ZERO && new_ttl >= 0);
        strict_assert!(new_expire != EXPIRE_TIME_CALCULATE && new_expire >= 0);

        let mut enqueue_ver: Option<EntryVersion> = None;
        let mut intercept_value: Option<CacheValue> = None;
        let mut res = true;

        if !delete {
            let mut value = updated.clone().expect("update value");

            if req.intercept {
                if let Some(interceptor) = cctx.interceptor() {
                    match interceptor.on_before_put(self.key(), old_val.as_ref(), &value) {
                        None => {
                            let old_val = if req.retval { old_val } else { None };
                            return Ok(AtomicUpdateOutcome::no_change(old_val, invoke));
                        }
                        Some(adopted) => {
                            value = adopted;
                            updated = Some(value.clone());
                        }
                    }
                }
            }

            // Atomic mode must persist inside the lock.
            if req.write_through {
                if let Some(store) = cctx.store() {
                    store.put(None, self.key(), &value, &new_ver)?;
                }
            }

            if !had_val {
                let new0 = self.is_start_version(&inner);

                strict_assert!(
                    self.deleted_locked(&inner) || new0 || self.is_internal(),
                    "invalid entry"
                );

                if cctx.deferred_delete()
                    && !new0
                    && !self.is_internal()
                    && self.deleted_locked(&inner)
                {
                    self.set_deleted_locked(&mut inner, false);
                }
            } else {
                strict_assert!(!self.deleted_locked(&inner), "invalid entry");
            }

            self.update_index_locked(&value, new_expire, &new_ver, old_val.as_ref())?;

            self.update_locked(
                &mut inner,
                Some(value.clone()),
                new_expire,
                new_ttl,
                new_ver.clone(),
            )?;

            self.replicate_locked(&inner, Some(&value), &new_ver, req.dr_type);

            self.family().record_node_id(self.key(), req.affinity_node);

            if req.event {
                if transform_closure.is_some() && cctx.events().is_recordable(EventType::Read) {
                    self.add_event(
                        EventType::Read,
                        req.event_node,
                        None,
                        Some(new_ver.clone()),
                        old_val.clone(),
                        old_val.is_some() || had_val,
                        old_val.clone(),
                        old_val.is_some() || had_val,
                        req.subject,
                        transform_closure.clone(),
                        req.task.clone(),
                    );
                }

                if cctx.events().is_recordable(EventType::Put) {
                    self.add_event(
                        EventType::Put,
                        req.event_node,
                        None,
                        Some(new_ver.clone()),
                        Some(value.clone()),
                        true,
                        old_val.clone(),
                        old_val.is_some() || had_val,
                        req.subject,
                        None,
                        req.task.clone(),
                    );
                }
            }
        } else {
            if req.intercept {
                if let Some(interceptor) = cctx.interceptor() {
                    let res0 = interceptor.on_before_remove(self.key(), old_val.as_ref());
                    if res0.cancel {
                        return Ok(AtomicUpdateOutcome::no_change(res0.value, invoke));
                    }
                    intercept_value = res0.value;
                }
            }

            if req.write_through {
                if let Some(store) = cctx.store() {
                    store.remove(None, self.key())?;
                }
            }

            self.clear_index_locked(old_val.as_ref())?;

            if had_val {
                strict_assert!(!self.deleted_locked(&inner));

                if cctx.deferred_delete() && !self.is_internal() {
                    self.set_deleted_locked(&mut inner, true);
                }
            } else {
                let new0 = self.is_start_version(&inner);

                strict_assert!(
                    self.deleted_locked(&inner) || new0 || self.is_internal(),
                    "invalid entry"
                );

                if cctx.deferred_delete() && new0 && !self.is_internal() {
                    self.set_deleted_locked(&mut inner, true);
                }
            }

            enqueue_ver = Some(new_ver.clone());

            let had_val_ptr = inner.val_ptr.is_some();

            // Clear the value; the entry leaves the map once the deferred
            // queue evicts it.
            self.update_locked(
                &mut inner,
                None,
                EXPIRE_TIME_ETERNAL,
                TTL_ETERNAL,
                new_ver.clone(),
            )?;

            strict_assert!(new_sys_ttl == TTL_NOT_CHANGED);
            strict_assert!(new_sys_expire == EXPIRE_TIME_CALCULATE);

            if cctx.offheap_tiered() && had_val_ptr {
                let removed = cctx.swap().expect("swap manager").remove_offheap(self.key());
                strict_assert!(removed);
            }

            self.family().clear_readers(self.key());

            self.family().record_node_id(self.key(), req.affinity_node);

            self.replicate_locked(&inner, None, &new_ver, req.dr_type);

            if req.event {
                if transform_closure.is_some() && cctx.events().is_recordable(EventType::Read) {
                    self.add_event(
                        EventType::Read,
                        req.event_node,
                        None,
                        Some(new_ver.clone()),
                        old_val.clone(),
                        old_val.is_some() || had_val,
                        old_val.clone(),
                        old_val.is_some() || had_val,
                        req.subject,
                        transform_closure.clone(),
                        req.task.clone(),
                    );
                }

                if cctx.events().is_recordable(EventType::Removed) {
                    self.add_event(
                        EventType::Removed,
                        req.event_node,
                        None,
                        Some(new_ver.clone()),
                        None,
                        false,
                        old_val.clone(),
                        old_val.is_some() || had_val,
                        req.subject,
                        None,
                        req.task.clone(),
                    );
                }
            }

            res = had_val;
        }

        if res && req.metrics && cctx.statistics_enabled() {
            if delete {
                cctx.metrics().on_remove();
            } else {
                cctx.metrics().on_write();
            }
        }

        if cctx.is_replicated() || req.primary {
            cctx.continuous_queries().on_entry_updated(
                self.key(),
                updated.as_ref(),
                old_val.as_ref(),
                false,
            );
        }

        cctx.data_structures().on_entry_updated(self.key(), delete);

        if req.intercept {
            if let Some(interceptor) = cctx.interceptor() {
                if !delete {
                    interceptor.on_after_put(self.key(), updated.as_ref().expect("updated"));
                } else {
                    interceptor.on_after_remove(self.key(), old_val.as_ref());

                    if intercept_value.is_some() {
                        old_val = intercept_value;
                    }
                }
            }
        }

        drop(inner);

        tracing::debug!("updated cache entry [old={old_val:?}, entry={self:?}]");

        Ok(AtomicUpdateOutcome {
            success: res,
            old_value: old_val,
            new_value: updated,
            invoke,
            new_sys_ttl,
            new_sys_expire_time: new_sys_expire,
            enqueue_version: if delete { enqueue_ver } else { None },
            conflict: conflict_ctx,
            committed: true,
        })
    }

    /// Push the current state to the store when an equal-version duplicate
    /// arrives on the primary: the peer may have missed the original store
    /// write.
    fn repair_store_locked(&self, inner: &EntryInner) -> Result<()> {
        let store = self.context().store().expect("store").clone();
        match self.raw_get_or_unmarshal_locked(inner)? {
            Some(value) => store.put(None, self.key(), &value, &inner.version),
            None => {
                strict_assert!(self.deleted_locked(inner));
                store.remove(None, self.key())
            }
        }
    }

    /// Replicate across data centers when enabled.
    pub(crate) fn replicate_locked(
        &self,
        inner: &EntryInner,
        value: Option<&CacheValue>,
        ver: &EntryVersion,
        dr_type: DrType,
    ) {
        if let Some(replicator) = self.context().replicator() {
            if dr_type != DrType::None && !self.is_internal() {
                replicator.replicate(
                    self.key(),
                    value,
                    inner.extras.ttl(),
                    inner.extras.expire_time(),
                    ver.conflict_version(),
                    dr_type,
                );
            }
        }
    }

    /// TTL, expire time and remove flag for the given explicit values and
    /// expiry policy.
    pub(crate) fn ttl_and_expire_time_locked(
        &self,
        inner: &EntryInner,
        expiry: Option<&dyn ExpiryPolicy>,
        explicit_ttl: i64,
        explicit_expire_time: i64,
    ) -> (i64, i64, bool) {
        let mut rmv = false;
        let mut ttl = explicit_ttl;
        let mut expire_time = explicit_expire_time;

        // 1. Unchanged TTL resolves through the expiry policy.
        if ttl == TTL_NOT_CHANGED {
            if let Some(policy) = expiry {
                ttl = if self.has_value_locked(inner) {
                    policy.for_update()
                } else {
                    policy.for_create()
                };
            }
        }

        // 2. Zero TTL sets the delete marker.
        if ttl == TTL_ZERO {
            rmv = true;
            ttl = TTL_ETERNAL;
        }

        // 3. Still unchanged: keep the entry's TTL, or eternal for new ones.
        if ttl == TTL_NOT_CHANGED {
            if self.is_start_version(inner) {
                ttl = TTL_ETERNAL;
            } else {
                ttl = inner.extras.ttl();
                expire_time = inner.extras.expire_time();
            }
        }

        // 4. Derive the expire time unless explicitly given.
        if expire_time == EXPIRE_TIME_CALCULATE {
            expire_time = to_expire_time(self.context().clock(), ttl);
        }

        (ttl, expire_time, rmv)
    }
}

/// Initial TTL/expire pair for a value loaded from the store.
pub(crate) fn initial_ttl_and_expire_time(entry: &MapEntry, policy: &dyn ExpiryPolicy) -> (i64, i64) {
    let clock = entry.context().clock();
    let ttl = policy.for_create();

    if ttl == TTL_ZERO {
        (TTL_MINIMUM, expire_time_in_past(clock))
    } else if ttl == TTL_NOT_CHANGED {
        (TTL_ETERNAL, EXPIRE_TIME_ETERNAL)
    } else {
        (ttl, to_expire_time(clock, ttl))
    }
}
