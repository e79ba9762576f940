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

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    conflict::{ConflictContext, ConflictDecision, ConflictResolver, VersionedEntryView},
    context::{AtomicityMode, CacheConfig, CacheTopology, MemoryMode},
    dr::{DrType, Replicator},
    event::EventType,
    interceptor::{Interceptor, RemoveIntercept},
    offheap::UnsafeArena,
    op::{
        AtomicUpdateRequest, EntryProcessor, GetRequest, InvokeEntry, LocalUpdateRequest, PeekMode,
        Peeked, TxRemoveRequest, TxWriteRequest, WriteCommand,
    },
    store::Store,
    test_utils::{bkey, bval, FixedExpiryPolicy, TestCache, TestTx},
    ttl::{TTL_ETERNAL, TTL_ZERO},
    tx::TxPending,
    value::{CacheKey, CacheValue},
    variant::LocalFamily,
    version::EntryVersion,
};

use super::MapEntry;

fn tx_config() -> CacheConfig {
    CacheConfig {
        statistics_enabled: true,
        ..CacheConfig::default()
    }
}

fn atomic_config() -> CacheConfig {
    CacheConfig {
        atomicity: AtomicityMode::Atomic,
        topology: CacheTopology::Partitioned,
        statistics_enabled: true,
        ..CacheConfig::default()
    }
}

fn atomic_local_config() -> CacheConfig {
    CacheConfig {
        atomicity: AtomicityMode::Atomic,
        topology: CacheTopology::Local,
        statistics_enabled: true,
        ..CacheConfig::default()
    }
}

fn entry(cache: &TestCache, key: &str, val: Option<&str>, ttl: i64) -> Arc<MapEntry> {
    MapEntry::new(
        cache.cctx.clone(),
        Arc::new(LocalFamily),
        bkey(key),
        val.map(bval),
        ttl,
    )
    .unwrap()
}

#[derive(Debug, Default)]
struct RecordingReplicator {
    replicated: Mutex<Vec<(CacheKey, Option<CacheValue>, DrType)>>,
}

impl Replicator for RecordingReplicator {
    fn replicate(
        &self,
        key: &CacheKey,
        value: Option<&CacheValue>,
        _ttl: i64,
        _expire_time: i64,
        _conflict_version: &EntryVersion,
        dr_type: DrType,
    ) {
        self.replicated
            .lock()
            .push((key.clone(), value.cloned(), dr_type));
    }
}

struct MergeResolver {
    merged: CacheValue,
}

impl ConflictResolver for MergeResolver {
    fn resolve(
        &self,
        _old: &VersionedEntryView,
        _new: &VersionedEntryView,
        _atomic_ver_check: bool,
    ) -> ConflictContext {
        ConflictContext {
            decision: ConflictDecision::Merge(Some(self.merged.clone())),
            ttl: TTL_ETERNAL,
            expire_time: 0,
        }
    }
}

struct AppendProcessor {
    suffix: &'static str,
}

impl EntryProcessor for AppendProcessor {
    fn process(&self, entry: &mut InvokeEntry<'_>) -> anyhow::Result<Option<CacheValue>> {
        let mut bytes = entry
            .value()
            .map(|v| v.value_bytes().to_vec())
            .unwrap_or_default();
        bytes.extend_from_slice(self.suffix.as_bytes());
        entry.set_value(CacheValue::bytes(bytes));
        Ok(None)
    }
}

struct IdentityProcessor;

impl EntryProcessor for IdentityProcessor {
    fn process(&self, _entry: &mut InvokeEntry<'_>) -> anyhow::Result<Option<CacheValue>> {
        Ok(Some(bval("seen")))
    }
}

struct VetoPutInterceptor;

impl Interceptor for VetoPutInterceptor {
    fn on_before_put(
        &self,
        _key: &CacheKey,
        _old: Option<&CacheValue>,
        _new: &CacheValue,
    ) -> Option<CacheValue> {
        None
    }
}

struct CancelRemoveInterceptor;

impl Interceptor for CancelRemoveInterceptor {
    fn on_before_remove(&self, _key: &CacheKey, old: Option<&CacheValue>) -> RemoveIntercept {
        RemoveIntercept {
            cancel: true,
            value: old.cloned(),
        }
    }
}

// ===== §8 end-to-end scenarios =====

#[test]
fn test_fresh_put_then_get() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", None, 0);

    let start = e.version().unwrap();

    let res = e.inner_set(None, TxWriteRequest::new(bval("1"))).unwrap();
    assert!(res.updated);
    assert_eq!(res.value, None);

    let after_set = e.version().unwrap();
    assert_eq!(after_set.order(), start.order() + 1);

    let got = e.inner_get(None, GetRequest::new()).unwrap();
    assert_eq!(got, Some(bval("1")));

    // The read does not advance the version.
    assert_eq!(e.version().unwrap(), after_set);

    assert_eq!(cache.events.count(EventType::Put), 1);
    assert_eq!(cache.events.count(EventType::Read), 1);
    assert_eq!(cache.events.count(EventType::Expired), 0);
}

#[test]
fn test_expired_on_read_emits_expired_once() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("x"), 1);

    cache.clock.advance(2);

    let got = e.inner_get(None, GetRequest::new()).unwrap();
    assert_eq!(got, None);
    assert!(!e.has_value());

    let expired = cache.events.events_of(EventType::Expired);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].old_value, Some(bval("x")));
    assert!(expired[0].has_old);
    assert_eq!(cache.events.count(EventType::Read), 0);

    // The continuous-query notifier sees the expiry too.
    assert_eq!(cache.continuous.expired.lock().len(), 1);
}

#[test_log::test]
fn test_read_through_concurrent_readers_commit_once() {
    let mut config = tx_config();
    config.read_through = true;
    let cache = TestCache::new(config);
    cache.store.seed(bkey("A"), bval("s"));

    let e = entry(&cache, "A", None, 0);
    let start = e.version().unwrap();

    let threads: Vec<_> = (0..2)
        .map(|_| {
            let e = e.clone();
            std::thread::spawn(move || {
                e.inner_get(None, GetRequest::new().read_through()).unwrap()
            })
        })
        .collect();

    for t in threads {
        assert_eq!(t.join().unwrap(), Some(bval("s")));
    }

    assert_eq!(e.raw_get(), Some(bval("s")));
    // Only the reader whose captured version still matched committed.
    assert_eq!(e.version().unwrap().order(), start.order() + 1);
    assert!(cache.store.loads.load(Ordering::SeqCst) >= 1);
    assert_eq!(cache.events.count(EventType::Put), 0);
}

#[test]
fn test_atomic_update_with_stale_version_is_ignored() {
    let cache = TestCache::new(atomic_config());
    let e = entry(&cache, "A", None, 0);

    let v5 = EntryVersion::new(1, 1_000, 7, 0);
    let res = e
        .inner_update(AtomicUpdateRequest::new(
            v5.clone(),
            WriteCommand::Put(bval("v5")),
        ))
        .unwrap();
    assert!(res.success);

    cache.events.clear();

    let v3 = EntryVersion::new(1, 500, 7, 0);
    let mut req = AtomicUpdateRequest::new(v3, WriteCommand::Put(bval("v3")));
    req.version_check = true;
    let res = e.inner_update(req).unwrap();

    assert!(!res.success);
    assert!(!res.committed);
    assert_eq!(res.old_value, Some(bval("v5")));
    assert_eq!(e.raw_get(), Some(bval("v5")));
    assert!(cache.events.events().is_empty());
}

#[test]
fn test_equal_version_duplicate_repairs_store_on_primary() {
    let mut config = atomic_config();
    config.write_through = true;
    let cache = TestCache::new(config);
    let e = entry(&cache, "A", None, 0);

    let ver = EntryVersion::new(1, 1_000, 7, 0);
    let mut req = AtomicUpdateRequest::new(ver.clone(), WriteCommand::Put(bval("v")));
    req.write_through = true;
    e.inner_update(req).unwrap();

    let puts_before = cache.store.puts.load(Ordering::SeqCst);

    // The very same version arrives again on the primary.
    let mut req = AtomicUpdateRequest::new(ver, WriteCommand::Put(bval("v")));
    req.version_check = true;
    req.write_through = true;
    let res = e.inner_update(req).unwrap();

    assert!(!res.success);
    assert_eq!(cache.store.puts.load(Ordering::SeqCst), puts_before + 1);
    assert_eq!(cache.store.get(&bkey("A")), Some(bval("v")));
}

#[test]
fn test_conflict_resolver_merge() {
    let replicator = Arc::new(RecordingReplicator::default());
    let cache = TestCache::build(atomic_config(), |b| {
        b.with_conflict_resolver(Arc::new(MergeResolver { merged: bval("ab") }))
            .with_replicator(replicator.clone())
    });
    let e = entry(&cache, "A", None, 0);

    let remote = EntryVersion::new(1, 10, 3, 2);
    let mut req = AtomicUpdateRequest::new(
        EntryVersion::new(1, 1_000, 7, 0),
        WriteCommand::Put(bval("b")),
    );
    req.conflict_version = Some(remote);
    req.conflict_resolve = true;
    req.dr_type = DrType::Primary;

    let res = e.inner_update(req).unwrap();

    assert!(res.success);
    assert_eq!(res.new_value, Some(bval("ab")));
    assert_eq!(e.raw_get(), Some(bval("ab")));

    // Merge discards the conflict version: the committed version is regular.
    let ver = e.version().unwrap();
    assert!(!ver.has_conflict_version());

    let replicated = replicator.replicated.lock();
    assert_eq!(replicated.len(), 1);
    assert_eq!(replicated[0].1, Some(bval("ab")));
}

#[test]
fn test_deferred_delete_tombstone_then_obsolete() {
    let mut config = tx_config();
    config.deferred_delete = true;
    let cache = TestCache::new(config);
    let e = entry(&cache, "A", None, 0);

    e.inner_set(None, TxWriteRequest::new(bval("1"))).unwrap();

    let res = e.inner_remove(None, TxRemoveRequest::new()).unwrap();
    assert!(res.updated);
    assert_eq!(res.value, Some(bval("1")));

    // Tombstone set, value cleared, not yet obsolete.
    assert!(e.deleted());
    assert!(!e.has_value());
    assert!(e.obsolete_version().is_none());

    let enqueued = e.version().unwrap();
    cache.events.clear();

    assert!(e.on_ttl_expired(&enqueued));
    assert!(e.obsolete());
    assert_eq!(cache.events.count(EventType::Expired), 0);
}

// ===== boundary behaviors =====

#[test]
fn test_ttl_zero_rewrites_atomic_update_to_delete() {
    let cache = TestCache::new(atomic_config());
    let e = entry(&cache, "A", None, 0);

    e.inner_update(AtomicUpdateRequest::new(
        EntryVersion::new(1, 100, 7, 0),
        WriteCommand::Put(bval("v")),
    ))
    .unwrap();

    let mut req = AtomicUpdateRequest::new(
        EntryVersion::new(1, 200, 7, 0),
        WriteCommand::Put(bval("w")),
    );
    req.expiry = Some(Arc::new(FixedExpiryPolicy {
        create: TTL_ZERO,
        update: TTL_ZERO,
        access: crate::ttl::TTL_NOT_CHANGED,
    }));

    let res = e.inner_update(req).unwrap();

    assert!(res.success);
    assert_eq!(res.new_value, None);
    assert!(!e.has_value());
    assert_eq!(cache.events.count(EventType::Removed), 1);
}

#[test]
fn test_transform_without_modification_is_no_change() {
    let cache = TestCache::new(atomic_config());
    let e = entry(&cache, "A", None, 0);

    e.inner_update(AtomicUpdateRequest::new(
        EntryVersion::new(1, 100, 7, 0),
        WriteCommand::Put(bval("v")),
    ))
    .unwrap();
    cache.events.clear();

    let mut req = AtomicUpdateRequest::new(
        EntryVersion::new(1, 200, 7, 0),
        WriteCommand::Transform(Arc::new(IdentityProcessor)),
    );
    req.expiry = Some(Arc::new(FixedExpiryPolicy {
        create: crate::ttl::TTL_NOT_CHANGED,
        update: crate::ttl::TTL_NOT_CHANGED,
        access: 5_000,
    }));

    let res = e.inner_update(req).unwrap();

    assert!(!res.success);
    assert!(res.invoke.is_some());
    assert_eq!(cache.events.count(EventType::Put), 0);
    // The access rule still refreshed the TTL.
    assert_eq!(e.raw_ttl(), 5_000);
}

#[test]
fn test_transform_appends_and_emits_read_and_put() {
    let cache = TestCache::new(atomic_config());
    let e = entry(&cache, "A", None, 0);

    e.inner_update(AtomicUpdateRequest::new(
        EntryVersion::new(1, 100, 7, 0),
        WriteCommand::Put(bval("a")),
    ))
    .unwrap();
    cache.events.clear();

    let res = e
        .inner_update(AtomicUpdateRequest::new(
            EntryVersion::new(1, 200, 7, 0),
            WriteCommand::Transform(Arc::new(AppendProcessor { suffix: "b" })),
        ))
        .unwrap();

    assert!(res.success);
    assert_eq!(res.new_value, Some(bval("ab")));
    assert_eq!(cache.events.count(EventType::Read), 1);
    assert_eq!(cache.events.count(EventType::Put), 1);

    let read = &cache.events.events_of(EventType::Read)[0];
    assert!(read.transform_closure.is_some());
}

#[test]
fn test_interceptor_veto_aborts_put() {
    let cache = TestCache::build(tx_config(), |b| b.with_interceptor(Arc::new(VetoPutInterceptor)));
    let e = entry(&cache, "A", None, 0);

    e.inner_set(None, TxWriteRequest::new(bval("1"))).unwrap();
    // The veto interceptor rejects every put, including the first.
    assert!(!e.has_value());
    assert_eq!(cache.events.count(EventType::Put), 0);
}

#[test]
fn test_interceptor_cancels_remove() {
    let cache =
        TestCache::build(tx_config(), |b| b.with_interceptor(Arc::new(CancelRemoveInterceptor)));
    let e = entry(&cache, "A", Some("keep"), 0);

    let res = e.inner_remove(None, TxRemoveRequest::new()).unwrap();
    assert!(!res.updated);
    assert_eq!(res.value, Some(bval("keep")));
    assert!(e.has_value());
    assert_eq!(cache.events.count(EventType::Removed), 0);
}

#[test]
fn test_remove_without_deferred_delete_obsoletes() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", None, 0);

    e.inner_set(None, TxWriteRequest::new(bval("1"))).unwrap();

    let res = e.inner_remove(None, TxRemoveRequest::new()).unwrap();
    assert!(res.updated);
    assert_eq!(res.value, Some(bval("1")));

    assert!(e.obsolete());
    assert_eq!(cache.events.count(EventType::Removed), 1);

    // Any further operation observes the removed signal.
    let err = e.inner_get(None, GetRequest::new()).unwrap_err();
    assert!(err.is_removed());
}

// ===== round trips =====

#[test]
fn test_set_get_roundtrip_offheap_values() {
    let mut config = tx_config();
    config.memory_mode = MemoryMode::OffHeapValues;
    let arena = Arc::new(UnsafeArena::new());
    let cache = TestCache::build(config, |b| b.with_offheap(arena.clone()));
    let e = entry(&cache, "A", None, 0);

    e.inner_set(None, TxWriteRequest::new(bval("payload"))).unwrap();

    // The heap slot stays empty; the bytes live off-heap only.
    assert_eq!(e.raw_get(), None);
    assert_eq!(arena.live(), 1);

    let got = e.inner_get(None, GetRequest::new()).unwrap();
    assert_eq!(got, Some(bval("payload")));

    // Replacement reuses the slot rather than leaking blobs.
    e.inner_set(None, TxWriteRequest::new(bval("other"))).unwrap();
    assert_eq!(arena.live(), 1);
    assert_eq!(e.inner_get(None, GetRequest::new()).unwrap(), Some(bval("other")));
}

#[test]
fn test_swap_then_unswap_preserves_version() {
    let mut config = tx_config();
    config.swap_enabled = true;
    let cache = TestCache::new(config);

    let e1 = entry(&cache, "A", None, 0);
    e1.inner_set(None, TxWriteRequest::new(bval("v"))).unwrap();
    let ver = e1.version().unwrap();

    e1.swap_out().unwrap();
    assert!(cache.swap.contains(&bkey("A")));

    // A freshly constructed entry for the same key promotes the swapped
    // value, version included.
    let e2 = entry(&cache, "A", None, 0);
    let promoted = e2.unswap(false, true).unwrap();
    assert_eq!(promoted, Some(bval("v")));
    assert_eq!(e2.version().unwrap(), ver);
    assert!(!cache.swap.contains(&bkey("A")));

    // The promote runs at most once.
    assert_eq!(e2.unswap(false, true).unwrap(), None);
}

#[test]
fn test_expired_value_is_not_promoted_from_swap() {
    let mut config = tx_config();
    config.swap_enabled = true;
    let cache = TestCache::new(config);

    let e1 = entry(&cache, "A", None, 0);
    let mut req = TxWriteRequest::new(bval("v"));
    req.ttl = 5;
    e1.inner_set(None, req).unwrap();
    e1.swap_out().unwrap();

    cache.clock.advance(10);

    let e2 = entry(&cache, "A", None, 0);
    assert_eq!(e2.unswap(false, true).unwrap(), None);
    assert!(!e2.has_value());
}

#[test]
fn test_initial_value_applies_only_to_new_entries() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", None, 0);

    let ver = cache.cctx.versions().next();
    assert!(e
        .initial_value(Some(bval("v")), ver, 0, 0, true, 1, DrType::None)
        .unwrap());
    assert_eq!(e.raw_get(), Some(bval("v")));

    let ver2 = cache.cctx.versions().next();
    assert!(!e
        .initial_value(Some(bval("w")), ver2, 0, 0, true, 1, DrType::None)
        .unwrap());
    assert_eq!(e.raw_get(), Some(bval("v")));
}

// ===== invariants =====

#[test_log::test]
fn test_version_monotonic_under_concurrent_writers() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", None, 0);
    let start = e.version().unwrap();

    let threads: Vec<_> = (0..4)
        .map(|i| {
            let e = e.clone();
            std::thread::spawn(move || {
                for j in 0..25 {
                    let val = bval(&format!("{i}-{j}"));
                    e.inner_set(None, TxWriteRequest::new(val)).unwrap();
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    let end = e.version().unwrap();
    assert_eq!(end.order(), start.order() + 100);
    assert_eq!(cache.events.count(EventType::Put), 100);
}

#[test]
fn test_obsolete_entry_raises_removed_everywhere() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("v"), 0);

    let ver = cache.cctx.versions().next();
    assert!(e.mark_obsolete(&ver));
    assert_eq!(e.obsolete_version(), Some(ver));

    assert!(e.inner_get(None, GetRequest::new()).unwrap_err().is_removed());
    assert!(e
        .inner_set(None, TxWriteRequest::new(bval("w")))
        .unwrap_err()
        .is_removed());
    assert!(e.version().unwrap_err().is_removed());
    assert!(e.is_new().unwrap_err().is_removed());
    assert!(e.poke(bval("w")).unwrap_err().is_removed());
}

#[test]
fn test_memory_size_formula() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", None, 0);

    // No value, no extras: 77 + 0 + 1 + max(1, 0).
    assert_eq!(e.memory_size(), 77 + 1 + 1);

    e.inner_set(None, TxWriteRequest::new(bval("1"))).unwrap();
    assert_eq!(e.memory_size(), 77 + 1 + 1);

    let mut req = TxWriteRequest::new(bval("12345"));
    req.ttl = 1_000;
    e.inner_set(None, req).unwrap();
    // TTL extras shape accounts for 16 bytes.
    assert_eq!(e.memory_size(), 77 + 16 + 1 + 5);
}

#[test]
fn test_mark_obsolete_blocked_by_lock_candidates() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("v"), 0);

    let lock_ver = cache.cctx.versions().next();
    let mut mvcc = crate::mvcc::Mvcc::new();
    mvcc.add_candidate(crate::mvcc::MvccCandidate {
        version: lock_ver.clone(),
        node: 1,
        thread_id: 42,
        local: true,
        owner: true,
    });
    e.set_mvcc(Some(mvcc));

    // A different version cannot obsolete the locked entry.
    let other = cache.cctx.versions().next();
    assert!(!e.mark_obsolete(&other));
    assert!(!e.obsolete());

    // The candidate's own version can.
    assert!(e.mark_obsolete(&lock_ver));
    assert!(e.obsolete());
}

#[test]
fn test_lock_candidate_queries() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("v"), 0);

    let lock_ver = cache.cctx.versions().next();
    let mut mvcc = crate::mvcc::Mvcc::new();
    mvcc.add_candidate(crate::mvcc::MvccCandidate {
        version: lock_ver.clone(),
        node: 1,
        thread_id: 42,
        local: true,
        owner: true,
    });
    e.set_mvcc(Some(mvcc));

    assert!(e.has_lock_candidate(&lock_ver).unwrap());
    assert!(e.has_lock_candidate_for_thread(42).unwrap());
    assert!(e.locked_by(&lock_ver).unwrap());
    assert!(e.locked_by_thread(42).unwrap());
    assert!(e.locked_locally(&lock_ver).unwrap());
    assert!(e.locked_by_any(&[]).unwrap());
    assert!(!e.locked_by_any(&[&lock_ver]).unwrap());
    assert!(e.local_owner().unwrap().is_some());
    assert_eq!(e.local_candidates(&[]).unwrap().len(), 1);
    assert!(e.candidate_for(1, 42).unwrap().is_some());
}

// ===== maintenance operations =====

#[test]
fn test_poke_refreshes_value_without_events() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("1"), 0);
    cache.events.clear();

    let old = e.poke(bval("2")).unwrap();
    assert_eq!(old, Some(bval("1")));
    assert_eq!(e.raw_get(), Some(bval("2")));
    assert!(cache.events.events().is_empty());
}

#[test]
fn test_versioned_value_applies_only_on_matching_version() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("1"), 0);
    let cur = e.version().unwrap();

    let stale = cache.cctx.versions().next();
    assert!(!e.versioned_value(bval("2"), Some(&stale), None).unwrap());
    assert_eq!(e.raw_get(), Some(bval("1")));

    assert!(e.versioned_value(bval("2"), Some(&cur), None).unwrap());
    assert_eq!(e.raw_get(), Some(bval("2")));
}

#[test]
fn test_invalidate_empties_without_obsoleting() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("1"), 0);
    let cur = e.version().unwrap();

    let new_ver = cache.cctx.versions().next();
    assert!(!e.invalidate(Some(&cur), new_ver.clone()).unwrap());

    assert!(!e.has_value());
    assert!(!e.obsolete());
    assert_eq!(e.version().unwrap(), new_ver);
}

#[test]
fn test_clear_marks_obsolete_and_unlinks() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("1"), 0);

    let ver = cache.cctx.versions().next();
    assert!(e.clear(&ver, false, None).unwrap());
    assert!(e.obsolete());
    assert!(!e.has_value());
}

#[test]
fn test_compact_keeps_live_values_and_clears_expired() {
    let cache = TestCache::new(tx_config());

    let live = entry(&cache, "A", Some("1"), 0);
    assert!(!live.compact(None).unwrap());
    assert!(live.has_value());

    let expiring = entry(&cache, "B", Some("2"), 5);
    cache.clock.advance(10);
    assert!(expiring.compact(None).unwrap());
    assert!(expiring.obsolete());
}

#[test]
fn test_evict_internal_with_swap_spills_value() {
    let mut config = tx_config();
    config.swap_enabled = true;
    let cache = TestCache::new(config);
    let e = entry(&cache, "A", None, 0);
    e.inner_set(None, TxWriteRequest::new(bval("v"))).unwrap();

    let ver = cache.cctx.versions().next();
    assert!(e.evict_internal(true, &ver, None).unwrap());

    assert!(e.obsolete());
    assert!(!e.has_value());
    assert!(cache.swap.contains(&bkey("A")));
}

#[test]
fn test_evict_in_batch_returns_descriptor() {
    let mut config = tx_config();
    config.swap_enabled = true;
    let cache = TestCache::new(config);
    let e = entry(&cache, "A", None, 0);
    e.inner_set(None, TxWriteRequest::new(bval("v"))).unwrap();
    let ver = e.version().unwrap();

    let obsolete_ver = cache.cctx.versions().next();
    let batch = e.evict_in_batch(&obsolete_ver).unwrap().unwrap();

    assert_eq!(&batch.value_bytes[..], b"v");
    assert_eq!(batch.version, ver);
    assert!(e.obsolete());
    assert!(!e.has_value());
}

#[test]
fn test_on_ttl_expired_emits_expired_and_obsoletes() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("x"), 5);

    cache.clock.advance(10);

    let ver = cache.cctx.versions().next();
    assert!(e.on_ttl_expired(&ver));
    assert!(e.obsolete());

    let expired = cache.events.events_of(EventType::Expired);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].old_value, Some(bval("x")));
}

#[test]
fn test_mark_obsolete_if_empty() {
    let cache = TestCache::new(tx_config());

    let empty = entry(&cache, "A", None, 0);
    assert!(empty.mark_obsolete_if_empty(None).unwrap());
    assert!(empty.obsolete());

    let live = entry(&cache, "B", Some("v"), 0);
    assert!(!live.mark_obsolete_if_empty(None).unwrap());
    assert!(!live.obsolete());
}

// ===== atomic local =====

#[test]
fn test_inner_update_local_put_and_transform() {
    let cache = TestCache::new(atomic_local_config());
    let e = entry(&cache, "A", None, 0);

    let ver = cache.cctx.versions().next();
    let mut req = LocalUpdateRequest::new(ver, WriteCommand::Put(bval("a")));
    req.write_through = true;
    let res = e.inner_update_local(req).unwrap();
    assert!(res.changed);
    // Write-through persisted inside the lock.
    assert_eq!(cache.store.get(&bkey("A")), Some(bval("a")));

    let ver = cache.cctx.versions().next();
    let res = e
        .inner_update_local(LocalUpdateRequest::new(
            ver,
            WriteCommand::Transform(Arc::new(AppendProcessor { suffix: "b" })),
        ))
        .unwrap();
    assert!(res.changed);
    assert_eq!(e.raw_get(), Some(bval("ab")));

    let ver = cache.cctx.versions().next();
    let res = e
        .inner_update_local(LocalUpdateRequest::new(ver, WriteCommand::Remove))
        .unwrap();
    assert!(res.changed);
    assert!(!e.has_value());
    assert_eq!(cache.events.count(EventType::Removed), 1);
}

#[test]
fn test_inner_update_local_filter_rejection() {
    let cache = TestCache::new(atomic_local_config());
    let e = entry(&cache, "A", Some("v"), 0);

    let ver = cache.cctx.versions().next();
    let mut req = LocalUpdateRequest::new(ver, WriteCommand::Put(bval("w")));
    req.filter = Some(Arc::new(|val: Option<&CacheValue>| val.is_none()));
    let res = e.inner_update_local(req).unwrap();

    assert!(!res.changed);
    assert_eq!(res.value, Some(bval("v")));
    assert_eq!(e.raw_get(), Some(bval("v")));
}

// ===== peek surface =====

#[test]
fn test_peek_global_and_tx() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("global"), 0);

    assert_eq!(e.peek(PeekMode::Global, None).unwrap(), Some(bval("global")));

    let tx = TestTx::new(
        cache.cctx.versions().next(),
        cache.cctx.versions().next(),
    );
    tx.enlist(bkey("A"), TxPending::Write(bval("pending")));

    let peeked = e.peek0(false, PeekMode::Tx, None, Some(&tx)).unwrap();
    assert_eq!(peeked, Peeked::Value(Some(bval("pending"))));

    // SMART prefers the active transaction's write set.
    let peeked = e.peek0(false, PeekMode::Smart, None, Some(&tx)).unwrap();
    assert_eq!(peeked, Peeked::Value(Some(bval("pending"))));

    // A pending delete is a definite decision too.
    tx.enlist(bkey("A"), TxPending::Remove);
    let peeked = e.peek0(false, PeekMode::Smart, None, Some(&tx)).unwrap();
    assert_eq!(peeked, Peeked::Value(None));
}

#[test]
fn test_peek_swap_and_db() {
    let mut config = tx_config();
    config.swap_enabled = true;
    config.read_through = true;
    let cache = TestCache::new(config);
    let e = entry(&cache, "A", None, 0);

    cache.store.seed(bkey("A"), bval("db"));
    assert_eq!(e.peek(PeekMode::Db, None).unwrap(), Some(bval("db")));

    let ver = cache.cctx.versions().next();
    cache.swap.seed(
        bkey("A"),
        crate::swap::SwapEntry {
            value_bytes: bytes::Bytes::from_static(b"swapped"),
            type_tag: CacheValue::TYPE_BYTES,
            version: ver,
            ttl: 0,
            expire_time: 0,
            offheap_ptr: None,
            key_loader: None,
            value_loader: None,
        },
    );
    assert_eq!(e.peek(PeekMode::Swap, None).unwrap(), Some(bval("swapped")));

    // Peeks never promoted anything into the entry.
    assert!(!e.has_value());
}

#[test]
fn test_peek_global_obsoletes_expired_entry() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("x"), 5);

    cache.clock.advance(10);

    let peeked = e.peek_global(1, None, None).unwrap();
    assert_eq!(peeked, Peeked::Miss);
    assert!(e.obsolete());
}

#[test]
fn test_peek_filter_failure_is_a_sentinel() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("v"), 0);

    let filter: crate::op::EntryFilter = Arc::new(|_val: Option<&CacheValue>| false);
    let peeked = e.peek_global(1, Some(&filter), None).unwrap();
    assert_eq!(peeked, Peeked::FilterFailed);

    // The public surface maps the sentinel to a plain miss.
    assert_eq!(e.peek(PeekMode::Global, Some(&filter)).unwrap(), None);
}

#[test]
fn test_wrappers_and_info() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", None, 0);
    e.inner_set(None, TxWriteRequest::new(bval("v"))).unwrap();

    let wrapped = e.wrap().unwrap();
    assert_eq!(wrapped.value, Some(bval("v")));

    let lazy = e.wrap_lazy();
    assert_eq!(lazy.value(), Some(bval("v")));

    let versioned = e.wrap_versioned();
    assert_eq!(versioned.version, e.version().unwrap());

    let info = e.info().unwrap();
    assert_eq!(info.value, Some(bval("v")));
    assert!(!info.is_new);
    assert!(!info.deleted);

    let snap = e.versioned_entry().unwrap();
    assert_eq!(snap.value, Some(bval("v")));
    assert!(!snap.is_new);

    assert_eq!(e.value_bytes(None).unwrap(), Some(bval("v")));
    let stale = cache.cctx.versions().next();
    assert_eq!(e.value_bytes(Some(&stale)).unwrap(), None);
}

#[test]
fn test_attributes_api() {
    let cache = TestCache::new(tx_config());
    let e = entry(&cache, "A", Some("v"), 0);

    let one = bytes::Bytes::from_static(b"1");
    let two = bytes::Bytes::from_static(b"2");

    assert_eq!(e.add_attr("meta", one.clone()), None);
    assert_eq!(e.attr("meta"), Some(one.clone()));
    assert!(e.has_attr("meta"));

    assert!(!e.replace_attr("meta", &two, one.clone()));
    assert!(e.replace_attr("meta", &one, two.clone()));
    assert_eq!(e.attr("meta"), Some(two.clone()));

    assert!(!e.remove_attr_eq("meta", &one));
    assert!(e.remove_attr_eq("meta", &two));
    assert!(!e.has_attr("meta"));

    assert_eq!(e.attr_if_absent("meta", one.clone()), one);
    assert_eq!(e.remove_attr("meta"), Some(one));
}

#[test]
fn test_store_failure_propagates_from_read_through() {
    let mut config = tx_config();
    config.read_through = true;
    let cache = TestCache::build(config, |b| {
        b.with_store(Arc::new(crate::test_utils::FailingStore))
    });
    let e = entry(&cache, "A", None, 0);

    let err = e
        .inner_get(None, GetRequest::new().read_through())
        .unwrap_err();
    assert!(matches!(err.kind(), crate::error::ErrorKind::Store(_)));
}

#[test]
fn test_inner_reload_commits_store_value() {
    let mut config = tx_config();
    config.read_through = true;
    let cache = TestCache::new(config);
    let e = entry(&cache, "A", Some("stale"), 0);

    cache.store.seed(bkey("A"), bval("fresh"));

    let reloaded = e.inner_reload().unwrap();
    assert_eq!(reloaded, Some(bval("fresh")));
    assert_eq!(e.raw_get(), Some(bval("fresh")));

    // A reload of a missing key clears the entry.
    cache.store.remove(None, &bkey("A")).unwrap();
    let reloaded = e.inner_reload().unwrap();
    assert_eq!(reloaded, None);
    assert!(!e.has_value());
}

static TOUCHES: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
struct CountingEvictions;

impl crate::hooks::EvictionObserver for CountingEvictions {
    fn touch(&self, _key: &CacheKey, _topology_version: u32) {
        TOUCHES.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_reload_touches_eviction_policy() {
    let mut config = tx_config();
    config.read_through = true;
    let cache = TestCache::build(config, |b| b.with_evictions(Arc::new(CountingEvictions)));
    let e = entry(&cache, "A", None, 0);

    cache.store.seed(bkey("A"), bval("v"));

    let before = TOUCHES.load(Ordering::SeqCst);
    e.inner_reload().unwrap();
    assert_eq!(TOUCHES.load(Ordering::SeqCst), before + 1);
}
