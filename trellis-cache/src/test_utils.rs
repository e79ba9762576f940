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

//! Recording and in-memory collaborators for tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use trellis_common::clock::ManualClock;

use crate::{
    context::{CacheConfig, CacheContext, CacheContextBuilder, NodeId},
    error::{Error, Result},
    event::{ContinuousQueries, EntryEvent, EventBus, EventType},
    store::Store,
    swap::{SwapEntry, SwapManager},
    ttl::{ExpiryPolicy, TtlTracker, TTL_NOT_CHANGED},
    tx::{Transaction, TxPending},
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Event bus that records everything.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<EntryEvent>>,
}

impl RecordingEventBus {
    pub fn events(&self) -> Vec<EntryEvent> {
        self.events.lock().clone()
    }

    pub fn events_of(&self, event_type: EventType) -> Vec<EntryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect_vec()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events_of(event_type).len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventBus for RecordingEventBus {
    fn is_recordable(&self, _event_type: EventType) -> bool {
        true
    }

    fn record(&self, event: EntryEvent) {
        self.events.lock().push(event);
    }
}

/// Continuous-query notifier that records the notifications.
#[derive(Debug, Default)]
pub struct RecordingContinuousQueries {
    pub updated: Mutex<Vec<(CacheKey, Option<CacheValue>, Option<CacheValue>, bool)>>,
    pub expired: Mutex<Vec<(CacheKey, Option<CacheValue>)>>,
}

impl ContinuousQueries for RecordingContinuousQueries {
    fn on_entry_updated(
        &self,
        key: &CacheKey,
        new_value: Option<&CacheValue>,
        old_value: Option<&CacheValue>,
        preload: bool,
    ) {
        self.updated.lock().push((
            key.clone(),
            new_value.cloned(),
            old_value.cloned(),
            preload,
        ));
    }

    fn on_entry_expired(&self, key: &CacheKey, expired_value: Option<&CacheValue>) {
        self.expired.lock().push((key.clone(), expired_value.cloned()));
    }
}

/// In-memory store with call counters and a fail switch.
#[derive(Debug, Default)]
pub struct MemStore {
    data: Mutex<HashMap<CacheKey, CacheValue>>,
    pub loads: AtomicUsize,
    pub puts: AtomicUsize,
    pub removes: AtomicUsize,
    local: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local() -> Self {
        Self {
            local: true,
            ..Self::default()
        }
    }

    pub fn seed(&self, key: CacheKey, value: CacheValue) {
        self.data.lock().insert(key, value);
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.data.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.data.lock().contains_key(key)
    }
}

impl Store for MemStore {
    fn load(&self, _tx: Option<&dyn Transaction>, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.lock().get(key).cloned())
    }

    fn put(
        &self,
        _tx: Option<&dyn Transaction>,
        key: &CacheKey,
        value: &CacheValue,
        _version: &EntryVersion,
    ) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.data.lock().insert(key.clone(), value.clone());
        Ok(())
    }

    fn remove(&self, _tx: Option<&dyn Transaction>, key: &CacheKey) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.data.lock().remove(key);
        Ok(())
    }

    fn is_local(&self) -> bool {
        self.local
    }
}

/// In-memory swap tier.
#[derive(Debug, Default)]
pub struct MemSwap {
    data: Mutex<HashMap<CacheKey, SwapEntry>>,
    pub writes: AtomicUsize,
    pub removes: AtomicUsize,
}

impl MemSwap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: CacheKey, entry: SwapEntry) {
        self.data.lock().insert(key, entry);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.data.lock().contains_key(key)
    }
}

impl SwapManager for MemSwap {
    fn read(
        &self,
        key: &CacheKey,
        _peek_only: bool,
        _include_offheap: bool,
        _include_swap: bool,
    ) -> Result<Option<SwapEntry>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn read_and_remove(&self, key: &CacheKey) -> Result<Option<SwapEntry>> {
        Ok(self.data.lock().remove(key))
    }

    fn read_offheap_pointer(&self, key: &CacheKey) -> Result<Option<SwapEntry>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn write(&self, key: &CacheKey, entry: SwapEntry) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.data.lock().insert(key.clone(), entry);
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.data.lock().remove(key);
        Ok(())
    }

    fn remove_offheap(&self, key: &CacheKey) -> bool {
        self.data.lock().remove(key).is_some()
    }
}

/// TTL tracker recording the registered keys.
#[derive(Debug, Default)]
pub struct RecordingTtlTracker {
    pub tracked: Mutex<Vec<(CacheKey, i64)>>,
}

impl TtlTracker for RecordingTtlTracker {
    fn add_tracked(&self, key: &CacheKey, expire_time: i64) {
        self.tracked.lock().push((key.clone(), expire_time));
    }

    fn remove_tracked(&self, key: &CacheKey, expire_time: i64) {
        self.tracked
            .lock()
            .retain(|(k, e)| !(k == key && *e == expire_time));
    }
}

/// Expiry policy with fixed answers.
#[derive(Debug)]
pub struct FixedExpiryPolicy {
    pub create: i64,
    pub update: i64,
    pub access: i64,
}

impl FixedExpiryPolicy {
    pub fn not_changed() -> Self {
        Self {
            create: TTL_NOT_CHANGED,
            update: TTL_NOT_CHANGED,
            access: TTL_NOT_CHANGED,
        }
    }
}

impl ExpiryPolicy for FixedExpiryPolicy {
    fn for_create(&self) -> i64 {
        self.create
    }

    fn for_update(&self) -> i64 {
        self.update
    }

    fn for_access(&self) -> i64 {
        self.access
    }
}

/// Transaction stub with a scripted write set.
#[derive(Debug)]
pub struct TestTx {
    pub xid: EntryVersion,
    pub write_version: EntryVersion,
    pub topology_version: u32,
    pub active: bool,
    pub node: NodeId,
    pub pending: Mutex<HashMap<CacheKey, TxPending>>,
}

impl TestTx {
    pub fn new(xid: EntryVersion, write_version: EntryVersion) -> Self {
        Self {
            xid,
            write_version,
            topology_version: 1,
            active: true,
            node: 1,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn enlist(&self, key: CacheKey, pending: TxPending) {
        self.pending.lock().insert(key, pending);
    }
}

impl Transaction for TestTx {
    fn xid(&self) -> EntryVersion {
        self.xid.clone()
    }

    fn write_version(&self) -> EntryVersion {
        self.write_version.clone()
    }

    fn topology_version(&self) -> u32 {
        self.topology_version
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn pending(&self, key: &CacheKey) -> Option<TxPending> {
        self.pending.lock().get(key).cloned()
    }

    fn originating_node(&self) -> NodeId {
        self.node
    }
}

/// Store that fails every call; for store-failure propagation tests.
#[derive(Debug, Default)]
pub struct FailingStore;

impl Store for FailingStore {
    fn load(&self, _tx: Option<&dyn Transaction>, _key: &CacheKey) -> Result<Option<CacheValue>> {
        Err(Error::store(anyhow::anyhow!("store load failed")))
    }

    fn put(
        &self,
        _tx: Option<&dyn Transaction>,
        _key: &CacheKey,
        _value: &CacheValue,
        _version: &EntryVersion,
    ) -> Result<()> {
        Err(Error::store(anyhow::anyhow!("store put failed")))
    }

    fn remove(&self, _tx: Option<&dyn Transaction>, _key: &CacheKey) -> Result<()> {
        Err(Error::store(anyhow::anyhow!("store remove failed")))
    }
}

/// Harness bundling a context with its recording collaborators.
pub struct TestCache {
    pub cctx: Arc<CacheContext>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingEventBus>,
    pub continuous: Arc<RecordingContinuousQueries>,
    pub store: Arc<MemStore>,
    pub swap: Arc<MemSwap>,
}

impl TestCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, |b| b)
    }

    /// Build a context with recording collaborators, letting the test adjust
    /// the builder before it is sealed.
    pub fn build(
        config: CacheConfig,
        customize: impl FnOnce(CacheContextBuilder) -> CacheContextBuilder,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let events = Arc::new(RecordingEventBus::default());
        let continuous = Arc::new(RecordingContinuousQueries::default());
        let store = Arc::new(MemStore::new());
        let swap = Arc::new(MemSwap::new());

        let builder = CacheContext::builder()
            .with_config(config)
            .with_clock(clock.clone())
            .with_events(events.clone())
            .with_continuous_queries(continuous.clone())
            .with_store(store.clone())
            .with_swap(swap.clone());

        let cctx = customize(builder).build();

        Self {
            cctx,
            clock,
            events,
            continuous,
            store,
            swap,
        }
    }
}

pub fn bval(s: &str) -> CacheValue {
    CacheValue::bytes(s.as_bytes().to_vec())
}

pub fn bkey(s: &str) -> CacheKey {
    CacheKey::new(s.as_bytes().to_vec())
}
