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

use trellis_common::clock::{Clock, SystemClock};

use crate::{
    conflict::ConflictResolver,
    dr::Replicator,
    event::{
        ContinuousQueries, DataStructures, EventBus, NoopContinuousQueries, NoopDataStructures,
        NoopEventBus,
    },
    hooks::{
        Affinity, EvictionObserver, FsDataTracker, NoopEvictionObserver, NoopOwnerMap, OwnerMap,
        StaticAffinity,
    },
    index::QueryIndex,
    interceptor::Interceptor,
    metrics::Metrics,
    offheap::OffHeapMemory,
    store::Store,
    swap::SwapManager,
    ttl::TtlTracker,
    tx::{NoopTxManager, TxManager},
    version::VersionSource,
};

/// Cluster node identifier.
pub type NodeId = u64;

/// Security subject identifier carried into events.
pub type SubjectId = u64;

/// Where values live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    /// Values stay in the managed heap.
    OnHeap,
    /// Values are duplicated off-heap and may be dropped from the heap.
    OffHeapTiered,
    /// Values live off-heap only; the heap slot is always empty at rest.
    OffHeapValues,
}

/// Cache distribution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTopology {
    Local,
    Replicated,
    Partitioned,
}

/// Write coordination mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicityMode {
    Transactional,
    Atomic,
}

/// Static cache configuration consulted by the entry cell.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub name: Box<str>,
    pub atomicity: AtomicityMode,
    pub memory_mode: MemoryMode,
    pub topology: CacheTopology,
    pub swap_enabled: bool,
    /// Deletions first set a tombstone and obsolete later via the sweeper.
    pub deferred_delete: bool,
    /// Register expiring entries with the TTL tracker.
    pub eager_ttl: bool,
    pub statistics_enabled: bool,
    pub read_through: bool,
    pub write_through: bool,
    /// Load the previous value from the store for plain updates too, not
    /// only for transforms.
    pub load_previous_value: bool,
    /// The index needs the previous value on clears.
    pub index_previous_value: bool,
    /// Assert transaction lock ownership inside operations.
    pub sanity_checks: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            atomicity: AtomicityMode::Transactional,
            memory_mode: MemoryMode::OnHeap,
            topology: CacheTopology::Local,
            swap_enabled: false,
            deferred_delete: false,
            eager_ttl: true,
            statistics_enabled: false,
            read_through: false,
            write_through: false,
            load_previous_value: false,
            index_previous_value: false,
            sanity_checks: true,
        }
    }
}

/// Everything an entry needs from its cache: configuration plus the
/// collaborator handles of §6. Collaborators are externally thread-safe and
/// may be called under the entry lock.
pub struct CacheContext {
    config: CacheConfig,
    local_node: NodeId,
    versions: Arc<VersionSource>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    events: Arc<dyn EventBus>,
    continuous_queries: Arc<dyn ContinuousQueries>,
    data_structures: Arc<dyn DataStructures>,
    owner: Arc<dyn OwnerMap>,
    affinity: Arc<dyn Affinity>,
    evictions: Arc<dyn EvictionObserver>,
    tx_manager: Arc<dyn TxManager>,
    store: Option<Arc<dyn Store>>,
    swap: Option<Arc<dyn SwapManager>>,
    offheap: Option<Arc<dyn OffHeapMemory>>,
    index: Option<Arc<dyn QueryIndex>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    replicator: Option<Arc<dyn Replicator>>,
    conflict_resolver: Option<Arc<dyn ConflictResolver>>,
    ttl_tracker: Option<Arc<dyn TtlTracker>>,
    fs_data: Option<Arc<dyn FsDataTracker>>,
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("config", &self.config)
            .field("local_node", &self.local_node)
            .finish()
    }
}

impl CacheContext {
    pub fn builder() -> CacheContextBuilder {
        CacheContextBuilder::default()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    pub fn versions(&self) -> &VersionSource {
        &self.versions
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn events(&self) -> &dyn EventBus {
        self.events.as_ref()
    }

    pub fn continuous_queries(&self) -> &dyn ContinuousQueries {
        self.continuous_queries.as_ref()
    }

    pub fn data_structures(&self) -> &dyn DataStructures {
        self.data_structures.as_ref()
    }

    pub fn owner(&self) -> &dyn OwnerMap {
        self.owner.as_ref()
    }

    pub fn affinity(&self) -> &dyn Affinity {
        self.affinity.as_ref()
    }

    pub fn evictions(&self) -> &dyn EvictionObserver {
        self.evictions.as_ref()
    }

    pub fn tx_manager(&self) -> &dyn TxManager {
        self.tx_manager.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    pub fn swap(&self) -> Option<&Arc<dyn SwapManager>> {
        self.swap.as_ref()
    }

    pub fn offheap(&self) -> Option<&Arc<dyn OffHeapMemory>> {
        self.offheap.as_ref()
    }

    pub fn index(&self) -> Option<&Arc<dyn QueryIndex>> {
        self.index.as_ref()
    }

    pub fn interceptor(&self) -> Option<&Arc<dyn Interceptor>> {
        self.interceptor.as_ref()
    }

    pub fn replicator(&self) -> Option<&Arc<dyn Replicator>> {
        self.replicator.as_ref()
    }

    pub fn conflict_resolver(&self) -> Option<&Arc<dyn ConflictResolver>> {
        self.conflict_resolver.as_ref()
    }

    pub fn ttl_tracker(&self) -> Option<&Arc<dyn TtlTracker>> {
        self.ttl_tracker.as_ref()
    }

    pub fn fs_data(&self) -> Option<&Arc<dyn FsDataTracker>> {
        self.fs_data.as_ref()
    }

    pub fn transactional(&self) -> bool {
        self.config.atomicity == AtomicityMode::Transactional
    }

    pub fn atomic(&self) -> bool {
        self.config.atomicity == AtomicityMode::Atomic
    }

    pub fn is_local(&self) -> bool {
        self.config.topology == CacheTopology::Local
    }

    pub fn is_replicated(&self) -> bool {
        self.config.topology == CacheTopology::Replicated
    }

    pub fn read_through(&self) -> bool {
        self.config.read_through && self.store.is_some()
    }

    pub fn write_through(&self) -> bool {
        self.config.write_through && self.store.is_some()
    }

    pub fn load_previous_value(&self) -> bool {
        self.config.load_previous_value && self.store.is_some()
    }

    pub fn deferred_delete(&self) -> bool {
        self.config.deferred_delete
    }

    pub fn eager_ttl(&self) -> bool {
        self.config.eager_ttl
    }

    pub fn statistics_enabled(&self) -> bool {
        self.config.statistics_enabled
    }

    pub fn offheap_values_only(&self) -> bool {
        self.config.memory_mode == MemoryMode::OffHeapValues && self.offheap.is_some()
    }

    pub fn offheap_tiered(&self) -> bool {
        self.config.memory_mode == MemoryMode::OffHeapTiered && self.offheap.is_some()
    }

    pub fn offheap_enabled(&self) -> bool {
        self.offheap.is_some() && self.config.memory_mode != MemoryMode::OnHeap
    }

    pub fn swap_enabled(&self) -> bool {
        self.config.swap_enabled && self.swap.is_some()
    }

    /// Whether a spill tier exists at all. The swap manager fronts both the
    /// disk tier and the off-heap tier, so either mode requires it.
    pub fn swap_or_offheap_enabled(&self) -> bool {
        self.swap.is_some() && (self.config.swap_enabled || self.offheap_enabled())
    }

    pub fn conflict_need_resolve(&self) -> bool {
        self.conflict_resolver.is_some()
    }

    pub fn dr_enabled(&self) -> bool {
        self.replicator.is_some()
    }
}

/// Builder assembling a [`CacheContext`] out of defaults and overrides.
pub struct CacheContextBuilder {
    config: CacheConfig,
    local_node: NodeId,
    versions: Option<Arc<VersionSource>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    events: Arc<dyn EventBus>,
    continuous_queries: Arc<dyn ContinuousQueries>,
    data_structures: Arc<dyn DataStructures>,
    owner: Arc<dyn OwnerMap>,
    affinity: Arc<dyn Affinity>,
    evictions: Arc<dyn EvictionObserver>,
    tx_manager: Arc<dyn TxManager>,
    store: Option<Arc<dyn Store>>,
    swap: Option<Arc<dyn SwapManager>>,
    offheap: Option<Arc<dyn OffHeapMemory>>,
    index: Option<Arc<dyn QueryIndex>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    replicator: Option<Arc<dyn Replicator>>,
    conflict_resolver: Option<Arc<dyn ConflictResolver>>,
    ttl_tracker: Option<Arc<dyn TtlTracker>>,
    fs_data: Option<Arc<dyn FsDataTracker>>,
}

impl Default for CacheContextBuilder {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            local_node: 1,
            versions: None,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(Metrics::default()),
            events: Arc::new(NoopEventBus),
            continuous_queries: Arc::new(NoopContinuousQueries),
            data_structures: Arc::new(NoopDataStructures),
            owner: Arc::new(NoopOwnerMap),
            affinity: Arc::new(StaticAffinity::default()),
            evictions: Arc::new(NoopEvictionObserver),
            tx_manager: Arc::new(NoopTxManager),
            store: None,
            swap: None,
            offheap: None,
            index: None,
            interceptor: None,
            replicator: None,
            conflict_resolver: None,
            ttl_tracker: None,
            fs_data: None,
        }
    }
}

impl CacheContextBuilder {
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_local_node(mut self, node: NodeId) -> Self {
        self.local_node = node;
        self
    }

    pub fn with_versions(mut self, versions: Arc<VersionSource>) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_continuous_queries(mut self, continuous_queries: Arc<dyn ContinuousQueries>) -> Self {
        self.continuous_queries = continuous_queries;
        self
    }

    pub fn with_data_structures(mut self, data_structures: Arc<dyn DataStructures>) -> Self {
        self.data_structures = data_structures;
        self
    }

    pub fn with_owner(mut self, owner: Arc<dyn OwnerMap>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_affinity(mut self, affinity: Arc<dyn Affinity>) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn with_evictions(mut self, evictions: Arc<dyn EvictionObserver>) -> Self {
        self.evictions = evictions;
        self
    }

    pub fn with_tx_manager(mut self, tx_manager: Arc<dyn TxManager>) -> Self {
        self.tx_manager = tx_manager;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_swap(mut self, swap: Arc<dyn SwapManager>) -> Self {
        self.swap = Some(swap);
        self
    }

    pub fn with_offheap(mut self, offheap: Arc<dyn OffHeapMemory>) -> Self {
        self.offheap = Some(offheap);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn QueryIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn with_replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    pub fn with_conflict_resolver(mut self, conflict_resolver: Arc<dyn ConflictResolver>) -> Self {
        self.conflict_resolver = Some(conflict_resolver);
        self
    }

    pub fn with_ttl_tracker(mut self, ttl_tracker: Arc<dyn TtlTracker>) -> Self {
        self.ttl_tracker = Some(ttl_tracker);
        self
    }

    pub fn with_fs_data(mut self, fs_data: Arc<dyn FsDataTracker>) -> Self {
        self.fs_data = Some(fs_data);
        self
    }

    pub fn build(self) -> Arc<CacheContext> {
        Arc::new(CacheContext {
            config: self.config,
            local_node: self.local_node,
            versions: self
                .versions
                .unwrap_or_else(|| Arc::new(VersionSource::new(1, 0))),
            clock: self.clock,
            metrics: self.metrics,
            events: self.events,
            continuous_queries: self.continuous_queries,
            data_structures: self.data_structures,
            owner: self.owner,
            affinity: self.affinity,
            evictions: self.evictions,
            tx_manager: self.tx_manager,
            store: self.store,
            swap: self.swap,
            offheap: self.offheap,
            index: self.index,
            interceptor: self.interceptor,
            replicator: self.replicator,
            conflict_resolver: self.conflict_resolver,
            ttl_tracker: self.ttl_tracker,
            fs_data: self.fs_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_predicates() {
        let cctx = CacheContext::builder().build();
        assert!(cctx.transactional());
        assert!(!cctx.atomic());
        assert!(cctx.is_local());
        // No store: read/write-through stay off even if configured on.
        let mut config = CacheConfig::default();
        config.read_through = true;
        config.write_through = true;
        let cctx = CacheContext::builder().with_config(config).build();
        assert!(!cctx.read_through());
        assert!(!cctx.write_through());
        assert!(!cctx.swap_or_offheap_enabled());
    }
}
