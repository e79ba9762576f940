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

pub use crate::{
    conflict::{ConflictContext, ConflictDecision, ConflictResolver, VersionedEntryView},
    context::{
        AtomicityMode, CacheConfig, CacheContext, CacheContextBuilder, CacheTopology, MemoryMode,
        NodeId, SubjectId,
    },
    dr::{DrType, Replicator},
    entry::{EvictionView, LazyEntry, MapEntry, VersionedView, WrappedEntry},
    error::{Error, ErrorKind, Result},
    event::{ContinuousQueries, DataStructures, EntryEvent, EventBus, EventType},
    extras::Extras,
    hooks::{Affinity, EvictionObserver, FsDataTracker, OwnerMap},
    index::QueryIndex,
    interceptor::{Interceptor, NoopInterceptor, RemoveIntercept},
    metrics::Metrics,
    mvcc::{Mvcc, MvccCandidate},
    offheap::{OffHeapMemory, OffHeapRef, UnsafeArena},
    op::{
        AtomicUpdateOutcome, AtomicUpdateRequest, EntryFilter, EntryInfo, EntryProcessor,
        GetRequest, InvokeEntry, InvokeOutcome, LocalUpdateOutcome, LocalUpdateRequest, PeekMode,
        Peeked, TxRemoveRequest, TxUpdateOutcome, TxWriteRequest, WriteCommand,
    },
    store::Store,
    swap::{BatchSwapEntry, LoaderId, SwapEntry, SwapManager},
    ttl::{
        ExpiryPolicy, TtlTracker, EXPIRE_TIME_CALCULATE, EXPIRE_TIME_ETERNAL, TTL_ETERNAL,
        TTL_MINIMUM, TTL_NOT_CHANGED, TTL_ZERO,
    },
    tx::{Transaction, TxManager, TxPending},
    value::{CacheKey, CacheValue},
    variant::{EntryFamily, LocalFamily},
    version::{EntryVersion, VersionSource},
};
