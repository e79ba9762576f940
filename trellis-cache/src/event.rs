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

use crate::{
    context::{NodeId, SubjectId},
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Event types emitted by the entry cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Put,
    Removed,
    Read,
    Expired,
}

/// Entry event wire record.
#[derive(Debug, Clone)]
pub struct EntryEvent {
    pub partition: u32,
    pub key: CacheKey,
    pub node: NodeId,
    pub tx_xid: Option<EntryVersion>,
    pub version: Option<EntryVersion>,
    pub event_type: EventType,
    pub new_value: Option<CacheValue>,
    pub has_new: bool,
    pub old_value: Option<CacheValue>,
    pub has_old: bool,
    pub subject: Option<SubjectId>,
    pub transform_closure: Option<Box<str>>,
    pub task: Option<Box<str>>,
}

/// Event bus the entry publishes to.
///
/// Entries check recordability per type before building the event record, so
/// disabled event types cost nothing.
pub trait EventBus: Send + Sync + 'static {
    fn is_recordable(&self, event_type: EventType) -> bool;

    fn record(&self, event: EntryEvent);
}

/// Bus that records nothing.
#[derive(Debug, Default)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn is_recordable(&self, _event_type: EventType) -> bool {
        false
    }

    fn record(&self, _event: EntryEvent) {}
}

/// Continuous-query notifier.
pub trait ContinuousQueries: Send + Sync + 'static {
    fn on_entry_updated(
        &self,
        key: &CacheKey,
        new_value: Option<&CacheValue>,
        old_value: Option<&CacheValue>,
        preload: bool,
    );

    fn on_entry_expired(&self, key: &CacheKey, expired_value: Option<&CacheValue>);
}

#[derive(Debug, Default)]
pub struct NoopContinuousQueries;

impl ContinuousQueries for NoopContinuousQueries {
    fn on_entry_updated(
        &self,
        _key: &CacheKey,
        _new_value: Option<&CacheValue>,
        _old_value: Option<&CacheValue>,
        _preload: bool,
    ) {
    }

    fn on_entry_expired(&self, _key: &CacheKey, _expired_value: Option<&CacheValue>) {}
}

/// Data-structure manager notifications (queues, sets and friends keep their
/// bookkeeping in regular cache entries).
pub trait DataStructures: Send + Sync + 'static {
    fn on_entry_updated(&self, key: &CacheKey, removed: bool);
}

#[derive(Debug, Default)]
pub struct NoopDataStructures;

impl DataStructures for NoopDataStructures {
    fn on_entry_updated(&self, _key: &CacheKey, _removed: bool) {}
}
