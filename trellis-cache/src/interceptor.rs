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

use crate::value::{CacheKey, CacheValue};

/// Outcome of [`Interceptor::on_before_remove`].
#[derive(Debug, Clone, Default)]
pub struct RemoveIntercept {
    /// Cancel the removal; the operation returns `value` unchanged.
    pub cancel: bool,
    /// Value reported back to the caller.
    pub value: Option<CacheValue>,
}

/// User hook invoked around every put/remove.
///
/// The before-hooks run inside the entry lock; keep them cheap.
pub trait Interceptor: Send + Sync + 'static {
    /// Transform or veto a put. Returning `None` aborts the write and the
    /// operation reports the unchanged old value.
    fn on_before_put(
        &self,
        _key: &CacheKey,
        _old: Option<&CacheValue>,
        new: &CacheValue,
    ) -> Option<CacheValue> {
        Some(new.clone())
    }

    fn on_before_remove(&self, _key: &CacheKey, old: Option<&CacheValue>) -> RemoveIntercept {
        RemoveIntercept {
            cancel: false,
            value: old.cloned(),
        }
    }

    fn on_after_put(&self, _key: &CacheKey, _value: &CacheValue) {}

    fn on_after_remove(&self, _key: &CacheKey, _old: Option<&CacheValue>) {}
}

/// Interceptor that passes everything through.
#[derive(Debug, Default)]
pub struct NoopInterceptor;

impl Interceptor for NoopInterceptor {}
