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

use trellis_common::clock::Clock;

use crate::{value::CacheKey, version::EntryVersion};

/// Eternal TTL: the value never expires. This is also the "no TTL record"
/// default, so the extras record drops its TTL shape for eternal entries.
pub const TTL_ETERNAL: i64 = 0;

/// Sentinel: keep whatever TTL the entry currently has.
pub const TTL_NOT_CHANGED: i64 = -1;

/// Sentinel: expire immediately. Never stored on an entry; writers translate
/// it into either [`TTL_MINIMUM`] with a past expire time or a delete.
pub const TTL_ZERO: i64 = -2;

/// Smallest storable TTL, used when [`TTL_ZERO`] must be materialized.
pub const TTL_MINIMUM: i64 = 1;

/// Eternal expire time.
pub const EXPIRE_TIME_ETERNAL: i64 = 0;

/// Sentinel: derive the expire time from the TTL.
pub const EXPIRE_TIME_CALCULATE: i64 = -1;

/// Expire time for the given TTL, saturating instead of wrapping for huge
/// TTL values.
pub fn to_expire_time(clock: &dyn Clock, ttl: i64) -> i64 {
    debug_assert!(ttl >= 0, "ttl: {ttl}");
    if ttl == TTL_ETERNAL {
        EXPIRE_TIME_ETERNAL
    } else {
        clock.now_millis().saturating_add(ttl)
    }
}

/// An expire time that is already in the past.
pub fn expire_time_in_past(clock: &dyn Clock) -> i64 {
    clock.now_millis() - 1
}

/// Expiry policy consulted on create/update/access.
///
/// Each hook returns a TTL in milliseconds or one of the sentinels
/// [`TTL_NOT_CHANGED`], [`TTL_ZERO`], [`TTL_ETERNAL`].
pub trait ExpiryPolicy: Send + Sync {
    fn for_create(&self) -> i64 {
        TTL_NOT_CHANGED
    }

    fn for_update(&self) -> i64 {
        TTL_NOT_CHANGED
    }

    fn for_access(&self) -> i64 {
        TTL_NOT_CHANGED
    }

    /// Called after an access-driven TTL refresh took effect, so the policy
    /// can fan the new TTL out to interested peers.
    fn on_ttl_updated(&self, _key: &CacheKey, _version: &EntryVersion) {}
}

/// Eager-TTL tracker. Entries with a real expire time register here so the
/// sweeper can expire them without scanning the whole map.
pub trait TtlTracker: Send + Sync {
    fn add_tracked(&self, key: &CacheKey, expire_time: i64);

    fn remove_tracked(&self, key: &CacheKey, expire_time: i64);
}

#[cfg(test)]
mod tests {
    use trellis_common::clock::ManualClock;

    use super::*;

    #[test]
    fn test_to_expire_time() {
        let clock = ManualClock::new(1_000);
        assert_eq!(to_expire_time(&clock, TTL_ETERNAL), EXPIRE_TIME_ETERNAL);
        assert_eq!(to_expire_time(&clock, 500), 1_500);
        assert_eq!(to_expire_time(&clock, i64::MAX), i64::MAX);
    }

    #[test]
    fn test_expire_time_in_past() {
        let clock = ManualClock::new(1_000);
        assert!(expire_time_in_past(&clock) < clock.now_millis());
    }
}
