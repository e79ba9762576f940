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

use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-cache operation counters, bumped only when statistics are enabled.
#[derive(Debug, Default)]
pub struct Metrics {
    /// reads that found a value
    pub read_hits: AtomicUsize,
    /// reads that found nothing
    pub read_misses: AtomicUsize,
    /// committed writes
    pub writes: AtomicUsize,
    /// committed removes
    pub removes: AtomicUsize,
    /// values dropped by expiration
    pub expirations: AtomicUsize,
}

impl Metrics {
    pub fn on_read(&self, hit: bool) {
        if hit {
            self.read_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.read_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_expire(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }
}
