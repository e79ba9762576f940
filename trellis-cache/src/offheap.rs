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

//! Off-heap value memory.
//!
//! Values spilled out of the managed heap live as `[len | tag | payload]`
//! blobs in native memory addressed by a plain integer. Entries never hold
//! the bare integer: [`OffHeapRef`] is a move-only handle that releases the
//! blob on drop unless it is explicitly adopted by swap or by a successor
//! value.

use std::{
    alloc::{alloc, dealloc, Layout},
    sync::Arc,
};

use bytes::Bytes;
use hashbrown::HashSet;
use parking_lot::Mutex;
use trellis_common::strict_assert;

use crate::error::{Error, Result};

/// Off-heap allocator consumed by the entry cell.
///
/// Cross-entry safety is the allocator's business; the entry only calls it
/// under its own lock for its own pointer.
pub trait OffHeapMemory: Send + Sync + std::fmt::Debug + 'static {
    /// Store `(bytes, tag)` off-heap, releasing `old` if given. Returns the
    /// new address.
    fn put(&self, old: Option<u64>, bytes: &[u8], tag: u8) -> Result<u64>;

    /// Read back the `(bytes, tag)` pair at `ptr`.
    fn get(&self, ptr: u64) -> Result<(Bytes, u8)>;

    /// Release the blob at `ptr`. Returns false if the address is unknown.
    fn remove(&self, ptr: u64) -> bool;
}

/// Move-only handle to an off-heap blob.
pub struct OffHeapRef {
    ptr: u64,
    memory: Arc<dyn OffHeapMemory>,
}

impl OffHeapRef {
    pub fn new(ptr: u64, memory: Arc<dyn OffHeapMemory>) -> Self {
        Self { ptr, memory }
    }

    pub fn ptr(&self) -> u64 {
        self.ptr
    }

    pub fn read(&self) -> Result<(Bytes, u8)> {
        self.memory.get(self.ptr)
    }

    /// Replace the referenced blob in place.
    pub fn replace(&mut self, bytes: &[u8], tag: u8) -> Result<()> {
        self.ptr = self.memory.put(Some(self.ptr), bytes, tag)?;
        Ok(())
    }

    /// Give the address away without releasing it; the adopter now owns the
    /// blob's lifetime.
    pub fn adopt(self) -> u64 {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for OffHeapRef {
    fn drop(&mut self) {
        self.memory.remove(self.ptr);
    }
}

impl std::fmt::Debug for OffHeapRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OffHeapRef [ptr={:#x}]", self.ptr)
    }
}

const HEADER_LEN: usize = 5;

/// Native-memory arena: each blob is one raw allocation with a
/// `[len: u32][tag: u8]` header followed by the payload. Live addresses are
/// tracked so stale pointers are rejected instead of dereferenced.
#[derive(Debug, Default)]
pub struct UnsafeArena {
    live: Mutex<HashSet<u64>>,
}

impl UnsafeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations, for leak checks.
    pub fn live(&self) -> usize {
        self.live.lock().len()
    }

    fn layout(len: usize) -> Layout {
        Layout::from_size_align(HEADER_LEN + len, 8).expect("blob layout")
    }
}

impl OffHeapMemory for UnsafeArena {
    fn put(&self, old: Option<u64>, bytes: &[u8], tag: u8) -> Result<u64> {
        if bytes.len() > u32::MAX as usize {
            return Err(Error::offheap(anyhow::anyhow!(
                "value of {} bytes exceeds off-heap blob limit",
                bytes.len()
            )));
        }

        let layout = Self::layout(bytes.len());
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return Err(Error::offheap(anyhow::anyhow!("off-heap allocation failed")));
        }

        unsafe {
            ptr.cast::<u32>().write_unaligned(bytes.len() as u32);
            ptr.add(4).write(tag);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(HEADER_LEN), bytes.len());
        }

        let addr = ptr as u64;

        {
            let mut live = self.live.lock();
            if let Some(old) = old {
                strict_assert!(live.contains(&old));
                live.remove(&old);
            }
            live.insert(addr);
        }

        if let Some(old) = old {
            unsafe {
                let old_ptr = old as *mut u8;
                let old_len = old_ptr.cast::<u32>().read_unaligned() as usize;
                dealloc(old_ptr, Self::layout(old_len));
            }
        }

        Ok(addr)
    }

    fn get(&self, ptr: u64) -> Result<(Bytes, u8)> {
        if !self.live.lock().contains(&ptr) {
            return Err(Error::offheap(anyhow::anyhow!(
                "unknown off-heap address {ptr:#x}"
            )));
        }

        let raw = ptr as *const u8;
        unsafe {
            let len = raw.cast::<u32>().read_unaligned() as usize;
            let tag = raw.add(4).read();
            let bytes = Bytes::copy_from_slice(std::slice::from_raw_parts(raw.add(HEADER_LEN), len));
            Ok((bytes, tag))
        }
    }

    fn remove(&self, ptr: u64) -> bool {
        if !self.live.lock().remove(&ptr) {
            return false;
        }

        unsafe {
            let raw = ptr as *mut u8;
            let len = raw.cast::<u32>().read_unaligned() as usize;
            dealloc(raw, Self::layout(len));
        }

        true
    }
}

impl Drop for UnsafeArena {
    fn drop(&mut self) {
        let live = std::mem::take(&mut *self.live.lock());
        for ptr in live {
            unsafe {
                let raw = ptr as *mut u8;
                let len = raw.cast::<u32>().read_unaligned() as usize;
                dealloc(raw, Self::layout(len));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let arena = UnsafeArena::new();
        let ptr = arena.put(None, b"payload", 7).unwrap();
        let (bytes, tag) = arena.get(ptr).unwrap();
        assert_eq!(&bytes[..], b"payload");
        assert_eq!(tag, 7);
        assert_eq!(arena.live(), 1);

        assert!(arena.remove(ptr));
        assert!(!arena.remove(ptr));
        assert!(arena.get(ptr).is_err());
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_put_replaces_old() {
        let arena = UnsafeArena::new();
        let a = arena.put(None, b"first", 1).unwrap();
        let b = arena.put(Some(a), b"second", 2).unwrap();
        assert_eq!(arena.live(), 1);
        assert_eq!(&arena.get(b).unwrap().0[..], b"second");
        assert!(arena.get(a).is_err() || a == b);
        arena.remove(b);
    }

    #[test]
    fn test_ref_releases_on_drop() {
        let arena = Arc::new(UnsafeArena::new());
        let ptr = arena.put(None, b"v", 1).unwrap();
        {
            let _handle = OffHeapRef::new(ptr, arena.clone());
        }
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_ref_adopt_skips_release() {
        let arena = Arc::new(UnsafeArena::new());
        let ptr = arena.put(None, b"v", 1).unwrap();
        let handle = OffHeapRef::new(ptr, arena.clone());
        let adopted = handle.adopt();
        assert_eq!(adopted, ptr);
        assert_eq!(arena.live(), 1);
        assert!(arena.remove(adopted));
    }

    #[test]
    fn test_empty_payload() {
        let arena = UnsafeArena::new();
        let ptr = arena.put(None, b"", 3).unwrap();
        let (bytes, tag) = arena.get(ptr).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(tag, 3);
        arena.remove(ptr);
    }
}
