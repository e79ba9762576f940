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

use std::hash::Hasher;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use trellis_common::code::{encode_key, Key};
use twox_hash::XxHash64;

use crate::error::{Error, Result};

/// Opaque cache key: serialized bytes plus a precomputed hash.
///
/// The owning map buckets entries by this hash; the entry itself never looks
/// inside the bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    bytes: Bytes,
    hash: u32,
    internal: bool,
}

impl CacheKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let hash = Self::hash_of(&bytes);
        Self {
            bytes,
            hash,
            internal: false,
        }
    }

    /// Key of an internal (system) entry. Internal entries skip
    /// deferred-delete bookkeeping and replication.
    pub fn internal(bytes: impl Into<Bytes>) -> Self {
        let mut key = Self::new(bytes);
        key.internal = true;
        key
    }

    /// Build a key from a typed value through the key codec.
    pub fn from_key<K: Key>(key: &K) -> Self {
        Self::new(encode_key(key))
    }

    fn hash_of(bytes: &[u8]) -> u32 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(bytes);
        hasher.finish() as u32
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheKey")
            .field("hash", &self.hash)
            .field("len", &self.bytes.len())
            .field("internal", &self.internal)
            .finish()
    }
}

/// Cached value: either a raw byte array or a marshaled payload with a
/// single-byte type tag.
///
/// Exactly this pair `(bytes, type tag)` crosses the off-heap and swap
/// boundaries, so both representations can be reconstructed without knowing
/// the user type.
#[derive(Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// Plain byte-array payload.
    Bytes(Bytes),
    /// Marshaled payload of some user type.
    Marshaled { tag: u8, bytes: Bytes },
}

impl CacheValue {
    /// Type tag of the plain byte-array representation.
    pub const TYPE_BYTES: u8 = 1;

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Reconstruct a value from the `(bytes, type tag)` pair.
    pub fn from_parts(tag: u8, bytes: Bytes) -> Self {
        if tag == Self::TYPE_BYTES {
            Self::Bytes(bytes)
        } else {
            Self::Marshaled { tag, bytes }
        }
    }

    /// Marshal a typed value under the given tag.
    pub fn marshal<V: Serialize>(tag: u8, value: &V) -> Result<Self> {
        assert_ne!(tag, Self::TYPE_BYTES, "tag {tag} is reserved for byte arrays");
        let bytes = bincode::serialize(value).map_err(Error::codec)?;
        Ok(Self::Marshaled {
            tag,
            bytes: bytes.into(),
        })
    }

    /// Unmarshal the payload back into a typed value.
    pub fn unmarshal<V: DeserializeOwned>(&self) -> Result<V> {
        bincode::deserialize(self.value_bytes()).map_err(Error::codec)
    }

    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Bytes(_) => Self::TYPE_BYTES,
            Self::Marshaled { tag, .. } => *tag,
        }
    }

    pub fn value_bytes(&self) -> &Bytes {
        match self {
            Self::Bytes(bytes) => bytes,
            Self::Marshaled { bytes, .. } => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.value_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_bytes().is_empty()
    }
}

impl std::fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheValue [tag={}, len={}]", self.type_tag(), self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_is_stable() {
        let a = CacheKey::new(&b"k"[..]);
        let b = CacheKey::new(&b"k"[..]);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);
        assert!(!a.is_internal());
        assert!(CacheKey::internal(&b"sys"[..]).is_internal());
    }

    #[test]
    fn test_typed_key() {
        let a = CacheKey::from_key(&42u64);
        let b = CacheKey::from_key(&42u64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn test_value_parts_roundtrip() {
        let v = CacheValue::bytes(&b"payload"[..]);
        let rebuilt = CacheValue::from_parts(v.type_tag(), v.value_bytes().clone());
        assert_eq!(rebuilt, v);

        let m = CacheValue::marshal(7, &1234u64).unwrap();
        let rebuilt = CacheValue::from_parts(m.type_tag(), m.value_bytes().clone());
        assert_eq!(rebuilt, m);
        assert_eq!(rebuilt.unmarshal::<u64>().unwrap(), 1234);
    }
}
