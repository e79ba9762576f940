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

use bytes::{Buf, BufMut};
use paste::paste;

/// Key codec for the data grid cache.
///
/// Keys are stored in the entry map as opaque bytes; this trait is the
/// boundary where a typed key is turned into that representation.
pub trait Key: Sized + Send + Sync + 'static + std::hash::Hash + Eq + PartialEq + std::fmt::Debug {
    fn serialized_len(&self) -> usize;

    fn write(&self, buf: &mut [u8]);

    fn read(buf: &[u8]) -> Self;
}

/// Value codec for the data grid cache.
///
/// Values cross the off-heap and swap boundaries as `(bytes, type tag)`;
/// this trait produces the byte half of that pair.
pub trait Value: Sized + Send + Sync + 'static + std::fmt::Debug {
    fn serialized_len(&self) -> usize;

    fn write(&self, buf: &mut [u8]);

    fn read(buf: &[u8]) -> Self;
}

macro_rules! for_all_primitives {
    ($macro:ident) => {
        $macro! {
            u8, u16, u32, u64,
            i8, i16, i32, i64,
        }
    };
}

macro_rules! impl_key {
    ($( $type:ty, )*) => {
        paste! {
            $(
                impl Key for $type {
                    fn serialized_len(&self) -> usize {
                        std::mem::size_of::<$type>()
                    }

                    fn write(&self, mut buf: &mut [u8]) {
                        buf.[< put_ $type>](*self)
                    }

                    fn read(mut buf: &[u8]) -> Self {
                        buf.[< get_ $type>]()
                    }
                }
            )*
        }
    };
}

macro_rules! impl_value {
    ($( $type:ty, )*) => {
        paste! {
            $(
                impl Value for $type {
                    fn serialized_len(&self) -> usize {
                        std::mem::size_of::<$type>()
                    }

                    fn write(&self, mut buf: &mut [u8]) {
                        buf.[< put_ $type>](*self)
                    }

                    fn read(mut buf: &[u8]) -> Self {
                        buf.[< get_ $type>]()
                    }
                }
            )*
        }
    };
}

for_all_primitives! { impl_key }
for_all_primitives! { impl_value }

impl Key for Vec<u8> {
    fn serialized_len(&self) -> usize {
        self.len()
    }

    fn write(&self, mut buf: &mut [u8]) {
        buf.put_slice(self);
    }

    fn read(buf: &[u8]) -> Self {
        buf.to_vec()
    }
}

impl Value for Vec<u8> {
    fn serialized_len(&self) -> usize {
        self.len()
    }

    fn write(&self, mut buf: &mut [u8]) {
        buf.put_slice(self);
    }

    fn read(buf: &[u8]) -> Self {
        buf.to_vec()
    }
}

impl Key for String {
    fn serialized_len(&self) -> usize {
        self.len()
    }

    fn write(&self, mut buf: &mut [u8]) {
        buf.put_slice(self.as_bytes());
    }

    fn read(buf: &[u8]) -> Self {
        String::from_utf8_lossy(buf).into_owned()
    }
}

impl Value for String {
    fn serialized_len(&self) -> usize {
        self.len()
    }

    fn write(&self, mut buf: &mut [u8]) {
        buf.put_slice(self.as_bytes());
    }

    fn read(buf: &[u8]) -> Self {
        String::from_utf8_lossy(buf).into_owned()
    }
}

/// Serialize a key/value into a freshly allocated buffer.
pub fn encode_key<K: Key>(key: &K) -> Vec<u8> {
    let mut buf = vec![0; key.serialized_len()];
    key.write(&mut buf);
    buf
}

pub fn encode_value<V: Value>(value: &V) -> Vec<u8> {
    let mut buf = vec![0; value.serialized_len()];
    value.write(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let k = 42u64;
        let buf = encode_key(&k);
        assert_eq!(buf.len(), 8);
        assert_eq!(<u64 as Key>::read(&buf), 42);
    }

    #[test]
    fn test_string_roundtrip() {
        let v = String::from("trellis");
        let buf = encode_value(&v);
        assert_eq!(<String as Value>::read(&buf), "trellis");
    }

    #[test]
    fn test_bytes_roundtrip() {
        let v = vec![1u8, 2, 3];
        let buf = encode_value(&v);
        assert_eq!(<Vec<u8> as Value>::read(&buf), v);
    }
}
