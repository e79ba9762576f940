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

//! Compact per-entry extras record.
//!
//! Most entries carry no TTL, no lock candidates, no obsolete version and no
//! attributes, so the record is absent for them and every setter re-picks the
//! smallest shape that holds the remaining non-default fields. Shapes exist
//! for each single field plus one general form for combinations.

use bytes::Bytes;
use hashbrown::HashMap;

use crate::{
    mvcc::Mvcc,
    ttl::{EXPIRE_TIME_ETERNAL, TTL_ETERNAL, TTL_NOT_CHANGED, TTL_ZERO},
    version::EntryVersion,
};

/// User attribute map stored in extras.
pub type AttrMap = HashMap<Box<str>, Bytes>;

#[derive(Debug)]
enum Shape {
    Attributes(AttrMap),
    Mvcc(Mvcc),
    Obsolete(EntryVersion),
    Ttl { ttl: i64, expire_time: i64 },
    Full(Box<FullShape>),
}

#[derive(Debug, Default)]
struct FullShape {
    attrs: Option<AttrMap>,
    mvcc: Option<Mvcc>,
    obsolete: Option<EntryVersion>,
    ttl: i64,
    expire_time: i64,
}

/// Nullable extras slot; absent record ≡ all defaults.
#[derive(Debug, Default)]
pub struct Extras(Option<Shape>);

impl Extras {
    pub fn ttl(&self) -> i64 {
        match &self.0 {
            Some(Shape::Ttl { ttl, .. }) => *ttl,
            Some(Shape::Full(full)) => full.ttl,
            _ => TTL_ETERNAL,
        }
    }

    pub fn expire_time(&self) -> i64 {
        match &self.0 {
            Some(Shape::Ttl { expire_time, .. }) => *expire_time,
            Some(Shape::Full(full)) => full.expire_time,
            _ => EXPIRE_TIME_ETERNAL,
        }
    }

    pub fn obsolete_version(&self) -> Option<&EntryVersion> {
        match &self.0 {
            Some(Shape::Obsolete(ver)) => Some(ver),
            Some(Shape::Full(full)) => full.obsolete.as_ref(),
            _ => None,
        }
    }

    pub fn mvcc(&self) -> Option<&Mvcc> {
        match &self.0 {
            Some(Shape::Mvcc(mvcc)) => Some(mvcc),
            Some(Shape::Full(full)) => full.mvcc.as_ref(),
            _ => None,
        }
    }

    pub fn attrs(&self) -> Option<&AttrMap> {
        match &self.0 {
            Some(Shape::Attributes(attrs)) => Some(attrs),
            Some(Shape::Full(full)) => full.attrs.as_ref(),
            _ => None,
        }
    }

    /// Storing [`TTL_ZERO`] or [`TTL_NOT_CHANGED`] is a caller bug: writers
    /// translate zero into an immediate expiry or a delete first.
    pub fn set_ttl(&mut self, ttl: i64, expire_time: i64) {
        assert!(ttl != TTL_ZERO && ttl != TTL_NOT_CHANGED, "ttl: {ttl}");
        let mut parts = self.take_parts();
        parts.ttl = ttl;
        parts.expire_time = expire_time;
        self.0 = Self::build(parts);
    }

    pub fn set_mvcc(&mut self, mvcc: Option<Mvcc>) {
        let mut parts = self.take_parts();
        parts.mvcc = mvcc;
        self.0 = Self::build(parts);
    }

    pub fn set_obsolete_version(&mut self, obsolete: Option<EntryVersion>) {
        let mut parts = self.take_parts();
        parts.obsolete = obsolete;
        self.0 = Self::build(parts);
    }

    pub fn set_attrs(&mut self, attrs: Option<AttrMap>) {
        let mut parts = self.take_parts();
        parts.attrs = attrs.filter(|a| !a.is_empty());
        self.0 = Self::build(parts);
    }

    /// Mutate the attribute map in place, then drop it from the record if it
    /// emptied.
    pub fn with_attrs_mut<R>(&mut self, f: impl FnOnce(&mut AttrMap) -> R) -> R {
        let mut parts = self.take_parts();
        let mut attrs = parts.attrs.take().unwrap_or_default();
        let ret = f(&mut attrs);
        parts.attrs = (!attrs.is_empty()).then_some(attrs);
        self.0 = Self::build(parts);
        ret
    }

    /// On-heap footprint estimate of the record, by shape.
    pub fn size(&self) -> usize {
        match &self.0 {
            None => 0,
            Some(Shape::Attributes(_) | Shape::Mvcc(_) | Shape::Obsolete(_)) => 8,
            Some(Shape::Ttl { .. }) => 16,
            Some(Shape::Full(full)) => {
                let mut size = 0;
                if full.attrs.is_some() {
                    size += 8;
                }
                if full.mvcc.is_some() {
                    size += 8;
                }
                if full.obsolete.is_some() {
                    size += 8;
                }
                if full.ttl != TTL_ETERNAL {
                    size += 16;
                }
                size
            }
        }
    }

    fn take_parts(&mut self) -> FullShape {
        match self.0.take() {
            None => FullShape::default(),
            Some(Shape::Attributes(attrs)) => FullShape {
                attrs: Some(attrs),
                ..Default::default()
            },
            Some(Shape::Mvcc(mvcc)) => FullShape {
                mvcc: Some(mvcc),
                ..Default::default()
            },
            Some(Shape::Obsolete(ver)) => FullShape {
                obsolete: Some(ver),
                ..Default::default()
            },
            Some(Shape::Ttl { ttl, expire_time }) => FullShape {
                ttl,
                expire_time,
                ..Default::default()
            },
            Some(Shape::Full(full)) => *full,
        }
    }

    fn build(parts: FullShape) -> Option<Shape> {
        let FullShape {
            attrs,
            mvcc,
            obsolete,
            ttl,
            expire_time,
        } = parts;

        let has_ttl = ttl != TTL_ETERNAL;
        let count = usize::from(attrs.is_some())
            + usize::from(mvcc.is_some())
            + usize::from(obsolete.is_some())
            + usize::from(has_ttl);

        match count {
            0 => None,
            1 => {
                if let Some(attrs) = attrs {
                    Some(Shape::Attributes(attrs))
                } else if let Some(mvcc) = mvcc {
                    Some(Shape::Mvcc(mvcc))
                } else if let Some(obsolete) = obsolete {
                    Some(Shape::Obsolete(obsolete))
                } else {
                    Some(Shape::Ttl { ttl, expire_time })
                }
            }
            _ => Some(Shape::Full(Box::new(FullShape {
                attrs,
                mvcc,
                obsolete,
                ttl,
                expire_time,
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ver(order: u64) -> EntryVersion {
        EntryVersion::new(1, order, 1, 0)
    }

    #[test]
    fn test_defaults_have_no_record() {
        let extras = Extras::default();
        assert_eq!(extras.size(), 0);
        assert_eq!(extras.ttl(), TTL_ETERNAL);
        assert_eq!(extras.expire_time(), EXPIRE_TIME_ETERNAL);
        assert!(extras.obsolete_version().is_none());
        assert!(extras.mvcc().is_none());
        assert!(extras.attrs().is_none());
    }

    #[test]
    fn test_ttl_shape_collapses_to_none_on_eternal() {
        let mut extras = Extras::default();
        extras.set_ttl(1_000, 5_000);
        assert_eq!(extras.size(), 16);
        assert_eq!(extras.ttl(), 1_000);
        assert_eq!(extras.expire_time(), 5_000);

        extras.set_ttl(TTL_ETERNAL, EXPIRE_TIME_ETERNAL);
        assert_eq!(extras.size(), 0);
    }

    #[test]
    #[should_panic]
    fn test_ttl_zero_is_forbidden() {
        Extras::default().set_ttl(TTL_ZERO, 0);
    }

    #[test]
    fn test_minimal_shape_transitions() {
        let mut extras = Extras::default();

        extras.set_obsolete_version(Some(ver(3)));
        assert_eq!(extras.size(), 8);
        assert_eq!(extras.obsolete_version(), Some(&ver(3)));

        // Adding a second field moves to the general form.
        extras.set_ttl(100, 200);
        assert_eq!(extras.size(), 24);
        assert_eq!(extras.obsolete_version(), Some(&ver(3)));
        assert_eq!(extras.ttl(), 100);

        // Removing the TTL collapses back to the single-field shape.
        extras.set_ttl(TTL_ETERNAL, EXPIRE_TIME_ETERNAL);
        assert_eq!(extras.size(), 8);
        assert_eq!(extras.obsolete_version(), Some(&ver(3)));
    }

    #[test]
    fn test_mvcc_shape() {
        let mut extras = Extras::default();
        extras.set_mvcc(Some(Mvcc::new()));
        assert_eq!(extras.size(), 8);
        assert!(extras.mvcc().is_some());

        extras.set_mvcc(None);
        assert_eq!(extras.size(), 0);
    }

    #[test]
    fn test_attrs_dropped_when_emptied() {
        let mut extras = Extras::default();
        extras.with_attrs_mut(|attrs| {
            attrs.insert("a".into(), Bytes::from_static(b"1"));
        });
        assert_eq!(extras.size(), 8);

        let removed = extras.with_attrs_mut(|attrs| attrs.remove("a"));
        assert!(removed.is_some());
        assert_eq!(extras.size(), 0);
        assert!(extras.attrs().is_none());
    }

    #[test]
    fn test_all_fields_general_form() {
        let mut extras = Extras::default();
        extras.set_ttl(100, 200);
        extras.set_mvcc(Some(Mvcc::new()));
        extras.set_obsolete_version(Some(ver(9)));
        extras.with_attrs_mut(|attrs| {
            attrs.insert("k".into(), Bytes::from_static(b"v"));
        });
        assert_eq!(extras.size(), 8 + 8 + 8 + 16);
        assert_eq!(extras.ttl(), 100);
        assert!(extras.mvcc().is_some());
        assert_eq!(extras.obsolete_version(), Some(&ver(9)));
        assert!(extras.attrs().is_some());
    }
}
