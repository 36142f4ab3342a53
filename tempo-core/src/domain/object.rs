//! Object domains: enumerated domains whose members are object keys.

use super::enumerated::EnumeratedDomain;
use super::DomainChange;
use crate::errors::Inconsistent;
use crate::keys::{EntityKey, ObjectKey};

/// An enumerated domain over object keys, tagged with the declared type name
/// of its element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDomain {
    object_type: String,
    values: EnumeratedDomain,
}

impl ObjectDomain {
    pub fn closed(object_type: impl Into<String>, members: impl IntoIterator<Item = ObjectKey>) -> Self {
        Self {
            object_type: object_type.into(),
            values: EnumeratedDomain::closed(members.into_iter().map(|k| k.raw() as i64)),
        }
    }

    pub fn open(object_type: impl Into<String>, members: impl IntoIterator<Item = ObjectKey>) -> Self {
        Self {
            object_type: object_type.into(),
            values: EnumeratedDomain::open(members.into_iter().map(|k| k.raw() as i64)),
        }
    }

    /// Declared type name of the member objects.
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn is_open(&self) -> bool {
        self.values.is_open()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_singleton(&self) -> bool {
        self.values.is_singleton()
    }

    pub fn singleton_value(&self) -> Option<i64> {
        self.values.singleton_value()
    }

    pub fn singleton_object(&self) -> Option<ObjectKey> {
        self.values
            .singleton_value()
            .map(|v| ObjectKey(EntityKey(v as u32)))
    }

    pub fn is_member(&self, value: i64) -> bool {
        self.values.is_member(value)
    }

    pub fn contains_object(&self, key: ObjectKey) -> bool {
        self.values.is_member(key.raw() as i64)
    }

    pub fn object_keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.values.values().map(|v| ObjectKey(EntityKey(v as u32)))
    }

    pub fn insert_object(&mut self, key: ObjectKey) -> Option<DomainChange> {
        self.values.insert(key.raw() as i64)
    }

    pub fn remove_object(&mut self, key: ObjectKey) -> Result<Option<DomainChange>, Inconsistent> {
        self.values.remove(key.raw() as i64)
    }

    pub fn close(&mut self) -> Option<DomainChange> {
        self.values.close()
    }

    /// Intersect member sets. The declared type names may differ when the two
    /// domains sit at different levels of the same inheritance chain; only the
    /// keys matter.
    pub fn intersect(&mut self, other: &Self) -> Result<Option<DomainChange>, Inconsistent> {
        self.values.intersect(&other.values)
    }

    pub fn restrict_to_singleton(
        &mut self,
        value: i64,
    ) -> Result<Option<DomainChange>, Inconsistent> {
        self.values.restrict_to_singleton(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: u32) -> ObjectKey {
        ObjectKey(EntityKey(raw))
    }

    #[test]
    fn members_round_trip_as_keys() {
        let d = ObjectDomain::closed("Rover", [key(3), key(7)]);
        assert!(d.contains_object(key(3)));
        assert!(!d.contains_object(key(4)));
        assert_eq!(d.object_keys().collect::<Vec<_>>(), vec![key(3), key(7)]);
        assert_eq!(d.object_type(), "Rover");
    }

    #[test]
    fn open_domain_grows_until_closed() {
        let mut d = ObjectDomain::open("Rover", []);
        assert!(d.is_empty());
        assert_eq!(d.insert_object(key(1)), Some(DomainChange::Relaxed));
        assert_eq!(d.close(), Some(DomainChange::Closed));
        assert_eq!(d.singleton_object(), Some(key(1)));
    }
}
