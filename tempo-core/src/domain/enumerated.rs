//! Finite enumerated domains with an open/closed flag.

use std::collections::BTreeSet;

use super::DomainChange;
use crate::errors::Inconsistent;

/// A finite, ordered set of values. An open domain may still grow (new values
/// inserted as instances appear); closing it freezes the member set so it can
/// only shrink from then on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumeratedDomain {
    values: BTreeSet<i64>,
    open: bool,
}

impl EnumeratedDomain {
    pub fn closed(values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            open: false,
        }
    }

    pub fn open(values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_singleton(&self) -> bool {
        self.values.len() == 1
    }

    pub fn singleton_value(&self) -> Option<i64> {
        if self.values.len() == 1 {
            self.values.iter().next().copied()
        } else {
            None
        }
    }

    pub fn is_member(&self, value: i64) -> bool {
        self.values.contains(&value)
    }

    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        self.values.iter().copied()
    }

    /// Insert a value. Legal only while open.
    pub fn insert(&mut self, value: i64) -> Option<DomainChange> {
        debug_assert!(self.open, "insert into a closed enumerated domain");
        self.values.insert(value).then_some(DomainChange::Relaxed)
    }

    /// Close the domain: no further growth.
    pub fn close(&mut self) -> Option<DomainChange> {
        if self.open {
            self.open = false;
            Some(DomainChange::Closed)
        } else {
            None
        }
    }

    /// Remove a single value.
    pub fn remove(&mut self, value: i64) -> Result<Option<DomainChange>, Inconsistent> {
        if !self.values.remove(&value) {
            return Ok(None);
        }
        if self.values.is_empty() {
            Err(Inconsistent)
        } else if self.values.len() == 1 {
            Ok(Some(DomainChange::SetToSingleton))
        } else {
            Ok(Some(DomainChange::ValueRemoved))
        }
    }

    pub fn intersect(&mut self, other: &Self) -> Result<Option<DomainChange>, Inconsistent> {
        let before = self.values.len();
        self.values.retain(|v| other.values.contains(v));
        if self.values.len() == before {
            return Ok(None);
        }
        if self.values.is_empty() {
            Err(Inconsistent)
        } else if self.values.len() == 1 {
            Ok(Some(DomainChange::SetToSingleton))
        } else {
            Ok(Some(DomainChange::Restricted))
        }
    }

    pub fn restrict_to_singleton(
        &mut self,
        value: i64,
    ) -> Result<Option<DomainChange>, Inconsistent> {
        if !self.values.contains(&value) {
            self.values.clear();
            return Err(Inconsistent);
        }
        if self.values.len() == 1 {
            return Ok(None);
        }
        self.values.clear();
        self.values.insert(value);
        Ok(Some(DomainChange::SetToSingleton))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_insert_then_close() {
        let mut d = EnumeratedDomain::open([1, 2]);
        assert_eq!(d.insert(3), Some(DomainChange::Relaxed));
        assert_eq!(d.insert(3), None);
        assert_eq!(d.close(), Some(DomainChange::Closed));
        assert_eq!(d.close(), None);
        assert!(!d.is_open());
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn remove_classifies_down_to_empty() {
        let mut d = EnumeratedDomain::closed([1, 2, 3]);
        assert_eq!(d.remove(9).unwrap(), None);
        assert_eq!(d.remove(1).unwrap(), Some(DomainChange::ValueRemoved));
        assert_eq!(d.remove(2).unwrap(), Some(DomainChange::SetToSingleton));
        assert_eq!(d.remove(3), Err(Inconsistent));
        assert!(d.is_empty());
    }

    #[test]
    fn intersect_keeps_common_values() {
        let mut d = EnumeratedDomain::closed([1, 2, 3, 4]);
        let other = EnumeratedDomain::closed([2, 4, 6]);
        assert_eq!(d.intersect(&other).unwrap(), Some(DomainChange::Restricted));
        assert_eq!(d.values().collect::<Vec<_>>(), vec![2, 4]);

        let disjoint = EnumeratedDomain::closed([10]);
        assert_eq!(d.intersect(&disjoint), Err(Inconsistent));
    }
}
