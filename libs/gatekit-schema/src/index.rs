//! Sort ordering primitives and declared compound indexes.
//!
//! A resource declares the compound indexes its store maintains; the read
//! path refuses any sort order that does not match one of them, so every
//! paginated scan stays index-backed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sort direction of a single key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    /// Wire form: `1` ascending, `-1` descending.
    #[must_use]
    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Asc),
            -1 => Some(Self::Desc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(self) -> i64 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }

    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

impl fmt::Display for SortDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

/// One `(field, direction)` pair of a sort order or an index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub dir: SortDir,
}

impl SortKey {
    #[must_use]
    pub fn new(field: &str, dir: SortDir) -> Self {
        Self {
            field: field.to_owned(),
            dir,
        }
    }

    #[must_use]
    pub fn asc(field: &str) -> Self {
        Self::new(field, SortDir::Asc)
    }

    #[must_use]
    pub fn desc(field: &str) -> Self {
        Self::new(field, SortDir::Desc)
    }
}

/// Ordered list of sort keys the store can walk in either direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundIndex {
    keys: Vec<SortKey>,
}

impl CompoundIndex {
    #[must_use]
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    /// Convenience constructor from `(field, direction)` pairs.
    #[must_use]
    pub fn of(pairs: &[(&str, SortDir)]) -> Self {
        Self {
            keys: pairs
                .iter()
                .map(|(field, dir)| SortKey::new(field, *dir))
                .collect(),
        }
    }

    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Whether this index can serve `sort`.
    ///
    /// An index serves a sort order and its exact reverse, nothing else.
    /// Both sides are canonicalized so their first key ascends, then the
    /// key sequences must be equal, fields and directions alike.
    #[must_use]
    pub fn supports(&self, sort: &[SortKey]) -> bool {
        canonicalize(&self.keys) == canonicalize(sort)
    }
}

/// Flips every direction when the first key descends, so an order and its
/// reverse share one canonical form.
#[must_use]
pub fn canonicalize(keys: &[SortKey]) -> Vec<SortKey> {
    let flip = keys.first().is_some_and(|key| key.dir == SortDir::Desc);
    keys.iter()
        .map(|key| SortKey {
            field: key.field.clone(),
            dir: if flip { key.dir.reverse() } else { key.dir },
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_dir_wire_form() {
        assert_eq!(SortDir::from_int(1), Some(SortDir::Asc));
        assert_eq!(SortDir::from_int(-1), Some(SortDir::Desc));
        assert_eq!(SortDir::from_int(0), None);
        assert_eq!(SortDir::from_int(2), None);
        assert_eq!(SortDir::Desc.as_int(), -1);
    }

    #[test]
    fn test_supports_exact_order() {
        let index = CompoundIndex::of(&[("updatedAt", SortDir::Desc), ("_id", SortDir::Desc)]);
        let sort = vec![SortKey::desc("updatedAt"), SortKey::desc("_id")];
        assert!(index.supports(&sort));
    }

    #[test]
    fn test_supports_full_reverse() {
        let index = CompoundIndex::of(&[("updatedAt", SortDir::Desc), ("_id", SortDir::Desc)]);
        let sort = vec![SortKey::asc("updatedAt"), SortKey::asc("_id")];
        assert!(index.supports(&sort));
    }

    #[test]
    fn test_rejects_partial_flip() {
        let index = CompoundIndex::of(&[("updatedAt", SortDir::Desc), ("_id", SortDir::Desc)]);
        let sort = vec![SortKey::desc("updatedAt"), SortKey::asc("_id")];
        assert!(!index.supports(&sort));
    }

    #[test]
    fn test_rejects_prefix_and_reorder() {
        let index = CompoundIndex::of(&[("price", SortDir::Asc), ("_id", SortDir::Asc)]);
        assert!(!index.supports(&[SortKey::asc("price")]));
        assert!(!index.supports(&[SortKey::asc("_id"), SortKey::asc("price")]));
    }

    #[test]
    fn test_mixed_direction_canonical_form() {
        // {a desc, b asc} canonicalizes to {a asc, b desc}.
        let index = CompoundIndex::of(&[("a", SortDir::Asc), ("b", SortDir::Desc)]);
        let sort = vec![SortKey::desc("a"), SortKey::asc("b")];
        assert!(index.supports(&sort));
    }
}
