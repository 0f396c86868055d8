//! Collection helper functions and lambda-style extension traits.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Converts a `Vec` into a `HashMap` keyed by the given extraction function.
///
/// # Example
/// ```ignore
/// let tables: Vec<Table> = ...;
/// let by_name = vec_to_map(tables, |t| t.qualified_name.clone());
/// ```
#[inline]
pub fn vec_to_map<T, K, F>(items: Vec<T>, key_fn: F) -> HashMap<K, T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    items.into_iter().map(|item| (key_fn(&item), item)).collect()
}

/// Converts a `Vec` into a `HashMap` using separate key and value extraction functions.
///
/// # Example
/// ```ignore
/// let columns: Vec<Column> = ...;
/// let name_to_type = vec_to_map_with(columns, |c| c.name.clone(), |c| c.declared_type.clone());
/// ```
#[inline]
pub fn vec_to_map_with<T, K, V, KF, VF>(items: Vec<T>, key_fn: KF, value_fn: VF) -> HashMap<K, V>
where
    K: Eq + Hash,
    KF: Fn(&T) -> K,
    VF: Fn(&T) -> V,
{
    items.into_iter().map(|item| (key_fn(&item), value_fn(&item))).collect()
}

/// Groups a `Vec` by the given key function.
///
/// # Example
/// ```ignore
/// let results: Vec<ScoredResult> = ...;
/// let by_dimension = group_by(results, |r| r.dimension);
/// ```
#[inline]
pub fn group_by<T, K, F>(items: Vec<T>, key_fn: F) -> HashMap<K, Vec<T>>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut map: HashMap<K, Vec<T>> = HashMap::new();
    for item in items {
        map.entry(key_fn(&item)).or_default().push(item);
    }
    map
}

/// Deduplicates while preserving first-seen order.
///
/// # Example
/// ```ignore
/// let ids = vec![1, 2, 1, 3, 2];
/// let unique = unique_ordered(ids); // [1, 2, 3]
/// ```
#[inline]
pub fn unique_ordered<T: Eq + Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

/// Convenience wrapper around set difference in both directions.
///
/// # Example
/// ```ignore
/// let (to_add, to_remove) = diff_sets(&current_columns, &new_columns);
/// ```
pub fn diff_sets<T: Eq + Hash + Clone>(current: &[T], new_items: &[T]) -> (Vec<T>, Vec<T>) {
    let current_set: HashSet<_> = current.iter().cloned().collect();
    let new_set: HashSet<_> = new_items.iter().cloned().collect();

    let to_add: Vec<T> = new_set.difference(&current_set).cloned().collect();
    let to_remove: Vec<T> = current_set.difference(&new_set).cloned().collect();

    (to_add, to_remove)
}

/// Iterator extension trait.
pub trait IteratorExt: Iterator {
    /// Filters and maps in one step, skipping `None` values.
    fn filter_map_some<B, F>(self, f: F) -> impl Iterator<Item = B>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> Option<B>;
}

impl<I: Iterator> IteratorExt for I {
    #[inline]
    fn filter_map_some<B, F>(self, f: F) -> impl Iterator<Item = B>
    where
        F: FnMut(Self::Item) -> Option<B>,
    {
        self.filter_map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ordered_preserves_first_seen_order() {
        assert_eq!(unique_ordered(vec![1, 2, 1, 3, 2]), vec![1, 2, 3]);
    }

    #[test]
    fn diff_sets_computes_both_directions() {
        let (to_add, to_remove) = diff_sets(&[1, 2, 3], &[2, 3, 4]);
        assert_eq!(to_add, vec![4]);
        assert_eq!(to_remove, vec![1]);
    }
}
