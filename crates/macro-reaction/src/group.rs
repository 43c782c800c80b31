//! Grouped regressions.
//!
//! Impact regressions partition rows by a key and fit each partition on its
//! own. Partitions share no state, so they run on the rayon pool; results
//! come back in key order.

use rayon::prelude::*;
use std::collections::BTreeMap;

/// Borrowed rows of each group, in key order.
fn group_by<'a, T, K, F>(items: &'a [T], key: F) -> BTreeMap<K, Vec<&'a T>>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut groups: BTreeMap<K, Vec<&'a T>> = BTreeMap::new();
    for item in items {
        groups.entry(key(item)).or_default().push(item);
    }
    groups
}

/// Apply `f` to every group in parallel and collect `(key, result)` in key
/// order. Rows within a group keep input order.
pub fn par_apply_per_group<'a, T, K, R, F, G>(items: &'a [T], key: F, f: G) -> Vec<(K, R)>
where
    T: Sync,
    K: Ord + Send + Sync,
    R: Send,
    F: Fn(&T) -> K,
    G: Fn(&K, &[&'a T]) -> R + Sync,
{
    let groups: Vec<(K, Vec<&'a T>)> = group_by(items, key).into_iter().collect();
    groups
        .into_par_iter()
        .map(|(k, rows)| {
            let r = f(&k, &rows);
            (k, r)
        })
        .collect()
}
