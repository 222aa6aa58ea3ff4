//! Case-insensitive ordering for display output.

use indexmap::IndexMap;

/// Sort names in place, case-insensitively. Stable for names that differ only in case.
pub fn order_names(names: &mut [String]) {
    names.sort_by_cached_key(|name| name.to_lowercase());
}

/// Build an ordered mapping from entries, keys sorted case-insensitively.
pub fn order_entries<V>(entries: impl IntoIterator<Item = (String, V)>) -> IndexMap<String, V> {
    let mut entries: Vec<(String, V)> = entries.into_iter().collect();
    entries.sort_by_cached_key(|(key, _)| key.to_lowercase());
    entries.into_iter().collect()
}

/// Copy of `mapping` with its keys ordered case-insensitively.
pub fn order_keys<V: Clone>(mapping: &IndexMap<String, V>) -> IndexMap<String, V> {
    order_entries(mapping.iter().map(|(k, v)| (k.clone(), v.clone())))
}
