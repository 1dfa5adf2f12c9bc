// crates/core/src/util.rs
//
// Small vocabulary and argument helpers shared by the dataset layer and the
// CLI.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Keys of `map` ordered by ascending value.
///
/// An absent map yields an empty vector.
pub fn ordered_keys<K, V>(map: Option<&HashMap<K, V>>) -> Vec<K>
where
    K: Clone,
    V: Ord,
{
    let Some(map) = map else {
        return Vec::new();
    };
    let mut entries: Vec<(&K, &V)> = map.iter().collect();
    entries.sort_by(|a, b| a.1.cmp(b.1));
    entries.into_iter().map(|(k, _)| k.clone()).collect()
}

/// Value → position map for an iterable of unique values.
pub fn index_map<T, I>(values: I) -> HashMap<T, usize>
where
    T: Eq + Hash,
    I: IntoIterator<Item = T>,
{
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| (v, i))
        .collect()
}

/// Sort every value list of the map in place.
pub fn sorted_values<K, V>(mut map: HashMap<K, Vec<V>>) -> HashMap<K, Vec<V>>
where
    K: Eq + Hash,
    V: Ord,
{
    for values in map.values_mut() {
        values.sort();
    }
    map
}

/// Deduplicate every value list of the map into a set.
pub fn set_values<K, V>(map: HashMap<K, Vec<V>>) -> HashMap<K, HashSet<V>>
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    map.into_iter()
        .map(|(k, v)| (k, v.into_iter().collect()))
        .collect()
}

/// Validate a dash-separated list of integers, e.g. `"13-512-256-64"`.
///
/// Returns the input unchanged when every component parses; usable directly
/// as a clap value parser.
pub fn dash_separated_ints(value: &str) -> Result<String, String> {
    parse_dash_separated_ints(value)?;
    Ok(value.to_string())
}

/// Validate a dash-separated list of floats, e.g. `"0.1-0.01"`.
pub fn dash_separated_floats(value: &str) -> Result<String, String> {
    for part in value.split('-') {
        if part.parse::<f64>().is_err() {
            return Err(format!(
                "{} is not a valid dash separated list of floats",
                value
            ));
        }
    }
    Ok(value.to_string())
}

/// Parse a dash-separated list of integers into values.
pub fn parse_dash_separated_ints(value: &str) -> Result<Vec<i64>, String> {
    value
        .split('-')
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| format!("{} is not a valid dash separated list of ints", value))
        })
        .collect()
}
