use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

/// Deduplicate a batch by device id, keeping the sample with the largest
/// recorded timestamp. Equal timestamps resolve to the last sample seen in
/// batch order, which is deterministic because batches preserve queue order.
///
/// The returned references keep their relative batch order.
pub fn dedup_latest<T, K, FId, FTs>(items: &[T], id: FId, recorded_at: FTs) -> Vec<&T>
where
    K: Eq + Hash,
    FId: Fn(&T) -> K,
    FTs: Fn(&T) -> DateTime<Utc>,
{
    let mut best: HashMap<K, usize> = HashMap::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match best.entry(id(item)) {
            Entry::Occupied(mut entry) => {
                if recorded_at(item) >= recorded_at(&items[*entry.get()]) {
                    entry.insert(index);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(index);
            }
        }
    }

    let mut indices: Vec<usize> = best.into_values().collect();
    indices.sort_unstable();
    indices.into_iter().map(|i| &items[i]).collect()
}
