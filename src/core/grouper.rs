//! Prefix grouping of untranslated entries into batches

use std::collections::HashMap;
use tracing::debug;

use crate::core::models::{Batch, BatchItem, Mapping};

/// Clustering key of a source name.
///
/// Everything before the first digit when that is non-empty; otherwise the
/// first underscore segment including the underscore; otherwise the whole name.
pub fn extract_prefix(original: &str) -> &str {
    match original.find(|c: char| c.is_ascii_digit()) {
        Some(pos) if pos > 0 => return &original[..pos],
        _ => {}
    }

    match original.find('_') {
        Some(pos) => &original[..=pos],
        None => original,
    }
}

/// Partition pending entries into batches of entries sharing a prefix.
///
/// Groups smaller than `min_group_size` become singleton batches and groups
/// larger than `max_group_items` are cut into consecutive chunks. A
/// `max_group_items` of 0 disables the upper bound.
pub fn group_by_prefix(mapping: &Mapping, min_group_size: usize, max_group_items: usize) -> Vec<Batch> {
    let mut items: Vec<BatchItem> = mapping
        .iter()
        .filter(|(_, entry)| entry.is_pending())
        .map(|(id, entry)| BatchItem {
            id: id.clone(),
            original: entry.original.clone(),
        })
        .collect();

    if items.is_empty() {
        return Vec::new();
    }

    items.sort_by(|a, b| a.original.cmp(&b.original).then_with(|| a.id.cmp(&b.id)));

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<BatchItem>> = HashMap::new();
    for item in items {
        let prefix = extract_prefix(&item.original).to_string();
        groups
            .entry(prefix.clone())
            .or_insert_with(|| {
                order.push(prefix);
                Vec::new()
            })
            .push(item);
    }

    let mut batches = Vec::new();
    for prefix in order {
        let Some(group) = groups.remove(&prefix) else {
            continue;
        };

        if group.len() < min_group_size {
            debug!("Group {:?} has {} entries, splitting into singletons", prefix, group.len());
            batches.extend(group.into_iter().map(|item| Batch::new(vec![item])));
        } else if max_group_items > 0 && group.len() > max_group_items {
            debug!("Group {:?} has {} entries, slicing by {}", prefix, group.len(), max_group_items);
            batches.extend(group.chunks(max_group_items).map(|chunk| Batch::new(chunk.to_vec())));
        } else {
            batches.push(Batch::new(group));
        }
    }

    batches
}

/// Number of entries across all batches
pub fn total_items(batches: &[Batch]) -> usize {
    batches.iter().map(Batch::len).sum()
}
