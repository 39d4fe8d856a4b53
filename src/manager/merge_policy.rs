use crate::storage::partition::PartitionMeta;

/// How the index manager reorganizes its on-disk partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Partitions accumulate until the budget runs out.
    NoMerge,
    /// Every flush merges everything into a single partition.
    Immediate,
    /// Geometric partition sizes: merge the longest suffix of small
    /// partitions that together stay below 1.4x the next one.
    Logarithmic,
    /// Keep at most two partitions, merging when their sizes get close.
    Sqrt,
    /// Shutdown policy: merge everything below 0.4x the update budget.
    SmallMerge,
    /// Long lists go to the in-place index; the short tail is kept as a
    /// single small partition.
    InPlace,
    /// In-place long lists plus logarithmic merging of the short tail.
    Hybrid,
}

impl MergeStrategy {
    pub fn uses_inplace_index(&self) -> bool {
        matches!(self, MergeStrategy::InPlace | MergeStrategy::Hybrid)
    }
}

/// Picks the partitions (by index into `metas`) that the next merge
/// should cover. An empty result means no merge is warranted.
pub fn select_partitions(
    strategy: MergeStrategy,
    metas: &[PartitionMeta],
    max_update_space: usize,
) -> Vec<usize> {
    match strategy {
        MergeStrategy::NoMerge => Vec::new(),
        MergeStrategy::Immediate | MergeStrategy::InPlace => {
            if metas.len() >= 2 {
                (0..metas.len()).collect()
            } else {
                Vec::new()
            }
        }
        MergeStrategy::Logarithmic | MergeStrategy::Hybrid => logarithmic_suffix(metas),
        MergeStrategy::Sqrt => sqrt_selection(metas, max_update_space),
        MergeStrategy::SmallMerge => {
            let limit = (max_update_space as f64 * 0.4) as u64;
            let selected: Vec<usize> = metas
                .iter()
                .enumerate()
                .filter(|(_, m)| m.size_bytes < limit)
                .map(|(i, _)| i)
                .collect();
            if selected.len() >= 2 {
                selected
            } else {
                Vec::new()
            }
        }
    }
}

/// The longest suffix of (newest, smallest) partitions whose combined
/// size does not exceed 1.4x the size of the partition right before it.
fn logarithmic_suffix(metas: &[PartitionMeta]) -> Vec<usize> {
    if metas.len() < 2 {
        return Vec::new();
    }
    let mut suffix_size = 0u64;
    let mut take = 0;
    for index in (0..metas.len()).rev() {
        let candidate = suffix_size + metas[index].size_bytes;
        if index == 0 || candidate as f64 <= 1.4 * metas[index - 1].size_bytes as f64 {
            suffix_size = candidate;
            take += 1;
        } else {
            break;
        }
    }
    if take >= 2 {
        (metas.len() - take..metas.len()).collect()
    } else {
        Vec::new()
    }
}

/// With two partitions, merge them only once the smaller has grown past
/// the square root of the larger (sizes normalized by the update-space
/// budget); below that, the smaller one absorbs the in-memory buffer on
/// its own.
fn sqrt_selection(metas: &[PartitionMeta], max_update_space: usize) -> Vec<usize> {
    match metas.len() {
        0 => Vec::new(),
        1 => vec![0],
        _ => {
            let last = metas.len() - 1;
            let a = metas[last - 1].size_bytes as f64 / max_update_space as f64;
            let b = metas[last].size_bytes as f64 / max_update_space as f64;
            let (larger, smaller) = if a >= b { (a, b) } else { (b, a) };
            let smaller_index = if a >= b { last } else { last - 1 };
            if smaller > larger.sqrt() {
                vec![last - 1, last]
            } else {
                vec![smaller_index]
            }
        }
    }
}
