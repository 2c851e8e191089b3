// ============================================================
// Layer 4 — Rank-Partitioned Dataset View
// ============================================================
// Gives each rank of a process group its own slice of a dataset
// so that, per epoch, every rank trains on different samples.
//
// Algorithm (identical on every rank):
//   1. order = 0..len, or a shuffle seeded with `seed + epoch`
//   2. pad by wrapping from the start until len % world == 0
//      (or drop the tail when `drop_last` is set)
//   3. keep order[rank], order[rank + world], order[rank + 2*world] ...
//
// Because the order only depends on (seed, epoch), ranks never
// need to talk to each other to agree on the partition.

use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{marker::PhantomData, sync::Arc};

#[derive(Debug, Clone, Copy)]
pub struct ShardOptions {
    pub shuffle:   bool,
    pub seed:      u64,
    pub epoch:     u64,
    pub drop_last: bool,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self { shuffle: true, seed: 0, epoch: 0, drop_last: false }
    }
}

impl ShardOptions {
    pub fn for_epoch(self, epoch: u64) -> Self {
        Self { epoch, ..self }
    }
}

/// Compute the dataset indices owned by `rank`.
pub fn shard_indices(len: usize, rank: usize, world_size: usize, opts: ShardOptions) -> Vec<usize> {
    assert!(world_size > 0 && rank < world_size, "rank {rank} outside world of {world_size}");

    let mut order: Vec<usize> = (0..len).collect();
    if opts.shuffle {
        let mut rng = StdRng::seed_from_u64(opts.seed.wrapping_add(opts.epoch));
        order.shuffle(&mut rng);
    }

    let per_rank = if opts.drop_last {
        len / world_size
    } else {
        len.div_ceil(world_size)
    };
    let total = per_rank * world_size;

    if total > len && len > 0 {
        // Wrap around as many times as needed (tiny datasets, big worlds)
        let mut k = 0;
        while order.len() < total {
            order.push(order[k]);
            k += 1;
        }
    }
    order.truncate(total);

    order.into_iter().skip(rank).step_by(world_size).collect()
}

/// A `Dataset` view over the samples assigned to one rank.
pub struct ShardedDataset<D, I> {
    inner:   Arc<D>,
    indices: Vec<usize>,
    _item:   PhantomData<fn() -> I>,
}

impl<D: Dataset<I>, I: Send + Sync> ShardedDataset<D, I> {
    pub fn new(inner: Arc<D>, rank: usize, world_size: usize, opts: ShardOptions) -> Self {
        let indices = shard_indices(inner.len(), rank, world_size, opts);
        tracing::debug!(
            "Rank {} of {} owns {} of {} samples (epoch {})",
            rank, world_size, indices.len(), inner.len(), opts.epoch
        );
        Self { inner, indices, _item: PhantomData }
    }
}

impl<D: Dataset<I>, I: Send + Sync> Dataset<I> for ShardedDataset<D, I> {
    fn get(&self, index: usize) -> Option<I> {
        self.indices.get(index).and_then(|&i| self.inner.get(i))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::InMemDataset;
    use std::collections::HashSet;

    #[test]
    fn test_disjoint_and_covering_when_divisible() {
        let opts = ShardOptions { shuffle: true, seed: 7, ..Default::default() };
        let shards: Vec<Vec<usize>> = (0..4).map(|r| shard_indices(12, r, 4, opts)).collect();

        let all: HashSet<usize> = shards.iter().flatten().copied().collect();
        assert_eq!(all.len(), 12);
        assert!(shards.iter().all(|s| s.len() == 3));
    }

    #[test]
    fn test_padding_gives_equal_lengths() {
        let opts = ShardOptions { shuffle: false, ..Default::default() };
        let shards: Vec<Vec<usize>> = (0..3).map(|r| shard_indices(10, r, 3, opts)).collect();
        assert!(shards.iter().all(|s| s.len() == 4));
        // Padding wraps from the start: 0..10 then 0, 1
        assert_eq!(shards[0], vec![0, 3, 6, 9]);
        assert_eq!(shards[1], vec![1, 4, 7, 0]);
        assert_eq!(shards[2], vec![2, 5, 8, 1]);
    }

    #[test]
    fn test_drop_last_trims_tail() {
        let opts = ShardOptions { shuffle: false, drop_last: true, ..Default::default() };
        assert_eq!(shard_indices(10, 0, 3, opts), vec![0, 3, 6]);
    }

    #[test]
    fn test_same_seed_and_epoch_agree_across_calls() {
        let opts = ShardOptions { seed: 3, epoch: 2, ..Default::default() };
        assert_eq!(shard_indices(50, 1, 2, opts), shard_indices(50, 1, 2, opts));
        assert_ne!(
            shard_indices(50, 1, 2, opts),
            shard_indices(50, 1, 2, opts.for_epoch(3)),
        );
    }

    #[test]
    fn test_tiny_dataset_large_world() {
        let opts = ShardOptions { shuffle: false, ..Default::default() };
        assert_eq!(shard_indices(2, 4, 5, opts), vec![0]);
    }

    #[test]
    fn test_dataset_view() {
        let inner = Arc::new(InMemDataset::new(vec!['a', 'b', 'c', 'd']));
        let opts  = ShardOptions { shuffle: false, ..Default::default() };
        let view  = ShardedDataset::new(inner, 1, 2, opts);
        assert_eq!(view.len(), 2);
        assert_eq!(view.get(0), Some('b'));
        assert_eq!(view.get(1), Some('d'));
        assert_eq!(view.get(2), None);
    }
}
