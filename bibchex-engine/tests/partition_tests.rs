//! Pairwise partition covers every pair exactly once, for any chunk count

use bibchex_engine::partition::PairwisePartitioner;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn canonical_pairs(n: usize) -> BTreeSet<(usize, usize)> {
    (0..n).flat_map(|a| (a + 1..n).map(move |b| (a, b))).collect()
}

proptest! {
    #[test]
    fn prop_chunks_partition_pair_set(n in 0usize..60, k in 1usize..200) {
        let partitioner = PairwisePartitioner::new(n, k);

        let mut seen = BTreeSet::new();
        let mut total = 0u64;
        for i in 0..k {
            for pair in partitioner.chunk(i) {
                prop_assert!(seen.insert(pair), "pair {:?} emitted twice", pair);
                total += 1;
            }
        }

        prop_assert_eq!(total, partitioner.total_pairs());
        prop_assert_eq!(seen, canonical_pairs(n));
    }

    #[test]
    fn prop_chunks_are_in_position_order(n in 2usize..40, k in 1usize..50) {
        let partitioner = PairwisePartitioner::new(n, k);

        let positions: Vec<u64> = (0..k)
            .flat_map(|i| partitioner.chunk(i))
            .map(|(a, b)| partitioner.position(a, b))
            .collect();

        prop_assert_eq!(positions, (0..partitioner.total_pairs()).collect::<Vec<_>>());
    }

    #[test]
    fn prop_chunk_sizes_differ_by_at_most_one(n in 0usize..100, k in 1usize..64) {
        let partitioner = PairwisePartitioner::new(n, k);
        let sizes: Vec<u64> = (0..k)
            .map(|i| {
                let range = partitioner.chunk_range(i);
                range.end - range.start
            })
            .collect();

        let min = sizes.iter().min().copied().unwrap_or(0);
        let max = sizes.iter().max().copied().unwrap_or(0);
        prop_assert!(max - min <= 1);
    }
}

#[test]
fn test_out_of_range_chunk_is_empty() {
    let partitioner = PairwisePartitioner::new(10, 4);
    assert_eq!(partitioner.chunk(4).count(), 0);
    assert_eq!(partitioner.chunk_range(17), 0..0);
}
