//! Randomized invariant checks for the freelist.

use proptest::prelude::*;
use qalloc::{FreeList, FreeNode};

#[derive(Debug, Clone)]
enum Op {
    Alloc(u64),
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..2048).prop_map(Op::Alloc),
        any::<usize>().prop_map(Op::Free),
    ]
}

const TOTAL: u64 = 64 * 1024;

proptest! {
    #[test]
    fn free_space_is_conserved(ops in proptest::collection::vec(op(), 1..200)) {
        let mut nodes = vec![FreeNode::default(); FreeList::node_count_for(TOTAL)];
        let mut list = FreeList::create(&mut nodes, TOTAL).unwrap();
        let mut live: Vec<(u64, u64)> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(size) => {
                    if let Ok(offset) = list.allocate(size) {
                        prop_assert!(offset + size <= TOTAL);
                        for &(o, s) in &live {
                            prop_assert!(offset + size <= o || o + s <= offset);
                        }
                        live.push((offset, size));
                    }
                }
                Op::Free(pick) => {
                    if live.is_empty() {
                        continue;
                    }
                    let (offset, size) = live[pick % live.len()];
                    // Node exhaustion leaves the range allocated.
                    if list.free(size, offset).is_ok() {
                        live.retain(|&(o, _)| o != offset);
                    }
                }
            }

            let used: u64 = live.iter().map(|&(_, s)| s).sum();
            prop_assert_eq!(list.free_space() + used, TOTAL);
        }
    }

    #[test]
    fn free_blocks_sorted_and_never_adjacent(sizes in proptest::collection::vec(1u64..4096, 1..16), order in any::<u64>()) {
        let mut nodes = vec![FreeNode::default(); FreeList::node_count_for(TOTAL)];
        let mut list = FreeList::create(&mut nodes, TOTAL).unwrap();
        let mut live: Vec<(u64, u64)> = sizes
            .iter()
            .filter_map(|&s| list.allocate(s).ok().map(|o| (o, s)))
            .collect();

        // Free in a shuffled order, checking the shape after each step.
        let mut seed = order;
        while !live.is_empty() {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let i = usize::try_from(seed >> 33).unwrap() % live.len();
            let (offset, size) = live.swap_remove(i);
            list.free(size, offset).unwrap();

            let blocks: Vec<_> = list.iter().collect();
            for w in blocks.windows(2) {
                prop_assert!(w[0].end() < w[1].offset);
            }
        }
        prop_assert_eq!(list.iter().count(), 1);
        prop_assert_eq!(list.free_space(), TOTAL);
    }

    #[test]
    fn double_free_changes_nothing(size in 1u64..8192) {
        let mut nodes = vec![FreeNode::default(); 8];
        let mut list = FreeList::create(&mut nodes, TOTAL).unwrap();
        let offset = list.allocate(size).unwrap();
        list.free(size, offset).unwrap();

        let before: Vec<_> = list.iter().collect();
        prop_assert!(list.free(size, offset).is_err());
        prop_assert_eq!(list.iter().collect::<Vec<_>>(), before);
    }
}
