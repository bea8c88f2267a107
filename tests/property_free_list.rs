//! Property-based tests for the free-space allocator
//!
//! Random allocate/free sequences must keep the on-disk chain, the in-memory
//! list and the container length consistent with each other.

use ggpk_rs::core::{Allocation, FreeRecord};
use ggpk_rs::{Ggpk, GgpkOptions};
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    Allocate(u64),
    /// Free the live allocation at this index (modulo the live count)
    Free(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (16u64..2048).prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

fn check_chain(free: &[FreeRecord], container_len: u64) -> Result<(), TestCaseError> {
    for pair in free.windows(2) {
        prop_assert!(pair[0].offset < pair[1].offset, "chain not sorted");
        prop_assert!(pair[0].end() < pair[1].offset, "adjacent or overlapping free records");
        prop_assert_eq!(pair[0].next, pair[1].offset);
    }
    if let Some(last) = free.last() {
        prop_assert_eq!(last.next, 0);
        prop_assert!(last.end() <= container_len);
    }
    for record in free {
        prop_assert!(record.length as u64 >= 16);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_chain_matches_mirror(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Content.ggpk");
        let ggpk = Ggpk::create(&path, GgpkOptions::default()).unwrap();
        let base = ggpk.len();
        let mut live: Vec<Allocation> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(size) => {
                    let alloc = ggpk.allocate(size).unwrap();
                    prop_assert!(alloc.length as u64 >= size);
                    for other in &live {
                        prop_assert!(
                            alloc.end() <= other.offset || other.end() <= alloc.offset,
                            "allocation {:?} overlaps {:?}", alloc, other
                        );
                    }
                    live.push(alloc);
                }
                Op::Free(pick) if !live.is_empty() => {
                    let alloc = live.swap_remove(pick % live.len());
                    ggpk.free(alloc.offset, alloc.length as u64).unwrap();
                }
                Op::Free(_) => {}
            }

            ggpk.verify_free_list().unwrap();
            let free = ggpk.free_records();
            check_chain(&free, ggpk.len())?;

            let live_bytes: u64 = live.iter().map(|a| a.length as u64).sum();
            prop_assert_eq!(base + live_bytes + ggpk.free_space().total_bytes, ggpk.len());
        }

        let expected = ggpk.free_records();
        drop(ggpk);
        let reopened = Ggpk::open(&path, GgpkOptions::default()).unwrap();
        prop_assert_eq!(reopened.free_records(), expected);
    }

    #[test]
    fn prop_freeing_everything_leaves_one_block(
        sizes in prop::collection::vec(16u64..4096, 1..30),
        order in any::<u64>(),
    ) {
        let dir = TempDir::new().unwrap();
        let ggpk = Ggpk::create(dir.path().join("Content.ggpk"), GgpkOptions::default()).unwrap();
        let base = ggpk.len();

        let mut live: Vec<Allocation> = sizes.iter().map(|&s| ggpk.allocate(s).unwrap()).collect();
        let rotate = (order as usize) % live.len();
        live.rotate_left(rotate);

        for alloc in &live {
            ggpk.free(alloc.offset, alloc.length as u64).unwrap();
        }

        let free = ggpk.free_records();
        prop_assert_eq!(free.len(), 1);
        prop_assert_eq!(free[0].offset, base);
        prop_assert_eq!(free[0].end(), ggpk.len());
    }
}
