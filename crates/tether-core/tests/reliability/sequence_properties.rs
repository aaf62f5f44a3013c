pub mod sequence_properties {
    //! 序号追踪：任意插入顺序下，增量合并的结果与由集合直接推导的编码完全一致。

    use std::collections::BTreeSet;

    use proptest::prelude::*;
    use tether_core::SequencePresenceTracker;

    /// 由已观测集合直接推导标记序列与缺口，作为参考模型。
    fn reference(floor: u64, values: &BTreeSet<u64>) -> (Vec<u64>, Vec<(u64, u64)>) {
        let mut runs: Vec<(u64, u64)> = Vec::new();
        for &value in values.iter().filter(|value| **value >= floor) {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == value => *end = value,
                _ => runs.push((value, value)),
            }
        }

        let mut markers = Vec::new();
        let mut gaps = Vec::new();
        let mut expected = floor;
        for &(start, end) in &runs {
            if start == floor {
                markers.push(end);
            } else if start == end {
                markers.push(start);
            } else {
                markers.extend([start, end]);
            }
            if start > expected {
                gaps.push((expected, start - 1));
            }
            expected = end + 1;
        }
        (markers, gaps)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn incremental_merge_matches_reference(
            floor in 0u64..4,
            values in proptest::collection::vec(0u64..64, 0..96),
        ) {
            let mut tracker = SequencePresenceTracker::with_floor(floor);
            let mut seen = BTreeSet::new();
            for value in &values {
                let fresh = value >= &floor && seen.insert(*value);
                prop_assert_eq!(tracker.add(*value), fresh);
            }

            let (markers, gaps) = reference(floor, &seen);
            prop_assert_eq!(tracker.markers(), markers);
            let missing: Vec<(u64, u64)> = tracker
                .missing_ranges()
                .into_iter()
                .map(|range| (*range.start(), *range.end()))
                .collect();
            prop_assert_eq!(missing, gaps);
        }

        #[test]
        fn insertion_order_does_not_change_final_state(
            values in proptest::collection::btree_set(1u64..200, 0..80),
            seed in any::<u64>(),
        ) {
            let ascending: Vec<u64> = values.iter().copied().collect();
            let mut shuffled = ascending.clone();
            // 以种子做确定性的 Fisher-Yates 洗牌。
            let mut state = seed | 1;
            for index in (1..shuffled.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let pick = usize::try_from(state % (index as u64 + 1)).unwrap_or(0);
                shuffled.swap(index, pick);
            }

            let mut forward = SequencePresenceTracker::new();
            let mut mixed = SequencePresenceTracker::new();
            for value in &ascending {
                forward.add(*value);
            }
            for value in &shuffled {
                mixed.add(*value);
            }
            prop_assert_eq!(forward.runs(), mixed.runs());
        }
    }

    #[test]
    fn descending_fill_matches_documented_states() {
        let mut tracker = SequencePresenceTracker::new();
        let mut states = Vec::new();
        for value in [1, 3, 5, 10, 11, 9, 8, 7, 6, 4] {
            tracker.add(value);
            states.push(tracker.markers());
        }
        let expected: Vec<Vec<u64>> = vec![
            vec![1],
            vec![1, 3],
            vec![1, 3, 5],
            vec![1, 3, 5, 10],
            vec![1, 3, 5, 10, 11],
            vec![1, 3, 5, 9, 11],
            vec![1, 3, 5, 8, 11],
            vec![1, 3, 5, 7, 11],
            vec![1, 3, 5, 11],
            vec![1, 3, 11],
        ];
        assert_eq!(states, expected);
        assert_eq!(tracker.missing_ranges(), vec![2..=2]);
    }
}
