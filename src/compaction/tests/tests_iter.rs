#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::compaction::iter::{CompactionIter, CompactionIterConfig};
    use crate::compaction::{CompactionFilter, FilterDecision};
    use crate::comparator::{BytewiseComparator, InternalKeyComparator};
    use crate::iterator::VecIterator;
    use crate::merge::UInt64AddOperator;
    use crate::types::{
        SequenceNumber, ValueType, make_internal_key, parse_internal_key,
    };

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn config(snapshots: Vec<SequenceNumber>, bottommost: bool) -> CompactionIterConfig {
        CompactionIterConfig {
            icmp: icmp(),
            snapshots,
            bottommost,
            merge_operator: Some(Arc::new(UInt64AddOperator)),
            compaction_filter: None,
            output_level: 6,
            range_tombstones: Vec::new(),
        }
    }

    fn entry(key: &[u8], seq: u64, vt: ValueType, value: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (make_internal_key(key, seq, vt), value.to_vec())
    }

    /// Sort into internal-key order and run the full pass.
    fn run(config: &CompactionIterConfig, mut input: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let cmp = icmp();
        input.sort_by(|a, b| cmp.compare(&a.0, &b.0));
        let mut iter = CompactionIter::new(
            config,
            Box::new(VecIterator::new(cmp, input)),
            None,
            None,
        );
        let mut out = Vec::new();
        while let Some(entry) = iter.next().unwrap() {
            out.push(entry);
        }
        out
    }

    fn user_keys_and_seqs(entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<(Vec<u8>, u64, ValueType)> {
        entries
            .iter()
            .map(|(k, _)| {
                let p = parse_internal_key(k).unwrap();
                (p.user_key.to_vec(), p.sequence, p.value_type)
            })
            .collect()
    }

    #[test]
    fn test_shadowed_versions_dropped_without_snapshots() {
        let cfg = config(vec![], false);
        let out = run(
            &cfg,
            vec![
                entry(b"k", 5, ValueType::Value, b"new"),
                entry(b"k", 3, ValueType::Value, b"mid"),
                entry(b"k", 1, ValueType::Value, b"old"),
            ],
        );
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"k".to_vec(), 5, ValueType::Value)]
        );
        assert_eq!(out[0].1, b"new");
    }

    #[test]
    fn test_snapshot_keeps_both_stripes() {
        // Snapshot at 3 separates seq 5 from seq 3.
        let cfg = config(vec![3], false);
        let out = run(
            &cfg,
            vec![
                entry(b"k", 5, ValueType::Value, b"new"),
                entry(b"k", 3, ValueType::Value, b"pinned"),
                entry(b"k", 2, ValueType::Value, b"shadowed"),
            ],
        );
        // Seq 3 survives for the snapshot; seq 2 shares its stripe and
        // dies.
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![
                (b"k".to_vec(), 5, ValueType::Value),
                (b"k".to_vec(), 3, ValueType::Value),
            ]
        );
    }

    #[test]
    fn test_deletion_elided_only_at_bottommost() {
        let input = vec![
            entry(b"gone", 4, ValueType::Deletion, b""),
            entry(b"gone", 2, ValueType::Value, b"x"),
        ];

        // Not bottommost: the tombstone must survive to shadow deeper
        // levels.
        let cfg = config(vec![], false);
        let out = run(&cfg, input.clone());
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"gone".to_vec(), 4, ValueType::Deletion)]
        );

        // Bottommost with no snapshots: everything disappears.
        let cfg = config(vec![], true);
        let out = run(&cfg, input);
        assert!(out.is_empty());
    }

    #[test]
    fn test_deletion_kept_while_snapshot_observes() {
        let cfg = config(vec![3], true);
        let out = run(
            &cfg,
            vec![
                entry(b"k", 5, ValueType::Deletion, b""),
                entry(b"k", 2, ValueType::Value, b"pinned"),
            ],
        );
        // The snapshot at 3 still reads the put; both records stay.
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![
                (b"k".to_vec(), 5, ValueType::Deletion),
                (b"k".to_vec(), 2, ValueType::Value),
            ]
        );
    }

    #[test]
    fn test_merge_collapse_onto_base() {
        let cfg = config(vec![], false);
        let out = run(
            &cfg,
            vec![
                entry(b"c", 5, ValueType::Merge, &3u64.to_le_bytes()),
                entry(b"c", 4, ValueType::Merge, &2u64.to_le_bytes()),
                entry(b"c", 3, ValueType::Value, &10u64.to_le_bytes()),
            ],
        );
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"c".to_vec(), 5, ValueType::Value)]
        );
        assert_eq!(out[0].1, 15u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_merge_collapse_onto_deletion() {
        let cfg = config(vec![], false);
        let out = run(
            &cfg,
            vec![
                entry(b"c", 5, ValueType::Merge, &3u64.to_le_bytes()),
                entry(b"c", 3, ValueType::Deletion, b""),
            ],
        );
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"c".to_vec(), 5, ValueType::Value)]
        );
        assert_eq!(out[0].1, 3u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_merge_partial_collapse_without_base() {
        // No base and not bottommost: operands must collapse partially
        // (uint64add is associative) into one merge record.
        let cfg = config(vec![], false);
        let out = run(
            &cfg,
            vec![
                entry(b"c", 5, ValueType::Merge, &3u64.to_le_bytes()),
                entry(b"c", 4, ValueType::Merge, &2u64.to_le_bytes()),
                entry(b"c", 3, ValueType::Merge, &1u64.to_le_bytes()),
            ],
        );
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"c".to_vec(), 5, ValueType::Merge)]
        );
        assert_eq!(out[0].1, 6u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_merge_full_collapse_at_bottommost() {
        let cfg = config(vec![], true);
        let out = run(
            &cfg,
            vec![
                entry(b"c", 5, ValueType::Merge, &3u64.to_le_bytes()),
                entry(b"c", 4, ValueType::Merge, &2u64.to_le_bytes()),
            ],
        );
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"c".to_vec(), 5, ValueType::Value)]
        );
        assert_eq!(out[0].1, 5u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_single_delete_annihilates_matching_put() {
        let cfg = config(vec![], false);
        let out = run(
            &cfg,
            vec![
                entry(b"k", 5, ValueType::SingleDeletion, b""),
                entry(b"k", 4, ValueType::Value, b"newest"),
                entry(b"k", 2, ValueType::Value, b"older"),
            ],
        );
        // The single-delete and its matching put vanish; the older
        // version re-surfaces.
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"k".to_vec(), 2, ValueType::Value)]
        );
        assert_eq!(out[0].1, b"older");
    }

    #[test]
    fn test_range_tombstone_drops_covered_versions() {
        let mut cfg = config(vec![], false);
        cfg.range_tombstones = vec![(b"a".to_vec(), b"m".to_vec(), 10)];

        let out = run(
            &cfg,
            vec![
                entry(b"b", 4, ValueType::Value, b"covered"),
                entry(b"x", 5, ValueType::Value, b"outside"),
                entry(b"c", 12, ValueType::Value, b"newer-than-tombstone"),
            ],
        );
        let keys: Vec<Vec<u8>> = out
            .iter()
            .map(|(k, _)| parse_internal_key(k).unwrap().user_key.to_vec())
            .collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn test_range_tombstone_respects_snapshot_stripes() {
        // Snapshot at 5 separates the covered put (seq 4) from the
        // tombstone (seq 10): the put stays readable.
        let mut cfg = config(vec![5], false);
        cfg.range_tombstones = vec![(b"a".to_vec(), b"m".to_vec(), 10)];

        let out = run(&cfg, vec![entry(b"b", 4, ValueType::Value, b"pinned")]);
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"b".to_vec(), 4, ValueType::Value)]
        );
    }

    #[test]
    fn test_compaction_filter_removes_keys() {
        struct DropOdd;
        impl CompactionFilter for DropOdd {
            fn name(&self) -> &str {
                "drop-odd"
            }
            fn filter(&self, _level: usize, key: &[u8], _value: &[u8]) -> FilterDecision {
                if key.last().is_some_and(|b| b % 2 == 1) {
                    FilterDecision::Remove
                } else {
                    FilterDecision::Keep
                }
            }
        }

        let mut cfg = config(vec![], true);
        cfg.compaction_filter = Some(Arc::new(DropOdd));

        let out = run(
            &cfg,
            vec![
                entry(&[b'k', 1], 4, ValueType::Value, b"odd"),
                entry(&[b'k', 2], 5, ValueType::Value, b"even"),
            ],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, b"even");
    }

    #[test]
    fn test_compaction_filter_change_value() {
        struct Redact;
        impl CompactionFilter for Redact {
            fn name(&self) -> &str {
                "redact"
            }
            fn filter(&self, _level: usize, _key: &[u8], _value: &[u8]) -> FilterDecision {
                FilterDecision::Change(b"<redacted>".to_vec())
            }
        }

        let mut cfg = config(vec![], false);
        cfg.compaction_filter = Some(Arc::new(Redact));

        let out = run(&cfg, vec![entry(b"secret", 3, ValueType::Value, b"pw")]);
        assert_eq!(out[0].1, b"<redacted>");
    }

    #[test]
    fn test_filter_skips_snapshot_protected_versions() {
        struct DropAll;
        impl CompactionFilter for DropAll {
            fn name(&self) -> &str {
                "drop-all"
            }
            fn filter(&self, _: usize, _: &[u8], _: &[u8]) -> FilterDecision {
                FilterDecision::Remove
            }
        }

        // A snapshot pins seq 3; the filter must not erase it.
        let mut cfg = config(vec![3], false);
        cfg.compaction_filter = Some(Arc::new(DropAll));

        let out = run(&cfg, vec![entry(b"k", 3, ValueType::Value, b"pinned")]);
        assert_eq!(
            user_keys_and_seqs(&out),
            vec![(b"k".to_vec(), 3, ValueType::Value)]
        );
    }
}
