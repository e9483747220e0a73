#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::comparator::{BytewiseComparator, InternalKeyComparator};
    use crate::iterator::InternalIterator;
    use crate::sstable::block::{Block, BlockBuilder};
    use crate::types::{ValueType, make_internal_key};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    /// Sorted internal keys with deterministic values.
    fn sample_entries(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                let key = make_internal_key(
                    format!("key-{i:05}").as_bytes(),
                    100,
                    ValueType::Value,
                );
                (key, format!("value-{i}").into_bytes())
            })
            .collect()
    }

    fn build_block(entries: &[(Vec<u8>, Vec<u8>)], restart_interval: usize) -> Arc<Block> {
        let mut builder = BlockBuilder::new(restart_interval);
        for (key, value) in entries {
            builder.add(key, value);
        }
        Arc::new(Block::new(builder.finish().to_vec()).unwrap())
    }

    #[test]
    fn test_round_trip_all_entries() {
        let entries = sample_entries(100);
        let block = build_block(&entries, 16);

        let mut iter = block.iter(icmp());
        iter.seek_to_first();
        for (key, value) in &entries {
            assert!(iter.valid());
            assert_eq!(iter.key(), key.as_slice());
            assert_eq!(iter.value(), value.as_slice());
            iter.next();
        }
        assert!(!iter.valid());
    }

    #[test]
    fn test_prefix_compression_shrinks_block() {
        let entries = sample_entries(100);
        let compressed = build_block(&entries, 16);
        let uncompressed = build_block(&entries, 1);
        // Interval 1 stores every key whole; 16 shares prefixes.
        assert!(compressed.size() < uncompressed.size());
    }

    #[test]
    fn test_seek_exact_and_between() {
        let entries = sample_entries(50);
        let block = build_block(&entries, 4);
        let mut iter = block.iter(icmp());

        // Exact hit.
        iter.seek(&entries[20].0);
        assert!(iter.valid());
        assert_eq!(iter.key(), entries[20].0.as_slice());

        // Between two keys: lands on the next one.
        let between = make_internal_key(b"key-00020x", 100, ValueType::Value);
        iter.seek(&between);
        assert!(iter.valid());
        assert_eq!(iter.key(), entries[21].0.as_slice());

        // Before the first key.
        let before = make_internal_key(b"a", 100, ValueType::Value);
        iter.seek(&before);
        assert!(iter.valid());
        assert_eq!(iter.key(), entries[0].0.as_slice());

        // After the last key.
        let after = make_internal_key(b"zzz", 100, ValueType::Value);
        iter.seek(&after);
        assert!(!iter.valid());
    }

    #[test]
    fn test_reverse_iteration() {
        let entries = sample_entries(33);
        let block = build_block(&entries, 5);
        let mut iter = block.iter(icmp());

        iter.seek_to_last();
        for (key, _) in entries.iter().rev() {
            assert!(iter.valid());
            assert_eq!(iter.key(), key.as_slice());
            iter.prev();
        }
        assert!(!iter.valid());
    }

    #[test]
    fn test_single_entry_block() {
        let entries = sample_entries(1);
        let block = build_block(&entries, 16);
        let mut iter = block.iter(icmp());

        iter.seek_to_first();
        assert!(iter.valid());
        iter.next();
        assert!(!iter.valid());

        iter.seek_to_last();
        assert!(iter.valid());
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_sequential_entries_decoder() {
        let mut builder = BlockBuilder::new(1);
        builder.add(b"alpha", b"1");
        builder.add(b"beta", b"2");
        builder.add(b"gamma", b"3");
        let block = Block::new(builder.finish().to_vec()).unwrap();

        let entries = block.entries().unwrap();
        assert_eq!(
            entries,
            vec![
                (b"alpha".to_vec(), b"1".to_vec()),
                (b"beta".to_vec(), b"2".to_vec()),
                (b"gamma".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_malformed_block_rejected() {
        assert!(Block::new(vec![]).is_err());
        assert!(Block::new(vec![1, 2]).is_err());
        // Restart count pointing past the data.
        let mut data = vec![0u8; 8];
        data[4..].copy_from_slice(&100u32.to_le_bytes());
        assert!(Block::new(data).is_err());
    }

    #[test]
    fn test_builder_reset() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"a", b"1");
        assert!(!builder.is_empty());
        builder.reset();
        assert!(builder.is_empty());
        builder.add(b"b", b"2");
        let block = Block::new(builder.finish().to_vec()).unwrap();
        assert_eq!(block.entries().unwrap(), vec![(b"b".to_vec(), b"2".to_vec())]);
    }
}
