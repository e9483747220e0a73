#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::prefix::FixedPrefixExtractor;
    use crate::sstable::filter::{FilterBlockReader, FullFilterBlockBuilder};

    #[test]
    fn test_no_false_negatives() {
        let mut builder = FullFilterBlockBuilder::new(10, true, None);
        let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("key-{i}").into_bytes()).collect();
        for key in &keys {
            builder.add_key(key);
        }
        let reader = FilterBlockReader::new(builder.finish()).unwrap();

        for key in &keys {
            assert!(reader.may_contain(key), "false negative for {key:?}");
        }
    }

    #[test]
    fn test_false_positive_rate_reasonable() {
        let mut builder = FullFilterBlockBuilder::new(10, true, None);
        for i in 0..1000 {
            builder.add_key(format!("present-{i}").as_bytes());
        }
        let reader = FilterBlockReader::new(builder.finish()).unwrap();

        let mut false_positives = 0;
        let probes = 10_000;
        for i in 0..probes {
            if reader.may_contain(format!("absent-{i}").as_bytes()) {
                false_positives += 1;
            }
        }
        // 10 bits/key targets ~1%; leave generous slack.
        assert!(
            false_positives < probes / 20,
            "false positive rate too high: {false_positives}/{probes}"
        );
    }

    #[test]
    fn test_prefix_mode_matches_by_prefix() {
        let extractor = Arc::new(FixedPrefixExtractor::new(4));
        let mut builder = FullFilterBlockBuilder::new(10, false, Some(extractor));
        builder.add_key(b"user0001");
        builder.add_key(b"user0002");
        builder.add_key(b"acct0001");
        let reader = FilterBlockReader::new(builder.finish()).unwrap();

        // Queries go through the same prefixes.
        assert!(reader.may_contain(b"user"));
        assert!(reader.may_contain(b"acct"));
    }

    #[test]
    fn test_duplicate_prefixes_deduped() {
        let extractor = Arc::new(FixedPrefixExtractor::new(4));
        let mut builder = FullFilterBlockBuilder::new(10, false, Some(extractor));
        builder.add_key(b"user0001");
        builder.add_key(b"user0002");
        builder.add_key(b"user0003");
        // Adjacent identical prefixes count once.
        assert_eq!(builder.num_added(), 1);
    }

    #[test]
    fn test_whole_key_and_prefix_together() {
        let extractor = Arc::new(FixedPrefixExtractor::new(4));
        let mut builder = FullFilterBlockBuilder::new(10, true, Some(extractor));
        builder.add_key(b"user0001");
        assert_eq!(builder.num_added(), 2);

        let reader = FilterBlockReader::new(builder.finish()).unwrap();
        assert!(reader.may_contain(b"user0001"));
        assert!(reader.may_contain(b"user"));
    }

    #[test]
    fn test_trailer_layout() {
        let mut builder = FullFilterBlockBuilder::new(10, true, None);
        builder.add_key(b"only");
        let data = builder.finish();

        // filter bits || num_probes (1 byte) || num_lines (4 bytes LE)
        let num_lines = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap());
        let num_probes = data[data.len() - 5];
        assert!(num_lines >= 1);
        assert_eq!(num_lines % 2, 1, "line count must be odd");
        assert!((1..=30).contains(&num_probes));
        assert_eq!(data.len(), num_lines as usize * 64 + 5);
    }

    #[test]
    fn test_malformed_filter_rejected() {
        assert!(FilterBlockReader::new(vec![]).is_none());
        assert!(FilterBlockReader::new(vec![1, 2, 3]).is_none());
        // Line count disagreeing with the data length.
        let mut data = vec![0u8; 64 + 5];
        data[64] = 6;
        data[65..].copy_from_slice(&9u32.to_le_bytes());
        assert!(FilterBlockReader::new(data).is_none());
    }
}
