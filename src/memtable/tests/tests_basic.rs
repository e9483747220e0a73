#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::comparator::{BytewiseComparator, InternalKeyComparator};
    use crate::engine::read::GetContext;
    use crate::memtable::MemTable;
    use crate::merge::{MergeOperator, UInt64AddOperator};
    use crate::types::{LookupKey, ValueType};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn lookup(
        mem: &MemTable,
        key: &[u8],
        snapshot: u64,
        operator: Option<Arc<dyn MergeOperator>>,
    ) -> Option<Vec<u8>> {
        let lkey = LookupKey::new(key, snapshot);
        let mut ctx = GetContext::new(key, snapshot, operator, None);
        let concluded = mem.get(&lkey, &mut ctx).unwrap();
        let result = ctx.finish().unwrap();
        if !concluded && result.is_none() {
            return None;
        }
        result
    }

    #[test]
    fn test_add_then_get() {
        let mem = MemTable::new(icmp(), 1);
        mem.add(1, ValueType::Value, b"key", b"value");

        assert_eq!(lookup(&mem, b"key", 10, None), Some(b"value".to_vec()));
        assert_eq!(lookup(&mem, b"missing", 10, None), None);
    }

    #[test]
    fn test_snapshot_visibility() {
        let mem = MemTable::new(icmp(), 1);
        mem.add(5, ValueType::Value, b"k", b"old");
        mem.add(9, ValueType::Value, b"k", b"new");

        // A snapshot between the versions sees the old value.
        assert_eq!(lookup(&mem, b"k", 5, None), Some(b"old".to_vec()));
        assert_eq!(lookup(&mem, b"k", 8, None), Some(b"old".to_vec()));
        assert_eq!(lookup(&mem, b"k", 9, None), Some(b"new".to_vec()));
        // A snapshot before the first write sees nothing.
        assert_eq!(lookup(&mem, b"k", 4, None), None);
    }

    #[test]
    fn test_tombstone_hides_value() {
        let mem = MemTable::new(icmp(), 1);
        mem.add(1, ValueType::Value, b"k", b"v");
        mem.add(2, ValueType::Deletion, b"k", b"");

        assert_eq!(lookup(&mem, b"k", 10, None), None);
        // The put is still visible below the tombstone.
        assert_eq!(lookup(&mem, b"k", 1, None), Some(b"v".to_vec()));
    }

    #[test]
    fn test_single_delete_hides_value() {
        let mem = MemTable::new(icmp(), 1);
        mem.add(1, ValueType::Value, b"k", b"v");
        mem.add(2, ValueType::SingleDeletion, b"k", b"");
        assert_eq!(lookup(&mem, b"k", 10, None), None);
    }

    #[test]
    fn test_merge_operands_accumulate() {
        let operator: Arc<dyn MergeOperator> = Arc::new(UInt64AddOperator);
        let mem = MemTable::new(icmp(), 1);
        mem.add(1, ValueType::Value, b"counter", &5u64.to_le_bytes());
        mem.add(2, ValueType::Merge, b"counter", &3u64.to_le_bytes());
        mem.add(3, ValueType::Merge, b"counter", &4u64.to_le_bytes());

        let merged = lookup(&mem, b"counter", 10, Some(operator)).unwrap();
        assert_eq!(merged, 12u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_merge_without_base() {
        let operator: Arc<dyn MergeOperator> = Arc::new(UInt64AddOperator);
        let mem = MemTable::new(icmp(), 1);
        mem.add(1, ValueType::Merge, b"counter", &7u64.to_le_bytes());

        let merged = lookup(&mem, b"counter", 10, Some(operator)).unwrap();
        assert_eq!(merged, 7u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_zero_length_key_and_value() {
        let mem = MemTable::new(icmp(), 1);
        mem.add(1, ValueType::Value, b"", b"");
        assert_eq!(lookup(&mem, b"", 10, None), Some(Vec::new()));
    }

    #[test]
    fn test_memory_usage_grows() {
        let mem = MemTable::new(icmp(), 1);
        assert_eq!(mem.approximate_memory_usage(), 0);
        assert!(mem.is_empty());

        mem.add(1, ValueType::Value, b"some-key", b"some-value");
        let after_one = mem.approximate_memory_usage();
        assert!(after_one > 0);

        mem.add(2, ValueType::Value, b"another-key", b"another-value");
        assert!(mem.approximate_memory_usage() > after_one);
        assert!(!mem.is_empty());
        assert_eq!(mem.num_entries(), 2);
    }

    #[test]
    fn test_sequence_tracking() {
        let mem = MemTable::new(icmp(), 3);
        mem.add(10, ValueType::Value, b"a", b"1");
        mem.add(17, ValueType::Value, b"b", b"2");
        mem.add(12, ValueType::Deletion, b"c", b"");

        assert_eq!(mem.smallest_sequence(), 10);
        assert_eq!(mem.largest_sequence(), 17);
        assert_eq!(mem.log_number(), 3);
    }
}
