#[cfg(test)]
mod tests {
    use crate::batch::{BATCH_HEADER_SIZE, BatchHandler, WriteBatch};
    use crate::error::Result;
    use crate::types::ColumnFamilyId;

    /// Records every callback as a printable op for comparisons.
    #[derive(Default)]
    struct Recorder {
        ops: Vec<String>,
    }

    impl BatchHandler for Recorder {
        fn put(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()> {
            self.ops.push(format!(
                "put({cf},{},{})",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            ));
            Ok(())
        }
        fn delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
            self.ops
                .push(format!("del({cf},{})", String::from_utf8_lossy(key)));
            Ok(())
        }
        fn single_delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
            self.ops
                .push(format!("sdel({cf},{})", String::from_utf8_lossy(key)));
            Ok(())
        }
        fn merge(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()> {
            self.ops.push(format!(
                "merge({cf},{},{})",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            ));
            Ok(())
        }
        fn delete_range(&mut self, cf: ColumnFamilyId, begin: &[u8], end: &[u8]) -> Result<()> {
            self.ops.push(format!(
                "delrange({cf},{},{})",
                String::from_utf8_lossy(begin),
                String::from_utf8_lossy(end)
            ));
            Ok(())
        }
        fn log_data(&mut self, blob: &[u8]) {
            self.ops
                .push(format!("logdata({})", String::from_utf8_lossy(blob)));
        }
    }

    fn replay(batch: &WriteBatch) -> Vec<String> {
        let mut recorder = Recorder::default();
        batch.iterate(&mut recorder).unwrap();
        recorder.ops
    }

    #[test]
    fn test_empty_batch() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.sequence(), 0);
        assert_eq!(batch.data().len(), BATCH_HEADER_SIZE);
        assert!(replay(&batch).is_empty());
    }

    #[test]
    fn test_all_op_kinds_in_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"k1", b"v1");
        batch.delete(b"k2");
        batch.single_delete(b"k3");
        batch.merge(b"k4", b"+1");
        batch.delete_range(b"a", b"m");
        batch.put_log_data(b"blob");

        assert_eq!(batch.count(), 5); // log data is not counted
        assert_eq!(
            replay(&batch),
            vec![
                "put(0,k1,v1)",
                "del(0,k2)",
                "sdel(0,k3)",
                "merge(0,k4,+1)",
                "delrange(0,a,m)",
                "logdata(blob)",
            ]
        );
    }

    #[test]
    fn test_column_family_tags() {
        let mut batch = WriteBatch::new();
        batch.put_cf(3, b"k", b"v");
        batch.delete_cf(7, b"k");
        batch.merge_cf(3, b"k", b"m");
        batch.delete_range_cf(9, b"x", b"z");
        batch.single_delete_cf(5, b"k");

        assert_eq!(batch.count(), 5);
        assert_eq!(
            replay(&batch),
            vec![
                "put(3,k,v)",
                "del(7,k)",
                "merge(3,k,m)",
                "delrange(9,x,z)",
                "sdel(5,k)",
            ]
        );
    }

    #[test]
    fn test_sequence_stamping() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        batch.set_sequence(991);
        assert_eq!(batch.sequence(), 991);
        assert_eq!(batch.count(), 1);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(1234);
        batch.put(b"alpha", b"1");
        batch.delete_cf(4, b"beta");
        batch.merge(b"gamma", b"+2");
        batch.delete_range(b"d", b"f");

        let decoded = WriteBatch::from_data(batch.data().to_vec()).unwrap();
        assert_eq!(decoded.data(), batch.data());
        assert_eq!(decoded.count(), batch.count());
        assert_eq!(decoded.sequence(), 1234);
        assert_eq!(replay(&decoded), replay(&batch));
    }

    #[test]
    fn test_zero_length_key_and_value() {
        let mut batch = WriteBatch::new();
        batch.put(b"", b"");
        batch.delete(b"");

        assert_eq!(batch.count(), 2);
        assert_eq!(replay(&batch), vec!["put(0,,)", "del(0,)"]);

        let decoded = WriteBatch::from_data(batch.data().to_vec()).unwrap();
        assert_eq!(replay(&decoded), replay(&batch));
    }

    #[test]
    fn test_append_batch() {
        let mut left = WriteBatch::new();
        left.put(b"a", b"1");
        let mut right = WriteBatch::new();
        right.delete(b"b");
        right.single_delete(b"c");

        left.append_batch(&right);
        assert_eq!(left.count(), 3);
        assert!(left.has_single_delete());
        assert_eq!(replay(&left), vec!["put(0,a,1)", "del(0,b)", "sdel(0,c)"]);
    }

    #[test]
    fn test_truncated_data_rejected() {
        assert!(WriteBatch::from_data(vec![0; 5]).is_err());

        let mut batch = WriteBatch::new();
        batch.put(b"key", b"value");
        let mut data = batch.data().to_vec();
        data.truncate(data.len() - 2);
        assert!(WriteBatch::from_data(data).is_err());
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let mut batch = WriteBatch::new();
        batch.put(b"key", b"value");
        let mut data = batch.data().to_vec();
        // Claim two ops while only one is present.
        data[8..12].copy_from_slice(&2u32.to_le_bytes());
        assert!(WriteBatch::from_data(data).is_err());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        let mut data = batch.data().to_vec();
        data.push(0xEE);
        assert!(WriteBatch::from_data(data).is_err());
    }
}
