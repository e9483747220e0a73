#[cfg(test)]
mod tests {
    use crate::batch::{BatchHandler, WriteBatch};
    use crate::error::Result;
    use crate::types::ColumnFamilyId;

    #[derive(Default)]
    struct MarkerProbe {
        begins: usize,
        ends: Vec<Vec<u8>>,
        commits: Vec<Vec<u8>>,
        rollbacks: Vec<Vec<u8>>,
        data_ops: usize,
    }

    impl BatchHandler for MarkerProbe {
        fn put(&mut self, _: ColumnFamilyId, _: &[u8], _: &[u8]) -> Result<()> {
            self.data_ops += 1;
            Ok(())
        }
        fn delete(&mut self, _: ColumnFamilyId, _: &[u8]) -> Result<()> {
            self.data_ops += 1;
            Ok(())
        }
        fn single_delete(&mut self, _: ColumnFamilyId, _: &[u8]) -> Result<()> {
            self.data_ops += 1;
            Ok(())
        }
        fn merge(&mut self, _: ColumnFamilyId, _: &[u8], _: &[u8]) -> Result<()> {
            self.data_ops += 1;
            Ok(())
        }
        fn delete_range(&mut self, _: ColumnFamilyId, _: &[u8], _: &[u8]) -> Result<()> {
            self.data_ops += 1;
            Ok(())
        }
        fn mark_begin_prepare(&mut self) -> Result<()> {
            self.begins += 1;
            Ok(())
        }
        fn mark_end_prepare(&mut self, xid: &[u8]) -> Result<()> {
            self.ends.push(xid.to_vec());
            Ok(())
        }
        fn mark_commit(&mut self, xid: &[u8]) -> Result<()> {
            self.commits.push(xid.to_vec());
            Ok(())
        }
        fn mark_rollback(&mut self, xid: &[u8]) -> Result<()> {
            self.rollbacks.push(xid.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_prepare_section_round_trip() {
        let mut batch = WriteBatch::new();
        batch.mark_begin_prepare();
        batch.put(b"k1", b"v1");
        batch.put(b"k2", b"v2");
        batch.mark_end_prepare(b"txn-42");

        assert!(batch.has_2pc_markers());
        assert_eq!(batch.count(), 2);

        let mut probe = MarkerProbe::default();
        batch.iterate(&mut probe).unwrap();
        assert_eq!(probe.begins, 1);
        assert_eq!(probe.ends, vec![b"txn-42".to_vec()]);
        assert_eq!(probe.data_ops, 2);
    }

    #[test]
    fn test_markers_only_batch() {
        // A batch carrying nothing but markers must encode, decode, and
        // surface its XIDs.
        let mut batch = WriteBatch::new();
        batch.mark_commit(b"xid-a");
        batch.mark_rollback(b"xid-b");

        assert_eq!(batch.count(), 0);
        assert!(batch.has_2pc_markers());

        let decoded = WriteBatch::from_data(batch.data().to_vec()).unwrap();
        assert!(decoded.has_2pc_markers());
        assert_eq!(decoded.count(), 0);

        let mut probe = MarkerProbe::default();
        decoded.iterate(&mut probe).unwrap();
        assert_eq!(probe.commits, vec![b"xid-a".to_vec()]);
        assert_eq!(probe.rollbacks, vec![b"xid-b".to_vec()]);
    }

    #[test]
    fn test_noop_marker_ignored() {
        let mut batch = WriteBatch::new();
        batch.mark_noop();
        batch.put(b"k", b"v");
        assert_eq!(batch.count(), 1);
        assert!(!batch.has_2pc_markers());

        let mut probe = MarkerProbe::default();
        batch.iterate(&mut probe).unwrap();
        assert_eq!(probe.data_ops, 1);
    }

    #[test]
    fn test_marker_flag_detected_on_decode() {
        let mut batch = WriteBatch::new();
        batch.mark_begin_prepare();
        batch.mark_end_prepare(b"x");

        let decoded = WriteBatch::from_data(batch.data().to_vec()).unwrap();
        assert!(decoded.has_2pc_markers());
    }
}
