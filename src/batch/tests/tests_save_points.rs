#[cfg(test)]
mod tests {
    use crate::batch::WriteBatch;

    #[test]
    fn test_rollback_restores_head() {
        let mut batch = WriteBatch::new();
        batch.put(b"keep", b"1");
        batch.set_save_point();
        batch.put(b"discard", b"2");
        batch.delete(b"discard-too");

        assert_eq!(batch.count(), 3);
        batch.rollback_to_save_point().unwrap();
        assert_eq!(batch.count(), 1);

        // The surviving bytes equal a batch that never saw the rolled
        // back ops.
        let mut expected = WriteBatch::new();
        expected.put(b"keep", b"1");
        assert_eq!(batch.data(), expected.data());
    }

    #[test]
    fn test_nested_save_points() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.set_save_point();
        batch.put(b"b", b"2");
        batch.set_save_point();
        batch.put(b"c", b"3");

        batch.rollback_to_save_point().unwrap();
        assert_eq!(batch.count(), 2);
        batch.rollback_to_save_point().unwrap();
        assert_eq!(batch.count(), 1);
        assert!(batch.rollback_to_save_point().is_err());
    }

    #[test]
    fn test_pop_save_point_keeps_ops() {
        let mut batch = WriteBatch::new();
        batch.set_save_point();
        batch.put(b"kept", b"v");
        batch.pop_save_point().unwrap();
        assert_eq!(batch.count(), 1);
        assert!(batch.pop_save_point().is_err());
        // The save point is gone; nothing left to roll back to.
        assert!(batch.rollback_to_save_point().is_err());
    }

    #[test]
    fn test_single_delete_flag_survives_rollback() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        batch.set_save_point();
        batch.single_delete(b"k");
        assert!(batch.has_single_delete());

        // Rolling back removes the op but must not downgrade the
        // batch's single-delete nature.
        batch.rollback_to_save_point().unwrap();
        assert_eq!(batch.count(), 1);
        assert!(batch.has_single_delete());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut batch = WriteBatch::new();
        batch.single_delete(b"k");
        batch.set_save_point();
        batch.clear();

        assert!(batch.is_empty());
        assert!(!batch.has_single_delete());
        assert!(batch.rollback_to_save_point().is_err());
    }
}
