#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::engine::Db;
    use crate::error::Status;
    use crate::merge::UInt64AddOperator;
    use crate::options::{Options, ReadOptions, WriteOptions};
    use crate::txn::optimistic::OptimisticTransactionDb;

    fn open_db(path: &std::path::Path) -> Db {
        let mut options = Options::default();
        options.create_if_missing = true;
        options.cf_options.merge_operator = Some(Arc::new(UInt64AddOperator));
        Db::open(path, options).unwrap()
    }

    #[test]
    fn test_commit_applies_batch() {
        let tmp = TempDir::new().unwrap();
        let txn_db = OptimisticTransactionDb::new(open_db(tmp.path()));
        let ro = ReadOptions::default();

        let mut txn = txn_db.begin();
        txn.put(b"a", b"1").unwrap();
        txn.put(b"b", b"2").unwrap();

        // Uncommitted writes are invisible outside the transaction.
        assert_eq!(txn_db.db().get(&ro, b"a").unwrap(), None);
        // But visible through it.
        assert_eq!(txn.get(&ro, b"a").unwrap(), Some(b"1".to_vec()));

        txn.commit(&WriteOptions::default()).unwrap();
        assert_eq!(txn_db.db().get(&ro, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(txn_db.db().get(&ro, b"b").unwrap(), Some(b"2".to_vec()));
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_conflict_detected_on_commit() {
        let tmp = TempDir::new().unwrap();
        let txn_db = OptimisticTransactionDb::new(open_db(tmp.path()));
        let wo = WriteOptions::default();
        let ro = ReadOptions::default();

        txn_db.db().put(&wo, b"k", b"base").unwrap();

        let mut txn = txn_db.begin();
        assert_eq!(txn.get_for_update(&ro, b"k").unwrap(), Some(b"base".to_vec()));
        txn.put(b"k", b"txn-value").unwrap();

        // A foreign write lands between read and commit.
        txn_db.db().put(&wo, b"k", b"interloper").unwrap();

        assert!(matches!(
            txn.commit(&wo),
            Err(Status::TransactionConflict)
        ));
        // The database keeps the interloper's value.
        assert_eq!(
            txn_db.db().get(&ro, b"k").unwrap(),
            Some(b"interloper".to_vec())
        );
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_conflict_detected_for_deletes() {
        let tmp = TempDir::new().unwrap();
        let txn_db = OptimisticTransactionDb::new(open_db(tmp.path()));
        let wo = WriteOptions::default();
        let ro = ReadOptions::default();

        txn_db.db().put(&wo, b"k", b"base").unwrap();
        let mut txn = txn_db.begin();
        txn.get_for_update(&ro, b"k").unwrap();
        txn.put(b"k", b"mine").unwrap();

        // A delete is a conflicting write too.
        txn_db.db().delete(&wo, b"k").unwrap();
        assert!(matches!(txn.commit(&wo), Err(Status::TransactionConflict)));
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_no_conflict_without_interference() {
        let tmp = TempDir::new().unwrap();
        let txn_db = OptimisticTransactionDb::new(open_db(tmp.path()));
        let wo = WriteOptions::default();
        let ro = ReadOptions::default();

        txn_db.db().put(&wo, b"k", b"base").unwrap();

        let mut txn = txn_db.begin();
        txn.get_for_update(&ro, b"k").unwrap();
        txn.put(b"k", b"updated").unwrap();

        // Unrelated traffic does not conflict.
        txn_db.db().put(&wo, b"other", b"x").unwrap();

        txn.commit(&wo).unwrap();
        assert_eq!(txn_db.db().get(&ro, b"k").unwrap(), Some(b"updated".to_vec()));
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_plain_get_does_not_track() {
        let tmp = TempDir::new().unwrap();
        let txn_db = OptimisticTransactionDb::new(open_db(tmp.path()));
        let wo = WriteOptions::default();
        let ro = ReadOptions::default();

        txn_db.db().put(&wo, b"k", b"base").unwrap();
        let mut txn = txn_db.begin();
        // An untracked read: later overwrites do not conflict.
        assert_eq!(txn.get(&ro, b"k").unwrap(), Some(b"base".to_vec()));
        txn.put(b"other", b"v").unwrap();
        txn_db.db().put(&wo, b"k", b"changed").unwrap();
        txn.commit(&wo).unwrap();
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_rollback_discards() {
        let tmp = TempDir::new().unwrap();
        let txn_db = OptimisticTransactionDb::new(open_db(tmp.path()));
        let ro = ReadOptions::default();

        let mut txn = txn_db.begin();
        txn.put(b"ghost", b"v").unwrap();
        txn.rollback().unwrap();
        assert_eq!(txn_db.db().get(&ro, b"ghost").unwrap(), None);
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_read_own_merges() {
        let tmp = TempDir::new().unwrap();
        let txn_db = OptimisticTransactionDb::new(open_db(tmp.path()));
        let wo = WriteOptions::default();
        let ro = ReadOptions::default();

        txn_db.db().put(&wo, b"c", &10u64.to_le_bytes()).unwrap();

        let mut txn = txn_db.begin();
        txn.merge(b"c", &5u64.to_le_bytes()).unwrap();
        assert_eq!(
            txn.get(&ro, b"c").unwrap(),
            Some(15u64.to_le_bytes().to_vec())
        );
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_save_point_in_transaction() {
        let tmp = TempDir::new().unwrap();
        let txn_db = OptimisticTransactionDb::new(open_db(tmp.path()));
        let wo = WriteOptions::default();
        let ro = ReadOptions::default();

        let mut txn = txn_db.begin();
        txn.put(b"kept", b"1").unwrap();
        txn.set_save_point();
        txn.put(b"dropped", b"2").unwrap();
        txn.rollback_to_save_point().unwrap();
        txn.commit(&wo).unwrap();

        assert_eq!(txn_db.db().get(&ro, b"kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(txn_db.db().get(&ro, b"dropped").unwrap(), None);
        txn_db.db().close().unwrap();
    }
}
