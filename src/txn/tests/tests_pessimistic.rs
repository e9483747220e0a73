#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::engine::Db;
    use crate::error::Status;
    use crate::options::{Options, ReadOptions, WriteOptions};
    use crate::txn::pessimistic::PessimisticTransactionDb;
    use crate::txn::TransactionOptions;

    fn open_db(path: &std::path::Path) -> Db {
        let mut options = Options::default();
        options.create_if_missing = true;
        Db::open(path, options).unwrap()
    }

    fn quick() -> TransactionOptions {
        TransactionOptions {
            lock_timeout: Duration::from_millis(50),
            expiration: None,
        }
    }

    #[test]
    fn test_commit_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let txn_db = PessimisticTransactionDb::new(open_db(tmp.path()));
        let ro = ReadOptions::default();

        let mut txn = txn_db.begin(quick());
        txn.put(b"k", b"v").unwrap();
        assert_eq!(txn.get(&ro, b"k").unwrap(), Some(b"v".to_vec()));
        txn.commit(&WriteOptions::default()).unwrap();

        assert_eq!(txn_db.db().get(&ro, b"k").unwrap(), Some(b"v".to_vec()));
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_lock_conflict_times_out() {
        let tmp = TempDir::new().unwrap();
        let txn_db = PessimisticTransactionDb::new(open_db(tmp.path()));

        let mut holder = txn_db.begin(quick());
        holder.put(b"contested", b"1").unwrap();

        let mut blocked = txn_db.begin(quick());
        assert!(matches!(
            blocked.put(b"contested", b"2"),
            Err(Status::LockTimeout)
        ));

        // Release and retry: the lock is free again.
        holder.commit(&WriteOptions::default()).unwrap();
        blocked.put(b"contested", b"2").unwrap();
        blocked.commit(&WriteOptions::default()).unwrap();

        assert_eq!(
            txn_db.db().get(&ReadOptions::default(), b"contested").unwrap(),
            Some(b"2".to_vec())
        );
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_rollback_releases_locks_and_discards() {
        let tmp = TempDir::new().unwrap();
        let txn_db = PessimisticTransactionDb::new(open_db(tmp.path()));
        let ro = ReadOptions::default();

        let mut txn = txn_db.begin(quick());
        txn.put(b"k", b"v").unwrap();
        txn.rollback().unwrap();

        assert_eq!(txn_db.db().get(&ro, b"k").unwrap(), None);

        // The lock is free for the next transaction.
        let mut next = txn_db.begin(quick());
        next.put(b"k", b"w").unwrap();
        next.commit(&WriteOptions::default()).unwrap();
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_drop_releases_locks() {
        let tmp = TempDir::new().unwrap();
        let txn_db = PessimisticTransactionDb::new(open_db(tmp.path()));

        {
            let mut txn = txn_db.begin(quick());
            txn.put(b"k", b"v").unwrap();
            // Dropped without commit or rollback.
        }

        let mut next = txn_db.begin(quick());
        next.put(b"k", b"w").unwrap();
        next.commit(&WriteOptions::default()).unwrap();
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_get_for_update_shared_then_upgrade() {
        let tmp = TempDir::new().unwrap();
        let txn_db = PessimisticTransactionDb::new(open_db(tmp.path()));
        let ro = ReadOptions::default();
        txn_db
            .db()
            .put(&WriteOptions::default(), b"k", b"base")
            .unwrap();

        let mut txn = txn_db.begin(quick());
        assert_eq!(
            txn.get_for_update(&ro, b"k", false).unwrap(),
            Some(b"base".to_vec())
        );
        // Sole shared holder may upgrade by writing.
        txn.put(b"k", b"upgraded").unwrap();
        txn.commit(&WriteOptions::default()).unwrap();

        assert_eq!(txn_db.db().get(&ro, b"k").unwrap(), Some(b"upgraded".to_vec()));
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_shared_readers_block_writer() {
        let tmp = TempDir::new().unwrap();
        let txn_db = PessimisticTransactionDb::new(open_db(tmp.path()));
        let ro = ReadOptions::default();

        let mut reader_a = txn_db.begin(quick());
        let mut reader_b = txn_db.begin(quick());
        reader_a.get_for_update(&ro, b"k", false).unwrap();
        reader_b.get_for_update(&ro, b"k", false).unwrap();

        let mut writer = txn_db.begin(quick());
        assert!(matches!(writer.put(b"k", b"v"), Err(Status::LockTimeout)));

        reader_a.rollback().unwrap();
        reader_b.rollback().unwrap();
        writer.put(b"k", b"v").unwrap();
        writer.commit(&WriteOptions::default()).unwrap();
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_expiration() {
        let tmp = TempDir::new().unwrap();
        let txn_db = PessimisticTransactionDb::new(open_db(tmp.path()));

        let mut txn = txn_db.begin(TransactionOptions {
            lock_timeout: Duration::from_millis(50),
            expiration: Some(Duration::from_millis(10)),
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(
            txn.put(b"k", b"v"),
            Err(Status::TransactionExpired)
        ));
        assert!(matches!(
            txn.commit(&WriteOptions::default()),
            Err(Status::TransactionExpired)
        ));
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_deadlock_between_transactions() {
        let tmp = TempDir::new().unwrap();
        let txn_db = std::sync::Arc::new(PessimisticTransactionDb::new(open_db(tmp.path())));
        let patient = TransactionOptions {
            lock_timeout: Duration::from_secs(5),
            expiration: None,
        };

        let mut txn_a = txn_db.begin(patient.clone());
        let mut txn_b = txn_db.begin(patient.clone());
        txn_a.put(b"one", b"a").unwrap();
        txn_b.put(b"two", b"b").unwrap();

        // txn_a blocks on "two" in a thread; txn_b then requests "one",
        // completing the cycle: one side must fail fast with Deadlock.
        let handle = std::thread::spawn(move || {
            let result = txn_a.put(b"two", b"a2");
            (txn_a, result)
        });
        std::thread::sleep(Duration::from_millis(100));

        let b_result = txn_b.put(b"one", b"b2");
        assert!(matches!(b_result, Err(Status::Deadlock)));
        txn_b.rollback().unwrap();

        let (txn_a, a_result) = handle.join().unwrap();
        a_result.unwrap();
        txn_a.commit(&WriteOptions::default()).unwrap();
        txn_db.db().close().unwrap();
    }

    #[test]
    fn test_save_point_keeps_single_delete_semantics() {
        let tmp = TempDir::new().unwrap();
        let txn_db = PessimisticTransactionDb::new(open_db(tmp.path()));

        let mut txn = txn_db.begin(quick());
        txn.single_delete(b"k").unwrap();
        txn.set_save_point();
        txn.put(b"extra", b"x").unwrap();
        txn.rollback_to_save_point().unwrap();
        txn.commit(&WriteOptions::default()).unwrap();
        txn_db.db().close().unwrap();
    }
}
