#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::Status;
    use crate::txn::lock_manager::LockManager;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[test]
    fn test_exclusive_blocks_exclusive() {
        let locks = LockManager::new();
        locks.lock(1, b"k", true, LONG).unwrap();
        assert!(matches!(
            locks.lock(2, b"k", true, SHORT),
            Err(Status::LockTimeout)
        ));
        locks.unlock(1, b"k");
        locks.lock(2, b"k", true, LONG).unwrap();
    }

    #[test]
    fn test_shared_locks_coexist() {
        let locks = LockManager::new();
        locks.lock(1, b"k", false, LONG).unwrap();
        locks.lock(2, b"k", false, LONG).unwrap();
        // But an exclusive request waits.
        assert!(matches!(
            locks.lock(3, b"k", true, SHORT),
            Err(Status::LockTimeout)
        ));
        locks.unlock(1, b"k");
        locks.unlock(2, b"k");
        locks.lock(3, b"k", true, LONG).unwrap();
    }

    #[test]
    fn test_reentrant_acquisition() {
        let locks = LockManager::new();
        locks.lock(1, b"k", true, LONG).unwrap();
        // Re-acquiring one's own lock succeeds immediately.
        locks.lock(1, b"k", true, SHORT).unwrap();
        locks.lock(1, b"k", false, SHORT).unwrap();
    }

    #[test]
    fn test_upgrade_only_as_sole_holder() {
        let locks = LockManager::new();
        locks.lock(1, b"k", false, LONG).unwrap();
        // Sole holder: shared → exclusive allowed.
        locks.lock(1, b"k", true, SHORT).unwrap();
        locks.unlock(1, b"k");

        locks.lock(1, b"j", false, LONG).unwrap();
        locks.lock(2, b"j", false, LONG).unwrap();
        // Two holders: the upgrade must wait (and here, time out).
        assert!(matches!(
            locks.lock(1, b"j", true, SHORT),
            Err(Status::LockTimeout)
        ));
    }

    #[test]
    fn test_release_wakes_waiter() {
        let locks = Arc::new(LockManager::new());
        locks.lock(1, b"k", true, LONG).unwrap();

        let locks2 = Arc::clone(&locks);
        let waiter = std::thread::spawn(move || locks2.lock(2, b"k", true, LONG));

        std::thread::sleep(Duration::from_millis(50));
        locks.unlock(1, b"k");
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_deadlock_detected() {
        let locks = Arc::new(LockManager::new());
        locks.lock(1, b"a", true, LONG).unwrap();
        locks.lock(2, b"b", true, LONG).unwrap();

        // Txn 1 waits for b (held by 2) in a thread; txn 2 then asks
        // for a (held by 1): that wait would close the cycle.
        let locks1 = Arc::clone(&locks);
        let blocked = std::thread::spawn(move || locks1.lock(1, b"b", true, LONG));

        std::thread::sleep(Duration::from_millis(100));
        let result = locks.lock(2, b"a", true, LONG);
        assert!(matches!(result, Err(Status::Deadlock)));

        // Resolve: txn 2 releases, letting txn 1 proceed.
        locks.unlock(2, b"b");
        blocked.join().unwrap().unwrap();
    }

    #[test]
    fn test_unlock_all() {
        let locks = LockManager::new();
        locks.lock(7, b"a", true, LONG).unwrap();
        locks.lock(7, b"b", true, LONG).unwrap();
        locks.unlock_all(7, [&b"a"[..], b"b"]);

        locks.lock(8, b"a", true, SHORT).unwrap();
        locks.lock(8, b"b", true, SHORT).unwrap();
    }
}
