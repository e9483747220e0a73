#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::engine::Db;
    use crate::engine::tests::helpers::{init_tracing, test_options};
    use crate::error::Status;
    use crate::options::{ColumnFamilyOptions, ReadOptions, WriteOptions};
    use crate::types::DEFAULT_COLUMN_FAMILY_ID;

    #[test]
    fn test_create_and_isolate() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_options()).unwrap();
        let wo = WriteOptions::default();
        let ro = ReadOptions::default();

        let cf = db
            .create_column_family("x", ColumnFamilyOptions::default())
            .unwrap();

        db.put_cf(&wo, cf.id(), b"k", b"X").unwrap();
        db.put(&wo, b"k", b"D").unwrap();

        assert_eq!(db.get(&ro, b"k").unwrap(), Some(b"D".to_vec()));
        assert_eq!(db.get_cf(&ro, cf.id(), b"k").unwrap(), Some(b"X".to_vec()));

        // The default family's iterator never leaks the other family.
        let mut iter = db.iter(&ro).unwrap();
        iter.seek_to_first();
        let mut count = 0;
        while iter.valid() {
            assert_eq!(iter.value(), b"D");
            count += 1;
            iter.next();
        }
        assert_eq!(count, 1);
        db.close().unwrap();
    }

    #[test]
    fn test_duplicate_name_rejected() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_options()).unwrap();
        db.create_column_family("x", ColumnFamilyOptions::default())
            .unwrap();
        assert!(matches!(
            db.create_column_family("x", ColumnFamilyOptions::default()),
            Err(Status::ColumnFamilyExists(_))
        ));
        db.close().unwrap();
    }

    #[test]
    fn test_drop_column_family() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_options()).unwrap();
        let wo = WriteOptions::default();

        let cf = db
            .create_column_family("temp", ColumnFamilyOptions::default())
            .unwrap();
        db.put_cf(&wo, cf.id(), b"k", b"v").unwrap();
        db.drop_column_family(&cf).unwrap();

        assert!(db.get_cf(&ReadOptions::default(), cf.id(), b"k").is_err());
        assert!(db.column_family("temp").is_err());
        db.close().unwrap();
    }

    #[test]
    fn test_dropping_default_forbidden() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_options()).unwrap();
        let default = db.column_family("default").unwrap();
        assert_eq!(default.id(), DEFAULT_COLUMN_FAMILY_ID);
        assert!(matches!(
            db.drop_column_family(&default),
            Err(Status::CannotDropDefaultCf)
        ));
        db.close().unwrap();
    }

    #[test]
    fn test_column_families_survive_reopen() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let wo = WriteOptions::default();

        {
            let db = Db::open(tmp.path(), test_options()).unwrap();
            let cf = db
                .create_column_family("metrics", ColumnFamilyOptions::default())
                .unwrap();
            db.put_cf(&wo, cf.id(), b"hits", b"42").unwrap();
            db.put(&wo, b"plain", b"default").unwrap();
            db.close().unwrap();
        }

        let (db, handles) = Db::open_with_column_families(
            tmp.path(),
            test_options(),
            vec![("metrics".to_string(), ColumnFamilyOptions::default())],
        )
        .unwrap();
        assert_eq!(handles.len(), 2);

        let metrics = db.column_family("metrics").unwrap();
        let ro = ReadOptions::default();
        assert_eq!(
            db.get_cf(&ro, metrics.id(), b"hits").unwrap(),
            Some(b"42".to_vec())
        );
        assert_eq!(db.get(&ro, b"plain").unwrap(), Some(b"default".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_cf_writes_recovered_from_wal_after_crash() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let wo = WriteOptions {
            sync: true,
            ..Default::default()
        };

        {
            let db = Db::open(tmp.path(), test_options()).unwrap();
            let cf = db
                .create_column_family("events", ColumnFamilyOptions::default())
                .unwrap();
            db.put_cf(&wo, cf.id(), b"e1", b"boot").unwrap();
            db.simulate_crash().unwrap();
        }

        let db = Db::open(tmp.path(), test_options()).unwrap();
        let events = db.column_family("events").unwrap();
        assert_eq!(
            db.get_cf(&ReadOptions::default(), events.id(), b"e1").unwrap(),
            Some(b"boot".to_vec())
        );
        db.close().unwrap();
    }

    #[test]
    fn test_write_to_unknown_cf_fails() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_options()).unwrap();
        assert!(matches!(
            db.put_cf(&WriteOptions::default(), 99, b"k", b"v"),
            Err(Status::ColumnFamilyNotFound(_))
        ));
        db.close().unwrap();
    }
}
