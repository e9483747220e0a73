#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::env::{
        FileType, blob_file_name, current_file_name, lock_file_name, log_file_name,
        manifest_file_name, parse_file_name, table_file_name, temp_file_name,
    };

    #[test]
    fn test_file_name_formatting() {
        let db = Path::new("/db");
        assert_eq!(log_file_name(db, 7), Path::new("/db/000007.log"));
        assert_eq!(table_file_name(db, 123), Path::new("/db/000123.sst"));
        assert_eq!(blob_file_name(db, 9), Path::new("/db/000009.blob"));
        assert_eq!(manifest_file_name(db, 4), Path::new("/db/MANIFEST-000004"));
        assert_eq!(current_file_name(db), Path::new("/db/CURRENT"));
        assert_eq!(lock_file_name(db), Path::new("/db/LOCK"));
        assert_eq!(temp_file_name(db, 11), Path::new("/db/000011.dbtmp"));
    }

    #[test]
    fn test_parse_round_trip() {
        assert_eq!(parse_file_name("000007.log"), Some((FileType::WalFile, 7)));
        assert_eq!(
            parse_file_name("000123.sst"),
            Some((FileType::TableFile, 123))
        );
        assert_eq!(parse_file_name("000009.blob"), Some((FileType::BlobFile, 9)));
        assert_eq!(
            parse_file_name("MANIFEST-000004"),
            Some((FileType::ManifestFile, 4))
        );
        assert_eq!(parse_file_name("CURRENT"), Some((FileType::CurrentFile, 0)));
        assert_eq!(parse_file_name("LOCK"), Some((FileType::LockFile, 0)));
        assert_eq!(
            parse_file_name("OPTIONS-000021"),
            Some((FileType::OptionsFile, 21))
        );
        assert_eq!(parse_file_name("000011.dbtmp"), Some((FileType::TempFile, 11)));
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert_eq!(parse_file_name("README.md"), None);
        assert_eq!(parse_file_name("MANIFEST-abc"), None);
        assert_eq!(parse_file_name("12x.sst"), None);
        assert_eq!(parse_file_name(""), None);
        assert_eq!(parse_file_name(".sst"), None);
    }

    #[test]
    fn test_parse_large_numbers() {
        assert_eq!(
            parse_file_name("18446744073709551615.sst"),
            Some((FileType::TableFile, u64::MAX))
        );
    }
}
