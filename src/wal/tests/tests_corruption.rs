#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::env::{Env, PosixEnv};
    use crate::error::Status;
    use crate::wal::{LogReader, LogWriter, ReplayMode};

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn write_records(path: &std::path::Path, records: &[Vec<u8>]) {
        let env = PosixEnv;
        let file = env.new_writable_file(path).unwrap();
        let mut writer = LogWriter::new(file);
        for record in records {
            writer.add_record(record).unwrap();
        }
        writer.sync().unwrap();
    }

    fn open_reader(path: &std::path::Path, mode: ReplayMode) -> LogReader {
        let env = PosixEnv;
        LogReader::new(env.new_sequential_file(path).unwrap(), mode)
    }

    fn corrupt_at(path: &std::path::Path, offset: u64, bytes: &[u8]) {
        let mut file = OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(bytes).unwrap();
        file.sync_all().unwrap();
    }

    fn truncate_to(path: &std::path::Path, len: u64) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_len(len).unwrap();
        file.sync_all().unwrap();
    }

    #[test]
    fn test_strict_mode_rejects_corrupt_payload() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("MANIFEST-000001");

        write_records(&path, &[b"record-one".to_vec(), b"record-two".to_vec()]);
        // Flip a payload byte of the first record (header is 7 bytes).
        corrupt_at(&path, 9, &[0xFF]);

        let mut reader = open_reader(&path, ReplayMode::Strict);
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, Status::Corruption(_)));
    }

    #[test]
    fn test_strict_mode_rejects_torn_tail() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("MANIFEST-000001");

        write_records(&path, &[b"whole".to_vec(), vec![3u8; 600]]);
        let full_len = std::fs::metadata(&path).unwrap().len();
        truncate_to(&path, full_len - 100);

        let mut reader = open_reader(&path, ReplayMode::Strict);
        assert_eq!(reader.read_record().unwrap().unwrap(), b"whole");
        assert!(reader.read_record().is_err());
    }

    #[test]
    fn test_tolerant_mode_stops_cleanly_at_torn_tail() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        write_records(&path, &[b"alpha".to_vec(), b"beta".to_vec(), vec![8u8; 600]]);
        let full_len = std::fs::metadata(&path).unwrap().len();
        // Cut into the last record's payload.
        truncate_to(&path, full_len - 100);

        let mut reader = open_reader(&path, ReplayMode::TolerateTornTail);
        assert_eq!(reader.read_record().unwrap().unwrap(), b"alpha");
        assert_eq!(reader.read_record().unwrap().unwrap(), b"beta");
        assert_eq!(reader.read_record().unwrap(), None);
        assert!(reader.tail_truncated());
    }

    #[test]
    fn test_tolerant_mode_partial_header_at_tail() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        write_records(&path, &[b"alpha".to_vec()]);
        let full_len = std::fs::metadata(&path).unwrap().len();

        // Append three stray bytes: a torn header.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        file.sync_all().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), full_len + 3);

        let mut reader = open_reader(&path, ReplayMode::TolerateTornTail);
        assert_eq!(reader.read_record().unwrap().unwrap(), b"alpha");
        assert_eq!(reader.read_record().unwrap(), None);
        assert!(reader.tail_truncated());
    }

    #[test]
    fn test_tolerant_mode_resyncs_after_midfile_corruption() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        // Two blocks: corrupt a record in the first, expect records in
        // the second block to survive.
        let filler = vec![7u8; crate::wal::BLOCK_SIZE / 2];
        write_records(
            &path,
            &[
                b"victim".to_vec(),
                filler.clone(),
                filler.clone(),
                b"survivor".to_vec(),
            ],
        );

        // Corrupt the first record's payload.
        corrupt_at(&path, 8, &[0xEE]);

        let mut reader = open_reader(&path, ReplayMode::TolerateTornTail);
        let mut recovered = Vec::new();
        while let Some(record) = reader.read_record().unwrap() {
            recovered.push(record);
        }
        // Everything in the corrupted block is lost; later blocks
        // replay.
        assert!(recovered.iter().any(|r| r == b"survivor"));
        assert!(!recovered.iter().any(|r| r == b"victim"));
    }

    #[test]
    fn test_unknown_record_type_is_corruption_in_strict_mode() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("MANIFEST-000001");

        write_records(&path, &[b"data".to_vec()]);
        // Type byte is the 7th header byte.
        corrupt_at(&path, 6, &[0x7F]);

        let mut reader = open_reader(&path, ReplayMode::Strict);
        assert!(reader.read_record().is_err());
    }
}
