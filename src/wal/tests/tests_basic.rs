#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::env::{Env, PosixEnv};
    use crate::wal::{BLOCK_SIZE, HEADER_SIZE, LogReader, LogWriter, ReplayMode};

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

    fn read_all(path: &std::path::Path, mode: ReplayMode) -> Vec<Vec<u8>> {
        let env = PosixEnv;
        let file = env.new_sequential_file(path).unwrap();
        let mut reader = LogReader::new(file, mode);
        let mut out = Vec::new();
        while let Some(record) = reader.read_record().unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn test_single_record_round_trip() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        let records = vec![b"hello log".to_vec()];
        write_records(&path, &records);
        assert_eq!(read_all(&path, ReplayMode::Strict), records);
    }

    #[test]
    fn test_many_records_round_trip() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        let records: Vec<Vec<u8>> = (0..500)
            .map(|i| format!("record-{i:04}").into_bytes())
            .collect();
        write_records(&path, &records);
        assert_eq!(read_all(&path, ReplayMode::Strict), records);
    }

    #[test]
    fn test_empty_record() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        write_records(&path, &[Vec::new(), b"after-empty".to_vec()]);
        let read = read_all(&path, ReplayMode::Strict);
        assert_eq!(read.len(), 2);
        assert!(read[0].is_empty());
        assert_eq!(read[1], b"after-empty");
    }

    #[test]
    fn test_record_spanning_multiple_blocks() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        // Three blocks worth of payload forces FIRST/MIDDLE/LAST.
        let big = vec![0x5A; BLOCK_SIZE * 3 + 17];
        let records = vec![b"small".to_vec(), big.clone(), b"tail".to_vec()];
        write_records(&path, &records);

        let read = read_all(&path, ReplayMode::Strict);
        assert_eq!(read.len(), 3);
        assert_eq!(read[0], b"small");
        assert_eq!(read[1], big);
        assert_eq!(read[2], b"tail");
    }

    #[test]
    fn test_block_trailer_padding() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        // Leave less than a header's worth of space at the block end,
        // then append another record: the writer must zero-pad and move
        // to the next block.
        let first_len = BLOCK_SIZE - 2 * HEADER_SIZE + 1;
        let records = vec![vec![1u8; first_len], b"second".to_vec()];
        write_records(&path, &records);

        let read = read_all(&path, ReplayMode::Strict);
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].len(), first_len);
        assert_eq!(read[1], b"second");
    }

    #[test]
    fn test_record_exactly_filling_block() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        let exact = vec![9u8; BLOCK_SIZE - HEADER_SIZE];
        write_records(&path, &[exact.clone(), b"next-block".to_vec()]);

        let read = read_all(&path, ReplayMode::Strict);
        assert_eq!(read[0], exact);
        assert_eq!(read[1], b"next-block");
    }

    #[test]
    fn test_empty_log_file() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");
        write_records(&path, &[]);
        assert!(read_all(&path, ReplayMode::Strict).is_empty());
    }
}
