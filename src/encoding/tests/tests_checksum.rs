#[cfg(test)]
mod tests {
    use crate::encoding::checksum::{
        ChecksumType, block_checksum, block_checksum_with_context, checksum_modifier_for_offset,
        crc32c, mask_crc, unmask_crc,
    };

    #[test]
    fn test_crc32c_known_vector() {
        // Castagnoli CRC of "123456789" is the classic check value.
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn test_mask_unmask_inverse() {
        for crc in [0u32, 1, 0xE306_9283, 0xFFFF_FFFF, 0x8000_0000] {
            assert_eq!(unmask_crc(mask_crc(crc)), crc);
        }
    }

    #[test]
    fn test_mask_changes_value() {
        // Masking must move the value so CRCs of CRCs stay distributed.
        let crc = crc32c(b"payload");
        assert_ne!(mask_crc(crc), crc);
    }

    #[test]
    fn test_block_checksum_covers_type_byte() {
        let data = b"block contents";
        let with_raw = block_checksum(ChecksumType::Crc32c, data, 0);
        let with_snappy = block_checksum(ChecksumType::Crc32c, data, 1);
        assert_ne!(with_raw, with_snappy);
    }

    #[test]
    fn test_no_checksum_is_zero() {
        assert_eq!(block_checksum(ChecksumType::NoChecksum, b"anything", 0), 0);
    }

    #[test]
    fn test_xxhash_family_distinct() {
        let data = b"the same block bytes";
        let h32 = block_checksum(ChecksumType::XxHash, data, 0);
        let h64 = block_checksum(ChecksumType::XxHash64, data, 0);
        let h3 = block_checksum(ChecksumType::Xxh3, data, 0);
        assert_ne!(h32, h64);
        assert_ne!(h64, h3);
        assert_ne!(h32, h3);
    }

    #[test]
    fn test_checksum_deterministic() {
        for ty in [
            ChecksumType::Crc32c,
            ChecksumType::XxHash,
            ChecksumType::XxHash64,
            ChecksumType::Xxh3,
        ] {
            assert_eq!(
                block_checksum(ty, b"stable", 2),
                block_checksum(ty, b"stable", 2)
            );
        }
    }

    #[test]
    fn test_context_checksum_depends_on_offset() {
        let data = b"relocatable block";
        let at_zero = block_checksum_with_context(ChecksumType::Crc32c, data, 0, Some(0));
        let at_4096 = block_checksum_with_context(ChecksumType::Crc32c, data, 0, Some(4096));
        assert_ne!(at_zero, at_4096);

        // Without context the offset is ignored.
        let plain = block_checksum_with_context(ChecksumType::Crc32c, data, 0, None);
        assert_eq!(plain, block_checksum(ChecksumType::Crc32c, data, 0));
    }

    #[test]
    fn test_context_modifier_spreads_offsets() {
        let a = checksum_modifier_for_offset(0);
        let b = checksum_modifier_for_offset(1);
        let c = checksum_modifier_for_offset(4096);
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_checksum_type_tags_round_trip() {
        for ty in [
            ChecksumType::NoChecksum,
            ChecksumType::Crc32c,
            ChecksumType::XxHash,
            ChecksumType::XxHash64,
            ChecksumType::Xxh3,
        ] {
            assert_eq!(ChecksumType::from_u8(ty as u8), Some(ty));
        }
        assert_eq!(ChecksumType::from_u8(99), None);
    }
}
