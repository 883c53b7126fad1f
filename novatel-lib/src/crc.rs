//! CRC-32 used by NovAtel ASCII and binary messages.
use crc::{Algorithm, Crc};

/// Reflected CRC-32 (polynomial 0xEDB88320 in reflected form) with a zero initial value and no
/// final xor.
pub const CRC_32_NOVATEL: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0,
    refin: true,
    refout: true,
    xorout: 0,
    check: 0x2dfd_2d88,
    residue: 0,
};

static CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_NOVATEL);

/// Compute the CRC of `dat`.
///
/// For binary messages the CRC covers the header and body. For ASCII messages it covers the
/// bytes after the sync character up to, but not including, the `*` delimiter.
#[must_use]
pub fn crc32(dat: &[u8]) -> u32 {
    CRC.checksum(dat)
}

/// Compute the CRC over several non-contiguous parts as if they were one slice.
#[must_use]
pub fn crc32_parts(parts: &[&[u8]]) -> u32 {
    let mut digest = CRC.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}
