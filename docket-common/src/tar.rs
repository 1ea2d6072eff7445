//! The fixed USTAR subset Docket emits and relays.
//!
//! Every entry is a 512-byte header followed by its content, zero padded up
//! to the next 512-byte boundary. Only regular-file entries are ever
//! produced. The controller never inspects an archive beyond the size field
//! of each header, which it needs to know how many bytes to relay.

use thiserror::Error;

/// Size of a tar header block.
pub const HEADER_SIZE: usize = 512;

/// Content is padded to a multiple of this.
pub const BLOCK_SIZE: usize = 512;

/// Largest size representable in 11 octal digits.
pub const MAX_ENTRY_SIZE: u64 = 0o777_7777_7777;

const NAME: std::ops::Range<usize> = 0..100;
const MODE: std::ops::Range<usize> = 100..108;
const UID: std::ops::Range<usize> = 108..116;
const GID: std::ops::Range<usize> = 116..124;
const SIZE: std::ops::Range<usize> = 124..136;
const MTIME: std::ops::Range<usize> = 136..148;
const CHECKSUM: std::ops::Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const MAGIC: std::ops::Range<usize> = 257..263;
const VERSION: std::ops::Range<usize> = 263..265;

const DEFAULT_MODE: &[u8; 8] = b"0000666\0";
const DEFAULT_ID: &[u8; 8] = b"0000000\0";
const USTAR_MAGIC: &[u8; 6] = b"ustar\0";
const USTAR_VERSION: &[u8; 2] = b"00";
const TYPE_REGULAR: u8 = b'0';

/// Errors from encoding or decoding tar headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TarError {
    #[error("entry size {0} does not fit in an 11-digit octal field")]
    SizeOverflow(u64),

    #[error("invalid octal size field in tar header: {0:?}")]
    InvalidSize(String),
}

/// Build a header for `./<prefix>/<dir>/<filename>`.
///
/// The name is truncated to the 100-byte name field. `mtime` is seconds
/// since the Unix epoch; values that do not fit the field are clamped.
pub fn encode_header(
    prefix: &str,
    dir: &str,
    filename: &str,
    size: u64,
    mtime: u64,
) -> Result<[u8; HEADER_SIZE], TarError> {
    if size > MAX_ENTRY_SIZE {
        return Err(TarError::SizeOverflow(size));
    }

    let mut hdr = [0u8; HEADER_SIZE];

    let name = format!("./{prefix}/{dir}/{filename}");
    let name = name.as_bytes();
    let name_len = name.len().min(NAME.len());
    hdr[NAME.start..NAME.start + name_len].copy_from_slice(&name[..name_len]);

    hdr[MODE].copy_from_slice(DEFAULT_MODE);
    hdr[UID].copy_from_slice(DEFAULT_ID);
    hdr[GID].copy_from_slice(DEFAULT_ID);
    write_octal11(&mut hdr[SIZE], size);
    write_octal11(&mut hdr[MTIME], mtime.min(MAX_ENTRY_SIZE));
    hdr[TYPEFLAG] = TYPE_REGULAR;
    hdr[MAGIC].copy_from_slice(USTAR_MAGIC);
    hdr[VERSION].copy_from_slice(USTAR_VERSION);

    let sum = checksum(&hdr);
    let digits = format!("{:07o}\0", sum);
    hdr[CHECKSUM].copy_from_slice(digits.as_bytes());

    Ok(hdr)
}

/// Zero bytes needed after `size` bytes of content.
pub fn padding_len(size: u64) -> usize {
    let rem = (size % BLOCK_SIZE as u64) as usize;
    if rem == 0 { 0 } else { BLOCK_SIZE - rem }
}

/// Zero padding for `size` bytes of content (0..=511 bytes).
pub fn encode_padding(size: u64) -> Vec<u8> {
    vec![0u8; padding_len(size)]
}

/// Content length rounded up to the block size.
pub fn padded_len(size: u64) -> u64 {
    size + padding_len(size) as u64
}

/// Decode the octal size field of a header.
///
/// The field is read up to the first NUL or space. An empty field (such as
/// in an all-zero block) decodes as zero.
pub fn entry_size(header: &[u8; HEADER_SIZE]) -> Result<u64, TarError> {
    let field = &header[SIZE];
    let digits: Vec<u8> = field
        .iter()
        .copied()
        .skip_while(|b| *b == b' ')
        .take_while(|b| *b != 0 && *b != b' ')
        .collect();

    let mut size: u64 = 0;
    for b in &digits {
        if !(b'0'..=b'7').contains(b) {
            return Err(TarError::InvalidSize(
                String::from_utf8_lossy(field).into_owned(),
            ));
        }
        size = size
            .checked_mul(8)
            .and_then(|s| s.checked_add(u64::from(b - b'0')))
            .ok_or_else(|| TarError::InvalidSize(String::from_utf8_lossy(field).into_owned()))?;
    }
    Ok(size)
}

/// Entry name as stored in the header, up to the first NUL.
pub fn entry_name(header: &[u8; HEADER_SIZE]) -> String {
    let field = &header[NAME];
    let end = memchr::memchr(0, field).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Recompute the checksum and compare with the stored value.
pub fn verify_checksum(header: &[u8; HEADER_SIZE]) -> bool {
    let stored = &header[CHECKSUM];
    let digits: String = stored
        .iter()
        .take_while(|b| **b != 0 && **b != b' ')
        .map(|b| *b as char)
        .collect();
    match u32::from_str_radix(&digits, 8) {
        Ok(value) => value == checksum(header),
        Err(_) => false,
    }
}

/// Unsigned byte sum with the checksum field counted as eight spaces.
fn checksum(header: &[u8; HEADER_SIZE]) -> u32 {
    header
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if CHECKSUM.contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*b)
            }
        })
        .sum()
}

fn write_octal11(field: &mut [u8], value: u64) {
    let digits = format!("{:011o}", value);
    field[..11].copy_from_slice(digits.as_bytes());
    field[11] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let hdr = encode_header("host1", ".", "/etc/hostname", 6, 1_700_000_000).unwrap();

        assert_eq!(entry_name(&hdr), "./host1/.//etc/hostname");
        assert_eq!(&hdr[MODE], DEFAULT_MODE);
        assert_eq!(&hdr[UID], DEFAULT_ID);
        assert_eq!(&hdr[GID], DEFAULT_ID);
        assert_eq!(&hdr[SIZE], b"00000000006\0");
        assert_eq!(hdr[TYPEFLAG], b'0');
        assert_eq!(&hdr[MAGIC], b"ustar\0");
        assert_eq!(&hdr[VERSION], b"00");
        assert_eq!(hdr[CHECKSUM.end - 1], 0);
    }

    #[test]
    fn test_checksum_matches_manual_sum() {
        let hdr = encode_header("p", "d", "f", 1234, 42).unwrap();

        let mut copy = hdr;
        copy[CHECKSUM].copy_from_slice(b"        ");
        let manual: u32 = copy.iter().map(|b| u32::from(*b)).sum();

        let stored = std::str::from_utf8(&hdr[CHECKSUM.start..CHECKSUM.start + 7]).unwrap();
        assert_eq!(u32::from_str_radix(stored, 8).unwrap(), manual);
        assert!(verify_checksum(&hdr));
    }

    #[test]
    fn test_tampered_header_fails_checksum() {
        let mut hdr = encode_header("p", "d", "f", 10, 0).unwrap();
        hdr[0] ^= 0x01;
        assert!(!verify_checksum(&hdr));
    }

    #[test]
    fn test_long_name_truncated_to_field() {
        let long = "x".repeat(300);
        let hdr = encode_header("prefix", "dir", &long, 0, 0).unwrap();
        let name = entry_name(&hdr);
        assert_eq!(name.len(), 100);
        assert!(name.starts_with("./prefix/dir/xxx"));
        assert!(verify_checksum(&hdr));
    }

    #[test]
    fn test_size_overflow_rejected() {
        let err = encode_header("p", "d", "f", MAX_ENTRY_SIZE + 1, 0).unwrap_err();
        assert_eq!(err, TarError::SizeOverflow(MAX_ENTRY_SIZE + 1));
        assert!(encode_header("p", "d", "f", MAX_ENTRY_SIZE, 0).is_ok());
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding_len(0), 0);
        assert_eq!(padding_len(1), 511);
        assert_eq!(padding_len(511), 1);
        assert_eq!(padding_len(512), 0);
        assert_eq!(padding_len(513), 511);
        assert!(encode_padding(3).iter().all(|b| *b == 0));
        assert_eq!(padded_len(3), 512);
        assert_eq!(padded_len(1024), 1024);
    }

    #[test]
    fn test_entry_size_rejects_garbage() {
        let mut hdr = encode_header("p", "d", "f", 8, 0).unwrap();
        hdr[SIZE.start] = b'9';
        assert!(matches!(entry_size(&hdr), Err(TarError::InvalidSize(_))));
    }

    #[test]
    fn test_entry_size_of_zero_block() {
        let hdr = [0u8; HEADER_SIZE];
        assert_eq!(entry_size(&hdr).unwrap(), 0);
    }

    #[test]
    fn test_entry_size_accepts_space_terminated_field() {
        let mut hdr = [0u8; HEADER_SIZE];
        hdr[SIZE].copy_from_slice(b"     1750 \0\0");
        assert_eq!(entry_size(&hdr).unwrap(), 0o1750);
    }

    proptest! {
        #[test]
        fn prop_header_is_self_consistent(
            prefix in "[a-z0-9]{0,20}",
            dir in "[a-z./]{0,20}",
            name in "[ -~]{0,150}",
            size in 0u64..=MAX_ENTRY_SIZE,
            mtime in any::<u64>(),
        ) {
            let hdr = encode_header(&prefix, &dir, &name, size, mtime).unwrap();
            prop_assert!(verify_checksum(&hdr));
            prop_assert_eq!(entry_size(&hdr).unwrap(), size);
            prop_assert_eq!(padded_len(size) % BLOCK_SIZE as u64, 0);
            prop_assert!(padded_len(size) >= size);
            prop_assert!(padded_len(size) - size < BLOCK_SIZE as u64);
        }
    }
}
