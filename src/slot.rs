//! Implements the cluster hash slot algorithm.

use crc::{CRC_16_XMODEM, Crc};

/// The total number of hash slots in the cluster.
pub const NUM_SLOTS: usize = 16384;

/// CRC16/XMODEM: polynomial 0x1021, init 0x0000. This is the exact variant
/// the cluster server uses to partition the keyspace; any other CRC16
/// parameterization (e.g. CRC-16/USB) desynchronizes routing.
const CRC16_ALGO: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the hash slot for a given key.
///
/// Checks for a hash tag (a substring enclosed in `{...}`) within the key.
/// If a non-empty tag is found, only the content within the tag is hashed,
/// allowing callers to force multiple keys into the same slot. Otherwise the
/// entire key is hashed.
pub fn slot_of(key: &[u8]) -> u16 {
    if let Some(start) = key.iter().position(|&b| b == b'{')
        && let Some(end_offset) = key[start + 1..].iter().position(|&b| b == b'}')
    {
        let end = start + 1 + end_offset;
        if end > start + 1 {
            return CRC16_ALGO.checksum(&key[start + 1..end]) % (NUM_SLOTS as u16);
        }
    }
    CRC16_ALGO.checksum(key) % (NUM_SLOTS as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_smoke() {
        assert_eq!(slot_of(b"foo"), 12182);
        assert_eq!(slot_of(b"{foo}bar"), 12182);
        assert_ne!(slot_of(b"foo}{bar"), 12182);
    }

    #[test]
    fn hash_tag_equivalence() {
        assert_eq!(slot_of(b"x{abc}y"), slot_of(b"abc"));
        assert_eq!(slot_of(b"{abc}"), slot_of(b"abc"));
        assert_eq!(slot_of(b"p{abc}q{ignored}"), slot_of(b"abc"));
    }

    #[test]
    fn empty_tag_falls_back_to_whole_key() {
        assert_eq!(slot_of(b"{}key"), slot_of(b"{}key"));
        assert_ne!(slot_of(b"{}key"), slot_of(b"key"));
    }

    #[test]
    fn all_slots_in_range() {
        for i in 0..5000u32 {
            let key = format!("key:{i}");
            assert!((slot_of(key.as_bytes()) as usize) < NUM_SLOTS);
        }
    }
}
