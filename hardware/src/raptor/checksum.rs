//! Checksum computation for Raptor serial frames
//!
//! The checksum is the XOR of every byte in the frame that precedes it.
//! A complete frame therefore XORs to zero.

/// Compute the checksum of a frame payload.
pub fn compute_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Verify that a frame's trailing checksum byte is valid.
///
/// The frame should include all bytes up to and including the checksum.
pub fn verify_checksum_bytes(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&checksum, payload)) if !payload.is_empty() => compute_checksum(payload) == checksum,
        _ => false,
    }
}

/// Append the checksum of `payload` and return the complete frame.
pub fn append_checksum(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(compute_checksum(payload));
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_known_frames() {
        // Status check and read trigger, as sent to the camera
        assert_eq!(compute_checksum(&[0x49, 0x50]), 0x19);
        assert_eq!(compute_checksum(&[0x4f, 0x53, 0x50]), 0x4c);
        assert_eq!(compute_checksum(&[0x53, 0xe1, 0x01, 0x50]), 0xe3);
        assert_eq!(
            compute_checksum(&[0x53, 0xe0, 0x02, 0xf2, 0x06, 0x50]),
            0x15
        );
        assert!(verify_checksum_bytes(&[
            0x53, 0xae, 0x05, 0x01, 0x00, 0x00, 0x02, 0x00, 0x50, 0xab
        ]));
    }

    #[test]
    fn test_too_short_is_invalid() {
        assert!(!verify_checksum_bytes(&[]));
        assert!(!verify_checksum_bytes(&[0x00]));
    }

    #[test]
    fn test_any_single_byte_corruption_is_detected() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..200 {
            let len = rng.random_range(1..12);
            let payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            let frame = append_checksum(&payload);
            assert!(verify_checksum_bytes(&frame));

            let mut corrupted = frame.clone();
            let idx = rng.random_range(0..corrupted.len());
            let flip: u8 = rng.random_range(1..=255);
            corrupted[idx] ^= flip;
            assert!(!verify_checksum_bytes(&corrupted));
        }
    }
}
