//! Conversion between raw desk payloads and physical units.
//!
//! A telemetry frame is four little-endian bytes: an unsigned 16-bit height
//! offset above [`MIN_HEIGHT`] in 1/10000 m, followed by a signed 16-bit speed
//! in 1/10000 m/s. Desks without speed telemetry leave the last two bytes zero.

use crate::constants::{COUNTS_PER_METER, MAX_HEIGHT, MIN_HEIGHT, TELEMETRY_FRAME_LEN};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error(
        "Expected raw value to be {expected} bytes long, got {actual} bytes. Raw data: {raw:02x?}"
    )]
    InvalidLength {
        expected: usize,
        actual: usize,
        raw: Vec<u8>,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("Height {0:.4} m cannot be encoded as a reference input")]
    OutOfRange(f64),
}

/// Decodes a telemetry frame into `(height_m, speed_mps)`.
pub fn decode(raw: &[u8]) -> Result<(f64, f64), DecodeError> {
    let frame: [u8; TELEMETRY_FRAME_LEN] =
        raw.try_into().map_err(|_| DecodeError::InvalidLength {
            expected: TELEMETRY_FRAME_LEN,
            actual: raw.len(),
            raw: raw.to_vec(),
        })?;

    let height_counter = u16::from_le_bytes([frame[0], frame[1]]);
    let speed_counter = i16::from_le_bytes([frame[2], frame[3]]);

    let height = f64::from(height_counter) / COUNTS_PER_METER + MIN_HEIGHT;
    let speed = f64::from(speed_counter) / COUNTS_PER_METER;
    Ok((height, speed))
}

/// Encodes a height as the two-byte reference-input payload.
///
/// Callers validate the range first; anything that would not fit the
/// counter is still rejected here instead of wrapping.
pub fn encode(height: f64) -> Result<[u8; 2], EncodeError> {
    let counter = ((height - MIN_HEIGHT) * COUNTS_PER_METER).round();
    let past_maximum = height > MAX_HEIGHT + 0.5 / COUNTS_PER_METER;
    if !(0.0..=f64::from(u16::MAX)).contains(&counter) || past_maximum {
        return Err(EncodeError::OutOfRange(height));
    }
    Ok((counter as u16).to_le_bytes())
}

/// Builds a full telemetry frame from raw counters.
pub fn encode_frame(height_counter: u16, speed_counter: i16) -> [u8; TELEMETRY_FRAME_LEN] {
    let [h0, h1] = height_counter.to_le_bytes();
    let [s0, s1] = speed_counter.to_le_bytes();
    [h0, h1, s0, s1]
}

/// Converts physical units back into a telemetry frame, saturating at the counter limits.
pub fn frame_from_units(height: f64, speed: f64) -> [u8; TELEMETRY_FRAME_LEN] {
    let height_counter = ((height - MIN_HEIGHT) * COUNTS_PER_METER)
        .round()
        .clamp(0.0, f64::from(u16::MAX)) as u16;
    let speed_counter = (speed * COUNTS_PER_METER)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    encode_frame(height_counter, speed_counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPS,
            "expected {} got {}",
            expected,
            actual
        );
    }

    #[test]
    fn decodes_known_frames() {
        let (h, s) = decode(&[0x64, 0x19, 0x00, 0x00]).unwrap();
        assert_close(h, MAX_HEIGHT);
        assert_close(s, 0.0);

        let (h, _) = decode(&[0x00, 0x00, 0x00, 0x00]).unwrap();
        assert_close(h, MIN_HEIGHT);

        let (h, _) = decode(&[0x51, 0x04, 0x00, 0x00]).unwrap();
        assert_close(h, 0.7305);

        let (h, s) = decode(&[0x08, 0x08, 0x02, 0x01]).unwrap();
        assert_close(h, 0.8256);
        assert_close(s, 0.0258);
    }

    #[test]
    fn negative_speed_is_signed() {
        let (_, s) = decode(&encode_frame(1000, -250)).unwrap();
        assert_close(s, -0.025);
    }

    #[test]
    fn rejects_wrong_lengths() {
        for len in [0usize, 1, 2, 3, 5, 8] {
            let raw = vec![0u8; len];
            let err = decode(&raw).unwrap_err();
            assert_eq!(
                err,
                DecodeError::InvalidLength {
                    expected: 4,
                    actual: len,
                    raw
                }
            );
        }
    }

    #[test]
    fn frame_counters_survive_decoding() {
        for (c, s) in [(0u16, 0i16), (6500, 0), (1, -1), (3210, 620), (u16::MAX, i16::MIN)] {
            let (h, v) = decode(&encode_frame(c, s)).unwrap();
            assert_close(h, f64::from(c) / 10_000.0 + MIN_HEIGHT);
            assert_close(v, f64::from(s) / 10_000.0);
        }
    }

    #[test]
    fn encoded_heights_decode_within_precision() {
        let mut h = MIN_HEIGHT;
        while h <= MAX_HEIGHT {
            let [lo, hi] = encode(h).unwrap();
            let (decoded, _) = decode(&[lo, hi, 0, 0]).unwrap();
            assert!((decoded - h).abs() <= 1.0 / 10_000.0, "{} -> {}", h, decoded);
            h += 0.0137;
        }
        assert_eq!(encode(MAX_HEIGHT).unwrap(), [0x64, 0x19]);
        assert_eq!(encode(MIN_HEIGHT).unwrap(), [0x00, 0x00]);
    }

    #[test]
    fn encode_rounds_instead_of_truncating() {
        // 0.73049999 m would truncate to 0x0450
        assert_eq!(encode(0.730_499_99).unwrap(), [0x51, 0x04]);
    }

    #[test]
    fn encode_refuses_out_of_range() {
        assert!(encode(MIN_HEIGHT - 0.01).is_err());
        assert!(encode(MAX_HEIGHT + 0.01).is_err());
        assert!(encode(f64::NAN).is_err());
    }
}
