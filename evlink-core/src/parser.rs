#![allow(clippy::unusual_byte_groupings)]
//! Low-level parsing of the 16-bit event words.
//!
//! Each word is little-endian on the wire. Bit 15 marks a timestamp tick;
//! otherwise bits 14-12 carry an event code and bits 11-0 its data.

use byteorder::{ByteOrder, LittleEndian};

/// Event code of a timestamp wrap word.
pub const CODE_WRAP: u8 = 7;

/// Event code of a special (code 0) word.
pub const CODE_SPECIAL: u8 = 0;

/// Reads the word starting at byte offset `offset`.
#[inline]
pub fn read_word(bytes: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&bytes[offset..offset + 2])
}

/// Whether the word is a timestamp tick.
#[inline]
pub fn is_timestamp(word: u16) -> bool {
    word & 0x8000 != 0
}

/// Extracts the 15-bit tick value.
#[inline]
pub fn timestamp_value(word: u16) -> u16 {
    word & 0x7FFF
}

/// Extracts the 3-bit event code.
#[inline]
pub fn event_code(word: u16) -> u8 {
    ((word & 0x7000) >> 12) as u8
}

/// Extracts the 12-bit event data.
#[inline]
pub fn event_data(word: u16) -> u16 {
    word & 0x0FFF
}

// ============================================================================
// MISC8 (DAVIS code 5)
// Bits: [11:8] sub-code | [7:0] payload
// ============================================================================

#[inline]
pub fn misc8_code(data: u16) -> u8 {
    ((data >> 8) & 0x0F) as u8
}

#[inline]
pub fn misc8_data(data: u16) -> u8 {
    (data & 0x00FF) as u8
}

// ============================================================================
// MISC10 (DAVIS code 6)
// Bits: [11:10] sub-code | [9:0] payload
// Microphone payload: [9:8] part index | [7:0] byte
// ============================================================================

#[inline]
pub fn misc10_code(data: u16) -> u8 {
    ((data >> 10) & 0x03) as u8
}

#[inline]
pub fn misc10_data(data: u16) -> u16 {
    data & 0x03FF
}

#[inline]
pub fn sample_part(payload: u16) -> u8 {
    ((payload >> 8) & 0x03) as u8
}

#[inline]
pub fn sample_byte(payload: u16) -> u8 {
    (payload & 0x00FF) as u8
}

// ============================================================================
// IMU scale config (DAVIS code 0, data 16-31)
// Bits: [3:2] accelerometer scale | [1:0] gyroscope scale
// ============================================================================

#[inline]
pub fn imu_accel_scale(data: u16) -> u8 {
    ((data >> 2) & 0x03) as u8
}

#[inline]
pub fn imu_gyro_scale(data: u16) -> u8 {
    (data & 0x03) as u8
}

// ============================================================================
// SPIKE (Dynapse codes 1, 2, 5, 6)
// Bits: [11:4] neuron id | [3:0] chip id
// ============================================================================

#[inline]
pub fn spike_chip_id(data: u16) -> u8 {
    (data & 0x000F) as u8
}

#[inline]
pub fn spike_neuron_id(data: u16) -> u32 {
    u32::from((data >> 4) & 0x00FF)
}

/// Source core encoded in the event code of a spike word.
#[inline]
pub fn spike_source_core(code: u8) -> Option<u8> {
    match code {
        2 => Some(0),
        5 => Some(1),
        6 => Some(2),
        1 => Some(3),
        _ => None,
    }
}

// ============================================================================
// Encoding, used to build synthetic streams
// ============================================================================

#[inline]
pub fn encode_tick(value: u16) -> u16 {
    0x8000 | (value & 0x7FFF)
}

#[inline]
pub fn encode_event(code: u8, data: u16) -> u16 {
    (u16::from(code & 0x07) << 12) | (data & 0x0FFF)
}

/// Serializes words into little-endian bytes.
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 2];
    LittleEndian::write_u16_into(words, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_parsing() {
        let word: u16 = 0b1_000000001100100;
        assert!(is_timestamp(word));
        assert_eq!(timestamp_value(word), 100);
    }

    #[test]
    fn test_event_parsing() {
        // code=3, data=5
        let word: u16 = 0b0_011_000000000101;
        assert!(!is_timestamp(word));
        assert_eq!(event_code(word), 3);
        assert_eq!(event_data(word), 5);
    }

    #[test]
    fn test_misc_fields() {
        // misc8: code=2, payload=0xAB
        assert_eq!(misc8_code(0b0010_10101011), 2);
        assert_eq!(misc8_data(0b0010_10101011), 0xAB);
        // misc10: code=1, part=2, byte=0x7F
        let data: u16 = 0b01_10_01111111;
        assert_eq!(misc10_code(data), 1);
        assert_eq!(sample_part(misc10_data(data)), 2);
        assert_eq!(sample_byte(misc10_data(data)), 0x7F);
    }

    #[test]
    fn test_spike_fields() {
        // neuron=200, chip=9
        let data: u16 = 0b11001000_1001;
        assert_eq!(spike_neuron_id(data), 200);
        assert_eq!(spike_chip_id(data), 9);
        assert_eq!(spike_source_core(1), Some(3));
        assert_eq!(spike_source_core(3), None);
    }

    #[test]
    fn test_words_are_little_endian() {
        let bytes = words_to_bytes(&[encode_tick(100), encode_event(7, 1)]);
        assert_eq!(bytes, vec![0x64, 0x80, 0x01, 0x70]);
        assert_eq!(read_word(&bytes, 2), 0x7001);
    }
}
