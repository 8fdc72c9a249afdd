//! Streaming envelope parsing
//!
//! While a detector is streaming, the module emits `Stream Data` frames whose
//! payload is:
//!
//! ```text
//! marker | result info length (u16 LE) | result info | marker | data length (u16 LE) | data
//! ```
//!
//! The data buffer is a packed sequence of 6-byte entries: distance in meters
//! (`f32` LE) followed by amplitude (`u16` LE).

use crate::core::error::{EngineError, Result};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

/// Size of one packed measurement entry
pub const ENTRY_LEN: usize = 6;

/// Marker preceding the result info block
pub const RESULT_INFO_MARKER: u8 = 0xFD;
/// Marker preceding the data buffer
pub const BUFFER_MARKER: u8 = 0xFE;

/// One reflection reported by the distance detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementEntry {
    /// Distance in meters
    pub distance_m: f32,
    /// Reflection amplitude
    pub amplitude: u16,
}

impl MeasurementEntry {
    /// Create an entry
    pub fn new(distance_m: f32, amplitude: u16) -> Self {
        Self { distance_m, amplitude }
    }
}

/// Decode a streaming payload into its measurement entries, in buffer order
///
/// The result info block is skipped without interpretation. Entries with zero
/// amplitude are returned like any other.
pub fn parse_envelope(payload: &[u8]) -> Result<Vec<MeasurementEntry>> {
    let mut buf = payload;

    ensure(buf, 1 + 2, "result info header")?;
    buf.advance(1);
    let info_len = buf.get_u16_le() as usize;

    ensure(buf, info_len, "result info")?;
    buf.advance(info_len);

    ensure(buf, 1 + 2, "buffer header")?;
    buf.advance(1);
    let data_len = buf.get_u16_le() as usize;

    if data_len == 0 {
        return Ok(Vec::new());
    }

    if data_len % ENTRY_LEN != 0 {
        return Err(EngineError::MalformedPayload(format!(
            "data length {data_len} is not a multiple of {ENTRY_LEN}"
        )));
    }

    ensure(buf, data_len, "data buffer")?;

    let mut data = &buf[..data_len];
    let mut entries = Vec::with_capacity(data_len / ENTRY_LEN);
    while data.has_remaining() {
        let distance_m = data.get_f32_le();
        let amplitude = data.get_u16_le();
        entries.push(MeasurementEntry { distance_m, amplitude });
    }

    Ok(entries)
}

/// Build a streaming payload from a result info block and entries
///
/// Fails when either block does not fit its `u16` length field.
pub fn encode_envelope(result_info: &[u8], entries: &[MeasurementEntry]) -> Result<Vec<u8>> {
    let data_len = entries.len() * ENTRY_LEN;
    let info_field = length_field(result_info.len(), "result info")?;
    let data_field = length_field(data_len, "data buffer")?;
    let mut buf = BytesMut::with_capacity(6 + result_info.len() + data_len);

    buf.put_u8(RESULT_INFO_MARKER);
    buf.put_u16_le(info_field);
    buf.put_slice(result_info);
    buf.put_u8(BUFFER_MARKER);
    buf.put_u16_le(data_field);
    for entry in entries {
        buf.put_f32_le(entry.distance_m);
        buf.put_u16_le(entry.amplitude);
    }

    Ok(buf.to_vec())
}

/// Length of `what` as a frame length field
pub(crate) fn length_field(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        EngineError::MalformedPayload(format!("{what} of {len} bytes exceeds a u16 length field"))
    })
}

fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<()> {
    if buf.len() < needed {
        return Err(EngineError::MalformedPayload(format!(
            "{what} needs {needed} bytes, {} left",
            buf.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(info: &[u8], marker: u8, data_len: u16, data: &[u8]) -> Vec<u8> {
        let mut p = vec![RESULT_INFO_MARKER];
        p.extend_from_slice(&(info.len() as u16).to_le_bytes());
        p.extend_from_slice(info);
        p.push(marker);
        p.extend_from_slice(&data_len.to_le_bytes());
        p.extend_from_slice(data);
        p
    }

    fn entry_bytes(distance: f32, amplitude: u16) -> Vec<u8> {
        let mut b = distance.to_le_bytes().to_vec();
        b.extend_from_slice(&amplitude.to_le_bytes());
        b
    }

    #[test]
    fn test_two_entries_in_order() {
        let mut data = entry_bytes(1.5, 100);
        data.extend(entry_bytes(0.75, 50));
        let entries = parse_envelope(&payload(&[], 0x00, 12, &data)).unwrap();

        assert_eq!(
            entries,
            vec![MeasurementEntry::new(1.5, 100), MeasurementEntry::new(0.75, 50)]
        );
    }

    #[test]
    fn test_empty_data_is_not_an_error() {
        let entries = parse_envelope(&payload(&[1, 2, 3], BUFFER_MARKER, 0, &[])).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_data_length_not_multiple_of_entry() {
        let data = [0u8; 7];
        assert!(matches!(
            parse_envelope(&payload(&[], BUFFER_MARKER, 7, &data)),
            Err(EngineError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_result_info_skipped() {
        let info = [0xAA; 11];
        let data = entry_bytes(2.25, 7);
        let entries = parse_envelope(&payload(&info, BUFFER_MARKER, 6, &data)).unwrap();
        assert_eq!(entries, vec![MeasurementEntry::new(2.25, 7)]);
    }

    #[test]
    fn test_zero_amplitude_kept() {
        let mut data = entry_bytes(0.5, 0);
        data.extend(entry_bytes(0.6, 10));
        let entries = parse_envelope(&payload(&[], BUFFER_MARKER, 12, &data)).unwrap();
        assert_eq!(entries[0].amplitude, 0);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_truncated_payloads() {
        assert!(parse_envelope(&[RESULT_INFO_MARKER, 0x00]).is_err());
        assert!(parse_envelope(&payload(&[], BUFFER_MARKER, 12, &entry_bytes(1.0, 1))).is_err());

        let mut short_info = vec![RESULT_INFO_MARKER];
        short_info.extend_from_slice(&20u16.to_le_bytes());
        short_info.extend_from_slice(&[0; 4]);
        assert!(matches!(
            parse_envelope(&short_info),
            Err(EngineError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_encode_envelope_layout() {
        let entries = [MeasurementEntry::new(1.5, 100), MeasurementEntry::new(0.75, 50)];
        let encoded = encode_envelope(&[9, 9], &entries).unwrap();

        assert_eq!(&encoded[..6], &[RESULT_INFO_MARKER, 2, 0, 9, 9, BUFFER_MARKER]);
        assert_eq!(&encoded[6..8], &12u16.to_le_bytes());
        assert_eq!(parse_envelope(&encoded).unwrap(), entries.to_vec());
    }

    #[test]
    fn test_encode_rejects_oversized_blocks() {
        let entries = vec![MeasurementEntry::new(1.0, 1); 11_000];
        assert!(matches!(
            encode_envelope(&[], &entries),
            Err(EngineError::MalformedPayload(_))
        ));

        let info = vec![0u8; 70_000];
        assert!(encode_envelope(&info, &[]).is_err());
    }
}
