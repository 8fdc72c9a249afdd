//! Outer stream frame reader
//!
//! Streaming frames share the register frame markers but carry a variable
//! payload: `CC <len u16 LE> FE <payload> CD`. The reader hunts for the start
//! marker, so a frame boundary lost to line noise or a timeout is found again
//! on the next call.

use crate::core::error::{EngineError, Result};
use crate::core::protocol::frame::{
    FrameType, RegisterResponse, END_MARKER, HEADER_LEN, START_MARKER,
};
use crate::core::protocol::stream::length_field;
use crate::core::transport::TransportError;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

/// Default bound on bytes discarded while hunting for a start marker
pub const DEFAULT_MAX_SKIP_BYTES: usize = 4096;

/// Stream frames passed over while waiting for a register response
pub const MAX_INTERLEAVED_FRAMES: usize = 8;

/// Offset of the type byte inside a frame
const TYPE_OFFSET: usize = 3;

/// Payload of a register response: address and a 4-byte value
const REGISTER_PAYLOAD_LEN: usize = 5;

/// One stream frame lifted off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Envelope bytes between the type byte and the end marker
    pub payload: Vec<u8>,
    /// Bytes discarded before the start marker
    pub skipped: usize,
}

impl StreamFrame {
    /// Frame length plus the bytes skipped ahead of it
    pub fn wire_len(&self) -> usize {
        self.skipped + HEADER_LEN + self.payload.len() + 1
    }
}

/// Reads stream frames, resynchronizing on the start marker
///
/// When a start marker turns out to be false (wrong type byte or no end
/// marker), every byte read after it is pushed back and scanned again, so a
/// real frame that began inside the rejected bytes is still found.
#[derive(Debug, Clone)]
pub struct StreamReader {
    max_skip_bytes: usize,
    pending: VecDeque<u8>,
    frames: u64,
    skipped_total: u64,
    received_total: u64,
}

impl StreamReader {
    /// Create a reader that gives up a scan after `max_skip_bytes`
    pub fn new(max_skip_bytes: usize) -> Self {
        Self {
            max_skip_bytes,
            pending: VecDeque::new(),
            frames: 0,
            skipped_total: 0,
            received_total: 0,
        }
    }

    /// Read the next stream frame
    ///
    /// After a type or end marker error the next call resumes scanning at the
    /// byte following the rejected start marker.
    pub fn read_frame<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<StreamFrame> {
        self.next_frame(src, FrameType::StreamData).map(|(_, frame)| frame)
    }

    /// Read a register response that may trail stream frames still in flight
    ///
    /// Up to [`MAX_INTERLEAVED_FRAMES`] stream frames are consumed and dropped
    /// before the response.
    pub fn read_register_response<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
        expected: FrameType,
    ) -> Result<RegisterResponse> {
        let mut passed = 0;
        loop {
            let (frame_type, frame) = self.next_frame(src, expected)?;
            if frame_type == expected {
                return register_response(&frame.payload);
            }

            passed += 1;
            tracing::debug!(
                "Dropped stream frame {} while waiting for {}",
                passed,
                expected.name()
            );
            if passed >= MAX_INTERLEAVED_FRAMES {
                return Err(EngineError::Protocol {
                    offset: TYPE_OFFSET,
                    expected: expected as u8,
                    found: FrameType::StreamData as u8,
                });
            }
        }
    }

    /// Frames read successfully
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes discarded while scanning, over the reader's lifetime
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    /// Bytes taken from the source, over the reader's lifetime
    pub fn received_total(&self) -> u64 {
        self.received_total
    }

    /// Stream data frames are always accepted; `expected` may add one more type
    fn next_frame<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
        expected: FrameType,
    ) -> Result<(FrameType, StreamFrame)> {
        let skipped = self.seek_start(src)?;
        if skipped > 0 {
            tracing::debug!("Skipped {} bytes before start marker", skipped);
        }

        let mut header = [0u8; HEADER_LEN - 1];
        self.fill(src, &mut header, 1, HEADER_LEN)?;
        let length = u16::from_le_bytes([header[0], header[1]]) as usize;

        let frame_type = match FrameType::from_u8(header[2]) {
            Some(t) if t == expected || t == FrameType::StreamData => t,
            _ => {
                self.false_start(&[&header[..]]);
                return Err(EngineError::Protocol {
                    offset: TYPE_OFFSET,
                    expected: expected as u8,
                    found: header[2],
                });
            }
        };

        let total = HEADER_LEN + length + 1;
        let mut payload = vec![0u8; length];
        self.fill(src, &mut payload, HEADER_LEN, total)?;

        let end = self.next_byte(src, HEADER_LEN + length, total)?;
        if end != END_MARKER {
            self.false_start(&[&header[..], &payload, &[end]]);
            return Err(EngineError::Framing {
                offset: HEADER_LEN + length,
                expected: END_MARKER,
                found: end,
            });
        }

        if frame_type == FrameType::StreamData {
            self.frames += 1;
        }
        tracing::trace!(
            "{} ({} bytes): {}",
            frame_type.name(),
            length,
            hex::encode(&payload)
        );
        Ok((frame_type, StreamFrame { payload, skipped }))
    }

    fn seek_start<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<usize> {
        let mut skipped = 0;
        loop {
            let byte = self.next_byte(src, 0, HEADER_LEN)?;
            if byte == START_MARKER {
                return Ok(skipped);
            }

            skipped += 1;
            self.skipped_total += 1;
            if skipped > self.max_skip_bytes {
                return Err(EngineError::Framing {
                    offset: 0,
                    expected: START_MARKER,
                    found: byte,
                });
            }
        }
    }

    /// Drop the rejected start marker and queue what followed it for rescanning
    fn false_start(&mut self, parts: &[&[u8]]) {
        self.skipped_total += 1;
        for part in parts.iter().rev() {
            for &byte in part.iter().rev() {
                self.pending.push_front(byte);
            }
        }
    }

    fn next_byte<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
        read: usize,
        expected: usize,
    ) -> Result<u8> {
        if let Some(byte) = self.pending.pop_front() {
            return Ok(byte);
        }
        let byte = read_byte(src, read, expected)?;
        self.received_total += 1;
        Ok(byte)
    }

    fn fill<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
        buf: &mut [u8],
        read: usize,
        expected: usize,
    ) -> Result<()> {
        let queued = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..queued)) {
            *slot = byte;
        }
        read_exact(src, &mut buf[queued..], read + queued, expected)?;
        self.received_total += (buf.len() - queued) as u64;
        Ok(())
    }
}

impl Default for StreamReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SKIP_BYTES)
    }
}

/// Wrap an envelope in an outer stream frame
///
/// Fails when the payload does not fit the `u16` length field.
pub fn encode_stream_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let length = length_field(payload.len(), "stream payload")?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    frame.push(START_MARKER);
    frame.extend_from_slice(&length.to_le_bytes());
    frame.push(FrameType::StreamData as u8);
    frame.extend_from_slice(payload);
    frame.push(END_MARKER);
    Ok(frame)
}

fn register_response(payload: &[u8]) -> Result<RegisterResponse> {
    match *payload {
        [address, a, b, c, d] => Ok(RegisterResponse {
            address,
            value: u32::from_be_bytes([a, b, c, d]),
        }),
        _ => Err(EngineError::Framing {
            offset: 1,
            expected: REGISTER_PAYLOAD_LEN as u8,
            found: u8::try_from(payload.len()).unwrap_or(u8::MAX),
        }),
    }
}

fn read_byte<R: Read + ?Sized>(src: &mut R, read: usize, expected: usize) -> Result<u8> {
    let mut byte = [0u8; 1];
    loop {
        match src.read(&mut byte) {
            Ok(0) => return Err(TransportError::Eof { read, expected }.into()),
            Ok(_) => return Ok(byte[0]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::from_io(e).into()),
        }
    }
}

fn read_exact<R: Read + ?Sized>(
    src: &mut R,
    buf: &mut [u8],
    read: usize,
    expected: usize,
) -> Result<()> {
    src.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => TransportError::Eof { read, expected }.into(),
        _ => TransportError::from_io(e).into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::frame::encode_register_response;
    use crate::core::protocol::{encode_envelope, parse_envelope, MeasurementEntry};
    use std::io::{self, Cursor};

    fn frame_of(distance_m: f32, amplitude: u16) -> Vec<u8> {
        let entry = MeasurementEntry::new(distance_m, amplitude);
        let envelope = encode_envelope(&[], &[entry]).unwrap();
        encode_stream_frame(&envelope).unwrap()
    }

    fn sample_frame() -> Vec<u8> {
        frame_of(1.5, 100)
    }

    fn entries(frame: &StreamFrame) -> Vec<MeasurementEntry> {
        parse_envelope(&frame.payload).unwrap()
    }

    #[test]
    fn test_read_clean_frame() {
        let mut src = Cursor::new(sample_frame());
        let mut reader = StreamReader::default();

        let frame = reader.read_frame(&mut src).unwrap();
        assert_eq!(frame.skipped, 0);
        assert_eq!(frame.wire_len(), sample_frame().len());
        assert_eq!(
            parse_envelope(&frame.payload).unwrap(),
            vec![MeasurementEntry::new(1.5, 100)]
        );
        assert_eq!(reader.frames(), 1);
    }

    #[test]
    fn test_garbage_before_start_is_skipped() {
        let mut bytes = vec![0x00, 0x13, 0xFF];
        bytes.extend(sample_frame());
        let mut src = Cursor::new(bytes);
        let mut reader = StreamReader::default();

        let frame = reader.read_frame(&mut src).unwrap();
        assert_eq!(frame.skipped, 3);
        assert_eq!(reader.skipped_total(), 3);
    }

    #[test]
    fn test_skip_bound_then_resync() {
        let mut bytes = vec![0x55; 5];
        bytes.extend(sample_frame());
        let mut src = Cursor::new(bytes);
        let mut reader = StreamReader::new(3);

        assert!(matches!(
            reader.read_frame(&mut src),
            Err(EngineError::Framing { offset: 0, expected: 0xCC, found: 0x55 })
        ));
        let frame = reader.read_frame(&mut src).unwrap();
        assert_eq!(frame.skipped, 1);
    }

    #[test]
    fn test_register_frame_in_stream_is_protocol_error() {
        let mut bytes = vec![0xCC, 0x05, 0x00, 0xF6, 0x06, 0, 0, 0, 0, 0xCD];
        bytes.extend(sample_frame());
        let mut src = Cursor::new(bytes);
        let mut reader = StreamReader::default();

        assert!(matches!(
            reader.read_frame(&mut src),
            Err(EngineError::Protocol { offset: 3, expected: 0xFE, found: 0xF6 })
        ));
        assert!(reader.read_frame(&mut src).is_ok());
    }

    #[test]
    fn test_bad_end_marker() {
        let mut bytes = sample_frame();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        let mut src = Cursor::new(bytes);

        let err = StreamReader::default().read_frame(&mut src).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Framing { offset, expected: 0xCD, found: 0x00 } if offset == last
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_stray_start_marker_keeps_next_frame() {
        let mut bytes = vec![START_MARKER];
        bytes.extend(frame_of(1.5, 100));
        bytes.extend(frame_of(2.5, 7));
        let mut src = Cursor::new(bytes);
        let mut reader = StreamReader::default();

        assert!(matches!(
            reader.read_frame(&mut src),
            Err(EngineError::Protocol { offset: 3, expected: 0xFE, found: 0x00 })
        ));
        let first = reader.read_frame(&mut src).unwrap();
        assert_eq!(first.skipped, 0);
        assert_eq!(entries(&first), vec![MeasurementEntry::new(1.5, 100)]);
        let second = reader.read_frame(&mut src).unwrap();
        assert_eq!(entries(&second), vec![MeasurementEntry::new(2.5, 7)]);
        assert_eq!(reader.skipped_total(), 1);
    }

    #[test]
    fn test_join_mid_frame_with_marker_in_distance() {
        // 0.8 m encodes as CD CC 4C 3F
        let mut bytes = frame_of(0.8, 100)[10..].to_vec();
        bytes.extend(frame_of(1.5, 100));
        let mut src = Cursor::new(bytes);
        let mut reader = StreamReader::default();

        let decoded = (0..3).find_map(|_| reader.read_frame(&mut src).ok());
        assert_eq!(
            decoded.map(|frame| entries(&frame)),
            Some(vec![MeasurementEntry::new(1.5, 100)])
        );
    }

    #[test]
    fn test_bad_end_marker_rescans_payload() {
        let inner = frame_of(1.25, 40);
        let mut bytes = vec![START_MARKER, inner.len() as u8, 0x00, 0xFE];
        bytes.extend(&inner);
        bytes.push(0x00);
        bytes.extend(frame_of(2.0, 11));
        let mut src = Cursor::new(bytes);
        let mut reader = StreamReader::new(64);

        assert!(matches!(
            reader.read_frame(&mut src),
            Err(EngineError::Framing { offset: 21, expected: 0xCD, found: 0x00 })
        ));
        let frame = reader.read_frame(&mut src).unwrap();
        assert_eq!(frame.skipped, 3);
        assert_eq!(entries(&frame), vec![MeasurementEntry::new(1.25, 40)]);
        let frame = reader.read_frame(&mut src).unwrap();
        assert_eq!(entries(&frame), vec![MeasurementEntry::new(2.0, 11)]);
    }

    #[test]
    fn test_register_response_after_stream_frames() {
        let mut bytes = sample_frame();
        bytes.extend(sample_frame());
        bytes.extend(encode_register_response(FrameType::WriteResponse, 0x03, 0));
        let mut src = Cursor::new(bytes);
        let mut reader = StreamReader::default();

        let response = reader
            .read_register_response(&mut src, FrameType::WriteResponse)
            .unwrap();
        assert_eq!(response, RegisterResponse { address: 0x03, value: 0 });
        assert_eq!(reader.frames(), 2);
        assert_eq!(reader.received_total(), 2 * 17 + 10);
    }

    #[test]
    fn test_register_response_gives_up_on_endless_stream() {
        let bytes: Vec<u8> = (0..MAX_INTERLEAVED_FRAMES).flat_map(|_| sample_frame()).collect();
        let mut src = Cursor::new(bytes);

        assert!(matches!(
            StreamReader::default().read_register_response(&mut src, FrameType::WriteResponse),
            Err(EngineError::Protocol { offset: 3, expected: 0xF5, found: 0xFE })
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        assert!(matches!(
            encode_stream_frame(&vec![0u8; 65_536]),
            Err(EngineError::MalformedPayload(_))
        ));
        assert_eq!(encode_stream_frame(&[]).unwrap(), vec![0xCC, 0, 0, 0xFE, 0xCD]);
    }

    #[test]
    fn test_truncated_frame_is_eof() {
        let bytes = sample_frame()[..7].to_vec();
        let mut src = Cursor::new(bytes);

        assert!(matches!(
            StreamReader::default().read_frame(&mut src),
            Err(EngineError::Transport(TransportError::Eof { .. }))
        ));
    }

    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "silent"))
        }
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let err = StreamReader::default().read_frame(&mut Silent).unwrap_err();
        assert!(matches!(err, EngineError::Transport(TransportError::Timeout)));
        assert!(err.is_recoverable());
    }
}
