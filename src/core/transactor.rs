//! Synchronous register transactions
//!
//! One request frame out, one response frame back. The transactor owns the
//! byte stream and every exchange takes `&mut self`, so a second request can
//! never be issued while a response is still outstanding.

use crate::core::error::{EngineError, Result};
use crate::core::protocol::frame::{
    encode_read_request, encode_write_request, FrameType, RegisterResponse, ResponseDecoder,
    RESPONSE_LEN,
};
use crate::core::protocol::Register;
use crate::core::stream_reader::StreamReader;
use crate::core::transport::{TransportError, TransportStats};
use std::io::{ErrorKind, Read, Write};

/// Offset of the register address inside a response frame
const ADDRESS_OFFSET: usize = 4;

/// Register read/write over a half-duplex byte stream
pub struct RegisterTransactor<T> {
    transport: T,
    stats: TransportStats,
    transactions: u64,
}

impl<T: Read + Write> RegisterTransactor<T> {
    /// Take ownership of a byte stream
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            stats: TransportStats::default(),
            transactions: 0,
        }
    }

    /// Read one register
    pub fn read_register(&mut self, register: Register) -> Result<u32> {
        tracing::debug!("Read {}", register);
        let request = encode_read_request(register);
        let value = self.exchange(&request, register, FrameType::ReadResponse)?;
        tracing::debug!("{} = 0x{:08X}", register, value);
        Ok(value)
    }

    /// Write one register, returning the value the device acknowledged
    pub fn write_register(&mut self, register: Register, value: u32) -> Result<u32> {
        tracing::debug!("Write {} <- 0x{:08X}", register, value);
        let request = encode_write_request(register, value);
        self.exchange(&request, register, FrameType::WriteResponse)
    }

    /// Write one register and warn when the acknowledged value differs
    pub fn write_register_checked(&mut self, register: Register, value: u32) -> Result<u32> {
        let ack = self.write_register(register, value)?;
        if ack != value {
            tracing::warn!(
                "{} acknowledged 0x{:08X} instead of 0x{:08X}",
                register,
                ack,
                value
            );
        }
        Ok(ack)
    }

    /// Read one register while stream frames may still arrive ahead of the answer
    pub fn read_register_streaming(
        &mut self,
        register: Register,
        reader: &mut StreamReader,
    ) -> Result<u32> {
        tracing::debug!("Read {} while streaming", register);
        let request = encode_read_request(register);
        self.exchange_streaming(&request, register, FrameType::ReadResponse, reader)
    }

    /// Write one register while stream frames may still arrive ahead of the
    /// acknowledgement
    pub fn write_register_streaming(
        &mut self,
        register: Register,
        value: u32,
        reader: &mut StreamReader,
    ) -> Result<u32> {
        tracing::debug!("Write {} <- 0x{:08X} while streaming", register, value);
        let request = encode_write_request(register, value);
        self.exchange_streaming(&request, register, FrameType::WriteResponse, reader)
    }

    /// Completed exchanges
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    /// Byte counters
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut TransportStats {
        &mut self.stats
    }

    /// Borrow the byte stream
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the byte stream back
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn send(&mut self, request: &[u8]) -> Result<()> {
        tracing::trace!("TX {}", hex::encode(request));
        self.transport
            .write_all(request)
            .and_then(|()| self.transport.flush())
            .map_err(TransportError::from_io)?;
        self.stats.bytes_sent += request.len() as u64;
        Ok(())
    }

    fn exchange_streaming(
        &mut self,
        request: &[u8],
        register: Register,
        expected: FrameType,
        reader: &mut StreamReader,
    ) -> Result<u32> {
        self.send(request)?;
        let before = reader.received_total();
        let response = reader.read_register_response(&mut self.transport, expected);
        self.stats.bytes_received += reader.received_total() - before;
        self.stats.bytes_skipped = reader.skipped_total();
        self.accept(response?, register)
    }

    fn exchange(&mut self, request: &[u8], register: Register, expected: FrameType) -> Result<u32> {
        self.send(request)?;

        let mut decoder = ResponseDecoder::new(expected);
        let mut received = [0u8; RESPONSE_LEN];
        let mut count = 0;
        let mut byte = [0u8; 1];

        let response = loop {
            match self.transport.read(&mut byte) {
                Ok(0) => {
                    return Err(TransportError::Eof {
                        read: count,
                        expected: RESPONSE_LEN,
                    }
                    .into())
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::from_io(e).into()),
            }

            received[count] = byte[0];
            count += 1;
            self.stats.bytes_received += 1;

            if let Some(response) = decoder.push(byte[0]).map_err(|e| {
                tracing::trace!("RX {} (rejected)", hex::encode(&received[..count]));
                e
            })? {
                break response;
            }
        };
        tracing::trace!("RX {}", hex::encode(received));
        self.accept(response, register)
    }

    fn accept(&mut self, response: RegisterResponse, register: Register) -> Result<u32> {
        if response.address != register.address() {
            return Err(EngineError::Protocol {
                offset: ADDRESS_OFFSET,
                expected: register.address(),
                found: response.address,
            });
        }

        self.transactions += 1;
        Ok(response.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::frame::encode_register_response;
    use crate::core::stream_reader::encode_stream_frame;
    use std::io::{self, Cursor};

    /// Canned response bytes in, captured request bytes out
    struct Scripted {
        rx: Cursor<Vec<u8>>,
        tx: Vec<u8>,
        timeout_at_end: bool,
    }

    impl Scripted {
        fn new(rx: Vec<u8>) -> Self {
            Self {
                rx: Cursor::new(rx),
                tx: Vec::new(),
                timeout_at_end: false,
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.rx.read(buf)?;
            if n == 0 && self.timeout_at_end {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            Ok(n)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_register() {
        let rx = encode_register_response(FrameType::ReadResponse, 0x06, 0x0000_0103).to_vec();
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert_eq!(link.read_register(Register::Status).unwrap(), 0x0000_0103);
        assert_eq!(link.get_mut().tx, vec![0xCC, 0x01, 0x00, 0xF8, 0x06, 0xCD]);
        assert_eq!(link.transactions(), 1);
        assert_eq!(link.stats().bytes_sent, 6);
        assert_eq!(link.stats().bytes_received, 10);
    }

    #[test]
    fn test_write_register_returns_ack() {
        let rx = encode_register_response(FrameType::WriteResponse, 0x23, 1000).to_vec();
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert_eq!(link.write_register(Register::UpdateRate, 1000).unwrap(), 1000);
        assert_eq!(
            link.into_inner().tx,
            vec![0xCC, 0x05, 0x00, 0xF9, 0x23, 0x00, 0x00, 0x03, 0xE8, 0xCD]
        );
    }

    #[test]
    fn test_write_checked_reports_rejected_value() {
        let rx = encode_register_response(FrameType::WriteResponse, 0x24, 500).to_vec();
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert_eq!(link.write_register_checked(Register::Gain, 700).unwrap(), 500);
    }

    #[test]
    fn test_sequential_transactions() {
        let mut rx = encode_register_response(FrameType::ReadResponse, 0x10, 0xACC0).to_vec();
        rx.extend(encode_register_response(FrameType::ReadResponse, 0x12, 3_000_000));
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert_eq!(link.read_register(Register::ProductId).unwrap(), 0xACC0);
        assert_eq!(link.read_register(Register::MaxBaudRate).unwrap(), 3_000_000);
        assert_eq!(link.transactions(), 2);
        assert_eq!(link.get_mut().tx.len(), 12);
    }

    #[test]
    fn test_short_read_is_transport_error() {
        let rx = encode_register_response(FrameType::ReadResponse, 0x06, 1)[..6].to_vec();
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert!(matches!(
            link.read_register(Register::Status),
            Err(EngineError::Transport(TransportError::Eof { read: 6, expected: 10 }))
        ));
    }

    #[test]
    fn test_timeout_is_transport_error() {
        let mut device = Scripted::new(Vec::new());
        device.timeout_at_end = true;
        let mut link = RegisterTransactor::new(device);

        assert!(matches!(
            link.read_register(Register::Status),
            Err(EngineError::Transport(TransportError::Timeout))
        ));
    }

    #[test]
    fn test_wrong_opcode_is_protocol_error() {
        let rx = encode_register_response(FrameType::WriteResponse, 0x06, 1).to_vec();
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert!(matches!(
            link.read_register(Register::Status),
            Err(EngineError::Protocol { offset: 3, expected: 0xF6, found: 0xF5 })
        ));
    }

    #[test]
    fn test_bad_start_fails_without_reading_more() {
        let rx = vec![0x00, 0xCC, 0x05, 0x00];
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert!(matches!(
            link.read_register(Register::Status),
            Err(EngineError::Framing { offset: 0, expected: 0xCC, found: 0x00 })
        ));
        assert_eq!(link.stats().bytes_received, 1);
    }

    #[test]
    fn test_write_while_streaming_skips_frames() {
        let frame = encode_stream_frame(&[0xFD, 0, 0, 0xFE, 0, 0]).unwrap();
        let mut rx = frame.clone();
        rx.extend(&frame);
        rx.extend(encode_register_response(FrameType::WriteResponse, 0x03, 0));
        let mut link = RegisterTransactor::new(Scripted::new(rx));
        let mut reader = StreamReader::default();

        let ack = link
            .write_register_streaming(Register::MainControl, 0, &mut reader)
            .unwrap();
        assert_eq!(ack, 0);
        assert_eq!(link.transactions(), 1);
        assert_eq!(link.stats().bytes_received, 2 * 11 + 10);
        assert_eq!(link.get_mut().tx.len(), 10);
    }

    #[test]
    fn test_read_while_streaming_checks_echo() {
        let rx = encode_register_response(FrameType::ReadResponse, 0x07, 115_200).to_vec();
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert!(matches!(
            link.read_register_streaming(Register::Status, &mut StreamReader::default()),
            Err(EngineError::Protocol { offset: 4, expected: 0x06, found: 0x07 })
        ));
    }

    #[test]
    fn test_echoed_register_mismatch() {
        let rx = encode_register_response(FrameType::ReadResponse, 0x07, 115200).to_vec();
        let mut link = RegisterTransactor::new(Scripted::new(rx));

        assert!(matches!(
            link.read_register(Register::Status),
            Err(EngineError::Protocol { offset: 4, expected: 0x06, found: 0x07 })
        ));
        assert_eq!(link.transactions(), 0);
    }
}
