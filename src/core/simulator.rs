//! Simulated sensor module
//!
//! [`SimulatedDevice`] implements `Read + Write` and answers register frames
//! from an in-memory register map. Once the detector is activated it plays a
//! script of stream bytes (frames, garbage, truncated frames) and can
//! optionally keep generating frames afterwards. A request arriving while
//! streaming is answered only after the stream chunk in flight. Reads with
//! nothing to deliver fail with `TimedOut`, like a serial port whose read
//! timeout elapsed.
//!
//! A [`SimulatorHandle`] shares the device state so tests can inspect the
//! request log after the device was moved into a session.

use crate::core::error::Result;
use crate::core::protocol::frame::{encode_register_response, FrameType, END_MARKER, START_MARKER};
use crate::core::protocol::{
    encode_envelope, main_control, MeasurementEntry, Register, StatusCondition,
};
use crate::core::stream_reader::encode_stream_frame;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Request received by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Register read
    Read(u8),
    /// Register write with the written value
    Write(u8, u32),
}

/// Endless frame generation after the script runs out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waveform {
    /// Mean distance in meters
    pub base_m: f32,
    /// Peak deviation in meters
    pub swing_m: f32,
    /// Delay before each generated frame
    pub interval: Duration,
}

impl Default for Waveform {
    fn default() -> Self {
        Self {
            base_m: 1.2,
            swing_m: 0.02,
            interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    registers: BTreeMap<u8, u32>,
    rejected: BTreeMap<u8, u32>,
    inbox: Vec<u8>,
    response: VecDeque<u8>,
    stream: VecDeque<u8>,
    /// Stream bytes still owed before `response`
    ahead_of_response: usize,
    script: VecDeque<Vec<u8>>,
    waveform: Option<Waveform>,
    generated: u64,
    streaming: bool,
    requests: Vec<Request>,
    half_duplex_violations: u32,
    fail_writes: bool,
    released: u32,
}

impl DeviceState {
    fn handle_frame(&mut self, frame: &[u8]) {
        let overlapping = !self.response.is_empty();
        if !overlapping {
            self.ahead_of_response = 0;
            if self.streaming {
                if self.stream.is_empty() {
                    if let Some(chunk) = self.next_chunk() {
                        self.stream.extend(chunk);
                    }
                }
                self.ahead_of_response = self.stream.len();
            }
        }

        let address = frame[4];
        let reply = match (FrameType::from_u8(frame[3]), frame.len()) {
            (Some(FrameType::ReadRequest), 6) => {
                self.requests.push(Request::Read(address));
                let value = self.registers.get(&address).copied().unwrap_or(0);
                encode_register_response(FrameType::ReadResponse, address, value)
            }
            (Some(FrameType::WriteRequest), 10) => {
                let value = u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]);
                self.requests.push(Request::Write(address, value));
                let ack = self.rejected.get(&address).copied().unwrap_or(value);
                self.apply_write(address, ack);
                encode_register_response(FrameType::WriteResponse, address, ack)
            }
            _ => {
                tracing::warn!("Simulator ignoring frame {}", hex::encode(frame));
                return;
            }
        };

        if overlapping {
            self.half_duplex_violations += 1;
            tracing::error!("Simulator got a request before the previous response was read");
        }
        self.response.extend(reply);
    }

    fn apply_write(&mut self, address: u8, value: u32) {
        self.registers.insert(address, value);
        if address != Register::MainControl.address() {
            return;
        }

        let created = StatusCondition::ServiceCreated.mask();
        let active = created
            | StatusCondition::ServiceActivated.mask()
            | StatusCondition::DataReady.mask();
        let status = Register::Status.address();
        match value {
            main_control::STOP => {
                self.registers.insert(status, 0);
                self.streaming = false;
                self.stream.truncate(self.ahead_of_response);
            }
            main_control::CREATE => {
                self.registers.insert(status, created);
            }
            main_control::ACTIVATE | main_control::CREATE_AND_ACTIVATE => {
                self.registers.insert(status, active);
                self.streaming = true;
            }
            main_control::CLEAR_STATUS => {
                let current = self.registers.get(&status).copied().unwrap_or(0);
                self.registers.insert(status, current & active);
            }
            _ => {}
        }
    }

    fn process_inbox(&mut self) {
        loop {
            match self.inbox.iter().position(|&b| b == START_MARKER) {
                Some(0) => {}
                Some(n) => {
                    self.inbox.drain(..n);
                }
                None => {
                    self.inbox.clear();
                    return;
                }
            }
            if self.inbox.len() < 3 {
                return;
            }
            let length = u16::from_le_bytes([self.inbox[1], self.inbox[2]]) as usize;
            let total = 4 + length + 1;
            if self.inbox.len() < total {
                return;
            }

            let frame: Vec<u8> = self.inbox.drain(..total).collect();
            if frame[total - 1] == END_MARKER && length >= 1 {
                self.handle_frame(&frame);
            } else {
                tracing::warn!("Simulator dropping malformed request {}", hex::encode(&frame));
            }
        }
    }

    /// Next scripted chunk, else a generated frame
    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if let Some(chunk) = self.script.pop_front() {
            return Some(chunk);
        }
        let waveform = self.waveform?;
        self.next_waveform_frame(waveform)
    }

    fn next_waveform_frame(&mut self, waveform: Waveform) -> Option<Vec<u8>> {
        let phase = self.generated as f32 / 10.0;
        self.generated += 1;
        let distance = waveform.base_m + waveform.swing_m * phase.sin();
        let entries = [
            MeasurementEntry::new(distance, 1200),
            MeasurementEntry::new(distance * 2.0, 300),
        ];
        stream_frame(&entries).ok()
    }
}

/// In-memory sensor module
#[derive(Debug)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

/// Shared view of a [`SimulatedDevice`]
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<DeviceState>>,
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedDevice {
    /// Create a device with an idle detector and factory register values
    pub fn new() -> Self {
        let registers = BTreeMap::from([
            (Register::Status.address(), 0),
            (Register::BaudRate.address(), 115_200),
            (Register::ProductId.address(), 0xACC0_0122),
            (Register::ProductVersion.address(), 0x0002_0A00),
            (Register::MaxBaudRate.address(), 3_000_000),
            (Register::OutputBufferLength.address(), 0),
        ]);
        let state = DeviceState {
            registers,
            rejected: BTreeMap::new(),
            inbox: Vec::new(),
            response: VecDeque::new(),
            stream: VecDeque::new(),
            ahead_of_response: 0,
            script: VecDeque::new(),
            waveform: None,
            generated: 0,
            streaming: false,
            requests: Vec::new(),
            half_duplex_violations: 0,
            fail_writes: false,
            released: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Preset a register value
    #[must_use]
    pub fn with_register(self, register: Register, value: u32) -> Self {
        lock(&self.state).registers.insert(register.address(), value);
        self
    }

    /// Acknowledge writes to `register` with `ack` instead of the written value
    #[must_use]
    pub fn rejecting(self, register: Register, ack: u32) -> Self {
        lock(&self.state).rejected.insert(register.address(), ack);
        self
    }

    /// Queue raw bytes to play while streaming
    #[must_use]
    pub fn with_stream_bytes(self, bytes: Vec<u8>) -> Self {
        lock(&self.state).script.push_back(bytes);
        self
    }

    /// Queue one well-formed stream frame carrying `entries`
    ///
    /// Entries that do not fit one frame are dropped with a warning.
    #[must_use]
    pub fn with_frame(self, entries: &[MeasurementEntry]) -> Self {
        match stream_frame(entries) {
            Ok(frame) => self.with_stream_bytes(frame),
            Err(e) => {
                tracing::warn!("Simulator cannot queue frame: {}", e);
                self
            }
        }
    }

    /// Keep generating frames once the script is exhausted
    #[must_use]
    pub fn with_waveform(self, waveform: Waveform) -> Self {
        lock(&self.state).waveform = Some(waveform);
        self
    }

    /// Shared view of this device
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = lock(&self.state);
        if !state.response.is_empty() {
            if state.ahead_of_response == 0 {
                return Ok(drain_into(&mut state.response, buf));
            }
            let n = buf.len().min(state.ahead_of_response);
            let n = drain_into(&mut state.stream, &mut buf[..n]);
            state.ahead_of_response -= n;
            return Ok(n);
        }

        if state.streaming && state.stream.is_empty() {
            if let Some(chunk) = state.script.pop_front() {
                state.stream.extend(chunk);
            } else if let Some(waveform) = state.waveform {
                drop(state);
                std::thread::sleep(waveform.interval);
                state = lock(&self.state);
                if state.streaming {
                    if let Some(frame) = state.next_waveform_frame(waveform) {
                        state.stream.extend(frame);
                    }
                }
            }
        }

        if state.stream.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "simulated read timeout"));
        }
        Ok(drain_into(&mut state.stream, buf))
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure"));
        }
        state.inbox.extend_from_slice(buf);
        state.process_inbox();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        lock(&self.state).released += 1;
    }
}

impl SimulatorHandle {
    /// Requests in arrival order
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.state).requests.clone()
    }

    /// Writes in arrival order
    pub fn writes(&self) -> Vec<(u8, u32)> {
        lock(&self.state)
            .requests
            .iter()
            .filter_map(|r| match *r {
                Request::Write(address, value) => Some((address, value)),
                Request::Read(_) => None,
            })
            .collect()
    }

    /// Current register value
    pub fn register(&self, register: Register) -> u32 {
        lock(&self.state)
            .registers
            .get(&register.address())
            .copied()
            .unwrap_or(0)
    }

    /// Whether the detector is streaming
    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    /// Requests that arrived while a response was still unread
    pub fn half_duplex_violations(&self) -> u32 {
        lock(&self.state).half_duplex_violations
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Times the device was dropped
    pub fn released(&self) -> u32 {
        lock(&self.state).released
    }
}

fn stream_frame(entries: &[MeasurementEntry]) -> Result<Vec<u8>> {
    encode_stream_frame(&encode_envelope(&[], entries)?)
}

fn drain_into(src: &mut VecDeque<u8>, buf: &mut [u8]) -> usize {
    let n = buf.len().min(src.len());
    for (slot, byte) in buf.iter_mut().zip(src.drain(..n)) {
        *slot = byte;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{
        decode_register_response, encode_read_request, encode_write_request,
    };

    fn read_response(device: &mut SimulatedDevice) -> Vec<u8> {
        let mut buf = [0u8; 10];
        device.read_exact(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_answers_register_reads() {
        let mut device = SimulatedDevice::new().with_register(Register::Gain, 500);
        device.write_all(&encode_read_request(Register::Gain)).unwrap();

        let bytes = read_response(&mut device);
        let response = decode_register_response(&bytes, FrameType::ReadResponse).unwrap();
        assert_eq!(response.address, 0x24);
        assert_eq!(response.value, 500);
    }

    #[test]
    fn test_activate_starts_stream() {
        let mut device = SimulatedDevice::new().with_frame(&[MeasurementEntry::new(1.0, 5)]);
        let handle = device.handle();

        let mut buf = [0u8; 1];
        assert_eq!(device.read(&mut buf).unwrap_err().kind(), io::ErrorKind::TimedOut);

        device
            .write_all(&encode_write_request(
                Register::MainControl,
                main_control::CREATE_AND_ACTIVATE,
            ))
            .unwrap();
        read_response(&mut device);
        assert!(handle.is_streaming());
        assert_eq!(handle.register(Register::Status), 0x103);

        device.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], START_MARKER);
    }

    #[test]
    fn test_reply_waits_for_frame_in_flight() {
        let entries = [MeasurementEntry::new(2.0, 9)];
        let mut device = SimulatedDevice::new().with_frame(&entries).with_frame(&entries);
        let handle = device.handle();
        device
            .write_all(&encode_write_request(Register::MainControl, main_control::ACTIVATE))
            .unwrap();
        read_response(&mut device);

        let mut head = [0u8; 3];
        device.read_exact(&mut head).unwrap();
        device.write_all(&encode_write_request(Register::MainControl, main_control::STOP)).unwrap();
        assert!(!handle.is_streaming());

        let mut rest = [0u8; 14];
        device.read_exact(&mut rest).unwrap();
        assert_eq!(rest[13], END_MARKER);
        let ack = decode_register_response(&read_response(&mut device), FrameType::WriteResponse);
        assert_eq!(ack.unwrap().value, main_control::STOP);

        let mut buf = [0u8; 1];
        assert_eq!(device.read(&mut buf).unwrap_err().kind(), io::ErrorKind::TimedOut);
        assert_eq!(handle.half_duplex_violations(), 0);
    }

    #[test]
    fn test_detects_overlapping_requests() {
        let mut device = SimulatedDevice::new();
        let handle = device.handle();
        device.write_all(&encode_read_request(Register::Status)).unwrap();
        device.write_all(&encode_read_request(Register::Status)).unwrap();

        assert_eq!(handle.half_duplex_violations(), 1);
        assert_eq!(handle.requests().len(), 2);
    }

    #[test]
    fn test_request_split_across_writes() {
        let mut device = SimulatedDevice::new();
        let handle = device.handle();
        let request = encode_write_request(Register::UpdateRate, 2000);
        device.write_all(&request[..3]).unwrap();
        assert!(handle.requests().is_empty());
        device.write_all(&request[3..]).unwrap();

        assert_eq!(handle.writes(), vec![(0x23, 2000)]);
    }

    #[test]
    fn test_drop_counts_release() {
        let device = SimulatedDevice::new();
        let handle = device.handle();
        drop(device);
        assert_eq!(handle.released(), 1);
    }
}
