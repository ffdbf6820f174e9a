//! Emulate 1-Wire bus peripherals that exchange typed values with a bus master.
//!
//! # Overview
//!
//! The `owx` crate implements the peripheral side of a typed-value
//! exchange protocol layered on top of a single-wire, half-duplex,
//! master-polled bus. A [`Peripheral`] masquerades as a bus device the
//! master can address: the master reads the peripheral's 9-byte
//! [`Scratchpad`] in bulk, writes typed values (integers of several
//! widths and `f32`) through checksummed frames, and triggers
//! application-specific commands via an installable [`CommandHandler`].
//!
//! The crate is transport-agnostic: all bus access goes through the
//! [`Bus`] trait, which the surrounding firmware implements on top of
//! its bit-level 1-Wire machinery (or any other byte transport with the
//! same half-duplex, read-after-write discipline).
//!
//! # Getting started
//!
//! Implement [`Bus`] for your transport and call [`Peripheral::poll`]
//! from your main loop as often as possible. Every transport read must
//! be non-blocking: [`Bus::recv`] either delivers the requested bytes
//! immediately or reports [`ShortRead`], in which case the current
//! dispatch is abandoned and retried on a later poll.
//!
//! # Examples
//!
//! Feeding a captured master transaction through a peripheral:
//!
//! ```
//! use owx::{Bus, Peripheral, ShortRead};
//! use std::collections::VecDeque;
//!
//! struct LoopbackBus {
//!     wire: VecDeque<u8>,
//! }
//!
//! impl Bus for LoopbackBus {
//!     fn recv(&mut self, buf: &mut [u8]) -> Result<(), ShortRead> {
//!         if self.wire.len() < buf.len() {
//!             return Err(ShortRead);
//!         }
//!
//!         for slot in &mut *buf {
//!             *slot = self.wire.pop_front().unwrap();
//!         }
//!
//!         Ok(())
//!     }
//!
//!     fn send(&mut self, _buf: &[u8]) {}
//!
//!     fn raise_device_error(&mut self, _command: u8) {}
//! }
//!
//! // Frame opcode, uint8 tag, length 1, payload 42, CRC-8.
//! let mut bus = LoopbackBus {
//!     wire: VecDeque::from([0x01, 0x0c, 0x01, 0x2a, 0x22]),
//! };
//! let mut dev = Peripheral::new([0x28, 0x45, 0x01, 0x00, 0x00, 0x00, 0x19]);
//!
//! dev.poll(&mut bus);
//!
//! assert_eq!(dev.value().and_then(|val| val.as_u8()), Some(42));
//! ```
//!
//! Consuming received values from the owning loop:
//!
//! ```no_run
//! # use owx::{Bus, Peripheral};
//! # fn poll_loop(dev: &mut Peripheral, bus: &mut impl Bus) {
//! loop {
//!     dev.poll(bus);
//!
//!     if let Some(val) = dev.take_value() {
//!         // A master that writes faster than this loop runs only
//!         // ever leaves its most recent value behind.
//!         println!("received {val:?}");
//!     }
//! }
//! # }
//! ```
//!
//! # Protocol details
//!
//! Every bus transaction addressed to the peripheral starts with a
//! single low-level opcode byte:
//!
//! | opcode | meaning |
//! |--------|---------|
//! | `0x20` | read scratchpad: the peripheral replies with 9 raw bytes |
//! | `0x01` | value frame follows (see below) |
//! | `0x40` | handler command: one raw byte follows, routed to the [`CommandHandler`] |
//!
//! Unknown opcodes are ignored so that future bus features do not break
//! deployed peripherals.
//!
//! A value frame is self-describing and integrity-checked:
//!
//! ```text
//! [0x01] [command: 1] [length: 1] [payload: length] [crc8: 1]
//! ```
//!
//! with `length` at most [`MAX_PAYLOAD`] and the checksum computed by
//! [`crc8`] over `command`, `length` and the payload, seed 0. The
//! command byte selects the payload type: uint8 `0x0c`, uint16 `0x0d`,
//! int16 `0x0e`, int8 `0x0f`, int32 `0x10`, float32 `0x11`, uint32
//! `0x12`, char8 `0x13` (left to the handler), struct `0x14`
//! (reserved). Anything else is delegated to the installed handler. A
//! successfully handled frame or handler command is acknowledged with a
//! single [`ACK`] byte.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod scratchpad;
pub mod value;

pub use scratchpad::Scratchpad;
pub use value::{Payload, Value, ValueKind};

use alloc::boxed::Box;
use core::fmt::{Debug, Display, Formatter};
use log::trace;
use strum::FromRepr;

/// Maximum payload length of a value frame, in bytes.
pub const MAX_PAYLOAD: usize = 32;

/// Acknowledgment byte sent after a successfully handled frame or
/// handler command.
pub const ACK: u8 = 0x30;

/// Error type for operations that compose outbound frames.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error {
    /// The provided argument is invalid, e.g. a payload longer than
    /// [`MAX_PAYLOAD`].
    InvalidArgument,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl core::error::Error for Error {}

/// Error returned by [`Bus::recv`] when the requested number of bytes
/// is not available.
///
/// A short read is not a fault: on a polled half-duplex bus it simply
/// means the master has not produced the bytes (yet). The endpoint
/// reacts by abandoning the current dispatch and returning to the
/// caller.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ShortRead;

impl Display for ShortRead {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "short read")
    }
}

impl core::error::Error for ShortRead {}

/// Byte-level bus transport a [`Peripheral`] is polled from.
///
/// Implemented by the surrounding firmware on top of its bit-level bus
/// machinery. The peripheral never waits: all timeout handling lives in
/// the implementation of [`recv`](Self::recv).
pub trait Bus {
    /// Reads exactly `buf.len()` bytes from the bus.
    ///
    /// There is no partial success: either the buffer is filled in
    /// full, or [`ShortRead`] is returned and the buffer contents are
    /// unspecified. The call must not block waiting for bus activity.
    fn recv(&mut self, buf: &mut [u8]) -> Result<(), ShortRead>;

    /// Writes `buf` to the bus.
    ///
    /// Transmission is assumed to succeed; the master reads the reply
    /// stream immediately after issuing its request.
    fn send(&mut self, buf: &[u8]);

    /// Reports a protocol or integrity fault, tagged with the command
    /// byte of the offending frame.
    ///
    /// This is an observability signal for the bus layer; the
    /// peripheral itself never attempts recovery beyond aborting the
    /// current frame.
    fn raise_device_error(&mut self, command: u8);
}

/// Low-level opcode starting every bus transaction.
#[derive(FromRepr, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum Opcode {
    /// A value frame follows.
    ValueFrame = 0x01,
    /// The peripheral replies with the full scratchpad contents.
    ReadScratchpad = 0x20,
    /// A single raw command byte follows, routed to the handler.
    HandlerCommand = 0x40,
}

/// Command byte of a value frame, selecting the payload type.
///
/// Command bytes outside this enum are application-specific and are
/// delegated to the installed [`CommandHandler`].
#[derive(FromRepr, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum TypeTag {
    /// Unsigned 8-bit integer, 1 payload byte.
    Uint8 = 0x0c,
    /// Unsigned 16-bit integer, 2 payload bytes, LSB first.
    Uint16 = 0x0d,
    /// Signed 16-bit integer, 2 payload bytes, LSB first.
    Int16 = 0x0e,
    /// Signed 8-bit integer, 1 payload byte.
    Int8 = 0x0f,
    /// Signed 32-bit integer, 4 payload bytes, LSB first.
    Int32 = 0x10,
    /// IEEE-754 binary32, 4 payload bytes, LSB first.
    Float32 = 0x11,
    /// Unsigned 32-bit integer, 4 payload bytes, LSB first.
    Uint32 = 0x12,
    /// Single character, left to the handler.
    Char8 = 0x13,
    /// Structured payload, reserved for future protocol revisions.
    Struct = 0x14,
}

/// Computes the Dallas/Maxim CRC-8 of `data`, continuing from `crc`.
///
/// Pass `0x00` as the seed for a fresh computation. Chained
/// computations carry the previous result as the seed, so that
/// `crc8(b, crc8(a, 0x00))` equals the CRC over `a` followed by `b`.
#[must_use]
pub fn crc8(data: &[u8], crc: u8) -> u8 {
    let mut crc = crc;

    for byte in data {
        let mut byte = *byte;

        for _ in 0..u8::BITS {
            let mix = (crc ^ byte) & 0x01;

            crc >>= 1;

            if mix != 0 {
                crc ^= 0x8c;
            }

            byte >>= 1;
        }
    }

    crc
}

/// Handler for application-specific command bytes.
///
/// Installed via [`Peripheral::set_command_handler`] and invoked in two
/// situations: as the fallback for value-frame command bytes the
/// protocol does not recognize, and as the sole consumer of the raw
/// handler-command opcode. Returning `true` acknowledges the command on
/// the bus.
pub trait CommandHandler {
    /// Handles a command byte, with access to the peripheral through
    /// `responder`.
    fn handle(&mut self, command: u8, responder: &mut Responder<'_>) -> bool;
}

impl<F> CommandHandler for F
where
    F: FnMut(u8, &mut Responder<'_>) -> bool,
{
    fn handle(&mut self, command: u8, responder: &mut Responder<'_>) -> bool {
        self(command, responder)
    }
}

/// Peripheral access granted to a [`CommandHandler`] while it runs.
///
/// Lets the handler update the scratchpad the master will read next and
/// push device-initiated frames onto the bus.
pub struct Responder<'a> {
    scratchpad: &'a mut Scratchpad,
    bus: &'a mut dyn Bus,
}

impl Responder<'_> {
    /// Returns the peripheral's scratchpad.
    pub fn scratchpad(&mut self) -> &mut Scratchpad {
        self.scratchpad
    }

    /// Transmits a value frame with an arbitrary command byte.
    ///
    /// See [`send_frame`].
    pub fn send_frame(&mut self, command: u8, payload: &[u8]) -> Result<(), Error> {
        send_frame(&mut *self.bus, command, payload)
    }

    /// Transmits a typed value under its matching command byte.
    ///
    /// See [`send_value`].
    pub fn send_value(&mut self, value: Value) -> Result<(), Error> {
        send_value(&mut *self.bus, value)
    }
}

/// Transmits a value frame to the bus.
///
/// The frame is sent as `[0x01, command, len, payload…, crc8]` with the
/// checksum covering command, length and payload. Transmission is
/// fire-and-forget; the master is expected to pick up the bytes per the
/// bus's read-after-write convention.
///
/// # Errors
///
/// - [`Error::InvalidArgument`] if the payload exceeds [`MAX_PAYLOAD`].
pub fn send_frame(bus: &mut dyn Bus, command: u8, payload: &[u8]) -> Result<(), Error> {
    let len = u8::try_from(payload.len()).map_err(|_| Error::InvalidArgument)?;

    if usize::from(len) > MAX_PAYLOAD {
        return Err(Error::InvalidArgument);
    }

    let crc = crc8(payload, crc8(&[command, len], 0x00));

    trace!("Sending frame: command {command:#04x}, length {len}");

    bus.send(&[Opcode::ValueFrame as u8, command, len]);
    bus.send(payload);
    bus.send(&[crc]);

    Ok(())
}

/// Transmits a typed value under its matching command byte.
///
/// Frames `value` with the [`TypeTag`] a receiving peer needs to decode
/// it back into the same [`Value`]. Used for device-initiated pushes,
/// typically from a [`CommandHandler`].
///
/// # Errors
///
/// See [`send_frame`].
pub fn send_value(bus: &mut dyn Bus, value: Value) -> Result<(), Error> {
    let mut buf = [0x00; 4];

    let (tag, len) = match value {
        Value::Int8(val) => (TypeTag::Int8, fill(&mut buf, &val.to_le_bytes())),
        Value::Uint8(val) => (TypeTag::Uint8, fill(&mut buf, &val.to_le_bytes())),
        Value::Int16(val) => (TypeTag::Int16, fill(&mut buf, &val.to_le_bytes())),
        Value::Uint16(val) => (TypeTag::Uint16, fill(&mut buf, &val.to_le_bytes())),
        Value::Int32(val) => (TypeTag::Int32, fill(&mut buf, &val.to_le_bytes())),
        Value::Uint32(val) => (TypeTag::Uint32, fill(&mut buf, &val.to_le_bytes())),
        Value::Float32(val) => (TypeTag::Float32, fill(&mut buf, &val.to_le_bytes())),
    };

    send_frame(bus, tag as u8, &buf[..len])
}

fn fill(buf: &mut [u8; 4], bytes: &[u8]) -> usize {
    buf[..bytes.len()].copy_from_slice(bytes);

    bytes.len()
}

/// A virtual bus peripheral exchanging typed values with the master.
///
/// Constructed from a 7-byte identity and driven by calling
/// [`poll`](Self::poll) from the owning loop. Received values land in a
/// single slot: a frame decoded before the previous value was collected
/// simply overwrites it. The slot is read with
/// [`value`](Self::value)/[`take_value`](Self::take_value) and the
/// availability queries, all from the same thread of control as the
/// poll itself.
///
/// # Examples
///
/// ```no_run
/// # use owx::{Bus, Peripheral, Responder};
/// # fn run(bus: &mut impl Bus) {
/// let mut dev = Peripheral::new([0x28, 0x45, 0x01, 0x00, 0x00, 0x00, 0x19]);
///
/// dev.set_command_handler(|command: u8, responder: &mut Responder<'_>| {
///     if command == 0xf0 {
///         responder.scratchpad().write(0, 1.5_f32);
///
///         return true;
///     }
///
///     false
/// });
///
/// loop {
///     dev.poll(bus);
/// }
/// # }
/// ```
pub struct Peripheral {
    rom: [u8; 8],
    scratchpad: Scratchpad,
    value: Option<Value>,
    last_command: u8,
    handler: Option<Box<dyn CommandHandler>>,
}

impl Peripheral {
    /// Constructs a new peripheral from its 7-byte bus identity.
    ///
    /// The identity is the family code followed by a 6-byte serial
    /// number; the trailing checksum byte of the ROM is derived from
    /// it.
    #[must_use]
    pub fn new(identity: [u8; 7]) -> Self {
        let mut rom = [0x00; 8];

        rom[..7].copy_from_slice(&identity);
        rom[7] = crc8(&identity, 0x00);

        Self {
            rom,
            scratchpad: Scratchpad::new(),
            value: None,
            last_command: 0x00,
            handler: None,
        }
    }

    /// Returns the 8-byte ROM the transport layer uses to address this
    /// peripheral on the bus.
    #[must_use]
    pub const fn rom(&self) -> &[u8; 8] {
        &self.rom
    }

    /// Returns the scratchpad register block.
    #[must_use]
    pub const fn scratchpad(&self) -> &Scratchpad {
        &self.scratchpad
    }

    /// Returns the scratchpad register block for updating.
    ///
    /// Periodic scratchpad refreshes must be sequenced between
    /// [`poll`](Self::poll) calls, never concurrently with one.
    pub fn scratchpad_mut(&mut self) -> &mut Scratchpad {
        &mut self.scratchpad
    }

    /// Returns `true` while a received value is waiting to be
    /// collected.
    #[must_use]
    pub const fn available(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the kind of the waiting value, or [`ValueKind::None`].
    #[must_use]
    pub fn available_kind(&self) -> ValueKind {
        self.value.map_or(ValueKind::None, |val| val.kind())
    }

    /// Discards the waiting value, if any.
    pub fn clear_available(&mut self) {
        self.value = None;
    }

    /// Returns the waiting value without consuming it.
    #[must_use]
    pub const fn value(&self) -> Option<Value> {
        self.value
    }

    /// Consumes and returns the waiting value.
    pub fn take_value(&mut self) -> Option<Value> {
        self.value.take()
    }

    /// Returns the command byte of the last successfully validated
    /// frame.
    #[must_use]
    pub const fn last_command(&self) -> u8 {
        self.last_command
    }

    /// Installs the handler for application-specific commands,
    /// replacing any previous one.
    pub fn set_command_handler(&mut self, handler: impl CommandHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Services one bus transaction, if any.
    ///
    /// Reads a single opcode byte and dispatches on it; when the bus
    /// has nothing for this peripheral, the call returns immediately
    /// with no side effects. Intended to be invoked from the owning
    /// loop as often as possible.
    pub fn poll<B: Bus>(&mut self, bus: &mut B) {
        let mut opcode = [0x00];

        if bus.recv(&mut opcode).is_err() {
            return;
        }

        match Opcode::from_repr(opcode[0]) {
            Some(Opcode::ReadScratchpad) => {
                trace!("Scratchpad read");
                bus.send(self.scratchpad.as_bytes());
            }
            Some(Opcode::ValueFrame) => self.read_frame(bus),
            Some(Opcode::HandlerCommand) => self.handler_command(bus),
            // Unknown opcodes are reserved for other bus features.
            None => trace!("Ignoring opcode {:#04x}", opcode[0]),
        }
    }

    /// Reads and validates one value frame, committing its payload to
    /// the value slot only after the checksum matches.
    fn read_frame(&mut self, bus: &mut dyn Bus) {
        let mut header = [0x00; 2];

        // The frame may still be in flight; retry on a later poll.
        if bus.recv(&mut header).is_err() {
            return;
        }

        let [command, len] = header;

        if len == 0 {
            return;
        }

        let len = usize::from(len);

        if len > MAX_PAYLOAD {
            trace!("Oversize frame: command {command:#04x}, length {len}");
            bus.raise_device_error(command);
            return;
        }

        let mut payload = [0x00; MAX_PAYLOAD];
        let payload = &mut payload[..len];

        if bus.recv(payload).is_err() {
            bus.raise_device_error(command);
            return;
        }

        let mut checksum = [0x00];

        if bus.recv(&mut checksum).is_err() {
            bus.raise_device_error(command);
            return;
        }

        if crc8(payload, crc8(&header, 0x00)) != checksum[0] {
            trace!("Checksum mismatch: command {command:#04x}");
            bus.raise_device_error(command);
            return;
        }

        self.last_command = command;

        if self.decode(bus, command, payload) {
            bus.send(&[ACK]);
        }
    }

    /// Decodes a validated payload into the value slot.
    ///
    /// Returns whether the frame was handled, either by a built-in
    /// decode or by the installed handler.
    fn decode(&mut self, bus: &mut dyn Bus, command: u8, payload: &[u8]) -> bool {
        let decoded = match TypeTag::from_repr(command) {
            Some(TypeTag::Int8) => payload.first().map(|&byte| Value::Int8(i8::from_le_bytes([byte]))),
            Some(TypeTag::Uint8) => payload.first().map(|&byte| Value::Uint8(byte)),
            Some(TypeTag::Int16) => payload
                .try_into()
                .ok()
                .map(|bytes| Value::Int16(i16::from_le_bytes(bytes))),
            Some(TypeTag::Uint16) => payload
                .try_into()
                .ok()
                .map(|bytes| Value::Uint16(u16::from_le_bytes(bytes))),
            Some(TypeTag::Int32) => payload
                .try_into()
                .ok()
                .map(|bytes| Value::Int32(i32::from_le_bytes(bytes))),
            Some(TypeTag::Uint32) => payload
                .try_into()
                .ok()
                .map(|bytes| Value::Uint32(u32::from_le_bytes(bytes))),
            Some(TypeTag::Float32) => payload
                .try_into()
                .ok()
                .map(|bytes| Value::Float32(f32::from_le_bytes(bytes))),
            // Structured payloads are reserved; nothing decodes them yet.
            Some(TypeTag::Struct) => return false,
            // Char payloads and application-specific commands belong to
            // the handler.
            Some(TypeTag::Char8) | None => return self.delegate(bus, command),
        };

        match decoded {
            Some(value) => {
                trace!("Received value: {value:?}");
                self.value = Some(value);

                true
            }
            None => {
                // Payload length does not match the fixed-width type.
                bus.raise_device_error(command);

                false
            }
        }
    }

    /// Offers a command byte to the installed handler.
    ///
    /// Without a handler the command is not handled; the caller decides
    /// whether that warrants an acknowledgment.
    fn delegate(&mut self, bus: &mut dyn Bus, command: u8) -> bool {
        let Some(handler) = self.handler.as_deref_mut() else {
            return false;
        };

        let mut responder = Responder {
            scratchpad: &mut self.scratchpad,
            bus,
        };

        handler.handle(command, &mut responder)
    }

    /// Services the raw handler-command opcode: one command byte, no
    /// frame around it.
    fn handler_command(&mut self, bus: &mut dyn Bus) {
        let mut command = [0x00];

        if bus.recv(&mut command).is_err() {
            return;
        }

        if self.delegate(bus, command[0]) {
            bus.send(&[ACK]);
        }
    }
}

impl Debug for Peripheral {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Peripheral")
            .field("rom", &self.rom)
            .field("scratchpad", &self.scratchpad)
            .field("value", &self.value)
            .field("last_command", &self.last_command)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::vec_deque::VecDeque;
    use alloc::vec::Vec;
    use log::LevelFilter;

    fn init_logger() {
        let _ = env_logger::builder()
            .filter_level(LevelFilter::max())
            .is_test(true)
            .try_init();
    }

    struct TestBus {
        deque: VecDeque<u8>,
        faults: Vec<u8>,
    }

    impl TestBus {
        fn new<const N: usize>(wire: [u8; N]) -> Self {
            Self {
                deque: VecDeque::from(wire),
                faults: Vec::new(),
            }
        }
    }

    impl Bus for TestBus {
        fn recv(&mut self, buf: &mut [u8]) -> Result<(), ShortRead> {
            if self.deque.len() < buf.len() {
                return Err(ShortRead);
            }

            for slot in &mut *buf {
                *slot = self.deque.pop_front().unwrap();
            }

            Ok(())
        }

        fn send(&mut self, buf: &[u8]) {
            self.deque.extend(buf.iter().copied());
        }

        fn raise_device_error(&mut self, command: u8) {
            self.faults.push(command);
        }
    }

    fn device() -> Peripheral {
        Peripheral::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07])
    }

    #[test]
    fn crc8_matches_reference_vector() {
        init_logger();

        assert_eq!(crc8(&[0x0e, 0x02, 0x39, 0x30], 0x00), 0x7b);
        assert_eq!(crc8(&[], 0x00), 0x00, "empty input leaves the seed untouched");
    }

    #[test]
    fn crc8_chains_through_the_seed() {
        init_logger();

        let data = [0x0e, 0x02, 0x39, 0x30, 0xff, 0x00, 0x5a];

        for split in 0..=data.len() {
            let (head, tail) = data.split_at(split);

            assert_eq!(
                crc8(tail, crc8(head, 0x00)),
                crc8(&data, 0x00),
                "chained computation should match a single pass at split {split}"
            );
        }
    }

    #[test]
    fn rom_carries_identity_checksum() {
        init_logger();

        let dev = device();

        assert_eq!(
            dev.rom(),
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x0f],
            "trailing ROM byte should be the CRC of the identity"
        );
    }

    #[test]
    fn poll_on_idle_bus_is_a_noop() {
        init_logger();

        let mut bus = TestBus::new([]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert!(bus.deque.is_empty(), "nothing should be transmitted");
        assert!(bus.faults.is_empty(), "no fault should be raised");
        assert!(!dev.available());
    }

    #[test]
    fn unknown_opcode_is_ignored() {
        init_logger();

        let mut bus = TestBus::new([0x77]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert!(bus.deque.is_empty(), "opcode should be consumed without a response");
        assert!(bus.faults.is_empty());
    }

    #[test]
    fn scratchpad_read_sends_the_full_block() {
        init_logger();

        let mut bus = TestBus::new([0x20]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert_eq!(
            bus.deque,
            [0x00; Scratchpad::LEN],
            "a fresh scratchpad should read back as nine zero bytes"
        );

        dev.scratchpad_mut().write(1, 12_345_u16);
        bus.deque.clear();
        bus.deque.extend([0x20]);

        dev.poll(&mut bus);

        assert_eq!(
            bus.deque,
            [0x00, 0x39, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            "the reply should reflect the current block contents in address order"
        );
    }

    #[test]
    fn int16_frame_updates_the_value_slot() {
        init_logger();

        let mut bus = TestBus::new([0x01, 0x0e, 0x02, 0x39, 0x30, 0x7b]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert!(dev.available());
        assert_eq!(dev.available_kind(), ValueKind::Int16);
        assert_eq!(dev.value().and_then(|val| val.as_i16()), Some(12_345));
        assert_eq!(dev.last_command(), 0x0e);
        assert_eq!(bus.deque, [ACK], "a handled frame should be acknowledged");
        assert!(bus.faults.is_empty());

        dev.clear_available();

        assert!(!dev.available());
        assert_eq!(dev.available_kind(), ValueKind::None);
        assert_eq!(dev.value(), None);
    }

    #[test]
    fn float32_frame_decodes_ieee754() {
        init_logger();

        let mut bus = TestBus::new([0x01, 0x11, 0x04, 0x00, 0x00, 0xc0, 0x3f, 0x38]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert_eq!(dev.value().and_then(|val| val.as_f32()), Some(1.5));
        assert_eq!(bus.deque, [ACK]);
    }

    #[test]
    fn float32_length_mismatch_raises_device_error() {
        init_logger();

        // Three payload bytes under a correct checksum: the frame is
        // intact, the type is not.
        let mut bus = TestBus::new([0x01, 0x11, 0x03, 0x00, 0x00, 0xc0, 0xf3]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert!(!dev.available(), "a misaligned payload must never be committed");
        assert_eq!(bus.faults, [0x11], "the fault should carry the float32 command");
        assert!(bus.deque.is_empty(), "no acknowledgment should be sent");
    }

    #[test]
    fn corrupted_checksum_leaves_previous_value_intact() {
        init_logger();

        let mut bus = TestBus::new([
            0x01, 0x0c, 0x01, 0x2a, 0x22, // valid uint8 frame
            0x01, 0x0e, 0x02, 0x39, 0x30, 0x7a, // int16 frame, checksum bit flipped
        ]);
        let mut dev = device();

        dev.poll(&mut bus);
        dev.poll(&mut bus);

        assert_eq!(
            dev.value(),
            Some(Value::Uint8(42)),
            "the rejected frame must not disturb the accepted one"
        );
        assert_eq!(dev.last_command(), 0x0c);
        assert_eq!(bus.faults, [0x0e]);
        assert_eq!(bus.deque, [ACK], "only the first frame should be acknowledged");
    }

    #[test]
    fn oversize_length_raises_device_error() {
        init_logger();

        let mut bus = TestBus::new([0x01, 0x55, 0x21]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert_eq!(bus.faults, [0x55]);
        assert!(bus.deque.is_empty());
        assert!(!dev.available());
    }

    #[test]
    fn zero_length_frame_is_ignored() {
        init_logger();

        let mut bus = TestBus::new([0x01, 0x0e, 0x00]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert!(bus.faults.is_empty(), "an empty frame is not a fault");
        assert!(bus.deque.is_empty());
        assert!(!dev.available());
    }

    #[test]
    fn truncated_frame_raises_device_error() {
        init_logger();

        // Payload arrives, the checksum byte never does.
        let mut bus = TestBus::new([0x01, 0x0e, 0x02, 0x39, 0x30]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert_eq!(bus.faults, [0x0e]);
        assert!(!dev.available());
    }

    #[test]
    fn consecutive_frames_keep_only_the_last_value() {
        init_logger();

        let mut bus = TestBus::new([
            0x01, 0x0c, 0x01, 0x2a, 0x22, // uint8 42
            0x01, 0x11, 0x04, 0x00, 0x00, 0xc0, 0x3f, 0x38, // float32 1.5
        ]);
        let mut dev = device();

        dev.poll(&mut bus);
        dev.poll(&mut bus);

        assert_eq!(dev.available_kind(), ValueKind::Float32);
        assert_eq!(dev.value(), Some(Value::Float32(1.5)));
        assert_eq!(bus.deque, [ACK, ACK]);
    }

    #[test]
    fn unknown_tag_without_handler_is_silent() {
        init_logger();

        let mut bus = TestBus::new([0x01, 0x42, 0x01, 0x07, 0x39]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert!(bus.deque.is_empty(), "an unhandled frame earns no acknowledgment");
        assert!(bus.faults.is_empty(), "nor is it a protocol fault");
        assert!(!dev.available());
        assert_eq!(
            dev.last_command(),
            0x42,
            "the frame was validated, so its command is recorded"
        );
    }

    #[test]
    fn unknown_tag_delegates_to_handler() {
        init_logger();

        let mut bus = TestBus::new([0x01, 0x42, 0x01, 0x07, 0x39]);
        let mut dev = device();

        dev.set_command_handler(|command: u8, responder: &mut Responder<'_>| {
            responder.scratchpad().write_bytes(0, &[command]);

            true
        });

        dev.poll(&mut bus);

        assert_eq!(bus.deque, [ACK]);
        assert_eq!(dev.scratchpad().as_bytes()[0], 0x42);
        assert!(!dev.available(), "delegated frames do not touch the value slot");
    }

    #[test]
    fn char8_tag_delegates_to_handler() {
        init_logger();

        let mut bus = TestBus::new([0x01, 0x13, 0x01, 0x41, 0x72]);
        let mut dev = device();

        dev.set_command_handler(|command: u8, _responder: &mut Responder<'_>| command == 0x13);

        dev.poll(&mut bus);

        assert_eq!(bus.deque, [ACK]);
        assert!(!dev.available());
    }

    #[test]
    fn struct_tag_falls_through_unhandled() {
        init_logger();

        let mut bus = TestBus::new([0x01, 0x14, 0x01, 0xaa, 0xc1]);
        let mut dev = device();

        // Would acknowledge anything it saw; must not see the reserved
        // struct command.
        dev.set_command_handler(|command: u8, responder: &mut Responder<'_>| {
            responder.scratchpad().write_bytes(0, &[command]);

            true
        });

        dev.poll(&mut bus);

        assert!(bus.deque.is_empty(), "reserved frames earn no acknowledgment");
        assert!(bus.faults.is_empty());
        assert_eq!(dev.scratchpad().as_bytes()[0], 0x00, "handler must not run");
        assert_eq!(dev.last_command(), 0x14);
        assert!(!dev.available());
    }

    #[test]
    fn handler_command_is_acknowledged() {
        init_logger();

        let mut bus = TestBus::new([0x40, 0x99]);
        let mut dev = device();

        dev.set_command_handler(|command: u8, responder: &mut Responder<'_>| {
            if command == 0x99 {
                responder.scratchpad().write(0, 0x2a_u8);

                return true;
            }

            false
        });

        dev.poll(&mut bus);

        assert_eq!(bus.deque, [ACK]);
        assert_eq!(dev.scratchpad().as_bytes()[0], 0x2a);
        assert_eq!(
            dev.last_command(),
            0x00,
            "raw handler commands are not recorded as frame commands"
        );
    }

    #[test]
    fn handler_command_without_handler_is_a_noop() {
        init_logger();

        let mut bus = TestBus::new([0x40, 0x99]);
        let mut dev = device();

        dev.poll(&mut bus);

        assert!(bus.deque.is_empty());
        assert!(bus.faults.is_empty());
    }

    #[test]
    fn declined_handler_command_is_not_acknowledged() {
        init_logger();

        let mut bus = TestBus::new([0x40, 0x99]);
        let mut dev = device();

        dev.set_command_handler(|_command: u8, _responder: &mut Responder<'_>| false);

        dev.poll(&mut bus);

        assert!(bus.deque.is_empty());
    }

    #[test]
    fn send_frame_produces_wire_layout() {
        init_logger();

        let mut bus = TestBus::new([]);

        send_frame(&mut bus, 0x42, &[0x01, 0x02, 0x03]).unwrap();

        assert_eq!(
            bus.deque,
            [
                0x01,
                0x42,
                0x03,
                0x01,
                0x02,
                0x03,
                crc8(&[0x42, 0x03, 0x01, 0x02, 0x03], 0x00),
            ],
            "deque contents should be correct"
        );
    }

    #[test]
    fn send_frame_rejects_oversize_payload() {
        init_logger();

        let mut bus = TestBus::new([]);
        let res = send_frame(&mut bus, 0x42, &[0x00; MAX_PAYLOAD + 1]);

        assert_eq!(res.unwrap_err(), Error::InvalidArgument);
        assert!(bus.deque.is_empty(), "nothing should reach the bus");
    }

    #[test]
    fn sent_values_decode_back_identically() {
        init_logger();

        let values = [
            Value::Int8(-5),
            Value::Uint8(42),
            Value::Int16(-12_345),
            Value::Uint16(40_000),
            Value::Int32(-123_456),
            Value::Uint32(0xdead_beef),
            Value::Float32(1.5),
        ];

        for value in values {
            let mut bus = TestBus::new([]);
            let mut dev = device();

            send_value(&mut bus, value).unwrap();
            dev.poll(&mut bus);

            assert_eq!(dev.take_value(), Some(value), "round trip for {value:?}");
            assert_eq!(bus.deque, [ACK]);
            assert!(bus.faults.is_empty());
        }
    }

    #[test]
    fn handler_can_push_frames() {
        init_logger();

        let mut bus = TestBus::new([0x40, 0x10]);
        let mut dev = device();

        dev.set_command_handler(|_command: u8, responder: &mut Responder<'_>| {
            responder.send_value(Value::Uint16(513)).is_ok()
        });

        dev.poll(&mut bus);

        assert_eq!(
            bus.deque,
            [
                0x01,
                TypeTag::Uint16 as u8,
                0x02,
                0x01,
                0x02,
                crc8(&[TypeTag::Uint16 as u8, 0x02, 0x01, 0x02], 0x00),
                ACK,
            ],
            "the pushed frame should precede the acknowledgment"
        );
    }
}
