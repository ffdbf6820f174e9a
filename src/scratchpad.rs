//! The scratchpad register block.
//!
//! A peripheral exposes a small block of bytes that the bus master can
//! read in bulk with a single opcode. The layout of the block is a
//! convention between the owning firmware and the master; the endpoint
//! itself only enforces the block's bounds.

use crate::value::Payload;
use log::trace;

const LEN: usize = 9;

/// Fixed-size byte register block readable in bulk by the bus master.
///
/// Writes at arbitrary offsets are bounds-checked: a write that would
/// run past the end of the block is rejected in full, leaving the
/// block untouched. Rejection is silent, matching the fire-and-forget
/// nature of the owning firmware's periodic updates.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Scratchpad([u8; LEN]);

impl Scratchpad {
    /// Size of the scratchpad in bytes.
    pub const LEN: usize = LEN;

    /// Constructs a zero-filled scratchpad.
    #[must_use]
    pub const fn new() -> Self {
        Self([0x00; LEN])
    }

    /// Returns the full register block in address order.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; LEN] {
        &self.0
    }

    /// Writes `data` into the block starting at `offset`.
    ///
    /// A write with `offset + data.len()` past the end of the block is
    /// rejected without modifying any byte. There is no partial write.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        let Some(end) = offset.checked_add(data.len()) else {
            return;
        };

        if end > LEN {
            trace!("Rejected scratchpad write: offset {offset}, length {}", data.len());
            return;
        }

        self.0[offset..end].copy_from_slice(data);
    }

    /// Writes a typed value into the block at `offset`, little-endian.
    ///
    /// Accepts any type convertible to a [`Payload`], i.e. the integer
    /// widths and `f32`. Bounds handling matches
    /// [`write_bytes`](Self::write_bytes).
    pub fn write<V, const N: usize>(&mut self, offset: usize, value: V)
    where
        V: Into<Payload<N>>,
    {
        self.write_bytes(offset, &value.into().0);
    }
}
