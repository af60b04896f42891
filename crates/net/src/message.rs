use std::borrow::Cow;

use crate::error::NetError;

pub const DEFAULT_MESSAGE_BITS: usize = 256;
pub const INTEGER_BITS: usize = 32;
/// Bytes kept by `read_string`; longer strings are truncated, but the full
/// payload is still consumed from the message.
pub const MAX_STRING_LENGTH: usize = 1024;

const FLOAT_BITS: usize = 32;
const STRING_LENGTH_BITS: usize = 16;

/// Bit-addressed packet buffer.
///
/// Values are packed back to back starting from the least significant bit of
/// each byte, with no alignment or padding between writes. Integers use
/// exactly the requested width and floats always take 32 bits.
///
/// A message built with [`NetMessage::new`] or [`NetMessage::from_bytes`] owns
/// its storage and grows on write. [`NetMessage::view`] borrows received bytes
/// for reading only; writing into a view panics.
///
/// Reading past the written end is a no-op: the cursor stays put, the output
/// is untouched, and [`NetMessage::overrun`] becomes true. The typed readers
/// turn that into a zero (or the delta baseline).
#[derive(Debug, Clone)]
pub struct NetMessage<'a> {
    data: Cow<'a, [u8]>,
    cur_bit: usize,
    max_bit: usize,
    overrun: bool,
}

impl Default for NetMessage<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl NetMessage<'static> {
    pub fn new() -> Self {
        Self::with_capacity_bits(DEFAULT_MESSAGE_BITS)
    }

    pub fn with_capacity_bits(bits: usize) -> Self {
        Self {
            data: Cow::Owned(vec![0; bits.div_ceil(8)]),
            cur_bit: 0,
            max_bit: 0,
            overrun: false,
        }
    }

    /// Copies `bytes` into a new message positioned at bit 0, readable up to
    /// `bytes.len() * 8` bits.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: Cow::Owned(bytes.to_vec()),
            cur_bit: 0,
            max_bit: bytes.len() * 8,
            overrun: false,
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let max_bit = bytes.len() * 8;
        Self {
            data: Cow::Owned(bytes),
            cur_bit: 0,
            max_bit,
            overrun: false,
        }
    }
}

impl<'a> NetMessage<'a> {
    pub fn view(bytes: &'a [u8]) -> Self {
        Self {
            data: Cow::Borrowed(bytes),
            cur_bit: 0,
            max_bit: bytes.len() * 8,
            overrun: false,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.data, Cow::Owned(_))
    }

    pub fn cursor(&self) -> usize {
        self.cur_bit
    }

    pub fn max_bit(&self) -> usize {
        self.max_bit
    }

    pub fn remaining_bits(&self) -> usize {
        self.max_bit - self.cur_bit
    }

    /// True once any read has been refused for running past the end.
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    pub fn rewind(&mut self) {
        self.cur_bit = 0;
        self.overrun = false;
    }

    /// Moves the cursor, clamped to the high-water mark.
    pub fn seek(&mut self, bit: usize) {
        self.cur_bit = bit.min(self.max_bit);
    }

    /// Bytes touched by the cursor, i.e. `ceil(cursor / 8)`.
    pub fn len(&self) -> usize {
        self.cur_bit.div_ceil(8)
    }

    pub fn is_empty(&self) -> bool {
        self.cur_bit == 0
    }

    /// Byte-aligned snapshot of everything up to the cursor.
    ///
    /// Covers `(cursor + 8) / 8` bytes, one more than [`len`](Self::len) when
    /// the cursor sits on a byte boundary, bounded by the allocation.
    pub fn buffer(&self) -> &[u8] {
        let end = ((self.cur_bit + 8) / 8).min(self.data.len());
        &self.data[..end]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let len = self.len();
        let mut bytes = self.data.into_owned();
        bytes.truncate(len);
        bytes
    }

    /// Reads `bits` bits into `out`, least significant bit first.
    ///
    /// Returns false without touching `out` or the cursor when fewer than
    /// `bits` bits remain.
    pub fn read_bits(&mut self, bits: usize, out: &mut [u8]) -> bool {
        assert!(
            out.len() * 8 >= bits,
            "output of {} bytes cannot hold {} bits",
            out.len(),
            bits
        );

        if self.cur_bit + bits > self.max_bit {
            self.overrun = true;
            return false;
        }

        let start = self.cur_bit;
        if start % 8 == 0 && bits % 8 == 0 {
            let from = start / 8;
            out[..bits / 8].copy_from_slice(&self.data[from..from + bits / 8]);
        } else {
            for i in 0..bits {
                let src = start + i;
                let bit = (self.data[src >> 3] >> (src & 7)) & 1;
                set_bit(out, i, bit != 0);
            }
        }

        self.cur_bit += bits;
        true
    }

    /// Writes the low `bits` bits of `data` at the cursor, growing the buffer
    /// when needed.
    ///
    /// # Panics
    ///
    /// Panics when the message is a borrowed view.
    pub fn write_bits(&mut self, bits: usize, data: &[u8]) {
        assert!(
            data.len() * 8 >= bits,
            "input of {} bytes does not hold {} bits",
            data.len(),
            bits
        );

        let start = self.cur_bit;
        let end = start + bits;
        let buf = owned_mut(&mut self.data);

        if end > buf.len() * 8 {
            buf.resize(end.div_ceil(8) + 1, 0);
        }

        if start % 8 == 0 && bits % 8 == 0 {
            let from = start / 8;
            buf[from..from + bits / 8].copy_from_slice(&data[..bits / 8]);
        } else {
            for i in 0..bits {
                let bit = (data[i >> 3] >> (i & 7)) & 1;
                set_bit(buf, start + i, bit != 0);
            }
        }

        self.cur_bit = end;
        self.max_bit = self.max_bit.max(end);
    }

    pub fn read_bool(&mut self) -> bool {
        let mut out = [0u8];
        self.read_bits(1, &mut out);
        out[0] & 1 != 0
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(1, &[value as u8]);
    }

    /// Reads an unsigned integer of `bits` width (1..=32). Yields 0 on overrun.
    pub fn read_integer(&mut self, bits: usize) -> u32 {
        check_width(bits);
        let mut out = [0u8; 4];
        self.read_bits(bits, &mut out);
        u32::from_le_bytes(out)
    }

    pub fn try_read_integer(&mut self, bits: usize) -> Result<u32, NetError> {
        check_width(bits);
        let remaining = self.remaining_bits();
        let mut out = [0u8; 4];
        if self.read_bits(bits, &mut out) {
            Ok(u32::from_le_bytes(out))
        } else {
            Err(NetError::ReadOverrun {
                requested: bits,
                remaining,
            })
        }
    }

    pub fn write_integer(&mut self, value: u32, bits: usize) {
        check_width(bits);
        self.write_bits(bits, &value.to_le_bytes());
    }

    /// Reads a two's complement integer of `bits` width, sign-extended.
    pub fn read_signed(&mut self, bits: usize) -> i32 {
        let raw = self.read_integer(bits);
        let shift = (INTEGER_BITS - bits) as u32;
        ((raw << shift) as i32) >> shift
    }

    pub fn write_signed(&mut self, value: i32, bits: usize) {
        self.write_integer(value as u32, bits);
    }

    pub fn read_float(&mut self) -> f32 {
        f32::from_bits(self.read_integer(FLOAT_BITS))
    }

    pub fn write_float(&mut self, value: f32) {
        self.write_integer(value.to_bits(), FLOAT_BITS);
    }

    /// Reads a `[u16 length][bytes]` string.
    ///
    /// At most [`MAX_STRING_LENGTH`] bytes are kept. Invalid UTF-8 is replaced
    /// rather than rejected.
    pub fn read_string(&mut self) -> String {
        let len = self.read_integer(STRING_LENGTH_BITS) as usize;
        let mut bytes = Vec::with_capacity(len.min(MAX_STRING_LENGTH));

        for i in 0..len {
            let mut byte = [0u8];
            if !self.read_bits(8, &mut byte) {
                break;
            }
            if i < MAX_STRING_LENGTH {
                bytes.push(byte[0]);
            }
        }

        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Writes a `[u16 length][bytes]` string. Input beyond 65535 bytes is cut.
    pub fn write_string(&mut self, value: &str) {
        let bytes = &value.as_bytes()[..value.len().min(u16::MAX as usize)];
        self.write_integer(bytes.len() as u32, STRING_LENGTH_BITS);
        self.write_bits(bytes.len() * 8, bytes);
    }

    /// Reads a changed flag, then a new value only if the flag is set.
    ///
    /// Returns `old` when the value is unchanged or could not be read.
    pub fn read_delta_integer(&mut self, old: u32, bits: usize) -> u32 {
        if self.read_bool() {
            self.try_read_integer(bits).unwrap_or(old)
        } else {
            old
        }
    }

    pub fn write_delta_integer(&mut self, value: u32, old: u32, bits: usize) {
        let changed = value != old;
        self.write_bool(changed);
        if changed {
            self.write_integer(value, bits);
        }
    }

    pub fn read_delta_float(&mut self, old: f32) -> f32 {
        if self.read_bool() {
            self.try_read_integer(FLOAT_BITS)
                .map(f32::from_bits)
                .unwrap_or(old)
        } else {
            old
        }
    }

    pub fn write_delta_float(&mut self, value: f32, old: f32) {
        let changed = value != old;
        self.write_bool(changed);
        if changed {
            self.write_float(value);
        }
    }
}

fn owned_mut<'b>(data: &'b mut Cow<'_, [u8]>) -> &'b mut Vec<u8> {
    match data {
        Cow::Owned(bytes) => bytes,
        Cow::Borrowed(_) => panic!("cannot write into a borrowed NetMessage"),
    }
}

#[inline]
fn set_bit(buf: &mut [u8], index: usize, value: bool) {
    let mask = 1u8 << (index & 7);
    if value {
        buf[index >> 3] |= mask;
    } else {
        buf[index >> 3] &= !mask;
    }
}

#[inline]
fn check_width(bits: usize) {
    assert!(
        (1..=INTEGER_BITS).contains(&bits),
        "integer width must be 1..=32 bits, got {}",
        bits
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_to_end_scenario() {
        let mut msg = NetMessage::new();
        msg.write_integer(42, 8);
        msg.write_bool(true);
        msg.write_float(3.25);

        let bytes = msg.buffer().to_vec();
        let mut read = NetMessage::from_bytes(&bytes);

        assert_eq!(read.read_integer(8), 42);
        assert!(read.read_bool());
        assert_eq!(read.read_float(), 3.25);
        assert!(!read.overrun());
    }

    #[test]
    fn test_mixed_round_trip() {
        let mut msg = NetMessage::new();
        msg.write_bool(false);
        msg.write_integer(5, 3);
        msg.write_integer(0xDEAD_BEEF, 32);
        msg.write_string("hello, world");
        msg.write_float(-1.5e-3);
        msg.write_signed(-7, 5);
        msg.write_integer(1, 1);
        msg.write_string("");

        let mut read = NetMessage::from_bytes(msg.buffer());
        assert!(!read.read_bool());
        assert_eq!(read.read_integer(3), 5);
        assert_eq!(read.read_integer(32), 0xDEAD_BEEF);
        assert_eq!(read.read_string(), "hello, world");
        assert_eq!(read.read_float(), -1.5e-3);
        assert_eq!(read.read_signed(5), -7);
        assert_eq!(read.read_integer(1), 1);
        assert_eq!(read.read_string(), "");
        assert!(!read.overrun());
    }

    #[test]
    fn test_bit_layout_is_lsb_first() {
        let mut msg = NetMessage::new();
        msg.write_bool(true);
        msg.write_integer(0b101, 3);
        msg.write_integer(0xF, 4);
        msg.write_integer(0x3, 2);

        assert_eq!(msg.len(), 2);
        assert_eq!(msg.buffer()[0], 0b1111_1011);
        assert_eq!(msg.buffer()[1], 0b0000_0011);
    }

    #[test]
    fn test_delta_integer() {
        let cases = [(10u32, 10u32), (11, 10), (0, u32::MAX), (u32::MAX, u32::MAX)];
        for (value, old) in cases {
            let mut msg = NetMessage::new();
            msg.write_delta_integer(value, old, 32);
            let unchanged_bits = msg.cursor();

            let mut read = NetMessage::from_bytes(msg.buffer());
            assert_eq!(read.read_delta_integer(old, 32), value);

            if value == old {
                assert_eq!(unchanged_bits, 1);
            } else {
                assert_eq!(unchanged_bits, 33);
            }
        }
    }

    #[test]
    fn test_delta_integer_narrow_width() {
        let mut msg = NetMessage::new();
        msg.write_delta_integer(200, 100, 8);
        msg.write_delta_integer(7, 7, 8);

        let mut read = NetMessage::from_bytes(msg.buffer());
        assert_eq!(read.read_delta_integer(100, 8), 200);
        assert_eq!(read.read_delta_integer(7, 8), 7);
    }

    #[test]
    fn test_delta_float() {
        let mut msg = NetMessage::new();
        msg.write_delta_float(1.25, 1.25);
        msg.write_delta_float(2.5, 1.25);

        let mut read = NetMessage::from_bytes(msg.buffer());
        assert_eq!(read.read_delta_float(1.25), 1.25);
        assert_eq!(read.read_delta_float(1.25), 2.5);
    }

    #[test]
    fn test_delta_read_on_truncated_value_keeps_old() {
        let mut msg = NetMessage::new();
        msg.write_bool(true);

        let mut read = NetMessage::from_bytes(&msg.into_bytes());
        assert_eq!(read.read_delta_integer(99, 32), 99);
        assert!(read.overrun());
    }

    #[test]
    fn test_length_invariant() {
        let mut msg = NetMessage::new();
        assert_eq!(msg.len(), 0);
        assert!(msg.is_empty());

        let mut total = 0;
        for width in [1, 7, 8, 3, 32, 13, 2] {
            msg.write_integer(1, width);
            total += width;
            assert_eq!(msg.len(), total.div_ceil(8));
        }
    }

    #[test]
    fn test_growth_preserves_written_bits() {
        let mut msg = NetMessage::new();
        for i in 0..200u32 {
            msg.write_integer(i % 97, 7);
            msg.write_bool(i % 3 == 0);
        }
        assert!(msg.cursor() > DEFAULT_MESSAGE_BITS);

        let mut read = NetMessage::from_bytes(msg.buffer());
        for i in 0..200u32 {
            assert_eq!(read.read_integer(7), i % 97);
            assert_eq!(read.read_bool(), i % 3 == 0);
        }
        assert!(!read.overrun());
    }

    #[test]
    fn test_bounded_read() {
        let bytes = [0xA5u8, 0x0F, 0xFF, 0x00];
        let mut msg = NetMessage::from_bytes(&bytes);

        for offset in 0..32 {
            msg.seek(offset);
            let mut out = [0u8];
            assert!(msg.read_bits(1, &mut out));
            assert_eq!(out[0], (bytes[offset / 8] >> (offset % 8)) & 1);
        }

        msg.seek(32);
        let mut out = [0x5Au8];
        assert!(!msg.read_bits(1, &mut out));
        assert_eq!(out[0], 0x5A);
        assert_eq!(msg.cursor(), 32);
        assert!(msg.overrun());

        msg.seek(28);
        assert!(!msg.read_bits(8, &mut out));
        assert_eq!(msg.cursor(), 28);
    }

    #[test]
    fn test_overrun_reads_are_zero() {
        let mut msg = NetMessage::from_bytes(&[0xFF]);
        assert_eq!(msg.read_integer(4), 0xF);
        assert_eq!(msg.read_integer(8), 0);
        assert_eq!(msg.read_float(), 0.0);
        assert!(msg.read_bool());
        assert_eq!(msg.cursor(), 5);

        let err = msg.try_read_integer(16).unwrap_err();
        assert!(matches!(
            err,
            NetError::ReadOverrun {
                requested: 16,
                ..
            }
        ));
    }

    #[test]
    fn test_default_message_has_nothing_to_read() {
        let mut msg = NetMessage::new();
        assert_eq!(msg.read_integer(32), 0);
        assert!(msg.overrun());

        msg.write_integer(77, 16);
        msg.rewind();
        assert!(!msg.overrun());
        assert_eq!(msg.read_integer(16), 77);
    }

    #[test]
    fn test_string_truncated_to_bound() {
        let long = "x".repeat(MAX_STRING_LENGTH + 50);
        let mut msg = NetMessage::new();
        msg.write_string(&long);
        msg.write_integer(0x1234, 16);

        let mut read = NetMessage::from_bytes(msg.buffer());
        let value = read.read_string();
        assert_eq!(value.len(), MAX_STRING_LENGTH);
        assert_eq!(read.read_integer(16), 0x1234);
    }

    #[test]
    fn test_truncated_string_payload() {
        let mut msg = NetMessage::new();
        msg.write_string("abcdef");
        let mut bytes = msg.into_bytes();
        bytes.truncate(2 + 3);

        let mut read = NetMessage::from_bytes(&bytes);
        assert_eq!(read.read_string(), "abc");
        assert!(read.overrun());
    }

    #[test]
    fn test_view_reads_borrowed_bytes() {
        let bytes = [42u8, 1];
        let mut view = NetMessage::view(&bytes);
        assert!(!view.is_owned());
        assert_eq!(view.read_integer(8), 42);
        assert!(view.read_bool());
    }

    #[test]
    #[should_panic(expected = "borrowed")]
    fn test_write_into_view_panics() {
        let bytes = [0u8; 4];
        let mut view = NetMessage::view(&bytes);
        view.write_bool(true);
    }

    #[test]
    fn test_buffer_covers_cursor_byte() {
        let mut msg = NetMessage::new();
        msg.write_integer(0xAB, 8);
        assert_eq!(msg.len(), 1);
        assert_eq!(msg.buffer(), &[0xAB, 0x00]);

        let mut full = NetMessage::with_capacity_bits(8);
        full.write_integer(0xCD, 8);
        assert_eq!(full.buffer()[0], 0xCD);
    }

    #[test]
    fn test_overwrite_after_seek() {
        let mut msg = NetMessage::new();
        msg.write_integer(0xFF, 8);
        msg.seek(2);
        msg.write_integer(0, 3);

        msg.rewind();
        assert_eq!(msg.read_integer(8), 0b1110_0011);
        assert_eq!(msg.max_bit(), 8);
    }
}
