//! Bit-granular packet buffer
//!
//! Bits are packed least-significant first within each byte. Reads are
//! bounded by the number of bits written (or supplied), so a truncated
//! packet surfaces as [`StreamError::Exhausted`] instead of reading zeros.

use crate::error::StreamError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitStream {
    data: Vec<u8>,
    bit_len: usize,
    read_pos: usize,
}

/// Number of bits needed to hold any value in `0..=range`
pub fn bits_for_range(range: u32) -> u32 {
    32 - range.leading_zeros()
}

impl BitStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a received payload for reading
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let bit_len = data.len() * 8;
        Self {
            data,
            bit_len,
            read_pos: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_len - self.read_pos
    }

    fn push_bit(&mut self, bit: bool) {
        let byte = self.bit_len / 8;
        if byte == self.data.len() {
            self.data.push(0);
        }
        if bit {
            self.data[byte] |= 1 << (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    fn check_remaining(&self, wanted: u32) -> Result<(), StreamError> {
        if self.remaining_bits() < wanted as usize {
            return Err(StreamError::Exhausted {
                wanted,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    /// Writes one bit and hands the value back so it can drive a branch
    pub fn write_flag(&mut self, flag: bool) -> bool {
        self.push_bit(flag);
        flag
    }

    pub fn read_flag(&mut self) -> Result<bool, StreamError> {
        self.check_remaining(1)?;
        let byte = self.data[self.read_pos / 8];
        let bit = (byte >> (self.read_pos % 8)) & 1 == 1;
        self.read_pos += 1;
        Ok(bit)
    }

    /// Writes the low `bits` bits of `value`
    pub fn write_int(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        debug_assert!(bits == 32 || value < (1u32 << bits));
        for i in 0..bits {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    pub fn read_int(&mut self, bits: u32) -> Result<u32, StreamError> {
        debug_assert!(bits <= 32);
        self.check_remaining(bits)?;
        let mut value = 0u32;
        for i in 0..bits {
            if self.read_flag()? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_int(value, 32);
    }

    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        self.read_int(32)
    }

    /// Full-precision float, bit-exact
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn read_f32(&mut self) -> Result<f32, StreamError> {
        self.read_u32().map(f32::from_bits)
    }

    /// Writes `value` in `bits_for_range(max - min)` bits
    pub fn write_ranged_u32(&mut self, value: u32, min: u32, max: u32) {
        debug_assert!(min <= value && value <= max);
        self.write_int(value - min, bits_for_range(max - min));
    }

    pub fn read_ranged_u32(&mut self, min: u32, max: u32) -> Result<u32, StreamError> {
        let raw = self.read_int(bits_for_range(max - min))?;
        let value = raw.saturating_add(min);
        if raw > max - min {
            return Err(StreamError::OutOfRange { value, min, max });
        }
        Ok(value)
    }
}
