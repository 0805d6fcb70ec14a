//! Forward-only cursor over a module's bytes.
//!
//! Every read either advances the cursor or fails; nothing is ever re-read.
//! Offsets reported in errors are absolute positions in the original module,
//! so a sub-reader created for a section or a function body still points at
//! the right byte.

use byteorder::{ByteOrder, LittleEndian};

use super::DecodeError;

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0, base: 0 }
    }

    /// A reader whose reported offsets start at `base` instead of zero.
    pub fn with_base(bytes: &'a [u8], base: usize) -> Reader<'a> {
        Reader { bytes, pos: 0, base }
    }

    // Basic operations --------------------------------------------------------

    /// Position relative to the start of this reader's slice.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Absolute position in the module.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// The unread tail of the slice, without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        match self.bytes.get(self.pos) {
            Some(byte) => {
                self.pos += 1;
                Ok(*byte)
            }
            None => Err(DecodeError::UnexpectedEnd { offset: self.offset() }),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEnd { offset: self.offset() });
        }
        let bytes = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Split off the next `len` bytes as an independent reader.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>, DecodeError> {
        let base = self.offset();
        let bytes = self.read_bytes(len)?;
        Ok(Reader::with_base(bytes, base))
    }

    // Variable-length integers ------------------------------------------------

    /// Unsigned LEB128 holding at most `max_bits` significant bits.
    pub fn read_uleb128(&mut self, max_bits: u32) -> Result<u64, DecodeError> {
        let start = self.offset();
        let max_bytes = (max_bits + 6) / 7;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;

        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            let low = (byte & 0x7f) as u64;

            if i == max_bytes - 1 {
                // the last permitted byte may not continue and may not carry
                // bits beyond max_bits
                let usable = max_bits - shift;
                if byte & 0x80 != 0 || (usable < 7 && low >> usable != 0) {
                    return Err(DecodeError::MalformedInteger { offset: start });
                }
            }

            result |= low << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }

        Err(DecodeError::MalformedInteger { offset: start })
    }

    /// Signed LEB128 holding at most `max_bits` significant bits, sign-extended
    /// to 64 bits.
    pub fn read_sleb128(&mut self, max_bits: u32) -> Result<i64, DecodeError> {
        let start = self.offset();
        let max_bytes = (max_bits + 6) / 7;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;

        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            let low = (byte & 0x7f) as u64;

            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(DecodeError::MalformedInteger { offset: start });
                }
                // unused high bits must replicate the sign bit
                let usable = max_bits - shift;
                if usable < 7 {
                    let sign = (low >> (usable - 1)) & 1;
                    let mask = (0x7f << usable) & 0x7f;
                    let expected = if sign == 1 { mask } else { 0 };
                    if low & mask != expected {
                        return Err(DecodeError::MalformedInteger { offset: start });
                    }
                }
            }

            result |= low << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= !0u64 << shift;
                }
                return Ok(result as i64);
            }
        }

        Err(DecodeError::MalformedInteger { offset: start })
    }

    pub fn read_vu32(&mut self) -> Result<u32, DecodeError> {
        self.read_uleb128(32).map(|v| v as u32)
    }

    pub fn read_vu64(&mut self) -> Result<u64, DecodeError> {
        self.read_uleb128(64)
    }

    pub fn read_vs32(&mut self) -> Result<i32, DecodeError> {
        self.read_sleb128(32).map(|v| v as i32)
    }

    /// Block types are encoded as a 33-bit signed integer.
    pub fn read_vs33(&mut self) -> Result<i64, DecodeError> {
        self.read_sleb128(33)
    }

    pub fn read_vs64(&mut self) -> Result<i64, DecodeError> {
        self.read_sleb128(64)
    }

    // Fixed-width values ------------------------------------------------------

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        self.read_bytes(4).map(LittleEndian::read_u32)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        self.read_bytes(8).map(LittleEndian::read_u64)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.read_bytes(4).map(LittleEndian::read_f32)
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.read_bytes(8).map(LittleEndian::read_f64)
    }

    /// A length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_vu32()? as usize;
        let offset = self.offset();
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { offset })
    }
}
