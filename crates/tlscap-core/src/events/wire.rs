//! Little-endian cursor over a raw kernel record

use super::DecodeError;

/// Largest tail the kernel may append after a fixed layout.
///
/// Structs ending in a `u32`/`i32` are padded to 8-byte alignment, and perf
/// samples are padded so the sample size stays 8-byte aligned.
pub const MAX_TRAILING_PADDING: usize = 7;

/// Reads fixed-width fields off a record in declaration order
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reject the record up front unless it holds exactly `layout_len` bytes
    /// plus at most alignment padding.
    pub fn expect_layout(&self, layout_len: usize) -> Result<(), DecodeError> {
        let available = self.buf.len();
        if available < layout_len {
            return Err(DecodeError::ShortRead {
                needed: layout_len,
                available,
            });
        }
        let extra = available - layout_len;
        if extra > MAX_TRAILING_PADDING {
            return Err(DecodeError::TrailingBytes { extra });
        }
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::ShortRead {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.take(n)
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.array()?))
    }
}
