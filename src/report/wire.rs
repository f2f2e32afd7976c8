//! Little-endian cursor helpers shared by every report structure.

use super::CodecError;

/// Sequential writer over a fixed output buffer.
///
/// Callers size the buffer from the structure's `SIZE` constant, so running
/// past the end is a layout bug and panics like any slice overrun.
pub(crate) struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WireWriter<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub(crate) fn put_u8(&mut self, value: u8) {
        self.buf[self.pos] = value;
        self.pos += 1;
    }

    #[inline]
    pub(crate) fn put_u16(&mut self, value: u16) {
        self.put_slice(&value.to_le_bytes());
    }

    #[inline]
    pub(crate) fn put_i16(&mut self, value: i16) {
        self.put_slice(&value.to_le_bytes());
    }

    #[inline]
    pub(crate) fn put_u32(&mut self, value: u32) {
        self.put_slice(&value.to_le_bytes());
    }

    #[inline]
    pub(crate) fn put_slice(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}

/// Sequential reader that has already checked the total length.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Wrap `buf`, failing unless it is exactly `expected` bytes long.
    pub(crate) fn exact(
        structure: &'static str,
        buf: &'a [u8],
        expected: usize,
    ) -> Result<Self, CodecError> {
        if buf.len() != expected {
            return Err(CodecError::WrongSize {
                structure,
                expected,
                actual: buf.len(),
            });
        }
        Ok(Self { buf, pos: 0 })
    }

    #[inline]
    pub(crate) fn u8(&mut self) -> u8 {
        let value = self.buf[self.pos];
        self.pos += 1;
        value
    }

    #[inline]
    pub(crate) fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.array())
    }

    #[inline]
    pub(crate) fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.array())
    }

    #[inline]
    pub(crate) fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    #[inline]
    pub(crate) fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

/// CRC-32 (zlib polynomial) over everything but the trailing 4-byte field.
pub fn trailing_crc32(packet: &[u8]) -> u32 {
    let body = packet.len().saturating_sub(4);
    crc32fast::hash(&packet[..body])
}
