use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("vbr overflow")]
    VbrOverflow,
    #[error("invalid read width `{0}`")]
    InvalidWidth(usize),
    #[error("unaligned byte access at bit offset `{0}`")]
    Unaligned(usize),
}

/// A little-endian bit cursor over a byte slice, the way LLVM bitstreams are
/// laid out: bit 0 of a field is the lowest unread bit of the current byte.
#[derive(Debug, Clone)]
pub struct Cursor<'input> {
    buffer: &'input [u8],
    offset: usize,
}

impl<'input> Cursor<'input> {
    #[must_use]
    pub fn new(buffer: &'input [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Total length in bits
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.buffer.len() * 8
    }

    /// True once fewer than 32 bits remain. Bitstreams are padded to whole
    /// words, so a shorter tail cannot hold another abbreviation id.
    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.bit_len().saturating_sub(self.offset) < 32
    }

    fn read_bits(&self, offset: usize, count: usize) -> u64 {
        let mut res = 0u64;
        let mut written = 0;
        let mut bit = offset;
        let end = offset + count;
        while bit < end {
            let byte = self.buffer[bit >> 3];
            let in_byte = bit & 7;
            let take = (8 - in_byte).min(end - bit);
            let chunk = (u64::from(byte) >> in_byte) & ((1u64 << take) - 1);
            res |= chunk << written;
            written += take;
            bit += take;
        }
        res
    }

    pub fn peek(&self, count: usize) -> Result<u64, Error> {
        if count > 64 {
            return Err(Error::InvalidWidth(count));
        }
        if self.bit_len() - self.offset < count {
            return Err(Error::BufferOverflow);
        }
        Ok(self.read_bits(self.offset, count))
    }

    pub fn read(&mut self, count: usize) -> Result<u64, Error> {
        let res = self.peek(count)?;
        self.offset += count;
        Ok(res)
    }

    pub fn read_vbr(&mut self, width: usize) -> Result<u64, Error> {
        if !(2..=32).contains(&width) {
            return Err(Error::InvalidWidth(width));
        }
        let test_bit = 1u64 << (width - 1);
        let mask = test_bit - 1;
        let mut res = 0u64;
        let mut shift = 0;
        loop {
            let next = self.read(width)?;
            let chunk = next & mask;
            if shift >= 64 || (shift > 0 && chunk >> (64 - shift) != 0) {
                return Err(Error::VbrOverflow);
            }
            res |= chunk << shift;
            shift += width - 1;
            if next & test_bit == 0 {
                break;
            }
        }
        Ok(res)
    }

    /// Skip to the next multiple of `align` bits.
    pub fn align(&mut self, align: usize) -> Result<(), Error> {
        debug_assert!(align.is_power_of_two());
        if self.offset % align == 0 {
            return Ok(());
        }
        let offset = (self.offset + align) & !(align - 1);
        if offset > self.bit_len() {
            return Err(Error::BufferOverflow);
        }
        self.offset = offset;
        Ok(())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'input [u8], Error> {
        if self.offset & 0b111 != 0 {
            return Err(Error::Unaligned(self.offset));
        }
        let start = self.offset >> 3;
        let end = start.checked_add(count).ok_or(Error::BufferOverflow)?;
        let bytes = self.buffer.get(start..end).ok_or(Error::BufferOverflow)?;
        self.offset = end << 3;
        Ok(bytes)
    }

    pub fn skip_bytes(&mut self, count: usize) -> Result<(), Error> {
        self.read_bytes(count).map(|_| ())
    }
}
