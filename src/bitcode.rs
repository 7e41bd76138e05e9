use crate::bits::Cursor;
use crate::read::{BitStreamReader, Error};
use crate::visitor::BitStreamVisitor;

/// `0x0B17C0DE`, the first word of a bitcode wrapper header
pub const LLVM_BITCODE_WRAPPER_MAGIC: u32 = 0x0B17C0DE;

/// `'B' 'C' 0xC0DE`, the first word of an LLVM IR bitstream
pub const LLVM_IR_MAGIC: u32 = u32::from_le_bytes([b'B', b'C', 0xC0, 0xDE]);

/// A bitstream file together with its signature, ready to be walked by a
/// [`BitStreamVisitor`].
///
/// Accepts both raw LLVM bitcode and the bitcode wrapper format.
#[derive(Debug, Clone, Copy)]
pub struct Bitcode<'input> {
    pub signature: Signature,
    stream: &'input [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Array(Vec<u64>),
    Char6String(String),
    Blob(Vec<u8>),
}

/// Data records consist of a record code and a number of (up to) 64-bit
/// integer values.
///
/// The interpretation of the code and values is application specific and may
/// vary between different block types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record code
    pub id: u64,
    /// Scalar operands, in order
    pub(crate) fields: Vec<u64>,
    /// Trailing array or blob of an abbreviated record
    pub(crate) payload: Option<Payload>,
}

impl Record {
    #[must_use]
    pub fn new(id: u64, fields: Vec<u64>, payload: Option<Payload>) -> Self {
        Self {
            id,
            fields,
            payload,
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[u64] {
        &self.fields
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    /// All operands of the record as one sequence: the scalar fields followed
    /// by the elements of an array payload. Unabbreviated and abbreviated
    /// forms of the same record therefore read alike. A blob is not included.
    #[must_use]
    pub fn operands(&self) -> Vec<u64> {
        let mut operands = self.fields.clone();
        match &self.payload {
            Some(Payload::Array(elements)) => operands.extend_from_slice(elements),
            Some(Payload::Char6String(s)) => operands.extend(s.bytes().map(u64::from)),
            Some(Payload::Blob(_)) | None => {}
        }
        operands
    }

    /// Interpret the operands from `start_at` on as a byte string.
    #[must_use]
    pub fn string(&self, start_at: usize) -> String {
        let bytes: Vec<u8> = self
            .operands()
            .into_iter()
            .skip(start_at)
            .map(|x| x as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// aka. Magic number
#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq)]
pub struct Signature {
    pub magic: u32,
    /// Magic of the wrapped stream, `0` when there is no wrapper
    pub magic2: u32,
    pub version: u32,
    pub offset: u32,
    pub size: u32,
    /// CPU type for Darwin wrappers, header version for Android wrappers
    pub cpu_type: u32,
}

impl Signature {
    /// Split `data` into its signature and the bitstream that follows the
    /// stream magic.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<(Self, &[u8])> {
        let (signature, remaining_data) = data.split_first_chunk::<4>()?;
        let magic = u32::from_le_bytes(*signature);
        if magic != LLVM_BITCODE_WRAPPER_MAGIC {
            return Some((
                Signature {
                    version: 0,
                    magic,
                    magic2: 0,
                    offset: 4,
                    size: u32::try_from(remaining_data.len()).ok()?,
                    cpu_type: 0,
                },
                remaining_data,
            ));
        }
        // It is a wrapper, remove wrapper header
        let mut words = data
            .get(4..20)?
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        let version = words.next()?;
        let offset = words.next()?;
        let size = words.next()?;
        let cpu_type = words.next()?;
        let start = offset as usize;
        let end = start.checked_add(size as usize)?;
        let wrapped = data.get(start..end)?;
        let (magic2, remaining_data) = wrapped.split_first_chunk::<4>()?;
        Some((
            Signature {
                version,
                magic,
                magic2: u32::from_le_bytes(*magic2),
                offset,
                size,
                cpu_type,
            },
            remaining_data,
        ))
    }

    #[must_use]
    pub fn is_wrapper(&self) -> bool {
        self.magic == LLVM_BITCODE_WRAPPER_MAGIC
    }

    /// Magic of the bitstream proper, looking through a wrapper
    #[must_use]
    pub fn stream_magic(&self) -> u32 {
        if self.is_wrapper() {
            self.magic2
        } else {
            self.magic
        }
    }
}

impl<'input> Bitcode<'input> {
    /// Locate the bitstream in `data`
    pub fn parse(data: &'input [u8]) -> Result<Self, Error> {
        let (signature, stream) = Signature::parse(data).ok_or(Error::InvalidSignature(0))?;
        Ok(Self { signature, stream })
    }

    /// Walk the whole stream with a visitor
    pub fn read<V>(&self, visitor: &mut V) -> Result<(), Error>
    where
        V: BitStreamVisitor,
    {
        if !visitor.validate(self.signature) {
            return Err(Error::InvalidSignature(self.signature.stream_magic()));
        }
        let mut reader = BitStreamReader::new();
        reader.read_block(
            &mut Cursor::new(self.stream),
            BitStreamReader::TOP_LEVEL_BLOCK_ID,
            2,
            visitor,
        )
    }
}
