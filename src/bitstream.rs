use num_enum::TryFromPrimitive;

/// Operand layout of an application-defined record. The first scalar
/// operand yields the record code.
#[derive(Debug, Clone)]
pub struct Abbreviation {
    /// Scalar operands, record code first
    pub fields: Vec<ScalarOperand>,
    pub payload: Option<PayloadOperand>,
}

/// Operand that encodes a single value
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScalarOperand {
    /// Constant, not present in the record bits
    Literal(u64),
    /// Fixed number of bits
    Fixed(u8),
    /// Variable bit rate with the given chunk width
    Vbr(u8),
    /// Six bits mapping onto `[a-zA-Z0-9._]`
    Char6,
}

/// Abbreviation operand that may only appear last
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadOperand {
    /// vbr6 byte count, then the bytes between two 32-bit alignments
    Blob,
    /// A vbr6 length followed by that many elements of the given encoding
    Array(ScalarOperand),
}

impl ScalarOperand {
    /// Decode a char6 value into its ASCII character.
    #[must_use]
    pub fn decode_char6(value: u64) -> Option<u8> {
        let value = u8::try_from(value).ok()?;
        match value {
            0..=25 => Some(value + b'a'),
            26..=51 => Some(value - 26 + b'A'),
            52..=61 => Some(value - 52 + b'0'),
            62 => Some(b'.'),
            63 => Some(b'_'),
            _ => None,
        }
    }
}

/// `BlockInfoCode` enumerates the records that may occur in the BLOCKINFO
/// block. Only `SetBid` matters for decoding; names are informational.
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum BlockInfoCode {
    /// `[blockid]`: later records describe this block id
    SetBid = 1,
    /// `[name chars]`
    BlockName = 2,
    /// `[record code, name chars]`
    SetRecordName = 3,
}

/// Abbreviation ids with a fixed meaning in every block.
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u64)]
pub enum BuiltinAbbreviationId {
    /// `END_BLOCK`
    EndBlock = 0,
    /// `ENTER_SUBBLOCK`: block id, abbreviation width, length in words
    EnterSubBlock = 1,
    /// `DEFINE_ABBREV`
    DefineAbbreviation = 2,
    /// `UNABBREV_RECORD`: vbr6 code, count and operands
    UnabbreviatedRecord = 3,
}

impl BuiltinAbbreviationId {
    /// First id available to application-defined abbreviations
    pub const FIRST_APPLICATION_ID: u64 = 4;
}
