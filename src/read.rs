use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::bitcode::{Payload, Record};
use crate::bits::{self, Cursor};
use crate::bitstream::{
    Abbreviation, BlockInfoCode, BuiltinAbbreviationId, PayloadOperand, ScalarOperand,
};
use crate::visitor::BitStreamVisitor;

/// Bitstream reader errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid signature (magic number): 0x{0:x}")]
    InvalidSignature(u32),
    #[error("invalid abbreviation")]
    InvalidAbbrev,
    #[error("nested block in block info")]
    NestedBlockInBlockInfo,
    #[error("missing SETBID")]
    MissingSetBid,
    #[error("invalid block info record `{0}`")]
    InvalidBlockInfoRecord(u64),
    #[error("abbreviation width `{0}` is invalid")]
    InvalidAbbrevWidth(u64),
    #[error("no such abbreviation `{abbrev_id}` in block `{block_id}`")]
    NoSuchAbbrev { block_id: u64, abbrev_id: u64 },
    #[error("missing end block for `{0}`")]
    MissingEndBlock(u64),
    #[error("block `{0}` nested too deeply")]
    NestingTooDeep(u64),
    #[error(transparent)]
    ReadBits(#[from] bits::Error),
}

/// Bitstream reader
///
/// Holds the abbreviations registered through BLOCKINFO, which apply to every
/// later block with the given id.
#[derive(Debug, Clone, Default)]
pub struct BitStreamReader {
    block_info_abbrevs: HashMap<u64, Vec<Abbreviation>>,
}

impl BitStreamReader {
    /// Top level fake block ID
    pub const TOP_LEVEL_BLOCK_ID: u64 = u64::MAX;

    /// LLVM itself refuses far shallower streams; this only bounds recursion.
    const MAX_DEPTH: usize = 64;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_scalar_operand(cursor: &mut Cursor<'_>) -> Result<ScalarOperand, Error> {
        let is_literal = cursor.read(1)?;
        if is_literal == 1 {
            return Ok(ScalarOperand::Literal(cursor.read_vbr(8)?));
        }
        let op = match cursor.read(3)? {
            1 => ScalarOperand::Fixed(Self::operand_width(cursor.read_vbr(5)?)?),
            2 => ScalarOperand::Vbr(Self::operand_width(cursor.read_vbr(5)?)?),
            4 => ScalarOperand::Char6,
            _ => return Err(Error::InvalidAbbrev),
        };
        Ok(op)
    }

    fn operand_width(width: u64) -> Result<u8, Error> {
        u8::try_from(width)
            .ok()
            .filter(|&w| w <= 64)
            .ok_or(Error::InvalidAbbrev)
    }

    /// Read an abbreviation definition
    pub fn read_abbrev(cursor: &mut Cursor<'_>, num_ops: usize) -> Result<Abbreviation, Error> {
        if num_ops == 0 {
            return Err(Error::InvalidAbbrev);
        }
        let mut fields = Vec::with_capacity(num_ops);
        let mut payload = None;
        let mut i = 0;
        while i < num_ops {
            let is_literal = cursor.peek(1)? == 1;
            if !is_literal {
                let kind = cursor.peek(4)? >> 1;
                match kind {
                    3 => {
                        // array element type is the next operand, and must be last
                        cursor.read(4)?;
                        if i + 2 != num_ops || fields.is_empty() {
                            return Err(Error::InvalidAbbrev);
                        }
                        payload = Some(PayloadOperand::Array(Self::read_scalar_operand(cursor)?));
                        break;
                    }
                    5 => {
                        cursor.read(4)?;
                        if i + 1 != num_ops || fields.is_empty() {
                            return Err(Error::InvalidAbbrev);
                        }
                        payload = Some(PayloadOperand::Blob);
                        break;
                    }
                    _ => {}
                }
            }
            fields.push(Self::read_scalar_operand(cursor)?);
            i += 1;
        }
        Ok(Abbreviation { fields, payload })
    }

    fn read_single_abbreviated_record_operand(
        cursor: &mut Cursor<'_>,
        operand: ScalarOperand,
    ) -> Result<u64, Error> {
        match operand {
            ScalarOperand::Char6 => {
                let value = cursor.read(6)?;
                ScalarOperand::decode_char6(value)
                    .map(u64::from)
                    .ok_or(Error::InvalidAbbrev)
            }
            ScalarOperand::Literal(value) => Ok(value),
            ScalarOperand::Fixed(width) => Ok(cursor.read(width as usize)?),
            ScalarOperand::Vbr(width) => Ok(cursor.read_vbr(width as usize)?),
        }
    }

    /// Read abbreviated data record
    pub fn read_abbreviated_record(
        cursor: &mut Cursor<'_>,
        abbrev: &Abbreviation,
    ) -> Result<Record, Error> {
        let (code_op, rest) = abbrev.fields.split_first().ok_or(Error::InvalidAbbrev)?;
        let code = Self::read_single_abbreviated_record_operand(cursor, *code_op)?;
        let mut fields = Vec::with_capacity(rest.len());
        for op in rest {
            fields.push(Self::read_single_abbreviated_record_operand(cursor, *op)?);
        }
        let payload = match abbrev.payload {
            Some(PayloadOperand::Array(ScalarOperand::Char6)) => {
                let length = cursor.read_vbr(6)? as usize;
                let mut s = String::with_capacity(length.min(4096));
                for _ in 0..length {
                    let c = Self::read_single_abbreviated_record_operand(
                        cursor,
                        ScalarOperand::Char6,
                    )?;
                    s.push(char::from(c as u8));
                }
                Some(Payload::Char6String(s))
            }
            Some(PayloadOperand::Array(element)) => {
                let length = cursor.read_vbr(6)? as usize;
                let mut elements = Vec::with_capacity(length.min(4096));
                for _ in 0..length {
                    elements.push(Self::read_single_abbreviated_record_operand(cursor, element)?);
                }
                Some(Payload::Array(elements))
            }
            Some(PayloadOperand::Blob) => {
                let length = cursor.read_vbr(6)? as usize;
                cursor.align(32)?;
                let data = cursor.read_bytes(length)?.to_vec();
                cursor.align(32)?;
                Some(Payload::Blob(data))
            }
            None => None,
        };
        Ok(Record::new(code, fields, payload))
    }

    fn read_unabbreviated_record(cursor: &mut Cursor<'_>) -> Result<Record, Error> {
        let code = cursor.read_vbr(6)?;
        let num_ops = cursor.read_vbr(6)? as usize;
        let mut operands = Vec::with_capacity(num_ops.min(4096));
        for _ in 0..num_ops {
            operands.push(cursor.read_vbr(6)?);
        }
        Ok(Record::new(code, operands, None))
    }

    /// Read block info block
    pub fn read_block_info_block(
        &mut self,
        cursor: &mut Cursor<'_>,
        abbrev_width: usize,
    ) -> Result<(), Error> {
        use BuiltinAbbreviationId::*;

        let mut current_block_id = None;
        loop {
            let abbrev_id = cursor.read(abbrev_width)?;
            match BuiltinAbbreviationId::try_from(abbrev_id).map_err(|_| Error::NoSuchAbbrev {
                block_id: 0,
                abbrev_id,
            })? {
                EndBlock => {
                    cursor.align(32)?;
                    return Ok(());
                }
                EnterSubBlock => {
                    return Err(Error::NestedBlockInBlockInfo);
                }
                DefineAbbreviation => {
                    let block_id = current_block_id.ok_or(Error::MissingSetBid)?;
                    let num_ops = cursor.read_vbr(5)? as usize;
                    let abbrev = Self::read_abbrev(cursor, num_ops)?;
                    self.block_info_abbrevs
                        .entry(block_id)
                        .or_default()
                        .push(abbrev);
                }
                UnabbreviatedRecord => {
                    let record = Self::read_unabbreviated_record(cursor)?;
                    let code = record.id;
                    let kind = u8::try_from(code)
                        .ok()
                        .and_then(|c| BlockInfoCode::try_from(c).ok())
                        .ok_or(Error::InvalidBlockInfoRecord(code))?;
                    match kind {
                        BlockInfoCode::SetBid => {
                            let [block_id] = record.fields() else {
                                return Err(Error::InvalidBlockInfoRecord(code));
                            };
                            current_block_id = Some(*block_id);
                        }
                        BlockInfoCode::BlockName | BlockInfoCode::SetRecordName => {
                            if current_block_id.is_none() {
                                return Err(Error::MissingSetBid);
                            }
                            trace!(block_id = ?current_block_id, name = %record.string(0), "block info name");
                        }
                    }
                }
            }
        }
    }

    /// Read block with visitor
    pub fn read_block<V: BitStreamVisitor>(
        &mut self,
        cursor: &mut Cursor<'_>,
        id: u64,
        abbrev_width: usize,
        visitor: &mut V,
    ) -> Result<(), Error> {
        self.read_block_at_depth(cursor, id, abbrev_width, visitor, 0)
    }

    fn read_block_at_depth<V: BitStreamVisitor>(
        &mut self,
        cursor: &mut Cursor<'_>,
        id: u64,
        abbrev_width: usize,
        visitor: &mut V,
        depth: usize,
    ) -> Result<(), Error> {
        use BuiltinAbbreviationId::*;

        if depth > Self::MAX_DEPTH {
            return Err(Error::NestingTooDeep(id));
        }
        // BLOCKINFO abbreviations first, then the ones local to this block
        let mut abbrevs = self
            .block_info_abbrevs
            .get(&id)
            .cloned()
            .unwrap_or_default();

        while id != Self::TOP_LEVEL_BLOCK_ID || !cursor.is_at_end() {
            let abbrev_id = cursor.read(abbrev_width).map_err(|err| match err {
                bits::Error::BufferOverflow => Error::MissingEndBlock(id),
                err => Error::ReadBits(err),
            })?;
            match BuiltinAbbreviationId::try_from(abbrev_id) {
                Ok(EndBlock) => {
                    if id == Self::TOP_LEVEL_BLOCK_ID {
                        return Err(Error::NoSuchAbbrev {
                            block_id: id,
                            abbrev_id,
                        });
                    }
                    cursor.align(32)?;
                    visitor.did_exit_block(id);
                    return Ok(());
                }
                Ok(EnterSubBlock) => {
                    let block_id = cursor.read_vbr(8)?;
                    let new_abbrev_width = cursor.read_vbr(4)?;
                    if !(1..=32).contains(&new_abbrev_width) {
                        return Err(Error::InvalidAbbrevWidth(new_abbrev_width));
                    }
                    let new_abbrev_width = new_abbrev_width as usize;
                    cursor.align(32)?;
                    let block_length = cursor.read(32)? as usize * 4;
                    if block_id == 0 {
                        self.read_block_info_block(cursor, new_abbrev_width)?;
                        continue;
                    }
                    if !visitor.should_enter_block(block_id) {
                        cursor.skip_bytes(block_length)?;
                        continue;
                    }
                    self.read_block_at_depth(cursor, block_id, new_abbrev_width, visitor, depth + 1)?;
                }
                Ok(DefineAbbreviation) => {
                    let num_ops = cursor.read_vbr(5)? as usize;
                    abbrevs.push(Self::read_abbrev(cursor, num_ops)?);
                }
                Ok(UnabbreviatedRecord) => {
                    visitor.visit(id, Self::read_unabbreviated_record(cursor)?);
                }
                Err(_) => {
                    let index = (abbrev_id - BuiltinAbbreviationId::FIRST_APPLICATION_ID) as usize;
                    let abbrev = abbrevs.get(index).ok_or(Error::NoSuchAbbrev {
                        block_id: id,
                        abbrev_id,
                    })?;
                    visitor.visit(id, Self::read_abbreviated_record(cursor, abbrev)?);
                }
            }
        }
        Ok(())
    }
}
