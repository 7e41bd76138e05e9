use crate::bitcode::{Record, Signature};

/// Receives the blocks and records of a bitstream as
/// [`Bitcode::read`](crate::Bitcode::read) walks it.
///
/// BLOCKINFO is consumed by the reader and never reported.
pub trait BitStreamVisitor {
    /// Accept or reject the stream before any block is read.
    fn validate(&self, _signature: Signature) -> bool {
        true
    }
    /// `false` skips block `id` and everything nested in it.
    fn should_enter_block(&mut self, id: u64) -> bool;
    /// Block `id` was entered and has ended.
    fn did_exit_block(&mut self, id: u64);
    /// A record read directly inside block `block_id`.
    fn visit(&mut self, block_id: u64, record: Record);
}
