//! A bitstream writer for building test bitcode in memory.
#![allow(dead_code)]

use bcinfo::bitcode::LLVM_BITCODE_WRAPPER_MAGIC;
use bcinfo::wrapper::{TAG_COMPILER_VERSION, TAG_OPTIMIZATION_LEVEL};

pub enum AbbrevOp {
    Literal(u64),
    Fixed(u8),
    Vbr(u8),
    Array,
    Char6,
    Blob,
}

#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit: usize,
    width: usize,
    /// (byte offset of the length word, enclosing abbreviation width)
    blocks: Vec<(usize, usize)>,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            width: 2,
            ..Default::default()
        }
    }

    /// A writer positioned after the `BC 0xC0DE` magic
    pub fn with_ir_magic() -> Self {
        let mut w = Self::new();
        for byte in [b'B', b'C', 0xC0, 0xDE] {
            w.emit(u64::from(byte), 8);
        }
        w
    }

    pub fn emit(&mut self, value: u64, width: usize) {
        for i in 0..width {
            if self.bit % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (self.bit % 8);
            }
            self.bit += 1;
        }
    }

    pub fn emit_vbr(&mut self, mut value: u64, width: usize) {
        let threshold = 1u64 << (width - 1);
        while value >= threshold {
            self.emit((value & (threshold - 1)) | threshold, width);
            value >>= width - 1;
        }
        self.emit(value, width);
    }

    pub fn align32(&mut self) {
        while self.bit % 32 != 0 {
            self.emit(0, 1);
        }
    }

    pub fn abbrev_id(&mut self, id: u64) {
        self.emit(id, self.width);
    }

    pub fn enter_block(&mut self, id: u64, width: usize) {
        self.abbrev_id(1);
        self.emit_vbr(id, 8);
        self.emit_vbr(width as u64, 4);
        self.align32();
        let at = self.bit / 8;
        self.emit(0, 32);
        self.blocks.push((at, self.width));
        self.width = width;
    }

    pub fn exit_block(&mut self) {
        self.abbrev_id(0);
        self.align32();
        let (at, outer) = self.blocks.pop().expect("no open block");
        let words = ((self.bit / 8 - (at + 4)) / 4) as u32;
        self.bytes[at..at + 4].copy_from_slice(&words.to_le_bytes());
        self.width = outer;
    }

    pub fn record(&mut self, code: u64, ops: &[u64]) {
        self.abbrev_id(3);
        self.emit_vbr(code, 6);
        self.emit_vbr(ops.len() as u64, 6);
        for &op in ops {
            self.emit_vbr(op, 6);
        }
    }

    pub fn string_record(&mut self, code: u64, s: &str) {
        let ops: Vec<u64> = s.bytes().map(u64::from).collect();
        self.record(code, &ops);
    }

    pub fn define_abbrev(&mut self, ops: &[AbbrevOp]) {
        self.abbrev_id(2);
        self.emit_vbr(ops.len() as u64, 5);
        for op in ops {
            match op {
                AbbrevOp::Literal(v) => {
                    self.emit(1, 1);
                    self.emit_vbr(*v, 8);
                }
                AbbrevOp::Fixed(w) => {
                    self.emit(0, 1);
                    self.emit(1, 3);
                    self.emit_vbr(u64::from(*w), 5);
                }
                AbbrevOp::Vbr(w) => {
                    self.emit(0, 1);
                    self.emit(2, 3);
                    self.emit_vbr(u64::from(*w), 5);
                }
                AbbrevOp::Array => {
                    self.emit(0, 1);
                    self.emit(3, 3);
                }
                AbbrevOp::Char6 => {
                    self.emit(0, 1);
                    self.emit(4, 3);
                }
                AbbrevOp::Blob => {
                    self.emit(0, 1);
                    self.emit(5, 3);
                }
            }
        }
    }

    pub fn blob(&mut self, data: &[u8]) {
        self.emit_vbr(data.len() as u64, 6);
        self.align32();
        for &byte in data {
            self.emit(u64::from(byte), 8);
        }
        self.align32();
    }

    pub fn finish(mut self) -> Vec<u8> {
        assert!(self.blocks.is_empty(), "unterminated block");
        self.align32();
        self.bytes
    }
}

const MODULE: u64 = 8;
const CONSTANTS: u64 = 11;
const FUNCTION: u64 = 12;
const IDENTIFICATION: u64 = 13;
const METADATA: u64 = 15;
const TYPE: u64 = 17;

const TY_I32: u64 = 0;
const TY_METADATA: u64 = 1;
const TY_VOID: u64 = 3;

enum Md {
    String(String),
    Int(usize),
    Node(Vec<Option<u64>>),
    Location,
}

/// Writes a module whose module-level metadata block holds exactly the
/// metadata added through this builder, surrounded by the usual blocks a
/// front end emits.
#[derive(Default)]
pub struct ModuleWriter {
    metadata: Vec<Md>,
    ints: Vec<i64>,
    named: Vec<(String, Vec<u64>)>,
    strings_blob: bool,
    old_nodes: bool,
}

/// Number of module values defined before the integer constants: one global
/// variable, one function and one float constant.
const VALUES_BEFORE_INTS: usize = 3;

impl ModuleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit leading strings as one `METADATA_STRINGS` record, the way
    /// current LLVM does. Strings must then be added before anything else.
    pub fn use_strings_blob(&mut self) -> &mut Self {
        self.strings_blob = true;
        self
    }

    /// Emit nodes as pre-3.6 `OLD_NODE` records of `(type, value)` pairs.
    /// Integer operands then name the constant directly.
    pub fn use_old_nodes(&mut self) -> &mut Self {
        self.old_nodes = true;
        self
    }

    pub fn string(&mut self, s: &str) -> u64 {
        if self.strings_blob {
            assert!(
                self.metadata.iter().all(|md| matches!(md, Md::String(_))),
                "strings must come first in blob mode"
            );
        }
        self.metadata.push(Md::String(s.to_string()));
        self.metadata.len() as u64 - 1
    }

    pub fn int(&mut self, v: i64) -> u64 {
        self.ints.push(v);
        self.metadata.push(Md::Int(self.ints.len() - 1));
        self.metadata.len() as u64 - 1
    }

    pub fn node(&mut self, ops: &[Option<u64>]) -> u64 {
        self.metadata.push(Md::Node(ops.to_vec()));
        self.metadata.len() as u64 - 1
    }

    /// A debug location, which takes an id but is not interpreted
    pub fn location(&mut self) -> u64 {
        self.metadata.push(Md::Location);
        self.metadata.len() as u64 - 1
    }

    pub fn named(&mut self, name: &str, nodes: &[u64]) -> &mut Self {
        self.named.push((name.to_string(), nodes.to_vec()));
        self
    }

    /// Named node whose entries are nodes of strings
    pub fn named_strings(&mut self, name: &str, entries: &[&[&str]]) -> &mut Self {
        let nodes: Vec<u64> = entries
            .iter()
            .map(|entry| {
                let ops: Vec<Option<u64>> = entry.iter().map(|s| Some(self.string(s))).collect();
                self.node(&ops)
            })
            .collect();
        self.named(name, &nodes)
    }

    pub fn write(&self) -> Vec<u8> {
        let mut w = BitWriter::with_ir_magic();

        w.enter_block(IDENTIFICATION, 5);
        w.string_record(1, "LLVM3.2");
        w.record(2, &[0]);
        w.exit_block();

        w.enter_block(MODULE, 3);
        w.record(1, &[2]);

        // BLOCKINFO: abbreviation 4 of every METADATA block is an 8-bit
        // array MDSTRING
        w.enter_block(0, 2);
        w.record(1, &[METADATA]);
        w.define_abbrev(&[AbbrevOp::Literal(1), AbbrevOp::Array, AbbrevOp::Fixed(8)]);
        w.exit_block();

        // types: 0 = i32, 1 = metadata, 2 = float, 3 = void
        w.enter_block(TYPE, 4);
        w.record(1, &[4]);
        w.record(7, &[32]);
        w.record(16, &[]);
        w.record(3, &[]);
        w.record(2, &[]);
        w.exit_block();

        // value 0: global variable, value 1: function
        w.record(7, &[0, 1, 0, 0, 0, 0]);
        w.record(8, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        w.enter_block(CONSTANTS, 4);
        w.record(1, &[2]);
        w.record(6, &[0x3f80_0000]);
        w.record(1, &[0]);
        for &v in &self.ints {
            if v == 0 {
                w.record(2, &[]);
            } else {
                w.record(4, &[encode_signed(v)]);
            }
        }
        w.exit_block();

        self.write_metadata(&mut w);

        // function-local metadata must be ignored
        w.enter_block(FUNCTION, 4);
        w.record(1, &[1]);
        w.enter_block(METADATA, 3);
        w.string_record(4, "#rs_export_var");
        w.record(10, &[99]);
        w.exit_block();
        w.exit_block();

        w.exit_block();
        w.finish()
    }

    fn write_metadata(&self, w: &mut BitWriter) {
        w.enter_block(METADATA, 4);
        // an old-style KIND record defines no id
        w.record(6, &[0, u64::from(b'd'), u64::from(b'b'), u64::from(b'g')]);

        let mut rest = &self.metadata[..];
        if self.strings_blob {
            let count = rest
                .iter()
                .take_while(|md| matches!(md, Md::String(_)))
                .count();
            let (strings, tail) = rest.split_at(count);
            rest = tail;
            if !strings.is_empty() {
                let mut lengths = BitWriter::new();
                let mut chars = Vec::new();
                for md in strings {
                    if let Md::String(s) = md {
                        lengths.emit_vbr(s.len() as u64, 6);
                        chars.extend_from_slice(s.as_bytes());
                    }
                }
                let mut blob = lengths.finish();
                let offset = blob.len() as u64;
                blob.extend_from_slice(&chars);

                w.define_abbrev(&[
                    AbbrevOp::Literal(35),
                    AbbrevOp::Vbr(6),
                    AbbrevOp::Vbr(6),
                    AbbrevOp::Blob,
                ]);
                // 4 comes from BLOCKINFO, so the local one is 5
                w.abbrev_id(5);
                w.emit_vbr(strings.len() as u64, 6);
                w.emit_vbr(offset, 6);
                w.blob(&blob);
            }
        }

        for md in rest {
            match md {
                Md::String(s) => {
                    w.abbrev_id(4);
                    w.emit_vbr(s.len() as u64, 6);
                    for byte in s.bytes() {
                        w.emit(u64::from(byte), 8);
                    }
                }
                Md::Int(index) => {
                    w.record(2, &[0, (VALUES_BEFORE_INTS + index) as u64]);
                }
                Md::Node(ops) if self.old_nodes => {
                    let pairs: Vec<u64> = ops
                        .iter()
                        .flat_map(|op| match op.map(|id| &self.metadata[id as usize]) {
                            None => [TY_VOID, 0],
                            Some(Md::Int(index)) => [TY_I32, (VALUES_BEFORE_INTS + index) as u64],
                            Some(_) => [TY_METADATA, op.unwrap_or_default()],
                        })
                        .collect();
                    w.record(8, &pairs);
                }
                Md::Node(ops) => {
                    let ops: Vec<u64> = ops.iter().map(|op| op.map_or(0, |id| id + 1)).collect();
                    w.record(3, &ops);
                }
                Md::Location => {
                    w.record(7, &[0, 1, 2, 0]);
                }
            }
        }

        for (name, nodes) in &self.named {
            w.string_record(4, name);
            w.record(10, nodes);
        }
        w.exit_block();
    }

    /// The module inside an Android bitcode wrapper
    pub fn write_wrapped(&self, compiler_version: u32, optimization_level: u32) -> Vec<u8> {
        wrap(&self.write(), compiler_version, optimization_level)
    }
}

pub fn encode_signed(v: i64) -> u64 {
    if v >= 0 {
        (v as u64) << 1
    } else {
        (v.unsigned_abs() << 1) | 1
    }
}

pub fn wrap(bitcode: &[u8], compiler_version: u32, optimization_level: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let offset: u32 = 7 * 4 + 2 * 8;
    for word in [
        LLVM_BITCODE_WRAPPER_MAGIC,
        0,
        offset,
        bitcode.len() as u32,
        0,
        21,
        0,
    ] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    for (tag, value) in [
        (TAG_COMPILER_VERSION, compiler_version),
        (TAG_OPTIMIZATION_LEVEL, optimization_level),
    ] {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.extend_from_slice(bitcode);
    out
}
