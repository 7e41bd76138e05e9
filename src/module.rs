//! A read-only view of the module-level metadata of an LLVM bitcode module.
//!
//! Only what named-metadata lookups need is decoded: the module value list
//! (to resolve integer constants wrapped in metadata), the type table (to
//! recognise integer `null` constants and the `(type, value)` operands of
//! pre-3.6 nodes) and the module `METADATA_BLOCK`.
//! Function bodies are skipped without being decoded.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::bitcode::{Bitcode, LLVM_IR_MAGIC, Payload, Record, Signature};
use crate::bits::{self, Cursor};
use crate::read;
use crate::schema::{self, BlockId, ConstantsCode, MetadataCode, ModuleCode, TypeCode};
use crate::visitor::BitStreamVisitor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("empty bitcode buffer")]
    Empty,
    #[error("bitcode has no module block")]
    MissingModuleBlock,
    #[error("malformed `{code:?}` record")]
    MalformedRecord { code: MetadataCode },
    #[error("malformed metadata strings: {0}")]
    MalformedStrings(bits::Error),
    #[error("named metadata node without a preceding name")]
    NamedNodeWithoutName,
    #[error("metadata reference `{id}` out of range ({count} entries)")]
    InvalidReference { id: u64, count: usize },
    #[error(transparent)]
    Read(#[from] read::Error),
}

/// Index of an entry in the module metadata list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetadataId(u32);

impl MetadataId {
    /// Ids beyond `u32` saturate, so they fail the range check
    fn from_raw(id: u64) -> Self {
        Self(u32::try_from(id).unwrap_or(u32::MAX))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MetadataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Metadata {
    String(String),
    /// `ValueAsMetadata`, holding a module value id
    Value(u64),
    Node(Vec<Slot>),
    /// Anything this crate does not interpret (debug info, locations, ...)
    Other,
}

/// One operand slot of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Null,
    Metadata(MetadataId),
    /// A module value referenced directly, as old-style nodes do
    Value(u64),
}

impl From<Option<MetadataId>> for Slot {
    fn from(id: Option<MetadataId>) -> Self {
        id.map_or(Self::Null, Self::Metadata)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeKind {
    Integer,
    Metadata,
    Void,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Integer(i64),
    Other,
}

/// Module-level metadata of a bitcode module.
///
/// Immutable once built, so it can be shared freely between readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    metadata: Vec<Metadata>,
    values: Vec<Value>,
    named: HashMap<String, Vec<MetadataId>>,
}

/// A resolved metadata operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand<'m> {
    /// `MDString`
    String(&'m str),
    /// Integer constant wrapped in metadata
    Integer(i64),
    /// `MDNode`
    Node(Node<'m>),
    /// A null operand slot
    Null,
    /// Any other kind of metadata
    Other,
}

impl<'m> Operand<'m> {
    #[must_use]
    pub fn as_str(&self) -> Option<&'m str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_node(&self) -> Option<Node<'m>> {
        match self {
            Self::Node(node) => Some(*node),
            _ => None,
        }
    }

    /// Short name of the operand kind, for diagnostics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Node(_) => "node",
            Self::Null => "null",
            Self::Other => "other",
        }
    }
}

/// An `MDNode` and its operands
#[derive(Clone, Copy)]
pub struct Node<'m> {
    module: &'m Module,
    operands: &'m [Slot],
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.module, other.module) && self.operands == other.operands
    }
}

impl Eq for Node<'_> {}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.operands.iter()).finish()
    }
}

impl<'m> Node<'m> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.operands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    #[must_use]
    pub fn operand(&self, index: usize) -> Option<Operand<'m>> {
        self.operands
            .get(index)
            .map(|&slot| self.module.resolve_slot(slot))
    }

    pub fn operands(&self) -> impl Iterator<Item = Operand<'m>> + use<'m> {
        let module = self.module;
        self.operands
            .iter()
            .map(move |&slot| module.resolve_slot(slot))
    }
}

/// A named metadata node such as `!#pragma = !{!0, !1}`
#[derive(Debug, Clone, Copy)]
pub struct NamedMetadata<'m> {
    module: &'m Module,
    name: &'m str,
    operands: &'m [MetadataId],
}

impl<'m> NamedMetadata<'m> {
    #[must_use]
    pub fn name(&self) -> &'m str {
        self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    #[must_use]
    pub fn operand(&self, index: usize) -> Option<Operand<'m>> {
        self.operands
            .get(index)
            .map(|&id| self.module.resolve(Some(id)))
    }

    pub fn operands(&self) -> impl Iterator<Item = Operand<'m>> + use<'m> {
        let module = self.module;
        self.operands
            .iter()
            .map(move |&id| module.resolve(Some(id)))
    }
}

impl Module {
    /// An empty module, to be filled with the `add_*` methods
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw or wrapped bitcode
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::Empty);
        }
        let bitcode = Bitcode::parse(data)?;
        let mut builder = ModuleBuilder::default();
        bitcode.read(&mut builder)?;
        builder.finish()
    }

    /// Look up a named metadata node
    #[must_use]
    pub fn named_metadata(&self, name: &str) -> Option<NamedMetadata<'_>> {
        self.named
            .get_key_value(name)
            .map(|(name, operands)| NamedMetadata {
                module: self,
                name,
                operands,
            })
    }

    /// Names of all named metadata nodes, sorted
    #[must_use]
    pub fn named_metadata_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of metadata entries
    #[must_use]
    pub fn metadata_count(&self) -> usize {
        self.metadata.len()
    }

    fn push_metadata(&mut self, metadata: Metadata) -> MetadataId {
        let id = MetadataId(self.metadata.len() as u32);
        self.metadata.push(metadata);
        id
    }

    pub fn add_string(&mut self, s: impl Into<String>) -> MetadataId {
        self.push_metadata(Metadata::String(s.into()))
    }

    /// Add an integer constant and the metadata wrapping it
    pub fn add_integer(&mut self, value: i64) -> MetadataId {
        let value_id = self.values.len() as u64;
        self.values.push(Value::Integer(value));
        self.push_metadata(Metadata::Value(value_id))
    }

    /// Add a node; `None` operands are null slots
    pub fn add_node<I>(&mut self, operands: I) -> MetadataId
    where
        I: IntoIterator<Item = Option<MetadataId>>,
    {
        let operands = operands.into_iter().map(Slot::from).collect();
        self.push_metadata(Metadata::Node(operands))
    }

    /// Add (or extend) a named metadata node
    pub fn add_named_metadata<I>(&mut self, name: impl Into<String>, operands: I)
    where
        I: IntoIterator<Item = MetadataId>,
    {
        self.named.entry(name.into()).or_default().extend(operands);
    }

    fn resolve(&self, id: Option<MetadataId>) -> Operand<'_> {
        let Some(id) = id else {
            return Operand::Null;
        };
        match self.metadata.get(id.index()) {
            Some(Metadata::String(s)) => Operand::String(s),
            Some(Metadata::Value(value_id)) => self.resolve_value(*value_id),
            Some(Metadata::Node(operands)) => Operand::Node(Node {
                module: self,
                operands,
            }),
            Some(Metadata::Other) | None => Operand::Other,
        }
    }

    fn resolve_slot(&self, slot: Slot) -> Operand<'_> {
        match slot {
            Slot::Null => Operand::Null,
            Slot::Metadata(id) => self.resolve(Some(id)),
            Slot::Value(value_id) => self.resolve_value(value_id),
        }
    }

    fn resolve_value(&self, value_id: u64) -> Operand<'_> {
        match usize::try_from(value_id).ok().and_then(|i| self.values.get(i)) {
            Some(Value::Integer(v)) => Operand::Integer(*v),
            Some(Value::Other) | None => Operand::Other,
        }
    }
}

/// Decode a sign-rotated integer: the sign lives in the lowest bit.
fn decode_signed(value: u64) -> i64 {
    if value & 1 == 0 {
        (value >> 1) as i64
    } else if value != 1 {
        -((value >> 1) as i64)
    } else {
        i64::MIN
    }
}

/// `METADATA_STRINGS`: `count` vbr6 lengths in a bitstream, followed at
/// `offset` by the concatenated characters.
fn decode_strings(count: u64, offset: u64, blob: &[u8]) -> Result<Vec<String>, bits::Error> {
    let offset = usize::try_from(offset).map_err(|_| bits::Error::BufferOverflow)?;
    let lengths = blob.get(..offset).ok_or(bits::Error::BufferOverflow)?;
    let mut chars = blob.get(offset..).ok_or(bits::Error::BufferOverflow)?;
    let mut cursor = Cursor::new(lengths);
    let mut strings = Vec::with_capacity((count as usize).min(4096));
    for _ in 0..count {
        let len = cursor.read_vbr(6)? as usize;
        if len > chars.len() {
            return Err(bits::Error::BufferOverflow);
        }
        let (s, rest) = chars.split_at(len);
        strings.push(String::from_utf8_lossy(s).into_owned());
        chars = rest;
    }
    Ok(strings)
}

/// Builds a [`Module`] while the bitstream is walked
#[derive(Debug, Default)]
struct ModuleBuilder {
    module: Module,
    stack: Vec<BlockId>,
    seen_module: bool,
    types: Vec<TypeKind>,
    current_type: Option<u64>,
    pending_name: Option<String>,
    error: Option<Error>,
}

impl ModuleBuilder {
    fn finish(self) -> Result<Module, Error> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.seen_module {
            return Err(Error::MissingModuleBlock);
        }
        let module = self.module;
        let count = module.metadata.len();
        let node_refs = module
            .metadata
            .iter()
            .filter_map(|md| match md {
                Metadata::Node(operands) => Some(operands),
                _ => None,
            })
            .flatten()
            .filter_map(|slot| match slot {
                Slot::Metadata(id) => Some(*id),
                Slot::Null | Slot::Value(_) => None,
            });
        let named_refs = module.named.values().flatten().copied();
        for id in node_refs.chain(named_refs) {
            if id.index() >= count {
                return Err(Error::InvalidReference {
                    id: u64::from(id.0),
                    count,
                });
            }
        }
        debug!(
            metadata = count,
            values = module.values.len(),
            named = module.named.len(),
            "parsed module metadata"
        );
        Ok(module)
    }

    fn visit_module(&mut self, record: &Record) {
        let code = u8::try_from(record.id)
            .ok()
            .and_then(|c| ModuleCode::try_from(c).ok());
        if code.is_some_and(ModuleCode::defines_value) {
            self.module.values.push(Value::Other);
        }
    }

    fn visit_type(&mut self, record: &Record) {
        let code = u8::try_from(record.id)
            .ok()
            .and_then(|c| TypeCode::try_from(c).ok());
        match code {
            Some(TypeCode::NumEntry | TypeCode::StructName) => {}
            Some(TypeCode::Integer) => self.types.push(TypeKind::Integer),
            Some(TypeCode::Metadata) => self.types.push(TypeKind::Metadata),
            Some(TypeCode::Void) => self.types.push(TypeKind::Void),
            _ => self.types.push(TypeKind::Other),
        }
    }

    fn visit_constant(&mut self, record: &Record) {
        let code = u8::try_from(record.id)
            .ok()
            .and_then(|c| ConstantsCode::try_from(c).ok());
        let operands = record.operands();
        let value = match code {
            Some(ConstantsCode::SetType) => {
                self.current_type = operands.first().copied();
                return;
            }
            Some(ConstantsCode::Integer) => match operands.first() {
                Some(&raw) => Value::Integer(decode_signed(raw)),
                None => Value::Other,
            },
            Some(ConstantsCode::Null) if self.current_type_is_integer() => Value::Integer(0),
            _ => Value::Other,
        };
        self.module.values.push(value);
    }

    fn current_type_is_integer(&self) -> bool {
        self.current_type
            .is_some_and(|ty| self.type_kind(ty) == TypeKind::Integer)
    }

    fn type_kind(&self, ty: u64) -> TypeKind {
        usize::try_from(ty)
            .ok()
            .and_then(|ty| self.types.get(ty))
            .copied()
            .unwrap_or(TypeKind::Other)
    }

    /// `OLD_NODE` operands are `(type, value)` pairs. A metadata type makes
    /// the value a metadata id, `void` a null slot.
    fn old_node_slots(&self, operands: &[u64]) -> Option<Vec<Slot>> {
        if operands.len() % 2 != 0 {
            return None;
        }
        let slots = operands
            .chunks_exact(2)
            .map(|pair| match self.type_kind(pair[0]) {
                TypeKind::Metadata => Slot::Metadata(MetadataId::from_raw(pair[1])),
                TypeKind::Void => Slot::Null,
                TypeKind::Integer | TypeKind::Other => Slot::Value(pair[1]),
            })
            .collect();
        Some(slots)
    }

    fn visit_metadata(&mut self, mut record: Record) -> Result<(), Error> {
        let Some(code) = u8::try_from(record.id)
            .ok()
            .and_then(|c| MetadataCode::try_from(c).ok())
        else {
            if schema::metadata_record_defines_id(record.id) {
                self.module.push_metadata(Metadata::Other);
            }
            return Ok(());
        };
        match code {
            MetadataCode::StringOld => {
                self.module.push_metadata(Metadata::String(record.string(0)));
            }
            MetadataCode::Strings => {
                let &[count, offset, ..] = record.fields() else {
                    return Err(Error::MalformedRecord { code });
                };
                let Some(Payload::Blob(blob)) = record.take_payload() else {
                    return Err(Error::MalformedRecord { code });
                };
                let strings =
                    decode_strings(count, offset, &blob).map_err(Error::MalformedStrings)?;
                for s in strings {
                    self.module.push_metadata(Metadata::String(s));
                }
            }
            MetadataCode::Value => {
                let &[_ty, value] = record.operands().as_slice() else {
                    return Err(Error::MalformedRecord { code });
                };
                self.module.push_metadata(Metadata::Value(value));
            }
            MetadataCode::Node | MetadataCode::DistinctNode => {
                let operands = record
                    .operands()
                    .into_iter()
                    .map(|op| Slot::from(op.checked_sub(1).map(MetadataId::from_raw)))
                    .collect();
                self.module.push_metadata(Metadata::Node(operands));
            }
            MetadataCode::OldNode => {
                let slots = self
                    .old_node_slots(&record.operands())
                    .ok_or(Error::MalformedRecord { code })?;
                self.module.push_metadata(Metadata::Node(slots));
            }
            MetadataCode::Name => {
                self.pending_name = Some(record.string(0));
            }
            MetadataCode::NamedNode => {
                let name = self
                    .pending_name
                    .take()
                    .ok_or(Error::NamedNodeWithoutName)?;
                let operands = record
                    .operands()
                    .into_iter()
                    .map(MetadataId::from_raw);
                trace!(%name, "named metadata");
                self.module.add_named_metadata(name, operands);
            }
            _ => {
                if schema::metadata_record_defines_id(record.id) {
                    self.module.push_metadata(Metadata::Other);
                }
            }
        }
        Ok(())
    }
}

impl BitStreamVisitor for ModuleBuilder {
    fn validate(&self, signature: Signature) -> bool {
        signature.stream_magic() == LLVM_IR_MAGIC
    }

    fn should_enter_block(&mut self, id: u64) -> bool {
        let Some(block) = BlockId::from_raw(id) else {
            return false;
        };
        let enter = match (self.stack.last().copied(), block) {
            (None, BlockId::Module) => !self.seen_module,
            (Some(BlockId::Module), BlockId::Type | BlockId::Constants | BlockId::Metadata) => {
                true
            }
            _ => false,
        };
        if enter {
            trace!(?block, "entering block");
            if block == BlockId::Module {
                self.seen_module = true;
            }
            self.stack.push(block);
        }
        enter
    }

    fn did_exit_block(&mut self, _id: u64) {
        self.stack.pop();
    }

    fn visit(&mut self, _block_id: u64, record: Record) {
        if self.error.is_some() {
            return;
        }
        match self.stack.last().copied() {
            Some(BlockId::Module) => self.visit_module(&record),
            Some(BlockId::Type) => self.visit_type(&record),
            Some(BlockId::Constants) => self.visit_constant(&record),
            Some(BlockId::Metadata) => {
                if let Err(err) = self.visit_metadata(record) {
                    self.error = Some(err);
                }
            }
            _ => {}
        }
    }
}
