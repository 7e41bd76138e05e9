//! LLVM block ids and the record codes this crate interprets.
//!
//! Only the vocabulary needed to find module-level metadata is listed here.

use num_enum::TryFromPrimitive;

/// Enumeration of block identifiers in LLVM bitcode format.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum BlockId {
    /// `MODULE_BLOCK_ID`
    Module = 8,
    /// `PARAMATTR_BLOCK_ID`
    ParamAttr,
    /// `PARAMATTR_GROUP_BLOCK_ID`
    ParamAttrGroup,
    /// `CONSTANTS_BLOCK_ID`
    Constants,
    /// `FUNCTION_BLOCK_ID`
    Function,
    /// `IDENTIFICATION_BLOCK_ID`
    Identification,
    /// `VALUE_SYMTAB_BLOCK_ID`
    ValueSymtab,
    /// `METADATA_BLOCK_ID`
    Metadata,
    /// `METADATA_ATTACHMENT_ID`
    MetadataAttachment,
    /// `TYPE_BLOCK_ID_NEW`
    Type,
    /// `USELIST_BLOCK_ID`
    Uselist,
    /// `MODULE_STRTAB_BLOCK_ID`
    ModuleStrtab,
    /// `GLOBALVAL_SUMMARY_BLOCK_ID`
    GlobalvalSummary,
    /// `OPERAND_BUNDLE_TAGS_BLOCK_ID`
    OperandBundleTags,
    /// `METADATA_KIND_BLOCK_ID`
    MetadataKind,
    /// `STRTAB_BLOCK_ID`
    Strtab,
    /// `FULL_LTO_GLOBALVAL_SUMMARY_BLOCK_ID`
    FullLtoGlobalvalSummary,
    /// `SYMTAB_BLOCK_ID`
    Symtab,
    /// `SYNC_SCOPE_NAMES_BLOCK_ID`
    SyncScopeNames,
}

impl BlockId {
    #[must_use]
    pub fn from_raw(id: u64) -> Option<Self> {
        u8::try_from(id).ok().and_then(|id| Self::try_from(id).ok())
    }
}

/// `MODULE` block records that define global values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum ModuleCode {
    /// [version#]
    Version = 1,
    /// [strchr x N]
    Triple = 2,
    /// [pointer type, isconst, initid, linkage, alignment, section, visibility, threadlocal]
    GlobalVar = 7,
    /// [type, callingconv, isproto, linkage, paramattrs, alignment, section, visibility, gc, unnamed_addr]
    Function = 8,
    /// Obsolete. [alias type, aliasee val#, linkage, visibility]
    AliasOld = 9,
    /// [alias value type, addrspace, aliasee val#, linkage, visibility]
    Alias = 14,
    /// [ifunc value type, addrspace, resolver val#, linkage, visibility]
    Ifunc = 18,
}

impl ModuleCode {
    /// Whether a record with this code adds an entry to the module value list
    #[must_use]
    pub fn defines_value(self) -> bool {
        matches!(
            self,
            Self::GlobalVar | Self::Function | Self::AliasOld | Self::Alias | Self::Ifunc
        )
    }
}

/// `TYPE_BLOCK_ID_NEW` record codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum TypeCode {
    /// `NUMENTRY`: [numentries]
    NumEntry = 1,
    /// `VOID`
    Void = 2,
    /// `INTEGER`: [width]
    Integer = 7,
    /// `METADATA`
    Metadata = 16,
    /// `STRUCT_NAME`: [strchr x N]
    StructName = 19,
}

/// `CONSTANTS_BLOCK` record codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum ConstantsCode {
    /// `SETTYPE`: [typeid]
    SetType = 1,
    /// `NULL`
    Null = 2,
    /// `UNDEF`
    Undef = 3,
    /// `INTEGER`: [intval]
    Integer = 4,
    /// `WIDE_INTEGER`: [n x intval]
    WideInteger = 5,
}

/// `METADATA_BLOCK` record codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum MetadataCode {
    /// `MDSTRING`: [values]
    StringOld = 1,
    /// `VALUE`: [type num, value num]
    Value = 2,
    /// `NODE`: [n x md num]
    Node = 3,
    /// `NAME`: [values]
    Name = 4,
    /// `DISTINCT_NODE`: [n x md num]
    DistinctNode = 5,
    /// `KIND`: [n x [id, name]]
    Kind = 6,
    /// `LOCATION`: [distinct, line, col, scope, inlined-at?]
    Location = 7,
    /// `OLD_NODE`: [n x (type num, value num)]
    OldNode = 8,
    /// `OLD_FN_NODE`: [n x (type num, value num)]
    OldFnNode = 9,
    /// `NAMED_NODE`: [n x mdnodes]
    NamedNode = 10,
    /// `ATTACHMENT`: [m x [value, [n x [id, mdnode]]]
    Attachment = 11,
    /// `STRINGS`: [count, offset] blob([lengths][chars])
    Strings = 35,
    /// `GLOBAL_DECL_ATTACHMENT`: [valueid, n x [id, mdnode]]
    GlobalDeclAttachment = 36,
    /// `INDEX_OFFSET`: [offset]
    IndexOffset = 38,
    /// `INDEX`: [bitpos]
    Index = 39,
    /// `ARG_LIST`: [n x [type num, value num]]
    ArgList = 46,
}

/// Whether a module-level metadata record with this raw code defines the
/// next metadata id. Debug info records (`LOCATION`, `DI*`) all do; the
/// structural records listed in [`MetadataCode`] partly do not.
#[must_use]
pub fn metadata_record_defines_id(code: u64) -> bool {
    let known = u8::try_from(code)
        .ok()
        .and_then(|c| MetadataCode::try_from(c).ok());
    match known {
        Some(
            MetadataCode::Name
            | MetadataCode::Kind
            | MetadataCode::NamedNode
            | MetadataCode::Attachment
            | MetadataCode::Strings
            | MetadataCode::GlobalDeclAttachment
            | MetadataCode::IndexOffset
            | MetadataCode::Index,
        ) => false,
        Some(_) => true,
        // LOCATION..=ASSIGN_ID debug info records
        None => (12..=47).contains(&code),
    }
}
