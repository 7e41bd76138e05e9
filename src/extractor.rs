//! Extraction of the RenderScript metadata that `llvm-rs-cc` attaches to a
//! compiled script.
//!
//! The compiler front end describes a script's reflected surface with named
//! metadata nodes. [`MetadataExtractor`] walks those nodes once and keeps the
//! result in ordered tables:
//!
//! ```text
//! !#rs_export_var          = !{!{!"name", !"type"}, ...}
//! !#rs_export_func         = !{!{!"name"}, ...}
//! !#rs_export_foreach_name = !{!{!"root"}, ...}
//! !#rs_export_foreach      = !{!{!"35"}, ...}      ; signature bits
//! !#pragma                 = !{!{!"key", !"value"}, ...}
//! !#rs_object_slots        = !{!{!"3"}, ...}
//! ```

use std::borrow::Cow;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::ExtractorConfig;
use crate::module::{self, Module, NamedMetadata, Operand};
use crate::signature::ForEachSignature;
use crate::wrapper::AndroidWrapper;

/// Names of the named metadata nodes shared with the compiler front end
pub mod names {
    pub const EXPORT_VAR: &str = "#rs_export_var";
    pub const EXPORT_FUNC: &str = "#rs_export_func";
    pub const EXPORT_FOREACH_NAME: &str = "#rs_export_foreach_name";
    pub const EXPORT_FOREACH: &str = "#rs_export_foreach";
    pub const PRAGMA: &str = "#pragma";
    pub const OBJECT_SLOTS: &str = "#rs_object_slots";
    pub const THREADABLE: &str = "#rs_is_threadable";
    pub const BUILD_CHECKSUM: &str = "#rs_build_checksum";
    pub const DEBUG_INFO: &str = "llvm.dbg.cu";
}

/// Pragmas selecting the floating point precision of a script
pub mod pragmas {
    pub const FP_FULL: &str = "rs_fp_full";
    pub const FP_RELAXED: &str = "rs_fp_relaxed";
    pub const FP_IMPRECISE: &str = "rs_fp_imprecise";
}

/// Name of the kernel assumed when signatures come without names
pub const ROOT_KERNEL_NAME: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("could not parse bitcode: {0}")]
    Parse(#[from] module::Error),
    #[error("{names} ForEach names but {signatures} ForEach signatures")]
    ForEachCountMismatch { names: usize, signatures: usize },
    #[error("entry {index} of `{node}` is not a string ({found})")]
    ExpectedString {
        node: &'static str,
        index: usize,
        found: &'static str,
    },
    #[error("entry {index} of `{node}` is not an integer ({found})")]
    ExpectedInteger {
        node: &'static str,
        index: usize,
        found: String,
    },
    #[error("entry {index} of `{node}` does not fit 32 bits: {value}")]
    IntegerOutOfRange {
        node: &'static str,
        index: usize,
        value: i64,
    },
    #[error("pragma {index} is not a key/value pair of strings")]
    MalformedPragma { index: usize },
}

/// Minimal floating point precision a script requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum FloatPrecision {
    #[default]
    Full = 0,
    Relaxed = 1,
    Imprecise = 2,
}

impl FloatPrecision {
    fn from_pragma(key: &str) -> Option<Self> {
        match key {
            pragmas::FP_FULL => Some(Self::Full),
            pragmas::FP_RELAXED => Some(Self::Relaxed),
            pragmas::FP_IMPRECISE => Some(Self::Imprecise),
            _ => None,
        }
    }
}

/// An exported ForEach kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForEachKernel {
    pub name: String,
    pub signature: ForEachSignature,
}

/// A `#pragma rs key(value)` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pragma {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
enum Source<'m> {
    Bitcode(Cow<'m, [u8]>),
    Module(&'m Module),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tables {
    export_vars: Vec<String>,
    export_funcs: Vec<String>,
    export_for_each: Vec<ForEachKernel>,
    pragmas: Vec<Pragma>,
    object_slots: Vec<u32>,
    compiler_version: u32,
    optimization_level: u32,
    float_precision: FloatPrecision,
    threadable: bool,
    build_checksum: Option<String>,
    debug_info: bool,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            export_vars: Vec::new(),
            export_funcs: Vec::new(),
            export_for_each: Vec::new(),
            pragmas: Vec::new(),
            object_slots: Vec::new(),
            compiler_version: 0,
            optimization_level: 0,
            float_precision: FloatPrecision::Full,
            threadable: true,
            build_checksum: None,
            debug_info: false,
        }
    }
}

/// Reads the RenderScript metadata of a bitcode module.
///
/// Accessors return empty tables until [`extract`](Self::extract) succeeds.
#[derive(Debug, Clone)]
pub struct MetadataExtractor<'m> {
    source: Source<'m>,
    config: ExtractorConfig,
    tables: Tables,
}

impl<'m> MetadataExtractor<'m> {
    /// Reads metadata from raw or wrapped bitcode, parsed on `extract`.
    pub fn from_bitcode(bitcode: impl Into<Cow<'m, [u8]>>) -> Self {
        Self::with_source(Source::Bitcode(bitcode.into()))
    }

    /// Reads metadata from an already-parsed module.
    #[must_use]
    pub fn from_module(module: &'m Module) -> Self {
        Self::with_source(Source::Module(module))
    }

    fn with_source(source: Source<'m>) -> Self {
        Self {
            source,
            config: ExtractorConfig::default(),
            tables: Tables::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract the metadata.
    ///
    /// Replaces the result of any earlier call. On error every table is left
    /// empty.
    pub fn extract(&mut self) -> Result<(), ExtractError> {
        self.tables = Tables::default();
        match self.collect() {
            Ok(tables) => {
                self.tables = tables;
                Ok(())
            }
            Err(err) => {
                error!(%err, "could not extract RenderScript metadata");
                Err(err)
            }
        }
    }

    fn collect(&self) -> Result<Tables, ExtractError> {
        match &self.source {
            Source::Bitcode(bitcode) => {
                let module = Module::parse(bitcode)?;
                let (compiler_version, optimization_level) = AndroidWrapper::parse(bitcode)
                    .map(|w| (w.compiler_version, w.optimization_level))
                    .unwrap_or_default();
                self.populate(&module, compiler_version, optimization_level)
            }
            Source::Module(module) => self.populate(
                module,
                self.config.module_compiler_version,
                self.config.module_optimization_level,
            ),
        }
    }

    fn populate(
        &self,
        module: &Module,
        compiler_version: u32,
        optimization_level: u32,
    ) -> Result<Tables, ExtractError> {
        let export_vars = name_list(module, names::EXPORT_VAR)?;
        let export_funcs = name_list(module, names::EXPORT_FUNC)?;
        let export_for_each = self.for_each_kernels(module, compiler_version)?;
        let pragmas = pragma_list(module)?;
        let object_slots = integer_list(module, names::OBJECT_SLOTS)?;

        let float_precision = pragmas
            .iter()
            .rev()
            .find_map(|p| FloatPrecision::from_pragma(&p.key))
            .unwrap_or_default();
        let threadable = first_string(module, names::THREADABLE) != Some("no");
        let build_checksum = first_string(module, names::BUILD_CHECKSUM).map(str::to_owned);
        let debug_info = module.named_metadata(names::DEBUG_INFO).is_some();

        debug!(
            vars = export_vars.len(),
            funcs = export_funcs.len(),
            kernels = export_for_each.len(),
            pragmas = pragmas.len(),
            object_slots = object_slots.len(),
            compiler_version,
            optimization_level,
            "extracted RenderScript metadata"
        );
        Ok(Tables {
            export_vars,
            export_funcs,
            export_for_each,
            pragmas,
            object_slots,
            compiler_version,
            optimization_level,
            float_precision,
            threadable,
            build_checksum,
            debug_info,
        })
    }

    fn for_each_kernels(
        &self,
        module: &Module,
        compiler_version: u32,
    ) -> Result<Vec<ForEachKernel>, ExtractError> {
        let has_names = module.named_metadata(names::EXPORT_FOREACH_NAME).is_some();
        let has_signatures = module.named_metadata(names::EXPORT_FOREACH).is_some();
        if !has_names && !has_signatures {
            if self.config.legacy_root_kernel && compiler_version == 0 {
                warn!("no ForEach metadata in legacy bitcode, assuming `root`");
                return Ok(vec![ForEachKernel {
                    name: ROOT_KERNEL_NAME.to_owned(),
                    signature: ForEachSignature::LEGACY_ROOT,
                }]);
            }
            return Ok(Vec::new());
        }

        let signatures = integer_list(module, names::EXPORT_FOREACH)?;
        let kernel_names = if has_names {
            name_list(module, names::EXPORT_FOREACH_NAME)?
        } else if signatures.len() == 1 {
            // Old front ends only named the single `root` kernel implicitly
            vec![ROOT_KERNEL_NAME.to_owned()]
        } else {
            Vec::new()
        };
        if kernel_names.len() != signatures.len() {
            return Err(ExtractError::ForEachCountMismatch {
                names: kernel_names.len(),
                signatures: signatures.len(),
            });
        }
        Ok(kernel_names
            .into_iter()
            .zip(signatures)
            .map(|(name, signature)| ForEachKernel {
                name,
                signature: ForEachSignature::from_raw(signature),
            })
            .collect())
    }

    /// Number of exported global variables
    #[must_use]
    pub fn export_var_count(&self) -> usize {
        self.tables.export_vars.len()
    }

    /// Exported variable names, in slot order
    #[must_use]
    pub fn export_var_names(&self) -> &[String] {
        &self.tables.export_vars
    }

    /// Number of exported functions
    #[must_use]
    pub fn export_func_count(&self) -> usize {
        self.tables.export_funcs.len()
    }

    /// Exported function names, in slot order
    #[must_use]
    pub fn export_func_names(&self) -> &[String] {
        &self.tables.export_funcs
    }

    /// Number of exported ForEach kernels
    #[must_use]
    pub fn export_for_each_signature_count(&self) -> usize {
        self.tables.export_for_each.len()
    }

    /// Exported ForEach kernels, in slot order
    #[must_use]
    pub fn export_for_each(&self) -> &[ForEachKernel] {
        &self.tables.export_for_each
    }

    pub fn export_for_each_names(&self) -> impl Iterator<Item = &str> {
        self.tables.export_for_each.iter().map(|k| k.name.as_str())
    }

    pub fn export_for_each_signatures(&self) -> impl Iterator<Item = ForEachSignature> + '_ {
        self.tables.export_for_each.iter().map(|k| k.signature)
    }

    #[must_use]
    pub fn pragma_count(&self) -> usize {
        self.tables.pragmas.len()
    }

    /// Pragmas in declaration order. Keys may repeat.
    #[must_use]
    pub fn pragmas(&self) -> &[Pragma] {
        &self.tables.pragmas
    }

    pub fn pragma_keys(&self) -> impl Iterator<Item = &str> {
        self.tables.pragmas.iter().map(|p| p.key.as_str())
    }

    pub fn pragma_values(&self) -> impl Iterator<Item = &str> {
        self.tables.pragmas.iter().map(|p| p.value.as_str())
    }

    #[must_use]
    pub fn object_slot_count(&self) -> usize {
        self.tables.object_slots.len()
    }

    /// Slots of exported objects the driver must release on script teardown
    #[must_use]
    pub fn object_slots(&self) -> &[u32] {
        &self.tables.object_slots
    }

    /// Version of the compiler that produced the bitcode
    #[must_use]
    pub fn compiler_version(&self) -> u32 {
        self.tables.compiler_version
    }

    #[must_use]
    pub fn optimization_level(&self) -> u32 {
        self.tables.optimization_level
    }

    #[must_use]
    pub fn float_precision(&self) -> FloatPrecision {
        self.tables.float_precision
    }

    /// Whether the kernels may be run on several threads at once
    #[must_use]
    pub fn is_threadable(&self) -> bool {
        self.tables.threadable
    }

    #[must_use]
    pub fn build_checksum(&self) -> Option<&str> {
        self.tables.build_checksum.as_deref()
    }

    #[must_use]
    pub fn has_debug_info(&self) -> bool {
        self.tables.debug_info
    }
}

/// The entry node at `index` of a named node, or the kind found instead
fn entry<'m>(named: &NamedMetadata<'m>, index: usize) -> Result<module::Node<'m>, &'static str> {
    match named.operand(index) {
        Some(Operand::Node(entry)) => Ok(entry),
        other => Err(other.map_or("null", |op| op.kind())),
    }
}

/// Base 10, optional leading `-`, nothing else
fn parse_decimal(s: &str) -> Option<i64> {
    if s.starts_with('+') {
        return None;
    }
    s.parse().ok()
}

/// First string operand of every entry of `node`
fn name_list(module: &Module, node: &'static str) -> Result<Vec<String>, ExtractError> {
    let Some(named) = module.named_metadata(node) else {
        return Ok(Vec::new());
    };
    let mut list = Vec::with_capacity(named.len());
    for index in 0..named.len() {
        let first = entry(&named, index)
            .map_err(|found| ExtractError::ExpectedString { node, index, found })?
            .operand(0);
        match first {
            Some(Operand::String(name)) => list.push(name.to_owned()),
            other => {
                return Err(ExtractError::ExpectedString {
                    node,
                    index,
                    found: other.map_or("null", |op| op.kind()),
                });
            }
        }
    }
    debug!(node, count = list.len(), "read name list");
    Ok(list)
}

/// First operand of every entry of `node`, as a 32-bit unsigned integer.
///
/// The front end writes these as decimal strings; integer constants are
/// accepted too.
fn integer_list(module: &Module, node: &'static str) -> Result<Vec<u32>, ExtractError> {
    let Some(named) = module.named_metadata(node) else {
        return Ok(Vec::new());
    };
    let mut list = Vec::with_capacity(named.len());
    for index in 0..named.len() {
        let operand = entry(&named, index)
            .map_err(|found| ExtractError::ExpectedInteger {
                node,
                index,
                found: found.to_owned(),
            })?
            .operand(0);
        let value = if let Some(value) = operand.and_then(|op| op.as_integer()) {
            value
        } else if let Some(s) = operand.and_then(|op| op.as_str()) {
            parse_decimal(s).ok_or_else(|| ExtractError::ExpectedInteger {
                node,
                index,
                found: format!("{s:?}"),
            })?
        } else {
            return Err(ExtractError::ExpectedInteger {
                node,
                index,
                found: operand.map_or("null", |op| op.kind()).to_owned(),
            });
        };
        let value = u32::try_from(value).map_err(|_| ExtractError::IntegerOutOfRange {
            node,
            index,
            value,
        })?;
        list.push(value);
    }
    debug!(node, count = list.len(), "read integer list");
    Ok(list)
}

fn pragma_list(module: &Module) -> Result<Vec<Pragma>, ExtractError> {
    let Some(named) = module.named_metadata(names::PRAGMA) else {
        return Ok(Vec::new());
    };
    let mut list = Vec::with_capacity(named.len());
    for (index, operand) in named.operands().enumerate() {
        let pair = operand.as_node().and_then(|node| {
            let [Some(Operand::String(key)), Some(Operand::String(value))] =
                [node.operand(0), node.operand(1)]
            else {
                return None;
            };
            (node.len() == 2).then(|| Pragma {
                key: key.to_owned(),
                value: value.to_owned(),
            })
        });
        list.push(pair.ok_or(ExtractError::MalformedPragma { index })?);
    }
    debug!(count = list.len(), "read pragmas");
    Ok(list)
}

fn first_string<'m>(module: &'m Module, node: &str) -> Option<&'m str> {
    module
        .named_metadata(node)?
        .operand(0)?
        .as_node()?
        .operand(0)?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_strings(module: &mut Module, node: &str, entries: &[&[&str]]) {
        let ids: Vec<_> = entries
            .iter()
            .map(|entry| {
                let ops: Vec<_> = entry.iter().map(|s| Some(module.add_string(*s))).collect();
                module.add_node(ops)
            })
            .collect();
        module.add_named_metadata(node, ids);
    }

    #[test]
    fn decimal_strings() {
        assert_eq!(parse_decimal("35"), Some(35));
        assert_eq!(parse_decimal("-1"), Some(-1));
        assert_eq!(parse_decimal("+3"), None);
        assert_eq!(parse_decimal(" 3 "), None);
        assert_eq!(parse_decimal("0x1f"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn float_precision_follows_last_pragma() {
        let mut module = Module::new();
        named_strings(
            &mut module,
            names::PRAGMA,
            &[
                &["version", "1"],
                &[pragmas::FP_RELAXED, ""],
                &["java_package_name", "com.example"],
                &[pragmas::FP_IMPRECISE, ""],
            ],
        );
        let mut extractor = MetadataExtractor::from_module(&module);
        extractor.extract().unwrap();
        assert_eq!(extractor.float_precision(), FloatPrecision::Imprecise);
        assert_eq!(extractor.pragma_count(), 4);
    }

    #[test]
    fn threadable_and_checksum() {
        let mut module = Module::new();
        named_strings(&mut module, names::THREADABLE, &[&["no"]]);
        named_strings(&mut module, names::BUILD_CHECKSUM, &[&["abcdef"]]);
        module.add_named_metadata(names::DEBUG_INFO, Vec::<module::MetadataId>::new());
        let mut extractor = MetadataExtractor::from_module(&module);
        assert!(extractor.is_threadable());
        extractor.extract().unwrap();
        assert!(!extractor.is_threadable());
        assert_eq!(extractor.build_checksum(), Some("abcdef"));
        assert!(extractor.has_debug_info());
    }

    #[test]
    fn legacy_root_only_when_configured() {
        let module = Module::new();
        let config = ExtractorConfig {
            module_compiler_version: 0,
            legacy_root_kernel: true,
            ..Default::default()
        };
        let mut extractor = MetadataExtractor::from_module(&module).with_config(config);
        extractor.extract().unwrap();
        assert_eq!(
            extractor.export_for_each(),
            &[ForEachKernel {
                name: "root".into(),
                signature: ForEachSignature::LEGACY_ROOT,
            }]
        );

        let mut extractor = MetadataExtractor::from_module(&module).with_config(ExtractorConfig {
            legacy_root_kernel: true,
            ..Default::default()
        });
        extractor.extract().unwrap();
        assert_eq!(extractor.export_for_each_signature_count(), 0);
    }

    #[test]
    fn unnamed_single_signature_is_root() {
        let mut module = Module::new();
        named_strings(&mut module, names::EXPORT_FOREACH, &[&["31"]]);
        let mut extractor = MetadataExtractor::from_module(&module);
        extractor.extract().unwrap();
        assert_eq!(extractor.export_for_each_names().collect::<Vec<_>>(), ["root"]);
    }

    #[test]
    fn unnamed_signatures_need_names() {
        let mut module = Module::new();
        named_strings(&mut module, names::EXPORT_FOREACH, &[&["31"], &["35"]]);
        let mut extractor = MetadataExtractor::from_module(&module);
        assert_eq!(
            extractor.extract(),
            Err(ExtractError::ForEachCountMismatch {
                names: 0,
                signatures: 2,
            })
        );
    }
}
