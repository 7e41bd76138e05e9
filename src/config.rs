//! Defaults used by [`MetadataExtractor`](crate::MetadataExtractor) when the
//! input does not say otherwise.

/// Compiler version reported for modules that carry no wrapper header
pub const RS_VERSION: u32 = 23;

/// Optimization level reported for modules that carry no wrapper header
pub const DEFAULT_OPTIMIZATION_LEVEL: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Compiler version assumed for an already-parsed module
    pub module_compiler_version: u32,
    /// Optimization level assumed for an already-parsed module
    pub module_optimization_level: u32,
    /// Synthesize a `root` kernel for compiler version 0 bitcode that has no
    /// ForEach metadata at all
    pub legacy_root_kernel: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            module_compiler_version: RS_VERSION,
            module_optimization_level: DEFAULT_OPTIMIZATION_LEVEL,
            legacy_root_kernel: false,
        }
    }
}
