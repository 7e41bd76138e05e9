//! RenderScript bitcode metadata extraction.
//!
//! A small LLVM bitstream reader, a read-only view of module-level metadata
//! built on top of it, and [`MetadataExtractor`], which turns the metadata
//! emitted by the RenderScript compiler into typed tables.

pub mod bitcode;
mod bits;
pub mod bitstream;
pub mod config;
pub mod extractor;
pub mod module;
pub mod read;
pub mod schema;
pub mod signature;
pub mod visitor;
pub mod wrapper;

pub use self::bitcode::Bitcode;
pub use self::config::ExtractorConfig;
pub use self::extractor::{
    ExtractError, FloatPrecision, ForEachKernel, MetadataExtractor, Pragma,
};
pub use self::module::Module;
pub use self::read::BitStreamReader;
pub use self::signature::{
    ForEachSignature, has_for_each_signature_in, has_for_each_signature_kernel,
    has_for_each_signature_out, has_for_each_signature_usr_data, has_for_each_signature_x,
    has_for_each_signature_y,
};
pub use self::visitor::BitStreamVisitor;
