//! Ingestion front ends that turn a source buffer into a [`liric_ir::Module`]
//! (spec §4): textual IR, LLVM bitcode, and WebAssembly, plus an `auto`
//! dispatcher that sniffs the buffer to pick one.

pub mod auto;
pub mod bitcode;
pub mod text;
pub mod wasm;

pub use auto::{parse as parse_auto, parse_streaming as parse_auto_streaming, sniff, AutoError, Sniffed};
pub use text::ParseError;
