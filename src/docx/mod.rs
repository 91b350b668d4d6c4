// report-assembly-service/src/docx/mod.rs
//
// OOXML package handling: the ZIP part map, the mutable text-run view of a
// part, and token analysis / source-text tokenization built on top of it.

pub mod package;
pub mod textrun;
pub mod tokenizer;

pub use package::Package;
pub use textrun::TextRunIndex;
