//! ZIP container reading and writing.
//!
//! ## Architecture
//!
//! - [`structures`]: ZIP records (local headers, central directory entries,
//!   ZIP64 and classic end records) and their byte layout
//! - [`writer`]: streams entries into an archive, producing the metadata the
//!   block map and the signature need
//! - [`parser`]: reads the central directory back from the end of a file
//! - [`reader`]: extracts and checksums entries of a finished package
//!
//! ## Output format
//!
//! Packages are written with fixed timestamps, no extra fields and no data
//! descriptors, and always end with ZIP64 end records, which is what the
//! Windows package loader expects. Only STORED and DEFLATE are used.

mod parser;
mod reader;
mod structures;
mod writer;

pub use parser::ZipParser;
pub use reader::PackageReader;
pub use structures::*;
pub use writer::{MAX_COMPRESSION_LEVEL, WrittenEntry, ZipWriter};
