//! `AppxBlockMap.xml` generation.
//!
//! Every packaged file is split into 64 KiB blocks of uncompressed content.
//! Each block is listed with the base64 SHA-256 of its bytes and, for
//! deflated files, the number of compressed bytes it occupies, which lets a
//! consumer verify and stream a package block by block.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

use crate::encode::xml_attribute;

/// Name of the block map part
pub const BLOCK_MAP_PART: &str = "AppxBlockMap.xml";

/// Uncompressed bytes per block
pub const BLOCK_SIZE: usize = 65536;

const NAMESPACE: &str = "http://schemas.microsoft.com/appx/2010/blockmap";
const HASH_METHOD: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// SHA-256 of the uncompressed block
    pub hash: [u8; 32],
    /// Compressed bytes, `None` for stored files
    pub compressed_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMapFile {
    /// Unescaped archive path
    pub archive_path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Size of the file's local header in the archive
    pub lfh_size: u64,
    pub blocks: Vec<Block>,
}

/// Render the block map for `files`, in the given order.
pub fn block_map_xml(files: &[BlockMapFile]) -> String {
    let mut xml = super::xml_declaration(false);
    let _ = write!(
        xml,
        "<BlockMap xmlns=\"{NAMESPACE}\" HashMethod=\"{HASH_METHOD}\">"
    );

    for file in files {
        // Block map names use Windows separators
        let name = file.archive_path.replace('/', "\\");
        let _ = write!(
            xml,
            "<File Name=\"{}\" Size=\"{}\" LfhSize=\"{}\">",
            xml_attribute(&name),
            file.size,
            file.lfh_size
        );
        for block in &file.blocks {
            let _ = write!(xml, "<Block Hash=\"{}\"", STANDARD.encode(block.hash));
            if let Some(size) = block.compressed_size {
                let _ = write!(xml, " Size=\"{size}\"");
            }
            xml.push_str("/>");
        }
        xml.push_str("</File>");
    }

    xml.push_str("</BlockMap>");
    xml
}
