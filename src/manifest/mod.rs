//! Generated package parts.
//!
//! - [`content_types`]: `[Content_Types].xml`, the MIME type of every part
//! - [`block_map`]: `AppxBlockMap.xml`, per-block hashes of every file

pub mod block_map;
pub mod content_types;

pub use block_map::{BLOCK_MAP_PART, BLOCK_SIZE, Block, BlockMapFile, block_map_xml};
pub use content_types::{CONTENT_TYPES_PART, ContentTypeRule, ContentTypes};

/// Declaration shared by both generated documents
fn xml_declaration(standalone: bool) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"{}\"?>\r\n",
        if standalone { "yes" } else { "no" }
    )
}
