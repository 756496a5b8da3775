//! Name encodings used at the package boundaries.
//!
//! A single archive path is rendered three different ways depending on where
//! it ends up:
//!
//! - [`zip_entry_name`]: the name stored in ZIP headers (and used as the OPC
//!   part name), percent-encoded byte by byte.
//! - [`xml_attribute`]: the `Name` attribute of a block map `File` element,
//!   which carries the original Unicode path.
//! - [`content_type_extension`]: the `Extension` attribute of a content types
//!   `Default` element.
//!
//! Each function takes the raw archive path (or extension) and must never be
//! fed the output of another.

use std::borrow::Cow;

/// Name of the content types part. Written verbatim: escaping the brackets
/// makes the package unreadable for Windows.
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn push_percent(out: &mut String, byte: u8) {
    out.push('%');
    out.push(HEX[(byte >> 4) as usize] as char);
    out.push(HEX[(byte & 0x0F) as usize] as char);
}

/// Encode an archive path for storage in the ZIP directory.
///
/// Every UTF-8 byte outside the unreserved set (`A-Z a-z 0-9 - . _ ~`) and the
/// path separator `/` is written as `%XX`. Multi-byte characters are encoded
/// one byte at a time.
///
/// # Examples
///
/// ```
/// use appx::encode::zip_entry_name;
///
/// assert_eq!(zip_entry_name("dir/a b.txt"), "dir/a%20b.txt");
/// assert_eq!(zip_entry_name("\u{c0}"), "%C3%80");
/// ```
pub fn zip_entry_name(archive_path: &str) -> String {
    if archive_path == CONTENT_TYPES_PART {
        return archive_path.to_string();
    }

    let mut out = String::with_capacity(archive_path.len());
    for &byte in archive_path.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => push_percent(&mut out, byte),
        }
    }
    out
}

/// Escape text for a double-quoted XML attribute.
///
/// Only `&` and `'` are escaped, plus `"` and `<` which cannot appear
/// literally inside the attribute. Tab, line feed and carriage return become
/// character references, since attribute normalization would turn them into
/// spaces. The block map consumer rejects any other entity, so `>` and
/// non-ASCII text pass through untouched.
pub fn xml_attribute(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '\'', '"', '<', '\t', '\n', '\r']) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Encode a file extension for the `Default/@Extension` attribute.
///
/// Spaces become `%20`. The few characters that would break the attribute
/// (`"`, `&`, `<`, tab, line feed, carriage return) and `%` itself are
/// percent-encoded as well; everything else passes through as-is.
pub fn content_type_extension(extension: &str) -> Cow<'_, str> {
    if !extension.contains([' ', '"', '&', '<', '%', '\t', '\n', '\r']) {
        return Cow::Borrowed(extension);
    }

    let mut out = String::with_capacity(extension.len() + 4);
    for c in extension.chars() {
        match c {
            ' ' | '"' | '&' | '<' | '%' | '\t' | '\n' | '\r' => push_percent(&mut out, c as u8),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reverse of the `%XX` encoding. Malformed escapes are kept literally.
pub fn percent_decode(text: &str) -> Vec<u8> {
    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
