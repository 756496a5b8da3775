//! Mapping file parsing.
//!
//! A mapping file lists explicit `source -> destination` pairs:
//!
//! ```text
//! [Files]
//! "/path/to/local/file.exe" "appx_file.exe"
//! "/path/to/assets/logo.png" "Assets/logo.png"
//! ```
//!
//! Blank lines and surrounding whitespace are ignored anywhere. Quote
//! characters cannot be escaped, so a path containing `"` cannot be listed.

use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{AppxError, MalformedMappingFile, Result};

/// Header that must open every mapping file.
pub const FILES_SECTION: &str = "[Files]";

/// Path argument that reads the mapping file from standard input.
pub const STDIN_PATH: &str = "-";

const WHITESPACE: &[char] = &[' ', '\t', '\r'];

/// One `"source" "destination"` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// Filesystem path to read.
    pub source: PathBuf,
    /// Path inside the package, taken verbatim.
    pub archive_path: String,
}

/// Parse mapping file text.
///
/// The returned error carries a placeholder file name; callers that know the
/// name attach it with [`MalformedMappingFile::with_file_name`].
pub fn parse_mapping(text: &str) -> std::result::Result<Vec<MappingEntry>, MalformedMappingFile> {
    let mut entries = Vec::new();
    let mut seen_header = false;
    let mut last_line = 0;

    for (index, raw) in text.split('\n').enumerate() {
        let line_number = index + 1;
        last_line = line_number;
        let line = raw.trim_matches(WHITESPACE);
        if line.is_empty() {
            continue;
        }

        if !seen_header {
            if line != FILES_SECTION {
                return Err(MalformedMappingFile::new(
                    line_number,
                    "expected [Files] section header",
                ));
            }
            seen_header = true;
            continue;
        }

        entries.push(parse_entry(line, line_number)?);
    }

    if !seen_header {
        return Err(MalformedMappingFile::new(
            last_line.max(1),
            "missing [Files] section header",
        ));
    }

    Ok(entries)
}

/// Split one quoted token off the front of `line`.
///
/// Returns the token contents and the rest of the line after the closing
/// quote.
fn quoted(line: &str, line_number: usize) -> std::result::Result<(&str, &str), MalformedMappingFile> {
    let Some(body) = line.strip_prefix('"') else {
        return Err(MalformedMappingFile::new(line_number, "expected opening quote"));
    };
    let Some(end) = body.find('"') else {
        return Err(MalformedMappingFile::new(line_number, "missing closing quote"));
    };
    if end == 0 {
        return Err(MalformedMappingFile::new(line_number, "empty path"));
    }
    Ok((&body[..end], &body[end + 1..]))
}

fn parse_entry(line: &str, line_number: usize) -> std::result::Result<MappingEntry, MalformedMappingFile> {
    let (source, rest) = quoted(line, line_number)?;

    let rest = rest.trim_start_matches(WHITESPACE);
    if rest.is_empty() {
        return Err(MalformedMappingFile::new(line_number, "missing archive path"));
    }
    let (archive_path, rest) = quoted(rest, line_number)?;

    if !rest.is_empty() {
        return Err(MalformedMappingFile::new(
            line_number,
            "unexpected text after archive path",
        ));
    }

    Ok(MappingEntry {
        source: PathBuf::from(source),
        archive_path: archive_path.to_string(),
    })
}

/// Read and parse a mapping file. `-` reads standard input.
///
/// A file that cannot be read is reported as an I/O error; only syntax
/// problems are reported as malformed.
pub async fn read_mapping_file(path: &Path) -> Result<Vec<MappingEntry>> {
    let is_stdin = path.as_os_str() == STDIN_PATH;
    let display_name = if is_stdin {
        "(stdin)".to_string()
    } else {
        path.display().to_string()
    };

    let read_error = |source| AppxError::MappingFileRead {
        path: display_name.clone(),
        source,
    };

    let text = if is_stdin {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .map_err(read_error)?;
        text
    } else {
        tokio::fs::read_to_string(path).await.map_err(read_error)?
    };

    let entries = parse_mapping(&text).map_err(|e| e.with_file_name(display_name.clone()))?;
    debug!(file = %display_name, entries = entries.len(), "parsed mapping file");
    Ok(entries)
}
