//! `[Content_Types].xml` generation.
//!
//! Files with an extension are covered by one `Default` rule per distinct
//! (lower-cased) extension; files without one get an `Override` naming the
//! part directly.

use std::fmt::Write as _;

use crate::encode::{content_type_extension, zip_entry_name};

pub use crate::encode::CONTENT_TYPES_PART;

/// Content type used when nothing more specific is known
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const NAMESPACE: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

/// Content types Windows expects for well-known extensions
const KNOWN_CONTENT_TYPES: &[(&str, &str)] = &[
    ("appx", "application/vnd.ms-appx"),
    ("dll", "application/x-msdownload"),
    ("exe", "application/x-msdownload"),
    ("png", "image/png"),
    ("xml", "application/vnd.ms-appx.manifest+xml"),
];

/// Overrides for parts generated by the packager itself
const GENERATED_PART_OVERRIDES: &[(&str, &str)] = &[
    ("/AppxBlockMap.xml", "application/vnd.ms-appx.blockmap+xml"),
    ("/AppxSignature.p7x", "application/vnd.ms-appx.signature"),
    ("/AppxMetadata/CodeIntegrity.cat", "application/vnd.ms-pkiseccat"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeRule {
    /// Applies to every part with this extension (lower-cased, no dot)
    Default {
        extension: String,
        content_type: &'static str,
    },
    /// Applies to one part; `part_name` starts with `/`
    Override {
        part_name: String,
        content_type: &'static str,
    },
}

/// Extension of the base name of `archive_path`, lower-cased.
///
/// A base name ending in `.` has no extension.
pub fn extension(archive_path: &str) -> Option<String> {
    let base_name = archive_path.rsplit('/').next().unwrap_or(archive_path);
    let (_, ext) = base_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

fn content_type_for(extension: &str) -> &'static str {
    KNOWN_CONTENT_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, content_type)| *content_type)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// The rules for one package, in first-appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypes {
    rules: Vec<ContentTypeRule>,
}

impl ContentTypes {
    /// Derive rules from the archive paths of the user files.
    pub fn from_archive_paths<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut rules = Vec::new();
        let mut seen = Vec::<String>::new();

        for path in paths {
            match extension(path) {
                Some(ext) => {
                    if seen.contains(&ext) {
                        continue;
                    }
                    rules.push(ContentTypeRule::Default {
                        content_type: content_type_for(&ext),
                        extension: ext.clone(),
                    });
                    seen.push(ext);
                }
                None => rules.push(ContentTypeRule::Override {
                    part_name: format!("/{}", zip_entry_name(path)),
                    content_type: DEFAULT_CONTENT_TYPE,
                }),
            }
        }

        Self { rules }
    }

    pub fn rules(&self) -> &[ContentTypeRule] {
        &self.rules
    }

    /// Render the `[Content_Types].xml` document.
    pub fn to_xml(&self) -> String {
        let mut xml = super::xml_declaration(true);
        let _ = write!(xml, "<Types xmlns=\"{NAMESPACE}\">");

        for rule in &self.rules {
            match rule {
                ContentTypeRule::Default {
                    extension,
                    content_type,
                } => {
                    let _ = write!(
                        xml,
                        "<Default Extension=\"{}\" ContentType=\"{}\"/>",
                        content_type_extension(extension),
                        content_type
                    );
                }
                ContentTypeRule::Override {
                    part_name,
                    content_type,
                } => {
                    // Part names are ZIP-encoded, so there is nothing left to escape
                    let _ = write!(
                        xml,
                        "<Override PartName=\"{part_name}\" ContentType=\"{content_type}\"/>"
                    );
                }
            }
        }

        for (part_name, content_type) in GENERATED_PART_OVERRIDES {
            let _ = write!(
                xml,
                "<Override PartName=\"{part_name}\" ContentType=\"{content_type}\"/>"
            );
        }

        xml.push_str("</Types>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions() {
        assert_eq!(extension("foo.txt").as_deref(), Some("txt"));
        assert_eq!(extension("dir.d/foo").as_deref(), None);
        assert_eq!(extension("foo.").as_deref(), None);
        assert_eq!(extension("Foo.TXT").as_deref(), Some("txt"));
        assert_eq!(extension("foo bar.bar baz").as_deref(), Some("bar baz"));
        assert_eq!(extension(".hidden").as_deref(), Some("hidden"));
    }

    #[test]
    fn file_with_extension_gets_default() {
        let types = ContentTypes::from_archive_paths(["foo.txt"]);
        assert_eq!(
            types.rules(),
            &[ContentTypeRule::Default {
                extension: "txt".to_string(),
                content_type: DEFAULT_CONTENT_TYPE,
            }]
        );
        assert!(types
            .to_xml()
            .contains("<Default Extension=\"txt\" ContentType=\"application/octet-stream\"/>"));
    }

    #[test]
    fn file_without_extension_gets_override() {
        let types = ContentTypes::from_archive_paths(["foo", "dir/bar"]);
        let xml = types.to_xml();
        assert!(xml.contains("<Override PartName=\"/foo\" ContentType=\"application/octet-stream\"/>"));
        assert!(xml.contains("<Override PartName=\"/dir/bar\" ContentType=\"application/octet-stream\"/>"));
        assert!(!xml.contains("<Default"));
    }

    #[test]
    fn extensions_are_deduplicated_case_insensitively() {
        let types = ContentTypes::from_archive_paths(["a.PNG", "b.png", "c/d.png", "e.dll"]);
        let defaults: Vec<_> = types
            .rules()
            .iter()
            .filter_map(|rule| match rule {
                ContentTypeRule::Default {
                    extension,
                    content_type,
                } => Some((extension.as_str(), *content_type)),
                _ => None,
            })
            .collect();
        assert_eq!(
            defaults,
            [("png", "image/png"), ("dll", "application/x-msdownload")]
        );
    }

    #[test]
    fn extension_spaces_are_percent_encoded() {
        let xml = ContentTypes::from_archive_paths(["foo bar.bar baz"]).to_xml();
        assert!(xml.contains("<Default Extension=\"bar%20baz\" ContentType=\"application/octet-stream\"/>"));
    }

    #[test]
    fn override_part_names_are_zip_encoded() {
        let xml = ContentTypes::from_archive_paths(["a b/c&d"]).to_xml();
        assert!(xml.contains("PartName=\"/a%20b/c%26d\""));
    }

    #[test]
    fn generated_parts_are_always_declared() {
        let xml = ContentTypes::default().to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n<Types "));
        assert!(xml.contains("PartName=\"/AppxBlockMap.xml\""));
        assert!(xml.contains("PartName=\"/AppxSignature.p7x\""));
        assert!(!xml.contains("Content_Types"));
        assert!(xml.ends_with("</Types>"));
    }
}
