//! Package assembly.
//!
//! [`write_package`] streams resolved entries and the generated parts into a
//! ZIP archive; [`create_package`] wraps it with input resolution and the
//! temporary-file handling that keeps a failed run from leaving a package
//! behind.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncWrite, BufWriter};
use tracing::{debug, info, warn};

use crate::encode::CONTENT_TYPES_PART;
use crate::error::{AppxError, Result};
use crate::input::{Entry, Exclusions, InputSpec, resolve};
use crate::io::{LocalFileReader, ReadAt};
use crate::manifest::{BLOCK_MAP_PART, BlockMapFile, ContentTypes, block_map_xml};
use crate::sign::{AppxDigests, SIGNATURE_PART, Signer, p7x_content};
use crate::zip::{MAX_COMPRESSION_LEVEL, WrittenEntry, ZipWriter};

/// How to assemble a package.
#[derive(Clone, Default)]
pub struct PackageOptions {
    /// 0 stores user files, 1 to 9 deflate them
    pub compression_level: u32,
    /// Signs the package when set
    pub signer: Option<Arc<dyn Signer>>,
}

impl fmt::Debug for PackageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageOptions")
            .field("compression_level", &self.compression_level)
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

/// What ended up in a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    /// User files, not counting generated parts
    pub files: usize,
    /// Total uncompressed size of the user files
    pub uncompressed_size: u64,
    /// Size of the archive
    pub archive_size: u64,
    pub signed: bool,
}

fn block_map_entry(written: &WrittenEntry) -> BlockMapFile {
    BlockMapFile {
        archive_path: written.archive_path.clone(),
        size: written.uncompressed_size(),
        lfh_size: written.record.local_header_size(),
        blocks: written.blocks.clone(),
    }
}

/// Add one user file; read failures are reported against its source path.
async fn add_file<W: AsyncWrite + Unpin, R: ReadAt + ?Sized>(
    writer: &mut ZipWriter<W>,
    entry: &Entry,
    source: &R,
    level: u32,
) -> Result<WrittenEntry> {
    writer
        .add_entry(&entry.archive_path, source, level)
        .await
        .map_err(|e| match e {
            AppxError::SourceRead { source, .. } => AppxError::input(&entry.source, source),
            other => other,
        })
}

/// Write a package containing `entries` to `sink`.
///
/// Parts are written in a fixed order: user files, the block map, the
/// content types and finally, when signing, the signature.
pub async fn write_package<W: AsyncWrite + Unpin>(
    sink: W,
    entries: &[Entry],
    options: &PackageOptions,
) -> Result<(W, PackageSummary)> {
    let level = options.compression_level;
    if level > MAX_COMPRESSION_LEVEL {
        return Err(AppxError::CompressionLevel(level));
    }

    let mut writer = ZipWriter::new(sink);
    let mut files = Vec::with_capacity(entries.len());
    let mut uncompressed_size = 0;
    for entry in entries {
        let source =
            LocalFileReader::new(&entry.source).map_err(|e| AppxError::input(&entry.source, e))?;
        let written = add_file(&mut writer, entry, &source, level).await?;
        uncompressed_size += written.uncompressed_size();
        files.push(block_map_entry(&written));
    }

    let block_map = block_map_xml(&files);
    writer.add_part(BLOCK_MAP_PART, block_map.as_bytes(), 0).await?;

    let content_types =
        ContentTypes::from_archive_paths(entries.iter().map(|e| e.archive_path.as_str())).to_xml();
    writer
        .add_part(CONTENT_TYPES_PART, content_types.as_bytes(), 0)
        .await?;

    if let Some(signer) = &options.signer {
        let digests = AppxDigests {
            axpc: writer.local_records_digest(),
            axcd: Sha256::digest(writer.central_directory()?).into(),
            axct: Sha256::digest(content_types.as_bytes()).into(),
            axbm: Sha256::digest(block_map.as_bytes()).into(),
            axci: [0; 32],
        };
        let signature = signer.sign(&digests).await?;
        debug!(bytes = signature.len(), "signed package");
        writer
            .add_part(SIGNATURE_PART, &p7x_content(&signature), MAX_COMPRESSION_LEVEL)
            .await?;
    }

    let (sink, archive_size) = writer.finish().await?;
    Ok((
        sink,
        PackageSummary {
            files: entries.len(),
            uncompressed_size,
            archive_size,
            signed: options.signer.is_some(),
        },
    ))
}

/// Hidden sibling of `output` that the package is written to first.
pub fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package".to_string());
    output.with_file_name(format!(".{name}.partial"))
}

/// Resolve `inputs` and write the package to `output`.
///
/// The output only appears once the package is complete; on any error
/// nothing is left at `output` or at its temporary sibling.
pub async fn create_package(
    output: &Path,
    inputs: &[InputSpec],
    options: &PackageOptions,
) -> Result<PackageSummary> {
    let partial = partial_path(output);
    let mut exclusions = Exclusions::default();
    exclusions.add(output);
    exclusions.add(&partial);

    let entries = resolve(inputs, &exclusions).await?;
    info!(files = entries.len(), output = %output.display(), "packaging");

    match write_to(&partial, &entries, options).await {
        Ok(summary) => {
            fs::rename(&partial, output)
                .await
                .map_err(|e| AppxError::input(output, e))?;
            info!(
                files = summary.files,
                size = summary.archive_size,
                signed = summary.signed,
                "created {}",
                output.display()
            );
            Ok(summary)
        }
        Err(err) => {
            if let Err(remove_err) = fs::remove_file(&partial).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), "failed to remove partial package: {remove_err}");
                }
            }
            Err(err)
        }
    }
}

async fn write_to(path: &Path, entries: &[Entry], options: &PackageOptions) -> Result<PackageSummary> {
    let file = fs::File::create(path)
        .await
        .map_err(|e| AppxError::input(path, e))?;
    let (writer, summary) = write_package(BufWriter::new(file), entries, options).await?;
    writer.into_inner().sync_all().await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::SignError;
    use crate::zip::PackageReader;
    use async_trait::async_trait;

    struct FixedSigner;

    #[async_trait]
    impl Signer for FixedSigner {
        async fn sign(&self, digests: &AppxDigests) -> std::result::Result<Vec<u8>, SignError> {
            Ok(digests.to_bytes())
        }
    }

    struct FailingSigner;

    #[async_trait]
    impl Signer for FailingSigner {
        async fn sign(&self, _: &AppxDigests) -> std::result::Result<Vec<u8>, SignError> {
            Err(SignError::Empty)
        }
    }

    fn entry(dir: &Path, archive_path: &str, content: &[u8]) -> Entry {
        let source = dir.join(archive_path.replace('/', "_"));
        std::fs::write(&source, content).unwrap();
        Entry {
            archive_path: archive_path.to_string(),
            source,
        }
    }

    async fn stored_names(bytes: Vec<u8>) -> Vec<String> {
        let reader = PackageReader::new(Arc::<[u8]>::from(bytes));
        reader.verify().await.unwrap();
        reader
            .list_files()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect()
    }

    #[tokio::test]
    async fn parts_are_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let entries = [
            entry(dir.path(), "README.txt", b"This is a test file.\n"),
            entry(dir.path(), "somedir/other_file.dll", b"MZ"),
        ];
        let (bytes, summary) = write_package(Vec::new(), &entries, &PackageOptions::default())
            .await
            .unwrap();
        assert_eq!(
            stored_names(bytes).await,
            [
                "README.txt",
                "somedir/other_file.dll",
                "AppxBlockMap.xml",
                "[Content_Types].xml"
            ]
        );
        assert_eq!(summary.files, 2);
        assert_eq!(summary.uncompressed_size, 23);
        assert!(!summary.signed);
    }

    #[tokio::test]
    async fn block_map_lists_user_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let entries = [entry(dir.path(), "dir/a&b.txt", b"hello")];
        let (bytes, _) = write_package(Vec::new(), &entries, &PackageOptions::default())
            .await
            .unwrap();

        let reader = PackageReader::new(Arc::<[u8]>::from(bytes));
        let block_map = reader.find(BLOCK_MAP_PART).await.unwrap().unwrap();
        let xml = String::from_utf8(reader.read(&block_map).await.unwrap()).unwrap();
        // LfhSize is 30 + the length of the stored name "dir/a%26b.txt"
        assert!(xml.contains("<File Name=\"dir\\a&amp;b.txt\" Size=\"5\" LfhSize=\"43\">"));
        assert_eq!(xml.matches("<File ").count(), 1);
    }

    #[tokio::test]
    async fn signing_adds_only_the_signature_part() {
        let dir = tempfile::tempdir().unwrap();
        let entries = [entry(dir.path(), "README.txt", b"readme")];

        let (unsigned, _) = write_package(Vec::new(), &entries, &PackageOptions::default())
            .await
            .unwrap();
        let options = PackageOptions {
            compression_level: 0,
            signer: Some(Arc::new(FixedSigner)),
        };
        let (signed, summary) = write_package(Vec::new(), &entries, &options).await.unwrap();
        assert!(summary.signed);

        let reader = PackageReader::new(Arc::<[u8]>::from(signed.clone()));
        let signature = reader.find(SIGNATURE_PART).await.unwrap().unwrap();
        let content = reader.read(&signature).await.unwrap();
        assert_eq!(&content[..4], b"PKCX");
        assert_eq!(&content[4..8], b"APPX");

        // Everything before the signature is identical to the unsigned package
        let local_records = signature.lfh_offset as usize;
        assert_eq!(signed[..local_records], unsigned[..local_records]);
        assert_eq!(stored_names(signed).await.last().unwrap(), SIGNATURE_PART);
    }

    #[tokio::test]
    async fn signature_covers_the_unsigned_central_directory() {
        let dir = tempfile::tempdir().unwrap();
        let entries = [entry(dir.path(), "README.txt", b"readme")];

        let (unsigned, _) = write_package(Vec::new(), &entries, &PackageOptions::default())
            .await
            .unwrap();
        let options = PackageOptions {
            compression_level: 0,
            signer: Some(Arc::new(FixedSigner)),
        };
        let (signed, _) = write_package(Vec::new(), &entries, &options).await.unwrap();

        let reader = PackageReader::new(Arc::<[u8]>::from(signed));
        let signature = reader.find(SIGNATURE_PART).await.unwrap().unwrap();
        let blob = reader.read(&signature).await.unwrap();
        let digests = &blob[4..];

        let local_len = signature.lfh_offset as usize;
        let axpc: [u8; 32] = Sha256::digest(&unsigned[..local_len]).into();
        let axcd: [u8; 32] = Sha256::digest(&unsigned[local_len..]).into();
        assert_eq!(&digests[8..40], axpc.as_slice());
        assert_eq!(&digests[44..76], axcd.as_slice());
    }

    #[tokio::test]
    async fn missing_source_is_an_input_error() {
        let entries = [Entry {
            archive_path: "gone.txt".to_string(),
            source: PathBuf::from("/does/not/exist"),
        }];
        let err = write_package(Vec::new(), &entries, &PackageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppxError::Input { .. }));
        assert!(!err.to_string().contains("Malformed"));
    }

    /// Claims more bytes than it can deliver, like a file truncated mid-read.
    struct Shrunk(Vec<u8>);

    #[async_trait]
    impl ReadAt for Shrunk {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.as_slice().read_at(offset, buf).await
        }

        fn size(&self) -> u64 {
            self.0.len() as u64 + 100
        }
    }

    #[tokio::test]
    async fn short_reads_name_the_source_file() {
        let entry = Entry {
            archive_path: "docs/README.txt".to_string(),
            source: PathBuf::from("/srv/build/README.txt"),
        };
        let mut writer = ZipWriter::new(Vec::new());
        let err = add_file(&mut writer, &entry, &Shrunk(b"partial".to_vec()), 6)
            .await
            .unwrap_err();
        match &err {
            AppxError::Input { path, source } => {
                assert_eq!(path, &entry.source);
                assert_eq!(source.kind(), std::io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected input error, got {other:?}"),
        }
        assert!(err.to_string().starts_with("/srv/build/README.txt: "), "{err}");
    }

    #[tokio::test]
    async fn failed_runs_leave_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let readme = dir.path().join("README.txt");
        std::fs::write(&readme, b"readme").unwrap();
        let output = dir.path().join("test.appx");

        let options = PackageOptions {
            compression_level: 0,
            signer: Some(Arc::new(FailingSigner)),
        };
        let err = create_package(&output, &[InputSpec::Path(readme)], &options)
            .await
            .unwrap_err();
        assert!(matches!(err, AppxError::Sign(_)));
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn output_inside_walked_directory_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), b"readme").unwrap();
        let output = dir.path().join("test.appx");

        let input = [InputSpec::Path(dir.path().to_path_buf())];
        create_package(&output, &input, &PackageOptions::default())
            .await
            .unwrap();
        // A second run sees the first package in the directory
        let summary = create_package(&output, &input, &PackageOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.archive_size, std::fs::metadata(&output).unwrap().len());

        let reader = PackageReader::open(&output).unwrap();
        let names: Vec<_> = reader
            .list_files()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, ["README.txt", "AppxBlockMap.xml", "[Content_Types].xml"]);
    }

    #[test]
    fn partial_path_is_a_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/tmp/out/test.appx")),
            PathBuf::from("/tmp/out/.test.appx.partial")
        );
    }
}
