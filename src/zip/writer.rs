//! Streaming ZIP writer for packages.
//!
//! Each entry is read block by block from a [`ReadAt`] source. A single read
//! feeds the CRC-32, the block hashes for the block map, and the stored or
//! deflated data, so all three describe the same bytes. Entries are buffered
//! in memory until complete, which keeps local headers free of data
//! descriptors.

use flate2::{Compress, Compression, FlushCompress, Status};
use sha2::{Digest, Sha256};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::encode::zip_entry_name;
use crate::error::{AppxError, Result};
use crate::io::ReadAt;
use crate::manifest::{BLOCK_SIZE, Block};

use super::structures::{
    CompressionMethod, EndOfCentralDirectory, FileRecord, Zip64EOCD, Zip64EOCDLocator,
};

/// Highest zlib compression level
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Extra output space reserved on top of the input for each deflate call
const DEFLATE_SLACK: usize = 4096;

/// An entry that has been written to the archive
#[derive(Debug, Clone)]
pub struct WrittenEntry {
    /// Unescaped archive path
    pub archive_path: String,
    pub record: FileRecord,
    /// One block per 64 KiB of uncompressed data
    pub blocks: Vec<Block>,
    /// SHA-256 of the whole uncompressed content
    pub sha256: [u8; 32],
}

impl WrittenEntry {
    pub fn uncompressed_size(&self) -> u64 {
        self.record.uncompressed_size as u64
    }
}

/// Run `compress` until `input` is consumed and, for flushing modes, the
/// flush has been emitted completely.
fn deflate(
    compress: &mut Compress,
    out: &mut Vec<u8>,
    mut input: &[u8],
    flush: FlushCompress,
) -> std::result::Result<(), flate2::CompressError> {
    let finishing = matches!(flush, FlushCompress::Finish);
    loop {
        out.reserve(input.len() + DEFLATE_SLACK);
        let before = compress.total_in();
        let status = compress.compress_vec(input, out, flush)?;
        input = &input[(compress.total_in() - before) as usize..];
        let out_full = out.len() == out.capacity();

        if let Status::StreamEnd = status {
            return Ok(());
        }
        if !finishing && input.is_empty() && !out_full {
            return Ok(());
        }
    }
}

/// Accumulates one entry's data, checksum and blocks
struct EntryEncoder {
    compress: Option<Compress>,
    data: Vec<u8>,
    crc: crc32fast::Hasher,
    sha256: Sha256,
    size: u64,
    blocks: Vec<Block>,
}

impl EntryEncoder {
    fn new(level: u32) -> Self {
        Self {
            // Raw deflate stream, no zlib header
            compress: (level > 0).then(|| Compress::new(Compression::new(level), false)),
            data: Vec::new(),
            crc: crc32fast::Hasher::new(),
            sha256: Sha256::new(),
            size: 0,
            blocks: Vec::new(),
        }
    }

    /// Add one block of at most [`BLOCK_SIZE`] bytes
    fn push_block(&mut self, block: &[u8]) -> Result<()> {
        self.crc.update(block);
        self.sha256.update(block);
        self.size += block.len() as u64;
        let hash: [u8; 32] = Sha256::digest(block).into();

        let compressed_size = match self.compress.as_mut() {
            None => {
                self.data.extend_from_slice(block);
                None
            }
            Some(compress) => {
                let start = self.data.len();
                deflate(compress, &mut self.data, block, FlushCompress::None)?;
                // A full flush ends the block on a byte boundary with a fresh
                // dictionary, so its compressed size is well defined.
                deflate(compress, &mut self.data, &[], FlushCompress::Full)?;
                Some((self.data.len() - start) as u64)
            }
        };

        self.blocks.push(Block {
            hash,
            compressed_size,
        });
        Ok(())
    }

    fn finish(mut self) -> Result<EncodedEntry> {
        let method = match self.compress.as_mut() {
            None => CompressionMethod::Stored,
            Some(compress) => {
                deflate(compress, &mut self.data, &[], FlushCompress::Finish)?;
                CompressionMethod::Deflate
            }
        };
        Ok(EncodedEntry {
            method,
            crc32: self.crc.finalize(),
            size: self.size,
            data: self.data,
            blocks: self.blocks,
            sha256: self.sha256.finalize().into(),
        })
    }
}

struct EncodedEntry {
    method: CompressionMethod,
    crc32: u32,
    size: u64,
    data: Vec<u8>,
    blocks: Vec<Block>,
    sha256: [u8; 32],
}

fn to_u32(value: u64, what: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppxError::TooLarge(what))
}

fn is_nested_package(archive_path: &str) -> bool {
    const SUFFIX: &str = ".appx";
    archive_path.len() > SUFFIX.len()
        && archive_path
            .get(archive_path.len() - SUFFIX.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(SUFFIX))
}

/// Writes local file records as entries are added, and the central
/// directory on [`finish`](ZipWriter::finish).
pub struct ZipWriter<W: AsyncWrite + Unpin> {
    sink: W,
    offset: u64,
    records: Vec<FileRecord>,
    local_records_hash: Sha256,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            offset: 0,
            records: Vec::new(),
            local_records_hash: Sha256::new(),
        }
    }

    /// Bytes written so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Add an entry read from `source`, stored under the ZIP-encoded form
    /// of `archive_path`.
    ///
    /// `level` 0 stores the data; 1 to 9 deflate it. Nested `.appx` packages
    /// are always stored.
    pub async fn add_entry<R: ReadAt + ?Sized>(
        &mut self,
        archive_path: &str,
        source: &R,
        level: u32,
    ) -> Result<WrittenEntry> {
        if level > MAX_COMPRESSION_LEVEL {
            return Err(AppxError::CompressionLevel(level));
        }
        if archive_path.is_empty() || archive_path.ends_with('/') {
            return Err(AppxError::DirectoryEntry(archive_path.to_string()));
        }

        let level = if is_nested_package(archive_path) { 0 } else { level };
        let mut encoder = EntryEncoder::new(level);
        let size = source.size();
        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut offset = 0u64;
        while offset < size {
            let len = (size - offset).min(BLOCK_SIZE as u64) as usize;
            source
                .read_exact_at(offset, &mut buf[..len])
                .await
                .map_err(|source| AppxError::SourceRead {
                    archive_path: archive_path.to_string(),
                    source,
                })?;
            encoder.push_block(&buf[..len])?;
            offset += len as u64;
        }
        let encoded = encoder.finish()?;

        let record = FileRecord {
            name: zip_entry_name(archive_path),
            compression_method: encoded.method,
            crc32: encoded.crc32,
            compressed_size: to_u32(encoded.data.len() as u64, "compressed file")?,
            uncompressed_size: to_u32(encoded.size, "file")?,
            lfh_offset: to_u32(self.offset, "archive")?,
        };

        let mut header = Vec::with_capacity(record.local_header_size() as usize);
        record.write_local_header(&mut header)?;
        self.write_local(&header).await?;
        self.write_local(&encoded.data).await?;

        debug!(
            name = %record.name,
            size = record.uncompressed_size,
            compressed = record.compressed_size,
            "wrote entry"
        );

        self.records.push(record.clone());
        Ok(WrittenEntry {
            archive_path: archive_path.to_string(),
            record,
            blocks: encoded.blocks,
            sha256: encoded.sha256,
        })
    }

    /// Add an in-memory part
    pub async fn add_part(&mut self, name: &str, data: &[u8], level: u32) -> Result<WrittenEntry> {
        self.add_entry(name, data, level).await
    }

    async fn write_local(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.sink.write_all(bytes).await?;
        self.local_records_hash.update(bytes);
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// SHA-256 over every local file record written so far
    pub fn local_records_digest(&self) -> [u8; 32] {
        self.local_records_hash.clone().finalize().into()
    }

    /// Central directory and end records as they would be written now
    pub fn central_directory(&self) -> io::Result<Vec<u8>> {
        let mut cd = Vec::new();
        for record in &self.records {
            record.write_central_header(&mut cd)?;
        }
        let cd_size = cd.len() as u64;
        let eocd64_offset = self.offset + cd_size;

        Zip64EOCD::new(self.records.len() as u64, cd_size, self.offset).write_to(&mut cd)?;
        Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset,
            total_disks: 1,
        }
        .write_to(&mut cd)?;
        EndOfCentralDirectory::zip64_placeholder().write_to(&mut cd)?;
        Ok(cd)
    }

    /// Write the central directory and hand back the sink along with the
    /// total archive size
    pub async fn finish(mut self) -> Result<(W, u64)> {
        let cd = self.central_directory()?;
        self.sink.write_all(&cd).await?;
        self.sink.flush().await?;
        self.offset += cd.len() as u64;
        debug!(entries = self.records.len(), size = self.offset, "finished archive");
        Ok((self.sink, self.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::{FILE_DATE, FILE_TIME, PackageReader};
    use std::sync::Arc;

    async fn build(entries: &[(&str, Vec<u8>)], level: u32) -> (Vec<u8>, Vec<WrittenEntry>) {
        let mut writer = ZipWriter::new(Vec::new());
        let mut written = Vec::new();
        for (name, data) in entries {
            written.push(writer.add_part(name, data, level).await.unwrap());
        }
        let (bytes, size) = writer.finish().await.unwrap();
        assert_eq!(size, bytes.len() as u64);
        (bytes, written)
    }

    #[tokio::test]
    async fn empty_deflated_entry_is_two_bytes() {
        for name in ["hello.world", "x", "some/much/longer/name.bin"] {
            let (_, written) = build(&[(name, Vec::new())], 9).await;
            assert_eq!(written[0].record.compressed_size, 2, "{name}");
            assert!(written[0].blocks.is_empty());
        }
    }

    #[tokio::test]
    async fn stored_entries_have_unsized_blocks() {
        let data = vec![7u8; BLOCK_SIZE + 10];
        let (_, written) = build(&[("a.bin", data.clone())], 0).await;
        let entry = &written[0];
        assert_eq!(entry.record.compression_method, CompressionMethod::Stored);
        assert_eq!(entry.record.compressed_size as usize, data.len());
        assert_eq!(entry.blocks.len(), 2);
        assert!(entry.blocks.iter().all(|b| b.compressed_size.is_none()));
        let first: [u8; 32] = Sha256::digest(&data[..BLOCK_SIZE]).into();
        assert_eq!(entry.blocks[0].hash, first);
    }

    #[tokio::test]
    async fn deflated_block_sizes_cover_all_but_the_trailer() {
        let data: Vec<u8> = (0..3 * BLOCK_SIZE as u32).map(|i| (i % 251) as u8).collect();
        let (_, written) = build(&[("a.bin", data)], 6).await;
        let entry = &written[0];
        assert_eq!(entry.blocks.len(), 3);
        let blocks_total: u64 = entry.blocks.iter().map(|b| b.compressed_size.unwrap()).sum();
        assert!(blocks_total < entry.record.compressed_size as u64);
    }

    #[tokio::test]
    async fn round_trips_through_the_reader() {
        let text = b"This is a test file.\n".repeat(5000);
        for level in [0, 1, 9] {
            let (bytes, _) = build(
                &[("README.txt", text.clone()), ("dir/empty", Vec::new())],
                level,
            )
            .await;
            let reader = PackageReader::new(Arc::<[u8]>::from(bytes));
            let entries = reader.list_files().await.unwrap();
            let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
            assert_eq!(names, ["README.txt", "dir/empty"]);
            assert!(entries.iter().all(|e| {
                (e.last_mod_time, e.last_mod_date) == (FILE_TIME, FILE_DATE) && !e.is_directory
            }));
            assert_eq!(reader.read(&entries[0]).await.unwrap(), text);
            assert_eq!(reader.verify().await.unwrap(), 2);
        }
    }

    #[tokio::test]
    async fn names_are_zip_encoded() {
        let (bytes, written) = build(&[("~hello!world&%@'[foo]", Vec::new())], 0).await;
        assert_eq!(written[0].record.name, "~hello%21world%26%25%40%27%5Bfoo%5D");
        assert_eq!(written[0].archive_path, "~hello!world&%@'[foo]");
        let reader = PackageReader::new(Arc::<[u8]>::from(bytes));
        assert!(reader
            .find("~hello%21world%26%25%40%27%5Bfoo%5D")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn nested_packages_are_stored() {
        let inner = b"PK\x03\x04 already compressed".repeat(100);
        let (bytes, written) = build(
            &[
                ("bundle/inner.appx", inner.clone()),
                ("UPPER.APPX", inner.clone()),
                ("notes.appx.txt", inner.clone()),
            ],
            9,
        )
        .await;
        assert_eq!(written[0].record.compression_method, CompressionMethod::Stored);
        assert_eq!(written[0].record.compressed_size as usize, inner.len());
        assert!(written[0].blocks.iter().all(|b| b.compressed_size.is_none()));
        assert_eq!(written[1].record.compression_method, CompressionMethod::Stored);
        assert_eq!(written[2].record.compression_method, CompressionMethod::Deflate);

        let reader = PackageReader::new(Arc::<[u8]>::from(bytes));
        let entry = reader.find("bundle/inner.appx").await.unwrap().unwrap();
        assert_eq!(reader.read(&entry).await.unwrap(), inner);
    }

    #[test]
    fn nested_package_names() {
        assert!(is_nested_package("a.appx"));
        assert!(is_nested_package("dir/B.AppX"));
        assert!(!is_nested_package(".appx"));
        assert!(!is_nested_package("a.appxbundle"));
        assert!(!is_nested_package("\u{e9}appx"));
    }

    /// Reports more bytes than it holds.
    struct Truncated(Vec<u8>);

    #[async_trait::async_trait]
    impl ReadAt for Truncated {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            self.0.as_slice().read_at(offset, buf).await
        }

        fn size(&self) -> u64 {
            self.0.len() as u64 * 2
        }
    }

    #[tokio::test]
    async fn short_sources_are_read_errors() {
        let mut writer = ZipWriter::new(Vec::new());
        let err = writer
            .add_entry("a.txt", &Truncated(b"abc".to_vec()), 0)
            .await
            .unwrap_err();
        match err {
            AppxError::SourceRead {
                archive_path,
                source,
            } => {
                assert_eq!(archive_path, "a.txt");
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn directory_entries_are_refused() {
        let mut writer = ZipWriter::new(Vec::new());
        let err = writer.add_part("somedir/", b"", 0).await.unwrap_err();
        assert!(matches!(err, AppxError::DirectoryEntry(_)));
    }

    #[tokio::test]
    async fn central_directory_matches_what_finish_writes() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.add_part("a.txt", b"abc", 0).await.unwrap();
        let start = writer.offset() as usize;
        let expected = writer.central_directory().unwrap();
        let (bytes, _) = writer.finish().await.unwrap();
        assert_eq!(&bytes[start..], expected.as_slice());
    }

    #[tokio::test]
    async fn output_is_deterministic() {
        let (first, _) = build(&[("a.txt", b"same".to_vec())], 9).await;
        let (second, _) = build(&[("a.txt", b"same".to_vec())], 9).await;
        assert_eq!(first, second);
    }
}
