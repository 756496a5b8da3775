use flate2::read::DeflateDecoder;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use crate::io::{LocalFileReader, ReadAt};

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Reads packages back, verifying checksums as entries are extracted
pub struct PackageReader<R: ReadAt + ?Sized> {
    parser: ZipParser<R>,
}

impl PackageReader<LocalFileReader> {
    /// Open a package on disk
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(Arc::new(LocalFileReader::new(path)?)))
    }
}

impl<R: ReadAt + ?Sized> PackageReader<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all entries in the package
    pub async fn list_files(&self) -> io::Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Find an entry by its stored (encoded) name
    pub async fn find(&self, stored_name: &str) -> io::Result<Option<ZipFileEntry>> {
        Ok(self
            .list_files()
            .await?
            .into_iter()
            .find(|e| e.file_name == stored_name))
    }

    /// Extract entry data to memory, checking size and CRC-32
    pub async fn read(&self, entry: &ZipFileEntry) -> io::Result<Vec<u8>> {
        let data_offset = self.parser.get_data_offset(entry).await?;
        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.parser
            .reader()
            .read_exact_at(data_offset, &mut raw)
            .await?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => {
                let mut data = Vec::with_capacity(entry.uncompressed_size as usize);
                DeflateDecoder::new(raw.as_slice()).read_to_end(&mut data)?;
                data
            }
            CompressionMethod::Unknown(method) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("Unsupported compression method: {method}"),
                ));
            }
        };

        if data.len() as u64 != entry.uncompressed_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: size mismatch", entry.file_name),
            ));
        }
        if crc32fast::hash(&data) != entry.crc32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: CRC-32 mismatch", entry.file_name),
            ));
        }

        Ok(data)
    }

    /// Extract every entry, returning the first checksum failure.
    /// Packages never contain directory entries.
    pub async fn verify(&self) -> io::Result<usize> {
        let entries = self.list_files().await?;
        for entry in &entries {
            if entry.is_directory {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: unexpected directory entry", entry.file_name),
                ));
            }
            self.read(entry).await?;
        }
        Ok(entries.len())
    }
}
