use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

/// Hard-coded DOS time stamp (16:56:12) so archives are reproducible
pub const FILE_TIME: u16 = 0x8706;
/// Hard-coded DOS date stamp (2015-09-02)
pub const FILE_DATE: u16 = 0x4722;

/// Version made by, for central directory entries and ZIP64 records
pub const ARCHIVER_VERSION: u16 = 45;
/// Version needed to extract a single file
pub const FILE_EXTRACT_VERSION: u16 = 20;
/// Version needed to extract the archive (ZIP64 end records)
pub const ARCHIVE_EXTRACT_VERSION: u16 = 45;

fn invalid(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Metadata shared by the local file header and the central directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Name as stored in the archive (already ZIP-encoded)
    pub name: String,
    pub compression_method: CompressionMethod,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    /// Offset of the local file header from the start of the archive
    pub lfh_offset: u32,
}

impl FileRecord {
    /// Size of the local file header including the name
    pub fn local_header_size(&self) -> u64 {
        LFH_SIZE as u64 + self.name.len() as u64
    }

    /// Size of the central directory entry including the name
    pub fn central_header_size(&self) -> u64 {
        CDFH_MIN_SIZE as u64 + self.name.len() as u64
    }

    pub fn write_local_header<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(LFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(FILE_EXTRACT_VERSION)?;
        w.write_u16::<LittleEndian>(0)?; // Flags
        w.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        w.write_u16::<LittleEndian>(FILE_TIME)?;
        w.write_u16::<LittleEndian>(FILE_DATE)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.name_len()?)?;
        w.write_u16::<LittleEndian>(0)?; // Extra field length
        w.write_all(self.name.as_bytes())
    }

    pub fn write_central_header<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(CDFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(ARCHIVER_VERSION)?;
        w.write_u16::<LittleEndian>(FILE_EXTRACT_VERSION)?;
        w.write_u16::<LittleEndian>(0)?; // Flags
        w.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        w.write_u16::<LittleEndian>(FILE_TIME)?;
        w.write_u16::<LittleEndian>(FILE_DATE)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.name_len()?)?;
        w.write_u16::<LittleEndian>(0)?; // Extra field length
        w.write_u16::<LittleEndian>(0)?; // File comment length
        w.write_u16::<LittleEndian>(0)?; // Disk number start
        w.write_u16::<LittleEndian>(0)?; // Internal attributes
        w.write_u32::<LittleEndian>(0)?; // External attributes
        w.write_u32::<LittleEndian>(self.lfh_offset)?;
        w.write_all(self.name.as_bytes())
    }

    fn name_len(&self) -> io::Result<u16> {
        u16::try_from(self.name.len()).map_err(|_| invalid("file name is too long"))
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Record that defers every count and offset to the ZIP64 records
    pub fn zip64_placeholder() -> Self {
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 0xFFFF,
            total_entries: 0xFFFF,
            cd_size: 0xFFFFFFFF,
            cd_offset: 0xFFFFFFFF,
            comment_len: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(invalid("Invalid End of Central Directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.disk_number)?;
        w.write_u16::<LittleEndian>(self.disk_with_cd)?;
        w.write_u16::<LittleEndian>(self.disk_entries)?;
        w.write_u16::<LittleEndian>(self.total_entries)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(self.comment_len)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(invalid("Invalid ZIP64 format"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        w.write_u64::<LittleEndian>(self.eocd64_offset)?;
        w.write_u32::<LittleEndian>(self.total_disks)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn new(total_entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            // Size of the record after the size field itself
            eocd64_size: Self::MIN_SIZE as u64 - 12,
            version_made_by: ARCHIVER_VERSION,
            version_needed: ARCHIVE_EXTRACT_VERSION,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: total_entries,
            total_entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(invalid("Invalid ZIP64 format"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u64::<LittleEndian>(self.eocd64_size)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u32::<LittleEndian>(self.disk_number)?;
        w.write_u32::<LittleEndian>(self.disk_with_cd)?;
        w.write_u64::<LittleEndian>(self.disk_entries)?;
        w.write_u64::<LittleEndian>(self.total_entries)?;
        w.write_u64::<LittleEndian>(self.cd_size)?;
        w.write_u64::<LittleEndian>(self.cd_offset)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        FileRecord {
            name: "a%20b.txt".to_string(),
            compression_method: CompressionMethod::Deflate,
            crc32: 0xDEADBEEF,
            compressed_size: 2,
            uncompressed_size: 0,
            lfh_offset: 1234,
        }
    }

    #[test]
    fn header_sizes_match_written_bytes() {
        let record = record();
        let mut local = Vec::new();
        record.write_local_header(&mut local).unwrap();
        assert_eq!(local.len() as u64, record.local_header_size());
        assert_eq!(&local[0..4], LFH_SIGNATURE);

        let mut central = Vec::new();
        record.write_central_header(&mut central).unwrap();
        assert_eq!(central.len() as u64, record.central_header_size());
        assert_eq!(&central[central.len() - 9..], b"a%20b.txt");
    }

    #[test]
    fn end_records_round_trip() {
        let mut buf = Vec::new();
        Zip64EOCD::new(3, 200, 1000).write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Zip64EOCD::MIN_SIZE);
        let eocd64 = Zip64EOCD::from_bytes(&buf).unwrap();
        assert_eq!(eocd64.total_entries, 3);
        assert_eq!(eocd64.cd_offset, 1000);

        let mut buf = Vec::new();
        EndOfCentralDirectory::zip64_placeholder()
            .write_to(&mut buf)
            .unwrap();
        assert_eq!(buf.len(), EndOfCentralDirectory::SIZE);
        assert!(EndOfCentralDirectory::from_bytes(&buf).unwrap().is_zip64());
    }
}
