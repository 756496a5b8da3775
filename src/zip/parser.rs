//! Central directory parsing for produced packages.
//!
//! Packages are read back from the end, the same way any ZIP consumer does:
//! locate the end record, follow the ZIP64 locator when the classic record
//! is saturated, then walk the central directory. Local headers are only
//! touched to find where an entry's data begins.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;

use super::structures::*;

/// Largest ZIP comment the end record can announce
const MAX_COMMENT_SIZE: u64 = 65535;

/// ZIP64 extended information extra field id
const ZIP64_EXTRA_ID: u16 = 0x0001;

fn invalid(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Low-level parser over any [`ReadAt`] source.
pub struct ZipParser<R: ReadAt + ?Sized> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt + ?Sized> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Locate the classic end of central directory record.
    ///
    /// Returns the record and its offset. Archives written by this crate
    /// never carry a comment, but commented archives are handled by scanning
    /// backwards over the largest possible comment.
    pub async fn find_eocd(&self) -> io::Result<(EndOfCentralDirectory, u64)> {
        let record_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < record_size {
            return Err(invalid("Not a valid ZIP file"));
        }

        let tail_len = (MAX_COMMENT_SIZE + record_size).min(self.size);
        let tail_start = self.size - tail_len;
        let mut tail = vec![0u8; tail_len as usize];
        self.reader.read_exact_at(tail_start, &mut tail).await?;

        let last = tail.len() - EndOfCentralDirectory::SIZE;
        for i in (0..=last).rev() {
            if &tail[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
            if comment_len == tail.len() - i - EndOfCentralDirectory::SIZE {
                let eocd = EndOfCentralDirectory::from_bytes(&tail[i..])?;
                return Ok((eocd, tail_start + i as u64));
            }
        }

        Err(invalid("Not a valid ZIP file"))
    }

    /// Follow the locator that sits right before the classic end record.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> io::Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| invalid("Invalid ZIP64 format"))?;
        let mut buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut buf).await?;
        let locator = Zip64EOCDLocator::from_bytes(&buf)?;

        let mut buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut buf)
            .await?;
        Zip64EOCD::from_bytes(&buf)
    }

    /// Parse every central directory entry, in directory order.
    pub async fn list_files(&self) -> io::Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };
        if cd_offset.saturating_add(cd_size) > self.size {
            return Err(invalid("Central directory lies outside the file"));
        }

        let mut cd = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd).await?;

        let mut cursor = Cursor::new(cd.as_slice());
        (0..total_entries)
            .map(|_| Self::parse_cdfh(&mut cursor))
            .collect()
    }

    fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> io::Result<ZipFileEntry> {
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(invalid("Invalid Central Directory File Header"));
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let _flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as u64;
        let comment_len = cursor.read_u16::<LittleEndian>()? as u64;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        let mut name = vec![0u8; name_len];
        cursor.read_exact(&mut name)?;
        let file_name = String::from_utf8_lossy(&name).into_owned();
        let is_directory = file_name.ends_with('/');

        // Only the ZIP64 field matters; its members appear only for saturated
        // header values, in a fixed order.
        let extra_end = cursor.position() + extra_len;
        while cursor.position() + 4 <= extra_end {
            let id = cursor.read_u16::<LittleEndian>()?;
            let len = cursor.read_u16::<LittleEndian>()? as u64;
            let field_end = cursor.position() + len;
            if id == ZIP64_EXTRA_ID {
                for value in [&mut uncompressed_size, &mut compressed_size, &mut lfh_offset] {
                    if *value == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                        *value = cursor.read_u64::<LittleEndian>()?;
                    }
                }
            }
            cursor.set_position(field_end);
        }
        cursor.set_position(extra_end + comment_len);

        Ok(ZipFileEntry {
            file_name,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            is_directory,
        })
    }

    /// Offset of the first data byte of `entry`, past its local header.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> io::Result<u64> {
        let mut lfh = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh).await?;
        if &lfh[0..4] != LFH_SIGNATURE {
            return Err(invalid("Invalid Local File Header"));
        }

        let name_len = u16::from_le_bytes([lfh[26], lfh[27]]) as u64;
        let extra_len = u16::from_le_bytes([lfh[28], lfh[29]]) as u64;
        Ok(entry.lfh_offset + LFH_SIZE as u64 + name_len + extra_len)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}
