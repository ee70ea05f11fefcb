//! End of central directory records, both plain and Zip64.

use log::*;

use super::field::{Field, Invariant};
use super::*;
use crate::result::*;

// 4.3.16  End of central directory record:
//
//   end of central dir signature    4 bytes  (0x06054b50)
//   number of this disk             2 bytes
//   number of the disk with the
//   start of the central directory  2 bytes
//   total number of entries in the
//   central directory on this disk  2 bytes
//   total number of entries in
//   the central directory           2 bytes
//   size of the central directory   4 bytes
//   offset of start of central
//   directory with respect to
//   the starting disk number        4 bytes
//   .ZIP file comment length        2 bytes
//   .ZIP file comment       (variable size)
const F_SIGNATURE: Field = Field::f4(0, "EOCD signature").expecting(EOCDR_MAGIC as u64);
const F_NUMBER_OF_DISK: Field = Field::f2(F_SIGNATURE.end(), "Number of this disk").expecting(0);
const F_DISK_CD_START: Field =
    Field::f2(F_NUMBER_OF_DISK.end(), "Disk where CD starts").expecting(0);
const F_RECORDS_DISK: Field = Field::f2(F_DISK_CD_START.end(), "Record on disk count");
const F_RECORDS_TOTAL: Field = Field::f2(F_RECORDS_DISK.end(), "Total records");
const F_CD_SIZE: Field = Field::f4(F_RECORDS_TOTAL.end(), "Directory size");
const F_CD_OFFSET: Field = Field::f4(F_CD_SIZE.end(), "Directory offset");
const F_COMMENT_SIZE: Field = Field::f2(F_CD_OFFSET.end(), "File comment size");

/// The end of central directory record, which ends every archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eocd {
    total_records: u64,
    directory_offset: u64,
    directory_size: u64,
    comment: Vec<u8>,
}

impl Eocd {
    /// Anything more is stored in the Zip64 EOCD instead.
    pub const MAX_TOTAL_RECORDS: u64 = 0xFFFF;
    pub const MAX_CD_SIZE: u64 = 0xFFFF_FFFF;
    pub const MAX_CD_OFFSET: u64 = 0xFFFF_FFFF;

    /// Size of a record without a comment
    pub const FIXED_SIZE: usize = F_COMMENT_SIZE.end();

    /// The longest comment we can write
    pub const MAX_COMMENT_SIZE: usize = u16::MAX as usize;

    pub fn new(
        total_records: u64,
        directory_offset: u64,
        directory_size: u64,
        comment: Vec<u8>,
    ) -> Self {
        Self {
            total_records,
            directory_offset,
            directory_size,
            comment,
        }
    }

    /// Reads a record from the front of `input`, shrinking it.
    pub fn parse(input: &mut &[u8]) -> ZipResult<Self> {
        F_SIGNATURE.verify(input, None)?;
        // 4.4.19 and 4.4.20: We don't do multi-disk archives.
        F_NUMBER_OF_DISK.verify(input, None)?;
        F_DISK_CD_START.verify(input, None)?;
        let records_on_disk = F_RECORDS_DISK.read(input)?;
        let total_records = F_RECORDS_TOTAL.read(input)?;
        let directory_size = F_CD_SIZE.read(input)?;
        let directory_offset = F_CD_OFFSET.read(input)?;
        let comment_size = crate::arch::usize(F_COMMENT_SIZE.read(input)?)?;

        if records_on_disk != total_records {
            return Err(ZipError::UnsupportedArchive(
                "Zip states records split in multiple disks".to_owned(),
            ));
        }
        if input.len() < comment_size {
            return Err(ZipError::InvalidArchive(format!(
                "Corrupt EOCD record: not enough data for comment (comment size is {})",
                comment_size
            )));
        }
        let (comment, rest) = input.split_at(comment_size);
        *input = rest;

        Ok(Self {
            total_records,
            directory_offset,
            directory_size,
            comment: comment.to_vec(),
        })
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn directory_offset(&self) -> u64 {
        self.directory_offset
    }

    pub fn directory_size(&self) -> u64 {
        self.directory_size
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Bytes the record takes in the file
    pub fn size(&self) -> usize {
        Self::FIXED_SIZE + self.comment.len()
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size());
        F_SIGNATURE.write_expected(&mut out)?;
        F_NUMBER_OF_DISK.write_expected(&mut out)?;
        F_DISK_CD_START.write_expected(&mut out)?;
        F_RECORDS_DISK.write(&mut out, self.total_records)?;
        F_RECORDS_TOTAL.write(&mut out, self.total_records)?;
        F_CD_SIZE.write(&mut out, self.directory_size)?;
        F_CD_OFFSET.write(&mut out, self.directory_offset)?;
        F_COMMENT_SIZE.write(&mut out, self.comment.len() as u64)?;
        out.extend_from_slice(&self.comment);
        Ok(out)
    }
}

// 4.3.14  Zip64 end of central directory record
//
//   zip64 end of central dir
//   signature                       4 bytes  (0x06064b50)
//   size of zip64 end of central
//   directory record                8 bytes
//   version made by                 2 bytes
//   version needed to extract       2 bytes
//   number of this disk             4 bytes
//   number of the disk with the
//   start of the central directory  4 bytes
//   total number of entries in the
//   central directory on this disk  8 bytes
//   total number of entries in the
//   central directory               8 bytes
//   size of the central directory   8 bytes
//   offset of start of central
//   directory with respect to
//   the starting disk number        8 bytes
//   zip64 extensible data sector    (variable size)
//
// 7.3.4 Version 2 of the record adds, between the offset and the data sector,
// the central directory's compression method (2), compressed size (8),
// uncompressed size (8), encryption algorithm (2), key length (2),
// encryption flags (2), hash algorithm (2), and hash length (2).
const F_Z64_SIGNATURE: Field =
    Field::f4(0, "Zip64 EOCD signature").expecting(ZIP64_EOCDR_MAGIC as u64);
const F_Z64_EOCD_SIZE: Field = Field::f8(F_Z64_SIGNATURE.end(), "Zip64 EOCD size")
    .with_invariants(&[Invariant::Min(Zip64Eocd::MIN_EOCD_SIZE)]);
const F_Z64_MADE_BY: Field = Field::f2(F_Z64_EOCD_SIZE.end(), "Made by");
const F_Z64_VERSION_EXTRACT: Field = Field::f2(F_Z64_MADE_BY.end(), "Version to extract")
    .with_invariants(&[Invariant::Min(VERSION_ZIP64 as u64)]);
const F_Z64_NUMBER_OF_DISK: Field =
    Field::f4(F_Z64_VERSION_EXTRACT.end(), "Number of this disk").expecting(0);
const F_Z64_DISK_CD_START: Field =
    Field::f4(F_Z64_NUMBER_OF_DISK.end(), "Disk where CD starts").expecting(0);
const F_Z64_RECORDS_DISK: Field = Field::f8(F_Z64_DISK_CD_START.end(), "Record on disk count");
const F_Z64_RECORDS_TOTAL: Field = Field::f8(F_Z64_RECORDS_DISK.end(), "Total records");
const F_Z64_CD_SIZE: Field = Field::f8(F_Z64_RECORDS_TOTAL.end(), "Directory size");
const F_Z64_CD_OFFSET: Field = Field::f8(F_Z64_CD_SIZE.end(), "Directory offset");
const F_V2_CD_COMPRESSION_METHOD: Field =
    Field::f2(F_Z64_CD_OFFSET.end(), "Version 2: Directory Compression method").expecting(0);
const F_V2_CD_COMPRESSED_SIZE: Field = Field::f8(
    F_V2_CD_COMPRESSION_METHOD.end(),
    "Version 2: Directory Compressed Size",
);
const F_V2_CD_UNCOMPRESSED_SIZE: Field = Field::f8(
    F_V2_CD_COMPRESSED_SIZE.end(),
    "Version 2: Directory Uncompressed Size",
);
const F_V2_CD_ENCRYPTION_ID: Field =
    Field::f2(F_V2_CD_UNCOMPRESSED_SIZE.end(), "Version 2: Directory Encryption").expecting(0);
const F_V2_CD_ENCRYPTION_KEY_LENGTH: Field = Field::f2(
    F_V2_CD_ENCRYPTION_ID.end(),
    "Version 2: Directory Encryption key length",
)
.expecting(0);
const F_V2_CD_ENCRYPTION_FLAGS: Field = Field::f2(
    F_V2_CD_ENCRYPTION_KEY_LENGTH.end(),
    "Version 2: Directory Encryption Flags",
)
.expecting(0);
const F_V2_HASH_ID: Field =
    Field::f2(F_V2_CD_ENCRYPTION_FLAGS.end(), "Version 2: Hash algorithm ID").expecting(0);
const F_V2_HASH_LENGTH: Field =
    Field::f2(F_V2_HASH_ID.end(), "Version 2: Hash length").expecting(0);

/// The Zip64 end of central directory record,
/// holding whatever didn't fit in the plain one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64Eocd {
    made_by: u16,
    version_extract: u16,
    total_records: u64,
    directory_offset: u64,
    directory_size: u64,
    extensible_data: ExtensibleDataSector,
}

impl Zip64Eocd {
    /// Smallest value of the size field: everything after it in a version 1 record
    const MIN_EOCD_SIZE: u64 = 44;

    /// Where the size field is
    pub const SIZE_OFFSET: usize = F_Z64_EOCD_SIZE.offset();

    /// The size field doesn't count itself or the signature.
    pub const TRUE_SIZE_DIFFERENCE: usize = F_Z64_EOCD_SIZE.end();

    pub const V1_FIXED_SIZE: usize = F_Z64_CD_OFFSET.end();
    pub const V2_FIXED_SIZE: usize = F_V2_HASH_LENGTH.end();

    pub fn new(
        total_records: u64,
        directory_offset: u64,
        directory_size: u64,
        use_version_2: bool,
        extensible_data: ExtensibleDataSector,
    ) -> Self {
        Self {
            made_by: DEFAULT_VERSION_MADE_BY,
            version_extract: if use_version_2 {
                VERSION_CENTRAL_DIRECTORY_ENCRYPTION
            } else {
                VERSION_ZIP64
            },
            total_records,
            directory_offset,
            directory_size,
            extensible_data,
        }
    }

    /// Reads a record from the front of `input`, shrinking it.
    pub fn parse(input: &mut &[u8]) -> ZipResult<Self> {
        F_Z64_SIGNATURE.verify(input, None)?;
        let eocd_size = F_Z64_EOCD_SIZE.read(input)?;
        let made_by = F_Z64_MADE_BY.read(input)? as u16;
        let version_extract = F_Z64_VERSION_EXTRACT.read(input)? as u16;
        F_Z64_NUMBER_OF_DISK.verify(input, None)?;
        F_Z64_DISK_CD_START.verify(input, None)?;
        let records_on_disk = F_Z64_RECORDS_DISK.read(input)?;
        let total_records = F_Z64_RECORDS_TOTAL.read(input)?;
        let mut directory_size = F_Z64_CD_SIZE.read(input)?;
        let directory_offset = F_Z64_CD_OFFSET.read(input)?;
        let mut fixed_size = Self::V1_FIXED_SIZE;

        if records_on_disk != total_records {
            return Err(ZipError::UnsupportedArchive(
                "Zip states records split in multiple disks".to_owned(),
            ));
        }

        if version_extract >= VERSION_CENTRAL_DIRECTORY_ENCRYPTION {
            if eocd_size < (Self::V2_FIXED_SIZE - Self::TRUE_SIZE_DIFFERENCE) as u64 {
                return Err(ZipError::InvalidArchive(
                    "Zip states the size of Zip64 EOCD is too small for version 2 format"
                        .to_owned(),
                ));
            }
            let unsupported = |_| {
                ZipError::UnsupportedArchive(
                    "Central directory compression, encryption, or hashing".to_owned(),
                )
            };
            F_V2_CD_COMPRESSION_METHOD
                .verify(input, None)
                .map_err(unsupported)?;
            let compressed_size = F_V2_CD_COMPRESSED_SIZE.read(input)?;
            let uncompressed_size = F_V2_CD_UNCOMPRESSED_SIZE.read(input)?;
            for field in [
                F_V2_CD_ENCRYPTION_ID,
                F_V2_CD_ENCRYPTION_KEY_LENGTH,
                F_V2_CD_ENCRYPTION_FLAGS,
                F_V2_HASH_ID,
                F_V2_HASH_LENGTH,
            ] {
                field.verify(input, None).map_err(unsupported)?;
            }
            if compressed_size != uncompressed_size {
                return Err(ZipError::UnsupportedArchive(
                    "Zip states Central Directory Compression is used".to_owned(),
                ));
            }
            directory_size = uncompressed_size;
            fixed_size = Self::V2_FIXED_SIZE;
        }

        let data_size = eocd_size - (fixed_size - Self::TRUE_SIZE_DIFFERENCE) as u64;
        let data_size = crate::arch::usize(data_size)?;
        if input.len() < data_size {
            return Err(ZipError::InvalidArchive(format!(
                "Zip64 EOCD claims {} bytes of extensible data but only {} remain",
                data_size,
                input.len()
            )));
        }
        let (data, rest) = input.split_at(data_size);
        *input = rest;
        trace!(
            "Read Zip64 EOCD (version to extract {}, {} bytes of extensible data)",
            version_extract,
            data_size
        );

        Ok(Self {
            made_by,
            version_extract,
            total_records,
            directory_offset,
            directory_size,
            extensible_data: ExtensibleDataSector::from_bytes(data.to_vec()),
        })
    }

    /// Does the record use the version 2 layout?
    pub fn is_version_2(&self) -> bool {
        self.version_extract >= VERSION_CENTRAL_DIRECTORY_ENCRYPTION
    }

    fn fixed_size(&self) -> usize {
        if self.is_version_2() {
            Self::V2_FIXED_SIZE
        } else {
            Self::V1_FIXED_SIZE
        }
    }

    /// Bytes the record takes in the file
    pub fn size(&self) -> usize {
        self.fixed_size() + self.extensible_data.size()
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn directory_offset(&self) -> u64 {
        self.directory_offset
    }

    pub fn directory_size(&self) -> u64 {
        self.directory_size
    }

    pub fn extensible_data(&self) -> &ExtensibleDataSector {
        &self.extensible_data
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let size = self.size();
        let mut out = Vec::with_capacity(size);
        F_Z64_SIGNATURE.write_expected(&mut out)?;
        F_Z64_EOCD_SIZE.write(&mut out, (size - Self::TRUE_SIZE_DIFFERENCE) as u64)?;
        F_Z64_MADE_BY.write(&mut out, self.made_by.into())?;
        F_Z64_VERSION_EXTRACT.write(&mut out, self.version_extract.into())?;
        F_Z64_NUMBER_OF_DISK.write_expected(&mut out)?;
        F_Z64_DISK_CD_START.write_expected(&mut out)?;
        F_Z64_RECORDS_DISK.write(&mut out, self.total_records)?;
        F_Z64_RECORDS_TOTAL.write(&mut out, self.total_records)?;
        F_Z64_CD_SIZE.write(&mut out, self.directory_size)?;
        F_Z64_CD_OFFSET.write(&mut out, self.directory_offset)?;
        if self.is_version_2() {
            F_V2_CD_COMPRESSION_METHOD.write_expected(&mut out)?;
            F_V2_CD_COMPRESSED_SIZE.write(&mut out, self.directory_size)?;
            F_V2_CD_UNCOMPRESSED_SIZE.write(&mut out, self.directory_size)?;
            F_V2_CD_ENCRYPTION_ID.write_expected(&mut out)?;
            F_V2_CD_ENCRYPTION_KEY_LENGTH.write_expected(&mut out)?;
            F_V2_CD_ENCRYPTION_FLAGS.write_expected(&mut out)?;
            F_V2_HASH_ID.write_expected(&mut out)?;
            F_V2_HASH_LENGTH.write_expected(&mut out)?;
        }
        self.extensible_data.write(&mut out)?;
        Ok(out)
    }
}

// 4.3.15 Zip64 end of central directory locator
//
//   zip64 end of central dir locator
//   signature                       4 bytes  (0x07064b50)
//   number of the disk with the
//   start of the zip64 end of
//   central directory               4 bytes
//   relative offset of the zip64
//   end of central directory record 8 bytes
//   total number of disks           4 bytes
const F_LOC_SIGNATURE: Field =
    Field::f4(0, "Zip64 EOCD Locator signature").expecting(ZIP64_EOCDR_LOCATOR_MAGIC as u64);
const F_LOC_NUMBER_OF_DISK: Field =
    Field::f4(F_LOC_SIGNATURE.end(), "Number of disk with Zip64 EOCD").expecting(0);
const F_LOC_Z64_EOCD_OFFSET: Field = Field::f8(F_LOC_NUMBER_OF_DISK.end(), "Offset of Zip64 EOCD");
// We write 0; plenty of tools write 1 for a single-disk archive.
const F_LOC_TOTAL_NUMBER_OF_DISKS: Field =
    Field::f4(F_LOC_Z64_EOCD_OFFSET.end(), "Total number of disks").expecting(0);

/// Says where the Zip64 EOCD is. Sits right before the plain EOCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Locator {
    eocd_offset: u64,
}

impl Zip64Locator {
    pub const SIZE: usize = F_LOC_TOTAL_NUMBER_OF_DISKS.end();

    pub fn new(eocd_offset: u64) -> Self {
        Self { eocd_offset }
    }

    pub fn parse(input: &mut &[u8]) -> ZipResult<Self> {
        F_LOC_SIGNATURE.verify(input, None)?;
        F_LOC_NUMBER_OF_DISK.verify(input, None)?;
        let eocd_offset = F_LOC_Z64_EOCD_OFFSET.read(input)?;
        let disks = F_LOC_TOTAL_NUMBER_OF_DISKS.read(input)?;
        if disks > 1 {
            return Err(ZipError::UnsupportedArchive(format!(
                "Zip64 locator claims {} disks",
                disks
            )));
        }
        Ok(Self { eocd_offset })
    }

    /// Where the Zip64 EOCD record starts
    pub fn eocd_offset(&self) -> u64 {
        self.eocd_offset
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::SIZE);
        F_LOC_SIGNATURE.write_expected(&mut out)?;
        F_LOC_NUMBER_OF_DISK.write_expected(&mut out)?;
        F_LOC_Z64_EOCD_OFFSET.write(&mut out, self.eocd_offset)?;
        F_LOC_TOTAL_NUMBER_OF_DISKS.write_expected(&mut out)?;
        Ok(out)
    }
}

/// One record of the Zip64 extensible data sector.
///
/// Unlike extra field segments, these have 4-byte lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialPurposeData {
    pub header_id: u16,
    pub data: Vec<u8>,
}

impl SpecialPurposeData {
    /// Header ID and data size
    pub const PREFIX_LENGTH: usize = 6;

    pub fn size(&self) -> usize {
        Self::PREFIX_LENGTH + self.data.len()
    }

    fn write(&self, out: &mut Vec<u8>) -> ZipResult<()> {
        out.extend_from_slice(&self.header_id.to_le_bytes());
        let len = crate::arch::u32(self.data.len() as u64, "special purpose data")?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

/// Whatever follows the fixed fields of a Zip64 EOCD.
///
/// Like extra fields, it's kept raw until somebody wants to look inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensibleDataSector {
    Raw(Vec<u8>),
    Fields(Vec<SpecialPurposeData>),
}

impl Default for ExtensibleDataSector {
    fn default() -> Self {
        ExtensibleDataSector::Fields(Vec::new())
    }
}

impl ExtensibleDataSector {
    pub fn from_bytes(raw: Vec<u8>) -> Self {
        ExtensibleDataSector::Raw(raw)
    }

    pub fn size(&self) -> usize {
        match self {
            ExtensibleDataSector::Raw(r) => r.len(),
            ExtensibleDataSector::Fields(f) => f.iter().map(SpecialPurposeData::size).sum(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> ZipResult<()> {
        match self {
            ExtensibleDataSector::Raw(r) => out.extend_from_slice(r),
            ExtensibleDataSector::Fields(fields) => {
                for f in fields {
                    f.write(out)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eocd_round_trip() {
        let eocd = Eocd::new(3, 1000, 150, b"hi there".to_vec());
        let bytes = eocd.to_bytes().unwrap();
        assert_eq!(bytes.len(), eocd.size());
        assert_eq!(bytes.len(), 22 + 8);
        assert_eq!(Eocd::parse(&mut bytes.as_slice()).unwrap(), eocd);
    }

    #[test]
    fn eocd_comment_must_fit() {
        let mut bytes = Eocd::new(0, 0, 0, b"abc".to_vec()).to_bytes().unwrap();
        bytes.pop();
        let err = Eocd::parse(&mut bytes.as_slice()).unwrap_err();
        assert!(err.to_string().contains("not enough data for comment"));
    }

    #[test]
    fn eocd_fields_overflow() {
        assert!(matches!(
            Eocd::new(0x1_0000, 0, 0, vec![]).to_bytes(),
            Err(ZipError::InvalidField { .. })
        ));
    }

    #[test]
    fn multi_disk_eocd() {
        let mut bytes = Eocd::new(2, 0, 0, vec![]).to_bytes().unwrap();
        bytes[8] = 1; // Records on this disk
        assert!(matches!(
            Eocd::parse(&mut bytes.as_slice()),
            Err(ZipError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn zip64_v1() {
        let eocd = Zip64Eocd::new(70_000, 0x1_0000_0000, 5_000_000, false, Default::default());
        let bytes = eocd.to_bytes().unwrap();
        assert_eq!(bytes.len(), 56);
        // Size excludes the signature and the size field itself.
        assert_eq!(u64::from_le_bytes(bytes[4..12].try_into().unwrap()), 44);
        let read = Zip64Eocd::parse(&mut bytes.as_slice()).unwrap();
        assert!(!read.is_version_2());
        assert_eq!(read.total_records(), 70_000);
        assert_eq!(read.directory_offset(), 0x1_0000_0000);
        assert_eq!(read.directory_size(), 5_000_000);
        assert_eq!(read.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn zip64_v2() {
        let eocd = Zip64Eocd::new(1, 2, 3, true, Default::default());
        let bytes = eocd.to_bytes().unwrap();
        assert_eq!(bytes.len(), 84);
        assert_eq!(u64::from_le_bytes(bytes[4..12].try_into().unwrap()), 72);
        let read = Zip64Eocd::parse(&mut bytes.as_slice()).unwrap();
        assert!(read.is_version_2());
        assert_eq!(read.directory_size(), 3);
        // Version needed to extract
        assert_eq!(
            u16::from_le_bytes([bytes[14], bytes[15]]),
            VERSION_CENTRAL_DIRECTORY_ENCRYPTION
        );
    }

    #[test]
    fn zip64_v2_compressed_directory() {
        let mut bytes = Zip64Eocd::new(1, 2, 3, true, Default::default())
            .to_bytes()
            .unwrap();
        // Compressed size (right after the method) differs from uncompressed.
        bytes[58] = 2;
        assert!(matches!(
            Zip64Eocd::parse(&mut bytes.as_slice()),
            Err(ZipError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn zip64_extensible_data() {
        let sector = ExtensibleDataSector::Fields(vec![SpecialPurposeData {
            header_id: 0x0019,
            data: vec![1, 2, 3],
        }]);
        let eocd = Zip64Eocd::new(1, 2, 3, false, sector.clone());
        let bytes = eocd.to_bytes().unwrap();
        assert_eq!(bytes.len(), 56 + 9);
        let read = Zip64Eocd::parse(&mut bytes.as_slice()).unwrap();
        // Kept raw, but written back the same
        assert_eq!(read.extensible_data().size(), sector.size());
        assert_eq!(read.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn zip64_version_floor() {
        let mut bytes = Zip64Eocd::new(1, 2, 3, false, Default::default())
            .to_bytes()
            .unwrap();
        bytes[14] = 20; // Version to extract
        assert!(Zip64Eocd::parse(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn locator() {
        let locator = Zip64Locator::new(0xdead_beef_0);
        let bytes = locator.to_bytes().unwrap();
        assert_eq!(bytes.len(), Zip64Locator::SIZE);
        assert_eq!(Zip64Locator::parse(&mut bytes.as_slice()).unwrap(), locator);
    }
}
