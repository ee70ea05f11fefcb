//! Central directory headers and local file headers.
//!
//! Both describe the same entry, and most of their fields are duplicates.
//! The central directory is authoritative; we only read local headers to
//! find where the data starts (and to complain if they disagree).

use chrono::NaiveDateTime;
use log::*;

use super::extra::{ExtraField, Segment, ZIP64_HEADER_ID};
use super::field::Field;
use super::flags::{CompressionMethod, GpFlags};
use super::*;
use crate::compress::CompressionTask;
use crate::result::*;
use crate::verify_log::VerifyLog;

// 4.3.12  Central directory structure:
//
//   central file header signature   4 bytes  (0x02014b50)
//   version made by                 2 bytes
//   version needed to extract       2 bytes
//   general purpose bit flag        2 bytes
//   compression method              2 bytes
//   last mod file time              2 bytes
//   last mod file date              2 bytes
//   crc-32                          4 bytes
//   compressed size                 4 bytes
//   uncompressed size               4 bytes
//   file name length                2 bytes
//   extra field length              2 bytes
//   file comment length             2 bytes
//   disk number start               2 bytes
//   internal file attributes        2 bytes
//   external file attributes        4 bytes
//   relative offset of local header 4 bytes
//
//   file name (variable size)
//   extra field (variable size)
//   file comment (variable size)
const F_SIGNATURE: Field = Field::f4(0, "Signature").expecting(CENTRAL_DIRECTORY_MAGIC as u64);
const F_MADE_BY: Field = Field::f2(F_SIGNATURE.end(), "Made by");
const F_VERSION_EXTRACT: Field = Field::f2(F_MADE_BY.end(), "Version to extract");
const F_GP_BIT: Field = Field::f2(F_VERSION_EXTRACT.end(), "GP bit flag");
const F_METHOD: Field = Field::f2(F_GP_BIT.end(), "Compression method");
const F_LAST_MOD_TIME: Field = Field::f2(F_METHOD.end(), "Last modification time");
const F_LAST_MOD_DATE: Field = Field::f2(F_LAST_MOD_TIME.end(), "Last modification date");
const F_CRC32: Field = Field::f4(F_LAST_MOD_DATE.end(), "CRC32");
const F_COMPRESSED_SIZE: Field = Field::f4(F_CRC32.end(), "Compressed size");
const F_UNCOMPRESSED_SIZE: Field = Field::f4(F_COMPRESSED_SIZE.end(), "Uncompressed size");
const F_FILE_NAME_LENGTH: Field = Field::f2(F_UNCOMPRESSED_SIZE.end(), "File name length");
const F_EXTRA_FIELD_LENGTH: Field = Field::f2(F_FILE_NAME_LENGTH.end(), "Extra field length");
const F_COMMENT_LENGTH: Field = Field::f2(F_EXTRA_FIELD_LENGTH.end(), "Comment length");
const F_DISK_NUMBER_START: Field = Field::f2(F_COMMENT_LENGTH.end(), "Disk start").expecting(0);
const F_INTERNAL_ATTRIBUTES: Field = Field::f2(F_DISK_NUMBER_START.end(), "Int attributes");
const F_EXTERNAL_ATTRIBUTES: Field = Field::f4(F_INTERNAL_ATTRIBUTES.end(), "Ext attributes");
const F_OFFSET: Field = Field::f4(F_EXTERNAL_ATTRIBUTES.end(), "Offset");

/// Size of a central directory header without its name, extra field, or comment
pub const CENTRAL_HEADER_FIXED_SIZE: usize = F_OFFSET.end();

// 4.3.7  Local file header:
//
// local file header signature     4 bytes  (0x04034b50)
// version needed to extract       2 bytes
// general purpose bit flag        2 bytes
// compression method              2 bytes
// last mod file time              2 bytes
// last mod file date              2 bytes
// crc-32                          4 bytes
// compressed size                 4 bytes
// uncompressed size               4 bytes
// file name length                2 bytes
// extra field length              2 bytes
//
// file name (variable size)
// extra field (variable size)
const F_LOCAL_SIGNATURE: Field =
    Field::f4(0, "Signature").expecting(LOCAL_FILE_HEADER_MAGIC as u64);
const F_LOCAL_VERSION_EXTRACT: Field = Field::f2(F_LOCAL_SIGNATURE.end(), "Version to extract");
const F_LOCAL_GP_BIT: Field = Field::f2(F_LOCAL_VERSION_EXTRACT.end(), "GP bit flag");
const F_LOCAL_METHOD: Field = Field::f2(F_LOCAL_GP_BIT.end(), "Compression method");
const F_LOCAL_LAST_MOD_TIME: Field = Field::f2(F_LOCAL_METHOD.end(), "Last modification time");
const F_LOCAL_LAST_MOD_DATE: Field =
    Field::f2(F_LOCAL_LAST_MOD_TIME.end(), "Last modification date");
const F_LOCAL_CRC32: Field = Field::f4(F_LOCAL_LAST_MOD_DATE.end(), "CRC32");
const F_LOCAL_COMPRESSED_SIZE: Field = Field::f4(F_LOCAL_CRC32.end(), "Compressed size");
const F_LOCAL_UNCOMPRESSED_SIZE: Field =
    Field::f4(F_LOCAL_COMPRESSED_SIZE.end(), "Uncompressed size");
const F_LOCAL_FILE_NAME_LENGTH: Field =
    Field::f2(F_LOCAL_UNCOMPRESSED_SIZE.end(), "File name length");
const F_LOCAL_EXTRA_LENGTH: Field = Field::f2(F_LOCAL_FILE_NAME_LENGTH.end(), "Extra length");

/// Size of a local header without its name or extra field
pub const LOCAL_HEADER_FIXED_SIZE: usize = F_LOCAL_EXTRA_LENGTH.end();

/// The most we'll put in a local header's extra field.
///
/// The length field is two bytes, but some readers treat it as signed.
pub const MAX_LOCAL_EXTRA_SIZE: usize = i16::MAX as usize;

// 4.3.9  Data descriptor:
//
//     crc-32                          4 bytes
//     compressed size                 4 bytes
//     uncompressed size               4 bytes
//
// 4.3.9.3 Although not originally assigned a signature, the value
// 0x08074b50 has commonly been adopted as a signature value
// for the data descriptor record.
const F_DD_SIGNATURE: Field = Field::f4(0, "Data descriptor signature")
    .expecting(DATA_DESCRIPTOR_MAGIC as u64);
pub(crate) const F_DD_CRC32: Field = Field::f4(F_DD_SIGNATURE.end(), "CRC32");
pub(crate) const F_DD_COMPRESSED_SIZE: Field = Field::f4(F_DD_CRC32.end(), "Compressed size");
pub(crate) const F_DD_UNCOMPRESSED_SIZE: Field =
    Field::f4(F_DD_COMPRESSED_SIZE.end(), "Uncompressed size");

/// Does a data descriptor starting with `first_four` have a signature?
pub(crate) fn data_descriptor_has_signature(first_four: &[u8]) -> bool {
    let mut input = first_four;
    F_DD_SIGNATURE.verify(&mut input, None).is_ok()
}

/// Value in 4-byte size and offset fields saying "see the Zip64 extra field"
const ZIP64_SENTINEL: u64 = u32::MAX as u64;

/// How an entry's data is stored, which we might not know until
/// compression finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressInfo {
    pub method: CompressionMethod,
    pub compressed_size: u64,
    pub version_extract: u16,
}

impl CompressInfo {
    /// Info for new data, picking the version needed to extract it.
    pub fn new(method: CompressionMethod, compressed_size: u64, is_directory: bool) -> Self {
        let version_extract = if is_directory || method == CompressionMethod::Deflate {
            VERSION_DIRECTORY_OR_DEFLATE
        } else {
            VERSION_DEFAULT
        };
        Self {
            method,
            compressed_size,
            version_extract,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum CompressState {
    Ready(CompressInfo),
    Pending {
        task: CompressionTask,
        is_directory: bool,
    },
}

/// An entry, as described by the central directory.
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    name: String,
    encoded_name: Vec<u8>,
    uncompressed_size: u64,
    crc32: u32,
    made_by: u16,
    flags: GpFlags,
    last_mod_time: u16,
    last_mod_date: u16,
    extra: ExtraField,
    comment: Vec<u8>,
    internal_attributes: u16,
    external_attributes: u32,
    /// Where the local header is, if it's been written
    offset: Option<u64>,
    compress: CompressState,
}

impl CentralDirectoryHeader {
    /// A header for a new entry, not yet in any file.
    pub(crate) fn new(
        name: &str,
        uncompressed_size: u64,
        crc32: u32,
        compress: CompressState,
        (last_mod_time, last_mod_date): (u16, u16),
    ) -> Self {
        let (encoded_name, flags) = encode_name(name);
        Self {
            name: name.to_owned(),
            encoded_name,
            uncompressed_size,
            crc32,
            made_by: DEFAULT_VERSION_MADE_BY,
            flags,
            last_mod_time,
            last_mod_date,
            extra: ExtraField::Empty,
            comment: Vec::new(),
            internal_attributes: 0,
            external_attributes: 0,
            offset: None,
            compress,
        }
    }

    /// A copy of this header for an entry named `name` that shares its data.
    pub(crate) fn link(&self, name: &str) -> Self {
        let (encoded_name, flags) = encode_name(name);
        Self {
            name: name.to_owned(),
            encoded_name,
            flags,
            offset: None,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoded_name(&self) -> &[u8] {
        &self.encoded_name
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with(SEPARATOR)
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn made_by(&self) -> u16 {
        self.made_by
    }

    pub fn flags(&self) -> GpFlags {
        self.flags
    }

    /// Drops the deferred CRC bit (and any others);
    /// we never write data descriptors.
    pub(crate) fn reset_deferred_crc(&mut self) {
        self.flags = self.flags.reset_deferred_crc();
    }

    pub fn last_mod_time(&self) -> u16 {
        self.last_mod_time
    }

    pub fn last_mod_date(&self) -> u16 {
        self.last_mod_date
    }

    /// The modification time, if it's a valid MS-DOS date and time
    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        parse_msdos(self.last_mod_time, self.last_mod_date)
    }

    pub fn extra(&self) -> &ExtraField {
        &self.extra
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn internal_attributes(&self) -> u16 {
        self.internal_attributes
    }

    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub(crate) fn set_external_attributes(&mut self, attributes: u32) {
        self.external_attributes = attributes;
    }

    /// Where the entry's local header starts, if it's been written
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: Option<u64>) {
        self.offset = offset;
    }

    /// How the data is stored, waiting for compression to finish if needed.
    pub fn compress_info(&self) -> ZipResult<CompressInfo> {
        match &self.compress {
            CompressState::Ready(info) => Ok(*info),
            CompressState::Pending { task, is_directory } => {
                let result = task.wait()?;
                Ok(CompressInfo::new(result.method, result.size(), *is_directory))
            }
        }
    }

    /// Has compression finished (successfully or not)?
    pub fn is_compress_done(&self) -> bool {
        match &self.compress {
            CompressState::Ready(_) => true,
            CompressState::Pending { task, .. } => task.is_done(),
        }
    }

    /// Do the offset or sizes need the Zip64 extended information field?
    pub(crate) fn needs_zip64(&self) -> ZipResult<bool> {
        let info = self.compress_info()?;
        Ok(self.uncompressed_size >= ZIP64_SENTINEL
            || info.compressed_size >= ZIP64_SENTINEL
            || self.offset.unwrap_or(0) >= ZIP64_SENTINEL)
    }

    /// Reads a header from the front of `input`, shrinking it.
    pub(crate) fn parse(
        input: &mut &[u8],
        ignore_timestamps: bool,
        log: &mut VerifyLog,
    ) -> ZipResult<Self> {
        F_SIGNATURE.verify(input, None)?;
        let made_by = F_MADE_BY.read(input)? as u16;

        let version_extract = F_VERSION_EXTRACT.read(input)? as u16;
        log.verify(u64::from(version_extract) <= MAX_VERSION_TO_EXTRACT, || {
            format!(
                "Ignored unknown version needed to extract in zip directory entry: {}",
                version_extract
            )
        });

        let flags = GpFlags::from_bits(F_GP_BIT.read(input)?)?;

        let method = CompressionMethod::from_code(F_METHOD.read(input)? as u16);
        log.verify(!matches!(method, CompressionMethod::Unsupported(_)), || {
            format!("Unknown method in zip directory entry: {}", method.code())
        });

        let (last_mod_time, last_mod_date) = if ignore_timestamps {
            F_LAST_MOD_TIME.skip(input)?;
            F_LAST_MOD_DATE.skip(input)?;
            (0, 0)
        } else {
            (
                F_LAST_MOD_TIME.read(input)? as u16,
                F_LAST_MOD_DATE.read(input)? as u16,
            )
        };

        let crc32 = F_CRC32.read(input)? as u32;
        let mut compressed_size = F_COMPRESSED_SIZE.read(input)?;
        let mut uncompressed_size = F_UNCOMPRESSED_SIZE.read(input)?;
        let name_length = crate::arch::usize(F_FILE_NAME_LENGTH.read(input)?)?;
        let extra_length = crate::arch::usize(F_EXTRA_FIELD_LENGTH.read(input)?)?;
        let comment_length = crate::arch::usize(F_COMMENT_LENGTH.read(input)?)?;

        F_DISK_NUMBER_START.verify(input, Some(log))?;
        let internal_attributes = F_INTERNAL_ATTRIBUTES.read(input)? as u16;
        // 4.4.14: Bit 0 marks apparent text (ASCII) files.
        // The rest are reserved, or used by mainframes.
        log.verify(internal_attributes & !1 == 0, || {
            format!("Ignored invalid internal attributes: {}", internal_attributes)
        });
        let external_attributes = F_EXTERNAL_ATTRIBUTES.read(input)? as u32;
        let mut offset = F_OFFSET.read(input)?;

        let remaining = name_length + extra_length + comment_length;
        if input.len() < remaining {
            return Err(ZipError::InvalidArchive(format!(
                "Directory entry should have {} bytes remaining (name = {}, extra = {}, comment = {}), but it has {}",
                remaining,
                name_length,
                extra_length,
                comment_length,
                input.len()
            )));
        }
        let (encoded_name, rest) = input.split_at(name_length);
        let (extra, rest) = rest.split_at(extra_length);
        let (comment, rest) = rest.split_at(comment_length);
        *input = rest;

        let name = decode_name(encoded_name, flags);
        let extra = ExtraField::from_bytes(extra);

        if [uncompressed_size, compressed_size, offset].contains(&ZIP64_SENTINEL) {
            resolve_zip64(
                &name,
                &extra,
                &mut uncompressed_size,
                &mut compressed_size,
                &mut offset,
            )?;
        }
        trace!(
            "Read directory entry {} at {}: {} -> {} bytes",
            name,
            offset,
            compressed_size,
            uncompressed_size
        );

        Ok(Self {
            name,
            encoded_name: encoded_name.to_vec(),
            uncompressed_size,
            crc32,
            made_by,
            flags,
            last_mod_time,
            last_mod_date,
            extra,
            comment: comment.to_vec(),
            internal_attributes,
            external_attributes,
            offset: Some(offset),
            compress: CompressState::Ready(CompressInfo {
                method,
                compressed_size,
                version_extract,
            }),
        })
    }

    /// The extra field as it should be written to the central directory,
    /// with the Zip64 extended information rebuilt if we need it.
    fn directory_extra(&self, info: &CompressInfo, offset: u64) -> ZipResult<ExtraField> {
        let mut zip64 = Vec::new();
        for value in [self.uncompressed_size, info.compressed_size, offset] {
            if value >= ZIP64_SENTINEL {
                zip64.extend_from_slice(&value.to_le_bytes());
            }
        }
        if zip64.is_empty() {
            return Ok(self.extra.clone());
        }
        let mut segments = self
            .extra
            .segments()
            .context(|| format!("Can't add Zip64 information to {}", self.name))?;
        segments.retain(|s| s.header_id() != ZIP64_HEADER_ID);
        segments.insert(
            0,
            Segment::Raw {
                header_id: ZIP64_HEADER_ID,
                data: zip64,
            },
        );
        Ok(ExtraField::from_segments(segments))
    }

    /// Bytes this header takes in the central directory.
    pub(crate) fn record_size(&self) -> ZipResult<usize> {
        let info = self.compress_info()?;
        let extra = self.directory_extra(&info, self.offset.unwrap_or(0))?;
        Ok(CENTRAL_HEADER_FIXED_SIZE + self.encoded_name.len() + extra.size() + self.comment.len())
    }

    /// Appends the header to `out`. The entry must have been written.
    pub(crate) fn write(&self, out: &mut Vec<u8>, ignore_timestamps: bool) -> ZipResult<()> {
        let offset = self.offset.ok_or_else(|| {
            ZipError::IllegalState(format!(
                "{} can't go in the central directory before it's written",
                self.name
            ))
        })?;
        let info = self.compress_info()?;
        let extra = self.directory_extra(&info, offset)?;
        let zip64 = |v: u64| v.min(ZIP64_SENTINEL);
        let version_extract = if zip64(offset) == ZIP64_SENTINEL
            || zip64(info.compressed_size) == ZIP64_SENTINEL
            || zip64(self.uncompressed_size) == ZIP64_SENTINEL
        {
            info.version_extract.max(VERSION_ZIP64)
        } else {
            info.version_extract
        };

        F_SIGNATURE.write_expected(out)?;
        F_MADE_BY.write(out, self.made_by.into())?;
        F_VERSION_EXTRACT.write(out, version_extract.into())?;
        F_GP_BIT.write(out, self.flags.bits().into())?;
        F_METHOD.write(out, info.method.code().into())?;
        if ignore_timestamps {
            F_LAST_MOD_TIME.write(out, 0)?;
            F_LAST_MOD_DATE.write(out, 0)?;
        } else {
            F_LAST_MOD_TIME.write(out, self.last_mod_time.into())?;
            F_LAST_MOD_DATE.write(out, self.last_mod_date.into())?;
        }
        F_CRC32.write(out, self.crc32.into())?;
        F_COMPRESSED_SIZE.write(out, zip64(info.compressed_size))?;
        F_UNCOMPRESSED_SIZE.write(out, zip64(self.uncompressed_size))?;
        F_FILE_NAME_LENGTH.write(out, self.encoded_name.len() as u64)?;
        F_EXTRA_FIELD_LENGTH.write(out, extra.size() as u64)?;
        F_COMMENT_LENGTH.write(out, self.comment.len() as u64)?;
        F_DISK_NUMBER_START.write_expected(out)?;
        F_INTERNAL_ATTRIBUTES.write(out, self.internal_attributes.into())?;
        F_EXTERNAL_ATTRIBUTES.write(out, self.external_attributes.into())?;
        F_OFFSET.write(out, zip64(offset))?;
        out.extend_from_slice(&self.encoded_name);
        extra.write(out)?;
        out.extend_from_slice(&self.comment);
        Ok(())
    }
}

/// Fills in sizes and offsets marked as "see the Zip64 field".
fn resolve_zip64(
    name: &str,
    extra: &ExtraField,
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    offset: &mut u64,
) -> ZipResult<()> {
    let data = match extra.segment(ZIP64_HEADER_ID)? {
        Some(Segment::Raw { data, .. }) => data,
        _ => return Ok(()),
    };
    // 4.5.3 The order of the fields in the zip64 extended
    // information record is fixed, but the fields MUST
    // only appear if the corresponding Local or Central
    // directory record field is set to 0xFFFF or 0xFFFFFFFF.
    let mut input = data.as_slice();
    for value in [uncompressed_size, compressed_size, offset] {
        if *value == ZIP64_SENTINEL {
            const F_ZIP64_VALUE: Field = Field::f8(0, "Zip64 extended information");
            *value = F_ZIP64_VALUE
                .read(&mut input)
                .context(|| format!("Reading Zip64 information of {}", name))?;
        }
    }
    // What's left is the disk start number, if anything.
    if input.len() >= 4 && input[..4] != [0, 0, 0, 0] {
        return Err(ZipError::UnsupportedArchive(format!(
            "No support for multi-disk archives: {} claims to start on another disk",
            name
        )));
    }
    Ok(())
}

/// The variable-length part of a local header (name and extra field),
/// given its first [`LOCAL_HEADER_FIXED_SIZE`] bytes.
pub(crate) fn local_variable_size(fixed: &[u8]) -> ZipResult<usize> {
    let mut input = fixed.get(F_LOCAL_FILE_NAME_LENGTH.offset()..).unwrap_or(&[]);
    let name = F_LOCAL_FILE_NAME_LENGTH.read(&mut input)?;
    let extra = F_LOCAL_EXTRA_LENGTH.read(&mut input)?;
    crate::arch::usize(name + extra)
}

/// Reads a whole local header, checking it against the entry's
/// central directory header. Returns its extra field.
///
/// Only the signature and the name length must match;
/// any other disagreement is noted in the log.
pub(crate) fn parse_local_header(
    mut input: &[u8],
    cdh: &CentralDirectoryHeader,
    info: &CompressInfo,
    check_metadata: bool,
    ignore_timestamps: bool,
    log: &mut VerifyLog,
) -> ZipResult<ExtraField> {
    let input = &mut input;
    F_LOCAL_SIGNATURE.verify(input, None)?;

    if cfg!(feature = "check-local-metadata") && check_metadata {
        F_LOCAL_VERSION_EXTRACT.verify_value(input, info.version_extract.into(), Some(log))?;
        F_LOCAL_GP_BIT.verify_value(input, cdh.flags.bits().into(), Some(log))?;
        F_LOCAL_METHOD.verify_value(input, info.method.code().into(), Some(log))?;
        if ignore_timestamps {
            F_LOCAL_LAST_MOD_TIME.skip(input)?;
            F_LOCAL_LAST_MOD_DATE.skip(input)?;
        } else {
            F_LOCAL_LAST_MOD_TIME.verify_value(input, cdh.last_mod_time.into(), Some(log))?;
            F_LOCAL_LAST_MOD_DATE.verify_value(input, cdh.last_mod_date.into(), Some(log))?;
        }
        // Deferred CRCs are zero here; the real values follow the data.
        // Zip64 sizes are sentinels here, with the real values in the extra field.
        if cdh.flags.is_deferred_crc() || cdh.needs_zip64()? {
            F_LOCAL_CRC32.skip(input)?;
            F_LOCAL_COMPRESSED_SIZE.skip(input)?;
            F_LOCAL_UNCOMPRESSED_SIZE.skip(input)?;
        } else {
            F_LOCAL_CRC32.verify_value(input, cdh.crc32.into(), Some(log))?;
            F_LOCAL_COMPRESSED_SIZE.verify_value(input, info.compressed_size, Some(log))?;
            F_LOCAL_UNCOMPRESSED_SIZE.verify_value(input, cdh.uncompressed_size, Some(log))?;
        }
    } else {
        *input = input
            .get(F_LOCAL_FILE_NAME_LENGTH.offset() - F_LOCAL_SIGNATURE.end()..)
            .unwrap_or(&[]);
    }

    F_LOCAL_FILE_NAME_LENGTH.verify_value(input, cdh.encoded_name.len() as u64, None)?;
    let extra_length = crate::arch::usize(F_LOCAL_EXTRA_LENGTH.read(input)?)?;
    let name_length = cdh.encoded_name.len();
    if input.len() < name_length + extra_length {
        return Err(ZipError::InvalidArchive(format!(
            "Local header of {} needs {} bytes for its name and extra field, but only {} remain",
            cdh.name,
            name_length + extra_length,
            input.len()
        )));
    }
    let (encoded_name, rest) = input.split_at(name_length);
    let local_name = decode_name(encoded_name, cdh.flags);
    log.verify(local_name == cdh.name, || {
        format!(
            "Central directory reports file as being named '{}' but local header reports file being named '{}'",
            cdh.name, local_name
        )
    });
    Ok(ExtraField::from_bytes(&rest[..extra_length]))
}

/// Size of the local header written for `cdh` with the given extra field
pub(crate) fn local_header_size(cdh: &CentralDirectoryHeader, extra: &ExtraField) -> usize {
    LOCAL_HEADER_FIXED_SIZE + cdh.encoded_name.len() + extra.size()
}

/// Appends a local header to `out`, up to (not including) its extra field.
///
/// `extra_length` is what goes in the extra field length;
/// the caller writes the extra field itself.
pub(crate) fn write_local_header(
    out: &mut Vec<u8>,
    cdh: &CentralDirectoryHeader,
    info: &CompressInfo,
    extra_length: usize,
    ignore_timestamps: bool,
) -> ZipResult<()> {
    if info.compressed_size >= ZIP64_SENTINEL || cdh.uncompressed_size >= ZIP64_SENTINEL {
        return Err(ZipError::Capacity(format!(
            "{} is too large for a local header ({} bytes, {} compressed)",
            cdh.name, cdh.uncompressed_size, info.compressed_size
        )));
    }
    F_LOCAL_SIGNATURE.write_expected(out)?;
    F_LOCAL_VERSION_EXTRACT.write(out, info.version_extract.into())?;
    F_LOCAL_GP_BIT.write(out, cdh.flags.bits().into())?;
    F_LOCAL_METHOD.write(out, info.method.code().into())?;
    if ignore_timestamps {
        F_LOCAL_LAST_MOD_TIME.write(out, 0)?;
        F_LOCAL_LAST_MOD_DATE.write(out, 0)?;
    } else {
        F_LOCAL_LAST_MOD_TIME.write(out, cdh.last_mod_time.into())?;
        F_LOCAL_LAST_MOD_DATE.write(out, cdh.last_mod_date.into())?;
    }
    F_LOCAL_CRC32.write(out, cdh.crc32.into())?;
    F_LOCAL_COMPRESSED_SIZE.write(out, info.compressed_size)?;
    F_LOCAL_UNCOMPRESSED_SIZE.write(out, cdh.uncompressed_size)?;
    F_LOCAL_FILE_NAME_LENGTH.write(out, cdh.encoded_name.len() as u64)?;
    if extra_length > MAX_LOCAL_EXTRA_SIZE {
        return Err(ZipError::Capacity(format!(
            "Local extra field of {} would be {} bytes, more than {}",
            cdh.name, extra_length, MAX_LOCAL_EXTRA_SIZE
        )));
    }
    F_LOCAL_EXTRA_LENGTH.write(out, extra_length as u64)?;
    out.extend_from_slice(&cdh.encoded_name);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::verify_log::VerifyLogMode;

    fn stored(name: &str, data: &[u8]) -> CentralDirectoryHeader {
        let info = CompressInfo::new(
            CompressionMethod::Store,
            data.len() as u64,
            name.ends_with('/'),
        );
        CentralDirectoryHeader::new(
            name,
            data.len() as u64,
            crc32fast::hash(data),
            CompressState::Ready(info),
            (0x6000, 0x4821),
        )
    }

    #[test]
    fn versions() {
        let deflated = CompressInfo::new(CompressionMethod::Deflate, 3, false);
        assert_eq!(deflated.version_extract, 20);
        let dir = CompressInfo::new(CompressionMethod::Store, 0, true);
        assert_eq!(dir.version_extract, 20);
        let file = CompressInfo::new(CompressionMethod::Store, 3, false);
        assert_eq!(file.version_extract, 10);
    }

    #[test]
    fn directory_record_round_trip() {
        let mut cdh = stored("dir/file.txt", b"hello");
        cdh.set_offset(Some(1234));
        cdh.set_external_attributes(0o100644 << 16);
        let mut out = Vec::new();
        cdh.write(&mut out, false).unwrap();
        assert_eq!(out.len(), cdh.record_size().unwrap());
        assert_eq!(&out[..4], b"PK\x01\x02");

        let mut log = VerifyLog::new(VerifyLogMode::Collect);
        let mut input = out.as_slice();
        let read = CentralDirectoryHeader::parse(&mut input, false, &mut log).unwrap();
        assert!(input.is_empty());
        assert!(log.logs().is_empty());
        assert_eq!(read.name(), "dir/file.txt");
        assert_eq!(read.offset(), Some(1234));
        assert_eq!(read.crc32(), crc32fast::hash(b"hello"));
        assert_eq!(read.last_mod_time(), 0x6000);
        assert_eq!(read.external_attributes(), 0o100644 << 16);
        assert_eq!(read.compress_info().unwrap().compressed_size, 5);
    }

    #[test]
    fn unwritten_entries_have_no_record() {
        assert!(stored("a", b"").write(&mut Vec::new(), false).is_err());
    }

    #[test]
    fn ignored_timestamps_are_zeroed() {
        let mut cdh = stored("a", b"x");
        cdh.set_offset(Some(0));
        let mut out = Vec::new();
        cdh.write(&mut out, true).unwrap();
        let mut log = VerifyLog::default();
        let read = CentralDirectoryHeader::parse(&mut out.as_slice(), false, &mut log).unwrap();
        assert_eq!((read.last_mod_time(), read.last_mod_date()), (0, 0));
    }

    #[test]
    fn soft_problems_are_logged() {
        let mut cdh = stored("a", b"x");
        cdh.set_offset(Some(0));
        let mut out = Vec::new();
        cdh.write(&mut out, false).unwrap();
        // Version to extract 63, internal attributes 0x4
        out[6] = 63;
        out[36] = 4;
        let mut log = VerifyLog::new(VerifyLogMode::Collect);
        CentralDirectoryHeader::parse(&mut out.as_slice(), false, &mut log).unwrap();
        assert_eq!(log.logs().len(), 2);
    }

    #[test]
    fn truncated_record() {
        let mut cdh = stored("name", b"x");
        cdh.set_offset(Some(0));
        let mut out = Vec::new();
        cdh.write(&mut out, false).unwrap();
        out.truncate(out.len() - 1);
        let mut log = VerifyLog::default();
        let err = CentralDirectoryHeader::parse(&mut out.as_slice(), false, &mut log).unwrap_err();
        assert!(err.to_string().contains("bytes remaining"));
    }

    #[test]
    fn encrypted_entries_are_unsupported() {
        let mut cdh = stored("a", b"x");
        cdh.set_offset(Some(0));
        let mut out = Vec::new();
        cdh.write(&mut out, false).unwrap();
        out[8] |= 1;
        let mut log = VerifyLog::default();
        assert!(matches!(
            CentralDirectoryHeader::parse(&mut out.as_slice(), false, &mut log),
            Err(ZipError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn large_offsets_use_zip64() {
        let mut cdh = stored("far", b"x");
        cdh.set_offset(Some(0x1_2345_6789));
        assert!(cdh.needs_zip64().unwrap());
        let mut out = Vec::new();
        cdh.write(&mut out, false).unwrap();
        assert_eq!(out.len(), cdh.record_size().unwrap());
        // Sentinel offset, version bumped for Zip64
        assert_eq!(&out[42..46], &[0xff; 4]);
        assert_eq!(u16::from_le_bytes([out[6], out[7]]), VERSION_ZIP64);

        let mut log = VerifyLog::default();
        let read = CentralDirectoryHeader::parse(&mut out.as_slice(), false, &mut log).unwrap();
        assert_eq!(read.offset(), Some(0x1_2345_6789));
        assert_eq!(read.uncompressed_size(), 1);
    }

    #[test]
    fn local_header_round_trip() {
        let cdh = stored("a.txt", b"hello");
        let info = cdh.compress_info().unwrap();
        let extra = ExtraField::from_bytes(&[0x34, 0x12, 1, 0, 9]);
        let mut out = Vec::new();
        write_local_header(&mut out, &cdh, &info, extra.size(), false).unwrap();
        extra.write(&mut out).unwrap();
        assert_eq!(out.len(), local_header_size(&cdh, &extra));
        assert_eq!(
            local_variable_size(&out[..LOCAL_HEADER_FIXED_SIZE]).unwrap(),
            5 + 5
        );

        let mut log = VerifyLog::new(VerifyLogMode::Collect);
        let read = parse_local_header(&out, &cdh, &info, true, false, &mut log).unwrap();
        assert_eq!(read, extra);
        assert!(log.logs().is_empty());
    }

    #[test]
    fn local_header_mismatches() {
        let cdh = stored("a.txt", b"hello");
        let info = cdh.compress_info().unwrap();
        let mut out = Vec::new();
        write_local_header(&mut out, &cdh, &info, 0, false).unwrap();
        // A different CRC is only worth a note...
        out[14] ^= 0xff;
        let mut log = VerifyLog::new(VerifyLogMode::Collect);
        parse_local_header(&out, &cdh, &info, true, false, &mut log).unwrap();
        if cfg!(feature = "check-local-metadata") {
            assert_eq!(log.logs().len(), 1);
        }

        // ...but a bad signature is fatal.
        out[0] = 0;
        assert!(parse_local_header(&out, &cdh, &info, true, false, &mut log).is_err());
    }

    #[test]
    fn linked_headers_share_data() {
        let mut cdh = stored("a", b"data");
        cdh.set_offset(Some(100));
        let link = cdh.link("ünicode");
        assert_eq!(link.offset(), None);
        assert_eq!(link.crc32(), cdh.crc32());
        assert!(link.flags().is_utf8_name());
        assert_eq!(link.compress_info().unwrap(), cdh.compress_info().unwrap());
    }

    #[test]
    fn huge_entries_dont_fit_local_headers() {
        let info = CompressInfo::new(CompressionMethod::Store, 1 << 32, false);
        let cdh = CentralDirectoryHeader::new(
            "big",
            1 << 32,
            0,
            CompressState::Ready(info),
            (0, 0),
        );
        assert!(matches!(
            write_local_header(&mut Vec::new(), &cdh, &info, 0, false),
            Err(ZipError::Capacity(_))
        ));
    }
}
