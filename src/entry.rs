//! Files and directories stored in an archive.
//!
//! An [`ArchiveEntry`] is either read from an archive's central directory,
//! with its contents left in the file until somebody asks for them,
//! or created fresh when something is added, with its contents in a
//! [`ByteStorage`] until the next update writes it out.
//! Linking entries borrow another entry's data instead of having their own.

use std::fs::File;
use std::io::{self, prelude::*, BufReader, SeekFrom};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use crate::compress::CompressionTask;
use crate::crc_reader::Crc32Reader;
use crate::result::*;
use crate::spec::extra::{ExtraField, LinkingSegment, Segment};
use crate::spec::flags::{CompressionMethod, DataDescriptorType};
use crate::spec::header::{self, *};
use crate::storage::{ByteSource, ByteStorage, InflatedSource};
use crate::verify_log::{VerifyLog, VerifyLogMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// What a linking entry shares its data with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub(crate) linked: String,
    pub(crate) nested_offset: u64,
    pub(crate) dummy: bool,
}

impl LinkInfo {
    /// The entry whose data this one lives in
    pub fn linked(&self) -> &str {
        &self.linked
    }

    /// How far into the linked entry's data this entry's data
    /// (or local header, for dummy links) starts
    pub fn nested_offset(&self) -> u64 {
        self.nested_offset
    }

    /// Dummy links write no local header of their own;
    /// one already exists inside the linked entry's data.
    pub fn is_dummy(&self) -> bool {
        self.dummy
    }
}

/// The bytes as they're stored, possibly still being compressed.
#[derive(Debug, Clone)]
pub(crate) enum RawSource {
    Ready(Arc<dyn ByteSource>),
    Compressing(CompressionTask),
}

impl RawSource {
    fn get(&self) -> ZipResult<Arc<dyn ByteSource>> {
        match self {
            RawSource::Ready(source) => Ok(source.clone()),
            RawSource::Compressing(task) => Ok(task.wait()?.source),
        }
    }
}

/// An entry's contents, both as stored and decompressed.
#[derive(Debug, Clone)]
pub(crate) struct Sources {
    processed: Arc<dyn ByteSource>,
    raw: RawSource,
}

impl Sources {
    pub fn new(processed: Arc<dyn ByteSource>, raw: RawSource) -> Self {
        Self { processed, raw }
    }

    /// Stored bytes, decompressed on the fly if `method` calls for it.
    pub fn from_raw(raw: Arc<dyn ByteSource>, method: CompressionMethod, size: u64) -> Self {
        let processed: Arc<dyn ByteSource> = match method {
            CompressionMethod::Deflate => Arc::new(InflatedSource::new(raw.clone(), size)),
            _ => raw.clone(),
        };
        Self {
            processed,
            raw: RawSource::Ready(raw),
        }
    }
}

/// A range of a file on disk, opened anew for each read.
struct ArchiveSlice {
    path: Utf8PathBuf,
    start: u64,
    size: u64,
}

impl ByteSource for ArchiveSlice {
    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.start))?;
        Ok(Box::new(BufReader::new(file).take(self.size)))
    }
}

/// How entries read from an archive are checked
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntrySettings {
    pub ignore_timestamps: bool,
    pub check_metadata: bool,
    pub log_mode: VerifyLogMode,
}

/// A file or directory in an archive.
#[derive(Debug)]
pub struct ArchiveEntry {
    cdh: CentralDirectoryHeader,
    kind: EntryKind,
    local_extra: ExtraField,
    data_descriptor: DataDescriptorType,
    sources: Sources,
    link: Option<LinkInfo>,
    log: VerifyLog,
}

impl ArchiveEntry {
    /// An entry that isn't in any file yet.
    pub(crate) fn fresh(
        cdh: CentralDirectoryHeader,
        sources: Sources,
        log_mode: VerifyLogMode,
    ) -> ZipResult<Self> {
        if cdh.offset().is_some() {
            return Err(ZipError::IllegalState(format!(
                "new entry {} already has an offset",
                cdh.name()
            )));
        }
        let mut entry = Self {
            kind: kind_of(&cdh),
            cdh,
            local_extra: ExtraField::Empty,
            data_descriptor: DataDescriptorType::None,
            sources,
            link: None,
            log: VerifyLog::new(log_mode),
        };
        entry.check_directory()?;
        Ok(entry)
    }

    /// Reads the entry described by `cdh` from the archive at `path`,
    /// checking its local header against `cdh`.
    pub(crate) fn from_disk(
        cdh: CentralDirectoryHeader,
        path: &Utf8Path,
        read_at: &mut dyn FnMut(u64, &mut [u8]) -> ZipResult<()>,
        settings: &EntrySettings,
    ) -> ZipResult<Self> {
        let offset = cdh.offset().ok_or_else(|| {
            ZipError::IllegalState(format!("{} was read without an offset", cdh.name()))
        })?;
        let info = cdh.compress_info()?;
        let mut log = VerifyLog::new(settings.log_mode);

        let mut local = vec![0u8; LOCAL_HEADER_FIXED_SIZE];
        read_at(offset, &mut local[..])?;
        let variable = local_variable_size(&local)?;
        local.resize(LOCAL_HEADER_FIXED_SIZE + variable, 0);
        read_at(
            offset + LOCAL_HEADER_FIXED_SIZE as u64,
            &mut local[LOCAL_HEADER_FIXED_SIZE..],
        )?;
        let local_extra = parse_local_header(
            &local,
            &cdh,
            &info,
            settings.check_metadata,
            settings.ignore_timestamps,
            &mut log,
        )
        .context(|| format!("Failed to read local header of '{}'", cdh.name()))?;

        let data_start = offset + local_header_size(&cdh, &local_extra) as u64;
        let raw: Arc<dyn ByteSource> = Arc::new(ArchiveSlice {
            path: path.to_owned(),
            start: data_start,
            size: info.compressed_size,
        });

        let mut entry = Self {
            kind: kind_of(&cdh),
            sources: Sources::from_raw(raw, info.method, cdh.uncompressed_size()),
            cdh,
            local_extra,
            data_descriptor: DataDescriptorType::None,
            link: None,
            log,
        };
        if entry.cdh.flags().is_deferred_crc() {
            entry.data_descriptor = entry.read_data_descriptor(data_start, read_at)?;
        }
        entry.check_directory()?;
        trace!(
            "Read local header of {} at {} ({} bytes)",
            entry.name(),
            offset,
            entry.local_header_size()
        );
        Ok(entry)
    }

    /// An entry named `name` with the same contents as `source`,
    /// stored inside `linked`'s data.
    pub(crate) fn linking(
        name: &str,
        source: &ArchiveEntry,
        linked: &str,
        nested_offset: u64,
        dummy: bool,
    ) -> Self {
        let cdh = source.cdh.link(name);
        Self {
            kind: kind_of(&cdh),
            cdh,
            local_extra: ExtraField::Empty,
            data_descriptor: DataDescriptorType::None,
            sources: source.sources.clone(),
            link: Some(LinkInfo {
                linked: linked.to_owned(),
                nested_offset,
                dummy,
            }),
            log: VerifyLog::new(source.log.mode()),
        }
    }

    /// Marks an entry read from disk as living inside `container`.
    pub(crate) fn into_alias(mut self, container: &str) -> Self {
        self.link = Some(LinkInfo {
            linked: container.to_owned(),
            nested_offset: 0,
            dummy: true,
        });
        self
    }

    /// A copy of this entry's header and stored bytes (copied into `storage`)
    /// that will be written somewhere new.
    pub(crate) fn copy_for_rewrite(&self, storage: &dyn ByteStorage) -> ZipResult<Self> {
        let info = self.cdh.compress_info()?;
        let mut cdh = self.cdh.clone();
        cdh.set_offset(None);
        cdh.reset_deferred_crc();
        let raw = storage.from_source(&*self.sources.raw.get()?)?;
        let sources = Sources::from_raw(raw, info.method, cdh.uncompressed_size());
        Self::fresh(cdh, sources, self.log.mode())
    }

    fn check_directory(&mut self) -> ZipResult<()> {
        if self.kind != EntryKind::Directory {
            return Ok(());
        }
        let log = &mut self.log;
        log.verify(self.sources.processed.is_empty(), || {
            "Directory source is not empty".to_owned()
        });
        log.verify(self.cdh.crc32() == 0, || {
            format!("Directory has CRC32 = {}", self.cdh.crc32())
        });
        log.verify(self.cdh.uncompressed_size() == 0, || {
            format!(
                "Directory has uncompressed size = {}",
                self.cdh.uncompressed_size()
            )
        });
        // Some tools deflate nothing into two bytes.
        if self.cdh.is_compress_done() {
            let compressed = self.cdh.compress_info()?.compressed_size;
            log.verify(compressed == 0 || compressed == 2, || {
                format!("Directory has compressed size = {}", compressed)
            });
        }
        Ok(())
    }

    fn read_data_descriptor(
        &mut self,
        data_start: u64,
        read_at: &mut dyn FnMut(u64, &mut [u8]) -> ZipResult<()>,
    ) -> ZipResult<DataDescriptorType> {
        let info = self.cdh.compress_info()?;
        let mut bytes = [0u8; 16];
        read_at(data_start + info.compressed_size, &mut bytes)
            .context(|| format!("Failed to read data descriptor of '{}'", self.name()))?;

        let (kind, mut input) = if data_descriptor_has_signature(&bytes[..4]) {
            (DataDescriptorType::WithSignature, &bytes[4..])
        } else {
            (DataDescriptorType::WithoutSignature, &bytes[..12])
        };
        let input = &mut input;
        F_DD_CRC32.verify_value(input, self.cdh.crc32().into(), Some(&mut self.log))?;
        F_DD_COMPRESSED_SIZE.verify_value(input, info.compressed_size, Some(&mut self.log))?;
        F_DD_UNCOMPRESSED_SIZE.verify_value(
            input,
            self.cdh.uncompressed_size(),
            Some(&mut self.log),
        )?;
        trace!("{} has a data descriptor: {:?}", self.name(), kind);
        Ok(kind)
    }

    pub fn name(&self) -> &str {
        self.cdh.name()
    }

    pub fn header(&self) -> &CentralDirectoryHeader {
        &self.cdh
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn local_extra(&self) -> &ExtraField {
        &self.local_extra
    }

    pub fn local_header_size(&self) -> usize {
        local_header_size(&self.cdh, &self.local_extra)
    }

    /// Bytes the entry takes in the file: local header, data,
    /// and data descriptor (if any).
    pub fn in_file_size(&self) -> ZipResult<u64> {
        Ok(self.cdh.compress_info()?.compressed_size
            + self.local_header_size() as u64
            + self.data_descriptor.size())
    }

    pub fn data_descriptor_type(&self) -> DataDescriptorType {
        self.data_descriptor
    }

    pub fn link(&self) -> Option<&LinkInfo> {
        self.link.as_ref()
    }

    pub fn is_linking(&self) -> bool {
        self.link.is_some()
    }

    pub fn verify_log(&self) -> &VerifyLog {
        &self.log
    }

    /// Opens the entry's contents, validating their CRC-32 and length.
    pub fn open(&self) -> ZipResult<Box<dyn Read + Send + '_>> {
        let method = self.cdh.compress_info()?.method;
        if let CompressionMethod::Unsupported(code) = method {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read {}: compression method {} not supported",
                self.name(),
                code
            )));
        }
        Ok(Box::new(Crc32Reader::new(
            self.sources.processed.open()?,
            self.cdh.crc32(),
            self.cdh.uncompressed_size(),
        )))
    }

    /// Reads all of the entry's contents.
    pub fn read(&self) -> ZipResult<Vec<u8>> {
        let mut contents = Vec::with_capacity(crate::arch::usize(self.cdh.uncompressed_size())?);
        self.open()?.read_to_end(&mut contents)?;
        Ok(contents)
    }

    /// Opens the bytes as stored, possibly compressed.
    pub fn open_raw(&self) -> ZipResult<Box<dyn Read + Send + '_>> {
        let bytes = self.sources.raw.get()?.read_all()?;
        Ok(Box::new(io::Cursor::new(bytes)))
    }

    pub(crate) fn raw_source(&self) -> ZipResult<Arc<dyn ByteSource>> {
        self.sources.raw.get()
    }

    /// Drops the data descriptor, which we never write.
    /// Returns true if there was one.
    pub(crate) fn remove_data_descriptor(&mut self) -> bool {
        if self.data_descriptor == DataDescriptorType::None {
            return false;
        }
        self.data_descriptor = DataDescriptorType::None;
        self.cdh.reset_deferred_crc();
        true
    }

    /// Copies the stored bytes into `storage` so the entry can be moved
    /// (and its old space reused). Does nothing for entries not on disk.
    pub(crate) fn load_into_memory(&mut self, storage: &dyn ByteStorage) -> ZipResult<()> {
        if self.cdh.offset().is_none() {
            return Ok(());
        }
        let info = self.cdh.compress_info()?;
        let raw = storage.from_source(&*self.sources.raw.get()?)?;
        self.sources = Sources::from_raw(raw, info.method, self.cdh.uncompressed_size());
        self.cdh.set_offset(None);
        debug!("Loaded {} into memory", self.name());
        Ok(())
    }

    /// Replaces the local extra field, loading the entry into memory first
    /// since its data will move. Returns true if the local header changed size.
    pub(crate) fn set_local_extra(
        &mut self,
        extra: ExtraField,
        storage: &dyn ByteStorage,
    ) -> ZipResult<bool> {
        self.load_into_memory(storage)?;
        let resized = self.local_extra.size() != extra.size();
        self.local_extra = extra;
        Ok(resized)
    }

    /// The extra field segment that embeds this (linking) entry's local header
    /// in its linked entry's.
    pub(crate) fn linking_segment(&self) -> Option<Segment> {
        let link = self.link.as_ref()?;
        Some(Segment::Linking(LinkingSegment {
            name: self.name().to_owned(),
            header_size: self.local_header_size(),
            dummy: link.dummy,
        }))
    }

    /// Notes that the entry was written at `offset` of the archive at `path`.
    ///
    /// Its contents will now be read from there.
    pub(crate) fn written_at(&mut self, path: &Utf8Path, offset: u64) -> ZipResult<()> {
        self.cdh.set_offset(Some(offset));
        if self.link.is_none() {
            let info = self.cdh.compress_info()?;
            let raw: Arc<dyn ByteSource> = Arc::new(ArchiveSlice {
                path: path.to_owned(),
                start: offset + self.local_header_size() as u64,
                size: info.compressed_size,
            });
            self.sources = Sources::from_raw(raw, info.method, self.cdh.uncompressed_size());
        }
        Ok(())
    }

    /// Points a linking entry at its (already written) local header.
    pub(crate) fn linked_at(&mut self, offset: u64) {
        self.cdh.set_offset(Some(offset));
    }

    /// Turns an alias into an ordinary entry with its own copy of the data.
    pub(crate) fn materialize(&mut self, storage: &dyn ByteStorage) -> ZipResult<()> {
        self.load_into_memory(storage)?;
        self.cdh.reset_deferred_crc();
        self.data_descriptor = DataDescriptorType::None;
        self.local_extra = ExtraField::Empty;
        self.link = None;
        Ok(())
    }

    /// Appends the local header (extra field included) to `out`.
    ///
    /// `extra_offset` stretches the extra field length past what we write,
    /// so the header's data starts that much later.
    /// Linking segments are rendered by `write_link`.
    pub(crate) fn write_local_header(
        &self,
        out: &mut Vec<u8>,
        extra_offset: usize,
        ignore_timestamps: bool,
        write_link: &mut dyn FnMut(&LinkingSegment, &mut Vec<u8>) -> ZipResult<()>,
    ) -> ZipResult<()> {
        if self.data_descriptor != DataDescriptorType::None {
            return Err(ZipError::IllegalState(format!(
                "Can't write {} with a data descriptor",
                self.name()
            )));
        }
        let info = self.cdh.compress_info()?;
        let nested_offset = self.link.as_ref().map_or(0, |l| l.nested_offset);
        let extra_length = self.local_extra.size() as u64 + extra_offset as u64 + nested_offset;
        let extra_length = usize::try_from(extra_length).map_err(|_| {
            ZipError::Capacity(format!(
                "Local extra field of {} would be {} bytes",
                self.name(),
                extra_length
            ))
        })?;
        header::write_local_header(out, &self.cdh, &info, extra_length, ignore_timestamps)?;
        self.local_extra.write_with(out, write_link)
    }
}

fn kind_of(cdh: &CentralDirectoryHeader) -> EntryKind {
    if cdh.is_directory() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spec::extra::AlignmentSegment;
    use crate::storage::{source_from_vec, InMemoryStorage};

    fn fresh(name: &str, data: &[u8]) -> ArchiveEntry {
        let info = CompressInfo::new(
            CompressionMethod::Store,
            data.len() as u64,
            name.ends_with('/'),
        );
        let cdh = CentralDirectoryHeader::new(
            name,
            data.len() as u64,
            crc32fast::hash(data),
            CompressState::Ready(info),
            (0, 0),
        );
        let source = source_from_vec(data.to_vec());
        let sources = Sources::new(source.clone(), RawSource::Ready(source));
        ArchiveEntry::fresh(cdh, sources, VerifyLogMode::Collect).unwrap()
    }

    fn no_links(_: &LinkingSegment, _: &mut Vec<u8>) -> ZipResult<()> {
        unreachable!()
    }

    /// Lays `entry` out as a file, local header first.
    fn render(entry: &ArchiveEntry) -> Vec<u8> {
        let mut file = Vec::new();
        entry
            .write_local_header(&mut file, 0, false, &mut no_links)
            .unwrap();
        file.extend(entry.read().unwrap());
        file
    }

    fn reader(file: Vec<u8>) -> impl FnMut(u64, &mut [u8]) -> ZipResult<()> {
        move |offset: u64, buf: &mut [u8]| {
            let start = offset as usize;
            let src = file.get(start..start + buf.len()).ok_or_else(|| {
                ZipError::Io(io::Error::from(io::ErrorKind::UnexpectedEof))
            })?;
            buf.copy_from_slice(src);
            Ok(())
        }
    }

    fn settings() -> EntrySettings {
        EntrySettings {
            ignore_timestamps: false,
            check_metadata: true,
            log_mode: VerifyLogMode::Collect,
        }
    }

    #[test]
    fn fresh_entries() {
        let entry = fresh("a.txt", b"hello");
        assert_eq!(entry.kind(), EntryKind::File);
        assert_eq!(entry.read().unwrap(), b"hello");
        assert_eq!(entry.local_header_size(), 30 + 5);
        assert_eq!(entry.in_file_size().unwrap(), 40);
        assert!(entry.verify_log().logs().is_empty());

        let dir = fresh("b/", b"");
        assert!(dir.is_directory());
        assert!(dir.verify_log().logs().is_empty());
    }

    #[test]
    fn bad_directories_are_noted() {
        let dir = fresh("b/", b"oops");
        // Contents, CRC, size, and compressed size
        assert_eq!(dir.verify_log().logs().len(), 4);
    }

    #[test]
    fn crc_is_checked_on_read() {
        let info = CompressInfo::new(CompressionMethod::Store, 5, false);
        let cdh =
            CentralDirectoryHeader::new("bad", 5, 1234, CompressState::Ready(info), (0, 0));
        let source = source_from_vec(b"hello".to_vec());
        let entry = ArchiveEntry::fresh(
            cdh,
            Sources::new(source.clone(), RawSource::Ready(source)),
            VerifyLogMode::Discard,
        )
        .unwrap();
        assert!(entry.read().is_err());
    }

    #[test]
    fn read_back_from_disk() {
        let entry = fresh("dir/file", b"contents");
        let mut cdh = entry.header().clone();
        cdh.set_offset(Some(0));
        let file = render(&entry);

        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("archive")).unwrap();
        std::fs::write(&path, &file).unwrap();

        let mut read =
            ArchiveEntry::from_disk(cdh, &path, &mut reader(file), &settings()).unwrap();
        assert!(read.verify_log().logs().is_empty());
        assert_eq!(read.read().unwrap(), b"contents");
        assert_eq!(read.data_descriptor_type(), DataDescriptorType::None);

        // Moving it copies the data out of the file.
        let storage = InMemoryStorage::new();
        read.load_into_memory(&storage).unwrap();
        assert_eq!(read.header().offset(), None);
        assert_eq!(read.read().unwrap(), b"contents");
        assert_eq!(storage.bytes_used(), 8);
    }

    #[test]
    fn mismatched_local_headers_are_noted() {
        let entry = fresh("file", b"contents");
        let mut file = render(&entry);
        // Change the local header's CRC
        file[14] ^= 0xff;
        let mut cdh = entry.header().clone();
        cdh.set_offset(Some(0));
        let read = ArchiveEntry::from_disk(cdh, Utf8Path::new("unused"), &mut reader(file), &settings())
            .unwrap();
        if cfg!(feature = "check-local-metadata") {
            assert_eq!(read.verify_log().logs().len(), 1);
        }
    }

    #[test]
    fn bad_local_signature_fails() {
        let entry = fresh("file", b"contents");
        let mut file = render(&entry);
        file[0] = b'X';
        let mut cdh = entry.header().clone();
        cdh.set_offset(Some(0));
        let err = ArchiveEntry::from_disk(cdh, Utf8Path::new("unused"), &mut reader(file), &settings())
            .unwrap_err();
        assert!(err.to_string().contains("file"));
    }

    #[test]
    fn local_extra_changes() {
        let storage = InMemoryStorage::new();
        let mut entry = fresh("file", b"x");
        let padding = ExtraField::from_segments(vec![Segment::Alignment(
            AlignmentSegment::new(4, 8).unwrap(),
        )]);
        assert!(entry.set_local_extra(padding.clone(), &storage).unwrap());
        assert!(!entry.set_local_extra(padding, &storage).unwrap());
        assert_eq!(entry.local_header_size(), 30 + 4 + 8);

        let file = render(&entry);
        assert_eq!(file.len(), 30 + 4 + 8 + 1);
        // Extra field length
        assert_eq!(u16::from_le_bytes([file[28], file[29]]), 8);
    }

    #[test]
    fn links_share_contents() {
        let target = fresh("lib.so", b"elf");
        let link = ArchiveEntry::linking("other.so", &target, "lib.so", 0, false);
        assert_eq!(link.read().unwrap(), b"elf");
        assert_eq!(link.link().unwrap().linked(), "lib.so");
        match link.linking_segment() {
            Some(Segment::Linking(l)) => {
                assert_eq!(l.name(), "other.so");
                assert_eq!(l.size(), 4 + 30 + 8);
            }
            other => panic!("{:?}", other),
        }
    }
}
