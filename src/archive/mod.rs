//! An archive, opened to read and (unless it's read-only) edit in place.
//!
//! Opening an archive reads its end of central directory record,
//! its central directory, and each entry's local header,
//! and marks where each of them lives in a [`ByteRangeAllocator`].
//! Entry contents stay in the file until something needs them.
//!
//! Adding, deleting, or moving entries only changes that bookkeeping.
//! Nothing is written until [`ZipArchive::update()`] (or
//! [`ZipArchive::close()`]), which writes the entries that moved or are new,
//! then a new central directory and EOCD if anything changed.
//! Entries that didn't move are never touched.
//!
//! ```no_run
//! use zedit::*;
//!
//! let mut archive = ZipArchive::open("app.apk", ArchiveOptions::default())?;
//! archive.add("assets/hello.txt", &b"Hello!"[..], true)?;
//! archive.delete("assets/old.txt")?;
//! archive.close()?;
//! # Ok::<(), ZipError>(())
//! ```

mod fingerprint;
mod mutate;
mod update;

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, prelude::*, BufReader, SeekFrom};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use crate::byte_range::{ByteRangeAllocator, RangeEntry};
use crate::directory;
use crate::entry::{ArchiveEntry, EntrySettings};
use crate::eocd_group::EocdGroup;
use crate::extension::{ArchiveExtension, Event, ExtensionDispatcher, ExtensionId};
use crate::options::ArchiveOptions;
use crate::result::*;
use crate::spec::extra::AlignmentSegment;
use crate::storage::ByteStorage;
use crate::verify_log::VerifyLog;
use fingerprint::Fingerprint;

/// What lives in a used range of the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Region {
    Entry(String),
    CentralDirectory,
    Eocd,
    Zip64Eocd,
    Zip64Locator,
}

#[derive(Debug)]
enum Handle {
    Closed,
    ReadOnly(File),
    ReadWrite(File),
}

impl Handle {
    fn file(&self) -> Option<&File> {
        match self {
            Handle::Closed => None,
            Handle::ReadOnly(f) | Handle::ReadWrite(f) => Some(f),
        }
    }
}

/// An entry and the bytes it has (or will have) in the file
#[derive(Debug)]
struct Placed {
    range: RangeEntry<Region>,
    entry: ArchiveEntry,
}

/// The central directory, as written (or about to be).
///
/// An archive with no entries has an empty directory, taking no space.
#[derive(Debug)]
struct DirectoryRecord {
    offset: u64,
    range: Option<RangeEntry<Region>>,
    bytes: Vec<u8>,
}

/// A ZIP archive that can be read and edited in place.
#[derive(Debug)]
pub struct ZipArchive {
    path: Utf8PathBuf,
    options: ArchiveOptions,
    read_only: bool,
    handle: Handle,
    /// What the file looked like when we last closed it
    closed_fingerprint: Option<Fingerprint>,
    map: ByteRangeAllocator<Region>,
    entries: BTreeMap<String, Placed>,
    /// Entries still being compressed, in the order they were added
    pending: VecDeque<ArchiveEntry>,
    /// Entries whose data lives inside other entries
    linking: Vec<ArchiveEntry>,
    /// Links whose container moved, copied out and waiting to be placed
    orphans: Vec<ArchiveEntry>,
    directory: Option<DirectoryRecord>,
    eocd: EocdGroup,
    /// Bytes left free between the last entry and the central directory
    extra_directory_offset: u64,
    dirty: bool,
    extensions: ExtensionDispatcher,
    log: VerifyLog,
}

impl ZipArchive {
    /// Opens the archive at `path` for reading and writing.
    ///
    /// If there's no file there (or it's empty), we start a new archive,
    /// which is created on the first [`update()`](Self::update).
    pub fn open<P: AsRef<Utf8Path>>(path: P, options: ArchiveOptions) -> ZipResult<Self> {
        Self::new(path.as_ref(), options, false)
    }

    /// Opens the existing archive at `path`. Anything that would change it fails
    /// with [`ZipError::ReadOnly`].
    pub fn open_read_only<P: AsRef<Utf8Path>>(path: P, options: ArchiveOptions) -> ZipResult<Self> {
        Self::new(path.as_ref(), options, true)
    }

    fn new(path: &Utf8Path, options: ArchiveOptions, read_only: bool) -> ZipResult<Self> {
        let min_free_size = if options.cover_empty_space {
            AlignmentSegment::MINIMUM_SIZE as u64
        } else {
            0
        };
        let mut archive = Self {
            path: path.to_owned(),
            read_only,
            handle: Handle::Closed,
            closed_fingerprint: None,
            map: ByteRangeAllocator::new(0, min_free_size),
            entries: BTreeMap::new(),
            pending: VecDeque::new(),
            linking: Vec::new(),
            orphans: Vec::new(),
            directory: None,
            eocd: EocdGroup::new(),
            extra_directory_offset: 0,
            dirty: false,
            extensions: ExtensionDispatcher::default(),
            log: VerifyLog::new(options.verify_log),
            options,
        };
        archive
            .eocd
            .set_use_version_2(archive.options.zip64_version_2, &mut archive.log);

        let length = match fs::metadata(path) {
            Ok(m) => Some(m.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        match length {
            Some(length) if length > 0 || read_only => {
                let file = File::open(path)?;
                archive
                    .read_contents(&file, length)
                    .context(|| format!("Failed to read zip file '{}'", path))?;
                archive.handle = Handle::ReadOnly(file);
                debug!(
                    "Opened {} ({} entries, {} links)",
                    path,
                    archive.entries.len(),
                    archive.linking.len()
                );
            }
            None if read_only => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} doesn't exist but read-only mode was requested", path),
                )
                .into());
            }
            _ => {
                debug!("Starting a new archive at {}", path);
                archive.dirty = true;
            }
        }
        Ok(archive)
    }

    /// Reads the records at the end of the file, the central directory,
    /// and every entry's local header, placing each in the map.
    fn read_contents(&mut self, file: &File, length: u64) -> ZipResult<()> {
        let mut read = |offset: u64, buf: &mut [u8]| -> ZipResult<()> {
            read_exact_at(file, offset, buf)
        };
        self.map.extend(length);
        self.eocd
            .read(length, &mut read, &mut self.map, &mut self.log)?;

        let records_start = self
            .eocd
            .offset()
            .ok_or_else(|| ZipError::IllegalState("EOCD missing after it was read".to_owned()))?;
        let directory_offset = self.eocd.directory_offset()?;
        let directory_size = self.eocd.directory_size()?;
        let directory_end = directory_offset.checked_add(directory_size).ok_or_else(|| {
            ZipError::InvalidArchive(format!(
                "Central directory at {} with size {} runs off the end of the address space",
                directory_offset, directory_size
            ))
        })?;
        if directory_end != records_start {
            let message = format!(
                "Central directory is stored in [{} - {}) and EOCD starts at {}",
                directory_offset, directory_end, records_start
            );
            // A gap is odd, but an overlap means one of them is lying.
            if directory_end > records_start {
                return Err(ZipError::InvalidArchive(message));
            }
            self.log.log(message);
        }

        let mut bytes = vec![0u8; crate::arch::usize(directory_size)?];
        read(directory_offset, &mut bytes[..])?;
        let headers = directory::parse(
            &bytes,
            self.eocd.total_records()?,
            self.options.no_timestamps,
            &mut self.log,
        )?;
        let range = if directory_size > 0 {
            check_placement(&self.map, directory_offset, directory_end, || {
                "the central directory".to_owned()
            })?;
            Some(
                self.map
                    .add(directory_offset, directory_end, Region::CentralDirectory),
            )
        } else {
            None
        };
        self.directory = Some(DirectoryRecord {
            offset: directory_offset,
            range,
            bytes,
        });

        let settings = EntrySettings {
            ignore_timestamps: self.options.no_timestamps,
            check_metadata: !self.options.skip_validation,
            log_mode: self.options.verify_log,
        };
        let mut found = Vec::with_capacity(headers.len());
        for (_, cdh) in headers {
            let entry = ArchiveEntry::from_disk(cdh, &self.path, &mut read, &settings)?;
            let start = entry.header().offset().unwrap_or_default();
            let end = start + entry.in_file_size()?;
            found.push((start, end, entry));
        }
        // Outer entries come before anything they contain.
        found.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut entries_end = 0;
        let mut container: Option<(String, u64, u64)> = None;
        for (start, end, entry) in found {
            let name = entry.name().to_owned();
            if let Some((outer, outer_start, outer_end)) = &container {
                if start < *outer_end {
                    if end > *outer_end {
                        return Err(ZipError::InvalidArchive(format!(
                            "Cannot read entry {} because it overlaps with {}",
                            describe(&name, start, end),
                            describe(outer, *outer_start, *outer_end)
                        )));
                    }
                    debug!("{} lies inside {}; keeping it as a link", name, outer);
                    self.linking.push(entry.into_alias(outer));
                    continue;
                }
            }
            check_placement(&self.map, start, end, || describe(&name, start, end))?;
            let range = self.map.add(start, end, Region::Entry(name.clone()));
            entries_end = entries_end.max(end);
            container = Some((name.clone(), start, end));
            self.entries.insert(name, Placed { range, entry });
        }

        let directory_start = match self.directory.as_ref().and_then(|d| d.range.as_ref()) {
            Some(range) => range.start(),
            None => records_start,
        };
        self.extra_directory_offset = match directory_start.checked_sub(entries_end) {
            Some(extra) => extra,
            None => {
                self.log.log(format!(
                    "Central directory starts at {}, before the last entry ends at {}",
                    directory_start, entries_end
                ));
                0
            }
        };
        self.map.trace_layout("Read");
        Ok(())
    }

    /// Opens the file for reading if it's closed.
    pub fn open_read_only_if_closed(&mut self) -> ZipResult<()> {
        if let Handle::Closed = self.handle {
            self.handle = Handle::ReadOnly(File::open(&self.path)?);
            debug!("Reopened {} for reading", self.path);
        }
        Ok(())
    }

    /// Closes the file, remembering what it looked like.
    ///
    /// If it changes before we reopen it for writing,
    /// we'll fail with [`ZipError::ExternallyModified`].
    fn inner_close(&mut self) -> ZipResult<()> {
        if let Handle::Closed = self.handle {
            return Ok(());
        }
        if let Handle::ReadWrite(file) = &self.handle {
            file.sync_all()?;
        }
        self.handle = Handle::Closed;
        self.closed_fingerprint = Fingerprint::of(&self.path)?;
        debug!("Closed {}", self.path);
        Ok(())
    }

    /// Writes any changes and closes the file.
    ///
    /// The archive can still be used afterwards;
    /// it will reopen the file as needed.
    pub fn close(&mut self) -> ZipResult<()> {
        let updated = if self.read_only {
            Ok(())
        } else {
            self.update()
        };
        let closed = self.inner_close();
        updated?;
        closed?;
        self.notify(Event::Closed)
    }

    /// Fails if the archive was opened read-only.
    pub(crate) fn check_writable(&self) -> ZipResult<()> {
        if self.read_only {
            Err(ZipError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Opens the file for writing if it isn't already, failing if it changed
    /// behind our back since we closed it.
    fn reopen_rw(&mut self) -> ZipResult<()> {
        self.check_writable()?;
        let was_closed = match self.handle {
            Handle::ReadWrite(_) => return Ok(()),
            Handle::ReadOnly(_) => false,
            Handle::Closed => true,
        };
        // Can't upgrade a read handle; close it and open another.
        self.handle = Handle::Closed;

        if let Some(print) = &self.closed_fingerprint {
            if !print.matches(&self.path)? {
                return Err(ZipError::ExternallyModified(self.path.clone()));
            }
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        self.handle = Handle::ReadWrite(file);
        debug!("Opened {} for writing", self.path);

        self.remove_data_descriptors()?;
        if was_closed {
            self.notify(Event::Open)?;
        }
        Ok(())
    }

    /// Tells each extension about `event`,
    /// then runs any actions they asked for (unless we're already doing that
    /// further up the stack, in which case they'll be run there).
    pub(crate) fn notify(&mut self, event: Event<'_>) -> ZipResult<()> {
        let mut extensions = self.extensions.take();
        let mut actions = Vec::new();
        let called = ExtensionDispatcher::call(&mut extensions, self, &event, &mut actions);
        self.extensions.restore(extensions);
        called?;
        self.extensions.enqueue(actions);

        if !self.extensions.begin_dispatch() {
            return Ok(());
        }
        while let Some(action) = self.extensions.next_action() {
            if let Err(e) = action(self) {
                self.extensions.abort_dispatch();
                return Err(e);
            }
        }
        self.extensions.end_dispatch();
        Ok(())
    }

    /// Adds an extension, to be notified of what happens from here on.
    pub fn add_extension(&mut self, extension: Box<dyn ArchiveExtension>) -> ExtensionId {
        self.extensions.add(extension)
    }

    /// Removes an extension. Returns false if it wasn't there.
    pub fn remove_extension(&mut self, id: ExtensionId) -> bool {
        self.extensions.remove(id)
    }

    /// Throws away the central directory and EOCD so they're recomputed
    /// (and rewritten) on the next update.
    ///
    /// Extensions that change what goes in them call this.
    pub fn invalidate_directory(&mut self) -> ZipResult<()> {
        self.check_writable()?;
        self.dirty = true;
        self.delete_directory_and_eocd();
        Ok(())
    }

    fn delete_directory_and_eocd(&mut self) {
        if let Some(DirectoryRecord {
            range: Some(range), ..
        }) = self.directory.take()
        {
            self.map.remove(&range);
        }
        self.eocd.delete(&mut self.map);
    }

    /// Finds an entry by name, including ones still being compressed
    /// and links.
    pub fn get(&self, name: &str) -> Option<&ArchiveEntry> {
        self.pending
            .iter()
            .rev()
            .find(|e| e.name() == name)
            .or_else(|| self.entries.get(name).map(|p| &p.entry))
            .or_else(|| self.linking.iter().find(|e| e.name() == name))
            .or_else(|| self.orphans.iter().find(|e| e.name() == name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every entry: placed ones by name, then any still being compressed,
    /// then links.
    pub fn entries(&self) -> Vec<&ArchiveEntry> {
        self.entries
            .values()
            .map(|p| &p.entry)
            .chain(self.pending.iter())
            .chain(self.linking.iter())
            .chain(self.orphans.iter())
            .collect()
    }

    fn entry(&self, name: &str) -> ZipResult<&ArchiveEntry> {
        self.get(name)
            .ok_or_else(|| ZipError::NoSuchEntry(name.to_owned()))
    }

    /// Opens an entry's contents, checking their CRC-32 as they're read.
    pub fn open_entry(&self, name: &str) -> ZipResult<Box<dyn Read + Send + '_>> {
        self.entry(name)?.open()
    }

    /// Reads all of an entry's contents.
    pub fn read_entry(&self, name: &str) -> ZipResult<Vec<u8>> {
        self.entry(name)?.read()
    }

    /// Opens an entry's contents as they're stored (possibly compressed).
    pub fn open_raw(&self, name: &str) -> ZipResult<Box<dyn Read + Send + '_>> {
        self.entry(name)?.open_raw()
    }

    /// Where the central directory is (or will be, once computed).
    pub fn central_directory_offset(&self) -> u64 {
        match &self.directory {
            Some(d) => d.offset,
            None if self.entries.is_empty() => self.extra_directory_offset,
            None => self.map.used_size() + self.extra_directory_offset,
        }
    }

    /// The central directory's size, or `None` if it needs recomputing.
    pub fn central_directory_size(&self) -> Option<u64> {
        match &self.directory {
            Some(d) => Some(d.bytes.len() as u64),
            None if self.entries.is_empty() && self.linking.is_empty() => Some(0),
            None => None,
        }
    }

    pub fn central_directory_bytes(&self) -> ZipResult<Vec<u8>> {
        match &self.directory {
            Some(d) => Ok(d.bytes.clone()),
            None if self.entries.is_empty() && self.linking.is_empty() => Ok(Vec::new()),
            None => Err(ZipError::IllegalState(
                "The central directory hasn't been computed".to_owned(),
            )),
        }
    }

    /// Where the end of central directory records start
    /// (the Zip64 EOCD if there is one), or `None` if they need recomputing.
    pub fn eocd_offset(&self) -> Option<u64> {
        self.eocd.offset()
    }

    /// Size of the end of central directory records, Zip64 ones included
    pub fn eocd_size(&self) -> Option<u64> {
        self.eocd.size()
    }

    /// The end of central directory records, as they are in the file.
    pub fn eocd_bytes(&self) -> ZipResult<Vec<u8>> {
        let mut bytes = Vec::new();
        for (_, record) in self.eocd.bytes_to_write()? {
            bytes.extend_from_slice(&record);
        }
        Ok(bytes)
    }

    pub fn eocd_comment(&self) -> &[u8] {
        self.eocd.comment()
    }

    /// Sets the archive comment.
    ///
    /// Fails if it's too long, or if it contains something that parses as
    /// an EOCD, since readers could mistake it for the real one.
    pub fn set_eocd_comment(&mut self, comment: &[u8]) -> ZipResult<()> {
        self.check_writable()?;
        self.eocd.set_comment(comment, &mut self.map)?;
        if let Some(DirectoryRecord {
            range: Some(range), ..
        }) = self.directory.take()
        {
            self.map.remove(&range);
        }
        self.dirty = true;
        Ok(())
    }

    pub fn extra_directory_offset(&self) -> u64 {
        self.extra_directory_offset
    }

    /// Leaves `offset` free bytes between the last entry and the central
    /// directory. (APK signing puts a block there.)
    pub fn set_extra_directory_offset(&mut self, offset: u64) -> ZipResult<()> {
        self.check_writable()?;
        if self.extra_directory_offset != offset {
            self.extra_directory_offset = offset;
            self.delete_directory_and_eocd();
            self.dirty = true;
        }
        Ok(())
    }

    pub fn timestamps_ignored(&self) -> bool {
        self.options.no_timestamps
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn storage(&self) -> &Arc<dyn ByteStorage> {
        &self.options.storage
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Problems noticed with the archive as a whole
    /// (each entry has its own log too).
    pub fn verify_log(&self) -> &VerifyLog {
        &self.log
    }

    /// The file, opened for reading if it's closed.
    fn readable_file(&mut self) -> ZipResult<&File> {
        if let Handle::Closed = self.handle {
            if self.read_only {
                self.open_read_only_if_closed()?;
            } else {
                self.reopen_rw()?;
            }
        }
        self.handle
            .file()
            .ok_or_else(|| ZipError::IllegalState(format!("{} isn't open", self.path)))
    }

    /// Reads up to `buf.len()` bytes of the file, starting at `offset`.
    pub fn direct_read(&mut self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut file = self.readable_file()?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.read(buf)?)
    }

    /// Fills `buf` with the file's bytes starting at `offset`.
    pub fn direct_fully_read(&mut self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        read_exact_at(self.readable_file()?, offset, buf)
    }

    /// Writes `data` straight to the file at `offset`.
    ///
    /// Nothing keeps track of this, so the next update might write over it
    /// (unless it's in space the archive doesn't use, like the gap left by
    /// [`set_extra_directory_offset()`](Self::set_extra_directory_offset)).
    pub fn direct_write(&mut self, offset: u64, data: &[u8]) -> ZipResult<()> {
        self.check_writable()?;
        if data.is_empty() {
            return Ok(());
        }
        self.reopen_rw()?;
        self.write_at(offset, data)
    }

    /// The size of the file as it is now, which may differ from
    /// what it will be after the next update.
    pub fn direct_size(&mut self) -> ZipResult<u64> {
        Ok(self.readable_file()?.metadata()?.len())
    }

    /// Opens bytes `start..end` of the file, as they are now.
    pub fn direct_open(&mut self, start: u64, end: u64) -> ZipResult<io::Take<BufReader<File>>> {
        let size = self.direct_size()?;
        if start > end || end > size {
            return Err(ZipError::IllegalState(format!(
                "Can't read {}..{} of {} ({} bytes)",
                start, end, self.path, size
            )));
        }
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        Ok(BufReader::new(file).take(end - start))
    }
}

fn read_exact_at(mut file: &File, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
    let length = buf.len();
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf).map_err(|e| {
        ZipError::from(e).context(format!(
            "Failed to read {} bytes at offset {}",
            length, offset
        ))
    })
}

fn describe(name: &str, start: u64, end: u64) -> String {
    format!("'{}' (offset: {}, size: {})", name, start, end - start)
}

/// Checks that `start..end` is free before we mark it used,
/// saying what's in the way if it isn't.
fn check_placement<F: FnOnce() -> String>(
    map: &ByteRangeAllocator<Region>,
    start: u64,
    end: u64,
    what: F,
) -> ZipResult<()> {
    let found = match map.at(start) {
        Some(f) => f,
        None => {
            return Err(ZipError::InvalidArchive(format!(
                "Cannot read {} because it starts past the end of the file ({} bytes)",
                what(),
                map.size()
            )))
        }
    };
    if found.is_free() && found.end() >= end {
        return Ok(());
    }
    let blocker = if found.is_free() {
        map.after(found)
    } else {
        Some(found)
    };
    let blocker = match blocker {
        Some(b) => match b.payload() {
            Some(Region::Entry(name)) => describe(name, b.start(), b.end()),
            _ => format!("Central Directory / EOCD: {} - {}", b.start(), b.end()),
        },
        None => format!("the end of the file ({} bytes)", map.size()),
    };
    Err(ZipError::InvalidArchive(format!(
        "Cannot read {} because it overlaps with {}",
        what(),
        blocker
    )))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::verify_log::VerifyLogMode;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    fn options() -> ArchiveOptions {
        ArchiveOptions::default().verify_log(VerifyLogMode::Collect)
    }

    #[test]
    fn new_archives_start_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "new.zip");
        let mut archive = ZipArchive::open(&path, options()).unwrap();
        assert!(archive.entries().is_empty());
        assert!(archive.has_pending_changes_with_wait().unwrap());
        assert_eq!(archive.central_directory_size(), Some(0));
        assert_eq!(archive.eocd_offset(), None);
        assert!(!path.exists());

        archive.close().unwrap();
        // Just an EOCD
        assert_eq!(fs::read(&path).unwrap().len(), 22);
        assert_eq!(archive.eocd_offset(), Some(0));
        assert_eq!(archive.eocd_size(), Some(22));
    }

    #[test]
    fn read_only_needs_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "missing.zip");
        assert!(ZipArchive::open_read_only(&path, options()).is_err());
    }

    #[test]
    fn read_only_refuses_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "ro.zip");
        ZipArchive::open(&path, options()).unwrap().close().unwrap();

        let mut archive = ZipArchive::open_read_only(&path, options()).unwrap();
        assert!(matches!(
            archive.add("x", &b"x"[..], false),
            Err(ZipError::ReadOnly)
        ));
        assert!(matches!(archive.delete("x"), Err(ZipError::ReadOnly)));
        assert!(matches!(archive.update(), Err(ZipError::ReadOnly)));
        assert!(matches!(
            archive.set_eocd_comment(b"hi"),
            Err(ZipError::ReadOnly)
        ));
        assert_eq!(archive.direct_size().unwrap(), 22);
        archive.close().unwrap();
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "junk.zip");
        fs::write(&path, vec![7u8; 100]).unwrap();
        let err = ZipArchive::open(&path, options()).unwrap_err();
        assert!(matches!(err.root(), ZipError::EocdNotFound { .. }));
    }

    #[test]
    fn overlapping_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "overlap.zip");
        let mut eocd = vec![0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 0, 0, 0, 0];
        // Directory size 10 at offset 0, but the EOCD is at 0.
        eocd.extend_from_slice(&10u32.to_le_bytes());
        eocd.extend_from_slice(&0u32.to_le_bytes());
        eocd.extend_from_slice(&[0, 0]);
        fs::write(&path, &eocd).unwrap();
        assert!(ZipArchive::open(&path, options()).is_err());
    }

    #[test]
    fn placement_checks_name_the_blocker() {
        let mut map = ByteRangeAllocator::new(100, 0);
        map.add(10, 20, Region::Entry("a".to_owned()));
        map.add(50, 60, Region::CentralDirectory);
        assert!(check_placement(&map, 0, 10, String::new).is_ok());
        let err = check_placement(&map, 5, 15, || "'b'".to_owned()).unwrap_err();
        assert!(err.to_string().contains("'a'"), "{}", err);
        let err = check_placement(&map, 55, 58, || "'c'".to_owned()).unwrap_err();
        assert!(err.to_string().contains("Central Directory"), "{}", err);
        let err = check_placement(&map, 90, 120, || "'d'".to_owned()).unwrap_err();
        assert!(err.to_string().contains("end of the file"), "{}", err);
        assert!(check_placement(&map, 100, 101, || "'e'".to_owned()).is_err());
    }
}
