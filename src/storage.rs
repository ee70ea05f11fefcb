//! Places to keep entry contents before they're written to an archive.
//!
//! Entries added to an archive (or moved around inside it) need their bytes
//! kept somewhere until the next update writes them out.
//! A [`ByteStorage`] hands out [`ByteSource`]s, which can be read any
//! number of times, and keeps track of how much it's holding.

use std::fmt;
use std::io;
use std::io::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use log::*;
use tempfile::NamedTempFile;

/// Bytes that can be read as many times as we'd like.
pub trait ByteSource: Send + Sync {
    fn size(&self) -> u64;

    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>>;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.size() as usize);
        self.open()?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn crc32(&self) -> io::Result<u32> {
        let mut hasher = crc32fast::Hasher::new();
        let mut reader = self.open()?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }
}

impl fmt::Debug for dyn ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteSource({} bytes)", self.size())
    }
}

/// A [`Write`] whose output becomes a [`ByteSource`].
pub trait SourceBuilder: Write + Send {
    fn build(self: Box<Self>) -> io::Result<Arc<dyn ByteSource>>;
}

pub trait ByteStorage: Send + Sync {
    fn builder(&self) -> io::Result<Box<dyn SourceBuilder>>;

    /// Bytes currently held by sources from this storage
    fn bytes_used(&self) -> u64;

    /// The most this storage has held at once
    fn max_bytes_used(&self) -> u64;

    /// Drains `reader` into a new source.
    fn from_reader(&self, reader: &mut dyn Read) -> io::Result<Arc<dyn ByteSource>> {
        let mut builder = self.builder()?;
        io::copy(reader, &mut builder)?;
        builder.build()
    }

    /// Copies `source` into this storage.
    fn from_source(&self, source: &dyn ByteSource) -> io::Result<Arc<dyn ByteSource>> {
        let mut reader = source.open()?;
        self.from_reader(&mut reader)
    }
}

/// How many bytes a storage holds, shared with the sources it made
/// so they can give them back when dropped.
#[derive(Debug, Default)]
struct Usage {
    used: AtomicU64,
    max: AtomicU64,
}

impl Usage {
    fn add(&self, n: u64) {
        let now = self.used.fetch_add(n, Ordering::SeqCst) + n;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn sub(&self, n: u64) {
        self.used.fetch_sub(n, Ordering::SeqCst);
    }
}

/// Bytes in memory.
struct MemorySource {
    bytes: Vec<u8>,
    usage: Option<Arc<Usage>>,
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(&self.bytes[..]))
    }

    fn read_all(&self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

impl Drop for MemorySource {
    fn drop(&mut self) {
        if let Some(u) = &self.usage {
            u.sub(self.bytes.len() as u64);
        }
    }
}

/// Wraps bytes that don't belong to any storage.
pub fn source_from_vec(bytes: Vec<u8>) -> Arc<dyn ByteSource> {
    Arc::new(MemorySource { bytes, usage: None })
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    usage: Arc<Usage>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryBuilder {
    bytes: Vec<u8>,
    usage: Arc<Usage>,
}

impl Write for MemoryBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SourceBuilder for MemoryBuilder {
    fn build(self: Box<Self>) -> io::Result<Arc<dyn ByteSource>> {
        self.usage.add(self.bytes.len() as u64);
        Ok(Arc::new(MemorySource {
            bytes: self.bytes,
            usage: Some(self.usage),
        }))
    }
}

impl ByteStorage for InMemoryStorage {
    fn builder(&self) -> io::Result<Box<dyn SourceBuilder>> {
        Ok(Box::new(MemoryBuilder {
            bytes: Vec::new(),
            usage: self.usage.clone(),
        }))
    }

    fn bytes_used(&self) -> u64 {
        self.usage.used.load(Ordering::SeqCst)
    }

    fn max_bytes_used(&self) -> u64 {
        self.usage.max.load(Ordering::SeqCst)
    }
}

/// Bytes in a temporary file, deleted when the source is dropped.
struct TempFileSource {
    file: NamedTempFile,
    size: u64,
    usage: Arc<Usage>,
}

impl ByteSource for TempFileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        // A fresh handle, so readers don't fight over the file position.
        let handle = self.file.reopen()?;
        Ok(Box::new(io::BufReader::new(handle).take(self.size)))
    }
}

impl Drop for TempFileSource {
    fn drop(&mut self) {
        self.usage.sub(self.size);
    }
}

/// Keeps everything in temporary files.
#[derive(Debug, Default)]
pub struct TempFileStorage {
    directory: Option<PathBuf>,
    usage: Arc<Usage>,
}

impl TempFileStorage {
    /// Uses the system's temporary directory.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_directory<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: Some(directory.into()),
            usage: Arc::default(),
        }
    }

    fn temp_file(&self) -> io::Result<NamedTempFile> {
        match &self.directory {
            Some(d) => NamedTempFile::new_in(d),
            None => NamedTempFile::new(),
        }
    }
}

struct TempFileBuilder {
    file: io::BufWriter<NamedTempFile>,
    written: u64,
    usage: Arc<Usage>,
}

impl Write for TempFileBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl SourceBuilder for TempFileBuilder {
    fn build(self: Box<Self>) -> io::Result<Arc<dyn ByteSource>> {
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        self.usage.add(self.written);
        trace!("Spilled {} bytes to {}", self.written, file.path().display());
        Ok(Arc::new(TempFileSource {
            file,
            size: self.written,
            usage: self.usage,
        }))
    }
}

impl ByteStorage for TempFileStorage {
    fn builder(&self) -> io::Result<Box<dyn SourceBuilder>> {
        Ok(Box::new(TempFileBuilder {
            file: io::BufWriter::new(self.temp_file()?),
            written: 0,
            usage: self.usage.clone(),
        }))
    }

    fn bytes_used(&self) -> u64 {
        self.usage.used.load(Ordering::SeqCst)
    }

    fn max_bytes_used(&self) -> u64 {
        self.usage.max.load(Ordering::SeqCst)
    }
}

/// Keeps small sources in memory and spills large ones to temporary files.
#[derive(Debug)]
pub struct OverflowStorage {
    threshold: u64,
    memory: InMemoryStorage,
    disk: TempFileStorage,
}

impl OverflowStorage {
    /// Sources larger than `threshold` bytes go to disk.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            memory: InMemoryStorage::new(),
            disk: TempFileStorage::new(),
        }
    }

    /// Bytes currently held in memory
    pub fn memory_bytes_used(&self) -> u64 {
        self.memory.bytes_used()
    }

    /// Bytes currently held in temporary files
    pub fn disk_bytes_used(&self) -> u64 {
        self.disk.bytes_used()
    }
}

/// Buffers in memory until the threshold is crossed, then moves to a temp file.
struct OwnedOverflowBuilder {
    threshold: u64,
    buffer: Vec<u8>,
    memory: Box<dyn SourceBuilder>,
    disk: Option<Box<dyn SourceBuilder>>,
    disk_storage: Arc<Usage>,
    directory: Option<PathBuf>,
}

impl Write for OwnedOverflowBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(disk) = &mut self.disk {
            return disk.write(buf);
        }
        if (self.buffer.len() + buf.len()) as u64 > self.threshold {
            let spill = TempFileStorage {
                directory: self.directory.clone(),
                usage: self.disk_storage.clone(),
            };
            let mut disk = spill.builder()?;
            disk.write_all(&self.buffer)?;
            self.buffer = Vec::new();
            let n = disk.write(buf)?;
            self.disk = Some(disk);
            return Ok(n);
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.disk {
            Some(d) => d.flush(),
            None => Ok(()),
        }
    }
}

impl SourceBuilder for OwnedOverflowBuilder {
    fn build(self: Box<Self>) -> io::Result<Arc<dyn ByteSource>> {
        let this = *self;
        match this.disk {
            Some(disk) => disk.build(),
            None => {
                let mut memory = this.memory;
                memory.write_all(&this.buffer)?;
                memory.build()
            }
        }
    }
}

impl ByteStorage for OverflowStorage {
    fn builder(&self) -> io::Result<Box<dyn SourceBuilder>> {
        Ok(Box::new(OwnedOverflowBuilder {
            threshold: self.threshold,
            buffer: Vec::new(),
            memory: self.memory.builder()?,
            disk: None,
            disk_storage: self.disk.usage.clone(),
            directory: self.disk.directory.clone(),
        }))
    }

    fn bytes_used(&self) -> u64 {
        self.memory.bytes_used() + self.disk.bytes_used()
    }

    fn max_bytes_used(&self) -> u64 {
        self.memory.max_bytes_used() + self.disk.max_bytes_used()
    }
}

/// The contents of a raw deflate source.
pub struct InflatedSource {
    raw: Arc<dyn ByteSource>,
    size: u64,
}

impl InflatedSource {
    /// `size` is the uncompressed size, which deflate streams don't record.
    pub fn new(raw: Arc<dyn ByteSource>, size: u64) -> Self {
        Self { raw, size }
    }
}

impl ByteSource for InflatedSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(DeflateDecoder::new(self.raw.open()?)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;

    fn round_trip(storage: &dyn ByteStorage) {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let source = storage.from_reader(&mut &data[..]).unwrap();
        assert_eq!(source.size(), data.len() as u64);
        // Read it twice; sources are reusable.
        assert_eq!(source.read_all().unwrap(), data);
        assert_eq!(source.read_all().unwrap(), data);
        assert_eq!(storage.bytes_used(), data.len() as u64);
        drop(source);
        assert_eq!(storage.bytes_used(), 0);
        assert_eq!(storage.max_bytes_used(), data.len() as u64);
    }

    #[test]
    fn memory() {
        round_trip(&InMemoryStorage::new());
    }

    #[test]
    fn temp_files() {
        let dir = tempfile::tempdir().unwrap();
        round_trip(&TempFileStorage::in_directory(dir.path()));
    }

    #[test]
    fn overflow() {
        let storage = OverflowStorage::new(100);
        let small = storage.from_reader(&mut &[1u8; 50][..]).unwrap();
        assert_eq!(storage.memory_bytes_used(), 50);
        let big = storage.from_reader(&mut &[2u8; 500][..]).unwrap();
        assert_eq!(storage.disk_bytes_used(), 500);
        assert_eq!(big.read_all().unwrap(), vec![2u8; 500]);
        assert_eq!(small.read_all().unwrap(), vec![1u8; 50]);
        drop(big);
        assert_eq!(storage.bytes_used(), 50);
    }

    #[test]
    fn inflate() {
        let data = b"hello hello hello hello".to_vec();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let raw = source_from_vec(encoder.finish().unwrap());
        let inflated = InflatedSource::new(raw, data.len() as u64);
        assert_eq!(inflated.read_all().unwrap(), data);
        assert_eq!(inflated.crc32().unwrap(), crc32fast::hash(&data));
    }
}
