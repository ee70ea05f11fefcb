//! Compressing entries, possibly in the background.
//!
//! Adding an entry kicks off compression through a [`Compressor`] and
//! hands back a [`CompressionTask`] right away. The archive only waits on
//! the task once it needs the result: to place the entry, or to flush.

use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::result::*;
use crate::spec::flags::CompressionMethod;
use crate::storage::{ByteSource, ByteStorage};

/// Somewhere to run jobs.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

/// Runs jobs on the calling thread, before `execute()` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        job()
    }
}

/// Runs jobs on Rayon's global thread pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonExecutor;

impl Executor for RayonExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        rayon::spawn(job)
    }
}

/// What compressing an entry produced
#[derive(Clone)]
pub struct CompressionResult {
    pub method: CompressionMethod,
    /// The bytes to store, compressed with `method`
    pub source: Arc<dyn ByteSource>,
}

impl CompressionResult {
    pub fn stored(source: Arc<dyn ByteSource>) -> Self {
        Self {
            method: CompressionMethod::Store,
            source,
        }
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }
}

impl fmt::Debug for CompressionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionResult")
            .field("method", &self.method)
            .field("size", &self.size())
            .finish()
    }
}

type TaskResult = Result<CompressionResult, Arc<io::Error>>;

#[derive(Default)]
struct TaskCell {
    result: Mutex<Option<TaskResult>>,
    ready: Condvar,
}

impl TaskCell {
    fn lock(&self) -> MutexGuard<'_, Option<TaskResult>> {
        // Nobody panics holding this lock, but if they did,
        // the Option is still either set or not.
        self.result.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A compression that will finish (or fail) at some point.
///
/// The result can be waited on any number of times, from any clone.
#[derive(Clone)]
pub struct CompressionTask {
    cell: Arc<TaskCell>,
}

/// The other end of a [`CompressionTask`], held by whoever does the work.
pub struct TaskCompleter {
    cell: Option<Arc<TaskCell>>,
}

impl CompressionTask {
    pub fn new() -> (Self, TaskCompleter) {
        let cell = Arc::new(TaskCell::default());
        (
            Self { cell: cell.clone() },
            TaskCompleter { cell: Some(cell) },
        )
    }

    /// A task that's already done
    pub fn completed(result: CompressionResult) -> Self {
        let (task, completer) = Self::new();
        completer.complete(Ok(result));
        task
    }

    pub fn is_done(&self) -> bool {
        self.cell.lock().is_some()
    }

    /// Blocks until the task finishes.
    pub fn wait(&self) -> ZipResult<CompressionResult> {
        let mut guard = self.cell.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone().map_err(ZipError::Compression);
            }
            guard = self
                .cell
                .ready
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl fmt::Debug for CompressionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.cell.lock() {
            None => f.write_str("CompressionTask(pending)"),
            Some(Ok(r)) => write!(f, "CompressionTask({:?})", r),
            Some(Err(e)) => write!(f, "CompressionTask(failed: {})", e),
        }
    }
}

impl TaskCompleter {
    pub fn complete(mut self, result: io::Result<CompressionResult>) {
        self.resolve(result.map_err(Arc::new));
    }

    fn resolve(&mut self, result: TaskResult) {
        if let Some(cell) = self.cell.take() {
            *cell.lock() = Some(result);
            cell.ready.notify_all();
        }
    }
}

impl Drop for TaskCompleter {
    fn drop(&mut self) {
        // The job went away (or panicked) without finishing.
        // Don't leave anybody waiting forever.
        self.resolve(Err(Arc::new(io::Error::new(
            io::ErrorKind::Other,
            "compression job ended without a result",
        ))));
    }
}

/// Turns an entry's contents into what gets stored in the archive.
pub trait Compressor: Send + Sync {
    fn compress(
        &self,
        source: Arc<dyn ByteSource>,
        storage: Arc<dyn ByteStorage>,
    ) -> CompressionTask;
}

/// Deflates `source` into `storage`.
///
/// If that doesn't make it any smaller, the source is stored as-is.
fn deflate(
    source: &Arc<dyn ByteSource>,
    storage: &dyn ByteStorage,
    level: Compression,
) -> io::Result<CompressionResult> {
    let mut encoder = DeflateEncoder::new(storage.builder()?, level);
    io::copy(&mut source.open()?, &mut encoder)?;
    let deflated = encoder.finish()?.build()?;
    trace!(
        "Deflated {} bytes to {} at level {}",
        source.size(),
        deflated.size(),
        level.level()
    );
    if deflated.size() >= source.size() {
        Ok(CompressionResult::stored(source.clone()))
    } else {
        Ok(CompressionResult {
            method: CompressionMethod::Deflate,
            source: deflated,
        })
    }
}

/// Raw deflate at a single compression level
#[derive(Clone)]
pub struct DeflateCompressor {
    executor: Arc<dyn Executor>,
    level: Compression,
}

impl DeflateCompressor {
    pub fn new(executor: Arc<dyn Executor>, level: Compression) -> Self {
        Self { executor, level }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new(Arc::new(InlineExecutor), Compression::default())
    }
}

impl Compressor for DeflateCompressor {
    fn compress(
        &self,
        source: Arc<dyn ByteSource>,
        storage: Arc<dyn ByteStorage>,
    ) -> CompressionTask {
        let (task, completer) = CompressionTask::new();
        let level = self.level;
        self.executor.execute(Box::new(move || {
            completer.complete(deflate(&source, &*storage, level));
        }));
        task
    }
}

/// Deflates at both the default and best levels,
/// keeping the best only if it's worth the extra decompression time.
#[derive(Clone)]
pub struct BestAndDefaultDeflateCompressor {
    executor: Arc<dyn Executor>,
    min_best_ratio: f64,
}

impl BestAndDefaultDeflateCompressor {
    /// The best-level result wins if `best / default` is below `min_best_ratio`.
    ///
    /// A ratio of 1.0 always takes the best result when it's any smaller;
    /// 0.0 never does.
    pub fn new(executor: Arc<dyn Executor>, min_best_ratio: f64) -> Self {
        assert!((0.0..=1.0).contains(&min_best_ratio));
        Self {
            executor,
            min_best_ratio,
        }
    }
}

impl Compressor for BestAndDefaultDeflateCompressor {
    fn compress(
        &self,
        source: Arc<dyn ByteSource>,
        storage: Arc<dyn ByteStorage>,
    ) -> CompressionTask {
        let (task, completer) = CompressionTask::new();
        let min_best_ratio = self.min_best_ratio;
        self.executor.execute(Box::new(move || {
            let pick = || -> io::Result<CompressionResult> {
                let default = deflate(&source, &*storage, Compression::default())?;
                if default.method == CompressionMethod::Store {
                    return Ok(default);
                }
                let best = deflate(&source, &*storage, Compression::best())?;
                let ratio = best.size() as f64 / default.size() as f64;
                if ratio < min_best_ratio {
                    Ok(best)
                } else {
                    Ok(default)
                }
            };
            completer.complete(pick());
        }));
        task
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::{source_from_vec, InMemoryStorage};

    fn storage() -> Arc<dyn ByteStorage> {
        Arc::new(InMemoryStorage::new())
    }

    #[test]
    fn compressible_data_is_deflated() {
        let data = vec![b'a'; 4096];
        let result = DeflateCompressor::default()
            .compress(source_from_vec(data.clone()), storage())
            .wait()
            .unwrap();
        assert_eq!(result.method, CompressionMethod::Deflate);
        assert!(result.size() < 4096);

        let inflated = crate::storage::InflatedSource::new(result.source, 4096);
        assert_eq!(inflated.read_all().unwrap(), data);
    }

    #[test]
    fn incompressible_data_is_stored() {
        // Two bytes don't deflate to anything smaller.
        let result = DeflateCompressor::default()
            .compress(source_from_vec(vec![1, 2]), storage())
            .wait()
            .unwrap();
        assert_eq!(result.method, CompressionMethod::Store);
        assert_eq!(result.size(), 2);
    }

    #[test]
    fn tasks_resolve_once_for_everyone() {
        let (task, completer) = CompressionTask::new();
        let other = task.clone();
        assert!(!task.is_done());
        let waiter = std::thread::spawn(move || other.wait().map(|r| r.size()));
        completer.complete(Ok(CompressionResult::stored(source_from_vec(vec![0; 3]))));
        assert!(task.is_done());
        assert_eq!(waiter.join().unwrap().unwrap(), 3);
        assert_eq!(task.wait().unwrap().size(), 3);
    }

    #[test]
    fn dropped_jobs_fail() {
        let (task, completer) = CompressionTask::new();
        drop(completer);
        assert!(matches!(task.wait(), Err(ZipError::Compression(_))));
    }

    #[test]
    fn rayon_compression() {
        let compressor = DeflateCompressor::new(Arc::new(RayonExecutor), Compression::fast());
        let tasks: Vec<_> = (0..8)
            .map(|i| compressor.compress(source_from_vec(vec![i as u8; 10_000]), storage()))
            .collect();
        for task in tasks {
            assert_eq!(task.wait().unwrap().method, CompressionMethod::Deflate);
        }
    }

    #[test]
    fn best_and_default() {
        let data: Vec<u8> = (0..20_000u32).map(|i| ((i * 7) % 13) as u8).collect();
        let never = BestAndDefaultDeflateCompressor::new(Arc::new(InlineExecutor), 0.0);
        let default = never
            .compress(source_from_vec(data.clone()), storage())
            .wait()
            .unwrap();
        let always = BestAndDefaultDeflateCompressor::new(Arc::new(InlineExecutor), 1.0);
        let best = always
            .compress(source_from_vec(data), storage())
            .wait()
            .unwrap();
        assert_eq!(default.method, CompressionMethod::Deflate);
        assert!(best.size() <= default.size());
    }
}
