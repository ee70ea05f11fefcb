//! zedit edits ZIP archives (and APKs, which are ZIP archives with opinions)
//! in place:
//!
//! ```no_run
//! use zedit::*;
//!
//! let options = ArchiveOptions::default()
//!     // Native libraries get mapped straight out of the APK,
//!     // so their data must start on a page boundary.
//!     .alignment_rule(AlignmentRule::compose([
//!         AlignmentRule::for_suffix(".so", 4096),
//!         AlignmentRule::constant(4),
//!     ]));
//! let mut apk = ZipArchive::open("app.apk", options)?;
//!
//! apk.add("assets/config.json", &br#"{"debug": false}"#[..], true)?;
//! apk.delete("assets/debug.json")?;
//! println!("{}", String::from_utf8_lossy(&apk.read_entry("AndroidManifest.xml")?));
//!
//! // Nothing has been written yet. This writes the new entry,
//! // then a new central directory.
//! apk.close()?;
//! # Ok::<(), ZipError>(())
//! ```
//!
//! Most ZIP libraries read an archive and write a new one.
//! That's a lot of copying when you only changed one file,
//! and it loses anything the library doesn't understand.
//! zedit instead keeps a map of which bytes of the file hold what.
//! Deleting an entry frees its bytes; adding one finds free space for it
//! (or puts it at the end). Entries that didn't change are never rewritten.
//!
//! Gaps left behind are normally covered by padding the extra field of the
//! entry after them, so every byte of the file belongs to some entry.
//! (Some tools, like APK signature verification, care about that.)
//! The same padding is how stored entries are aligned.
//!
//! Compression happens when entries are added, possibly in the background
//! (see [`compress::RayonExecutor`]). Until the next
//! [`update()`](ZipArchive::update) or [`close()`](ZipArchive::close),
//! new entries' contents live in a [`storage::ByteStorage`],
//! in memory by default.
//!
//! Archives too large for the classic format's 32-bit fields get Zip64
//! records, added and removed as needed.

pub mod compress;
pub mod extension;
pub mod options;
pub mod result;
pub mod storage;

mod arch;
mod archive;
mod byte_range;
mod crc_reader;
mod directory;
mod entry;
mod eocd_group;
mod nested;
mod spec;
mod verify_log;

pub use archive::ZipArchive;
pub use byte_range::{ByteRangeAllocator, PlacementAlgorithm, RangeEntry};
pub use entry::{ArchiveEntry, EntryKind, LinkInfo};
pub use extension::{ArchiveExtension, ExtensionAction, ExtensionId, HookResult};
pub use nested::NestedArchive;
pub use options::{AlignmentRule, ArchiveOptions};
pub use result::{ZipError, ZipResult};
pub use spec::extra::{AlignmentSegment, ExtraField, LinkingSegment, Segment};
pub use spec::flags::{CompressionMethod, DataDescriptorType, GpFlags};
pub use spec::header::{CentralDirectoryHeader, CompressInfo};
pub use verify_log::{VerifyLog, VerifyLogMode};
