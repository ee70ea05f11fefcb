//! Archives stored inside other archives.
//!
//! An APK can carry a ZIP as a stored entry and link entries of the outer
//! archive to files inside it, so both see the same bytes without copying.

use std::fs::File;

use camino::Utf8Path;
use log::*;

use crate::archive::ZipArchive;
use crate::result::*;
use crate::spec::header::MAX_LOCAL_EXTRA_SIZE;

/// An archive added (stored, uncompressed) to another,
/// kept open so its entries can be linked to.
#[derive(Debug)]
pub struct NestedArchive {
    archive: ZipArchive,
    entry_name: String,
}

impl ZipArchive {
    /// Adds the archive at `path` as a stored entry named `name`.
    pub fn add_nested_archive<P: AsRef<Utf8Path>>(
        &mut self,
        name: &str,
        path: P,
    ) -> ZipResult<NestedArchive> {
        self.check_writable()?;
        let path = path.as_ref();
        let archive = ZipArchive::open_read_only(path, self.options().clone())?;
        self.add(name, File::open(path)?, false)?;
        debug!("Nested {} as {}", path, name);
        Ok(NestedArchive {
            archive,
            entry_name: name.to_owned(),
        })
    }
}

impl NestedArchive {
    pub fn archive(&self) -> &ZipArchive {
        &self.archive
    }

    /// The entry of the outer archive holding this one
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Adds `dst_name` to `target` as a link to the nested entry `src_name`.
    ///
    /// With the same name, the link reuses the nested entry's local header.
    /// Otherwise the link gets a header of its own, which must be able to
    /// reach the nested data through its extra field.
    /// Returns false (and adds nothing) if it can't.
    pub fn add_file_link(
        &self,
        target: &mut ZipArchive,
        src_name: &str,
        dst_name: &str,
    ) -> ZipResult<bool> {
        let src = self
            .archive
            .get(src_name)
            .ok_or_else(|| ZipError::NoSuchEntry(src_name.to_owned()))?;
        let header_offset = src.header().offset().ok_or_else(|| {
            ZipError::IllegalState(format!("{} has no offset in {}", src_name, self.entry_name))
        })?;
        let data_offset = header_offset + src.local_header_size() as u64;

        if src_name == dst_name {
            target.add_nested_link(&self.entry_name, dst_name, Some(src), header_offset, true)?;
            Ok(true)
        } else if data_offset < MAX_LOCAL_EXTRA_SIZE as u64 {
            target.add_nested_link(&self.entry_name, dst_name, Some(src), data_offset, false)?;
            Ok(true)
        } else {
            debug!(
                "{} starts {} bytes into {}; too far to link as {}",
                src_name, data_offset, self.entry_name, dst_name
            );
            Ok(false)
        }
    }
}
