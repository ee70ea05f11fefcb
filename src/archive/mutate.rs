//! Adding, deleting, and moving entries.
//!
//! None of this touches the file. Entries get a place in the map
//! (and the central directory and EOCD are thrown out, since they'll move),
//! and [`ZipArchive::update()`] writes whatever has no offset yet.

use std::fs::{self, File};
use std::io::prelude::*;
use std::mem;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use super::{Placed, Region, ZipArchive};
use crate::byte_range::PlacementAlgorithm;
use crate::entry::{ArchiveEntry, RawSource, Sources};
use crate::extension::Event;
use crate::options::NO_ALIGNMENT;
use crate::result::*;
use crate::spec::extra::{ExtraField, Segment};
use crate::spec::flags::CompressionMethod;
use crate::spec::header::*;
use crate::spec::pack_now;
use crate::storage::{ByteSource, ByteStorage};

impl ZipArchive {
    /// Adds an entry named `name` with the contents of `reader`,
    /// replacing any entry with the same name.
    ///
    /// Names ending in `/` are directories, and should have no contents.
    /// If `may_compress`, the contents are deflated (in the background,
    /// if the compressor has an executor for that) unless the alignment rule
    /// wants the entry aligned, since only stored data can be mapped.
    pub fn add<R: Read>(&mut self, name: &str, mut reader: R, may_compress: bool) -> ZipResult<()> {
        self.check_writable()?;
        let source = self.options.storage.from_reader(&mut reader)?;
        self.add_source(name, source, may_compress)
    }

    /// Like [`add()`](Self::add), with contents already in a [`ByteSource`].
    pub fn add_source(
        &mut self,
        name: &str,
        source: Arc<dyn ByteSource>,
        may_compress: bool,
    ) -> ZipResult<()> {
        self.check_writable()?;
        self.process_all_ready_entries()?;
        let entry = self.make_entry(name, source, may_compress)?;
        self.pending.push_back(entry);
        self.process_all_ready_entries()
    }

    fn make_entry(
        &self,
        name: &str,
        source: Arc<dyn ByteSource>,
        may_compress: bool,
    ) -> ZipResult<ArchiveEntry> {
        if name.is_empty() {
            return Err(ZipError::IllegalState(
                "Entries can't have empty names".to_owned(),
            ));
        }
        let is_directory = name.ends_with('/');
        let size = source.size();
        let crc32 = source.crc32()?;
        let timestamp = if self.options.no_timestamps {
            (0, 0)
        } else {
            pack_now()
        };

        let compress = may_compress
            && !is_directory
            && size > 0
            && self.options.alignment_rule.alignment(name) == NO_ALIGNMENT;
        let (state, raw) = if compress {
            let task = self
                .options
                .compressor
                .compress(source.clone(), self.options.storage.clone());
            (
                CompressState::Pending {
                    task: task.clone(),
                    is_directory,
                },
                RawSource::Compressing(task),
            )
        } else {
            let info = CompressInfo::new(CompressionMethod::Store, size, is_directory);
            (CompressState::Ready(info), RawSource::Ready(source.clone()))
        };
        trace!(
            "New entry {} ({} bytes, {})",
            name,
            size,
            if compress { "compressing" } else { "stored" }
        );
        let cdh = CentralDirectoryHeader::new(name, size, crc32, state, timestamp);
        ArchiveEntry::fresh(cdh, Sources::new(source, raw), self.options.verify_log)
    }

    /// Adds `path` to the archive.
    ///
    /// A file is added under its file name. A directory's contents are added
    /// under their paths relative to it (with `/` separators),
    /// subdirectories becoming `name/` entries.
    /// `may_compress` decides, per file, whether it may be compressed.
    pub fn add_all_recursively<P, F>(&mut self, path: P, may_compress: F) -> ZipResult<()>
    where
        P: AsRef<Utf8Path>,
        F: Fn(&Utf8Path) -> bool,
    {
        self.check_writable()?;
        let path = path.as_ref();
        if path.is_file() {
            let name = path.file_name().ok_or_else(|| {
                ZipError::IllegalState(format!("{} has no file name", path))
            })?;
            return self.add(name, File::open(path)?, may_compress(path));
        }
        self.add_directory_contents(path, "", &may_compress)
    }

    fn add_directory_contents(
        &mut self,
        directory: &Utf8Path,
        prefix: &str,
        may_compress: &dyn Fn(&Utf8Path) -> bool,
    ) -> ZipResult<()> {
        let mut children = Vec::new();
        for child in fs::read_dir(directory)? {
            let child = Utf8PathBuf::from_path_buf(child?.path()).map_err(|p| {
                ZipError::IllegalState(format!("{} isn't valid UTF-8", p.display()))
            })?;
            children.push(child);
        }
        children.sort();

        for child in children {
            let file_name = match child.file_name() {
                Some(f) => f,
                None => continue,
            };
            let name = format!("{}{}", prefix, file_name);
            if child.is_dir() {
                let directory_name = format!("{}/", name);
                self.add(&directory_name, std::io::empty(), false)?;
                self.add_directory_contents(&child, &directory_name, may_compress)?;
            } else {
                self.add(&name, File::open(&child)?, may_compress(&child))?;
            }
        }
        Ok(())
    }

    /// Moves entries whose compression finished into the archive,
    /// in the order they were added.
    /// Stops at the first one that isn't done, so order is preserved.
    pub(super) fn process_all_ready_entries(&mut self) -> ZipResult<()> {
        while self
            .pending
            .front()
            .map_or(false, |e| e.header().is_compress_done())
        {
            if let Some(entry) = self.pending.pop_front() {
                self.accept_compressed(entry)?;
            }
        }
        Ok(())
    }

    /// Waits for every pending entry, moving each into the archive.
    pub(super) fn process_all_ready_entries_with_wait(&mut self) -> ZipResult<()> {
        self.process_all_ready_entries()?;
        while let Some(entry) = self.pending.pop_front() {
            self.accept_compressed(entry)?;
        }
        Ok(())
    }

    fn accept_compressed(&mut self, entry: ArchiveEntry) -> ZipResult<()> {
        entry
            .header()
            .compress_info()
            .context(|| format!("Failed to compress '{}'", entry.name()))?;
        self.add_to_entries(entry)
    }

    /// Places a (compressed) entry, replacing whatever had its name.
    fn add_to_entries(&mut self, entry: ArchiveEntry) -> ZipResult<()> {
        let name = entry.name().to_owned();
        let replaced = match self.remove_entry(&name)? {
            Some(r) => Some(r),
            None => self.remove_link(&name)?,
        };
        if replaced.is_some() {
            debug!("Replacing {}", name);
        }
        self.position(entry, PlacementAlgorithm::BestFit)?;
        self.dirty = true;
        self.notify(Event::Added {
            name: &name,
            replaced: replaced.as_ref(),
        })?;
        self.place_orphans()
    }

    /// Deletes the entry named `name`.
    ///
    /// Links created to it go with it.
    pub fn delete(&mut self, name: &str) -> ZipResult<()> {
        self.check_writable()?;
        if self.pending.iter().any(|e| e.name() == name) {
            self.process_all_ready_entries_with_wait()?;
        }

        let removed = match self.remove_link(name)? {
            Some(link) => link,
            None => self
                .remove_entry(name)?
                .ok_or_else(|| ZipError::NoSuchEntry(name.to_owned()))?,
        };
        debug!("Deleted {}", name);
        self.dirty = true;
        self.notify(Event::Removed(&removed))?;
        self.place_orphans()
    }

    /// Takes an entry out of the map, along with the links it created.
    fn remove_entry(&mut self, name: &str) -> ZipResult<Option<ArchiveEntry>> {
        let placed = match self.entries.remove(name) {
            Some(p) => p,
            None => return Ok(None),
        };
        self.map.remove(&placed.range);
        self.delete_directory_and_eocd();
        detach_links(
            &mut self.linking,
            &mut self.orphans,
            &*self.options.storage,
            &placed.entry,
            false,
        )?;
        Ok(Some(placed.entry))
    }

    /// Takes a linking entry out, dropping it from its container's extra field
    /// if the container holds its local header.
    fn remove_link(&mut self, name: &str) -> ZipResult<Option<ArchiveEntry>> {
        let index = match self.linking.iter().position(|l| l.name() == name) {
            Some(i) => i,
            None => return Ok(None),
        };
        let link = self.linking.remove(index);
        self.delete_directory_and_eocd();

        let container = match link.link() {
            Some(info) => info.linked().to_owned(),
            None => return Ok(Some(link)),
        };
        let segments = match self.entries.get(&container) {
            Some(placed) => placed.entry.local_extra().segments()?,
            None => return Ok(Some(link)),
        };
        let before = segments.len();
        let kept: Vec<Segment> = segments
            .into_iter()
            .filter(|s| !matches!(s, Segment::Linking(l) if l.name() == name))
            .collect();
        if kept.len() != before {
            let mut entry = self.take_for_move(&container)?;
            entry.set_local_extra(ExtraField::from_segments(kept), &*self.options.storage)?;
            self.position(entry, PlacementAlgorithm::BestFit)?;
        }
        Ok(Some(link))
    }

    /// Takes an entry out of the map so it can be placed again,
    /// copying its data out of the file first.
    pub(super) fn take_for_move(&mut self, name: &str) -> ZipResult<ArchiveEntry> {
        let placed = self
            .entries
            .remove(name)
            .ok_or_else(|| ZipError::NoSuchEntry(name.to_owned()))?;
        self.map.remove(&placed.range);
        self.delete_directory_and_eocd();
        let mut entry = placed.entry;
        detach_links(
            &mut self.linking,
            &mut self.orphans,
            &*self.options.storage,
            &entry,
            true,
        )?;
        entry.load_into_memory(&*self.options.storage)?;
        Ok(entry)
    }

    /// Places entries copied out of containers that moved or went away.
    pub(super) fn place_orphans(&mut self) -> ZipResult<()> {
        while let Some(orphan) = self.orphans.pop() {
            if self.entries.contains_key(orphan.name()) {
                debug!("{} was replaced before it could be placed", orphan.name());
                continue;
            }
            debug!("Placing {} on its own", orphan.name());
            self.position(orphan, PlacementAlgorithm::BestFit)?;
            self.dirty = true;
        }
        Ok(())
    }

    /// Finds a place for `entry` and puts it there.
    pub(super) fn position(
        &mut self,
        entry: ArchiveEntry,
        algorithm: PlacementAlgorithm,
    ) -> ZipResult<()> {
        self.delete_directory_and_eocd();
        let size = entry.in_file_size()?;
        let header_size = entry.local_header_size() as u64;
        let alignment = self.choose_alignment(&entry)?;
        let start = self
            .map
            .locate_free(size, header_size, alignment.into(), algorithm);
        let end = start + size;
        if end > self.map.size() {
            self.map.extend(end);
        }
        let name = entry.name().to_owned();
        trace!("Placing {} at {} - {} ({:?})", name, start, end, algorithm);
        let range = self.map.add(start, end, Region::Entry(name.clone()));
        self.entries.insert(name, Placed { range, entry });
        Ok(())
    }

    /// Only stored entries are aligned.
    pub(super) fn choose_alignment(&self, entry: &ArchiveEntry) -> ZipResult<u16> {
        if entry.header().compress_info()?.method == CompressionMethod::Store {
            Ok(self.options.alignment_rule.alignment(entry.name()))
        } else {
            Ok(NO_ALIGNMENT)
        }
    }

    /// Takes an entry out and places it again.
    pub(super) fn re_add(&mut self, name: &str, algorithm: PlacementAlgorithm) -> ZipResult<()> {
        let entry = self.take_for_move(name)?;
        self.position(entry, algorithm)?;
        self.dirty = true;
        self.place_orphans()
    }

    /// Replaces an entry's local extra field.
    ///
    /// The entry is rewritten on the next update;
    /// if its local header changed size, it's also moved.
    pub fn set_local_extra(&mut self, name: &str, extra: ExtraField) -> ZipResult<()> {
        self.check_writable()?;
        if self.pending.iter().any(|e| e.name() == name) {
            self.process_all_ready_entries_with_wait()?;
        }
        if extra.size() > MAX_LOCAL_EXTRA_SIZE {
            return Err(ZipError::Capacity(format!(
                "Local extra field of {} can't be {} bytes",
                name,
                extra.size()
            )));
        }
        let storage = self.options.storage.clone();
        let placed = self
            .entries
            .get_mut(name)
            .ok_or_else(|| ZipError::NoSuchEntry(name.to_owned()))?;
        detach_links(
            &mut self.linking,
            &mut self.orphans,
            &*storage,
            &placed.entry,
            true,
        )?;
        let resized = placed.entry.set_local_extra(extra, &*storage)?;
        self.dirty = true;
        self.delete_directory_and_eocd();
        if resized {
            self.re_add(name, PlacementAlgorithm::BestFit)
        } else {
            self.place_orphans()
        }
    }

    /// Adds an entry named `dst` that shares `linked`'s data.
    ///
    /// `dst`'s local header goes in `linked`'s extra field,
    /// so both have a local header right before the same data.
    pub fn add_link(&mut self, linked: &str, dst: &str) -> ZipResult<()> {
        self.add_nested_link(linked, dst, None, 0, false)
    }

    /// Adds a link to data inside `linked`, described by `nested`
    /// (or `linked` itself) and starting `nested_offset` bytes into it.
    ///
    /// Dummy links have their local header inside the linked data already,
    /// `nested_offset` bytes in.
    pub(crate) fn add_nested_link(
        &mut self,
        linked: &str,
        dst: &str,
        nested: Option<&ArchiveEntry>,
        nested_offset: u64,
        dummy: bool,
    ) -> ZipResult<()> {
        self.check_writable()?;
        if self.pending.iter().any(|e| e.name() == linked) {
            self.process_all_ready_entries_with_wait()?;
        }
        if self.contains(dst) {
            return Err(ZipError::DuplicateEntry(dst.to_owned()));
        }
        let container = &self
            .entries
            .get(linked)
            .ok_or_else(|| ZipError::NoSuchEntry(linked.to_owned()))?
            .entry;
        let link = ArchiveEntry::linking(
            dst,
            nested.unwrap_or(container),
            linked,
            nested_offset,
            dummy,
        );
        let mut segments = container.local_extra().segments()?;
        segments.extend(link.linking_segment());
        let extra = ExtraField::from_segments(segments);
        let extra_length = extra.size() as u64 + if dummy { 0 } else { nested_offset };
        if extra_length > MAX_LOCAL_EXTRA_SIZE as u64 {
            return Err(ZipError::Capacity(format!(
                "Linking {} would grow the local extra field of {} to {} bytes",
                dst, linked, extra_length
            )));
        }

        debug!(
            "Linking {} to {} (offset {}{})",
            dst,
            linked,
            nested_offset,
            if dummy { ", dummy" } else { "" }
        );
        let mut entry = self.take_for_move(linked)?;
        self.linking.push(link);
        entry.set_local_extra(extra, &*self.options.storage)?;
        self.position(entry, PlacementAlgorithm::FirstFit)?;
        self.dirty = true;
        self.place_orphans()
    }

    /// Copies every entry of `src` whose name `ignore` doesn't match,
    /// unless we already have an entry with the same name, size, and CRC.
    ///
    /// Data is copied as stored, so nothing is recompressed.
    pub fn merge_from<F: Fn(&str) -> bool>(&mut self, src: &ZipArchive, ignore: F) -> ZipResult<()> {
        self.check_writable()?;
        self.process_all_ready_entries_with_wait()?;
        for from in src.entries() {
            let name = from.name();
            if ignore(name) {
                continue;
            }
            if let Some(current) = self.entries.get(name) {
                let current = current.entry.header();
                if current.uncompressed_size() == from.header().uncompressed_size()
                    && current.crc32() == from.header().crc32()
                {
                    trace!("{} is already here", name);
                    continue;
                }
            }
            let copy = from.copy_for_rewrite(&*self.options.storage)?;
            self.pending.push_back(copy);
            self.process_all_ready_entries()?;
        }
        self.process_all_ready_entries_with_wait()
    }

    /// Moves every stored entry whose data isn't aligned per the alignment rule.
    ///
    /// Returns true if anything already in the file needs rewriting.
    /// Links always count, since their containers may move.
    pub fn realign(&mut self) -> ZipResult<bool> {
        self.check_writable()?;
        self.process_all_ready_entries_with_wait()?;
        let mut changed = !self.linking.is_empty();
        let names: Vec<String> = self.entries.keys().cloned().collect();
        for name in names {
            changed |= self.realign_entry(&name)?;
        }
        if changed {
            self.dirty = true;
        }
        self.place_orphans()?;
        Ok(changed)
    }

    fn realign_entry(&mut self, name: &str) -> ZipResult<bool> {
        let placed = match self.entries.get(name) {
            Some(p) => p,
            None => return Ok(false),
        };
        let alignment = u64::from(self.choose_alignment(&placed.entry)?);
        let data_offset = placed.range.start() + placed.entry.local_header_size() as u64;
        if data_offset % alignment == 0 {
            return Ok(false);
        }
        debug!("{} isn't aligned to {} (data at {})", name, alignment, data_offset);

        // Not written yet: just put it somewhere better.
        if placed.entry.header().offset().is_none() {
            if let Some(placed) = self.entries.remove(name) {
                self.map.remove(&placed.range);
                self.position(placed.entry, PlacementAlgorithm::BestFit)?;
            }
            return Ok(false);
        }
        self.re_add(name, PlacementAlgorithm::BestFit)?;
        Ok(true)
    }

    /// Rewrites every entry in name order, leaving no gaps.
    pub fn sort_contents(&mut self) -> ZipResult<()> {
        self.reopen_rw()?;
        self.process_all_ready_entries_with_wait()?;

        let names: Vec<String> = self.entries.keys().cloned().collect();
        let mut sorted = Vec::with_capacity(names.len());
        for name in &names {
            sorted.push(self.take_for_move(name)?);
        }
        sorted.append(&mut self.orphans);
        sorted.sort_by(|a, b| a.name().cmp(b.name()));
        debug!("Sorting {} entries", sorted.len());
        for entry in sorted {
            self.position(entry, PlacementAlgorithm::FirstFit)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Marks the archive as changed so the next update rewrites the
    /// central directory and EOCD.
    pub fn touch(&mut self) -> ZipResult<()> {
        self.check_writable()?;
        self.dirty = true;
        Ok(())
    }

    /// Waits for background compression, reporting any failure.
    pub fn finish_all_background_tasks(&mut self) -> ZipResult<()> {
        self.process_all_ready_entries_with_wait()
    }

    /// Would [`update()`](Self::update) write anything?
    /// Waits for background compression first.
    pub fn has_pending_changes_with_wait(&mut self) -> ZipResult<bool> {
        self.process_all_ready_entries_with_wait()?;
        Ok(self.dirty)
    }
}

/// Deals with the links living in `container`, which is being moved or removed.
///
/// Links `container` created (its extra field holds their headers)
/// follow it if it's moving and go away with it if it isn't.
/// Anything else found inside it on disk is copied out to be placed on its own.
fn detach_links(
    linking: &mut Vec<ArchiveEntry>,
    orphans: &mut Vec<ArchiveEntry>,
    storage: &dyn ByteStorage,
    container: &ArchiveEntry,
    moving: bool,
) -> ZipResult<()> {
    let lives_here = |l: &ArchiveEntry| l.link().map(|i| i.linked()) == Some(container.name());
    if !linking.iter().any(lives_here) {
        return Ok(());
    }
    let created: Vec<String> = container
        .local_extra()
        .segments()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| match s {
            Segment::Linking(l) => Some(l.name().to_owned()),
            _ => None,
        })
        .collect();

    let (inside, elsewhere): (Vec<_>, Vec<_>) = mem::take(linking).into_iter().partition(lives_here);
    *linking = elsewhere;
    for mut link in inside {
        if created.iter().any(|c| c == link.name()) {
            if moving {
                linking.push(link);
            } else {
                debug!("Dropping {} along with {}", link.name(), container.name());
            }
        } else {
            debug!("Copying {} out of {}", link.name(), container.name());
            link.materialize(storage)?;
            orphans.push(link);
        }
    }
    Ok(())
}
