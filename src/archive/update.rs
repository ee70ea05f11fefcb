//! Writing changes to the file.

use std::io::{self, prelude::*, SeekFrom};

use log::*;

use super::{DirectoryRecord, Handle, Region, ZipArchive};
use crate::byte_range::PlacementAlgorithm;
use crate::directory::CentralDirectory;
use crate::extension::Event;
use crate::result::*;
use crate::spec::extra::{AlignmentSegment, ExtraField, LinkingSegment, Segment, LINKING_HEADER_ID};
use crate::spec::flags::DataDescriptorType;
use crate::spec::header::MAX_LOCAL_EXTRA_SIZE;

/// How many times extensions can throw out the central directory
/// during a single update before we give up on them.
const MAX_DIRECTORY_RECOMPUTES: u32 = 10;

const ZEROS: [u8; 64 * 1024] = [0; 64 * 1024];

impl ZipArchive {
    /// Writes all changes to the file.
    ///
    /// Only entries that are new or moved are written,
    /// then the central directory and EOCD if they changed.
    /// Calling this again with no changes in between writes nothing.
    pub fn update(&mut self) -> ZipResult<()> {
        self.check_writable()?;
        self.process_all_ready_entries_with_wait()?;
        self.notify(Event::BeforeUpdate)?;
        self.process_all_ready_entries_with_wait()?;

        if self.dirty {
            self.write_all_files()?;
        }
        // Extensions may have invalidated the directory without changing entries.
        self.recompute_and_write_directory()?;

        if let Handle::ReadWrite(file) = &self.handle {
            let size = self.map.size();
            if file.metadata()?.len() != size {
                debug!("Resizing {} to {} bytes", self.path, size);
                file.set_len(size)?;
            }
        }
        self.dirty = false;
        self.notify(Event::Updated)
    }

    fn write_all_files(&mut self) -> ZipResult<()> {
        self.reopen_rw()?;
        if self.options.auto_sort {
            self.sort_contents()?;
        } else {
            self.pack_if_necessary()?;
        }
        self.delete_directory_and_eocd();
        self.map.truncate();

        if self.options.cover_empty_space {
            loop {
                self.cover_gaps()?;
                if self.orphans.is_empty() {
                    break;
                }
                self.place_orphans()?;
            }
        }

        // Write in file order.
        let mut writes: Vec<(u64, Option<String>, u64)> = self
            .entries
            .iter()
            .filter(|(_, p)| p.entry.header().offset().is_none())
            .map(|(name, p)| (p.range.start(), Some(name.clone()), p.range.size()))
            .collect();
        writes.extend(
            self.map
                .free_areas()
                .into_iter()
                .map(|gap| (gap.start(), None, gap.size())),
        );
        writes.sort_by_key(|w| w.0);

        debug!(
            "Writing {} entries and {} gaps to {}",
            writes.iter().filter(|w| w.1.is_some()).count(),
            writes.iter().filter(|w| w.1.is_none()).count(),
            self.path
        );
        for (start, name, size) in writes {
            match name {
                Some(name) => self.write_entry(&name)?,
                None => self.write_zeros(start, size)?,
            }
        }
        self.map.trace_layout("Wrote entries");
        Ok(())
    }

    /// Moves any entry too far from the one before it for the gap to be
    /// covered by its extra field.
    fn pack_if_necessary(&mut self) -> ZipResult<()> {
        if !self.options.cover_empty_space {
            return Ok(());
        }
        for name in self.names_by_offset() {
            let placed = match self.entries.get(&name) {
                Some(p) => p,
                None => continue,
            };
            let gap = match self.map.before(&placed.range) {
                Some(before) if before.is_free() => before.size(),
                _ => continue,
            };
            if gap + placed.entry.local_extra().size() as u64 > MAX_LOCAL_EXTRA_SIZE as u64 {
                debug!("{} is {} bytes from the previous entry; moving it", name, gap);
                self.re_add(&name, PlacementAlgorithm::FirstFit)?;
            }
        }
        Ok(())
    }

    fn names_by_offset(&self) -> Vec<String> {
        let mut names: Vec<(u64, &String)> = self
            .entries
            .iter()
            .map(|(name, p)| (p.range.start(), name))
            .collect();
        names.sort();
        names.into_iter().map(|(_, n)| n.clone()).collect()
    }

    /// Grows the extra field of each entry that follows a gap
    /// so that the entry starts at the beginning of the gap.
    fn cover_gaps(&mut self) -> ZipResult<()> {
        for name in self.names_by_offset() {
            self.cover_gap_before(&name)?;
        }
        Ok(())
    }

    fn cover_gap_before(&mut self, name: &str) -> ZipResult<()> {
        let placed = match self.entries.get(name) {
            Some(p) => p,
            None => return Ok(()),
        };
        let (gap_start, gap) = match self.map.before(&placed.range) {
            Some(before) if before.is_free() => (before.start(), before.size()),
            _ => return Ok(()),
        };
        let end = placed.range.end();

        // Unparseable extra fields are replaced outright.
        let mut segments: Vec<Segment> = placed
            .entry
            .local_extra()
            .segments()
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !matches!(s, Segment::Alignment(_)))
            .collect();
        let kept: u64 = segments.iter().map(|s| s.size() as u64).sum();
        let space = gap + placed.entry.local_extra().size() as u64 - kept;
        if space < AlignmentSegment::MINIMUM_SIZE as u64
            || kept + space > MAX_LOCAL_EXTRA_SIZE as u64
        {
            debug!("Can't cover the {} bytes before {}", gap, name);
            return Ok(());
        }
        let alignment = self.choose_alignment(&placed.entry)?;

        let mut entry = self.take_for_move(name)?;
        segments.push(Segment::Alignment(AlignmentSegment::new(
            alignment,
            crate::arch::usize(space)?,
        )?));
        entry.set_local_extra(ExtraField::from_segments(segments), &*self.options.storage)?;
        trace!("Covering {} - {} with {}'s extra field", gap_start, gap_start + gap, name);
        let range = self
            .map
            .add(gap_start, end, Region::Entry(name.to_owned()));
        self.entries
            .insert(name.to_owned(), super::Placed { range, entry });
        Ok(())
    }

    /// Writes an entry (and the local headers of links it holds)
    /// where the map placed it.
    fn write_entry(&mut self, name: &str) -> ZipResult<()> {
        let placed = self
            .entries
            .get(name)
            .ok_or_else(|| ZipError::NoSuchEntry(name.to_owned()))?;
        let entry = &placed.entry;
        let offset = placed.range.start();
        let header_size = entry.local_header_size();
        let ignore_timestamps = self.options.no_timestamps;
        let linking = &self.linking;

        let mut link_offsets: Vec<(String, u64)> = Vec::new();
        let mut write_link = |segment: &LinkingSegment, out: &mut Vec<u8>| -> ZipResult<()> {
            let link = linking
                .iter()
                .find(|l| l.name() == segment.name())
                .ok_or_else(|| ZipError::NoSuchEntry(segment.name().to_owned()))?;
            let nested_offset = link.link().map_or(0, |l| l.nested_offset());
            if segment.is_dummy() {
                link_offsets.push((
                    link.name().to_owned(),
                    offset + header_size as u64 + nested_offset,
                ));
                return Ok(());
            }
            let link_header_size = link.local_header_size();
            out.extend_from_slice(&LINKING_HEADER_ID.to_le_bytes());
            let data_size = crate::arch::u16(link_header_size as u64, "linked local header")?;
            out.extend_from_slice(&data_size.to_le_bytes());
            let position = out.len();
            // Stretch the link's extra field so its data starts where ours does.
            let stretch = header_size
                .checked_sub(link_header_size + position)
                .ok_or_else(|| {
                    ZipError::IllegalState(format!(
                        "Local header of {} doesn't fit in {}'s",
                        link.name(),
                        name
                    ))
                })?;
            link.write_local_header(out, stretch, ignore_timestamps, &mut no_nested_links)?;
            link_offsets.push((link.name().to_owned(), offset + position as u64));
            Ok(())
        };

        let mut header = Vec::with_capacity(header_size);
        entry.write_local_header(&mut header, 0, ignore_timestamps, &mut write_link)?;
        if header.len() != header_size {
            return Err(ZipError::IllegalState(format!(
                "Local header of {} is {} bytes, expected {}",
                name,
                header.len(),
                header_size
            )));
        }
        let raw = entry.raw_source()?;
        let expected = raw.size();

        let mut file = self.writable_file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&header)?;
        let written = io::copy(&mut raw.open()?, &mut file)?;
        if written != expected {
            return Err(ZipError::IllegalState(format!(
                "Wrote {} bytes of {}, expected {}",
                written, name, expected
            )));
        }
        trace!("Wrote {} at {} ({} + {} bytes)", name, offset, header_size, written);

        let path = self.path.clone();
        if let Some(placed) = self.entries.get_mut(name) {
            placed.entry.written_at(&path, offset)?;
        }
        for (link_name, link_offset) in link_offsets {
            if let Some(link) = self.linking.iter_mut().find(|l| l.name() == link_name) {
                link.linked_at(link_offset);
            }
        }
        Ok(())
    }

    fn write_zeros(&mut self, mut start: u64, size: u64) -> ZipResult<()> {
        trace!("Zeroing {} - {}", start, start + size);
        let end = start + size;
        while start < end {
            let chunk = (end - start).min(ZEROS.len() as u64);
            self.write_at(start, &ZEROS[..chunk as usize])?;
            start += chunk;
        }
        Ok(())
    }

    /// Computes the central directory and EOCD if they're missing,
    /// letting extensions have their say, and writes them if anything changed.
    fn recompute_and_write_directory(&mut self) -> ZipResult<()> {
        let mut changed = false;
        let mut tries_left = MAX_DIRECTORY_RECOMPUTES;
        loop {
            if self.directory.is_none() {
                self.reopen_rw()?;
                changed = true;
                self.compute_directory()?;
            }
            if self.eocd.is_empty() {
                self.reopen_rw()?;
                changed = true;
                self.compute_eocd()?;
            }
            self.notify(Event::EntriesWritten)?;

            tries_left -= 1;
            if tries_left == 0 {
                return Err(ZipError::MisbehavingExtension);
            }
            if self.directory.is_some() && !self.eocd.is_empty() {
                break;
            }
        }

        if changed {
            self.reopen_rw()?;
            let (offset, bytes) = match &self.directory {
                Some(d) => (d.offset, d.bytes.clone()),
                None => return Err(ZipError::IllegalState("central directory vanished".to_owned())),
            };
            if !bytes.is_empty() {
                self.write_at(offset, &bytes)?;
            }
            for (record_offset, record) in self.eocd.bytes_to_write()? {
                self.write_at(record_offset, &record)?;
            }
            debug!(
                "Wrote central directory ({} bytes at {}) and EOCD to {}",
                bytes.len(),
                offset,
                self.path
            );
        }
        Ok(())
    }

    fn compute_directory(&mut self) -> ZipResult<()> {
        let bytes = CentralDirectory::from_headers(
            self.entries
                .values()
                .map(|p| p.entry.header())
                .chain(self.linking.iter().map(|l| l.header())),
        )?
        .to_bytes(self.options.no_timestamps)?;

        self.map.truncate();
        let offset = self.map.size() + self.extra_directory_offset;
        let end = offset + bytes.len() as u64;
        self.map.extend(end);
        let range = if bytes.is_empty() {
            None
        } else {
            Some(self.map.add(offset, end, Region::CentralDirectory))
        };
        trace!("Central directory at {} ({} bytes)", offset, bytes.len());
        self.directory = Some(DirectoryRecord {
            offset,
            range,
            bytes,
        });
        Ok(())
    }

    fn compute_eocd(&mut self) -> ZipResult<()> {
        let (offset, size) = match &self.directory {
            Some(d) => (d.offset, d.bytes.len() as u64),
            None => {
                return Err(ZipError::IllegalState(
                    "EOCD computed before the central directory".to_owned(),
                ))
            }
        };
        let force_zip64 = CentralDirectory::from_headers(
            self.entries
                .values()
                .map(|p| p.entry.header())
                .chain(self.linking.iter().map(|l| l.header())),
        )?
        .needs_zip64()?;
        let total = (self.entries.len() + self.linking.len()) as u64;
        self.eocd
            .compute(offset, size, total, force_zip64, &mut self.map)
    }

    /// Entries that were written with data descriptors are moved
    /// and rewritten without them, since we never write descriptors.
    pub(super) fn remove_data_descriptors(&mut self) -> ZipResult<()> {
        let names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, p)| p.entry.data_descriptor_type() != DataDescriptorType::None)
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            debug!("Rewriting {} without its data descriptor", name);
            let mut entry = self.take_for_move(&name)?;
            entry.remove_data_descriptor();
            self.position(entry, PlacementAlgorithm::BestFit)?;
            self.dirty = true;
        }
        for link in &mut self.linking {
            if link.remove_data_descriptor() {
                self.dirty = true;
            }
        }
        self.place_orphans()
    }

    fn writable_file(&self) -> ZipResult<&std::fs::File> {
        match &self.handle {
            Handle::ReadWrite(f) => Ok(f),
            _ => Err(ZipError::IllegalState(format!(
                "{} isn't open for writing",
                self.path
            ))),
        }
    }

    pub(super) fn write_at(&self, offset: u64, data: &[u8]) -> ZipResult<()> {
        let mut file = self.writable_file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }
}

fn no_nested_links(segment: &LinkingSegment, _: &mut Vec<u8>) -> ZipResult<()> {
    Err(ZipError::IllegalState(format!(
        "Link {} can't hold links of its own",
        segment.name()
    )))
}
