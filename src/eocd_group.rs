//! Finding, placing, and writing the records at the end of an archive:
//! the EOCD, and (when we need them) the Zip64 EOCD and its locator.

use log::*;
use memchr::memmem;

use crate::archive::Region;
use crate::byte_range::{ByteRangeAllocator, RangeEntry};
use crate::result::*;
use crate::spec::eocd::{Eocd, ExtensibleDataSector, Zip64Eocd, Zip64Locator};
use crate::spec::*;
use crate::verify_log::VerifyLog;

/// How far from the end of the file the EOCD can start
const LAST_BYTES_TO_READ: u64 = (Eocd::FIXED_SIZE + Eocd::MAX_COMMENT_SIZE) as u64;

#[derive(Debug, Clone)]
struct Zip64Records {
    eocd_range: RangeEntry<Region>,
    eocd: Zip64Eocd,
    locator_range: RangeEntry<Region>,
}

/// The EOCD and its Zip64 companions, if they exist.
///
/// When the records are deleted (because the central directory is about to
/// move), we hang onto the comment and Zip64 extensible data so the next
/// records get them.
#[derive(Debug, Clone)]
pub(crate) struct EocdGroup {
    eocd: Option<(RangeEntry<Region>, Eocd)>,
    zip64: Option<Zip64Records>,
    comment: Vec<u8>,
    data_sector: ExtensibleDataSector,
    use_version_2: bool,
}

impl Default for EocdGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl EocdGroup {
    pub fn new() -> Self {
        Self {
            eocd: None,
            zip64: None,
            comment: Vec::new(),
            data_sector: ExtensibleDataSector::default(),
            use_version_2: false,
        }
    }

    /// Finds the EOCD (and Zip64 records, if any) of a file `file_length` bytes long,
    /// marking where they are in `map`.
    ///
    /// The EOCD signature can show up in its own comment,
    /// so we try every candidate from the end of the file backwards
    /// and take the first that parses.
    pub fn read(
        &mut self,
        file_length: u64,
        read_at: &mut dyn FnMut(u64, &mut [u8]) -> ZipResult<()>,
        map: &mut ByteRangeAllocator<Region>,
        log: &mut VerifyLog,
    ) -> ZipResult<()> {
        let to_read = LAST_BYTES_TO_READ.min(file_length);
        let mut last = vec![0u8; crate::arch::usize(to_read)?];
        let last_start = file_length - to_read;
        read_at(last_start, &mut last[..])?;

        let mut attempts = Vec::new();
        let mut found = None;
        for idx in memmem::rfind_iter(&last, &EOCDR_MAGIC.to_le_bytes()) {
            if idx + Eocd::FIXED_SIZE > last.len() {
                continue;
            }
            match Eocd::parse(&mut &last[idx..]) {
                Ok(eocd) => {
                    found = Some((last_start + idx as u64, eocd));
                    break;
                }
                Err(e) => {
                    debug!("Rejected EOCD candidate at {}: {}", last_start + idx as u64, e);
                    attempts.push(e);
                }
            }
        }
        let (eocd_start, eocd) = found.ok_or(ZipError::EocdNotFound { attempts })?;

        // Plenty of tools append junk after archives; not worth failing over.
        let eocd_end = eocd_start + eocd.size() as u64;
        log.verify(eocd_end == file_length, || {
            format!(
                "EOCD starts at {} and has {} bytes, but file ends at {}",
                eocd_start,
                eocd.size(),
                file_length
            )
        });
        debug!(
            "Found EOCD at {}: {} records, directory at {} ({} bytes)",
            eocd_start,
            eocd.total_records(),
            eocd.directory_offset(),
            eocd.directory_size()
        );
        let range = map.add(eocd_start, eocd_end, Region::Eocd);
        self.eocd = Some((range, eocd));

        if eocd_start >= Zip64Locator::SIZE as u64 {
            self.read_zip64(eocd_start - Zip64Locator::SIZE as u64, read_at, map, log)?;
        }
        Ok(())
    }

    fn read_zip64(
        &mut self,
        locator_start: u64,
        read_at: &mut dyn FnMut(u64, &mut [u8]) -> ZipResult<()>,
        map: &mut ByteRangeAllocator<Region>,
        log: &mut VerifyLog,
    ) -> ZipResult<()> {
        let mut locator_bytes = [0u8; Zip64Locator::SIZE];
        read_at(locator_start, &mut locator_bytes)?;
        if locator_bytes[..4] != ZIP64_EOCDR_LOCATOR_MAGIC.to_le_bytes() {
            return Ok(());
        }
        let locator = Zip64Locator::parse(&mut &locator_bytes[..])?;
        let z64_start = locator.eocd_offset();

        let mut size_bytes = [0u8; 8];
        read_at(z64_start + Zip64Eocd::SIZE_OFFSET as u64, &mut size_bytes)?;
        let z64_size = u64::from_le_bytes(size_bytes)
            .checked_add(Zip64Eocd::TRUE_SIZE_DIFFERENCE as u64)
            .ok_or_else(|| ZipError::InvalidArchive("Absurd Zip64 EOCD size".to_owned()))?;
        let z64_end = z64_start.saturating_add(z64_size);

        if z64_end != locator_start {
            let message = format!(
                "Zip64 EOCD record is stored in [{} - {}] and EOCD starts at {}",
                z64_start, z64_end, locator_start
            );
            // Overlapping records can't be made sense of; a gap is just odd.
            if z64_end > locator_start {
                return Err(ZipError::InvalidArchive(message));
            }
            log.log(message);
        }

        let mut z64_bytes = vec![0u8; crate::arch::usize(z64_size)?];
        read_at(z64_start, &mut z64_bytes[..])?;
        let z64 = Zip64Eocd::parse(&mut z64_bytes.as_slice())?;
        self.use_version_2 = z64.is_version_2();
        debug!(
            "Found Zip64 EOCD at {} (version {}): {} records, directory at {}",
            z64_start,
            if self.use_version_2 { 2 } else { 1 },
            z64.total_records(),
            z64.directory_offset()
        );

        let locator_range = map.add(
            locator_start,
            locator_start + Zip64Locator::SIZE as u64,
            Region::Zip64Locator,
        );
        let eocd_range = map.add(z64_start, z64_end, Region::Zip64Eocd);
        self.zip64 = Some(Zip64Records {
            eocd_range,
            eocd: z64,
            locator_range,
        });
        Ok(())
    }

    /// Builds new records for a central directory at `directory_offset`
    /// and places them at the end of `map`.
    ///
    /// The Zip64 records are added if any value overflows the plain EOCD,
    /// or if `force_zip64` (some entry needed Zip64 information).
    pub fn compute(
        &mut self,
        directory_offset: u64,
        directory_size: u64,
        total_records: u64,
        force_zip64: bool,
        map: &mut ByteRangeAllocator<Region>,
    ) -> ZipResult<()> {
        let use_zip64 = directory_offset >= Eocd::MAX_CD_OFFSET
            || directory_size >= Eocd::MAX_CD_SIZE
            || total_records > Eocd::MAX_TOTAL_RECORDS
            || force_zip64;

        // The Zip64 EOCD and its locator come before the plain EOCD.
        if use_zip64 {
            let z64 = Zip64Eocd::new(
                total_records,
                directory_offset,
                directory_size,
                self.use_version_2,
                self.data_sector.clone(),
            );
            let z64_start = map.size();
            let z64_end = z64_start + z64.size() as u64;
            map.extend(z64_end);
            let eocd_range = map.add(z64_start, z64_end, Region::Zip64Eocd);

            let locator_end = z64_end + Zip64Locator::SIZE as u64;
            map.extend(locator_end);
            let locator_range = map.add(z64_end, locator_end, Region::Zip64Locator);
            debug!("Placed Zip64 EOCD at {} and its locator at {}", z64_start, z64_end);
            self.zip64 = Some(Zip64Records {
                eocd_range,
                eocd: z64,
                locator_range,
            });
        }

        let eocd = Eocd::new(
            total_records.min(Eocd::MAX_TOTAL_RECORDS),
            directory_offset.min(Eocd::MAX_CD_OFFSET),
            directory_size.min(Eocd::MAX_CD_SIZE),
            self.comment.clone(),
        );
        let eocd_start = map.size();
        let eocd_end = eocd_start + eocd.size() as u64;
        map.extend(eocd_end);
        let range = map.add(eocd_start, eocd_end, Region::Eocd);
        trace!("Placed EOCD at {}", eocd_start);
        self.eocd = Some((range, eocd));
        Ok(())
    }

    /// What to write (and where) to put the records in the file.
    pub fn bytes_to_write(&self) -> ZipResult<Vec<(u64, Vec<u8>)>> {
        let (range, eocd) = self.eocd.as_ref().ok_or_else(missing)?;
        let mut writes = Vec::with_capacity(3);
        if let Some(z64) = &self.zip64 {
            writes.push((z64.eocd_range.start(), z64.eocd.to_bytes()?));
            let locator = Zip64Locator::new(z64.eocd_range.start());
            writes.push((z64.locator_range.start(), locator.to_bytes()?));
        }
        writes.push((range.start(), eocd.to_bytes()?));
        Ok(writes)
    }

    /// Forgets the records, freeing their space in `map`.
    pub fn delete(&mut self, map: &mut ByteRangeAllocator<Region>) {
        if let Some((range, eocd)) = self.eocd.take() {
            map.remove(&range);
            self.comment = eocd.comment().to_vec();
        }
        match self.zip64.take() {
            Some(z64) => {
                self.data_sector = z64.eocd.extensible_data().clone();
                map.remove(&z64.locator_range);
                map.remove(&z64.eocd_range);
            }
            None => self.data_sector = ExtensibleDataSector::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.eocd.is_none()
    }

    /// Picks the Zip64 EOCD layout for the next records we compute.
    pub fn set_use_version_2(&mut self, use_version_2: bool, log: &mut VerifyLog) {
        log.verify(self.eocd.is_none(), || {
            "Zip64 EOCD version changed while the records exist".to_owned()
        });
        self.use_version_2 = use_version_2;
    }

    /// Replaces the archive comment, deleting the current records.
    ///
    /// Comments that could be mistaken for an EOCD are rejected,
    /// since the archive wouldn't read back the same.
    pub fn set_comment(
        &mut self,
        comment: &[u8],
        map: &mut ByteRangeAllocator<Region>,
    ) -> ZipResult<()> {
        if comment.len() > Eocd::MAX_COMMENT_SIZE {
            return Err(ZipError::InvalidComment(format!(
                "EOCD comment size ({}) is larger than the maximum allowed ({})",
                comment.len(),
                Eocd::MAX_COMMENT_SIZE
            )));
        }
        let limit = comment.len().saturating_sub(Eocd::FIXED_SIZE);
        for i in memmem::find_iter(comment, &EOCDR_MAGIC.to_le_bytes()).take_while(|i| *i < limit)
        {
            if Eocd::parse(&mut &comment[i..]).is_ok() {
                return Err(ZipError::InvalidComment(format!(
                    "Position {} of the comment contains a valid EOCD record",
                    i
                )));
            }
        }
        self.delete(map);
        self.comment = comment.to_vec();
        Ok(())
    }

    pub fn comment(&self) -> &[u8] {
        match &self.eocd {
            Some((_, eocd)) => eocd.comment(),
            None => &self.comment,
        }
    }

    fn plain(&self) -> ZipResult<&Eocd> {
        Ok(&self.eocd.as_ref().ok_or_else(missing)?.1)
    }

    /// Takes the plain EOCD's value unless it's a sentinel and we have Zip64 records.
    fn resolve(&self, plain: u64, sentinel: u64, z64: fn(&Zip64Eocd) -> u64) -> u64 {
        match &self.zip64 {
            Some(z) if plain == sentinel => z64(&z.eocd),
            _ => plain,
        }
    }

    pub fn directory_offset(&self) -> ZipResult<u64> {
        let plain = self.plain()?.directory_offset();
        Ok(self.resolve(plain, Eocd::MAX_CD_OFFSET, Zip64Eocd::directory_offset))
    }

    pub fn directory_size(&self) -> ZipResult<u64> {
        let plain = self.plain()?.directory_size();
        Ok(self.resolve(plain, Eocd::MAX_CD_SIZE, Zip64Eocd::directory_size))
    }

    pub fn total_records(&self) -> ZipResult<u64> {
        let plain = self.plain()?.total_records();
        Ok(self.resolve(plain, Eocd::MAX_TOTAL_RECORDS, Zip64Eocd::total_records))
    }

    /// Where the records start: the Zip64 EOCD if there is one, or the EOCD.
    pub fn offset(&self) -> Option<u64> {
        match (&self.zip64, &self.eocd) {
            (Some(z), Some(_)) => Some(z.eocd_range.start()),
            (_, Some((range, _))) => Some(range.start()),
            _ => None,
        }
    }

    /// Bytes from the start of the records to the end of the EOCD
    pub fn size(&self) -> Option<u64> {
        let (range, _) = self.eocd.as_ref()?;
        match &self.zip64 {
            Some(z) => Some(range.end() - z.eocd_range.start()),
            None => Some(range.size()),
        }
    }
}

fn missing() -> ZipError {
    ZipError::IllegalState("EOCD hasn't been computed".to_owned())
}
