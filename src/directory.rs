//! The central directory: every entry's header, back to back.

use std::collections::BTreeMap;

use log::*;

use crate::result::*;
use crate::spec::header::CentralDirectoryHeader;
use crate::verify_log::VerifyLog;

/// Reads `count` headers from the front of `bytes`.
///
/// Archives with two entries of the same name happen; we note it
/// and keep the last one, as most readers would.
pub(crate) fn parse(
    mut bytes: &[u8],
    count: u64,
    ignore_timestamps: bool,
    log: &mut VerifyLog,
) -> ZipResult<BTreeMap<String, CentralDirectoryHeader>> {
    let total = bytes.len();
    let mut headers = BTreeMap::new();
    for i in 0..count {
        let header = CentralDirectoryHeader::parse(&mut bytes, ignore_timestamps, log).context(
            || {
                format!(
                    "Failed to read directory entry index {} (total directory bytes read: {})",
                    i,
                    total - bytes.len()
                )
            },
        )?;
        let name = header.name().to_owned();
        if headers.insert(name.clone(), header).is_some() {
            log.log(format!("Zip file contains duplicate file '{}'", name));
        }
    }
    log.verify(bytes.is_empty(), || {
        format!(
            "Central directory has {} bytes after its {} entries",
            bytes.len(),
            count
        )
    });
    Ok(headers)
}

/// A set of headers to write as a central directory.
///
/// Headers are kept sorted by name, so the same entries always make the
/// same bytes, whatever order they were added in.
#[derive(Debug, Default)]
pub(crate) struct CentralDirectory<'a> {
    headers: BTreeMap<&'a str, &'a CentralDirectoryHeader>,
}

impl<'a> CentralDirectory<'a> {
    pub fn from_headers<I>(headers: I) -> ZipResult<Self>
    where
        I: IntoIterator<Item = &'a CentralDirectoryHeader>,
    {
        let mut directory = Self::default();
        for header in headers {
            if directory.headers.insert(header.name(), header).is_some() {
                return Err(ZipError::DuplicateEntry(header.name().to_owned()));
            }
        }
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Does any entry need Zip64 extended information?
    pub fn needs_zip64(&self) -> ZipResult<bool> {
        for header in self.headers.values() {
            if header.needs_zip64()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn to_bytes(&self, ignore_timestamps: bool) -> ZipResult<Vec<u8>> {
        let mut size = 0;
        for header in self.headers.values() {
            size += header.record_size()?;
        }
        let mut out = Vec::with_capacity(size);
        for header in self.headers.values() {
            header.write(&mut out, ignore_timestamps)?;
        }
        trace!(
            "Wrote central directory of {} entries ({} bytes)",
            self.len(),
            out.len()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spec::flags::CompressionMethod;
    use crate::spec::header::{CompressInfo, CompressState};
    use crate::verify_log::VerifyLogMode;

    fn header(name: &str, offset: u64) -> CentralDirectoryHeader {
        let info = CompressInfo::new(CompressionMethod::Store, 3, false);
        let mut cdh =
            CentralDirectoryHeader::new(name, 3, 0x1234, CompressState::Ready(info), (0, 0));
        cdh.set_offset(Some(offset));
        cdh
    }

    #[test]
    fn written_sorted_by_name() {
        let (b, a, c) = (header("b", 0), header("a", 40), header("c", 80));
        let bytes = CentralDirectory::from_headers([&b, &a, &c])
            .unwrap()
            .to_bytes(false)
            .unwrap();

        let mut log = VerifyLog::new(VerifyLogMode::Collect);
        let parsed = parse(&bytes, 3, false, &mut log).unwrap();
        assert!(log.logs().is_empty());
        let names: Vec<_> = parsed.keys().map(String::as_str).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(parsed["a"].offset(), Some(40));

        // First record on disk is "a"
        let mut input = bytes.as_slice();
        let first = CentralDirectoryHeader::parse(&mut input, false, &mut log).unwrap();
        assert_eq!(first.name(), "a");
    }

    #[test]
    fn one_far_entry_needs_zip64() {
        let (near, far) = (header("near", 0), header("far", 0x1_0000_0000));
        assert!(!CentralDirectory::from_headers([&near])
            .unwrap()
            .needs_zip64()
            .unwrap());
        assert!(CentralDirectory::from_headers([&near, &far])
            .unwrap()
            .needs_zip64()
            .unwrap());
    }

    #[test]
    fn duplicates_rejected_when_writing() {
        let (a, other_a) = (header("a", 0), header("a", 10));
        assert!(matches!(
            CentralDirectory::from_headers([&a, &other_a]),
            Err(ZipError::DuplicateEntry(n)) if n == "a"
        ));
    }

    #[test]
    fn duplicates_logged_when_reading() {
        let (a, b) = (header("a", 0), header("b", 10));
        let mut bytes = CentralDirectory::from_headers([&a, &b])
            .unwrap()
            .to_bytes(false)
            .unwrap();
        let mut again = Vec::new();
        header("a", 99).write(&mut again, false).unwrap();
        bytes.extend_from_slice(&again);

        let mut log = VerifyLog::new(VerifyLogMode::Collect);
        let parsed = parse(&bytes, 3, false, &mut log).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["a"].offset(), Some(99));
        assert_eq!(log.logs().len(), 1);
    }

    #[test]
    fn failures_say_which_entry() {
        let a = header("a", 0);
        let bytes = CentralDirectory::from_headers([&a])
            .unwrap()
            .to_bytes(false)
            .unwrap();
        let mut log = VerifyLog::new(VerifyLogMode::Discard);
        let err = parse(&bytes, 2, false, &mut log).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("index 1"), "{}", message);
        assert!(message.contains(&bytes.len().to_string()), "{}", message);
    }
}
