//! Noticing when somebody else changes an archive we've closed.

use std::fs::{self, File};
use std::io::{self, prelude::*, BufReader};
use std::time::SystemTime;

use camino::Utf8Path;
use log::*;

use crate::result::*;

/// What a file looked like when we closed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    modified: Option<SystemTime>,
    length: u64,
    crc32: u32,
}

impl Fingerprint {
    /// Fingerprints the file at `path`, or returns `None` if it doesn't exist.
    pub fn of(path: &Utf8Path) -> ZipResult<Option<Self>> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let crc32 = checksum(path)?;
        Ok(Some(Self {
            // Not every platform has modification times.
            modified: metadata.modified().ok(),
            length: metadata.len(),
            crc32,
        }))
    }

    /// Is the file at `path` still the one we fingerprinted?
    pub fn matches(&self, path: &Utf8Path) -> ZipResult<bool> {
        let now = Self::of(path)?;
        let same = now.as_ref() == Some(self);
        if !same {
            debug!("{} changed since it was closed: {:?} -> {:?}", path, self, now);
        }
        Ok(same)
    }
}

fn checksum(path: &Utf8Path) -> ZipResult<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut reader = BufReader::new(File::open(path)?);
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

#[cfg(test)]
mod test {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn changes_are_noticed() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("f.zip")).unwrap();
        assert_eq!(Fingerprint::of(&path).unwrap(), None);

        fs::write(&path, b"first").unwrap();
        let print = Fingerprint::of(&path).unwrap().unwrap();
        assert!(print.matches(&path).unwrap());

        // Same length, different contents
        fs::write(&path, b"other").unwrap();
        assert!(!print.matches(&path).unwrap());

        fs::remove_file(&path).unwrap();
        assert!(!print.matches(&path).unwrap());
    }
}
