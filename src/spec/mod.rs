//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`archive`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`archive`]: ../archive/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::borrow::Cow;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use codepage_437::*;

pub mod eocd;
pub mod extra;
pub mod field;
pub mod flags;
pub mod header;

use flags::GpFlags;

// Magic numbers denoting various sections of a ZIP archive

/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: u32 = 0x04034b50;
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: u32 = 0x02014b50;
/// End of central directory magic number
pub const EOCDR_MAGIC: u32 = 0x06054b50;
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: u32 = 0x06064b50;
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: u32 = 0x07064b50;
/// Optional data descriptor magic number
pub const DATA_DESCRIPTOR_MAGIC: u32 = 0x08074b50;

// 4.4.3.2 Current minimum feature versions are as defined below:

/// 1.0 - Default value
pub const VERSION_DEFAULT: u16 = 10;
/// 2.0 - File is a folder (directory), or compressed using Deflate
pub const VERSION_DIRECTORY_OR_DEFLATE: u16 = 20;
/// 4.5 - File uses ZIP64 format extensions
pub const VERSION_ZIP64: u16 = 45;
/// 6.2 - Central directory encryption
pub const VERSION_CENTRAL_DIRECTORY_ENCRYPTION: u16 = 62;

/// The highest version to extract we expect in central directory headers.
/// Anything higher is noted, but read anyway.
pub const MAX_VERSION_TO_EXTRACT: u64 = VERSION_DIRECTORY_OR_DEFLATE as u64;

/// Made by MS-DOS, spec version 2.4
pub const DEFAULT_VERSION_MADE_BY: u16 = 0x0018;

/// Entry names ending in this are directories.
pub const SEPARATOR: char = '/';

/// Can `name` be written without the UTF-8 flag?
pub fn can_ascii_encode(name: &str) -> bool {
    name.is_ascii()
}

/// Encodes a new entry name, returning the flags it should be stored with.
pub fn encode_name(name: &str) -> (Vec<u8>, GpFlags) {
    let flags = GpFlags::make(!can_ascii_encode(name));
    (name.as_bytes().to_vec(), flags)
}

/// Decodes a name (or comment) read from an archive.
///
/// If the UTF-8 flag isn't set, names are supposed to be CP437,
/// but in practice plenty of tools write UTF-8 and don't say so.
/// ASCII is the same in all three, so try UTF-8 before CP437.
pub fn decode_name(bytes: &[u8], flags: GpFlags) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) if flags.is_utf8_name() => String::from_utf8_lossy(bytes).into_owned(),
        Err(_) => {
            let cow: Cow<str> = Cow::borrow_from_cp437(bytes, &CP437_CONTROL);
            cow.into_owned()
        }
    }
}

/// Packs the time of day into MS-DOS format.
///
/// MS-DOS uses 2-second precision.
pub fn pack_time(t: &NaiveDateTime) -> u16 {
    ((t.hour() << 11) | (t.minute() << 5) | (t.second() / 2)) as u16
}

/// Packs the date into MS-DOS format, years since 1980.
///
/// Dates outside 1980-2107 are clamped.
pub fn pack_date(t: &NaiveDateTime) -> u16 {
    let year = (t.year() - 1980).clamp(0, 127) as u32;
    ((year << 9) | (t.month() << 5) | t.day()) as u16
}

/// The current local time, as MS-DOS (time, date).
pub fn pack_now() -> (u16, u16) {
    let now = Local::now().naive_local();
    (pack_time(&now), pack_date(&now))
}

/// Unpacks an MS-DOS time and date, if they make any sense.
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ascii_names_have_no_flags() {
        let (bytes, flags) = encode_name("res/a.png");
        assert_eq!(bytes, b"res/a.png");
        assert!(!flags.is_utf8_name());

        let (bytes, flags) = encode_name("héllo");
        assert_eq!(bytes, "héllo".as_bytes());
        assert!(flags.is_utf8_name());
    }

    #[test]
    fn decoding_falls_back() {
        let none = GpFlags::make(false);
        assert_eq!(decode_name(b"plain", none), "plain");
        // Unflagged UTF-8 is still UTF-8.
        assert_eq!(decode_name("héllo".as_bytes(), none), "héllo");
        // Not UTF-8: CP437, where 0x82 is é
        assert_eq!(decode_name(&[b'h', 0x82], none), "hé");
    }

    #[test]
    fn msdos_round_trip() {
        let t = NaiveDate::from_ymd_opt(2016, 2, 29)
            .unwrap()
            .and_hms_opt(13, 37, 42)
            .unwrap();
        let (time, date) = (pack_time(&t), pack_date(&t));
        assert_eq!(time, (13 << 11) | (37 << 5) | 21);
        assert_eq!(date, (36 << 9) | (2 << 5) | 29);
        assert_eq!(parse_msdos(time, date), Some(t));
    }

    #[test]
    fn zeroed_timestamps_dont_parse() {
        // Day 0 of month 0 isn't a date.
        assert_eq!(parse_msdos(0, 0), None);
    }
}
