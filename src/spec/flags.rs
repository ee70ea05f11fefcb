//! General purpose bit flags, compression methods, and data descriptors.

use crate::result::*;

// 4.4.4 general purpose bit flag: (2 bytes)
//
// Bit 0: If set, indicates that the file is encrypted.
const BIT_ENCRYPTION: u16 = 1;
// Bit 3: If this bit is set, the fields crc-32, compressed
//        size and uncompressed size are set to zero in the
//        local header.  The correct values are put in the
//        data descriptor immediately following the compressed
//        data.
const BIT_DEFERRED_CRC: u16 = 1 << 3;
// Bit 4: Reserved for use with method 8, for enhanced deflating.
const BIT_ENHANCED_DEFLATING: u16 = 1 << 4;
// Bit 5: If this bit is set, this indicates that the file is
//        compressed patched data.
const BIT_PATCHED_DATA: u16 = 1 << 5;
// Bit 6: Strong encryption. Bit 13: Set when encrypting the
//        Central Directory to indicate selected data values
//        in the Local Header are masked to hide their actual values.
const BIT_STRONG_ENCRYPTION: u16 = (1 << 6) | (1 << 13);
// Bit 11: Language encoding flag (EFS).  If this bit is set,
//         the filename and comment fields for this file
//         MUST be encoded using UTF-8. (see APPENDIX D)
const BIT_EFS: u16 = 1 << 11;
// Bits 7-10, 14, 15: Currently unused (or reserved by PKWARE).
const BIT_UNUSED: u16 = (1 << 7) | (1 << 8) | (1 << 9) | (1 << 10) | (1 << 14) | (1 << 15);

/// The general purpose bit flags of an entry,
/// limited to the ones we know how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpFlags(u16);

impl GpFlags {
    /// Flags for a new entry: nothing set except, maybe, UTF-8 names.
    pub fn make(utf8_name: bool) -> Self {
        if utf8_name {
            GpFlags(BIT_EFS)
        } else {
            GpFlags(0)
        }
    }

    /// Validates flags read from an archive.
    pub fn from_bits(bits: u64) -> ZipResult<Self> {
        let unsupported = |what: &str| Err(ZipError::UnsupportedArchive(what.to_owned()));
        if bits > u64::from(u16::MAX) {
            return unsupported("General purpose flags wider than 16 bits");
        }
        let bits = bits as u16;
        if bits & BIT_ENCRYPTION != 0 {
            return unsupported("Encrypted entries");
        }
        if bits & BIT_ENHANCED_DEFLATING != 0 {
            return unsupported("Enhanced deflating");
        }
        if bits & BIT_PATCHED_DATA != 0 {
            return unsupported("Compressed patched data");
        }
        if bits & BIT_STRONG_ENCRYPTION != 0 {
            return unsupported("Strong encryption");
        }
        if bits & BIT_UNUSED != 0 {
            return unsupported("Unused general purpose bits set");
        }
        Ok(GpFlags(bits))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Is a data descriptor following the entry's data?
    pub fn is_deferred_crc(self) -> bool {
        self.0 & BIT_DEFERRED_CRC != 0
    }

    pub fn is_utf8_name(self) -> bool {
        self.0 & BIT_EFS != 0
    }

    /// Flags for a copy of this entry whose data will be written without
    /// a data descriptor. Everything but the name encoding is dropped.
    pub fn reset_deferred_crc(self) -> Self {
        GpFlags::make(self.is_utf8_name())
    }
}

/// How an entry's data is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Stored as-is
    Store,
    /// Raw deflate (RFC 1951)
    Deflate,
    /// Anything else; we can move it around but not read it.
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn code(self) -> u16 {
        match self {
            CompressionMethod::Store => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(c) => c,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => CompressionMethod::Store,
            8 => CompressionMethod::Deflate,
            // 12 => CompressionMethod::Bzip2,
            c => CompressionMethod::Unsupported(c),
        }
    }
}

/// Whether (and how) a data descriptor follows an entry's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDescriptorType {
    None,
    /// crc-32, compressed size, uncompressed size
    WithoutSignature,
    /// The same, preceded by `PK\x07\x08`
    WithSignature,
}

impl DataDescriptorType {
    pub fn size(self) -> u64 {
        match self {
            DataDescriptorType::None => 0,
            DataDescriptorType::WithoutSignature => 12,
            DataDescriptorType::WithSignature => 16,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn make_only_sets_efs() {
        assert_eq!(GpFlags::make(false).bits(), 0);
        assert_eq!(GpFlags::make(true).bits(), 1 << 11);
        assert!(GpFlags::make(true).is_utf8_name());
    }

    #[test]
    fn rejects_unsupported_bits() {
        for bit in [0, 4, 5, 6, 7, 8, 9, 10, 13, 14, 15] {
            assert!(
                matches!(
                    GpFlags::from_bits(1 << bit),
                    Err(ZipError::UnsupportedArchive(_))
                ),
                "bit {} accepted",
                bit
            );
        }
        assert!(GpFlags::from_bits(1 << 16).is_err());
    }

    #[test]
    fn deferred_crc_can_be_cleared() {
        let flags = GpFlags::from_bits((1 << 3) | (1 << 1) | (1 << 11)).unwrap();
        assert!(flags.is_deferred_crc());
        let cleared = flags.reset_deferred_crc();
        assert!(!cleared.is_deferred_crc());
        assert_eq!(cleared.bits(), 1 << 11);
    }

    #[test]
    fn method_codes() {
        assert_eq!(CompressionMethod::from_code(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::from_code(12).code(), 12);
        assert_eq!(CompressionMethod::Store.code(), 0);
    }
}
