//! Checked casts between the integer widths ZIP records use.

use std::convert::TryFrom;

use crate::result::*;

/// A checked cast from u64 to usize
///
/// We could use the `cast` crate,
/// (https://docs.rs/cast/0.2.3/cast/)
/// but these are the only ones we really need.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZipError::InsufficientAddressSpace)
}

/// A checked cast to a 2-byte record field.
pub fn u16<I: TryInto<u16> + Copy + Into<u64>>(i: I, what: &str) -> ZipResult<u16> {
    i.try_into()
        .map_err(|_| ZipError::Capacity(format!("{} ({}) doesn't fit in 16 bits", what, i.into())))
}

/// A checked cast to a 4-byte record field.
pub fn u32<I: TryInto<u32> + Copy + Into<u64>>(i: I, what: &str) -> ZipResult<u32> {
    i.try_into()
        .map_err(|_| ZipError::Capacity(format!("{} ({}) doesn't fit in 32 bits", what, i.into())))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn narrowing() {
        assert_eq!(u16(65535u64, "x").unwrap(), 65535);
        assert!(matches!(u16(65536u64, "x"), Err(ZipError::Capacity(_))));
        assert_eq!(u32(0xFFFF_FFFFu64, "x").unwrap(), 0xFFFF_FFFF);
        assert!(u32(0x1_0000_0000u64, "x").is_err());
        assert_eq!(usize(42u32).unwrap(), 42);
    }
}
