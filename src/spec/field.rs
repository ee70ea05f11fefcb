//! Fixed-width little-endian fields, the building blocks of every ZIP record.
//!
//! Each record type describes its layout as a list of `const` [`Field`]s,
//! each knowing its offset, width, an optional fixed value (signatures,
//! disk numbers...) and any bounds it must respect. Reading and writing through
//! them gives every record the same bounds checks and error messages.

use crate::result::*;
use crate::verify_log::VerifyLog;

/// A constraint on the value of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invariant {
    /// Value must be at least this.
    Min(u64),
}

impl Invariant {
    fn holds(&self, value: u64) -> bool {
        match *self {
            Invariant::Min(m) => value >= m,
        }
    }

    fn describe(&self) -> String {
        match self {
            Invariant::Min(m) => format!("at least {}", m),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    name: &'static str,
    offset: usize,
    width: usize,
    expected: Option<u64>,
    invariants: &'static [Invariant],
}

impl Field {
    const fn new(offset: usize, width: usize, name: &'static str) -> Self {
        Self {
            name,
            offset,
            width,
            expected: None,
            invariants: &[],
        }
    }

    /// A 2-byte field at `offset`
    pub const fn f2(offset: usize, name: &'static str) -> Self {
        Self::new(offset, 2, name)
    }

    /// A 4-byte field at `offset`
    pub const fn f4(offset: usize, name: &'static str) -> Self {
        Self::new(offset, 4, name)
    }

    /// An 8-byte field at `offset`
    pub const fn f8(offset: usize, name: &'static str) -> Self {
        Self::new(offset, 8, name)
    }

    /// The field always holds `value`.
    pub const fn expecting(mut self, value: u64) -> Self {
        self.expected = Some(value);
        self
    }

    pub const fn with_invariants(mut self, invariants: &'static [Invariant]) -> Self {
        self.invariants = invariants;
        self
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Offset of the first byte after the field
    pub const fn end(&self) -> usize {
        self.offset + self.width
    }

    fn check_invariants(&self, value: u64) -> Result<(), String> {
        match self.invariants.iter().find(|i| !i.holds(value)) {
            Some(failed) => Err(failed.describe()),
            None => Ok(()),
        }
    }

    fn take<'a>(&self, input: &mut &'a [u8]) -> ZipResult<&'a [u8]> {
        if input.len() < self.width {
            return Err(ZipError::InvalidArchive(format!(
                "Cannot read field '{}' because only {} bytes remain",
                self.name,
                input.len()
            )));
        }
        let (bytes, rest) = input.split_at(self.width);
        *input = rest;
        Ok(bytes)
    }

    /// Skips over the field, shrinking `input`.
    pub fn skip(&self, input: &mut &[u8]) -> ZipResult<()> {
        self.take(input).map(|_| ())
    }

    /// Reads the field from the front of `input`, shrinking it.
    pub fn read(&self, input: &mut &[u8]) -> ZipResult<u64> {
        let value = self
            .take(input)?
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        self.check_invariants(value).map_err(|why| {
            ZipError::InvalidArchive(format!(
                "Value {} of field '{}' is invalid (must be {})",
                value, self.name, why
            ))
        })?;
        Ok(value)
    }

    /// Reads the field and checks it against its fixed value.
    pub fn verify(&self, input: &mut &[u8], log: Option<&mut VerifyLog>) -> ZipResult<()> {
        let expected = self.expected.ok_or_else(|| {
            ZipError::IllegalState(format!("field '{}' has no fixed value", self.name))
        })?;
        self.verify_value(input, expected, log)
    }

    /// Reads the field and checks it against `expected`.
    ///
    /// A mismatch is an error unless a log is provided,
    /// in which case it's noted there and we move on.
    pub fn verify_value(
        &self,
        input: &mut &[u8],
        expected: u64,
        log: Option<&mut VerifyLog>,
    ) -> ZipResult<()> {
        let value = self.read(input)?;
        if value != expected {
            let message = format!(
                "Incorrect value for field '{}': value is {} but {} expected",
                self.name, value, expected
            );
            match log {
                Some(log) => log.log(message),
                None => return Err(ZipError::InvalidArchive(message)),
            }
        }
        Ok(())
    }

    /// Appends `value` to `out`, little-endian.
    pub fn write(&self, out: &mut Vec<u8>, value: u64) -> ZipResult<()> {
        let invalid = |reason: String| ZipError::InvalidField {
            field: self.name,
            value,
            reason,
        };
        self.check_invariants(value)
            .map_err(|why| invalid(format!("must be {}", why)))?;
        if self.width < 8 && value >> (self.width * 8) != 0 {
            return Err(invalid(format!("wider than {} bytes", self.width)));
        }
        out.extend_from_slice(&value.to_le_bytes()[..self.width]);
        Ok(())
    }

    /// Appends the field's fixed value to `out`.
    pub fn write_expected(&self, out: &mut Vec<u8>) -> ZipResult<()> {
        let expected = self.expected.ok_or_else(|| {
            ZipError::IllegalState(format!("field '{}' has no fixed value", self.name))
        })?;
        self.write(out, expected)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::verify_log::VerifyLogMode;

    const SIG: Field = Field::f4(0, "Signature").expecting(0x04034b50);
    const COUNT: Field = Field::f2(SIG.end(), "Count").with_invariants(&[Invariant::Min(10)]);
    const BIG: Field = Field::f8(COUNT.end(), "Big");

    #[test]
    fn layout_is_computed_at_compile_time() {
        assert_eq!(COUNT.offset(), 4);
        assert_eq!(BIG.offset(), 6);
        assert_eq!(BIG.end(), 14);
    }

    #[test]
    fn write_then_read() {
        let mut out = Vec::new();
        SIG.write_expected(&mut out).unwrap();
        COUNT.write(&mut out, 17).unwrap();
        BIG.write(&mut out, u64::MAX - 1).unwrap();
        assert_eq!(&out[..4], b"PK\x03\x04");

        let mut input = out.as_slice();
        SIG.verify(&mut input, None).unwrap();
        assert_eq!(COUNT.read(&mut input).unwrap(), 17);
        assert_eq!(BIG.read(&mut input).unwrap(), u64::MAX - 1);
        assert!(input.is_empty());
    }

    #[test]
    fn invariants_checked_both_ways() {
        let mut out = Vec::new();
        assert!(matches!(
            COUNT.write(&mut out, 9),
            Err(ZipError::InvalidField { field: "Count", .. })
        ));
        let bytes = 9u16.to_le_bytes();
        assert!(COUNT.read(&mut &bytes[..]).is_err());
    }

    #[test]
    fn too_wide() {
        let field = Field::f2(0, "x");
        assert!(field.write(&mut Vec::new(), 0x1_0000).is_err());
    }

    #[test]
    fn short_input() {
        let bytes = [1u8, 2, 3];
        let err = SIG.read(&mut &bytes[..]).unwrap_err();
        assert!(err.to_string().contains("only 3 bytes remain"));
    }

    #[test]
    fn soft_verify_logs_and_continues() {
        let bytes = 5u32.to_le_bytes();
        let mut log = VerifyLog::new(VerifyLogMode::Collect);
        let mut input = &bytes[..];
        SIG.verify(&mut input, Some(&mut log)).unwrap();
        assert_eq!(log.logs().len(), 1);
        assert!(input.is_empty());

        assert!(SIG.verify(&mut &bytes[..], None).is_err());
    }
}
