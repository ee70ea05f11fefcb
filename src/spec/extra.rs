//! Extra fields, found in both local and central directory headers.
//!
//! 4.5.1 In order to allow different programs and different types
//! of information to be stored in the 'extra' field in .ZIP
//! files, the following structure MUST be used for all
//! programs storing data in this field:
//!
//! ```text
//!     header1+data1 + header2+data2 . . .
//! ```
//!
//! Each header MUST consist of:
//!
//! ```text
//!     Header ID - 2 bytes
//!     Data Size - 2 bytes
//! ```
//!
//! We only care about two kinds of segment. Alignment segments are padding
//! that pushes an entry's data to a particular boundary (and fills gaps between
//! entries). Linking segments embed another entry's local header inside this
//! one, so two central directory records can share the same data.
//! Everything else is carried along untouched.

use std::fmt;

use crate::result::*;

/// Our alignment segment, `0xd935`
pub const ALIGNMENT_HEADER_ID: u16 = 0xd935;
/// Local headers of linking entries, `0x2333`
pub const LINKING_HEADER_ID: u16 = 0x2333;
/// Zip64 extended information, `0x0001`
pub const ZIP64_HEADER_ID: u16 = 0x0001;

/// Decodes a segment's data given its header ID
type SegmentDecoder = fn(u16, &[u8]) -> ZipResult<Segment>;

/// Header IDs we interpret; everything else becomes [`Segment::Raw`].
const DECODERS: &[(u16, SegmentDecoder)] = &[(ALIGNMENT_HEADER_ID, AlignmentSegment::decode)];

/// One header ID + data pair of an extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Something we don't interpret
    Raw { header_id: u16, data: Vec<u8> },
    Alignment(AlignmentSegment),
    Linking(LinkingSegment),
}

impl Segment {
    pub fn header_id(&self) -> u16 {
        match self {
            Segment::Raw { header_id, .. } => *header_id,
            Segment::Alignment(_) => ALIGNMENT_HEADER_ID,
            Segment::Linking(_) => LINKING_HEADER_ID,
        }
    }

    /// Size of the whole segment, header included.
    pub fn size(&self) -> usize {
        match self {
            Segment::Raw { data, .. } => 4 + data.len(),
            Segment::Alignment(a) => a.size(),
            Segment::Linking(l) => l.size(),
        }
    }

    fn decode(header_id: u16, data: &[u8]) -> ZipResult<Self> {
        match DECODERS.iter().find(|(id, _)| *id == header_id) {
            Some((_, decoder)) => decoder(header_id, data),
            None => Ok(Segment::Raw {
                header_id,
                data: data.to_vec(),
            }),
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> ZipResult<()> {
        match self {
            Segment::Raw { header_id, data } => {
                out.extend_from_slice(&header_id.to_le_bytes());
                out.extend_from_slice(&crate::arch::u16(data.len() as u64, "extra data")?.to_le_bytes());
                out.extend_from_slice(data);
            }
            Segment::Alignment(a) => a.write(out)?,
            Segment::Linking(l) => {
                return Err(ZipError::IllegalState(format!(
                    "linking segment for {} can only be written with its entry",
                    l.name
                )))
            }
        }
        Ok(())
    }
}

/// Padding, plus the alignment that padding was meant to achieve.
///
/// Its data is the alignment (2 bytes) followed by zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentSegment {
    alignment: u16,
    padding: usize,
}

impl AlignmentSegment {
    /// Header ID, data size, and alignment
    pub const MINIMUM_SIZE: usize = 6;

    /// Creates a segment `total_size` bytes long.
    pub fn new(alignment: u16, total_size: usize) -> ZipResult<Self> {
        if alignment == 0 {
            return Err(ZipError::IllegalState("alignment must be positive".into()));
        }
        if total_size < Self::MINIMUM_SIZE {
            return Err(ZipError::IllegalState(format!(
                "alignment segment of {} bytes is smaller than {}",
                total_size,
                Self::MINIMUM_SIZE
            )));
        }
        Ok(Self {
            alignment,
            padding: total_size - Self::MINIMUM_SIZE,
        })
    }

    fn decode(_: u16, data: &[u8]) -> ZipResult<Segment> {
        if data.len() < 2 {
            return Err(ZipError::InvalidArchive(format!(
                "Alignment segment has {} bytes of data, needs at least 2",
                data.len()
            )));
        }
        let alignment = u16::from_le_bytes([data[0], data[1]]);
        if alignment == 0 {
            return Err(ZipError::InvalidArchive(
                "Alignment segment has an alignment of 0".into(),
            ));
        }
        Ok(Segment::Alignment(Self {
            alignment,
            padding: data.len() - 2,
        }))
    }

    pub fn alignment(&self) -> u16 {
        self.alignment
    }

    pub fn size(&self) -> usize {
        Self::MINIMUM_SIZE + self.padding
    }

    fn write(&self, out: &mut Vec<u8>) -> ZipResult<()> {
        out.extend_from_slice(&ALIGNMENT_HEADER_ID.to_le_bytes());
        let data_size = crate::arch::u16((self.size() - 4) as u64, "alignment padding")?;
        out.extend_from_slice(&data_size.to_le_bytes());
        out.extend_from_slice(&self.alignment.to_le_bytes());
        out.resize(out.len() + self.padding, 0);
        Ok(())
    }
}

/// A placeholder for the local header of a linking entry.
///
/// The header itself is rendered by the archive when the linked entry is
/// written, since only then do we know where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingSegment {
    /// Name of the linking entry
    pub(crate) name: String,
    /// Size of its local header
    pub(crate) header_size: usize,
    /// Dummy links write nothing: the linking entry's header already exists
    /// somewhere in the linked entry's data.
    pub(crate) dummy: bool,
}

impl LinkingSegment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    pub fn size(&self) -> usize {
        if self.dummy {
            0
        } else {
            self.header_size + 4
        }
    }
}

/// The contents of an extra field.
///
/// Fields read from an archive are kept as raw bytes until somebody asks
/// for their segments; plenty of tools write junk here that doesn't parse.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum ExtraField {
    #[default]
    Empty,
    Raw(Vec<u8>),
    Segments(Vec<Segment>),
}

impl ExtraField {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            ExtraField::Empty
        } else {
            ExtraField::Raw(bytes.to_vec())
        }
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        ExtraField::Segments(segments)
    }

    pub fn size(&self) -> usize {
        match self {
            ExtraField::Empty => 0,
            ExtraField::Raw(r) => r.len(),
            ExtraField::Segments(s) => s.iter().map(Segment::size).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Parses (if needed) the segments making up the field.
    pub fn segments(&self) -> ZipResult<Vec<Segment>> {
        match self {
            ExtraField::Empty => Ok(Vec::new()),
            ExtraField::Segments(s) => Ok(s.clone()),
            ExtraField::Raw(raw) => parse_segments(raw),
        }
    }

    /// Finds the first segment with the given header ID.
    pub fn segment(&self, header_id: u16) -> ZipResult<Option<Segment>> {
        Ok(self
            .segments()?
            .into_iter()
            .find(|s| s.header_id() == header_id))
    }

    /// Appends the field to `out`.
    ///
    /// Fails if there are linking segments;
    /// see [`write_with()`](Self::write_with).
    pub fn write(&self, out: &mut Vec<u8>) -> ZipResult<()> {
        self.write_with(out, &mut |l, _| {
            Err(ZipError::IllegalState(format!(
                "no header provided for linking entry {}",
                l.name
            )))
        })
    }

    /// Appends the field to `out`, asking `write_link` to render
    /// linking segments (and only those).
    pub fn write_with(
        &self,
        out: &mut Vec<u8>,
        write_link: &mut dyn FnMut(&LinkingSegment, &mut Vec<u8>) -> ZipResult<()>,
    ) -> ZipResult<()> {
        match self {
            ExtraField::Empty => {}
            ExtraField::Raw(raw) => out.extend_from_slice(raw),
            ExtraField::Segments(segments) => {
                for segment in segments {
                    match segment {
                        Segment::Linking(l) => {
                            let before = out.len();
                            write_link(l, out)?;
                            if out.len() - before != l.size() {
                                return Err(ZipError::IllegalState(format!(
                                    "linking segment for {} wrote {} bytes instead of {}",
                                    l.name,
                                    out.len() - before,
                                    l.size()
                                )));
                            }
                        }
                        other => other.write(out)?,
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size());
        self.write(&mut out)?;
        Ok(out)
    }
}

impl fmt::Debug for ExtraField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraField::Empty => f.write_str("ExtraField(empty)"),
            ExtraField::Raw(r) => write!(f, "ExtraField({} raw bytes)", r.len()),
            ExtraField::Segments(s) => f.debug_tuple("ExtraField").field(s).finish(),
        }
    }
}

fn parse_segments(mut raw: &[u8]) -> ZipResult<Vec<Segment>> {
    let mut segments = Vec::new();
    while !raw.is_empty() {
        if raw.len() < 4 {
            return Err(ZipError::InvalidArchive(format!(
                "Extra field has {} trailing bytes, too few for a segment header",
                raw.len()
            )));
        }
        let header_id = u16::from_le_bytes([raw[0], raw[1]]);
        let data_size = usize::from(u16::from_le_bytes([raw[2], raw[3]]));
        raw = &raw[4..];
        if raw.len() < data_size {
            return Err(ZipError::InvalidArchive(format!(
                "Extra field segment {:#06x} claims {} bytes but only {} remain",
                header_id,
                data_size,
                raw.len()
            )));
        }
        let (data, rest) = raw.split_at(data_size);
        segments.push(Segment::decode(header_id, data)?);
        raw = rest;
    }
    Ok(segments)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raw_is_kept_until_asked() {
        let bytes = [0x34, 0x12, 2, 0, 0xAA, 0xBB];
        let field = ExtraField::from_bytes(&bytes);
        assert_eq!(field.size(), 6);
        assert_eq!(field.to_bytes().unwrap(), bytes);
        assert_eq!(
            field.segments().unwrap(),
            vec![Segment::Raw {
                header_id: 0x1234,
                data: vec![0xAA, 0xBB]
            }]
        );
    }

    #[test]
    fn alignment_segment() {
        let segment = AlignmentSegment::new(4, 9).unwrap();
        let field = ExtraField::from_segments(vec![Segment::Alignment(segment)]);
        let bytes = field.to_bytes().unwrap();
        assert_eq!(bytes, [0x35, 0xd9, 5, 0, 4, 0, 0, 0, 0]);

        let parsed = ExtraField::from_bytes(&bytes).segments().unwrap();
        assert_eq!(parsed, vec![Segment::Alignment(segment)]);
        assert_eq!(parsed[0].size(), 9);
    }

    #[test]
    fn alignment_segment_bounds() {
        assert!(AlignmentSegment::new(0, 6).is_err());
        assert!(AlignmentSegment::new(4, 5).is_err());
        assert_eq!(AlignmentSegment::new(4, 6).unwrap().size(), 6);
        // Alignment of zero on disk is garbage
        assert!(ExtraField::from_bytes(&[0x35, 0xd9, 2, 0, 0, 0]).segments().is_err());
    }

    #[test]
    fn truncated_fields_fail_to_parse() {
        assert!(ExtraField::from_bytes(&[1, 0, 4, 0, 0]).segments().is_err());
        assert!(ExtraField::from_bytes(&[0, 0]).segments().is_err());
    }

    #[test]
    fn linking_segments_need_a_writer() {
        let link = LinkingSegment {
            name: "b".into(),
            header_size: 31,
            dummy: false,
        };
        let field = ExtraField::from_segments(vec![Segment::Linking(link)]);
        assert_eq!(field.size(), 35);
        assert!(field.to_bytes().is_err());

        let mut out = Vec::new();
        field
            .write_with(&mut out, &mut |l, out| {
                out.resize(out.len() + l.size(), 7);
                Ok(())
            })
            .unwrap();
        assert_eq!(out.len(), 35);
    }

    #[test]
    fn dummy_links_take_no_space() {
        let link = LinkingSegment {
            name: "b".into(),
            header_size: 31,
            dummy: true,
        };
        assert_eq!(Segment::Linking(link).size(), 0);
    }
}
