//! How an archive is opened and edited.

use std::fmt;
use std::sync::Arc;

use crate::compress::{Compressor, DeflateCompressor};
use crate::storage::{ByteStorage, InMemoryStorage};
use crate::verify_log::VerifyLogMode;

/// Alignment of an entry whose data can start anywhere
pub const NO_ALIGNMENT: u16 = 1;

/// Decides how an entry's data should be aligned, from its name.
///
/// Only stored (uncompressed) entries are aligned, since aligning
/// compressed data doesn't let anyone map it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AlignmentRule {
    #[default]
    None,
    Constant(u16),
    Suffix {
        suffix: String,
        alignment: u16,
    },
    /// The first rule that asks for alignment wins.
    Compose(Vec<AlignmentRule>),
}

impl AlignmentRule {
    pub fn none() -> Self {
        AlignmentRule::None
    }

    /// Aligns every entry to `alignment` bytes.
    ///
    /// # Panics
    ///
    /// If `alignment` is zero.
    pub fn constant(alignment: u16) -> Self {
        assert!(alignment > 0, "alignment must be positive");
        AlignmentRule::Constant(alignment)
    }

    /// Aligns entries whose names end in `suffix` to `alignment` bytes.
    ///
    /// # Panics
    ///
    /// If `alignment` is zero.
    pub fn for_suffix<S: Into<String>>(suffix: S, alignment: u16) -> Self {
        assert!(alignment > 0, "alignment must be positive");
        AlignmentRule::Suffix {
            suffix: suffix.into(),
            alignment,
        }
    }

    pub fn compose<I: IntoIterator<Item = AlignmentRule>>(rules: I) -> Self {
        AlignmentRule::Compose(rules.into_iter().collect())
    }

    /// The alignment for an entry named `name`
    /// ([`NO_ALIGNMENT`] if it can go anywhere).
    /// A zero alignment in a hand-built rule means no alignment.
    pub fn alignment(&self, name: &str) -> u16 {
        match self {
            AlignmentRule::None => NO_ALIGNMENT,
            AlignmentRule::Constant(a) => (*a).max(NO_ALIGNMENT),
            AlignmentRule::Suffix { suffix, alignment } => {
                if name.ends_with(suffix.as_str()) {
                    (*alignment).max(NO_ALIGNMENT)
                } else {
                    NO_ALIGNMENT
                }
            }
            AlignmentRule::Compose(rules) => rules
                .iter()
                .map(|r| r.alignment(name))
                .find(|a| *a != NO_ALIGNMENT)
                .unwrap_or(NO_ALIGNMENT),
        }
    }
}

/// Settings for an archive, fixed once it's opened.
///
/// ```
/// use zedit::{AlignmentRule, ArchiveOptions};
///
/// let options = ArchiveOptions::default()
///     .alignment_rule(AlignmentRule::for_suffix(".so", 4096))
///     .no_timestamps(true);
/// assert!(options.timestamps_ignored());
/// ```
#[derive(Clone)]
pub struct ArchiveOptions {
    pub(crate) storage: Arc<dyn ByteStorage>,
    pub(crate) compressor: Arc<dyn Compressor>,
    pub(crate) no_timestamps: bool,
    pub(crate) alignment_rule: AlignmentRule,
    pub(crate) cover_empty_space: bool,
    pub(crate) auto_sort: bool,
    pub(crate) skip_validation: bool,
    pub(crate) zip64_version_2: bool,
    pub(crate) verify_log: VerifyLogMode,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            storage: Arc::new(InMemoryStorage::new()),
            compressor: Arc::new(DeflateCompressor::default()),
            no_timestamps: false,
            alignment_rule: AlignmentRule::None,
            cover_empty_space: true,
            auto_sort: false,
            skip_validation: false,
            zip64_version_2: false,
            verify_log: VerifyLogMode::Discard,
        }
    }
}

impl fmt::Debug for ArchiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveOptions")
            .field("no_timestamps", &self.no_timestamps)
            .field("alignment_rule", &self.alignment_rule)
            .field("cover_empty_space", &self.cover_empty_space)
            .field("auto_sort", &self.auto_sort)
            .field("skip_validation", &self.skip_validation)
            .field("zip64_version_2", &self.zip64_version_2)
            .field("verify_log", &self.verify_log)
            .finish_non_exhaustive()
    }
}

impl ArchiveOptions {
    /// Where entry contents are kept until they're written
    pub fn storage(mut self, storage: Arc<dyn ByteStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Zero out every timestamp we write, and don't compare them on read.
    pub fn no_timestamps(mut self, no_timestamps: bool) -> Self {
        self.no_timestamps = no_timestamps;
        self
    }

    pub fn alignment_rule(mut self, rule: AlignmentRule) -> Self {
        self.alignment_rule = rule;
        self
    }

    /// Pad the local extra field of the entry after each gap so that
    /// no bytes of the file go unaccounted for.
    /// Without this, gaps are zeroed instead.
    pub fn cover_empty_space(mut self, cover: bool) -> Self {
        self.cover_empty_space = cover;
        self
    }

    /// Rewrite every entry in name order before each update.
    pub fn auto_sort(mut self, sort: bool) -> Self {
        self.auto_sort = sort;
        self
    }

    /// Don't compare local headers against the central directory.
    pub fn skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    /// Write version 2 Zip64 EOCD records when Zip64 is needed.
    pub fn zip64_version_2(mut self, version_2: bool) -> Self {
        self.zip64_version_2 = version_2;
        self
    }

    pub fn verify_log(mut self, mode: VerifyLogMode) -> Self {
        self.verify_log = mode;
        self
    }

    pub fn timestamps_ignored(&self) -> bool {
        self.no_timestamps
    }

    pub fn alignment(&self) -> &AlignmentRule {
        &self.alignment_rule
    }

    pub fn storage_ref(&self) -> &Arc<dyn ByteStorage> {
        &self.storage
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn suffix_rules() {
        let rule = AlignmentRule::for_suffix(".so", 4096);
        assert_eq!(rule.alignment("lib/x86/libfoo.so"), 4096);
        assert_eq!(rule.alignment("classes.dex"), NO_ALIGNMENT);
    }

    #[test]
    fn first_real_alignment_wins() {
        let rule = AlignmentRule::compose([
            AlignmentRule::none(),
            AlignmentRule::for_suffix(".so", 4096),
            AlignmentRule::constant(4),
        ]);
        assert_eq!(rule.alignment("libfoo.so"), 4096);
        assert_eq!(rule.alignment("resources.arsc"), 4);
        assert_eq!(AlignmentRule::compose([]).alignment("x"), NO_ALIGNMENT);
    }

    #[test]
    #[should_panic]
    fn zero_alignment() {
        AlignmentRule::constant(0);
    }

    #[test]
    fn zero_in_a_hand_built_rule_means_unaligned() {
        assert_eq!(AlignmentRule::Constant(0).alignment("x"), NO_ALIGNMENT);
        let rule = AlignmentRule::Compose(vec![
            AlignmentRule::Suffix {
                suffix: ".so".to_owned(),
                alignment: 0,
            },
            AlignmentRule::constant(8),
        ]);
        assert_eq!(rule.alignment("libfoo.so"), 8);
    }

    #[test]
    fn defaults() {
        let options = ArchiveOptions::default();
        assert!(options.cover_empty_space);
        assert!(!options.auto_sort);
        assert!(!options.timestamps_ignored());
        assert_eq!(options.verify_log, VerifyLogMode::Discard);
        assert_eq!(options.alignment(), &AlignmentRule::None);
    }
}
