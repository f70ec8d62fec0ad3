//! Version tag codec
//!
//! Tags have the shape `<epoch>-<version>[-<suffix>]`. The codec writes them
//! in one pass into a buffer sized up front and compares candidates by
//! slicing, without building the expected string.

pub mod digits;
pub mod epoch;

pub use epoch::Epoch;

use digits::{count_digits, matches_u64, write_digits, U64_MAX_DIGITS};

const SEPARATOR: u8 = b'-';

#[derive(Debug, Clone)]
pub struct TagCodec {
    epoch: Epoch,
}

impl TagCodec {
    pub fn new(epoch: Epoch) -> Self {
        Self { epoch }
    }

    pub fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    /// Exact byte length of a tag: one separator without a suffix, two with one.
    #[inline]
    pub fn tag_len(&self, digit_count: usize, suffix_len: usize) -> usize {
        let separators = if suffix_len > 0 { 2 } else { 1 };
        self.epoch.len() + digit_count + suffix_len + separators
    }

    /// Builds `epoch-version[-suffix]`.
    pub fn generate(&self, version: u64, suffix: &str) -> String {
        let mut digits = [0u8; U64_MAX_DIGITS];
        let digits = write_digits(version, &mut digits);

        let mut tag = String::with_capacity(self.tag_len(digits.len(), suffix.len()));
        tag.push_str(self.epoch.as_str());
        tag.push(SEPARATOR as char);
        for &digit in digits {
            tag.push(digit as char);
        }
        if !suffix.is_empty() {
            tag.push(SEPARATOR as char);
            tag.push_str(suffix);
        }
        tag
    }

    /// Returns `true` iff `candidate` is exactly the tag for `(version, suffix)`
    /// under this codec's epoch. Malformed candidates are simply non-matching.
    pub fn compare(&self, candidate: &str, version: u64, suffix: &str) -> bool {
        let digit_count = count_digits(version);
        if candidate.len() != self.tag_len(digit_count, suffix.len()) {
            return false;
        }

        let bytes = candidate.as_bytes();
        let mut pos = self.epoch.len();

        if &bytes[..pos] != self.epoch.as_str().as_bytes() {
            return false;
        }
        if bytes[pos] != SEPARATOR {
            return false;
        }
        pos += 1;

        if !matches_u64(&bytes[pos..pos + digit_count], version) {
            return false;
        }
        pos += digit_count;

        if pos == bytes.len() {
            return suffix.is_empty();
        }
        if bytes[pos] != SEPARATOR {
            return false;
        }
        pos += 1;

        &bytes[pos..] == suffix.as_bytes()
    }
}
