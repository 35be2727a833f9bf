//! Single-splice deltas between two versions of a text payload.
//!
//! Context payloads are usually regenerated with small local edits, so one
//! splice (keep the common prefix and suffix, replace the middle) captures
//! most changes. Offsets are byte offsets that always fall on char
//! boundaries of both texts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Replace `delete` bytes at `start` with `insert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Splice {
    pub start: usize,
    pub delete: usize,
    pub insert: String,
}

impl Splice {
    /// Compute the splice turning `old` into `new`.
    pub fn diff(old: &str, new: &str) -> Self {
        let (old_bytes, new_bytes) = (old.as_bytes(), new.as_bytes());

        let mut prefix = old_bytes
            .iter()
            .zip(new_bytes)
            .take_while(|(a, b)| a == b)
            .count();
        while !old.is_char_boundary(prefix) {
            prefix -= 1;
        }

        let max_suffix = old.len().min(new.len()) - prefix;
        let mut suffix = old_bytes
            .iter()
            .rev()
            .zip(new_bytes.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();
        while !old.is_char_boundary(old.len() - suffix) {
            suffix -= 1;
        }

        Self {
            start: prefix,
            delete: old.len() - prefix - suffix,
            insert: new[prefix..new.len() - suffix].to_string(),
        }
    }

    /// Apply to `old`, failing if the splice does not fit it.
    pub fn apply(&self, old: &str) -> Result<String, Error> {
        let end = self
            .start
            .checked_add(self.delete)
            .filter(|end| *end <= old.len())
            .ok_or_else(|| Error::InvalidInput("splice extends past the base text".into()))?;
        if !old.is_char_boundary(self.start) || !old.is_char_boundary(end) {
            return Err(Error::InvalidInput("splice does not fall on char boundaries".into()));
        }

        let mut out = String::with_capacity(old.len() - self.delete + self.insert.len());
        out.push_str(&old[..self.start]);
        out.push_str(&self.insert);
        out.push_str(&old[end..]);
        Ok(out)
    }

    pub fn is_noop(&self) -> bool {
        self.delete == 0 && self.insert.is_empty()
    }

    /// Size of the splice on the wire.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_string(self).map_or(usize::MAX, |s| s.len())
    }
}

/// Build a splice when it is worth sending instead of the full payload.
///
/// Returns `None` when either payload is not UTF-8 or the encoded splice is
/// larger than `max_ratio` of the new payload.
pub fn worthwhile_splice(old: &[u8], new: &[u8], max_ratio: f64) -> Option<Splice> {
    let old = std::str::from_utf8(old).ok()?;
    let new = std::str::from_utf8(new).ok()?;
    let splice = Splice::diff(old, new);
    let budget = (new.len() as f64 * max_ratio).floor() as usize;
    (splice.encoded_len() <= budget).then_some(splice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(old: &str, new: &str) -> Splice {
        let splice = Splice::diff(old, new);
        assert_eq!(splice.apply(old).unwrap(), new, "splice {splice:?}");
        splice
    }

    #[test]
    fn test_identical_is_noop() {
        assert!(roundtrip("engagement summary", "engagement summary").is_noop());
    }

    #[test]
    fn test_append_and_truncate() {
        let s = roundtrip("finding F-1", "finding F-1, closed");
        assert_eq!((s.start, s.delete, s.insert.as_str()), (11, 0, ", closed"));

        let s = roundtrip("finding F-1, closed", "finding F-1");
        assert_eq!((s.start, s.delete, s.insert.as_str()), (11, 8, ""));
    }

    #[test]
    fn test_middle_edit() {
        let s = roundtrip("status: open; owner: alice", "status: closed; owner: alice");
        assert_eq!(s.insert, "closed");
    }

    #[test]
    fn test_repeated_text_does_not_overlap() {
        roundtrip("aaaa", "aaaaaa");
        roundtrip("abab", "ab");
        roundtrip("", "new");
        roundtrip("old", "");
    }

    #[test]
    fn test_multibyte_boundaries() {
        // é and è share their first UTF-8 byte
        let s = roundtrip("café noir", "cafè noir");
        assert!("café noir".is_char_boundary(s.start));
        roundtrip("Prüfung ✓", "Prüfung ✗");
        roundtrip("日本語のテキスト", "日本語テキスト");
    }

    #[test]
    fn test_apply_rejects_wrong_base() {
        let splice = Splice { start: 10, delete: 5, insert: "x".into() };
        assert!(splice.apply("short").is_err());

        let splice = Splice { start: 4, delete: 1, insert: "e".into() };
        assert!(splice.apply("café").is_err());
    }

    #[test]
    fn test_worthwhile_splice_ratio() {
        let old = "line of context\n".repeat(40);
        let new = format!("{old}one more line\n");
        assert!(worthwhile_splice(old.as_bytes(), new.as_bytes(), 0.5).is_some());

        assert!(worthwhile_splice(b"abc", b"xyz", 0.5).is_none());
        assert!(worthwhile_splice(&[0xff, 0xfe], b"text", 0.5).is_none());
    }
}
