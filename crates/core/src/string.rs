//! Immutable reference-counted string.
//!
//! User-visible positions are 1-based grapheme-cluster indices, so that
//! `s[1]` is the first character a human sees regardless of how many code
//! points compose it. Negative positions count from the end. Byte offsets
//! never escape this module.

use std::hash::{Hash, Hasher};
use std::rc::Rc;

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{index_error, Result};

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Str(Rc<str>);

impl Str {
    pub fn new() -> Self {
        Str(Rc::from(""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn byte_len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shared-buffer identity, used by the intern table.
    pub fn ptr_eq(&self, other: &Str) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn grapheme_count(&self) -> i64 {
        self.0.graphemes(true).count() as i64
    }

    /// Translate a possibly negative 1-based position into a 0-based
    /// grapheme offset.
    fn norm_pos(&self, pos: i64) -> Result<usize> {
        let count = self.grapheme_count();
        let actual = if pos < 0 { count + pos + 1 } else { pos };
        if actual < 1 || actual > count {
            return Err(index_error(format!(
                "String index {} out of range (length {})",
                pos, count
            )));
        }
        Ok((actual - 1) as usize)
    }

    /// The grapheme at a 1-based position.
    pub fn next_grapheme(&self, pos: i64) -> Result<Str> {
        let offset = self.norm_pos(pos)?;
        let g = self
            .0
            .graphemes(true)
            .nth(offset)
            .ok_or_else(|| index_error("String index out of range"))?;
        Ok(Str::from(g))
    }

    pub fn left(&self, count: i64) -> Str {
        let n = count.max(0) as usize;
        Str::from(self.0.graphemes(true).take(n).collect::<String>())
    }

    pub fn right(&self, count: i64) -> Str {
        let total = self.grapheme_count().max(0) as usize;
        let n = (count.max(0) as usize).min(total);
        Str::from(self.0.graphemes(true).skip(total - n).collect::<String>())
    }

    /// Substring starting at 1-based position `from`, spanning `count`
    /// graphemes (or to the end when `count` is None).
    pub fn mid(&self, from: i64, count: Option<i64>) -> Result<Str> {
        if self.is_empty() && from == 1 {
            return Ok(Str::new());
        }
        let start = self.norm_pos(from)?;
        let iter = self.0.graphemes(true).skip(start);
        let s: String = match count {
            Some(n) => iter.take(n.max(0) as usize).collect(),
            None => iter.collect(),
        };
        Ok(Str::from(s))
    }

    pub fn contains(&self, needle: &Str) -> bool {
        self.0.contains(needle.as_str())
    }

    pub fn starts_with(&self, prefix: &Str) -> bool {
        self.0.starts_with(prefix.as_str())
    }

    pub fn ends_with(&self, suffix: &Str) -> bool {
        self.0.ends_with(suffix.as_str())
    }

    fn byte_to_grapheme(&self, byte: usize) -> i64 {
        self.0[..byte].graphemes(true).count() as i64 + 1
    }

    /// 1-based grapheme position of the first occurrence at or after the
    /// 1-based position `from`; 0 when absent.
    pub fn find(&self, needle: &Str, from: i64) -> Result<i64> {
        if self.is_empty() {
            return Ok(0);
        }
        let start = if from == 1 { 0 } else { self.norm_pos(from)? };
        let byte_start: usize = self
            .0
            .grapheme_indices(true)
            .nth(start)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        match self.0[byte_start..].find(needle.as_str()) {
            Some(i) => Ok(self.byte_to_grapheme(byte_start + i)),
            None => Ok(0),
        }
    }

    /// 1-based grapheme position of the last occurrence at or before the
    /// 1-based position `from` (-1 = end); 0 when absent.
    pub fn rfind(&self, needle: &Str, from: i64) -> Result<i64> {
        if self.is_empty() {
            return Ok(0);
        }
        let end = if from == -1 {
            self.0.len()
        } else {
            let pos = self.norm_pos(from)?;
            self.0
                .grapheme_indices(true)
                .nth(pos + 1)
                .map(|(i, _)| i)
                .unwrap_or(self.0.len())
        };
        match self.0[..end].rfind(needle.as_str()) {
            Some(i) => Ok(self.byte_to_grapheme(i)),
            None => Ok(0),
        }
    }

    pub fn count(&self, needle: &Str) -> i64 {
        if needle.is_empty() {
            return 0;
        }
        self.0.matches(needle.as_str()).count() as i64
    }

    pub fn split(&self, separator: &Str) -> Vec<Str> {
        if separator.is_empty() {
            return self.0.graphemes(true).map(Str::from).collect();
        }
        self.0.split(separator.as_str()).map(Str::from).collect()
    }

    pub fn to_upper(&self) -> Str {
        Str::from(self.0.to_uppercase())
    }

    pub fn to_lower(&self) -> Str {
        Str::from(self.0.to_lowercase())
    }

    pub fn reversed(&self) -> Str {
        Str::from(self.0.graphemes(true).rev().collect::<String>())
    }

    pub fn trimmed(&self) -> Str {
        Str::from(self.0.trim())
    }

    pub fn concat(&self, other: &Str) -> Str {
        let mut s = String::with_capacity(self.byte_len() + other.byte_len());
        s.push_str(&self.0);
        s.push_str(&other.0);
        Str::from(s)
    }

    pub fn hash_value(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.0.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for Str {
    fn default() -> Self {
        Str::new()
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Str(Rc::from(s))
    }
}

impl From<String> for Str {
    fn from(s: String) -> Self {
        Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Str {
    fn from(s: Rc<str>) -> Self {
        Str(s)
    }
}

impl Hash for Str {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl std::fmt::Display for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grapheme_count() {
        assert_eq!(Str::from("héllo").grapheme_count(), 5);
        assert_eq!(Str::from("").grapheme_count(), 0);
        // A flag emoji is two code points but one grapheme.
        assert_eq!(Str::from("a\u{1F1EB}\u{1F1F7}b").grapheme_count(), 3);
    }

    #[test]
    fn test_next_grapheme() {
        let s = Str::from("héllo");
        assert_eq!(s.next_grapheme(1).unwrap().as_str(), "h");
        assert_eq!(s.next_grapheme(2).unwrap().as_str(), "é");
        assert_eq!(s.next_grapheme(-1).unwrap().as_str(), "o");
        assert!(s.next_grapheme(6).is_err());
        assert!(s.next_grapheme(0).is_err());
    }

    #[test]
    fn test_left_right_mid() {
        let s = Str::from("abcdef");
        assert_eq!(s.left(3).as_str(), "abc");
        assert_eq!(s.right(2).as_str(), "ef");
        assert_eq!(s.mid(2, Some(3)).unwrap().as_str(), "bcd");
        assert_eq!(s.mid(4, None).unwrap().as_str(), "def");
        assert_eq!(s.right(99).as_str(), "abcdef");
    }

    #[test]
    fn test_find_rfind() {
        let s = Str::from("abcabc");
        assert_eq!(s.find(&Str::from("bc"), 1).unwrap(), 2);
        assert_eq!(s.find(&Str::from("bc"), 3).unwrap(), 5);
        assert_eq!(s.find(&Str::from("zz"), 1).unwrap(), 0);
        assert_eq!(s.rfind(&Str::from("bc"), -1).unwrap(), 5);
        assert_eq!(s.rfind(&Str::from("bc"), 4).unwrap(), 2);
    }

    #[test]
    fn test_split_count() {
        let s = Str::from("a,b,,c");
        let parts = s.split(&Str::from(","));
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2].as_str(), "");
        assert_eq!(s.count(&Str::from(",")), 3);
    }

    #[test]
    fn test_reverse() {
        assert_eq!(Str::from("héllo").reversed().as_str(), "olléh");
    }
}
