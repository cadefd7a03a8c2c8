//! Regex: a compiled regular expression with the state of its last match.
//!
//! Capture groups are 1-based; group 0 is the whole match. Positions
//! reported to scripts are 1-based character offsets into the subject.

use std::cell::RefCell;

use crate::class::VmDisplay;
use crate::error::{index_error, syntax_error, Result};
use crate::string::Str;

struct MatchState {
    subject: String,
    /// Byte span of each group of the last match; index 0 is the whole
    /// match. None for groups that did not participate.
    groups: Vec<Option<(usize, usize)>>,
}

pub struct Regex {
    pattern: String,
    re: regex::Regex,
    state: RefCell<Option<MatchState>>,
}

impl Regex {
    pub fn new(pattern: &str) -> Result<Regex> {
        let re = regex::Regex::new(pattern).map_err(|e| {
            syntax_error(format!("Cannot compile regular expression: {}", e))
        })?;
        Ok(Regex {
            pattern: pattern.to_string(),
            re,
            state: RefCell::new(None),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match against `subject` starting at the 1-based character position
    /// `from`. Returns true and records the capture state on success.
    pub fn match_from(&self, subject: &str, from: i64) -> Result<bool> {
        let byte_start = if from <= 1 {
            0
        } else {
            subject
                .char_indices()
                .nth((from - 1) as usize)
                .map(|(i, _)| i)
                .unwrap_or(subject.len())
        };
        match self.re.captures_at(subject, byte_start) {
            Some(caps) => {
                let groups = (0..caps.len())
                    .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
                    .collect();
                *self.state.borrow_mut() = Some(MatchState {
                    subject: subject.to_string(),
                    groups,
                });
                Ok(true)
            }
            None => {
                *self.state.borrow_mut() = None;
                Ok(false)
            }
        }
    }

    pub fn has_match(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Number of capture groups in the last match (excluding group 0).
    pub fn count(&self) -> i64 {
        match &*self.state.borrow() {
            Some(state) => state.groups.len() as i64 - 1,
            None => 0,
        }
    }

    fn with_group<T>(&self, nth: i64, f: impl FnOnce(&MatchState, usize, usize) -> T) -> Result<T> {
        let state = self.state.borrow();
        let state = state
            .as_ref()
            .ok_or_else(|| index_error("Regex has no match"))?;
        if nth < 0 || nth as usize >= state.groups.len() {
            return Err(index_error(format!(
                "Invalid capture group {} (regex has {} groups)",
                nth,
                state.groups.len() - 1
            )));
        }
        match state.groups[nth as usize] {
            Some((start, end)) => Ok(f(state, start, end)),
            None => Err(index_error(format!(
                "Capture group {} did not participate in the match",
                nth
            ))),
        }
    }

    pub fn capture(&self, nth: i64) -> Result<Str> {
        self.with_group(nth, |state, start, end| Str::from(&state.subject[start..end]))
    }

    /// 1-based character position of the start of a group.
    pub fn capture_start(&self, nth: i64) -> Result<i64> {
        self.with_group(nth, |state, start, _| {
            state.subject[..start].chars().count() as i64 + 1
        })
    }

    /// 1-based character position one past the end of a group.
    pub fn capture_end(&self, nth: i64) -> Result<i64> {
        self.with_group(nth, |state, _, end| {
            state.subject[..end].chars().count() as i64 + 1
        })
    }
}

impl VmDisplay for Regex {
    fn display(&self, quote: bool, _seen: bool) -> Result<String> {
        let s = format!("<regex {}>", self.pattern);
        Ok(if quote { format!("\"{}\"", s) } else { s })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_and_captures() {
        let re = Regex::new(r"(\d+)-(\d+)").unwrap();
        assert!(re.match_from("x 12-34 y", 1).unwrap());
        assert!(re.has_match());
        assert_eq!(re.count(), 2);
        assert_eq!(re.capture(0).unwrap().as_str(), "12-34");
        assert_eq!(re.capture(1).unwrap().as_str(), "12");
        assert_eq!(re.capture(2).unwrap().as_str(), "34");
        assert_eq!(re.capture_start(0).unwrap(), 3);
        assert_eq!(re.capture_end(0).unwrap(), 8);
    }

    #[test]
    fn test_no_match() {
        let re = Regex::new("z+").unwrap();
        assert!(!re.match_from("abc", 1).unwrap());
        assert!(!re.has_match());
        assert!(re.capture(0).is_err());
    }

    #[test]
    fn test_match_from_position() {
        let re = Regex::new("a").unwrap();
        assert!(re.match_from("abca", 2).unwrap());
        assert_eq!(re.capture_start(0).unwrap(), 4);
    }

    #[test]
    fn test_bad_pattern() {
        assert!(Regex::new("(").is_err());
    }
}
