//! Regular expressions
//!
//! Backed by the `regex` crate. JS flags are translated to inline regex
//! options at compile time; `lastIndex` for sticky/global matching lives
//! on the regexp object.

use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{VmError, VmResult};

/// A compiled regular expression
pub struct JsRegExp {
    source: String,
    flags: String,
    regex: Regex,
    global: bool,
    last_index: AtomicU64,
}

impl JsRegExp {
    /// Compile a pattern with JS flags (`g`, `i`, `m`, `s` supported)
    pub fn new(source: &str, flags: &str) -> VmResult<Self> {
        let mut inline = String::new();
        let mut global = false;
        for flag in flags.chars() {
            match flag {
                'g' => global = true,
                'i' => inline.push('i'),
                'm' => inline.push('m'),
                's' => inline.push('s'),
                'u' | 'y' => {} // accepted, no translation needed
                other => {
                    return Err(VmError::syntax_error(format!(
                        "invalid regular expression flag '{other}'"
                    )));
                }
            }
        }

        let pattern = if inline.is_empty() {
            source.to_string()
        } else {
            format!("(?{inline}){source}")
        };

        let regex = Regex::new(&pattern).map_err(|e| {
            VmError::syntax_error(format!("invalid regular expression /{source}/{flags}: {e}"))
        })?;

        Ok(Self {
            source: source.to_string(),
            flags: flags.to_string(),
            regex,
            global,
            last_index: AtomicU64::new(0),
        })
    }

    /// The pattern source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The original flags string
    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// Whether the `g` flag is set
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Current `lastIndex`
    pub fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Relaxed)
    }

    /// Set `lastIndex`
    pub fn set_last_index(&self, index: u64) {
        self.last_index.store(index, Ordering::Relaxed);
    }

    /// `test()`: advances `lastIndex` under the `g` flag
    pub fn test(&self, haystack: &str) -> bool {
        self.exec(haystack).is_some()
    }

    /// `exec()`: returns `(match_start, match_text, captures)` in byte
    /// offsets; advances `lastIndex` under the `g` flag.
    pub fn exec(&self, haystack: &str) -> Option<(usize, String, Vec<Option<String>>)> {
        let start = if self.global {
            self.last_index.load(Ordering::Relaxed) as usize
        } else {
            0
        };
        if start > haystack.len() {
            self.last_index.store(0, Ordering::Relaxed);
            return None;
        }

        match self.regex.captures_at(haystack, start) {
            Some(caps) => {
                let full = caps.get(0).expect("capture 0 always present");
                if self.global {
                    self.last_index.store(full.end() as u64, Ordering::Relaxed);
                }
                let groups = (1..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                    .collect();
                Some((full.start(), full.as_str().to_string(), groups))
            }
            None => {
                if self.global {
                    self.last_index.store(0, Ordering::Relaxed);
                }
                None
            }
        }
    }
}

impl std::fmt::Display for JsRegExp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_match() {
        let re = JsRegExp::new("a(b+)c", "").unwrap();
        let (start, text, groups) = re.exec("xxabbbc").unwrap();
        assert_eq!(start, 2);
        assert_eq!(text, "abbbc");
        assert_eq!(groups, vec![Some("bbb".to_string())]);
    }

    #[test]
    fn test_case_insensitive_flag() {
        let re = JsRegExp::new("hello", "i").unwrap();
        assert!(re.test("say HELLO"));
    }

    #[test]
    fn test_global_advances_last_index() {
        let re = JsRegExp::new("o", "g").unwrap();
        assert!(re.test("foo"));
        assert_eq!(re.last_index(), 2);
        assert!(re.test("foo"));
        assert_eq!(re.last_index(), 3);
        // Exhausted: resets
        assert!(!re.test("foo"));
        assert_eq!(re.last_index(), 0);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(JsRegExp::new("(", "").is_err());
        assert!(JsRegExp::new("a", "q").is_err());
    }
}
