use regex::Regex;
use tracing::debug;

use crate::error::ScanError;

/// Label reported when a file is disposable only because it has no content.
pub const EMPTY_FILE_LABEL: &str = "[Empty file]";

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    lowercase: String,
    regex: Option<Regex>,
}

/// Decides whether a file is trash that does not keep its directory alive.
///
/// Patterns are tried in order and the first match wins:
/// 1. zero-byte files when `ignore_zero_byte` is set,
/// 2. exact file name, case-insensitive,
/// 3. `/regex/` patterns,
/// 4. wildcard patterns where `*` matches any run of characters (case-sensitive).
#[derive(Debug, Clone)]
pub struct IgnorePatternMatcher {
    patterns: Vec<Pattern>,
    ignore_zero_byte: bool,
}

impl IgnorePatternMatcher {
    /// Compiles the pattern list. Empty patterns are dropped.
    pub fn new<S: AsRef<str>>(patterns: &[S], ignore_zero_byte: bool) -> Result<Self, ScanError> {
        let mut compiled = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let source = pattern.as_ref();
            if source.is_empty() {
                continue;
            }

            let regex = if let Some(inner) = delimited_regex(source) {
                Some(compile(source, inner)?)
            } else if source.contains('*') {
                let translated = format!("^{}$", regex::escape(source).replace(r"\*", ".*"));
                Some(compile(source, &translated)?)
            } else {
                None
            };

            compiled.push(Pattern {
                source: source.to_string(),
                lowercase: source.to_lowercase(),
                regex,
            });
        }

        debug!("compiled {} ignore patterns", compiled.len());

        Ok(Self {
            patterns: compiled,
            ignore_zero_byte,
        })
    }

    /// Returns the label of the rule that marks the file as disposable.
    pub fn matches(&self, file_name: &str, file_size: u64) -> Option<&str> {
        if self.ignore_zero_byte && file_size == 0 {
            return Some(EMPTY_FILE_LABEL);
        }

        let lowercase_name = file_name.to_lowercase();

        self.patterns
            .iter()
            .find(|pattern| {
                pattern.lowercase == lowercase_name
                    || pattern
                        .regex
                        .as_ref()
                        .is_some_and(|regex| regex.is_match(file_name))
            })
            .map(|pattern| pattern.source.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && !self.ignore_zero_byte
    }
}

/// One-shot form of [`IgnorePatternMatcher::matches`].
pub fn matches<S: AsRef<str>>(
    file_name: &str,
    file_size: u64,
    patterns: &[S],
    ignore_zero_byte: bool,
) -> Result<Option<String>, ScanError> {
    let matcher = IgnorePatternMatcher::new(patterns, ignore_zero_byte)?;
    Ok(matcher.matches(file_name, file_size).map(str::to_string))
}

fn delimited_regex(pattern: &str) -> Option<&str> {
    if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        Some(&pattern[1..pattern.len() - 1])
    } else {
        None
    }
}

fn compile(pattern: &str, regex: &str) -> Result<Regex, ScanError> {
    Regex::new(regex).map_err(|source| ScanError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
