//! Exclusion patterns for artifact recording
//!
//! Patterns use shell-style wildcards and are matched against the whole
//! normalized artifact path, not against individual path segments:
//! `*` also crosses `/`, so `*foo*` excludes `subdir/foosub1`.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde_json::Value;

use crate::error::{RecordError, RecordResult};

/// Compiled set of exclusion patterns
#[derive(Debug, Clone)]
pub struct PatternFilter {
    patterns: Vec<String>,
    glob_set: GlobSet,
}

impl Default for PatternFilter {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            glob_set: GlobSet::empty(),
        }
    }
}

impl PatternFilter {
    /// Compile exclusion patterns
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> RecordResult<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(&translate_wildcards(pattern))
                .literal_separator(false)
                .backslash_escape(false)
                .build()
                .map_err(|e| {
                    RecordError::validation(format!("invalid exclude pattern {:?}: {}", pattern, e))
                })?;
            builder.add(glob);
            kept.push(pattern.to_string());
        }

        let glob_set = builder
            .build()
            .map_err(|e| RecordError::validation(format!("invalid exclude patterns: {}", e)))?;

        Ok(Self {
            patterns: kept,
            glob_set,
        })
    }

    /// Compile patterns from an untyped settings value.
    ///
    /// Anything other than an array of strings (or null) is rejected.
    pub fn from_value(value: &Value) -> RecordResult<Self> {
        Self::new(&patterns_from_value(value)?)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `name` matches at least one pattern
    pub fn is_excluded(&self, name: &str) -> bool {
        !self.is_empty() && self.glob_set.is_match(name)
    }

    /// Names that match none of the patterns, in input order
    pub fn apply<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) -> Vec<S> {
        names
            .into_iter()
            .filter(|name| !self.is_excluded(name.as_ref()))
            .collect()
    }
}

/// Filter `names` by `patterns` in one call
pub fn apply_exclude_patterns<S, P>(names: impl IntoIterator<Item = S>, patterns: &[P]) -> RecordResult<Vec<S>>
where
    S: AsRef<str>,
    P: AsRef<str>,
{
    Ok(PatternFilter::new(patterns)?.apply(names))
}

/// Read a list of patterns out of a settings value
pub fn patterns_from_value(value: &Value) -> RecordResult<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    RecordError::validation(format!(
                        "exclude patterns must be strings, found {}",
                        item
                    ))
                })
            })
            .collect(),
        other => Err(RecordError::validation(format!(
            "exclude patterns must be a list of strings, found {}",
            other
        ))),
    }
}

/// Rewrite a shell wildcard into an equivalent globset pattern.
///
/// globset gives `{a,b}` and `**` meanings that shell wildcards lack, and
/// rejects an unterminated `[`, which shell wildcards treat as a literal.
fn translate_wildcards(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                while i + 1 < chars.len() && chars[i + 1] == '*' {
                    i += 1;
                }
                out.push('*');
            }
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.extend(&chars[i..=end]);
                    i = end;
                }
                None => out.push_str("[[]"),
            },
            '{' => out.push_str("[{]"),
            '}' => out.push_str("[}]"),
            c => out.push(c),
        }
        i += 1;
    }

    out
}

/// Index of the `]` closing the class opened at `start`
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if j < chars.len() && chars[j] == '!' {
        j += 1;
    }
    // A leading `]` is a member, not the terminator
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    while j < chars.len() && chars[j] != ']' {
        j += 1;
    }
    (j < chars.len()).then_some(j)
}
