//! gitignore-style path exclusion.

use glob::{MatchOptions, Pattern};
use lazy_core::{Error, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: !cfg!(windows),
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Matches relative paths against a set of shell globs.
///
/// A path is ignored when any contiguous run of its segments matches any
/// pattern. The path is treated as rooted, so `venv` matches `venv`,
/// `a/venv` and `a/venv/b`, while `/venv` only matches at the top level.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Pattern::new(&shell_pattern(p.as_ref())).map_err(|e| {
                    Error::Configuration(format!("invalid ignore pattern {:?}: {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn should_ignore(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let rooted = format!("/{}", path);
        let segments: Vec<&str> = rooted.split('/').collect();

        // Every (i, j) pair over the segments, plus the empty run.
        let mut candidates = vec![String::new()];
        for i in 0..segments.len() {
            for j in i..segments.len() {
                candidates.push(segments[i..=j].join("/"));
            }
        }

        candidates.iter().any(|candidate| {
            self.patterns
                .iter()
                .any(|pattern| pattern.matches_with(candidate, MATCH_OPTIONS))
        })
    }
}

/// Rewrite a shell glob into the stricter `glob` crate grammar.
///
/// Runs of `*` collapse to one (a single `*` already crosses `/` here), and
/// a `[` without a closing `]` is matched literally.
fn shell_pattern(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                out.push('*');
                while i + 1 < chars.len() && chars[i + 1] == '*' {
                    i += 1;
                }
            }
            '[' => {
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j < chars.len() {
                    out.extend(&chars[i..=j]);
                    i = j;
                } else {
                    out.push_str("[[]");
                }
            }
            c => out.push(c),
        }
        i += 1;
    }
    out
}
