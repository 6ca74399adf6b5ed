//! Line filtering and highlighting.

use std::borrow::Cow;

use anyhow::{Context, Result};
use regex::Regex;

/// Inverse video on, then off again without touching other attributes.
const HIGHLIGHT_ON: &str = "\u{1b}[7m";
const HIGHLIGHT_OFF: &str = "\u{1b}[27m";

/// Compiled include, exclude and highlight patterns.
///
/// Built once at startup and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    highlight: Vec<Regex>,
}

impl FilterSet {
    /// Compiles the three pattern lists, naming the first invalid pattern.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S], highlight: &[S]) -> Result<Self> {
        Ok(Self {
            include: compile(include, "filter")?,
            exclude: compile(exclude, "negative filter")?,
            highlight: compile(highlight, "highlight")?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.highlight.is_empty()
    }

    /// Applies the filters to one line.
    ///
    /// Returns `None` when the line is dropped, otherwise the line to show,
    /// with highlighted matches wrapped in inverse video. Order is fixed:
    /// include, then highlight, then exclude against the highlighted text.
    pub fn apply<'a>(&self, line: &'a str) -> Option<Cow<'a, str>> {
        if !self.include.is_empty() && !self.include.iter().any(|r| r.is_match(line)) {
            return None;
        }

        let mut shown = Cow::Borrowed(line);
        for regex in &self.highlight {
            let replaced = match regex.replace_all(&shown, |caps: &regex::Captures| {
                format!("{}{}{}", HIGHLIGHT_ON, &caps[0], HIGHLIGHT_OFF)
            }) {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            if let Some(replaced) = replaced {
                shown = Cow::Owned(replaced);
            }
        }

        if self.exclude.iter().any(|r| r.is_match(&shown)) {
            return None;
        }
        Some(shown)
    }
}

fn compile<S: AsRef<str>>(patterns: &[S], label: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(pattern).with_context(|| format!("invalid {} pattern {:?}", label, pattern))
        })
        .collect()
}
