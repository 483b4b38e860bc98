//! A single include/exclude rule of a scope.

use regex::{Regex, RegexBuilder};

use super::condition::{ConditionMask, HttpMethod};
use crate::error::{Result, ThrottleError};

/// How a scope item matches request paths.
#[derive(Debug, Clone)]
pub enum ScopePattern {
    /// `*` or `*.*`: every path
    MatchAll,
    /// Case-insensitive prefix of the virtual path (no leading `/`), stored lowercased
    Prefix(String),
    /// Case-insensitive regular expression over the virtual path
    Regex(Regex),
}

impl ScopePattern {
    /// Build a literal pattern, stripping one leading `/` from anything but the wildcards.
    pub fn path(path: &str) -> Result<Self> {
        let path = path.trim();
        if path.is_empty() {
            return Err(ThrottleError::MissingPattern);
        }
        if path == "*" || path == "*.*" {
            return Ok(ScopePattern::MatchAll);
        }
        let path = path.strip_prefix('/').unwrap_or(path);
        Ok(ScopePattern::Prefix(path.to_lowercase()))
    }

    /// Compile a regular expression pattern.
    pub fn regex(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(ThrottleError::MissingPattern);
        }
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .map(ScopePattern::Regex)
            .map_err(|source| ThrottleError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// The pattern as matched: `/`-stripped and lowercased for prefixes.
    pub fn as_str(&self) -> &str {
        match self {
            ScopePattern::MatchAll => "*",
            ScopePattern::Prefix(prefix) => prefix,
            ScopePattern::Regex(regex) => regex.as_str(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            ScopePattern::MatchAll => true,
            ScopePattern::Regex(regex) => regex.is_match(path),
            ScopePattern::Prefix(prefix) if path.is_ascii() => path
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix)),
            ScopePattern::Prefix(prefix) => path.to_lowercase().starts_with(prefix.as_str()),
        }
    }
}

/// One rule of a [`Scope`](super::Scope): a path pattern, whether matching
/// requests are included or excluded, and the conditions gating the rule.
#[derive(Debug, Clone)]
pub struct ScopeItem {
    pattern: ScopePattern,
    include: bool,
    condition: ConditionMask,
}

impl ScopeItem {
    pub fn new(pattern: ScopePattern, include: bool, condition: ConditionMask) -> Self {
        Self {
            pattern,
            include,
            condition,
        }
    }

    pub fn include(pattern: ScopePattern) -> Self {
        Self::new(pattern, true, ConditionMask::NONE)
    }

    pub fn exclude(pattern: ScopePattern) -> Self {
        Self::new(pattern, false, ConditionMask::NONE)
    }

    /// Replace the condition, returning the item for chaining.
    pub fn with_condition(mut self, condition: ConditionMask) -> Self {
        self.condition = condition;
        self
    }

    pub fn pattern(&self) -> &ScopePattern {
        &self.pattern
    }

    pub fn is_include(&self) -> bool {
        self.include
    }

    pub fn condition(&self) -> ConditionMask {
        self.condition
    }

    pub fn set_condition(&mut self, condition: ConditionMask) {
        self.condition = condition;
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self.pattern, ScopePattern::MatchAll)
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.pattern, ScopePattern::Regex(_))
    }

    pub fn has_method_condition(&self) -> bool {
        self.condition.has_method_condition()
    }

    pub fn has_tracking_condition(&self) -> bool {
        self.condition.has_tracking_condition()
    }

    pub fn condition_met(&self, method: HttpMethod, has_tracking: bool) -> bool {
        self.condition.is_met(method, has_tracking)
    }

    pub fn matches_path(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }

    /// The item's verdict for a request, or `None` when it does not apply.
    pub fn evaluate(&self, path: &str, method: HttpMethod, has_tracking: bool) -> Option<bool> {
        (self.condition_met(method, has_tracking) && self.matches_path(path)).then_some(self.include)
    }
}
