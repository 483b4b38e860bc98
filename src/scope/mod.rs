//! Request scopes: which requests a controller instance applies to.
//!
//! A scope is an ordered list of include/exclude rules over the request's
//! virtual path (no leading `/`), optionally gated on the HTTP method and on
//! whether the client carries a tracking marker. Exclusions are always
//! evaluated before inclusions, so a narrow exclude wins over a broad include
//! regardless of the order in which the rules were added.

mod condition;
mod item;

pub use condition::{ConditionMask, HttpMethod};
pub use item::{ScopeItem, ScopePattern};

use crate::error::Result;

/// Ordered set of scope rules, excludes first.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    items: Vec<ScopeItem>,
}

impl Scope {
    /// Create an empty scope; an empty scope matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include requests whose path starts with `path`.
    pub fn include(&mut self, path: &str, condition: ConditionMask) -> Result<&mut Self> {
        let item = ScopeItem::include(ScopePattern::path(path)?).with_condition(condition);
        Ok(self.push(item))
    }

    /// Include requests whose path matches `pattern`.
    pub fn include_regex(&mut self, pattern: &str, condition: ConditionMask) -> Result<&mut Self> {
        let item = ScopeItem::include(ScopePattern::regex(pattern)?).with_condition(condition);
        Ok(self.push(item))
    }

    /// Exclude requests whose path starts with `path`.
    pub fn exclude(&mut self, path: &str, condition: ConditionMask) -> Result<&mut Self> {
        let item = ScopeItem::exclude(ScopePattern::path(path)?).with_condition(condition);
        Ok(self.push(item))
    }

    /// Exclude requests whose path matches `pattern`.
    pub fn exclude_regex(&mut self, pattern: &str, condition: ConditionMask) -> Result<&mut Self> {
        let item = ScopeItem::exclude(ScopePattern::regex(pattern)?).with_condition(condition);
        Ok(self.push(item))
    }

    /// Add a prebuilt item and restore the excludes-first order.
    pub fn push(&mut self, item: ScopeItem) -> &mut Self {
        self.items.push(item);
        self.optimize_order();
        self
    }

    /// Remove every item.
    pub fn clear(&mut self) -> &mut Self {
        self.items.clear();
        self
    }

    pub fn items(&self) -> &[ScopeItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a request falls inside this scope.
    ///
    /// The first item whose condition holds and whose pattern matches decides;
    /// a request no item matches is out of scope.
    pub fn in_scope(&self, path: &str, method: HttpMethod, has_tracking: bool) -> bool {
        self.items
            .iter()
            .find_map(|item| item.evaluate(path, method, has_tracking))
            .unwrap_or(false)
    }

    // stable: keeps insertion order within the exclude and include groups
    fn optimize_order(&mut self) {
        self.items.sort_by_key(ScopeItem::is_include);
    }
}

impl FromIterator<ScopeItem> for Scope {
    fn from_iter<I: IntoIterator<Item = ScopeItem>>(iter: I) -> Self {
        let mut scope = Scope {
            items: iter.into_iter().collect(),
        };
        scope.optimize_order();
        scope
    }
}
