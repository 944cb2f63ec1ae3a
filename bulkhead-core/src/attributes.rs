//! Attribute Sets
//!
//! Labels with optional values attached to suites and tests. Sets are
//! inherited downward: a node's effective set is its own attributes united
//! with everything its ancestors declared, the more specific node winning.

use std::collections::BTreeMap;
use std::fmt;

/// Attribute marking a test (or every test in a suite) as skipped.
/// Its value, if any, is the reason.
pub const SKIP: &str = "skip";

/// Immutable-once-attached mapping from label to optional value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: BTreeMap<String, Option<String>>,
}

impl Attributes {
    /// An empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bare label
    pub fn flag(mut self, label: impl Into<String>) -> Self {
        self.entries.insert(label.into(), None);
        self
    }

    /// Add a label carrying a value
    pub fn value(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(label.into(), Some(value.into()));
        self
    }

    /// Look up a label. The outer `Option` is presence, the inner the value.
    pub fn get(&self, label: &str) -> Option<Option<&str>> {
        self.entries.get(label).map(|value| value.as_deref())
    }

    /// Whether the label is present
    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label)
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no labels
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate labels and values in label order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(label, value)| (label.as_str(), value.as_deref()))
    }

    /// Union with the inherited set; entries in `self` win on collision.
    pub fn unite(&self, inherited: &Attributes) -> Attributes {
        let mut entries = inherited.entries.clone();
        for (label, value) in &self.entries {
            entries.insert(label.clone(), value.clone());
        }
        Attributes { entries }
    }

    /// Whether the set marks its owner as skipped
    pub fn is_skipped(&self) -> bool {
        self.contains(SKIP)
    }

    /// The skip reason, if skipped with one
    pub fn skip_reason(&self) -> Option<&str> {
        self.get(SKIP).flatten()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for Attributes
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Attributes {
            entries: iter
                .into_iter()
                .map(|(label, value)| (label.into(), value.map(Into::into)))
                .collect(),
        }
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (label, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                Some(value) => write!(f, "{}({:?})", label, value)?,
                None => f.write_str(label)?,
            }
        }
        Ok(())
    }
}

/// Mark as skipped without a reason
pub fn skip() -> Attributes {
    Attributes::new().flag(SKIP)
}

/// Mark as skipped, recording why
pub fn skip_because(reason: impl Into<String>) -> Attributes {
    Attributes::new().value(SKIP, reason)
}
