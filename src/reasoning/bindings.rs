//! Binding store: one solution of a query.

use serde::Serialize;
use std::collections::BTreeMap;

/// Snapshot of one evaluation step.
///
/// A solved store maps query variable names to their rendered terms (empty
/// for ground goals). An unsolved store is the end-of-enumeration sentinel
/// and never carries bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bindings {
    solved: bool,
    bindings: BTreeMap<String, String>,
}

impl Bindings {
    /// A successful step with the given variable bindings.
    pub fn solved<I, K, V>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            solved: true,
            bindings: bindings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// A successful step for a ground goal.
    pub fn ground() -> Self {
        Self {
            solved: true,
            bindings: BTreeMap::new(),
        }
    }

    /// The sentinel returned once enumeration has stopped.
    pub fn failed() -> Self {
        Self {
            solved: false,
            bindings: BTreeMap::new(),
        }
    }

    pub fn is_solved(&self) -> bool {
        self.solved
    }

    pub fn get(&self, variable: &str) -> Option<&str> {
        self.bindings.get(variable).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Bindings in variable-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
