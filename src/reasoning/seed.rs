//! Default knowledge base loaded into a fresh session.

use serde::{Deserialize, Serialize};

use super::program::{head_indicator, PredicateIndicator};

/// Family facts every new session starts with.
pub const DEFAULT_FACTS: &[&str] = &[
    "parent(john, bob)",
    "parent(john, alice)",
    "parent(mary, bob)",
    "parent(mary, alice)",
    "parent(bob, charlie)",
    "parent(alice, david)",
];

/// Relations derived from `parent/2`.
pub const DEFAULT_RULES: &[&str] = &[
    "grandparent(X, Z) :- parent(X, Y), parent(Y, Z)",
    "sibling(X, Y) :- parent(Z, X), parent(Z, Y), X \\= Y",
];

/// Ordered facts and rules used to seed a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub rules: Vec<String>,
}

impl KnowledgeBase {
    pub fn len(&self) -> usize {
        self.facts.len() + self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Facts first, then rules, each in declaration order.
    pub fn clauses(&self) -> impl Iterator<Item = &str> {
        self.facts.iter().chain(self.rules.iter()).map(String::as_str)
    }

    /// Distinct predicates defined by the clause heads, in first-seen order.
    pub fn predicates(&self) -> Vec<PredicateIndicator> {
        let mut seen = Vec::new();
        for indicator in self.clauses().filter_map(head_indicator) {
            if !seen.contains(&indicator) {
                seen.push(indicator);
            }
        }
        seen
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self {
            facts: DEFAULT_FACTS.iter().map(|s| s.to_string()).collect(),
            rules: DEFAULT_RULES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
