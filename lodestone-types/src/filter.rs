//! Key and originator filtering for merges, dumps and subscriptions.

use crate::value::Value;
use regex::RegexSet;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid key prefix pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// How the prefix and originator criteria combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterOperator {
    #[default]
    Or,
    And,
}

/// Compiled filter over keys and value originators.
///
/// An empty prefix list matches every key; an empty originator set matches
/// every originator.
#[derive(Clone, Debug)]
pub struct KeyFilters {
    prefixes: Vec<String>,
    regex: Option<RegexSet>,
    originator_ids: BTreeSet<String>,
    operator: FilterOperator,
}

impl KeyFilters {
    pub fn new(
        prefixes: Vec<String>,
        originator_ids: impl IntoIterator<Item = String>,
        operator: FilterOperator,
    ) -> Result<Self, FilterError> {
        // Anchor each pattern so `prefix` means "matches from the start".
        let regex = if prefixes.is_empty() {
            None
        } else {
            let anchored: Vec<String> = prefixes.iter().map(|p| format!("^(?:{})", p)).collect();
            Some(RegexSet::new(&anchored)?)
        };
        Ok(Self {
            prefixes,
            regex,
            originator_ids: originator_ids.into_iter().collect(),
            operator,
        })
    }

    /// A filter that matches everything.
    pub fn match_all() -> Self {
        Self {
            prefixes: Vec::new(),
            regex: None,
            originator_ids: BTreeSet::new(),
            operator: FilterOperator::Or,
        }
    }

    pub fn key_prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn originator_ids(&self) -> &BTreeSet<String> {
        &self.originator_ids
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    fn key_matches(&self, key: &str) -> bool {
        match &self.regex {
            Some(set) => set.is_match(key),
            None => true,
        }
    }

    /// Match on the key alone, for records that no longer carry a value
    /// (expired-key notices).
    pub fn matches_key_only(&self, key: &str) -> bool {
        self.key_matches(key)
    }

    fn originator_matches(&self, value: &Value) -> bool {
        self.originator_ids.is_empty() || self.originator_ids.contains(&value.originator_id)
    }

    pub fn matches(&self, key: &str, value: &Value) -> bool {
        match self.operator {
            FilterOperator::Or => {
                // With OR, an empty criterion must not short-circuit to
                // "match all" when the other criterion is restrictive.
                match (self.regex.is_some(), !self.originator_ids.is_empty()) {
                    (false, false) => true,
                    (true, false) => self.key_matches(key),
                    (false, true) => self.originator_matches(value),
                    (true, true) => self.key_matches(key) || self.originator_matches(value),
                }
            }
            FilterOperator::And => self.key_matches(key) && self.originator_matches(value),
        }
    }
}
