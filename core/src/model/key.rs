//! Compound keys for addressed entities
//!
//! Most identifiers in the ledger are one or two parts (a site plus a
//! nickname, a table name); a few operations need deeper composite keys.
//! `CompoundKey` keeps two fixed slots inline and spills the rest into an
//! overflow list, so the common case pays no extra allocation.

use serde::{Serialize, Deserialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::{ChainError, Result};

/// An ordered, size-flexible identifier.
///
/// Equality and hashing are structural over all present components.
/// Trailing absent components are trimmed at construction; an absent
/// component before a present one is a construction error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompoundKey {
    first: String,
    second: Option<String>,
    rest: Vec<String>,
}

impl CompoundKey {
    /// Create a single-component key
    pub fn single(first: impl Into<String>) -> Self {
        CompoundKey {
            first: first.into(),
            second: None,
            rest: Vec::new(),
        }
    }

    /// Create a two-component key
    pub fn pair(first: impl Into<String>, second: impl Into<String>) -> Self {
        CompoundKey {
            first: first.into(),
            second: Some(second.into()),
            rest: Vec::new(),
        }
    }

    /// Build a key from a list of optional components.
    ///
    /// Trailing `None` (or empty) components are trimmed. A `None` or empty
    /// component appearing before a present one is a construction error, as
    /// is a list with no present components at all.
    pub fn from_components(components: &[Option<String>]) -> Result<Self> {
        // Trim trailing absent components
        let mut end = components.len();
        while end > 0 && is_absent(&components[end - 1]) {
            end -= 1;
        }

        if end == 0 {
            return Err(ChainError::Validation(
                "Compound key has no components".to_string(),
            ));
        }

        // A gap before a present component is malformed
        let mut present = Vec::with_capacity(end);
        for (i, component) in components[..end].iter().enumerate() {
            match component {
                Some(value) if !value.is_empty() => present.push(value.clone()),
                _ => {
                    return Err(ChainError::Validation(format!(
                        "Compound key component {} is absent before a present component",
                        i
                    )));
                }
            }
        }

        let mut iter = present.into_iter();
        let first = iter.next().expect("at least one component present");
        let second = iter.next();
        let rest: Vec<String> = iter.collect();

        Ok(CompoundKey {
            first,
            second,
            rest,
        })
    }

    /// Build a key from a list of plain strings (all present)
    pub fn from_strings(components: &[String]) -> Result<Self> {
        let optional: Vec<Option<String>> =
            components.iter().map(|c| Some(c.clone())).collect();
        Self::from_components(&optional)
    }

    /// Number of components
    pub fn len(&self) -> usize {
        1 + usize::from(self.second.is_some()) + self.rest.len()
    }

    /// Always at least one component
    pub fn is_empty(&self) -> bool {
        false
    }

    /// All components in order
    pub fn components(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self.first.as_str());
        if let Some(second) = &self.second {
            out.push(second.as_str());
        }
        out.extend(self.rest.iter().map(String::as_str));
        out
    }

    /// First component
    pub fn first(&self) -> &str {
        &self.first
    }

    /// Second component, if present
    pub fn second(&self) -> Option<&str> {
        self.second.as_deref()
    }
}

fn is_absent(component: &Option<String>) -> bool {
    match component {
        None => true,
        Some(value) => value.is_empty(),
    }
}

impl Display for CompoundKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.components().join(":"))
    }
}
