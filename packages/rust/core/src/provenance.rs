//! Citation-backed field values.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An extracted value together with the evidence that supports it.
///
/// Every field of every section is one of these. A fresh container has
/// every part absent; extraction fills it once and it is never mutated
/// afterwards (a new research run produces new containers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ResearchedField<T> {
    /// The extracted value, absent when the text does not answer the question.
    pub value: Option<T>,
    /// URL from the citation list that supports the value.
    pub source_url: Option<String>,
    /// Verbatim excerpt backing the value.
    pub source_quote: Option<String>,
    pub notes: Option<String>,
}

// Manual impl: the derive would require `T: Default`.
impl<T> Default for ResearchedField<T> {
    fn default() -> Self {
        Self {
            value: None,
            source_url: None,
            source_quote: None,
            notes: None,
        }
    }
}

impl<T> ResearchedField<T> {
    /// A container holding only a value.
    pub fn with_value(value: T) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Attach a supporting source URL.
    pub fn sourced(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// True when nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
            && self.source_url.is_none()
            && self.source_quote.is_none()
            && self.notes.is_none()
    }
}
