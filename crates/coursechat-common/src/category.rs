use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Closed set of topics used both for intent detection and for document
/// retrieval. Anything outside this set is rejected, never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextCategory {
    Curriculum,
    Programs,
    Projects,
    Pricing,
    Schedule,
    Requirements,
    Support,
    Enrollment,
    Outcomes,
    Faq,
}

impl ContextCategory {
    pub const ALL: [ContextCategory; 10] = [
        ContextCategory::Curriculum,
        ContextCategory::Programs,
        ContextCategory::Projects,
        ContextCategory::Pricing,
        ContextCategory::Schedule,
        ContextCategory::Requirements,
        ContextCategory::Support,
        ContextCategory::Enrollment,
        ContextCategory::Outcomes,
        ContextCategory::Faq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextCategory::Curriculum => "curriculum",
            ContextCategory::Programs => "programs",
            ContextCategory::Projects => "projects",
            ContextCategory::Pricing => "pricing",
            ContextCategory::Schedule => "schedule",
            ContextCategory::Requirements => "requirements",
            ContextCategory::Support => "support",
            ContextCategory::Enrollment => "enrollment",
            ContextCategory::Outcomes => "outcomes",
            ContextCategory::Faq => "faq",
        }
    }

    /// Human-readable title, e.g. `Pricing`. Used when a document has no
    /// metadata of its own.
    pub fn title(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Names of every category, in declaration order.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.as_str()).collect()
    }
}

impl fmt::Display for ContextCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "unknown context category '{s}'; expected one of: {}",
                    Self::names().join(", ")
                ))
            })
    }
}
