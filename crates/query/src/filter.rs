//! Line predicates applied during retrieval.

/// Decides which scanned lines are returned to the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LineFilter {
    /// Every line matches.
    #[default]
    Passthrough,

    /// Lines containing the given substring match (case-sensitive).
    Contains(String),
}

impl LineFilter {
    /// Builds a filter from an optional include string. An empty string
    /// filters nothing.
    pub fn include(pattern: Option<impl Into<String>>) -> Self {
        match pattern.map(Into::into) {
            Some(pattern) if !pattern.is_empty() => Self::Contains(pattern),
            _ => Self::Passthrough,
        }
    }

    /// Whether `line` passes the filter.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Self::Passthrough => true,
            Self::Contains(pattern) => line.contains(pattern.as_str()),
        }
    }
}
