//! Property validation results.

use std::fmt;

/// How validation reports problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Stop at the first problem
    #[default]
    FailFast,
    /// Collect every problem
    Batch,
}

/// A single failed property check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Property that failed
    pub property: String,
    /// Why it failed
    pub reason: String,
}

/// Accumulated validation outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationState {
    mode: ValidationMode,
    issues: Vec<ValidationIssue>,
}

impl ValidationState {
    /// Creates an empty state for the given mode
    #[must_use]
    pub const fn new(mode: ValidationMode) -> Self {
        Self {
            mode,
            issues: Vec::new(),
        }
    }

    /// Checks that a required string property is non-empty
    ///
    /// In fail-fast mode nothing is recorded once an issue exists.
    pub fn require(&mut self, property: &str, value: &str) {
        if self.mode == ValidationMode::FailFast && !self.issues.is_empty() {
            return;
        }
        if value.trim().is_empty() {
            self.issues.push(ValidationIssue {
                property: property.to_string(),
                reason: format!("{property} cannot be empty"),
            });
        }
    }

    /// Returns the reporting mode
    #[must_use]
    pub const fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Returns true if no issue was recorded
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns the recorded issues
    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .issues
            .iter()
            .map(|issue| format!("{}: {}", issue.property, issue.reason))
            .collect();
        f.write_str(&messages.join("; "))
    }
}
