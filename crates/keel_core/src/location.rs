//! Source locations of task and target declarations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a task or target was declared
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Declaring file
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    #[serde(default)]
    pub column: u32,
}

impl SourceLocation {
    /// Create a new location
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.file, self.line, self.column)
    }
}
