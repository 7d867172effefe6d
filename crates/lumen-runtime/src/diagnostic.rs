//! Compile-time diagnostics
//!
//! The compiler accumulates diagnostics instead of failing fast: parsing
//! continues after an error (panic mode suppresses the cascade until a
//! synchronization point), and the caller receives everything at once.

use serde::Serialize;
use std::fmt;

/// Where a diagnostic points within the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAt {
    /// At a concrete token
    Token(String),
    /// At end of input
    End,
    /// No usable location (lexical errors report the message alone)
    Nowhere,
}

/// A compile error with its source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Source line (1-based)
    pub line: u32,
    /// Location detail
    pub at: ErrorAt,
    /// Human-readable message
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: u32, at: ErrorAt, message: impl Into<String>) -> Self {
        Self {
            line,
            at,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.at {
            ErrorAt::Token(lexeme) => {
                write!(
                    f,
                    "[line {}] Error at '{}': {}",
                    self.line, lexeme, self.message
                )
            }
            ErrorAt::End => write!(f, "[line {}] Error at end: {}", self.line, self.message),
            ErrorAt::Nowhere => write!(f, "[line {}] Error: {}", self.line, self.message),
        }
    }
}
