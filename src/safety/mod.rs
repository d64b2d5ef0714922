//! Safety validator (C7).
//!
//! Purely mechanical, no LLM: a query passes iff it parses as a single
//! `SELECT`/`WITH ... SELECT` statement, contains no blocked keyword at
//! statement top level, names no system catalog, and carries no
//! multi-statement separator. See [`validate`].

mod parser;

pub use parser::validate;

use crate::error::{AppError, Result};

/// Result of a single validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail(String),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

/// Runs the validator and turns a failure into the pipeline's `Validation` error.
pub fn validate_or_err(sql: &str) -> Result<()> {
    match validate(sql) {
        Outcome::Pass => Ok(()),
        Outcome::Fail(reason) => Err(AppError::validation(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_or_err_passes_select() {
        assert!(validate_or_err("SELECT * FROM users").is_ok());
    }

    #[test]
    fn validate_or_err_rejects_delete() {
        let err = validate_or_err("DELETE FROM users").unwrap_err();
        assert_eq!(err.error_code(), "Validation");
    }
}
