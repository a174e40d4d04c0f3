//! Build result codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code of a completed build or buildset.
///
/// The well-known codes are exposed as associated constants, but any integer
/// reported by the build subsystem is carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(i32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const WARNINGS: ResultCode = ResultCode(1);
    pub const FAILURE: ResultCode = ResultCode(2);
    pub const SKIPPED: ResultCode = ResultCode(3);
    pub const EXCEPTION: ResultCode = ResultCode(4);
    pub const RETRY: ResultCode = ResultCode(5);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(&self) -> i32 {
        self.0
    }

    /// Success-class results are the only ones that trigger downstream work.
    pub fn is_success_class(&self) -> bool {
        matches!(*self, ResultCode::SUCCESS | ResultCode::WARNINGS)
    }

    pub fn name(&self) -> Option<&'static str> {
        match self.0 {
            0 => Some("success"),
            1 => Some("warnings"),
            2 => Some("failure"),
            3 => Some("skipped"),
            4 => Some("exception"),
            5 => Some("retry"),
            _ => None,
        }
    }
}

impl From<i32> for ResultCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "result({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_class() {
        assert!(ResultCode::SUCCESS.is_success_class());
        assert!(ResultCode::WARNINGS.is_success_class());
        assert!(!ResultCode::FAILURE.is_success_class());
        assert!(!ResultCode::EXCEPTION.is_success_class());
        assert!(!ResultCode::new(13).is_success_class());
    }

    #[test]
    fn test_display() {
        assert_eq!(ResultCode::WARNINGS.to_string(), "warnings");
        assert_eq!(ResultCode::new(13).to_string(), "result(13)");
    }
}
