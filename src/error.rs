//! Error types and the stable status codes surfaced to callers.
//!
//! The engine distinguishes errors that abort the current operation only
//! (a malformed record, a full page, an ill-formed query) from errors that
//! abort the engine (mmap failure, manifest corruption). The former are
//! typed enums so callers can match on them; the latter travel as
//! `eyre::Report` with context attached at the failure site.

use thiserror::Error;

/// Stable numeric codes mirrored across the write, search and cursor paths.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success = 0,
    /// The page has no room for the record plus its index slot.
    Overflow = 1,
    /// A record failed structural validation.
    BadData = 2,
    /// The search query is ill-formed.
    BadArg = 3,
    /// An underlying OS error was propagated.
    Io = 4,
}

/// Failure of a single append. Does not mutate the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("not enough free space in page")]
    Overflow,
    #[error("malformed record")]
    BadData,
}

impl WriteError {
    pub fn status(self) -> StatusCode {
        match self {
            WriteError::Overflow => StatusCode::Overflow,
            WriteError::BadData => StatusCode::BadData,
        }
    }
}

/// Failure of query validation. Reported through the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("invalid search query")]
    BadArg,
}

impl SearchError {
    pub fn status(self) -> StatusCode {
        match self {
            SearchError::BadArg => StatusCode::BadArg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(StatusCode::Success as i32, 0);
        assert_eq!(StatusCode::Overflow as i32, 1);
        assert_eq!(StatusCode::BadData as i32, 2);
        assert_eq!(StatusCode::BadArg as i32, 3);
        assert_eq!(StatusCode::Io as i32, 4);
    }

    #[test]
    fn write_error_maps_to_status() {
        assert_eq!(WriteError::Overflow.status(), StatusCode::Overflow);
        assert_eq!(WriteError::BadData.status(), StatusCode::BadData);
        assert_eq!(SearchError::BadArg.status(), StatusCode::BadArg);
    }
}
