//! Single-parameter range query descriptor.

use crate::error::SearchError;
use crate::types::{ParamId, Timestamp};

/// Scan direction of a range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A validated range query over one series: all samples of `param` with a
/// timestamp in `[lowerbound, upperbound]`, emitted in `direction` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchQuery {
    pub param: ParamId,
    pub lowerbound: Timestamp,
    pub upperbound: Timestamp,
    pub direction: Direction,
}

impl SearchQuery {
    pub fn new(
        param: ParamId,
        lowerbound: Timestamp,
        upperbound: Timestamp,
        direction: Direction,
    ) -> Result<Self, SearchError> {
        let query = Self {
            param,
            lowerbound,
            upperbound,
            direction,
        };
        query.validate()?;
        Ok(query)
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.upperbound < self.lowerbound {
            return Err(SearchError::BadArg);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_bounds() {
        let query = SearchQuery::new(1, Timestamp(10), Timestamp(20), Direction::Forward);
        assert!(query.is_ok());
    }

    #[test]
    fn accepts_point_query() {
        let query = SearchQuery::new(1, Timestamp(10), Timestamp(10), Direction::Backward);
        assert!(query.is_ok());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let query = SearchQuery::new(1, Timestamp(20), Timestamp(10), Direction::Forward);
        assert_eq!(query.unwrap_err(), SearchError::BadArg);
    }
}
