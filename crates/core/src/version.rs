//! Optimistic concurrency expectations for stored documents.

use crate::error::{DomainError, DomainResult};

/// Expected revision of a document at write time.
///
/// Every committed write bumps a document's revision by one. A transaction that read
/// revision `n` commits with `Exact(n)`; if anyone else committed in between, the
/// expectation fails and the transaction body is re-run against fresh state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (blind merges such as health records).
    Any,
    /// The document must not exist yet (create-if-absent).
    Absent,
    /// Require the document to be at an exact revision.
    Exact(u64),
}

impl ExpectedVersion {
    /// `actual` is `None` when the document does not exist.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Absent, Some(_)) => false,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            (ExpectedVersion::Exact(_), None) => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_only_matches_missing_documents() {
        assert!(ExpectedVersion::Absent.matches(None));
        assert!(!ExpectedVersion::Absent.matches(Some(1)));
    }

    #[test]
    fn exact_requires_same_revision() {
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(3).matches(Some(4)));
        assert!(!ExpectedVersion::Exact(3).matches(None));
        assert!(matches!(
            ExpectedVersion::Exact(3).check(Some(4)),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn any_matches_everything() {
        assert!(ExpectedVersion::Any.matches(None));
        assert!(ExpectedVersion::Any.matches(Some(42)));
    }
}
