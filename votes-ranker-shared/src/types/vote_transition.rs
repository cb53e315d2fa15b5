use crate::types::{VoteRecord, VoteValue};

/// Represents a ledger change to be committed atomically.
///
/// A `VoteTransition` bundles the new state of a vote record with the value
/// it replaces and the version the caller read. Committing it writes the
/// record and appends the matching delta event in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTransition {
    /// The record as it must look after the commit.
    pub record: VoteRecord,
    /// The value the record held before, `Remove` when it did not exist.
    pub old_value: VoteValue,
    /// `None` to create the record, `Some(version)` to update it only if the
    /// stored version still matches.
    pub expected_version: Option<i64>,
}
