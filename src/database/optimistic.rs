//! Version-stamped write protocol shared by every repository.
//!
//! A record moves through `Unversioned -> Versioned(1) -> Versioned(2) -> ... -> Deleted`.
//! Updates are expressed as a single conditional statement
//! (`... SET version = version + 1 WHERE id = $id AND version = $expected RETURNING version`)
//! so no lock is ever held across the read-modify-write round trip.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use super::error::StoreError;

/// Version assigned to a freshly inserted row.
pub const INITIAL_VERSION: i32 = 1;

/// A row guarded by the optimistic protocol.
pub trait Versioned {
    fn id(&self) -> i64;
    fn version(&self) -> i32;
    fn set_version(&mut self, version: i32);
}

/// Ids are always positive; anything else cannot name a row.
pub fn ensure_valid_id(id: i64) -> Result<(), StoreError> {
    if id < 1 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Interpret the `RETURNING version` of a conditional update.
///
/// Zero rows means another writer advanced or deleted the row after the caller read it.
pub fn apply_returned_version<T: Versioned>(record: &mut T, returned: Option<i32>) -> Result<(), StoreError> {
    match returned {
        Some(version) => {
            record.set_version(version);
            Ok(())
        }
        None => {
            tracing::debug!(id = record.id(), expected_version = record.version(), "conditional update matched no row");
            metrics::counter!("edit_conflicts_total").increment(1);
            Err(StoreError::EditConflict)
        }
    }
}

/// Interpret the affected-row count of an unconditional delete.
pub fn expect_deleted(rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Run a store interaction under a bounded deadline.
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::error!(?deadline, "store operation timed out");
            Err(StoreError::Timeout(deadline))
        }
    }
}
