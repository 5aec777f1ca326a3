//! Resolve a decision to grant/deny for one record

use super::decision::Decision;
use crate::error::{AuthzError, Result};
use crate::store::RecordStore;
use std::sync::Arc;
use tracing::{debug, trace};

/// Probes storage to settle a `Filter` decision for a single record
///
/// Talks to the raw store, never to the guard, so probing cannot trigger
/// another permission check.
#[derive(Clone)]
pub struct RecordAccessResolver {
    store: Arc<dyn RecordStore>,
}

impl RecordAccessResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Whether `decision` allows access to `record_id` in `collection`
    ///
    /// `Grant` and `Deny` never touch storage.
    ///
    /// # Errors
    ///
    /// `StorageProbeFailure` when the store cannot answer; this is not a deny.
    pub async fn resolve_for_record(
        &self,
        decision: &Decision,
        collection: &str,
        record_id: &str,
    ) -> Result<bool> {
        let predicate = match decision {
            Decision::Grant => return Ok(true),
            Decision::Deny => return Ok(false),
            Decision::Filter(predicate) => predicate,
        };

        trace!(
            "Have a specific record, probing {}#{} with the permission filter",
            collection,
            record_id
        );

        let found = self
            .store
            .probe_exists(collection, record_id, predicate)
            .await
            .map_err(|e| match e {
                AuthzError::StorageProbeFailure(_) => e,
                other => AuthzError::StorageProbeFailure(other.to_string()),
            })?;

        if found {
            trace!("Record {} was found, permission granted", record_id);
        } else {
            debug!("Record {} was not found, permission denied", record_id);
        }

        Ok(found)
    }
}

impl std::fmt::Debug for RecordAccessResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordAccessResolver").finish_non_exhaustive()
    }
}
