//! Pending submissions for the round currently accepting updates.

use std::collections::BTreeMap;

use crate::error::CoordinationError;
use crate::model::ClientUpdate;

/// Accepted updates for one round, keyed by client id. First submission
/// wins. The store lives and dies with its round; it is never shared
/// across rounds.
#[derive(Debug, Default)]
pub struct UpdateStore {
    updates: BTreeMap<String, ClientUpdate>,
}

impl UpdateStore {
    pub fn new() -> Self {
        Self { updates: BTreeMap::new() }
    }

    /// Stores an update unless the client already has one this round.
    pub fn insert(&mut self, update: ClientUpdate) -> Result<(), CoordinationError> {
        if self.updates.contains_key(&update.client_id) {
            return Err(CoordinationError::DuplicateClient(update.client_id));
        }
        self.updates.insert(update.client_id.clone(), update);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.updates.keys().cloned().collect()
    }

    /// Empties the store, yielding updates in ascending client id order,
    /// the order aggregation sums in.
    pub fn take_sorted(&mut self) -> Vec<ClientUpdate> {
        std::mem::take(&mut self.updates).into_values().collect()
    }
}
