// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::error::StoreError;
use crate::feed::EpisodeId;
use crate::store::{KeyValueStore, KeyValueStoreExt, POSITIONS_KEY};

/// Last playback position per episode, written through to a key-value store
pub struct PositionStore {
    store: Arc<dyn KeyValueStore>,
    positions: Mutex<HashMap<EpisodeId, f64>>,
}

impl PositionStore {
    /// Load persisted positions. An unreadable map is treated as empty.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let positions = match store.get_json::<HashMap<EpisodeId, f64>>(POSITIONS_KEY) {
            Ok(positions) => positions.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable playback positions");
                HashMap::new()
            }
        };

        Self {
            store,
            positions: Mutex::new(positions),
        }
    }

    pub fn get(&self, id: &EpisodeId) -> Option<f64> {
        self.lock().get(id).copied()
    }

    /// Record the position for an episode
    pub fn save(&self, id: &EpisodeId, position: f64) -> Result<(), StoreError> {
        let mut positions = self.lock();
        positions.insert(id.clone(), position.max(0.0));
        self.store.put_json(POSITIONS_KEY, &*positions)
    }

    /// Forget the position for an episode, e.g. once it played to the end
    pub fn clear(&self, id: &EpisodeId) -> Result<(), StoreError> {
        self.forget(std::slice::from_ref(id))
    }

    /// Forget the positions of several episodes at once
    pub fn forget(&self, ids: &[EpisodeId]) -> Result<(), StoreError> {
        let mut positions = self.lock();
        let before = positions.len();
        for id in ids {
            positions.remove(id);
        }
        if positions.len() == before {
            return Ok(());
        }
        self.store.put_json(POSITIONS_KEY, &*positions)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EpisodeId, f64>> {
        self.positions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
