//! Favorite ("liked") flags per track.
//!
//! Written optimistically on toggle, verified lazily against the service.
//! On conflict the remote value wins.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FavoriteCache {
    entries: HashMap<String, bool>,
}

impl FavoriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value, `None` when the track was never seen
    pub fn get(&self, track_id: &str) -> Option<bool> {
        self.entries.get(track_id).copied()
    }

    /// Cached value, unknown tracks read as not favorite
    pub fn is_favorite(&self, track_id: &str) -> bool {
        self.get(track_id).unwrap_or(false)
    }

    pub fn set(&mut self, track_id: impl Into<String>, value: bool) {
        self.entries.insert(track_id.into(), value);
    }

    /// Merge verified values.
    ///
    /// Returns the entries whose verified value disagrees with what was
    /// cached, i.e. the only ones the UI has to redraw.
    pub fn merge_remote(&mut self, remote: &HashMap<String, bool>) -> Vec<(String, bool)> {
        let mut changed = Vec::new();
        for (track_id, &value) in remote {
            let previous = self.entries.insert(track_id.clone(), value);
            if previous != Some(value) {
                changed.push((track_id.clone(), value));
            }
        }
        changed.sort();
        changed
    }
}
