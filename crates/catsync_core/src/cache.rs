//! Process-scoped volume cache.
//!
//! # Invariants
//! - Entries are keyed by `(project_id, volume_id)` and filled on first use.
//! - Nothing is evicted implicitly; callers drop entries with `invalidate`
//!   or `clear` when the server copy may have changed.

use crate::model::neuron::ProjectId;
use crate::model::volume::Volume;
use crate::remote::api::{ApiResult, CatmaidApi};
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct VolumeCache {
    entries: Mutex<BTreeMap<(ProjectId, u64), Arc<Volume>>>,
}

impl VolumeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<(ProjectId, u64), Arc<Volume>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached volume or fetches and stores it.
    pub fn get_or_fetch(
        &self,
        api: &dyn CatmaidApi,
        project_id: ProjectId,
        volume_id: u64,
    ) -> ApiResult<Arc<Volume>> {
        if let Some(volume) = self.entries().get(&(project_id, volume_id)) {
            return Ok(Arc::clone(volume));
        }
        debug!(
            "event=volume_fetch module=cache status=start project_id={project_id} volume_id={volume_id}"
        );
        let volume = Arc::new(api.get_volume(project_id, volume_id)?);
        self.entries()
            .insert((project_id, volume_id), Arc::clone(&volume));
        Ok(volume)
    }

    /// Drops one entry; returns whether it was cached.
    pub fn invalidate(&self, project_id: ProjectId, volume_id: u64) -> bool {
        self.entries().remove(&(project_id, volume_id)).is_some()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::VolumeCache;
    use crate::model::volume::Volume;
    use crate::remote::memory::InMemoryCatmaid;

    #[test]
    fn fetches_once_until_invalidated() {
        let server = InMemoryCatmaid::new();
        server.add_project(1, "p");
        server.insert_volume(1, Volume::axis_aligned_box(7, "box", [0.0; 3], [1.0; 3]));
        let cache = VolumeCache::new();

        let first = cache.get_or_fetch(&server, 1, 7).unwrap();
        server.insert_volume(1, Volume::axis_aligned_box(7, "bigger", [0.0; 3], [2.0; 3]));
        let second = cache.get_or_fetch(&server, 1, 7).unwrap();
        assert_eq!(second.name, first.name);

        assert!(cache.invalidate(1, 7));
        let third = cache.get_or_fetch(&server, 1, 7).unwrap();
        assert_eq!(third.name, "bigger");
    }

    #[test]
    fn missing_volume_is_not_cached() {
        let server = InMemoryCatmaid::new();
        server.add_project(1, "p");
        let cache = VolumeCache::new();
        assert!(cache.get_or_fetch(&server, 1, 99).is_err());
        assert!(cache.is_empty());
    }
}
