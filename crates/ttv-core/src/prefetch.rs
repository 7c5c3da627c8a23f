//! Opportunistic warming of epochs adjacent to the one on screen.

use serde::{Deserialize, Serialize};

use crate::constants::PREFETCH_RADIUS;
use crate::epoch_cache::EpochCache;
use crate::sample::EpochId;

/// One epoch to warm, tagged with the generation it was planned under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PrefetchTask {
    pub epoch: EpochId,
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchPlanner {
    pub enabled: bool,
    pub radius: u32,
}

impl Default for PrefetchPlanner {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: PREFETCH_RADIUS,
        }
    }
}

impl PrefetchPlanner {
    /// Adjacent epochs worth building, nearest first.
    ///
    /// Empty until `current` itself is cached; skips epochs already cached
    /// or being built.
    pub fn plan(&self, cache: &EpochCache, current: EpochId) -> Vec<PrefetchTask> {
        if !self.enabled || !cache.is_cached(current) {
            return Vec::new();
        }
        let generation = cache.generation();
        cache
            .meta()
            .neighbors_of(current, self.radius)
            .into_iter()
            .filter(|e| !cache.is_cached(*e) && !cache.is_in_flight(*e))
            .map(|epoch| PrefetchTask { epoch, generation })
            .collect()
    }
}
