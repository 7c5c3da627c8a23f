//! Per-epoch derived data, built once per dataset generation.
//!
//! Entries are immutable once built and handed out as `Arc`s. Changing the
//! dataset drops every entry and bumps the generation; a build that started
//! under an older generation is discarded when it completes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::constants::COORD_PRECISION;
use crate::dataset::DatasetMeta;
use crate::neighbor_graph::{EdgeKey, EdgeTransition, NeighborEdge, NeighborGraph};
use crate::sample::{Bounds, EpochId, RawEpochPayload, Sample, predict, round_coord};

/// Render-ready structures for one epoch.
#[derive(Debug)]
pub struct EpochCacheEntry {
    pub epoch: EpochId,
    pub generation: u64,
    pub samples: Vec<Sample>,
    pub graph: Arc<NeighborGraph>,
    pub bounds: Bounds,
    pub misclassified: Vec<usize>,
    pub flipped_from_previous: Vec<usize>,
    pub background_image: Option<String>,
    pub has_predictions: bool,
    /// Dataset the entry was derived from.
    pub dataset: Arc<DatasetMeta>,
}

impl EpochCacheEntry {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample(&self, id: usize) -> Option<&Sample> {
        self.samples.get(id)
    }

    pub fn position(&self, id: usize) -> Option<(f64, f64)> {
        self.samples.get(id).map(|s| (s.x, s.y))
    }

    pub fn edges(&self) -> &[NeighborEdge] {
        &self.graph.edges
    }

    pub fn adjacency(&self) -> &HashMap<usize, Vec<usize>> {
        &self.graph.adjacency
    }

    pub fn edge_lookup(&self) -> &HashMap<EdgeKey, NeighborEdge> {
        &self.graph.edge_lookup
    }

    pub fn edge_transitions(&self, previous: &EpochCacheEntry) -> Vec<EdgeTransition> {
        self.graph.transitions(&previous.graph)
    }
}

/// Identifies one build: the same epoch under a new generation is a new build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub generation: u64,
    pub epoch: EpochId,
}

/// Permission to build one epoch. Hand it back through
/// [`EpochCache::finish_build`] or [`EpochCache::abandon_build`].
#[derive(Debug, PartialEq, Eq)]
pub struct BuildTicket {
    key: BuildKey,
}

impl BuildTicket {
    pub fn epoch(&self) -> EpochId {
        self.key.epoch
    }

    pub fn generation(&self) -> u64 {
        self.key.generation
    }
}

#[derive(Debug)]
pub enum BuildStart {
    Cached(Arc<EpochCacheEntry>),
    /// Another caller holds the ticket for this `(generation, epoch)`.
    InFlight,
    Start(BuildTicket),
}

#[derive(Debug)]
pub enum BuildOutcome {
    Ready(Arc<EpochCacheEntry>),
    /// The dataset changed while the build was running; nothing was inserted.
    Stale,
}

impl BuildOutcome {
    pub fn entry(self) -> Option<Arc<EpochCacheEntry>> {
        match self {
            Self::Ready(entry) => Some(entry),
            Self::Stale => None,
        }
    }
}

#[derive(Debug)]
pub struct EpochCache {
    entries: HashMap<EpochId, Arc<EpochCacheEntry>>,
    in_flight: HashSet<BuildKey>,
    generation: u64,
    meta: Arc<DatasetMeta>,
    precision: u32,
    builds: u64,
}

impl Default for EpochCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            in_flight: HashSet::new(),
            generation: 0,
            meta: Arc::new(DatasetMeta::default()),
            precision: COORD_PRECISION,
            builds: 0,
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn meta(&self) -> &Arc<DatasetMeta> {
        &self.meta
    }

    /// Number of builds that actually ran, across all generations.
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, epoch: EpochId) -> Option<Arc<EpochCacheEntry>> {
        self.entries.get(&epoch).cloned()
    }

    pub fn is_cached(&self, epoch: EpochId) -> bool {
        self.entries.contains_key(&epoch)
    }

    pub fn is_in_flight(&self, epoch: EpochId) -> bool {
        self.in_flight.contains(&self.key(epoch))
    }

    pub fn cached_epochs(&self) -> Vec<EpochId> {
        let mut epochs: Vec<EpochId> = self.entries.keys().copied().collect();
        epochs.sort_unstable();
        epochs
    }

    /// Drop every entry and start a new generation.
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.in_flight.clear();
        self.generation += 1;
        tracing::debug!(generation = self.generation, "epoch cache invalidated");
    }

    /// Switch to a new dataset. Always invalidates.
    pub fn reset_dataset(&mut self, meta: DatasetMeta) {
        self.meta = Arc::new(meta);
        self.invalidate_all();
    }

    fn key(&self, epoch: EpochId) -> BuildKey {
        BuildKey {
            generation: self.generation,
            epoch,
        }
    }

    /// Return the cached entry, or build it now.
    ///
    /// Repeated calls within one generation never rebuild.
    pub fn get_or_build(&mut self, epoch: EpochId, payload: &RawEpochPayload) -> Arc<EpochCacheEntry> {
        match self.begin_build(epoch) {
            BuildStart::Cached(entry) => entry,
            BuildStart::Start(ticket) => match self.finish_build(ticket, payload) {
                BuildOutcome::Ready(entry) => entry,
                // Same generation by construction.
                BuildOutcome::Stale => self.insert_built(epoch, payload),
            },
            // An asynchronous caller holds the ticket; build here and let
            // that caller pick up this entry when it finishes.
            BuildStart::InFlight => self.insert_built(epoch, payload),
        }
    }

    pub fn begin_build(&mut self, epoch: EpochId) -> BuildStart {
        if let Some(entry) = self.entries.get(&epoch) {
            return BuildStart::Cached(Arc::clone(entry));
        }
        let key = self.key(epoch);
        if !self.in_flight.insert(key) {
            return BuildStart::InFlight;
        }
        BuildStart::Start(BuildTicket { key })
    }

    /// Complete a build started with [`EpochCache::begin_build`].
    pub fn finish_build(&mut self, ticket: BuildTicket, payload: &RawEpochPayload) -> BuildOutcome {
        self.in_flight.remove(&ticket.key);
        if ticket.key.generation != self.generation {
            tracing::debug!(
                epoch = ticket.key.epoch,
                stale = ticket.key.generation,
                current = self.generation,
                "discarding stale epoch build"
            );
            return BuildOutcome::Stale;
        }
        if let Some(entry) = self.entries.get(&ticket.key.epoch) {
            return BuildOutcome::Ready(Arc::clone(entry));
        }
        BuildOutcome::Ready(self.insert_built(ticket.key.epoch, payload))
    }

    /// Insert an entry built by another cache over the same dataset.
    ///
    /// An entry already cached for that epoch wins. Entries derived from a
    /// different dataset are refused.
    pub fn adopt(&mut self, entry: Arc<EpochCacheEntry>) -> Option<Arc<EpochCacheEntry>> {
        if !self.same_dataset(&entry.dataset) {
            tracing::debug!(
                epoch = entry.epoch,
                generation = self.generation,
                "refusing entry from another dataset"
            );
            return None;
        }
        Some(Arc::clone(self.entries.entry(entry.epoch).or_insert(entry)))
    }

    fn same_dataset(&self, meta: &Arc<DatasetMeta>) -> bool {
        Arc::ptr_eq(meta, &self.meta) || **meta == *self.meta
    }

    /// Release a ticket whose payload never arrived.
    pub fn abandon_build(&mut self, ticket: BuildTicket) {
        self.in_flight.remove(&ticket.key);
    }

    fn insert_built(&mut self, epoch: EpochId, payload: &RawEpochPayload) -> Arc<EpochCacheEntry> {
        let previous = self
            .meta
            .previous_epoch(epoch)
            .and_then(|prev| self.entries.get(&prev).cloned());
        let entry = Arc::new(build_entry(
            epoch,
            self.generation,
            payload,
            previous.as_deref(),
            &self.meta,
            self.precision,
        ));
        self.builds += 1;
        self.entries.insert(epoch, Arc::clone(&entry));
        entry
    }
}

/// Derive one epoch's entry. Malformed payloads degrade, never fail.
pub fn build_entry(
    epoch: EpochId,
    generation: u64,
    payload: &RawEpochPayload,
    previous: Option<&EpochCacheEntry>,
    meta: &Arc<DatasetMeta>,
    precision: u32,
) -> EpochCacheEntry {
    let n = payload.sample_count();
    let probs_usable = payload.has_probabilities();
    if probs_usable && payload.prediction_probabilities.len() != n {
        tracing::warn!(
            epoch,
            expected = n,
            got = payload.prediction_probabilities.len(),
            "prediction vector count mismatch; missing samples keep their label"
        );
    }
    if !payload.labels.is_empty() && payload.labels.len() != n {
        tracing::warn!(epoch, expected = n, got = payload.labels.len(), "label count mismatch");
    }

    let mut samples = Vec::with_capacity(n);
    let mut bounds = Bounds::empty();
    let mut misclassified = Vec::new();
    let mut flipped = Vec::new();
    let flip_source = previous.filter(|_| probs_usable);

    for i in 0..n {
        let (raw_x, raw_y) = payload.point(i);
        let x = round_coord(raw_x, precision);
        let y = round_coord(raw_y, precision);
        bounds.include(x, y);

        let label = payload.label(i);
        let (predicted_label, confidence) = payload
            .prediction_probabilities
            .get(i)
            .and_then(|p| predict(p))
            .unwrap_or((label, 1.0));

        if let Some(prev) = flip_source.and_then(|p| p.samples.get(i))
            && prev.predicted_label != predicted_label
        {
            flipped.push(i);
        }

        let sample = Sample {
            id: i,
            x,
            y,
            label,
            predicted_label,
            confidence,
            text: meta.text(i).to_string(),
        };
        if sample.is_misclassified() {
            misclassified.push(i);
        }
        samples.push(sample);
    }

    let original = sanitize_neighbors(epoch, "original-space", &payload.original_space_neighbors, n);
    let projection = sanitize_neighbors(epoch, "projection-space", &payload.projection_space_neighbors, n);
    let graph = NeighborGraph::build(&original, &projection);

    EpochCacheEntry {
        epoch,
        generation,
        samples,
        graph: Arc::new(graph),
        bounds: bounds.or_default_scope(),
        misclassified,
        flipped_from_previous: flipped,
        background_image: payload.background_image.clone(),
        has_predictions: probs_usable,
        dataset: Arc::clone(meta),
    }
}

/// Lists whose length disagrees with the sample count are treated as empty;
/// targets outside the sample range are dropped.
fn sanitize_neighbors(epoch: EpochId, kind: &str, lists: &[Vec<usize>], n: usize) -> Vec<Vec<usize>> {
    if lists.is_empty() {
        return Vec::new();
    }
    if lists.len() != n {
        tracing::warn!(
            epoch,
            kind,
            expected = n,
            got = lists.len(),
            "neighbor list length mismatch; rendering without these edges"
        );
        return Vec::new();
    }
    let mut dropped = 0usize;
    let cleaned: Vec<Vec<usize>> = lists
        .iter()
        .map(|list| {
            list.iter()
                .copied()
                .filter(|&j| {
                    let keep = j < n;
                    if !keep {
                        dropped += 1;
                    }
                    keep
                })
                .collect::<Vec<usize>>()
        })
        .collect();
    if dropped > 0 {
        tracing::warn!(epoch, kind, dropped, "dropped out-of-range neighbor ids");
    }
    cleaned
}
