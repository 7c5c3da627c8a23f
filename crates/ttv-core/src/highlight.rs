//! Hover / lock highlight state for one rendering surface.
//!
//! Hovering takes priority over lock-driven neighbor expansion: while a
//! sample is hovered only its neighbors are expanded, and locked samples stay
//! marked without pulling in their own neighbors.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::{BASE_POINT_SIZE, DIM_ALPHA, FULL_ALPHA, HIGHLIGHT_SIZE_FACTOR};
use crate::neighbor_graph::NeighborGraph;

/// Handle returned by [`ListenerRegistry::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Box<dyn FnMut(&E) + Send>;

/// Explicit subscribe/unsubscribe observer list.
///
/// Listeners live until their owner unsubscribes them or the registry is
/// dropped.
pub struct ListenerRegistry<E> {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener<E>)>,
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }
}

impl<E> ListenerRegistry<E> {
    pub fn subscribe(&mut self, listener: impl FnMut(&E) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn notify(&mut self, event: &E) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E> std::fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// The transition that triggered a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HighlightChange {
    Hovered(Option<usize>),
    Locked(usize),
    Unlocked(usize),
    LocksReplaced,
    LocksCleared,
    NeighborsChanged,
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HighlightPhase {
    Idle,
    Hovered,
    Locked(usize),
    HoveredAndLocked,
}

/// Stored highlight state, as exchanged with other surfaces.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightState {
    pub hovered_id: Option<usize>,
    pub locked_ids: BTreeSet<usize>,
}

/// Per-sample alpha and size overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    pub alphas: Vec<f64>,
    pub sizes: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HighlightUpdate {
    Unchanged,
    Changed(DisplayGeometry),
}

/// Dim everything outside `highlighted`; enlarge what is inside.
///
/// An empty set leaves every sample at full alpha and base size.
/// Ids beyond `sample_count` are ignored.
pub fn compute_display(sample_count: usize, highlighted: &BTreeSet<usize>, base_size: f64) -> DisplayGeometry {
    if highlighted.is_empty() {
        return DisplayGeometry {
            alphas: vec![FULL_ALPHA; sample_count],
            sizes: vec![base_size; sample_count],
        };
    }
    let mut alphas = vec![DIM_ALPHA; sample_count];
    let mut sizes = vec![base_size; sample_count];
    for &id in highlighted.range(..sample_count) {
        alphas[id] = FULL_ALPHA;
        sizes[id] = base_size * HIGHLIGHT_SIZE_FACTOR;
    }
    DisplayGeometry { alphas, sizes }
}

pub struct HighlightStateMachine {
    hovered: Option<usize>,
    locked: BTreeSet<usize>,
    graph: Arc<NeighborGraph>,
    base_size: f64,
    last_highlighted: Option<Vec<usize>>,
    listeners: ListenerRegistry<HighlightChange>,
}

impl Default for HighlightStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HighlightStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightStateMachine")
            .field("hovered", &self.hovered)
            .field("locked", &self.locked)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl HighlightStateMachine {
    pub fn new() -> Self {
        Self {
            hovered: None,
            locked: BTreeSet::new(),
            graph: Arc::new(NeighborGraph::default()),
            base_size: BASE_POINT_SIZE,
            last_highlighted: None,
            listeners: ListenerRegistry::default(),
        }
    }

    pub fn with_base_size(mut self, base_size: f64) -> Self {
        self.base_size = base_size;
        self
    }

    pub fn base_size(&self) -> f64 {
        self.base_size
    }

    pub fn hovered(&self) -> Option<usize> {
        self.hovered
    }

    pub fn locked(&self) -> &BTreeSet<usize> {
        &self.locked
    }

    pub fn state(&self) -> HighlightState {
        HighlightState {
            hovered_id: self.hovered,
            locked_ids: self.locked.clone(),
        }
    }

    pub fn phase(&self) -> HighlightPhase {
        match (self.hovered, self.locked.len()) {
            (None, 0) => HighlightPhase::Idle,
            (Some(_), 0) => HighlightPhase::Hovered,
            (None, n) => HighlightPhase::Locked(n),
            (Some(_), _) => HighlightPhase::HoveredAndLocked,
        }
    }

    // --- Listeners ---

    pub fn subscribe(&mut self, listener: impl FnMut(&HighlightChange) + Send + 'static) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn notify(&mut self, change: HighlightChange) {
        self.listeners.notify(&change);
    }

    // --- Transitions ---

    /// Returns false (and stays silent) if `id` is already the hovered sample.
    pub fn set_hovered(&mut self, id: Option<usize>) -> bool {
        if self.hovered == id {
            return false;
        }
        self.hovered = id;
        self.notify(HighlightChange::Hovered(id));
        true
    }

    pub fn lock(&mut self, id: usize) {
        self.locked.insert(id);
        self.notify(HighlightChange::Locked(id));
    }

    pub fn unlock(&mut self, id: usize) {
        self.locked.remove(&id);
        self.notify(HighlightChange::Unlocked(id));
    }

    /// Returns whether `id` is locked afterwards.
    pub fn toggle_lock(&mut self, id: usize) -> bool {
        if self.locked.remove(&id) {
            self.notify(HighlightChange::Unlocked(id));
            false
        } else {
            self.locked.insert(id);
            self.notify(HighlightChange::Locked(id));
            true
        }
    }

    pub fn clear_locks(&mut self) {
        self.locked.clear();
        self.notify(HighlightChange::LocksCleared);
    }

    /// Replace the locked set wholesale. No-op if the set is unchanged.
    pub fn replace_locks(&mut self, ids: impl IntoIterator<Item = usize>) -> bool {
        let next: BTreeSet<usize> = ids.into_iter().collect();
        if next == self.locked {
            return false;
        }
        self.locked = next;
        self.notify(HighlightChange::LocksReplaced);
        true
    }

    pub fn set_neighbor_graph(&mut self, graph: Arc<NeighborGraph>) {
        self.graph = graph;
        self.notify(HighlightChange::NeighborsChanged);
    }

    /// Back to `Idle` with no cached highlight; used when a new dataset loads.
    pub fn reset(&mut self) {
        self.hovered = None;
        self.locked.clear();
        self.graph = Arc::new(NeighborGraph::default());
        self.last_highlighted = None;
        self.notify(HighlightChange::Reset);
    }

    // --- Derived ---

    pub fn neighbors(&self, id: usize) -> &[usize] {
        self.graph.neighbors(id)
    }

    pub fn highlighted_set(&self) -> BTreeSet<usize> {
        let mut set: BTreeSet<usize> = self.locked.clone();
        match self.hovered {
            Some(h) => {
                set.insert(h);
                set.extend(self.graph.neighbors(h).iter().copied());
            }
            None => {
                for &id in &self.locked {
                    set.extend(self.graph.neighbors(id).iter().copied());
                }
            }
        }
        set
    }

    /// Recompute display geometry unless the highlighted ids are identical
    /// to the previous call's and `use_cache` is set.
    pub fn try_update(&mut self, sample_count: usize, use_cache: bool) -> HighlightUpdate {
        let set = self.highlighted_set();
        let ids: Vec<usize> = set.iter().copied().collect();
        if use_cache && self.last_highlighted.as_deref() == Some(ids.as_slice()) {
            return HighlightUpdate::Unchanged;
        }
        self.last_highlighted = Some(ids);
        HighlightUpdate::Changed(compute_display(sample_count, &set, self.base_size))
    }

    /// Current display geometry, ignoring and not touching the cache.
    pub fn display(&self, sample_count: usize) -> DisplayGeometry {
        compute_display(sample_count, &self.highlighted_set(), self.base_size)
    }
}
