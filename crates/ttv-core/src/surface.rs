//! One rendering surface's authoritative state.
//!
//! A surface never touches another surface's state. Everything it learns
//! about the others arrives as envelopes through its `SyncChannel`, and
//! everything it tells them leaves the same way.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dataset::DatasetMeta;
use crate::epoch_cache::{EpochCache, EpochCacheEntry};
use crate::frame::{RenderFrame, build_frame};
use crate::highlight::{HighlightState, HighlightStateMachine};
use crate::message::{EpochSwitch, Envelope, Message, SelectedIndicesSwitch};
use crate::prefetch::{PrefetchPlanner, PrefetchTask};
use crate::sample::{EpochId, RawEpochPayload};
use crate::sync::{Inbound, SyncChannel, SyncKey, SyncStats, Transport};
use crate::view::{ViewFilter, ViewSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub Uuid);

impl SurfaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SurfaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SurfaceRole {
    /// The main projection plot.
    Plot,
    /// Token / sample text panel.
    Tokens,
    /// Filters, index sets and training events.
    Functions,
    /// Influence and sample detail.
    Detail,
}

impl SurfaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceRole::Plot => "plot",
            SurfaceRole::Tokens => "tokens",
            SurfaceRole::Functions => "functions",
            SurfaceRole::Detail => "detail",
        }
    }
}

/// What the host should do after a surface handled something.
#[derive(Clone, Debug, PartialEq)]
pub enum Reaction {
    Nothing,
    Redraw,
    /// The surface switched to an epoch it has not cached yet.
    NeedEpoch(EpochId),
    /// Another surface loaded different content.
    LoadContent(String),
    /// Work only the backend can do.
    Backend(Message),
}

pub struct Surface<T> {
    id: SurfaceId,
    role: SurfaceRole,
    cache: EpochCache,
    highlight: HighlightStateMachine,
    channel: SyncChannel<T>,
    properties: BTreeMap<SyncKey, Value>,
    settings: ViewSettings,
    filter: ViewFilter,
    planner: PrefetchPlanner,
    epoch: Option<EpochId>,
    content_path: Option<String>,
    training_events: Option<Value>,
}

impl<T> fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("epoch", &self.epoch)
            .field("content_path", &self.content_path)
            .field("highlight", &self.highlight)
            .finish()
    }
}

/// Serializable summary of a surface, for diagnostics and replay output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceSnapshot {
    pub role: SurfaceRole,
    pub epoch: Option<EpochId>,
    pub content_path: Option<String>,
    pub highlight: HighlightState,
    pub cached_epochs: Vec<EpochId>,
    pub properties: BTreeMap<String, Value>,
    pub sent: u64,
    pub suppressed: u64,
    pub applied: u64,
    pub dropped: u64,
}

impl<T: Transport> Surface<T> {
    pub fn new(role: SurfaceRole, transport: T) -> Self {
        Self {
            id: SurfaceId::new(),
            role,
            cache: EpochCache::new(),
            highlight: HighlightStateMachine::new(),
            channel: SyncChannel::new(transport),
            properties: BTreeMap::new(),
            settings: ViewSettings::default(),
            filter: ViewFilter::default(),
            planner: PrefetchPlanner::default(),
            epoch: None,
            content_path: None,
            training_events: None,
        }
    }

    pub fn with_id(mut self, id: SurfaceId) -> Self {
        self.id = id;
        self
    }

    pub fn with_settings(mut self, settings: ViewSettings) -> Self {
        self.highlight = HighlightStateMachine::new().with_base_size(settings.base_point_size);
        self.settings = settings;
        self
    }

    pub fn with_planner(mut self, planner: PrefetchPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.cache = EpochCache::new().with_precision(precision);
        self
    }

    // --- Accessors ---

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn role(&self) -> SurfaceRole {
        self.role
    }

    pub fn epoch(&self) -> Option<EpochId> {
        self.epoch
    }

    pub fn content_path(&self) -> Option<&str> {
        self.content_path.as_deref()
    }

    pub fn cache(&self) -> &EpochCache {
        &self.cache
    }

    pub fn highlight(&self) -> &HighlightStateMachine {
        &self.highlight
    }

    /// For subscribing listeners; transitions should go through the
    /// interaction methods so they get synchronized.
    pub fn highlight_mut(&mut self) -> &mut HighlightStateMachine {
        &mut self.highlight
    }

    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    pub fn filter(&self) -> &ViewFilter {
        &self.filter
    }

    pub fn training_events(&self) -> Option<&Value> {
        self.training_events.as_ref()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.channel.stats()
    }

    pub fn snapshot(&self) -> SurfaceSnapshot {
        let stats = self.sync_stats();
        SurfaceSnapshot {
            role: self.role,
            epoch: self.epoch,
            content_path: self.content_path.clone(),
            highlight: self.highlight.state(),
            cached_epochs: self.cache.cached_epochs(),
            properties: self
                .properties
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect(),
            sent: stats.sent,
            suppressed: stats.suppressed,
            applied: stats.applied,
            dropped: stats.dropped,
        }
    }

    // --- Content and epochs ---

    /// Switch to a new training run: resets highlight and view state,
    /// invalidates the cache and tells the other surfaces.
    pub fn load_content(&mut self, path: &str, meta: DatasetMeta) {
        info!(surface = %self.id, role = self.role.as_str(), path, "loading content");
        self.highlight.reset();
        self.cache.reset_dataset(meta);
        self.channel.clear();
        self.properties.clear();
        self.filter = ViewFilter::default();
        self.training_events = None;
        self.epoch = None;
        self.content_path = Some(path.to_string());
        self.properties.insert(SyncKey::ContentPath, json!(path));
        self.channel.sync_out(SyncKey::ContentPath, path);
    }

    pub fn ingest_epoch(&mut self, epoch: EpochId, payload: &RawEpochPayload) -> Arc<EpochCacheEntry> {
        let entry = self.cache.get_or_build(epoch, payload);
        self.entry_ready(&entry);
        entry
    }

    /// Take an entry built elsewhere, e.g. by a shared host cache.
    /// `None` when the entry belongs to a different dataset.
    pub fn adopt_entry(&mut self, entry: Arc<EpochCacheEntry>) -> Option<Arc<EpochCacheEntry>> {
        let entry = self.cache.adopt(entry)?;
        self.entry_ready(&entry);
        Some(entry)
    }

    fn entry_ready(&mut self, entry: &Arc<EpochCacheEntry>) {
        if self.epoch == Some(entry.epoch) {
            self.highlight.set_neighbor_graph(Arc::clone(&entry.graph));
        }
    }

    fn show_epoch(&mut self, epoch: EpochId) -> Reaction {
        self.epoch = Some(epoch);
        match self.cache.get(epoch) {
            Some(entry) => {
                self.highlight.set_neighbor_graph(Arc::clone(&entry.graph));
                Reaction::Redraw
            }
            None => Reaction::NeedEpoch(epoch),
        }
    }

    /// Local epoch change, announced to the other surfaces.
    pub fn switch_epoch(&mut self, epoch: EpochId) -> Reaction {
        if self.epoch == Some(epoch) {
            return Reaction::Nothing;
        }
        let reaction = self.show_epoch(epoch);
        self.channel
            .send(&Message::EpochSwitch(EpochSwitch { epoch }));
        reaction
    }

    // --- Interaction ---

    /// Pointer moved onto `id`, or off every sample with `None`.
    pub fn hover(&mut self, id: Option<usize>) -> Reaction {
        if !self.highlight.set_hovered(id) {
            return Reaction::Nothing;
        }
        self.channel.sync_out(SyncKey::HoveredIndex, id);
        Reaction::Redraw
    }

    /// Toggle the lock on `id` and publish the new selection.
    pub fn click(&mut self, id: usize) -> Reaction {
        self.highlight.toggle_lock(id);
        let selected: Vec<usize> = self.highlight.locked().iter().copied().collect();
        self.properties.insert(SyncKey::SelectedIndices, json!(selected));
        self.channel.sync_out(SyncKey::SelectedIndices, &selected);
        self.channel
            .send(&Message::SelectedIndicesSwitch(SelectedIndicesSwitch {
                selected_indices: selected,
            }));
        Reaction::Redraw
    }

    pub fn set_search(&mut self, query: &str) -> Reaction {
        self.filter.set_search(query);
        Reaction::Redraw
    }

    /// Publish a detail property (texts, attention, labels) to the other surfaces.
    pub fn publish(&mut self, key: SyncKey, value: Value) -> bool {
        self.properties.insert(key, value.clone());
        self.channel.sync_out(key, value)
    }

    /// Send a discrete command that carries no local state change.
    pub fn send(&mut self, message: &Message) -> bool {
        self.channel.send(message)
    }

    // --- Inbound ---

    pub fn handle_envelope(&mut self, envelope: &Envelope) -> Reaction {
        let before = self.highlight.state();
        match self.channel.receive(envelope, &mut self.highlight) {
            Inbound::Dropped(_) => Reaction::Nothing,
            Inbound::Synced(changes) => {
                let mut reaction = if self.highlight.state() != before {
                    Reaction::Redraw
                } else {
                    Reaction::Nothing
                };
                for (key, value) in changes {
                    if key == SyncKey::ContentPath
                        && let Some(path) = value.as_str()
                        && self.content_path.as_deref() != Some(path)
                    {
                        reaction = Reaction::LoadContent(path.to_string());
                    } else if reaction == Reaction::Nothing {
                        reaction = Reaction::Redraw;
                    }
                    self.properties.insert(key, value);
                }
                reaction
            }
            Inbound::Command(message) => self.apply_command(message),
        }
    }

    fn apply_command(&mut self, message: Message) -> Reaction {
        debug!(surface = %self.id, command = %message.command(), "applying command");
        match message {
            Message::Sync(_) => Reaction::Nothing,
            Message::EpochSwitch(EpochSwitch { epoch }) => {
                if self.epoch == Some(epoch) {
                    Reaction::Nothing
                } else {
                    self.show_epoch(epoch)
                }
            }
            Message::HoveredIndexSwitch(p) => {
                self.channel.remember(SyncKey::HoveredIndex, json!(p.hovered_index));
                if self.highlight.set_hovered(p.hovered_index) {
                    Reaction::Redraw
                } else {
                    Reaction::Nothing
                }
            }
            Message::SelectedIndicesSwitch(p) => {
                let value = json!(p.selected_indices);
                self.channel.remember(SyncKey::SelectedIndices, value.clone());
                self.properties.insert(SyncKey::SelectedIndices, value);
                if self.highlight.replace_locks(p.selected_indices) {
                    Reaction::Redraw
                } else {
                    Reaction::Nothing
                }
            }
            Message::ShownDataSwitch(p) => {
                self.filter.set_shown_data(p.shown_data);
                Reaction::Redraw
            }
            Message::HighlightDataSwitch(p) => {
                self.filter.set_highlight(&p.highlight_data);
                Reaction::Redraw
            }
            Message::FocusModeSwitch(p) => {
                self.filter.set_focus(p.is_focus_mode, p.focus_indices);
                Reaction::Redraw
            }
            Message::TrainingEventClicked(events) => {
                self.training_events = Some(events);
                Reaction::Redraw
            }
            m @ (Message::TracingInfluence { .. } | Message::CalculateEvents(_)) => Reaction::Backend(m),
        }
    }

    // --- Output ---

    /// Frame for the current epoch, if it is cached.
    pub fn frame(&self) -> Option<RenderFrame> {
        let epoch = self.epoch?;
        build_frame(&self.cache, epoch, &self.highlight, &self.settings, &self.filter)
    }

    pub fn prefetch_plan(&self) -> Vec<PrefetchTask> {
        match self.epoch {
            Some(epoch) => self.planner.plan(&self.cache, epoch),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Receiver};

    type TestSurface = Surface<mpsc::Sender<Envelope>>;

    fn surface(role: SurfaceRole) -> (TestSurface, Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel();
        (Surface::new(role, tx), rx)
    }

    fn meta() -> DatasetMeta {
        DatasetMeta {
            available_epochs: vec![1, 2, 3],
            ..Default::default()
        }
    }

    fn payload() -> RawEpochPayload {
        RawEpochPayload {
            projection: vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]],
            labels: vec![0, 0, 1],
            original_space_neighbors: vec![vec![1], vec![0], vec![]],
            ..Default::default()
        }
    }

    fn forward(from: &Receiver<Envelope>, to: &mut TestSurface) -> Vec<Reaction> {
        from.try_iter().map(|env| to.handle_envelope(&env)).collect()
    }

    #[test]
    fn test_load_content_resets_and_announces() {
        let (mut s, rx) = surface(SurfaceRole::Plot);
        s.load_content("/runs/a", meta());
        s.switch_epoch(1);
        s.ingest_epoch(1, &payload());
        s.click(0);
        let generation = s.cache().generation();

        s.load_content("/runs/b", meta());
        assert_eq!(s.cache().generation(), generation + 1);
        assert!(s.cache().is_empty());
        assert!(s.highlight().locked().is_empty());
        assert_eq!(s.epoch(), None);

        let sent: Vec<Envelope> = rx.try_iter().collect();
        let last = sent.last().unwrap();
        assert_eq!(last.fields["contentPath"], json!("/runs/b"));
    }

    #[test]
    fn test_switch_epoch_requests_uncached() {
        let (mut s, rx) = surface(SurfaceRole::Plot);
        s.load_content("/runs/a", meta());
        assert_eq!(s.switch_epoch(2), Reaction::NeedEpoch(2));
        assert!(s.frame().is_none());
        s.ingest_epoch(2, &payload());
        assert!(s.frame().is_some());
        assert_eq!(s.highlight().neighbors(0), &[1]);
        assert_eq!(s.switch_epoch(2), Reaction::Nothing);

        let commands: Vec<String> = rx.try_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["sync", "epochSwitch"]);
    }

    #[test]
    fn test_hover_propagates_between_surfaces() {
        let (mut plot, plot_rx) = surface(SurfaceRole::Plot);
        let (mut tokens, tokens_rx) = surface(SurfaceRole::Tokens);

        plot.hover(Some(2));
        plot.hover(Some(2));
        let reactions = forward(&plot_rx, &mut tokens);
        assert_eq!(reactions, vec![Reaction::Redraw]);
        assert_eq!(tokens.highlight().hovered(), Some(2));

        // No echo back to the plot.
        assert_eq!(tokens_rx.try_iter().count(), 0);
        tokens.hover(Some(2));
        assert_eq!(tokens_rx.try_iter().count(), 0);
    }

    #[test]
    fn test_click_selection_propagates() {
        let (mut plot, plot_rx) = surface(SurfaceRole::Plot);
        let (mut panel, panel_rx) = surface(SurfaceRole::Functions);

        plot.click(1);
        plot.click(4);
        forward(&plot_rx, &mut panel);
        let locked: Vec<usize> = panel.highlight().locked().iter().copied().collect();
        assert_eq!(locked, vec![1, 4]);
        assert_eq!(panel.snapshot().properties["selectedIndices"], json!([1, 4]));
        assert_eq!(panel_rx.try_iter().count(), 0);

        plot.click(1);
        forward(&plot_rx, &mut panel);
        assert!(!panel.highlight().locked().contains(&1));
    }

    #[test]
    fn test_duplicate_envelope_is_idempotent() {
        let (mut plot, plot_rx) = surface(SurfaceRole::Plot);
        let (mut tokens, _tokens_rx) = surface(SurfaceRole::Tokens);
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = std::sync::Arc::clone(&count);
        tokens
            .highlight_mut()
            .subscribe(move |_| {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });

        plot.hover(Some(1));
        let env = plot_rx.try_recv().unwrap();
        assert_eq!(tokens.handle_envelope(&env), Reaction::Redraw);
        let state = tokens.highlight().state();
        assert_eq!(tokens.handle_envelope(&env), Reaction::Nothing);
        assert_eq!(tokens.highlight().state(), state);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remote_content_path_requests_load() {
        let (mut a, a_rx) = surface(SurfaceRole::Plot);
        let (mut b, _b_rx) = surface(SurfaceRole::Detail);
        a.load_content("/runs/x", meta());
        assert_eq!(
            forward(&a_rx, &mut b),
            vec![Reaction::LoadContent("/runs/x".into())]
        );
    }

    #[test]
    fn test_filters_and_backend_commands() {
        let (mut s, _rx) = surface(SurfaceRole::Plot);
        let focus: Envelope = serde_json::from_value(json!({
            "command": "focusModeSwitch",
            "data": {"isFocusMode": true, "focusIndices": [0]}
        }))
        .unwrap();
        assert_eq!(s.handle_envelope(&focus), Reaction::Redraw);
        assert!(s.filter().focus.is_some());

        let calc: Envelope = serde_json::from_value(json!({
            "command": "calculateEvents",
            "data": {"epoch": 2, "eventTypes": ["PredictionFlip"]}
        }))
        .unwrap();
        assert!(matches!(s.handle_envelope(&calc), Reaction::Backend(Message::CalculateEvents(_))));

        let bogus: Envelope = serde_json::from_value(json!({"command": "nope"})).unwrap();
        assert_eq!(s.handle_envelope(&bogus), Reaction::Nothing);
        assert_eq!(s.sync_stats().dropped, 1);
    }

    #[test]
    fn test_prefetch_plan_follows_current_epoch() {
        let (mut s, _rx) = surface(SurfaceRole::Plot);
        s.load_content("/runs/a", meta());
        assert!(s.prefetch_plan().is_empty());
        s.switch_epoch(2);
        s.ingest_epoch(2, &payload());
        let epochs: Vec<EpochId> = s.prefetch_plan().iter().map(|t| t.epoch).collect();
        assert_eq!(epochs, vec![3, 1]);
    }

    #[test]
    fn test_adopt_entry_from_old_run_is_refused() {
        let old_meta = DatasetMeta {
            texts: vec!["OLD".into()],
            ..meta()
        };
        let mut builder = EpochCache::new();
        builder.reset_dataset(old_meta);
        let stale = builder.get_or_build(1, &payload());

        let (mut s, _rx) = surface(SurfaceRole::Plot);
        s.load_content(
            "/runs/new",
            DatasetMeta {
                texts: vec!["NEW".into()],
                ..meta()
            },
        );
        s.switch_epoch(1);
        assert!(s.adopt_entry(stale).is_none());
        assert!(s.cache().get(1).is_none());
        assert!(s.frame().is_none());
    }
}
