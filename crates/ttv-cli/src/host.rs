//! In-process host: routes envelopes between surfaces and feeds them epochs
//! from one shared cache.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use ttv_core::{
    BuildStart, DatasetMeta, EpochCache, EpochCacheEntry, EpochId, Envelope, IdleQueue, Message,
    PrefetchPlanner, PrefetchTask, Priority, Reaction, Scheduler, Surface, SurfaceId, SurfaceRole,
    Transport, ViewSettings,
};

use crate::backend::PayloadFetch;

// --- Shared cache ---

/// Epoch cache shared by every surface of a host.
///
/// Callers asking for the same epoch while it is being fetched wait for
/// that fetch instead of starting another.
#[derive(Clone, Default)]
pub struct SharedEpochCache {
    inner: Arc<SharedInner>,
}

#[derive(Default)]
struct SharedInner {
    cache: Mutex<EpochCache>,
    ready: Notify,
}

impl SharedEpochCache {
    pub fn new(cache: EpochCache) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                cache: Mutex::new(cache),
                ready: Notify::new(),
            }),
        }
    }

    /// New dataset. Builds still running will come back stale.
    pub async fn reset(&self, meta: DatasetMeta) {
        self.inner.cache.lock().await.reset_dataset(meta);
        self.inner.ready.notify_waiters();
    }

    pub async fn generation(&self) -> u64 {
        self.inner.cache.lock().await.generation()
    }

    #[cfg(test)]
    pub async fn build_count(&self) -> u64 {
        self.inner.cache.lock().await.build_count()
    }

    pub async fn get(&self, epoch: EpochId) -> Option<Arc<EpochCacheEntry>> {
        self.inner.cache.lock().await.get(epoch)
    }

    /// Cached entry for `epoch`, fetching and building it if needed.
    ///
    /// `Ok(None)` means the dataset changed while the payload was in flight.
    pub async fn get_or_fetch<F: PayloadFetch>(
        &self,
        epoch: EpochId,
        fetcher: &F,
    ) -> Result<Option<Arc<EpochCacheEntry>>> {
        loop {
            // Registered before the check so a wakeup between the two isn't lost.
            let notified = self.inner.ready.notified();
            let ticket = match self.inner.cache.lock().await.begin_build(epoch) {
                BuildStart::Cached(entry) => return Ok(Some(entry)),
                BuildStart::InFlight => None,
                BuildStart::Start(ticket) => Some(ticket),
            };
            let Some(ticket) = ticket else {
                debug!(epoch, "waiting for in-flight build");
                notified.await;
                continue;
            };

            let fetched = fetcher.fetch(epoch).await;
            let mut cache = self.inner.cache.lock().await;
            let result = match fetched {
                Ok(payload) => Ok(cache.finish_build(ticket, &payload).entry()),
                Err(e) => {
                    cache.abandon_build(ticket);
                    Err(e.context(format!("failed to fetch epoch {epoch}")))
                }
            };
            drop(cache);
            self.inner.ready.notify_waiters();
            return result;
        }
    }
}

/// Warm `tasks` in the background. Resolves to how many epochs were built or
/// already cached.
pub fn spawn_prefetch<F: PayloadFetch>(
    cache: SharedEpochCache,
    fetcher: Arc<F>,
    tasks: Vec<PrefetchTask>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut warmed = 0;
        for task in tasks {
            if cache.generation().await != task.generation {
                debug!(epoch = task.epoch, "skipping prefetch from an old dataset");
                continue;
            }
            match cache.get_or_fetch(task.epoch, fetcher.as_ref()).await {
                Ok(Some(_)) => warmed += 1,
                Ok(None) => {}
                Err(e) => warn!(epoch = task.epoch, "prefetch failed: {e:#}"),
            }
        }
        warmed
    })
}

// --- Routing ---

#[derive(Clone, Debug)]
pub struct Routed {
    pub from: SurfaceId,
    pub envelope: Envelope,
}

/// A surface's handle on the host's message bus.
#[derive(Clone, Debug)]
pub struct SurfaceOutbox {
    id: SurfaceId,
    tx: UnboundedSender<Routed>,
}

impl Transport for SurfaceOutbox {
    fn post(&self, envelope: Envelope) -> bool {
        self.tx
            .send(Routed {
                from: self.id,
                envelope,
            })
            .is_ok()
    }
}

pub type HostedSurface = Surface<SurfaceOutbox>;

pub struct Host {
    surfaces: Vec<HostedSurface>,
    tx: UnboundedSender<Routed>,
    rx: UnboundedReceiver<Routed>,
    cache: SharedEpochCache,
    content: Option<(String, DatasetMeta)>,
    settings: ViewSettings,
    planner: PrefetchPlanner,
    delivered: u64,
}

impl Host {
    pub fn new(cache: SharedEpochCache) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            surfaces: Vec::new(),
            tx,
            rx,
            cache,
            content: None,
            settings: ViewSettings::default(),
            planner: PrefetchPlanner::default(),
            delivered: 0,
        }
    }

    /// View settings and prefetch policy for surfaces added from now on.
    pub fn with_view(mut self, settings: ViewSettings, planner: PrefetchPlanner) -> Self {
        self.settings = settings;
        self.planner = planner;
        self
    }

    pub fn cache(&self) -> &SharedEpochCache {
        &self.cache
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn add_surface(&mut self, role: SurfaceRole) -> SurfaceId {
        let id = SurfaceId::new();
        let outbox = SurfaceOutbox {
            id,
            tx: self.tx.clone(),
        };
        let mut surface = Surface::new(role, outbox)
            .with_id(id)
            .with_settings(self.settings.clone())
            .with_planner(self.planner);
        surface
            .highlight_mut()
            .subscribe(move |change| tracing::trace!(surface = %id, ?change, "highlight changed"));
        if let Some((path, meta)) = &self.content {
            surface.load_content(path, meta.clone());
        }
        self.surfaces.push(surface);
        id
    }

    pub fn surfaces(&self) -> &[HostedSurface] {
        &self.surfaces
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&HostedSurface> {
        self.surfaces.iter().find(|s| s.id() == id)
    }

    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut HostedSurface> {
        self.surfaces.iter_mut().find(|s| s.id() == id)
    }

    /// Load a training run into the shared cache and every surface.
    pub async fn load_content(&mut self, path: &str, meta: DatasetMeta) {
        self.cache.reset(meta.clone()).await;
        for surface in &mut self.surfaces {
            surface.load_content(path, meta.clone());
        }
        self.content = Some((path.to_string(), meta));
    }

    /// Deliver queued envelopes until none are left.
    ///
    /// Each envelope reaches every surface except its sender. Returns the
    /// reactions that need the host's attention.
    pub fn pump(&mut self) -> Vec<(SurfaceId, Reaction)> {
        let mut reactions = Vec::new();
        while let Ok(Routed { from, envelope }) = self.rx.try_recv() {
            for surface in self.surfaces.iter_mut().filter(|s| s.id() != from) {
                self.delivered += 1;
                match surface.handle_envelope(&envelope) {
                    Reaction::Nothing | Reaction::Redraw => {}
                    reaction => reactions.push((surface.id(), reaction)),
                }
            }
        }
        reactions
    }

    /// Run a local interaction on one surface and settle everything it causes.
    pub async fn interact<F: PayloadFetch>(
        &mut self,
        id: SurfaceId,
        fetcher: &F,
        action: impl FnOnce(&mut HostedSurface) -> Reaction,
    ) -> Result<Vec<Message>> {
        let Some(surface) = self.surface_mut(id) else {
            anyhow::bail!("no surface {id}");
        };
        let reaction = action(surface);
        let mut backend_requests = Vec::new();
        self.react(id, reaction, fetcher, &mut backend_requests)
            .await?;
        backend_requests.extend(self.settle(fetcher).await?);
        Ok(backend_requests)
    }

    /// Pump until quiet, serving epoch and content requests on the way.
    /// Returns commands meant for the backend.
    pub async fn settle<F: PayloadFetch>(&mut self, fetcher: &F) -> Result<Vec<Message>> {
        let mut backend_requests = Vec::new();
        loop {
            let reactions = self.pump();
            if reactions.is_empty() {
                return Ok(backend_requests);
            }
            for (id, reaction) in reactions {
                self.react(id, reaction, fetcher, &mut backend_requests)
                    .await?;
            }
        }
    }

    async fn react<F: PayloadFetch>(
        &mut self,
        id: SurfaceId,
        reaction: Reaction,
        fetcher: &F,
        backend_requests: &mut Vec<Message>,
    ) -> Result<()> {
        match reaction {
            Reaction::Nothing | Reaction::Redraw => {}
            Reaction::NeedEpoch(epoch) => self.provide_epoch(id, epoch, fetcher).await?,
            Reaction::LoadContent(path) => match &self.content {
                Some((loaded, meta)) if *loaded == path => {
                    let meta = meta.clone();
                    if let Some(surface) = self.surface_mut(id) {
                        surface.load_content(&path, meta);
                    }
                }
                _ => warn!(surface = %id, path = %path, "surface asked for content the host has not loaded"),
            },
            Reaction::Backend(message) => backend_requests.push(message),
        }
        Ok(())
    }

    async fn provide_epoch<F: PayloadFetch>(&mut self, id: SurfaceId, epoch: EpochId, fetcher: &F) -> Result<()> {
        let Some(entry) = self.cache.get_or_fetch(epoch, fetcher).await? else {
            return Ok(());
        };
        if let Some(surface) = self.surface_mut(id) {
            surface.adopt_entry(entry);
        }
        Ok(())
    }

    /// Start warming the epochs around what surface `id` shows.
    pub fn prefetch<F: PayloadFetch>(&self, id: SurfaceId, fetcher: Arc<F>) -> Option<JoinHandle<usize>> {
        let surface = self.surface(id)?;
        let mut queue = IdleQueue::new();
        for task in surface.prefetch_plan() {
            queue.schedule(task, Priority::Idle);
        }
        if queue.is_empty() {
            return None;
        }
        let mut tasks = Vec::new();
        queue.run(usize::MAX, |task| tasks.push(task));
        Some(spawn_prefetch(self.cache.clone(), fetcher, tasks))
    }

    /// Hand every surface the entries the shared cache already holds.
    pub async fn share_cached(&mut self) {
        for surface in &mut self.surfaces {
            for epoch in surface.cache().meta().available_epochs.clone() {
                if !surface.cache().is_cached(epoch)
                    && let Some(entry) = self.cache.get(epoch).await
                {
                    surface.adopt_entry(entry);
                }
            }
        }
    }
}
