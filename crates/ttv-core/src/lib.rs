//! Training-dynamics visualizer core.
//!
//! Turns per-epoch backend payloads (2D projection, predictions, two kNN
//! relations) into render-ready structures, and keeps hover/selection state
//! consistent across independently running rendering surfaces by message
//! passing alone.
//!
//! Zero I/O. Fetching payloads, routing envelopes and drawing pixels belong
//! to the embedding host.

pub mod constants;
pub mod dataset;
pub mod epoch_cache;
pub mod frame;
pub mod highlight;
pub mod message;
pub mod neighbor_graph;
pub mod palette;
pub mod prefetch;
pub mod sample;
pub mod scheduler;
pub mod search;
pub mod surface;
pub mod sync;
pub mod view;

pub use constants::{
    BACKGROUND_PADDING, BASE_POINT_SIZE, COORD_PRECISION, DIM_ALPHA, HIGHLIGHT_SIZE_FACTOR,
    PREFETCH_RADIUS,
};
pub use dataset::DatasetMeta;
pub use epoch_cache::{BuildOutcome, BuildStart, BuildTicket, EpochCache, EpochCacheEntry, build_entry};
pub use frame::{EdgeSegment, PointGeometry, RenderFrame, TrailPoint, build_frame};
pub use highlight::{
    DisplayGeometry, HighlightChange, HighlightPhase, HighlightState, HighlightStateMachine,
    HighlightUpdate, ListenerId, ListenerRegistry, compute_display,
};
pub use message::{Command, Envelope, Message, ProtocolError};
pub use neighbor_graph::{EdgeKey, EdgeStatus, EdgeTransition, NeighborEdge, NeighborGraph, NeighborKind};
pub use palette::{LabelDictionary, Rgb};
pub use prefetch::{PrefetchPlanner, PrefetchTask};
pub use sample::{Bounds, EpochId, RawEpochPayload, Sample, null_as_default, predict, round_coord, softmax};
pub use scheduler::{IdleQueue, Priority, Scheduler};
pub use search::SampleQuery;
pub use surface::{Reaction, Surface, SurfaceId, SurfaceRole, SurfaceSnapshot};
pub use sync::{Inbound, SyncChannel, SyncKey, SyncStats, Transport};
pub use view::{HighlightCategory, ViewFilter, ViewSettings};
