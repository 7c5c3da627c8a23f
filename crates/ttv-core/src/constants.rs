/// Decimal places kept when rounding projected coordinates.
pub const COORD_PRECISION: u32 = 3;

/// Default rendered point size before any highlight scaling.
pub const BASE_POINT_SIZE: f64 = 20.0;

/// Size multiplier for highlighted points.
pub const HIGHLIGHT_SIZE_FACTOR: f64 = 1.5;

/// Alpha for points outside the highlighted set while a highlight is active.
pub const DIM_ALPHA: f64 = 0.2;

/// Alpha for highlighted points (and for everything when nothing is highlighted).
pub const FULL_ALPHA: f64 = 1.0;

/// Padding added around the projection bounds for the background overlay.
pub const BACKGROUND_PADDING: f64 = 0.5;

/// Plot scope used when an epoch has no samples: `[-10, 10]` on both axes.
pub const DEFAULT_SCOPE: f64 = 10.0;

/// Seed for fallback label colours when the backend sends no colour dictionary.
pub const COLOR_SEED: u64 = 12_345;

/// Number of epochs on either side of the active epoch that prefetch warms.
pub const PREFETCH_RADIUS: u32 = 1;
