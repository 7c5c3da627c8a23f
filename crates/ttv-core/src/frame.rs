//! Render-ready frame for one epoch on one surface.
//!
//! The renderer owns drawing and hit-testing; a frame only maps sample ids to
//! geometry, plus the neighbor segments touching the hovered or locked samples
//! and the motion trails of locked samples.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::BACKGROUND_PADDING;
use crate::epoch_cache::EpochCache;
use crate::highlight::{HighlightStateMachine, compute_display};
use crate::neighbor_graph::{EdgeStatus, NeighborEdge, NeighborKind};
use crate::palette::Rgb;
use crate::sample::{Bounds, EpochId};
use crate::view::{ViewFilter, ViewSettings};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointGeometry {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub color: Rgb,
    pub size: f64,
    pub alpha: f64,
    pub visible: bool,
    pub label: i64,
    pub predicted_label: i64,
    pub confidence: f64,
    /// Text label drawn next to the point, per the index/label settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSegment {
    pub from: usize,
    pub to: usize,
    pub kind: NeighborKind,
    /// Relative to the previous epoch; `None` when that epoch isn't cached.
    pub status: Option<EdgeStatus>,
    pub from_xy: [f64; 2],
    pub to_xy: [f64; 2],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailPoint {
    pub id: usize,
    pub epoch: EpochId,
    pub x: f64,
    pub y: f64,
    pub opacity: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFrame {
    pub epoch: EpochId,
    pub points: Vec<PointGeometry>,
    pub edges: Vec<EdgeSegment>,
    pub trails: Vec<TrailPoint>,
    pub highlighted: Vec<usize>,
    pub bounds: Bounds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

fn caption(settings: &ViewSettings, id: usize, label_name: &str) -> Option<String> {
    match (settings.show_index, settings.show_label && !label_name.is_empty()) {
        (true, true) => Some(format!("{id}: {label_name}")),
        (true, false) => Some(id.to_string()),
        (false, true) => Some(label_name.to_string()),
        (false, false) => None,
    }
}

/// Build the frame for `epoch`, or `None` if it isn't cached.
pub fn build_frame(
    cache: &EpochCache,
    epoch: EpochId,
    highlight: &HighlightStateMachine,
    settings: &ViewSettings,
    filter: &ViewFilter,
) -> Option<RenderFrame> {
    let entry = cache.get(epoch)?;
    let meta = cache.meta();

    let mut highlighted: BTreeSet<usize> = highlight.highlighted_set();
    highlighted.extend(filter.forced_highlights(&entry));
    let display = compute_display(entry.len(), &highlighted, settings.base_point_size);
    let visible = filter.visibility(&entry, meta);

    let points = entry
        .samples
        .iter()
        .map(|s| PointGeometry {
            id: s.id,
            x: s.x,
            y: s.y,
            color: meta.labels.color(s.label),
            size: display.sizes[s.id],
            alpha: display.alphas[s.id],
            visible: visible[s.id],
            label: s.label,
            predicted_label: s.predicted_label,
            confidence: s.confidence,
            caption: caption(settings, s.id, meta.labels.name(s.label)),
        })
        .collect();

    let mut anchors: BTreeSet<usize> = highlight.locked().clone();
    anchors.extend(highlight.hovered());
    let edges = if anchors.is_empty() {
        Vec::new()
    } else {
        // Disconnects come from the previous epoch but are drawn at current positions.
        let transitions: Vec<(NeighborEdge, Option<EdgeStatus>)> =
            match meta.previous_epoch(epoch).and_then(|p| cache.get(p)) {
                Some(prev) => entry
                    .edge_transitions(&prev)
                    .into_iter()
                    .map(|t| (t.edge, Some(t.status)))
                    .collect(),
                None => entry.edges().iter().map(|e| (*e, None)).collect(),
            };
        transitions
            .into_iter()
            .filter(|(edge, _)| {
                settings.reveals(edge.kind) && (anchors.contains(&edge.from) || anchors.contains(&edge.to))
            })
            .filter_map(|(edge, status)| {
                let from_xy = entry.position(edge.from)?;
                let to_xy = entry.position(edge.to)?;
                Some(EdgeSegment {
                    from: edge.from,
                    to: edge.to,
                    kind: edge.kind,
                    status,
                    from_xy: [from_xy.0, from_xy.1],
                    to_xy: [to_xy.0, to_xy.1],
                })
            })
            .collect()
    };

    let mut trails = Vec::new();
    if settings.show_trail && !highlight.locked().is_empty() {
        let epochs = meta.epochs_through(epoch);
        let n = epochs.len() as f64;
        for &id in highlight.locked() {
            for (i, e) in epochs.iter().enumerate() {
                let Some((x, y)) = cache.get(*e).and_then(|past| past.position(id)) else {
                    continue;
                };
                trails.push(TrailPoint {
                    id,
                    epoch: *e,
                    x,
                    y,
                    opacity: (i as f64 + 1.0) / n,
                });
            }
        }
    }

    Some(RenderFrame {
        epoch,
        points,
        edges,
        trails,
        highlighted: highlighted.into_iter().collect(),
        bounds: entry.bounds.padded(BACKGROUND_PADDING),
        background: entry
            .background_image
            .clone()
            .filter(|_| settings.show_background),
    })
}
