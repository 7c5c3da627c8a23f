//! Per-surface view settings and sample filters.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::BASE_POINT_SIZE;
use crate::dataset::DatasetMeta;
use crate::epoch_cache::EpochCacheEntry;
use crate::neighbor_graph::NeighborKind;
use crate::search::SampleQuery;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewSettings {
    pub show_index: bool,
    pub show_label: bool,
    pub show_trail: bool,
    pub show_background: bool,
    pub reveal_original_neighbors: bool,
    pub reveal_projection_neighbors: bool,
    pub base_point_size: f64,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            show_index: false,
            show_label: true,
            show_trail: true,
            show_background: true,
            reveal_original_neighbors: true,
            reveal_projection_neighbors: true,
            base_point_size: BASE_POINT_SIZE,
        }
    }
}

impl ViewSettings {
    pub fn reveals(&self, kind: NeighborKind) -> bool {
        match kind {
            NeighborKind::OriginalSpace => self.reveal_original_neighbors,
            NeighborKind::ProjectionSpace => self.reveal_projection_neighbors,
        }
    }
}

/// Sample categories that can be forced into the highlighted set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HighlightCategory {
    Misclassified,
    PredictionFlip,
}

impl HighlightCategory {
    /// Accepts both the camelCase names and the snake_case names older
    /// surfaces send (`prediction_error`, `prediction_flip`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "misclassified" | "prediction_error" | "predictionError" => Some(Self::Misclassified),
            "predictionFlip" | "prediction_flip" => Some(Self::PredictionFlip),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ViewFilter {
    /// Enabled index-set names. `None` shows every sample.
    pub shown_data: Option<Vec<String>>,
    /// Focus mode ids. `None` when focus mode is off.
    pub focus: Option<BTreeSet<usize>>,
    pub highlight: BTreeSet<HighlightCategory>,
    pub search: Option<SampleQuery>,
}

impl ViewFilter {
    pub fn set_shown_data(&mut self, names: Vec<String>) {
        self.shown_data = Some(names);
    }

    pub fn set_focus(&mut self, enabled: bool, ids: impl IntoIterator<Item = usize>) {
        self.focus = enabled.then(|| ids.into_iter().collect());
    }

    /// Unknown category names are ignored.
    pub fn set_highlight<S: AsRef<str>>(&mut self, names: &[S]) {
        self.highlight = names
            .iter()
            .filter_map(|n| HighlightCategory::parse(n.as_ref()))
            .collect();
    }

    pub fn set_search(&mut self, query: &str) {
        let query = SampleQuery::parse(query);
        self.search = (!query.is_empty()).then_some(query);
    }

    /// Visibility for every sample of `entry`.
    ///
    /// A sample is visible if any enabled index set contains it (all samples
    /// when the dataset defines no index sets), it is in the focus set when
    /// focus mode is on, and it matches the search query.
    pub fn visibility(&self, entry: &EpochCacheEntry, meta: &DatasetMeta) -> Vec<bool> {
        let shown: Option<HashSet<usize>> = match &self.shown_data {
            Some(names) if !meta.index_sets.is_empty() => Some(
                names
                    .iter()
                    .filter_map(|n| meta.index_sets.get(n))
                    .flatten()
                    .copied()
                    .collect(),
            ),
            _ => None,
        };
        entry
            .samples
            .iter()
            .map(|s| {
                shown.as_ref().is_none_or(|set| set.contains(&s.id))
                    && self.focus.as_ref().is_none_or(|f| f.contains(&s.id))
                    && self.search.as_ref().is_none_or(|q| q.matches(s))
            })
            .collect()
    }

    /// Ids the enabled highlight categories add to the highlighted set.
    pub fn forced_highlights(&self, entry: &EpochCacheEntry) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for category in &self.highlight {
            match category {
                HighlightCategory::Misclassified => out.extend(entry.misclassified.iter().copied()),
                HighlightCategory::PredictionFlip => {
                    out.extend(entry.flipped_from_previous.iter().copied())
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::epoch_cache::build_entry;
    use crate::sample::RawEpochPayload;

    fn entry(n: usize) -> EpochCacheEntry {
        let payload = RawEpochPayload {
            projection: (0..n).map(|i| vec![i as f64, 0.0]).collect(),
            labels: vec![0; n],
            prediction_probabilities: (0..n)
                .map(|i| if i % 2 == 0 { vec![2.0, 0.0] } else { vec![0.0, 2.0] })
                .collect(),
            ..Default::default()
        };
        build_entry(1, 0, &payload, None, &Arc::new(DatasetMeta::default()), 3)
    }

    fn meta_with_sets() -> DatasetMeta {
        let mut meta = DatasetMeta::default();
        meta.index_sets.insert("train".into(), vec![0, 1]);
        meta.index_sets.insert("test".into(), vec![2, 3]);
        meta
    }

    #[test]
    fn test_default_filter_shows_everything() {
        let e = entry(4);
        assert_eq!(
            ViewFilter::default().visibility(&e, &meta_with_sets()),
            vec![true; 4]
        );
    }

    #[test]
    fn test_shown_data_index_sets() {
        let e = entry(4);
        let mut f = ViewFilter::default();
        f.set_shown_data(vec!["test".into()]);
        assert_eq!(f.visibility(&e, &meta_with_sets()), vec![false, false, true, true]);

        f.set_shown_data(vec![]);
        assert_eq!(f.visibility(&e, &meta_with_sets()), vec![false; 4]);
        // No index sets known: nothing to filter by.
        assert_eq!(f.visibility(&e, &DatasetMeta::default()), vec![true; 4]);
    }

    #[test]
    fn test_focus_and_search_combine() {
        let e = entry(4);
        let mut f = ViewFilter::default();
        f.set_focus(true, [1, 2, 3]);
        f.set_search("idx:0-2");
        assert_eq!(f.visibility(&e, &DatasetMeta::default()), vec![false, true, true, false]);

        f.set_focus(false, []);
        f.set_search("  ");
        assert!(f.search.is_none());
        assert_eq!(f.visibility(&e, &DatasetMeta::default()), vec![true; 4]);
    }

    #[test]
    fn test_forced_highlights() {
        let e = entry(4);
        let mut f = ViewFilter::default();
        assert!(f.forced_highlights(&e).is_empty());
        f.set_highlight(&["prediction_error", "bogus"]);
        assert_eq!(f.highlight.len(), 1);
        let ids: Vec<usize> = f.forced_highlights(&e).into_iter().collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let s: ViewSettings = serde_json::from_str(r#"{"showTrail": false}"#).unwrap();
        assert!(!s.show_trail);
        assert!(s.reveals(NeighborKind::OriginalSpace));
        assert_eq!(s.base_point_size, BASE_POINT_SIZE);
    }
}
