//! Epoch-independent description of a training run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::palette::LabelDictionary;
use crate::sample::EpochId;

/// Epoch-independent description of the loaded training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMeta {
    /// Epochs the backend can serve, in training order.
    #[serde(default)]
    pub available_epochs: Vec<EpochId>,
    #[serde(default)]
    pub labels: LabelDictionary,
    /// Per-sample text (token or caption), indexed by sample id.
    #[serde(default)]
    pub texts: Vec<String>,
    /// Named sample subsets such as `train` and `test`.
    #[serde(default)]
    pub index_sets: BTreeMap<String, Vec<usize>>,
}

impl DatasetMeta {
    pub fn text(&self, id: usize) -> &str {
        self.texts.get(id).map(String::as_str).unwrap_or("")
    }

    /// The epoch before `epoch` in training order.
    ///
    /// Falls back to `epoch - 1` when `epoch` is not in the available list.
    pub fn previous_epoch(&self, epoch: EpochId) -> Option<EpochId> {
        match self.available_epochs.iter().position(|e| *e == epoch) {
            Some(0) => None,
            Some(pos) => Some(self.available_epochs[pos - 1]),
            None => epoch.checked_sub(1),
        }
    }

    /// Epochs within `radius` positions of `epoch` in training order, nearest first.
    pub fn neighbors_of(&self, epoch: EpochId, radius: u32) -> Vec<EpochId> {
        let mut out = Vec::new();
        match self.available_epochs.iter().position(|e| *e == epoch) {
            Some(pos) => {
                for step in 1..=radius as usize {
                    if let Some(e) = self.available_epochs.get(pos + step) {
                        out.push(*e);
                    }
                    if let Some(i) = pos.checked_sub(step) {
                        out.push(self.available_epochs[i]);
                    }
                }
            }
            None => {
                for step in 1..=radius {
                    if let Some(e) = epoch.checked_add(step) {
                        out.push(e);
                    }
                    if let Some(e) = epoch.checked_sub(step) {
                        out.push(e);
                    }
                }
            }
        }
        out
    }

    /// Epochs from the first available up to and including `epoch`.
    ///
    /// When `epoch` is not listed, only listed epochs below it precede it.
    pub fn epochs_through(&self, epoch: EpochId) -> Vec<EpochId> {
        let mut out: Vec<EpochId> = match self.available_epochs.iter().position(|e| *e == epoch) {
            Some(pos) => self.available_epochs[..pos].to_vec(),
            None => self
                .available_epochs
                .iter()
                .copied()
                .filter(|e| *e < epoch)
                .collect(),
        };
        out.push(epoch);
        out
    }
}
