//! Label names and colours.
//!
//! The backend may send a colour per label. Labels without one get a colour
//! from a generator seeded by the label value, so every surface paints the
//! same label the same way without coordinating.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::COLOR_SEED;

pub type Rgb = [u8; 3];

/// Colour for samples whose label is unknown.
pub const UNKNOWN_COLOR: Rgb = [0, 0, 0];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDictionary {
    #[serde(default)]
    pub names: BTreeMap<i64, String>,
    #[serde(default)]
    pub colors: BTreeMap<i64, Rgb>,
}

impl LabelDictionary {
    pub fn name(&self, label: i64) -> &str {
        self.names.get(&label).map(String::as_str).unwrap_or("")
    }

    /// Colour for `label`: dictionary entry, else a stable generated colour.
    pub fn color(&self, label: i64) -> Rgb {
        if let Some(c) = self.colors.get(&label) {
            return *c;
        }
        if label < 0 {
            return UNKNOWN_COLOR;
        }
        generated_color(label)
    }
}

fn generated_color(label: i64) -> Rgb {
    let mut rng = SmallRng::seed_from_u64(COLOR_SEED.wrapping_add(label as u64));
    [rng.random(), rng.random(), rng.random()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_color_wins() {
        let mut dict = LabelDictionary::default();
        dict.colors.insert(3, [10, 20, 30]);
        assert_eq!(dict.color(3), [10, 20, 30]);
    }

    #[test]
    fn test_generated_color_is_stable() {
        let a = LabelDictionary::default();
        let b = LabelDictionary::default();
        assert_eq!(a.color(7), b.color(7));
        assert_ne!(a.color(7), a.color(8));
    }

    #[test]
    fn test_unknown_label_is_black() {
        assert_eq!(LabelDictionary::default().color(-1), UNKNOWN_COLOR);
    }

    #[test]
    fn test_names_and_colors() {
        let mut dict = LabelDictionary::default();
        dict.names.insert(0, "cat".to_string());
        dict.colors.insert(0, [255, 0, 0]);
        assert_eq!(dict.name(0), "cat");
        assert_eq!(dict.name(1), "");
        assert_eq!(dict.color(0), [255, 0, 0]);
    }
}
