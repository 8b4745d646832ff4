//! Detection class registry.
//!
//! The label set is closed and fixed at compile time. Each class gets a random
//! display color the first time the color map is touched; the map is then
//! read-only for the rest of the process.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::OnceLock;

use crate::SimError;

pub const CLASS_LABELS: [&str; 40] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
];

pub const CLASS_COUNT: usize = CLASS_LABELS.len();

/// The first labels of the registry form the "common objects" subset.
pub const COMMON_CLASS_COUNT: usize = 10;

/// One label from the closed class set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DetectionClass(u8);

impl DetectionClass {
    /// Class at registry position `index`, if in range.
    pub fn from_index(index: usize) -> Option<Self> {
        (index < CLASS_COUNT).then_some(Self(index as u8))
    }

    /// Class at `index`, saturating at the last label.
    pub(crate) fn nth(index: usize) -> Self {
        Self(index.min(CLASS_COUNT - 1) as u8)
    }

    pub fn from_label(label: &str) -> anyhow::Result<Self> {
        CLASS_LABELS
            .iter()
            .position(|candidate| *candidate == label)
            .map(|index| Self(index as u8))
            .ok_or_else(|| SimError::not_found("class", label).into())
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn label(self) -> &'static str {
        CLASS_LABELS[self.index()]
    }

    /// True for the common-objects subset.
    pub fn is_common(self) -> bool {
        self.index() < COMMON_CLASS_COUNT
    }

    pub fn all() -> impl Iterator<Item = DetectionClass> {
        (0..CLASS_COUNT).map(|index| Self(index as u8))
    }
}

impl std::fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for DetectionClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for DetectionClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        DetectionClass::from_label(&label).map_err(serde::de::Error::custom)
    }
}

// ----------------------------------------------------------------------------
// Class colors
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// CSS color string, e.g. `rgb(12, 200, 45)`.
    pub fn css(&self) -> String {
        format!("rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.css())
    }
}

/// Per-class display colors. Unseeded, so colors differ between processes.
#[derive(Debug)]
pub struct ClassColorMap {
    colors: [Rgb; CLASS_COUNT],
}

impl ClassColorMap {
    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let colors = std::array::from_fn(|_| Rgb {
            // Never pure black or white.
            r: rng.gen_range(40..=230),
            g: rng.gen_range(40..=230),
            b: rng.gen_range(40..=230),
        });
        Self { colors }
    }

    pub fn get(&self, class: DetectionClass) -> Rgb {
        self.colors[class.index()]
    }
}

static CLASS_COLORS: OnceLock<ClassColorMap> = OnceLock::new();

/// Initialise the process-wide color map. Idempotent; later calls return the
/// map created by the first one.
pub fn init_class_colors() -> &'static ClassColorMap {
    CLASS_COLORS.get_or_init(|| {
        log::debug!("generated colors for {} detection classes", CLASS_COUNT);
        ClassColorMap::generate()
    })
}

/// Stable color for `class` for the lifetime of the process.
pub fn color_for(class: DetectionClass) -> Rgb {
    init_class_colors().get(class)
}
