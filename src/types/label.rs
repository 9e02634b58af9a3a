//! Waste categories predicted by the classifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Waste category, in the order of the model's output vector.
///
/// Index `i` of the score vector corresponds to `WasteClass::ALL[i]`. The order
/// is fixed by the training run that produced the model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WasteClass {
    Battery,
    Biological,
    BrownGlass,
    Cardboard,
    Clothes,
    GreenGlass,
    Metal,
    Paper,
    Plastic,
    Shoes,
    Trash,
    WhiteGlass,
}

impl WasteClass {
    /// Number of classes the model must emit scores for
    pub const COUNT: usize = 12;

    /// All classes in model output order
    pub const ALL: [WasteClass; Self::COUNT] = [
        WasteClass::Battery,
        WasteClass::Biological,
        WasteClass::BrownGlass,
        WasteClass::Cardboard,
        WasteClass::Clothes,
        WasteClass::GreenGlass,
        WasteClass::Metal,
        WasteClass::Paper,
        WasteClass::Plastic,
        WasteClass::Shoes,
        WasteClass::Trash,
        WasteClass::WhiteGlass,
    ];

    /// Class for a model output index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Position of this class in the model output
    pub fn index(self) -> usize {
        self as usize
    }

    /// Label as stored and returned over HTTP
    pub fn as_str(self) -> &'static str {
        match self {
            WasteClass::Battery => "battery",
            WasteClass::Biological => "biological",
            WasteClass::BrownGlass => "brown-glass",
            WasteClass::Cardboard => "cardboard",
            WasteClass::Clothes => "clothes",
            WasteClass::GreenGlass => "green-glass",
            WasteClass::Metal => "metal",
            WasteClass::Paper => "paper",
            WasteClass::Plastic => "plastic",
            WasteClass::Shoes => "shoes",
            WasteClass::Trash => "trash",
            WasteClass::WhiteGlass => "white-glass",
        }
    }
}

impl fmt::Display for WasteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
