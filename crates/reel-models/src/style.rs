//! Background style presets.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Named stylistic filters applied to the background track only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StylePreset {
    /// Black and white background (house look)
    #[default]
    Desaturate,
    /// Faded film look
    Vintage,
    /// Warm color balance
    Warm,
    /// Cool color balance
    Cool,
    /// High-contrast black and white
    Noir,
    /// Boosted saturation
    Vivid,
    /// Background passes through untouched
    None,
}

impl StylePreset {
    pub const ALL: &'static [StylePreset] = &[
        StylePreset::Desaturate,
        StylePreset::Vintage,
        StylePreset::Warm,
        StylePreset::Cool,
        StylePreset::Noir,
        StylePreset::Vivid,
        StylePreset::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StylePreset::Desaturate => "desaturate",
            StylePreset::Vintage => "vintage",
            StylePreset::Warm => "warm",
            StylePreset::Cool => "cool",
            StylePreset::Noir => "noir",
            StylePreset::Vivid => "vivid",
            StylePreset::None => "none",
        }
    }

    /// Filter expression for the background chain.
    pub fn filter_expression(&self) -> &'static str {
        match self {
            StylePreset::Desaturate => "hue=s=0",
            StylePreset::Vintage => "curves=preset=vintage,vignette=PI/5",
            StylePreset::Warm => "colorbalance=rs=0.12:gs=0.02:bs=-0.12",
            StylePreset::Cool => "colorbalance=rs=-0.1:gs=0.0:bs=0.12",
            StylePreset::Noir => "hue=s=0,eq=contrast=1.4:brightness=-0.04",
            StylePreset::Vivid => "eq=saturation=1.6:contrast=1.1",
            StylePreset::None => "null",
        }
    }

    /// Resolve an optional job-level style key, falling back to the default.
    ///
    /// Returns the preset and whether the key was recognised.
    pub fn resolve(key: Option<&str>) -> (StylePreset, bool) {
        match key {
            None => (StylePreset::default(), true),
            Some(key) => match key.parse() {
                Ok(preset) => (preset, true),
                Err(_) => (StylePreset::default(), false),
            },
        }
    }
}

impl fmt::Display for StylePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StylePreset {
    type Err = StyleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "desaturate" | "bw" | "grayscale" => Ok(StylePreset::Desaturate),
            "vintage" => Ok(StylePreset::Vintage),
            "warm" => Ok(StylePreset::Warm),
            "cool" => Ok(StylePreset::Cool),
            "noir" => Ok(StylePreset::Noir),
            "vivid" => Ok(StylePreset::Vivid),
            "none" | "original" => Ok(StylePreset::None),
            _ => Err(StyleParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown style: {0}")]
pub struct StyleParseError(String);
