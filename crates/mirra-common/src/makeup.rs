//! Makeup parameter model: facial regions, colors, blend intensity.
//!
//! A [`ParameterSet`] always carries a color for every [`Region`]; there is no
//! way to build a partial set. [`Intensity`] is clamped to `[0, 1]` on every
//! construction path, including deserialization.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// A facial region the processing endpoint paints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Region {
    LipUpper,
    LipLower,
    EyebrowLeft,
    EyebrowRight,
    EyelinerLeft,
    EyelinerRight,
    EyeshadowLeft,
    EyeshadowRight,
    BlushLeft,
    BlushRight,
    Foundation,
}

impl Region {
    pub const COUNT: usize = 11;

    pub const ALL: [Region; Region::COUNT] = [
        Region::LipUpper,
        Region::LipLower,
        Region::EyebrowLeft,
        Region::EyebrowRight,
        Region::EyelinerLeft,
        Region::EyelinerRight,
        Region::EyeshadowLeft,
        Region::EyeshadowRight,
        Region::BlushLeft,
        Region::BlushRight,
        Region::Foundation,
    ];

    /// Wire key, e.g. `LIP_UPPER`.
    pub fn as_str(self) -> &'static str {
        match self {
            Region::LipUpper => "LIP_UPPER",
            Region::LipLower => "LIP_LOWER",
            Region::EyebrowLeft => "EYEBROW_LEFT",
            Region::EyebrowRight => "EYEBROW_RIGHT",
            Region::EyelinerLeft => "EYELINER_LEFT",
            Region::EyelinerRight => "EYELINER_RIGHT",
            Region::EyeshadowLeft => "EYESHADOW_LEFT",
            Region::EyeshadowRight => "EYESHADOW_RIGHT",
            Region::BlushLeft => "BLUSH_LEFT",
            Region::BlushRight => "BLUSH_RIGHT",
            Region::Foundation => "FOUNDATION",
        }
    }

    pub fn category(self) -> Category {
        match self {
            Region::LipUpper | Region::LipLower => Category::Lip,
            Region::EyebrowLeft | Region::EyebrowRight => Category::Eyebrow,
            Region::EyelinerLeft | Region::EyelinerRight => Category::Eyeliner,
            Region::EyeshadowLeft | Region::EyeshadowRight => Category::Eyeshadow,
            Region::BlushLeft | Region::BlushRight => Category::Blush,
            Region::Foundation => Category::Foundation,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing grouping of regions; picking a shade for a category paints
/// all of its regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Lipstick")]
    Lip,
    Eyebrow,
    Eyeliner,
    Eyeshadow,
    Blush,
    Foundation,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Lip,
        Category::Eyebrow,
        Category::Eyeliner,
        Category::Eyeshadow,
        Category::Blush,
        Category::Foundation,
    ];

    pub fn regions(self) -> &'static [Region] {
        match self {
            Category::Lip => &[Region::LipUpper, Region::LipLower],
            Category::Eyebrow => &[Region::EyebrowLeft, Region::EyebrowRight],
            Category::Eyeliner => &[Region::EyelinerLeft, Region::EyelinerRight],
            Category::Eyeshadow => &[Region::EyeshadowLeft, Region::EyeshadowRight],
            Category::Blush => &[Region::BlushLeft, Region::BlushRight],
            Category::Foundation => &[Region::Foundation],
        }
    }
}

/// An sRGB color, written on the wire as `#RRGGBB`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color([u8; 3]);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    pub fn channels(self) -> [u8; 3] {
        self.0
    }
}

impl FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| Error::invalid_parameter(format!("color {s:?} must start with '#'")))?;
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_parameter(format!(
                "color {s:?} is not a #RRGGBB triplet"
            )));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| Error::invalid_parameter(format!("color {s:?}: {e}")))
        };
        Ok(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl TryFrom<String> for Color {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02X}{g:02X}{b:02X}")
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Color({self})")
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Blend intensity of the makeup overlay, always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Intensity(f32);

impl Intensity {
    pub const DEFAULT: Intensity = Intensity(0.2);

    /// Clamps into `[0, 1]`; NaN becomes 0.
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for Intensity {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<f32> for Intensity {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl From<Intensity> for f32 {
    fn from(value: Intensity) -> Self {
        value.0
    }
}

/// Color for every region. Serializes as a map keyed by [`Region`] wire names.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ParameterSet {
    colors: [Color; Region::COUNT],
}

impl ParameterSet {
    /// Every region painted with the same color.
    pub fn uniform(color: Color) -> Self {
        Self {
            colors: [color; Region::COUNT],
        }
    }

    pub fn get(&self, region: Region) -> Color {
        self.colors[region.index()]
    }

    pub fn set(&mut self, region: Region, color: Color) {
        self.colors[region.index()] = color;
    }

    pub fn with(mut self, region: Region, color: Color) -> Self {
        self.set(region, color);
        self
    }

    /// Paints every region of `category`.
    pub fn set_category(&mut self, category: Category, color: Color) {
        for region in category.regions() {
            self.set(*region, color);
        }
    }

    /// Applies a suggested look to lips, eyeliner, eyeshadow and blush.
    /// Eyebrows and foundation are left untouched even when the suggestion
    /// carries them.
    pub fn apply_filter(&mut self, filter: &BeautifyFilter) {
        self.set_category(Category::Lip, filter.lipstick);
        self.set_category(Category::Eyeliner, filter.eyeliner);
        self.set_category(Category::Eyeshadow, filter.eyeshadow);
        self.set_category(Category::Blush, filter.blush);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Region, Color)> + '_ {
        Region::ALL.iter().map(move |r| (*r, self.get(*r)))
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        let lips = Color::rgb(0xAA, 0x0A, 0x1E);
        let brows = Color::rgb(0x3B, 0x2F, 0x2F);
        let liner = Color::rgb(0x00, 0x00, 0x00);
        let shadow = Color::rgb(0x66, 0x00, 0x33);
        let blush = Color::rgb(0xDF, 0x5B, 0x6F);
        let foundation = Color::rgb(0xF1, 0xE7, 0xD5);

        let mut set = Self::uniform(liner);
        set.set_category(Category::Lip, lips);
        set.set_category(Category::Eyebrow, brows);
        set.set_category(Category::Eyeliner, liner);
        set.set_category(Category::Eyeshadow, shadow);
        set.set_category(Category::Blush, blush);
        set.set_category(Category::Foundation, foundation);
        set
    }
}

impl fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl TryFrom<BTreeMap<Region, Color>> for ParameterSet {
    type Error = Error;

    fn try_from(map: BTreeMap<Region, Color>) -> Result<Self, Self::Error> {
        let mut set = Self::uniform(Color::rgb(0, 0, 0));
        for region in Region::ALL {
            let color = map.get(&region).ok_or_else(|| {
                Error::invalid_parameter(format!("parameter set is missing region {region}"))
            })?;
            set.set(region, *color);
        }
        Ok(set)
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Region::COUNT))?;
        for (region, color) in self.iter() {
            map.serialize_entry(&region, &color)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<Region, Color>::deserialize(deserializer)?;
        ParameterSet::try_from(raw).map_err(D::Error::custom)
    }
}

/// The full parameter payload pushed to the endpoint: colors plus intensity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeupParams {
    pub selected_makeup: ParameterSet,
    pub blend_intensity: Intensity,
}

/// A suggested look returned by still-image analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BeautifyFilter {
    pub lipstick: Color,
    pub eyeliner: Color,
    pub eyeshadow: Color,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eyebrow: Option<Color>,
    pub blush: Color,
    pub foundation: Color,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parse_normalizes_case() {
        let color: Color = "#aa0a1e".parse().expect("parse");
        assert_eq!(color, Color::rgb(0xAA, 0x0A, 0x1E));
        assert_eq!(color.to_string(), "#AA0A1E");
    }

    #[test]
    fn test_color_parse_rejects_malformed() {
        assert!("AA0A1E".parse::<Color>().is_err());
        assert!("#AA0A1".parse::<Color>().is_err());
        assert!("#GG0000".parse::<Color>().is_err());
        assert!("#AA0A1E00".parse::<Color>().is_err());
    }

    #[test]
    fn test_intensity_clamps() {
        assert_eq!(Intensity::new(1.7).get(), 1.0);
        assert_eq!(Intensity::new(-0.3).get(), 0.0);
        assert_eq!(Intensity::new(f32::NAN).get(), 0.0);
        assert_eq!(Intensity::new(0.6).get(), 0.6);
    }

    #[test]
    fn test_intensity_clamped_when_deserialized() {
        let params: Intensity = serde_json::from_str("3.5").expect("parse");
        assert_eq!(params.get(), 1.0);
    }

    #[test]
    fn test_default_set_covers_every_region() {
        let set = ParameterSet::default();
        let json = serde_json::to_value(set).expect("serialize");
        let obj = json.as_object().expect("object");
        assert_eq!(obj.len(), Region::COUNT);
        for region in Region::ALL {
            assert!(obj.contains_key(region.as_str()), "missing {region}");
        }
        assert_eq!(obj["LIP_UPPER"], "#AA0A1E");
        assert_eq!(obj["FOUNDATION"], "#F1E7D5");
    }

    #[test]
    fn test_partial_set_rejected() {
        let json = r##"{"LIP_UPPER":"#AA0A1E","LIP_LOWER":"#AA0A1E"}"##;
        let err = serde_json::from_str::<ParameterSet>(json).unwrap_err();
        assert!(err.to_string().contains("missing region"));
    }

    #[test]
    fn test_set_category_paints_all_regions() {
        let mut set = ParameterSet::default();
        let teal = Color::rgb(0x00, 0x80, 0x80);
        set.set_category(Category::Eyeshadow, teal);
        assert_eq!(set.get(Region::EyeshadowLeft), teal);
        assert_eq!(set.get(Region::EyeshadowRight), teal);
        assert_ne!(set.get(Region::EyelinerLeft), teal);
        for region in Category::Eyeshadow.regions() {
            assert_eq!(region.category(), Category::Eyeshadow);
        }
    }

    #[test]
    fn test_apply_filter_keeps_eyebrows_and_foundation() {
        let mut set = ParameterSet::default();
        let brows = set.get(Region::EyebrowLeft);
        let foundation = set.get(Region::Foundation);
        let filter = BeautifyFilter {
            lipstick: Color::rgb(0xFF, 0x69, 0xB4),
            eyeliner: Color::rgb(0x11, 0x11, 0x11),
            eyeshadow: Color::rgb(0x66, 0x00, 0x33),
            eyebrow: Some(Color::rgb(0x10, 0x10, 0x10)),
            blush: Color::rgb(0xFF, 0x14, 0x93),
            foundation: Color::rgb(0xFA, 0xFA, 0xD2),
        };
        set.apply_filter(&filter);
        assert_eq!(set.get(Region::LipLower), filter.lipstick);
        assert_eq!(set.get(Region::BlushRight), filter.blush);
        assert_eq!(set.get(Region::EyeshadowLeft), filter.eyeshadow);
        assert_eq!(set.get(Region::Foundation), foundation);
        assert_eq!(set.get(Region::EyebrowLeft), brows);
    }

    #[test]
    fn test_makeup_params_wire_keys() {
        let params = MakeupParams {
            selected_makeup: ParameterSet::default(),
            blend_intensity: Intensity::new(0.6),
        };
        let json = serde_json::to_value(params).expect("serialize");
        assert!(json.get("selectedMakeup").is_some());
        assert_eq!(json["blendIntensity"].as_f64().map(|v| v as f32), Some(0.6));
    }

    #[test]
    fn test_category_wire_name() {
        assert_eq!(
            serde_json::to_string(&Category::Lip).expect("serialize"),
            "\"Lipstick\""
        );
        let parsed: Category = serde_json::from_str("\"Foundation\"").expect("parse");
        assert_eq!(parsed, Category::Foundation);
    }
}
