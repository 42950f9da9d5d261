//! Typed metadata records and pyramid geometry.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::StoreError;

/// Metadata keys written by the pyramid builder.
pub const KEY_TILE_SIZE: &str = "tilesize";
pub const KEY_FILE_EXT: &str = "filext";
pub const KEY_MAX_LEVEL: &str = "maxtilelevel";
pub const KEY_WIDTH: &str = "width";
pub const KEY_HEIGHT: &str = "height";
pub const KEY_ASPECT_RATIO: &str = "aspect_ratio";

// =============================================================================
// Metadata Value
// =============================================================================

/// A metadata value tagged with its type so it can round-trip through the
/// plain-text metadata file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl MetadataValue {
    /// Type tag written to the metadata file.
    pub fn type_name(&self) -> &'static str {
        match self {
            MetadataValue::Int(_) => "int",
            MetadataValue::Float(_) => "float",
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Str(_) => "string",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value as a float (integers are widened).
    pub fn as_float(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Format as one `key value typename` line.
    ///
    /// Strings are percent-encoded so they never contain whitespace.
    pub(crate) fn to_line(&self, key: &str) -> String {
        let value = match self {
            MetadataValue::Int(v) => v.to_string(),
            MetadataValue::Float(v) => v.to_string(),
            MetadataValue::Bool(v) => v.to_string(),
            MetadataValue::Str(v) => urlencoding::encode(v).into_owned(),
        };
        format!("{}\t{}\t{}\n", key, value, self.type_name())
    }

    /// Parse one `key value typename` line.
    ///
    /// Returns `Ok(None)` if the value does not parse as its declared type,
    /// in which case the key is ignored. Unknown type names keep the raw text.
    pub(crate) fn parse_line(line: &str) -> Result<Option<(String, MetadataValue)>, StoreError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [key, raw, type_name] = fields[..] else {
            return Err(StoreError::InvalidMetadata {
                line: line.to_string(),
            });
        };

        let value = match type_name {
            "int" | "long" => raw.parse().ok().map(MetadataValue::Int),
            "float" => raw.parse().ok().map(MetadataValue::Float),
            "bool" => match raw {
                "true" | "True" | "1" => Some(MetadataValue::Bool(true)),
                "false" | "False" | "0" => Some(MetadataValue::Bool(false)),
                _ => None,
            },
            "string" | "str" => urlencoding::decode(raw)
                .ok()
                .map(|s| MetadataValue::Str(s.into_owned())),
            _ => Some(MetadataValue::Str(raw.to_string())),
        };

        Ok(value.map(|v| (key.to_string(), v)))
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Int(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Bool(v) => write!(f, "{}", v),
            MetadataValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::Int(i64::from(v))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

// =============================================================================
// Pyramid Geometry
// =============================================================================

/// Smallest level such that `tile_size * 2^level >= max(width, height)`.
///
/// At that level the tiles have the same resolution as the source image.
pub fn max_tile_level(tile_size: u32, width: u64, height: u64) -> u32 {
    let tile_size = u64::from(tile_size.max(1));
    let max_dim = width.max(height);
    let mut level = 0;
    while tile_size << level < max_dim {
        level += 1;
    }
    level
}

/// Number of tiles covering a `width` x `height` image at `level`.
pub fn tiles_at_level(tile_size: u32, width: u64, height: u64, max_level: u32, level: u32) -> u64 {
    // side length of one tile measured in source pixels
    let span = u64::from(tile_size.max(1)) << (max_level - level.min(max_level));
    width.div_ceil(span) * height.div_ceil(span)
}

/// Total number of tiles in the pyramid, across all levels.
pub fn total_tile_count(tile_size: u32, width: u64, height: u64) -> u64 {
    let max_level = max_tile_level(tile_size, width, height);
    (0..=max_level)
        .map(|level| tiles_at_level(tile_size, width, height, max_level, level))
        .sum()
}

// =============================================================================
// Pyramid Metadata
// =============================================================================

/// Per-media description of a tile pyramid.
///
/// Pyramids built from images record their pixel dimensions and maximum
/// level. Procedural media have no fixed extent and declare an aspect ratio
/// instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidMetadata {
    /// Tile side length in pixels
    pub tile_size: u32,

    /// File extension (and codec) of stored tiles
    pub file_ext: String,

    /// Finest level holding source-resolution tiles
    pub max_level: Option<u32>,

    /// Source image width in pixels
    pub width: Option<u64>,

    /// Source image height in pixels
    pub height: Option<u64>,

    /// Fixed width / height ratio for media without pixel dimensions
    pub aspect_ratio: Option<f64>,
}

impl PyramidMetadata {
    /// Metadata for a pyramid built from a `width` x `height` image.
    pub fn for_image(tile_size: u32, file_ext: impl Into<String>, width: u64, height: u64) -> Self {
        Self {
            tile_size,
            file_ext: file_ext.into(),
            max_level: Some(max_tile_level(tile_size, width, height)),
            width: Some(width),
            height: Some(height),
            aspect_ratio: None,
        }
    }

    /// Metadata for procedurally generated media of unbounded depth.
    pub fn procedural(tile_size: u32, file_ext: impl Into<String>, aspect_ratio: f64) -> Self {
        Self {
            tile_size,
            file_ext: file_ext.into(),
            max_level: None,
            width: None,
            height: None,
            aspect_ratio: Some(aspect_ratio),
        }
    }

    /// Width / height ratio, from the fixed ratio or the pixel dimensions.
    pub fn aspect_ratio(&self) -> Option<f64> {
        match (self.aspect_ratio, self.width, self.height) {
            (Some(ratio), _, _) => Some(ratio),
            (None, Some(w), Some(h)) if h > 0 => Some(w as f64 / h as f64),
            _ => None,
        }
    }

    /// Largest valid `(row, col)` at `level`.
    pub fn rowcol_bound(&self, level: i32) -> (u32, u32) {
        if level <= 0 {
            return (0, 0);
        }
        let side = 2f64.powi(level);
        let clamp = |v: f64| v.max(0.0).min(f64::from(u32::MAX)) as u32;

        if let Some(ratio) = self.aspect_ratio {
            return if ratio >= 1.0 {
                (clamp((side / ratio).floor() - 1.0), clamp(side - 1.0))
            } else {
                (clamp(side - 1.0), clamp((side * ratio).floor() - 1.0))
            };
        }

        match (self.max_level, self.width, self.height) {
            (Some(max_level), Some(width), Some(height)) => {
                let tile_span =
                    f64::from(self.tile_size) * 2f64.powi(max_level as i32 - level);
                let row = ((height.saturating_sub(1)) as f64 / tile_span).floor();
                let col = ((width.saturating_sub(1)) as f64 / tile_span).floor();
                (clamp(row), clamp(col))
            }
            _ => (clamp(side - 1.0), clamp(side - 1.0)),
        }
    }

    /// Convert to the typed key/value map persisted by the tile store.
    pub fn to_values(&self) -> BTreeMap<String, MetadataValue> {
        let mut values = BTreeMap::new();
        values.insert(KEY_TILE_SIZE.to_string(), self.tile_size.into());
        values.insert(KEY_FILE_EXT.to_string(), self.file_ext.as_str().into());
        if let Some(level) = self.max_level {
            values.insert(KEY_MAX_LEVEL.to_string(), level.into());
        }
        if let Some(width) = self.width {
            values.insert(KEY_WIDTH.to_string(), MetadataValue::Int(width as i64));
        }
        if let Some(height) = self.height {
            values.insert(KEY_HEIGHT.to_string(), MetadataValue::Int(height as i64));
        }
        if let Some(ratio) = self.aspect_ratio {
            values.insert(KEY_ASPECT_RATIO.to_string(), ratio.into());
        }
        values
    }

    /// Rebuild from stored values; `None` unless tile size and extension are
    /// both present.
    pub fn from_values(values: &BTreeMap<String, MetadataValue>) -> Option<Self> {
        let non_negative = |key: &str| {
            values
                .get(key)
                .and_then(MetadataValue::as_int)
                .and_then(|v| u64::try_from(v).ok())
        };

        Some(Self {
            tile_size: non_negative(KEY_TILE_SIZE).and_then(|v| u32::try_from(v).ok())?,
            file_ext: values.get(KEY_FILE_EXT)?.as_str()?.to_string(),
            max_level: non_negative(KEY_MAX_LEVEL).and_then(|v| u32::try_from(v).ok()),
            width: non_negative(KEY_WIDTH),
            height: non_negative(KEY_HEIGHT),
            aspect_ratio: values.get(KEY_ASPECT_RATIO).and_then(MetadataValue::as_float),
        })
    }
}
