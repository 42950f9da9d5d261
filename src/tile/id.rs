use std::fmt;
use std::sync::Arc;

/// Identity of one tile within a media's pyramid.
///
/// Level 0 is the coarsest level and holds a single tile covering the whole
/// image. Each further level doubles the resolution. Negative levels are only
/// meaningful as synthesis requests (the root tile scaled down).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileId {
    /// Media identity (local path, URL, or `dynamic:` name)
    pub media_id: Arc<str>,

    /// Pyramid level (0 = coarsest)
    pub level: i32,

    /// Tile row (0-indexed from top)
    pub row: u32,

    /// Tile column (0-indexed from left)
    pub col: u32,
}

impl TileId {
    pub fn new(media_id: impl Into<Arc<str>>, level: i32, row: u32, col: u32) -> Self {
        Self {
            media_id: media_id.into(),
            level,
            row,
            col,
        }
    }

    /// The `(0, 0, 0)` tile of a media.
    pub fn root(media_id: impl Into<Arc<str>>) -> Self {
        Self::new(media_id, 0, 0, 0)
    }

    /// The tile one level coarser that contains this one.
    pub fn parent(&self) -> Self {
        Self {
            media_id: Arc::clone(&self.media_id),
            level: self.level - 1,
            row: self.row / 2,
            col: self.col / 2,
        }
    }

    /// Another tile of the same media.
    pub fn sibling(&self, level: i32, row: u32, col: u32) -> Self {
        Self {
            media_id: Arc::clone(&self.media_id),
            level,
            row,
            col,
        }
    }

    pub fn media_id(&self) -> &str {
        &self.media_id
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.media_id, self.level, self.row, self.col
        )
    }
}
