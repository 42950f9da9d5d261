//! Scene files: a saved arrangement of media on the zoomable canvas.
//!
//! The format is line based and tab separated. The first line holds the
//! scene's own zoom level and origin, every further line one object:
//!
//! ```text
//! 0.5	-120	40
//! TiledMediaObject	/home/user/scans/page%201.ppm	-1.25	10	20
//! TiledMediaObject	dynamic:fern	0	300	0
//! ```
//!
//! Media ids are percent-encoded so they never contain whitespace; `:` and
//! `/` are left readable.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use tracing::warn;

use crate::error::SceneError;
use crate::manager::TileManager;
use crate::store::PyramidMetadata;

/// Kind of media object placed in a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectKind {
    /// Image served as a tile pyramid
    Tiled,
    /// Text rendered by the front end
    String,
    /// Vector image rendered by the front end
    Svg,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Tiled => "TiledMediaObject",
            ObjectKind::String => "StringMediaObject",
            ObjectKind::Svg => "SVGMediaObject",
        }
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TiledMediaObject" => Ok(ObjectKind::Tiled),
            "StringMediaObject" => Ok(ObjectKind::String),
            "SVGMediaObject" => Ok(ObjectKind::Svg),
            other => Err(format!("unknown object kind '{}'", other)),
        }
    }
}

/// One media object and its placement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneObject {
    pub kind: ObjectKind,
    pub media_id: String,

    /// Zoom level relative to the scene's
    pub zoom_level: f64,

    /// Position relative to the scene origin
    pub x: f64,
    pub y: f64,
}

impl SceneObject {
    pub fn tiled(media_id: impl Into<String>, zoom_level: f64, x: f64, y: f64) -> Self {
        Self {
            kind: ObjectKind::Tiled,
            media_id: media_id.into(),
            zoom_level,
            x,
            y,
        }
    }
}

/// A scene object together with what the tile manager knows about its media.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedObject {
    pub object: SceneObject,

    /// Pyramid description, if the media is tiled or dynamic
    pub metadata: Option<PyramidMetadata>,

    /// On-screen `(width, height)` at the combined scene and object zoom
    pub size: Option<(f64, f64)>,
}

/// A collection of media objects and the camera looking at them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scene {
    pub zoom_level: f64,
    pub origin: (f64, f64),
    pub objects: Vec<SceneObject>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: SceneObject) {
        self.objects.push(object);
    }

    /// Parse a scene from its text form.
    ///
    /// Lines naming an unknown object kind are skipped with a warning.
    pub fn parse(text: &str) -> Result<Self, SceneError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(_, line)| !line.trim().is_empty());

        let Some((number, header)) = lines.next() else {
            return Err(SceneError::Parse {
                line: 1,
                message: "empty scene file".to_string(),
            });
        };
        let [zoom, ox, oy] = fields::<3>(number, header)?;
        let mut scene = Scene {
            zoom_level: number_field(number, zoom)?,
            origin: (number_field(number, ox)?, number_field(number, oy)?),
            objects: Vec::new(),
        };

        for (number, line) in lines {
            let [kind, media_id, zoom, x, y] = fields::<5>(number, line)?;
            let kind = match kind.parse::<ObjectKind>() {
                Ok(kind) => kind,
                Err(message) => {
                    warn!(line = number, "Skipping scene object: {}", message);
                    continue;
                }
            };
            let media_id = urlencoding::decode(media_id).map_err(|e| SceneError::Parse {
                line: number,
                message: format!("invalid media id encoding: {}", e),
            })?;

            scene.objects.push(SceneObject {
                kind,
                media_id: media_id.into_owned(),
                zoom_level: number_field(number, zoom)?,
                x: number_field(number, x)?,
                y: number_field(number, y)?,
            });
        }

        Ok(scene)
    }

    /// Read a scene file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| SceneError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// Write the scene to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        fs::write(path, self.to_string()).map_err(|e| SceneError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Attach media metadata and on-screen sizes using the tile manager.
    pub fn resolve(&self, manager: &TileManager) -> Vec<ResolvedObject> {
        self.resolve_with(|media_id| manager.metadata(media_id))
    }

    /// Like [`resolve`](Self::resolve) with an arbitrary metadata lookup.
    pub fn resolve_with<F>(&self, mut lookup: F) -> Vec<ResolvedObject>
    where
        F: FnMut(&str) -> Option<PyramidMetadata>,
    {
        self.objects
            .iter()
            .map(|object| {
                let metadata = match object.kind {
                    ObjectKind::Tiled => lookup(&object.media_id),
                    ObjectKind::String | ObjectKind::Svg => None,
                };
                let size = metadata
                    .as_ref()
                    .and_then(|meta| onscreen_size(meta, self.zoom_level + object.zoom_level));
                ResolvedObject {
                    object: object.clone(),
                    metadata,
                    size,
                }
            })
            .collect()
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}\t{}\t{}", self.zoom_level, self.origin.0, self.origin.1)?;
        for object in &self.objects {
            writeln!(
                f,
                "{}\t{}\t{}\t{}\t{}",
                object.kind.as_str(),
                encode_media_id(&object.media_id),
                object.zoom_level,
                object.x,
                object.y
            )?;
        }
        Ok(())
    }
}

/// On-screen size of a pyramid displayed at `zoom`.
///
/// At zoom 0 the long side of fixed-aspect media spans one tile; image
/// pyramids are shown at `2^(zoom - max_level)` of their pixel size.
pub fn onscreen_size(meta: &PyramidMetadata, zoom: f64) -> Option<(f64, f64)> {
    if let Some(ratio) = meta.aspect_ratio.filter(|r| *r > 0.0) {
        let side = 2f64.powf(zoom) * f64::from(meta.tile_size);
        return Some(if ratio >= 1.0 {
            (side, side / ratio)
        } else {
            (side * ratio, side)
        });
    }

    let (width, height) = (meta.width?, meta.height?);
    if width == 0 || height == 0 {
        return Some((0.0, 0.0));
    }
    let scale = 2f64.powf(zoom - f64::from(meta.max_level.unwrap_or(0)));
    Some((width as f64 * scale, height as f64 * scale))
}

fn encode_media_id(media_id: &str) -> String {
    urlencoding::encode(media_id)
        .replace("%3A", ":")
        .replace("%2F", "/")
}

fn fields<const N: usize>(number: usize, line: &str) -> Result<[&str; N], SceneError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    parts.try_into().map_err(|parts: Vec<&str>| SceneError::Parse {
        line: number,
        message: format!("expected {} fields, found {}", N, parts.len()),
    })
}

fn number_field(number: usize, field: &str) -> Result<f64, SceneError> {
    field.parse().map_err(|_| SceneError::Parse {
        line: number,
        message: format!("'{}' is not a number", field),
    })
}
