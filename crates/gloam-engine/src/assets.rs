//! Asset sources and texture views.
//!
//! The engine reads three kinds of files: a room's text descriptor, a room's
//! tile-map image, and sprite/tile textures. They are fetched through the
//! [`Assets`] trait so the runtime does not care whether they come from disk
//! ([`DirAssets`]) or were generated in memory ([`MemoryAssets`]).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::RgbaImage;

use crate::AssetError;

// ---------------------------------------------------------------------------
// Texture
// ---------------------------------------------------------------------------

/// A decoded image shared by every view of it.
struct TextureData {
    key: String,
    image: RgbaImage,
}

/// A view of a decoded image, optionally mirrored.
///
/// Views are cheap to clone; [`flip`](Texture::flip) returns a new view over
/// the same pixels. The `key` identifies the underlying image for upload
/// caches.
#[derive(Clone)]
pub struct Texture {
    data: Arc<TextureData>,
    flip_h: bool,
    flip_v: bool,
}

impl Texture {
    /// Wrap a decoded image under an identifying key (normally its path).
    pub fn new(key: impl Into<String>, image: RgbaImage) -> Self {
        Self {
            data: Arc::new(TextureData {
                key: key.into(),
                image,
            }),
            flip_h: false,
            flip_v: false,
        }
    }

    /// Identifier of the underlying image.
    pub fn key(&self) -> &str {
        &self.data.key
    }

    /// The unflipped pixels.
    pub fn image(&self) -> &RgbaImage {
        &self.data.image
    }

    /// Pixel width.
    pub fn width(&self) -> u32 {
        self.data.image.width()
    }

    /// Pixel height.
    pub fn height(&self) -> u32 {
        self.data.image.height()
    }

    /// A view mirrored on top of this one's current orientation.
    pub fn flip(&self, horizontal: bool, vertical: bool) -> Texture {
        Texture {
            data: Arc::clone(&self.data),
            flip_h: self.flip_h ^ horizontal,
            flip_v: self.flip_v ^ vertical,
        }
    }

    /// Whether this view is mirrored left-to-right.
    pub fn flipped_horizontally(&self) -> bool {
        self.flip_h
    }

    /// Whether this view is mirrored top-to-bottom.
    pub fn flipped_vertically(&self) -> bool {
        self.flip_v
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key() && self.flip_h == other.flip_h && self.flip_v == other.flip_v
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("key", &self.data.key)
            .field("size", &(self.width(), self.height()))
            .field("flip_h", &self.flip_h)
            .field("flip_v", &self.flip_v)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Assets trait
// ---------------------------------------------------------------------------

/// A source of room files and textures.
pub trait Assets: Send + Sync {
    /// The text descriptor of a room.
    fn room_descriptor(&self, room: &str) -> Result<String, AssetError>;

    /// The tile-map image of a room.
    fn room_tilemap(&self, room: &str) -> Result<RgbaImage, AssetError>;

    /// A texture by path. `Ok(None)` means the file does not exist, which
    /// callers may recover from; a file that exists but is unreadable is an
    /// error.
    fn texture(&self, path: &str) -> Result<Option<Texture>, AssetError>;
}

// ---------------------------------------------------------------------------
// DirAssets
// ---------------------------------------------------------------------------

/// Assets laid out under a directory:
///
/// ```text
/// <root>/worlds/<room>.txt    room descriptor
/// <root>/worlds/<room>.png    room tile map
/// <root>/<path>               textures
/// ```
///
/// Decoded textures are cached so every tile of a type shares one image.
pub struct DirAssets {
    root: PathBuf,
    cache: Mutex<HashMap<String, Texture>>,
}

impl DirAssets {
    /// Serve assets from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The directory assets are served from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn world_file(&self, room: &str, extension: &str) -> PathBuf {
        self.root.join("worlds").join(format!("{room}.{extension}"))
    }
}

fn decode(path: &Path) -> Result<RgbaImage, AssetError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(AssetError::NotFound { path: display });
    }
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| AssetError::Decode {
            path: display,
            source,
        })
}

impl Assets for DirAssets {
    fn room_descriptor(&self, room: &str) -> Result<String, AssetError> {
        let path = self.world_file(room, "txt");
        std::fs::read_to_string(&path).map_err(|source| {
            let path = path.display().to_string();
            if source.kind() == std::io::ErrorKind::NotFound {
                AssetError::NotFound { path }
            } else {
                AssetError::Io { path, source }
            }
        })
    }

    fn room_tilemap(&self, room: &str) -> Result<RgbaImage, AssetError> {
        decode(&self.world_file(room, "png"))
    }

    fn texture(&self, path: &str) -> Result<Option<Texture>, AssetError> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(texture) = cache.get(path) {
                return Ok(Some(texture.clone()));
            }
        }
        let full = self.root.join(path);
        if !full.exists() {
            return Ok(None);
        }
        let texture = Texture::new(path, decode(&full)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_string(), texture.clone());
        }
        Ok(Some(texture))
    }
}

// ---------------------------------------------------------------------------
// MemoryAssets
// ---------------------------------------------------------------------------

/// Assets held in memory, built up with the `with_*` methods.
#[derive(Default)]
pub struct MemoryAssets {
    descriptors: HashMap<String, String>,
    tilemaps: HashMap<String, RgbaImage>,
    textures: HashMap<String, Texture>,
}

impl MemoryAssets {
    /// An empty asset set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a room's descriptor and tile map.
    pub fn with_room(
        mut self,
        room: impl Into<String>,
        descriptor: impl Into<String>,
        tilemap: RgbaImage,
    ) -> Self {
        self.insert_room(room, descriptor, tilemap);
        self
    }

    /// Add (or replace) a texture under `path`.
    pub fn with_texture(mut self, path: impl Into<String>, image: RgbaImage) -> Self {
        self.insert_texture(path, image);
        self
    }

    /// In-place form of [`with_room`](MemoryAssets::with_room).
    pub fn insert_room(
        &mut self,
        room: impl Into<String>,
        descriptor: impl Into<String>,
        tilemap: RgbaImage,
    ) {
        let room = room.into();
        self.descriptors.insert(room.clone(), descriptor.into());
        self.tilemaps.insert(room, tilemap);
    }

    /// In-place form of [`with_texture`](MemoryAssets::with_texture).
    pub fn insert_texture(&mut self, path: impl Into<String>, image: RgbaImage) {
        let path = path.into();
        self.textures
            .insert(path.clone(), Texture::new(path, image));
    }
}

impl Assets for MemoryAssets {
    fn room_descriptor(&self, room: &str) -> Result<String, AssetError> {
        self.descriptors
            .get(room)
            .cloned()
            .ok_or_else(|| AssetError::NotFound {
                path: format!("worlds/{room}.txt"),
            })
    }

    fn room_tilemap(&self, room: &str) -> Result<RgbaImage, AssetError> {
        self.tilemaps
            .get(room)
            .cloned()
            .ok_or_else(|| AssetError::NotFound {
                path: format!("worlds/{room}.png"),
            })
    }

    fn texture(&self, path: &str) -> Result<Option<Texture>, AssetError> {
        Ok(self.textures.get(path).cloned())
    }
}
