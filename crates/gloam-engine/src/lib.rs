//! Gloam Engine -- tile-world simulation and dynamic 2D lighting.
//!
//! This crate builds on [`gloam_spatial`] to provide the per-frame runtime of
//! a small tile-based game: rooms loaded from a text descriptor plus a
//! tile-map image, entities with AABB physics against the tile grid and each
//! other, portals between rooms, and a multi-pass lighting pipeline that
//! traces per-light shadow rays through a light-blocking mask.
//!
//! The graphics device is a collaborator behind the
//! [`GraphicsContext`](render::gfx::GraphicsContext) trait. The crate ships a
//! CPU implementation, [`SoftwareContext`](render::software::SoftwareContext),
//! which runs the pipeline's shader programs per pixel and is what the tests
//! and the headless demo use.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use gloam_engine::prelude::*;
//!
//! // Palette row (tile 0 = grey) followed by a 4x3 grid with a floor.
//! let grey = image::Rgba([128, 128, 128, 255]);
//! let clear = image::Rgba([0, 0, 0, 0]);
//! let mut map = image::RgbaImage::from_pixel(4, 4, clear);
//! map.put_pixel(0, 0, grey);
//! for x in 0..4 {
//!     map.put_pixel(x, 3, grey);
//! }
//!
//! let assets = MemoryAssets::new().with_room(
//!     "hall",
//!     "game_type side_scroller\ntile 0 untextured blocking\nspawn player hero 1 1\n",
//!     map,
//! );
//! let clock = ManualClock::new();
//! let mut world = GameWorld::new(
//!     EngineConfig::default(),
//!     Arc::new(assets),
//!     Arc::new(Registry::new()),
//!     Arc::new(clock.clone()),
//! );
//!
//! world.load_room("hall").unwrap();
//! world.set_visible(true);
//! for _ in 0..30 {
//!     clock.advance(1.0 / 60.0);
//!     world.update(None, &InputState::default()).unwrap();
//! }
//!
//! // The player fell onto the floor and rests there.
//! let player = world.player().unwrap();
//! assert!(player.restrictions().down);
//! ```

#![deny(unsafe_code)]

pub mod assets;
pub mod clock;
pub mod config;
pub mod descriptor;
pub mod entity;
pub mod physics;
pub mod registry;
pub mod render;
pub mod room;
pub mod snapshot;
pub mod world;

use gloam_spatial::SpatialError;

use crate::render::gfx::FramebufferId;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the spatial crate for convenience.
pub use gloam_spatial;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while fetching room files and textures.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// No asset exists at the path.
    #[error("asset '{path}' not found")]
    NotFound {
        /// The requested asset path.
        path: String,
    },

    /// The asset exists but could not be read.
    #[error("failed to read asset '{path}': {source}")]
    Io {
        /// The requested asset path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The asset was read but is not a decodable image.
    #[error("failed to decode image '{path}': {source}")]
    Decode {
        /// The requested asset path.
        path: String,
        /// Underlying decoder failure.
        #[source]
        source: image::ImageError,
    },
}

/// Errors that abort a room load. No partial room is ever committed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A directive had the wrong shape or a malformed number.
    #[error("room '{room}' line {line}: {message}")]
    Parse {
        /// Room being loaded.
        room: String,
        /// 1-based descriptor line.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// `game_type` named something other than `top_down` / `side_scroller`.
    #[error("room '{room}' line {line}: unknown game type '{token}' (expected top_down or side_scroller)")]
    UnknownGameType {
        /// Room being loaded.
        room: String,
        /// 1-based descriptor line.
        line: usize,
        /// The unrecognized token.
        token: String,
    },

    /// A `tile` directive named an unknown blocking state.
    #[error("room '{room}' line {line}: unknown blocking state '{token}' (expected blocking, nonblocking or nlblocking)")]
    UnknownBlockingState {
        /// Room being loaded.
        room: String,
        /// 1-based descriptor line.
        line: usize,
        /// The unrecognized token.
        token: String,
    },

    /// The tile-map image does not have a palette row plus a grid.
    #[error("room '{room}': malformed tile map: {message}")]
    Tilemap {
        /// Room being loaded.
        room: String,
        /// What was wrong.
        message: String,
    },

    /// A room file could not be fetched.
    #[error("room '{room}': {source}")]
    Asset {
        /// Room being loaded.
        room: String,
        /// Underlying asset failure.
        #[source]
        source: AssetError,
    },

    /// The room extent could not back a spatial index.
    #[error("room '{room}': {source}")]
    Spatial {
        /// Room being loaded.
        room: String,
        /// Underlying spatial failure.
        #[source]
        source: SpatialError,
    },
}

/// Errors produced by name lookups in the [`Registry`](registry::Registry).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No behavior factory is registered under the name.
    #[error("behavior '{name}' is not registered. Registered behaviors: [{registered}]")]
    UnknownBehavior {
        /// Requested name.
        name: String,
        /// Comma-separated registered names.
        registered: String,
    },

    /// No macro is registered under the name.
    #[error("macro '{name}' is not registered. Registered macros: [{registered}]")]
    UnknownMacro {
        /// Requested name.
        name: String,
        /// Comma-separated registered names.
        registered: String,
    },
}

/// Errors produced by a graphics backend.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GfxError {
    /// The framebuffer id was never allocated or has been deleted.
    #[error("framebuffer {0:?} does not exist")]
    UnknownFramebuffer(FramebufferId),

    /// A color attachment index past the framebuffer's attachment count.
    #[error("framebuffer {framebuffer:?} has {count} attachment(s); index {index} is out of range")]
    AttachmentOutOfRange {
        /// The framebuffer queried.
        framebuffer: FramebufferId,
        /// Requested attachment index.
        index: usize,
        /// Number of attachments it has.
        count: usize,
    },

    /// A framebuffer with a zero dimension or no attachments was requested.
    #[error("invalid framebuffer shape {width}x{height} with {attachments} attachment(s)")]
    InvalidFramebuffer {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Requested attachment count.
        attachments: usize,
    },

    /// The backend has no texture or framebuffer id left to hand out.
    #[error("graphics resource ids exhausted")]
    ResourcesExhausted,
}

/// Errors produced while reading or validating [`EngineConfig`](config::EngineConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The JSON text did not parse into a configuration.
    #[error("invalid engine configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A numeric field is out of its valid range.
    #[error("configuration field '{field}' has invalid value {value}")]
    Invalid {
        /// Dotted field path, e.g. `physics.max_step`.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}

/// Errors that abort a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A portal transition failed to load its destination room. The previous
    /// room is still active.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The graphics backend rejected a lighting pass.
    #[error(transparent)]
    Gfx(#[from] GfxError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use gloam_spatial::prelude::*;

    pub use crate::assets::{Assets, DirAssets, MemoryAssets, Texture};
    pub use crate::clock::{DeltaTimer, ManualClock, SystemClock, TimeSource};
    pub use crate::config::{EngineConfig, LightingConfig, PhysicsConfig, PlayerConfig};
    pub use crate::descriptor::{BlockingState, GameType, RoomBlueprint};
    pub use crate::entity::{
        Attack, Behavior, BehaviorContext, Character, CharacterSprites, Entity, EntityId,
        EntityKind, Facing, InputState,
    };
    pub use crate::registry::Registry;
    pub use crate::render::gfx::{BlendMode, GraphicsContext, ShaderKind};
    pub use crate::render::lighting::{LightingPipeline, PassKind, PassStats};
    pub use crate::render::software::SoftwareContext;
    pub use crate::room::{Light, Portal, Room, Tile, TILE_SIZE};
    pub use crate::snapshot::WorldSnapshot;
    pub use crate::world::{FrameDiagnostics, GameWorld};
    pub use crate::{
        AssetError, ConfigError, FrameError, GfxError, LoadError, RegistryError,
    };
}
