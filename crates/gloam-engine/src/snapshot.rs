//! Serializable world state with BLAKE3 hashing.
//!
//! [`WorldSnapshot`] records the simulation-relevant state of a
//! [`GameWorld`]: the room's tile grid, every entity's physical state,
//! lights, portals and the visibility flag. Its `hash` is a BLAKE3 hex digest
//! of the canonical JSON encoding of everything else, so two worlds in the
//! same state hash equal.
//!
//! ```
//! use std::sync::Arc;
//! use gloam_engine::prelude::*;
//!
//! let mut map = image::RgbaImage::new(2, 3);
//! map.put_pixel(0, 0, image::Rgba([9, 9, 9, 255]));
//! map.put_pixel(0, 2, image::Rgba([9, 9, 9, 255]));
//! let assets = MemoryAssets::new().with_room("cell", "tile 0 untextured blocking\n", map);
//! let mut world = GameWorld::new(
//!     EngineConfig::default(),
//!     Arc::new(assets),
//!     Arc::new(Registry::new()),
//!     Arc::new(ManualClock::new()),
//! );
//!
//! world.load_room("cell").unwrap();
//! let first = world.capture_snapshot();
//! world.reset();
//! world.load_room("cell").unwrap();
//! assert_eq!(world.capture_snapshot().hash, first.hash);
//! assert_eq!(first.hash.len(), 64);
//! ```
//!
//! # What Is NOT Captured
//!
//! - **Behaviors and macros**: only a behavior's registered name is kept.
//! - **Textures**: tiles record their texture key, not pixels.
//! - **Timers and diagnostics**: per-entity clocks are transient.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId};
use crate::room::{Light, Portal, Room};
use crate::world::GameWorld;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// One filled cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSnapshot {
    /// Cell column.
    pub x: usize,
    /// Cell row, from the bottom.
    pub y: usize,
    /// Texture key, if textured.
    pub texture: Option<String>,
    /// Stops movement.
    pub blocking: bool,
    /// Casts shadow.
    pub light_blocking: bool,
}

/// The room grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub tile_size: f64,
    pub side_scroller: bool,
    /// Filled cells in column-major order.
    pub tiles: Vec<TileSnapshot>,
}

/// One entity's physical state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    /// `player`, `character` or `platform`.
    pub kind: String,
    /// Character name, for characters.
    pub name: Option<String>,
    pub position: DVec2,
    pub velocity: DVec2,
    pub size: DVec2,
    pub blocking: bool,
    pub is_static: bool,
    pub light_blocking: bool,
    /// Registered behavior name.
    pub behavior: Option<String>,
    /// Remaining health, for damageable characters.
    pub health: Option<f64>,
}

impl EntitySnapshot {
    fn capture(entity: &Entity) -> Self {
        let character = entity.character();
        Self {
            id: entity.id(),
            kind: entity.kind().label().to_string(),
            name: character.map(|c| c.name().to_string()),
            position: entity.position(),
            velocity: entity.velocity(),
            size: entity.size(),
            blocking: entity.is_blocking(),
            is_static: entity.is_static(),
            light_blocking: entity.is_light_blocking(),
            behavior: entity.behavior_name().map(str::to_string),
            health: character.and_then(|c| c.health()),
        }
    }
}

/// A serializable capture of a world's simulation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// The loaded room, if any.
    pub room: Option<RoomSnapshot>,
    /// Entities in spawn order.
    pub entities: Vec<EntitySnapshot>,
    pub lights: Vec<Light>,
    pub portals: Vec<Portal>,
    /// The player's id.
    pub player: Option<EntityId>,
    /// Whether frames run.
    pub visible: bool,
    /// Frames since the room was loaded.
    pub frame_count: u64,
    /// BLAKE3 hex digest (64 lowercase hex chars) of the fields above.
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HashableState<'a> {
    room: &'a Option<RoomSnapshot>,
    entities: &'a [EntitySnapshot],
    lights: &'a [Light],
    portals: &'a [Portal],
    player: Option<EntityId>,
    visible: bool,
    frame_count: u64,
}

fn compute_hash(state: &HashableState<'_>) -> String {
    // Non-finite floats serialize as null, so this cannot fail.
    let json_bytes =
        serde_json::to_vec(state).expect("WorldSnapshot state should always be JSON-serializable");
    blake3::hash(&json_bytes).to_hex().to_string()
}

impl WorldSnapshot {
    /// Recompute the digest from the snapshot's own fields.
    pub fn compute_hash(&self) -> String {
        compute_hash(&HashableState {
            room: &self.room,
            entities: &self.entities,
            lights: &self.lights,
            portals: &self.portals,
            player: self.player,
            visible: self.visible,
            frame_count: self.frame_count,
        })
    }

    /// Whether `hash` matches the contents.
    pub fn verify(&self) -> bool {
        self.compute_hash() == self.hash
    }
}

fn capture_room(room: &Room) -> RoomSnapshot {
    RoomSnapshot {
        name: room.name().to_string(),
        width: room.width(),
        height: room.height(),
        tile_size: room.tile_size(),
        side_scroller: room.is_side_scroller(),
        tiles: room
            .filled_cells()
            .map(|(x, y, tile)| TileSnapshot {
                x,
                y,
                texture: tile.texture.as_ref().map(|t| t.key().to_string()),
                blocking: tile.blocking,
                light_blocking: tile.light_blocking,
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// GameWorld snapshot methods
// ---------------------------------------------------------------------------

impl GameWorld {
    /// Capture the world's simulation state and its hash.
    pub fn capture_snapshot(&self) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot {
            room: self.room().map(capture_room),
            entities: self.entities().iter().map(EntitySnapshot::capture).collect(),
            lights: self.lights().to_vec(),
            portals: self.portals().to_vec(),
            player: self.player_id(),
            visible: self.is_visible(),
            frame_count: self.frame_count(),
            hash: String::new(),
        };
        snapshot.hash = snapshot.compute_hash();
        snapshot
    }

    /// Hash of the current state, without keeping the snapshot.
    pub fn state_hash(&self) -> String {
        self.capture_snapshot().hash
    }
}
