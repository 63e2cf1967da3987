//! Static world geometry: the tile grid, portals and lights of a room.

use std::sync::Arc;

use glam::DVec2;
use gloam_spatial::BoundingBox;
use serde::{Deserialize, Serialize};

use crate::assets::Texture;

/// World units per tile.
pub const TILE_SIZE: f64 = 0.2;

// ---------------------------------------------------------------------------
// Tile
// ---------------------------------------------------------------------------

/// An immutable tile type, shared by every cell that uses it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Drawn texture; `None` draws a flat fill.
    pub texture: Option<Texture>,
    /// Stops physical movement.
    pub blocking: bool,
    /// Casts shadow in the lighting mask.
    pub light_blocking: bool,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A rectangular grid of optional tiles indexed `[x][y]`, `y` growing upward.
///
/// Cells outside the grid, and empty cells, are passable.
#[derive(Debug, Clone)]
pub struct Room {
    name: String,
    width: usize,
    height: usize,
    tile_size: f64,
    side_scroller: bool,
    cells: Vec<Option<Arc<Tile>>>,
}

impl Room {
    /// An empty room of `width` x `height` tiles.
    pub fn new(
        name: impl Into<String>,
        width: usize,
        height: usize,
        tile_size: f64,
        side_scroller: bool,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            tile_size,
            side_scroller,
            cells: vec![None; width * height],
        }
    }

    /// Name the room was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width in tiles.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in tiles.
    pub fn height(&self) -> usize {
        self.height
    }

    /// World units per tile.
    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Whether gravity and jumping apply.
    pub fn is_side_scroller(&self) -> bool {
        self.side_scroller
    }

    fn index(&self, x: usize, y: usize) -> Option<usize> {
        (x < self.width && y < self.height).then(|| x * self.height + y)
    }

    /// The tile at a cell, if the cell is in range and filled.
    pub fn tile(&self, x: usize, y: usize) -> Option<&Tile> {
        self.index(x, y)
            .and_then(|i| self.cells[i].as_deref())
    }

    /// Fill or empty a cell. Returns `false` when the cell is out of range.
    pub fn set_tile(&mut self, x: usize, y: usize, tile: Option<Arc<Tile>>) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.cells[i] = tile;
                true
            }
            None => false,
        }
    }

    /// Whether the cell stops movement.
    pub fn is_blocking(&self, x: usize, y: usize) -> bool {
        self.tile(x, y).is_some_and(|t| t.blocking)
    }

    /// Whether the cell casts shadow.
    pub fn is_light_blocking(&self, x: usize, y: usize) -> bool {
        self.tile(x, y).is_some_and(|t| t.light_blocking)
    }

    /// The room's world-space extent, anchored at the origin.
    pub fn extent(&self) -> BoundingBox {
        BoundingBox::new(
            0.0,
            0.0,
            self.width as f64 * self.tile_size,
            self.height as f64 * self.tile_size,
        )
    }

    /// World-space box of a cell.
    pub fn tile_bounds(&self, x: usize, y: usize) -> BoundingBox {
        BoundingBox::new(
            x as f64 * self.tile_size,
            y as f64 * self.tile_size,
            self.tile_size,
            self.tile_size,
        )
    }

    /// Cells whose area touches `region`, clipped to the grid.
    pub fn cells_touching(
        &self,
        region: &BoundingBox,
    ) -> impl Iterator<Item = (usize, usize)> {
        let (x0, x1) = cell_span(region.left(), region.right(), self.tile_size, self.width);
        let (y0, y1) = cell_span(region.bottom(), region.top(), self.tile_size, self.height);
        (x0..x1).flat_map(move |x| (y0..y1).map(move |y| (x, y)))
    }

    /// Iterate every filled cell as `(x, y, tile)`.
    pub fn filled_cells(&self) -> impl Iterator<Item = (usize, usize, &Tile)> {
        let height = self.height;
        self.cells.iter().enumerate().filter_map(move |(i, cell)| {
            cell.as_deref().map(|tile| (i / height, i % height, tile))
        })
    }
}

/// Half-open cell range covering `[lo, hi]`, clipped to `0..count`.
fn cell_span(lo: f64, hi: f64, size: f64, count: usize) -> (usize, usize) {
    if !(lo.is_finite() && hi.is_finite()) || hi < 0.0 {
        return (0, 0);
    }
    let first = (lo / size).floor().max(0.0) as usize;
    let last = ((hi / size).floor() as usize).saturating_add(1).min(count);
    (first.min(last), last)
}

// ---------------------------------------------------------------------------
// Portal & Light
// ---------------------------------------------------------------------------

/// A region that moves the player to another room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portal {
    /// Trigger region in world units.
    pub bounds: BoundingBox,
    /// Name of the room to load.
    pub destination: String,
}

/// A point light, positioned in tile units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    /// Horizontal position, tiles.
    pub x: f64,
    /// Vertical position, tiles.
    pub y: f64,
    /// Linear RGB color.
    pub color: [f32; 3],
}

impl Light {
    /// World-space position for a given tile size.
    pub fn world_position(&self, tile_size: f64) -> DVec2 {
        DVec2::new(self.x * tile_size, self.y * tile_size)
    }
}
