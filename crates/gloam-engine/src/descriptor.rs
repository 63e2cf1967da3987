//! Room descriptor and tile-map parsing.
//!
//! A room is stored as two files: a line-oriented text descriptor and a
//! tile-map image. Both are parsed into a [`RoomBlueprint`] before the world
//! is touched, so a malformed room never replaces a working one.
//!
//! Descriptor directives (space separated, `#` starts a comment line):
//!
//! ```text
//! game_type {top_down|side_scroller}
//! tile <colorIndex> {<textureFile>|untextured} {blocking|nonblocking|nlblocking}
//! spawn player <charName> <tileX> <tileY>
//! spawn character <charName> <tileX> <tileY> [<behaviorName>]
//! spawn entity platform <x> <y> <length> [<behaviorName>]
//! portal <destRoom> <x> <y> <w> <h>
//! light <x> <y> <r> <g> <b>
//! run_macro <macroName>
//! ```
//!
//! The tile-map image's top row is the palette: the pixel in column `i` is
//! the color of tile index `i`. The rows below it are the grid, with the top
//! grid row at the highest `y`.

use std::collections::HashMap;
use std::str::FromStr;

use image::{Rgba, RgbaImage};

use crate::assets::Assets;
use crate::room::Light;
use crate::LoadError;

// ---------------------------------------------------------------------------
// Directive values
// ---------------------------------------------------------------------------

/// Whether a room has gravity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GameType {
    /// Free movement in four directions.
    #[default]
    TopDown,
    /// Gravity pulls down; the player jumps.
    SideScroller,
}

impl GameType {
    /// Whether gravity applies.
    pub fn is_side_scroller(self) -> bool {
        self == GameType::SideScroller
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "top_down" => Some(GameType::TopDown),
            "side_scroller" => Some(GameType::SideScroller),
            _ => None,
        }
    }
}

/// How a tile type interacts with movement and light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingState {
    /// Stops movement and casts shadow.
    Blocking,
    /// Neither.
    NonBlocking,
    /// Casts shadow but can be walked through.
    LightBlockingOnly,
}

impl BlockingState {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "blocking" => Some(BlockingState::Blocking),
            "nonblocking" => Some(BlockingState::NonBlocking),
            "nlblocking" => Some(BlockingState::LightBlockingOnly),
            _ => None,
        }
    }

    /// Stops movement.
    pub fn is_blocking(self) -> bool {
        matches!(self, BlockingState::Blocking)
    }

    /// Casts shadow.
    pub fn is_light_blocking(self) -> bool {
        matches!(self, BlockingState::Blocking | BlockingState::LightBlockingOnly)
    }
}

/// A `tile` directive.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSpec {
    /// Palette index the tile is drawn for.
    pub index: usize,
    /// Texture path, `None` for `untextured`.
    pub texture: Option<String>,
    /// Movement and light interaction.
    pub blocking: BlockingState,
}

/// A `spawn` directive. Coordinates are in tiles.
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnSpec {
    /// The player character.
    Player {
        /// Character name.
        name: String,
        /// Tile x.
        x: f64,
        /// Tile y.
        y: f64,
    },
    /// A non-player character.
    Character {
        /// Character name.
        name: String,
        /// Tile x.
        x: f64,
        /// Tile y.
        y: f64,
        /// Registered behavior to attach.
        behavior: Option<String>,
    },
    /// A platform slab.
    Platform {
        /// Tile x.
        x: f64,
        /// Tile y.
        y: f64,
        /// Width in tiles.
        length: f64,
        /// Registered behavior to attach.
        behavior: Option<String>,
    },
}

/// A `portal` directive. Coordinates are in tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalSpec {
    /// Room to load.
    pub destination: String,
    /// Left edge.
    pub x: f64,
    /// Bottom edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

/// Everything a descriptor file declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomDescriptor {
    /// Room physics mode. Defaults to top-down when not declared.
    pub game_type: GameType,
    /// Tile types by palette index.
    pub tiles: Vec<TileSpec>,
    /// Spawns in file order.
    pub spawns: Vec<SpawnSpec>,
    /// Portals in file order.
    pub portals: Vec<PortalSpec>,
    /// Lights in file order.
    pub lights: Vec<Light>,
    /// Macros to run after population, in file order.
    pub macros: Vec<String>,
}

// ---------------------------------------------------------------------------
// Descriptor parsing
// ---------------------------------------------------------------------------

struct Line<'a> {
    room: &'a str,
    number: usize,
    tokens: Vec<&'a str>,
}

impl<'a> Line<'a> {
    fn error(&self, message: impl Into<String>) -> LoadError {
        LoadError::Parse {
            room: self.room.to_string(),
            line: self.number,
            message: message.into(),
        }
    }

    /// Require between `min` and `max` arguments after the directive words.
    fn arity(&self, skip: usize, min: usize, max: usize, usage: &str) -> Result<(), LoadError> {
        let args = self.tokens.len().saturating_sub(skip);
        if args < min || args > max {
            return Err(self.error(format!("expected `{usage}`")));
        }
        Ok(())
    }

    fn word(&self, index: usize) -> &'a str {
        self.tokens.get(index).copied().unwrap_or_default()
    }

    fn optional(&self, index: usize) -> Option<String> {
        self.tokens.get(index).map(|t| t.to_string())
    }

    fn number<T: FromStr>(&self, index: usize, what: &str) -> Result<T, LoadError> {
        let token = self.word(index);
        token
            .parse()
            .map_err(|_| self.error(format!("{what} '{token}' is not a valid number")))
    }

    fn coordinate(&self, index: usize, what: &str) -> Result<f64, LoadError> {
        let value: f64 = self.number(index, what)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(self.error(format!("{what} '{}' is not finite", self.word(index))))
        }
    }

    /// A finite coordinate inside the room's positive quadrant.
    fn tile_coordinate(&self, index: usize, what: &str) -> Result<f64, LoadError> {
        let value = self.coordinate(index, what)?;
        if value < 0.0 {
            return Err(self.error(format!("{what} {value} must not be negative")));
        }
        Ok(value)
    }

    fn extent(&self, index: usize, what: &str) -> Result<f64, LoadError> {
        let value = self.coordinate(index, what)?;
        if value <= 0.0 {
            return Err(self.error(format!("{what} {value} must be positive")));
        }
        Ok(value)
    }
}

/// Parse a room descriptor.
///
/// Unknown directives are skipped with a warning. Unknown `game_type` or
/// blocking tokens, wrong argument counts and malformed numbers are errors.
pub fn parse_descriptor(room: &str, text: &str) -> Result<RoomDescriptor, LoadError> {
    parse_lines(room, text, None)
}

/// Parse a room descriptor whose tile map has a palette `palette_width`
/// columns wide. `tile` indices outside the palette are errors.
pub fn parse_descriptor_for_palette(
    room: &str,
    text: &str,
    palette_width: usize,
) -> Result<RoomDescriptor, LoadError> {
    parse_lines(room, text, Some(palette_width))
}

fn parse_lines(
    room: &str,
    text: &str,
    palette_width: Option<usize>,
) -> Result<RoomDescriptor, LoadError> {
    let mut descriptor = RoomDescriptor::default();
    let mut tile_slots: HashMap<usize, usize> = HashMap::new();

    for (i, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = Line {
            room,
            number: i + 1,
            tokens: trimmed.split_whitespace().collect(),
        };

        match line.word(0) {
            "game_type" => {
                line.arity(1, 1, 1, "game_type {top_down|side_scroller}")?;
                let token = line.word(1);
                descriptor.game_type =
                    GameType::from_token(token).ok_or_else(|| LoadError::UnknownGameType {
                        room: room.to_string(),
                        line: line.number,
                        token: token.to_string(),
                    })?;
            }
            "tile" => {
                line.arity(1, 3, 3, "tile <colorIndex> <texture|untextured> <blocking>")?;
                let index: usize = line.number(1, "color index")?;
                if let Some(width) = palette_width.filter(|&width| index >= width) {
                    return Err(line.error(format!(
                        "color index {index} is outside the {width}-column palette"
                    )));
                }
                let texture = match line.word(2) {
                    "untextured" => None,
                    path => Some(path.to_string()),
                };
                let token = line.word(3);
                let blocking = BlockingState::from_token(token).ok_or_else(|| {
                    LoadError::UnknownBlockingState {
                        room: room.to_string(),
                        line: line.number,
                        token: token.to_string(),
                    }
                })?;
                let spec = TileSpec {
                    index,
                    texture,
                    blocking,
                };
                if let Some(&slot) = tile_slots.get(&index) {
                    tracing::warn!(room, line = line.number, index, "tile index redefined; last definition wins");
                    descriptor.tiles[slot] = spec;
                } else {
                    tile_slots.insert(index, descriptor.tiles.len());
                    descriptor.tiles.push(spec);
                }
            }
            "spawn" => {
                if let Some(spawn) = parse_spawn(&line)? {
                    descriptor.spawns.push(spawn);
                }
            }
            "portal" => {
                line.arity(1, 5, 5, "portal <destRoom> <x> <y> <w> <h>")?;
                descriptor.portals.push(PortalSpec {
                    destination: line.word(1).to_string(),
                    x: line.tile_coordinate(2, "portal x")?,
                    y: line.tile_coordinate(3, "portal y")?,
                    width: line.extent(4, "portal width")?,
                    height: line.extent(5, "portal height")?,
                });
            }
            "light" => {
                line.arity(1, 5, 5, "light <x> <y> <r> <g> <b>")?;
                descriptor.lights.push(Light {
                    x: line.coordinate(1, "light x")?,
                    y: line.coordinate(2, "light y")?,
                    color: [
                        line.number(3, "red")?,
                        line.number(4, "green")?,
                        line.number(5, "blue")?,
                    ],
                });
            }
            "run_macro" => {
                line.arity(1, 1, 1, "run_macro <macroName>")?;
                descriptor.macros.push(line.word(1).to_string());
            }
            other => {
                tracing::warn!(room, line = line.number, directive = other, "unknown directive skipped");
            }
        }
    }

    Ok(descriptor)
}

fn parse_spawn(line: &Line<'_>) -> Result<Option<SpawnSpec>, LoadError> {
    match line.word(1) {
        "player" => {
            line.arity(2, 3, 3, "spawn player <charName> <tileX> <tileY>")?;
            Ok(Some(SpawnSpec::Player {
                name: line.word(2).to_string(),
                x: line.tile_coordinate(3, "spawn x")?,
                y: line.tile_coordinate(4, "spawn y")?,
            }))
        }
        "character" => {
            line.arity(
                2,
                3,
                4,
                "spawn character <charName> <tileX> <tileY> [<behaviorName>]",
            )?;
            Ok(Some(SpawnSpec::Character {
                name: line.word(2).to_string(),
                x: line.tile_coordinate(3, "spawn x")?,
                y: line.tile_coordinate(4, "spawn y")?,
                behavior: line.optional(5),
            }))
        }
        "entity" => match line.word(2) {
            "platform" => {
                line.arity(
                    3,
                    3,
                    4,
                    "spawn entity platform <x> <y> <length> [<behaviorName>]",
                )?;
                let length = line.extent(5, "platform length")?;
                Ok(Some(SpawnSpec::Platform {
                    x: line.tile_coordinate(3, "spawn x")?,
                    y: line.tile_coordinate(4, "spawn y")?,
                    length,
                    behavior: line.optional(6),
                }))
            }
            other => {
                tracing::warn!(
                    room = line.room,
                    line = line.number,
                    entity = other,
                    "unknown entity type skipped"
                );
                Ok(None)
            }
        },
        other => {
            tracing::warn!(
                room = line.room,
                line = line.number,
                spawn = other,
                "unknown spawn kind skipped"
            );
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tile map
// ---------------------------------------------------------------------------

/// Palette indices decoded from a tile-map image, indexed `[x][y]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    cells: Vec<Option<usize>>,
}

impl TileGrid {
    /// Width in tiles.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in tiles.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Palette index at a cell, `None` for empty or out-of-range cells.
    pub fn get(&self, x: usize, y: usize) -> Option<usize> {
        if x < self.width && y < self.height {
            self.cells[x * self.height + y]
        } else {
            None
        }
    }
}

/// Decode a tile-map image into palette indices.
///
/// Fully transparent palette pixels define nothing. Grid pixels that are
/// transparent or not in the palette are empty cells.
pub fn decode_tilemap(room: &str, image: &RgbaImage) -> Result<TileGrid, LoadError> {
    let (w, h) = image.dimensions();
    if w == 0 || h < 2 {
        return Err(LoadError::Tilemap {
            room: room.to_string(),
            message: format!(
                "image is {w}x{h}; it needs a palette row and at least one grid row"
            ),
        });
    }

    let mut palette: HashMap<Rgba<u8>, usize> = HashMap::new();
    for column in 0..w {
        let color = *image.get_pixel(column, 0);
        if color[3] == 0 {
            continue;
        }
        palette.entry(color).or_insert(column as usize);
    }

    let width = w as usize;
    let height = (h - 1) as usize;
    let mut cells = vec![None; width * height];
    for row in 1..h {
        let y = (h - 1 - row) as usize;
        for column in 0..w {
            let color = image.get_pixel(column, row);
            if color[3] == 0 {
                continue;
            }
            cells[column as usize * height + y] = palette.get(color).copied();
        }
    }

    Ok(TileGrid {
        width,
        height,
        cells,
    })
}

// ---------------------------------------------------------------------------
// RoomBlueprint
// ---------------------------------------------------------------------------

/// A fully parsed room, ready to be committed to a world.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomBlueprint {
    /// Room name.
    pub name: String,
    /// Parsed descriptor.
    pub descriptor: RoomDescriptor,
    /// Decoded tile grid.
    pub grid: TileGrid,
}

impl RoomBlueprint {
    /// Parse a room from its descriptor text and tile-map image.
    pub fn parse(room: &str, descriptor: &str, tilemap: &RgbaImage) -> Result<Self, LoadError> {
        let grid = decode_tilemap(room, tilemap)?;
        let descriptor = parse_descriptor_for_palette(room, descriptor, grid.width())?;
        Ok(Self {
            name: room.to_string(),
            descriptor,
            grid,
        })
    }

    /// Fetch and parse a room's files.
    pub fn fetch(assets: &dyn Assets, room: &str) -> Result<Self, LoadError> {
        let asset_error = |source| LoadError::Asset {
            room: room.to_string(),
            source,
        };
        let text = assets.room_descriptor(room).map_err(asset_error)?;
        let tilemap = assets.room_tilemap(room).map_err(asset_error)?;
        Self::parse(room, &text, &tilemap)
    }

    /// The `tile` directive for a palette index.
    pub fn tile_spec(&self, index: usize) -> Option<&TileSpec> {
        self.descriptor.tiles.iter().find(|t| t.index == index)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

    // -- 1. Directives -------------------------------------------------------

    #[test]
    fn parses_every_directive() {
        let text = "\
# the hub
game_type side_scroller
tile 0 tiles/stone.png blocking
tile 1 untextured nlblocking

spawn player hero 5 5
spawn character slime 2 3 wander
spawn entity platform 1 2 3 slide
portal cellar 0 0 1 2
light 4 4.5 1 0.8 0.5
run_macro decorate
";
        let d = parse_descriptor("hub", text).unwrap();
        assert_eq!(d.game_type, GameType::SideScroller);
        assert_eq!(d.tiles.len(), 2);
        assert_eq!(d.tiles[0].texture.as_deref(), Some("tiles/stone.png"));
        assert_eq!(d.tiles[1].texture, None);
        assert_eq!(d.tiles[1].blocking, BlockingState::LightBlockingOnly);
        assert_eq!(
            d.spawns,
            vec![
                SpawnSpec::Player {
                    name: "hero".into(),
                    x: 5.0,
                    y: 5.0
                },
                SpawnSpec::Character {
                    name: "slime".into(),
                    x: 2.0,
                    y: 3.0,
                    behavior: Some("wander".into())
                },
                SpawnSpec::Platform {
                    x: 1.0,
                    y: 2.0,
                    length: 3.0,
                    behavior: Some("slide".into())
                },
            ]
        );
        assert_eq!(d.portals[0].destination, "cellar");
        assert_eq!(d.portals[0].height, 2.0);
        assert_eq!(d.lights[0].color, [1.0, 0.8, 0.5]);
        assert_eq!(d.macros, vec!["decorate".to_string()]);
    }

    #[test]
    fn game_type_defaults_to_top_down() {
        let d = parse_descriptor("r", "tile 0 untextured blocking\n").unwrap();
        assert_eq!(d.game_type, GameType::TopDown);
    }

    #[test]
    fn blocking_tokens_map_to_flags() {
        assert!(BlockingState::Blocking.is_blocking());
        assert!(BlockingState::Blocking.is_light_blocking());
        assert!(!BlockingState::NonBlocking.is_blocking());
        assert!(!BlockingState::NonBlocking.is_light_blocking());
        assert!(!BlockingState::LightBlockingOnly.is_blocking());
        assert!(BlockingState::LightBlockingOnly.is_light_blocking());
    }

    #[test]
    fn redefined_tile_index_keeps_last() {
        let d = parse_descriptor(
            "r",
            "tile 0 untextured blocking\ntile 0 a.png nonblocking\n",
        )
        .unwrap();
        assert_eq!(d.tiles.len(), 1);
        assert_eq!(d.tiles[0].blocking, BlockingState::NonBlocking);
    }

    // -- 2. Errors -----------------------------------------------------------

    #[test]
    fn unknown_directive_is_skipped() {
        let d = parse_descriptor("r", "weather rain\nrun_macro m\n").unwrap();
        assert_eq!(d.macros, vec!["m".to_string()]);
    }

    #[test]
    fn unknown_game_type_is_fatal() {
        let err = parse_descriptor("r", "game_type isometric\n").unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnknownGameType { line: 1, ref token, .. } if token == "isometric"
        ));
    }

    #[test]
    fn unknown_blocking_state_is_fatal() {
        let err = parse_descriptor("r", "\ntile 0 untextured solid\n").unwrap_err();
        assert!(matches!(err, LoadError::UnknownBlockingState { line: 2, .. }));
    }

    #[test]
    fn malformed_number_is_fatal() {
        let err = parse_descriptor("r", "spawn player hero five 5\n").unwrap_err();
        match err {
            LoadError::Parse { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("five"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn wrong_argument_count_is_fatal() {
        assert!(parse_descriptor("r", "portal cellar 0 0 1\n").is_err());
        assert!(parse_descriptor("r", "light 1 1 1 1 1 1\n").is_err());
        assert!(parse_descriptor("r", "run_macro\n").is_err());
    }

    #[test]
    fn tile_index_must_fit_the_palette() {
        let text = "tile 0 untextured blocking\ntile 3 untextured blocking\n";
        assert!(parse_descriptor("r", text).is_ok());
        let err = parse_descriptor_for_palette("r", text, 3).unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 2, .. }), "got {err}");

        let huge = format!("tile {} untextured blocking\n", usize::MAX);
        assert!(matches!(
            parse_descriptor_for_palette("r", &huge, 3),
            Err(LoadError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn out_of_room_coordinates_are_fatal() {
        for text in [
            "spawn player hero -1 2\n",
            "spawn character slime 2 -0.5\n",
            "spawn entity platform -3 1 2\n",
            "spawn player hero inf 2\n",
            "portal cellar -1 0 1 1\n",
            "portal cellar 0 0 0 1\n",
            "portal cellar 0 0 1 NaN\n",
        ] {
            assert!(
                matches!(parse_descriptor("r", text), Err(LoadError::Parse { line: 1, .. })),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn unknown_entity_type_is_skipped() {
        let d = parse_descriptor("r", "spawn entity boulder 1 1 1\n").unwrap();
        assert!(d.spawns.is_empty());
    }

    // -- 3. Tile map ---------------------------------------------------------

    #[test]
    fn tilemap_rows_map_top_to_highest_y() {
        // Palette: index 0 red, index 1 transparent (unused), index 2 blue.
        let mut img = RgbaImage::from_pixel(3, 3, CLEAR);
        img.put_pixel(0, 0, RED);
        img.put_pixel(2, 0, BLUE);
        // Grid row 1 (top, y = 1): red at x=0.
        img.put_pixel(0, 1, RED);
        // Grid row 2 (bottom, y = 0): blue at x=2, unknown color at x=1.
        img.put_pixel(2, 2, BLUE);
        img.put_pixel(1, 2, Rgba([1, 2, 3, 255]));

        let grid = decode_tilemap("r", &img).unwrap();
        assert_eq!((grid.width(), grid.height()), (3, 2));
        assert_eq!(grid.get(0, 1), Some(0));
        assert_eq!(grid.get(2, 0), Some(2));
        assert_eq!(grid.get(1, 0), None);
        assert_eq!(grid.get(0, 0), None);
        assert_eq!(grid.get(5, 5), None);
    }

    #[test]
    fn tilemap_without_grid_rows_is_rejected() {
        let img = RgbaImage::from_pixel(4, 1, RED);
        assert!(matches!(
            decode_tilemap("r", &img),
            Err(LoadError::Tilemap { .. })
        ));
    }

    #[test]
    fn duplicate_palette_colors_resolve_to_first_column() {
        let mut img = RgbaImage::from_pixel(2, 2, CLEAR);
        img.put_pixel(0, 0, RED);
        img.put_pixel(1, 0, RED);
        img.put_pixel(1, 1, RED);
        let grid = decode_tilemap("r", &img).unwrap();
        assert_eq!(grid.get(1, 0), Some(0));
    }
}
