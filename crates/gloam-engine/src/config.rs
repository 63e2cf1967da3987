//! Engine configuration.
//!
//! [`EngineConfig`] gathers every tunable constant of the runtime. Defaults
//! match the values the engine was tuned with; a configuration can also be
//! read from JSON, where any omitted field keeps its default:
//!
//! ```
//! use gloam_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "physics": { "gravity": 4.9 } }"#).unwrap();
//! assert_eq!(config.physics.gravity, 4.9);
//! assert_eq!(config.physics.max_step, 0.07);
//! ```

use serde::{Deserialize, Serialize};

use crate::room::TILE_SIZE;
use crate::ConfigError;

// ---------------------------------------------------------------------------
// PhysicsConfig
// ---------------------------------------------------------------------------

/// Constants of the per-entity physics step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Downward acceleration in side-scroller rooms, world units per s^2.
    pub gravity: f64,
    /// Per-axis clamp of one frame's displacement, world units. Must stay
    /// below one tile so the one-tile scan margin covers a whole step.
    pub max_step: f64,
    /// Horizontal deceleration of grounded movers, world units per s^2.
    pub friction: f64,
    /// Horizontal speeds below this snap to zero.
    pub friction_snap: f64,
    /// Horizontal inset applied to each side of a blocking tile's box.
    pub tile_inset: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            max_step: 0.07,
            friction: 4.0,
            friction_snap: 0.05,
            tile_inset: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// PlayerConfig
// ---------------------------------------------------------------------------

/// Input response of the player character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Walking speed, world units per second.
    pub walk_speed: f64,
    /// Upward velocity given by a jump in side-scroller rooms.
    pub jump_velocity: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            walk_speed: 0.75,
            jump_velocity: 2.4,
        }
    }
}

// ---------------------------------------------------------------------------
// LightingConfig
// ---------------------------------------------------------------------------

/// Resolution and tracing parameters of the lighting pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Pixels per tile of the world-space framebuffer.
    pub world_pixels_per_tile: u32,
    /// Pixels per tile of the screen-space framebuffer.
    pub screen_pixels_per_tile: u32,
    /// Camera zoom. The view spans `2 / scale` world units vertically.
    pub scale: f64,
    /// Side length N of the ray atlas; N^2 rays are traced per light.
    pub atlas_size: u32,
    /// Ray march step as a multiple of the smallest mask texel dimension.
    pub ray_step_texels: f32,
    /// Maximum trace distance in mask UV space.
    pub max_trace_radius: f32,
    /// Mask alpha above which a ray stops.
    pub opacity_threshold: f32,
    /// Lights farther than this from the camera focus are skipped, world units.
    pub cull_radius: f64,
    /// Depth a light penetrates surfaces flagged in the screen mask, tiles.
    pub surface_depth_tiles: f32,
    /// Fraction of the window the final copy overshoots on every edge.
    pub overscan: f32,
    /// Color of the accumulation buffer before lights are added.
    pub ambient: [f32; 3],
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            world_pixels_per_tile: 16,
            screen_pixels_per_tile: 32,
            scale: 1.0,
            atlas_size: 16,
            ray_step_texels: 4.0,
            max_trace_radius: 1.4,
            opacity_threshold: 0.2,
            cull_radius: 2.4,
            surface_depth_tiles: 1.0,
            overscan: 0.02,
            ambient: [0.0, 0.0, 0.0],
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// World units per tile.
    pub tile_size: f64,
    /// Physics step constants.
    pub physics: PhysicsConfig,
    /// Lighting pipeline parameters.
    pub lighting: LightingConfig,
    /// Player input response.
    pub player: PlayerConfig,
    /// Headless mode: frames never render, even when given a context.
    pub headless: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            physics: PhysicsConfig::default(),
            lighting: LightingConfig::default(),
            player: PlayerConfig::default(),
            headless: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("tile_size", self.tile_size)?;
        non_negative("physics.gravity", self.physics.gravity)?;
        positive("physics.max_step", self.physics.max_step)?;
        if self.physics.max_step >= self.tile_size {
            return Err(ConfigError::Invalid {
                field: "physics.max_step",
                value: self.physics.max_step,
            });
        }
        non_negative("physics.friction", self.physics.friction)?;
        non_negative("physics.friction_snap", self.physics.friction_snap)?;
        non_negative("physics.tile_inset", self.physics.tile_inset)?;
        if self.physics.tile_inset * 2.0 >= self.tile_size {
            return Err(ConfigError::Invalid {
                field: "physics.tile_inset",
                value: self.physics.tile_inset,
            });
        }
        non_negative("player.walk_speed", self.player.walk_speed)?;
        non_negative("player.jump_velocity", self.player.jump_velocity)?;

        let l = &self.lighting;
        positive("lighting.world_pixels_per_tile", l.world_pixels_per_tile as f64)?;
        positive("lighting.screen_pixels_per_tile", l.screen_pixels_per_tile as f64)?;
        positive("lighting.scale", l.scale)?;
        positive("lighting.atlas_size", l.atlas_size as f64)?;
        positive("lighting.ray_step_texels", l.ray_step_texels as f64)?;
        positive("lighting.max_trace_radius", l.max_trace_radius as f64)?;
        non_negative("lighting.opacity_threshold", l.opacity_threshold as f64)?;
        non_negative("lighting.cull_radius", l.cull_radius)?;
        non_negative("lighting.surface_depth_tiles", l.surface_depth_tiles as f64)?;
        non_negative("lighting.overscan", l.overscan as f64)?;
        for channel in l.ambient {
            non_negative("lighting.ambient", channel as f64)?;
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field, value })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn defaults_match_tuned_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.tile_size, 0.2);
        assert_eq!(config.physics.gravity, 9.8);
        assert_eq!(config.physics.max_step, 0.07);
        assert_eq!(config.physics.friction, 4.0);
        assert_eq!(config.physics.friction_snap, 0.05);
        assert_eq!(config.lighting.world_pixels_per_tile, 16);
        assert_eq!(config.lighting.screen_pixels_per_tile, 32);
        assert_eq!(config.lighting.atlas_size, 16);
    }

    #[test]
    fn json_overrides_keep_other_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "headless": true, "lighting": { "screen_pixels_per_tile": 8 } }"#,
        )
        .unwrap();
        assert!(config.headless);
        assert_eq!(config.lighting.screen_pixels_per_tile, 8);
        assert_eq!(config.lighting.world_pixels_per_tile, 16);
        assert_eq!(config.physics, PhysicsConfig::default());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = EngineConfig::from_json_str("{ physics: ").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn step_clamp_must_stay_below_a_tile() {
        let mut config = EngineConfig::default();
        config.physics.max_step = 0.2;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "physics.max_step",
                ..
            }
        ));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut config = EngineConfig::default();
        config.lighting.scale = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.physics.gravity = f64::INFINITY;
        assert!(config.validate().is_err());
    }
}
