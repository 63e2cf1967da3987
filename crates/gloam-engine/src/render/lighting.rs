//! The multi-pass 2D lighting pipeline.
//!
//! One frame runs, in order:
//!
//! 1. a world-space pass drawing the whole room into a color attachment and a
//!    light-blocking mask,
//! 2. a screen-space pass drawing the camera's view (the presented copy) with
//!    every draw treated as light-blocking in its mask,
//! 3. per visible light, a ray pass marching rays through the world mask into
//!    a small atlas, then a shadow pass adding the light's contribution into
//!    an accumulation buffer,
//! 4. a composite of the accumulation buffer over the presented copy, and a
//!    final copy to the window.
//!
//! Framebuffers are created lazily and recreated when their size changes.

use glam::{DVec2, Mat4, Vec3};

use super::gfx::{BlendMode, DeviceRect, FramebufferId, GraphicsContext, ShaderKind, Uniform, UvRect};
use super::programs::names;
use super::renderer::{Matrices, RenderState, ScenePass};
use crate::config::LightingConfig;
use crate::room::Light;
use crate::GfxError;

/// Largest render target edge the pipeline will request.
const MAX_TARGET_PX: u32 = 8192;

// ---------------------------------------------------------------------------
// Pass accounting
// ---------------------------------------------------------------------------

/// The passes a frame issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Whole room into the world framebuffer.
    WorldMask,
    /// Camera view into the screen framebuffer.
    PresentedCopy,
    /// One light's rays into the atlas.
    RayTrace,
    /// One light's contribution into the accumulation buffer.
    Shadow,
    /// Accumulation over the presented copy.
    Composite,
    /// Composite to the window.
    Present,
}

/// What the last frame did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    pub world_mask: u32,
    pub presented_copy: u32,
    pub ray_trace: u32,
    pub shadow: u32,
    pub composite: u32,
    pub present: u32,
    /// Lights that received ray and shadow passes.
    pub lit_lights: u32,
    /// Lights skipped for being beyond the cull radius.
    pub culled_lights: u32,
    /// Blend used to combine the accumulation buffer with the presented copy.
    pub composite_blend: Option<BlendMode>,
}

impl PassStats {
    /// Passes of one kind.
    pub fn count(&self, kind: PassKind) -> u32 {
        match kind {
            PassKind::WorldMask => self.world_mask,
            PassKind::PresentedCopy => self.presented_copy,
            PassKind::RayTrace => self.ray_trace,
            PassKind::Shadow => self.shadow,
            PassKind::Composite => self.composite,
            PassKind::Present => self.present,
        }
    }

    fn counter(&mut self, kind: PassKind) -> &mut u32 {
        match kind {
            PassKind::WorldMask => &mut self.world_mask,
            PassKind::PresentedCopy => &mut self.presented_copy,
            PassKind::RayTrace => &mut self.ray_trace,
            PassKind::Shadow => &mut self.shadow,
            PassKind::Composite => &mut self.composite,
            PassKind::Present => &mut self.present,
        }
    }

    /// Total passes issued.
    pub fn total(&self) -> u32 {
        self.world_mask
            + self.presented_copy
            + self.ray_trace
            + self.shadow
            + self.composite
            + self.present
    }
}

/// Per-frame scene description.
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    /// Room size in tiles.
    pub room_tiles: (usize, usize),
    /// World units per tile.
    pub tile_size: f64,
    /// World point the camera centers on.
    pub focus: DVec2,
    /// Lights to render.
    pub lights: &'a [Light],
}

/// Called once for every pass issued.
pub type PassHook = Box<dyn FnMut(PassKind) + Send>;

// ---------------------------------------------------------------------------
// LightingPipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    id: FramebufferId,
    size: (u32, u32),
}

#[derive(Debug, Default)]
struct Targets {
    world: Option<Target>,
    screen: Option<Target>,
    accum: Option<Target>,
    composite: Option<Target>,
    atlas: Option<Target>,
}

/// Renders a lit frame through a [`GraphicsContext`].
pub struct LightingPipeline {
    config: LightingConfig,
    matrices: Matrices,
    state: RenderState,
    targets: Targets,
    stats: PassStats,
    hook: Option<PassHook>,
}

impl std::fmt::Debug for LightingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightingPipeline")
            .field("config", &self.config)
            .field("targets", &self.targets)
            .field("stats", &self.stats)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl LightingPipeline {
    /// A pipeline with no framebuffers allocated yet.
    pub fn new(config: LightingConfig) -> Self {
        Self {
            config,
            matrices: Matrices::new(),
            state: RenderState::new(),
            targets: Targets::default(),
            stats: PassStats::default(),
            hook: None,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    /// Change the screen resolution in pixels per tile. Framebuffers are
    /// resized on the next frame.
    pub fn set_screen_pixels_per_tile(&mut self, pixels: u32) {
        self.config.screen_pixels_per_tile = pixels.max(1);
    }

    /// Observe every pass as it is issued.
    pub fn set_pass_hook(&mut self, hook: impl FnMut(PassKind) + Send + 'static) {
        self.hook = Some(Box::new(hook));
    }

    /// Remove the pass hook.
    pub fn clear_pass_hook(&mut self) {
        self.hook = None;
    }

    /// Accounting for the most recent frame.
    pub fn last_stats(&self) -> &PassStats {
        &self.stats
    }

    /// The world-space framebuffer: attachment 0 color, attachment 1 mask.
    pub fn world_framebuffer(&self) -> Option<FramebufferId> {
        self.targets.world.map(|t| t.id)
    }

    /// The screen-space framebuffer holding the presented copy and its mask.
    pub fn screen_framebuffer(&self) -> Option<FramebufferId> {
        self.targets.screen.map(|t| t.id)
    }

    /// The light accumulation buffer.
    pub fn accumulation_framebuffer(&self) -> Option<FramebufferId> {
        self.targets.accum.map(|t| t.id)
    }

    /// The lit frame before it is copied to the window.
    pub fn composite_framebuffer(&self) -> Option<FramebufferId> {
        self.targets.composite.map(|t| t.id)
    }

    /// World framebuffer size for a room.
    pub fn world_resolution(&self, room_tiles: (usize, usize)) -> (u32, u32) {
        let ppt = self.config.world_pixels_per_tile.max(1) as usize;
        let edge = |tiles: usize| tiles.saturating_mul(ppt).clamp(1, MAX_TARGET_PX as usize) as u32;
        (edge(room_tiles.0), edge(room_tiles.1))
    }

    /// Screen framebuffer size: the view spans `2 / scale` world units
    /// vertically, widened by the window's aspect ratio, with each edge
    /// rounded down to a whole number of tile pairs.
    pub fn screen_resolution(&self, window: (u32, u32), tile_size: f64) -> (u32, u32) {
        let ppt = self.config.screen_pixels_per_tile.max(1);
        let unit = ppt.saturating_mul(2);
        let aspect = if window.1 == 0 {
            1.0
        } else {
            f64::from(window.0) / f64::from(window.1)
        };
        let height = 2.0 / self.config.scale / tile_size * f64::from(ppt);
        let width = height * aspect;
        (round_to_unit(width, unit), round_to_unit(height, unit))
    }

    /// Free every framebuffer, e.g. before switching contexts.
    pub fn release_framebuffers(&mut self, gfx: &mut dyn GraphicsContext) {
        let targets = std::mem::take(&mut self.targets);
        for target in [
            targets.world,
            targets.screen,
            targets.accum,
            targets.composite,
            targets.atlas,
        ]
        .into_iter()
        .flatten()
        {
            gfx.delete_framebuffer(target.id);
        }
        self.state.forget_uploads();
    }

    fn record(&mut self, kind: PassKind) {
        *self.stats.counter(kind) += 1;
        if let Some(hook) = self.hook.as_mut() {
            hook(kind);
        }
    }

    fn scene(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        render_task: &mut dyn FnMut(&mut ScenePass<'_>),
        light_block_override: bool,
    ) {
        gfx.set_blend(BlendMode::Alpha);
        self.state.invalidate_binding();
        self.state.set_light_block_override(light_block_override);
        let mut pass = ScenePass::new(gfx, &mut self.matrices, &mut self.state);
        render_task(&mut pass);
        self.state.set_light_block_override(false);
    }

    /// Render one frame. `render_task` is called once for the world pass and
    /// once for the screen pass and should draw the whole scene each time.
    pub fn perform(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        frame: &FrameInputs<'_>,
        render_task: &mut dyn FnMut(&mut ScenePass<'_>),
    ) -> Result<(), GfxError> {
        self.stats = PassStats::default();

        // -- 1. framebuffers ----------------------------------------------
        let world_size = self.world_resolution(frame.room_tiles);
        let screen_size = self.screen_resolution(gfx.window_size(), frame.tile_size);
        let n = self.config.atlas_size.clamp(1, MAX_TARGET_PX);
        let world = ensure(gfx, &mut self.targets.world, world_size, 2)?;
        let screen = ensure(gfx, &mut self.targets.screen, screen_size, 2)?;
        let accum = ensure(gfx, &mut self.targets.accum, screen_size, 1)?;
        let composite = ensure(gfx, &mut self.targets.composite, screen_size, 1)?;
        let atlas = ensure(gfx, &mut self.targets.atlas, (n, n), 1)?;

        let room = DVec2::new(
            (frame.room_tiles.0 as f64 * frame.tile_size).max(f64::EPSILON),
            (frame.room_tiles.1 as f64 * frame.tile_size).max(f64::EPSILON),
        );
        let px_per_world = f64::from(self.config.screen_pixels_per_tile.max(1)) / frame.tile_size;
        let focus = if frame.focus.is_finite() {
            (frame.focus * px_per_world).round() / px_per_world
        } else {
            DVec2::ZERO
        };
        let view = DVec2::new(f64::from(screen_size.0), f64::from(screen_size.1)) / px_per_world;
        let half = view / 2.0;

        // -- 2. world-space mask --------------------------------------------
        gfx.bind_framebuffer(world)?;
        gfx.clear([0.0; 4]);
        self.matrices.push_projection();
        self.matrices.push_model();
        self.matrices.projection = Matrices::orthographic(0.0, room.x as f32, 0.0, room.y as f32);
        self.matrices.model = Mat4::IDENTITY;
        self.scene(gfx, render_task, false);
        self.record(PassKind::WorldMask);

        // -- 3. screen-space presented copy ---------------------------------
        gfx.bind_framebuffer(screen)?;
        gfx.clear([0.0; 4]);
        self.matrices.projection = Matrices::orthographic(
            -half.x as f32,
            half.x as f32,
            -half.y as f32,
            half.y as f32,
        );
        self.matrices.model = Mat4::IDENTITY;
        self.matrices.translate(-focus.x as f32, -focus.y as f32);
        self.scene(gfx, render_task, true);
        self.matrices.pop_model();
        self.matrices.pop_projection();
        self.record(PassKind::PresentedCopy);

        // -- 4. lights ------------------------------------------------------
        gfx.bind_framebuffer(accum)?;
        if frame.lights.is_empty() {
            gfx.clear([0.0; 4]);
        } else {
            let [r, g, b] = self.config.ambient;
            gfx.clear([r, g, b, 1.0]);
        }

        let mask = gfx.attachment(world, 1)?;
        let rays = gfx.attachment(atlas, 0)?.flip(false, true);
        let screen_mask = gfx.attachment(screen, 1)?;
        let step = self.config.ray_step_texels
            * (1.0 / world_size.0 as f32).min(1.0 / world_size.1 as f32);
        let screen_to_mask = Mat4::from_scale(Vec3::new(
            (1.0 / room.x) as f32,
            (1.0 / room.y) as f32,
            1.0,
        )) * Mat4::from_translation(Vec3::new(
            (focus.x - half.x) as f32,
            (focus.y - half.y) as f32,
            0.0,
        )) * Mat4::from_scale(Vec3::new(view.x as f32, view.y as f32, 1.0));
        let longest_side = frame.room_tiles.0.max(frame.room_tiles.1).max(1) as f32;
        let surface_depth = self.config.surface_depth_tiles / longest_side;

        for light in frame.lights {
            let position = light.world_position(frame.tile_size);
            let distance = position.distance(focus);
            if distance.is_nan() || distance > self.config.cull_radius {
                self.stats.culled_lights += 1;
                tracing::trace!(x = light.x, y = light.y, distance, "light culled");
                continue;
            }
            let light_uv = [(position.x / room.x) as f32, (position.y / room.y) as f32];

            gfx.bind_framebuffer(atlas)?;
            gfx.set_blend(BlendMode::Replace);
            gfx.use_shader(ShaderKind::RayTrace);
            gfx.bind_texture(0, Some(mask));
            gfx.uniform(names::LIGHT, Uniform::Vec2(light_uv));
            gfx.uniform(names::STEP, Uniform::Float(step));
            gfx.uniform(names::MAX_RADIUS, Uniform::Float(self.config.max_trace_radius));
            gfx.uniform(names::THRESHOLD, Uniform::Float(self.config.opacity_threshold));
            gfx.uniform(names::ATLAS_SIZE, Uniform::Int(n as i32));
            gfx.draw_quad(DeviceRect::FULL, UvRect::FULL);
            self.record(PassKind::RayTrace);

            gfx.bind_framebuffer(accum)?;
            gfx.set_blend(BlendMode::Additive);
            gfx.use_shader(ShaderKind::Shadow);
            gfx.bind_texture(0, Some(rays));
            gfx.bind_texture(1, Some(screen_mask));
            gfx.uniform(names::LIGHT, Uniform::Vec2(light_uv));
            gfx.uniform(names::COLOR, Uniform::Vec3(light.color));
            gfx.uniform(names::SCREEN_TO_MASK, Uniform::Mat4(screen_to_mask));
            gfx.uniform(names::ATLAS_SIZE, Uniform::Int(n as i32));
            gfx.uniform(names::STEP, Uniform::Float(step));
            gfx.uniform(names::MAX_RADIUS, Uniform::Float(self.config.max_trace_radius));
            gfx.uniform(names::SURFACE_DEPTH, Uniform::Float(surface_depth));
            gfx.draw_quad(DeviceRect::FULL, UvRect::FULL);
            gfx.bind_texture(1, None);
            self.record(PassKind::Shadow);
            self.stats.lit_lights += 1;
        }

        // -- 5. composite and present ---------------------------------------
        let presented = gfx.attachment(screen, 0)?;
        let light_map = gfx.attachment(accum, 0)?;
        gfx.bind_framebuffer(composite)?;
        gfx.use_shader(ShaderKind::Copy);
        gfx.set_blend(BlendMode::Replace);
        gfx.bind_texture(0, Some(presented));
        gfx.draw_quad(DeviceRect::FULL, UvRect::FULL);
        let blend = if frame.lights.is_empty() {
            BlendMode::Alpha
        } else {
            BlendMode::Multiply
        };
        gfx.set_blend(blend);
        gfx.bind_texture(0, Some(light_map));
        gfx.draw_quad(DeviceRect::FULL, UvRect::FULL);
        self.stats.composite_blend = Some(blend);
        self.record(PassKind::Composite);

        let lit = gfx.attachment(composite, 0)?;
        gfx.release_framebuffer();
        gfx.set_blend(BlendMode::Replace);
        gfx.bind_texture(0, Some(lit));
        gfx.draw_quad(DeviceRect::overscan(self.config.overscan), UvRect::FULL);
        gfx.bind_texture(0, None);
        self.state.invalidate_binding();
        self.record(PassKind::Present);

        tracing::debug!(
            lit = self.stats.lit_lights,
            culled = self.stats.culled_lights,
            passes = self.stats.total(),
            "lighting frame"
        );
        Ok(())
    }
}

/// Return a framebuffer of `size`, reallocating the slot when it differs.
fn ensure(
    gfx: &mut dyn GraphicsContext,
    slot: &mut Option<Target>,
    size: (u32, u32),
    attachments: usize,
) -> Result<FramebufferId, GfxError> {
    if let Some(target) = *slot {
        if target.size == size && gfx.framebuffer_size(target.id).ok() == Some(size) {
            return Ok(target.id);
        }
        gfx.delete_framebuffer(target.id);
        tracing::debug!(from = ?target.size, to = ?size, "resizing framebuffer");
    }
    let id = gfx.create_framebuffer(size.0, size.1, attachments)?;
    *slot = Some(Target { id, size });
    Ok(id)
}

/// Round down to a positive multiple of `unit`.
fn round_to_unit(pixels: f64, unit: u32) -> u32 {
    let units = if pixels.is_finite() {
        (pixels / f64::from(unit) + 1e-9).floor()
    } else {
        1.0
    };
    let max_units = f64::from((MAX_TARGET_PX / unit).max(1));
    (units.clamp(1.0, max_units) as u32) * unit
}
