//! CPU implementations of the pipeline's shader programs.
//!
//! A program is prepared once per draw from the current uniforms, then run
//! per fragment. Each fragment may write up to two color attachments; `None`
//! leaves that attachment untouched.

use std::collections::HashMap;
use std::f32::consts::TAU;

use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

use super::gfx::{ShaderKind, Uniform};

/// Uniform names shared between the pipeline and the programs.
pub(crate) mod names {
    pub const TEXTURED: &str = "u_textured";
    pub const TINT: &str = "u_tint";
    pub const LIGHT_BLOCKING: &str = "u_light_blocking";
    pub const LIGHT: &str = "u_light";
    pub const COLOR: &str = "u_color";
    pub const ATLAS_SIZE: &str = "u_atlas_size";
    pub const STEP: &str = "u_step";
    pub const MAX_RADIUS: &str = "u_max_radius";
    pub const THRESHOLD: &str = "u_threshold";
    pub const SCREEN_TO_MASK: &str = "u_screen_to_mask";
    pub const SURFACE_DEPTH: &str = "u_surface_depth";
}

/// Per-fragment inputs.
pub(crate) struct Fragment {
    /// Interpolated texture coordinate.
    pub uv: Vec2,
    /// Integer pixel coordinate in the target, origin bottom-left.
    pub coord: (u32, u32),
}

/// Texture lookups available to a program.
pub(crate) trait Sampler {
    /// Nearest-texel sample of the texture bound to `unit`; transparent
    /// black when nothing is bound.
    fn sample(&self, unit: u32, uv: Vec2) -> [f32; 4];
}

struct Uniforms<'a>(Option<&'a HashMap<String, Uniform>>);

impl Uniforms<'_> {
    fn get(&self, name: &str) -> Option<Uniform> {
        self.0.and_then(|m| m.get(name)).copied()
    }

    fn int(&self, name: &str, default: i32) -> i32 {
        match self.get(name) {
            Some(Uniform::Int(v)) => v,
            _ => default,
        }
    }

    fn float(&self, name: &str, default: f32) -> f32 {
        match self.get(name) {
            Some(Uniform::Float(v)) => v,
            _ => default,
        }
    }

    fn vec2(&self, name: &str) -> Vec2 {
        match self.get(name) {
            Some(Uniform::Vec2(v)) => Vec2::from(v),
            _ => Vec2::ZERO,
        }
    }

    fn vec3(&self, name: &str, default: [f32; 3]) -> [f32; 3] {
        match self.get(name) {
            Some(Uniform::Vec3(v)) => v,
            _ => default,
        }
    }

    fn vec4(&self, name: &str, default: [f32; 4]) -> [f32; 4] {
        match self.get(name) {
            Some(Uniform::Vec4(v)) => v,
            _ => default,
        }
    }

    fn mat4(&self, name: &str) -> Mat4 {
        match self.get(name) {
            Some(Uniform::Mat4(m)) => m,
            _ => Mat4::IDENTITY,
        }
    }
}

/// A program with its uniforms resolved.
pub(crate) enum Program {
    Standard {
        textured: bool,
        tint: [f32; 4],
        light_blocking: bool,
    },
    RayTrace {
        light: Vec2,
        atlas: u32,
        step: f32,
        max_radius: f32,
        threshold: f32,
    },
    Shadow {
        light: Vec2,
        color: [f32; 3],
        screen_to_mask: Mat4,
        atlas: u32,
        step: f32,
        max_radius: f32,
        surface_depth: f32,
    },
    Copy,
}

impl Program {
    pub(crate) fn prepare(kind: ShaderKind, uniforms: Option<&HashMap<String, Uniform>>) -> Self {
        let u = Uniforms(uniforms);
        match kind {
            ShaderKind::Standard => Program::Standard {
                textured: u.int(names::TEXTURED, 0) != 0,
                tint: u.vec4(names::TINT, [1.0; 4]),
                light_blocking: u.int(names::LIGHT_BLOCKING, 0) != 0,
            },
            ShaderKind::RayTrace => Program::RayTrace {
                light: u.vec2(names::LIGHT),
                atlas: u.int(names::ATLAS_SIZE, 16).max(1) as u32,
                step: u.float(names::STEP, 0.01).max(1e-4),
                max_radius: u.float(names::MAX_RADIUS, 1.4),
                threshold: u.float(names::THRESHOLD, 0.2),
            },
            ShaderKind::Shadow => Program::Shadow {
                light: u.vec2(names::LIGHT),
                color: u.vec3(names::COLOR, [1.0; 3]),
                screen_to_mask: u.mat4(names::SCREEN_TO_MASK),
                atlas: u.int(names::ATLAS_SIZE, 16).max(1) as u32,
                step: u.float(names::STEP, 0.01),
                max_radius: u.float(names::MAX_RADIUS, 1.4),
                surface_depth: u.float(names::SURFACE_DEPTH, 0.0),
            },
            ShaderKind::Copy => Program::Copy,
        }
    }

    pub(crate) fn shade(&self, frag: &Fragment, sampler: &dyn Sampler) -> [Option<[f32; 4]>; 2] {
        match *self {
            Program::Standard {
                textured,
                tint,
                light_blocking,
            } => {
                let texel = if textured {
                    sampler.sample(0, frag.uv)
                } else {
                    [1.0; 4]
                };
                let color = [
                    texel[0] * tint[0],
                    texel[1] * tint[1],
                    texel[2] * tint[2],
                    texel[3] * tint[3],
                ];
                let mask = if light_blocking {
                    [1.0, 1.0, 1.0, color[3]]
                } else {
                    [0.0; 4]
                };
                [Some(color), Some(mask)]
            }
            Program::RayTrace {
                light,
                atlas,
                step,
                max_radius,
                threshold,
            } => {
                let (x, y) = frag.coord;
                let row = atlas.saturating_sub(1).saturating_sub(y);
                let index = row * atlas + x;
                let angle = index as f32 / (atlas * atlas) as f32 * TAU;
                let dir = Vec2::new(angle.cos(), angle.sin());
                let reach = march(light, dir, step, max_radius, threshold, sampler);
                let hit = dir * reach;
                let encoded = [
                    0.5 + hit.x / (2.0 * max_radius),
                    0.5 + hit.y / (2.0 * max_radius),
                    0.0,
                    1.0,
                ];
                [Some(encoded), None]
            }
            Program::Shadow {
                light,
                color,
                screen_to_mask,
                atlas,
                step,
                max_radius,
                surface_depth,
            } => {
                let dark = [0.0; 4];
                let p = (screen_to_mask * Vec3::new(frag.uv.x, frag.uv.y, 0.0).extend(1.0)).xy();
                let to_fragment = p - light;
                let distance = to_fragment.length();
                if distance >= max_radius {
                    return [Some(dark), None];
                }

                let rays = atlas * atlas;
                let angle = to_fragment.y.atan2(to_fragment.x).rem_euclid(TAU);
                let index = ((angle / TAU * rays as f32).round() as u32) % rays;
                let atlas_uv = Vec2::new(
                    ((index % atlas) as f32 + 0.5) / atlas as f32,
                    ((index / atlas) as f32 + 0.5) / atlas as f32,
                );
                let s = sampler.sample(0, atlas_uv);
                let hit = Vec2::new((s[0] - 0.5) * 2.0 * max_radius, (s[1] - 0.5) * 2.0 * max_radius);

                let surface = sampler.sample(1, frag.uv)[3] > 0.5;
                let tolerance = if surface { surface_depth.max(step) } else { step };
                if distance > hit.length() + tolerance {
                    return [Some(dark), None];
                }

                let falloff = (1.0 - distance / max_radius).clamp(0.0, 1.0);
                let falloff = falloff * falloff;
                [
                    Some([color[0] * falloff, color[1] * falloff, color[2] * falloff, 0.0]),
                    None,
                ]
            }
            Program::Copy => [Some(sampler.sample(0, frag.uv)), None],
        }
    }
}

/// Distance along `dir` from `origin` to the first mask texel more opaque
/// than `threshold`, or `max_radius` when the ray leaves the mask or reaches
/// the radius unobstructed.
fn march(
    origin: Vec2,
    dir: Vec2,
    step: f32,
    max_radius: f32,
    threshold: f32,
    sampler: &dyn Sampler,
) -> f32 {
    let mut distance = 0.0;
    loop {
        distance += step;
        if distance >= max_radius {
            return max_radius;
        }
        let p = origin + dir * distance;
        if !(0.0..=1.0).contains(&p.x) || !(0.0..=1.0).contains(&p.y) {
            return max_radius;
        }
        if sampler.sample(0, p)[3] > threshold {
            return distance;
        }
    }
}
