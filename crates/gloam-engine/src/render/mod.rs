//! Rendering: the graphics service seam, a CPU backend, and the lighting
//! pipeline built on top of them.
//!
//! [`gfx::GraphicsContext`] is the only thing the pipeline talks to. The
//! [`software::SoftwareContext`] backend implements it on the CPU, running
//! the same four shader programs a GPU backend would compile.

pub mod gfx;
pub mod lighting;
mod programs;
pub mod renderer;
pub mod scene;
pub mod software;

pub use gfx::{BlendMode, DeviceRect, FramebufferId, GraphicsContext, ShaderKind, TextureBinding, TextureId, Uniform};
pub use lighting::{FrameInputs, LightingPipeline, PassKind, PassStats};
pub use renderer::{Matrices, RenderState, Renderer, ScenePass};
pub use software::SoftwareContext;
