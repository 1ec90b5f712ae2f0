//! OpenGL execution layer for a Direct3D 11 translation front end.
//!
//! The front end validates API usage and owns object lifetimes; this crate turns
//! its state and draw submissions into a minimal stream of GL calls. The central
//! pieces are a shadow cache of all global GL state ([`state::StateCache`]),
//! memoization caches for framebuffers and linked pipelines, deferred resource
//! binding driven by per-pipeline slot-to-unit maps, and ring-buffer streaming for
//! frequently updated constant buffers.
//!
//! All driver access goes through the [`driver::Driver`] trait; [`driver::NativeGl`]
//! carries the loaded function pointers, and the test suite substitutes an
//! instrumented recording driver.

#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;

pub mod api;
pub mod caps;
pub mod config;
pub mod context;
pub mod device;
pub mod driver;
pub mod framebuffer;
pub mod name;
pub mod pipeline;
pub mod resource;
pub mod state;
pub mod streaming;
pub mod sync;
#[cfg(feature = "shader-trace")]
pub mod trace;

pub use self::caps::Capabilities;
pub use self::config::CoreConfig;
pub use self::context::{Context, ImageBinding, IndexFormat, InputElement, InputLayout};
pub use self::device::Device;
pub use self::driver::{Driver, NativeGl};
pub use self::framebuffer::FramebufferConfig;
pub use self::pipeline::CacheStats;
pub use self::resource::{GlBuffer, GlSampler, GlShader, GlTexture, ShaderStage, TextureView};
pub use self::state::{
    BlendDesc, BlendState, DepthStencilDesc, DepthStencilState, PrimitiveTopology, RasterizerDesc,
    RasterizerState, ScissorRect, Viewport,
};
#[cfg(feature = "shader-trace")]
pub use self::trace::{TraceTarget, TraceVarType, TraceVariable};
