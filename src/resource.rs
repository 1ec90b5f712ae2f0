//! GPU resources and views.
//!
//! Resources are shared through `Rc`; views and shaders additionally carry
//! non-owning back-reference lists to the cached framebuffers/pipelines built from
//! them, so that destroying a view or shader can evict exactly the cache entries
//! that reference it. The lists are severed explicitly in the destroy path, never
//! by waiting for weak-pointer expiry, because the same unlink code also runs for
//! plain cache eviction.

use crate::api::types::{GLenum, GLint, GLuint};
use crate::framebuffer::GlFramebuffer;
use crate::name::ResourceName;
use crate::pipeline::GlPipeline;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
}

pub const STAGE_COUNT: usize = 6;

pub const ALL_STAGES: [ShaderStage; STAGE_COUNT] = [
    ShaderStage::Vertex,
    ShaderStage::Hull,
    ShaderStage::Domain,
    ShaderStage::Geometry,
    ShaderStage::Pixel,
    ShaderStage::Compute,
];

impl ShaderStage {
    pub fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Hull => 1,
            ShaderStage::Domain => 2,
            ShaderStage::Geometry => 3,
            ShaderStage::Pixel => 4,
            ShaderStage::Compute => 5,
        }
    }
}

/// A GPU buffer. Constant buffers keep a live CPU shadow so the streaming path can
/// re-copy their contents into a ring region at flush time.
pub struct GlBuffer {
    pub(crate) name: Cell<ResourceName>,
    pub size: usize,
    pub(crate) cpu_data: RefCell<Vec<u8>>,
    /// Set when the buffer participates in constant-buffer streaming.
    pub(crate) streaming: Cell<bool>,
    /// CPU shadow modified since the last upload.
    pub(crate) dirty: Cell<bool>,
}

impl GlBuffer {
    pub fn new(name: ResourceName, size: usize) -> GlBuffer {
        GlBuffer {
            name: Cell::new(name),
            size,
            cpu_data: RefCell::new(vec![0; size]),
            streaming: Cell::new(false),
            dirty: Cell::new(false),
        }
    }

    pub fn name(&self) -> ResourceName {
        self.name.get()
    }

    pub fn glname(&self) -> GLuint {
        self.name.get().glname()
    }
}

pub struct GlTexture {
    pub(crate) name: Cell<ResourceName>,
    pub target: GLenum,
}

impl GlTexture {
    pub fn new(name: ResourceName, target: GLenum) -> GlTexture {
        GlTexture {
            name: Cell::new(name),
            target,
        }
    }

    pub fn name(&self) -> ResourceName {
        self.name.get()
    }

    pub fn glname(&self) -> GLuint {
        self.name.get().glname()
    }
}

/// Sampler objects are created and owned upstream; only the native name passes
/// through this layer.
pub struct GlSampler {
    pub glname: GLuint,
}

/// Render-target or depth-stencil view over one mip/layer of a texture.
pub struct TextureView {
    pub texture: Rc<GlTexture>,
    pub level: GLint,
    /// `None` attaches the whole level, `Some` a single layer.
    pub layer: Option<GLint>,
    pub(crate) framebuffer_refs: RefCell<Vec<Weak<GlFramebuffer>>>,
}

impl TextureView {
    pub fn new(texture: Rc<GlTexture>, level: GLint, layer: Option<GLint>) -> TextureView {
        TextureView {
            texture,
            level,
            layer,
            framebuffer_refs: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn link_framebuffer(&self, framebuffer: &Rc<GlFramebuffer>) {
        self.framebuffer_refs
            .borrow_mut()
            .push(Rc::downgrade(framebuffer));
    }

    pub(crate) fn unlink_framebuffer(&self, framebuffer: &Rc<GlFramebuffer>) {
        self.framebuffer_refs
            .borrow_mut()
            .retain(|w| match w.upgrade() {
                Some(fb) => !Rc::ptr_eq(&fb, framebuffer),
                None => false,
            });
    }

    pub(crate) fn take_framebuffer_refs(&self) -> Vec<Rc<GlFramebuffer>> {
        self.framebuffer_refs
            .borrow_mut()
            .drain(..)
            .filter_map(|w| w.upgrade())
            .collect()
    }
}

/// A compiled shader stage object plus its declared logical resource slots.
///
/// Reflection lives upstream; the declared slot lists are what link-time unit
/// assignment walks to build the slot-to-unit maps. That walk addresses the
/// program by position, not by name, so the generated GLSL must keep interface
/// declarations in slot-list order: uniform and storage block indices follow
/// declaration order within the linked program, and sampler/image uniforms
/// carry explicit sequential `layout(location = N)` qualifiers, numbered in
/// the order textures then images per stage, continuing across the stages the
/// program links. The upstream shader translator emits exactly that layout.
pub struct GlShader {
    pub glname: GLuint,
    pub stage: ShaderStage,
    pub constant_buffer_slots: Vec<u32>,
    pub texture_slots: Vec<u32>,
    pub storage_buffer_slots: Vec<u32>,
    pub image_slots: Vec<u32>,
    pub(crate) pipeline_refs: RefCell<Vec<Weak<GlPipeline>>>,
}

impl GlShader {
    pub fn new(glname: GLuint, stage: ShaderStage) -> GlShader {
        GlShader {
            glname,
            stage,
            constant_buffer_slots: Vec::new(),
            texture_slots: Vec::new(),
            storage_buffer_slots: Vec::new(),
            image_slots: Vec::new(),
            pipeline_refs: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn link_pipeline(&self, pipeline: &Rc<GlPipeline>) {
        self.pipeline_refs.borrow_mut().push(Rc::downgrade(pipeline));
    }

    pub(crate) fn unlink_pipeline(&self, pipeline: &Rc<GlPipeline>) {
        self.pipeline_refs.borrow_mut().retain(|w| match w.upgrade() {
            Some(p) => !Rc::ptr_eq(&p, pipeline),
            None => false,
        });
    }

    pub(crate) fn take_pipeline_refs(&self) -> Vec<Rc<GlPipeline>> {
        self.pipeline_refs
            .borrow_mut()
            .drain(..)
            .filter_map(|w| w.upgrade())
            .collect()
    }
}
