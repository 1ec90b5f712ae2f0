//! Linked program pipelines and their memoization cache.
//!
//! A pipeline is the linked program for one set of shader stage objects plus the
//! slot-to-unit maps resolved at link time. Link failures are cached like
//! successes so a bad shader set fails fast instead of relinking every draw.

pub mod unit_map;

pub use self::unit_map::{UnitMap, UnitMapCache};

use crate::api::types::{GLint, GLuint};
use crate::driver::Driver;
use crate::resource::{GlShader, ShaderStage, STAGE_COUNT};
use crate::state::{
    MAX_CONSTANT_BUFFER_SLOTS, MAX_IMAGE_SLOTS, MAX_STORAGE_BUFFER_SLOTS, MAX_TEXTURE_SLOTS,
};
use fxhash::FxHashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

pub use crate::framebuffer::CacheStats;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PipelineMode {
    Graphics,
    Compute,
}

const GRAPHICS_STAGES: [ShaderStage; 5] = [
    ShaderStage::Vertex,
    ShaderStage::Hull,
    ShaderStage::Domain,
    ShaderStage::Geometry,
    ShaderStage::Pixel,
];

/// Shader set + mode + emulation flags; keyed by shader identity.
#[derive(Clone, Default)]
pub struct PipelineConfig {
    pub shaders: [Option<Rc<GlShader>>; STAGE_COUNT],
    pub compute: bool,
    pub depth_clamp_emulation: bool,
    #[cfg(feature = "shader-trace")]
    pub trace_stage: Option<ShaderStage>,
}

impl PipelineConfig {
    pub fn mode(&self) -> PipelineMode {
        if self.compute {
            PipelineMode::Compute
        } else {
            PipelineMode::Graphics
        }
    }

    fn used_stages(&self) -> impl Iterator<Item = (ShaderStage, &Rc<GlShader>)> {
        let stages: &[ShaderStage] = if self.compute {
            &[ShaderStage::Compute]
        } else {
            &GRAPHICS_STAGES
        };
        stages
            .iter()
            .filter_map(move |&s| self.shaders[s.index()].as_ref().map(|sh| (s, sh)))
    }

    fn shader_ptr(&self, index: usize) -> *const GlShader {
        match &self.shaders[index] {
            Some(s) => Rc::as_ptr(s),
            None => std::ptr::null(),
        }
    }
}

impl PartialEq for PipelineConfig {
    fn eq(&self, other: &PipelineConfig) -> bool {
        (0..STAGE_COUNT).all(|i| self.shader_ptr(i) == other.shader_ptr(i))
            && self.compute == other.compute
            && self.depth_clamp_emulation == other.depth_clamp_emulation
            && self.trace_stage_key() == other.trace_stage_key()
    }
}

impl Eq for PipelineConfig {}

impl Hash for PipelineConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for i in 0..STAGE_COUNT {
            (self.shader_ptr(i) as usize).hash(state);
        }
        self.compute.hash(state);
        self.depth_clamp_emulation.hash(state);
        self.trace_stage_key().hash(state);
    }
}

impl PipelineConfig {
    #[cfg(feature = "shader-trace")]
    fn trace_stage_key(&self) -> Option<ShaderStage> {
        self.trace_stage
    }

    #[cfg(not(feature = "shader-trace"))]
    fn trace_stage_key(&self) -> Option<ShaderStage> {
        None
    }
}

/// The per-kind unit maps resolved for one linked pipeline.
#[derive(Clone)]
pub struct UnitMapSet {
    pub textures: Arc<UnitMap>,
    pub constant_buffers: Arc<UnitMap>,
    pub storage_buffers: Arc<UnitMap>,
    pub images: Arc<UnitMap>,
}

pub struct GlPipeline {
    pub(crate) glname: GLuint,
    pub(crate) config: PipelineConfig,
    pub(crate) unit_maps: UnitMapSet,
    pub(crate) complete: bool,
}

impl GlPipeline {
    pub fn glname(&self) -> GLuint {
        self.glname
    }

    pub fn unit_maps(&self) -> &UnitMapSet {
        &self.unit_maps
    }
}

#[derive(Default)]
pub struct PipelineCache {
    entries: FxHashMap<PipelineConfig, Rc<GlPipeline>>,
    hits: u64,
    misses: u64,
}

impl PipelineCache {
    pub fn new() -> PipelineCache {
        PipelineCache::default()
    }

    /// Looks up or links the pipeline for `config`. A link failure returns `None`
    /// and stays cached.
    pub fn allocate<D: Driver>(
        &mut self,
        gl: &D,
        config: &PipelineConfig,
        unit_maps: &Mutex<UnitMapCache>,
    ) -> Option<Rc<GlPipeline>> {
        if let Some(pipeline) = self.entries.get(config) {
            self.hits += 1;
            return if pipeline.complete {
                Some(pipeline.clone())
            } else {
                None
            };
        }
        self.misses += 1;

        let program = gl.create_program();
        for (_, shader) in config.used_stages() {
            gl.attach_shader(program, shader.glname);
        }
        gl.link_program(program);
        let complete = gl.link_status(program);
        if !complete {
            error!("pipeline link failed: {}", gl.program_info_log(program));
        }

        let maps = if complete {
            resolve_unit_maps(gl, program, config, unit_maps)
        } else {
            empty_unit_maps(unit_maps)
        };

        let pipeline = Rc::new(GlPipeline {
            glname: program,
            config: config.clone(),
            unit_maps: maps,
            complete,
        });
        for (_, shader) in config.used_stages() {
            shader.link_pipeline(&pipeline);
        }
        self.entries.insert(config.clone(), pipeline.clone());

        if complete {
            Some(pipeline)
        } else {
            None
        }
    }

    pub fn remove<D: Driver>(
        &mut self,
        gl: &D,
        pipeline: &Rc<GlPipeline>,
        exclude: Option<&Rc<GlShader>>,
    ) {
        for (_, shader) in pipeline.config.used_stages() {
            let skip = exclude.map_or(false, |ex| Rc::ptr_eq(ex, shader));
            if !skip {
                shader.unlink_pipeline(pipeline);
            }
        }
        self.entries.remove(&pipeline.config);
        gl.delete_program(pipeline.glname);
    }

    /// Destroy-path eviction: drops every cached pipeline built from `shader`.
    pub fn remove_referencing<D: Driver>(&mut self, gl: &D, shader: &Rc<GlShader>) {
        for pipeline in shader.take_pipeline_refs() {
            self.remove(gl, &pipeline, Some(shader));
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

/// Sequential link-time unit assignment: walk the used stages in fixed order and
/// hand each declared slot the next free unit of its kind, programming the
/// assignment into the linked program as we go. Block and uniform indices follow
/// declaration order within the program.
fn resolve_unit_maps<D: Driver>(
    gl: &D,
    program: GLuint,
    config: &PipelineConfig,
    unit_maps: &Mutex<UnitMapCache>,
) -> UnitMapSet {
    let mut textures = UnitMap::empty(MAX_TEXTURE_SLOTS);
    let mut constant_buffers = UnitMap::empty(MAX_CONSTANT_BUFFER_SLOTS);
    let mut storage_buffers = UnitMap::empty(MAX_STORAGE_BUFFER_SLOTS);
    let mut images = UnitMap::empty(MAX_IMAGE_SLOTS);

    let mut next_texture: u16 = 0;
    let mut next_ubo: u16 = 0;
    let mut next_ssbo: u16 = 0;
    let mut next_image: u16 = 0;
    let mut ubo_index: GLuint = 0;
    let mut ssbo_index: GLuint = 0;
    let mut uniform_location: GLint = 0;

    for (stage, shader) in config.used_stages() {
        for &slot in &shader.constant_buffer_slots {
            constant_buffers.set(stage, slot, next_ubo);
            gl.uniform_block_binding(program, ubo_index, u32::from(next_ubo));
            next_ubo += 1;
            ubo_index += 1;
        }
        for &slot in &shader.texture_slots {
            textures.set(stage, slot, next_texture);
            gl.program_uniform_1i(program, uniform_location, GLint::from(next_texture));
            next_texture += 1;
            uniform_location += 1;
        }
        for &slot in &shader.storage_buffer_slots {
            storage_buffers.set(stage, slot, next_ssbo);
            gl.shader_storage_block_binding(program, ssbo_index, u32::from(next_ssbo));
            next_ssbo += 1;
            ssbo_index += 1;
        }
        for &slot in &shader.image_slots {
            images.set(stage, slot, next_image);
            gl.program_uniform_1i(program, uniform_location, GLint::from(next_image));
            next_image += 1;
            uniform_location += 1;
        }
    }

    let mut cache = unit_maps.lock().unwrap();
    UnitMapSet {
        textures: cache.intern(textures),
        constant_buffers: cache.intern(constant_buffers),
        storage_buffers: cache.intern(storage_buffers),
        images: cache.intern(images),
    }
}

fn empty_unit_maps(unit_maps: &Mutex<UnitMapCache>) -> UnitMapSet {
    let mut cache = unit_maps.lock().unwrap();
    UnitMapSet {
        textures: cache.intern(UnitMap::empty(MAX_TEXTURE_SLOTS)),
        constant_buffers: cache.intern(UnitMap::empty(MAX_CONSTANT_BUFFER_SLOTS)),
        storage_buffers: cache.intern(UnitMap::empty(MAX_STORAGE_BUFFER_SLOTS)),
        images: cache.intern(UnitMap::empty(MAX_IMAGE_SLOTS)),
    }
}
