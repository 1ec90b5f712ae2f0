//! The rendering context.
//!
//! Presents the D3D11-shaped set-state/set-resource API and reconciles all pending
//! state into driver calls at the flush point immediately before a draw or
//! dispatch. State setters apply immediately through the shadow cache; resource
//! setters only write slot arrays and dirty flags, because the driver unit a
//! logical slot lands on depends on the pipeline bound at flush time.

use crate::api;
use crate::api::types::{GLenum, GLint, GLsizei};
use crate::caps::Capabilities;
use crate::device::Device;
use crate::driver::Driver;
use crate::framebuffer::{FramebufferCache, FramebufferConfig, GlFramebuffer};
use crate::pipeline::{GlPipeline, PipelineCache, PipelineConfig, UnitMap, UnitMapSet};
use crate::resource::{
    GlBuffer, GlSampler, GlShader, GlTexture, ShaderStage, TextureView, ALL_STAGES, STAGE_COUNT,
};
use crate::state::{
    topology_to_gl, BlendState, BufferRangeState, DepthStencilState, ImageUnitState,
    PrimitiveTopology, RasterizerState, ScissorRect, StateCache, VertexAttribFormatState,
    VertexBufferBindingState, Viewport, MAX_CONSTANT_BUFFER_SLOTS, MAX_IMAGE_SLOTS,
    MAX_RENDER_TARGETS, MAX_SAMPLER_SLOTS, MAX_STORAGE_BUFFER_SLOTS, MAX_TEXTURE_SLOTS,
    MAX_VERTEX_ATTRIBS, MAX_VERTEX_BUFFER_SLOTS,
};
use crate::streaming::StreamingConstantBuffers;
#[cfg(feature = "shader-trace")]
use crate::trace::{ShaderTrace, TraceTarget, TraceVariable};
use std::rc::Rc;
use std::sync::Arc;

bitflags! {
    struct DirtyFlags: u32 {
        const TEXTURES         = 1 << 0;
        const SAMPLERS         = 1 << 1;
        const CONSTANT_BUFFERS = 1 << 2;
        const STORAGE_BUFFERS  = 1 << 3;
        const IMAGES           = 1 << 4;
        const INPUT_ASSEMBLER  = 1 << 5;
        const PIPELINE         = 1 << 6;
        const FRAMEBUFFER      = 1 << 7;
    }
}

/// Input-assembler strategy, chosen once from the driver capabilities.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum IaStrategy {
    /// Vertex-buffer binding indirection; formats and buffers diff independently.
    AttribBinding,
    /// Re-specify full attrib-pointer state for every live attribute when dirty.
    LegacyPointer,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    fn gl_type(self) -> GLenum {
        match self {
            IndexFormat::U16 => api::UNSIGNED_SHORT,
            IndexFormat::U32 => api::UNSIGNED_INT,
        }
    }

    fn byte_size(self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// One element of an input layout; the element index is the attribute index.
#[derive(Clone, Debug)]
pub struct InputElement {
    pub buffer_slot: u32,
    pub size: GLint,
    pub ty: GLenum,
    pub normalized: bool,
    /// Byte offset relative to the vertex-buffer slot's base offset.
    pub offset: u32,
    pub instance_divisor: u32,
}

#[derive(Clone, Debug, Default)]
pub struct InputLayout {
    pub elements: Vec<InputElement>,
}

#[derive(Clone)]
pub struct ImageBinding {
    pub texture: Rc<GlTexture>,
    pub level: GLint,
    pub layered: bool,
    pub layer: GLint,
    pub access: GLenum,
    pub format: GLenum,
}

#[derive(Clone)]
struct VertexBufferSlot {
    buffer: Rc<GlBuffer>,
    stride: u32,
    offset: u32,
}

pub struct Context<D: Driver> {
    gl: D,
    device: Arc<Device>,
    caps: Capabilities,
    cache: StateCache,
    framebuffers: FramebufferCache,
    pipelines: PipelineCache,
    streaming: StreamingConstantBuffers<D::Fence>,
    #[cfg(feature = "shader-trace")]
    trace: ShaderTrace,

    dirty: DirtyFlags,
    ia_strategy: IaStrategy,
    compute_mode: bool,
    topology: PrimitiveTopology,
    depth_clamp_emulation: bool,

    shaders: [Option<Rc<GlShader>>; STAGE_COUNT],
    textures: [[Option<Rc<GlTexture>>; MAX_TEXTURE_SLOTS]; STAGE_COUNT],
    samplers: [[Option<Rc<GlSampler>>; MAX_SAMPLER_SLOTS]; STAGE_COUNT],
    constant_buffers: [[Option<Rc<GlBuffer>>; MAX_CONSTANT_BUFFER_SLOTS]; STAGE_COUNT],
    storage_buffers: [[Option<Rc<GlBuffer>>; MAX_STORAGE_BUFFER_SLOTS]; STAGE_COUNT],
    images: [[Option<ImageBinding>; MAX_IMAGE_SLOTS]; STAGE_COUNT],
    vertex_buffers: [Option<VertexBufferSlot>; MAX_VERTEX_BUFFER_SLOTS],
    input_layout: Option<Rc<InputLayout>>,
    index_buffer: Option<(Rc<GlBuffer>, IndexFormat, usize)>,
    framebuffer_config: FramebufferConfig,

    current_pipeline: Option<Rc<GlPipeline>>,
    current_framebuffer: Option<Rc<GlFramebuffer>>,
    unit_maps: Option<UnitMapSet>,
}

impl<D: Driver> Context<D> {
    pub(crate) fn new(device: Arc<Device>, gl: D) -> Context<D> {
        let caps = *device.caps();
        let ia_strategy = if caps.vertex_attrib_binding {
            IaStrategy::AttribBinding
        } else {
            IaStrategy::LegacyPointer
        };
        Context {
            cache: StateCache::new(&caps),
            framebuffers: FramebufferCache::new(),
            pipelines: PipelineCache::new(),
            streaming: StreamingConstantBuffers::new(device.config(), &caps),
            #[cfg(feature = "shader-trace")]
            trace: ShaderTrace::new(),
            dirty: DirtyFlags::empty(),
            ia_strategy,
            compute_mode: false,
            topology: PrimitiveTopology::TriangleList,
            depth_clamp_emulation: false,
            shaders: Default::default(),
            textures: Default::default(),
            samplers: Default::default(),
            constant_buffers: Default::default(),
            storage_buffers: Default::default(),
            images: Default::default(),
            vertex_buffers: Default::default(),
            input_layout: None,
            index_buffer: None,
            framebuffer_config: FramebufferConfig::default(),
            current_pipeline: None,
            current_framebuffer: None,
            unit_maps: None,
            caps,
            device,
            gl,
        }
    }

    pub fn gl(&self) -> &D {
        &self.gl
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    //-------------------------------------------------------------------- state setters
    // These apply immediately; the shadow cache suppresses redundant driver calls.

    pub fn set_blend_state(&mut self, state: &BlendState, blend_color: [f32; 4], sample_mask: u32) {
        self.cache
            .set_blend_state(&self.gl, state, MAX_RENDER_TARGETS);
        self.cache.set_blend_color(&self.gl, blend_color);
        self.cache.set_sample_mask(&self.gl, sample_mask);
    }

    pub fn set_depth_stencil_state(&mut self, state: &DepthStencilState, stencil_ref: GLint) {
        self.cache
            .set_depth_stencil_state(&self.gl, state, stencil_ref);
    }

    pub fn set_rasterizer_state(&mut self, state: &RasterizerState) {
        self.cache.set_rasterizer_state(&self.gl, state, &self.caps);
        // clamp without driver support is emulated in the shader, which makes it
        // part of the pipeline key
        let emulate = state.depth_clamp && !self.caps.depth_clamp;
        if self.depth_clamp_emulation != emulate {
            self.depth_clamp_emulation = emulate;
            self.dirty.insert(DirtyFlags::PIPELINE);
        }
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.cache.set_viewports(&self.gl, viewports, &self.caps);
    }

    pub fn set_scissor_rects(&mut self, rects: &[ScissorRect]) {
        self.cache.set_scissor_rects(&self.gl, rects, &self.caps);
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.topology = topology;
    }

    //----------------------------------------------------------------- resource setters
    // Deferred: slot writes plus a dirty flag; binding happens at flush once the
    // pipeline's unit maps are known.

    pub fn set_shader(&mut self, stage: ShaderStage, shader: Option<Rc<GlShader>>) {
        let slot = &mut self.shaders[stage.index()];
        let same = match (&*slot, &shader) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            *slot = shader;
            self.dirty.insert(DirtyFlags::PIPELINE);
        }
    }

    pub fn set_shader_texture(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        texture: Option<Rc<GlTexture>>,
    ) {
        if slot as usize >= MAX_TEXTURE_SLOTS {
            warn!("texture slot {} out of range; ignored", slot);
            return;
        }
        self.textures[stage.index()][slot as usize] = texture;
        self.dirty.insert(DirtyFlags::TEXTURES);
    }

    pub fn set_shader_sampler(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        sampler: Option<Rc<GlSampler>>,
    ) {
        if slot as usize >= MAX_SAMPLER_SLOTS {
            warn!("sampler slot {} out of range; ignored", slot);
            return;
        }
        self.samplers[stage.index()][slot as usize] = sampler;
        self.dirty.insert(DirtyFlags::SAMPLERS);
    }

    pub fn set_constant_buffer(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        buffer: Option<Rc<GlBuffer>>,
    ) {
        if slot as usize >= MAX_CONSTANT_BUFFER_SLOTS {
            warn!("constant buffer slot {} out of range; ignored", slot);
            return;
        }
        if let Some(buffer) = &buffer {
            if self.streaming.enabled() {
                buffer.streaming.set(true);
            }
        }
        self.constant_buffers[stage.index()][slot as usize] = buffer;
        self.dirty.insert(DirtyFlags::CONSTANT_BUFFERS);
    }

    pub fn set_storage_buffer(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        buffer: Option<Rc<GlBuffer>>,
    ) {
        if slot as usize >= MAX_STORAGE_BUFFER_SLOTS {
            warn!("storage buffer slot {} out of range; ignored", slot);
            return;
        }
        self.storage_buffers[stage.index()][slot as usize] = buffer;
        self.dirty.insert(DirtyFlags::STORAGE_BUFFERS);
    }

    pub fn set_shader_image(&mut self, stage: ShaderStage, slot: u32, image: Option<ImageBinding>) {
        if slot as usize >= MAX_IMAGE_SLOTS {
            warn!("image slot {} out of range; ignored", slot);
            return;
        }
        self.images[stage.index()][slot as usize] = image;
        self.dirty.insert(DirtyFlags::IMAGES);
    }

    pub fn set_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: Option<Rc<GlBuffer>>,
        stride: u32,
        offset: u32,
    ) {
        if slot as usize >= MAX_VERTEX_BUFFER_SLOTS {
            warn!("vertex buffer slot {} out of range; ignored", slot);
            return;
        }
        self.vertex_buffers[slot as usize] = buffer.map(|buffer| VertexBufferSlot {
            buffer,
            stride,
            offset,
        });
        self.dirty.insert(DirtyFlags::INPUT_ASSEMBLER);
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: Option<Rc<GlBuffer>>,
        format: IndexFormat,
        offset: usize,
    ) {
        self.index_buffer = buffer.map(|b| (b, format, offset));
        self.dirty.insert(DirtyFlags::INPUT_ASSEMBLER);
    }

    pub fn set_input_layout(&mut self, layout: Option<Rc<InputLayout>>) {
        self.input_layout = layout;
        self.dirty.insert(DirtyFlags::INPUT_ASSEMBLER);
    }

    pub fn set_render_targets(
        &mut self,
        colors: &[Option<Rc<TextureView>>],
        depth_stencil: Option<Rc<TextureView>>,
    ) {
        let mut config = FramebufferConfig::default();
        for (i, color) in colors.iter().take(MAX_RENDER_TARGETS).enumerate() {
            config.colors[i] = color.clone();
        }
        if colors.len() > MAX_RENDER_TARGETS {
            warn!(
                "{} render targets requested, {} supported; extra targets ignored",
                colors.len(),
                MAX_RENDER_TARGETS
            );
        }
        config.depth_stencil = depth_stencil;
        if self.framebuffer_config != config {
            self.framebuffer_config = config;
            self.dirty.insert(DirtyFlags::FRAMEBUFFER);
        }
    }

    /// Writes the buffer's CPU shadow. Streamed buffers defer the GPU copy to the
    /// flush; everything else uploads immediately.
    pub fn update_buffer(&mut self, buffer: &Rc<GlBuffer>, data: &[u8]) {
        {
            let mut shadow = buffer.cpu_data.borrow_mut();
            let len = data.len().min(shadow.len());
            if len < data.len() {
                warn!(
                    "buffer update of {} bytes truncated to {} byte storage",
                    data.len(),
                    shadow.len()
                );
            }
            shadow[..len].copy_from_slice(&data[..len]);
        }
        buffer.dirty.set(true);
        if buffer.streaming.get() {
            // re-stream the refreshed contents on the next flush
            self.dirty.insert(DirtyFlags::CONSTANT_BUFFERS);
        } else {
            self.gl
                .buffer_sub_data(buffer.glname(), 0, &buffer.cpu_data.borrow());
            buffer.dirty.set(false);
        }
    }

    //------------------------------------------------------------------------ lifetime

    /// Severs and evicts every cached framebuffer referencing the view. Call
    /// before releasing the view itself.
    pub fn destroy_view(&mut self, view: &Rc<TextureView>) {
        {
            let mut pool = self.device.framebuffer_names.lock().unwrap();
            self.framebuffers
                .remove_referencing(&self.gl, view, &mut pool);
        }
        let mut rebind = false;
        for color in self.framebuffer_config.colors.iter_mut() {
            if color.as_ref().map_or(false, |v| Rc::ptr_eq(v, view)) {
                *color = None;
                rebind = true;
            }
        }
        if self
            .framebuffer_config
            .depth_stencil
            .as_ref()
            .map_or(false, |v| Rc::ptr_eq(v, view))
        {
            self.framebuffer_config.depth_stencil = None;
            rebind = true;
        }
        if rebind || self.current_framebuffer.is_some() {
            self.current_framebuffer = None;
            self.dirty.insert(DirtyFlags::FRAMEBUFFER);
        }
    }

    /// Severs and evicts every cached pipeline built from the shader.
    pub fn destroy_shader(&mut self, shader: &Rc<GlShader>) {
        self.pipelines.remove_referencing(&self.gl, shader);
        for slot in self.shaders.iter_mut() {
            if slot.as_ref().map_or(false, |s| Rc::ptr_eq(s, shader)) {
                *slot = None;
            }
        }
        self.current_pipeline = None;
        self.unit_maps = None;
        self.dirty.insert(DirtyFlags::PIPELINE);
    }

    /// Per-frame hook: rotates the streaming frame pool.
    pub fn end_frame(&mut self) {
        let mut pool = self.device.buffer_names.lock().unwrap();
        self.streaming.switch_frame(&self.gl, &mut pool);
    }

    //------------------------------------------------------------------------- tracing

    #[cfg(feature = "shader-trace")]
    pub fn begin_trace(
        &mut self,
        stage: ShaderStage,
        target: TraceTarget,
        index: Vec<TraceVariable>,
        capacity_records: u32,
    ) {
        let mut pool = self.device.buffer_names.lock().unwrap();
        self.trace
            .arm(&self.gl, &mut pool, stage, target, index, capacity_records);
        self.dirty.insert(DirtyFlags::PIPELINE);
    }

    #[cfg(feature = "shader-trace")]
    pub fn take_trace_dump(&mut self) -> Option<String> {
        self.trace.take_dump()
    }

    #[cfg(feature = "shader-trace")]
    fn trace_stage_in_pipeline(&self) -> Option<ShaderStage> {
        self.trace
            .armed_stage()
            .filter(|s| self.shaders[s.index()].is_some())
    }

    //--------------------------------------------------------------------------- draws

    pub fn draw(&mut self, vertex_count: u32, start_vertex: u32, instance_count: u32) {
        if !self.flush_draw_state() {
            warn!("draw skipped; pending state could not be applied");
            return;
        }
        self.gl.draw_arrays_instanced(
            topology_to_gl(self.topology),
            start_vertex as GLint,
            vertex_count as GLsizei,
            instance_count as GLsizei,
        );
        #[cfg(feature = "shader-trace")]
        self.trace.post_draw(&self.gl);
    }

    pub fn draw_indexed(&mut self, index_count: u32, start_index: u32, instance_count: u32) {
        if !self.flush_draw_state() {
            warn!("draw skipped; pending state could not be applied");
            return;
        }
        let (format, base_offset) = match &self.index_buffer {
            Some((_, format, offset)) => (*format, *offset),
            None => {
                error!("indexed draw without an index buffer; skipped");
                return;
            }
        };
        let offset = base_offset + start_index as usize * format.byte_size();
        self.gl.draw_elements_instanced(
            topology_to_gl(self.topology),
            index_count as GLsizei,
            format.gl_type(),
            offset,
            instance_count as GLsizei,
        );
        #[cfg(feature = "shader-trace")]
        self.trace.post_draw(&self.gl);
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if !self.caps.compute_shaders {
            error!("compute dispatch on a driver without compute support; skipped");
            return;
        }
        if !self.flush_dispatch_state() {
            warn!("dispatch skipped; pending state could not be applied");
            return;
        }
        self.gl.dispatch_compute(x, y, z);
        #[cfg(feature = "shader-trace")]
        self.trace.post_draw(&self.gl);
    }

    //--------------------------------------------------------------------------- clears
    // Self-contained: resolve a framebuffer for the target view, override the
    // write/scissor state the clear needs, clear, then restore the previous cached
    // values through the same dirty-checked setters, so cache and driver never
    // diverge.

    pub fn clear_render_target(&mut self, view: &Rc<TextureView>, color: [f32; 4]) {
        let mut config = FramebufferConfig::default();
        config.colors[0] = Some(view.clone());
        let framebuffer = {
            let mut pool = self.device.framebuffer_names.lock().unwrap();
            self.framebuffers
                .allocate(&self.gl, &mut self.cache, &config, &mut pool)
        };
        let framebuffer = match framebuffer {
            Some(fb) => fb,
            None => {
                error!("render target clear skipped; framebuffer unavailable");
                return;
            }
        };
        self.cache
            .bind_draw_framebuffer(&self.gl, framebuffer.glname());

        let saved_mask = self.cache.color_write_mask(0);
        let saved_scissor = self.cache.scissor_enabled();
        self.cache.set_color_write_mask(&self.gl, 0, [true; 4]);
        self.cache.set_scissor_enabled(&self.gl, false);

        self.gl.clear_buffer_fv(api::COLOR, 0, &color);

        self.cache.set_color_write_mask(&self.gl, 0, saved_mask);
        self.cache.set_scissor_enabled(&self.gl, saved_scissor);
        self.dirty.insert(DirtyFlags::FRAMEBUFFER);
    }

    pub fn clear_depth_stencil(
        &mut self,
        view: &Rc<TextureView>,
        clear_depth: bool,
        clear_stencil: bool,
        depth: f32,
        stencil: GLint,
    ) {
        if !clear_depth && !clear_stencil {
            return;
        }
        let mut config = FramebufferConfig::default();
        config.depth_stencil = Some(view.clone());
        let framebuffer = {
            let mut pool = self.device.framebuffer_names.lock().unwrap();
            self.framebuffers
                .allocate(&self.gl, &mut self.cache, &config, &mut pool)
        };
        let framebuffer = match framebuffer {
            Some(fb) => fb,
            None => {
                error!("depth-stencil clear skipped; framebuffer unavailable");
                return;
            }
        };
        self.cache
            .bind_draw_framebuffer(&self.gl, framebuffer.glname());

        let saved_depth_write = self.cache.depth_write();
        let saved_stencil_mask = self.cache.stencil_write_mask();
        let saved_scissor = self.cache.scissor_enabled();
        let saved_depth_range = self.cache.depth_range();
        self.cache.set_depth_write(&self.gl, true);
        self.cache.set_stencil_write_mask(&self.gl, !0);
        self.cache.set_scissor_enabled(&self.gl, false);
        self.cache.set_depth_range(&self.gl, (0.0, 1.0));

        if clear_depth && clear_stencil {
            self.gl.clear_buffer_fi(api::DEPTH_STENCIL, 0, depth, stencil);
        } else if clear_depth {
            self.gl
                .clear_buffer_fv(api::DEPTH, 0, &[depth, 0.0, 0.0, 0.0]);
        } else {
            self.gl.clear_buffer_iv(api::STENCIL, 0, stencil);
        }

        self.cache.set_depth_write(&self.gl, saved_depth_write);
        self.cache.set_stencil_write_mask(&self.gl, saved_stencil_mask);
        self.cache.set_scissor_enabled(&self.gl, saved_scissor);
        self.cache.set_depth_range(&self.gl, saved_depth_range);
        self.dirty.insert(DirtyFlags::FRAMEBUFFER);
    }

    //--------------------------------------------------------------------------- flush
    // Fixed order; every step early-outs when its dirty flag is clear.

    pub fn flush_draw_state(&mut self) -> bool {
        // 1. streaming frame rotation
        if self.streaming.enabled() && !self.streaming.frame_active() {
            let mut pool = self.device.buffer_names.lock().unwrap();
            self.streaming.switch_frame(&self.gl, &mut pool);
        }

        // 2. shader-trace header
        #[cfg(feature = "shader-trace")]
        {
            let matches = self.trace_stage_in_pipeline().is_some();
            self.trace.pre_draw(&self.gl, matches);
        }

        // 3. pipeline mode transition
        if self.compute_mode {
            self.compute_mode = false;
            self.dirty.insert(DirtyFlags::PIPELINE);
        }

        // 4. input assembler
        if self.dirty.contains(DirtyFlags::INPUT_ASSEMBLER) {
            self.flush_input_assembler();
            self.dirty.remove(DirtyFlags::INPUT_ASSEMBLER);
        }

        // 5. pipeline + unit-map re-resolution, 6. per-kind resource binds
        if !self.flush_pipeline() {
            return false;
        }
        self.flush_resources();

        // 7. framebuffer
        self.flush_framebuffer()
    }

    pub fn flush_dispatch_state(&mut self) -> bool {
        if self.streaming.enabled() && !self.streaming.frame_active() {
            let mut pool = self.device.buffer_names.lock().unwrap();
            self.streaming.switch_frame(&self.gl, &mut pool);
        }

        #[cfg(feature = "shader-trace")]
        {
            let matches = self.trace_stage_in_pipeline().is_some();
            self.trace.pre_draw(&self.gl, matches);
        }

        if !self.compute_mode {
            self.compute_mode = true;
            self.dirty.insert(DirtyFlags::PIPELINE);
        }

        // compute skips the input-assembler and framebuffer steps
        if !self.flush_pipeline() {
            return false;
        }
        self.flush_resources();
        true
    }

    fn build_pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.compute = self.compute_mode;
        if self.compute_mode {
            config.shaders[ShaderStage::Compute.index()] =
                self.shaders[ShaderStage::Compute.index()].clone();
        } else {
            for stage in &ALL_STAGES[..STAGE_COUNT - 1] {
                config.shaders[stage.index()] = self.shaders[stage.index()].clone();
            }
            config.depth_clamp_emulation = self.depth_clamp_emulation;
        }
        #[cfg(feature = "shader-trace")]
        {
            config.trace_stage = self.trace_stage_in_pipeline();
        }
        config
    }

    /// Step 5. On failure the dirty flag stays set and nothing is bound, so a
    /// later flush with a different configuration can succeed.
    fn flush_pipeline(&mut self) -> bool {
        if !self.dirty.contains(DirtyFlags::PIPELINE) {
            return true;
        }
        let config = self.build_pipeline_config();
        let pipeline = self
            .pipelines
            .allocate(&self.gl, &config, &self.device.unit_maps);
        let pipeline = match pipeline {
            Some(p) => p,
            None => return false,
        };
        self.cache.bind_program(&self.gl, pipeline.glname());
        self.adopt_unit_maps(pipeline.unit_maps().clone());
        self.current_pipeline = Some(pipeline);
        self.dirty.remove(DirtyFlags::PIPELINE);
        true
    }

    /// Unit assignments are pipeline-specific; a changed map re-dirties the
    /// resource kinds it covers.
    fn adopt_unit_maps(&mut self, maps: UnitMapSet) {
        let old = self.unit_maps.take();
        let changed = |pick: fn(&UnitMapSet) -> &Arc<UnitMap>| {
            old.as_ref()
                .map_or(true, |o| !Arc::ptr_eq(pick(o), pick(&maps)))
        };
        if changed(|m| &m.textures) {
            self.dirty
                .insert(DirtyFlags::TEXTURES | DirtyFlags::SAMPLERS);
        }
        if changed(|m| &m.constant_buffers) {
            self.dirty.insert(DirtyFlags::CONSTANT_BUFFERS);
        }
        if changed(|m| &m.storage_buffers) {
            self.dirty.insert(DirtyFlags::STORAGE_BUFFERS);
        }
        if changed(|m| &m.images) {
            self.dirty.insert(DirtyFlags::IMAGES);
        }
        self.unit_maps = Some(maps);
    }

    /// Step 6: per resource kind, bind every dirty slot with a live unit-map
    /// entry, diffing per unit through the shadow cache.
    fn flush_resources(&mut self) {
        let maps = match self.unit_maps.clone() {
            Some(maps) => maps,
            None => return,
        };

        if self.dirty.contains(DirtyFlags::TEXTURES) {
            for &stage in &ALL_STAGES {
                for (slot, texture) in self.textures[stage.index()].iter().enumerate() {
                    if let Some(texture) = texture {
                        if let Some(unit) = maps.textures.unit(stage, slot as u32) {
                            self.cache
                                .bind_texture(&self.gl, unit, texture.target, texture.glname());
                        }
                    }
                }
            }
            self.dirty.remove(DirtyFlags::TEXTURES);
        }

        if self.dirty.contains(DirtyFlags::SAMPLERS) {
            // sampler slot s binds to the unit of texture slot s
            for &stage in &ALL_STAGES {
                for (slot, sampler) in self.samplers[stage.index()].iter().enumerate() {
                    if let Some(sampler) = sampler {
                        if let Some(unit) = maps.textures.unit(stage, slot as u32) {
                            self.cache.bind_sampler(&self.gl, unit, sampler.glname);
                        }
                    }
                }
            }
            self.dirty.remove(DirtyFlags::SAMPLERS);
        }

        if self.dirty.contains(DirtyFlags::CONSTANT_BUFFERS) {
            for &stage in &ALL_STAGES {
                for (slot, buffer) in self.constant_buffers[stage.index()].iter().enumerate() {
                    if let Some(buffer) = buffer {
                        if let Some(unit) = maps.constant_buffers.unit(stage, slot as u32) {
                            self.streaming
                                .upload_and_bind(&self.gl, &mut self.cache, unit, buffer);
                        }
                    }
                }
            }
            self.dirty.remove(DirtyFlags::CONSTANT_BUFFERS);
        }

        if self.dirty.contains(DirtyFlags::STORAGE_BUFFERS) {
            for &stage in &ALL_STAGES {
                for (slot, buffer) in self.storage_buffers[stage.index()].iter().enumerate() {
                    if let Some(buffer) = buffer {
                        if let Some(unit) = maps.storage_buffers.unit(stage, slot as u32) {
                            self.cache.bind_storage_buffer(
                                &self.gl,
                                unit,
                                BufferRangeState {
                                    buffer: buffer.glname(),
                                    offset: 0,
                                    size: buffer.size as _,
                                },
                            );
                        }
                    }
                }
            }
            self.dirty.remove(DirtyFlags::STORAGE_BUFFERS);
        }

        if self.dirty.contains(DirtyFlags::IMAGES) {
            for &stage in &ALL_STAGES {
                for (slot, image) in self.images[stage.index()].iter().enumerate() {
                    if let Some(image) = image {
                        if let Some(unit) = maps.images.unit(stage, slot as u32) {
                            self.cache.bind_image(
                                &self.gl,
                                unit,
                                ImageUnitState {
                                    texture: image.texture.glname(),
                                    level: image.level,
                                    layered: image.layered,
                                    layer: image.layer,
                                    access: image.access,
                                    format: image.format,
                                },
                            );
                        }
                    }
                }
            }
            self.dirty.remove(DirtyFlags::IMAGES);
        }
    }

    fn flush_input_assembler(&mut self) {
        let index_buffer = self
            .index_buffer
            .as_ref()
            .map_or(0, |(buffer, _, _)| buffer.glname());
        self.cache.bind_index_buffer(&self.gl, index_buffer);

        let layout = match &self.input_layout {
            Some(layout) => layout.clone(),
            None => {
                for attrib in 0..MAX_VERTEX_ATTRIBS {
                    self.cache.set_attrib_enabled(&self.gl, attrib as u32, false);
                }
                return;
            }
        };

        match self.ia_strategy {
            IaStrategy::AttribBinding => {
                for (attrib, element) in layout.elements.iter().enumerate() {
                    self.cache.set_attrib_format(
                        &self.gl,
                        attrib as u32,
                        VertexAttribFormatState {
                            size: element.size,
                            ty: element.ty,
                            normalized: element.normalized,
                            relative_offset: element.offset,
                            binding: element.buffer_slot,
                        },
                    );
                    self.cache.set_attrib_enabled(&self.gl, attrib as u32, true);
                }
                for (slot, vertex_buffer) in self.vertex_buffers.iter().enumerate() {
                    if let Some(vb) = vertex_buffer {
                        let divisor = layout
                            .elements
                            .iter()
                            .find(|e| e.buffer_slot == slot as u32)
                            .map_or(0, |e| e.instance_divisor);
                        self.cache.bind_vertex_buffer(
                            &self.gl,
                            slot as u32,
                            VertexBufferBindingState {
                                buffer: vb.buffer.glname(),
                                offset: vb.offset as _,
                                stride: vb.stride as _,
                                divisor,
                            },
                        );
                    }
                }
            }
            IaStrategy::LegacyPointer => {
                for (attrib, element) in layout.elements.iter().enumerate() {
                    match &self.vertex_buffers[element.buffer_slot as usize] {
                        Some(vb) => {
                            self.cache.set_attrib_pointer(
                                &self.gl,
                                attrib as u32,
                                vb.buffer.glname(),
                                element.size,
                                element.ty,
                                element.normalized,
                                vb.stride as GLsizei,
                                vb.offset as usize + element.offset as usize,
                                element.instance_divisor,
                            );
                            self.cache.set_attrib_enabled(&self.gl, attrib as u32, true);
                        }
                        None => {
                            self.cache.set_attrib_enabled(&self.gl, attrib as u32, false);
                        }
                    }
                }
            }
        }

        for attrib in layout.elements.len()..MAX_VERTEX_ATTRIBS {
            self.cache.set_attrib_enabled(&self.gl, attrib as u32, false);
        }
    }

    /// Step 7.
    fn flush_framebuffer(&mut self) -> bool {
        if !self.dirty.contains(DirtyFlags::FRAMEBUFFER) {
            return true;
        }
        if self.framebuffer_config.attachments().next().is_none() {
            // no attachments means the default framebuffer
            self.cache.bind_draw_framebuffer(&self.gl, 0);
            self.current_framebuffer = None;
            self.dirty.remove(DirtyFlags::FRAMEBUFFER);
            return true;
        }
        let framebuffer = {
            let mut pool = self.device.framebuffer_names.lock().unwrap();
            self.framebuffers.allocate(
                &self.gl,
                &mut self.cache,
                &self.framebuffer_config,
                &mut pool,
            )
        };
        match framebuffer {
            Some(fb) => {
                self.cache.bind_draw_framebuffer(&self.gl, fb.glname());
                self.current_framebuffer = Some(fb);
                self.dirty.remove(DirtyFlags::FRAMEBUFFER);
                true
            }
            None => false,
        }
    }
}

impl<D: Driver> Drop for Context<D> {
    fn drop(&mut self) {
        let mut pool = self.device.buffer_names.lock().unwrap();
        self.streaming.release_all(&self.gl, &mut pool);
        #[cfg(feature = "shader-trace")]
        self.trace.release(&self.gl, &mut pool);
    }
}

//--------------------------------------------------------------------------------------
