//! Instrumented driver for the test suite.
//!
//! Records every state-mutating call as a [`DriverCall`], hands out sequential object
//! names and fence ids, and lets tests inject fence completion and link/completeness
//! failures.

use super::{Driver, WaitStatus};
use crate::api;
use crate::api::types::{GLbitfield, GLenum, GLint, GLintptr, GLsizei, GLsizeiptr, GLuint};
use fxhash::{FxHashMap, FxHashSet};
use std::cell::{Cell, RefCell};

#[derive(Clone, Debug, PartialEq)]
pub enum DriverCall {
    Enable(GLenum),
    Disable(GLenum),
    EnableIndex(GLenum, GLuint),
    DisableIndex(GLenum, GLuint),
    BlendFuncSeparate(GLuint, GLenum, GLenum, GLenum, GLenum),
    BlendEquationSeparate(GLuint, GLenum, GLenum),
    BlendColor(f32, f32, f32, f32),
    ColorMask(GLuint, bool, bool, bool, bool),
    SampleMask(GLuint, GLbitfield),
    DepthFunc(GLenum),
    DepthMask(bool),
    DepthRange(f64, f64),
    StencilFuncSeparate(GLenum, GLenum, GLint, GLuint),
    StencilOpSeparate(GLenum, GLenum, GLenum, GLenum),
    StencilMaskSeparate(GLenum, GLuint),
    CullFace(GLenum),
    FrontFace(GLenum),
    PolygonMode(GLenum),
    PolygonOffset(f32, f32),
    ViewportIndexed(GLuint, f32, f32, f32, f32),
    DepthRangeIndexed(GLuint, f64, f64),
    ScissorIndexed(GLuint, GLint, GLint, GLsizei, GLsizei),
    CreateProgram(GLuint),
    DeleteProgram(GLuint),
    AttachShader(GLuint, GLuint),
    LinkProgram(GLuint),
    UseProgram(GLuint),
    UniformBlockBinding(GLuint, GLuint, GLuint),
    ShaderStorageBlockBinding(GLuint, GLuint, GLuint),
    ProgramUniform1i(GLuint, GLint, GLint),
    BindTextureUnit(GLuint, GLenum, GLuint),
    BindSampler(GLuint, GLuint),
    BindImageTexture(GLuint, GLuint, GLint, bool, GLint, GLenum, GLenum),
    BindBuffer(GLenum, GLuint),
    BindBufferRange(GLenum, GLuint, GLuint, GLintptr, GLsizeiptr),
    BindVertexBuffer(GLuint, GLuint, GLintptr, GLsizei),
    VertexAttribFormat(GLuint, GLint, GLenum, bool, GLuint),
    VertexAttribBinding(GLuint, GLuint),
    VertexBindingDivisor(GLuint, GLuint),
    VertexAttribPointer(GLuint, GLint, GLenum, bool, GLsizei, usize),
    VertexAttribDivisor(GLuint, GLuint),
    EnableVertexAttrib(GLuint),
    DisableVertexAttrib(GLuint),
    CreateFramebuffer(GLuint),
    DeleteFramebuffer(GLuint),
    BindFramebuffer(GLenum, GLuint),
    FramebufferTexture(GLenum, GLenum, GLuint, GLint),
    FramebufferTextureLayer(GLenum, GLenum, GLuint, GLint, GLint),
    DrawBuffers(Vec<GLenum>),
    ClearBufferFv(GLenum, GLint, [f32; 4]),
    ClearBufferIv(GLenum, GLint, GLint),
    ClearBufferFi(GLenum, GLint, f32, GLint),
    CreateTexture(GLenum, GLuint),
    DeleteTexture(GLuint),
    CreateBuffer(GLuint),
    DeleteBuffer(GLuint),
    BufferStorage(GLuint, GLsizeiptr, GLbitfield),
    BufferData(GLuint, GLsizeiptr, GLenum),
    BufferSubData(GLuint, GLintptr, usize),
    MapBufferRange(GLuint, GLintptr, GLsizeiptr, GLbitfield),
    UnmapBuffer(GLuint),
    MemoryBarrier(GLbitfield),
    DrawArraysInstanced(GLenum, GLint, GLsizei, GLsizei),
    DrawElementsInstanced(GLenum, GLsizei, GLenum, usize, GLsizei),
    DispatchCompute(GLuint, GLuint, GLuint),
    FenceSync(u64),
    DeleteSync(u64),
}

pub struct MockGl {
    calls: RefCell<Vec<DriverCall>>,
    next_name: Cell<GLuint>,
    next_fence: Cell<u64>,
    signaled: RefCell<FxHashSet<u64>>,
    // name -> CPU backing store handed out by map_buffer_range
    backings: RefCell<FxHashMap<GLuint, Box<[u8]>>>,
    integers: RefCell<FxHashMap<GLenum, GLint>>,
    pub fail_link: Cell<bool>,
    pub framebuffer_status: Cell<GLenum>,
}

impl MockGl {
    pub fn new() -> MockGl {
        MockGl {
            calls: RefCell::new(Vec::new()),
            next_name: Cell::new(1),
            next_fence: Cell::new(1),
            signaled: RefCell::new(FxHashSet::default()),
            backings: RefCell::new(FxHashMap::default()),
            integers: RefCell::new(FxHashMap::default()),
            fail_link: Cell::new(false),
            framebuffer_status: Cell::new(api::FRAMEBUFFER_COMPLETE),
        }
    }

    fn record(&self, call: DriverCall) {
        self.calls.borrow_mut().push(call);
    }

    fn fresh_name(&self) -> GLuint {
        let name = self.next_name.get();
        self.next_name.set(name + 1);
        name
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn call_count<F: Fn(&DriverCall) -> bool>(&self, pred: F) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    /// Marks a fence as signaled for subsequent `client_wait_sync` calls.
    pub fn signal_fence(&self, fence: u64) {
        self.signaled.borrow_mut().insert(fence);
    }

    pub fn set_integer(&self, pname: GLenum, value: GLint) {
        self.integers.borrow_mut().insert(pname, value);
    }

    pub fn backing_contents(&self, buffer: GLuint) -> Vec<u8> {
        self.backings.borrow()[&buffer].to_vec()
    }
}

impl Driver for MockGl {
    type Fence = u64;

    fn get_integer(&self, pname: GLenum) -> GLint {
        match self.integers.borrow().get(&pname) {
            Some(&v) => v,
            None => match pname {
                api::MAX_COLOR_ATTACHMENTS => 8,
                api::MAX_COMBINED_TEXTURE_IMAGE_UNITS => 96,
                api::MAX_IMAGE_UNITS => 32,
                api::MAX_UNIFORM_BUFFER_BINDINGS => 84,
                api::MAX_SHADER_STORAGE_BUFFER_BINDINGS => 32,
                api::MAX_VIEWPORTS => 16,
                api::UNIFORM_BUFFER_OFFSET_ALIGNMENT => 256,
                api::MAX_VERTEX_ATTRIBS => 16,
                _ => 0,
            },
        }
    }

    fn get_string(&self, _pname: GLenum) -> String {
        "mock".to_owned()
    }

    fn enable(&self, cap: GLenum) {
        self.record(DriverCall::Enable(cap));
    }

    fn disable(&self, cap: GLenum) {
        self.record(DriverCall::Disable(cap));
    }

    fn enable_index(&self, cap: GLenum, index: GLuint) {
        self.record(DriverCall::EnableIndex(cap, index));
    }

    fn disable_index(&self, cap: GLenum, index: GLuint) {
        self.record(DriverCall::DisableIndex(cap, index));
    }

    fn blend_func_separate(
        &self,
        buf: GLuint,
        src_rgb: GLenum,
        dst_rgb: GLenum,
        src_alpha: GLenum,
        dst_alpha: GLenum,
    ) {
        self.record(DriverCall::BlendFuncSeparate(
            buf, src_rgb, dst_rgb, src_alpha, dst_alpha,
        ));
    }

    fn blend_equation_separate(&self, buf: GLuint, mode_rgb: GLenum, mode_alpha: GLenum) {
        self.record(DriverCall::BlendEquationSeparate(buf, mode_rgb, mode_alpha));
    }

    fn blend_color(&self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.record(DriverCall::BlendColor(red, green, blue, alpha));
    }

    fn color_mask(&self, buf: GLuint, red: bool, green: bool, blue: bool, alpha: bool) {
        self.record(DriverCall::ColorMask(buf, red, green, blue, alpha));
    }

    fn sample_mask(&self, index: GLuint, mask: GLbitfield) {
        self.record(DriverCall::SampleMask(index, mask));
    }

    fn depth_func(&self, func: GLenum) {
        self.record(DriverCall::DepthFunc(func));
    }

    fn depth_mask(&self, flag: bool) {
        self.record(DriverCall::DepthMask(flag));
    }

    fn depth_range(&self, near: f64, far: f64) {
        self.record(DriverCall::DepthRange(near, far));
    }

    fn stencil_func_separate(&self, face: GLenum, func: GLenum, reference: GLint, mask: GLuint) {
        self.record(DriverCall::StencilFuncSeparate(face, func, reference, mask));
    }

    fn stencil_op_separate(&self, face: GLenum, sfail: GLenum, dpfail: GLenum, dppass: GLenum) {
        self.record(DriverCall::StencilOpSeparate(face, sfail, dpfail, dppass));
    }

    fn stencil_mask_separate(&self, face: GLenum, mask: GLuint) {
        self.record(DriverCall::StencilMaskSeparate(face, mask));
    }

    fn cull_face(&self, mode: GLenum) {
        self.record(DriverCall::CullFace(mode));
    }

    fn front_face(&self, mode: GLenum) {
        self.record(DriverCall::FrontFace(mode));
    }

    fn polygon_mode(&self, mode: GLenum) {
        self.record(DriverCall::PolygonMode(mode));
    }

    fn polygon_offset(&self, factor: f32, units: f32) {
        self.record(DriverCall::PolygonOffset(factor, units));
    }

    fn viewport_indexed(&self, index: GLuint, x: f32, y: f32, width: f32, height: f32) {
        self.record(DriverCall::ViewportIndexed(index, x, y, width, height));
    }

    fn depth_range_indexed(&self, index: GLuint, near: f64, far: f64) {
        self.record(DriverCall::DepthRangeIndexed(index, near, far));
    }

    fn scissor_indexed(&self, index: GLuint, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.record(DriverCall::ScissorIndexed(index, x, y, width, height));
    }

    fn create_program(&self) -> GLuint {
        let name = self.fresh_name();
        self.record(DriverCall::CreateProgram(name));
        name
    }

    fn delete_program(&self, program: GLuint) {
        self.record(DriverCall::DeleteProgram(program));
    }

    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        self.record(DriverCall::AttachShader(program, shader));
    }

    fn link_program(&self, program: GLuint) {
        self.record(DriverCall::LinkProgram(program));
    }

    fn link_status(&self, _program: GLuint) -> bool {
        !self.fail_link.get()
    }

    fn program_info_log(&self, _program: GLuint) -> String {
        if self.fail_link.get() {
            "mock link failure".to_owned()
        } else {
            String::new()
        }
    }

    fn use_program(&self, program: GLuint) {
        self.record(DriverCall::UseProgram(program));
    }

    fn uniform_block_binding(&self, program: GLuint, block_index: GLuint, binding: GLuint) {
        self.record(DriverCall::UniformBlockBinding(program, block_index, binding));
    }

    fn shader_storage_block_binding(&self, program: GLuint, block_index: GLuint, binding: GLuint) {
        self.record(DriverCall::ShaderStorageBlockBinding(
            program,
            block_index,
            binding,
        ));
    }

    fn program_uniform_1i(&self, program: GLuint, location: GLint, value: GLint) {
        self.record(DriverCall::ProgramUniform1i(program, location, value));
    }

    fn bind_texture_unit(&self, unit: GLuint, target: GLenum, texture: GLuint) {
        self.record(DriverCall::BindTextureUnit(unit, target, texture));
    }

    fn bind_sampler(&self, unit: GLuint, sampler: GLuint) {
        self.record(DriverCall::BindSampler(unit, sampler));
    }

    fn bind_image_texture(
        &self,
        unit: GLuint,
        texture: GLuint,
        level: GLint,
        layered: bool,
        layer: GLint,
        access: GLenum,
        format: GLenum,
    ) {
        self.record(DriverCall::BindImageTexture(
            unit, texture, level, layered, layer, access, format,
        ));
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        self.record(DriverCall::BindBuffer(target, buffer));
    }

    fn bind_buffer_range(
        &self,
        target: GLenum,
        index: GLuint,
        buffer: GLuint,
        offset: GLintptr,
        size: GLsizeiptr,
    ) {
        self.record(DriverCall::BindBufferRange(target, index, buffer, offset, size));
    }

    fn bind_vertex_buffer(
        &self,
        binding: GLuint,
        buffer: GLuint,
        offset: GLintptr,
        stride: GLsizei,
    ) {
        self.record(DriverCall::BindVertexBuffer(binding, buffer, offset, stride));
    }

    fn vertex_attrib_format(
        &self,
        attrib: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        relative_offset: GLuint,
    ) {
        self.record(DriverCall::VertexAttribFormat(
            attrib,
            size,
            ty,
            normalized,
            relative_offset,
        ));
    }

    fn vertex_attrib_binding(&self, attrib: GLuint, binding: GLuint) {
        self.record(DriverCall::VertexAttribBinding(attrib, binding));
    }

    fn vertex_binding_divisor(&self, binding: GLuint, divisor: GLuint) {
        self.record(DriverCall::VertexBindingDivisor(binding, divisor));
    }

    fn vertex_attrib_pointer(
        &self,
        attrib: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        stride: GLsizei,
        offset: usize,
    ) {
        self.record(DriverCall::VertexAttribPointer(
            attrib, size, ty, normalized, stride, offset,
        ));
    }

    fn vertex_attrib_divisor(&self, attrib: GLuint, divisor: GLuint) {
        self.record(DriverCall::VertexAttribDivisor(attrib, divisor));
    }

    fn enable_vertex_attrib(&self, attrib: GLuint) {
        self.record(DriverCall::EnableVertexAttrib(attrib));
    }

    fn disable_vertex_attrib(&self, attrib: GLuint) {
        self.record(DriverCall::DisableVertexAttrib(attrib));
    }

    fn create_framebuffer(&self) -> GLuint {
        let name = self.fresh_name();
        self.record(DriverCall::CreateFramebuffer(name));
        name
    }

    fn delete_framebuffer(&self, framebuffer: GLuint) {
        self.record(DriverCall::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        self.record(DriverCall::BindFramebuffer(target, framebuffer));
    }

    fn framebuffer_texture(
        &self,
        target: GLenum,
        attachment: GLenum,
        texture: GLuint,
        level: GLint,
    ) {
        self.record(DriverCall::FramebufferTexture(target, attachment, texture, level));
    }

    fn framebuffer_texture_layer(
        &self,
        target: GLenum,
        attachment: GLenum,
        texture: GLuint,
        level: GLint,
        layer: GLint,
    ) {
        self.record(DriverCall::FramebufferTextureLayer(
            target, attachment, texture, level, layer,
        ));
    }

    fn draw_buffers(&self, bufs: &[GLenum]) {
        self.record(DriverCall::DrawBuffers(bufs.to_vec()));
    }

    fn check_framebuffer_status(&self, _target: GLenum) -> GLenum {
        self.framebuffer_status.get()
    }

    fn clear_buffer_fv(&self, buffer: GLenum, drawbuffer: GLint, values: &[f32; 4]) {
        self.record(DriverCall::ClearBufferFv(buffer, drawbuffer, *values));
    }

    fn clear_buffer_iv(&self, buffer: GLenum, drawbuffer: GLint, value: GLint) {
        self.record(DriverCall::ClearBufferIv(buffer, drawbuffer, value));
    }

    fn clear_buffer_fi(&self, buffer: GLenum, drawbuffer: GLint, depth: f32, stencil: GLint) {
        self.record(DriverCall::ClearBufferFi(buffer, drawbuffer, depth, stencil));
    }

    fn create_texture(&self, target: GLenum) -> GLuint {
        let name = self.fresh_name();
        self.record(DriverCall::CreateTexture(target, name));
        name
    }

    fn delete_texture(&self, texture: GLuint) {
        self.record(DriverCall::DeleteTexture(texture));
    }

    fn create_buffer(&self) -> GLuint {
        let name = self.fresh_name();
        self.record(DriverCall::CreateBuffer(name));
        name
    }

    fn delete_buffer(&self, buffer: GLuint) {
        self.backings.borrow_mut().remove(&buffer);
        self.record(DriverCall::DeleteBuffer(buffer));
    }

    fn buffer_storage(&self, buffer: GLuint, size: GLsizeiptr, flags: GLbitfield) {
        self.backings
            .borrow_mut()
            .insert(buffer, vec![0u8; size as usize].into_boxed_slice());
        self.record(DriverCall::BufferStorage(buffer, size, flags));
    }

    fn buffer_data(&self, buffer: GLuint, size: GLsizeiptr, usage: GLenum) {
        self.backings
            .borrow_mut()
            .insert(buffer, vec![0u8; size as usize].into_boxed_slice());
        self.record(DriverCall::BufferData(buffer, size, usage));
    }

    fn buffer_sub_data(&self, buffer: GLuint, offset: GLintptr, data: &[u8]) {
        if let Some(backing) = self.backings.borrow_mut().get_mut(&buffer) {
            let offset = offset as usize;
            backing[offset..offset + data.len()].copy_from_slice(data);
        }
        self.record(DriverCall::BufferSubData(buffer, offset, data.len()));
    }

    fn map_buffer_range(
        &self,
        buffer: GLuint,
        offset: GLintptr,
        length: GLsizeiptr,
        access: GLbitfield,
    ) -> *mut u8 {
        self.record(DriverCall::MapBufferRange(buffer, offset, length, access));
        match self.backings.borrow_mut().get_mut(&buffer) {
            // pointer into the boxed slice; stable as long as the buffer
            // is not re-allocated while mapped
            Some(backing) => unsafe { backing.as_mut_ptr().add(offset as usize) },
            None => std::ptr::null_mut(),
        }
    }

    fn unmap_buffer(&self, buffer: GLuint) -> bool {
        self.record(DriverCall::UnmapBuffer(buffer));
        true
    }

    fn memory_barrier(&self, barriers: GLbitfield) {
        self.record(DriverCall::MemoryBarrier(barriers));
    }

    fn draw_arrays_instanced(
        &self,
        mode: GLenum,
        first: GLint,
        count: GLsizei,
        instances: GLsizei,
    ) {
        self.record(DriverCall::DrawArraysInstanced(mode, first, count, instances));
    }

    fn draw_elements_instanced(
        &self,
        mode: GLenum,
        count: GLsizei,
        ty: GLenum,
        offset: usize,
        instances: GLsizei,
    ) {
        self.record(DriverCall::DrawElementsInstanced(
            mode, count, ty, offset, instances,
        ));
    }

    fn dispatch_compute(&self, x: GLuint, y: GLuint, z: GLuint) {
        self.record(DriverCall::DispatchCompute(x, y, z));
    }

    fn fence_sync(&self) -> u64 {
        let fence = self.next_fence.get();
        self.next_fence.set(fence + 1);
        self.record(DriverCall::FenceSync(fence));
        fence
    }

    fn client_wait_sync(&self, fence: u64, _timeout_ns: u64) -> WaitStatus {
        if self.signaled.borrow().contains(&fence) {
            WaitStatus::AlreadySignaled
        } else {
            WaitStatus::TimeoutExpired
        }
    }

    fn delete_sync(&self, fence: u64) {
        self.record(DriverCall::DeleteSync(fence));
    }
}
