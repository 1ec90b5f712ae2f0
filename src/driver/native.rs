//! [`Driver`] implementation over the generated OpenGL bindings.

use super::{Driver, WaitStatus};
use crate::api;
use crate::api::types::{
    GLbitfield, GLboolean, GLchar, GLenum, GLint, GLintptr, GLsizei, GLsizeiptr, GLsync, GLuint,
};
use std::ffi::CStr;
use std::os::raw::c_void;
use std::ptr;

fn to_gl_bool(v: bool) -> GLboolean {
    if v {
        api::TRUE
    } else {
        api::FALSE
    }
}

/// The real driver. Each method is a single forwarded GL call.
pub struct NativeGl {
    gl: api::Gl,
}

impl NativeGl {
    /// Loads the function pointers through the given loader, typically
    /// `|s| context.get_proc_address(s)`.
    pub fn load_with<F>(loader: F) -> NativeGl
    where
        F: FnMut(&'static str) -> *const c_void,
    {
        NativeGl {
            gl: api::Gl::load_with(loader),
        }
    }

    pub fn raw(&self) -> &api::Gl {
        &self.gl
    }
}

impl Driver for NativeGl {
    type Fence = GLsync;

    fn get_integer(&self, pname: GLenum) -> GLint {
        let mut value = 0;
        unsafe {
            self.gl.GetIntegerv(pname, &mut value);
        }
        value
    }

    fn get_string(&self, pname: GLenum) -> String {
        unsafe {
            let s = self.gl.GetString(pname);
            if s.is_null() {
                String::new()
            } else {
                CStr::from_ptr(s as *const GLchar)
                    .to_string_lossy()
                    .into_owned()
            }
        }
    }

    fn enable(&self, cap: GLenum) {
        unsafe {
            self.gl.Enable(cap);
        }
    }

    fn disable(&self, cap: GLenum) {
        unsafe {
            self.gl.Disable(cap);
        }
    }

    fn enable_index(&self, cap: GLenum, index: GLuint) {
        unsafe {
            self.gl.Enablei(cap, index);
        }
    }

    fn disable_index(&self, cap: GLenum, index: GLuint) {
        unsafe {
            self.gl.Disablei(cap, index);
        }
    }

    fn blend_func_separate(
        &self,
        buf: GLuint,
        src_rgb: GLenum,
        dst_rgb: GLenum,
        src_alpha: GLenum,
        dst_alpha: GLenum,
    ) {
        unsafe {
            self.gl
                .BlendFuncSeparatei(buf, src_rgb, dst_rgb, src_alpha, dst_alpha);
        }
    }

    fn blend_equation_separate(&self, buf: GLuint, mode_rgb: GLenum, mode_alpha: GLenum) {
        unsafe {
            self.gl.BlendEquationSeparatei(buf, mode_rgb, mode_alpha);
        }
    }

    fn blend_color(&self, red: f32, green: f32, blue: f32, alpha: f32) {
        unsafe {
            self.gl.BlendColor(red, green, blue, alpha);
        }
    }

    fn color_mask(&self, buf: GLuint, red: bool, green: bool, blue: bool, alpha: bool) {
        unsafe {
            self.gl.ColorMaski(
                buf,
                to_gl_bool(red),
                to_gl_bool(green),
                to_gl_bool(blue),
                to_gl_bool(alpha),
            );
        }
    }

    fn sample_mask(&self, index: GLuint, mask: GLbitfield) {
        unsafe {
            self.gl.SampleMaski(index, mask);
        }
    }

    fn depth_func(&self, func: GLenum) {
        unsafe {
            self.gl.DepthFunc(func);
        }
    }

    fn depth_mask(&self, flag: bool) {
        unsafe {
            self.gl.DepthMask(to_gl_bool(flag));
        }
    }

    fn depth_range(&self, near: f64, far: f64) {
        unsafe {
            self.gl.DepthRange(near, far);
        }
    }

    fn stencil_func_separate(&self, face: GLenum, func: GLenum, reference: GLint, mask: GLuint) {
        unsafe {
            self.gl.StencilFuncSeparate(face, func, reference, mask);
        }
    }

    fn stencil_op_separate(&self, face: GLenum, sfail: GLenum, dpfail: GLenum, dppass: GLenum) {
        unsafe {
            self.gl.StencilOpSeparate(face, sfail, dpfail, dppass);
        }
    }

    fn stencil_mask_separate(&self, face: GLenum, mask: GLuint) {
        unsafe {
            self.gl.StencilMaskSeparate(face, mask);
        }
    }

    fn cull_face(&self, mode: GLenum) {
        unsafe {
            self.gl.CullFace(mode);
        }
    }

    fn front_face(&self, mode: GLenum) {
        unsafe {
            self.gl.FrontFace(mode);
        }
    }

    fn polygon_mode(&self, mode: GLenum) {
        unsafe {
            self.gl.PolygonMode(api::FRONT_AND_BACK, mode);
        }
    }

    fn polygon_offset(&self, factor: f32, units: f32) {
        unsafe {
            self.gl.PolygonOffset(factor, units);
        }
    }

    fn viewport_indexed(&self, index: GLuint, x: f32, y: f32, width: f32, height: f32) {
        unsafe {
            self.gl.ViewportIndexedf(index, x, y, width, height);
        }
    }

    fn depth_range_indexed(&self, index: GLuint, near: f64, far: f64) {
        unsafe {
            self.gl.DepthRangeIndexed(index, near, far);
        }
    }

    fn scissor_indexed(&self, index: GLuint, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        unsafe {
            let v = [x, y, width, height];
            self.gl.ScissorIndexedv(index, v.as_ptr());
        }
    }

    fn create_program(&self) -> GLuint {
        unsafe { self.gl.CreateProgram() }
    }

    fn delete_program(&self, program: GLuint) {
        unsafe {
            self.gl.DeleteProgram(program);
        }
    }

    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        unsafe {
            self.gl.AttachShader(program, shader);
        }
    }

    fn link_program(&self, program: GLuint) {
        unsafe {
            self.gl.LinkProgram(program);
        }
    }

    fn link_status(&self, program: GLuint) -> bool {
        let mut status = 0;
        unsafe {
            self.gl
                .GetProgramiv(program, api::LINK_STATUS, &mut status);
        }
        status == api::TRUE as GLint
    }

    fn program_info_log(&self, program: GLuint) -> String {
        let mut log_len = 0;
        unsafe {
            self.gl
                .GetProgramiv(program, api::INFO_LOG_LENGTH, &mut log_len);
        }
        if log_len <= 0 {
            return String::new();
        }
        let mut log = vec![0u8; log_len as usize];
        unsafe {
            self.gl.GetProgramInfoLog(
                program,
                log_len,
                ptr::null_mut(),
                log.as_mut_ptr() as *mut GLchar,
            );
        }
        log.pop(); // trailing NUL
        String::from_utf8_lossy(&log).into_owned()
    }

    fn use_program(&self, program: GLuint) {
        unsafe {
            self.gl.UseProgram(program);
        }
    }

    fn uniform_block_binding(&self, program: GLuint, block_index: GLuint, binding: GLuint) {
        unsafe {
            self.gl.UniformBlockBinding(program, block_index, binding);
        }
    }

    fn shader_storage_block_binding(&self, program: GLuint, block_index: GLuint, binding: GLuint) {
        unsafe {
            self.gl
                .ShaderStorageBlockBinding(program, block_index, binding);
        }
    }

    fn program_uniform_1i(&self, program: GLuint, location: GLint, value: GLint) {
        unsafe {
            self.gl.ProgramUniform1i(program, location, value);
        }
    }

    fn bind_texture_unit(&self, unit: GLuint, target: GLenum, texture: GLuint) {
        // DSA bind ignores the target; kept in the signature for drivers that
        // route through ActiveTexture+BindTexture.
        let _ = target;
        unsafe {
            self.gl.BindTextureUnit(unit, texture);
        }
    }

    fn bind_sampler(&self, unit: GLuint, sampler: GLuint) {
        unsafe {
            self.gl.BindSampler(unit, sampler);
        }
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
        unsafe {
            self.gl
                .BindImageTexture(unit, texture, level, to_gl_bool(layered), layer, access, format);
        }
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        unsafe {
            self.gl.BindBuffer(target, buffer);
        }
    }

    fn bind_buffer_range(
        &self,
        target: GLenum,
        index: GLuint,
        buffer: GLuint,
        offset: GLintptr,
        size: GLsizeiptr,
    ) {
        unsafe {
            self.gl.BindBufferRange(target, index, buffer, offset, size);
        }
    }

    fn bind_vertex_buffer(
        &self,
        binding: GLuint,
        buffer: GLuint,
        offset: GLintptr,
        stride: GLsizei,
    ) {
        unsafe {
            self.gl.BindVertexBuffer(binding, buffer, offset, stride);
        }
    }

    fn vertex_attrib_format(
        &self,
        attrib: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        relative_offset: GLuint,
    ) {
        unsafe {
            self.gl
                .VertexAttribFormat(attrib, size, ty, to_gl_bool(normalized), relative_offset);
        }
    }

    fn vertex_attrib_binding(&self, attrib: GLuint, binding: GLuint) {
        unsafe {
            self.gl.VertexAttribBinding(attrib, binding);
        }
    }

    fn vertex_binding_divisor(&self, binding: GLuint, divisor: GLuint) {
        unsafe {
            self.gl.VertexBindingDivisor(binding, divisor);
        }
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
        unsafe {
            self.gl.VertexAttribPointer(
                attrib,
                size,
                ty,
                to_gl_bool(normalized),
                stride,
                offset as *const c_void,
            );
        }
    }

    fn vertex_attrib_divisor(&self, attrib: GLuint, divisor: GLuint) {
        unsafe {
            self.gl.VertexAttribDivisor(attrib, divisor);
        }
    }

    fn enable_vertex_attrib(&self, attrib: GLuint) {
        unsafe {
            self.gl.EnableVertexAttribArray(attrib);
        }
    }

    fn disable_vertex_attrib(&self, attrib: GLuint) {
        unsafe {
            self.gl.DisableVertexAttribArray(attrib);
        }
    }

    fn create_framebuffer(&self) -> GLuint {
        let mut name = 0;
        unsafe {
            self.gl.CreateFramebuffers(1, &mut name);
        }
        name
    }

    fn delete_framebuffer(&self, framebuffer: GLuint) {
        unsafe {
            self.gl.DeleteFramebuffers(1, &framebuffer);
        }
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        unsafe {
            self.gl.BindFramebuffer(target, framebuffer);
        }
    }

    fn framebuffer_texture(
        &self,
        target: GLenum,
        attachment: GLenum,
        texture: GLuint,
        level: GLint,
    ) {
        // attaches to the framebuffer bound at `target`
        unsafe {
            self.gl.FramebufferTexture(target, attachment, texture, level);
        }
    }

    fn framebuffer_texture_layer(
        &self,
        target: GLenum,
        attachment: GLenum,
        texture: GLuint,
        level: GLint,
        layer: GLint,
    ) {
        unsafe {
            self.gl
                .FramebufferTextureLayer(target, attachment, texture, level, layer);
        }
    }

    fn draw_buffers(&self, bufs: &[GLenum]) {
        unsafe {
            self.gl.DrawBuffers(bufs.len() as GLsizei, bufs.as_ptr());
        }
    }

    fn check_framebuffer_status(&self, target: GLenum) -> GLenum {
        unsafe { self.gl.CheckFramebufferStatus(target) }
    }

    fn clear_buffer_fv(&self, buffer: GLenum, drawbuffer: GLint, values: &[f32; 4]) {
        unsafe {
            self.gl.ClearBufferfv(buffer, drawbuffer, values.as_ptr());
        }
    }

    fn clear_buffer_iv(&self, buffer: GLenum, drawbuffer: GLint, value: GLint) {
        unsafe {
            self.gl.ClearBufferiv(buffer, drawbuffer, &value);
        }
    }

    fn clear_buffer_fi(&self, buffer: GLenum, drawbuffer: GLint, depth: f32, stencil: GLint) {
        unsafe {
            self.gl.ClearBufferfi(buffer, drawbuffer, depth, stencil);
        }
    }

    fn create_texture(&self, target: GLenum) -> GLuint {
        let mut name = 0;
        unsafe {
            self.gl.CreateTextures(target, 1, &mut name);
        }
        name
    }

    fn delete_texture(&self, texture: GLuint) {
        unsafe {
            self.gl.DeleteTextures(1, &texture);
        }
    }

    fn create_buffer(&self) -> GLuint {
        let mut name = 0;
        unsafe {
            self.gl.CreateBuffers(1, &mut name);
        }
        name
    }

    fn delete_buffer(&self, buffer: GLuint) {
        unsafe {
            self.gl.DeleteBuffers(1, &buffer);
        }
    }

    fn buffer_storage(&self, buffer: GLuint, size: GLsizeiptr, flags: GLbitfield) {
        unsafe {
            self.gl
                .NamedBufferStorage(buffer, size, ptr::null(), flags);
        }
    }

    fn buffer_data(&self, buffer: GLuint, size: GLsizeiptr, usage: GLenum) {
        unsafe {
            self.gl.NamedBufferData(buffer, size, ptr::null(), usage);
        }
    }

    fn buffer_sub_data(&self, buffer: GLuint, offset: GLintptr, data: &[u8]) {
        unsafe {
            self.gl.NamedBufferSubData(
                buffer,
                offset,
                data.len() as GLsizeiptr,
                data.as_ptr() as *const c_void,
            );
        }
    }

    fn map_buffer_range(
        &self,
        buffer: GLuint,
        offset: GLintptr,
        length: GLsizeiptr,
        access: GLbitfield,
    ) -> *mut u8 {
        unsafe {
            self.gl
                .MapNamedBufferRange(buffer, offset, length, access) as *mut u8
        }
    }

    fn unmap_buffer(&self, buffer: GLuint) -> bool {
        unsafe { self.gl.UnmapNamedBuffer(buffer) == api::TRUE }
    }

    fn memory_barrier(&self, barriers: GLbitfield) {
        unsafe {
            self.gl.MemoryBarrier(barriers);
        }
    }

    fn draw_arrays_instanced(
        &self,
        mode: GLenum,
        first: GLint,
        count: GLsizei,
        instances: GLsizei,
    ) {
        unsafe {
            self.gl.DrawArraysInstanced(mode, first, count, instances);
        }
    }

    fn draw_elements_instanced(
        &self,
        mode: GLenum,
        count: GLsizei,
        ty: GLenum,
        offset: usize,
        instances: GLsizei,
    ) {
        unsafe {
            self.gl
                .DrawElementsInstanced(mode, count, ty, offset as *const c_void, instances);
        }
    }

    fn dispatch_compute(&self, x: GLuint, y: GLuint, z: GLuint) {
        unsafe {
            self.gl.DispatchCompute(x, y, z);
        }
    }

    fn fence_sync(&self) -> GLsync {
        unsafe { self.gl.FenceSync(api::SYNC_GPU_COMMANDS_COMPLETE, 0) }
    }

    fn client_wait_sync(&self, fence: GLsync, timeout_ns: u64) -> WaitStatus {
        let status =
            unsafe { self.gl.ClientWaitSync(fence, api::SYNC_FLUSH_COMMANDS_BIT, timeout_ns) };
        match status {
            api::ALREADY_SIGNALED => WaitStatus::AlreadySignaled,
            api::CONDITION_SATISFIED => WaitStatus::ConditionSatisfied,
            api::TIMEOUT_EXPIRED => WaitStatus::TimeoutExpired,
            _ => WaitStatus::Failed,
        }
    }

    fn delete_sync(&self, fence: GLsync) {
        unsafe {
            self.gl.DeleteSync(fence);
        }
    }
}
