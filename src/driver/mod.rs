//! The downstream driver seam.
//!
//! Every OpenGL entry point the core touches goes through the [`Driver`] trait, so the
//! whole state-cache/flush machinery can run against either the real API
//! ([`NativeGl`], backed by the generated bindings) or an instrumented mock that
//! records calls for the test suite.

use crate::api::types::{GLbitfield, GLenum, GLint, GLintptr, GLsizei, GLsizeiptr, GLuint};
use std::fmt;

mod native;
#[cfg(test)]
pub(crate) mod mock;

pub use self::native::NativeGl;

/// Result of a client-side fence wait.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitStatus {
    AlreadySignaled,
    ConditionSatisfied,
    TimeoutExpired,
    Failed,
}

impl WaitStatus {
    pub fn is_signaled(self) -> bool {
        match self {
            WaitStatus::AlreadySignaled | WaitStatus::ConditionSatisfied => true,
            _ => false,
        }
    }
}

/// The set of driver entry points used by the translation core.
///
/// Methods mirror the GL 4.5 call they forward to, one call per method; implementations
/// must not coalesce or reorder. All redundant-call elimination happens above this seam,
/// in the shadow state cache.
pub trait Driver {
    /// Fence handle type; `GLsync` for the native driver.
    type Fence: Copy + fmt::Debug;

    // -------------------------------------------------------------------------- queries
    fn get_integer(&self, pname: GLenum) -> GLint;
    fn get_string(&self, pname: GLenum) -> String;

    // -------------------------------------------------------------------------- toggles
    fn enable(&self, cap: GLenum);
    fn disable(&self, cap: GLenum);
    fn enable_index(&self, cap: GLenum, index: GLuint);
    fn disable_index(&self, cap: GLenum, index: GLuint);

    // ---------------------------------------------------------------------------- blend
    fn blend_func_separate(
        &self,
        buf: GLuint,
        src_rgb: GLenum,
        dst_rgb: GLenum,
        src_alpha: GLenum,
        dst_alpha: GLenum,
    );
    fn blend_equation_separate(&self, buf: GLuint, mode_rgb: GLenum, mode_alpha: GLenum);
    fn blend_color(&self, red: f32, green: f32, blue: f32, alpha: f32);
    fn color_mask(&self, buf: GLuint, red: bool, green: bool, blue: bool, alpha: bool);
    fn sample_mask(&self, index: GLuint, mask: GLbitfield);

    // -------------------------------------------------------------------- depth/stencil
    fn depth_func(&self, func: GLenum);
    fn depth_mask(&self, flag: bool);
    fn depth_range(&self, near: f64, far: f64);
    fn stencil_func_separate(&self, face: GLenum, func: GLenum, reference: GLint, mask: GLuint);
    fn stencil_op_separate(
        &self,
        face: GLenum,
        sfail: GLenum,
        dpfail: GLenum,
        dppass: GLenum,
    );
    fn stencil_mask_separate(&self, face: GLenum, mask: GLuint);

    // ------------------------------------------------------------------------ rasterizer
    fn cull_face(&self, mode: GLenum);
    fn front_face(&self, mode: GLenum);
    fn polygon_mode(&self, mode: GLenum);
    fn polygon_offset(&self, factor: f32, units: f32);
    fn viewport_indexed(&self, index: GLuint, x: f32, y: f32, width: f32, height: f32);
    fn depth_range_indexed(&self, index: GLuint, near: f64, far: f64);
    fn scissor_indexed(&self, index: GLuint, x: GLint, y: GLint, width: GLsizei, height: GLsizei);

    // -------------------------------------------------------------------------- programs
    fn create_program(&self) -> GLuint;
    fn delete_program(&self, program: GLuint);
    fn attach_shader(&self, program: GLuint, shader: GLuint);
    fn link_program(&self, program: GLuint);
    fn link_status(&self, program: GLuint) -> bool;
    fn program_info_log(&self, program: GLuint) -> String;
    fn use_program(&self, program: GLuint);
    fn uniform_block_binding(&self, program: GLuint, block_index: GLuint, binding: GLuint);
    fn shader_storage_block_binding(&self, program: GLuint, block_index: GLuint, binding: GLuint);
    fn program_uniform_1i(&self, program: GLuint, location: GLint, value: GLint);

    // -------------------------------------------------------------------- unit bindings
    fn bind_texture_unit(&self, unit: GLuint, target: GLenum, texture: GLuint);
    fn bind_sampler(&self, unit: GLuint, sampler: GLuint);
    fn bind_image_texture(
        &self,
        unit: GLuint,
        texture: GLuint,
        level: GLint,
        layered: bool,
        layer: GLint,
        access: GLenum,
        format: GLenum,
    );
    fn bind_buffer(&self, target: GLenum, buffer: GLuint);
    fn bind_buffer_range(
        &self,
        target: GLenum,
        index: GLuint,
        buffer: GLuint,
        offset: GLintptr,
        size: GLsizeiptr,
    );

    // ---------------------------------------------------------------------- vertex input
    fn bind_vertex_buffer(&self, binding: GLuint, buffer: GLuint, offset: GLintptr, stride: GLsizei);
    fn vertex_attrib_format(
        &self,
        attrib: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        relative_offset: GLuint,
    );
    fn vertex_attrib_binding(&self, attrib: GLuint, binding: GLuint);
    fn vertex_binding_divisor(&self, binding: GLuint, divisor: GLuint);
    fn vertex_attrib_pointer(
        &self,
        attrib: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        stride: GLsizei,
        offset: usize,
    );
    fn vertex_attrib_divisor(&self, attrib: GLuint, divisor: GLuint);
    fn enable_vertex_attrib(&self, attrib: GLuint);
    fn disable_vertex_attrib(&self, attrib: GLuint);

    // ------------------------------------------------------------------------ framebuffers
    fn create_framebuffer(&self) -> GLuint;
    fn delete_framebuffer(&self, framebuffer: GLuint);
    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint);
    fn framebuffer_texture(&self, target: GLenum, attachment: GLenum, texture: GLuint, level: GLint);
    fn framebuffer_texture_layer(
        &self,
        target: GLenum,
        attachment: GLenum,
        texture: GLuint,
        level: GLint,
        layer: GLint,
    );
    fn draw_buffers(&self, bufs: &[GLenum]);
    fn check_framebuffer_status(&self, target: GLenum) -> GLenum;
    fn clear_buffer_fv(&self, buffer: GLenum, drawbuffer: GLint, values: &[f32; 4]);
    fn clear_buffer_iv(&self, buffer: GLenum, drawbuffer: GLint, value: GLint);
    fn clear_buffer_fi(&self, buffer: GLenum, drawbuffer: GLint, depth: f32, stencil: GLint);

    // -------------------------------------------------------------------------- textures
    fn create_texture(&self, target: GLenum) -> GLuint;
    fn delete_texture(&self, texture: GLuint);

    // -------------------------------------------------------------------------- buffers
    fn create_buffer(&self) -> GLuint;
    fn delete_buffer(&self, buffer: GLuint);
    fn buffer_storage(&self, buffer: GLuint, size: GLsizeiptr, flags: GLbitfield);
    fn buffer_data(&self, buffer: GLuint, size: GLsizeiptr, usage: GLenum);
    fn buffer_sub_data(&self, buffer: GLuint, offset: GLintptr, data: &[u8]);
    fn map_buffer_range(
        &self,
        buffer: GLuint,
        offset: GLintptr,
        length: GLsizeiptr,
        access: GLbitfield,
    ) -> *mut u8;
    fn unmap_buffer(&self, buffer: GLuint) -> bool;
    fn memory_barrier(&self, barriers: GLbitfield);

    // ---------------------------------------------------------------------------- draws
    fn draw_arrays_instanced(&self, mode: GLenum, first: GLint, count: GLsizei, instances: GLsizei);
    fn draw_elements_instanced(
        &self,
        mode: GLenum,
        count: GLsizei,
        ty: GLenum,
        offset: usize,
        instances: GLsizei,
    );
    fn dispatch_compute(&self, x: GLuint, y: GLuint, z: GLuint);

    // ----------------------------------------------------------------------------- sync
    fn fence_sync(&self) -> Self::Fence;
    fn client_wait_sync(&self, fence: Self::Fence, timeout_ns: u64) -> WaitStatus;
    fn delete_sync(&self, fence: Self::Fence);
}
