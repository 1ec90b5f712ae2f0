//! Shadow state cache.
//!
//! A complete in-memory mirror of every piece of global GL state the translation
//! layer touches. Setters compare the incoming value against the cached one per
//! individually significant field and only talk to the driver on a difference; the
//! cache is always written, so outside the body of a setter it is byte-for-byte
//! equal to the driver's actual state.
//!
//! Descriptor structs are D3D11-shaped; `from_desc` constructors translate them
//! once into the GL-shaped cached representation so the per-draw diff never
//! re-translates enums.

use crate::api;
use crate::api::types::{GLenum, GLint, GLintptr, GLsizei, GLsizeiptr, GLuint};
use crate::caps::Capabilities;
use crate::driver::Driver;

pub const MAX_RENDER_TARGETS: usize = 8;
pub const MAX_VIEWPORTS: usize = 16;
pub const MAX_TEXTURE_SLOTS: usize = 32;
pub const MAX_SAMPLER_SLOTS: usize = 16;
pub const MAX_CONSTANT_BUFFER_SLOTS: usize = 14;
pub const MAX_STORAGE_BUFFER_SLOTS: usize = 8;
pub const MAX_IMAGE_SLOTS: usize = 8;
pub const MAX_VERTEX_BUFFER_SLOTS: usize = 16;
pub const MAX_VERTEX_ATTRIBS: usize = 16;

//--------------------------------------------------------------------------------------
// Diff helpers
//--------------------------------------------------------------------------------------

/// Writes `new` into the cache slot and reports whether it differed.
///
/// The caller issues the driver call from the updated cache value when this (or an
/// OR of several of these, for compound fields) returns true.
pub(crate) fn diff<T: PartialEq>(cached: &mut T, new: T) -> bool {
    if *cached != new {
        *cached = new;
        true
    } else {
        false
    }
}

/// Single-field variant: update the cache and run `apply` only on a difference.
pub(crate) fn diff_apply<T: PartialEq, F: FnOnce()>(cached: &mut T, new: T, apply: F) {
    if diff(cached, new) {
        apply();
    }
}

fn set_cap<D: Driver>(gl: &D, cap: GLenum, cached: &mut bool, enable: bool) {
    if diff(cached, enable) {
        if enable {
            gl.enable(cap);
        } else {
            gl.disable(cap);
        }
    }
}

fn set_cap_index<D: Driver>(gl: &D, cap: GLenum, index: GLuint, cached: &mut bool, enable: bool) {
    if diff(cached, enable) {
        if enable {
            gl.enable_index(cap, index);
        } else {
            gl.disable_index(cap, index);
        }
    }
}

//--------------------------------------------------------------------------------------
// D3D11-shaped descriptors
//--------------------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    SrcAlphaSat,
    ConstantColor,
    InvConstantColor,
    Src1Color,
    InvSrc1Color,
    Src1Alpha,
    InvSrc1Alpha,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlendOp {
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ComparisonFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FillMode {
    Wireframe,
    Solid,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

bitflags! {
    pub struct ColorWriteMask: u8 {
        const RED   = 1;
        const GREEN = 2;
        const BLUE  = 4;
        const ALPHA = 8;
    }
}

impl Default for ColorWriteMask {
    fn default() -> ColorWriteMask {
        ColorWriteMask::all()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RenderTargetBlendDesc {
    pub blend_enable: bool,
    pub src_blend: BlendFactor,
    pub dest_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_blend_alpha: BlendFactor,
    pub dest_blend_alpha: BlendFactor,
    pub blend_op_alpha: BlendOp,
    pub write_mask: ColorWriteMask,
}

impl Default for RenderTargetBlendDesc {
    fn default() -> RenderTargetBlendDesc {
        RenderTargetBlendDesc {
            blend_enable: false,
            src_blend: BlendFactor::One,
            dest_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: BlendFactor::One,
            dest_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOp::Add,
            write_mask: ColorWriteMask::all(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlendDesc {
    pub alpha_to_coverage: bool,
    pub independent_blend: bool,
    pub render_target: [RenderTargetBlendDesc; MAX_RENDER_TARGETS],
}

impl Default for BlendDesc {
    fn default() -> BlendDesc {
        BlendDesc {
            alpha_to_coverage: false,
            independent_blend: false,
            render_target: [RenderTargetBlendDesc::default(); MAX_RENDER_TARGETS],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StencilOpDesc {
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
    pub func: ComparisonFunc,
}

impl Default for StencilOpDesc {
    fn default() -> StencilOpDesc {
        StencilOpDesc {
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            pass: StencilOp::Keep,
            func: ComparisonFunc::Always,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front: StencilOpDesc,
    pub back: StencilOpDesc,
}

impl Default for DepthStencilDesc {
    fn default() -> DepthStencilDesc {
        DepthStencilDesc {
            depth_enable: true,
            depth_write: true,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            front: StencilOpDesc::default(),
            back: StencilOpDesc::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
}

impl Default for RasterizerDesc {
    fn default() -> RasterizerDesc {
        RasterizerDesc {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_bias: 0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: true,
            scissor_enable: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ScissorRect {
    pub x: GLint,
    pub y: GLint,
    pub width: GLsizei,
    pub height: GLsizei,
}

//--------------------------------------------------------------------------------------
// Enum translation
//--------------------------------------------------------------------------------------

pub fn blend_factor_to_gl(f: BlendFactor) -> GLenum {
    match f {
        BlendFactor::Zero => api::ZERO,
        BlendFactor::One => api::ONE,
        BlendFactor::SrcColor => api::SRC_COLOR,
        BlendFactor::InvSrcColor => api::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => api::SRC_ALPHA,
        BlendFactor::InvSrcAlpha => api::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DestAlpha => api::DST_ALPHA,
        BlendFactor::InvDestAlpha => api::ONE_MINUS_DST_ALPHA,
        BlendFactor::DestColor => api::DST_COLOR,
        BlendFactor::InvDestColor => api::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlphaSat => api::SRC_ALPHA_SATURATE,
        BlendFactor::ConstantColor => api::CONSTANT_COLOR,
        BlendFactor::InvConstantColor => api::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::Src1Color => api::SRC1_COLOR,
        BlendFactor::InvSrc1Color => api::ONE_MINUS_SRC1_COLOR,
        BlendFactor::Src1Alpha => api::SRC1_ALPHA,
        BlendFactor::InvSrc1Alpha => api::ONE_MINUS_SRC1_ALPHA,
    }
}

pub fn blend_op_to_gl(op: BlendOp) -> GLenum {
    match op {
        BlendOp::Add => api::FUNC_ADD,
        BlendOp::Subtract => api::FUNC_SUBTRACT,
        BlendOp::RevSubtract => api::FUNC_REVERSE_SUBTRACT,
        BlendOp::Min => api::MIN,
        BlendOp::Max => api::MAX,
    }
}

pub fn comparison_func_to_gl(f: ComparisonFunc) -> GLenum {
    match f {
        ComparisonFunc::Never => api::NEVER,
        ComparisonFunc::Less => api::LESS,
        ComparisonFunc::Equal => api::EQUAL,
        ComparisonFunc::LessEqual => api::LEQUAL,
        ComparisonFunc::Greater => api::GREATER,
        ComparisonFunc::NotEqual => api::NOTEQUAL,
        ComparisonFunc::GreaterEqual => api::GEQUAL,
        ComparisonFunc::Always => api::ALWAYS,
    }
}

pub fn stencil_op_to_gl(op: StencilOp) -> GLenum {
    match op {
        StencilOp::Keep => api::KEEP,
        StencilOp::Zero => api::ZERO,
        StencilOp::Replace => api::REPLACE,
        StencilOp::IncrSat => api::INCR,
        StencilOp::DecrSat => api::DECR,
        StencilOp::Invert => api::INVERT,
        StencilOp::Incr => api::INCR_WRAP,
        StencilOp::Decr => api::DECR_WRAP,
    }
}

pub fn topology_to_gl(t: PrimitiveTopology) -> GLenum {
    match t {
        PrimitiveTopology::PointList => api::POINTS,
        PrimitiveTopology::LineList => api::LINES,
        PrimitiveTopology::LineStrip => api::LINE_STRIP,
        PrimitiveTopology::TriangleList => api::TRIANGLES,
        PrimitiveTopology::TriangleStrip => api::TRIANGLE_STRIP,
    }
}

fn write_mask_to_bools(mask: ColorWriteMask) -> [bool; 4] {
    [
        mask.contains(ColorWriteMask::RED),
        mask.contains(ColorWriteMask::GREEN),
        mask.contains(ColorWriteMask::BLUE),
        mask.contains(ColorWriteMask::ALPHA),
    ]
}

//--------------------------------------------------------------------------------------
// GL-shaped state, translated once from the descriptors
//--------------------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlendTargetState {
    pub enable: bool,
    pub src_rgb: GLenum,
    pub dst_rgb: GLenum,
    pub src_alpha: GLenum,
    pub dst_alpha: GLenum,
    pub equation_rgb: GLenum,
    pub equation_alpha: GLenum,
    pub write_mask: [bool; 4],
}

impl Default for BlendTargetState {
    fn default() -> BlendTargetState {
        BlendTargetState {
            enable: false,
            src_rgb: api::ONE,
            dst_rgb: api::ZERO,
            src_alpha: api::ONE,
            dst_alpha: api::ZERO,
            equation_rgb: api::FUNC_ADD,
            equation_alpha: api::FUNC_ADD,
            write_mask: [true; 4],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlendState {
    pub alpha_to_coverage: bool,
    pub targets: [BlendTargetState; MAX_RENDER_TARGETS],
}

impl Default for BlendState {
    fn default() -> BlendState {
        BlendState {
            alpha_to_coverage: false,
            targets: [BlendTargetState::default(); MAX_RENDER_TARGETS],
        }
    }
}

impl BlendState {
    pub fn from_desc(desc: &BlendDesc) -> BlendState {
        let translate = |rt: &RenderTargetBlendDesc| BlendTargetState {
            enable: rt.blend_enable,
            src_rgb: blend_factor_to_gl(rt.src_blend),
            dst_rgb: blend_factor_to_gl(rt.dest_blend),
            src_alpha: blend_factor_to_gl(rt.src_blend_alpha),
            dst_alpha: blend_factor_to_gl(rt.dest_blend_alpha),
            equation_rgb: blend_op_to_gl(rt.blend_op),
            equation_alpha: blend_op_to_gl(rt.blend_op_alpha),
            write_mask: write_mask_to_bools(rt.write_mask),
        };
        let mut targets = [BlendTargetState::default(); MAX_RENDER_TARGETS];
        for (i, target) in targets.iter_mut().enumerate() {
            // without independent blend, target 0 applies to every target
            let rt = if desc.independent_blend {
                &desc.render_target[i]
            } else {
                &desc.render_target[0]
            };
            *target = translate(rt);
        }
        BlendState {
            alpha_to_coverage: desc.alpha_to_coverage,
            targets,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StencilFaceState {
    pub func: GLenum,
    pub fail: GLenum,
    pub depth_fail: GLenum,
    pub pass: GLenum,
}

impl Default for StencilFaceState {
    fn default() -> StencilFaceState {
        StencilFaceState {
            func: api::ALWAYS,
            fail: api::KEEP,
            depth_fail: api::KEEP,
            pass: api::KEEP,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: GLenum,
    pub stencil_test: bool,
    pub stencil_read_mask: GLuint,
    pub stencil_write_mask: GLuint,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
}

impl Default for DepthStencilState {
    fn default() -> DepthStencilState {
        DepthStencilState {
            depth_test: false,
            depth_write: true,
            depth_func: api::LESS,
            stencil_test: false,
            stencil_read_mask: !0,
            stencil_write_mask: !0,
            front: StencilFaceState::default(),
            back: StencilFaceState::default(),
        }
    }
}

impl DepthStencilState {
    pub fn from_desc(desc: &DepthStencilDesc) -> DepthStencilState {
        let face = |d: &StencilOpDesc| StencilFaceState {
            func: comparison_func_to_gl(d.func),
            fail: stencil_op_to_gl(d.fail),
            depth_fail: stencil_op_to_gl(d.depth_fail),
            pass: stencil_op_to_gl(d.pass),
        };
        DepthStencilState {
            depth_test: desc.depth_enable,
            depth_write: desc.depth_write,
            depth_func: comparison_func_to_gl(desc.depth_func),
            stencil_test: desc.stencil_enable,
            stencil_read_mask: desc.stencil_read_mask as GLuint,
            stencil_write_mask: desc.stencil_write_mask as GLuint,
            front: face(&desc.front),
            back: face(&desc.back),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RasterizerState {
    pub polygon_mode: GLenum,
    pub cull_enable: bool,
    pub cull_face: GLenum,
    pub front_face: GLenum,
    pub polygon_offset_enable: bool,
    pub polygon_offset: (f32, f32),
    pub depth_clamp: bool,
    pub scissor: bool,
}

impl Default for RasterizerState {
    fn default() -> RasterizerState {
        RasterizerState {
            polygon_mode: api::FILL,
            cull_enable: false,
            cull_face: api::BACK,
            front_face: api::CCW,
            polygon_offset_enable: false,
            polygon_offset: (0.0, 0.0),
            depth_clamp: false,
            scissor: false,
        }
    }
}

impl RasterizerState {
    pub fn from_desc(desc: &RasterizerDesc) -> RasterizerState {
        RasterizerState {
            polygon_mode: match desc.fill_mode {
                FillMode::Solid => api::FILL,
                FillMode::Wireframe => api::LINE,
            },
            cull_enable: desc.cull_mode != CullMode::None,
            cull_face: match desc.cull_mode {
                CullMode::Front => api::FRONT,
                _ => api::BACK,
            },
            // D3D's clip-space y points up; rendering is upside down relative to
            // GL, so winding flips
            front_face: if desc.front_counter_clockwise {
                api::CW
            } else {
                api::CCW
            },
            polygon_offset_enable: desc.depth_bias != 0 || desc.slope_scaled_depth_bias != 0.0,
            polygon_offset: (desc.slope_scaled_depth_bias, desc.depth_bias as f32),
            depth_clamp: !desc.depth_clip_enable,
            scissor: desc.scissor_enable,
        }
    }
}

//--------------------------------------------------------------------------------------
// Per-unit cached bindings
//--------------------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TextureUnitState {
    pub target: GLenum,
    pub texture: GLuint,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BufferRangeState {
    pub buffer: GLuint,
    pub offset: GLintptr,
    pub size: GLsizeiptr,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ImageUnitState {
    pub texture: GLuint,
    pub level: GLint,
    pub layered: bool,
    pub layer: GLint,
    pub access: GLenum,
    pub format: GLenum,
}

impl Default for ImageUnitState {
    fn default() -> ImageUnitState {
        ImageUnitState {
            texture: 0,
            level: 0,
            layered: false,
            layer: 0,
            access: api::READ_ONLY,
            format: api::R8,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VertexBufferBindingState {
    pub buffer: GLuint,
    pub offset: GLintptr,
    pub stride: GLsizei,
    pub divisor: GLuint,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VertexAttribFormatState {
    pub size: GLint,
    pub ty: GLenum,
    pub normalized: bool,
    pub relative_offset: GLuint,
    pub binding: GLuint,
}

//--------------------------------------------------------------------------------------
// The cache itself
//--------------------------------------------------------------------------------------

pub struct StateCache {
    // output merger
    blend: BlendState,
    blend_color: [f32; 4],
    sample_mask_enable: bool,
    sample_mask: GLuint,
    depth_stencil: DepthStencilState,
    stencil_ref: GLint,
    // rasterizer
    raster: RasterizerState,
    viewports: [Viewport; MAX_VIEWPORTS],
    scissors: [ScissorRect; MAX_VIEWPORTS],
    depth_range: (f64, f64),
    // bindings
    program: GLuint,
    draw_framebuffer: GLuint,
    index_buffer: GLuint,
    texture_units: Vec<TextureUnitState>,
    sampler_units: Vec<GLuint>,
    image_units: Vec<ImageUnitState>,
    uniform_buffer_units: Vec<BufferRangeState>,
    storage_buffer_units: Vec<BufferRangeState>,
    vertex_buffer_bindings: [VertexBufferBindingState; MAX_VERTEX_BUFFER_SLOTS],
    attrib_enabled: [bool; MAX_VERTEX_ATTRIBS],
    attrib_formats: [VertexAttribFormatState; MAX_VERTEX_ATTRIBS],
}

impl StateCache {
    /// Builds a cache mirroring the default state of a fresh context.
    pub fn new(caps: &Capabilities) -> StateCache {
        StateCache {
            blend: BlendState::default(),
            blend_color: [0.0; 4],
            sample_mask_enable: false,
            sample_mask: !0,
            depth_stencil: DepthStencilState::default(),
            stencil_ref: 0,
            raster: RasterizerState::default(),
            viewports: [Viewport::default(); MAX_VIEWPORTS],
            scissors: [ScissorRect::default(); MAX_VIEWPORTS],
            depth_range: (0.0, 1.0),
            program: 0,
            draw_framebuffer: 0,
            index_buffer: 0,
            texture_units: vec![TextureUnitState::default(); caps.max_combined_texture_units],
            sampler_units: vec![0; caps.max_combined_texture_units],
            image_units: vec![ImageUnitState::default(); caps.max_image_units],
            uniform_buffer_units: vec![BufferRangeState::default(); caps.max_uniform_buffer_bindings],
            storage_buffer_units: vec![BufferRangeState::default(); caps.max_storage_buffer_bindings],
            vertex_buffer_bindings: [VertexBufferBindingState::default(); MAX_VERTEX_BUFFER_SLOTS],
            attrib_enabled: [false; MAX_VERTEX_ATTRIBS],
            attrib_formats: [VertexAttribFormatState::default(); MAX_VERTEX_ATTRIBS],
        }
    }

    //---------------------------------------------------------------------- output merger

    pub fn set_blend_state<D: Driver>(&mut self, gl: &D, new: &BlendState, num_targets: usize) {
        for i in 0..num_targets.min(MAX_RENDER_TARGETS) {
            let unit = i as GLuint;
            let cached = &mut self.blend.targets[i];
            let target = &new.targets[i];

            set_cap_index(gl, api::BLEND, unit, &mut cached.enable, target.enable);

            let func_dirty = diff(&mut cached.src_rgb, target.src_rgb)
                | diff(&mut cached.dst_rgb, target.dst_rgb)
                | diff(&mut cached.src_alpha, target.src_alpha)
                | diff(&mut cached.dst_alpha, target.dst_alpha);
            if func_dirty {
                gl.blend_func_separate(
                    unit,
                    cached.src_rgb,
                    cached.dst_rgb,
                    cached.src_alpha,
                    cached.dst_alpha,
                );
            }

            let equation_dirty = diff(&mut cached.equation_rgb, target.equation_rgb)
                | diff(&mut cached.equation_alpha, target.equation_alpha);
            if equation_dirty {
                gl.blend_equation_separate(unit, cached.equation_rgb, cached.equation_alpha);
            }

            if diff(&mut cached.write_mask, target.write_mask) {
                let m = cached.write_mask;
                gl.color_mask(unit, m[0], m[1], m[2], m[3]);
            }
        }

        set_cap(
            gl,
            api::SAMPLE_ALPHA_TO_COVERAGE,
            &mut self.blend.alpha_to_coverage,
            new.alpha_to_coverage,
        );
    }

    pub fn set_blend_color<D: Driver>(&mut self, gl: &D, color: [f32; 4]) {
        diff_apply(&mut self.blend_color, color, || {
            gl.blend_color(color[0], color[1], color[2], color[3])
        });
    }

    pub fn set_sample_mask<D: Driver>(&mut self, gl: &D, mask: GLuint) {
        set_cap(gl, api::SAMPLE_MASK, &mut self.sample_mask_enable, mask != !0);
        diff_apply(&mut self.sample_mask, mask, || gl.sample_mask(0, mask));
    }

    pub fn set_depth_stencil_state<D: Driver>(
        &mut self,
        gl: &D,
        new: &DepthStencilState,
        stencil_ref: GLint,
    ) {
        let cached = &mut self.depth_stencil;

        set_cap(gl, api::DEPTH_TEST, &mut cached.depth_test, new.depth_test);
        diff_apply(&mut cached.depth_func, new.depth_func, || {
            gl.depth_func(new.depth_func)
        });
        diff_apply(&mut cached.depth_write, new.depth_write, || {
            gl.depth_mask(new.depth_write)
        });

        set_cap(gl, api::STENCIL_TEST, &mut cached.stencil_test, new.stencil_test);

        // func + ref + read mask feed one driver call per face
        let read_mask_dirty = diff(&mut cached.stencil_read_mask, new.stencil_read_mask);
        let ref_dirty = diff(&mut self.stencil_ref, stencil_ref);
        let front_func_dirty =
            diff(&mut cached.front.func, new.front.func) | read_mask_dirty | ref_dirty;
        if front_func_dirty {
            gl.stencil_func_separate(
                api::FRONT,
                cached.front.func,
                self.stencil_ref,
                cached.stencil_read_mask,
            );
        }
        let back_func_dirty =
            diff(&mut cached.back.func, new.back.func) | read_mask_dirty | ref_dirty;
        if back_func_dirty {
            gl.stencil_func_separate(
                api::BACK,
                cached.back.func,
                self.stencil_ref,
                cached.stencil_read_mask,
            );
        }

        let front_op_dirty = diff(&mut cached.front.fail, new.front.fail)
            | diff(&mut cached.front.depth_fail, new.front.depth_fail)
            | diff(&mut cached.front.pass, new.front.pass);
        if front_op_dirty {
            gl.stencil_op_separate(
                api::FRONT,
                cached.front.fail,
                cached.front.depth_fail,
                cached.front.pass,
            );
        }
        let back_op_dirty = diff(&mut cached.back.fail, new.back.fail)
            | diff(&mut cached.back.depth_fail, new.back.depth_fail)
            | diff(&mut cached.back.pass, new.back.pass);
        if back_op_dirty {
            gl.stencil_op_separate(
                api::BACK,
                cached.back.fail,
                cached.back.depth_fail,
                cached.back.pass,
            );
        }

        if diff(&mut cached.stencil_write_mask, new.stencil_write_mask) {
            gl.stencil_mask_separate(api::FRONT_AND_BACK, cached.stencil_write_mask);
        }
    }

    pub fn set_rasterizer_state<D: Driver>(
        &mut self,
        gl: &D,
        new: &RasterizerState,
        caps: &Capabilities,
    ) {
        let cached = &mut self.raster;

        diff_apply(&mut cached.polygon_mode, new.polygon_mode, || {
            gl.polygon_mode(new.polygon_mode)
        });
        set_cap(gl, api::CULL_FACE, &mut cached.cull_enable, new.cull_enable);
        diff_apply(&mut cached.cull_face, new.cull_face, || {
            gl.cull_face(new.cull_face)
        });
        diff_apply(&mut cached.front_face, new.front_face, || {
            gl.front_face(new.front_face)
        });

        set_cap(
            gl,
            api::POLYGON_OFFSET_FILL,
            &mut cached.polygon_offset_enable,
            new.polygon_offset_enable,
        );
        if diff(&mut cached.polygon_offset, new.polygon_offset) {
            let (factor, units) = cached.polygon_offset;
            gl.polygon_offset(factor, units);
        }

        if caps.depth_clamp {
            set_cap(gl, api::DEPTH_CLAMP, &mut cached.depth_clamp, new.depth_clamp);
        } else if new.depth_clamp {
            warn!("depth clamp requested but not supported by the driver; ignored");
        }

        set_cap(gl, api::SCISSOR_TEST, &mut cached.scissor, new.scissor);
    }

    pub fn set_viewports<D: Driver>(
        &mut self,
        gl: &D,
        viewports: &[Viewport],
        caps: &Capabilities,
    ) {
        let max = caps.max_viewports.min(MAX_VIEWPORTS);
        if viewports.len() > max {
            warn!(
                "{} viewports requested, driver supports {}; extra viewports ignored",
                viewports.len(),
                max
            );
        }
        for (i, vp) in viewports.iter().take(max).enumerate() {
            let cached = &mut self.viewports[i];
            let rect_dirty = diff(&mut cached.top_left_x, vp.top_left_x)
                | diff(&mut cached.top_left_y, vp.top_left_y)
                | diff(&mut cached.width, vp.width)
                | diff(&mut cached.height, vp.height);
            if rect_dirty {
                gl.viewport_indexed(
                    i as GLuint,
                    cached.top_left_x,
                    cached.top_left_y,
                    cached.width,
                    cached.height,
                );
            }
            let depth_dirty = diff(&mut cached.min_depth, vp.min_depth)
                | diff(&mut cached.max_depth, vp.max_depth);
            if depth_dirty {
                gl.depth_range_indexed(
                    i as GLuint,
                    cached.min_depth as f64,
                    cached.max_depth as f64,
                );
            }
        }
    }

    pub fn set_scissor_rects<D: Driver>(
        &mut self,
        gl: &D,
        rects: &[ScissorRect],
        caps: &Capabilities,
    ) {
        let max = caps.max_viewports.min(MAX_VIEWPORTS);
        if rects.len() > max {
            warn!(
                "{} scissor rects requested, driver supports {}; extra rects ignored",
                rects.len(),
                max
            );
        }
        for (i, rect) in rects.iter().take(max).enumerate() {
            diff_apply(&mut self.scissors[i], *rect, || {
                gl.scissor_indexed(i as GLuint, rect.x, rect.y, rect.width, rect.height)
            });
        }
    }

    //---------------------------------------------------------- clear override primitives

    pub fn scissor_enabled(&self) -> bool {
        self.raster.scissor
    }

    pub fn set_scissor_enabled<D: Driver>(&mut self, gl: &D, enable: bool) {
        set_cap(gl, api::SCISSOR_TEST, &mut self.raster.scissor, enable);
    }

    pub fn color_write_mask(&self, target: usize) -> [bool; 4] {
        self.blend.targets[target].write_mask
    }

    pub fn set_color_write_mask<D: Driver>(&mut self, gl: &D, target: usize, mask: [bool; 4]) {
        diff_apply(&mut self.blend.targets[target].write_mask, mask, || {
            gl.color_mask(target as GLuint, mask[0], mask[1], mask[2], mask[3])
        });
    }

    pub fn depth_write(&self) -> bool {
        self.depth_stencil.depth_write
    }

    pub fn set_depth_write<D: Driver>(&mut self, gl: &D, enable: bool) {
        diff_apply(&mut self.depth_stencil.depth_write, enable, || {
            gl.depth_mask(enable)
        });
    }

    pub fn stencil_write_mask(&self) -> GLuint {
        self.depth_stencil.stencil_write_mask
    }

    pub fn set_stencil_write_mask<D: Driver>(&mut self, gl: &D, mask: GLuint) {
        diff_apply(&mut self.depth_stencil.stencil_write_mask, mask, || {
            gl.stencil_mask_separate(api::FRONT_AND_BACK, mask)
        });
    }

    pub fn depth_range(&self) -> (f64, f64) {
        self.depth_range
    }

    pub fn set_depth_range<D: Driver>(&mut self, gl: &D, range: (f64, f64)) {
        diff_apply(&mut self.depth_range, range, || gl.depth_range(range.0, range.1));
    }

    //------------------------------------------------------------------- object bindings

    pub fn bind_program<D: Driver>(&mut self, gl: &D, program: GLuint) {
        diff_apply(&mut self.program, program, || gl.use_program(program));
    }

    pub fn bind_draw_framebuffer<D: Driver>(&mut self, gl: &D, framebuffer: GLuint) {
        diff_apply(&mut self.draw_framebuffer, framebuffer, || {
            gl.bind_framebuffer(api::DRAW_FRAMEBUFFER, framebuffer)
        });
    }

    pub fn bind_index_buffer<D: Driver>(&mut self, gl: &D, buffer: GLuint) {
        diff_apply(&mut self.index_buffer, buffer, || {
            gl.bind_buffer(api::ELEMENT_ARRAY_BUFFER, buffer)
        });
    }

    pub fn bind_texture<D: Driver>(&mut self, gl: &D, unit: u32, target: GLenum, texture: GLuint) {
        let new = TextureUnitState { target, texture };
        diff_apply(&mut self.texture_units[unit as usize], new, || {
            gl.bind_texture_unit(unit, target, texture)
        });
    }

    pub fn bind_sampler<D: Driver>(&mut self, gl: &D, unit: u32, sampler: GLuint) {
        diff_apply(&mut self.sampler_units[unit as usize], sampler, || {
            gl.bind_sampler(unit, sampler)
        });
    }

    pub fn bind_image<D: Driver>(&mut self, gl: &D, unit: u32, new: ImageUnitState) {
        diff_apply(&mut self.image_units[unit as usize], new, || {
            gl.bind_image_texture(
                unit,
                new.texture,
                new.level,
                new.layered,
                new.layer,
                new.access,
                new.format,
            )
        });
    }

    pub fn bind_uniform_buffer<D: Driver>(&mut self, gl: &D, unit: u32, new: BufferRangeState) {
        diff_apply(&mut self.uniform_buffer_units[unit as usize], new, || {
            gl.bind_buffer_range(api::UNIFORM_BUFFER, unit, new.buffer, new.offset, new.size)
        });
    }

    pub fn bind_storage_buffer<D: Driver>(&mut self, gl: &D, unit: u32, new: BufferRangeState) {
        diff_apply(&mut self.storage_buffer_units[unit as usize], new, || {
            gl.bind_buffer_range(
                api::SHADER_STORAGE_BUFFER,
                unit,
                new.buffer,
                new.offset,
                new.size,
            )
        });
    }

    //--------------------------------------------------------------------- vertex input

    pub fn bind_vertex_buffer<D: Driver>(
        &mut self,
        gl: &D,
        binding: u32,
        new: VertexBufferBindingState,
    ) {
        let cached = &mut self.vertex_buffer_bindings[binding as usize];
        let buffer_dirty = diff(&mut cached.buffer, new.buffer)
            | diff(&mut cached.offset, new.offset)
            | diff(&mut cached.stride, new.stride);
        if buffer_dirty {
            gl.bind_vertex_buffer(binding, cached.buffer, cached.offset, cached.stride);
        }
        diff_apply(&mut cached.divisor, new.divisor, || {
            gl.vertex_binding_divisor(binding, new.divisor)
        });
    }

    pub fn set_attrib_enabled<D: Driver>(&mut self, gl: &D, attrib: u32, enable: bool) {
        if diff(&mut self.attrib_enabled[attrib as usize], enable) {
            if enable {
                gl.enable_vertex_attrib(attrib);
            } else {
                gl.disable_vertex_attrib(attrib);
            }
        }
    }

    pub fn set_attrib_format<D: Driver>(
        &mut self,
        gl: &D,
        attrib: u32,
        new: VertexAttribFormatState,
    ) {
        let cached = &mut self.attrib_formats[attrib as usize];
        let format_dirty = diff(&mut cached.size, new.size)
            | diff(&mut cached.ty, new.ty)
            | diff(&mut cached.normalized, new.normalized)
            | diff(&mut cached.relative_offset, new.relative_offset);
        if format_dirty {
            gl.vertex_attrib_format(
                attrib,
                cached.size,
                cached.ty,
                cached.normalized,
                cached.relative_offset,
            );
        }
        diff_apply(&mut cached.binding, new.binding, || {
            gl.vertex_attrib_binding(attrib, new.binding)
        });
    }

    /// Legacy path: re-specify the full pointer state for one attribute. No per-field
    /// diffing; the pointer carries hidden buffer-binding state the cache cannot see.
    pub fn set_attrib_pointer<D: Driver>(
        &mut self,
        gl: &D,
        attrib: u32,
        buffer: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        stride: GLsizei,
        offset: usize,
        divisor: GLuint,
    ) {
        gl.bind_buffer(api::ARRAY_BUFFER, buffer);
        gl.vertex_attrib_pointer(attrib, size, ty, normalized, stride, offset);
        gl.vertex_attrib_divisor(attrib, divisor);
        // invalidate the binding-indirection mirror for this attribute
        self.attrib_formats[attrib as usize] = VertexAttribFormatState::default();
    }
}

//--------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{DriverCall, MockGl};

    fn caps() -> Capabilities {
        let gl = MockGl::new();
        gl.set_integer(api::MAJOR_VERSION, 4);
        gl.set_integer(api::MINOR_VERSION, 5);
        Capabilities::detect(&gl)
    }

    #[test]
    fn blend_state_set_is_idempotent() {
        let gl = MockGl::new();
        let caps = caps();
        let mut cache = StateCache::new(&caps);

        let mut desc = BlendDesc::default();
        desc.render_target[0].blend_enable = true;
        desc.render_target[0].src_blend = BlendFactor::SrcAlpha;
        desc.render_target[0].dest_blend = BlendFactor::InvSrcAlpha;
        let state = BlendState::from_desc(&desc);

        cache.set_blend_state(&gl, &state, 1);
        let first = gl.calls().len();
        assert!(first > 0);

        cache.set_blend_state(&gl, &state, 1);
        assert_eq!(gl.calls().len(), first, "second identical set must be a no-op");
    }

    #[test]
    fn rasterizer_diff_is_per_field() {
        let gl = MockGl::new();
        let caps = caps();
        let mut cache = StateCache::new(&caps);

        let mut desc = RasterizerDesc::default();
        desc.cull_mode = CullMode::Back;
        cache.set_rasterizer_state(&gl, &RasterizerState::from_desc(&desc), &caps);
        gl.clear_calls();

        // only the cull mode changes; depth/scissor/polygon state must stay silent
        desc.cull_mode = CullMode::Front;
        cache.set_rasterizer_state(&gl, &RasterizerState::from_desc(&desc), &caps);
        assert_eq!(gl.calls(), vec![DriverCall::CullFace(api::FRONT)]);
    }

    #[test]
    fn stencil_ref_change_reissues_full_compound() {
        let gl = MockGl::new();
        let caps = caps();
        let mut cache = StateCache::new(&caps);

        let mut desc = DepthStencilDesc::default();
        desc.stencil_enable = true;
        desc.front.func = ComparisonFunc::Equal;
        let state = DepthStencilState::from_desc(&desc);
        cache.set_depth_stencil_state(&gl, &state, 1);
        gl.clear_calls();

        // only the reference changes; one full func call per face, nothing else
        cache.set_depth_stencil_state(&gl, &state, 2);
        assert_eq!(
            gl.calls(),
            vec![
                DriverCall::StencilFuncSeparate(api::FRONT, api::EQUAL, 2, 0xff),
                DriverCall::StencilFuncSeparate(api::BACK, api::ALWAYS, 2, 0xff),
            ]
        );
    }

    #[test]
    fn viewport_count_is_clamped_to_caps() {
        let gl = MockGl::new();
        let mut caps = caps();
        caps.max_viewports = 2;
        let mut cache = StateCache::new(&caps);

        let vp = |x| Viewport {
            top_left_x: x,
            width: 64.0,
            height: 64.0,
            max_depth: 1.0,
            ..Viewport::default()
        };
        cache.set_viewports(&gl, &[vp(0.0), vp(1.0), vp(2.0)], &caps);
        let rects = gl.call_count(|c| matches!(c, DriverCall::ViewportIndexed(..)));
        assert_eq!(rects, 2);
    }

    #[test]
    fn scissor_rect_count_is_clamped_to_caps() {
        let gl = MockGl::new();
        let mut caps = caps();
        caps.max_viewports = 2;
        let mut cache = StateCache::new(&caps);

        let rect = ScissorRect {
            x: 1,
            y: 2,
            width: 64,
            height: 64,
        };
        cache.set_scissor_rects(&gl, &[rect; 4], &caps);
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::ScissorIndexed(..))),
            2
        );
    }

    #[test]
    fn unit_binds_diff_per_unit() {
        let gl = MockGl::new();
        let caps = caps();
        let mut cache = StateCache::new(&caps);

        cache.bind_texture(&gl, 3, api::TEXTURE_2D, 7);
        cache.bind_texture(&gl, 3, api::TEXTURE_2D, 7);
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::BindTextureUnit(..))),
            1
        );

        // same buffer, different range still rebinds
        let range = BufferRangeState { buffer: 9, offset: 0, size: 256 };
        cache.bind_uniform_buffer(&gl, 1, range);
        cache.bind_uniform_buffer(&gl, 1, BufferRangeState { offset: 256, ..range });
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::BindBufferRange(..))),
            2
        );
    }
}
