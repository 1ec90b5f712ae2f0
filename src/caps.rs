//! Runtime capability detection.
//!
//! Feature availability is resolved once at device creation and branched on at
//! runtime; strategy-shaped decisions (input assembler, upload path) are taken once
//! from these booleans rather than per draw.

use crate::api;
use crate::driver::Driver;

#[derive(Copy, Clone, Debug)]
pub struct Capabilities {
    // limits
    pub max_color_attachments: usize,
    pub max_combined_texture_units: usize,
    pub max_image_units: usize,
    pub max_uniform_buffer_bindings: usize,
    pub max_storage_buffer_bindings: usize,
    pub max_viewports: usize,
    pub max_vertex_attribs: usize,
    pub uniform_buffer_offset_alignment: usize,
    // features
    pub vertex_attrib_binding: bool,
    pub buffer_storage: bool,
    pub multi_bind: bool,
    pub compute_shaders: bool,
    pub depth_clamp: bool,
}

impl Capabilities {
    pub fn detect<D: Driver>(gl: &D) -> Capabilities {
        let major = gl.get_integer(api::MAJOR_VERSION);
        let minor = gl.get_integer(api::MINOR_VERSION);
        let at_least = |maj, min| major > maj || (major == maj && minor >= min);

        let caps = Capabilities {
            max_color_attachments: gl.get_integer(api::MAX_COLOR_ATTACHMENTS) as usize,
            max_combined_texture_units: gl.get_integer(api::MAX_COMBINED_TEXTURE_IMAGE_UNITS)
                as usize,
            max_image_units: gl.get_integer(api::MAX_IMAGE_UNITS) as usize,
            max_uniform_buffer_bindings: gl.get_integer(api::MAX_UNIFORM_BUFFER_BINDINGS) as usize,
            max_storage_buffer_bindings: gl.get_integer(api::MAX_SHADER_STORAGE_BUFFER_BINDINGS)
                as usize,
            max_viewports: gl.get_integer(api::MAX_VIEWPORTS) as usize,
            max_vertex_attribs: gl.get_integer(api::MAX_VERTEX_ATTRIBS) as usize,
            uniform_buffer_offset_alignment: gl.get_integer(api::UNIFORM_BUFFER_OFFSET_ALIGNMENT)
                as usize,
            vertex_attrib_binding: at_least(4, 3),
            buffer_storage: at_least(4, 4),
            multi_bind: at_least(4, 4),
            compute_shaders: at_least(4, 3),
            depth_clamp: at_least(3, 2),
        };

        debug!(
            "capabilities: GL {}.{} renderer={:?} {:?}",
            major,
            minor,
            gl.get_string(api::RENDERER),
            caps
        );
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockGl;

    #[test]
    fn detect_reads_limits_and_gates_features_on_version() {
        let gl = MockGl::new();
        gl.set_integer(api::MAJOR_VERSION, 4);
        gl.set_integer(api::MINOR_VERSION, 5);
        let caps = Capabilities::detect(&gl);
        assert_eq!(caps.max_color_attachments, 8);
        assert_eq!(caps.max_viewports, 16);
        assert!(caps.vertex_attrib_binding);
        assert!(caps.buffer_storage);
        assert!(caps.compute_shaders);

        let gl = MockGl::new();
        gl.set_integer(api::MAJOR_VERSION, 3);
        gl.set_integer(api::MINOR_VERSION, 3);
        let caps = Capabilities::detect(&gl);
        assert!(!caps.vertex_attrib_binding);
        assert!(!caps.buffer_storage);
        assert!(caps.depth_clamp);
    }
}
