//! The device: capabilities, shared name pools, shared unit-map interning.
//!
//! One device serves any number of contexts; multi-threaded submission means one
//! context per submitting thread, all sharing this device. The name pools and the
//! unit-map cache are the only cross-context state, each behind its own mutex.
//! State caches and the framebuffer/pipeline caches stay strictly per context.

use crate::api::types::GLenum;
use crate::caps::Capabilities;
use crate::config::CoreConfig;
use crate::context::Context;
use crate::driver::Driver;
use crate::name::NamePool;
use crate::pipeline::UnitMapCache;
use crate::resource::{GlBuffer, GlTexture};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

pub struct Device {
    caps: Capabilities,
    config: CoreConfig,
    pub(crate) buffer_names: Mutex<NamePool>,
    pub(crate) texture_names: Mutex<NamePool>,
    pub(crate) framebuffer_names: Mutex<NamePool>,
    pub(crate) unit_maps: Mutex<UnitMapCache>,
}

impl Device {
    pub fn new<D: Driver>(gl: &D, config: CoreConfig) -> Arc<Device> {
        Arc::new(Device {
            caps: Capabilities::detect(gl),
            config,
            buffer_names: Mutex::new(NamePool::new()),
            texture_names: Mutex::new(NamePool::new()),
            framebuffer_names: Mutex::new(NamePool::new()),
            unit_maps: Mutex::new(UnitMapCache::new()),
        })
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Builds a context over its own driver table. One per submitting thread.
    pub fn create_context<D: Driver>(self: &Arc<Device>, gl: D) -> Context<D> {
        Context::new(self.clone(), gl)
    }

    pub fn create_buffer<D: Driver>(&self, gl: &D, size: usize) -> Rc<GlBuffer> {
        let mut pool = self.buffer_names.lock().unwrap();
        let mut name = pool.reserve();
        pool.assign_native(&mut name, gl.create_buffer());
        drop(pool);
        gl.buffer_data(name.glname(), size as _, crate::api::DYNAMIC_DRAW);
        Rc::new(GlBuffer::new(name, size))
    }

    pub fn create_texture<D: Driver>(&self, gl: &D, target: GLenum) -> Rc<GlTexture> {
        let mut pool = self.texture_names.lock().unwrap();
        let mut name = pool.reserve();
        pool.assign_native(&mut name, gl.create_texture(target));
        Rc::new(GlTexture::new(name, target))
    }

    pub fn destroy_buffer<D: Driver>(&self, gl: &D, buffer: &Rc<GlBuffer>) {
        let name = buffer.name.take();
        if name.is_valid() {
            gl.delete_buffer(self.buffer_names.lock().unwrap().release(name));
        }
    }

    pub fn destroy_texture<D: Driver>(&self, gl: &D, texture: &Rc<GlTexture>) {
        let name = texture.name.take();
        if name.is_valid() {
            gl.delete_texture(self.texture_names.lock().unwrap().release(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::driver::mock::{DriverCall, MockGl};

    #[test]
    fn buffer_lifecycle_goes_through_the_pool() {
        let gl = MockGl::new();
        gl.set_integer(api::MAJOR_VERSION, 4);
        gl.set_integer(api::MINOR_VERSION, 5);
        let device = Device::new(&gl, CoreConfig::default());

        let buffer = device.create_buffer(&gl, 256);
        assert!(buffer.name().is_valid());
        assert_eq!(device.buffer_names.lock().unwrap().live(), 1);

        device.destroy_buffer(&gl, &buffer);
        assert_eq!(device.buffer_names.lock().unwrap().live(), 0);
        assert_eq!(gl.call_count(|c| matches!(c, DriverCall::DeleteBuffer(_))), 1);
        // double destroy is a no-op
        device.destroy_buffer(&gl, &buffer);
        assert_eq!(gl.call_count(|c| matches!(c, DriverCall::DeleteBuffer(_))), 1);
    }
}
