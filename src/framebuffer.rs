//! Framebuffer objects and their memoization cache.
//!
//! Keyed structurally by the attachment view set. An incomplete framebuffer is
//! still cached so repeated requests for a bad configuration do not hammer the
//! driver; lookups for it keep failing cheaply.

use crate::api;
use crate::api::types::GLenum;
use crate::driver::Driver;
use crate::name::{NamePool, ResourceName};
use crate::resource::TextureView;
use crate::state::{StateCache, MAX_RENDER_TARGETS};
use fxhash::FxHashMap;
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

fn view_ptr(view: &Option<Rc<TextureView>>) -> *const TextureView {
    match view {
        Some(v) => Rc::as_ptr(v),
        None => std::ptr::null(),
    }
}

/// Ordered attachment set; equality and hashing are by view identity, mirroring the
/// raw pointer-array compare the cache key needs.
#[derive(Clone, Default)]
pub struct FramebufferConfig {
    pub colors: [Option<Rc<TextureView>>; MAX_RENDER_TARGETS],
    pub depth_stencil: Option<Rc<TextureView>>,
}

impl FramebufferConfig {
    pub(crate) fn attachments(&self) -> impl Iterator<Item = &Rc<TextureView>> {
        self.colors
            .iter()
            .chain(std::iter::once(&self.depth_stencil))
            .filter_map(|v| v.as_ref())
    }
}

impl PartialEq for FramebufferConfig {
    fn eq(&self, other: &FramebufferConfig) -> bool {
        self.colors
            .iter()
            .zip(other.colors.iter())
            .all(|(a, b)| view_ptr(a) == view_ptr(b))
            && view_ptr(&self.depth_stencil) == view_ptr(&other.depth_stencil)
    }
}

impl Eq for FramebufferConfig {}

impl Hash for FramebufferConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for color in &self.colors {
            (view_ptr(color) as usize).hash(state);
        }
        (view_ptr(&self.depth_stencil) as usize).hash(state);
    }
}

pub struct GlFramebuffer {
    pub(crate) name: ResourceName,
    pub(crate) config: FramebufferConfig,
    pub(crate) draw_buffers: SmallVec<[GLenum; MAX_RENDER_TARGETS]>,
    pub(crate) complete: bool,
}

impl GlFramebuffer {
    pub fn glname(&self) -> u32 {
        self.name.glname()
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Default)]
pub struct FramebufferCache {
    entries: FxHashMap<FramebufferConfig, Rc<GlFramebuffer>>,
    hits: u64,
    misses: u64,
}

impl FramebufferCache {
    pub fn new() -> FramebufferCache {
        FramebufferCache::default()
    }

    /// Looks up or builds the framebuffer for `config`. Returns `None` when the
    /// driver reports the attachment combination incomplete; the failure entry is
    /// cached all the same.
    pub fn allocate<D: Driver>(
        &mut self,
        gl: &D,
        cache: &mut StateCache,
        config: &FramebufferConfig,
        pool: &mut NamePool,
    ) -> Option<Rc<GlFramebuffer>> {
        if let Some(fb) = self.entries.get(config) {
            self.hits += 1;
            return if fb.complete { Some(fb.clone()) } else { None };
        }
        self.misses += 1;

        let mut name = pool.reserve();
        pool.assign_native(&mut name, gl.create_framebuffer());

        // attach through the shadow cache so the bound-framebuffer mirror stays true
        cache.bind_draw_framebuffer(gl, name.glname());

        let mut draw_buffers: SmallVec<[GLenum; MAX_RENDER_TARGETS]> = SmallVec::new();
        for (i, color) in config.colors.iter().enumerate() {
            match color {
                Some(view) => {
                    attach(gl, api::COLOR_ATTACHMENT0 + i as GLenum, view);
                    draw_buffers.push(api::COLOR_ATTACHMENT0 + i as GLenum);
                }
                None => draw_buffers.push(api::NONE),
            }
        }
        while draw_buffers.last() == Some(&api::NONE) {
            draw_buffers.pop();
        }
        if let Some(view) = &config.depth_stencil {
            attach(gl, api::DEPTH_STENCIL_ATTACHMENT, view);
        }
        gl.draw_buffers(&draw_buffers);

        let status = gl.check_framebuffer_status(api::DRAW_FRAMEBUFFER);
        let complete = status == api::FRAMEBUFFER_COMPLETE;
        if !complete {
            error!("framebuffer incomplete, status 0x{:04x}", status);
        }

        let framebuffer = Rc::new(GlFramebuffer {
            name,
            config: config.clone(),
            draw_buffers,
            complete,
        });
        for view in config.attachments() {
            view.link_framebuffer(&framebuffer);
        }
        self.entries.insert(config.clone(), framebuffer.clone());

        if complete {
            Some(framebuffer)
        } else {
            None
        }
    }

    /// Evicts one framebuffer: severs its links from every attached view except
    /// `exclude` (the view currently being destroyed, if any) and deletes the
    /// driver object.
    pub fn remove<D: Driver>(
        &mut self,
        gl: &D,
        framebuffer: &Rc<GlFramebuffer>,
        exclude: Option<&Rc<TextureView>>,
        pool: &mut NamePool,
    ) {
        for view in framebuffer.config.attachments() {
            let skip = exclude.map_or(false, |ex| Rc::ptr_eq(ex, view));
            if !skip {
                view.unlink_framebuffer(framebuffer);
            }
        }
        self.entries.remove(&framebuffer.config);
        gl.delete_framebuffer(pool.release(framebuffer.name));
    }

    /// Destroy-path eviction: drops every cached framebuffer referencing `view`.
    pub fn remove_referencing<D: Driver>(
        &mut self,
        gl: &D,
        view: &Rc<TextureView>,
        pool: &mut NamePool,
    ) {
        for framebuffer in view.take_framebuffer_refs() {
            self.remove(gl, &framebuffer, Some(view), pool);
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

fn attach<D: Driver>(gl: &D, attachment: GLenum, view: &Rc<TextureView>) {
    match view.layer {
        Some(layer) => gl.framebuffer_texture_layer(
            api::DRAW_FRAMEBUFFER,
            attachment,
            view.texture.glname(),
            view.level,
            layer,
        ),
        None => gl.framebuffer_texture(
            api::DRAW_FRAMEBUFFER,
            attachment,
            view.texture.glname(),
            view.level,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Capabilities;
    use crate::driver::mock::{DriverCall, MockGl};
    use crate::resource::GlTexture;

    fn setup() -> (MockGl, StateCache, NamePool) {
        let gl = MockGl::new();
        gl.set_integer(api::MAJOR_VERSION, 4);
        gl.set_integer(api::MINOR_VERSION, 5);
        let caps = Capabilities::detect(&gl);
        (gl, StateCache::new(&caps), NamePool::new())
    }

    fn color_view(gl: &MockGl, pool: &mut NamePool) -> Rc<TextureView> {
        let mut name = pool.reserve();
        pool.assign_native(&mut name, gl.create_texture(api::TEXTURE_2D));
        Rc::new(TextureView::new(
            Rc::new(GlTexture::new(name, api::TEXTURE_2D)),
            0,
            None,
        ))
    }

    #[test]
    fn equal_configs_share_one_framebuffer() {
        let (gl, mut state, mut pool) = setup();
        let mut cache = FramebufferCache::new();
        let view = color_view(&gl, &mut pool);

        let mut config = FramebufferConfig::default();
        config.colors[0] = Some(view);

        let a = cache.allocate(&gl, &mut state, &config, &mut pool).unwrap();
        let b = cache
            .allocate(&gl, &mut state, &config.clone(), &mut pool)
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::CreateFramebuffer(_))),
            1
        );
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn different_depth_attachment_means_distinct_framebuffers() {
        let (gl, mut state, mut pool) = setup();
        let mut cache = FramebufferCache::new();
        let color = color_view(&gl, &mut pool);
        let depth_a = color_view(&gl, &mut pool);
        let depth_b = color_view(&gl, &mut pool);

        let mut config = FramebufferConfig::default();
        config.colors[0] = Some(color);
        config.depth_stencil = Some(depth_a);
        let a = cache.allocate(&gl, &mut state, &config, &mut pool).unwrap();

        config.depth_stencil = Some(depth_b);
        let b = cache.allocate(&gl, &mut state, &config, &mut pool).unwrap();

        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::CreateFramebuffer(_))),
            2
        );
    }

    #[test]
    fn destroying_a_view_evicts_exactly_its_framebuffers() {
        let (gl, mut state, mut pool) = setup();
        let mut cache = FramebufferCache::new();
        let shared = color_view(&gl, &mut pool);
        let other = color_view(&gl, &mut pool);

        // three configurations referencing `shared`, one unrelated
        for i in 0..3usize {
            let mut config = FramebufferConfig::default();
            config.colors[0] = Some(shared.clone());
            config.colors[i + 1] = Some(other.clone());
            cache.allocate(&gl, &mut state, &config, &mut pool).unwrap();
        }
        let mut unrelated = FramebufferConfig::default();
        unrelated.colors[0] = Some(other.clone());
        cache
            .allocate(&gl, &mut state, &unrelated, &mut pool)
            .unwrap();
        assert_eq!(cache.stats().entries, 4);

        cache.remove_referencing(&gl, &shared, &mut pool);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::DeleteFramebuffer(_))),
            3
        );
        // the survivor's back-references must not mention the dead framebuffers
        assert_eq!(other.framebuffer_refs.borrow().len(), 1);
    }

    #[test]
    fn incomplete_configuration_is_cached_as_failure() {
        let (gl, mut state, mut pool) = setup();
        let mut cache = FramebufferCache::new();
        let view = color_view(&gl, &mut pool);
        let mut config = FramebufferConfig::default();
        config.colors[0] = Some(view);

        gl.framebuffer_status
            .set(api::FRAMEBUFFER_INCOMPLETE_ATTACHMENT);
        assert!(cache.allocate(&gl, &mut state, &config, &mut pool).is_none());
        assert!(cache.allocate(&gl, &mut state, &config, &mut pool).is_none());
        // second request is a cache hit; no second driver object
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::CreateFramebuffer(_))),
            1
        );
    }
}
