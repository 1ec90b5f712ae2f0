//! Constant-buffer streaming.
//!
//! Small per-draw constant-buffer uploads are batched into large per-unit ring
//! buffers split into one segment per frame in flight. A segment is only written
//! while its frame is current, and a frame only becomes current once enough older
//! frames have retired, so the GPU never reads a segment that is being rewritten.
//!
//! The whole subsystem is an optimization layer: any exhaustion (frame pool dry,
//! ring segment full, growth budget hit) degrades to re-uploading the buffer's own
//! storage, never to incorrect rendering.

use crate::api;
use crate::caps::Capabilities;
use crate::config::CoreConfig;
use crate::driver::Driver;
use crate::name::{NamePool, ResourceName};
use crate::resource::GlBuffer;
use crate::state::{BufferRangeState, StateCache};
use crate::sync::GpuFence;
use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// One frame-in-flight descriptor. Recycled through the frame pool; carries the
/// fence that gates reuse of the ring segments it wrote.
struct ContextFrame<F: Copy + fmt::Debug> {
    fence: Option<GpuFence<F>>,
}

/// Per-unit ring buffer. `section_capacity` bytes per frame segment,
/// `frames_in_flight` segments back to back in one driver buffer.
struct StreamingBuffer {
    name: ResourceName,
    section_capacity: usize,
    cursor: usize,
    segment: usize,
    map_ptr: *mut u8,
    /// Largest section requested this frame, in bytes; drives growth.
    requested: usize,
}

impl StreamingBuffer {
    fn total_size(&self, frames: usize) -> usize {
        self.section_capacity * frames
    }
}

pub struct StreamingConstantBuffers<F: Copy + fmt::Debug> {
    enabled: bool,
    granularity: usize,
    growth_factor: usize,
    max_units: usize,
    frames_in_flight: usize,
    pool_min: usize,
    pool_max: usize,
    persistent_map: bool,
    align: usize,

    rings: FxHashMap<u32, StreamingBuffer>,
    free_frames: Vec<ContextFrame<F>>,
    in_flight: VecDeque<ContextFrame<F>>,
    current: Option<ContextFrame<F>>,
    pool_size: usize,
    frame_index: usize,
}

impl<F: Copy + fmt::Debug> StreamingConstantBuffers<F> {
    pub fn new(config: &CoreConfig, caps: &Capabilities) -> StreamingConstantBuffers<F> {
        StreamingConstantBuffers {
            enabled: config.streaming_enabled,
            granularity: config.streaming_granularity.max(1),
            growth_factor: config.streaming_growth_factor.max(2),
            max_units: config.streaming_max_units,
            frames_in_flight: config.max_frames_in_flight.max(1),
            pool_min: config.frame_pool_min,
            pool_max: config.frame_pool_max.max(config.frame_pool_min.max(1)),
            persistent_map: caps.buffer_storage,
            align: caps.uniform_buffer_offset_alignment.max(1),
            rings: FxHashMap::default(),
            free_frames: Vec::new(),
            in_flight: VecDeque::new(),
            current: None,
            pool_size: 0,
            frame_index: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// True while a frame object is current, i.e. ring segments may be written.
    pub fn frame_active(&self) -> bool {
        self.current.is_some()
    }

    //------------------------------------------------------------------ frame rotation

    /// Once-per-frame rotation: retire signaled frames, fence and queue the
    /// outgoing frame, acquire a frame object for the new frame.
    pub fn switch_frame<D: Driver<Fence = F>>(&mut self, gl: &D, pool: &mut NamePool) {
        if !self.enabled {
            return;
        }

        // retire from the front; later frames cannot have completed earlier
        while let Some(mut frame) = self.in_flight.pop_front() {
            let done = frame
                .fence
                .as_ref()
                .map_or(true, |fence| fence.signaled(gl));
            if !done {
                self.in_flight.push_front(frame);
                break;
            }
            if let Some(fence) = frame.fence.take() {
                fence.release(gl);
            }
            self.free_frames.push(frame);
        }

        if let Some(mut outgoing) = self.current.take() {
            outgoing.fence = Some(GpuFence::insert(gl));
            self.in_flight.push_back(outgoing);
            self.frame_index += 1;
        }

        self.grow_rings(gl, pool);

        // a segment may only be rewritten after its previous frame retired
        if self.in_flight.len() >= self.frames_in_flight {
            debug!("streaming frame pool saturated; uploads fall back this frame");
            return;
        }

        self.current = match self.free_frames.pop() {
            Some(frame) => Some(frame),
            None if self.pool_size < self.pool_max => {
                // geometric pool growth between the configured bounds
                let target = (self.pool_size * 2).max(self.pool_min).min(self.pool_max);
                for _ in self.pool_size..target.saturating_sub(1) {
                    self.free_frames.push(ContextFrame { fence: None });
                }
                self.pool_size = target.max(self.pool_size + 1);
                Some(ContextFrame { fence: None })
            }
            None => None,
        };

        if self.current.is_some() {
            let segment = self.frame_index % self.frames_in_flight;
            for ring in self.rings.values_mut() {
                ring.segment = segment;
                ring.cursor = 0;
                ring.requested = 0;
            }
        }
    }

    /// Grows any ring whose requested section size exceeded its capacity, within
    /// the configured unit budget.
    fn grow_rings<D: Driver<Fence = F>>(&mut self, gl: &D, pool: &mut NamePool) {
        let budget = self.max_units * self.granularity;
        let frames = self.frames_in_flight;
        let growth = self.growth_factor;
        let persistent = self.persistent_map;
        for ring in self.rings.values_mut() {
            // segment bases double as bind offsets, so capacities stay multiples
            // of the uniform offset alignment
            let wanted = align_up(align_up(ring.requested, self.granularity), self.align);
            if wanted <= ring.section_capacity {
                continue;
            }
            let mut capacity = align_up(ring.section_capacity.max(self.granularity), self.align);
            while capacity < wanted && capacity * growth <= budget {
                capacity *= growth;
            }
            if capacity < wanted {
                // budget exceeded; the unit keeps degrading to the slow path
                warn!(
                    "streaming ring for unit stays at {} bytes, {} requested ({} byte budget)",
                    ring.section_capacity, wanted, budget
                );
                if ring.section_capacity > 0 {
                    continue;
                }
            }
            if capacity == ring.section_capacity {
                continue;
            }
            if ring.name.is_valid() {
                gl.delete_buffer(pool.release(ring.name));
            }
            *ring = allocate_ring(gl, pool, capacity, frames, persistent);
        }
    }

    //------------------------------------------------------------------------- uploads

    /// Copies the live CPU contents of `buffer` into the unit's ring and binds the
    /// written range, or falls back to uploading the buffer's own storage.
    pub fn upload_and_bind<D: Driver<Fence = F>>(
        &mut self,
        gl: &D,
        cache: &mut StateCache,
        unit: u32,
        buffer: &GlBuffer,
    ) {
        let size = buffer.size;
        if !self.enabled || !buffer.streaming.get() || size == 0 {
            return bind_own_storage(gl, cache, unit, buffer);
        }

        let ring = self
            .rings
            .entry(unit)
            .or_insert_with(|| StreamingBuffer {
                name: ResourceName::default(),
                section_capacity: 0,
                cursor: 0,
                segment: 0,
                map_ptr: std::ptr::null_mut(),
                requested: 0,
            });
        ring.requested = ring.requested.max(size);

        let fits = ring.cursor + size <= ring.section_capacity;
        if self.current.is_none() || !ring.name.is_valid() || !fits {
            // frame pool dry, ring not yet sized, or segment exhausted
            return bind_own_storage(gl, cache, unit, buffer);
        }

        let offset = ring.segment * ring.section_capacity + ring.cursor;
        let data = buffer.cpu_data.borrow();
        if !ring.map_ptr.is_null() {
            // persistent-mapped direct copy
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), ring.map_ptr.add(offset), size);
            }
        } else {
            let ptr = gl.map_buffer_range(
                ring.name.glname(),
                offset as _,
                size as _,
                api::MAP_WRITE_BIT | api::MAP_UNSYNCHRONIZED_BIT,
            );
            if !ptr.is_null() {
                unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, size);
                }
                gl.unmap_buffer(ring.name.glname());
            } else {
                gl.buffer_sub_data(ring.name.glname(), offset as _, &data[..size]);
            }
        }
        drop(data);

        ring.cursor += align_up(size, self.align);
        cache.bind_uniform_buffer(
            gl,
            unit,
            BufferRangeState {
                buffer: ring.name.glname(),
                offset: offset as _,
                size: size as _,
            },
        );
    }

    pub fn release_all<D: Driver<Fence = F>>(&mut self, gl: &D, pool: &mut NamePool) {
        for (_, ring) in self.rings.drain() {
            if ring.name.is_valid() {
                gl.delete_buffer(pool.release(ring.name));
            }
        }
        for mut frame in self
            .in_flight
            .drain(..)
            .chain(self.current.take())
            .chain(self.free_frames.drain(..))
        {
            if let Some(fence) = frame.fence.take() {
                fence.release(gl);
            }
        }
    }

    #[cfg(test)]
    fn ring_capacity(&self, unit: u32) -> usize {
        self.rings.get(&unit).map_or(0, |r| r.section_capacity)
    }
}

/// Re-upload into the buffer's own storage and bind that. The correct-but-slower
/// path every degradation funnels into.
fn bind_own_storage<D: Driver>(gl: &D, cache: &mut StateCache, unit: u32, buffer: &GlBuffer) {
    if buffer.dirty.get() {
        gl.buffer_sub_data(buffer.glname(), 0, &buffer.cpu_data.borrow());
        buffer.dirty.set(false);
    }
    cache.bind_uniform_buffer(
        gl,
        unit,
        BufferRangeState {
            buffer: buffer.glname(),
            offset: 0,
            size: buffer.size as _,
        },
    );
}

fn allocate_ring<D: Driver>(
    gl: &D,
    pool: &mut NamePool,
    section_capacity: usize,
    frames: usize,
    persistent: bool,
) -> StreamingBuffer {
    let mut name = pool.reserve();
    pool.assign_native(&mut name, gl.create_buffer());
    let total = section_capacity * frames;

    let map_ptr = if persistent {
        let flags = api::MAP_WRITE_BIT | api::MAP_PERSISTENT_BIT | api::MAP_COHERENT_BIT;
        gl.buffer_storage(name.glname(), total as _, flags);
        gl.map_buffer_range(name.glname(), 0, total as _, flags)
    } else {
        gl.buffer_data(name.glname(), total as _, api::DYNAMIC_DRAW);
        std::ptr::null_mut()
    };

    StreamingBuffer {
        name,
        section_capacity,
        cursor: 0,
        segment: 0,
        map_ptr,
        requested: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{DriverCall, MockGl};

    fn setup(config: CoreConfig) -> (MockGl, StateCache, NamePool, StreamingConstantBuffers<u64>) {
        let _ = pretty_env_logger::try_init();
        let gl = MockGl::new();
        gl.set_integer(api::MAJOR_VERSION, 4);
        gl.set_integer(api::MINOR_VERSION, 5);
        let caps = Capabilities::detect(&gl);
        let streaming = StreamingConstantBuffers::new(&config, &caps);
        (gl, StateCache::new(&caps), NamePool::new(), streaming)
    }

    fn constant_buffer(gl: &MockGl, pool: &mut NamePool, size: usize) -> GlBuffer {
        let mut name = pool.reserve();
        pool.assign_native(&mut name, gl.create_buffer());
        gl.buffer_data(name.glname(), size as _, api::DYNAMIC_DRAW);
        let buffer = GlBuffer::new(name, size);
        buffer.streaming.set(true);
        buffer.dirty.set(true);
        buffer
    }

    #[test]
    fn ring_grows_geometrically_within_budget() {
        let config = CoreConfig {
            streaming_granularity: 1024,
            streaming_growth_factor: 2,
            streaming_max_units: 256,
            max_frames_in_flight: 4,
            ..CoreConfig::default()
        };
        let (gl, mut cache, mut pool, mut streaming) = setup(config);
        let buffer = constant_buffer(&gl, &mut pool, 10 * 1024);

        for frame in 0..4 {
            streaming.switch_frame(&gl, &mut pool);
            streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);
            // keep frames retiring so the pool never saturates
            gl.signal_fence(frame + 1);
        }

        let capacity = streaming.ring_capacity(0);
        assert!(capacity >= 10 * 1024, "capacity {} too small", capacity);
        assert!(capacity <= 256 * 1024, "capacity {} exceeds budget", capacity);
    }

    #[test]
    fn growth_beyond_budget_degrades_to_own_storage() {
        let config = CoreConfig {
            streaming_granularity: 1024,
            streaming_max_units: 4, // 4 KiB budget
            ..CoreConfig::default()
        };
        let (gl, mut cache, mut pool, mut streaming) = setup(config);
        let buffer = constant_buffer(&gl, &mut pool, 64 * 1024);
        let own = buffer.glname();

        for frame in 0..3 {
            streaming.switch_frame(&gl, &mut pool);
            buffer.dirty.set(true);
            streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);
            gl.signal_fence(frame + 1);
        }

        // every bind targeted the buffer's own storage
        let ring_binds = gl.call_count(|c| match c {
            DriverCall::BindBufferRange(_, _, buf, _, _) => *buf != own,
            _ => false,
        });
        assert_eq!(ring_binds, 0);
    }

    #[test]
    fn unsignaled_fences_block_segment_reuse() {
        let config = CoreConfig {
            max_frames_in_flight: 2,
            ..CoreConfig::default()
        };
        let (gl, mut cache, mut pool, mut streaming) = setup(config);
        let buffer = constant_buffer(&gl, &mut pool, 512);

        // prime the ring size
        streaming.switch_frame(&gl, &mut pool);
        streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);
        streaming.switch_frame(&gl, &mut pool);
        streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);
        streaming.switch_frame(&gl, &mut pool);

        // no fence ever signaled: two frames are in flight, the pool must refuse
        // a third and uploads must not touch the ring
        assert!(!streaming.frame_active());
        gl.clear_calls();
        buffer.dirty.set(true);
        streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::MapBufferRange(..))),
            0
        );
        assert_eq!(
            gl.call_count(|c| matches!(c, DriverCall::BufferSubData(buf, _, _) if *buf == buffer.glname())),
            1
        );

        // once the oldest frame signals, rotation hands out a frame again
        gl.signal_fence(1);
        streaming.switch_frame(&gl, &mut pool);
        assert!(streaming.frame_active());
    }

    #[test]
    fn segment_capacity_rounds_up_to_the_bind_alignment() {
        let config = CoreConfig {
            // deliberately not a multiple of the 256 byte offset alignment
            streaming_granularity: 1000,
            max_frames_in_flight: 2,
            ..CoreConfig::default()
        };
        let (gl, mut cache, mut pool, mut streaming) = setup(config);
        let buffer = constant_buffer(&gl, &mut pool, 16);

        // first frame sizes the ring, second frame streams into segment 1
        streaming.switch_frame(&gl, &mut pool);
        streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);
        gl.signal_fence(1);
        streaming.switch_frame(&gl, &mut pool);
        streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);

        assert_eq!(streaming.ring_capacity(0) % 256, 0);
        let misaligned = gl.call_count(|c| match c {
            DriverCall::BindBufferRange(api::UNIFORM_BUFFER, _, _, offset, _) => {
                *offset % 256 != 0
            }
            _ => false,
        });
        assert_eq!(misaligned, 0);
    }

    #[test]
    fn persistent_map_copy_lands_in_the_ring() {
        let config = CoreConfig {
            streaming_granularity: 256,
            max_frames_in_flight: 2,
            ..CoreConfig::default()
        };
        let (gl, mut cache, mut pool, mut streaming) = setup(config);
        let buffer = constant_buffer(&gl, &mut pool, 16);
        buffer.cpu_data.borrow_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);

        // first frame sizes the ring, second frame streams
        streaming.switch_frame(&gl, &mut pool);
        streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);
        gl.signal_fence(1);
        streaming.switch_frame(&gl, &mut pool);
        streaming.upload_and_bind(&gl, &mut cache, 0, &buffer);

        let ring = streaming.rings[&0].name.glname();
        let segment = streaming.rings[&0].segment * streaming.rings[&0].section_capacity;
        let contents = gl.backing_contents(ring);
        assert_eq!(&contents[segment..segment + 4], &[1, 2, 3, 4]);
    }
}
