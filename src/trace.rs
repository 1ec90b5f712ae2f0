//! Shader tracing (debug builds, `shader-trace` feature).
//!
//! The context arms a trace for one stage and one target invocation; the next
//! matching draw/dispatch records into a GPU capture buffer (the shader side
//! appends the records), and the post-draw drain maps the buffer and decodes the
//! records into a readable dump against the variable index supplied at arm time.

use crate::api;
use crate::api::types::GLuint;
use crate::driver::Driver;
use crate::name::{NamePool, ResourceName};
use crate::resource::ShaderStage;
use std::fmt::Write as _;

const HEADER_SIZE: usize = 16;

/// The invocation the shader-side filter selects for recording.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TraceTarget {
    Pixel { x: u32, y: u32 },
    Vertex { id: u32 },
    Compute { group: [u32; 3], thread: [u32; 3] },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TraceVarType {
    Float,
    Int,
    Uint,
    Bool,
}

/// One entry of the variable-trace index: a named, typed cell at a fixed byte
/// offset inside each record.
#[derive(Clone, Debug)]
pub struct TraceVariable {
    pub name: String,
    pub offset: u32,
    pub ty: TraceVarType,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TraceState {
    Idle,
    Armed,
    Recording,
    Drained,
}

pub struct ShaderTrace {
    state: TraceState,
    stage: ShaderStage,
    target: TraceTarget,
    buffer: ResourceName,
    capacity_records: u32,
    record_stride: u32,
    index: Vec<TraceVariable>,
    dump: Option<String>,
}

impl ShaderTrace {
    pub fn new() -> ShaderTrace {
        ShaderTrace {
            state: TraceState::Idle,
            stage: ShaderStage::Pixel,
            target: TraceTarget::Vertex { id: 0 },
            buffer: ResourceName::default(),
            capacity_records: 0,
            record_stride: 0,
            index: Vec::new(),
            dump: None,
        }
    }

    pub fn capture_buffer(&self) -> GLuint {
        self.buffer.glname()
    }

    pub fn armed_stage(&self) -> Option<ShaderStage> {
        match self.state {
            TraceState::Armed | TraceState::Recording => Some(self.stage),
            _ => None,
        }
    }

    /// Arms tracing of `stage` for the given target invocation. The variable
    /// index describes the record layout the traced shader writes.
    pub fn arm<D: Driver>(
        &mut self,
        gl: &D,
        pool: &mut NamePool,
        stage: ShaderStage,
        target: TraceTarget,
        index: Vec<TraceVariable>,
        capacity_records: u32,
    ) {
        assert!(!index.is_empty(), "trace armed with an empty variable index");
        let record_stride = index
            .iter()
            .map(|v| v.offset + 4)
            .max()
            .unwrap_or(4);

        if !self.buffer.is_valid() {
            let mut name = pool.reserve();
            pool.assign_native(&mut name, gl.create_buffer());
            self.buffer = name;
        }
        let total = HEADER_SIZE + capacity_records as usize * record_stride as usize;
        gl.buffer_data(self.buffer.glname(), total as _, api::DYNAMIC_READ);

        self.state = TraceState::Armed;
        self.stage = stage;
        self.target = target;
        self.capacity_records = capacity_records;
        self.record_stride = record_stride;
        self.index = index;
        self.dump = None;
    }

    /// Flush step: writes the capture-buffer header immediately before a draw
    /// whose pipeline contains the armed stage.
    pub fn pre_draw<D: Driver>(&mut self, gl: &D, pipeline_has_stage: bool) {
        if self.state != TraceState::Armed || !pipeline_has_stage {
            return;
        }
        let mut header = [0u8; HEADER_SIZE];
        header[4..8].copy_from_slice(&self.record_stride.to_ne_bytes());
        header[8..12].copy_from_slice(&self.capacity_records.to_ne_bytes());
        gl.buffer_sub_data(self.buffer.glname(), 0, &header);
        self.state = TraceState::Recording;
        debug!(
            "shader trace recording: stage {:?}, target {:?}",
            self.stage, self.target
        );
    }

    /// Post-draw drain: barrier, map, bounded decode.
    pub fn post_draw<D: Driver>(&mut self, gl: &D) {
        if self.state != TraceState::Recording {
            return;
        }
        gl.memory_barrier(api::SHADER_STORAGE_BARRIER_BIT | api::BUFFER_UPDATE_BARRIER_BIT);

        let total = HEADER_SIZE + self.capacity_records as usize * self.record_stride as usize;
        let ptr = gl.map_buffer_range(self.buffer.glname(), 0, total as _, api::MAP_READ_BIT);
        if ptr.is_null() {
            error!("shader trace buffer could not be mapped; capture lost");
            self.state = TraceState::Drained;
            return;
        }
        let bytes = unsafe { std::slice::from_raw_parts(ptr, total) };
        self.dump = Some(self.decode(bytes));
        gl.unmap_buffer(self.buffer.glname());
        self.state = TraceState::Drained;
    }

    /// Hands out the decoded dump and returns the machine to idle.
    pub fn take_dump(&mut self) -> Option<String> {
        if self.state == TraceState::Drained {
            self.state = TraceState::Idle;
        }
        self.dump.take()
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let read_u32 = |offset: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[offset..offset + 4]);
            u32::from_ne_bytes(word)
        };

        let mut recorded = read_u32(0);
        if recorded > self.capacity_records {
            warn!(
                "shader trace overflow: {} invocations recorded, capacity {}; dump truncated",
                recorded, self.capacity_records
            );
            recorded = self.capacity_records;
        }

        let mut dump = String::new();
        let _ = writeln!(
            dump,
            "shader trace, stage {:?}, target {:?}, {} invocation(s)",
            self.stage, self.target, recorded
        );
        for record in 0..recorded as usize {
            let base = HEADER_SIZE + record * self.record_stride as usize;
            let _ = writeln!(dump, "invocation {}:", record);
            for var in &self.index {
                // an out-of-record offset means the index and the shader disagree,
                // which is an upstream bug
                assert!(
                    var.offset + 4 <= self.record_stride,
                    "trace variable {:?} outside record", var.name
                );
                let raw = read_u32(base + var.offset as usize);
                match var.ty {
                    TraceVarType::Float => {
                        let _ = writeln!(dump, "  {} = {}", var.name, f32::from_bits(raw));
                    }
                    TraceVarType::Int => {
                        let _ = writeln!(dump, "  {} = {}", var.name, raw as i32);
                    }
                    TraceVarType::Uint => {
                        let _ = writeln!(dump, "  {} = {}", var.name, raw);
                    }
                    TraceVarType::Bool => {
                        let _ = writeln!(dump, "  {} = {}", var.name, raw != 0);
                    }
                }
            }
        }
        dump
    }

    pub fn release<D: Driver>(&mut self, gl: &D, pool: &mut NamePool) {
        if self.buffer.is_valid() {
            gl.delete_buffer(pool.release(self.buffer));
            self.buffer = ResourceName::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockGl;

    fn index() -> Vec<TraceVariable> {
        vec![
            TraceVariable {
                name: "color".to_owned(),
                offset: 0,
                ty: TraceVarType::Float,
            },
            TraceVariable {
                name: "mask".to_owned(),
                offset: 4,
                ty: TraceVarType::Uint,
            },
        ]
    }

    #[test]
    fn records_decode_against_the_variable_index() {
        let gl = MockGl::new();
        let mut pool = NamePool::new();
        let mut trace = ShaderTrace::new();

        trace.arm(
            &gl,
            &mut pool,
            ShaderStage::Pixel,
            TraceTarget::Pixel { x: 3, y: 4 },
            index(),
            4,
        );
        trace.pre_draw(&gl, true);

        // stand in for the traced shader: one record, count 1
        let buffer = trace.capture_buffer();
        gl.buffer_sub_data(buffer, 0, &1u32.to_ne_bytes());
        gl.buffer_sub_data(buffer, 16, &2.5f32.to_bits().to_ne_bytes());
        gl.buffer_sub_data(buffer, 20, &7u32.to_ne_bytes());

        trace.post_draw(&gl);
        let dump = trace.take_dump().unwrap();
        assert!(dump.contains("color = 2.5"));
        assert!(dump.contains("mask = 7"));
        assert!(trace.take_dump().is_none());
    }

    #[test]
    fn overflow_truncates_to_capacity() {
        let gl = MockGl::new();
        let mut pool = NamePool::new();
        let mut trace = ShaderTrace::new();

        trace.arm(
            &gl,
            &mut pool,
            ShaderStage::Vertex,
            TraceTarget::Vertex { id: 0 },
            index(),
            2,
        );
        trace.pre_draw(&gl, true);
        // shader claims 100 invocations against a capacity of 2
        gl.buffer_sub_data(trace.capture_buffer(), 0, &100u32.to_ne_bytes());

        trace.post_draw(&gl);
        let dump = trace.take_dump().unwrap();
        assert!(dump.contains("2 invocation(s)"));
        assert!(!dump.contains("invocation 2:"));
    }

    #[test]
    fn unmatched_draw_leaves_the_trace_armed() {
        let gl = MockGl::new();
        let mut pool = NamePool::new();
        let mut trace = ShaderTrace::new();

        trace.arm(
            &gl,
            &mut pool,
            ShaderStage::Compute,
            TraceTarget::Compute {
                group: [0; 3],
                thread: [0; 3],
            },
            index(),
            1,
        );
        // a draw without the armed stage must not consume the trace
        trace.pre_draw(&gl, false);
        trace.post_draw(&gl);
        assert_eq!(trace.armed_stage(), Some(ShaderStage::Compute));
        assert!(trace.take_dump().is_none());
    }
}
