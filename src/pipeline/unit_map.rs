//! Slot-to-unit maps.
//!
//! A [`UnitMap`] translates a logical resource slot of a shader stage into the
//! driver binding unit the linked program actually reads. Maps are immutable once
//! built and interned by content: any two equal-by-content maps are the same map,
//! shared by arbitrarily many pipelines.

use crate::resource::{ShaderStage, STAGE_COUNT};
use fxhash::FxHashMap;
use std::sync::Arc;

pub const INVALID_UNIT: u16 = u16::MAX;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct UnitMap {
    slots_per_stage: usize,
    // stage-major; INVALID_UNIT marks an unused slot
    units: Box<[u16]>,
}

impl UnitMap {
    pub fn empty(slots_per_stage: usize) -> UnitMap {
        UnitMap {
            slots_per_stage,
            units: vec![INVALID_UNIT; slots_per_stage * STAGE_COUNT].into_boxed_slice(),
        }
    }

    pub(crate) fn set(&mut self, stage: ShaderStage, slot: u32, unit: u16) {
        self.units[stage.index() * self.slots_per_stage + slot as usize] = unit;
    }

    /// The driver unit for `(stage, slot)`, or `None` when the bound pipeline does
    /// not consume that slot.
    pub fn unit(&self, stage: ShaderStage, slot: u32) -> Option<u32> {
        let slot = slot as usize;
        if slot >= self.slots_per_stage {
            return None;
        }
        match self.units[stage.index() * self.slots_per_stage + slot] {
            INVALID_UNIT => None,
            unit => Some(u32::from(unit)),
        }
    }
}

/// Interning cache for unit maps, shared across contexts (behind the device's
/// mutex); interned maps are never mutated.
#[derive(Default)]
pub struct UnitMapCache {
    entries: FxHashMap<UnitMap, Arc<UnitMap>>,
    hits: u64,
    misses: u64,
}

impl UnitMapCache {
    pub fn new() -> UnitMapCache {
        UnitMapCache::default()
    }

    pub fn intern(&mut self, map: UnitMap) -> Arc<UnitMap> {
        if let Some(shared) = self.entries.get(&map) {
            self.hits += 1;
            return shared.clone();
        }
        self.misses += 1;
        let shared = Arc::new(map.clone());
        self.entries.insert(map, shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}
