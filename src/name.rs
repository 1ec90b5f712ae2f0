//! Pooled resource identities.
//!
//! A [`ResourceName`] decouples resource identity from the raw driver handle: the
//! identity exists as soon as it is reserved, while the underlying driver object may
//! be created later. Pools recycle slots on release.

use crate::api::types::GLuint;
use slotmap::{Key, SlotMap};

slotmap::new_key_type! {
    pub struct NameKey;
}

/// Opaque pooled identity wrapping a native handle plus a validity bit.
///
/// The default value is invalid and must never be bound.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ResourceName {
    key: NameKey,
    glname: GLuint,
}

impl ResourceName {
    pub fn is_valid(&self) -> bool {
        !self.key.is_null()
    }

    /// The native driver handle, zero while creation is still deferred.
    pub fn glname(&self) -> GLuint {
        self.glname
    }
}

/// Recycling pool of resource names.
#[derive(Default)]
pub struct NamePool {
    entries: SlotMap<NameKey, GLuint>,
}

impl NamePool {
    pub fn new() -> NamePool {
        NamePool {
            entries: SlotMap::with_key(),
        }
    }

    /// Reserves an identity with no underlying driver object yet.
    pub fn reserve(&mut self) -> ResourceName {
        ResourceName {
            key: self.entries.insert(0),
            glname: 0,
        }
    }

    /// Records the driver object backing a reserved name once it exists.
    pub fn assign_native(&mut self, name: &mut ResourceName, glname: GLuint) {
        debug_assert!(name.is_valid());
        debug_assert!(self.entries[name.key] == 0);
        self.entries[name.key] = glname;
        name.glname = glname;
    }

    /// Recycles the slot and hands the native handle back for deletion.
    pub fn release(&mut self, name: ResourceName) -> GLuint {
        debug_assert!(name.is_valid());
        self.entries.remove(name.key).unwrap_or(0)
    }

    pub fn live(&self) -> usize {
        self.entries.len()
    }
}
