//! Thin wrapper over driver fence objects.

use crate::driver::{Driver, WaitStatus};
use std::fmt;

/// A GPU-side completion fence inserted into the command stream.
#[derive(Debug)]
pub struct GpuFence<F: Copy + fmt::Debug> {
    raw: F,
}

impl<F: Copy + fmt::Debug> GpuFence<F> {
    pub fn insert<D: Driver<Fence = F>>(gl: &D) -> GpuFence<F> {
        GpuFence {
            raw: gl.fence_sync(),
        }
    }

    /// Non-blocking completion poll.
    pub fn signaled<D: Driver<Fence = F>>(&self, gl: &D) -> bool {
        gl.client_wait_sync(self.raw, 0).is_signaled()
    }

    pub fn wait<D: Driver<Fence = F>>(&self, gl: &D, timeout_ns: u64) -> WaitStatus {
        gl.client_wait_sync(self.raw, timeout_ns)
    }

    pub fn release<D: Driver<Fence = F>>(self, gl: &D) {
        gl.delete_sync(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockGl;

    #[test]
    fn poll_reflects_injected_status() {
        let gl = MockGl::new();
        let fence = GpuFence::insert(&gl);
        assert!(!fence.signaled(&gl));
        gl.signal_fence(1);
        assert!(fence.signaled(&gl));
        fence.release(&gl);
    }
}
