//! Core tunables.
//!
//! One explicit struct passed into `Device::new`, optionally read from the
//! application's `config::Config` under the `dxgl.*` namespace.

/// Tunables for the streaming constant-buffer subsystem and frame pooling.
#[derive(Copy, Clone, Debug)]
pub struct CoreConfig {
    /// Master switch for constant-buffer streaming.
    pub streaming_enabled: bool,
    /// Ring allocation granularity in bytes. Every streamed section is rounded up
    /// to a multiple of this.
    pub streaming_granularity: usize,
    /// Geometric growth factor applied when a unit's ring capacity is exceeded.
    pub streaming_growth_factor: usize,
    /// Hard budget on a unit's ring capacity, in granularity units. Growth beyond
    /// this is refused and uploads degrade to the non-streamed path.
    pub streaming_max_units: usize,
    /// Number of frames kept in flight per streaming ring.
    pub max_frames_in_flight: usize,
    pub frame_pool_min: usize,
    pub frame_pool_max: usize,
}

impl Default for CoreConfig {
    fn default() -> CoreConfig {
        CoreConfig {
            streaming_enabled: true,
            streaming_granularity: 1024,
            streaming_growth_factor: 2,
            streaming_max_units: 256,
            max_frames_in_flight: 3,
            frame_pool_min: 2,
            frame_pool_max: 16,
        }
    }
}

impl CoreConfig {
    /// Reads `dxgl.*` keys from the application config, keeping the default for
    /// any key that is absent.
    pub fn from_config(cfg: &config::Config) -> CoreConfig {
        let d = CoreConfig::default();
        CoreConfig {
            streaming_enabled: cfg
                .get::<bool>("dxgl.streaming_enabled")
                .unwrap_or(d.streaming_enabled),
            streaming_granularity: cfg
                .get::<u64>("dxgl.streaming_granularity")
                .map(|v| v as usize)
                .unwrap_or(d.streaming_granularity),
            streaming_growth_factor: cfg
                .get::<u64>("dxgl.streaming_growth_factor")
                .map(|v| v as usize)
                .unwrap_or(d.streaming_growth_factor),
            streaming_max_units: cfg
                .get::<u64>("dxgl.streaming_max_units")
                .map(|v| v as usize)
                .unwrap_or(d.streaming_max_units),
            max_frames_in_flight: cfg
                .get::<u64>("dxgl.max_frames_in_flight")
                .map(|v| v as usize)
                .unwrap_or(d.max_frames_in_flight),
            frame_pool_min: cfg
                .get::<u64>("dxgl.frame_pool_min")
                .map(|v| v as usize)
                .unwrap_or(d.frame_pool_min),
            frame_pool_max: cfg
                .get::<u64>("dxgl.frame_pool_max")
                .map(|v| v as usize)
                .unwrap_or(d.frame_pool_max),
        }
    }
}
