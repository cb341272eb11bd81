//! Configuration for Sonance

/// Configuration descriptor for a Sonance audio session.
#[derive(Debug, Clone)]
pub struct SonanceDesc {
    /// Registry key of the backend to open (see [`BackendRegistry`](crate::backend::BackendRegistry))
    pub backend: String,
    /// Output sample rate of the mix
    pub sample_rate: u32,
    /// Frames rendered per mixer block
    pub block_size: usize,
    /// Output channels (the software mixer renders stereo)
    pub channels: u16,
    /// Maximum number of concurrently allocated voices
    pub max_sources: usize,
    /// Capacity of each source's streaming queue. Three buffers of ~100ms is the
    /// recommended working depth; the capacity only bounds it.
    pub streaming_queue_capacity: usize,
    /// Compute distance attenuation in the core instead of handing the backend a curve
    pub manual_rolloff: bool,
    /// Whether buffers may hold ADPCM data
    pub allow_adpcm: bool,
    /// Force buffers into software storage regardless of their hint
    pub force_software_buffers: bool,
    /// Whether effects and submixes are offered
    pub enable_effects: bool,
    /// Speed of sound in world units per second, used for Doppler
    pub speed_of_sound: f32,
    /// Control points generated for curve-based rolloff backends
    pub distance_curve_points: usize,
}

impl Default for SonanceDesc {
    fn default() -> Self {
        Self {
            backend: "software".to_string(),
            sample_rate: 48000,
            block_size: 512,
            channels: 2,
            max_sources: 32,
            streaming_queue_capacity: 8,
            manual_rolloff: true,
            allow_adpcm: true,
            force_software_buffers: false,
            enable_effects: true,
            speed_of_sound: 343.3,
            distance_curve_points: 32,
        }
    }
}

impl SonanceDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.backend = name.into();
        self
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn max_sources(mut self, max: usize) -> Self {
        self.max_sources = max;
        self
    }

    pub fn streaming_queue_capacity(mut self, capacity: usize) -> Self {
        self.streaming_queue_capacity = capacity.max(1);
        self
    }

    pub fn manual_rolloff(mut self, enable: bool) -> Self {
        self.manual_rolloff = enable;
        self
    }

    pub fn allow_adpcm(mut self, enable: bool) -> Self {
        self.allow_adpcm = enable;
        self
    }

    pub fn force_software_buffers(mut self, enable: bool) -> Self {
        self.force_software_buffers = enable;
        self
    }

    pub fn enable_effects(mut self, enable: bool) -> Self {
        self.enable_effects = enable;
        self
    }

    pub fn speed_of_sound(mut self, speed: f32) -> Self {
        self.speed_of_sound = speed;
        self
    }
}
