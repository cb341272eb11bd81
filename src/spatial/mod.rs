pub mod attenuation;
pub mod processor;

pub use attenuation::{DistanceCurve, manual_rolloff_gain, manual_rolloff_mb, mb_to_gain};
pub use processor::{Emitter, SpatialProcessor, cone_gain};
