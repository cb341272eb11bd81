//! # Sonance
//!
//! A device-independent audio engine core: buffers, sources, a listener, 3D distance
//! attenuation, an IMA ADPCM codec and crossfaded music playback, on top of a pluggable
//! backend contract.
//!
//! The host owns a [`SonanceSession`] on its main thread, sets source and listener
//! parameters during a frame and calls [`SonanceSession::commit_3d_changes`] once per
//! frame. The backend mixes on its own audio thread; the application side never waits
//! on it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sonance::*;
//!
//! let mut session = SonanceSession::new(SonanceDesc::default())?;
//! let _mixer = session.take_mixer();
//!
//! session.create_listener().set_pos(Vec3::ZERO);
//!
//! let buffer = session.create_buffer("step")?;
//! buffer.set_format(BufferFormat::pcm(1, 16, 22050))?;
//! buffer.fill_pcm16(&[0i16; 2205])?;
//!
//! let id = session.create_source();
//! if let Some(source) = session.source_mut(id) {
//!     source.set_static_buffer(Some(&buffer));
//!     source.set_pos(Vec3::new(4.0, 0.0, 0.0));
//!     source.set_min_max_distances(1.0, 50.0);
//!     source.play();
//! }
//!
//! // Once per frame
//! session.commit_3d_changes();
//! for event in session.poll_events() {
//!     if let SonanceEvent::SourceCompleted { source_id } = event {
//!         println!("{} finished", source_id);
//!     }
//! }
//! # Ok::<(), SonanceError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`SonanceSession`]**: owns the backend, the listener, sources, effects and submixes
//! - **[`Source`]**: playback unit with a static buffer or a streaming queue
//! - **[`Buffer`]**: PCM or ADPCM sample data, shared by reference
//! - **[`SpatialProcessor`](spatial::SpatialProcessor)**: attenuation, cone, Doppler and pan
//! - **[`MusicFader`]**: two-slot crossfading music player
//! - **[`Backend`](backend::Backend)**: the contract a native driver implements; a software
//!   implementation ships in [`backend::software`]

pub mod backend;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod effect;
pub mod error;
pub mod events;
pub mod listener;
pub mod math;
pub mod music;
pub mod session;
pub mod source;
pub mod spatial;

pub use backend::{Backend, BackendRegistry, DriverOption, Mixer};
pub use buffer::{Buffer, BufferFormat, SampleFormat, StorageMode};
pub use codec::CodecState;
pub use config::SonanceDesc;
pub use effect::{EffectId, EffectKind, ReverbParams, ReverbPreset, SubmixId};
pub use error::{Result, SonanceError};
pub use events::SonanceEvent;
pub use listener::Listener;
pub use math::{Orientation, Vec3};
pub use music::{MusicChannel, MusicFader, SlotState};
pub use session::SonanceSession;
pub use source::{Source, SourceId, SourceState};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use std::sync::Arc;
    use std::time::Duration;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn software_session(desc: SonanceDesc) -> (SonanceSession, Arc<SoftwareBackend>) {
        init_logger();
        let backend = Arc::new(SoftwareBackend::new(&desc).expect("software backend"));
        let session = SonanceSession::with_backend(desc, backend.clone());
        (session, backend)
    }

    #[test]
    fn inverse_distance_source_is_attenuated_tenfold() -> anyhow::Result<()> {
        let (mut session, _backend) = software_session(SonanceDesc::default());
        session.create_listener();

        let buffer = session.create_buffer("hum")?;
        buffer.set_format(BufferFormat::pcm(1, 16, 48000))?;
        buffer.fill_pcm16(&[1000i16; 4800])?;

        let id = session.create_source();
        let source = session.source_mut(id).expect("source exists");
        source.set_static_buffer(Some(&buffer));
        source.set_pos(Vec3::new(10.0, 0.0, 0.0));
        source.set_min_max_distances(1.0, 20.0);
        source.set_alpha(-1.0);
        assert!(source.play());

        session.commit_3d_changes();
        let gain = session.source(id).expect("source exists").output_params().gain;
        assert!((gain - 0.1).abs() < 1e-3, "gain was {}", gain);
        Ok(())
    }

    #[test]
    fn adpcm_silence_round_trips_through_a_buffer() -> anyhow::Result<()> {
        let (session, _backend) = software_session(SonanceDesc::default());
        let buffer = session.create_buffer("silence")?;
        buffer.set_format(BufferFormat::adpcm(22050))?;
        buffer.fill_adpcm_from_pcm(&[0i16; 1000])?;

        assert_eq!(buffer.size(), 500);
        assert_eq!(buffer.frame_count(), 1000);
        assert_eq!(buffer.read_pcm16()?, vec![0i16; 1000]);
        Ok(())
    }

    #[test]
    fn source_state_machine() -> anyhow::Result<()> {
        let (mut session, backend) = software_session(SonanceDesc::default().sample_rate(1000));
        let mut mixer = session.take_mixer().expect("mixer available");

        let id = session.create_source();
        assert!(!session.source_mut(id).expect("source").play());

        let chunk = |session: &SonanceSession| -> anyhow::Result<Arc<Buffer>> {
            let buffer = session.create_buffer("chunk")?;
            buffer.set_format(BufferFormat::pcm(1, 16, 1000))?;
            buffer.fill_pcm16(&[2000i16; 100])?;
            Ok(buffer)
        };
        for _ in 0..3 {
            let buffer = chunk(&session)?;
            session.source_mut(id).expect("source").submit_streaming_buffer(buffer)?;
        }

        let source = session.source_mut(id).expect("source");
        assert_eq!(source.count_streaming_buffers(), 3);
        assert!(source.play());
        assert_eq!(source.state(), SourceState::Playing);

        let mut out = vec![0.0f32; 2 * 150];
        mixer.render(&mut out);
        assert_eq!(session.source(id).expect("source").count_streaming_buffers(), 2);
        assert!(session
            .poll_events()
            .contains(&SonanceEvent::BufferProcessed { source_id: id }));

        let source = session.source_mut(id).expect("source");
        source.pause();
        assert_eq!(source.state(), SourceState::Paused);
        assert!(source.play());
        assert_eq!(source.state(), SourceState::Playing);

        source.stop();
        assert_eq!(source.state(), SourceState::Stopped);
        assert_eq!(source.count_streaming_buffers(), 0);
        assert_eq!(backend.active_voices(), 1);

        session.remove_source(id);
        assert_eq!(backend.active_voices(), 0);
        Ok(())
    }

    #[test]
    fn music_fader_keeps_at_most_two_tracks() -> anyhow::Result<()> {
        let (session, backend) = software_session(SonanceDesc::default());
        for name in ["music/a.ogg", "music/b.ogg", "music/c.ogg"] {
            let track = session.create_buffer(name)?;
            track.set_format(BufferFormat::pcm(2, 16, 48000))?;
            track.fill_pcm16(&vec![0i16; 48000])?;
            backend.music_library().insert(name, track);
        }

        let mut fader = session.music_fader();
        fader.play("music/a.ogg", 0, false, true)?;
        fader.play("music/b.ogg", 0, false, true)?;
        assert_eq!(fader.playing_slots(), 1);

        fader.play("music/a.ogg", 1000, false, true)?;
        assert_eq!(fader.playing_slots(), 2);
        fader.play("music/c.ogg", 1000, true, false)?;
        assert_eq!(fader.playing_slots(), 2);
        assert_eq!(fader.slot_state(fader.active_slot()), SlotState::FadingIn);

        fader.update(Duration::from_millis(1500));
        assert_eq!(fader.playing_slots(), 1);
        assert_eq!(fader.slot_state(fader.active_slot()), SlotState::Steady);
        assert!(!fader.is_ended());
        assert_eq!(backend.active_voices(), 0);
        Ok(())
    }
}
