use crate::backend::{Backend, BackendEvent, BackendRegistry, DriverOption, Mixer};
use crate::buffer::Buffer;
use crate::config::SonanceDesc;
use crate::effect::{Effect, EffectId, EffectKind, ReverbPreset, Submix, SubmixId};
use crate::error::{Result, SonanceError};
use crate::events::SonanceEvent;
use crate::listener::Listener;
use crate::music::MusicFader;
use crate::source::{Source, SourceId};
use crate::spatial::SpatialProcessor;
use std::collections::HashMap;
use std::sync::Arc;

/// An audio session: one backend plus the objects created on it.
///
/// `SonanceSession` is the central API for Sonance. It lives on the application thread
/// and owns the listener, sources, effects and submixes. Buffers are handed out as
/// `Arc<Buffer>` and stay owned by the caller; sources only refer to them.
///
/// # Frame cycle
///
/// - Set source and listener parameters as the frame goes.
/// - Call [`commit_3d_changes`](Self::commit_3d_changes) once, after all updates.
/// - Drain [`poll_events`](Self::poll_events) to learn about finished sources.
pub struct SonanceSession {
    desc: SonanceDesc,
    backend: Arc<dyn Backend>,
    processor: SpatialProcessor,
    listener: Option<Listener>,
    sources: HashMap<SourceId, Source>,
    effects: HashMap<EffectId, Effect>,
    submixes: HashMap<SubmixId, Submix>,
    next_id: u64,
}

impl SonanceSession {
    /// Opens the backend named by `desc.backend` from the default registry.
    pub fn new(desc: SonanceDesc) -> Result<Self> {
        Self::with_registry(desc, &BackendRegistry::default())
    }

    pub fn with_registry(desc: SonanceDesc, registry: &BackendRegistry) -> Result<Self> {
        let backend = registry.create(&desc)?;
        Ok(Self::with_backend(desc, backend))
    }

    /// Wraps an already opened backend.
    pub fn with_backend(desc: SonanceDesc, backend: Arc<dyn Backend>) -> Self {
        let processor = SpatialProcessor::new(
            backend.option(DriverOption::ManualRolloff),
            desc.speed_of_sound,
        );
        log::info!(
            "Session on '{}' backend ({} voices, manual rolloff: {})",
            backend.name(),
            backend.max_voices(),
            processor.manual_rolloff()
        );
        Self {
            desc,
            backend,
            processor,
            listener: None,
            sources: HashMap::new(),
            effects: HashMap::new(),
            submixes: HashMap::new(),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn desc(&self) -> &SonanceDesc {
        &self.desc
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Hands out the backend's mixer for the host to drive, if it has one.
    pub fn take_mixer(&self) -> Option<Box<dyn Mixer>> {
        self.backend.take_mixer()
    }

    pub fn option(&self, option: DriverOption) -> bool {
        self.backend.option(option)
    }

    pub fn max_sources(&self) -> usize {
        self.backend.max_voices()
    }

    /// Creates the listener, or returns the existing one.
    pub fn create_listener(&mut self) -> &mut Listener {
        self.listener.get_or_insert_with(Listener::new)
    }

    pub fn listener(&self) -> Option<&Listener> {
        self.listener.as_ref()
    }

    pub fn listener_mut(&mut self) -> Option<&mut Listener> {
        self.listener.as_mut()
    }

    /// Creates an empty buffer. The caller owns it; unbind it from sources before
    /// dropping the last reference.
    pub fn create_buffer(&self, name: &str) -> Result<Arc<Buffer>> {
        self.backend.create_buffer(name)
    }

    pub fn create_source(&mut self) -> SourceId {
        let id = SourceId(self.next_id());
        self.sources.insert(id, Source::new(id, self.backend.clone()));
        log::debug!("Created {}", id);
        id
    }

    pub fn source(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(&id)
    }

    pub fn source_mut(&mut self, id: SourceId) -> Option<&mut Source> {
        self.sources.get_mut(&id)
    }

    /// Destroys a source and releases its voice.
    pub fn remove_source(&mut self, id: SourceId) -> bool {
        self.sources.remove(&id).is_some()
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        let mut ids: Vec<_> = self.sources.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Creates an effect. Fails with [`SonanceError::Unsupported`] when the backend does
    /// not offer environment effects.
    pub fn create_effect(&mut self, kind: EffectKind) -> Result<EffectId> {
        if !self.backend.option(DriverOption::EnvironmentEffects) {
            return Err(SonanceError::Unsupported("environment effects"));
        }
        let slot = self.backend.create_effect(kind)?;
        let id = EffectId(self.next_id());
        let mut effect = Effect::new(id, slot);

        if let Some((env, size)) = self.listener.as_ref().and_then(Listener::environment) {
            effect.apply_preset(resolve_preset(env), size);
        }
        self.effects.insert(id, effect);
        log::debug!("Created {} ({:?})", id, kind);
        Ok(id)
    }

    pub fn effect(&self, id: EffectId) -> Option<&Effect> {
        self.effects.get(&id)
    }

    pub fn effect_mut(&mut self, id: EffectId) -> Option<&mut Effect> {
        self.effects.get_mut(&id)
    }

    /// Destroys an effect. Submixes that referred to it lose the reference.
    pub fn remove_effect(&mut self, id: EffectId) -> bool {
        if self.effects.remove(&id).is_none() {
            return false;
        }
        for submix in self.submixes.values_mut() {
            if submix.effect() == Some(id) {
                submix.clear_effect();
            }
        }
        true
    }

    pub fn create_submix(&mut self) -> Result<SubmixId> {
        let bus = self.backend.create_submix()?;
        let id = SubmixId(self.next_id());
        self.submixes.insert(id, Submix::new(id, bus));
        log::debug!("Created {}", id);
        Ok(id)
    }

    pub fn submix(&self, id: SubmixId) -> Option<&Submix> {
        self.submixes.get(&id)
    }

    pub fn submix_mut(&mut self, id: SubmixId) -> Option<&mut Submix> {
        self.submixes.get_mut(&id)
    }

    /// Attaches an effect to a submix, or detaches with `None`.
    pub fn attach_effect(&mut self, submix: SubmixId, effect: Option<EffectId>) -> Result<()> {
        let effect = match effect {
            Some(id) => Some(
                self.effects
                    .get(&id)
                    .ok_or_else(|| SonanceError::NotFound(id.to_string()))?,
            ),
            None => None,
        };
        self.submixes
            .get_mut(&submix)
            .ok_or_else(|| SonanceError::NotFound(submix.to_string()))?
            .set_effect(effect);
        Ok(())
    }

    /// Sends `level` of a source into a submix, or removes the send with `None`.
    pub fn route_source(
        &mut self,
        source: SourceId,
        submix: Option<SubmixId>,
        level: f32,
    ) -> Result<()> {
        let submix = match submix {
            Some(id) => Some(
                self.submixes
                    .get(&id)
                    .ok_or_else(|| SonanceError::NotFound(id.to_string()))?,
            ),
            None => None,
        };
        self.sources
            .get_mut(&source)
            .ok_or_else(|| SonanceError::NotFound(source.to_string()))?
            .set_submix(submix, level)
    }

    /// Destroys a submix. Sources sending into it lose the send.
    pub fn remove_submix(&mut self, id: SubmixId) -> bool {
        if self.submixes.remove(&id).is_none() {
            return false;
        }
        for source in self.sources.values_mut() {
            source.clear_submix(id);
        }
        true
    }

    /// A crossfading music player on this session's backend.
    pub fn music_fader(&self) -> MusicFader {
        MusicFader::new(self.backend.as_ref())
    }

    /// Pushes this frame's 3D state to the backend.
    ///
    /// Every source is evaluated against one listener snapshot, so all sources see the
    /// same listener values. A pending listener environment change is applied to every
    /// reverb effect first.
    pub fn commit_3d_changes(&mut self) {
        let snapshot = self
            .listener
            .as_ref()
            .map(Listener::snapshot)
            .unwrap_or_default();

        if let Some((env, size)) = self.listener.as_mut().and_then(Listener::take_environment_change)
        {
            let preset = resolve_preset(env);
            for effect in self.effects.values_mut() {
                if effect.kind() == EffectKind::Reverb {
                    effect.apply_preset(preset, size);
                }
            }
        }

        let curve_points = self.desc.distance_curve_points;
        for source in self.sources.values_mut() {
            source.commit_3d(&self.processor, &snapshot, curve_points);
        }
        self.backend.commit();
    }

    /// Drains backend notifications, translated to the sources they concern.
    /// Notifications for voices no source owns any more are dropped.
    pub fn poll_events(&mut self) -> Vec<SonanceEvent> {
        let raw = self.backend.poll_events();
        if raw.is_empty() {
            return Vec::new();
        }

        let owners: HashMap<u64, SourceId> = self
            .sources
            .values()
            .filter_map(|source| source.voice_id().map(|voice| (voice, source.id())))
            .collect();

        raw.into_iter()
            .filter_map(|event| {
                let source_id = *owners.get(&event.voice_id())?;
                Some(match event {
                    BackendEvent::BufferProcessed { .. } => {
                        SonanceEvent::BufferProcessed { source_id }
                    }
                    BackendEvent::VoiceFinished { .. } => {
                        SonanceEvent::SourceCompleted { source_id }
                    }
                    BackendEvent::VoiceInvalidated { .. } => {
                        log::warn!("{} stopped: buffer refilled while queued", source_id);
                        SonanceEvent::SourceInvalidated { source_id }
                    }
                })
            })
            .collect()
    }
}

fn resolve_preset(id: u32) -> ReverbPreset {
    ReverbPreset::from_id(id).unwrap_or_else(|| {
        log::warn!("Unknown reverb environment {}, using Generic", id);
        ReverbPreset::Generic
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferFormat;
    use crate::effect::ReverbParams;
    use crate::math::Vec3;
    use crate::source::SourceState;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn session(desc: SonanceDesc) -> (SonanceSession, Box<dyn Mixer>) {
        init_logger();
        let session = SonanceSession::new(desc).unwrap();
        let mixer = session.take_mixer().unwrap();
        (session, mixer)
    }

    fn tone(session: &SonanceSession, frames: usize) -> Arc<Buffer> {
        let buffer = session.create_buffer("tone").unwrap();
        buffer.set_format(BufferFormat::pcm(1, 16, 1000)).unwrap();
        buffer.fill_pcm16(&vec![10000i16; frames]).unwrap();
        buffer
    }

    #[test]
    fn unknown_backend_produces_no_session() {
        let result = SonanceSession::new(SonanceDesc::default().backend("openal"));
        assert!(matches!(result, Err(SonanceError::UnknownBackend(_))));
    }

    #[test]
    fn listener_is_a_singleton() {
        let (mut session, _mixer) = session(SonanceDesc::default());
        assert!(session.listener().is_none());
        session.create_listener().set_gain(0.5);
        assert_eq!(session.create_listener().gain(), 0.5);
    }

    #[test]
    fn commit_pushes_attenuated_gain() {
        let (mut session, _mixer) = session(SonanceDesc::default().sample_rate(1000));
        session.create_listener();
        let buffer = tone(&session, 100);
        let id = session.create_source();
        let source = session.source_mut(id).unwrap();
        source.set_static_buffer(Some(&buffer));
        source.set_min_max_distances(1.0, 20.0);
        source.set_alpha(-1.0);
        source.set_pos(Vec3::new(10.0, 0.0, 0.0));
        assert!(source.play());

        session.commit_3d_changes();
        let params = session.source(id).unwrap().output_params();
        assert!((params.gain - 0.1).abs() < 1e-3, "gain {}", params.gain);
        assert!(params.pan > 0.99);
    }

    #[test]
    fn curve_rolloff_attenuates_rendered_output() {
        let desc = SonanceDesc::default().sample_rate(1000).manual_rolloff(false);
        let (mut session, mut mixer) = session(desc);
        session.create_listener();
        let buffer = session.create_buffer("half").unwrap();
        buffer.set_format(BufferFormat::pcm(1, 16, 1000)).unwrap();
        buffer.fill_pcm16(&[16384i16; 100]).unwrap();

        let id = session.create_source();
        let source = session.source_mut(id).unwrap();
        source.set_static_buffer(Some(&buffer));
        source.set_min_max_distances(1.0, 20.0);
        source.set_alpha(-1.0);
        source.set_pos(Vec3::new(10.0, 0.0, 0.0));
        assert!(source.play());
        session.commit_3d_changes();

        // The voice evaluates the curve itself; the committed gain stays unattenuated.
        assert!(session.source(id).unwrap().output_params().gain > 0.99);

        let mut out = vec![0.0f32; 2 * 50];
        mixer.render(&mut out);
        for frame in out.chunks(2) {
            assert!(frame[0].abs() < 1e-3, "left {}", frame[0]);
            assert!((frame[1] - 0.05).abs() < 0.005, "right {}", frame[1]);
        }
    }

    #[test]
    fn completion_is_reported_per_source() {
        let (mut session, mut mixer) = session(SonanceDesc::default().sample_rate(1000));
        let buffer = tone(&session, 8);
        let id = session.create_source();
        let source = session.source_mut(id).unwrap();
        source.set_static_buffer(Some(&buffer));
        assert!(source.play());

        let mut out = vec![0.0f32; 64];
        mixer.render(&mut out);

        let events = session.poll_events();
        assert!(events.contains(&SonanceEvent::SourceCompleted { source_id: id }));
        assert!(events.iter().all(|e| e.source_id() == id));
        assert_eq!(session.source_mut(id).unwrap().state(), SourceState::Stopped);
    }

    #[test]
    fn removing_effect_detaches_it_from_submixes() {
        let (mut session, _mixer) = session(SonanceDesc::default());
        let effect = session.create_effect(EffectKind::Reverb).unwrap();
        let submix = session.create_submix().unwrap();
        session.attach_effect(submix, Some(effect)).unwrap();
        assert_eq!(session.submix(submix).unwrap().effect(), Some(effect));

        assert!(session.remove_effect(effect));
        assert_eq!(session.submix(submix).unwrap().effect(), None);
        assert!(matches!(
            session.attach_effect(submix, Some(effect)),
            Err(SonanceError::NotFound(_))
        ));
    }

    #[test]
    fn removing_submix_clears_source_sends() {
        let (mut session, _mixer) = session(SonanceDesc::default());
        let submix = session.create_submix().unwrap();
        let source = session.create_source();
        session.route_source(source, Some(submix), 0.5).unwrap();
        assert_eq!(session.source(source).unwrap().submix(), Some(submix));

        assert!(session.remove_submix(submix));
        assert_eq!(session.source(source).unwrap().submix(), None);
    }

    #[test]
    fn effects_are_optional() {
        let (mut session, _mixer) = session(SonanceDesc::default().enable_effects(false));
        assert!(!session.option(DriverOption::EnvironmentEffects));
        assert!(matches!(
            session.create_effect(EffectKind::Reverb),
            Err(SonanceError::Unsupported(_))
        ));
        assert!(session.create_submix().is_err());
    }

    #[test]
    fn environment_change_reaches_reverbs_on_commit() {
        let (mut session, _mixer) = session(SonanceDesc::default());
        let effect = session.create_effect(EffectKind::Reverb).unwrap();
        session
            .create_listener()
            .set_environment(ReverbPreset::Cave.id(), 2.0);

        assert_eq!(session.effect(effect).unwrap().params(), &ReverbParams::default());
        session.commit_3d_changes();
        assert_eq!(
            session.effect(effect).unwrap().params(),
            &ReverbParams::from_preset(ReverbPreset::Cave, 2.0).clamped()
        );

        // Unknown ids fall back to the generic preset.
        session.create_listener().set_environment(9999, 1.0);
        session.commit_3d_changes();
        assert_eq!(
            session.effect(effect).unwrap().params(),
            &ReverbParams::from_preset(ReverbPreset::Generic, 1.0).clamped()
        );
    }

    #[test]
    fn removed_source_releases_its_voice() {
        let (mut session, _mixer) = session(SonanceDesc::default().max_sources(1));
        let buffer = tone(&session, 100);
        let a = session.create_source();
        let b = session.create_source();
        session.source_mut(a).unwrap().set_static_buffer(Some(&buffer));
        session.source_mut(b).unwrap().set_static_buffer(Some(&buffer));

        assert!(session.source_mut(a).unwrap().play());
        assert!(!session.source_mut(b).unwrap().play());
        assert!(session.remove_source(a));
        assert!(session.source_mut(b).unwrap().play());
        assert_eq!(session.source_ids(), vec![b]);
    }
}
