//! Participant view binder
//!
//! Keeps one render surface per remote participant whose video is available.
//! Surfaces come from a [`SurfaceHost`], so the binder does not care what
//! kind of view system sits behind a surface id.

use std::collections::HashMap;

use crate::engine::{EngineClient, MediaKind, ParticipantId, SurfaceId};
use crate::error::EngineError;
use crate::session::state::RemoteParticipant;

/// Source of render surfaces
pub trait SurfaceHost: Send {
    /// Surface dedicated to `participant`, created on first use
    fn acquire(&mut self, participant: &ParticipantId) -> SurfaceId;

    /// Give the surface back. It may be destroyed or reused.
    fn release(&mut self, participant: &ParticipantId);

    /// Number of surfaces currently handed out
    fn live(&self) -> usize;
}

/// Surfaces named `<prefix><participant id>`
#[derive(Debug, Clone)]
pub struct NamedSurfaces {
    prefix: String,
    surfaces: HashMap<ParticipantId, SurfaceId>,
}

impl NamedSurfaces {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            surfaces: HashMap::new(),
        }
    }
}

impl SurfaceHost for NamedSurfaces {
    fn acquire(&mut self, participant: &ParticipantId) -> SurfaceId {
        let prefix = &self.prefix;
        self.surfaces
            .entry(participant.clone())
            .or_insert_with(|| SurfaceId::new(format!("{}{}", prefix, participant)))
            .clone()
    }

    fn release(&mut self, participant: &ParticipantId) {
        self.surfaces.remove(participant);
    }

    fn live(&self) -> usize {
        self.surfaces.len()
    }
}

/// Binds remote participants to surfaces and starts/stops remote playback
pub struct ParticipantViewBinder {
    host: Box<dyn SurfaceHost>,
}

impl ParticipantViewBinder {
    pub fn new(host: Box<dyn SurfaceHost>) -> Self {
        Self { host }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::new(Box::new(NamedSurfaces::new(prefix)))
    }

    /// Surfaces currently bound
    pub fn live_surfaces(&self) -> usize {
        self.host.live()
    }

    /// Render the participant's video into its surface and record the binding.
    ///
    /// A participant that is already bound keeps its surface and the engine
    /// is not asked again. Returns `None` if video is not available.
    pub fn attach(
        &mut self,
        client: &mut dyn EngineClient,
        participant: &mut RemoteParticipant,
    ) -> Result<Option<SurfaceId>, EngineError> {
        if let Some(surface) = &participant.bound_surface {
            return Ok(Some(surface.clone()));
        }
        if !participant.video_available {
            tracing::debug!(participant = %participant.id, "Not attaching, video unavailable");
            return Ok(None);
        }

        let surface = self.host.acquire(&participant.id);
        if let Err(e) = client.play_remote(&participant.id, MediaKind::Video, Some(&surface)) {
            self.host.release(&participant.id);
            return Err(e);
        }

        tracing::debug!(participant = %participant.id, surface = %surface, "Attached video");
        participant.bound_surface = Some(surface.clone());
        Ok(Some(surface))
    }

    /// Stop rendering and release the surface. The binding is always cleared.
    pub fn detach(&mut self, client: &mut dyn EngineClient, participant: &mut RemoteParticipant) {
        if let Some(surface) = participant.bound_surface.take() {
            client.stop_remote(&participant.id, MediaKind::Video);
            self.host.release(&participant.id);
            tracing::debug!(participant = %participant.id, surface = %surface, "Detached video");
        }
    }

    /// Audio needs no surface
    pub fn play_audio(
        &mut self,
        client: &mut dyn EngineClient,
        participant: &RemoteParticipant,
    ) -> Result<(), EngineError> {
        client.play_remote(&participant.id, MediaKind::Audio, None)
    }

    pub fn stop_audio(&mut self, client: &mut dyn EngineClient, participant: &RemoteParticipant) {
        client.stop_remote(&participant.id, MediaKind::Audio);
    }

    /// Detach every participant, ahead of clearing them on teardown
    pub fn detach_all<'a>(
        &mut self,
        client: &mut dyn EngineClient,
        participants: impl Iterator<Item = &'a mut RemoteParticipant>,
    ) {
        for participant in participants {
            self.detach(client, participant);
            if participant.audio_available {
                self.stop_audio(client, participant);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ClientConfig, EngineCall, FailPoint, MediaEngine, SimulatedEngine};

    fn video_participant(id: &str) -> RemoteParticipant {
        let mut p = RemoteParticipant::new(ParticipantId::from(id));
        p.set_available(MediaKind::Video, true);
        p
    }

    #[test]
    fn test_attach_is_idempotent() {
        let engine = SimulatedEngine::new();
        let mut client = engine.create_client(&ClientConfig::default());
        let mut binder = ParticipantViewBinder::with_prefix("remote-");
        let mut p = video_participant("u42");

        let first = binder.attach(client.as_mut(), &mut p).unwrap();
        let second = binder.attach(client.as_mut(), &mut p).unwrap();

        assert_eq!(first, Some(SurfaceId::new("remote-u42")));
        assert_eq!(first, second);
        assert_eq!(binder.live_surfaces(), 1);
        assert_eq!(
            engine.count_calls(|c| matches!(c, EngineCall::PlayRemote(_, MediaKind::Video, _))),
            1
        );
    }

    #[test]
    fn test_attach_skips_unavailable_video() {
        let engine = SimulatedEngine::new();
        let mut client = engine.create_client(&ClientConfig::default());
        let mut binder = ParticipantViewBinder::with_prefix("remote-");
        let mut p = RemoteParticipant::new(ParticipantId::from("u1"));

        assert_eq!(binder.attach(client.as_mut(), &mut p).unwrap(), None);
        assert_eq!(binder.live_surfaces(), 0);
    }

    #[test]
    fn test_failed_render_releases_surface() {
        let engine = SimulatedEngine::new();
        engine.fail_on(FailPoint::RenderVideo);
        let mut client = engine.create_client(&ClientConfig::default());
        let mut binder = ParticipantViewBinder::with_prefix("remote-");
        let mut p = video_participant("u7");

        assert!(binder.attach(client.as_mut(), &mut p).is_err());
        assert!(p.bound_surface.is_none());
        assert_eq!(binder.live_surfaces(), 0);
    }

    #[test]
    fn test_detach_all_clears_bindings() {
        let engine = SimulatedEngine::new();
        let mut client = engine.create_client(&ClientConfig::default());
        let mut binder = ParticipantViewBinder::with_prefix("remote-");
        let mut people = vec![video_participant("a"), video_participant("b")];
        people[1].set_available(MediaKind::Audio, true);

        for p in people.iter_mut() {
            binder.attach(client.as_mut(), p).unwrap();
        }
        assert_eq!(binder.live_surfaces(), 2);

        binder.detach_all(client.as_mut(), people.iter_mut());
        assert_eq!(binder.live_surfaces(), 0);
        assert!(people.iter().all(|p| p.bound_surface.is_none()));
        assert_eq!(
            engine.count_calls(|c| matches!(c, EngineCall::StopRemote(_, MediaKind::Audio))),
            1
        );
    }
}
