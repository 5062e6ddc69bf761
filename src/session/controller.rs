//! Session controller
//!
//! Drives one [`CallSession`] through its lifecycle:
//!
//! ```text
//!   Idle ──join()──▶ Joining ──tracks published──▶ Joined ──end_call()──▶ Leaving ──▶ Left
//!                       │                                                    ▲
//!                       ├──engine join rejected──────────────────────────────┼──▶ Failed
//!                       └──capture / publish failed──▶ Leaving ──────────────┘
//! ```
//!
//! Every acquired resource (client, channel membership, tracks) is written
//! into the session as soon as it exists, so teardown can release it no
//! matter where a join stopped.

use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::config::{AppConfig, EngineConfig, IdentityStrategy, SessionConfig};
use crate::constants::NOTICE_CAPACITY;
use crate::engine::{
    ChannelId, EngineEvent, EngineEvents, LocalIdentity, LocalTrack, MediaEngine, MediaKind,
    ParticipantId, SurfaceId,
};
use crate::error::{EngineError, SessionError};
use crate::session::binder::ParticipantViewBinder;
use crate::session::state::{
    CallSession, ConnectionState, Membership, RemoteParticipant, SessionSnapshot, TrackSlot,
};

/// Notifications for whoever hosts the call view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionNotice {
    StateChanged(ConnectionState),
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    /// Non-fatal, the call continues
    Warning(String),
    /// The session ended because of this
    Fatal(String),
}

/// Owns a call session and everything it acquired from the engine
pub struct SessionController {
    engine: Arc<dyn MediaEngine>,
    engine_config: EngineConfig,
    config: SessionConfig,
    session: CallSession,
    binder: ParticipantViewBinder,
    events: Option<EngineEvents>,
    notices: broadcast::Sender<SessionNotice>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn MediaEngine>, config: &AppConfig) -> Self {
        let session = CallSession::new();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (snapshots, _) = watch::channel(session.snapshot());

        Self {
            engine,
            engine_config: config.engine.clone(),
            config: config.session.clone(),
            binder: ParticipantViewBinder::with_prefix(config.session.surface_prefix.clone()),
            session,
            events: None,
            notices,
            snapshots,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn binder(&self) -> &ParticipantViewBinder {
        &self.binder
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub(crate) fn notice_sender(&self) -> broadcast::Sender<SessionNotice> {
        self.notices.clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Take the engine event stream of the current client
    pub fn take_events(&mut self) -> Option<EngineEvents> {
        self.events.take()
    }

    /// Join `channel` and publish microphone and camera.
    ///
    /// On any failure after validation the session is torn down and ends
    /// `Failed`; the error is returned.
    pub async fn join(
        &mut self,
        channel: &str,
        token: &str,
    ) -> Result<LocalIdentity, SessionError> {
        let (channel, token) = self.begin_join(channel, token)?;
        let acquired = self.acquire(&channel, &token).await;
        self.finish_join(acquired).await
    }

    /// Validate the join parameters and move to `Joining`.
    /// Returns the trimmed channel and token.
    pub(crate) fn begin_join(
        &mut self,
        channel: &str,
        token: &str,
    ) -> Result<(ChannelId, String), SessionError> {
        let channel = channel.trim();
        let token = token.trim();
        if channel.is_empty() {
            return Err(SessionError::InvalidJoinParameters(
                "channel name is empty".to_string(),
            ));
        }
        if token.is_empty() {
            return Err(SessionError::InvalidJoinParameters("token is empty".to_string()));
        }
        if self.session.state() != ConnectionState::Idle {
            return Err(SessionError::AlreadyStarted(self.session.state()));
        }

        let channel = ChannelId::new(channel);
        tracing::info!(session = %self.session.id(), channel = %channel, "Joining channel");
        self.session.bind_channel(channel.clone());
        self.transition(ConnectionState::Joining);
        Ok((channel, token.to_string()))
    }

    /// Settle the join: `Joined` on success, full teardown to `Failed` otherwise.
    pub(crate) async fn finish_join(
        &mut self,
        acquired: Result<LocalIdentity, SessionError>,
    ) -> Result<LocalIdentity, SessionError> {
        match acquired {
            Ok(identity) => {
                self.transition(ConnectionState::Joined);
                tracing::info!(
                    session = %self.session.id(),
                    identity = %identity,
                    "Joined channel and published local tracks"
                );
                Ok(identity)
            }
            Err(err) => {
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Steps (a)-(d) of the join. Each acquisition lands in the session
    /// before the next await, so dropping this future leaks nothing that
    /// teardown cannot find.
    pub(crate) async fn acquire(
        &mut self,
        channel: &ChannelId,
        token: &str,
    ) -> Result<LocalIdentity, SessionError> {
        let requested = self.pick_identity();
        let client = self
            .session
            .client
            .insert(self.engine.create_client(&self.engine_config.client_config()));
        self.events = client.take_events();

        self.session.membership = Membership::Pending;
        let joined = client
            .join(&self.engine_config.app_id, channel, token, requested)
            .await;
        let identity = match joined {
            Ok(identity) => identity,
            Err(cause) => {
                self.session.membership = Membership::None;
                return Err(SessionError::EngineJoinFailure(cause));
            }
        };
        self.session.membership = Membership::Joined;
        self.session.set_local_identity(identity);
        self.publish_snapshot();

        let audio = self
            .engine
            .create_microphone_track()
            .await
            .map_err(|cause| SessionError::MediaAcquisitionFailure {
                kind: MediaKind::Audio,
                cause,
            })?;
        self.session.audio = TrackSlot::present(audio);

        let video = self
            .engine
            .create_camera_track()
            .await
            .map_err(|cause| SessionError::MediaAcquisitionFailure {
                kind: MediaKind::Video,
                cause,
            })?;
        if let Some(surface) = &self.config.local_preview_surface {
            if let Err(e) = video.play(&SurfaceId::new(surface.clone())) {
                tracing::warn!(surface = %surface, "Local preview failed: {}", e);
            }
        }
        self.session.video = TrackSlot::present(video);
        self.publish_snapshot();

        let tracks: Vec<&dyn LocalTrack> =
            [self.session.audio.track(), self.session.video.track()]
                .into_iter()
                .flatten()
                .collect();
        let client = self
            .session
            .client
            .as_deref_mut()
            .ok_or(SessionError::PublishFailure(EngineError::NotJoined))?;
        client
            .publish(&tracks)
            .await
            .map_err(SessionError::PublishFailure)?;

        Ok(identity)
    }

    fn pick_identity(&self) -> Option<LocalIdentity> {
        match self.config.identity {
            IdentityStrategy::Engine => None,
            IdentityStrategy::Random => Some(LocalIdentity(
                rand::thread_rng().gen_range(0..self.config.identity_range.max(1)),
            )),
        }
    }

    /// Apply one engine event. Ignored unless the session is `Joined`.
    pub async fn handle_event(&mut self, event: EngineEvent) {
        if self.session.state() != ConnectionState::Joined {
            self.session.stats.events_dropped += 1;
            tracing::debug!(
                state = %self.session.state(),
                participant = %event.participant(),
                "Dropping engine event"
            );
            return;
        }

        self.session.stats.events_processed += 1;
        match event {
            EngineEvent::ParticipantPublished { participant, kind } => {
                self.on_published(participant, kind).await
            }
            EngineEvent::ParticipantUnpublished { participant, kind } => {
                self.on_unpublished(participant, kind)
            }
        }
        self.publish_snapshot();
    }

    async fn on_published(&mut self, participant: ParticipantId, kind: MediaKind) {
        if self
            .session
            .participant(&participant)
            .is_some_and(|p| p.is_available(kind))
        {
            tracing::debug!(participant = %participant, kind = %kind, "Already subscribed");
            return;
        }

        let Some(client) = self.session.client.as_deref_mut() else {
            return;
        };
        if let Err(cause) = client.subscribe(&participant, kind).await {
            self.session.stats.subscribe_failures += 1;
            self.report(&SessionError::SubscribeFailure {
                participant,
                kind,
                cause,
            });
            return;
        }

        let session = &mut self.session;
        let is_new = !session.participants.contains_key(&participant);
        let entry = session
            .participants
            .entry(participant.clone())
            .or_insert_with(|| RemoteParticipant::new(participant.clone()));
        entry.set_available(kind, true);

        let rendered = match session.client.as_deref_mut() {
            Some(client) => match kind {
                MediaKind::Video => self.binder.attach(client, entry).map(|_| ()),
                MediaKind::Audio => self.binder.play_audio(client, entry),
            },
            None => Ok(()),
        };

        tracing::debug!(participant = %participant, kind = %kind, "Subscribed");
        if let Err(e) = rendered {
            tracing::warn!(participant = %participant, kind = %kind, "Playback failed: {}", e);
            self.notify(SessionNotice::Warning(format!(
                "Could not play {} from {}",
                kind, participant
            )));
        }
        if is_new {
            tracing::info!(participant = %participant, "Participant joined");
            self.notify(SessionNotice::ParticipantJoined(participant));
        }
    }

    fn on_unpublished(&mut self, participant: ParticipantId, kind: MediaKind) {
        let session = &mut self.session;
        let Some(entry) = session.participants.get_mut(&participant) else {
            tracing::debug!(participant = %participant, "Unpublish for unknown participant");
            return;
        };

        if let Some(client) = session.client.as_deref_mut() {
            match kind {
                MediaKind::Video => self.binder.detach(client, entry),
                MediaKind::Audio if entry.audio_available => self.binder.stop_audio(client, entry),
                MediaKind::Audio => {}
            }
        }
        entry.set_available(kind, false);

        if !entry.has_media() {
            session.participants.shift_remove(&participant);
            tracing::info!(participant = %participant, "Participant left");
            self.notify(SessionNotice::ParticipantLeft(participant));
        }
    }

    /// Flip the local microphone. Returns the new muted state.
    pub async fn toggle_audio(&mut self) -> Result<bool, SessionError> {
        self.toggle(MediaKind::Audio).await
    }

    /// Flip the local camera. Returns the new muted state.
    pub async fn toggle_video(&mut self) -> Result<bool, SessionError> {
        self.toggle(MediaKind::Video).await
    }

    async fn toggle(&mut self, kind: MediaKind) -> Result<bool, SessionError> {
        let requested = match self.slot_mut(kind) {
            TrackSlot::Absent => return Ok(true),
            TrackSlot::Present { enabled, .. } => {
                *enabled = !*enabled;
                *enabled
            }
        };
        self.publish_snapshot();

        let slot = match kind {
            MediaKind::Audio => &self.session.audio,
            MediaKind::Video => &self.session.video,
        };
        let result = match slot.track() {
            Some(track) => track.set_enabled(requested).await,
            None => Ok(()),
        };

        if let Err(cause) = result {
            if let TrackSlot::Present { enabled, .. } = self.slot_mut(kind) {
                *enabled = !requested;
            }
            self.session.stats.control_failures += 1;
            let err = SessionError::ControlFailure { kind, cause };
            self.report(&err);
            self.publish_snapshot();
            return Err(err);
        }

        tracing::info!(kind = %kind, muted = !requested, "Local track toggled");
        Ok(!requested)
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut TrackSlot {
        match kind {
            MediaKind::Audio => &mut self.session.audio,
            MediaKind::Video => &mut self.session.video,
        }
    }

    /// Hang up. No-op once the session is leaving or over.
    pub async fn end_call(&mut self) {
        if self.session.state().is_closing() {
            tracing::debug!(state = %self.session.state(), "End call ignored");
            return;
        }
        tracing::info!(session = %self.session.id(), "Ending call");
        self.teardown(ConnectionState::Left).await;
    }

    /// Give up on a join that was interrupted before it completed.
    /// With a cause the session ends `Failed`, otherwise `Left`.
    pub async fn abandon_join(&mut self, cause: Option<SessionError>) {
        match cause {
            Some(err) => self.fail(err).await,
            None => {
                tracing::info!(session = %self.session.id(), "Join cancelled");
                self.teardown(ConnectionState::Left).await;
            }
        }
    }

    async fn fail(&mut self, err: SessionError) {
        self.report(&err);
        self.teardown(ConnectionState::Failed).await;
    }

    /// Release everything, each step best-effort, then settle in `terminal`.
    async fn teardown(&mut self, terminal: ConnectionState) {
        if self.session.state().is_terminal() {
            return;
        }
        // A join the engine refused holds nothing, so it fails directly
        let direct = terminal == ConnectionState::Failed && !self.session.holds_resources();
        if !direct && self.session.state() != ConnectionState::Leaving {
            self.transition(ConnectionState::Leaving);
        }
        self.discard_pending_events();

        let session = &mut self.session;
        if let Some(client) = session.client.as_deref_mut() {
            self.binder
                .detach_all(client, session.participants.values_mut());
        }
        let departed: Vec<ParticipantId> =
            session.participants.drain(..).map(|(id, _)| id).collect();

        if session.membership != Membership::None {
            if let Some(client) = session.client.as_deref_mut() {
                match client.leave().await {
                    Ok(()) => tracing::debug!("Left channel"),
                    Err(e) => tracing::warn!("Leaving channel failed: {}", e),
                }
            }
            session.membership = Membership::None;
        }

        if let Some(track) = session.audio.take() {
            track.close();
            tracing::debug!("Closed microphone track");
        }
        if let Some(track) = session.video.take() {
            track.close();
            tracing::debug!("Closed camera track");
        }
        session.client = None;

        for participant in departed {
            self.notify(SessionNotice::ParticipantLeft(participant));
        }
        self.transition(terminal);
        tracing::info!(session = %self.session.id(), state = %terminal, "Session closed");
    }

    fn discard_pending_events(&mut self) {
        if let Some(mut events) = self.events.take() {
            events.close();
            while events.try_recv().is_ok() {
                self.session.stats.events_dropped += 1;
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.session.advance(next) {
            self.notify(SessionNotice::StateChanged(next));
        }
        self.publish_snapshot();
    }

    fn report(&self, err: &SessionError) {
        if err.is_fatal() {
            tracing::error!(session = %self.session.id(), "Call failed: {}", err);
            self.notify(SessionNotice::Fatal(err.user_message()));
        } else {
            tracing::warn!(session = %self.session.id(), "{}", err);
            self.notify(SessionNotice::Warning(err.user_message()));
        }
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }

    fn publish_snapshot(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCall, FailPoint, SimulatedEngine};

    fn controller(engine: &SimulatedEngine) -> SessionController {
        SessionController::new(Arc::new(engine.clone()), &AppConfig::default())
    }

    async fn joined(engine: &SimulatedEngine) -> (SessionController, EngineEvents) {
        let mut controller = controller(engine);
        controller.join("room-1", "tok-a").await.unwrap();
        let events = controller.take_events().unwrap();
        (controller, events)
    }

    async fn pump(controller: &mut SessionController, events: &mut EngineEvents) {
        while let Ok(event) = events.try_recv() {
            controller.handle_event(event).await;
        }
    }

    #[tokio::test]
    async fn test_join_publishes_both_tracks() {
        let engine = SimulatedEngine::new();
        let (controller, _events) = joined(&engine).await;

        assert_eq!(controller.state(), ConnectionState::Joined);
        assert!(controller.session().slot(MediaKind::Audio).is_present());
        assert!(controller.session().slot(MediaKind::Video).is_present());
        assert!(!controller.session().is_muted(MediaKind::Audio));

        let calls = engine.calls();
        let order: Vec<_> = calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    EngineCall::Join { .. }
                        | EngineCall::CreateMicrophone
                        | EngineCall::CreateCamera
                        | EngineCall::Publish(_)
                )
            })
            .collect();
        assert!(matches!(order[0], EngineCall::Join { .. }));
        assert_eq!(order[1], &EngineCall::CreateMicrophone);
        assert_eq!(order[2], &EngineCall::CreateCamera);
        assert_eq!(
            order[3],
            &EngineCall::Publish(vec![MediaKind::Audio, MediaKind::Video])
        );
    }

    #[tokio::test]
    async fn test_invalid_parameters_make_no_engine_call() {
        let engine = SimulatedEngine::new();
        let mut controller = controller(&engine);

        let err = controller.join("  ", "tok").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidJoinParameters(_)));
        let err = controller.join("room-1", "").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidJoinParameters(_)));

        assert_eq!(controller.state(), ConnectionState::Idle);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_engine_join_failure_creates_no_tracks() {
        let engine = SimulatedEngine::new();
        engine.fail_on(FailPoint::Join);
        let mut controller = controller(&engine);

        let err = controller.join("room-1", "tok-a").await.unwrap_err();
        assert!(matches!(err, SessionError::EngineJoinFailure(_)));
        assert_eq!(controller.state(), ConnectionState::Failed);
        assert_eq!(
            engine.count_calls(|c| matches!(
                c,
                EngineCall::CreateMicrophone | EngineCall::CreateCamera | EngineCall::Leave
            )),
            0
        );
        assert_eq!(engine.open_resources(), 0);
    }

    #[tokio::test]
    async fn test_refused_join_fails_without_leaving() {
        let engine = SimulatedEngine::new();
        engine.fail_on(FailPoint::Join);
        let mut controller = controller(&engine);
        let mut notices = controller.notices();

        controller.join("room-1", "tok-a").await.unwrap_err();

        let mut states = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            if let SessionNotice::StateChanged(state) = notice {
                states.push(state);
            }
        }
        assert_eq!(states, vec![ConnectionState::Joining, ConnectionState::Failed]);
    }

    #[tokio::test]
    async fn test_camera_failure_releases_microphone_and_channel() {
        let engine = SimulatedEngine::new();
        engine.fail_on(FailPoint::Camera);
        let mut controller = controller(&engine);
        let mut notices = controller.notices();

        let err = controller.join("room-1", "tok-a").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::MediaAcquisitionFailure {
                kind: MediaKind::Video,
                ..
            }
        ));
        assert_eq!(controller.state(), ConnectionState::Failed);
        assert!(!controller.session().slot(MediaKind::Audio).is_present());
        assert_eq!(engine.open_resources(), 0);
        assert_eq!(engine.count_calls(|c| *c == EngineCall::Leave), 1);

        let mut fatal = None;
        while let Ok(notice) = notices.try_recv() {
            if let SessionNotice::Fatal(message) = notice {
                fatal = Some(message);
            }
        }
        assert_eq!(fatal.as_deref(), Some("Camera is unavailable"));
    }

    #[tokio::test]
    async fn test_publish_failure_releases_everything() {
        let engine = SimulatedEngine::new();
        engine.fail_on(FailPoint::Publish);
        let mut controller = controller(&engine);

        let err = controller.join("room-1", "tok-a").await.unwrap_err();
        assert!(matches!(err, SessionError::PublishFailure(_)));
        assert_eq!(controller.state(), ConnectionState::Failed);
        assert_eq!(engine.open_resources(), 0);
    }

    #[tokio::test]
    async fn test_second_join_is_rejected() {
        let engine = SimulatedEngine::new();
        let (mut controller, _events) = joined(&engine).await;

        let err = controller.join("room-2", "tok-b").await.unwrap_err();
        assert_eq!(err, SessionError::AlreadyStarted(ConnectionState::Joined));
        assert_eq!(
            controller.session().channel().map(|c| c.as_str()),
            Some("room-1")
        );
    }

    #[tokio::test]
    async fn test_video_publish_then_unpublish_removes_participant() {
        let engine = SimulatedEngine::new();
        let (mut controller, mut events) = joined(&engine).await;

        engine.publish_remote("u42", MediaKind::Video);
        pump(&mut controller, &mut events).await;

        let p = controller
            .session()
            .participant(&ParticipantId::from("u42"))
            .unwrap();
        assert!(p.video_available);
        assert!(!p.audio_available);
        assert_eq!(p.bound_surface, Some(SurfaceId::new("remote-u42")));

        engine.unpublish_remote("u42", MediaKind::Video);
        pump(&mut controller, &mut events).await;

        assert_eq!(controller.session().participant_count(), 0);
        assert_eq!(controller.binder().live_surfaces(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_publish_is_idempotent() {
        let engine = SimulatedEngine::new();
        let (mut controller, mut events) = joined(&engine).await;

        engine.publish_remote("u1", MediaKind::Video);
        engine.publish_remote("u1", MediaKind::Video);
        pump(&mut controller, &mut events).await;

        assert_eq!(controller.session().participant_count(), 1);
        assert_eq!(controller.binder().live_surfaces(), 1);
        assert_eq!(
            engine.count_calls(|c| matches!(c, EngineCall::Subscribe(_, MediaKind::Video))),
            1
        );
    }

    #[tokio::test]
    async fn test_audio_survives_video_unpublish() {
        let engine = SimulatedEngine::new();
        let (mut controller, mut events) = joined(&engine).await;

        engine.publish_remote("u1", MediaKind::Audio);
        engine.publish_remote("u1", MediaKind::Video);
        engine.unpublish_remote("u1", MediaKind::Video);
        pump(&mut controller, &mut events).await;

        let p = controller
            .session()
            .participant(&ParticipantId::from("u1"))
            .unwrap();
        assert!(p.audio_available);
        assert!(!p.video_available);
        assert!(p.bound_surface.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_not_fatal() {
        let engine = SimulatedEngine::new();
        engine.fail_on(FailPoint::Subscribe(ParticipantId::from("u9"), MediaKind::Audio));
        let (mut controller, mut events) = joined(&engine).await;
        let mut notices = controller.notices();

        engine.publish_remote("u9", MediaKind::Audio);
        engine.publish_remote("u10", MediaKind::Audio);
        pump(&mut controller, &mut events).await;

        assert_eq!(controller.state(), ConnectionState::Joined);
        let mut warned = false;
        while let Ok(notice) = notices.try_recv() {
            assert!(!matches!(notice, SessionNotice::Fatal(_)));
            warned |= matches!(notice, SessionNotice::Warning(_));
        }
        assert!(warned);
        assert!(controller
            .session()
            .participant(&ParticipantId::from("u9"))
            .is_none());
        assert!(controller
            .session()
            .participant(&ParticipantId::from("u10"))
            .is_some());
        assert_eq!(controller.session().stats().subscribe_failures, 1);
    }

    #[tokio::test]
    async fn test_participants_keep_arrival_order() {
        let engine = SimulatedEngine::new();
        let (mut controller, mut events) = joined(&engine).await;

        for id in ["c", "a", "b"] {
            engine.publish_remote(id, MediaKind::Audio);
        }
        pump(&mut controller, &mut events).await;

        let ids: Vec<&str> = controller
            .session()
            .participants()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_toggle_audio_round_trip() {
        let engine = SimulatedEngine::new();
        let (mut controller, _events) = joined(&engine).await;

        assert!(controller.toggle_audio().await.unwrap());
        assert_eq!(engine.track_enabled(MediaKind::Audio), Some(false));
        assert!(!controller.toggle_audio().await.unwrap());
        assert_eq!(engine.track_enabled(MediaKind::Audio), Some(true));
    }

    #[tokio::test]
    async fn test_toggle_without_track_is_noop() {
        let engine = SimulatedEngine::new();
        let mut controller = controller(&engine);

        assert!(controller.toggle_audio().await.unwrap());
        assert!(controller.toggle_video().await.unwrap());
        assert_eq!(
            engine.count_calls(|c| matches!(c, EngineCall::SetEnabled(..))),
            0
        );
    }

    #[tokio::test]
    async fn test_rejected_toggle_restores_flag() {
        let engine = SimulatedEngine::new();
        let (mut controller, _events) = joined(&engine).await;
        engine.fail_on(FailPoint::SetEnabled(MediaKind::Video));

        let err = controller.toggle_video().await.unwrap_err();
        assert!(matches!(err, SessionError::ControlFailure { .. }));
        assert!(!controller.session().is_muted(MediaKind::Video));
        assert_eq!(controller.state(), ConnectionState::Joined);
        assert_eq!(controller.session().stats().control_failures, 1);
    }

    #[tokio::test]
    async fn test_end_call_releases_everything() {
        let engine = SimulatedEngine::new();
        let (mut controller, mut events) = joined(&engine).await;
        engine.publish_remote("u1", MediaKind::Video);
        pump(&mut controller, &mut events).await;

        controller.end_call().await;

        assert_eq!(controller.state(), ConnectionState::Left);
        assert!(!controller.session().slot(MediaKind::Audio).is_present());
        assert!(!controller.session().slot(MediaKind::Video).is_present());
        assert_eq!(controller.session().participant_count(), 0);
        assert_eq!(controller.binder().live_surfaces(), 0);
        assert_eq!(engine.open_resources(), 0);

        let tail: Vec<_> = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::Leave | EngineCall::CloseTrack(_)))
            .collect();
        assert_eq!(
            tail,
            vec![
                EngineCall::Leave,
                EngineCall::CloseTrack(MediaKind::Audio),
                EngineCall::CloseTrack(MediaKind::Video),
            ]
        );
    }

    #[tokio::test]
    async fn test_end_call_is_idempotent() {
        let engine = SimulatedEngine::new();
        let (mut controller, _events) = joined(&engine).await;

        controller.end_call().await;
        controller.end_call().await;

        assert_eq!(controller.state(), ConnectionState::Left);
        assert_eq!(engine.count_calls(|c| *c == EngineCall::Leave), 1);
    }

    #[tokio::test]
    async fn test_teardown_continues_after_leave_failure() {
        let engine = SimulatedEngine::new();
        let (mut controller, _events) = joined(&engine).await;
        engine.fail_on(FailPoint::Leave);

        controller.end_call().await;

        assert_eq!(controller.state(), ConnectionState::Left);
        assert_eq!(engine.open_tracks(), 0);
    }

    #[tokio::test]
    async fn test_events_after_leaving_are_dropped() {
        let engine = SimulatedEngine::new();
        let (mut controller, _events) = joined(&engine).await;
        controller.end_call().await;

        controller
            .handle_event(EngineEvent::ParticipantPublished {
                participant: ParticipantId::from("late"),
                kind: MediaKind::Audio,
            })
            .await;

        assert_eq!(controller.session().participant_count(), 0);
        assert_eq!(controller.session().stats().events_dropped, 1);
    }

    #[tokio::test]
    async fn test_random_identity_within_range() {
        let engine = SimulatedEngine::new();
        let mut config = AppConfig::default();
        config.session.identity = IdentityStrategy::Random;
        config.session.identity_range = 10;
        let mut controller = SessionController::new(Arc::new(engine.clone()), &config);

        let identity = controller.join("room-1", "tok-a").await.unwrap();
        assert!(identity.0 < 10);
        assert_eq!(controller.session().local_identity(), Some(identity));
    }

    #[tokio::test]
    async fn test_random_identity_with_empty_range() {
        let engine = SimulatedEngine::new();
        let mut config = AppConfig::default();
        config.session.identity = IdentityStrategy::Random;
        config.session.identity_range = 0;
        let mut controller = SessionController::new(Arc::new(engine.clone()), &config);

        let identity = controller.join("room-1", "tok-a").await.unwrap();
        assert_eq!(identity.0, 0);
    }

    #[tokio::test]
    async fn test_local_preview_rendered() {
        let engine = SimulatedEngine::new();
        let (_controller, _events) = joined(&engine).await;

        assert_eq!(
            engine.count_calls(|c| matches!(c, EngineCall::PlayLocal(MediaKind::Video, _))),
            1
        );
    }
}
